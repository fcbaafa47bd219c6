use crate::core::error::Result;
use crate::core::types::SyncMaster;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// 播放选项
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerOptions {
    /// 同步主时钟
    pub sync_master: SyncMaster,

    /// 播放到结尾后是否从头循环
    pub looping: bool,

    /// 是否不限制读取缓冲；None 表示实时源自动开启
    pub infinite_buffer: Option<bool>,

    /// 是否丢弃迟到的视频帧；None 表示视频不是主时钟时自动开启
    pub framedrop: Option<bool>,

    /// 开始读取时先 seek 到该位置（秒）
    pub start_time: Option<f64>,

    /// 播放窗口长度（秒），超出窗口的数据包被丢弃；None 使用容器时长
    pub play_duration: Option<f64>,

    /// 是否启用字幕轨道
    pub enable_captions: bool,
}

impl Default for PlayerOptions {
    fn default() -> Self {
        Self {
            sync_master: SyncMaster::Audio,
            looping: false,
            infinite_buffer: None,
            framedrop: None,
            start_time: None,
            play_duration: None,
            enable_captions: false,
        }
    }
}

impl PlayerOptions {
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }
}
