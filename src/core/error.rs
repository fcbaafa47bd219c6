use crate::core::types::MediaType;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PlayerError {
    #[cfg(feature = "ffmpeg")]
    #[error("FFmpeg 错误: {0}")]
    FFmpegError(#[from] ffmpeg_next::Error),

    #[error("IO 错误: {0}")]
    IoError(#[from] std::io::Error),

    #[error("配置解析错误: {0}")]
    ConfigError(#[from] serde_json::Error),

    #[error("无法打开媒体: {0}")]
    OpenError(String),

    #[error("找不到解码器: {0}")]
    DecoderNotFound(String),

    #[error("解码错误: {0}")]
    DecodeError(String),

    #[error("重采样错误: {0}")]
    ResampleError(String),

    #[error("Seek 被拒绝: {0}")]
    SeekRejected(String),

    #[error("Seek 失败: {0}")]
    SeekError(String),

    #[error("无效的轨道: {0:?} #{1}")]
    InvalidTrack(MediaType, usize),

    #[error("不支持的播放速率: {0}")]
    InvalidRate(f32),

    #[error("媒体未打开")]
    NotOpened,

    #[error("不支持的操作: {0}")]
    Unsupported(String),

    #[error("其他错误: {0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, PlayerError>;
