//! myy_media - 音视频解复用、解码与同步核心
//!
//! 读取线程把数据包分发到各流的包队列，解码线程产出帧，
//! 显示线程和音频渲染线程按主时钟同步后把样本交给宿主轮询。

pub mod core;
pub mod player;

pub use crate::core::{
    MediaControl, MediaEvent, MediaState, MediaType, PlayerError, PlayerOptions, Result, SyncMaster,
    TimeRange,
};
pub use crate::player::{DemuxerSource, PlaybackManager};
