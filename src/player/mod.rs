// 播放器核心模块

pub mod packet_queue;
pub mod frame_queue;
pub mod demuxer_source;
pub mod resampler;
pub mod decoder;
pub mod demuxer_thread;
pub mod sync;
pub mod audio_render;
pub mod sample_queue;
pub mod tracks;
pub mod session;
pub mod manager;
pub mod subtitle_text;
#[cfg(feature = "ffmpeg")]
pub mod demuxer;
#[cfg(feature = "ffmpeg")]
pub mod codec;

pub use demuxer_source::{DemuxerSource, ReadOutcome, StreamDecoder, StreamInfo, StreamParams};
pub use demuxer_thread::{DemuxerThread, EndOfMediaPolicy};
pub use manager::PlaybackManager;
pub use packet_queue::MediaPacket;
pub use resampler::{AudioParams, AudioResampler, LinearResampler};
#[cfg(feature = "ffmpeg")]
pub use demuxer::Demuxer;
