use serde::{Deserialize, Serialize};

/// 轨道（流）类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Audio,
    Video,
    Subtitle,
}

/// 会话状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaState {
    #[default]
    Closed,
    Preparing,
    Playing,
    Paused,
    Stopped,
    Error,
}

/// 延迟投递给宿主的事件，按入队顺序由宿主轮询取走
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MediaEvent {
    MediaOpened,
    MediaOpenFailed,
    MediaClosed,
    TracksChanged,
    SeekCompleted,
    PlaybackEndReached,
    PlaybackSuspended,
    PlaybackResumed,
}

/// 同步主时钟
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncMaster {
    #[default]
    Audio,
    Video,
    External,
}

/// 宿主可请求的控制动作
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaControl {
    Pause,
    Resume,
    Seek,
    Scrub,
}

/// 像素格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelFormat {
    BGRA,
    RGBA,
    RGB,
    YUV420P,
    NV12,
}

/// 音频采样格式（P 后缀为平面格式，每个声道一个平面）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SampleFormat {
    U8,
    S16,
    S32,
    F32,
    F64,
    U8P,
    S16P,
    S32P,
    F32P,
    F64P,
}

impl SampleFormat {
    pub fn bytes_per_sample(self) -> usize {
        match self {
            SampleFormat::U8 | SampleFormat::U8P => 1,
            SampleFormat::S16 | SampleFormat::S16P => 2,
            SampleFormat::S32 | SampleFormat::S32P | SampleFormat::F32 | SampleFormat::F32P => 4,
            SampleFormat::F64 | SampleFormat::F64P => 8,
        }
    }

    pub fn is_planar(self) -> bool {
        matches!(
            self,
            SampleFormat::U8P
                | SampleFormat::S16P
                | SampleFormat::S32P
                | SampleFormat::F32P
                | SampleFormat::F64P
        )
    }
}

/// 解码器输出的原始音频（未重采样）
#[derive(Debug, Clone)]
pub struct AudioBuffer {
    pub format: SampleFormat,
    pub sample_rate: u32,
    pub channels: u16,
    pub channel_layout: u64,
    pub nb_samples: usize,
    /// 交错格式只有一个平面；平面格式每个声道一个
    pub planes: Vec<Vec<u8>>,
}

impl AudioBuffer {
    /// 全部声道的有效字节数
    pub fn data_size(&self) -> usize {
        self.nb_samples * self.channels as usize * self.format.bytes_per_sample()
    }
}

/// 解码器输出的图像
#[derive(Debug, Clone)]
pub struct Picture {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub stride: usize,
    pub data: Vec<u8>,
}

/// 解码器输出的字幕，显示窗口相对于 pts（毫秒）
#[derive(Debug, Clone, Default)]
pub struct SubtitlePayload {
    pub start_display_ms: u32,
    pub end_display_ms: u32,
    pub text: String,
}

/// 带时间信息的输出样本
pub trait TimedSample {
    /// 起始时间（秒）
    fn time(&self) -> f64;
    /// 持续时间（秒）
    fn duration(&self) -> f64;

    fn end_time(&self) -> f64 {
        self.time() + self.duration()
    }
}

/// 交给宿主的音频样本（目标格式：交错 S16）
#[derive(Debug, Clone)]
pub struct AudioSample {
    pub data: Vec<u8>,
    pub format: SampleFormat,
    pub channels: u16,
    pub sample_rate: u32,
    pub time: f64,
    pub duration: f64,
}

/// 交给宿主的视频样本
#[derive(Debug, Clone)]
pub struct VideoSample {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub stride: usize,
    pub format: PixelFormat,
    pub time: f64,
    pub duration: f64,
}

/// 交给宿主的字幕叠加样本
#[derive(Debug, Clone)]
pub struct OverlaySample {
    pub text: String,
    pub time: f64,
    pub duration: f64,
}

impl TimedSample for AudioSample {
    fn time(&self) -> f64 {
        self.time
    }
    fn duration(&self) -> f64 {
        self.duration
    }
}

impl TimedSample for VideoSample {
    fn time(&self) -> f64 {
        self.time
    }
    fn duration(&self) -> f64 {
        self.duration
    }
}

impl TimedSample for OverlaySample {
    fn time(&self) -> f64 {
        self.time
    }
    fn duration(&self) -> f64 {
        self.duration
    }
}

/// 半开时间区间 [start, end)，单位秒
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: f64,
    pub end: f64,
}

impl TimeRange {
    pub fn new(start: f64, end: f64) -> Self {
        Self { start, end }
    }

    pub fn overlaps(&self, start: f64, end: f64) -> bool {
        start < self.end && self.start < end
    }

    /// 与 [start, end) 的重叠长度，不重叠时为 0
    pub fn overlap(&self, start: f64, end: f64) -> f64 {
        (self.end.min(end) - self.start.max(start)).max(0.0)
    }
}

/// 样本获取结果
#[derive(Debug, Clone)]
pub enum FetchResult<T> {
    Ok(T),
    /// 队列中没有可用样本
    NoSample,
    /// 有样本，但都晚于请求的时间区间
    NotYetAvailable,
}

impl<T> FetchResult<T> {
    pub fn is_ok(&self) -> bool {
        matches!(self, FetchResult::Ok(_))
    }

    pub fn into_sample(self) -> Option<T> {
        match self {
            FetchResult::Ok(sample) => Some(sample),
            _ => None,
        }
    }
}

/// 音频轨道格式（输出固定为交错 S16）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioTrackFormat {
    pub bits_per_sample: u32,
    pub channels: u16,
    pub channel_layout: u64,
    pub sample_rate: u32,
    pub sample_format: SampleFormat,
    /// 每个采样帧（全部声道）的字节数
    pub frame_size: usize,
    pub bytes_per_sec: usize,
    /// 模拟硬件缓冲的字节数
    pub hardware_size: usize,
    pub type_name: String,
}

/// 视频轨道格式
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoTrackFormat {
    pub width: u32,
    pub height: u32,
    pub frame_rate: f64,
    pub bit_rate: i64,
    pub type_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TrackFormat {
    Audio(AudioTrackFormat),
    Video(VideoTrackFormat),
    Subtitle { type_name: String },
}

/// 轨道描述，打开媒体时从容器元数据生成一次，之后不变
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    /// 同类型轨道中的序号
    pub index: usize,
    /// 容器中的流索引
    pub stream_index: usize,
    pub media_type: MediaType,
    pub name: String,
    pub display_name: String,
    pub language: String,
    pub format: TrackFormat,
}

/// 会话变更标志，宿主读取后清除
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlayerFlags {
    pub media_source_changed: bool,
    pub selection_changed: bool,
}

/// 缓冲状态信息（用于监控和调试）
#[derive(Debug, Clone, Default, Serialize)]
pub struct BufferStatus {
    /// 数据包队列长度
    pub video_packets: usize,
    pub audio_packets: usize,
    pub subtitle_packets: usize,

    /// 三个包队列的总字节数
    pub queued_bytes: usize,

    /// 已解码待显示的帧
    pub video_frames: usize,
    pub audio_frames: usize,
    pub subtitle_frames: usize,

    /// 等待宿主取走的样本
    pub pending_video_samples: usize,
    pub pending_audio_samples: usize,

    pub frames_dropped_early: u64,
    pub frames_dropped_late: u64,
}
