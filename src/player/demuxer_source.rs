use crate::core::{AudioBuffer, MediaType, Picture, PlayerError, Result, SampleFormat, SubtitlePayload};
use crate::player::packet_queue::MediaPacket;
use crate::player::resampler::{AudioParams, AudioResampler, LinearResampler};

/// 流的类型相关参数
#[derive(Debug, Clone, PartialEq)]
pub enum StreamParams {
    Audio {
        sample_rate: u32,
        channels: u16,
        channel_layout: u64,
        sample_format: SampleFormat,
        bits_per_sample: u32,
    },
    Video {
        width: u32,
        height: u32,
        /// 真实帧率（r_frame_rate），未知为 0
        frame_rate: f64,
        avg_frame_rate: f64,
        bit_rate: i64,
    },
    Subtitle,
    /// 数据流、附件等
    Other,
}

/// 容器中一个流的描述
#[derive(Debug, Clone)]
pub struct StreamInfo {
    pub index: usize,
    pub codec_name: String,
    /// 每个时间戳单位对应的秒数
    pub time_base: f64,
    /// 以 time_base 为单位
    pub start_time: Option<i64>,
    pub language: Option<String>,
    pub title: Option<String>,
    pub params: StreamParams,
    /// 封面图（attached picture）
    pub attached_picture: Option<MediaPacket>,
}

impl StreamInfo {
    pub fn media_type(&self) -> Option<MediaType> {
        match self.params {
            StreamParams::Audio { .. } => Some(MediaType::Audio),
            StreamParams::Video { .. } => Some(MediaType::Video),
            StreamParams::Subtitle => Some(MediaType::Subtitle),
            StreamParams::Other => None,
        }
    }

    /// 视频帧率：优先 r_frame_rate，其次平均帧率
    pub fn frame_rate(&self) -> f64 {
        match self.params {
            StreamParams::Video { frame_rate, avg_frame_rate, .. } => {
                if frame_rate > 0.0 {
                    frame_rate
                } else {
                    avg_frame_rate
                }
            }
            _ => 0.0,
        }
    }
}

/// 读取一个数据包的结果
#[derive(Debug)]
pub enum ReadOutcome {
    Packet(MediaPacket),
    EndOfFile,
    /// 可恢复的读取错误（网络抖动等），稍后重试
    Error(String),
}

/// 解码输出的内容
#[derive(Debug, Clone)]
pub enum FramePayload {
    Audio(AudioBuffer),
    Video(Picture),
    Subtitle(SubtitlePayload),
}

/// 解码输出
#[derive(Debug, Clone)]
pub struct DecodedFrame {
    /// 显示时间（秒）
    pub pts: Option<f64>,
    pub pos: i64,
    pub payload: FramePayload,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendStatus {
    Accepted,
    /// 解码器内部已满，需先取出帧后重新送入同一个包
    Again,
}

#[derive(Debug)]
pub enum ReceiveStatus {
    Frame(DecodedFrame),
    /// 需要更多数据包
    Again,
    /// 已排空（送入结束标记之后）
    Eof,
}

/// 单个流的解码器（send/receive 模型）
pub trait StreamDecoder: Send {
    /// 送入数据包；None 表示流结束，开始排空
    fn send_packet(&mut self, packet: Option<&MediaPacket>) -> Result<SendStatus>;

    fn receive_frame(&mut self) -> Result<ReceiveStatus>;

    /// 丢弃内部缓冲（seek 后调用）
    fn flush(&mut self);
}

/// Demuxer 数据源抽象接口
///
/// 不同的媒体源（本地文件、网络流、合成源等）实现这个接口，
/// 同时负责为自己的流创建解码器和音频转换器。
/// 时间戳参数均以微秒为单位。
pub trait DemuxerSource: Send {
    /// 全部流的描述，顺序与流索引一致
    fn streams(&self) -> Vec<StreamInfo>;

    /// 总时长（秒），未知时为 None
    fn duration(&self) -> Option<f64>;

    /// 容器起始时间（秒）
    fn start_time(&self) -> Option<f64> {
        None
    }

    /// 实时源（不能暂停缓冲、时钟需要自适应）
    fn is_realtime(&self) -> bool {
        false
    }

    /// 时间戳可能不连续的格式（如 MPEG-TS）
    fn has_discontinuous_timestamps(&self) -> bool {
        false
    }

    /// 读取下一个媒体包
    fn read_packet(&mut self) -> ReadOutcome;

    /// 在 [min, max] 范围内 seek 到最接近 target 的位置
    fn seek(&mut self, min: i64, target: i64, max: i64) -> Result<()>;

    /// 暂停网络读取（RTSP 等）；不支持时返回 Unsupported
    fn read_pause(&mut self) -> Result<()> {
        Err(PlayerError::Unsupported("read_pause".into()))
    }

    fn read_play(&mut self) -> Result<()> {
        Ok(())
    }

    /// 启用/禁用某个流的读取
    fn set_stream_enabled(&mut self, _stream_index: usize, _enabled: bool) {}

    fn open_decoder(&mut self, stream_index: usize) -> Result<Box<dyn StreamDecoder>>;

    /// 默认使用内置的线性重采样器
    fn create_resampler(
        &self,
        src: &AudioParams,
        dst: &AudioParams,
    ) -> Result<Box<dyn AudioResampler>> {
        Ok(Box::new(LinearResampler::new(*src, *dst)?))
    }

    /// 获取描述信息（用于调试）
    fn description(&self) -> String;
}

/// 按格式名或 URL 判断是否为实时源
pub fn is_realtime_source(format_name: &str, url: &str) -> bool {
    let format_name = format_name.to_ascii_lowercase();
    if format_name
        .split(',')
        .any(|name| matches!(name.trim(), "rtp" | "rtsp" | "sdp"))
    {
        return true;
    }
    let url = url.to_ascii_lowercase();
    url.starts_with("rtp:") || url.starts_with("udp:") || url.starts_with("rtmp:")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_realtime_detection() {
        assert!(is_realtime_source("rtsp", "rtsp://camera/live"));
        assert!(is_realtime_source("sdp", "session.sdp"));
        assert!(is_realtime_source("flv", "rtmp://host/app/stream"));
        assert!(is_realtime_source("mpegts", "udp://239.0.0.1:1234"));
        assert!(!is_realtime_source("mov,mp4,m4a,3gp,3g2,mj2", "/videos/movie.mp4"));
        assert!(!is_realtime_source("hls", "https://host/index.m3u8"));
    }

    #[test]
    fn test_frame_rate_falls_back_to_average() {
        let mut info = StreamInfo {
            index: 0,
            codec_name: "h264".into(),
            time_base: 1.0 / 90000.0,
            start_time: None,
            language: None,
            title: None,
            params: StreamParams::Video {
                width: 1920,
                height: 1080,
                frame_rate: 0.0,
                avg_frame_rate: 29.97,
                bit_rate: 0,
            },
            attached_picture: None,
        };
        assert_eq!(info.media_type(), Some(MediaType::Video));
        assert!((info.frame_rate() - 29.97).abs() < 1e-9);

        info.params = StreamParams::Video {
            width: 1920,
            height: 1080,
            frame_rate: 30.0,
            avg_frame_rate: 29.97,
            bit_rate: 0,
        };
        assert_eq!(info.frame_rate(), 30.0);
    }
}
