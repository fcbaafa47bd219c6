//! 合成媒体源：固定帧率的视频流和 48kHz 立体声 S16 音频流

use myy_media::core::{
    AudioBuffer, PixelFormat, Picture, PlayerError, Result, SampleFormat,
};
use myy_media::player::demuxer_source::{
    DecodedFrame, FramePayload, ReadOutcome, ReceiveStatus, SendStatus, StreamDecoder, StreamInfo,
    StreamParams,
};
use myy_media::player::{DemuxerSource, MediaPacket};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// 每个音频包的采样数（30fps 时与视频帧等长）
pub const AUDIO_FRAME_SAMPLES: i64 = 1600;

#[derive(Debug, Clone)]
pub struct SyntheticConfig {
    pub duration: f64,
    pub fps: f64,
    pub sample_rate: u32,
    pub video: bool,
    pub audio: bool,
    /// 音频解码器打开失败
    pub broken_audio_decoder: bool,
}

impl SyntheticConfig {
    /// 10 秒，30fps，48kHz 立体声
    pub fn ten_seconds() -> Self {
        Self::with_duration(10.0)
    }

    pub fn with_duration(duration: f64) -> Self {
        Self {
            duration,
            fps: 30.0,
            sample_rate: 48000,
            video: true,
            audio: true,
            broken_audio_decoder: false,
        }
    }

    fn video_packets(&self) -> i64 {
        if self.video {
            (self.duration * self.fps).round() as i64
        } else {
            0
        }
    }

    fn audio_packets(&self) -> i64 {
        if self.audio {
            (self.duration * self.sample_rate as f64 / AUDIO_FRAME_SAMPLES as f64).ceil() as i64
        } else {
            0
        }
    }
}

pub struct SyntheticSource {
    config: SyntheticConfig,
    video_index: Option<usize>,
    audio_index: Option<usize>,
    next_video: i64,
    next_audio: i64,
    /// 读取次数，用于观察读取线程是否在工作
    pub reads: Arc<AtomicUsize>,
    pub seeks: Arc<AtomicUsize>,
}

impl SyntheticSource {
    pub fn new(config: SyntheticConfig) -> Self {
        let video_index = config.video.then_some(0);
        let audio_index = config.audio.then_some(usize::from(config.video));
        Self {
            config,
            video_index,
            audio_index,
            next_video: 0,
            next_audio: 0,
            reads: Arc::new(AtomicUsize::new(0)),
            seeks: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn video_time(&self) -> f64 {
        self.next_video as f64 / self.config.fps
    }

    fn audio_time(&self) -> f64 {
        (self.next_audio * AUDIO_FRAME_SAMPLES) as f64 / self.config.sample_rate as f64
    }

    fn audio_time_base(&self) -> f64 {
        1.0 / self.config.sample_rate as f64
    }
}

impl DemuxerSource for SyntheticSource {
    fn streams(&self) -> Vec<StreamInfo> {
        let mut streams = Vec::new();
        if let Some(index) = self.video_index {
            streams.push(StreamInfo {
                index,
                codec_name: "synthetic_video".into(),
                time_base: 1.0 / self.config.fps,
                start_time: Some(0),
                language: None,
                title: None,
                params: StreamParams::Video {
                    width: 2,
                    height: 2,
                    frame_rate: self.config.fps,
                    avg_frame_rate: self.config.fps,
                    bit_rate: 0,
                },
                attached_picture: None,
            });
        }
        if let Some(index) = self.audio_index {
            streams.push(StreamInfo {
                index,
                codec_name: "synthetic_pcm".into(),
                time_base: self.audio_time_base(),
                start_time: Some(0),
                language: Some("eng".into()),
                title: Some("Synthetic Stereo".into()),
                params: StreamParams::Audio {
                    sample_rate: self.config.sample_rate,
                    channels: 2,
                    channel_layout: 0x3,
                    sample_format: SampleFormat::S16,
                    bits_per_sample: 16,
                },
                attached_picture: None,
            });
        }
        streams
    }

    fn duration(&self) -> Option<f64> {
        Some(self.config.duration)
    }

    fn read_packet(&mut self) -> ReadOutcome {
        self.reads.fetch_add(1, Ordering::Relaxed);
        let video_done = self.next_video >= self.config.video_packets();
        let audio_done = self.next_audio >= self.config.audio_packets();
        if video_done && audio_done {
            return ReadOutcome::EndOfFile;
        }

        let take_video = !video_done && (audio_done || self.video_time() <= self.audio_time());
        let packet = if take_video {
            let pts = self.next_video;
            self.next_video += 1;
            MediaPacket {
                stream_index: self.video_index.unwrap_or(0),
                data: vec![0; 64],
                pts: Some(pts),
                dts: Some(pts),
                duration: 1,
                pos: pts * 64,
                is_key: true,
            }
        } else {
            let pts = self.next_audio * AUDIO_FRAME_SAMPLES;
            self.next_audio += 1;
            MediaPacket {
                stream_index: self.audio_index.unwrap_or(0),
                data: vec![0; 32],
                pts: Some(pts),
                dts: Some(pts),
                duration: AUDIO_FRAME_SAMPLES,
                pos: -1,
                is_key: true,
            }
        };
        ReadOutcome::Packet(packet)
    }

    fn seek(&mut self, _min: i64, target: i64, _max: i64) -> Result<()> {
        if target < 0 {
            return Err(PlayerError::SeekError(format!("负的 seek 目标: {}", target)));
        }
        self.seeks.fetch_add(1, Ordering::Relaxed);
        let time = target as f64 / 1_000_000.0;
        self.next_video = (time * self.config.fps + 1e-9).floor() as i64;
        self.next_audio =
            (time * self.config.sample_rate as f64 / AUDIO_FRAME_SAMPLES as f64 + 1e-9).floor() as i64;
        Ok(())
    }

    fn open_decoder(&mut self, stream_index: usize) -> Result<Box<dyn StreamDecoder>> {
        if Some(stream_index) == self.video_index {
            Ok(Box::new(SyntheticCodec::video(1.0 / self.config.fps)))
        } else if Some(stream_index) == self.audio_index && !self.config.broken_audio_decoder {
            Ok(Box::new(SyntheticCodec::audio(self.config.sample_rate)))
        } else {
            Err(PlayerError::DecoderNotFound(format!("stream {}", stream_index)))
        }
    }

    fn description(&self) -> String {
        format!("synthetic {:.1}s @ {}fps", self.config.duration, self.config.fps)
    }
}

enum CodecKind {
    Video,
    Audio { sample_rate: u32 },
}

/// 每个数据包产出一帧
pub struct SyntheticCodec {
    kind: CodecKind,
    time_base: f64,
    output: VecDeque<DecodedFrame>,
    draining: bool,
}

impl SyntheticCodec {
    pub fn video(time_base: f64) -> Self {
        Self {
            kind: CodecKind::Video,
            time_base,
            output: VecDeque::new(),
            draining: false,
        }
    }

    pub fn audio(sample_rate: u32) -> Self {
        Self {
            kind: CodecKind::Audio { sample_rate },
            time_base: 1.0 / sample_rate as f64,
            output: VecDeque::new(),
            draining: false,
        }
    }
}

impl StreamDecoder for SyntheticCodec {
    fn send_packet(&mut self, packet: Option<&MediaPacket>) -> Result<SendStatus> {
        let Some(packet) = packet else {
            self.draining = true;
            return Ok(SendStatus::Accepted);
        };
        let payload = match self.kind {
            CodecKind::Video => FramePayload::Video(Picture {
                width: 2,
                height: 2,
                format: PixelFormat::BGRA,
                stride: 8,
                data: vec![0x80; 16],
            }),
            CodecKind::Audio { sample_rate } => FramePayload::Audio(AudioBuffer {
                format: SampleFormat::S16,
                sample_rate,
                channels: 2,
                channel_layout: 0x3,
                nb_samples: AUDIO_FRAME_SAMPLES as usize,
                planes: vec![vec![0; AUDIO_FRAME_SAMPLES as usize * 4]],
            }),
        };
        self.output.push_back(DecodedFrame {
            pts: packet.pts.map(|pts| pts as f64 * self.time_base),
            pos: packet.pos,
            payload,
        });
        Ok(SendStatus::Accepted)
    }

    fn receive_frame(&mut self) -> Result<ReceiveStatus> {
        match self.output.pop_front() {
            Some(frame) => Ok(ReceiveStatus::Frame(frame)),
            None if self.draining => Ok(ReceiveStatus::Eof),
            None => Ok(ReceiveStatus::Again),
        }
    }

    fn flush(&mut self) {
        self.output.clear();
        self.draining = false;
    }
}
