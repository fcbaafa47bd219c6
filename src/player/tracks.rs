use crate::core::{AudioTrackFormat, MediaType, SampleFormat, Track, TrackFormat, VideoTrackFormat};
use crate::player::demuxer_source::{StreamInfo, StreamParams};
use log::debug;

/// 模拟硬件缓冲的最小采样数
pub const AUDIO_MIN_BUFFER_SIZE: usize = 512;
/// 每秒最多的音频回调次数，决定模拟硬件缓冲的大小
pub const AUDIO_MAX_CALLBACKS_PER_SEC: u32 = 30;

/// 模拟硬件缓冲的采样数：max(512, 2 << log2(rate / 30))
pub fn hardware_buffer_samples(sample_rate: u32) -> usize {
    let per_callback = sample_rate / AUDIO_MAX_CALLBACKS_PER_SEC;
    let log2 = if per_callback == 0 {
        0
    } else {
        31 - per_callback.leading_zeros()
    };
    AUDIO_MIN_BUFFER_SIZE.max(2usize << log2)
}

/// 按类型分组的轨道列表
#[derive(Debug, Clone, Default)]
pub struct TrackList {
    audio: Vec<Track>,
    video: Vec<Track>,
    captions: Vec<Track>,
}

impl TrackList {
    /// 从流描述生成轨道，返回轨道列表和需要打开的流数量。
    /// 字幕轨道总会列出，但只有启用字幕时才计入需要打开的流。
    pub fn from_streams(streams: &[StreamInfo], enable_captions: bool) -> (Self, usize) {
        let mut list = Self::default();
        let mut counted = 0;
        for info in streams {
            let Some(media_type) = info.media_type() else {
                debug!("跳过不支持的流 #{} ({})", info.index, info.codec_name);
                continue;
            };
            let tracks = list.tracks_mut(media_type);
            let track = build_track(info, media_type, tracks.len());
            tracks.push(track);
            if media_type != MediaType::Subtitle || enable_captions {
                counted += 1;
            }
        }
        (list, counted)
    }

    pub fn tracks(&self, media_type: MediaType) -> &[Track] {
        match media_type {
            MediaType::Audio => &self.audio,
            MediaType::Video => &self.video,
            MediaType::Subtitle => &self.captions,
        }
    }

    fn tracks_mut(&mut self, media_type: MediaType) -> &mut Vec<Track> {
        match media_type {
            MediaType::Audio => &mut self.audio,
            MediaType::Video => &mut self.video,
            MediaType::Subtitle => &mut self.captions,
        }
    }

    pub fn get(&self, media_type: MediaType, index: usize) -> Option<&Track> {
        self.tracks(media_type).get(index)
    }

    pub fn len(&self, media_type: MediaType) -> usize {
        self.tracks(media_type).len()
    }
}

fn build_track(info: &StreamInfo, media_type: MediaType, index: usize) -> Track {
    let type_name = info.codec_name.clone();
    let format = match info.params {
        StreamParams::Audio {
            sample_rate,
            channels,
            channel_layout,
            ..
        } => {
            // 输出固定为交错 S16
            let frame_size = channels as usize * SampleFormat::S16.bytes_per_sample();
            TrackFormat::Audio(AudioTrackFormat {
                bits_per_sample: 16,
                channels,
                channel_layout,
                sample_rate,
                sample_format: SampleFormat::S16,
                frame_size,
                bytes_per_sec: frame_size * sample_rate as usize,
                hardware_size: frame_size * hardware_buffer_samples(sample_rate),
                type_name,
            })
        }
        StreamParams::Video {
            width,
            height,
            bit_rate,
            ..
        } => TrackFormat::Video(VideoTrackFormat {
            width,
            height,
            frame_rate: info.frame_rate(),
            bit_rate,
            type_name,
        }),
        StreamParams::Subtitle | StreamParams::Other => TrackFormat::Subtitle { type_name },
    };

    let name = info.title.clone().unwrap_or_default();
    let display_name = if name.is_empty() {
        format!("Unnamed Track (Stream {})", info.index)
    } else {
        name.clone()
    };

    Track {
        index,
        stream_index: info.index,
        media_type,
        name,
        display_name,
        language: info.language.clone().unwrap_or_default(),
        format,
    }
}
