//! FFmpeg 编解码器：音频、视频（sws 转 BGRA）、字幕，以及 swr 重采样器

use crate::core::{
    log_ctx, AudioBuffer, Picture, PixelFormat, PlayerError, Result, SampleFormat, SubtitlePayload,
};
use crate::player::demuxer_source::{
    DecodedFrame, FramePayload, ReceiveStatus, SendStatus, StreamDecoder,
};
use crate::player::packet_queue::MediaPacket;
use crate::player::resampler::{AudioParams, AudioResampler};
use crate::player::subtitle_text::{ass_dialogue_text, clean_subtitle_text};
use ffmpeg_next as ffmpeg;
use ffmpeg_next::format::sample::Type as SampleType;
use ffmpeg_next::format::Sample;
use ffmpeg_next::software::{resampling, scaling};
use ffmpeg_next::{codec, decoder, ffi, format, frame, media, ChannelLayout};
use log::{debug, info, warn};
use std::collections::VecDeque;

pub fn sample_format_from_ffmpeg(format: Sample) -> Option<SampleFormat> {
    let format = match format {
        Sample::U8(SampleType::Packed) => SampleFormat::U8,
        Sample::I16(SampleType::Packed) => SampleFormat::S16,
        Sample::I32(SampleType::Packed) => SampleFormat::S32,
        Sample::F32(SampleType::Packed) => SampleFormat::F32,
        Sample::F64(SampleType::Packed) => SampleFormat::F64,
        Sample::U8(SampleType::Planar) => SampleFormat::U8P,
        Sample::I16(SampleType::Planar) => SampleFormat::S16P,
        Sample::I32(SampleType::Planar) => SampleFormat::S32P,
        Sample::F32(SampleType::Planar) => SampleFormat::F32P,
        Sample::F64(SampleType::Planar) => SampleFormat::F64P,
        _ => return None,
    };
    Some(format)
}

pub fn sample_format_to_ffmpeg(format: SampleFormat) -> Sample {
    match format {
        SampleFormat::U8 => Sample::U8(SampleType::Packed),
        SampleFormat::S16 => Sample::I16(SampleType::Packed),
        SampleFormat::S32 => Sample::I32(SampleType::Packed),
        SampleFormat::F32 => Sample::F32(SampleType::Packed),
        SampleFormat::F64 => Sample::F64(SampleType::Packed),
        SampleFormat::U8P => Sample::U8(SampleType::Planar),
        SampleFormat::S16P => Sample::I16(SampleType::Planar),
        SampleFormat::S32P => Sample::I32(SampleType::Planar),
        SampleFormat::F32P => Sample::F32(SampleType::Planar),
        SampleFormat::F64P => Sample::F64(SampleType::Planar),
    }
}

fn channel_layout(bits: u64, channels: u16) -> ChannelLayout {
    let layout = ChannelLayout::from_bits_truncate(bits);
    if bits == 0 || layout.channels() != i32::from(channels) {
        ChannelLayout::default(i32::from(channels))
    } else {
        layout
    }
}

fn is_again(error: &ffmpeg::Error) -> bool {
    matches!(error, ffmpeg::Error::Other { errno } if *errno == ffmpeg::error::EAGAIN)
}

fn to_ffmpeg_packet(packet: &MediaPacket) -> ffmpeg::Packet {
    let mut out = ffmpeg::Packet::copy(&packet.data);
    out.set_stream(packet.stream_index);
    out.set_pts(packet.pts);
    out.set_dts(packet.dts);
    out.set_duration(packet.duration);
    out.set_position(packet.pos as isize);
    if packet.is_key {
        out.set_flags(codec::packet::Flags::KEY);
    }
    out
}

/// 为流创建对应类型的解码器
pub fn open_decoder(stream: &format::stream::Stream) -> Result<Box<dyn StreamDecoder>> {
    let parameters = stream.parameters();
    let medium = parameters.medium();
    let name = parameters.id().name().to_string();
    let time_base = stream.time_base();
    let opened = codec::context::Context::from_parameters(parameters)?.decoder();

    let decoder: Box<dyn StreamDecoder> = match medium {
        media::Type::Audio => Box::new(FfmpegAudioDecoder {
            decoder: opened.audio()?,
            time_base: f64::from(time_base),
        }),
        media::Type::Video => Box::new(FfmpegVideoDecoder {
            decoder: opened.video()?,
            time_base: f64::from(time_base),
            scaler: None,
        }),
        media::Type::Subtitle => Box::new(FfmpegSubtitleDecoder {
            decoder: opened.subtitle()?,
            time_base: f64::from(time_base),
            pending: VecDeque::new(),
            draining: false,
        }),
        other => {
            return Err(PlayerError::DecoderNotFound(format!(
                "流 #{} 类型 {:?} 不支持解码",
                stream.index(),
                other
            )))
        }
    };
    info!("{} 🎛 打开解码器: 流 #{} {}", log_ctx(), stream.index(), name);
    Ok(decoder)
}

struct FfmpegAudioDecoder {
    decoder: decoder::Audio,
    time_base: f64,
}

// SAFETY: 解码器只在所属的解码线程中使用
unsafe impl Send for FfmpegAudioDecoder {}

impl StreamDecoder for FfmpegAudioDecoder {
    fn send_packet(&mut self, packet: Option<&MediaPacket>) -> Result<SendStatus> {
        let result = match packet {
            Some(packet) => self.decoder.send_packet(&to_ffmpeg_packet(packet)),
            None => self.decoder.send_eof(),
        };
        match result {
            Ok(()) => Ok(SendStatus::Accepted),
            Err(e) if is_again(&e) => Ok(SendStatus::Again),
            Err(ffmpeg::Error::Eof) => Ok(SendStatus::Accepted),
            Err(e) => Err(PlayerError::DecodeError(e.to_string())),
        }
    }

    fn receive_frame(&mut self) -> Result<ReceiveStatus> {
        let mut decoded = frame::Audio::empty();
        match self.decoder.receive_frame(&mut decoded) {
            Ok(()) => {}
            Err(ffmpeg::Error::Eof) => return Ok(ReceiveStatus::Eof),
            Err(e) if is_again(&e) => return Ok(ReceiveStatus::Again),
            Err(e) => return Err(PlayerError::DecodeError(e.to_string())),
        }

        let format = sample_format_from_ffmpeg(decoded.format()).ok_or_else(|| {
            PlayerError::DecodeError(format!("不支持的采样格式: {:?}", decoded.format()))
        })?;
        let channels = decoded.channels();
        let nb_samples = decoded.samples();
        let bytes = format.bytes_per_sample();
        let planes = if format.is_planar() {
            (0..channels as usize)
                .map(|c| decoded.data(c)[..nb_samples * bytes].to_vec())
                .collect()
        } else {
            vec![decoded.data(0)[..nb_samples * bytes * channels as usize].to_vec()]
        };
        let pts = decoded.pts().map(|pts| pts as f64 * self.time_base);
        Ok(ReceiveStatus::Frame(DecodedFrame {
            pts,
            pos: -1,
            payload: FramePayload::Audio(AudioBuffer {
                format,
                sample_rate: decoded.rate(),
                channels,
                channel_layout: decoded.channel_layout().bits(),
                nb_samples,
                planes,
            }),
        }))
    }

    fn flush(&mut self) {
        self.decoder.flush();
    }
}

struct FfmpegVideoDecoder {
    decoder: decoder::Video,
    time_base: f64,
    scaler: Option<scaling::Context>,
}

// SAFETY: 解码器和 sws 上下文只在所属的解码线程中使用
unsafe impl Send for FfmpegVideoDecoder {}

impl FfmpegVideoDecoder {
    fn ensure_scaler(&mut self, decoded: &frame::Video) -> Result<&mut scaling::Context> {
        let (width, height, src_format) = (decoded.width(), decoded.height(), decoded.format());
        let needs_recreate = self.scaler.as_ref().map_or(true, |s| {
            let input = s.input();
            input.format != src_format || input.width != width || input.height != height
        });
        if needs_recreate {
            debug!("{} 创建 sws 上下文: {:?} {}x{} → BGRA", log_ctx(), src_format, width, height);
            self.scaler = Some(scaling::Context::get(
                src_format,
                width,
                height,
                format::Pixel::BGRA,
                width,
                height,
                scaling::Flags::BICUBIC,
            )?);
        }
        self.scaler
            .as_mut()
            .ok_or_else(|| PlayerError::DecodeError("sws 上下文不可用".into()))
    }
}

impl StreamDecoder for FfmpegVideoDecoder {
    fn send_packet(&mut self, packet: Option<&MediaPacket>) -> Result<SendStatus> {
        let result = match packet {
            Some(packet) => self.decoder.send_packet(&to_ffmpeg_packet(packet)),
            None => self.decoder.send_eof(),
        };
        match result {
            Ok(()) => Ok(SendStatus::Accepted),
            Err(e) if is_again(&e) => Ok(SendStatus::Again),
            Err(ffmpeg::Error::Eof) => Ok(SendStatus::Accepted),
            Err(e) => Err(PlayerError::DecodeError(e.to_string())),
        }
    }

    fn receive_frame(&mut self) -> Result<ReceiveStatus> {
        let mut decoded = frame::Video::empty();
        match self.decoder.receive_frame(&mut decoded) {
            Ok(()) => {}
            Err(ffmpeg::Error::Eof) => return Ok(ReceiveStatus::Eof),
            Err(e) if is_again(&e) => return Ok(ReceiveStatus::Again),
            Err(e) => return Err(PlayerError::DecodeError(e.to_string())),
        }

        let mut bgra = frame::Video::empty();
        self.ensure_scaler(&decoded)?.run(&decoded, &mut bgra)?;
        let pts = decoded.timestamp().map(|pts| pts as f64 * self.time_base);
        // SAFETY: 只读取帧的 pkt_pos 字段
        let pos = unsafe { (*decoded.as_ptr()).pkt_pos };
        Ok(ReceiveStatus::Frame(DecodedFrame {
            pts,
            pos,
            payload: FramePayload::Video(Picture {
                width: bgra.width(),
                height: bgra.height(),
                format: PixelFormat::BGRA,
                stride: bgra.stride(0),
                data: bgra.data(0).to_vec(),
            }),
        }))
    }

    fn flush(&mut self) {
        self.decoder.flush();
    }
}

/// 字幕解码器没有 send/receive 接口，解出的字幕先放进 pending
struct FfmpegSubtitleDecoder {
    decoder: decoder::Subtitle,
    time_base: f64,
    pending: VecDeque<DecodedFrame>,
    draining: bool,
}

// SAFETY: 解码器只在所属的解码线程中使用
unsafe impl Send for FfmpegSubtitleDecoder {}

impl StreamDecoder for FfmpegSubtitleDecoder {
    fn send_packet(&mut self, packet: Option<&MediaPacket>) -> Result<SendStatus> {
        let Some(packet) = packet else {
            self.draining = true;
            return Ok(SendStatus::Accepted);
        };
        let mut subtitle = ffmpeg::Subtitle::new();
        let got = self
            .decoder
            .decode(&to_ffmpeg_packet(packet), &mut subtitle)
            .map_err(|e| PlayerError::DecodeError(e.to_string()))?;
        if !got {
            return Ok(SendStatus::Accepted);
        }

        let mut lines = Vec::new();
        for rect in subtitle.rects() {
            match rect {
                ffmpeg::subtitle::Rect::Text(text) => lines.push(clean_subtitle_text(text.get())),
                ffmpeg::subtitle::Rect::Ass(ass) => {
                    lines.push(clean_subtitle_text(ass_dialogue_text(ass.get())))
                }
                ffmpeg::subtitle::Rect::Bitmap(_) => debug!("{} 跳过位图字幕", log_ctx()),
                ffmpeg::subtitle::Rect::None(_) => {}
            }
        }
        let text = lines.join("\n");
        if text.trim().is_empty() {
            return Ok(SendStatus::Accepted);
        }

        let pts = subtitle
            .pts()
            .map(|pts| pts as f64 / f64::from(ffi::AV_TIME_BASE))
            .or_else(|| packet.pts.map(|pts| pts as f64 * self.time_base));
        self.pending.push_back(DecodedFrame {
            pts,
            pos: packet.pos,
            payload: FramePayload::Subtitle(SubtitlePayload {
                start_display_ms: subtitle.start(),
                end_display_ms: subtitle.end(),
                text,
            }),
        });
        Ok(SendStatus::Accepted)
    }

    fn receive_frame(&mut self) -> Result<ReceiveStatus> {
        match self.pending.pop_front() {
            Some(frame) => Ok(ReceiveStatus::Frame(frame)),
            None if self.draining => {
                self.draining = false;
                Ok(ReceiveStatus::Eof)
            }
            None => Ok(ReceiveStatus::Again),
        }
    }

    fn flush(&mut self) {
        self.pending.clear();
        self.draining = false;
        self.decoder.flush();
    }
}

/// 基于 libswresample 的重采样器，支持采样数补偿
pub struct SwrResampler {
    context: resampling::Context,
    src: AudioParams,
    dst: AudioParams,
}

// SAFETY: swr 上下文只在音频渲染线程中使用
unsafe impl Send for SwrResampler {}

impl SwrResampler {
    pub fn new(src: &AudioParams, dst: &AudioParams) -> Result<Self> {
        if dst.format.is_planar() {
            return Err(PlayerError::ResampleError(format!(
                "不支持平面输出格式: {:?}",
                dst.format
            )));
        }
        let context = resampling::Context::get(
            sample_format_to_ffmpeg(src.format),
            channel_layout(src.channel_layout, src.channels),
            src.sample_rate,
            sample_format_to_ffmpeg(dst.format),
            channel_layout(dst.channel_layout, dst.channels),
            dst.sample_rate,
        )
        .map_err(|e| {
            PlayerError::ResampleError(format!(
                "无法创建重采样器 {}Hz {:?} {}ch → {}Hz {:?} {}ch: {}",
                src.sample_rate, src.format, src.channels, dst.sample_rate, dst.format, dst.channels, e
            ))
        })?;
        Ok(Self {
            context,
            src: *src,
            dst: *dst,
        })
    }
}

impl AudioResampler for SwrResampler {
    fn set_compensation(&mut self, sample_delta: i32, distance: i32) -> Result<()> {
        // SAFETY: 上下文由 self 独占
        let ret = unsafe { ffi::swr_set_compensation(self.context.as_mut_ptr(), sample_delta, distance) };
        if ret < 0 {
            return Err(PlayerError::ResampleError(format!(
                "swr_set_compensation 失败: {}",
                ffmpeg::Error::from(ret)
            )));
        }
        Ok(())
    }

    fn convert(&mut self, input: &AudioBuffer, max_out_samples: usize) -> Result<Vec<u8>> {
        let layout = channel_layout(self.src.channel_layout, self.src.channels);
        let mut source = frame::Audio::new(sample_format_to_ffmpeg(input.format), input.nb_samples, layout);
        source.set_rate(input.sample_rate);
        for (index, plane) in input.planes.iter().enumerate() {
            let data = source.data_mut(index);
            let len = plane.len().min(data.len());
            data[..len].copy_from_slice(&plane[..len]);
        }

        let mut output = frame::Audio::new(
            sample_format_to_ffmpeg(self.dst.format),
            max_out_samples,
            channel_layout(self.dst.channel_layout, self.dst.channels),
        );
        self.context
            .run(&source, &mut output)
            .map_err(|e| PlayerError::ResampleError(format!("swr_convert 失败: {}", e)))?;

        let len = output.samples() * self.dst.frame_size;
        let data = output.data(0);
        if len > data.len() {
            warn!("{} ⚠ 重采样输出超出缓冲: {} > {}", log_ctx(), len, data.len());
        }
        Ok(data[..len.min(data.len())].to_vec())
    }
}
