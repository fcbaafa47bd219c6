use crate::core::{log_ctx, PlayerError, Result, SampleFormat};
use crate::player::codec::{self, sample_format_from_ffmpeg};
use crate::player::demuxer_source::{
    is_realtime_source, DemuxerSource, ReadOutcome, StreamDecoder, StreamInfo, StreamParams,
};
use crate::player::packet_queue::MediaPacket;
use crate::player::resampler::{AudioParams, AudioResampler};
use ffmpeg_next as ffmpeg;
use ffmpeg_next::format::stream::Disposition;
use ffmpeg_next::{ffi, format, media};
use log::{debug, info, warn};

/// FFmpeg 解封装器
pub struct Demuxer {
    input: format::context::Input,
    url: String,
    streams: Vec<StreamInfo>,
    realtime: bool,
    discontinuous: bool,
}

// SAFETY: Input 只在持有它的线程中使用，跨线程访问都经过会话上的 Mutex
unsafe impl Send for Demuxer {}

impl Demuxer {
    /// 打开 URL 或本地文件
    pub fn open(url: &str) -> Result<Self> {
        ffmpeg::init()?;
        info!("{} 📂 正在打开: {}", log_ctx(), url);

        let input = if is_network_url(url) {
            info!("{} 🌐 检测到网络流，应用网络选项", log_ctx());
            format::input_with_dictionary(&url, network_options(url))
                .map_err(|e| PlayerError::OpenError(format!("无法打开网络流: {}", e)))?
        } else {
            format::input(&url)
                .map_err(|e| PlayerError::OpenError(format!("无法打开文件: {}", e)))?
        };

        let format_name = input.format().name().to_string();
        let realtime = is_realtime_source(&format_name, url);
        // SAFETY: iformat 在 Input 存活期间有效
        let discontinuous = unsafe {
            let iformat = (*input.as_ptr()).iformat;
            !iformat.is_null() && ((*iformat).flags & ffi::AVFMT_TS_DISCONT as i32) != 0
        };

        let streams: Vec<StreamInfo> = input.streams().map(|s| stream_info(&s)).collect();
        for info in &streams {
            debug!(
                "{} 流 #{}: {} {:?} tb={} lang={:?}",
                log_ctx(),
                info.index,
                info.codec_name,
                info.params,
                info.time_base,
                info.language
            );
        }
        info!(
            "{} ✅ 已打开 {}（格式 {}，{} 个流，实时源 {}，时间戳不连续 {}）",
            log_ctx(),
            url,
            format_name,
            streams.len(),
            realtime,
            discontinuous
        );

        let mut demuxer = Self {
            input,
            url: url.to_string(),
            streams,
            realtime,
            discontinuous,
        };
        for index in 0..demuxer.streams.len() {
            demuxer.set_stream_enabled(index, false);
        }
        Ok(demuxer)
    }
}

fn is_network_url(url: &str) -> bool {
    ["http://", "https://", "rtsp://", "rtmp://", "rtp://", "udp://", "tcp://"]
        .iter()
        .any(|scheme| url.starts_with(scheme))
        || url.contains(".m3u8")
}

fn network_options(url: &str) -> ffmpeg::Dictionary<'static> {
    let mut options = ffmpeg::Dictionary::new();
    options.set("fflags", "+discardcorrupt+genpts");
    options.set("analyzeduration", "5000000");
    options.set("probesize", "10000000");
    options.set("rw_timeout", "8000000");
    if url.starts_with("rtsp://") {
        options.set("rtsp_transport", "tcp");
        options.set("stimeout", "8000000");
    }
    if url.starts_with("http://") || url.starts_with("https://") {
        options.set("reconnect", "1");
        options.set("reconnect_streamed", "1");
        options.set("reconnect_delay_max", "4");
    }
    if url.contains(".m3u8") {
        options.set("http_persistent", "1");
        options.set("max_reload", "10");
    }
    options
}

fn rational(value: ffmpeg::Rational) -> f64 {
    if value.denominator() == 0 {
        0.0
    } else {
        f64::from(value)
    }
}

fn stream_info(stream: &format::stream::Stream) -> StreamInfo {
    let parameters = stream.parameters();
    let codec_name = parameters.id().name().to_string();
    let metadata = stream.metadata();
    let start_time = Some(stream.start_time()).filter(|&t| t != ffi::AV_NOPTS_VALUE);

    let params = match stream_params(stream) {
        Ok(params) => params,
        Err(e) => {
            warn!("{} ⚠ 无法解析流 #{} 的参数: {}", log_ctx(), stream.index(), e);
            StreamParams::Other
        }
    };

    let attached_picture = if stream.disposition().contains(Disposition::ATTACHED_PIC) {
        attached_picture(stream)
    } else {
        None
    };

    StreamInfo {
        index: stream.index(),
        codec_name,
        time_base: rational(stream.time_base()),
        start_time,
        language: metadata.get("language").map(str::to_string),
        title: metadata.get("title").map(str::to_string),
        params,
        attached_picture,
    }
}

fn stream_params(stream: &format::stream::Stream) -> Result<StreamParams> {
    let parameters = stream.parameters();
    let params = match parameters.medium() {
        media::Type::Audio => {
            let decoder = ffmpeg::codec::context::Context::from_parameters(parameters)?
                .decoder()
                .audio()?;
            let sample_format = sample_format_from_ffmpeg(decoder.format()).unwrap_or(SampleFormat::S16);
            StreamParams::Audio {
                sample_rate: decoder.rate(),
                channels: decoder.channels(),
                channel_layout: decoder.channel_layout().bits(),
                sample_format,
                bits_per_sample: sample_format.bytes_per_sample() as u32 * 8,
            }
        }
        media::Type::Video => {
            let decoder = ffmpeg::codec::context::Context::from_parameters(parameters)?
                .decoder()
                .video()?;
            StreamParams::Video {
                width: decoder.width(),
                height: decoder.height(),
                frame_rate: rational(stream.rate()),
                avg_frame_rate: rational(stream.avg_frame_rate()),
                bit_rate: decoder.bit_rate() as i64,
            }
        }
        media::Type::Subtitle => StreamParams::Subtitle,
        _ => StreamParams::Other,
    };
    Ok(params)
}

fn attached_picture(stream: &format::stream::Stream) -> Option<MediaPacket> {
    // SAFETY: attached_pic 由容器持有，这里只做拷贝
    let packet = unsafe { &(*stream.as_ptr()).attached_pic };
    if packet.data.is_null() || packet.size <= 0 {
        return None;
    }
    let data = unsafe { std::slice::from_raw_parts(packet.data, packet.size as usize) }.to_vec();
    Some(MediaPacket {
        stream_index: stream.index(),
        data,
        pts: Some(packet.pts).filter(|&t| t != ffi::AV_NOPTS_VALUE),
        dts: Some(packet.dts).filter(|&t| t != ffi::AV_NOPTS_VALUE),
        duration: packet.duration,
        pos: packet.pos,
        is_key: true,
    })
}

impl DemuxerSource for Demuxer {
    fn streams(&self) -> Vec<StreamInfo> {
        self.streams.clone()
    }

    fn duration(&self) -> Option<f64> {
        let duration = self.input.duration();
        (duration != ffi::AV_NOPTS_VALUE && duration > 0)
            .then(|| duration as f64 / f64::from(ffi::AV_TIME_BASE))
    }

    fn start_time(&self) -> Option<f64> {
        // SAFETY: 只读取 AVFormatContext 的字段
        let start = unsafe { (*self.input.as_ptr()).start_time };
        (start != ffi::AV_NOPTS_VALUE).then(|| start as f64 / f64::from(ffi::AV_TIME_BASE))
    }

    fn is_realtime(&self) -> bool {
        self.realtime
    }

    fn has_discontinuous_timestamps(&self) -> bool {
        self.discontinuous
    }

    fn read_packet(&mut self) -> ReadOutcome {
        let mut packet = ffmpeg::Packet::empty();
        match packet.read(&mut self.input) {
            Ok(()) => ReadOutcome::Packet(MediaPacket {
                stream_index: packet.stream(),
                data: packet.data().map(<[u8]>::to_vec).unwrap_or_default(),
                pts: packet.pts(),
                dts: packet.dts(),
                duration: packet.duration(),
                pos: packet.position() as i64,
                is_key: packet.is_key(),
            }),
            Err(ffmpeg::Error::Eof) => ReadOutcome::EndOfFile,
            Err(e) => ReadOutcome::Error(e.to_string()),
        }
    }

    fn seek(&mut self, min: i64, target: i64, max: i64) -> Result<()> {
        self.input
            .seek(target, min..max)
            .map_err(|e| PlayerError::SeekError(format!("{}: {}", self.url, e)))
    }

    fn read_pause(&mut self) -> Result<()> {
        self.input
            .pause()
            .map_err(|e| PlayerError::Unsupported(format!("read_pause: {}", e)))
    }

    fn read_play(&mut self) -> Result<()> {
        Ok(self.input.play()?)
    }

    fn set_stream_enabled(&mut self, stream_index: usize, enabled: bool) {
        let Some(mut stream) = self.input.stream_mut(stream_index) else {
            return;
        };
        let discard = if enabled {
            ffi::AVDiscard::AVDISCARD_DEFAULT
        } else {
            ffi::AVDiscard::AVDISCARD_ALL
        };
        // SAFETY: 只修改该流的 discard 字段，读取在同一线程串行进行
        unsafe { (*stream.as_mut_ptr()).discard = discard };
    }

    fn open_decoder(&mut self, stream_index: usize) -> Result<Box<dyn StreamDecoder>> {
        let stream = self
            .input
            .stream(stream_index)
            .ok_or_else(|| PlayerError::DecoderNotFound(format!("流 #{} 不存在", stream_index)))?;
        codec::open_decoder(&stream)
    }

    fn create_resampler(
        &self,
        src: &AudioParams,
        dst: &AudioParams,
    ) -> Result<Box<dyn AudioResampler>> {
        Ok(Box::new(codec::SwrResampler::new(src, dst)?))
    }

    fn description(&self) -> String {
        format!("FFmpeg Demuxer: {}", self.url)
    }
}
