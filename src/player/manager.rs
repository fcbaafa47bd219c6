use crate::core::{
    log_ctx, AudioSample, AudioTrackFormat, BufferStatus, FetchResult, MediaControl, MediaEvent,
    MediaState, MediaType, OverlaySample, PlayerError, PlayerFlags, PlayerOptions, Result, TimeRange,
    TimedSample, Track, TrackFormat, VideoSample, VideoTrackFormat,
};
use crate::player::audio_render::{audio_render_loop, AudioRenderer};
use crate::player::decoder::{
    audio_decode_worker, subtitle_decode_worker, video_decode_worker, Decoder, DecoderHandle,
    EarlyFrameDrop,
};
use crate::player::demuxer_source::DemuxerSource;
use crate::player::demuxer_thread::DemuxerThread;
use crate::player::sample_queue::{fetch_best_video, fetch_overlapping};
use crate::player::session::PlayerSession;
use crate::player::sync::display_loop;
use crossbeam::queue::SegQueue;
use log::{debug, error, info, warn};
use std::ops::RangeInclusive;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// 支持的播放速率：0 为暂停
const SUPPORTED_RATES: RangeInclusive<f32> = 0.0..=2.0;

#[derive(Default)]
struct DecoderHandles {
    audio: Option<DecoderHandle>,
    video: Option<DecoderHandle>,
    subtitle: Option<DecoderHandle>,
}

impl DecoderHandles {
    fn take(&mut self, media_type: MediaType) -> Option<DecoderHandle> {
        match media_type {
            MediaType::Audio => self.audio.take(),
            MediaType::Video => self.video.take(),
            MediaType::Subtitle => self.subtitle.take(),
        }
    }
}

/// 播放管理器 - 整体控制播放流程
///
/// 持有当前会话以及读取、解码、显示、音频渲染线程；
/// 控制调用（选轨、seek、速率）与读取线程通过会话上的标志协作。
pub struct PlaybackManager {
    options: PlayerOptions,
    events: Arc<SegQueue<MediaEvent>>,
    session: Option<Arc<PlayerSession>>,
    /// 没有会话时报告的状态（Closed 或 Error）
    closed_state: MediaState,
    read_thread: Option<DemuxerThread>,
    decoders: DecoderHandles,
    display_thread: Option<JoinHandle<()>>,
    audio_thread: Option<JoinHandle<()>>,
}

impl PlaybackManager {
    pub fn new(options: PlayerOptions) -> Self {
        info!("{} 🎮 创建播放管理器: {:?}", log_ctx(), options);
        Self {
            options,
            events: Arc::new(SegQueue::new()),
            session: None,
            closed_state: MediaState::Closed,
            read_thread: None,
            decoders: DecoderHandles::default(),
            display_thread: None,
            audio_thread: None,
        }
    }

    pub fn options(&self) -> &PlayerOptions {
        &self.options
    }

    /// 打开数据源并启动读取线程
    ///
    /// 已有会话时先关闭。打开后状态为 Preparing，宿主需要选择轨道
    /// 并调用 set_rate() 开始播放。
    pub fn open(&mut self, source: Box<dyn DemuxerSource>) -> Result<()> {
        self.close();
        info!("{} 📂 打开媒体: {}", log_ctx(), source.description());

        let streams = source.streams();
        if streams.iter().all(|s| s.media_type().is_none()) {
            let description = source.description();
            return Err(self.fail_open(format!("{}: 没有可播放的流", description)));
        }

        let session = Arc::new(PlayerSession::new(
            source,
            self.options.clone(),
            self.events.clone(),
        ));
        session.emit(MediaEvent::MediaOpened);

        match DemuxerThread::start(session.clone()) {
            Ok(read_thread) => {
                self.read_thread = Some(read_thread);
                self.session = Some(session);
                info!("{} ✅ 媒体已打开，等待选择轨道", log_ctx());
                Ok(())
            }
            Err(e) => {
                session.abort_request.store(true, Ordering::Release);
                Err(self.fail_open(format!("启动读取线程失败: {}", e)))
            }
        }
    }

    /// 用 FFmpeg 打开 URL 或本地文件
    #[cfg(feature = "ffmpeg")]
    pub fn open_url(&mut self, url: &str) -> Result<()> {
        self.close();
        match crate::player::demuxer::Demuxer::open(url) {
            Ok(demuxer) => self.open(Box::new(demuxer)),
            Err(e) => Err(self.fail_open(format!("{}: {}", url, e))),
        }
    }

    fn fail_open(&mut self, reason: String) -> PlayerError {
        error!("{} ❌ 打开媒体失败: {}", log_ctx(), reason);
        self.closed_state = MediaState::Error;
        self.events.push(MediaEvent::MediaOpenFailed);
        PlayerError::OpenError(reason)
    }

    /// 关闭当前会话
    ///
    /// 先设置中止标志并停止读取线程，再逐个关闭流组件，
    /// 最后等待显示和音频渲染线程退出。
    pub fn close(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };
        info!("{} ⏹️  关闭媒体会话", log_ctx());
        session.abort_request.store(true, Ordering::Release);
        session.display_running.store(false, Ordering::Release);
        session.audio_running.store(false, Ordering::Release);

        if let Some(mut read_thread) = self.read_thread.take() {
            read_thread.stop();
        }

        for media_type in [MediaType::Audio, MediaType::Video, MediaType::Subtitle] {
            self.close_stream(&session, media_type);
        }

        if let Some(thread) = self.display_thread.take() {
            if thread.join().is_err() {
                warn!("{} ⚠ 显示线程异常退出", log_ctx());
            }
        }
        self.join_audio_thread();

        session.flush_samples();
        self.closed_state = MediaState::Closed;
        self.events.push(MediaEvent::MediaClosed);
        info!(
            "{} ✅ 会话已关闭（提前丢帧 {}，迟到丢帧 {}）",
            log_ctx(),
            session.frames_dropped_early.load(Ordering::Relaxed),
            session.frames_dropped_late.load(Ordering::Relaxed)
        );
    }

    fn session(&self) -> Result<&Arc<PlayerSession>> {
        self.session.as_ref().ok_or(PlayerError::NotOpened)
    }

    /// 选择轨道；None 表示关闭该类型的轨道
    ///
    /// 解码器打开失败时返回错误，该类型保持未选中，其他流照常播放。
    pub fn select_track(&mut self, media_type: MediaType, index: Option<usize>) -> Result<()> {
        let session = self.session()?.clone();
        let mut selection = session.selection.lock();

        let current = selection.selected(media_type);
        if current == index {
            debug!("{} 轨道 {:?} {:?} 已选中", log_ctx(), media_type, index);
            return Ok(());
        }

        let track = match index {
            Some(i) => match session.tracks.get(media_type, i) {
                Some(track) => Some(track.clone()),
                None => {
                    warn!("{} ⚠ 无效的轨道 {:?} #{}", log_ctx(), media_type, i);
                    return Err(PlayerError::InvalidTrack(media_type, i));
                }
            },
            None => None,
        };

        if current.is_some() {
            info!("{} 🔀 关闭当前 {:?} 轨道 {:?}", log_ctx(), media_type, current);
            self.close_stream(&session, media_type);
            selection.set_selected(media_type, None);
            selection.flags.selection_changed = true;
        }

        let Some(track) = track else {
            session.emit(MediaEvent::TracksChanged);
            return Ok(());
        };

        info!(
            "{} 🎯 选择 {:?} 轨道 #{}（流 #{}，{}）",
            log_ctx(),
            media_type,
            track.index,
            track.stream_index,
            track.display_name
        );
        let opened = self.open_stream(&session, media_type, track.stream_index);
        // 失败的流也计入就绪门限，其余流继续播放
        session.streams_opened.fetch_add(1, Ordering::AcqRel);
        session.waker.signal();
        if let Err(e) = opened {
            error!("{} ❌ 打开流 #{} 失败: {}", log_ctx(), track.stream_index, e);
            session.source.lock().set_stream_enabled(track.stream_index, false);
            if current.is_some() {
                session.emit(MediaEvent::TracksChanged);
            }
            return Err(e);
        }

        selection.set_selected(media_type, Some(track.index));
        selection.flags.selection_changed = true;
        session.emit(MediaEvent::TracksChanged);

        match (&track.format, media_type) {
            (_, MediaType::Video) => self.start_display_thread(&session),
            (TrackFormat::Audio(format), MediaType::Audio) => {
                self.start_audio_thread(&session, format)
            }
            _ => {}
        }
        Ok(())
    }

    /// 打开一个流组件：创建解码器并启动解码线程
    fn open_stream(
        &mut self,
        session: &Arc<PlayerSession>,
        media_type: MediaType,
        stream_index: usize,
    ) -> Result<()> {
        let codec = session.source.lock().open_decoder(stream_index)?;
        session.source.lock().set_stream_enabled(stream_index, true);
        session.eof.store(false, Ordering::Release);

        let queue = session.packet_queue(media_type).clone();
        let waker = session.waker.clone();
        match media_type {
            MediaType::Audio => {
                let decoder = Decoder::new(codec, queue, waker, session.audio_status.clone());
                let sampq = session.sampq.clone();
                let handle =
                    decoder.start("myy-audio-dec", move |d| audio_decode_worker(d, sampq))?;
                self.decoders.audio = Some(handle);
                session.audio_stream.store(Some(stream_index));
            }
            MediaType::Video => {
                let frame_rate = session
                    .stream_info(stream_index)
                    .map(|info| info.frame_rate())
                    .unwrap_or(0.0);
                let early_drop = EarlyFrameDrop {
                    clocks: session.clocks.clone(),
                    framedrop: session.options.framedrop,
                    dropped: session.frames_dropped_early.clone(),
                };
                let decoder = Decoder::new(codec, queue, waker, session.video_status.clone());
                let pictq = session.pictq.clone();
                let handle = decoder.start("myy-video-dec", move |d| {
                    video_decode_worker(d, pictq, frame_rate, early_drop)
                })?;
                self.decoders.video = Some(handle);
                session.video_stream.store(Some(stream_index));
                session.queue_attachments_req.store(true, Ordering::Release);
            }
            MediaType::Subtitle => {
                let decoder = Decoder::new(codec, queue, waker, session.subtitle_status.clone());
                let subpq = session.subpq.clone();
                let handle =
                    decoder.start("myy-sub-dec", move |d| subtitle_decode_worker(d, subpq))?;
                self.decoders.subtitle = Some(handle);
                session.subtitle_stream.store(Some(stream_index));
            }
        }
        session.clocks.set_stream_open(media_type, true);
        Ok(())
    }

    /// 关闭一个流组件；音频流还会停止音频渲染线程
    fn close_stream(&mut self, session: &Arc<PlayerSession>, media_type: MediaType) {
        if media_type == MediaType::Audio {
            session.audio_running.store(false, Ordering::Release);
        }
        if let Some(mut handle) = self.decoders.take(media_type) {
            match media_type {
                MediaType::Audio => handle.abort(&session.sampq),
                MediaType::Video => handle.abort(&session.pictq),
                MediaType::Subtitle => handle.abort(&session.subpq),
            }
        }
        if media_type == MediaType::Audio {
            self.join_audio_thread();
        }

        let stream = match media_type {
            MediaType::Audio => session.audio_stream.swap(None),
            MediaType::Video => session.video_stream.swap(None),
            MediaType::Subtitle => session.subtitle_stream.swap(None),
        };
        if let Some(stream_index) = stream {
            session.source.lock().set_stream_enabled(stream_index, false);
            session.clocks.set_stream_open(media_type, false);
            debug!("{} 流 #{} ({:?}) 已关闭", log_ctx(), stream_index, media_type);
        }
    }

    fn start_display_thread(&mut self, session: &Arc<PlayerSession>) {
        if self.display_thread.is_some() {
            return;
        }
        session.display_running.store(true, Ordering::Release);
        let display_session = session.clone();
        match thread::Builder::new()
            .name("myy-display".into())
            .spawn(move || display_loop(display_session))
        {
            Ok(handle) => self.display_thread = Some(handle),
            Err(e) => {
                session.display_running.store(false, Ordering::Release);
                error!("{} ❌ 启动显示线程失败: {}", log_ctx(), e);
            }
        }
    }

    fn start_audio_thread(&mut self, session: &Arc<PlayerSession>, format: &AudioTrackFormat) {
        self.join_audio_thread();
        session.audio_running.store(true, Ordering::Release);
        let renderer = AudioRenderer::new(session.clone(), format);
        match thread::Builder::new()
            .name("myy-audio-render".into())
            .spawn(move || audio_render_loop(renderer))
        {
            Ok(handle) => self.audio_thread = Some(handle),
            Err(e) => {
                session.audio_running.store(false, Ordering::Release);
                error!("{} ❌ 启动音频渲染线程失败: {}", log_ctx(), e);
            }
        }
    }

    fn join_audio_thread(&mut self) {
        if let Some(thread) = self.audio_thread.take() {
            if thread.join().is_err() {
                warn!("{} ⚠ 音频渲染线程异常退出", log_ctx());
            }
        }
    }

    /// 跳转到指定时间（秒）
    ///
    /// 负数、超出时长或上一次 seek 尚未完成时拒绝。
    pub fn seek(&self, time: f64) -> Result<()> {
        let session = self.session()?;
        let duration = session.duration.unwrap_or(0.0);
        if time.is_nan() || time < 0.0 || time > duration {
            warn!("{} ⚠ 拒绝 seek: {:.3}s 超出 [0, {:.3}]", log_ctx(), time, duration);
            return Err(PlayerError::SeekRejected(format!(
                "{:.3}s 超出时长 {:.3}s",
                time, duration
            )));
        }
        let target = ((time + session.container_start) * 1_000_000.0) as i64;
        // 先持有 seek_time 再唤醒读取线程，宿主取样本时不会看到旧的目标
        let mut seek_time = session.seek_time.lock();
        if !session.stream_seek(target, 0) {
            warn!("{} ⚠ 拒绝 seek: 上一次 seek 尚未完成", log_ctx());
            return Err(PlayerError::SeekRejected("上一次 seek 尚未完成".into()));
        }
        *seek_time = Some(time);
        drop(seek_time);
        info!("{} ⏩ Seek 请求: {:.3}s", log_ctx(), time);
        Ok(())
    }

    /// 设置播放速率：0 暂停，大于 0 播放
    ///
    /// 播放结束（Stopped）后再次以正速率播放会从头开始。
    pub fn set_rate(&self, rate: f32) -> Result<()> {
        let session = self.session()?;
        if rate.is_nan() || !SUPPORTED_RATES.contains(&rate) {
            warn!("{} ⚠ 不支持的播放速率: {}", log_ctx(), rate);
            return Err(PlayerError::InvalidRate(rate));
        }

        let _selection = session.selection.lock();
        session.set_rate_value(rate);
        if rate.abs() < f32::EPSILON {
            session.set_state(MediaState::Paused);
            session.emit(MediaEvent::PlaybackSuspended);
            if !session.is_paused() {
                session.toggle_pause();
            }
        } else {
            let ended =
                session.state() == MediaState::Stopped && session.eof.load(Ordering::Acquire);
            session.set_state(MediaState::Playing);
            session.emit(MediaEvent::PlaybackResumed);
            if session.is_paused() {
                session.toggle_pause();
            }
            if ended {
                info!("{} 🔁 播放已结束，从头开始", log_ctx());
                session.stream_seek(session.start_position(), 0);
            }
        }
        Ok(())
    }

    pub fn set_looping(&mut self, looping: bool) {
        self.options.looping = looping;
        if let Some(session) = &self.session {
            session.set_looping(looping);
        }
    }

    pub fn is_looping(&self) -> bool {
        match &self.session {
            Some(session) => session.is_looping(),
            None => self.options.looping,
        }
    }

    /// 时长（秒），未知时为 0
    pub fn duration(&self) -> f64 {
        self.session
            .as_ref()
            .and_then(|s| s.duration)
            .unwrap_or(0.0)
    }

    /// 当前播放时间（秒）
    pub fn time(&self) -> f64 {
        self.session.as_ref().map_or(0.0, |s| s.current_time())
    }

    pub fn rate(&self) -> f32 {
        self.session.as_ref().map_or(0.0, |s| s.rate())
    }

    pub fn state(&self) -> MediaState {
        self.session
            .as_ref()
            .map_or(self.closed_state, |s| s.state())
    }

    pub fn can_control(&self, control: MediaControl) -> bool {
        let Some(session) = &self.session else {
            return false;
        };
        match control {
            MediaControl::Pause => session.state() == MediaState::Playing,
            MediaControl::Resume => session.state() != MediaState::Playing,
            MediaControl::Seek | MediaControl::Scrub => session.duration.is_some(),
        }
    }

    pub fn supported_rates(&self) -> RangeInclusive<f32> {
        SUPPORTED_RATES
    }

    /// 取走所有待处理事件（按入队顺序）
    pub fn get_events(&self) -> Vec<MediaEvent> {
        let mut events = Vec::with_capacity(self.events.len());
        while let Some(event) = self.events.pop() {
            events.push(event);
        }
        events
    }

    pub fn flags(&self) -> PlayerFlags {
        self.session
            .as_ref()
            .map(|s| s.selection.lock().flags)
            .unwrap_or_default()
    }

    pub fn clear_flags(&self) {
        if let Some(session) = &self.session {
            session.selection.lock().flags = PlayerFlags::default();
        }
    }

    pub fn buffer_status(&self) -> BufferStatus {
        let Some(s) = &self.session else {
            return BufferStatus::default();
        };
        BufferStatus {
            video_packets: s.videoq.nb_packets(),
            audio_packets: s.audioq.nb_packets(),
            subtitle_packets: s.subtitleq.nb_packets(),
            queued_bytes: s.videoq.size() + s.audioq.size() + s.subtitleq.size(),
            video_frames: s.pictq.nb_remaining(),
            audio_frames: s.sampq.nb_remaining(),
            subtitle_frames: s.subpq.nb_remaining(),
            pending_video_samples: s.video_samples.len(),
            pending_audio_samples: s.audio_samples.len(),
            frames_dropped_early: s.frames_dropped_early.load(Ordering::Relaxed),
            frames_dropped_late: s.frames_dropped_late.load(Ordering::Relaxed),
        }
    }

    // ---- 轨道查询 ----

    pub fn num_tracks(&self, media_type: MediaType) -> usize {
        self.session.as_ref().map_or(0, |s| s.tracks.len(media_type))
    }

    pub fn selected_track(&self, media_type: MediaType) -> Option<usize> {
        self.session
            .as_ref()
            .and_then(|s| s.selection.lock().selected(media_type))
    }

    pub fn track(&self, media_type: MediaType, index: usize) -> Option<Track> {
        let session = self.session.as_ref()?;
        let _selection = session.selection.lock();
        session.tracks.get(media_type, index).cloned()
    }

    pub fn track_name(&self, media_type: MediaType, index: usize) -> Option<String> {
        self.track(media_type, index).map(|t| t.name)
    }

    pub fn track_display_name(&self, media_type: MediaType, index: usize) -> Option<String> {
        self.track(media_type, index).map(|t| t.display_name)
    }

    pub fn track_language(&self, media_type: MediaType, index: usize) -> Option<String> {
        self.track(media_type, index).map(|t| t.language)
    }

    /// 每个轨道只有一种格式
    pub fn num_track_formats(&self, media_type: MediaType, index: usize) -> usize {
        usize::from(self.track(media_type, index).is_some())
    }

    pub fn track_format(&self, media_type: MediaType, index: usize) -> Option<usize> {
        self.track(media_type, index).map(|_| 0)
    }

    pub fn set_track_format(&self, media_type: MediaType, index: usize, format_index: usize) -> bool {
        self.track(media_type, index).is_some() && format_index == 0
    }

    pub fn audio_track_format(&self, index: usize, format_index: usize) -> Option<AudioTrackFormat> {
        if format_index != 0 {
            return None;
        }
        match self.track(MediaType::Audio, index)?.format {
            TrackFormat::Audio(format) => Some(format),
            _ => None,
        }
    }

    pub fn video_track_format(&self, index: usize, format_index: usize) -> Option<VideoTrackFormat> {
        if format_index != 0 {
            return None;
        }
        match self.track(MediaType::Video, index)?.format {
            TrackFormat::Video(format) => Some(format),
            _ => None,
        }
    }

    /// 只接受轨道原生帧率
    pub fn set_video_track_frame_rate(&self, index: usize, format_index: usize, frame_rate: f64) -> bool {
        self.video_track_format(index, format_index)
            .is_some_and(|format| (format.frame_rate - frame_rate).abs() < 1e-6)
    }

    // ---- 样本输出 ----

    /// 取出与时间区间重叠的第一个音频样本，过期样本被丢弃
    pub fn fetch_audio(&self, range: TimeRange) -> FetchResult<AudioSample> {
        match &self.session {
            Some(session) => session.audio_samples.with(|q| fetch_overlapping(q, range)),
            None => FetchResult::NoSample,
        }
    }

    /// 取出与时间区间重叠最多的视频样本
    pub fn fetch_best_video_sample(&self, range: TimeRange) -> FetchResult<VideoSample> {
        let Some(session) = &self.session else {
            return FetchResult::NoSample;
        };
        if session.state() == MediaState::Stopped {
            return FetchResult::NoSample;
        }
        if session.realtime {
            return session
                .video_samples
                .pop()
                .map_or(FetchResult::NoSample, FetchResult::Ok);
        }

        let duration = session.duration.unwrap_or(0.0);
        let mut seek_time = session.seek_time.lock();
        let result = session
            .video_samples
            .with(|q| fetch_best_video(q, range, duration, &mut seek_time));
        if let FetchResult::Ok(sample) = &result {
            session.last_fetch_video_end.store(sample.end_time());
        }
        result
    }

    pub fn fetch_caption(&self, range: TimeRange) -> FetchResult<OverlaySample> {
        match &self.session {
            Some(session) => session.caption_samples.with(|q| fetch_overlapping(q, range)),
            None => FetchResult::NoSample,
        }
    }

    pub fn peek_video_sample_time(&self) -> Option<f64> {
        self.session.as_ref()?.video_samples.peek_time()
    }

    pub fn flush_samples(&self) {
        if let Some(session) = &self.session {
            session.flush_samples();
        }
    }
}

impl Default for PlaybackManager {
    fn default() -> Self {
        Self::new(PlayerOptions::default())
    }
}

impl Drop for PlaybackManager {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Result;
    use crate::player::demuxer_source::{ReadOutcome, StreamDecoder, StreamInfo, StreamParams};

    struct NoStreams;

    impl DemuxerSource for NoStreams {
        fn streams(&self) -> Vec<StreamInfo> {
            vec![StreamInfo {
                index: 0,
                codec_name: "bin_data".into(),
                time_base: 0.001,
                start_time: None,
                language: None,
                title: None,
                params: StreamParams::Other,
                attached_picture: None,
            }]
        }
        fn duration(&self) -> Option<f64> {
            None
        }
        fn read_packet(&mut self) -> ReadOutcome {
            ReadOutcome::EndOfFile
        }
        fn seek(&mut self, _min: i64, _target: i64, _max: i64) -> Result<()> {
            Ok(())
        }
        fn open_decoder(&mut self, stream_index: usize) -> Result<Box<dyn StreamDecoder>> {
            Err(PlayerError::DecoderNotFound(format!("stream {}", stream_index)))
        }
        fn description(&self) -> String {
            "no-streams".into()
        }
    }

    /// 一个视频流，解码器总是打开失败
    struct BrokenVideo;

    impl DemuxerSource for BrokenVideo {
        fn streams(&self) -> Vec<StreamInfo> {
            vec![StreamInfo {
                index: 0,
                codec_name: "h264".into(),
                time_base: 1.0 / 30.0,
                start_time: Some(0),
                language: None,
                title: None,
                params: StreamParams::Video {
                    width: 320,
                    height: 240,
                    frame_rate: 30.0,
                    avg_frame_rate: 30.0,
                    bit_rate: 0,
                },
                attached_picture: None,
            }]
        }
        fn duration(&self) -> Option<f64> {
            Some(10.0)
        }
        fn read_packet(&mut self) -> ReadOutcome {
            ReadOutcome::EndOfFile
        }
        fn seek(&mut self, _min: i64, _target: i64, _max: i64) -> Result<()> {
            Ok(())
        }
        fn open_decoder(&mut self, stream_index: usize) -> Result<Box<dyn StreamDecoder>> {
            Err(PlayerError::DecoderNotFound(format!("stream {}", stream_index)))
        }
        fn description(&self) -> String {
            "broken-video".into()
        }
    }

    #[test]
    fn test_failed_stream_open_is_not_selected() {
        let mut manager = PlaybackManager::default();
        manager.open(Box::new(BrokenVideo)).unwrap();
        manager.clear_flags();

        let err = manager.select_track(MediaType::Video, Some(0)).unwrap_err();
        assert!(matches!(err, PlayerError::DecoderNotFound(_)));
        assert_eq!(manager.selected_track(MediaType::Video), None);
        assert!(!manager.flags().selection_changed);

        // 失败的打开仍然计入就绪门限
        let session = manager.session.clone().unwrap();
        assert_eq!(session.streams_opened.load(Ordering::Acquire), 1);
        assert!(!manager.get_events().contains(&MediaEvent::TracksChanged));
    }

    #[test]
    fn test_rejected_seek_keeps_pending_target() {
        // 没有选择轨道，读取线程停在就绪等待，seek 保持待处理
        let mut manager = PlaybackManager::default();
        manager.open(Box::new(BrokenVideo)).unwrap();
        let session = manager.session.clone().unwrap();

        manager.seek(2.0).unwrap();
        assert_eq!(*session.seek_time.lock(), Some(2.0));
        assert!(matches!(manager.seek(3.0), Err(PlayerError::SeekRejected(_))));
        assert_eq!(*session.seek_time.lock(), Some(2.0));
    }

    #[test]
    fn test_closed_manager_queries() {
        let manager = PlaybackManager::default();
        assert_eq!(manager.state(), MediaState::Closed);
        assert_eq!(manager.duration(), 0.0);
        assert_eq!(manager.num_tracks(MediaType::Video), 0);
        assert!(!manager.can_control(MediaControl::Seek));
        assert!(matches!(manager.seek(1.0), Err(PlayerError::NotOpened)));
        assert!(matches!(
            manager.fetch_audio(TimeRange::new(0.0, 1.0)),
            FetchResult::NoSample
        ));
    }

    #[test]
    fn test_open_without_playable_streams_fails() {
        let mut manager = PlaybackManager::default();
        let err = manager.open(Box::new(NoStreams)).unwrap_err();
        assert!(matches!(err, PlayerError::OpenError(_)));
        assert_eq!(manager.state(), MediaState::Error);
        assert_eq!(manager.get_events(), vec![MediaEvent::MediaOpenFailed]);
    }

    #[test]
    fn test_supported_rates() {
        let manager = PlaybackManager::default();
        let rates = manager.supported_rates();
        assert_eq!((*rates.start(), *rates.end()), (0.0, 2.0));
    }

    #[test]
    fn test_looping_option_before_open() {
        let mut manager = PlaybackManager::default();
        manager.set_looping(true);
        assert!(manager.is_looping());
    }
}
