use crate::core::{log_ctx, MediaEvent, MediaState, MediaType, PlayerError, Result, SyncMaster};
use crate::player::demuxer_source::{ReadOutcome, StreamInfo};
use crate::player::packet_queue::{MediaPacket, Packet, QUEUE_WAIT_TIMEOUT};
use crate::player::session::{PlayerSession, SeekRequest};
use log::{debug, error, info, warn};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// 三个包队列合计的字节上限
pub const MAX_QUEUE_SIZE: usize = 15 * 1024 * 1024;
/// 单个流至少缓冲的包数
pub const MIN_FRAMES: usize = 25;

const LOG_FIRST_N: usize = 5;

/// 所有已打开的解码器都排空后，判断输出是否已经被宿主取完
///
/// 两种策略不对称：音频为主时钟时看输出队列是否清空，
/// 否则看宿主取走的最后一个视频样本是否已到达时长。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndOfMediaPolicy {
    AudioDrained,
    VideoDurationElapsed,
}

impl EndOfMediaPolicy {
    pub fn for_master(master: SyncMaster) -> Self {
        match master {
            SyncMaster::Audio => EndOfMediaPolicy::AudioDrained,
            SyncMaster::Video | SyncMaster::External => EndOfMediaPolicy::VideoDurationElapsed,
        }
    }

    fn is_satisfied(self, session: &PlayerSession) -> bool {
        match self {
            EndOfMediaPolicy::AudioDrained => session.audio_samples.is_empty(),
            EndOfMediaPolicy::VideoDurationElapsed => {
                let Some(index) = session.video_stream.load() else {
                    return true;
                };
                let frame_rate = session.stream_info(index).map_or(0.0, StreamInfo::frame_rate);
                let frame_duration = if frame_rate > 0.0 { 1.0 / frame_rate } else { 0.0 };
                video_duration_elapsed(
                    session.last_fetch_video_end.load(),
                    frame_duration,
                    session.duration,
                )
            }
        }
    }
}

/// 最后取走的视频样本结束时间加一帧的容差是否已到达时长；时长未知视为已到达
pub fn video_duration_elapsed(last_fetch_end: f64, frame_duration: f64, duration: Option<f64>) -> bool {
    match duration {
        Some(duration) if duration > 0.0 => last_fetch_end + frame_duration >= duration,
        _ => true,
    }
}

/// 数据包是否落在播放窗口内
///
/// 时间从流的起始时间算起，减去起播位置后不超过窗口长度；窗口未知时全部保留。
pub fn packet_in_play_range(
    packet: &MediaPacket,
    info: &StreamInfo,
    start_time: f64,
    window: Option<f64>,
) -> bool {
    let Some(window) = window else {
        return true;
    };
    let Some(ts) = packet.pts.or(packet.dts) else {
        return true;
    };
    let stream_start = info.start_time.unwrap_or(0);
    (ts - stream_start) as f64 * info.time_base - start_time <= window
}

/// Demuxer 线程管理器
pub struct DemuxerThread {
    thread_handle: Option<JoinHandle<()>>,
    session: Arc<PlayerSession>,
}

impl DemuxerThread {
    /// 启动读取线程
    pub fn start(session: Arc<PlayerSession>) -> Result<Self> {
        let loop_session = session.clone();
        let thread_handle = thread::Builder::new()
            .name("myy-read".into())
            .spawn(move || read_loop(&loop_session))?;
        Ok(Self {
            thread_handle: Some(thread_handle),
            session,
        })
    }

    /// 设置中止标志、唤醒并等待线程退出
    pub fn stop(&mut self) {
        info!("{} 🛑 DemuxerThread::stop() called", log_ctx());
        self.session.abort_request.store(true, Ordering::Release);
        self.session.waker.signal();
        if let Some(handle) = self.thread_handle.take() {
            if handle.join().is_err() {
                error!("{} ❌ 读取线程异常退出", log_ctx());
            }
        }
    }
}

impl Drop for DemuxerThread {
    fn drop(&mut self) {
        if self.thread_handle.is_some() {
            warn!("{} ⚠ DemuxerThread 被 drop，但可能未调用 stop()，正在尝试优雅停止", log_ctx());
            self.stop();
        }
    }
}

#[derive(Default)]
struct ReadStats {
    packets: usize,
    video: usize,
    audio: usize,
    subtitle: usize,
    discarded: usize,
}

/// 读取循环（在独立线程中运行）
///
/// 每一轮依次处理：流就绪等待、暂停同步、seek、封面图、背压、结束/循环判断、读包分发。
fn read_loop(session: &PlayerSession) {
    info!("{} 🎬 Demuxer 线程启动: {}", log_ctx(), session.source.lock().description());

    if let Some(start) = session.options.start_time {
        let target = ((start + session.container_start) * 1_000_000.0) as i64;
        if let Err(e) = session.source.lock().seek(i64::MIN, target, i64::MAX) {
            warn!("{} ⚠ 无法 seek 到起播位置 {:.3}s: {}", log_ctx(), start, e);
        }
    }

    let window = session.options.play_duration.or(session.duration);
    let start_time = session.options.start_time.unwrap_or(0.0);
    let mut last_paused = false;
    let mut stats = ReadStats::default();

    loop {
        if session.is_aborted() {
            break;
        }

        // 已知限制：只比较打开次数，不检查具体是哪些流
        if session.streams_opened.load(Ordering::Acquire) < session.stream_total {
            session.waker.wait_timeout(QUEUE_WAIT_TIMEOUT);
            continue;
        }

        let paused = {
            let _selection = session.selection.lock();
            let paused = matches!(session.state(), MediaState::Paused | MediaState::Stopped);
            session.set_paused(paused);
            paused
        };
        if paused != last_paused {
            last_paused = paused;
            mirror_pause(session, paused);
        }

        if let Some(request) = session.pending_seek() {
            service_seek(session, request);
        }

        if session.queue_attachments_req.swap(false, Ordering::AcqRel) {
            queue_attached_picture(session);
        }

        if !session.infinite_buffer && queues_full(session) {
            session.waker.wait_timeout(QUEUE_WAIT_TIMEOUT);
            continue;
        }

        if !paused && decoder_drained(session, MediaType::Audio) && decoder_drained(session, MediaType::Video) {
            let policy = EndOfMediaPolicy::for_master(session.clocks.master_sync_type());
            if !policy.is_satisfied(session) {
                session.waker.wait_timeout(QUEUE_WAIT_TIMEOUT);
                continue;
            }
            if session.is_looping() {
                info!("{} 🔁 播放结束，从头循环", log_ctx());
                session.emit(MediaEvent::PlaybackEndReached);
                session.stream_seek(session.start_position(), 0);
            } else if session.eof.load(Ordering::Acquire) {
                info!("{} 🏁 播放结束（{:?}）", log_ctx(), policy);
                session.set_state(MediaState::Stopped);
                session.emit(MediaEvent::PlaybackEndReached);
                session.emit(MediaEvent::PlaybackSuspended);
            }
        }

        let outcome = session.source.lock().read_packet();
        match outcome {
            ReadOutcome::Packet(packet) => {
                session.eof.store(false, Ordering::Release);
                route_packet(session, packet, start_time, window, &mut stats);
            }
            ReadOutcome::EndOfFile => {
                if !session.eof.swap(true, Ordering::AcqRel) {
                    info!("{} 📄 Demuxer 到达文件末尾，送入结束标记", log_ctx());
                    for media_type in [MediaType::Video, MediaType::Audio, MediaType::Subtitle] {
                        if session.stream_index(media_type).is_some() {
                            session.packet_queue(media_type).put_end_of_stream();
                        }
                    }
                }
                session.waker.wait_timeout(QUEUE_WAIT_TIMEOUT);
            }
            ReadOutcome::Error(e) => {
                warn!("{} ⚠ 读取包失败，稍后重试: {}", log_ctx(), e);
                session.waker.wait_timeout(QUEUE_WAIT_TIMEOUT);
            }
        }
    }

    info!(
        "{} 🛑 Demuxer 线程退出（共读取 {} 个包：{} 视频，{} 音频，{} 字幕，{} 丢弃）",
        log_ctx(),
        stats.packets,
        stats.video,
        stats.audio,
        stats.subtitle,
        stats.discarded
    );
}

fn mirror_pause(session: &PlayerSession, paused: bool) {
    let mut source = session.source.lock();
    if paused {
        match source.read_pause() {
            Ok(()) => session.read_pause_unsupported.store(false, Ordering::Release),
            Err(PlayerError::Unsupported(_)) => {
                session.read_pause_unsupported.store(true, Ordering::Release)
            }
            Err(e) => warn!("{} ⚠ 暂停读取失败: {}", log_ctx(), e),
        }
    } else if let Err(e) = source.read_play() {
        warn!("{} ⚠ 恢复读取失败: {}", log_ctx(), e);
    }
}

fn service_seek(session: &PlayerSession, request: SeekRequest) {
    let min = if request.rel > 0 { request.target - request.rel + 2 } else { i64::MIN };
    let max = if request.rel < 0 { request.target - request.rel - 2 } else { i64::MAX };
    let result = session.source.lock().seek(min, request.target, max);
    match result {
        Ok(()) => {
            for media_type in [MediaType::Audio, MediaType::Subtitle, MediaType::Video] {
                if session.stream_index(media_type).is_some() {
                    session.packet_queue(media_type).flush();
                }
            }
            let target = request.target as f64 / 1_000_000.0;
            session.clocks.external.set(target, 0);
            session.flush_samples();
            let position = (target - session.container_start).max(0.0);
            session.set_current_time(position);
            session.last_fetch_video_end.store(position);
            info!("{} ⏩ Seek 完成: {:.3}s", log_ctx(), position);
            session.emit(MediaEvent::SeekCompleted);
        }
        Err(e) => error!("{} ❌ Seek 失败（队列保持不变）: {}", log_ctx(), e),
    }
    session.finish_seek();
    session.queue_attachments_req.store(true, Ordering::Release);
    session.eof.store(false, Ordering::Release);
}

fn queue_attached_picture(session: &PlayerSession) {
    let Some(index) = session.video_stream.load() else {
        return;
    };
    let Some(picture) = session.stream_info(index).and_then(|info| info.attached_picture.clone()) else {
        return;
    };
    debug!("{} 🖼 送入封面图", log_ctx());
    session.videoq.put(Packet::Data(picture));
    session.videoq.put_end_of_stream();
}

fn stream_has_enough_packets(session: &PlayerSession, media_type: MediaType) -> bool {
    let Some(index) = session.stream_index(media_type) else {
        return true;
    };
    let queue = session.packet_queue(media_type);
    if queue.is_aborted() {
        return true;
    }
    let Some(info) = session.stream_info(index) else {
        return true;
    };
    if info.attached_picture.is_some() {
        return true;
    }
    let duration = queue.duration();
    queue.nb_packets() > MIN_FRAMES && (duration == 0 || info.time_base * duration as f64 > 1.0)
}

fn queues_full(session: &PlayerSession) -> bool {
    let total = session.audioq.size() + session.videoq.size() + session.subtitleq.size();
    total > MAX_QUEUE_SIZE
        || (stream_has_enough_packets(session, MediaType::Audio)
            && stream_has_enough_packets(session, MediaType::Video)
            && stream_has_enough_packets(session, MediaType::Subtitle))
}

/// 流未打开，或解码器已在当前序列排空且没有待显示帧
fn decoder_drained(session: &PlayerSession, media_type: MediaType) -> bool {
    if session.stream_index(media_type).is_none() {
        return true;
    }
    match media_type {
        MediaType::Audio => {
            session.audio_status.finished() == session.audioq.serial()
                && session.sampq.nb_remaining() == 0
        }
        MediaType::Video => {
            session.video_status.finished() == session.videoq.serial()
                && session.pictq.nb_remaining() == 0
        }
        MediaType::Subtitle => true,
    }
}

fn route_packet(
    session: &PlayerSession,
    packet: MediaPacket,
    start_time: f64,
    window: Option<f64>,
    stats: &mut ReadStats,
) {
    stats.packets += 1;
    let index = packet.stream_index;
    let Some(info) = session.stream_info(index) else {
        stats.discarded += 1;
        return;
    };
    let in_range = packet_in_play_range(&packet, info, start_time, window);
    if !in_range {
        stats.discarded += 1;
        return;
    }

    if session.audio_stream.load() == Some(index) {
        stats.audio += 1;
        if stats.audio <= LOG_FIRST_N || stats.audio % 100 == 0 {
            debug!("{} 🔊 Demuxer 读取音频包 #{}（total packets {}）", log_ctx(), stats.audio, stats.packets);
        }
        session.audioq.put(Packet::Data(packet));
    } else if session.video_stream.load() == Some(index) && info.attached_picture.is_none() {
        stats.video += 1;
        if stats.video <= LOG_FIRST_N || stats.video % 100 == 0 {
            debug!("{} 📦 Demuxer 读取视频包 #{}（total packets {}）", log_ctx(), stats.video, stats.packets);
        }
        session.videoq.put(Packet::Data(packet));
    } else if session.subtitle_stream.load() == Some(index) {
        stats.subtitle += 1;
        session.subtitleq.put(Packet::Data(packet));
    } else {
        stats.discarded += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::PlayerOptions;
    use crate::player::demuxer_source::{DemuxerSource, StreamDecoder, StreamParams};
    use crate::player::packet_queue::PacketGet;
    use crossbeam::queue::SegQueue;
    use std::sync::atomic::AtomicUsize;

    /// 固定流列表的数据源，记录 read_pause/read_play 调用次数
    struct ScriptedSource {
        streams: Vec<StreamInfo>,
        pause_supported: bool,
        pauses: Arc<AtomicUsize>,
        plays: Arc<AtomicUsize>,
    }

    impl ScriptedSource {
        fn new(streams: Vec<StreamInfo>) -> Self {
            Self {
                streams,
                pause_supported: false,
                pauses: Arc::new(AtomicUsize::new(0)),
                plays: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    impl DemuxerSource for ScriptedSource {
        fn streams(&self) -> Vec<StreamInfo> {
            self.streams.clone()
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
        fn read_pause(&mut self) -> Result<()> {
            if !self.pause_supported {
                return Err(PlayerError::Unsupported("read_pause".into()));
            }
            self.pauses.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }
        fn read_play(&mut self) -> Result<()> {
            self.plays.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }
        fn open_decoder(&mut self, stream_index: usize) -> Result<Box<dyn StreamDecoder>> {
            Err(PlayerError::DecoderNotFound(format!("stream {}", stream_index)))
        }
        fn description(&self) -> String {
            "scripted".into()
        }
    }

    fn session_with(source: ScriptedSource) -> PlayerSession {
        PlayerSession::new(Box::new(source), PlayerOptions::default(), Arc::new(SegQueue::new()))
    }

    fn cover_art_stream() -> StreamInfo {
        StreamInfo {
            index: 0,
            codec_name: "mjpeg".into(),
            time_base: 1.0 / 90000.0,
            start_time: None,
            language: None,
            title: None,
            params: StreamParams::Video {
                width: 600,
                height: 600,
                frame_rate: 0.0,
                avg_frame_rate: 0.0,
                bit_rate: 0,
            },
            attached_picture: Some(MediaPacket {
                stream_index: 0,
                data: vec![0xff; 128],
                is_key: true,
                ..MediaPacket::default()
            }),
        }
    }

    fn audio_packet(data_len: usize, duration: i64) -> Packet {
        Packet::Data(MediaPacket {
            stream_index: 0,
            data: vec![0; data_len],
            duration,
            ..MediaPacket::default()
        })
    }

    fn audio_stream(start_time: Option<i64>) -> StreamInfo {
        StreamInfo {
            index: 0,
            codec_name: "pcm_s16le".into(),
            time_base: 1.0 / 48000.0,
            start_time,
            language: None,
            title: None,
            params: StreamParams::Audio {
                sample_rate: 48000,
                channels: 2,
                channel_layout: 0x3,
                sample_format: crate::core::SampleFormat::S16,
                bits_per_sample: 16,
            },
            attached_picture: None,
        }
    }

    fn packet_at(pts: Option<i64>, dts: Option<i64>) -> MediaPacket {
        MediaPacket {
            pts,
            dts,
            ..MediaPacket::default()
        }
    }

    #[test]
    fn test_play_range_uses_stream_start_and_window() {
        let info = audio_stream(Some(48000));
        let inside = packet_at(Some(48000 * 5), None);
        let outside = packet_at(Some(48000 * 12), None);
        assert!(packet_in_play_range(&inside, &info, 0.0, Some(10.0)));
        assert!(!packet_in_play_range(&outside, &info, 0.0, Some(10.0)));
        // 起播位置之后的 10 秒窗口
        assert!(packet_in_play_range(&outside, &info, 2.0, Some(10.0)));
    }

    #[test]
    fn test_play_range_falls_back_to_dts_and_unknown_window() {
        let info = audio_stream(None);
        let late = packet_at(None, Some(48000 * 20));
        assert!(!packet_in_play_range(&late, &info, 0.0, Some(10.0)));
        assert!(packet_in_play_range(&late, &info, 0.0, None));
        assert!(packet_in_play_range(&packet_at(None, None), &info, 0.0, Some(1.0)));
    }

    #[test]
    fn test_end_policy_follows_master_clock() {
        assert_eq!(EndOfMediaPolicy::for_master(SyncMaster::Audio), EndOfMediaPolicy::AudioDrained);
        assert_eq!(
            EndOfMediaPolicy::for_master(SyncMaster::Video),
            EndOfMediaPolicy::VideoDurationElapsed
        );
        assert_eq!(
            EndOfMediaPolicy::for_master(SyncMaster::External),
            EndOfMediaPolicy::VideoDurationElapsed
        );
    }

    #[test]
    fn test_video_duration_elapsed_with_one_frame_tolerance() {
        let frame = 1.0 / 30.0;
        assert!(!video_duration_elapsed(9.9, frame, Some(10.0)));
        assert!(video_duration_elapsed(9.9999, frame, Some(10.0)));
        assert!(video_duration_elapsed(10.0, 0.0, Some(10.0)));
        assert!(video_duration_elapsed(0.0, frame, None));
    }

    #[test]
    fn test_attached_picture_is_queued_with_end_marker() {
        let session = session_with(ScriptedSource::new(vec![cover_art_stream()]));
        session.video_stream.store(Some(0));
        session.videoq.start();

        // 封面图流不参与缓冲量判断
        assert!(stream_has_enough_packets(&session, MediaType::Video));

        queue_attached_picture(&session);
        assert_eq!(session.videoq.nb_packets(), 2);
        match session.videoq.get(false) {
            PacketGet::Packet(Packet::Data(packet), _) => assert_eq!(packet.data.len(), 128),
            other => panic!("expected the cover picture, got {:?}", other),
        }
        assert!(matches!(
            session.videoq.get(false),
            PacketGet::Packet(Packet::EndOfStream, _)
        ));

        // 容器里读到的同一流数据包被丢弃
        let mut stats = ReadStats::default();
        let packet = MediaPacket {
            stream_index: 0,
            data: vec![0; 16],
            ..MediaPacket::default()
        };
        route_packet(&session, packet, 0.0, None, &mut stats);
        assert_eq!(stats.discarded, 1);
        assert_eq!(session.videoq.nb_packets(), 0);
    }

    #[test]
    fn test_no_attached_picture_without_video_stream() {
        let session = session_with(ScriptedSource::new(vec![cover_art_stream()]));
        session.videoq.start();
        queue_attached_picture(&session);
        assert_eq!(session.videoq.nb_packets(), 0);
    }

    #[test]
    fn test_queues_full_needs_packets_and_one_second() {
        let session = session_with(ScriptedSource::new(vec![audio_stream(Some(0))]));
        session.audio_stream.store(Some(0));
        session.audioq.start();
        assert!(!queues_full(&session));

        // 包数超过 MIN_FRAMES，但缓冲时长不足 1 秒
        for _ in 0..=MIN_FRAMES {
            session.audioq.put(audio_packet(32, 100));
        }
        assert!(!queues_full(&session));

        session.audioq.put(audio_packet(32, 48000));
        assert!(queues_full(&session));

        // seek 清空后重新开始积累
        session.audioq.flush();
        assert!(!queues_full(&session));
    }

    #[test]
    fn test_queues_full_on_total_size() {
        let session = session_with(ScriptedSource::new(vec![audio_stream(Some(0))]));
        session.audio_stream.store(Some(0));
        session.audioq.start();

        session.audioq.put(audio_packet(MAX_QUEUE_SIZE / 2, 100));
        assert!(!queues_full(&session));
        session.audioq.put(audio_packet(MAX_QUEUE_SIZE / 2, 100));
        assert!(session.audioq.size() > MAX_QUEUE_SIZE);
        assert!(queues_full(&session));
    }

    #[test]
    fn test_pause_is_mirrored_to_source() {
        let mut source = ScriptedSource::new(vec![audio_stream(Some(0))]);
        source.pause_supported = true;
        let (pauses, plays) = (source.pauses.clone(), source.plays.clone());
        let session = session_with(source);

        mirror_pause(&session, true);
        assert_eq!(pauses.load(Ordering::Relaxed), 1);
        assert!(!session.read_pause_unsupported.load(Ordering::Acquire));

        mirror_pause(&session, false);
        assert_eq!(plays.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_unsupported_read_pause_is_remembered() {
        let source = ScriptedSource::new(vec![audio_stream(Some(0))]);
        let pauses = source.pauses.clone();
        let session = session_with(source);

        mirror_pause(&session, true);
        assert_eq!(pauses.load(Ordering::Relaxed), 0);
        assert!(session.read_pause_unsupported.load(Ordering::Acquire));
    }
}
