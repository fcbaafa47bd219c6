use crate::core::{
    log_ctx, relative_time, AudioBuffer, AudioSample, ClockSet, MediaEvent, MediaState, MediaType,
    OverlaySample, Picture, PlayerFlags, PlayerOptions, SubtitlePayload, VideoSample,
};
use crate::player::decoder::DecoderStatus;
use crate::player::demuxer_source::{DemuxerSource, StreamInfo};
use crate::player::frame_queue::{
    FrameQueue, SAMPLE_QUEUE_SIZE, SUBPICTURE_QUEUE_SIZE, VIDEO_PICTURE_QUEUE_SIZE,
};
use crate::player::packet_queue::{PacketQueue, ReadWaker};
use crate::player::sample_queue::SampleQueue;
use crate::player::tracks::TrackList;
use crossbeam::atomic::AtomicCell;
use crossbeam::queue::SegQueue;
use log::{debug, info};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

/// 时间戳可能不连续的格式中，两帧间隔超过该值视为跳变（秒）
const MAX_FRAME_DURATION_DISCONT: f64 = 10.0;
const MAX_FRAME_DURATION: f64 = 3600.0;

/// 一次待处理的 seek（微秒）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeekRequest {
    pub target: i64,
    pub rel: i64,
}

/// 轨道选择状态，和控制调用共用一把锁
#[derive(Debug, Default)]
pub struct Selection {
    pub audio: Option<usize>,
    pub video: Option<usize>,
    pub caption: Option<usize>,
    pub flags: PlayerFlags,
}

impl Selection {
    pub fn selected(&self, media_type: MediaType) -> Option<usize> {
        match media_type {
            MediaType::Audio => self.audio,
            MediaType::Video => self.video,
            MediaType::Subtitle => self.caption,
        }
    }

    pub fn set_selected(&mut self, media_type: MediaType, index: Option<usize>) {
        match media_type {
            MediaType::Audio => self.audio = index,
            MediaType::Video => self.video = index,
            MediaType::Subtitle => self.caption = index,
        }
    }
}

/// 一次打开的媒体会话
///
/// 读取线程、解码线程、显示线程和音频渲染线程共享同一个会话，
/// 通过原子标志和各队列自身的锁协作；关闭时整体丢弃。
pub struct PlayerSession {
    pub options: PlayerOptions,
    pub source: Mutex<Box<dyn DemuxerSource>>,
    pub streams: Vec<StreamInfo>,
    pub tracks: TrackList,
    /// 容器时长（秒）
    pub duration: Option<f64>,
    /// 容器起始时间（秒）
    pub container_start: f64,
    pub realtime: bool,
    pub infinite_buffer: bool,
    pub max_frame_duration: f64,

    /// 读取前需要打开的流数量，以及已经执行过打开的次数
    pub stream_total: usize,
    pub streams_opened: AtomicUsize,

    pub audioq: Arc<PacketQueue>,
    pub videoq: Arc<PacketQueue>,
    pub subtitleq: Arc<PacketQueue>,
    pub sampq: Arc<FrameQueue<AudioBuffer>>,
    pub pictq: Arc<FrameQueue<Picture>>,
    pub subpq: Arc<FrameQueue<SubtitlePayload>>,
    pub clocks: Arc<ClockSet>,
    pub waker: ReadWaker,

    pub audio_stream: AtomicCell<Option<usize>>,
    pub video_stream: AtomicCell<Option<usize>>,
    pub subtitle_stream: AtomicCell<Option<usize>>,
    pub audio_status: Arc<DecoderStatus>,
    pub video_status: Arc<DecoderStatus>,
    pub subtitle_status: Arc<DecoderStatus>,

    pub selection: Mutex<Selection>,

    pub abort_request: AtomicBool,
    pub display_running: AtomicBool,
    pub audio_running: AtomicBool,
    paused: AtomicBool,
    state: AtomicCell<MediaState>,
    rate: AtomicCell<f32>,
    current_time: AtomicCell<f64>,
    looping: AtomicBool,
    pub eof: AtomicBool,
    seek: Mutex<Option<SeekRequest>>,
    pub queue_attachments_req: AtomicBool,
    pub read_pause_unsupported: AtomicBool,
    pub frame_timer: AtomicCell<f64>,
    pub force_refresh: AtomicBool,

    events: Arc<SegQueue<MediaEvent>>,
    pub audio_samples: SampleQueue<AudioSample>,
    pub video_samples: SampleQueue<VideoSample>,
    pub caption_samples: SampleQueue<OverlaySample>,
    /// 等待宿主取到的 seek 目标（秒）
    pub seek_time: Mutex<Option<f64>>,
    /// 宿主最近取走的视频样本的结束时间（秒）
    pub last_fetch_video_end: AtomicCell<f64>,

    pub frames_dropped_early: Arc<AtomicU64>,
    pub frames_dropped_late: AtomicU64,
}

impl PlayerSession {
    pub fn new(
        source: Box<dyn DemuxerSource>,
        options: PlayerOptions,
        events: Arc<SegQueue<MediaEvent>>,
    ) -> Self {
        let streams = source.streams();
        let duration = source.duration();
        let container_start = source.start_time().unwrap_or(0.0);
        let realtime = source.is_realtime();
        let max_frame_duration = if source.has_discontinuous_timestamps() {
            MAX_FRAME_DURATION_DISCONT
        } else {
            MAX_FRAME_DURATION
        };
        let infinite_buffer = options.infinite_buffer.unwrap_or(realtime);
        let (tracks, stream_total) = TrackList::from_streams(&streams, options.enable_captions);

        let audioq = Arc::new(PacketQueue::new());
        let videoq = Arc::new(PacketQueue::new());
        let subtitleq = Arc::new(PacketQueue::new());
        let sampq = Arc::new(FrameQueue::new(audioq.clone(), SAMPLE_QUEUE_SIZE, true));
        let pictq = Arc::new(FrameQueue::new(videoq.clone(), VIDEO_PICTURE_QUEUE_SIZE, true));
        let subpq = Arc::new(FrameQueue::new(subtitleq.clone(), SUBPICTURE_QUEUE_SIZE, false));
        let clocks = Arc::new(ClockSet::new(
            options.sync_master,
            videoq.serial_cell(),
            audioq.serial_cell(),
        ));

        info!(
            "{} 📂 会话创建: {}，{} 个流（需打开 {} 个），时长 {:?}，实时源 {}",
            log_ctx(),
            source.description(),
            streams.len(),
            stream_total,
            duration,
            realtime
        );

        let looping = options.looping;
        Self {
            options,
            source: Mutex::new(source),
            streams,
            tracks,
            duration,
            container_start,
            realtime,
            infinite_buffer,
            max_frame_duration,
            stream_total,
            streams_opened: AtomicUsize::new(0),
            audioq,
            videoq,
            subtitleq,
            sampq,
            pictq,
            subpq,
            clocks,
            waker: ReadWaker::new(),
            audio_stream: AtomicCell::new(None),
            video_stream: AtomicCell::new(None),
            subtitle_stream: AtomicCell::new(None),
            audio_status: Arc::new(DecoderStatus::new()),
            video_status: Arc::new(DecoderStatus::new()),
            subtitle_status: Arc::new(DecoderStatus::new()),
            selection: Mutex::new(Selection {
                flags: PlayerFlags {
                    media_source_changed: true,
                    selection_changed: true,
                },
                ..Selection::default()
            }),
            abort_request: AtomicBool::new(false),
            display_running: AtomicBool::new(false),
            audio_running: AtomicBool::new(false),
            paused: AtomicBool::new(false),
            state: AtomicCell::new(MediaState::Preparing),
            rate: AtomicCell::new(0.0),
            current_time: AtomicCell::new(0.0),
            looping: AtomicBool::new(looping),
            eof: AtomicBool::new(false),
            seek: Mutex::new(None),
            queue_attachments_req: AtomicBool::new(false),
            read_pause_unsupported: AtomicBool::new(false),
            frame_timer: AtomicCell::new(0.0),
            force_refresh: AtomicBool::new(false),
            events,
            audio_samples: SampleQueue::new(),
            video_samples: SampleQueue::new(),
            caption_samples: SampleQueue::new(),
            seek_time: Mutex::new(None),
            last_fetch_video_end: AtomicCell::new(0.0),
            frames_dropped_early: Arc::new(AtomicU64::new(0)),
            frames_dropped_late: AtomicU64::new(0),
        }
    }

    pub fn is_aborted(&self) -> bool {
        self.abort_request.load(Ordering::Acquire)
    }

    pub fn state(&self) -> MediaState {
        self.state.load()
    }

    pub fn set_state(&self, state: MediaState) {
        let old = self.state.swap(state);
        if old != state {
            info!("{} 🔄 状态变化: {:?} → {:?}", log_ctx(), old, state);
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    pub fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::Release);
    }

    pub fn rate(&self) -> f32 {
        self.rate.load()
    }

    pub fn set_rate_value(&self, rate: f32) {
        self.rate.store(rate);
    }

    pub fn current_time(&self) -> f64 {
        self.current_time.load()
    }

    pub fn set_current_time(&self, time: f64) {
        if !time.is_nan() {
            self.current_time.store(time);
        }
    }

    pub fn is_looping(&self) -> bool {
        self.looping.load(Ordering::Acquire)
    }

    pub fn set_looping(&self, looping: bool) {
        self.looping.store(looping, Ordering::Release);
    }

    pub fn emit(&self, event: MediaEvent) {
        debug!("{} 📣 事件: {:?}", log_ctx(), event);
        self.events.push(event);
    }

    pub fn stream_index(&self, media_type: MediaType) -> Option<usize> {
        match media_type {
            MediaType::Audio => self.audio_stream.load(),
            MediaType::Video => self.video_stream.load(),
            MediaType::Subtitle => self.subtitle_stream.load(),
        }
    }

    pub fn packet_queue(&self, media_type: MediaType) -> &Arc<PacketQueue> {
        match media_type {
            MediaType::Audio => &self.audioq,
            MediaType::Video => &self.videoq,
            MediaType::Subtitle => &self.subtitleq,
        }
    }

    pub fn stream_info(&self, stream_index: usize) -> Option<&StreamInfo> {
        self.streams.get(stream_index)
    }

    /// 请求 seek；已有未完成的 seek 时返回 false
    pub fn stream_seek(&self, target: i64, rel: i64) -> bool {
        let mut seek = self.seek.lock();
        if seek.is_some() {
            return false;
        }
        *seek = Some(SeekRequest { target, rel });
        drop(seek);
        self.waker.signal();
        true
    }

    pub fn seek_pending(&self) -> bool {
        self.seek.lock().is_some()
    }

    pub fn pending_seek(&self) -> Option<SeekRequest> {
        *self.seek.lock()
    }

    pub fn finish_seek(&self) {
        *self.seek.lock() = None;
    }

    /// 开始位置（微秒），用于循环和播放结束后重新开始
    pub fn start_position(&self) -> i64 {
        self.options
            .start_time
            .map(|start| (start * 1_000_000.0) as i64)
            .unwrap_or(0)
    }

    /// 丢弃所有等待宿主取走的样本
    pub fn flush_samples(&self) {
        debug!("{} 🧹 清空输出样本队列", log_ctx());
        self.audio_samples.flush();
        self.video_samples.flush();
        self.caption_samples.flush();
    }

    /// 暂停/恢复，同时处理时钟
    ///
    /// 恢复时把暂停期间流逝的时间补到 frame_timer 上，并重新锚定视频和外部时钟。
    pub fn toggle_pause(&self) {
        let clocks = &self.clocks;
        if self.is_paused() {
            let now = relative_time();
            self.frame_timer
                .store(self.frame_timer.load() + now - clocks.video.last_updated());
            if !self.read_pause_unsupported.load(Ordering::Acquire) {
                clocks.video.set_paused(false);
            }
            clocks.video.set(clocks.video.get(), clocks.video.serial());
        }
        clocks.external.set(clocks.external.get(), clocks.external.serial());
        let paused = !self.is_paused();
        self.set_paused(paused);
        clocks.set_paused(paused);
        debug!("{} ⏯ 暂停状态切换为 {}", log_ctx(), paused);
    }
}
