//! 播放时钟
//!
//! 每个时钟记录最近一次设置的 pts 与设置时刻，读取时按流逝时间和速率外推。
//! 时钟带有序列号：当所属数据包队列被 flush（序列号递增）后，旧时钟读数返回 NaN，
//! 表示时间线已经不连续，调用方不应据此做同步纠正。

use crate::core::types::{MediaType, SyncMaster};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Instant;

/// 时钟差值超过该值（秒）时视为不连续，不做纠正而是直接对齐
pub const AV_NOSYNC_THRESHOLD: f64 = 9.0;

static EPOCH: OnceLock<Instant> = OnceLock::new();

/// 单调递增的相对时间（秒）
pub fn relative_time() -> f64 {
    EPOCH.get_or_init(Instant::now).elapsed().as_secs_f64()
}

/// 可跨线程共享的序列号
#[derive(Clone, Debug, Default)]
pub struct SerialCell(Arc<AtomicI32>);

impl SerialCell {
    pub fn new(value: i32) -> Self {
        Self(Arc::new(AtomicI32::new(value)))
    }

    pub fn get(&self) -> i32 {
        self.0.load(Ordering::Acquire)
    }

    pub fn set(&self, value: i32) {
        self.0.store(value, Ordering::Release);
    }

    /// 递增并返回新值
    pub fn bump(&self) -> i32 {
        self.0.fetch_add(1, Ordering::AcqRel) + 1
    }
}

/// 播放时钟 - 用于音视频同步
#[derive(Clone)]
pub struct Clock {
    inner: Arc<Mutex<ClockInner>>,
    /// 所属队列的序列号；None 表示时钟自身即是时间线（外部时钟）
    queue_serial: Option<SerialCell>,
}

struct ClockInner {
    pts: f64,          // 最近设置的时间（秒）
    pts_drift: f64,    // pts - last_updated
    last_updated: f64, // 最近设置时的相对时间
    speed: f64,
    serial: i32,
    paused: bool,
}

impl Clock {
    pub fn new(queue_serial: Option<SerialCell>) -> Self {
        let clock = Self {
            inner: Arc::new(Mutex::new(ClockInner {
                pts: f64::NAN,
                pts_drift: f64::NAN,
                last_updated: 0.0,
                speed: 1.0,
                serial: -1,
                paused: false,
            })),
            queue_serial,
        };
        clock.set(f64::NAN, -1);
        clock
    }

    /// 获取当前时间（秒），序列号过期时返回 NaN
    pub fn get(&self) -> f64 {
        self.get_at(relative_time())
    }

    pub fn get_at(&self, time: f64) -> f64 {
        let inner = self.inner.lock();
        if let Some(queue_serial) = &self.queue_serial {
            if queue_serial.get() != inner.serial {
                return f64::NAN;
            }
        }
        if inner.paused {
            inner.pts
        } else {
            inner.pts_drift + time - (time - inner.last_updated) * (1.0 - inner.speed)
        }
    }

    pub fn set_at(&self, pts: f64, serial: i32, time: f64) {
        let mut inner = self.inner.lock();
        inner.pts = pts;
        inner.last_updated = time;
        inner.pts_drift = pts - time;
        inner.serial = serial;
    }

    pub fn set(&self, pts: f64, serial: i32) {
        self.set_at(pts, serial, relative_time());
    }

    /// 修改速率前先把当前读数固定下来，避免时间跳变
    pub fn set_speed(&self, speed: f64) {
        let current = self.get();
        let serial = self.serial();
        self.set(current, serial);
        self.inner.lock().speed = speed;
    }

    pub fn speed(&self) -> f64 {
        self.inner.lock().speed
    }

    pub fn serial(&self) -> i32 {
        self.inner.lock().serial
    }

    /// 最近一次设置的原始 pts（不外推）
    pub fn pts(&self) -> f64 {
        self.inner.lock().pts
    }

    pub fn last_updated(&self) -> f64 {
        self.inner.lock().last_updated
    }

    pub fn is_paused(&self) -> bool {
        self.inner.lock().paused
    }

    pub fn set_paused(&self, paused: bool) {
        self.inner.lock().paused = paused;
    }

    /// 当自身无效或与 slave 偏差过大时，直接对齐到 slave
    pub fn sync_to_slave(&self, slave: &Clock) {
        let clock = self.get();
        let slave_clock = slave.get();
        if !slave_clock.is_nan()
            && (clock.is_nan() || (clock - slave_clock).abs() > AV_NOSYNC_THRESHOLD)
        {
            self.set(slave_clock, slave.serial());
        }
    }
}

/// 视频、音频、外部三个时钟，以及主时钟的选择
pub struct ClockSet {
    pub video: Clock,
    pub audio: Clock,
    pub external: Clock,
    configured: SyncMaster,
    has_video: AtomicBool,
    has_audio: AtomicBool,
}

impl ClockSet {
    pub fn new(configured: SyncMaster, video_serial: SerialCell, audio_serial: SerialCell) -> Self {
        Self {
            video: Clock::new(Some(video_serial)),
            audio: Clock::new(Some(audio_serial)),
            external: Clock::new(None),
            configured,
            has_video: AtomicBool::new(false),
            has_audio: AtomicBool::new(false),
        }
    }

    /// 记录某类流是否已打开，主时钟回退依赖这些标志
    pub fn set_stream_open(&self, media_type: MediaType, open: bool) {
        match media_type {
            MediaType::Video => self.has_video.store(open, Ordering::Release),
            MediaType::Audio => self.has_audio.store(open, Ordering::Release),
            MediaType::Subtitle => {}
        }
    }

    /// 实际生效的主时钟：视频缺失回退到音频，音频缺失回退到外部时钟
    pub fn master_sync_type(&self) -> SyncMaster {
        let has_video = self.has_video.load(Ordering::Acquire);
        let has_audio = self.has_audio.load(Ordering::Acquire);
        match self.configured {
            SyncMaster::Video if has_video => SyncMaster::Video,
            SyncMaster::Video | SyncMaster::Audio if has_audio => SyncMaster::Audio,
            _ => SyncMaster::External,
        }
    }

    pub fn master_clock(&self) -> f64 {
        match self.master_sync_type() {
            SyncMaster::Video => self.video.get(),
            SyncMaster::Audio => self.audio.get(),
            SyncMaster::External => self.external.get(),
        }
    }

    pub fn set_paused(&self, paused: bool) {
        self.video.set_paused(paused);
        self.audio.set_paused(paused);
        self.external.set_paused(paused);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clock_extrapolates_from_last_set() {
        let serial = SerialCell::new(0);
        let clock = Clock::new(Some(serial.clone()));
        clock.set_at(5.0, 0, 100.0);
        assert!((clock.get_at(100.5) - 5.5).abs() < 1e-9);
    }

    #[test]
    fn test_clock_stale_serial_reads_nan() {
        let serial = SerialCell::new(0);
        let clock = Clock::new(Some(serial.clone()));
        clock.set_at(1.0, 0, 10.0);
        assert!(!clock.get_at(10.0).is_nan());

        serial.bump();
        assert!(clock.get_at(10.0).is_nan());
    }

    #[test]
    fn test_clock_paused_holds_value() {
        let clock = Clock::new(None);
        clock.set_at(2.0, 0, 1.0);
        clock.set_paused(true);
        assert_eq!(clock.get_at(50.0), 2.0);
    }

    #[test]
    fn test_clock_speed_scales_elapsed_time() {
        let clock = Clock::new(None);
        clock.set_at(0.0, 0, 0.0);
        clock.inner.lock().speed = 0.5;
        assert!((clock.get_at(2.0) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_sync_to_slave_only_on_large_gap() {
        let external = Clock::new(None);
        let audio = Clock::new(None);

        // 外部时钟无效时直接对齐
        audio.set(3.0, 7);
        external.sync_to_slave(&audio);
        assert!((external.get() - 3.0).abs() < 0.05);
        assert_eq!(external.serial(), 7);

        // 小偏差保留
        external.set(3.5, 7);
        external.sync_to_slave(&audio);
        assert!((external.get() - 3.5).abs() < 0.05);

        // 超过阈值重新对齐
        audio.set(20.0, 8);
        external.sync_to_slave(&audio);
        assert!((external.get() - 20.0).abs() < 0.05);
    }

    #[test]
    fn test_master_fallback_chain() {
        let clocks = ClockSet::new(SyncMaster::Video, SerialCell::new(0), SerialCell::new(0));
        assert_eq!(clocks.master_sync_type(), SyncMaster::External);

        clocks.set_stream_open(MediaType::Audio, true);
        assert_eq!(clocks.master_sync_type(), SyncMaster::Audio);

        clocks.set_stream_open(MediaType::Video, true);
        assert_eq!(clocks.master_sync_type(), SyncMaster::Video);

        let audio_master = ClockSet::new(SyncMaster::Audio, SerialCell::new(0), SerialCell::new(0));
        audio_master.set_stream_open(MediaType::Video, true);
        assert_eq!(audio_master.master_sync_type(), SyncMaster::External);
    }
}
