//! 音视频同步
//!
//! 显示线程每个刷新周期调用一次 video_refresh：根据主时钟计算上一帧还应显示多久，
//! 决定等待、显示下一帧或丢弃迟到的帧，并把到期的画面和字幕交给宿主。

use crate::core::{
    log_ctx, relative_time, Clock, OverlaySample, SyncMaster, VideoSample,
};
use crate::player::frame_queue::Frame;
use crate::player::session::PlayerSession;
use log::{debug, info, trace};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// 同步阈值下限（秒）
pub const AV_SYNC_THRESHOLD_MIN: f64 = 0.04;
/// 同步阈值上限（秒）
pub const AV_SYNC_THRESHOLD_MAX: f64 = 0.1;
/// 帧时长超过该值时，超前不再通过重复帧而是直接加上差值来纠正
pub const AV_SYNC_FRAMEDUP_THRESHOLD: f64 = 0.1;
/// 默认刷新周期（秒）
pub const REFRESH_RATE: f64 = 0.01;

pub const EXTERNAL_CLOCK_MIN_FRAMES: usize = 2;
pub const EXTERNAL_CLOCK_MAX_FRAMES: usize = 10;
pub const EXTERNAL_CLOCK_SPEED_MIN: f64 = 0.900;
pub const EXTERNAL_CLOCK_SPEED_MAX: f64 = 1.010;
pub const EXTERNAL_CLOCK_SPEED_STEP: f64 = 0.001;

/// 根据视频时钟与主时钟的差值修正上一帧的显示时长
///
/// diff 为 视频时钟 - 主时钟；视频本身是主时钟时传 NaN，不做修正。
pub fn compute_target_delay(delay: f64, diff: f64, max_frame_duration: f64) -> f64 {
    let sync_threshold = AV_SYNC_THRESHOLD_MIN.max(AV_SYNC_THRESHOLD_MAX.min(delay));
    if diff.is_nan() || diff.abs() >= max_frame_duration {
        return delay;
    }
    if diff <= -sync_threshold {
        (delay + diff).max(0.0)
    } else if diff >= sync_threshold && delay > AV_SYNC_FRAMEDUP_THRESHOLD {
        delay + diff
    } else if diff >= sync_threshold {
        2.0 * delay
    } else {
        delay
    }
}

/// 两帧之间的名义时长；序列号不同返回 0，间隔异常时退回帧自身的时长
pub fn vp_duration<T>(vp: &Frame<T>, next: &Frame<T>, max_frame_duration: f64) -> f64 {
    if vp.serial != next.serial {
        return 0.0;
    }
    let duration = next.pts - vp.pts;
    if duration.is_nan() || duration <= 0.0 || duration > max_frame_duration {
        vp.duration
    } else {
        duration
    }
}

/// 实时源以外部时钟为主时，按缓冲包数微调外部时钟速度
///
/// 包数参数为 None 表示该流未打开。
pub fn check_external_clock_speed(
    external: &Clock,
    video_packets: Option<usize>,
    audio_packets: Option<usize>,
) {
    let starving = video_packets.is_some_and(|n| n <= EXTERNAL_CLOCK_MIN_FRAMES)
        || audio_packets.is_some_and(|n| n <= EXTERNAL_CLOCK_MIN_FRAMES);
    let plenty = video_packets.map_or(true, |n| n > EXTERNAL_CLOCK_MAX_FRAMES)
        && audio_packets.map_or(true, |n| n > EXTERNAL_CLOCK_MAX_FRAMES);
    let speed = external.speed();
    if starving {
        external.set_speed(EXTERNAL_CLOCK_SPEED_MIN.max(speed - EXTERNAL_CLOCK_SPEED_STEP));
    } else if plenty {
        external.set_speed(EXTERNAL_CLOCK_SPEED_MAX.min(speed + EXTERNAL_CLOCK_SPEED_STEP));
    } else if speed != 1.0 {
        external.set_speed(speed + EXTERNAL_CLOCK_SPEED_STEP * (1.0 - speed) / (1.0 - speed).abs());
    }
}

/// 显示线程的视频刷新逻辑
pub struct VideoRefresher {
    session: Arc<PlayerSession>,
}

impl VideoRefresher {
    pub fn new(session: Arc<PlayerSession>) -> Self {
        Self { session }
    }

    fn framedrop_enabled(&self) -> bool {
        match self.session.options.framedrop {
            Some(enabled) => enabled,
            None => self.session.clocks.master_sync_type() != SyncMaster::Video,
        }
    }

    fn target_delay(&self, delay: f64) -> f64 {
        let clocks = &self.session.clocks;
        let diff = if clocks.master_sync_type() == SyncMaster::Video {
            f64::NAN
        } else {
            clocks.video.get() - clocks.master_clock()
        };
        let target = compute_target_delay(delay, diff, self.session.max_frame_duration);
        trace!("video: delay={:.3} A-V={:.3}", target, -diff);
        target
    }

    fn update_video_pts(&self, pts: f64, serial: i32) {
        let clocks = &self.session.clocks;
        clocks.video.set(pts, serial);
        clocks.external.sync_to_slave(&clocks.video);
    }

    /// 刷新一次，remaining_time 被缩短为距离下一帧到期的时间
    pub fn video_refresh(&self, remaining_time: &mut f64) {
        let session = &*self.session;
        let clocks = &session.clocks;

        if !session.is_paused()
            && clocks.master_sync_type() == SyncMaster::External
            && session.realtime
        {
            check_external_clock_speed(
                &clocks.external,
                session.video_stream.load().map(|_| session.videoq.nb_packets()),
                session.audio_stream.load().map(|_| session.audioq.nb_packets()),
            );
        }

        if session.video_stream.load().is_none() {
            session.force_refresh.store(false, Ordering::Release);
            return;
        }

        let pictq = &session.pictq;
        loop {
            if pictq.nb_remaining() == 0 {
                break;
            }
            let (Some(lastvp), Some(vp)) = (pictq.peek_last(), pictq.peek()) else {
                break;
            };

            match clocks.master_sync_type() {
                SyncMaster::Video => session.set_current_time(vp.pts),
                SyncMaster::External => session.set_current_time(clocks.external.get()),
                SyncMaster::Audio => {}
            }

            if vp.serial != session.videoq.serial() {
                debug!("{} 🗑 丢弃过期视频帧 pts={:.3}", log_ctx(), vp.pts);
                pictq.next();
                continue;
            }

            if lastvp.serial != vp.serial {
                session.frame_timer.store(relative_time());
            }

            if session.is_paused() {
                break;
            }

            let last_duration = vp_duration(&lastvp, &vp, session.max_frame_duration);
            let delay = self.target_delay(last_duration);

            let time = relative_time();
            let frame_timer = session.frame_timer.load();
            if time < frame_timer + delay {
                *remaining_time = (frame_timer + delay - time).min(*remaining_time);
                break;
            }

            let mut frame_timer = frame_timer + delay;
            if delay > 0.0 && time - frame_timer > AV_SYNC_THRESHOLD_MAX {
                frame_timer = time;
            }
            session.frame_timer.store(frame_timer);

            if !vp.pts.is_nan() {
                self.update_video_pts(vp.pts, vp.serial);
            }

            if pictq.nb_remaining() > 1 {
                if let Some(nextvp) = pictq.peek_next() {
                    let duration = vp_duration(&vp, &nextvp, session.max_frame_duration);
                    if self.framedrop_enabled() && time > frame_timer + duration {
                        session.frames_dropped_late.fetch_add(1, Ordering::Relaxed);
                        debug!("{} ⏭ 丢弃迟到帧 pts={:.3}", log_ctx(), vp.pts);
                        pictq.next();
                        continue;
                    }
                }
            }

            if session.subtitle_stream.load().is_some() {
                self.age_subtitles();
            }

            pictq.next();
            session.force_refresh.store(true, Ordering::Release);
            break;
        }

        if session.force_refresh.load(Ordering::Acquire) && pictq.rindex_shown() {
            self.video_display();
        }
        session.force_refresh.store(false, Ordering::Release);
    }

    /// 丢弃已过期或被下一条覆盖的字幕
    fn age_subtitles(&self) {
        let session = &*self.session;
        let subpq = &session.subpq;
        let video_pts = session.clocks.video.pts();
        while subpq.nb_remaining() > 0 {
            let Some(sp) = subpq.peek() else {
                break;
            };
            let sp2 = if subpq.nb_remaining() > 1 { subpq.peek_next() } else { None };
            let expired = video_pts > sp.pts + sp.data.end_display_ms as f64 / 1000.0;
            let superseded = sp2
                .as_ref()
                .is_some_and(|sp2| video_pts > sp2.pts + sp2.data.start_display_ms as f64 / 1000.0);
            if sp.serial != session.subtitleq.serial() || expired || superseded {
                subpq.next();
            } else {
                break;
            }
        }
    }

    /// 把最近显示的帧（以及到期的字幕）交给宿主，每帧只交一次
    fn video_display(&self) {
        let session = &*self.session;
        let Some(vp) = session.pictq.peek_last() else {
            return;
        };

        if session.subtitle_stream.load().is_some() && session.subpq.nb_remaining() > 0 {
            if let Some(sp) = session.subpq.peek() {
                let start = sp.pts + sp.data.start_display_ms as f64 / 1000.0;
                if vp.pts >= start && sp.mark_uploaded() {
                    let duration =
                        sp.data.end_display_ms.saturating_sub(sp.data.start_display_ms) as f64 / 1000.0;
                    session.caption_samples.push(OverlaySample {
                        text: sp.data.text.clone(),
                        time: start,
                        duration,
                    });
                }
            }
        }

        if vp.mark_uploaded() {
            let picture = &vp.data;
            session.video_samples.push(VideoSample {
                data: picture.data.clone(),
                width: picture.width,
                height: picture.height,
                stride: picture.stride,
                format: picture.format,
                time: if vp.pts.is_nan() { 0.0 } else { vp.pts },
                duration: vp.duration,
            });
        }
    }
}

/// 显示线程：按 remaining_time 睡眠后刷新
pub fn display_loop(session: Arc<PlayerSession>) {
    info!("{} 🎞 显示线程启动", log_ctx());
    let refresher = VideoRefresher::new(session.clone());
    let mut remaining_time = 0.0;
    while session.display_running.load(Ordering::Acquire) {
        if remaining_time > 0.0 {
            thread::sleep(Duration::from_secs_f64(remaining_time));
        }
        remaining_time = REFRESH_RATE;
        if !session.is_paused() || session.force_refresh.load(Ordering::Acquire) {
            refresher.video_refresh(&mut remaining_time);
        }
    }
    info!("{} 🛑 显示线程退出", log_ctx());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_delay_identity_near_zero_diff() {
        for delay in [0.0, 0.02, 1.0 / 30.0, 0.04, 0.2] {
            assert_eq!(compute_target_delay(delay, 0.0, 3600.0), delay);
            assert_eq!(compute_target_delay(delay, 0.01, 3600.0), delay);
            assert_eq!(compute_target_delay(delay, -0.01, 3600.0), delay);
        }
    }

    #[test]
    fn test_target_delay_nan_or_huge_diff_is_ignored() {
        assert_eq!(compute_target_delay(0.04, f64::NAN, 3600.0), 0.04);
        assert_eq!(compute_target_delay(0.04, 12.0, 10.0), 0.04);
    }

    #[test]
    fn test_target_delay_lagging_video_shrinks() {
        let delay = 1.0 / 30.0;
        assert!((compute_target_delay(delay, -0.02, 3600.0) - (delay - 0.02)).abs() < 1e-12);
        assert_eq!(compute_target_delay(delay, -0.5, 3600.0), 0.0);
    }

    #[test]
    fn test_target_delay_leading_video_waits() {
        let delay = 1.0 / 30.0;
        assert_eq!(compute_target_delay(delay, 0.05, 3600.0), 2.0 * delay);
        assert!((compute_target_delay(0.2, 0.15, 3600.0) - 0.35).abs() < 1e-12);
    }

    #[test]
    fn test_vp_duration() {
        let a = Frame::new((), 1.0, 0.04, -1, 1);
        let b = Frame::new((), 1.033, 0.04, -1, 1);
        assert!((vp_duration(&a, &b, 3600.0) - 0.033).abs() < 1e-9);

        let backwards = Frame::new((), 0.5, 0.04, -1, 1);
        assert_eq!(vp_duration(&a, &backwards, 3600.0), 0.04);

        let jump = Frame::new((), 50.0, 0.04, -1, 1);
        assert_eq!(vp_duration(&a, &jump, 10.0), 0.04);

        let other_serial = Frame::new((), 1.033, 0.04, -1, 2);
        assert_eq!(vp_duration(&a, &other_serial, 3600.0), 0.0);
    }

    #[test]
    fn test_external_clock_speed_stays_in_bounds() {
        let clock = Clock::new(None);
        clock.set(0.0, 0);
        for _ in 0..500 {
            check_external_clock_speed(&clock, Some(1), Some(50));
        }
        assert!((clock.speed() - EXTERNAL_CLOCK_SPEED_MIN).abs() < 1e-9);

        for _ in 0..500 {
            check_external_clock_speed(&clock, Some(50), None);
        }
        assert!((clock.speed() - EXTERNAL_CLOCK_SPEED_MAX).abs() < 1e-9);
    }

    #[test]
    fn test_external_clock_speed_drifts_back_to_normal() {
        let clock = Clock::new(None);
        clock.set(0.0, 0);
        clock.set_speed(0.995);
        check_external_clock_speed(&clock, Some(5), Some(5));
        assert!((clock.speed() - 0.996).abs() < 1e-9);
    }
}
