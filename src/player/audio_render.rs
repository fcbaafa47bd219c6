use crate::core::{
    log_ctx, relative_time, AudioBuffer, AudioSample, AudioTrackFormat, MediaState, SyncMaster,
    AV_NOSYNC_THRESHOLD,
};
use crate::player::frame_queue::Frame;
use crate::player::resampler::{AudioParams, AudioResampler};
use crate::player::session::PlayerSession;
use crate::player::tracks::AUDIO_MIN_BUFFER_SIZE;
use log::{debug, error, info, trace, warn};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// 参与平均的 A-V 差值测量次数
pub const AUDIO_DIFF_AVG_NB: u32 = 20;
/// 单次纠正最多改变的采样数百分比
pub const SAMPLE_CORRECTION_PERCENT_MAX: usize = 10;
/// 音频渲染周期
pub const AUDIO_RENDER_PERIOD: Duration = Duration::from_millis(30);

/// 音频不是主时钟时，通过增减采样数把音频时钟拉向主时钟
#[derive(Debug, Clone)]
pub struct AudioDriftCorrector {
    diff_cum: f64,
    avg_coef: f64,
    avg_count: u32,
    /// 平均差值低于该值（秒）时不纠正
    diff_threshold: f64,
}

impl AudioDriftCorrector {
    pub fn new(diff_threshold: f64) -> Self {
        Self {
            diff_cum: 0.0,
            avg_coef: (0.01f64.ln() / AUDIO_DIFF_AVG_NB as f64).exp(),
            avg_count: 0,
            diff_threshold,
        }
    }

    pub fn avg_count(&self) -> u32 {
        self.avg_count
    }

    /// 根据本次测得的差值（音频时钟 - 主时钟）返回期望输出的采样数
    pub fn wanted_samples(&mut self, nb_samples: usize, diff: f64, sample_rate: u32) -> usize {
        if diff.is_nan() || diff.abs() >= AV_NOSYNC_THRESHOLD {
            // 差值过大，可能是初始时间戳错误，重置平均状态
            self.avg_count = 0;
            self.diff_cum = 0.0;
            return nb_samples;
        }

        self.diff_cum = diff + self.avg_coef * self.diff_cum;
        if self.avg_count < AUDIO_DIFF_AVG_NB {
            self.avg_count += 1;
            return nb_samples;
        }

        let avg_diff = self.diff_cum * (1.0 - self.avg_coef);
        let mut wanted = nb_samples;
        if avg_diff.abs() >= self.diff_threshold {
            let min = nb_samples * (100 - SAMPLE_CORRECTION_PERCENT_MAX) / 100;
            let max = nb_samples * (100 + SAMPLE_CORRECTION_PERCENT_MAX) / 100;
            let corrected = nb_samples as i64 + (diff * sample_rate as f64) as i64;
            wanted = corrected.clamp(min as i64, max as i64) as usize;
        }
        trace!(
            "diff={:.6} adiff={:.6} sample_diff={} thresh={:.6}",
            diff,
            avg_diff,
            wanted as i64 - nb_samples as i64,
            self.diff_threshold
        );
        wanted
    }
}

/// 音频渲染：取解码帧、同步、重采样，产出音频样本并更新音频时钟
pub struct AudioRenderer {
    session: Arc<PlayerSession>,
    audio_src: AudioParams,
    audio_tgt: AudioParams,
    resampler: Option<Box<dyn AudioResampler>>,
    /// 模拟硬件缓冲的字节数
    hw_buf_size: usize,
    audio_buf_size: usize,
    audio_clock: f64,
    audio_clock_serial: i32,
    corrector: AudioDriftCorrector,
}

impl AudioRenderer {
    /// 源格式和目标格式都取自轨道格式（交错 S16）
    pub fn new(session: Arc<PlayerSession>, format: &AudioTrackFormat) -> Self {
        let params = AudioParams::new(
            format.sample_rate,
            format.channels,
            format.channel_layout,
            format.sample_format,
        );
        let diff_threshold = if params.bytes_per_sec > 0 {
            format.hardware_size as f64 / params.bytes_per_sec as f64
        } else {
            0.0
        };
        Self {
            session,
            audio_src: params,
            audio_tgt: params,
            resampler: None,
            hw_buf_size: format.hardware_size,
            audio_buf_size: 0,
            audio_clock: f64::NAN,
            audio_clock_serial: -1,
            corrector: AudioDriftCorrector::new(diff_threshold),
        }
    }

    fn synchronize_audio(&mut self, nb_samples: usize) -> usize {
        let clocks = &self.session.clocks;
        if clocks.master_sync_type() == SyncMaster::Audio {
            return nb_samples;
        }
        let diff = clocks.audio.get() - clocks.master_clock();
        self.corrector
            .wanted_samples(nb_samples, diff, self.audio_src.sample_rate)
    }

    /// 取下一帧可用的音频（跳过过期序列号）
    fn next_frame(&self) -> Option<Arc<Frame<AudioBuffer>>> {
        let session = &*self.session;
        loop {
            let frame = session.sampq.peek_readable()?;
            session.sampq.next();
            if frame.serial == session.audioq.serial() {
                return Some(frame);
            }
        }
    }

    fn is_stopped(&self) -> bool {
        self.session.is_paused()
            || matches!(self.session.state(), MediaState::Paused | MediaState::Stopped)
    }

    /// 解码并转换一帧；暂停、没有数据或转换失败时返回 None
    pub fn audio_decode_frame(&mut self) -> Option<AudioSample> {
        if self.is_stopped() {
            return None;
        }
        let frame = self.next_frame()?;
        let buffer = &frame.data;

        let wanted = self.synchronize_audio(buffer.nb_samples);

        if !self.audio_src.matches(buffer) || (wanted != buffer.nb_samples && self.resampler.is_none()) {
            let src = AudioParams::of_buffer(buffer);
            let created = self
                .session
                .source
                .lock()
                .create_resampler(&src, &self.audio_tgt);
            match created {
                Ok(resampler) => {
                    debug!(
                        "{} 🔧 创建音频转换器: {}Hz {:?} {}ch → {}Hz {:?} {}ch",
                        log_ctx(),
                        src.sample_rate,
                        src.format,
                        src.channels,
                        self.audio_tgt.sample_rate,
                        self.audio_tgt.format,
                        self.audio_tgt.channels
                    );
                    self.resampler = Some(resampler);
                    self.audio_src = src;
                }
                Err(e) => {
                    error!("{} ❌ 无法创建音频转换器: {}", log_ctx(), e);
                    self.resampler = None;
                    return None;
                }
            }
        }

        let data = match self.resampler.as_mut() {
            Some(resampler) => {
                let src_rate = buffer.sample_rate.max(1) as i64;
                let tgt_rate = self.audio_tgt.sample_rate as i64;
                let out_count = (wanted as i64 * tgt_rate / src_rate + 256) as usize;
                if wanted != buffer.nb_samples {
                    let delta = (wanted as i64 - buffer.nb_samples as i64) * tgt_rate / src_rate;
                    let distance = wanted as i64 * tgt_rate / src_rate;
                    if let Err(e) = resampler.set_compensation(delta as i32, distance as i32) {
                        error!("{} ❌ 设置采样补偿失败: {}", log_ctx(), e);
                        return None;
                    }
                }
                let data = match resampler.convert(buffer, out_count) {
                    Ok(data) => data,
                    Err(e) => {
                        error!("{} ❌ 音频转换失败: {}", log_ctx(), e);
                        return None;
                    }
                };
                if self.audio_tgt.frame_size > 0 && data.len() / self.audio_tgt.frame_size == out_count {
                    warn!("{} ⚠ 音频输出缓冲可能过小", log_ctx());
                }
                data
            }
            None => {
                let size = buffer.data_size();
                let plane = buffer.planes.first()?;
                plane[..size.min(plane.len())].to_vec()
            }
        };

        self.audio_clock = if frame.pts.is_nan() || buffer.sample_rate == 0 {
            f64::NAN
        } else {
            frame.pts + buffer.nb_samples as f64 / buffer.sample_rate as f64
        };
        self.audio_clock_serial = frame.serial;

        Some(AudioSample {
            data,
            format: self.audio_tgt.format,
            channels: self.audio_tgt.channels,
            sample_rate: self.audio_tgt.sample_rate,
            time: if frame.pts.is_nan() { 0.0 } else { frame.pts },
            duration: frame.duration,
        })
    }

    /// 渲染一次：产出至多一个音频样本，并按照模拟的硬件缓冲延迟设置音频时钟
    pub fn render_audio(&mut self) -> Option<f64> {
        let callback_time = relative_time();
        let sample = self.audio_decode_frame();
        self.audio_buf_size = match &sample {
            Some(sample) => sample.data.len(),
            None if self.audio_tgt.frame_size > 0 => {
                AUDIO_MIN_BUFFER_SIZE / self.audio_tgt.frame_size * self.audio_tgt.frame_size
            }
            None => 0,
        };

        let time = sample.as_ref().map(|sample| sample.time);
        if let Some(sample) = sample {
            if !matches!(self.session.state(), MediaState::Paused | MediaState::Stopped) {
                self.session.audio_samples.push(sample);
            }
        }

        if !self.audio_clock.is_nan() && self.audio_tgt.bytes_per_sec > 0 {
            let clocks = &self.session.clocks;
            let latency =
                (2 * self.hw_buf_size + self.audio_buf_size) as f64 / self.audio_tgt.bytes_per_sec as f64;
            clocks
                .audio
                .set_at(self.audio_clock - latency, self.audio_clock_serial, callback_time);
            clocks.external.sync_to_slave(&clocks.audio);
            if clocks.master_sync_type() == SyncMaster::Audio {
                self.session.set_current_time(clocks.audio.get());
            }
        }
        time
    }
}

/// 音频渲染线程：约每 30ms 渲染一次
pub fn audio_render_loop(mut renderer: AudioRenderer) {
    info!("{} 🔊 音频渲染线程启动", log_ctx());
    let session = renderer.session.clone();
    let mut start = Instant::now();
    let mut rendered: u64 = 0;
    while session.audio_running.load(Ordering::Acquire) {
        if session.is_paused() {
            thread::sleep(Duration::from_millis(10));
            start = Instant::now();
            continue;
        }
        if renderer.render_audio().is_some() {
            rendered += 1;
        }
        let end = Instant::now();
        let elapsed = end.duration_since(start);
        if elapsed < AUDIO_RENDER_PERIOD {
            thread::sleep(AUDIO_RENDER_PERIOD - elapsed);
        }
        start = end;
    }
    info!("{} 🛑 音频渲染线程退出（共 {} 个样本）", log_ctx(), rendered);
}

#[cfg(test)]
mod tests {
    use super::*;

    const NB: usize = 1600;
    const RATE: u32 = 48000;

    fn corrector() -> AudioDriftCorrector {
        // 48kHz 立体声 S16，2048 采样的模拟硬件缓冲
        AudioDriftCorrector::new(8192.0 / 192_000.0)
    }

    #[test]
    fn test_no_correction_before_enough_measurements() {
        let mut corrector = corrector();
        for i in 0..AUDIO_DIFF_AVG_NB {
            assert_eq!(corrector.wanted_samples(NB, 0.2, RATE), NB);
            assert_eq!(corrector.avg_count(), i + 1);
        }
    }

    #[test]
    fn test_sustained_drift_is_clamped_to_ten_percent() {
        let mut corrector = corrector();
        for _ in 0..AUDIO_DIFF_AVG_NB {
            corrector.wanted_samples(NB, 0.2, RATE);
        }
        // 0.2s * 48000 = 9600 个采样，远超 10% 的上限
        assert_eq!(corrector.wanted_samples(NB, 0.2, RATE), NB * 110 / 100);

        let mut corrector = self::corrector();
        for _ in 0..AUDIO_DIFF_AVG_NB {
            corrector.wanted_samples(NB, -0.2, RATE);
        }
        assert_eq!(corrector.wanted_samples(NB, -0.2, RATE), NB * 90 / 100);
    }

    #[test]
    fn test_small_average_is_not_corrected() {
        let mut corrector = corrector();
        for _ in 0..=AUDIO_DIFF_AVG_NB {
            assert_eq!(corrector.wanted_samples(NB, 0.001, RATE), NB);
        }
    }

    #[test]
    fn test_gross_desync_resets_average() {
        let mut corrector = corrector();
        for _ in 0..AUDIO_DIFF_AVG_NB {
            corrector.wanted_samples(NB, 0.2, RATE);
        }
        assert_eq!(corrector.avg_count(), AUDIO_DIFF_AVG_NB);

        assert_eq!(corrector.wanted_samples(NB, 12.0, RATE), NB);
        assert_eq!(corrector.avg_count(), 0);

        assert_eq!(corrector.wanted_samples(NB, f64::NAN, RATE), NB);
        assert_eq!(corrector.avg_count(), 0);
    }
}
