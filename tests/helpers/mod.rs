//! 集成测试辅助：合成媒体源和轮询工具
//!
//! - SyntheticSource: 按时间顺序交错产出视频/音频数据包的内存数据源
//! - SyntheticCodec: 每个数据包产出一帧的假解码器
//! - Host: 模拟宿主轮询（取走音频样本、收集事件）

pub mod synthetic_source;

pub use synthetic_source::{SyntheticCodec, SyntheticConfig, SyntheticSource};

use myy_media::core::{FetchResult, MediaEvent, TimeRange};
use myy_media::PlaybackManager;
use std::thread;
use std::time::{Duration, Instant};

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// 模拟宿主：每次 pump() 取走全部音频样本并收集事件
#[derive(Default)]
pub struct Host {
    pub events: Vec<MediaEvent>,
    pub audio_samples: usize,
}

impl Host {
    pub fn pump(&mut self, manager: &PlaybackManager) {
        while let FetchResult::Ok(_) = manager.fetch_audio(TimeRange::new(0.0, f64::MAX)) {
            self.audio_samples += 1;
        }
        self.events.extend(manager.get_events());
    }

    /// 轮询直到条件成立或超时
    pub fn wait_until(
        &mut self,
        manager: &PlaybackManager,
        timeout: Duration,
        mut condition: impl FnMut(&PlaybackManager, &Host) -> bool,
    ) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            self.pump(manager);
            if condition(manager, self) {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(5));
        }
    }

    pub fn count(&self, event: MediaEvent) -> usize {
        self.events.iter().filter(|&&e| e == event).count()
    }
}
