use anyhow::{anyhow, Context, Result};
use log::{info, warn};
use myy_media::core::{FetchResult, MediaEvent, MediaState, MediaType, PlayerOptions, TimeRange};
use myy_media::PlaybackManager;
use std::thread;
use std::time::{Duration, Instant};

/// 宿主刷新间隔（约 60Hz）
const HOST_TICK: Duration = Duration::from_millis(16);

fn main() -> Result<()> {
    // 初始化日志
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    let mut args = std::env::args().skip(1);
    let url = args
        .next()
        .ok_or_else(|| anyhow!("用法: myy_media <媒体 URL 或文件> [选项.json]"))?;
    let options = match args.next() {
        Some(path) => PlayerOptions::from_json_file(&path)
            .with_context(|| format!("无法读取选项文件 {}", path))?,
        None => PlayerOptions::default(),
    };

    info!("🎬 myy_media 启动: {}", url);
    let mut manager = PlaybackManager::new(options);
    manager
        .open_url(&url)
        .map_err(|e| anyhow!("打开媒体失败: {}", e))?;

    for media_type in [MediaType::Video, MediaType::Audio] {
        if manager.num_tracks(media_type) > 0 {
            match manager.select_track(media_type, Some(0)) {
                Ok(()) => info!(
                    "🎯 {:?} 轨道: {}",
                    media_type,
                    manager.track_display_name(media_type, 0).unwrap_or_default()
                ),
                Err(e) => warn!("⚠ 无法打开 {:?} 轨道，跳过: {}", media_type, e),
            }
        }
    }
    manager.set_rate(1.0)?;

    let started = Instant::now();
    let mut last_report = Instant::now();
    let (mut video_frames, mut audio_samples) = (0u64, 0u64);
    loop {
        let now = manager.time();
        let range = TimeRange::new(now, now + HOST_TICK.as_secs_f64());
        if let FetchResult::Ok(sample) = manager.fetch_best_video_sample(range) {
            video_frames += 1;
            log::debug!("🖼 视频样本 {:.3}s {}x{}", sample.time, sample.width, sample.height);
        }
        while let FetchResult::Ok(_) = manager.fetch_audio(TimeRange::new(0.0, now + 1.0)) {
            audio_samples += 1;
        }

        let mut finished = false;
        for event in manager.get_events() {
            info!("📣 {:?}", event);
            if event == MediaEvent::PlaybackEndReached && !manager.is_looping() {
                finished = true;
            }
        }
        if finished || manager.state() == MediaState::Stopped {
            break;
        }
        if manager.state() == MediaState::Error {
            warn!("⚠ 会话进入错误状态");
            break;
        }

        if last_report.elapsed() >= Duration::from_secs(1) {
            last_report = Instant::now();
            info!(
                "⏱ {:.2}/{:.2}s 视频 {} 帧 音频 {} 块 {:?}",
                manager.time(),
                manager.duration(),
                video_frames,
                audio_samples,
                manager.buffer_status()
            );
        }
        thread::sleep(HOST_TICK);
    }

    info!(
        "🏁 播放结束，用时 {:.2}s，视频 {} 帧，音频 {} 块",
        started.elapsed().as_secs_f64(),
        video_frames,
        audio_samples
    );
    manager.close();
    Ok(())
}
