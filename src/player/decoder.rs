use crate::core::{log_ctx, AudioBuffer, ClockSet, Picture, Result, SubtitlePayload, SyncMaster, AV_NOSYNC_THRESHOLD};
use crate::player::demuxer_source::{DecodedFrame, FramePayload, ReceiveStatus, SendStatus, StreamDecoder};
use crate::player::frame_queue::{Frame, FrameQueue};
use crate::player::packet_queue::{Packet, PacketGet, PacketQueue, ReadWaker};
use crossbeam::atomic::AtomicCell;
use log::{debug, info, warn};
use std::sync::atomic::{AtomicI32, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecoderState {
    Idle,
    Running,
    Finished,
    Aborted,
}

/// 解码器对外可见的状态
#[derive(Debug)]
pub struct DecoderStatus {
    state: AtomicCell<DecoderState>,
    /// 到达流结束时的包序列号，0 表示未结束
    finished: AtomicI32,
}

impl DecoderStatus {
    pub fn new() -> Self {
        Self {
            state: AtomicCell::new(DecoderState::Idle),
            finished: AtomicI32::new(0),
        }
    }

    pub fn state(&self) -> DecoderState {
        self.state.load()
    }

    pub fn finished(&self) -> i32 {
        self.finished.load(Ordering::Acquire)
    }

    fn reset(&self) {
        self.state.store(DecoderState::Idle);
        self.finished.store(0, Ordering::Release);
    }
}

impl Default for DecoderStatus {
    fn default() -> Self {
        Self::new()
    }
}

/// decode_frame() 的结果
#[derive(Debug)]
pub enum DecodeOutcome {
    Frame(DecodedFrame),
    /// 当前序列已排空，finished 已记录
    Drained,
    Aborted,
}

/// 绑定一个编解码器和一个数据包队列的解码器
pub struct Decoder {
    codec: Box<dyn StreamDecoder>,
    queue: Arc<PacketQueue>,
    waker: ReadWaker,
    status: Arc<DecoderStatus>,
    pkt_serial: i32,
    pending: Option<Packet>,
}

impl Decoder {
    pub fn new(
        codec: Box<dyn StreamDecoder>,
        queue: Arc<PacketQueue>,
        waker: ReadWaker,
        status: Arc<DecoderStatus>,
    ) -> Self {
        status.reset();
        Self {
            codec,
            queue,
            waker,
            status,
            pkt_serial: -1,
            pending: None,
        }
    }

    /// 最近取出的数据包的序列号
    pub fn pkt_serial(&self) -> i32 {
        self.pkt_serial
    }

    pub fn queue(&self) -> &Arc<PacketQueue> {
        &self.queue
    }

    /// 解码出下一帧，必要时从队列取包
    pub fn decode_frame(&mut self) -> DecodeOutcome {
        loop {
            if self.queue.serial() == self.pkt_serial {
                loop {
                    if self.queue.is_aborted() {
                        return DecodeOutcome::Aborted;
                    }
                    match self.codec.receive_frame() {
                        Ok(ReceiveStatus::Frame(frame)) => return DecodeOutcome::Frame(frame),
                        Ok(ReceiveStatus::Eof) => {
                            self.status.finished.store(self.pkt_serial, Ordering::Release);
                            self.status.state.store(DecoderState::Finished);
                            self.codec.flush();
                            return DecodeOutcome::Drained;
                        }
                        Ok(ReceiveStatus::Again) => break,
                        Err(e) => {
                            warn!("{} 解码错误（已跳过）: {}", log_ctx(), e);
                            break;
                        }
                    }
                }
            }

            let packet = loop {
                if self.queue.nb_packets() == 0 {
                    self.waker.signal();
                }
                let packet = match self.pending.take() {
                    Some(packet) => packet,
                    None => {
                        let old_serial = self.pkt_serial;
                        match self.queue.get(true) {
                            PacketGet::Packet(packet, serial) => {
                                self.pkt_serial = serial;
                                if old_serial != serial {
                                    // 新的时间线：丢弃解码器内部的旧数据
                                    self.codec.flush();
                                    self.status.finished.store(0, Ordering::Release);
                                    self.status.state.store(DecoderState::Running);
                                }
                                packet
                            }
                            PacketGet::Aborted => return DecodeOutcome::Aborted,
                            PacketGet::Empty => continue,
                        }
                    }
                };
                if self.queue.serial() == self.pkt_serial {
                    break packet;
                }
            };

            let sent = match &packet {
                Packet::Data(data) => self.codec.send_packet(Some(data)),
                Packet::EndOfStream => self.codec.send_packet(None),
            };
            match sent {
                Ok(SendStatus::Accepted) => {}
                Ok(SendStatus::Again) => {
                    debug!("{} 解码器 receive/send 均返回 EAGAIN，稍后重送", log_ctx());
                    self.pending = Some(packet);
                }
                Err(e) => warn!("{} 送入数据包失败（已跳过）: {}", log_ctx(), e),
            }
        }
    }

    /// 启用数据包队列并在独立线程中运行 worker
    pub fn start<F>(self, name: &str, worker: F) -> Result<DecoderHandle>
    where
        F: FnOnce(Decoder) + Send + 'static,
    {
        self.queue.start();
        self.status.state.store(DecoderState::Running);
        let queue = self.queue.clone();
        let status = self.status.clone();
        let thread = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || worker(self))?;
        Ok(DecoderHandle {
            name: name.to_string(),
            queue,
            status,
            thread: Some(thread),
        })
    }
}

/// 运行中的解码线程
pub struct DecoderHandle {
    name: String,
    queue: Arc<PacketQueue>,
    status: Arc<DecoderStatus>,
    thread: Option<JoinHandle<()>>,
}

impl DecoderHandle {
    pub fn status(&self) -> &Arc<DecoderStatus> {
        &self.status
    }

    /// 中止数据包队列、唤醒帧队列上的等待者并等待线程退出
    pub fn abort<T>(&mut self, frame_queue: &FrameQueue<T>) {
        self.queue.abort();
        frame_queue.signal();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("{} ⚠ 解码线程 {} 异常退出", log_ctx(), self.name);
            }
        }
        self.queue.flush();
        self.status.state.store(DecoderState::Aborted);
        info!("{} 🛑 解码线程 {} 已停止", log_ctx(), self.name);
    }
}

impl Drop for DecoderHandle {
    fn drop(&mut self) {
        if let Some(thread) = self.thread.take() {
            warn!("{} ⚠ DecoderHandle {} 被 drop，但未调用 abort()", log_ctx(), self.name);
            self.queue.abort();
            let _ = thread.join();
            self.status.state.store(DecoderState::Aborted);
        }
    }
}

/// 提前丢帧：解码出的帧已落后于主时钟时直接丢弃
pub struct EarlyFrameDrop {
    pub clocks: Arc<ClockSet>,
    /// None 表示视频不是主时钟时启用
    pub framedrop: Option<bool>,
    pub dropped: Arc<AtomicU64>,
}

impl EarlyFrameDrop {
    fn enabled(&self) -> bool {
        match self.framedrop {
            Some(enabled) => enabled,
            None => self.clocks.master_sync_type() != SyncMaster::Video,
        }
    }

    fn should_drop(&self, pts: f64, pkt_serial: i32, queued_packets: usize) -> bool {
        if !self.enabled() || pts.is_nan() {
            return false;
        }
        let diff = pts - self.clocks.master_clock();
        !diff.is_nan()
            && diff.abs() < AV_NOSYNC_THRESHOLD
            && diff < 0.0
            && pkt_serial == self.clocks.video.serial()
            && queued_packets > 0
    }
}

pub fn audio_decode_worker(mut decoder: Decoder, sampq: Arc<FrameQueue<AudioBuffer>>) {
    info!("{} 🔊 音频解码线程启动", log_ctx());
    let mut frame_count: u64 = 0;
    loop {
        let frame = match decoder.decode_frame() {
            DecodeOutcome::Frame(frame) => frame,
            DecodeOutcome::Drained => continue,
            DecodeOutcome::Aborted => break,
        };
        let FramePayload::Audio(buffer) = frame.payload else {
            warn!("{} 音频解码器输出了非音频帧，已忽略", log_ctx());
            continue;
        };
        let duration = if buffer.sample_rate > 0 {
            buffer.nb_samples as f64 / buffer.sample_rate as f64
        } else {
            0.0
        };
        let pts = frame.pts.unwrap_or(f64::NAN);
        let serial = decoder.pkt_serial();
        if !sampq.put(Frame::new(buffer, pts, duration, frame.pos, serial)) {
            break;
        }
        frame_count += 1;
    }
    info!("{} 🛑 音频解码线程退出（共 {} 帧）", log_ctx(), frame_count);
}

pub fn video_decode_worker(
    mut decoder: Decoder,
    pictq: Arc<FrameQueue<Picture>>,
    frame_rate: f64,
    early_drop: EarlyFrameDrop,
) {
    info!("{} 🎬 视频解码线程启动（{:.3} fps）", log_ctx(), frame_rate);
    let duration = if frame_rate > 0.0 { 1.0 / frame_rate } else { 0.0 };
    let mut frame_count: u64 = 0;
    loop {
        let frame = match decoder.decode_frame() {
            DecodeOutcome::Frame(frame) => frame,
            DecodeOutcome::Drained => continue,
            DecodeOutcome::Aborted => break,
        };
        let FramePayload::Video(picture) = frame.payload else {
            warn!("{} 视频解码器输出了非视频帧，已忽略", log_ctx());
            continue;
        };
        let pts = frame.pts.unwrap_or(f64::NAN);
        let serial = decoder.pkt_serial();
        if early_drop.should_drop(pts, serial, decoder.queue().nb_packets()) {
            early_drop.dropped.fetch_add(1, Ordering::Relaxed);
            debug!("{} ⏭ 提前丢弃落后帧 pts={:.3}", log_ctx(), pts);
            continue;
        }
        if !pictq.put(Frame::new(picture, pts, duration, frame.pos, serial)) {
            break;
        }
        frame_count += 1;
    }
    info!("{} 🛑 视频解码线程退出（共 {} 帧）", log_ctx(), frame_count);
}

pub fn subtitle_decode_worker(mut decoder: Decoder, subpq: Arc<FrameQueue<SubtitlePayload>>) {
    info!("{} 💬 字幕解码线程启动", log_ctx());
    loop {
        let frame = match decoder.decode_frame() {
            DecodeOutcome::Frame(frame) => frame,
            DecodeOutcome::Drained => continue,
            DecodeOutcome::Aborted => break,
        };
        let FramePayload::Subtitle(subtitle) = frame.payload else {
            warn!("{} 字幕解码器输出了非字幕帧，已忽略", log_ctx());
            continue;
        };
        let pts = frame.pts.unwrap_or(f64::NAN);
        let duration =
            subtitle.end_display_ms.saturating_sub(subtitle.start_display_ms) as f64 / 1000.0;
        let serial = decoder.pkt_serial();
        if !subpq.put(Frame::new(subtitle, pts, duration, frame.pos, serial)) {
            break;
        }
    }
    info!("{} 🛑 字幕解码线程退出", log_ctx());
}
