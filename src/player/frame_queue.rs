use crate::player::packet_queue::{PacketQueue, QUEUE_WAIT_TIMEOUT};
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub const VIDEO_PICTURE_QUEUE_SIZE: usize = 3;
pub const SUBPICTURE_QUEUE_SIZE: usize = 16;
pub const SAMPLE_QUEUE_SIZE: usize = 9;
const FRAME_QUEUE_SIZE: usize = 16;

/// 解码后的帧
#[derive(Debug)]
pub struct Frame<T> {
    /// 显示时间（秒），未知为 NaN
    pub pts: f64,
    pub duration: f64,
    pub pos: i64,
    pub serial: i32,
    pub data: T,
    uploaded: AtomicBool,
}

impl<T> Frame<T> {
    pub fn new(data: T, pts: f64, duration: f64, pos: i64, serial: i32) -> Self {
        Self {
            pts,
            duration,
            pos,
            serial,
            data,
            uploaded: AtomicBool::new(false),
        }
    }

    /// 是否已交给宿主
    pub fn is_uploaded(&self) -> bool {
        self.uploaded.load(Ordering::Acquire)
    }

    /// 标记为已交给宿主，返回之前是否未标记
    pub fn mark_uploaded(&self) -> bool {
        !self.uploaded.swap(true, Ordering::AcqRel)
    }
}

struct FrameQueueInner<T> {
    queue: Vec<Option<Arc<Frame<T>>>>,
    rindex: usize,
    windex: usize,
    size: usize,
    rindex_shown: usize,
}

/// 固定容量的解码帧环形缓冲
///
/// keep_last 为真时，最后显示的帧在 next() 后仍保留在读位置，
/// 以便重绘；nb_remaining() 不把它计入待显示帧。
/// 队列的中止状态跟随对应的数据包队列。
pub struct FrameQueue<T> {
    inner: Mutex<FrameQueueInner<T>>,
    cond: Condvar,
    pktq: Arc<PacketQueue>,
    max_size: usize,
    keep_last: bool,
}

impl<T> FrameQueue<T> {
    pub fn new(pktq: Arc<PacketQueue>, max_size: usize, keep_last: bool) -> Self {
        let max_size = max_size.clamp(1, FRAME_QUEUE_SIZE);
        Self {
            inner: Mutex::new(FrameQueueInner {
                queue: (0..max_size).map(|_| None).collect(),
                rindex: 0,
                windex: 0,
                size: 0,
                rindex_shown: 0,
            }),
            cond: Condvar::new(),
            pktq,
            max_size,
            keep_last,
        }
    }

    pub fn signal(&self) {
        let _guard = self.inner.lock();
        self.cond.notify_all();
    }

    /// 等待出现空位；数据包队列中止时返回 false
    pub fn peek_writable(&self) -> bool {
        let mut inner = self.inner.lock();
        while inner.size >= self.max_size && !self.pktq.is_aborted() {
            self.cond.wait_for(&mut inner, QUEUE_WAIT_TIMEOUT);
        }
        !self.pktq.is_aborted()
    }

    /// 写入一帧；满时拒绝而不是覆盖
    pub fn push(&self, frame: Frame<T>) -> bool {
        let mut inner = self.inner.lock();
        if inner.size >= self.max_size {
            return false;
        }
        let windex = inner.windex;
        inner.queue[windex] = Some(Arc::new(frame));
        inner.windex = (windex + 1) % self.max_size;
        inner.size += 1;
        self.cond.notify_all();
        true
    }

    /// peek_writable + push
    pub fn put(&self, frame: Frame<T>) -> bool {
        self.peek_writable() && self.push(frame)
    }

    /// 等待出现可读帧；数据包队列中止时返回 None
    pub fn peek_readable(&self) -> Option<Arc<Frame<T>>> {
        let mut inner = self.inner.lock();
        while inner.size <= inner.rindex_shown && !self.pktq.is_aborted() {
            self.cond.wait_for(&mut inner, QUEUE_WAIT_TIMEOUT);
        }
        if self.pktq.is_aborted() {
            return None;
        }
        let index = (inner.rindex + inner.rindex_shown) % self.max_size;
        inner.queue[index].clone()
    }

    /// 下一个待显示帧
    pub fn peek(&self) -> Option<Arc<Frame<T>>> {
        let inner = self.inner.lock();
        if inner.size <= inner.rindex_shown {
            return None;
        }
        inner.queue[(inner.rindex + inner.rindex_shown) % self.max_size].clone()
    }

    /// 待显示帧之后的一帧
    pub fn peek_next(&self) -> Option<Arc<Frame<T>>> {
        let inner = self.inner.lock();
        if inner.size <= inner.rindex_shown + 1 {
            return None;
        }
        inner.queue[(inner.rindex + inner.rindex_shown + 1) % self.max_size].clone()
    }

    /// 最近显示的帧（keep_last 时保留）
    pub fn peek_last(&self) -> Option<Arc<Frame<T>>> {
        let inner = self.inner.lock();
        if inner.size == 0 {
            return None;
        }
        inner.queue[inner.rindex].clone()
    }

    /// 读位置前进一帧
    pub fn next(&self) {
        let mut inner = self.inner.lock();
        if inner.size == 0 {
            return;
        }
        if self.keep_last && inner.rindex_shown == 0 {
            inner.rindex_shown = 1;
            return;
        }
        let rindex = inner.rindex;
        inner.queue[rindex] = None;
        inner.rindex = (rindex + 1) % self.max_size;
        inner.size -= 1;
        self.cond.notify_all();
    }

    /// 尚未显示的帧数
    pub fn nb_remaining(&self) -> usize {
        let inner = self.inner.lock();
        inner.size - inner.rindex_shown
    }

    pub fn rindex_shown(&self) -> bool {
        self.inner.lock().rindex_shown != 0
    }

    pub fn capacity(&self) -> usize {
        self.max_size
    }
}
