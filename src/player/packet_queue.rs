use crate::core::SerialCell;
use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::mem;
use std::time::Duration;

/// 队列等待的超时时间，保证退出标志能在一个周期内被观察到
pub const QUEUE_WAIT_TIMEOUT: Duration = Duration::from_millis(10);

/// 压缩数据包（可跨线程传递）
#[derive(Debug, Clone, Default)]
pub struct MediaPacket {
    pub stream_index: usize,
    pub data: Vec<u8>,
    /// 以流 time_base 为单位
    pub pts: Option<i64>,
    pub dts: Option<i64>,
    pub duration: i64,
    /// 容器中的字节位置，未知为 -1
    pub pos: i64,
    pub is_key: bool,
}

/// 队列中的条目：数据包或流结束哨兵
#[derive(Debug, Clone)]
pub enum Packet {
    Data(MediaPacket),
    EndOfStream,
}

impl Packet {
    fn byte_size(&self) -> usize {
        match self {
            Packet::Data(packet) => packet.data.len(),
            Packet::EndOfStream => 0,
        }
    }

    fn duration(&self) -> i64 {
        match self {
            Packet::Data(packet) => packet.duration,
            Packet::EndOfStream => 0,
        }
    }
}

struct QueuedPacket {
    packet: Packet,
    serial: i32,
}

/// get() 的结果
#[derive(Debug)]
pub enum PacketGet {
    /// 数据包及其入队时的序列号
    Packet(Packet, i32),
    /// 非阻塞读取时队列为空
    Empty,
    Aborted,
}

struct PacketQueueInner {
    packets: VecDeque<QueuedPacket>,
    size: usize,
    duration: i64,
    abort_request: bool,
}

/// 单个流的压缩包队列
///
/// 每次 flush 序列号加一，入队的包带上当时的序列号；
/// 消费方据此识别 seek 之前的旧包。
pub struct PacketQueue {
    inner: Mutex<PacketQueueInner>,
    cond: Condvar,
    serial: SerialCell,
}

impl PacketQueue {
    /// 新建的队列处于中止状态，由解码器 start() 时启用
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(PacketQueueInner {
                packets: VecDeque::new(),
                size: 0,
                duration: 0,
                abort_request: true,
            }),
            cond: Condvar::new(),
            serial: SerialCell::new(0),
        }
    }

    pub fn start(&self) {
        let mut inner = self.inner.lock();
        inner.abort_request = false;
        self.serial.bump();
    }

    /// 唤醒所有等待者；此后 put 全部失败，直到再次 start()
    pub fn abort(&self) {
        let mut inner = self.inner.lock();
        inner.abort_request = true;
        self.cond.notify_all();
    }

    pub fn put(&self, packet: Packet) -> bool {
        let mut inner = self.inner.lock();
        if inner.abort_request {
            return false;
        }
        inner.size += packet.byte_size() + mem::size_of::<QueuedPacket>();
        inner.duration += packet.duration();
        let serial = self.serial.get();
        inner.packets.push_back(QueuedPacket { packet, serial });
        self.cond.notify_one();
        true
    }

    pub fn put_end_of_stream(&self) -> bool {
        self.put(Packet::EndOfStream)
    }

    /// 清空队列并开始新的序列号
    pub fn flush(&self) {
        let mut inner = self.inner.lock();
        inner.packets.clear();
        inner.size = 0;
        inner.duration = 0;
        self.serial.bump();
    }

    pub fn get(&self, block: bool) -> PacketGet {
        let mut inner = self.inner.lock();
        loop {
            if inner.abort_request {
                return PacketGet::Aborted;
            }
            if let Some(queued) = inner.packets.pop_front() {
                inner.size -= queued.packet.byte_size() + mem::size_of::<QueuedPacket>();
                inner.duration -= queued.packet.duration();
                return PacketGet::Packet(queued.packet, queued.serial);
            }
            if !block {
                return PacketGet::Empty;
            }
            self.cond.wait_for(&mut inner, QUEUE_WAIT_TIMEOUT);
        }
    }

    pub fn nb_packets(&self) -> usize {
        self.inner.lock().packets.len()
    }

    /// 排队数据的字节数（含每个条目的簿记开销）
    pub fn size(&self) -> usize {
        self.inner.lock().size
    }

    /// 排队数据包的总时长（流 time_base 单位）
    pub fn duration(&self) -> i64 {
        self.inner.lock().duration
    }

    pub fn serial(&self) -> i32 {
        self.serial.get()
    }

    pub fn serial_cell(&self) -> SerialCell {
        self.serial.clone()
    }

    pub fn is_aborted(&self) -> bool {
        self.inner.lock().abort_request
    }
}

impl Default for PacketQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// 唤醒读取线程的信号（解码器发现队列为空、seek 请求等）
#[derive(Clone)]
pub struct ReadWaker {
    tx: Sender<()>,
    rx: Receiver<()>,
}

impl ReadWaker {
    pub fn new() -> Self {
        let (tx, rx) = bounded(1);
        Self { tx, rx }
    }

    /// 已有未消费的信号时直接丢弃
    pub fn signal(&self) {
        let _ = self.tx.try_send(());
    }

    /// 等待信号或超时，返回是否被唤醒
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        self.rx.recv_timeout(timeout).is_ok()
    }
}

impl Default for ReadWaker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Instant;

    fn data_packet(pts: i64, len: usize) -> Packet {
        Packet::Data(MediaPacket {
            stream_index: 0,
            data: vec![0; len],
            pts: Some(pts),
            dts: Some(pts),
            duration: 1,
            pos: -1,
            is_key: true,
        })
    }

    fn pts_of(get: PacketGet) -> Option<(i64, i32)> {
        match get {
            PacketGet::Packet(Packet::Data(packet), serial) => packet.pts.map(|pts| (pts, serial)),
            _ => None,
        }
    }

    #[test]
    fn test_new_queue_rejects_until_started() {
        let queue = PacketQueue::new();
        assert!(!queue.put(data_packet(0, 10)));

        queue.start();
        assert!(queue.put(data_packet(0, 10)));
        assert_eq!(queue.nb_packets(), 1);
        assert_eq!(queue.duration(), 1);
        assert!(queue.size() >= 10);
    }

    #[test]
    fn test_flush_increments_serial_and_drops_stale() {
        let queue = PacketQueue::new();
        queue.start();
        let before = queue.serial();
        queue.put(data_packet(1, 4));
        queue.put(data_packet(2, 4));

        queue.flush();
        assert_eq!(queue.serial(), before + 1);
        assert_eq!(queue.nb_packets(), 0);
        assert_eq!(queue.size(), 0);

        queue.put(data_packet(3, 4));
        assert_eq!(pts_of(queue.get(false)), Some((3, before + 1)));
        assert!(matches!(queue.get(false), PacketGet::Empty));
    }

    #[test]
    fn test_end_of_stream_sentinel_is_queued() {
        let queue = PacketQueue::new();
        queue.start();
        assert!(queue.put_end_of_stream());
        assert!(matches!(queue.get(false), PacketGet::Packet(Packet::EndOfStream, _)));
    }

    #[test]
    fn test_blocking_get_receives_later_put() {
        let queue = Arc::new(PacketQueue::new());
        queue.start();

        let producer = {
            let queue = queue.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(30));
                queue.put(data_packet(42, 1));
            })
        };

        assert_eq!(pts_of(queue.get(true)).map(|(pts, _)| pts), Some(42));
        producer.join().unwrap();
    }

    #[test]
    fn test_abort_wakes_blocked_getter() {
        let queue = Arc::new(PacketQueue::new());
        queue.start();

        let consumer = {
            let queue = queue.clone();
            thread::spawn(move || matches!(queue.get(true), PacketGet::Aborted))
        };

        thread::sleep(Duration::from_millis(20));
        queue.abort();
        assert!(consumer.join().unwrap());
        assert!(!queue.put(data_packet(0, 1)));
    }

    #[test]
    fn test_read_waker_times_out_without_signal() {
        let waker = ReadWaker::new();
        let started = Instant::now();
        assert!(!waker.wait_timeout(Duration::from_millis(10)));
        assert!(started.elapsed() >= Duration::from_millis(9));

        waker.signal();
        waker.signal();
        assert!(waker.wait_timeout(Duration::from_millis(10)));
        assert!(!waker.wait_timeout(Duration::from_millis(1)));
    }
}
