use crate::core::{FetchResult, TimeRange, TimedSample};
use parking_lot::Mutex;
use std::collections::VecDeque;

/// 等待宿主取走的输出样本队列
pub struct SampleQueue<T> {
    samples: Mutex<VecDeque<T>>,
}

impl<T> SampleQueue<T> {
    pub fn new() -> Self {
        Self {
            samples: Mutex::new(VecDeque::new()),
        }
    }

    pub fn push(&self, sample: T) {
        self.samples.lock().push_back(sample);
    }

    pub fn pop(&self) -> Option<T> {
        self.samples.lock().pop_front()
    }

    pub fn len(&self) -> usize {
        self.samples.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.lock().is_empty()
    }

    pub fn flush(&self) {
        self.samples.lock().clear();
    }

    /// 在持有锁的情况下操作队列
    pub fn with<R>(&self, f: impl FnOnce(&mut VecDeque<T>) -> R) -> R {
        f(&mut self.samples.lock())
    }
}

impl<T: TimedSample> SampleQueue<T> {
    pub fn peek_time(&self) -> Option<f64> {
        self.samples.lock().front().map(|sample| sample.time())
    }
}

impl<T> Default for SampleQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// 取出与区间重叠的第一个样本，先丢弃已经整段落在区间之前的样本
pub fn fetch_overlapping<T: TimedSample>(queue: &mut VecDeque<T>, range: TimeRange) -> FetchResult<T> {
    while queue.front().is_some_and(|front| front.end_time() <= range.start) {
        queue.pop_front();
    }
    let Some(front) = queue.front() else {
        return FetchResult::NoSample;
    };
    if front.time() < range.end {
        match queue.pop_front() {
            Some(sample) => FetchResult::Ok(sample),
            None => FetchResult::NoSample,
        }
    } else {
        FetchResult::NotYetAvailable
    }
}

/// 取与区间重叠最多的视频样本
///
/// - 区间上界小于下界表示跨越了循环点，上界加一个时长
/// - 有未完成的 seek 目标时，丢弃目标之前的旧样本
/// - 与区间相距超过半个时长的样本视为另一轮循环
pub fn fetch_best_video<T: TimedSample>(
    queue: &mut VecDeque<T>,
    range: TimeRange,
    duration: f64,
    seek_time: &mut Option<f64>,
) -> FetchResult<T> {
    let low = range.start;
    let mut high = range.end;
    if high < low && duration > 0.0 {
        high += duration;
    }
    let window = TimeRange::new(low, high);
    let loop_diff = if duration > 0.0 { duration * 0.5 } else { f64::INFINITY };
    let mut current_overlap = 0.0;
    let mut best = None;

    while let Some(front) = queue.front() {
        let mut start = front.time();
        let mut end = front.end_time();

        if let Some(seek) = *seek_time {
            if !(seek >= window.start && seek < window.end) {
                *seek_time = None;
            } else if (seek - start).abs() <= 0.001 || (seek >= start && seek < end) {
                *seek_time = None;
            } else {
                queue.pop_front();
                continue;
            }
        }

        if end < low {
            if low - end > loop_diff {
                start += duration;
                end += duration;
            } else {
                queue.pop_front();
                continue;
            }
        }

        if end - low > loop_diff {
            queue.pop_front();
            continue;
        }

        if start >= high {
            break;
        }

        let overlap = window.overlap(start, end);
        if current_overlap <= overlap {
            current_overlap = overlap;
            best = queue.pop_front();
        } else {
            break;
        }
    }

    match best {
        Some(sample) => FetchResult::Ok(sample),
        None if queue.is_empty() => FetchResult::NoSample,
        None => FetchResult::NotYetAvailable,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Timed(f64, f64);

    impl TimedSample for Timed {
        fn time(&self) -> f64 {
            self.0
        }
        fn duration(&self) -> f64 {
            self.1
        }
    }

    fn frames(times: &[f64], duration: f64) -> VecDeque<Timed> {
        times.iter().map(|&t| Timed(t, duration)).collect()
    }

    #[test]
    fn test_best_video_picks_first_frame_at_30fps() {
        let mut queue: VecDeque<Timed> =
            (0..10).map(|i| Timed(i as f64 / 30.0, 1.0 / 30.0)).collect();
        let mut seek = None;
        let result = fetch_best_video(&mut queue, TimeRange::new(0.0, 0.033), 10.0, &mut seek);
        assert_eq!(result.into_sample(), Some(Timed(0.0, 1.0 / 30.0)));
        assert_eq!(queue.len(), 9);
    }

    #[test]
    fn test_best_video_consumes_while_overlap_grows() {
        let mut queue = frames(&[0.0, 0.25, 0.5], 0.25);
        let mut seek = None;
        let result = fetch_best_video(&mut queue, TimeRange::new(0.0, 0.6), 10.0, &mut seek);
        assert_eq!(result.into_sample(), Some(Timed(0.25, 0.25)));
        assert_eq!(queue.front(), Some(&Timed(0.5, 0.25)));
    }

    #[test]
    fn test_best_video_skips_frames_before_seek_target() {
        let mut queue = frames(&[0.0, 0.25, 0.5, 0.75], 0.25);
        let mut seek = Some(0.5);
        let result = fetch_best_video(&mut queue, TimeRange::new(0.4, 0.8), 10.0, &mut seek);
        assert_eq!(result.into_sample(), Some(Timed(0.5, 0.25)));
        assert!(seek.is_none());
    }

    #[test]
    fn test_best_video_forgets_seek_outside_range() {
        let mut queue = frames(&[3.0], 0.25);
        let mut seek = Some(1.0);
        let result = fetch_best_video(&mut queue, TimeRange::new(3.0, 3.1), 10.0, &mut seek);
        assert!(result.is_ok());
        assert!(seek.is_none());
    }

    #[test]
    fn test_best_video_wraps_around_loop_point() {
        let mut queue = frames(&[0.0], 0.1);
        let mut seek = None;
        let result = fetch_best_video(&mut queue, TimeRange::new(9.95, 0.05), 10.0, &mut seek);
        assert_eq!(result.into_sample(), Some(Timed(0.0, 0.1)));
    }

    #[test]
    fn test_best_video_drops_stale_and_previous_loop_frames() {
        let mut queue = frames(&[1.0], 0.1);
        let mut seek = None;
        let result = fetch_best_video(&mut queue, TimeRange::new(5.0, 5.1), 10.0, &mut seek);
        assert!(matches!(result, FetchResult::NoSample));
        assert!(queue.is_empty());

        let mut queue = frames(&[9.9], 0.1);
        let result = fetch_best_video(&mut queue, TimeRange::new(0.0, 0.1), 10.0, &mut seek);
        assert!(matches!(result, FetchResult::NoSample));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_best_video_future_frame_not_yet_available() {
        let mut queue = frames(&[1.0], 0.1);
        let mut seek = None;
        let result = fetch_best_video(&mut queue, TimeRange::new(0.0, 0.1), 10.0, &mut seek);
        assert!(matches!(result, FetchResult::NotYetAvailable));
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_overlapping_drops_stale_audio() {
        let mut queue = frames(&[0.0, 0.1, 0.2, 0.3], 0.1);
        let result = fetch_overlapping(&mut queue, TimeRange::new(0.2, 0.3));
        assert_eq!(result.into_sample(), Some(Timed(0.2, 0.1)));
        assert_eq!(queue.front(), Some(&Timed(0.3, 0.1)));

        let result = fetch_overlapping(&mut queue, TimeRange::new(0.0, 0.1));
        assert!(matches!(result, FetchResult::NotYetAvailable));

        queue.clear();
        let result = fetch_overlapping(&mut queue, TimeRange::new(0.0, 0.1));
        assert!(matches!(result, FetchResult::NoSample));
    }

    #[test]
    fn test_sample_queue_basics() {
        let queue = SampleQueue::new();
        assert!(queue.is_empty());
        queue.push(Timed(1.0, 0.5));
        queue.push(Timed(1.5, 0.5));
        assert_eq!(queue.peek_time(), Some(1.0));
        assert_eq!(queue.with(|q| q.len()), 2);
        assert_eq!(queue.pop(), Some(Timed(1.0, 0.5)));
        queue.flush();
        assert_eq!(queue.len(), 0);
    }
}
