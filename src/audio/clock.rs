// src/audio/clock.rs
// The two time sources of the engine: a sample-accurate audio clock and a
// coarse wall-clock timer queue.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Monotonic frame counter advanced only by the output render callback.
///
/// Every playback start time is expressed in frames of this clock.
#[derive(Debug, Clone)]
pub struct SampleClock {
    frames: Arc<AtomicU64>,
    sample_rate: u32,
}

impl SampleClock {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            frames: Arc::new(AtomicU64::new(0)),
            sample_rate,
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn now(&self) -> u64 {
        self.frames.load(Ordering::Acquire)
    }

    pub fn now_seconds(&self) -> f64 {
        self.seconds(self.now())
    }

    /// Called from the audio thread after each rendered block.
    pub fn advance(&self, frames: u64) {
        self.frames.fetch_add(frames, Ordering::AcqRel);
    }

    pub fn frames_for(&self, seconds: f64) -> u64 {
        (seconds.max(0.0) * self.sample_rate as f64).round() as u64
    }

    pub fn seconds(&self, frames: u64) -> f64 {
        frames as f64 / self.sample_rate as f64
    }

    /// Wall-clock time until `frame` is reached, zero if already past.
    pub fn until(&self, frame: u64) -> Duration {
        let frames = frame.saturating_sub(self.now()) as u128;
        let nanos = frames * 1_000_000_000 / self.sample_rate.max(1) as u128;
        Duration::from_nanos(nanos as u64)
    }
}

pub type TimerId = u64;

/// Wall-clock timers, fired by polling with the current `Instant`.
///
/// Cancelled timers are forgotten immediately; a popped timer is always live.
#[derive(Debug)]
pub struct TimerQueue<E> {
    deadlines: BinaryHeap<Reverse<(Instant, TimerId)>>,
    pending: HashMap<TimerId, E>,
    next_id: TimerId,
}

impl<E> TimerQueue<E> {
    pub fn new() -> Self {
        Self {
            deadlines: BinaryHeap::new(),
            pending: HashMap::new(),
            next_id: 1,
        }
    }

    pub fn arm(&mut self, at: Instant, event: E) -> TimerId {
        let id = self.next_id;
        self.next_id += 1;
        self.deadlines.push(Reverse((at, id)));
        self.pending.insert(id, event);
        id
    }

    pub fn arm_after(&mut self, now: Instant, delay: Duration, event: E) -> TimerId {
        self.arm(now + delay, event)
    }

    pub fn cancel(&mut self, id: TimerId) -> bool {
        self.pending.remove(&id).is_some()
    }

    /// Pop the earliest timer due at or before `now`.
    pub fn pop_due(&mut self, now: Instant) -> Option<(TimerId, E)> {
        while let Some(Reverse((at, id))) = self.deadlines.peek().copied() {
            if !self.pending.contains_key(&id) {
                self.deadlines.pop();
                continue;
            }
            if at > now {
                return None;
            }
            self.deadlines.pop();
            return self.pending.remove(&id).map(|event| (id, event));
        }
        None
    }

    pub fn next_deadline(&mut self) -> Option<Instant> {
        while let Some(Reverse((at, id))) = self.deadlines.peek().copied() {
            if self.pending.contains_key(&id) {
                return Some(at);
            }
            self.deadlines.pop();
        }
        None
    }

    pub fn clear(&mut self) {
        self.deadlines.clear();
        self.pending.clear();
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

impl<E> Default for TimerQueue<E> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clock_conversions() {
        let clock = SampleClock::new(8000);
        assert_eq!(clock.frames_for(0.5), 4000);
        clock.advance(2000);
        assert_eq!(clock.now(), 2000);
        assert_eq!(clock.now_seconds(), 0.25);
        assert_eq!(clock.until(4000), Duration::from_millis(250));
        assert_eq!(clock.until(1000), Duration::ZERO);
    }

    #[test]
    fn test_timers_fire_in_order() {
        let start = Instant::now();
        let mut timers = TimerQueue::new();
        timers.arm(start + Duration::from_millis(20), "second");
        timers.arm(start + Duration::from_millis(10), "first");

        assert!(timers.pop_due(start).is_none());
        let due = start + Duration::from_millis(30);
        assert_eq!(timers.pop_due(due).map(|(_, e)| e), Some("first"));
        assert_eq!(timers.pop_due(due).map(|(_, e)| e), Some("second"));
        assert!(timers.is_empty());
    }

    #[test]
    fn test_cancelled_timer_never_fires() {
        let start = Instant::now();
        let mut timers = TimerQueue::new();
        let id = timers.arm_after(start, Duration::from_millis(5), 1);
        timers.arm_after(start, Duration::from_millis(50), 2);

        assert!(timers.cancel(id));
        assert!(!timers.cancel(id));
        assert_eq!(
            timers.next_deadline(),
            Some(start + Duration::from_millis(50))
        );
        assert!(timers.pop_due(start + Duration::from_millis(10)).is_none());
    }
}
