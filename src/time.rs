//! Clocks and the shared debounce deadline.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Source of "now" in milliseconds.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> u64;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }
}

/// Virtual clock advanced by hand. Clones share the same time.
#[derive(Debug, Clone, Default)]
pub struct ManualClock(Arc<AtomicU64>);

impl ManualClock {
    pub fn new(start_ms: u64) -> Self {
        Self(Arc::new(AtomicU64::new(start_ms)))
    }

    pub fn advance(&self, by: Duration) {
        self.0.fetch_add(by.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn set(&self, ms: u64) {
        self.0.store(ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }
}

/// Single cancellable deadline, armed by the first update after a flush.
#[derive(Debug, Clone)]
pub struct Debounce {
    window: Duration,
    deadline: Option<u64>,
}

impl Debounce {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            deadline: None,
        }
    }

    /// Start the window unless one is already running.
    pub fn arm(&mut self, now_ms: u64) {
        if self.deadline.is_none() {
            self.deadline = Some(now_ms + self.window.as_millis() as u64);
        }
    }

    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn is_due(&self, now_ms: u64) -> bool {
        self.deadline.is_some_and(|d| now_ms >= d)
    }

    /// Time left until the deadline; `None` when not armed.
    pub fn remaining(&self, now_ms: u64) -> Option<Duration> {
        self.deadline
            .map(|d| Duration::from_millis(d.saturating_sub(now_ms)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debounce_arms_once() {
        let mut d = Debounce::new(Duration::from_millis(100));
        assert!(!d.is_due(0));
        d.arm(10);
        d.arm(50);
        assert_eq!(d.remaining(60), Some(Duration::from_millis(50)));
        assert!(!d.is_due(109));
        assert!(d.is_due(110));
        d.cancel();
        assert!(!d.is_armed());
        assert_eq!(d.remaining(200), None);
    }

    #[test]
    fn manual_clock_is_shared() {
        let clock = ManualClock::new(5);
        let other = clock.clone();
        clock.advance(Duration::from_secs(1));
        assert_eq!(other.now_ms(), 1005);
        other.set(1);
        assert_eq!(clock.now_ms(), 1);
    }
}
