//! Wall clocks
//!
//! Everything time-stamped in a session (LWW writes, clock-sync samples, clip
//! boundaries) reads milliseconds through [`Clock`], so tests and the demo can
//! run peers whose clocks disagree.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Source of wall-clock milliseconds
pub trait Clock: Send + Sync {
    /// Milliseconds since the Unix epoch, as this machine believes
    fn now_ms(&self) -> u64;
}

/// The machine's real clock
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

/// Real clock shifted by a fixed amount, simulating an unsynchronized machine
#[derive(Debug, Clone, Copy)]
pub struct SkewedClock {
    skew_ms: i64,
}

impl SkewedClock {
    pub fn new(skew_ms: i64) -> Self {
        Self { skew_ms }
    }

    pub fn skew_ms(&self) -> i64 {
        self.skew_ms
    }
}

impl Clock for SkewedClock {
    fn now_ms(&self) -> u64 {
        SystemClock.now_ms().saturating_add_signed(self.skew_ms)
    }
}

/// Hand-driven clock for deterministic tests
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    pub fn new(start_ms: u64) -> Self {
        Self {
            now: AtomicU64::new(start_ms),
        }
    }

    pub fn set(&self, ms: u64) {
        self.now.store(ms, Ordering::SeqCst);
    }

    pub fn advance(&self, ms: u64) {
        self.now.fetch_add(ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_skewed_clock_offsets_system_time() {
        let ahead = SkewedClock::new(5_000);
        let real = SystemClock.now_ms();
        let skewed = ahead.now_ms();
        assert!(skewed >= real + 5_000);
        assert!(skewed < real + 5_000 + 1_000);
    }

    #[test]
    fn test_manual_clock() {
        let clock = ManualClock::new(100);
        clock.advance(50);
        assert_eq!(clock.now_ms(), 150);
        clock.set(10);
        assert_eq!(clock.now_ms(), 10);
    }
}
