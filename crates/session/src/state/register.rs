//! Last-writer-wins register

/// Timestamp every register starts with; any real write supersedes it
pub const SENTINEL_TIMESTAMP: u64 = 1;

/// A value paired with the wall-clock millisecond of its last write
///
/// Remote writes only land when strictly newer; on a tie the stored value
/// stays, so all peers converge on the maximum timestamp regardless of the
/// order updates arrive in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LwwRegister<T> {
    value: T,
    timestamp: u64,
}

impl<T: Clone> LwwRegister<T> {
    /// Register holding `default` at the sentinel timestamp
    pub fn new(default: T) -> Self {
        Self {
            value: default,
            timestamp: SENTINEL_TIMESTAMP,
        }
    }

    pub fn value(&self) -> &T {
        &self.value
    }

    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    /// Timestamp for a local write at `now_ms`
    ///
    /// Never at or below the stored timestamp, otherwise a peer whose clock
    /// runs ahead would make our own writes lose everywhere but here.
    pub fn next_timestamp(&self, now_ms: u64) -> u64 {
        now_ms.max(self.timestamp + 1)
    }

    /// Local write; returns the timestamp to broadcast
    pub fn set(&mut self, value: T, now_ms: u64) -> u64 {
        let timestamp = self.next_timestamp(now_ms);
        self.value = value;
        self.timestamp = timestamp;
        timestamp
    }

    /// Remote write; applied only if strictly newer
    pub fn apply(&mut self, value: T, timestamp: u64) -> bool {
        if timestamp > self.timestamp {
            self.value = value;
            self.timestamp = timestamp;
            true
        } else {
            false
        }
    }

    /// Structural change that is not a user write; timestamp untouched
    pub fn adjust(&mut self, f: impl FnOnce(&mut T)) {
        f(&mut self.value);
    }

    /// Re-stamp the current value for a bootstrap push; returns the new stamp
    pub fn restamp(&mut self, now_ms: u64) -> u64 {
        self.timestamp = self.next_timestamp(now_ms);
        self.timestamp
    }

    pub fn reset(&mut self, default: T) {
        self.value = default;
        self.timestamp = SENTINEL_TIMESTAMP;
    }
}
