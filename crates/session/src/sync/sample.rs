//! Two-way clock exchange math

/// One request/response exchange with the reference peer
///
/// `t1`/`t4` are read on the local clock, `t2`/`t3` on the remote clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockSample {
    /// Local send time
    pub t1: u64,
    /// Remote receive time
    pub t2: u64,
    /// Remote reply time
    pub t3: u64,
    /// Local receive time
    pub t4: u64,
}

impl ClockSample {
    /// Estimated `remote - local` in milliseconds: `((t2 - t1) + (t3 - t4)) / 2`
    pub fn offset_ms(&self) -> i64 {
        let outbound = self.t2 as i64 - self.t1 as i64;
        let inbound = self.t3 as i64 - self.t4 as i64;
        (outbound + inbound) / 2
    }

    /// Network time spent on the wire, excluding the remote's processing
    pub fn round_trip_ms(&self) -> i64 {
        (self.t4 as i64 - self.t1 as i64) - (self.t3 as i64 - self.t2 as i64)
    }
}

/// Median of the per-sample offsets; 0 for an empty batch
///
/// An even count averages the two middle values.
pub fn median_offset(offsets: &[i64]) -> i64 {
    if offsets.is_empty() {
        return 0;
    }

    let mut sorted = offsets.to_vec();
    sorted.sort_unstable();

    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 1 {
        sorted[mid]
    } else {
        (sorted[mid - 1] + sorted[mid]) / 2
    }
}
