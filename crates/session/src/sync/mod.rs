//! Clock synchronization against the session host
//!
//! There is no server clock in a mesh. The host's wall clock is the global
//! time axis and every guest estimates its offset to it.
//!
//! # Overview
//!
//! - **Clock**: wall-clock source, swappable for skewed or manual clocks
//! - **ClockSample**: one two-way exchange (t1..t4) and its NTP-style offset
//! - **ClockSyncService**: runs sample batches, keeps the median per peer
//!
//! # Exchange
//!
//! ```text
//!   guest                         host
//!     │ t1 ── clock-sync-request ──▶ │ t2
//!     │                              │
//!     │ t4 ◀─ clock-sync-response ── │ t3
//!
//!   offset = ((t2 - t1) + (t3 - t4)) / 2      (host - guest)
//! ```
//!
//! A batch runs once when a guest sees the host join and again on the
//! host's `pre-sync` during the recording countdown.

mod clock;
mod sample;
mod service;

pub use clock::{Clock, ManualClock, SkewedClock, SystemClock};
pub use sample::{median_offset, ClockSample};
pub use service::ClockSyncService;
