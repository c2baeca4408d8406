//! Reliable chunked payload transfer
//!
//! ```text
//!   sender                                   receiver
//!     │ ── transfer-metadata {hash, chunks} ──▶ │ pre-size buffer
//!     │ ── transfer-chunk 0..n (paced) ───────▶ │ slot by index
//!     │                                         │ concat + SHA-256
//!     │ ◀── transfer-ack {complete, hash} ───── │ match
//!     │ ◀── transfer-error ──────────────────── │ mismatch
//! ```
//!
//! Integrity is checked end to end over the whole payload, not per chunk.

mod chunk;
mod queue;
mod receiver;
mod sender;

pub use chunk::{chunk_count, content_hash, split_chunks, ReassemblyBuffer};
pub use queue::{FailureKind, JobTable, TransferEvent, TransferJob, TransferQueue, TransferStatus};
pub use receiver::{ReceivedPayload, TransferReceiver};
pub use sender::TransferSender;
