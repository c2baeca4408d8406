//! Shared session state
//!
//! Focused participant, active screen-share presenter and tile order. Each is
//! a last-writer-wins register keyed by wall-clock milliseconds; there is no
//! coordinator. The host pushes its values to late joiners.

mod reconciler;
mod register;

pub use reconciler::{FocusRecord, SharedStateSnapshot, StateReconciler};
pub use register::{LwwRegister, SENTINEL_TIMESTAMP};
