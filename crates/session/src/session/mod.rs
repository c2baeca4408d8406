//! Session node and compositor hand-off

mod events;
mod manifest;
mod node;

pub use events::SessionEvent;
pub use manifest::{CompositionClip, CompositorManifest};
pub use node::SessionNode;
