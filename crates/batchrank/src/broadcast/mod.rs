//! Broadcasting of engine events for real-time streaming.
//!
//! Subscribers (a UI bridge, a CLI tail) receive every event published after
//! they subscribe; nothing is replayed.

pub mod batch_progress;

pub use batch_progress::{BatchEvent, BatchEventBroadcaster, BatchEventKind};
