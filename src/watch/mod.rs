//! Server-side watch pipeline: filesystem events in, classified change events out.
//!
//! # Architecture
//!
//! ```text
//! WatchSupervisor
//!   - Single notify::RecommendedWatcher (lazy, lifecycle-managed)
//!   - Raw events flow through an internal channel
//!   - Classifier filters to markdown-family files
//!         |
//!         v
//!   BroadcastHub (fan-out to connected subscribers)
//! ```
//!
//! The supervisor is started by the hub when the first subscriber registers
//! and stopped when the last one disconnects. A leaked watch handle is a
//! defect: `stop_if_idle` must release the OS watcher.

mod classifier;
mod error;
mod event;
mod supervisor;

pub use classifier::{FileOp, classify, is_markdown_path};
pub use error::WatchError;
pub use event::{ChangeEvent, now_millis};
pub use supervisor::WatchSupervisor;
