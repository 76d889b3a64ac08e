//! Live file-change notification pipeline for local Markdown workspaces.
//!
//! The server half watches the workspace's documentation and task
//! directories and fans classified change events out to any number of
//! browser sessions over server-sent events. The client half keeps a
//! long-lived subscription alive across disconnects and collapses event
//! bursts into per-domain refreshes.
//!
//! ```text
//! filesystem -> WatchSupervisor -> classify -> BroadcastHub -> SSE
//!     -> LiveUpdateClient -> EventRouter -> Debounce -> domain refresh
//! ```

pub mod client;
pub mod config;
pub mod hub;
pub mod logging;
pub mod server;
pub mod watch;

pub use client::{ConnectionState, EventRouter, HttpTransport, LiveUpdateClient};
pub use config::Settings;
pub use hub::{BroadcastHub, Subscription};
pub use watch::{ChangeEvent, WatchSupervisor, classify};
