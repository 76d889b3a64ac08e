//! Error types for the watch pipeline.

use thiserror::Error;

/// Errors from supervisor operations.
///
/// None of these are fatal to the server: the stream endpoint keeps serving
/// `connected`/`heartbeat` even when the watcher is degraded.
#[derive(Error, Debug)]
pub enum WatchError {
    #[error("failed to initialize watcher: {reason}")]
    InitFailed { reason: String },

    #[error("no watchable roots (all configured directories missing or unwatchable)")]
    NoWatchableRoots,
}

impl From<notify::Error> for WatchError {
    fn from(e: notify::Error) -> Self {
        WatchError::InitFailed {
            reason: e.to_string(),
        }
    }
}
