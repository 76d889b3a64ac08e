//! Change event type shared by the server pipeline and the client.
//!
//! Events cross the wire as one JSON object per message, tagged by `type`:
//! `connected`, `heartbeat`, `file-add`, `file-change`, `file-remove`.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Milliseconds since the Unix epoch, stamped at emission time.
pub fn now_millis() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}

/// A single event on the live-update stream.
///
/// `path` is only present for the three file kinds and is guaranteed by the
/// classifier to carry a markdown-family extension.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ChangeEvent {
    /// Sent once to each subscriber right after registration, before any
    /// filesystem event can arrive.
    Connected { timestamp: u64 },
    /// Periodic keep-alive, independent of filesystem activity.
    Heartbeat { timestamp: u64 },
    /// A matching file appeared.
    FileAdd { path: PathBuf, timestamp: u64 },
    /// A matching file's contents changed.
    FileChange { path: PathBuf, timestamp: u64 },
    /// A matching file was deleted.
    FileRemove { path: PathBuf, timestamp: u64 },
}

impl ChangeEvent {
    pub fn connected() -> Self {
        Self::Connected {
            timestamp: now_millis(),
        }
    }

    pub fn heartbeat() -> Self {
        Self::Heartbeat {
            timestamp: now_millis(),
        }
    }

    pub fn file_add(path: PathBuf) -> Self {
        Self::FileAdd {
            path,
            timestamp: now_millis(),
        }
    }

    pub fn file_change(path: PathBuf) -> Self {
        Self::FileChange {
            path,
            timestamp: now_millis(),
        }
    }

    pub fn file_remove(path: PathBuf) -> Self {
        Self::FileRemove {
            path,
            timestamp: now_millis(),
        }
    }

    /// The affected file, if this is a file event.
    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::FileAdd { path, .. }
            | Self::FileChange { path, .. }
            | Self::FileRemove { path, .. } => Some(path),
            Self::Connected { .. } | Self::Heartbeat { .. } => None,
        }
    }

    pub fn timestamp(&self) -> u64 {
        match self {
            Self::Connected { timestamp }
            | Self::Heartbeat { timestamp }
            | Self::FileAdd { timestamp, .. }
            | Self::FileChange { timestamp, .. }
            | Self::FileRemove { timestamp, .. } => *timestamp,
        }
    }
}
