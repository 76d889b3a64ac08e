//! Classifies raw filesystem notifications into typed change events.
//!
//! This is a hard filter: no event for a non-markdown file ever leaves this
//! module, which is what lets the hub broadcast without re-checking paths.

use std::path::{Path, PathBuf};

use super::event::ChangeEvent;

/// File extensions that count as markdown-family documents.
const MARKDOWN_EXTENSIONS: &[&str] = &["md", "mdx"];

/// Raw operation kinds observed by the watcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileOp {
    Added,
    Modified,
    Removed,
}

/// Check whether a path has a markdown-family extension.
pub fn is_markdown_path(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| {
            MARKDOWN_EXTENSIONS
                .iter()
                .any(|allowed| ext.eq_ignore_ascii_case(allowed))
        })
}

/// Classify a raw filesystem notification.
///
/// Returns `None` for paths outside the markdown-family allow-list. On
/// acceptance the event is stamped with the current wall-clock time. Pure
/// apart from the clock: no side effects, no I/O.
pub fn classify(path: &Path, op: FileOp) -> Option<ChangeEvent> {
    if !is_markdown_path(path) {
        return None;
    }
    let path = PathBuf::from(path);
    Some(match op {
        FileOp::Added => ChangeEvent::file_add(path),
        FileOp::Modified => ChangeEvent::file_change(path),
        FileOp::Removed => ChangeEvent::file_remove(path),
    })
}
