//! Routes accepted change events to the per-domain refresh coordinators.
//!
//! The routing rule lives in one named function, `classify_domain`, instead
//! of inline path matching at call sites.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::watch::ChangeEvent;

use super::debounce::Debounce;

/// Which data domain a changed path belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Domain {
    Documents,
    Tasks,
    Other,
}

/// Classify a path by membership in the documents root vs. the tasks root.
pub fn classify_domain(path: &Path, docs_root: &Path, tasks_root: &Path) -> Domain {
    if path.starts_with(docs_root) {
        Domain::Documents
    } else if path.starts_with(tasks_root) {
        Domain::Tasks
    } else {
        Domain::Other
    }
}

/// Debounce intervals per domain, tuned to each refresh's cost.
#[derive(Debug, Clone, Copy)]
pub struct RefreshIntervals {
    pub documents: Duration,
    pub tasks: Duration,
    pub tree: Duration,
}

impl Default for RefreshIntervals {
    fn default() -> Self {
        Self {
            documents: Duration::from_millis(500),
            tasks: Duration::from_millis(500),
            tree: Duration::from_millis(800),
        }
    }
}

/// Fans accepted file events out to the debounced refresh coordinators.
pub struct EventRouter {
    docs_root: PathBuf,
    tasks_root: PathBuf,
    documents: Debounce,
    tasks: Debounce,
    tree: Debounce,
}

impl EventRouter {
    /// Build a router with one coordinator per domain. The callbacks are the
    /// domain "refresh now" entry points.
    pub fn new(
        docs_root: PathBuf,
        tasks_root: PathBuf,
        intervals: RefreshIntervals,
        on_documents: impl Fn() + Send + Sync + 'static,
        on_tasks: impl Fn() + Send + Sync + 'static,
        on_tree: impl Fn() + Send + Sync + 'static,
    ) -> Self {
        Self {
            docs_root,
            tasks_root,
            documents: Debounce::new(intervals.documents, on_documents),
            tasks: Debounce::new(intervals.tasks, on_tasks),
            tree: Debounce::new(intervals.tree, on_tree),
        }
    }

    /// Route one accepted event.
    ///
    /// `file-add` and `file-remove` also wake the directory-tree coordinator
    /// since only those two kinds can change the tree shape; `file-change`
    /// does not. A path under neither root wakes both content domains
    /// (conservative fallback: an extra refresh beats a missed one).
    pub fn route(&self, event: &ChangeEvent) {
        match event {
            ChangeEvent::FileAdd { path, .. } | ChangeEvent::FileRemove { path, .. } => {
                self.notify_content_domains(path);
                self.tree.notify();
            }
            ChangeEvent::FileChange { path, .. } => {
                self.notify_content_domains(path);
            }
            ChangeEvent::Connected { .. } | ChangeEvent::Heartbeat { .. } => {}
        }
    }

    fn notify_content_domains(&self, path: &Path) {
        match classify_domain(path, &self.docs_root, &self.tasks_root) {
            Domain::Documents => self.documents.notify(),
            Domain::Tasks => self.tasks.notify(),
            Domain::Other => {
                self.documents.notify();
                self.tasks.notify();
            }
        }
    }

    /// Cancel every pending refresh timer. Called on subscriber teardown.
    pub fn cancel_all(&self) {
        self.documents.cancel();
        self.tasks.cancel();
        self.tree.cancel();
    }
}
