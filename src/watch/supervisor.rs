//! Lifecycle-managed owner of the single OS-level directory watcher.
//!
//! The supervisor holds the only `notify::RecommendedWatcher` in the process.
//! It starts lazily when the hub registers its first subscriber and releases
//! the OS handle as soon as the subscriber set empties, so an idle server
//! holds no inotify/FSEvents resources.

use std::path::{Path, PathBuf};

use notify::{Event, EventKind, RecursiveMode, Watcher};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::Settings;

use super::classifier::{FileOp, classify, is_markdown_path};
use super::error::WatchError;
use super::event::ChangeEvent;

/// Capacity of the raw notification channel between the notify callback
/// thread and the async forwarding task.
const RAW_CHANNEL_CAPACITY: usize = 256;

enum State {
    Uninitialized,
    Running(RunningWatch),
    Stopped,
}

struct RunningWatch {
    /// Kept alive for the duration of the watch; dropping it releases the
    /// OS watch handle.
    _watcher: notify::RecommendedWatcher,
    forward: JoinHandle<()>,
}

/// Owns and lifecycle-manages the recursive directory watch.
///
/// State transitions: `uninitialized -> running` on the first subscriber,
/// `running -> stopped` when the set empties, `stopped -> running` if a new
/// subscriber registers later.
pub struct WatchSupervisor {
    roots: Vec<PathBuf>,
    state: Mutex<State>,
}

impl WatchSupervisor {
    /// Create a supervisor over the given roots.
    ///
    /// Roots that do not exist on disk are excluded here, once, and never
    /// retried.
    pub fn new(candidates: Vec<PathBuf>) -> Self {
        let mut roots = Vec::new();
        for root in candidates {
            if root.is_dir() {
                roots.push(root);
            } else {
                tracing::warn!("[watch] skipping missing root: {}", root.display());
            }
        }
        Self {
            roots,
            state: Mutex::new(State::Uninitialized),
        }
    }

    /// Derive the watch roots from configuration (docs and tasks directories
    /// under the active workspace).
    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(settings.watch_roots())
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    pub fn is_running(&self) -> bool {
        matches!(*self.state.lock(), State::Running(_))
    }

    /// Start the recursive watch if it is not already running.
    ///
    /// Idempotent. Classified events are forwarded into `events`. Per-root
    /// watch failures skip that root; only a total failure is surfaced, and
    /// even that leaves the server in a degraded-but-serving state.
    ///
    /// Must be called from within a tokio runtime.
    pub fn ensure_started(&self, events: mpsc::Sender<ChangeEvent>) -> Result<(), WatchError> {
        let mut state = self.state.lock();
        if matches!(*state, State::Running(_)) {
            return Ok(());
        }
        if self.roots.is_empty() {
            return Err(WatchError::NoWatchableRoots);
        }

        let (raw_tx, mut raw_rx) = mpsc::channel::<notify::Result<Event>>(RAW_CHANNEL_CAPACITY);
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            let _ = raw_tx.blocking_send(res);
        })?;

        let mut watched_roots = Vec::new();
        for root in &self.roots {
            match watcher.watch(root, RecursiveMode::Recursive) {
                Ok(()) => {
                    crate::debug_event!("watch", "watching", "{}", root.display());
                    watched_roots.push(root.clone());
                }
                Err(e) => {
                    tracing::warn!("[watch] failed to watch {}: {e}", root.display());
                }
            }
        }
        if watched_roots.is_empty() {
            return Err(WatchError::NoWatchableRoots);
        }

        let forward = tokio::spawn(async move {
            while let Some(res) = raw_rx.recv().await {
                match res {
                    Ok(event) => {
                        let Some(op) = file_op(&event.kind) else {
                            continue;
                        };
                        for path in event.paths {
                            if let Some(change) = classify(&path, op) {
                                if events.send(change).await.is_err() {
                                    return;
                                }
                            }
                        }
                    }
                    Err(e) => {
                        tracing::error!("[watch] filesystem event error: {e}");
                    }
                }
            }
        });

        *state = State::Running(RunningWatch {
            _watcher: watcher,
            forward,
        });
        crate::log_event!(
            "watch",
            "started",
            "{} of {} roots",
            watched_roots.len(),
            self.roots.len()
        );
        drop(state);

        // The census walks entire trees; keep it off the state lock and off
        // the runtime threads.
        tokio::task::spawn_blocking(move || {
            for root in &watched_roots {
                log_markdown_census(root);
            }
        });
        Ok(())
    }

    /// Tear down the OS watch and release all resources.
    ///
    /// Called when the subscriber set transitions to empty. No-op unless the
    /// watch is currently running.
    pub fn stop_if_idle(&self) {
        let mut state = self.state.lock();
        match std::mem::replace(&mut *state, State::Stopped) {
            State::Running(running) => {
                running.forward.abort();
                crate::log_event!("watch", "stopped", "no subscribers");
            }
            previous => {
                *state = previous;
            }
        }
    }
}

fn file_op(kind: &EventKind) -> Option<FileOp> {
    match kind {
        EventKind::Create(_) => Some(FileOp::Added),
        EventKind::Modify(_) => Some(FileOp::Modified),
        EventKind::Remove(_) => Some(FileOp::Removed),
        _ => None,
    }
}

/// Best-effort count of matching files under a root, purely for diagnostics.
/// Enumeration failures (permissions, races) are logged and never block
/// startup.
fn log_markdown_census(root: &Path) {
    let mut count = 0usize;
    for entry in walkdir::WalkDir::new(root) {
        match entry {
            Ok(entry) => {
                if entry.file_type().is_file() && is_markdown_path(entry.path()) {
                    count += 1;
                }
            }
            Err(e) => {
                tracing::debug!("[watch] census error under {}: {e}", root.display());
            }
        }
    }
    crate::debug_event!("watch", "discovered", "{count} markdown files under {}", root.display());
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    fn workspace() -> (tempfile::TempDir, Vec<PathBuf>) {
        let dir = tempfile::tempdir().unwrap();
        let docs = dir.path().join("docs");
        let tasks = dir.path().join("tasks");
        std::fs::create_dir_all(&docs).unwrap();
        std::fs::create_dir_all(&tasks).unwrap();
        (dir, vec![docs, tasks])
    }

    #[test]
    fn missing_roots_are_excluded_at_construction() {
        let (dir, mut roots) = workspace();
        roots.push(dir.path().join("does-not-exist"));
        let supervisor = WatchSupervisor::new(roots);
        assert_eq!(supervisor.roots().len(), 2);
    }

    #[tokio::test]
    async fn lifecycle_start_stop_restart() {
        let (_dir, roots) = workspace();
        let supervisor = WatchSupervisor::new(roots);
        assert!(!supervisor.is_running());

        let (tx, _rx) = mpsc::channel(8);
        supervisor.ensure_started(tx.clone()).unwrap();
        assert!(supervisor.is_running());

        // Idempotent while running.
        supervisor.ensure_started(tx.clone()).unwrap();
        assert!(supervisor.is_running());

        supervisor.stop_if_idle();
        assert!(!supervisor.is_running());

        // stopped -> running again for a later subscriber
        supervisor.ensure_started(tx).unwrap();
        assert!(supervisor.is_running());
        supervisor.stop_if_idle();
    }

    #[tokio::test]
    async fn all_roots_missing_is_degraded_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let supervisor = WatchSupervisor::new(vec![dir.path().join("nope")]);
        let (tx, _rx) = mpsc::channel(8);
        assert!(matches!(
            supervisor.ensure_started(tx),
            Err(WatchError::NoWatchableRoots)
        ));
        assert!(!supervisor.is_running());
    }

    #[tokio::test]
    async fn forwards_markdown_events_and_filters_the_rest() {
        let (dir, roots) = workspace();
        let supervisor = WatchSupervisor::new(roots);
        let (tx, mut rx) = mpsc::channel(32);
        supervisor.ensure_started(tx).unwrap();

        // The png must never produce an event; the markdown file must.
        std::fs::write(dir.path().join("docs/image.png"), b"png").unwrap();
        std::fs::write(dir.path().join("docs/guide.md"), b"# hi").unwrap();

        let event = timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("no event within timeout")
            .expect("channel closed");
        assert!(event.path().unwrap().ends_with("guide.md"));
        assert!(matches!(
            event,
            ChangeEvent::FileAdd { .. } | ChangeEvent::FileChange { .. }
        ));

        supervisor.stop_if_idle();
    }
}
