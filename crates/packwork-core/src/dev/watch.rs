//! File watcher feeding the dev rebuild loop.
//!
//! Raw `notify` events are filtered and forwarded over a tokio channel;
//! [`DevWatcher::next_batch`] coalesces everything that arrives within the
//! window into one sorted batch.

use notify::{
    event::{CreateKind, ModifyKind, RemoveKind, RenameMode},
    Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher as _,
};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Event coalescing window.
pub const COALESCE_WINDOW: Duration = Duration::from_millis(50);

/// Directory names whose contents never trigger a rebuild.
const IGNORED_DIRS: &[&str] = &[".git"];

#[derive(Error, Debug)]
pub enum WatchError {
    #[error("Invalid watch root: {}", .path.display())]
    InvalidRoot { path: PathBuf },

    #[error("Watcher failed: {0}")]
    Notify(#[from] notify::Error),
}

impl WatchError {
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidRoot { .. } => "WATCH_INVALID_ROOT",
            Self::Notify(_) => "WATCH_FAILED",
        }
    }
}

/// Recursive watcher over a project root.
pub struct DevWatcher {
    // Dropping the notify handle stops event delivery.
    _watcher: RecommendedWatcher,
    rx: mpsc::UnboundedReceiver<PathBuf>,
    window: Duration,
}

impl std::fmt::Debug for DevWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DevWatcher")
            .field("window", &self.window)
            .finish_non_exhaustive()
    }
}

impl DevWatcher {
    /// Watch `root` recursively. Paths under any of `ignore` (typically the
    /// output directory) are dropped.
    pub fn start(root: &Path, ignore: Vec<PathBuf>) -> Result<Self, WatchError> {
        if !root.is_dir() {
            return Err(WatchError::InvalidRoot {
                path: root.to_path_buf(),
            });
        }
        let (tx, rx) = mpsc::unbounded_channel::<PathBuf>();

        let mut watcher = RecommendedWatcher::new(
            move |res: Result<Event, notify::Error>| match res {
                Ok(event) => {
                    if !should_process_event(&event) {
                        return;
                    }
                    for path in event.paths {
                        if is_ignored(&path, &ignore) {
                            continue;
                        }
                        if let Err(e) = tx.send(path) {
                            warn!(error = %e, "watch channel closed");
                        }
                    }
                }
                Err(e) => error!(error = %e, "watch error"),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;
        watcher.watch(root, RecursiveMode::Recursive)?;
        info!(root = %root.display(), "watching");

        Ok(Self {
            _watcher: watcher,
            rx,
            window: COALESCE_WINDOW,
        })
    }

    /// Override the coalescing window.
    #[must_use]
    pub fn with_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    /// Wait for the next change, then keep collecting until the window
    /// passes with no further events. Returns `None` once the watcher is
    /// gone.
    ///
    /// Events arriving while the caller is rebuilding stay in the channel
    /// and make up the next batch.
    pub async fn next_batch(&mut self) -> Option<Vec<PathBuf>> {
        let first = self.rx.recv().await?;
        let mut batch = BTreeSet::from([first]);
        loop {
            match tokio::time::timeout(self.window, self.rx.recv()).await {
                Ok(Some(path)) => {
                    batch.insert(path);
                }
                Ok(None) | Err(_) => break,
            }
        }
        debug!(count = batch.len(), "coalesced file events");
        Some(batch.into_iter().collect())
    }
}

/// File content changes, creations, removals and renames. Directory and
/// metadata events are ignored.
fn should_process_event(event: &Event) -> bool {
    matches!(
        event.kind,
        EventKind::Create(CreateKind::File | CreateKind::Any)
            | EventKind::Modify(
                ModifyKind::Data(_)
                    | ModifyKind::Any
                    | ModifyKind::Name(RenameMode::To | RenameMode::From | RenameMode::Both)
            )
            | EventKind::Remove(RemoveKind::File | RemoveKind::Any)
    )
}

fn is_ignored(path: &Path, ignore: &[PathBuf]) -> bool {
    ignore.iter().any(|dir| path.starts_with(dir))
        || path.components().any(|c| {
            IGNORED_DIRS
                .iter()
                .any(|name| c.as_os_str() == std::ffi::OsStr::new(name))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{AccessKind, DataChange, MetadataKind};
    use serial_test::serial;
    use tempfile::TempDir;

    fn event(kind: EventKind) -> Event {
        Event::new(kind).add_path(PathBuf::from("/p/src/a.js"))
    }

    #[test]
    fn test_event_filter() {
        assert!(should_process_event(&event(EventKind::Create(CreateKind::File))));
        assert!(should_process_event(&event(EventKind::Modify(ModifyKind::Data(
            DataChange::Content
        )))));
        assert!(should_process_event(&event(EventKind::Remove(RemoveKind::File))));
        assert!(!should_process_event(&event(EventKind::Create(CreateKind::Folder))));
        assert!(!should_process_event(&event(EventKind::Modify(ModifyKind::Metadata(
            MetadataKind::Any
        )))));
        assert!(!should_process_event(&event(EventKind::Access(AccessKind::Any))));
    }

    #[test]
    fn test_ignored_paths() {
        let out = vec![PathBuf::from("/p/build")];
        assert!(is_ignored(Path::new("/p/build/static/js/main.js"), &out));
        assert!(is_ignored(Path::new("/p/.git/index"), &out));
        assert!(!is_ignored(Path::new("/p/src/build.js"), &out));
    }

    #[test]
    fn test_invalid_root() {
        let err = DevWatcher::start(Path::new("/definitely/not/here"), Vec::new()).unwrap_err();
        assert_eq!(err.code(), "WATCH_INVALID_ROOT");
    }

    #[tokio::test]
    #[serial(watcher)]
    async fn test_batches_changes() {
        let dir = TempDir::new().unwrap();
        let root = dunce::canonicalize(dir.path()).unwrap();
        let out_dir = root.join("build");
        std::fs::create_dir_all(&out_dir).unwrap();

        let mut watcher = DevWatcher::start(&root, vec![out_dir.clone()]).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        std::fs::write(out_dir.join("ignored.js"), "x").unwrap();
        std::fs::write(root.join("a.js"), "a").unwrap();
        std::fs::write(root.join("b.js"), "b").unwrap();

        let batch = tokio::time::timeout(Duration::from_secs(10), watcher.next_batch())
            .await
            .unwrap()
            .unwrap();
        let names: BTreeSet<_> = batch
            .iter()
            .filter_map(|p| p.file_name())
            .map(|n| n.to_string_lossy().into_owned())
            .collect();
        assert!(names.contains("a.js"));
        assert!(!names.contains("ignored.js"));
    }
}
