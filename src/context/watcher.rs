//! Code reload watcher.
//!
//! A [`ReloadWatcher`] polls one assembly directory of a directory mod and forwards every
//! added or modified `.dll` to [`ContextRegistry::notify_assembly_changed`]. Watchers are
//! owned by the context that loaded from the directory and stop when it is disposed.

use std::{
    collections::HashMap,
    fmt, fs,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Weak,
    },
    thread::{self, JoinHandle, ThreadId},
    time::{Duration, SystemTime},
};

use crate::{context::registry::ContextRegistry, Result};

type Snapshot = HashMap<PathBuf, (Option<SystemTime>, u64)>;

/// Polls a directory for assembly changes on a background thread.
pub struct ReloadWatcher {
    dir: PathBuf,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl fmt::Debug for ReloadWatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReloadWatcher")
            .field("dir", &self.dir)
            .field("running", &!self.stop.load(Ordering::Acquire))
            .finish()
    }
}

impl ReloadWatcher {
    /// Start watching `dir`.
    ///
    /// The registry is held weakly; the watcher exits once it is gone.
    ///
    /// # Errors
    /// Returns [`crate::Error::FileError`] if the thread cannot be spawned.
    pub fn spawn(
        dir: PathBuf,
        interval: Duration,
        registry: Weak<ContextRegistry>,
    ) -> Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let mut known = snapshot(&dir);

        let thread_stop = stop.clone();
        let thread_dir = dir.clone();
        let handle = thread::Builder::new()
            .name("modscope-reload".to_string())
            .spawn(move || loop {
                thread::park_timeout(interval);
                if thread_stop.load(Ordering::Acquire) {
                    return;
                }
                let Some(registry) = registry.upgrade() else {
                    return;
                };

                let current = snapshot(&thread_dir);
                for (path, stamp) in &current {
                    if known.get(path) != Some(stamp) {
                        tracing::debug!(target: "modasmctx", "{} changed", path.display());
                        registry.notify_assembly_changed(path);
                    }
                }
                known = current;
            })?;

        tracing::debug!(target: "modasmctx", "Watching {} for code reload", dir.display());
        Ok(ReloadWatcher {
            dir,
            stop,
            handle: Some(handle),
        })
    }

    /// The watched directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn thread_id(&self) -> Option<ThreadId> {
        self.handle.as_ref().map(|h| h.thread().id())
    }
}

impl Drop for ReloadWatcher {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        // A reload handler may dispose the context from the watcher thread itself
        if self.thread_id() == Some(thread::current().id()) {
            return;
        }
        if let Some(handle) = self.handle.take() {
            handle.thread().unpark();
            if handle.join().is_err() {
                tracing::warn!(
                    target: "modasmctx",
                    "Reload watcher for {} panicked",
                    self.dir.display()
                );
            }
        }
    }
}

fn snapshot(dir: &Path) -> Snapshot {
    let Ok(entries) = fs::read_dir(dir) else {
        return Snapshot::new();
    };
    entries
        .filter_map(std::result::Result::ok)
        .filter(|entry| {
            entry
                .path()
                .extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case("dll"))
        })
        .filter_map(|entry| {
            let meta = entry.metadata().ok()?;
            meta.is_file()
                .then(|| (entry.path(), (meta.modified().ok(), meta.len())))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_lists_assemblies() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("Foo.dll"), b"dll").unwrap();
        fs::write(dir.path().join("Foo.pdb"), b"pdb").unwrap();
        fs::create_dir(dir.path().join("Sub.dll")).unwrap();

        let snapshot = snapshot(dir.path());
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[&dir.path().join("Foo.dll")].1, 3);
        assert!(super::snapshot(&dir.path().join("missing")).is_empty());
    }

    #[test]
    fn test_drop_stops_thread() {
        let dir = tempfile::tempdir().unwrap();
        let watcher =
            ReloadWatcher::spawn(dir.path().to_path_buf(), Duration::from_secs(60), Weak::new())
                .unwrap();
        assert_eq!(watcher.dir(), dir.path());
        // Returns promptly although the poll interval is long
        drop(watcher);
    }
}
