//! Keeps folders organized as new files appear.
//!
//! A `notify` watcher observes each root non-recursively and pushes new file
//! paths into a bounded queue. One worker thread drains the queue in order,
//! waits out the settle delay for each file, and hands it to
//! [`FileOrganizer::organize_one`]. Because there is exactly one consumer,
//! events are organized one at a time and conflict numbering stays correct.
//!
//! The worker takes a fresh [`Settings`](crate::config::Settings) snapshot
//! from the [`SettingsStore`] for every file, so a reconfiguration applies
//! to the next event without disturbing the one in flight.

use crate::config::SettingsStore;
use crate::file_organizer::{FileOrganizer, MessageSink};
use notify::event::{CreateKind, ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::thread::{self, JoinHandle};
use std::time::Instant;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WatchError {
    #[error("Watch folder not found: {}", .0.display())]
    RootNotFound(PathBuf),
    #[error("No folders to watch")]
    NoRoots,
    #[error("Failed to start watcher: {0}")]
    Notify(#[from] notify::Error),
    #[error("Failed to start watch worker: {0}")]
    Worker(#[source] std::io::Error),
}

/// A new file waiting to be organized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchJob {
    pub path: PathBuf,
    pub root: PathBuf,
    pub queued_at: Instant,
}

/// Turns filesystem events into queued jobs.
struct Dispatcher {
    roots: Vec<PathBuf>,
    tx: SyncSender<WatchJob>,
}

impl Dispatcher {
    fn dispatch(&self, event: &Event) {
        for path in new_file_paths(event) {
            let Some(root) = self.root_of(path) else {
                tracing::debug!(path = %path.display(), "event outside watched roots");
                continue;
            };
            let job = WatchJob {
                path: path.to_path_buf(),
                root,
                queued_at: Instant::now(),
            };
            match self.tx.try_send(job) {
                Ok(()) => {}
                Err(TrySendError::Full(job)) => tracing::warn!(
                    path = %job.path.display(),
                    "watch queue full, file left for the next bulk run"
                ),
                Err(TrySendError::Disconnected(_)) => {
                    tracing::debug!("watch worker gone, dropping event")
                }
            }
        }
    }

    /// Roots are stored canonical; the parent is canonicalized to match.
    fn root_of(&self, path: &Path) -> Option<PathBuf> {
        let parent = path.parent()?;
        let parent = fs::canonicalize(parent).unwrap_or_else(|_| parent.to_path_buf());
        self.roots.iter().find(|root| **root == parent).cloned()
    }
}

/// Paths in `event` that may be new files in a watched folder.
///
/// Creations and renames into the folder count. Folder creations do not,
/// which also keeps the category folders the organizer creates out of the queue.
pub fn new_file_paths(event: &Event) -> Vec<&Path> {
    match event.kind {
        EventKind::Create(CreateKind::Folder) => Vec::new(),
        EventKind::Create(_) => event.paths.iter().map(PathBuf::as_path).collect(),
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
            event.paths.iter().map(PathBuf::as_path).collect()
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            event.paths.get(1).map(PathBuf::as_path).into_iter().collect()
        }
        _ => Vec::new(),
    }
}

/// Drains `rx` until every sender is gone.
fn spawn_worker(
    rx: Receiver<WatchJob>,
    store: Arc<SettingsStore>,
    sink: Option<Arc<dyn MessageSink>>,
) -> std::io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("dirsort-watch".to_string())
        .spawn(move || {
            for job in rx {
                let settings = store.snapshot();
                let ready_at = job.queued_at + settings.settle_delay;
                let now = Instant::now();
                if ready_at > now {
                    thread::sleep(ready_at - now);
                }

                // Gone or replaced by a directory while settling.
                if !job.path.is_file() {
                    tracing::debug!(path = %job.path.display(), "no longer a file, ignoring");
                    continue;
                }

                let organizer = FileOrganizer::new(settings);
                let destination_root = organizer.destination_root_for(&job.root);
                organizer.organize_one(&job.path, &destination_root, sink.as_deref());
            }
            tracing::debug!("watch worker stopped");
        })
}

/// Watches folders and organizes every file created in them.
///
/// Dropping the watcher (or calling [`FolderWatcher::stop`]) stops event
/// delivery, lets the worker finish the files already queued, and joins it.
pub struct FolderWatcher {
    watcher: Option<RecommendedWatcher>,
    worker: Option<JoinHandle<()>>,
    roots: Vec<PathBuf>,
}

impl FolderWatcher {
    /// Starts watching `roots` with the settings currently in `store`.
    ///
    /// # Errors
    ///
    /// Fails if `roots` is empty, a root is not a directory, or the platform
    /// watcher cannot be created.
    ///
    /// Roots are canonicalized, so relative paths keep matching the absolute
    /// paths the platform reports events with.
    pub fn start(
        roots: Vec<PathBuf>,
        store: Arc<SettingsStore>,
        sink: Option<Arc<dyn MessageSink>>,
    ) -> Result<Self, WatchError> {
        if roots.is_empty() {
            return Err(WatchError::NoRoots);
        }
        let roots = roots
            .into_iter()
            .map(|root| match fs::canonicalize(&root) {
                Ok(canonical) if canonical.is_dir() => Ok(canonical),
                _ => Err(WatchError::RootNotFound(root)),
            })
            .collect::<Result<Vec<_>, _>>()?;

        let capacity = store.snapshot().queue_capacity.max(1);
        let (tx, rx) = mpsc::sync_channel(capacity);
        let dispatcher = Dispatcher {
            roots: roots.clone(),
            tx,
        };

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) => dispatcher.dispatch(&event),
            Err(e) => tracing::error!(error = %e, "watch error"),
        })?;
        for root in &roots {
            watcher.watch(root, RecursiveMode::NonRecursive)?;
            tracing::info!(root = %root.display(), "watching folder");
        }

        let worker = spawn_worker(rx, store, sink).map_err(WatchError::Worker)?;

        Ok(Self {
            watcher: Some(watcher),
            worker: Some(worker),
            roots,
        })
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    /// Stops watching and waits for queued files to be organized.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        // Dropping the watcher drops the dispatcher and with it the only sender.
        self.watcher.take();
        if let Some(worker) = self.worker.take()
            && worker.join().is_err()
        {
            tracing::error!("watch worker panicked");
        }
        for root in &self.roots {
            tracing::info!(root = %root.display(), "stopped watching folder");
        }
    }
}

impl Drop for FolderWatcher {
    fn drop(&mut self) {
        if self.worker.is_some() {
            self.shutdown();
        }
    }
}

impl std::fmt::Debug for FolderWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FolderWatcher")
            .field("roots", &self.roots)
            .field("running", &self.worker.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Policy, Settings};
    use crate::file_category::{Rule, RuleTable};
    use crate::file_organizer::SinkMessage;
    use std::fs;
    use std::sync::Mutex;
    use std::time::Duration;
    use tempfile::TempDir;

    fn store(settle: Duration, capacity: usize) -> Arc<SettingsStore> {
        let rules = RuleTable::new(vec![Rule::new("documents", "docs", [".pdf", ".txt"])]);
        let mut settings = Settings::new(rules, Policy::default());
        settings.settle_delay = settle;
        settings.queue_capacity = capacity;
        Arc::new(SettingsStore::new(settings))
    }

    #[derive(Default)]
    struct Lines(Mutex<Vec<String>>);

    impl MessageSink for Lines {
        fn message(&self, message: &SinkMessage<'_>) {
            self.0.lock().unwrap().push(message.to_string());
        }
    }

    fn create_event(path: &Path) -> Event {
        Event::new(EventKind::Create(CreateKind::File)).add_path(path.to_path_buf())
    }

    #[test]
    fn test_new_file_paths_filters_event_kinds() {
        let file = PathBuf::from("/w/a.pdf");
        let folder = Event::new(EventKind::Create(CreateKind::Folder)).add_path(file.clone());
        let removed = Event::new(EventKind::Remove(notify::event::RemoveKind::File))
            .add_path(file.clone());
        let renamed = Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::Both)))
            .add_path(PathBuf::from("/w/a.pdf.part"))
            .add_path(file.clone());

        assert_eq!(new_file_paths(&create_event(&file)), vec![file.as_path()]);
        assert!(new_file_paths(&folder).is_empty());
        assert!(new_file_paths(&removed).is_empty());
        assert_eq!(new_file_paths(&renamed), vec![file.as_path()]);
    }

    #[test]
    fn test_dispatcher_ignores_paths_outside_roots() {
        let (tx, rx) = mpsc::sync_channel(4);
        let dispatcher = Dispatcher {
            roots: vec![PathBuf::from("/w")],
            tx,
        };
        dispatcher.dispatch(&create_event(Path::new("/w/a.pdf")));
        dispatcher.dispatch(&create_event(Path::new("/w/docs/a.pdf")));
        dispatcher.dispatch(&create_event(Path::new("/elsewhere/a.pdf")));
        drop(dispatcher);

        let jobs: Vec<_> = rx.iter().collect();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].root, PathBuf::from("/w"));
    }

    #[test]
    fn test_full_queue_drops_instead_of_blocking() {
        let (tx, rx) = mpsc::sync_channel(1);
        let dispatcher = Dispatcher {
            roots: vec![PathBuf::from("/w")],
            tx,
        };
        dispatcher.dispatch(&create_event(Path::new("/w/a.pdf")));
        dispatcher.dispatch(&create_event(Path::new("/w/b.pdf")));
        drop(dispatcher);

        assert_eq!(rx.iter().count(), 1);
    }

    #[test]
    fn test_worker_organizes_queued_files_in_order() {
        let temp_dir = TempDir::new().unwrap();
        let root = fs::canonicalize(temp_dir.path()).unwrap();
        let (tx, rx) = mpsc::sync_channel(8);
        let dispatcher = Dispatcher {
            roots: vec![root.clone()],
            tx,
        };
        let sink = Arc::new(Lines::default());
        let worker = spawn_worker(
            rx,
            store(Duration::from_millis(10), 8),
            Some(sink.clone() as Arc<dyn MessageSink>),
        )
        .unwrap();

        // Same name twice: the second must get a numbered suffix.
        for content in ["first", "second"] {
            let file = root.join("notes.txt");
            fs::write(&file, content).unwrap();
            dispatcher.dispatch(&create_event(&file));
            // Serialized dispatch: wait for the worker to move it.
            let deadline = Instant::now() + Duration::from_secs(5);
            while file.exists() && Instant::now() < deadline {
                thread::sleep(Duration::from_millis(10));
            }
        }
        drop(dispatcher);
        worker.join().unwrap();

        assert_eq!(fs::read_to_string(root.join("docs/notes.txt")).unwrap(), "first");
        assert_eq!(fs::read_to_string(root.join("docs/notes_1.txt")).unwrap(), "second");
        assert_eq!(sink.0.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_worker_ignores_files_gone_before_settling() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().to_path_buf();
        let (tx, rx) = mpsc::sync_channel(8);
        let sink = Arc::new(Lines::default());
        let worker = spawn_worker(
            rx,
            store(Duration::from_millis(0), 8),
            Some(sink.clone() as Arc<dyn MessageSink>),
        )
        .unwrap();

        tx.send(WatchJob {
            path: root.join("vanished.pdf"),
            root: root.clone(),
            queued_at: Instant::now(),
        })
        .unwrap();
        drop(tx);
        worker.join().unwrap();

        assert!(sink.0.lock().unwrap().is_empty());
    }

    #[test]
    fn test_start_rejects_missing_root() {
        let result = FolderWatcher::start(
            vec![PathBuf::from("/non/existent/watch")],
            store(Duration::ZERO, 8),
            None,
        );
        assert!(matches!(result, Err(WatchError::RootNotFound(_))));
        assert!(matches!(
            FolderWatcher::start(Vec::new(), store(Duration::ZERO, 8), None),
            Err(WatchError::NoRoots)
        ));
    }

    #[test]
    fn test_watcher_organizes_files_in_relative_root() {
        let temp_dir = tempfile::Builder::new()
            .prefix("dirsort-watch")
            .tempdir_in(".")
            .unwrap();
        // Created directly in the working directory, so its name is a relative path to it.
        let relative = PathBuf::from(temp_dir.path().file_name().unwrap());
        assert!(relative.is_relative());

        let watcher =
            FolderWatcher::start(vec![relative.clone()], store(Duration::from_millis(50), 8), None)
                .unwrap();
        assert!(watcher.roots()[0].is_absolute());

        let file = relative.join("scan.pdf");
        fs::write(&file, "pdf").unwrap();

        let target = relative.join("docs/scan.pdf");
        let deadline = Instant::now() + Duration::from_secs(10);
        while !target.exists() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(25));
        }
        watcher.stop();

        assert!(target.exists());
        assert!(!file.exists());
    }

    #[test]
    fn test_watcher_organizes_new_file() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().to_path_buf();
        let watcher =
            FolderWatcher::start(vec![root.clone()], store(Duration::from_millis(50), 8), None)
                .unwrap();

        let file = root.join("report.pdf");
        fs::write(&file, "pdf").unwrap();

        let target = root.join("docs/report.pdf");
        let deadline = Instant::now() + Duration::from_secs(10);
        while !target.exists() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(25));
        }
        watcher.stop();

        assert!(target.exists());
        assert!(!file.exists());
    }
}
