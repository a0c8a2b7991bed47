//! Directory change notifications delivered through a [`Queue`].
//!
//! A [`DirectoryWatcher`] watches one directory (not recursively) and
//! pushes a [`WatchEvent`] for every created, modified or deleted entry.
//! The first event is always [`WatchKind::Initialized`] for the directory
//! itself, so consumers know the watch is in place. Every event carries a
//! copy of the data attached when the watcher was started.

use std::path::{Path, PathBuf};

use notify::{
    event::{ModifyKind, RenameMode},
    EventKind, RecommendedWatcher, RecursiveMode, Watcher,
};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::queue::Queue;

/// What happened to a watched path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WatchKind {
    Created,
    Modified,
    Deleted,
    /// The watch is active. Emitted once, for the watched directory.
    Initialized,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent<A> {
    pub path: PathBuf,
    pub kind: WatchKind,
    pub attached: Option<A>,
}

#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    #[error("Cannot watch {}: {source}", .path.display())]
    Watch {
        path: PathBuf,
        #[source]
        source: notify::Error,
    },
}

type RawEvent = notify::Result<notify::Event>;

/// Static part of a running watch.
struct Watched<A> {
    root: PathBuf,
    kinds: Vec<WatchKind>,
    attached: Option<A>,
}

impl<A: Clone> Watched<A> {
    fn event(&self, path: PathBuf, kind: WatchKind) -> WatchEvent<A> {
        WatchEvent {
            path,
            kind,
            attached: self.attached.clone(),
        }
    }
}

/// Background task turning file system notifications into queue items.
///
/// The task is owned by this handle: dropping it stops the task, and
/// [`shutdown`](Self::shutdown) stops it, waits for it and closes the
/// event queue.
pub struct DirectoryWatcher<A> {
    path: PathBuf,
    events: Queue<WatchEvent<A>>,
    shutdown: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl<A: Clone + Send + 'static> DirectoryWatcher<A> {
    /// Starts watching `path` for the given kinds of changes.
    ///
    /// Events go to an unbounded queue. `Initialized` is sent regardless
    /// of `kinds`.
    pub fn spawn(
        path: impl Into<PathBuf>,
        kinds: &[WatchKind],
        attached: Option<A>,
    ) -> Result<Self, WatchError> {
        Self::spawn_with_output(path, kinds, attached, Queue::unbounded())
    }

    /// Starts watching `path`, sending events to `events`.
    ///
    /// The watch is registered before this returns, so changes made
    /// afterwards are reported.
    pub fn spawn_with_output(
        path: impl Into<PathBuf>,
        kinds: &[WatchKind],
        attached: Option<A>,
        events: Queue<WatchEvent<A>>,
    ) -> Result<Self, WatchError> {
        let path = path.into();
        let (raw_tx, raw_rx) = mpsc::unbounded_channel();

        let mut watcher = notify::recommended_watcher(move |res: RawEvent| {
            // The receiver is gone once the task stopped.
            let _ = raw_tx.send(res);
        })
        .map_err(|source| WatchError::Watch {
            path: path.clone(),
            source,
        })?;
        watcher
            .watch(&path, RecursiveMode::NonRecursive)
            .map_err(|source| WatchError::Watch {
                path: path.clone(),
                source,
            })?;

        let watched = Watched {
            root: path.clone(),
            kinds: kinds.to_vec(),
            attached,
        };
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(Self::run(
            watcher,
            raw_rx,
            watched,
            events.clone(),
            shutdown.clone(),
        ));

        debug!(path = %path.display(), ?kinds, "Watching directory");
        Ok(Self {
            path,
            events,
            shutdown,
            handle: Some(handle),
        })
    }

    /// The watched directory.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Queue receiving the events.
    pub fn events(&self) -> &Queue<WatchEvent<A>> {
        &self.events
    }

    /// Receives the next event, `None` once watching has ended.
    pub async fn recv(&self) -> Option<WatchEvent<A>> {
        self.events.recv().await
    }

    /// Stops watching and waits for the background task. The event queue
    /// is closed; events already queued can still be received.
    pub async fn shutdown(mut self) {
        self.shutdown.cancel();
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
        self.events.close();
    }

    async fn run(
        watcher: RecommendedWatcher,
        mut raw: mpsc::UnboundedReceiver<RawEvent>,
        watched: Watched<A>,
        events: Queue<WatchEvent<A>>,
        shutdown: CancellationToken,
    ) {
        // Notifications stop when the watcher is dropped.
        let _watcher = watcher;

        let initialized = watched.event(watched.root.clone(), WatchKind::Initialized);
        if forward(&events, &shutdown, initialized).await {
            'watch: loop {
                let received = tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => break,
                    received = raw.recv() => received,
                };

                match received {
                    Some(Ok(event)) => {
                        for (path, kind) in classify(event) {
                            if !watched.kinds.contains(&kind) {
                                continue;
                            }
                            if !forward(&events, &shutdown, watched.event(path, kind)).await {
                                break 'watch;
                            }
                        }
                    }
                    Some(Err(e)) => {
                        warn!(path = %watched.root.display(), error = %e, "Watch error");
                    }
                    None => break,
                }
            }
        }

        events.close();
        debug!(path = %watched.root.display(), "Watcher stopped");
    }
}

impl<A> Drop for DirectoryWatcher<A> {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Sends `event` unless the watcher is shutting down. Returns `false` if
/// watching should stop.
async fn forward<A>(
    events: &Queue<WatchEvent<A>>,
    shutdown: &CancellationToken,
    event: WatchEvent<A>,
) -> bool {
    tokio::select! {
        biased;
        _ = shutdown.cancelled() => false,
        sent = events.send(event) => {
            if sent.is_err() {
                debug!("Watch event queue closed, stopping");
            }
            sent.is_ok()
        }
    }
}

/// Maps a notification to the affected paths and their kind of change.
///
/// Renames inside the directory count as a deletion of the old name and a
/// creation of the new one. Access and unknown notifications are ignored.
fn classify(event: notify::Event) -> Vec<(PathBuf, WatchKind)> {
    let kind = match &event.kind {
        EventKind::Create(_) => WatchKind::Created,
        EventKind::Remove(_) => WatchKind::Deleted,
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => WatchKind::Deleted,
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => WatchKind::Created,
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            let mut paths = event.paths.into_iter();
            let from = paths.next().map(|path| (path, WatchKind::Deleted));
            let to = paths.next().map(|path| (path, WatchKind::Created));
            return from.into_iter().chain(to).collect();
        }
        EventKind::Modify(_) => WatchKind::Modified,
        _ => return Vec::new(),
    };

    event.paths.into_iter().map(|path| (path, kind)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{AccessKind, CreateKind, DataChange, RemoveKind};
    use std::time::Duration;
    use tempfile::TempDir;

    const ALL: &[WatchKind] = &[WatchKind::Created, WatchKind::Modified, WatchKind::Deleted];

    fn watched_dir() -> (TempDir, PathBuf) {
        let dir = TempDir::new().unwrap();
        let root = dir.path().canonicalize().unwrap();
        (dir, root)
    }

    /// Waits for an event of `kind` on `path`, skipping others.
    async fn next_event(
        watcher: &DirectoryWatcher<&'static str>,
        kind: WatchKind,
        path: &Path,
    ) -> WatchEvent<&'static str> {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let event = watcher.recv().await.expect("event queue closed");
                if event.kind == kind && event.path == path {
                    return event;
                }
            }
        })
        .await
        .expect("no matching watch event")
    }

    #[tokio::test]
    async fn test_initialized_event_comes_first() {
        let (_dir, root) = watched_dir();
        let watcher = DirectoryWatcher::spawn(&root, ALL, Some("tag")).unwrap();

        let first = watcher.recv().await.unwrap();
        assert_eq!(first.kind, WatchKind::Initialized);
        assert_eq!(first.path, root);
        assert_eq!(first.attached, Some("tag"));
        assert_eq!(watcher.path(), root.as_path());
    }

    #[tokio::test]
    async fn test_reports_file_lifecycle() {
        let (_dir, root) = watched_dir();
        let watcher = DirectoryWatcher::spawn(&root, ALL, Some("tag")).unwrap();
        next_event(&watcher, WatchKind::Initialized, &root).await;

        let file = root.join("data.txt");
        std::fs::write(&file, b"first").unwrap();
        let created = next_event(&watcher, WatchKind::Created, &file).await;
        assert_eq!(created.attached, Some("tag"));

        std::fs::write(&file, b"second").unwrap();
        next_event(&watcher, WatchKind::Modified, &file).await;

        std::fs::remove_file(&file).unwrap();
        next_event(&watcher, WatchKind::Deleted, &file).await;

        watcher.shutdown().await;
    }

    #[tokio::test]
    async fn test_only_requested_kinds_are_sent() {
        let (_dir, root) = watched_dir();
        let watcher: DirectoryWatcher<&'static str> =
            DirectoryWatcher::spawn(&root, &[WatchKind::Deleted], None).unwrap();
        assert_eq!(watcher.recv().await.unwrap().kind, WatchKind::Initialized);

        let file = root.join("short-lived.txt");
        std::fs::write(&file, b"gone soon").unwrap();
        std::fs::remove_file(&file).unwrap();

        let next = tokio::time::timeout(Duration::from_secs(5), watcher.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(next.kind, WatchKind::Deleted);
        assert_eq!(next.path, file);
        assert_eq!(next.attached, None);
    }

    #[tokio::test]
    async fn test_shutdown_closes_queue() {
        let (_dir, root) = watched_dir();
        let watcher: DirectoryWatcher<()> = DirectoryWatcher::spawn(&root, ALL, None).unwrap();
        let events = watcher.events().clone();
        assert_eq!(events.recv().await.unwrap().kind, WatchKind::Initialized);

        watcher.shutdown().await;
        assert!(events.is_closed());
        assert_eq!(events.recv().await, None);
    }

    #[tokio::test]
    async fn test_missing_directory_is_an_error() {
        let (_dir, root) = watched_dir();
        let missing = root.join("does-not-exist");

        let result = DirectoryWatcher::<()>::spawn(&missing, ALL, None);
        match result {
            Err(WatchError::Watch { path, .. }) => assert_eq!(path, missing),
            Ok(_) => panic!("watching a missing directory succeeded"),
        }
    }

    #[test]
    fn test_classify_maps_event_kinds() {
        let path = PathBuf::from("/watched/a");

        let created = notify::Event::new(EventKind::Create(CreateKind::File)).add_path(path.clone());
        assert_eq!(classify(created), vec![(path.clone(), WatchKind::Created)]);

        let written = notify::Event::new(EventKind::Modify(ModifyKind::Data(DataChange::Content)))
            .add_path(path.clone());
        assert_eq!(classify(written), vec![(path.clone(), WatchKind::Modified)]);

        let removed = notify::Event::new(EventKind::Remove(RemoveKind::File)).add_path(path.clone());
        assert_eq!(classify(removed), vec![(path.clone(), WatchKind::Deleted)]);

        let read = notify::Event::new(EventKind::Access(AccessKind::Any)).add_path(path);
        assert!(classify(read).is_empty());
    }

    #[test]
    fn test_classify_splits_renames() {
        let from = PathBuf::from("/watched/old");
        let to = PathBuf::from("/watched/new");
        let renamed = notify::Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::Both)))
            .add_path(from.clone())
            .add_path(to.clone());

        assert_eq!(
            classify(renamed),
            vec![(from, WatchKind::Deleted), (to, WatchKind::Created)]
        );
    }
}
