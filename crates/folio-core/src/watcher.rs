//! Filesystem watching with per-path debouncing.
//!
//! [`PathWatcher`] subscribes to the content tree with `notify`, maps raw
//! events onto [`ChangeEvent`]s for article files and feeds them through a
//! [`Debouncer`]. Bursts of events for one path (editor save sequences,
//! rename-then-write) collapse into a single event carrying the latest
//! kind, released once the path has been quiet for the debounce window.
//!
//! Everything is delivered on one channel so a single consumer applies
//! changes in order.
//!
//! Subscription failures are retried with exponential backoff. While the
//! watcher is down the store keeps serving its last published snapshot;
//! after a successful resubscribe a [`WatchSignal::Rescan`] asks the
//! consumer to reconcile whatever it missed.

use crate::parser::is_article_file;
use crate::{Error, Result};
use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep, sleep_until};
use tracing::{debug, info, warn};

const INITIAL_BACKOFF: Duration = Duration::from_millis(100);
const MAX_BACKOFF: Duration = Duration::from_secs(30);
/// Deadline offset used when `now + window` overflows.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// What happened to a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    /// The file appeared.
    Created,
    /// The file content changed.
    Modified,
    /// The file is gone.
    Deleted,
}

/// A debounced change to one article file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    /// Affected file.
    pub path: PathBuf,
    /// What happened to it.
    pub kind: ChangeKind,
}

impl ChangeEvent {
    /// Empty instance.
    pub fn new(path: impl Into<PathBuf>, kind: ChangeKind) -> Self {
        Self {
            path: path.into(),
            kind,
        }
    }
}

/// Output of the watcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchSignal {
    /// One debounced file change.
    Change(ChangeEvent),
    /// Events may have been lost; compare the tree against the index.
    Rescan,
}

#[derive(Debug, Clone, Copy)]
struct Pending {
    kind: ChangeKind,
    deadline: Instant,
    seq: u64,
}

/// Collapses event bursts per path.
///
/// Pure state machine: callers pass the current time, which keeps it
/// testable without a filesystem or a clock.
#[derive(Debug)]
pub struct Debouncer {
    window: Duration,
    pending: HashMap<PathBuf, Pending>,
    next_seq: u64,
}

impl Debouncer {
    /// Debouncer releasing paths after `window` of quiet.
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            pending: HashMap::new(),
            next_seq: 0,
        }
    }

    /// Record an event. The latest kind wins and the quiet period restarts.
    pub fn push(&mut self, event: ChangeEvent, now: Instant) {
        let deadline = now
            .checked_add(self.window)
            .or_else(|| now.checked_add(FAR_FUTURE))
            .unwrap_or(now);
        if let Some(pending) = self.pending.get_mut(&event.path) {
            pending.kind = event.kind;
            pending.deadline = deadline;
            return;
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.pending.insert(
            event.path,
            Pending {
                kind: event.kind,
                deadline,
                seq,
            },
        );
    }

    /// Remove and return every event whose quiet period has ended, oldest
    /// deadline first.
    pub fn drain_due(&mut self, now: Instant) -> Vec<ChangeEvent> {
        let mut due: Vec<(PathBuf, Pending)> = Vec::new();
        self.pending.retain(|path, pending| {
            if pending.deadline <= now {
                due.push((path.clone(), *pending));
                false
            } else {
                true
            }
        });
        due.sort_by(|a, b| {
            a.1.deadline
                .cmp(&b.1.deadline)
                .then_with(|| a.1.seq.cmp(&b.1.seq))
        });
        due.into_iter()
            .map(|(path, pending)| ChangeEvent::new(path, pending.kind))
            .collect()
    }

    /// Earliest pending deadline.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.values().map(|p| p.deadline).min()
    }

    /// Paths waiting for their quiet period.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Whether there are no entries.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

/// Outcome of mapping one raw `notify` event.
#[derive(Debug, Default, PartialEq, Eq)]
struct Mapped {
    changes: Vec<ChangeEvent>,
    rescan: bool,
}

fn map_event(event: &Event) -> Mapped {
    let mut mapped = Mapped {
        rescan: event.need_rescan(),
        ..Mapped::default()
    };

    let kinds: Vec<(PathBuf, ChangeKind)> = match event.kind {
        EventKind::Create(_) => with_kind(&event.paths, ChangeKind::Created),
        EventKind::Remove(_) => with_kind(&event.paths, ChangeKind::Deleted),
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
            with_kind(&event.paths, ChangeKind::Deleted)
        },
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
            with_kind(&event.paths, ChangeKind::Created)
        },
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            let mut pairs = Vec::new();
            if let Some(from) = event.paths.first() {
                pairs.push((from.clone(), ChangeKind::Deleted));
            }
            if let Some(to) = event.paths.get(1) {
                pairs.push((to.clone(), ChangeKind::Created));
            }
            pairs
        },
        // The final state is read from disk, so an ambiguous rename is
        // reported as a modification of each path.
        EventKind::Modify(_) | EventKind::Any => with_kind(&event.paths, ChangeKind::Modified),
        EventKind::Access(_) | EventKind::Other => Vec::new(),
    };

    for (path, kind) in kinds {
        if is_article_file(&path) {
            mapped.changes.push(ChangeEvent::new(path, kind));
        } else if kind != ChangeKind::Modified && looks_like_directory(&path) {
            // A directory appeared or vanished; its articles may not get
            // their own events.
            mapped.rescan = true;
        }
    }
    mapped
}

fn with_kind(paths: &[PathBuf], kind: ChangeKind) -> Vec<(PathBuf, ChangeKind)> {
    paths.iter().map(|p| (p.clone(), kind)).collect()
}

fn looks_like_directory(path: &Path) -> bool {
    let hidden = path
        .file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with('.'));
    !hidden && (path.is_dir() || path.extension().is_none())
}

/// Watches a content root and emits debounced [`WatchSignal`]s.
#[derive(Debug, Clone)]
pub struct PathWatcher {
    root: PathBuf,
    debounce: Duration,
}

/// Running watcher task.
#[derive(Debug)]
pub struct WatcherTask {
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl WatcherTask {
    /// Stop watching and wait for the task to finish.
    pub async fn stop(mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Err(e) = (&mut self.task).await {
            warn!("Watcher task ended abnormally: {e}");
        }
    }

    /// Whether the watcher loop has exited.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl PathWatcher {
    /// Watcher for `root` with the given debounce window.
    pub fn new(root: impl Into<PathBuf>, debounce: Duration) -> Self {
        Self {
            root: root.into(),
            debounce,
        }
    }

    /// Content root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Start watching on the current tokio runtime.
    ///
    /// The receiver yields signals until the task is stopped or the receiver
    /// is dropped.
    pub fn spawn(self) -> (WatcherTask, mpsc::UnboundedReceiver<WatchSignal>) {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(self.run(out_tx, shutdown_rx));
        (
            WatcherTask {
                shutdown: Some(shutdown_tx),
                task,
            },
            out_rx,
        )
    }

    async fn run(
        self,
        out: mpsc::UnboundedSender<WatchSignal>,
        mut shutdown: oneshot::Receiver<()>,
    ) {
        let (raw_tx, mut raw_rx) = mpsc::unbounded_channel::<notify::Result<Event>>();
        let mut debouncer = Debouncer::new(self.debounce);

        let Some(mut watcher) = self.subscribe(&raw_tx, &mut shutdown, false).await else {
            return;
        };

        loop {
            let deadline = debouncer.next_deadline();
            tokio::select! {
                _ = &mut shutdown => {
                    debug!("Watcher for {} shutting down", self.root.display());
                    break;
                }
                raw = raw_rx.recv() => {
                    match raw {
                        Some(Ok(event)) => {
                            let mapped = map_event(&event);
                            let now = Instant::now();
                            for change in mapped.changes {
                                debouncer.push(change, now);
                            }
                            if mapped.rescan && out.send(WatchSignal::Rescan).is_err() {
                                break;
                            }
                        }
                        Some(Err(e)) => {
                            warn!("Watch error on {}: {e}; resubscribing", self.root.display());
                            drop(watcher);
                            match self.subscribe(&raw_tx, &mut shutdown, true).await {
                                Some(fresh) => watcher = fresh,
                                None => break,
                            }
                            if out.send(WatchSignal::Rescan).is_err() {
                                break;
                            }
                        }
                        None => break,
                    }
                }
                () = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    for change in debouncer.drain_due(Instant::now()) {
                        debug!("Debounced {:?} {}", change.kind, change.path.display());
                        if out.send(WatchSignal::Change(change)).is_err() {
                            return;
                        }
                    }
                }
            }
        }
    }

    /// Create the OS watcher, retrying with exponential backoff.
    ///
    /// Returns `None` if shutdown was requested while retrying.
    async fn subscribe(
        &self,
        raw_tx: &mpsc::UnboundedSender<notify::Result<Event>>,
        shutdown: &mut oneshot::Receiver<()>,
        is_retry: bool,
    ) -> Option<RecommendedWatcher> {
        let mut backoff = if is_retry { INITIAL_BACKOFF } else { Duration::ZERO };
        let mut attempt = 0u32;
        loop {
            if !backoff.is_zero() {
                tokio::select! {
                    _ = &mut *shutdown => return None,
                    () = sleep(backoff) => {}
                }
            }
            attempt += 1;
            match create_watcher(&self.root, raw_tx.clone()) {
                Ok(watcher) => {
                    info!("Watching {} for changes", self.root.display());
                    return Some(watcher);
                },
                Err(e) => {
                    backoff = next_backoff(backoff);
                    warn!(
                        "Failed to watch {} (attempt {attempt}): {e}; retrying in {:?}",
                        self.root.display(),
                        backoff
                    );
                },
            }
        }
    }
}

fn next_backoff(current: Duration) -> Duration {
    if current.is_zero() {
        INITIAL_BACKOFF
    } else {
        (current * 2).min(MAX_BACKOFF)
    }
}

fn create_watcher(
    root: &Path,
    raw_tx: mpsc::UnboundedSender<notify::Result<Event>>,
) -> Result<RecommendedWatcher> {
    let mut watcher = RecommendedWatcher::new(
        move |event: notify::Result<Event>| {
            let _ = raw_tx.send(event);
        },
        notify::Config::default(),
    )?;
    if !root.exists() {
        return Err(Error::Watch(format!(
            "content directory {} does not exist",
            root.display()
        )));
    }
    watcher.watch(root, RecursiveMode::Recursive)?;
    Ok(watcher)
}
