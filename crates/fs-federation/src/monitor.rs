//! Change monitor for one projection root.
//!
//! Native notifications flow from the notify callback through a bounded
//! queue to a dispatcher thread, which owns the translation into
//! [`ChangeEvent`]s and fans them out to subscribers. Watches are
//! non-recursive; the monitor registers every visible subdirectory itself and
//! extends registration as directories appear.

mod dispatch;
mod queue;
mod registry;

#[cfg(test)]
mod tests;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use chrono::{DateTime, Utc};
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use notify::{recommended_watcher, Event};
use parking_lot::Mutex;

use self::dispatch::Dispatcher;
use self::queue::EventQueue;
use self::registry::WatchRegistry;
use crate::error::{ConnectorError, Result};
use crate::path::PathMapper;
use crate::properties::ExtraPropertyStore;

pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    NodeAdded,
    NodeRemoved,
    PropertyChanged,
}

/// One observed change, addressed in the logical tree.
///
/// `PropertyChanged` events for file content are addressed at the property
/// itself, e.g. `/fs/a.txt/jcr:content/jcr:data`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    pub address: String,
    pub native_path: PathBuf,
    pub timestamp: DateTime<Utc>,
}

/// Monitor lifecycle state.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
#[repr(u8)]
pub enum MonitorState {
    Stopped = 0,
    Starting = 1,
    Watching = 2,
}

impl MonitorState {
    /// Loads the state from an atomic.
    pub fn load(atomic: &AtomicU8) -> Self {
        match atomic.load(Ordering::Acquire) {
            1 => Self::Starting,
            2 => Self::Watching,
            _ => Self::Stopped,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Watching => "watching",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorStatus {
    pub state: MonitorState,
    pub watched_directories: usize,
    pub errors: usize,
    pub last_error: Option<String>,
}

/// Receiving end of a subscription. Dropping it unsubscribes.
#[derive(Debug)]
pub struct Subscription {
    receiver: Receiver<ChangeEvent>,
}

impl Subscription {
    /// Waits up to `timeout` for the next event.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<ChangeEvent> {
        match self.receiver.recv_timeout(timeout) {
            Ok(event) => Some(event),
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => None,
        }
    }

    pub fn try_recv(&self) -> Option<ChangeEvent> {
        self.receiver.try_recv().ok()
    }

    /// Everything delivered so far, without waiting.
    pub fn drain(&self) -> Vec<ChangeEvent> {
        self.receiver.try_iter().collect()
    }
}

pub(crate) struct MonitorShared {
    mapper: PathMapper,
    store: ExtraPropertyStore,
    state: AtomicU8,
    registry: WatchRegistry,
    subscribers: Mutex<Vec<Sender<ChangeEvent>>>,
    errors: AtomicUsize,
    last_error: Mutex<Option<String>>,
}

impl MonitorShared {
    fn record_error(&self, message: String) {
        log::warn!("{message}");
        self.errors.fetch_add(1, Ordering::Relaxed);
        *self.last_error.lock() = Some(message);
    }

    fn publish(&self, event: ChangeEvent) {
        log::debug!("{:?} {}", event.kind, event.address);
        self.subscribers
            .lock()
            .retain(|subscriber| subscriber.send(event.clone()).is_ok());
    }

    /// Sorted entries of `dir` with their directory flag. A listing failure
    /// is recorded; the caller skips that subtree.
    fn list_children(&self, dir: &Path) -> Option<Vec<(PathBuf, bool)>> {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(error) => {
                self.record_error(format!("cannot list {}: {error}", dir.display()));
                return None;
            }
        };
        let mut children: Vec<(PathBuf, bool)> = entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| {
                let is_dir = entry.file_type().ok()?.is_dir();
                Some((entry.path(), is_dir))
            })
            .collect();
        children.sort();
        Some(children)
    }

    /// Watches `dir` and every visible directory beneath it.
    ///
    /// `visit` sees each visible entry below `dir`, parents before children.
    /// A directory that cannot be watched is recorded and skipped; its
    /// siblings are still registered.
    fn watch_tree(&self, dir: &Path, visit: &mut dyn FnMut(&Path)) {
        if let Err(error) = self.registry.watch(dir) {
            self.record_error(error.to_string());
            return;
        }
        let Some(children) = self.list_children(dir) else {
            return;
        };

        for (child, is_dir) in children {
            let Some(relative) = self.mapper.relative_from_native(&child) else {
                continue;
            };
            if !self.mapper.is_visible(&relative, is_dir) {
                continue;
            }
            visit(&child);
            if is_dir {
                self.watch_tree(&child, visit);
            }
        }
    }
}

/// Watches one native root and reports changes to subscribers.
pub struct ChangeMonitor {
    shared: Arc<MonitorShared>,
    queue_capacity: usize,
    shutdown: Mutex<Option<Sender<()>>>,
}

impl ChangeMonitor {
    pub fn new(mapper: PathMapper, store: ExtraPropertyStore, queue_capacity: usize) -> Self {
        Self {
            shared: Arc::new(MonitorShared {
                mapper,
                store,
                state: AtomicU8::new(MonitorState::Stopped as u8),
                registry: WatchRegistry::default(),
                subscribers: Mutex::new(Vec::new()),
                errors: AtomicUsize::new(0),
                last_error: Mutex::new(None),
            }),
            queue_capacity,
            shutdown: Mutex::new(None),
        }
    }

    pub fn root(&self) -> &Path {
        self.shared.mapper.root()
    }

    pub fn state(&self) -> MonitorState {
        MonitorState::load(&self.shared.state)
    }

    pub fn status(&self) -> MonitorStatus {
        MonitorStatus {
            state: self.state(),
            watched_directories: self.shared.registry.len(),
            errors: self.shared.errors.load(Ordering::Relaxed),
            last_error: self.shared.last_error.lock().clone(),
        }
    }

    pub fn subscribe(&self) -> Subscription {
        let (sender, receiver) = unbounded();
        self.shared.subscribers.lock().push(sender);
        Subscription { receiver }
    }

    /// Registers watches on the root and all visible subdirectories, then
    /// starts delivering events. Starting a running monitor is a no-op.
    pub fn start(&self) -> Result<()> {
        let shared = &self.shared;
        if let Err(current) = shared.state.compare_exchange(
            MonitorState::Stopped as u8,
            MonitorState::Starting as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            return match current {
                2 => Ok(()),
                _ => Err(ConnectorError::Monitor(format!(
                    "monitor for {} is already starting",
                    self.root().display()
                ))),
            };
        }

        match self.register() {
            Ok(shutdown) => {
                *self.shutdown.lock() = Some(shutdown);
                let promoted = shared.state.compare_exchange(
                    MonitorState::Starting as u8,
                    MonitorState::Watching as u8,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                );
                if promoted.is_err() {
                    // Stopped while registering.
                    self.teardown();
                    return Ok(());
                }
                log::info!(
                    "watching {} ({} directories)",
                    self.root().display(),
                    shared.registry.len()
                );
                Ok(())
            }
            Err(error) => {
                drop(shared.registry.take());
                shared
                    .state
                    .store(MonitorState::Stopped as u8, Ordering::Release);
                shared.record_error(error.to_string());
                Err(error)
            }
        }
    }

    fn register(&self) -> Result<Sender<()>> {
        let shared = &self.shared;
        let root = shared.mapper.root().to_path_buf();
        let (queue, events) = EventQueue::new(self.queue_capacity);
        let queue = Arc::new(queue);

        let callback_queue = Arc::clone(&queue);
        let watcher = recommended_watcher(move |event: notify::Result<Event>| {
            callback_queue.push(event);
        })
        .map_err(|error| {
            ConnectorError::Monitor(format!(
                "failed to create watcher for {}: {error}",
                root.display()
            ))
        })?;
        shared.registry.install(watcher);
        shared.registry.watch(&root)?;
        shared.watch_tree(&root, &mut |_| {});

        let (shutdown, shutdown_rx) = crossbeam_channel::bounded(1);
        let dispatcher = Dispatcher::new(Arc::clone(shared), queue, events, shutdown_rx);
        thread::Builder::new()
            .name("fs-federation-monitor".to_string())
            .spawn(move || dispatcher.run())
            .map_err(|error| ConnectorError::io(&root, error))?;
        Ok(shutdown)
    }

    /// Deregisters every watch and signals the dispatcher to exit.
    ///
    /// Does not wait for the dispatcher; events already queued may still be delivered.
    pub fn stop(&self) {
        let previous = self
            .shared
            .state
            .swap(MonitorState::Stopped as u8, Ordering::AcqRel);
        if previous == MonitorState::Stopped as u8 {
            return;
        }
        self.teardown();
        log::info!("stopped watching {}", self.root().display());
    }

    fn teardown(&self) {
        let watcher = self.shared.registry.take();
        if let Some(shutdown) = self.shutdown.lock().take() {
            let _ = shutdown.try_send(());
        }
        drop(watcher);
    }
}

impl Drop for ChangeMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}
