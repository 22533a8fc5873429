//! Translation of native notifications into logical change events.
//!
//! Runs on the dispatcher thread, which is the only consumer of the event
//! queue and the only place that extends watch registration after start.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use crossbeam_channel::{select, Receiver};
use notify::event::{CreateKind, ModifyKind, RemoveKind, RenameMode};
use notify::EventKind;

use super::queue::{EventQueue, RawEvent};
use super::{ChangeEvent, ChangeKind, MonitorShared};
use crate::path::{join_relative, split_parent};
use crate::properties::content_owner;
use crate::types::{CONTENT_CHILD, DATA_PROPERTY, LAST_MODIFIED_PROPERTY};

/// Bound on the bookkeeping sets used to suppress duplicate notifications.
const DEDUP_LIMIT: usize = 4096;

enum Target {
    Node(String),
    /// A sidecar changed; carries the owner key.
    Sidecar(String),
    Ignored,
}

pub(super) struct Dispatcher {
    shared: Arc<MonitorShared>,
    queue: Arc<EventQueue>,
    events: Receiver<RawEvent>,
    shutdown: Receiver<()>,
    /// Entries already reported by a directory scan; their own create
    /// notification is swallowed.
    announced: HashSet<PathBuf>,
    /// Entries already reported as removed; the watched directory's own
    /// deletion notification repeats its parent's.
    removed: HashSet<PathBuf>,
}

impl Dispatcher {
    pub(super) fn new(
        shared: Arc<MonitorShared>,
        queue: Arc<EventQueue>,
        events: Receiver<RawEvent>,
        shutdown: Receiver<()>,
    ) -> Self {
        Self {
            shared,
            queue,
            events,
            shutdown,
            announced: HashSet::new(),
            removed: HashSet::new(),
        }
    }

    pub(super) fn run(mut self) {
        let events = self.events.clone();
        let shutdown = self.shutdown.clone();
        loop {
            select! {
                recv(shutdown) -> _ => break,
                recv(events) -> message => match message {
                    Ok(event) => {
                        self.handle(event);
                        self.drain();
                    }
                    Err(_) => break,
                },
            }
        }
        log::debug!(
            "monitor dispatcher for {} exited",
            self.shared.mapper.root().display()
        );
    }

    fn drain(&mut self) {
        while let Ok(event) = self.events.try_recv() {
            self.handle(event);
        }
        for event in self.queue.take_spilled() {
            self.handle(event);
        }
        let dropped = self.queue.take_dropped();
        if dropped > 0 {
            self.shared.record_error(format!(
                "monitor queue overflowed under {}; {dropped} events dropped",
                self.shared.mapper.root().display()
            ));
        }
    }

    fn handle(&mut self, event: RawEvent) {
        let event = match event {
            Ok(event) => event,
            Err(error) => {
                self.shared.record_error(format!("watch error: {error}"));
                return;
            }
        };

        match event.kind {
            EventKind::Access(_) | EventKind::Other => {}
            EventKind::Create(kind) => {
                for path in event.paths {
                    let is_dir = kind == CreateKind::Folder || path.is_dir();
                    self.created(path, is_dir);
                }
            }
            EventKind::Remove(kind) => {
                for path in event.paths {
                    let is_dir =
                        kind == RemoveKind::Folder || self.shared.registry.contains(&path);
                    self.removed(path, is_dir);
                }
            }
            EventKind::Modify(ModifyKind::Name(mode)) => match mode {
                RenameMode::From => {
                    for path in event.paths {
                        let is_dir = self.shared.registry.contains(&path);
                        self.removed(path, is_dir);
                    }
                }
                RenameMode::To => {
                    for path in event.paths {
                        let is_dir = path.is_dir();
                        self.created(path, is_dir);
                    }
                }
                // Both halves were already reported as From and To.
                RenameMode::Both => {}
                RenameMode::Any | RenameMode::Other => {
                    for path in event.paths {
                        if path.symlink_metadata().is_ok() {
                            let is_dir = path.is_dir();
                            self.created(path, is_dir);
                        } else {
                            let is_dir = self.shared.registry.contains(&path);
                            self.removed(path, is_dir);
                        }
                    }
                }
            },
            EventKind::Modify(ModifyKind::Metadata(_)) => {
                for path in event.paths {
                    self.modified(path, false);
                }
            }
            EventKind::Modify(_) | EventKind::Any => {
                for path in event.paths {
                    self.modified(path, true);
                }
            }
        }
    }

    fn created(&mut self, path: PathBuf, is_dir: bool) {
        let relative = match self.classify(&path, is_dir) {
            Target::Node(relative) => relative,
            Target::Sidecar(owner) => return self.property_changed(&owner, path),
            Target::Ignored => return,
        };
        self.removed.remove(&path);
        if self.announced.remove(&path) {
            return;
        }
        self.emit(ChangeKind::NodeAdded, &relative, path.clone());
        if is_dir {
            self.announce_tree(&path);
        }
    }

    /// Watches a new directory and reports whatever already landed in it.
    fn announce_tree(&mut self, dir: &Path) {
        let mut found = Vec::new();
        let shared = Arc::clone(&self.shared);
        shared.watch_tree(dir, &mut |child| found.push(child.to_path_buf()));

        if self.announced.len() + found.len() > DEDUP_LIMIT {
            self.announced.clear();
        }
        for child in found {
            if let Some(relative) = self.shared.mapper.relative_from_native(&child) {
                self.emit(ChangeKind::NodeAdded, &relative, child.clone());
                self.removed.remove(&child);
                self.announced.insert(child);
            }
        }
    }

    fn removed(&mut self, path: PathBuf, is_dir: bool) {
        let relative = match self.classify(&path, is_dir) {
            Target::Node(relative) => relative,
            Target::Sidecar(owner) => return self.property_changed(&owner, path),
            Target::Ignored => {
                self.shared.registry.forget(&path);
                return;
            }
        };
        self.announced.retain(|announced| !announced.starts_with(&path));
        if self.removed.len() >= DEDUP_LIMIT {
            self.removed.clear();
        }
        if !self.removed.insert(path.clone()) {
            return;
        }
        if is_dir {
            self.shared.registry.forget(&path);
        }
        self.emit(ChangeKind::NodeRemoved, &relative, path);
    }

    fn modified(&mut self, path: PathBuf, data: bool) {
        let is_dir = path.is_dir();
        let relative = match self.classify(&path, is_dir) {
            Target::Node(relative) => relative,
            Target::Sidecar(owner) => return self.property_changed(&owner, path),
            Target::Ignored => return,
        };
        if is_dir || !path.is_file() {
            return;
        }
        let content = join_relative(&relative, CONTENT_CHILD);
        if data {
            self.emit(
                ChangeKind::PropertyChanged,
                &join_relative(&content, DATA_PROPERTY),
                path.clone(),
            );
        }
        self.emit(
            ChangeKind::PropertyChanged,
            &join_relative(&content, LAST_MODIFIED_PROPERTY),
            path,
        );
    }

    fn property_changed(&mut self, owner: &str, sidecar: PathBuf) {
        self.emit(ChangeKind::PropertyChanged, owner, sidecar);
    }

    fn classify(&self, path: &Path, is_dir: bool) -> Target {
        let mapper = &self.shared.mapper;
        let Some(relative) = mapper.relative_from_native(path) else {
            return Target::Ignored;
        };
        if relative.is_empty() {
            return Target::Ignored;
        }
        let (_, name) = split_parent(&relative);
        if mapper.is_reserved_name(name) {
            return match self.shared.store.owner_of_sidecar(&relative) {
                Some(owner) if self.owner_is_visible(&owner) => Target::Sidecar(owner),
                _ => Target::Ignored,
            };
        }
        if mapper.is_visible(&relative, is_dir) {
            Target::Node(relative)
        } else {
            Target::Ignored
        }
    }

    fn owner_is_visible(&self, owner: &str) -> bool {
        let mapper = &self.shared.mapper;
        let file = content_owner(owner).unwrap_or(owner);
        let is_dir = mapper
            .native_path_for(file)
            .map(|native| native.is_dir())
            .unwrap_or(false);
        mapper.is_visible(file, is_dir)
    }

    fn emit(&self, kind: ChangeKind, relative: &str, native_path: PathBuf) {
        self.shared.publish(ChangeEvent {
            kind,
            address: self.shared.mapper.address_for(relative),
            native_path,
            timestamp: Utc::now(),
        });
    }
}
