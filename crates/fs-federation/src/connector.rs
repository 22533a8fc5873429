//! One mounted projection: node lookups, reads, writes and the change monitor.
//!
//! Every mutating operation checks the read-only policy before it looks at
//! the disk. Extra-property capability is checked up front as well, so an
//! unsupported write never leaves a half-created node behind.


use std::fs;
use std::path::Path;

use crate::binary::{BinaryStrategy, BinaryValue};
use crate::config::ProjectionConfig;
use crate::error::{not_found_or_io, ConnectorError, Result};
use crate::monitor::{ChangeMonitor, MonitorStatus, Subscription};
use crate::node::{
    source_key, ContentNode, ContentSnapshot, FileNode, FolderNode, LogicalNode, NodeId,
    NodeProperties, NodeSnapshot, SnapshotKind,
};
use crate::pager::{ChildPage, DirectoryPager, PageToken};
use crate::path::{join_address, join_relative, native_name, split_parent, PathMapper};
use crate::properties::{content_key, content_owner, ExtraPropertyStore};
use crate::types::{
    merge_properties, to_utc, without_built_ins, ExtraProperties, Value, CONTENT_CHILD,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Folder,
    File,
}

/// Changes to apply to one node.
///
/// `kind` is only consulted when the node does not exist yet; without it a
/// write to a missing address fails with `NotFound`. Property values merge
/// into what is stored; an empty value list removes the property. Built-in
/// names are ignored.
#[derive(Debug, Clone, Default)]
pub struct WriteRequest {
    pub kind: Option<NodeKind>,
    pub properties: ExtraProperties,
    pub content_properties: ExtraProperties,
    pub data: Option<Vec<u8>>,
}

impl WriteRequest {
    pub fn folder() -> Self {
        Self {
            kind: Some(NodeKind::Folder),
            ..Self::default()
        }
    }

    pub fn file(data: impl Into<Vec<u8>>) -> Self {
        Self {
            kind: Some(NodeKind::File),
            data: Some(data.into()),
            ..Self::default()
        }
    }

    /// Updates an existing node only.
    pub fn update() -> Self {
        Self::default()
    }

    pub fn with_property(mut self, name: impl Into<String>, values: Vec<Value>) -> Self {
        self.properties.insert(name.into(), values);
        self
    }

    pub fn with_content_property(mut self, name: impl Into<String>, values: Vec<Value>) -> Self {
        self.content_properties.insert(name.into(), values);
        self
    }

    pub fn with_data(mut self, data: impl Into<Vec<u8>>) -> Self {
        self.data = Some(data.into());
        self
    }
}

/// A logical address resolved against this projection.
enum Target {
    Node(String),
    /// The `jcr:content` sub-node of the given file.
    Content(String),
}

pub struct ProjectionConnector {
    config: ProjectionConfig,
    source_key: String,
    mapper: PathMapper,
    store: ExtraPropertyStore,
    binaries: BinaryStrategy,
    pager: DirectoryPager,
    monitor: ChangeMonitor,
}

impl std::fmt::Debug for ProjectionConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProjectionConnector")
            .field("name", &self.config.name)
            .field("mount", &self.mapper.mount())
            .field("root", &self.mapper.root())
            .field("read_only", &self.config.read_only)
            .finish()
    }
}

impl ProjectionConnector {
    /// Validates the configuration and mounts the native directory.
    pub fn mount(config: ProjectionConfig) -> Result<Self> {
        config.validate()?;
        let directory = &config.directory_path;
        let inaccessible = |reason: String| {
            ConnectorError::Config(format!(
                "projection '{}': directory {} {reason}",
                config.name,
                directory.display()
            ))
        };
        let metadata = fs::metadata(directory)
            .map_err(|error| inaccessible(format!("is not accessible: {error}")))?;
        if !metadata.is_dir() {
            return Err(inaccessible("is not a directory".to_string()));
        }
        fs::read_dir(directory).map_err(|error| inaccessible(format!("is not readable: {error}")))?;

        let mapper = PathMapper::new(directory.clone(), &config.mount_address)?;
        let store =
            ExtraPropertyStore::for_kind(config.extra_properties_storage, mapper.root().to_path_buf());
        let mapper = mapper
            .with_reserved_suffixes(store.reserved_suffixes())
            .with_inclusion(config.inclusion()?)
            .with_exclusion(config.exclusion()?);
        let monitor = ChangeMonitor::new(mapper.clone(), store.clone(), config.monitor_queue_capacity);

        let connector = Self {
            source_key: source_key(&config.name),
            binaries: BinaryStrategy::new(config.binary_strategy, config.eager_checksum_threshold),
            pager: DirectoryPager::new(config.page_size),
            config,
            mapper,
            store,
            monitor,
        };
        if connector.config.monitor {
            connector.monitor.start()?;
        }
        log::info!(
            "mounted projection '{}' at {} ({}, properties: {}, binaries: {}{})",
            connector.config.name,
            connector.mapper.mount(),
            connector.mapper.root().display(),
            connector.store.kind().as_str(),
            connector.binaries.kind().as_str(),
            if connector.config.read_only { ", read-only" } else { "" }
        );
        Ok(connector)
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn mount_address(&self) -> &str {
        self.mapper.mount()
    }

    pub fn root(&self) -> &Path {
        self.mapper.root()
    }

    pub fn source_key(&self) -> &str {
        &self.source_key
    }

    pub fn is_read_only(&self) -> bool {
        self.config.read_only
    }

    pub fn config(&self) -> &ProjectionConfig {
        &self.config
    }

    /// Whether the address falls inside this projection's mount.
    pub fn contains(&self, address: &str) -> bool {
        self.mapper.relative_from_address(address).is_some()
    }

    /// Folder or file node at `address`.
    ///
    /// A file's `jcr:content` child, as listed by [`Self::children`], is part
    /// of the file node rather than a node of its own: looking it up here is
    /// `NotFound`. Use [`Self::read`] for its properties and binary.
    pub fn lookup_by_address(&self, address: &str) -> Result<LogicalNode> {
        match self.target(address)? {
            Target::Node(relative) => self.node_at(&relative),
            Target::Content(_) => Err(ConnectorError::NotFound(address.to_string())),
        }
    }

    pub fn lookup_by_id(&self, id: &NodeId) -> Result<LogicalNode> {
        if id.source_key() != self.source_key {
            return Err(ConnectorError::NotFound(id.to_string()));
        }
        self.node_at(id.relative()).map_err(|error| match error {
            ConnectorError::NotFound(_) | ConnectorError::InvalidInput(_) => {
                ConnectorError::NotFound(id.to_string())
            }
            other => other,
        })
    }

    /// One page of child names. Files have a single `jcr:content` child.
    pub fn children(&self, address: &str, token: Option<&PageToken>) -> Result<ChildPage> {
        let relative = match self.target(address)? {
            Target::Node(relative) => relative,
            Target::Content(file) => {
                self.file_at(&file, address)?;
                return Ok(ChildPage {
                    names: Vec::new(),
                    next_token: None,
                });
            }
        };
        let native = self.mapper.resolve(&relative)?;
        if native.is_dir() {
            self.pager.page(&self.mapper, &relative, token)
        } else {
            Ok(ChildPage {
                names: vec![CONTENT_CHILD.to_string()],
                next_token: None,
            })
        }
    }

    /// Properties of a node or of a file's content sub-node, with the binary handle for content.
    pub fn read(&self, address: &str) -> Result<NodeProperties> {
        match self.target(address)? {
            Target::Node(relative) => Ok(NodeProperties::from(&self.node_at(&relative)?)),
            Target::Content(file) => {
                let node = self.file_at(&file, address)?;
                Ok(NodeProperties {
                    address: self.mapper.address_for(&content_key(&file)),
                    properties: node.content.properties(),
                    content_properties: None,
                    binary: Some(node.content.binary),
                })
            }
        }
    }

    /// Creates or updates a node.
    pub fn write(&self, address: &str, request: WriteRequest) -> Result<LogicalNode> {
        self.ensure_writable("write", address)?;
        let extra = without_built_ins(&request.properties);
        let content_extra = without_built_ins(&request.content_properties);
        if !self.store.is_writable() && !(extra.is_empty() && content_extra.is_empty()) {
            return Err(self.properties_unsupported(address));
        }

        match self.target(address)? {
            Target::Content(file) => {
                let native = self.file_at(&file, address)?.native_path;
                if let Some(data) = &request.data {
                    write_bytes(&native, data)?;
                }
                let mut combined = extra;
                combined.extend(content_extra);
                self.merge_into(&content_key(&file), &combined)?;
                self.node_at(&file)
            }
            Target::Node(relative) => {
                if !extra.is_empty() {
                    let is_dir = self
                        .mapper
                        .resolve(&relative)
                        .or_else(|_| self.mapper.resolve(&strip_namespace(&relative)))
                        .map(|native| native.is_dir())
                        .unwrap_or(request.kind == Some(NodeKind::Folder));
                    self.ensure_accepts_node_properties(&relative, is_dir, address)?;
                }
                let (relative, created) = self.existing_or_created(&relative, address, &request)?;
                let native = self.mapper.native_path_for(&relative)?;
                let is_dir = native.is_dir();
                match (is_dir, request.kind) {
                    (true, Some(NodeKind::File)) | (false, Some(NodeKind::Folder)) => {
                        return Err(ConnectorError::AlreadyExists(format!(
                            "{} exists as a different kind of node",
                            self.mapper.address_for(&relative)
                        )));
                    }
                    _ => {}
                }
                if is_dir && (request.data.is_some() || !content_extra.is_empty()) {
                    return Err(ConnectorError::InvalidInput(format!(
                        "folder {} has no content",
                        self.mapper.address_for(&relative)
                    )));
                }
                if !created {
                    if let Some(data) = &request.data {
                        write_bytes(&native, data)?;
                    }
                }
                self.merge_into(&relative, &extra)?;
                if !is_dir {
                    self.merge_into(&content_key(&relative), &content_extra)?;
                }
                self.node_at(&relative)
            }
        }
    }

    /// Removes a node, its subtree and every stored property.
    pub fn remove(&self, address: &str) -> Result<()> {
        self.ensure_writable("remove", address)?;
        let relative = self.node_relative(address)?;
        if relative.is_empty() {
            return Err(ConnectorError::InvalidInput(format!(
                "projection root {address} cannot be removed"
            )));
        }
        let native = self.mapper.resolve(&relative)?;
        self.store.remove(&relative)?;
        let removed = if native.is_dir() {
            fs::remove_dir_all(&native)
        } else {
            fs::remove_file(&native)
        };
        removed.map_err(|error| not_found_or_io(&native, address, error))?;
        log::debug!("removed {address}");
        Ok(())
    }

    /// Duplicates bytes and extra properties of a subtree within this projection.
    pub fn copy(&self, source: &str, destination: &str) -> Result<LogicalNode> {
        self.ensure_writable("copy to", destination)?;
        let from = self.node_relative(source)?;
        let from_native = self.mapper.resolve(&from)?;
        let to = self.new_node_relative(destination, from_native.is_dir())?;
        ensure_not_within(&from, &to, destination)?;
        self.copy_tree(&from, &to)?;
        log::debug!("copied {source} to {destination}");
        self.node_at(&to)
    }

    /// Renames the native entry and carries its extra properties along.
    pub fn move_node(&self, source: &str, destination: &str) -> Result<LogicalNode> {
        self.ensure_writable("move", source)?;
        let from = self.node_relative(source)?;
        if from.is_empty() {
            return Err(ConnectorError::InvalidInput(format!(
                "projection root {source} cannot be moved"
            )));
        }
        let from_native = self.mapper.resolve(&from)?;
        let is_dir = from_native.is_dir();
        let to = self.new_node_relative(destination, is_dir)?;
        ensure_not_within(&from, &to, destination)?;
        if !self.store.get(&from)?.is_empty() {
            self.ensure_accepts_node_properties(&to, is_dir, destination)?;
        }
        let to_native = self.mapper.native_path_for(&to)?;
        fs::rename(&from_native, &to_native)
            .map_err(|error| not_found_or_io(&from_native, source, error))?;
        self.store.relocate(&from, &to, is_dir)?;
        log::debug!("moved {source} to {destination}");
        self.node_at(&to)
    }

    /// Copies a subtree out of the projection. Content is materialized in memory.
    pub fn export(&self, address: &str) -> Result<NodeSnapshot> {
        let relative = self.node_relative(address)?;
        let name = match split_parent(&relative).1 {
            "" => self.config.name.clone(),
            name => name.to_string(),
        };
        self.snapshot(&relative, name)
    }

    /// Writes a host subtree beneath `parent`.
    pub fn import(&self, parent: &str, snapshot: &NodeSnapshot) -> Result<LogicalNode> {
        self.ensure_writable("import into", parent)?;
        if !self.store.is_writable() && carries_properties(snapshot) {
            return Err(self.properties_unsupported(parent));
        }
        let parent_relative = self.node_relative(parent)?;
        let address = join_address(&self.mapper.address_for(&parent_relative), &snapshot.name);
        let relative = self.new_node_relative(&address, snapshot.is_folder())?;
        self.import_tree(&relative, snapshot)?;
        log::debug!("imported {address}");
        self.node_at(&relative)
    }

    pub fn start_monitor(&self) -> Result<()> {
        self.monitor.start()
    }

    pub fn stop_monitor(&self) {
        self.monitor.stop();
    }

    pub fn subscribe(&self) -> Subscription {
        self.monitor.subscribe()
    }

    pub fn monitor_status(&self) -> MonitorStatus {
        self.monitor.status()
    }

    fn target(&self, address: &str) -> Result<Target> {
        let relative = self
            .mapper
            .relative_from_address(address)
            .ok_or_else(|| ConnectorError::NotFound(address.to_string()))?;
        Ok(match content_owner(&relative) {
            Some(file) => Target::Content(file.to_string()),
            None => Target::Node(relative),
        })
    }

    fn node_relative(&self, address: &str) -> Result<String> {
        match self.target(address)? {
            Target::Node(relative) => Ok(relative),
            Target::Content(_) => Err(ConnectorError::InvalidInput(format!(
                "{address} is a content node"
            ))),
        }
    }

    fn ensure_writable(&self, operation: &'static str, address: &str) -> Result<()> {
        if self.config.read_only {
            return Err(ConnectorError::ReadOnly {
                projection: self.config.name.clone(),
                operation,
                address: address.to_string(),
            });
        }
        Ok(())
    }

    fn ensure_accepts_node_properties(&self, relative: &str, is_dir: bool, address: &str) -> Result<()> {
        if self.store.accepts_node_properties(relative, is_dir) {
            return Ok(());
        }
        Err(ConnectorError::InvalidInput(format!(
            "{address} cannot carry node properties in projection '{}' ({} storage)",
            self.config.name,
            self.store.kind().as_str()
        )))
    }

    fn properties_unsupported(&self, address: &str) -> ConnectorError {
        ConnectorError::Unsupported(format!(
            "projection '{}' does not store extra properties ({address})",
            self.config.name
        ))
    }

    fn node_at(&self, relative: &str) -> Result<LogicalNode> {
        let native = self.mapper.resolve(relative)?;
        let address = self.mapper.address_for(relative);
        let metadata = fs::metadata(&native).map_err(|error| not_found_or_io(&native, &address, error))?;
        let id = NodeId::new(&self.source_key, relative);
        let created = to_utc(metadata.created().or_else(|_| metadata.modified()));

        if metadata.is_dir() {
            return Ok(LogicalNode::Folder(FolderNode {
                id,
                address,
                native_path: native,
                created,
                properties: self.store.get(relative)?,
            }));
        }

        let binary = self.binaries.handle_for(&native)?;
        let content = ContentNode {
            last_modified: to_utc(metadata.modified()),
            binary,
            mime_type: self.mime_type_of(&native),
            properties: self.store.get(&content_key(relative))?,
        };
        Ok(LogicalNode::File(FileNode {
            id,
            address,
            native_path: native,
            created,
            properties: self.store.get(relative)?,
            content,
        }))
    }

    fn file_at(&self, relative: &str, address: &str) -> Result<FileNode> {
        match self.node_at(relative)? {
            LogicalNode::File(file) => Ok(file),
            LogicalNode::Folder(_) => Err(ConnectorError::NotFound(address.to_string())),
        }
    }

    fn mime_type_of(&self, native: &Path) -> Option<String> {
        if !self.config.add_mime_type {
            return None;
        }
        mime_guess::from_path(native)
            .first()
            .map(|mime| mime.essence_str().to_string())
    }

    /// Resolves the node a write targets, creating it if needed.
    ///
    /// A namespaced final segment (`ns:name`) maps to the native entry `name`.
    fn existing_or_created(
        &self,
        relative: &str,
        address: &str,
        request: &WriteRequest,
    ) -> Result<(String, bool)> {
        match self.mapper.resolve(relative) {
            Ok(_) => return Ok((relative.to_string(), false)),
            Err(ConnectorError::NotFound(_)) => {}
            Err(error) => return Err(error),
        }
        let stripped = strip_namespace(relative);
        if stripped != relative && self.mapper.resolve(&stripped).is_ok() {
            return Ok((stripped, false));
        }

        let kind = request
            .kind
            .ok_or_else(|| ConnectorError::NotFound(address.to_string()))?;
        let created = self.new_node_relative(address, kind == NodeKind::Folder)?;
        let native = self.mapper.native_path_for(&created)?;
        let result = match kind {
            NodeKind::Folder => fs::create_dir(&native),
            NodeKind::File => fs::write(&native, request.data.as_deref().unwrap_or_default()),
        };
        result.map_err(|error| ConnectorError::io(&native, error))?;
        log::debug!("created {:?} {}", kind, self.mapper.address_for(&created));
        Ok((created, true))
    }

    /// Relative path for a node about to be created at `address`.
    fn new_node_relative(&self, address: &str, is_dir: bool) -> Result<String> {
        let relative = self.node_relative(address)?;
        if relative.is_empty() {
            return Err(ConnectorError::AlreadyExists(address.to_string()));
        }
        let (parent, _) = split_parent(&relative);
        let parent_native = self.mapper.resolve(parent)?;
        if !parent_native.is_dir() {
            return Err(ConnectorError::InvalidInput(format!(
                "parent of {address} is not a folder"
            )));
        }
        let created = strip_namespace(&relative);
        let (_, name) = split_parent(&created);
        if self.mapper.is_reserved_name(name) || !self.mapper.is_visible(&created, is_dir) {
            return Err(ConnectorError::InvalidInput(format!(
                "{address} would not be visible in projection '{}'",
                self.config.name
            )));
        }
        if self.mapper.native_path_for(&created)?.symlink_metadata().is_ok() {
            return Err(ConnectorError::AlreadyExists(
                self.mapper.address_for(&created),
            ));
        }
        Ok(created)
    }

    fn merge_into(&self, owner: &str, update: &ExtraProperties) -> Result<()> {
        if update.is_empty() {
            return Ok(());
        }
        let mut current = self.store.get(owner)?;
        merge_properties(&mut current, update);
        self.store.set(owner, &current)
    }

    fn copy_properties(&self, from: &str, to: &str) -> Result<()> {
        let properties = self.store.get(from)?;
        if properties.is_empty() {
            return Ok(());
        }
        self.store.set(to, &properties)
    }

    fn copy_tree(&self, from: &str, to: &str) -> Result<()> {
        let source = self.mapper.resolve(from)?;
        let target = self.mapper.native_path_for(to)?;
        if source.is_dir() {
            fs::create_dir(&target).map_err(|error| ConnectorError::io(&target, error))?;
            self.copy_properties(from, to)?;
            for name in self.pager.children(&self.mapper, from)? {
                self.copy_tree(&join_relative(from, &name), &join_relative(to, &name))?;
            }
        } else {
            fs::copy(&source, &target).map_err(|error| ConnectorError::io(&source, error))?;
            self.copy_properties(from, to)?;
            self.copy_properties(&content_key(from), &content_key(to))?;
        }
        Ok(())
    }

    fn snapshot(&self, relative: &str, name: String) -> Result<NodeSnapshot> {
        match self.node_at(relative)? {
            LogicalNode::Folder(folder) => {
                let children = self
                    .pager
                    .children(&self.mapper, relative)?
                    .into_iter()
                    .map(|child| self.snapshot(&join_relative(relative, &child), child))
                    .collect::<Result<Vec<_>>>()?;
                Ok(NodeSnapshot {
                    name,
                    properties: folder.properties,
                    kind: SnapshotKind::Folder { children },
                })
            }
            LogicalNode::File(file) => {
                let data = BinaryValue::External(file.content.binary).into_internal()?;
                Ok(NodeSnapshot {
                    name,
                    properties: file.properties,
                    kind: SnapshotKind::File {
                        content: ContentSnapshot {
                            data,
                            mime_type: file.content.mime_type,
                            properties: file.content.properties,
                        },
                    },
                })
            }
        }
    }

    fn import_tree(&self, relative: &str, snapshot: &NodeSnapshot) -> Result<()> {
        if !without_built_ins(&snapshot.properties).is_empty() {
            let address = self.mapper.address_for(relative);
            self.ensure_accepts_node_properties(relative, snapshot.is_folder(), &address)?;
        }
        let native = self.mapper.native_path_for(relative)?;
        match &snapshot.kind {
            SnapshotKind::Folder { children } => {
                fs::create_dir(&native).map_err(|error| ConnectorError::io(&native, error))?;
                self.set_extra(relative, &snapshot.properties)?;
                for child in children {
                    let name = native_name(&child.name);
                    if name.is_empty() || self.mapper.is_reserved_name(name) {
                        return Err(ConnectorError::InvalidInput(format!(
                            "cannot import a node named '{}'",
                            child.name
                        )));
                    }
                    self.import_tree(&join_relative(relative, name), child)?;
                }
            }
            SnapshotKind::File { content } => {
                write_bytes(&native, &content.data.read_all()?)?;
                self.set_extra(relative, &snapshot.properties)?;
                self.set_extra(&content_key(relative), &content.properties)?;
            }
        }
        Ok(())
    }

    fn set_extra(&self, owner: &str, properties: &ExtraProperties) -> Result<()> {
        let properties = without_built_ins(properties);
        if properties.is_empty() {
            return Ok(());
        }
        self.store.set(owner, &properties)
    }
}

fn write_bytes(native: &Path, data: &[u8]) -> Result<()> {
    fs::write(native, data).map_err(|error| ConnectorError::io(native, error))
}

fn strip_namespace(relative: &str) -> String {
    let (parent, name) = split_parent(relative);
    join_relative(parent, native_name(name))
}

fn ensure_not_within(from: &str, to: &str, destination: &str) -> Result<()> {
    let nested = from.is_empty()
        || to == from
        || to
            .strip_prefix(from)
            .is_some_and(|rest| rest.starts_with('/'));
    if nested {
        return Err(ConnectorError::InvalidInput(format!(
            "{destination} lies inside the node being copied or moved"
        )));
    }
    Ok(())
}

fn carries_properties(snapshot: &NodeSnapshot) -> bool {
    if !without_built_ins(&snapshot.properties).is_empty() {
        return true;
    }
    match &snapshot.kind {
        SnapshotKind::Folder { children } => children.iter().any(carries_properties),
        SnapshotKind::File { content } => !without_built_ins(&content.properties).is_empty(),
    }
}
