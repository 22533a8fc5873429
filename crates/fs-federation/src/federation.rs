//! Several projections mounted side by side.
//!
//! Addresses route to the projection with the longest mount prefix that
//! contains them; identifiers route by their source key. Copies and moves
//! between projections go through a host snapshot.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::config::{FederationConfig, ProjectionConfig};
use crate::connector::{ProjectionConnector, WriteRequest};
use crate::error::{ConnectorError, Result};
use crate::monitor::{MonitorStatus, Subscription};
use crate::node::{source_key, LogicalNode, NodeId, NodeProperties, NodeSnapshot};
use crate::pager::{ChildPage, PageToken};
use crate::path::{normalize_address, split_parent};

#[derive(Debug, Default)]
pub struct Federation {
    projections: RwLock<Vec<Arc<ProjectionConnector>>>,
}

impl Federation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mounts every configured projection; fails on the first error.
    pub fn from_config(config: &FederationConfig) -> Result<Self> {
        config.validate()?;
        let federation = Self::new();
        for projection in &config.projections {
            federation.mount(projection.clone())?;
        }
        Ok(federation)
    }

    pub fn mount(&self, config: ProjectionConfig) -> Result<Arc<ProjectionConnector>> {
        let mut projections = self.projections.write();
        let mount = normalize_address(&config.mount_address)?;
        let key = source_key(&config.name);
        for existing in projections.iter() {
            if existing.name() == config.name {
                return Err(ConnectorError::Config(format!(
                    "projection '{}' is already mounted",
                    config.name
                )));
            }
            if existing.mount_address() == mount {
                return Err(ConnectorError::Config(format!(
                    "mount address {mount} is already owned by projection '{}'",
                    existing.name()
                )));
            }
            if existing.source_key() == key {
                return Err(ConnectorError::Config(format!(
                    "projections '{}' and '{}' share source key {key}",
                    existing.name(),
                    config.name
                )));
            }
        }
        let connector = Arc::new(ProjectionConnector::mount(config)?);
        projections.push(Arc::clone(&connector));
        Ok(connector)
    }

    /// Removes a projection and stops its monitor. Files on disk are untouched.
    pub fn unmount(&self, name: &str) -> Result<()> {
        let mut projections = self.projections.write();
        let index = projections
            .iter()
            .position(|projection| projection.name() == name)
            .ok_or_else(|| ConnectorError::NotFound(format!("projection '{name}'")))?;
        let connector = projections.remove(index);
        connector.stop_monitor();
        log::info!("unmounted projection '{name}'");
        Ok(())
    }

    pub fn projection(&self, name: &str) -> Option<Arc<ProjectionConnector>> {
        self.projections
            .read()
            .iter()
            .find(|projection| projection.name() == name)
            .cloned()
    }

    pub fn projections(&self) -> Vec<Arc<ProjectionConnector>> {
        self.projections.read().clone()
    }

    /// The projection owning `address`.
    pub fn route(&self, address: &str) -> Result<Arc<ProjectionConnector>> {
        self.projections
            .read()
            .iter()
            .filter(|projection| projection.contains(address))
            .max_by_key(|projection| projection.mount_address().len())
            .cloned()
            .ok_or_else(|| ConnectorError::NotFound(address.to_string()))
    }

    fn route_id(&self, id: &NodeId) -> Result<Arc<ProjectionConnector>> {
        self.projections
            .read()
            .iter()
            .find(|projection| projection.source_key() == id.source_key())
            .cloned()
            .ok_or_else(|| ConnectorError::NotFound(id.to_string()))
    }

    pub fn lookup_by_address(&self, address: &str) -> Result<LogicalNode> {
        self.route(address)?.lookup_by_address(address)
    }

    pub fn lookup_by_id(&self, id: &NodeId) -> Result<LogicalNode> {
        self.route_id(id)?.lookup_by_id(id)
    }

    pub fn children(&self, address: &str, token: Option<&PageToken>) -> Result<ChildPage> {
        self.route(address)?.children(address, token)
    }

    pub fn read(&self, address: &str) -> Result<NodeProperties> {
        self.route(address)?.read(address)
    }

    pub fn write(&self, address: &str, request: WriteRequest) -> Result<LogicalNode> {
        self.route(address)?.write(address, request)
    }

    pub fn remove(&self, address: &str) -> Result<()> {
        self.route(address)?.remove(address)
    }

    /// Copies a node to `destination`, possibly in another projection.
    pub fn copy(&self, source: &str, destination: &str) -> Result<LogicalNode> {
        let from = self.route(source)?;
        let to = self.route(destination)?;
        if Arc::ptr_eq(&from, &to) {
            return from.copy(source, destination);
        }
        let (parent, name) = destination_parts(destination)?;
        let mut snapshot = from.export(source)?;
        snapshot.name = name;
        to.import(&parent, &snapshot)
    }

    /// Moves a node. Within one projection this is a native rename; across
    /// projections it copies and then removes the source.
    pub fn move_node(&self, source: &str, destination: &str) -> Result<LogicalNode> {
        let from = self.route(source)?;
        let to = self.route(destination)?;
        if Arc::ptr_eq(&from, &to) {
            return from.move_node(source, destination);
        }
        if from.is_read_only() {
            return Err(ConnectorError::ReadOnly {
                projection: from.name().to_string(),
                operation: "move",
                address: source.to_string(),
            });
        }
        if normalize_address(source)? == from.mount_address() {
            return Err(ConnectorError::InvalidInput(format!(
                "projection root {source} cannot be moved"
            )));
        }
        let moved = self.copy(source, destination)?;
        from.remove(source)?;
        log::debug!("moved {source} to {destination} across projections");
        Ok(moved)
    }

    /// Exports a subtree into host memory. Binary content is not tagged external.
    pub fn copy_to_host(&self, address: &str) -> Result<NodeSnapshot> {
        self.route(address)?.export(address)
    }

    /// Writes a host subtree beneath `parent`.
    pub fn copy_from_host(&self, parent: &str, snapshot: &NodeSnapshot) -> Result<LogicalNode> {
        self.route(parent)?.import(parent, snapshot)
    }

    /// Starts every projection's monitor. All are attempted; the first error is returned.
    pub fn start_monitors(&self) -> Result<()> {
        let mut first_error = None;
        for projection in self.projections() {
            if let Err(error) = projection.start_monitor() {
                log::warn!(
                    "failed to start monitor for projection '{}': {error}",
                    projection.name()
                );
                first_error.get_or_insert(error);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    pub fn stop_monitors(&self) {
        for projection in self.projections() {
            projection.stop_monitor();
        }
    }

    pub fn subscribe(&self, name: &str) -> Result<Subscription> {
        self.named(name).map(|projection| projection.subscribe())
    }

    pub fn monitor_status(&self, name: &str) -> Result<MonitorStatus> {
        self.named(name).map(|projection| projection.monitor_status())
    }

    fn named(&self, name: &str) -> Result<Arc<ProjectionConnector>> {
        self.projection(name)
            .ok_or_else(|| ConnectorError::NotFound(format!("projection '{name}'")))
    }
}

/// Parent address and final name of a destination address.
fn destination_parts(destination: &str) -> Result<(String, String)> {
    let normalized = normalize_address(destination)?;
    match split_parent(&normalized) {
        (_, "") => Err(ConnectorError::InvalidInput(format!(
            "{destination} cannot be a copy destination"
        ))),
        ("", name) => Ok(("/".to_string(), name.to_string())),
        (parent, name) => Ok((parent.to_string(), name.to_string())),
    }
}
