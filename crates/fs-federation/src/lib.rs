//! Filesystem federation library.
//!
//! Projects native directory trees into a logical node hierarchy:
//! - Path mapping with inclusion/exclusion filters
//! - Extra properties kept in sidecar files or an in-process store
//! - Binary content handles with cached SHA-256 checksums
//! - Deterministic, token-based paging of directory children
//! - Change monitoring with dynamic per-directory watches
//! - Several projections routed through one federation

pub mod binary;
pub mod config;
pub mod connector;
pub mod error;
pub mod federation;
pub mod monitor;
pub mod node;
pub mod pager;
pub mod path;
pub mod properties;
pub mod types;

// Re-export main types
pub use binary::{BinaryHandle, BinaryStrategy, BinaryStrategyKind, BinaryValue, InternalBinary};
pub use config::{FederationConfig, ProjectionConfig};
pub use connector::{NodeKind, ProjectionConnector, WriteRequest};
pub use error::{ConnectorError, ErrorKind, Result};
pub use federation::Federation;
pub use monitor::{ChangeEvent, ChangeKind, ChangeMonitor, MonitorState, MonitorStatus, Subscription};
pub use node::{LogicalNode, NodeId, NodeProperties, NodeSnapshot};
pub use pager::{ChildPage, DirectoryPager, PageToken};
pub use path::{PathFilter, PathMapper};
pub use properties::{ExtraPropertiesKind, ExtraPropertyStore};
pub use types::{ExtraProperties, Value};
