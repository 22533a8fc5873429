//! Node views derived on demand from native entries, plus the host transfer format.

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::binary::{BinaryHandle, BinaryValue};
use crate::error::{ConnectorError, Result};
use crate::types::{
    ExtraProperties, Value, CREATED_PROPERTY, LAST_MODIFIED_PROPERTY, MIME_TYPE_PROPERTY,
};

/// Hex characters of the projection-name digest used as an identifier prefix.
pub const SOURCE_KEY_LEN: usize = 7;

/// Identifier prefix shared by every node of the named projection.
pub fn source_key(projection_name: &str) -> String {
    let digest = hex::encode(Sha256::digest(projection_name.as_bytes()));
    digest[..SOURCE_KEY_LEN].to_string()
}

/// Stable node identifier: `<source key>` for the root, `<source key>/<relative path>` otherwise.
///
/// Derived only from the projection name and the relative path, so it survives restarts.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NodeId(String);

impl NodeId {
    pub fn new(source_key: &str, relative: &str) -> Self {
        if relative.is_empty() {
            Self(source_key.to_string())
        } else {
            Self(format!("{source_key}/{relative}"))
        }
    }

    pub fn parse(raw: &str) -> Result<Self> {
        let valid_key = raw.len() >= SOURCE_KEY_LEN
            && raw.is_char_boundary(SOURCE_KEY_LEN)
            && raw[..SOURCE_KEY_LEN]
                .bytes()
                .all(|byte| byte.is_ascii_hexdigit());
        let rest = raw.get(SOURCE_KEY_LEN..).unwrap_or_default();
        if !valid_key || !(rest.is_empty() || rest.starts_with('/')) {
            return Err(ConnectorError::InvalidInput(format!(
                "malformed node identifier '{raw}'"
            )));
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn source_key(&self) -> &str {
        self.0.get(..SOURCE_KEY_LEN).unwrap_or_default()
    }

    /// Relative path within the owning projection; empty for the root.
    pub fn relative(&self) -> &str {
        self.0
            .get(SOURCE_KEY_LEN..)
            .map(|rest| rest.trim_start_matches('/'))
            .unwrap_or_default()
    }
}

impl TryFrom<String> for NodeId {
    type Error = ConnectorError;

    fn try_from(raw: String) -> Result<Self> {
        Self::parse(&raw)
    }
}

impl From<NodeId> for String {
    fn from(id: NodeId) -> Self {
        id.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone)]
pub struct FolderNode {
    pub id: NodeId,
    pub address: String,
    pub native_path: PathBuf,
    pub created: DateTime<Utc>,
    pub properties: ExtraProperties,
}

/// The `jcr:content` sub-node of a file.
#[derive(Debug, Clone)]
pub struct ContentNode {
    pub last_modified: DateTime<Utc>,
    pub binary: BinaryHandle,
    pub mime_type: Option<String>,
    pub properties: ExtraProperties,
}

#[derive(Debug, Clone)]
pub struct FileNode {
    pub id: NodeId,
    pub address: String,
    pub native_path: PathBuf,
    pub created: DateTime<Utc>,
    pub properties: ExtraProperties,
    pub content: ContentNode,
}

#[derive(Debug, Clone)]
pub enum LogicalNode {
    Folder(FolderNode),
    File(FileNode),
}

impl LogicalNode {
    pub fn id(&self) -> &NodeId {
        match self {
            Self::Folder(node) => &node.id,
            Self::File(node) => &node.id,
        }
    }

    pub fn address(&self) -> &str {
        match self {
            Self::Folder(node) => &node.address,
            Self::File(node) => &node.address,
        }
    }

    pub fn native_path(&self) -> &Path {
        match self {
            Self::Folder(node) => &node.native_path,
            Self::File(node) => &node.native_path,
        }
    }

    pub fn created(&self) -> DateTime<Utc> {
        match self {
            Self::Folder(node) => node.created,
            Self::File(node) => node.created,
        }
    }

    pub fn is_folder(&self) -> bool {
        matches!(self, Self::Folder(_))
    }

    /// Extra properties stored for the node itself.
    pub fn extra_properties(&self) -> &ExtraProperties {
        match self {
            Self::Folder(node) => &node.properties,
            Self::File(node) => &node.properties,
        }
    }

    pub fn content(&self) -> Option<&ContentNode> {
        match self {
            Self::Folder(_) => None,
            Self::File(node) => Some(&node.content),
        }
    }

    /// Node properties including the built-in `jcr:created`.
    pub fn properties(&self) -> ExtraProperties {
        let mut properties = self.extra_properties().clone();
        properties.insert(CREATED_PROPERTY.to_string(), vec![Value::Date(self.created())]);
        properties
    }
}

impl ContentNode {
    /// Content properties including the built-ins other than `jcr:data`.
    pub fn properties(&self) -> ExtraProperties {
        let mut properties = self.properties.clone();
        properties.insert(
            LAST_MODIFIED_PROPERTY.to_string(),
            vec![Value::Date(self.last_modified)],
        );
        if let Some(mime_type) = &self.mime_type {
            properties.insert(
                MIME_TYPE_PROPERTY.to_string(),
                vec![Value::String(mime_type.clone())],
            );
        }
        properties
    }
}

/// What `read` hands back: properties plus, for files, the binary handle.
#[derive(Debug, Clone)]
pub struct NodeProperties {
    pub address: String,
    pub properties: ExtraProperties,
    pub content_properties: Option<ExtraProperties>,
    pub binary: Option<BinaryHandle>,
}

impl From<&LogicalNode> for NodeProperties {
    fn from(node: &LogicalNode) -> Self {
        Self {
            address: node.address().to_string(),
            properties: node.properties(),
            content_properties: node.content().map(ContentNode::properties),
            binary: node.content().map(|content| content.binary.clone()),
        }
    }
}

/// Host-neutral copy of a subtree, used to move nodes into and out of a projection.
#[derive(Debug, Clone)]
pub struct NodeSnapshot {
    pub name: String,
    pub properties: ExtraProperties,
    pub kind: SnapshotKind,
}

#[derive(Debug, Clone)]
pub enum SnapshotKind {
    Folder { children: Vec<NodeSnapshot> },
    File { content: ContentSnapshot },
}

#[derive(Debug, Clone)]
pub struct ContentSnapshot {
    pub data: BinaryValue,
    pub mime_type: Option<String>,
    pub properties: ExtraProperties,
}

impl NodeSnapshot {
    pub fn folder(name: impl Into<String>, children: Vec<NodeSnapshot>) -> Self {
        Self {
            name: name.into(),
            properties: ExtraProperties::new(),
            kind: SnapshotKind::Folder { children },
        }
    }

    pub fn file(name: impl Into<String>, data: BinaryValue) -> Self {
        Self {
            name: name.into(),
            properties: ExtraProperties::new(),
            kind: SnapshotKind::File {
                content: ContentSnapshot {
                    data,
                    mime_type: None,
                    properties: ExtraProperties::new(),
                },
            },
        }
    }

    pub fn with_properties(mut self, properties: ExtraProperties) -> Self {
        self.properties = properties;
        self
    }

    pub fn is_folder(&self) -> bool {
        matches!(self.kind, SnapshotKind::Folder { .. })
    }

    pub fn content(&self) -> Option<&ContentSnapshot> {
        match &self.kind {
            SnapshotKind::File { content } => Some(content),
            SnapshotKind::Folder { .. } => None,
        }
    }

    pub fn children(&self) -> &[NodeSnapshot] {
        match &self.kind {
            SnapshotKind::Folder { children } => children,
            SnapshotKind::File { .. } => &[],
        }
    }

    pub fn child(&self, name: &str) -> Option<&NodeSnapshot> {
        self.children().iter().find(|child| child.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifiers_are_deterministic_per_projection() {
        let key = source_key("store");
        assert_eq!(key.len(), SOURCE_KEY_LEN);
        assert_eq!(key, source_key("store"));
        assert_ne!(key, source_key("json"));

        let id = NodeId::new(&key, "dir3/simple.json");
        assert_eq!(id, NodeId::new(&source_key("store"), "dir3/simple.json"));
        assert_eq!(id.source_key(), key);
        assert_eq!(id.relative(), "dir3/simple.json");
    }

    #[test]
    fn root_identifier_is_the_source_key() {
        let key = source_key("readonly");
        let root = NodeId::new(&key, "");
        assert_eq!(root.as_str(), key);
        assert_eq!(root.relative(), "");
        assert_eq!(NodeId::parse(root.as_str()).expect("parse"), root);
    }

    #[test]
    fn malformed_identifiers_are_rejected() {
        assert!(NodeId::parse("xyz").is_err());
        assert!(NodeId::parse("zzzzzzz/a").is_err());
        assert!(NodeId::parse("abcdef0a").is_err());
        assert!(NodeId::parse("abcdef0/a/b").is_ok());
    }

    #[test]
    fn deserialization_validates_identifiers() {
        let id: NodeId = serde_json::from_str("\"abcdef0/dir3\"").expect("well formed");
        assert_eq!(id.source_key(), "abcdef0");
        assert_eq!(serde_json::to_string(&id).expect("serialize"), "\"abcdef0/dir3\"");

        for raw in ["\"abcdef\u{e9}x\"", "\"abc\"", "\"abcdefgh\""] {
            assert!(serde_json::from_str::<NodeId>(raw).is_err(), "{raw}");
        }
    }
}
