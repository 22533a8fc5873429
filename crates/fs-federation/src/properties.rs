//! Extra properties: metadata that cannot be expressed as file bytes.
//!
//! The strategy is chosen per projection:
//! - `none` rejects every non-empty write
//! - `store` keeps properties in a host-owned table
//! - `json` and `legacy` keep them in sidecar files next to the owner
//!
//! Owners are keyed by relative path; a file's content sub-node is keyed as
//! `<file>/jcr:content`.

mod json;
mod legacy;
mod memory;
mod sidecar;

pub use memory::MemoryPropertyStore;
pub use sidecar::{SidecarFormat, SidecarStore};

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{ConnectorError, Result};
use crate::types::{ExtraProperties, CONTENT_CHILD};

/// Suffix of in-flight sidecar temp files. Reserved for every strategy.
pub const SIDECAR_TEMP_SUFFIX: &str = ".modeshape.tmp";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtraPropertiesKind {
    None,
    Store,
    #[default]
    Json,
    Legacy,
}

impl ExtraPropertiesKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Store => "store",
            Self::Json => "json",
            Self::Legacy => "legacy",
        }
    }
}

#[derive(Debug, Clone)]
pub enum ExtraPropertyStore {
    None,
    Store(MemoryPropertyStore),
    Sidecar(SidecarStore),
}

impl ExtraPropertyStore {
    pub fn for_kind(kind: ExtraPropertiesKind, root: PathBuf) -> Self {
        match kind {
            ExtraPropertiesKind::None => Self::None,
            ExtraPropertiesKind::Store => Self::Store(MemoryPropertyStore::new()),
            ExtraPropertiesKind::Json => {
                Self::Sidecar(SidecarStore::new(root, SidecarFormat::Json))
            }
            ExtraPropertiesKind::Legacy => {
                Self::Sidecar(SidecarStore::new(root, SidecarFormat::Legacy))
            }
        }
    }

    pub fn kind(&self) -> ExtraPropertiesKind {
        match self {
            Self::None => ExtraPropertiesKind::None,
            Self::Store(_) => ExtraPropertiesKind::Store,
            Self::Sidecar(store) => match store.format() {
                SidecarFormat::Json => ExtraPropertiesKind::Json,
                SidecarFormat::Legacy => ExtraPropertiesKind::Legacy,
            },
        }
    }

    /// Whether non-empty writes are accepted.
    pub fn is_writable(&self) -> bool {
        !matches!(self, Self::None)
    }

    pub fn get(&self, owner: &str) -> Result<ExtraProperties> {
        match self {
            Self::None => Ok(ExtraProperties::new()),
            Self::Store(store) => Ok(store.get(owner)),
            Self::Sidecar(store) => store.get(owner),
        }
    }

    /// Replaces the owner's properties. An empty mapping clears them.
    pub fn set(&self, owner: &str, properties: &ExtraProperties) -> Result<()> {
        match self {
            Self::None if properties.is_empty() => Ok(()),
            Self::None => Err(ConnectorError::Unsupported(format!(
                "extra properties cannot be stored for '{owner}' (storage is 'none')"
            ))),
            Self::Store(store) => {
                store.set(owner, properties);
                Ok(())
            }
            Self::Sidecar(store) => store.set(owner, properties),
        }
    }

    /// Drops everything stored for the owner. Call before the native entry goes away.
    pub fn remove(&self, owner: &str) -> Result<()> {
        match self {
            Self::None => Ok(()),
            Self::Store(store) => {
                store.remove(owner);
                Ok(())
            }
            Self::Sidecar(store) => store.remove(owner),
        }
    }

    /// Follows a native rename of the owner. Call after the native entry moved.
    pub fn relocate(&self, from: &str, to: &str, is_dir: bool) -> Result<()> {
        match self {
            Self::None => Ok(()),
            Self::Store(store) => {
                store.relocate(from, to);
                Ok(())
            }
            Self::Sidecar(store) => store.relocate(from, to, is_dir),
        }
    }

    /// File-name suffixes that must never surface as nodes.
    pub fn reserved_suffixes(&self) -> &'static [&'static str] {
        match self {
            Self::Sidecar(store) => store.format().reserved_suffixes(),
            Self::None | Self::Store(_) => &[SIDECAR_TEMP_SUFFIX],
        }
    }

    /// Whether node-level properties of `owner` have a place to live.
    pub fn accepts_node_properties(&self, owner: &str, is_dir: bool) -> bool {
        match self {
            Self::Sidecar(store) => store.accepts_node_properties(owner, is_dir),
            Self::None | Self::Store(_) => true,
        }
    }

    /// Owner key for a relative path naming one of this store's files.
    pub fn owner_of_sidecar(&self, relative: &str) -> Option<String> {
        match self {
            Self::Sidecar(store) => store.owner_of(relative),
            Self::None | Self::Store(_) => None,
        }
    }
}

/// Owner key of a file's content sub-node.
pub fn content_key(file: &str) -> String {
    if file.is_empty() {
        CONTENT_CHILD.to_string()
    } else {
        format!("{file}/{CONTENT_CHILD}")
    }
}

/// The file part of a content sub-node key.
pub fn content_owner(owner: &str) -> Option<&str> {
    if owner == CONTENT_CHILD {
        return Some("");
    }
    owner
        .strip_suffix(CONTENT_CHILD)
        .and_then(|rest| rest.strip_suffix('/'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Value;
    use std::fs;
    use tempfile::tempdir;

    fn props() -> ExtraProperties {
        let mut properties = ExtraProperties::new();
        properties.insert("extraProp".into(), vec![Value::from("extraValue")]);
        properties
    }

    #[test]
    fn none_strategy_rejects_writes() {
        let dir = tempdir().expect("tempdir");
        let store = ExtraPropertyStore::for_kind(ExtraPropertiesKind::None, dir.path().into());
        let error = store.set("a.txt", &props()).expect_err("unsupported");
        assert!(matches!(error, ConnectorError::Unsupported(_)));
        assert!(store.set("a.txt", &ExtraProperties::new()).is_ok());
        assert!(store.get("a.txt").expect("get").is_empty());
    }

    #[test]
    fn store_strategy_writes_nothing_to_disk() {
        let dir = tempdir().expect("tempdir");
        fs::write(dir.path().join("a.txt"), "a").expect("write");
        let store = ExtraPropertyStore::for_kind(ExtraPropertiesKind::Store, dir.path().into());
        store.set("a.txt", &props()).expect("set");
        assert_eq!(store.get("a.txt").expect("get"), props());
        assert_eq!(fs::read_dir(dir.path()).expect("read_dir").count(), 1);
    }

    #[test]
    fn each_kind_reports_itself() {
        let dir = tempdir().expect("tempdir");
        for kind in [
            ExtraPropertiesKind::None,
            ExtraPropertiesKind::Store,
            ExtraPropertiesKind::Json,
            ExtraPropertiesKind::Legacy,
        ] {
            let store = ExtraPropertyStore::for_kind(kind, dir.path().into());
            assert_eq!(store.kind(), kind);
            assert!(store.reserved_suffixes().contains(&SIDECAR_TEMP_SUFFIX));
        }
    }

    #[test]
    fn content_keys_split_back_to_files() {
        assert_eq!(content_key("dir3/simple.json"), "dir3/simple.json/jcr:content");
        assert_eq!(content_owner("dir3/simple.json/jcr:content"), Some("dir3/simple.json"));
        assert_eq!(content_owner("dir3/simple.json"), None);
        assert_eq!(content_owner("dir3/xjcr:content"), None);
    }

    #[test]
    fn kinds_deserialize_from_lowercase() {
        let kind: ExtraPropertiesKind = serde_json::from_str("\"legacy\"").expect("kind");
        assert_eq!(kind, ExtraPropertiesKind::Legacy);
    }
}
