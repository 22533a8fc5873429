//! Host-owned property table; nothing is written next to the native files.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::types::ExtraProperties;

#[derive(Debug, Clone, Default)]
pub struct MemoryPropertyStore {
    entries: Arc<RwLock<HashMap<String, ExtraProperties>>>,
}

impl MemoryPropertyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, owner: &str) -> ExtraProperties {
        self.entries.read().get(owner).cloned().unwrap_or_default()
    }

    pub fn set(&self, owner: &str, properties: &ExtraProperties) {
        let mut entries = self.entries.write();
        if properties.is_empty() {
            entries.remove(owner);
        } else {
            entries.insert(owner.to_string(), properties.clone());
        }
    }

    /// Removes the owner and every key beneath it.
    pub fn remove(&self, owner: &str) {
        self.entries
            .write()
            .retain(|key, _| !is_same_or_descendant(key, owner));
    }

    /// Re-keys the owner and every key beneath it.
    pub fn relocate(&self, from: &str, to: &str) {
        let mut entries = self.entries.write();
        let moved: Vec<String> = entries
            .keys()
            .filter(|key| is_same_or_descendant(key, from))
            .cloned()
            .collect();
        for key in moved {
            if let Some(properties) = entries.remove(&key) {
                let suffix = &key[from.len()..];
                entries.insert(format!("{to}{suffix}"), properties);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

fn is_same_or_descendant(key: &str, owner: &str) -> bool {
    if owner.is_empty() {
        return true;
    }
    key == owner
        || key
            .strip_prefix(owner)
            .is_some_and(|rest| rest.starts_with('/'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Value;

    fn props(value: &str) -> ExtraProperties {
        let mut properties = ExtraProperties::new();
        properties.insert("k".into(), vec![Value::from(value)]);
        properties
    }

    #[test]
    fn removal_covers_descendants_only() {
        let store = MemoryPropertyStore::new();
        store.set("dir3", &props("a"));
        store.set("dir3/simple.json", &props("b"));
        store.set("dir3/simple.json/jcr:content", &props("c"));
        store.set("dir30", &props("d"));

        store.remove("dir3");
        assert_eq!(store.len(), 1);
        assert_eq!(store.get("dir30"), props("d"));
    }

    #[test]
    fn relocation_rekeys_the_subtree() {
        let store = MemoryPropertyStore::new();
        store.set("dir3", &props("a"));
        store.set("dir3/simple.json", &props("b"));
        store.relocate("dir3", "dir4");
        assert!(store.get("dir3").is_empty());
        assert_eq!(store.get("dir4"), props("a"));
        assert_eq!(store.get("dir4/simple.json"), props("b"));
    }
}
