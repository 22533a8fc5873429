//! Sidecar files holding extra properties next to their owner.
//!
//! A file owner `a/b.txt` keeps node properties in `a/b.txt<ext>` and content
//! properties in `a/b.txt<content ext>`. A folder owner keeps them inside
//! itself, in a file named exactly `<ext>`. Every update goes through a temp
//! file in the same directory followed by a rename.

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use super::{content_owner, json, legacy, SIDECAR_TEMP_SUFFIX};
use crate::error::{ConnectorError, Result};
use crate::path::{join_relative, split_parent, split_relative};
use crate::types::{ExtraProperties, CONTENT_CHILD};

/// On-disk encoding of a sidecar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SidecarFormat {
    Json,
    Legacy,
}

impl SidecarFormat {
    pub fn extension(self) -> &'static str {
        match self {
            Self::Json => json::JSON_EXTENSION,
            Self::Legacy => legacy::LEGACY_EXTENSION,
        }
    }

    pub fn content_extension(self) -> &'static str {
        match self {
            Self::Json => json::JSON_CONTENT_EXTENSION,
            Self::Legacy => legacy::LEGACY_CONTENT_EXTENSION,
        }
    }

    pub fn reserved_suffixes(self) -> &'static [&'static str] {
        match self {
            Self::Json => &[
                json::JSON_EXTENSION,
                json::JSON_CONTENT_EXTENSION,
                SIDECAR_TEMP_SUFFIX,
            ],
            Self::Legacy => &[
                legacy::LEGACY_EXTENSION,
                legacy::LEGACY_CONTENT_EXTENSION,
                SIDECAR_TEMP_SUFFIX,
            ],
        }
    }

    fn encode(self, properties: &ExtraProperties) -> Result<Vec<u8>> {
        match self {
            Self::Json => json::encode(properties),
            Self::Legacy => legacy::encode(properties),
        }
    }

    fn decode(self, bytes: &[u8]) -> Result<ExtraProperties> {
        match self {
            Self::Json => json::decode(bytes),
            Self::Legacy => legacy::decode(bytes),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SidecarStore {
    root: PathBuf,
    format: SidecarFormat,
}

impl SidecarStore {
    pub fn new(root: PathBuf, format: SidecarFormat) -> Self {
        Self { root, format }
    }

    pub fn format(&self) -> SidecarFormat {
        self.format
    }

    pub fn get(&self, owner: &str) -> Result<ExtraProperties> {
        if self.is_shadowed(owner, self.native(owner)?.is_dir()) {
            return Ok(ExtraProperties::new());
        }
        let path = self.sidecar_path(owner)?;
        match fs::read(&path) {
            Ok(bytes) => self.format.decode(&bytes),
            Err(error) if error.kind() == ErrorKind::NotFound => Ok(ExtraProperties::new()),
            Err(error) => Err(ConnectorError::io(path, error)),
        }
    }

    pub fn set(&self, owner: &str, properties: &ExtraProperties) -> Result<()> {
        let owner_path = self.owner_path(owner)?;
        if !owner_path.exists() {
            return Err(ConnectorError::NotFound(owner.to_string()));
        }
        if self.is_shadowed(owner, owner_path.is_dir()) {
            if properties.is_empty() {
                return Ok(());
            }
            return Err(self.shadowed_error(owner));
        }
        let path = self.sidecar_path(owner)?;
        if properties.is_empty() {
            return remove_if_present(&path);
        }
        let bytes = self.format.encode(properties)?;
        write_atomically(&path, &bytes)?;
        log::debug!("wrote sidecar {} ({} properties)", path.display(), properties.len());
        Ok(())
    }

    /// Removes the node sidecar and, for files, the content sidecar.
    pub fn remove(&self, owner: &str) -> Result<()> {
        if let Some(file) = content_owner(owner) {
            let path = self.native(file)?;
            return remove_if_present(&with_suffix(&path, self.format.content_extension()));
        }
        let path = self.native(owner)?;
        if path.is_dir() {
            return remove_if_present(&path.join(self.format.extension()));
        }
        if !self.is_shadowed(owner, false) {
            remove_if_present(&with_suffix(&path, self.format.extension()))?;
        }
        remove_if_present(&with_suffix(&path, self.format.content_extension()))
    }

    /// Moves the sidecars of a file that was renamed from `from` to `to`.
    ///
    /// Folder sidecars live inside the folder and travel with it.
    pub fn relocate(&self, from: &str, to: &str, is_dir: bool) -> Result<()> {
        if is_dir {
            return Ok(());
        }
        let source = self.native(from)?;
        let target = self.native(to)?;
        let mut extensions = vec![self.format.content_extension()];
        match (self.is_shadowed(from, false), self.is_shadowed(to, false)) {
            (false, false) => extensions.push(self.format.extension()),
            (false, true) => log::warn!(
                "node properties of {from} stay behind: {to} cannot carry node properties"
            ),
            (true, _) => {}
        }
        for extension in extensions {
            let from_sidecar = with_suffix(&source, extension);
            let to_sidecar = with_suffix(&target, extension);
            match fs::rename(&from_sidecar, &to_sidecar) {
                Ok(()) => {}
                Err(error) if error.kind() == ErrorKind::NotFound => {}
                Err(error) => return Err(ConnectorError::io(from_sidecar, error)),
            }
        }
        Ok(())
    }

    /// Whether `owner` can keep node-level properties.
    pub fn accepts_node_properties(&self, owner: &str, is_dir: bool) -> bool {
        !self.is_shadowed(owner, is_dir)
    }

    /// True when the node sidecar name of a file owner spells the content
    /// sidecar of a sibling. Under the legacy naming `x.content` + `.modeshape`
    /// equals `x` + `.content.modeshape`; the content sidecar keeps that name.
    fn is_shadowed(&self, owner: &str, is_dir: bool) -> bool {
        if is_dir || content_owner(owner).is_some() {
            return false;
        }
        let Some(infix) = self
            .format
            .content_extension()
            .strip_suffix(self.format.extension())
        else {
            return false;
        };
        let (_, name) = split_parent(owner);
        name.strip_suffix(infix).is_some_and(|file| !file.is_empty())
    }

    fn shadowed_error(&self, owner: &str) -> ConnectorError {
        ConnectorError::InvalidInput(format!(
            "'{owner}' cannot carry node properties: its {} sidecar name belongs to the content of a sibling",
            self.format.extension()
        ))
    }

    /// Owner key of a sidecar file, given its relative path.
    pub fn owner_of(&self, sidecar: &str) -> Option<String> {
        let (parent, name) = split_parent(sidecar);
        if name.ends_with(SIDECAR_TEMP_SUFFIX) {
            return None;
        }
        if name == self.format.extension() {
            return Some(parent.to_string());
        }
        if let Some(file) = name.strip_suffix(self.format.content_extension()) {
            if !file.is_empty() {
                return Some(join_relative(&join_relative(parent, file), CONTENT_CHILD));
            }
        }
        name.strip_suffix(self.format.extension())
            .filter(|file| !file.is_empty())
            .map(|file| join_relative(parent, file))
    }

    fn sidecar_path(&self, owner: &str) -> Result<PathBuf> {
        if let Some(file) = content_owner(owner) {
            let path = self.native(file)?;
            return Ok(with_suffix(&path, self.format.content_extension()));
        }
        let path = self.native(owner)?;
        if path.is_dir() {
            Ok(path.join(self.format.extension()))
        } else {
            Ok(with_suffix(&path, self.format.extension()))
        }
    }

    fn owner_path(&self, owner: &str) -> Result<PathBuf> {
        self.native(content_owner(owner).unwrap_or(owner))
    }

    fn native(&self, relative: &str) -> Result<PathBuf> {
        let mut path = self.root.clone();
        path.extend(split_relative(relative)?);
        Ok(path)
    }
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut raw = path.as_os_str().to_owned();
    raw.push(suffix);
    PathBuf::from(raw)
}

fn remove_if_present(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(error) if error.kind() == ErrorKind::NotFound => Ok(()),
        Err(error) => Err(ConnectorError::io(path, error)),
    }
}

/// Replaces `path` with `bytes` so readers see either the old or the new file.
pub(crate) fn write_atomically(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = path.parent().ok_or_else(|| {
        ConnectorError::InvalidInput(format!("sidecar path {} has no parent", path.display()))
    })?;

    let mut temp = tempfile::Builder::new()
        .prefix(".")
        .suffix(SIDECAR_TEMP_SUFFIX)
        .tempfile_in(dir)
        .map_err(|error| ConnectorError::io(dir, error))?;
    temp.write_all(bytes)
        .map_err(|error| ConnectorError::io(temp.path(), error))?;
    temp.as_file()
        .sync_all()
        .map_err(|error| ConnectorError::io(temp.path(), error))?;
    temp.persist(path)
        .map_err(|error| ConnectorError::io(path, error.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Value;
    use tempfile::tempdir;

    fn props(name: &str, value: &str) -> ExtraProperties {
        let mut properties = ExtraProperties::new();
        properties.insert(name.into(), vec![Value::from(value)]);
        properties
    }

    #[test]
    fn file_sidecars_sit_next_to_their_owner() {
        let dir = tempdir().expect("tempdir");
        fs::create_dir(dir.path().join("dir3")).expect("mkdir");
        fs::write(dir.path().join("dir3/simple.json"), "{}").expect("write");
        let store = SidecarStore::new(dir.path().to_path_buf(), SidecarFormat::Json);

        store
            .set("dir3/simple.json", &props("extraProp", "extraValue"))
            .expect("set");
        store
            .set("dir3/simple.json/jcr:content", &props("extraProp2", "extraValue2"))
            .expect("set content");

        assert!(dir.path().join("dir3/simple.json.modeshape.json").exists());
        assert!(dir.path().join("dir3/simple.json.modeshape.content.json").exists());
        assert_eq!(
            store.get("dir3/simple.json").expect("get"),
            props("extraProp", "extraValue")
        );
        assert_eq!(
            store.get("dir3/simple.json/jcr:content").expect("get"),
            props("extraProp2", "extraValue2")
        );
    }

    #[test]
    fn folder_sidecars_live_inside_the_folder() {
        let dir = tempdir().expect("tempdir");
        fs::create_dir(dir.path().join("dir1")).expect("mkdir");
        let store = SidecarStore::new(dir.path().to_path_buf(), SidecarFormat::Legacy);

        store.set("dir1", &props("color", "blue")).expect("set");
        store.set("", &props("root", "yes")).expect("set root");

        assert!(dir.path().join("dir1/.modeshape").exists());
        assert!(dir.path().join(".modeshape").exists());
        assert_eq!(store.get("dir1").expect("get"), props("color", "blue"));
        assert_eq!(store.get("").expect("get"), props("root", "yes"));
    }

    #[test]
    fn writes_leave_no_temp_files_behind() {
        let dir = tempdir().expect("tempdir");
        fs::write(dir.path().join("a.txt"), "a").expect("write");
        let store = SidecarStore::new(dir.path().to_path_buf(), SidecarFormat::Json);
        for round in 0..5 {
            store
                .set("a.txt", &props("round", &round.to_string()))
                .expect("set");
        }
        let names: Vec<String> = fs::read_dir(dir.path())
            .expect("read_dir")
            .map(|entry| entry.expect("entry").file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names.len(), 2, "unexpected entries: {names:?}");
        assert_eq!(store.get("a.txt").expect("get"), props("round", "4"));
    }

    #[test]
    fn empty_update_removes_the_sidecar() {
        let dir = tempdir().expect("tempdir");
        fs::write(dir.path().join("a.txt"), "a").expect("write");
        let store = SidecarStore::new(dir.path().to_path_buf(), SidecarFormat::Json);
        store.set("a.txt", &props("k", "v")).expect("set");
        store.set("a.txt", &ExtraProperties::new()).expect("clear");
        assert!(!dir.path().join("a.txt.modeshape.json").exists());
        assert!(store.get("a.txt").expect("get").is_empty());
    }

    #[test]
    fn setting_properties_on_missing_owner_fails() {
        let dir = tempdir().expect("tempdir");
        let store = SidecarStore::new(dir.path().to_path_buf(), SidecarFormat::Json);
        let error = store.set("ghost.txt", &props("k", "v")).expect_err("missing");
        assert!(matches!(error, ConnectorError::NotFound(_)));
    }

    #[test]
    fn legacy_content_sidecars_are_not_shared_with_dotted_siblings() {
        let dir = tempdir().expect("tempdir");
        fs::write(dir.path().join("a"), "a").expect("write");
        fs::write(dir.path().join("a.content"), "b").expect("write");
        let store = SidecarStore::new(dir.path().to_path_buf(), SidecarFormat::Legacy);

        store.set("a/jcr:content", &props("owner", "a-content")).expect("content");
        let error = store
            .set("a.content", &props("owner", "a.content-node"))
            .expect_err("shared sidecar name");
        assert!(matches!(error, ConnectorError::InvalidInput(_)));
        assert!(!store.accepts_node_properties("a.content", false));
        assert!(store.accepts_node_properties("a.content", true));

        assert!(store.get("a.content").expect("get").is_empty());
        store.set("a.content", &ExtraProperties::new()).expect("clearing is a no-op");
        store
            .set("a.content/jcr:content", &props("owner", "a.content-content"))
            .expect("own content sidecar");
        store.remove("a.content").expect("remove");
        assert_eq!(store.get("a/jcr:content").expect("get"), props("owner", "a-content"));

        fs::rename(dir.path().join("a.content"), dir.path().join("c.content")).expect("rename");
        store.relocate("a.content", "c.content", false).expect("relocate");
        assert_eq!(store.get("a/jcr:content").expect("get"), props("owner", "a-content"));

        let json = SidecarStore::new(dir.path().to_path_buf(), SidecarFormat::Json);
        json.set("a/jcr:content", &props("owner", "a-content")).expect("content");
        json.set("c.content", &props("owner", "c")).expect("node");
        assert_eq!(json.get("a/jcr:content").expect("get"), props("owner", "a-content"));
        assert_eq!(json.get("c.content").expect("get"), props("owner", "c"));
    }

    #[test]
    fn relocate_moves_file_sidecars() {
        let dir = tempdir().expect("tempdir");
        fs::write(dir.path().join("a.txt"), "a").expect("write");
        let store = SidecarStore::new(dir.path().to_path_buf(), SidecarFormat::Json);
        store.set("a.txt", &props("k", "v")).expect("set");
        fs::rename(dir.path().join("a.txt"), dir.path().join("b.txt")).expect("rename");
        store.relocate("a.txt", "b.txt", false).expect("relocate");
        assert_eq!(store.get("b.txt").expect("get"), props("k", "v"));
        assert!(!dir.path().join("a.txt.modeshape.json").exists());
    }

    #[test]
    fn sidecar_names_map_back_to_owners() {
        let store = SidecarStore::new(PathBuf::from("/unused"), SidecarFormat::Json);
        assert_eq!(
            store.owner_of("dir3/simple.json.modeshape.json").as_deref(),
            Some("dir3/simple.json")
        );
        assert_eq!(
            store.owner_of("dir3/simple.json.modeshape.content.json").as_deref(),
            Some("dir3/simple.json/jcr:content")
        );
        assert_eq!(store.owner_of("dir3/.modeshape.json").as_deref(), Some("dir3"));
        assert_eq!(store.owner_of("dir3/.abc.modeshape.tmp"), None);

        let legacy = SidecarStore::new(PathBuf::from("/unused"), SidecarFormat::Legacy);
        assert_eq!(
            legacy.owner_of("a.txt.content.modeshape").as_deref(),
            Some("a.txt/jcr:content")
        );
        assert_eq!(legacy.owner_of("a.txt.modeshape").as_deref(), Some("a.txt"));
    }
}
