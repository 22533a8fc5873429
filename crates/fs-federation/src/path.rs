//! Mapping between native paths and logical addresses of one projection.
//!
//! Relative paths use `/` separators with no leading slash; the projection
//! root is the empty relative path and is always visible.

mod filter;

pub use filter::PathFilter;

use std::path::{Component, Path, PathBuf};

use crate::error::{canonicalize_existing_path, not_found_or_io, ConnectorError, Result};

/// Bidirectional mapping for a single projection, including visibility filters.
#[derive(Debug, Clone)]
pub struct PathMapper {
    root: PathBuf,
    mount: String,
    inclusion: Option<PathFilter>,
    exclusion: Option<PathFilter>,
    reserved_suffixes: Vec<&'static str>,
}

impl PathMapper {
    pub fn new(root: PathBuf, mount: &str) -> Result<Self> {
        Ok(Self {
            root: canonicalize_existing_path(root),
            mount: normalize_address(mount)?,
            inclusion: None,
            exclusion: None,
            reserved_suffixes: Vec::new(),
        })
    }

    pub fn with_inclusion(mut self, filter: Option<PathFilter>) -> Self {
        self.inclusion = filter;
        self
    }

    pub fn with_exclusion(mut self, filter: Option<PathFilter>) -> Self {
        self.exclusion = filter;
        self
    }

    /// Names ending with any of these suffixes are never visible.
    pub fn with_reserved_suffixes(mut self, suffixes: &[&'static str]) -> Self {
        self.reserved_suffixes = suffixes.to_vec();
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn mount(&self) -> &str {
        &self.mount
    }

    /// Resolves a visible relative path to an existing native entry.
    ///
    /// A path that runs through a regular file names nothing and is
    /// `NotFound`; any other stat failure surfaces as `Io`.
    pub fn resolve(&self, relative: &str) -> Result<PathBuf> {
        let components = split_relative(relative)?;
        let native = self.join(&components);
        let metadata = match std::fs::symlink_metadata(&native) {
            Ok(metadata) => metadata,
            Err(error) if self.crosses_file(&components) => {
                log::debug!("{} runs through a file: {error}", native.display());
                return Err(ConnectorError::NotFound(self.address_for(relative)));
            }
            Err(error) => {
                return Err(not_found_or_io(&native, &self.address_for(relative), error));
            }
        };
        if !self.is_visible_components(&components, metadata.is_dir()) {
            return Err(ConnectorError::NotFound(self.address_for(relative)));
        }
        Ok(native)
    }

    /// Native location for a relative path that may not exist yet.
    pub fn native_path_for(&self, relative: &str) -> Result<PathBuf> {
        let components = split_relative(relative)?;
        Ok(self.join(&components))
    }

    /// Logical address of a native path under the root, if it is inside it.
    pub fn to_logical_address(&self, native: &Path) -> Option<String> {
        self.relative_from_native(native)
            .map(|relative| self.address_for(&relative))
    }

    pub fn relative_from_native(&self, native: &Path) -> Option<String> {
        let stripped = native.strip_prefix(&self.root).ok()?;
        let mut segments = Vec::new();
        for component in stripped.components() {
            match component {
                Component::Normal(name) => segments.push(name.to_string_lossy().into_owned()),
                Component::CurDir => {}
                _ => return None,
            }
        }
        Some(segments.join("/"))
    }

    pub fn address_for(&self, relative: &str) -> String {
        join_address(&self.mount, relative)
    }

    /// Relative path of a logical address inside this mount, if it is inside it.
    pub fn relative_from_address(&self, address: &str) -> Option<String> {
        let address = normalize_address(address).ok()?;
        if address == self.mount {
            return Some(String::new());
        }
        let prefix = if self.mount == "/" {
            "/".to_string()
        } else {
            format!("{}/", self.mount)
        };
        address.strip_prefix(&prefix).map(ToString::to_string)
    }

    pub fn is_visible(&self, relative: &str, is_dir: bool) -> bool {
        match split_relative(relative) {
            Ok(components) => self.is_visible_components(&components, is_dir),
            Err(_) => false,
        }
    }

    pub fn is_reserved_name(&self, name: &str) -> bool {
        self.reserved_suffixes
            .iter()
            .any(|suffix| name.ends_with(suffix))
    }

    fn is_visible_components(&self, components: &[&str], is_dir: bool) -> bool {
        if components.is_empty() {
            return true;
        }
        if components.iter().any(|name| self.is_reserved_name(name)) {
            return false;
        }
        if let Some(inclusion) = &self.inclusion {
            if !inclusion.admits(components, is_dir) {
                return false;
            }
        }
        match &self.exclusion {
            Some(exclusion) => !exclusion.covers(components),
            None => true,
        }
    }

    /// Whether a proper prefix of `components` is an existing non-directory.
    fn crosses_file(&self, components: &[&str]) -> bool {
        (1..components.len()).any(|len| {
            std::fs::metadata(self.join(&components[..len]))
                .map(|metadata| !metadata.is_dir())
                .unwrap_or(false)
        })
    }

    fn join(&self, components: &[&str]) -> PathBuf {
        let mut native = self.root.clone();
        native.extend(components);
        native
    }
}

/// Splits and validates a relative path.
pub fn split_relative(relative: &str) -> Result<Vec<&str>> {
    let mut components = Vec::new();
    for segment in relative.split('/') {
        if segment.is_empty() {
            continue;
        }
        if segment == "." || segment == ".." || segment.contains('\\') || segment.contains('\0') {
            return Err(ConnectorError::InvalidInput(format!(
                "invalid path segment '{segment}' in '{relative}'"
            )));
        }
        components.push(segment);
    }
    Ok(components)
}

/// Joins two relative paths.
pub fn join_relative(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{parent}/{name}")
    }
}

/// Splits a relative path into parent and final name.
pub fn split_parent(relative: &str) -> (&str, &str) {
    match relative.rsplit_once('/') {
        Some((parent, name)) => (parent, name),
        None => ("", relative),
    }
}

/// Drops a namespace prefix (`ns:name` becomes `name`) from a new node name.
pub fn native_name(segment: &str) -> &str {
    match segment.rsplit_once(':') {
        Some((_, local)) if !local.is_empty() => local,
        _ => segment,
    }
}

/// Normalizes a logical address: leading `/`, no empty segments, no trailing `/`.
pub fn normalize_address(address: &str) -> Result<String> {
    let trimmed = address.trim();
    if !trimmed.starts_with('/') {
        return Err(ConnectorError::InvalidInput(format!(
            "logical address must be absolute: '{address}'"
        )));
    }
    let segments = split_relative(trimmed)?;
    Ok(format!("/{}", segments.join("/")))
}

/// Appends a relative path to a logical address.
pub fn join_address(base: &str, relative: &str) -> String {
    if relative.is_empty() {
        base.to_string()
    } else if base == "/" {
        format!("/{relative}")
    } else {
        format!("{base}/{relative}")
    }
}
