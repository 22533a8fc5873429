use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::binary::{BinaryStrategyKind, DEFAULT_EAGER_CHECKSUM_THRESHOLD};
use crate::error::{ConnectorError, Result};
use crate::monitor::DEFAULT_QUEUE_CAPACITY;
use crate::pager::DEFAULT_PAGE_SIZE;
use crate::path::{normalize_address, PathFilter};
use crate::properties::ExtraPropertiesKind;

/// Configuration of one projection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectionConfig {
    pub name: String,
    pub mount_address: String,
    pub directory_path: PathBuf,
    #[serde(default)]
    pub read_only: bool,
    #[serde(default)]
    pub inclusion_filter: Option<String>,
    #[serde(default)]
    pub exclusion_filter: Option<String>,
    #[serde(default)]
    pub extra_properties_storage: ExtraPropertiesKind,
    #[serde(default)]
    pub binary_strategy: BinaryStrategyKind,
    #[serde(default = "default_eager_checksum_threshold")]
    pub eager_checksum_threshold: u64,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    #[serde(default)]
    pub add_mime_type: bool,
    /// Start the change monitor when the projection is mounted.
    #[serde(default)]
    pub monitor: bool,
    #[serde(default = "default_queue_capacity")]
    pub monitor_queue_capacity: usize,
}

fn default_eager_checksum_threshold() -> u64 {
    DEFAULT_EAGER_CHECKSUM_THRESHOLD
}

fn default_page_size() -> usize {
    DEFAULT_PAGE_SIZE
}

fn default_queue_capacity() -> usize {
    DEFAULT_QUEUE_CAPACITY
}

impl ProjectionConfig {
    pub fn new(
        name: impl Into<String>,
        mount_address: impl Into<String>,
        directory_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            name: name.into(),
            mount_address: mount_address.into(),
            directory_path: directory_path.into(),
            read_only: false,
            inclusion_filter: None,
            exclusion_filter: None,
            extra_properties_storage: ExtraPropertiesKind::default(),
            binary_strategy: BinaryStrategyKind::default(),
            eager_checksum_threshold: DEFAULT_EAGER_CHECKSUM_THRESHOLD,
            page_size: DEFAULT_PAGE_SIZE,
            add_mime_type: false,
            monitor: false,
            monitor_queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: String| {
            ConnectorError::Config(format!("projection '{}': {reason}", self.name))
        };
        if self.name.trim().is_empty() {
            return Err(ConnectorError::Config(
                "projection name must not be empty".to_string(),
            ));
        }
        normalize_address(&self.mount_address).map_err(|error| invalid(error.to_string()))?;
        if self.directory_path.as_os_str().is_empty() {
            return Err(invalid("directoryPath must not be empty".to_string()));
        }
        if self.page_size == 0 {
            return Err(invalid("pageSize must be greater than zero".to_string()));
        }
        if self.monitor_queue_capacity == 0 {
            return Err(invalid(
                "monitorQueueCapacity must be greater than zero".to_string(),
            ));
        }
        self.inclusion()?;
        self.exclusion()?;
        Ok(())
    }

    pub fn inclusion(&self) -> Result<Option<PathFilter>> {
        self.inclusion_filter.as_deref().map(PathFilter::new).transpose()
    }

    pub fn exclusion(&self) -> Result<Option<PathFilter>> {
        self.exclusion_filter.as_deref().map(PathFilter::new).transpose()
    }
}

/// A set of projections mounted side by side.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FederationConfig {
    #[serde(default)]
    pub projections: Vec<ProjectionConfig>,
}

impl FederationConfig {
    pub fn from_json_str(data: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(data)
            .map_err(|error| ConnectorError::Config(format!("invalid federation config: {error}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Loads a JSON config file. Relative directory paths resolve against the file's directory.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path).map_err(|error| ConnectorError::io(path, error))?;
        let mut config = Self::from_json_str(&data)?;
        if let Some(base) = path.parent() {
            for projection in &mut config.projections {
                if projection.directory_path.is_relative() {
                    projection.directory_path = base.join(&projection.directory_path);
                }
            }
        }
        log::info!(
            "loaded {} projection(s) from {}",
            config.projections.len(),
            path.display()
        );
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let mut names = HashSet::new();
        let mut mounts = HashSet::new();
        for projection in &self.projections {
            projection.validate()?;
            if !names.insert(projection.name.as_str()) {
                return Err(ConnectorError::Config(format!(
                    "duplicate projection name '{}'",
                    projection.name
                )));
            }
            let mount = normalize_address(&projection.mount_address)?;
            if !mounts.insert(mount.clone()) {
                return Err(ConnectorError::Config(format!(
                    "mount address '{mount}' is claimed by more than one projection"
                )));
            }
        }
        Ok(())
    }
}
