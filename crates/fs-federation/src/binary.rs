//! Binary handles for file content.
//!
//! Location-addressed handles key the native path and hash lazily.
//! Content-addressed handles key the SHA-256 of the bytes; files up to the
//! eager threshold are hashed when the handle is created, larger ones on
//! first use. Either way the checksum is cached on the handle, so a second
//! request never re-reads the file. A freshly resolved handle starts with an
//! empty cache.

use std::fmt;
use std::fs::{self, File};
use std::io::{BufReader, ErrorKind, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{ConnectorError, Result};

const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Files at or below this size are hashed eagerly by the content strategy.
pub const DEFAULT_EAGER_CHECKSUM_THRESHOLD: u64 = 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BinaryStrategyKind {
    Location,
    #[default]
    Content,
}

impl BinaryStrategyKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Location => "location",
            Self::Content => "content",
        }
    }
}

/// Produces binary handles for the files of one projection.
#[derive(Debug, Clone)]
pub struct BinaryStrategy {
    kind: BinaryStrategyKind,
    eager_threshold: u64,
}

impl BinaryStrategy {
    pub fn new(kind: BinaryStrategyKind, eager_threshold: u64) -> Self {
        Self {
            kind,
            eager_threshold,
        }
    }

    pub fn kind(&self) -> BinaryStrategyKind {
        self.kind
    }

    pub fn handle_for(&self, native: &Path) -> Result<BinaryHandle> {
        let metadata = fs::metadata(native).map_err(|error| {
            if error.kind() == ErrorKind::NotFound {
                ConnectorError::NotFound(native.display().to_string())
            } else {
                ConnectorError::io(native, error)
            }
        })?;
        if !metadata.is_file() {
            return Err(ConnectorError::InvalidInput(format!(
                "{} is not a regular file",
                native.display()
            )));
        }

        let handle = BinaryHandle {
            kind: self.kind,
            path: native.to_path_buf(),
            size: metadata.len(),
            checksum: Arc::new(Mutex::new(None)),
        };
        if self.kind == BinaryStrategyKind::Content && handle.size <= self.eager_threshold {
            handle.checksum()?;
        }
        Ok(handle)
    }
}

/// Reference to the bytes of one native file.
///
/// Clones share the checksum cache; they are the same handle instance.
#[derive(Clone)]
pub struct BinaryHandle {
    kind: BinaryStrategyKind,
    path: PathBuf,
    size: u64,
    checksum: Arc<Mutex<Option<String>>>,
}

impl fmt::Debug for BinaryHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BinaryHandle")
            .field("kind", &self.kind)
            .field("path", &self.path)
            .field("size", &self.size)
            .field("checksum", &*self.checksum.lock())
            .finish()
    }
}

impl BinaryHandle {
    pub fn kind(&self) -> BinaryStrategyKind {
        self.kind
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// The handle key: native path for location handles, checksum for content handles.
    pub fn key(&self) -> Result<String> {
        match self.kind {
            BinaryStrategyKind::Location => Ok(self.path.display().to_string()),
            BinaryStrategyKind::Content => self.checksum(),
        }
    }

    /// Hex SHA-256 of the content, computed once per handle instance.
    pub fn checksum(&self) -> Result<String> {
        let mut cached = self.checksum.lock();
        if let Some(checksum) = cached.as_ref() {
            return Ok(checksum.clone());
        }
        let checksum = checksum_of(self.open()?, &self.path)?;
        log::debug!(
            "computed checksum for {} ({} bytes)",
            self.path.display(),
            self.size
        );
        *cached = Some(checksum.clone());
        Ok(checksum)
    }

    /// Returns the checksum only if it has already been computed.
    pub fn cached_checksum(&self) -> Option<String> {
        self.checksum.lock().clone()
    }

    /// Streams the content from disk.
    pub fn open(&self) -> Result<BufReader<File>> {
        File::open(&self.path)
            .map(|file| BufReader::with_capacity(READ_BUFFER_SIZE, file))
            .map_err(|error| {
                if error.kind() == ErrorKind::NotFound {
                    ConnectorError::StaleHandle(self.path.clone())
                } else {
                    ConnectorError::io(&self.path, error)
                }
            })
    }

    pub fn read_all(&self) -> Result<Vec<u8>> {
        let mut reader = self.open()?;
        let mut bytes = Vec::with_capacity(self.size as usize);
        reader
            .read_to_end(&mut bytes)
            .map_err(|error| ConnectorError::io(&self.path, error))?;
        Ok(bytes)
    }
}

/// Content copied out of a projection into host-owned memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InternalBinary {
    bytes: Arc<[u8]>,
    checksum: String,
}

impl InternalBinary {
    pub fn new(bytes: Vec<u8>) -> Self {
        let checksum = hex::encode(Sha256::digest(&bytes));
        Self {
            bytes: bytes.into(),
            checksum,
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn checksum(&self) -> &str {
        &self.checksum
    }

    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }
}

/// A binary value as seen by the host: external (backed by a projection) or internal.
#[derive(Debug, Clone)]
pub enum BinaryValue {
    External(BinaryHandle),
    Internal(InternalBinary),
}

impl BinaryValue {
    pub fn is_external(&self) -> bool {
        matches!(self, Self::External(_))
    }

    pub fn read_all(&self) -> Result<Vec<u8>> {
        match self {
            Self::External(handle) => handle.read_all(),
            Self::Internal(binary) => Ok(binary.bytes().to_vec()),
        }
    }

    pub fn checksum(&self) -> Result<String> {
        match self {
            Self::External(handle) => handle.checksum(),
            Self::Internal(binary) => Ok(binary.checksum().to_string()),
        }
    }

    /// Copies external content into memory, detaching it from its projection.
    pub fn into_internal(self) -> Result<Self> {
        match self {
            Self::External(handle) => Ok(Self::Internal(InternalBinary::new(handle.read_all()?))),
            internal @ Self::Internal(_) => Ok(internal),
        }
    }
}

fn checksum_of(mut reader: impl Read, path: &Path) -> Result<String> {
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; READ_BUFFER_SIZE];
    loop {
        let read = match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(read) => read,
            Err(error) if error.kind() == ErrorKind::Interrupted => continue,
            Err(error) => return Err(ConnectorError::io(path, error)),
        };
        hasher.update(&buffer[..read]);
    }
    Ok(hex::encode(hasher.finalize()))
}
