//! Checkpoint index store
//!
//! Enumerating a large register takes a long time, so the identifier list
//! is persisted once and reused by later runs. Files are written to a
//! temporary path, synced and renamed into place, so a reader never sees a
//! half-written index.

use crate::catalog::RegisterDescriptor;
use crate::error::CheckpointError;
use crate::source::Identifier;
use chrono::{DateTime, Duration, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tracing::{info, warn};

/// Current checkpoint file format
pub const INDEX_VERSION: u32 = 1;

static UNSAFE_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^A-Za-z0-9]").expect("Invalid file name regex"));

/// Replace every non-alphanumeric character with `_`
pub fn sanitize_file_name(name: &str) -> String {
    UNSAFE_CHARS.replace_all(name, "_").into_owned()
}

/// Write `bytes` to `path` via a synced temporary file and a rename
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), CheckpointError> {
    let io_err = |source| CheckpointError::Io {
        path: path.to_path_buf(),
        source,
    };

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = path.with_file_name(format!("{}.tmp", file_name));

    let mut file = File::create(&tmp).map_err(io_err)?;
    file.write_all(bytes).map_err(io_err)?;
    file.sync_all().map_err(io_err)?;
    drop(file);

    fs::rename(&tmp, path).map_err(io_err)
}

/// Identifies one build of a checkpoint index
///
/// Progress markers carry the stamp of the index they were written
/// against; a rebuilt index gets a new `created_at` and so a new stamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexStamp {
    pub count: usize,
    pub created_at: DateTime<Utc>,
}

/// The persisted identifier list of one register
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointIndex {
    pub version: u32,

    /// Register name
    pub register: String,

    /// Register URI; must match the descriptor on load
    pub base_uri: String,

    /// When enumeration finished
    pub created_at: DateTime<Utc>,

    /// Number of identifiers, checked against the list on load
    pub count: usize,

    /// Identifiers in listing order
    pub identifiers: Vec<Identifier>,
}

impl CheckpointIndex {
    pub fn new(descriptor: &RegisterDescriptor, identifiers: Vec<Identifier>) -> Self {
        Self {
            version: INDEX_VERSION,
            register: descriptor.name.clone(),
            base_uri: descriptor.base_uri.clone(),
            created_at: Utc::now(),
            count: identifiers.len(),
            identifiers,
        }
    }

    pub fn len(&self) -> usize {
        self.identifiers.len()
    }

    pub fn stamp(&self) -> IndexStamp {
        IndexStamp {
            count: self.identifiers.len(),
            created_at: self.created_at,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.identifiers.is_empty()
    }

    /// Check if the index is older than `max_age`
    pub fn is_stale(&self, max_age: Duration, now: DateTime<Utc>) -> bool {
        now.signed_duration_since(self.created_at) > max_age
    }
}

/// Loads and saves checkpoint indexes in one directory
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    dir: PathBuf,
    max_age: Option<Duration>,
}

impl CheckpointStore {
    pub fn new(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
            max_age: None,
        }
    }

    /// Treat indexes older than `max_age` as absent
    pub fn with_max_age(mut self, max_age: Option<Duration>) -> Self {
        self.max_age = max_age;
        self
    }

    /// `<sanitized base_uri>.index.json` in the store directory
    pub fn path_for(&self, descriptor: &RegisterDescriptor) -> PathBuf {
        self.dir
            .join(format!("{}.index.json", sanitize_file_name(&descriptor.base_uri)))
    }

    /// Read a persisted index; `None` when no file exists
    pub fn load(&self, descriptor: &RegisterDescriptor) -> Result<Option<CheckpointIndex>, CheckpointError> {
        let path = self.path_for(descriptor);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(CheckpointError::Io { path, source }),
        };

        let corrupt = |reason: String| CheckpointError::Corrupt {
            path: path.clone(),
            reason,
        };
        let index: CheckpointIndex = serde_json::from_slice(&bytes).map_err(|e| corrupt(e.to_string()))?;

        if index.version != INDEX_VERSION {
            return Err(corrupt(format!("unsupported version {}", index.version)));
        }
        if index.base_uri != descriptor.base_uri {
            return Err(corrupt(format!("built for '{}'", index.base_uri)));
        }
        if index.count != index.identifiers.len() {
            return Err(corrupt(format!(
                "header says {} identifiers, file holds {}",
                index.count,
                index.identifiers.len()
            )));
        }
        Ok(Some(index))
    }

    /// Persist an index atomically
    pub fn save(&self, index: &CheckpointIndex, descriptor: &RegisterDescriptor) -> Result<PathBuf, CheckpointError> {
        fs::create_dir_all(&self.dir).map_err(|source| CheckpointError::Io {
            path: self.dir.clone(),
            source,
        })?;
        let path = self.path_for(descriptor);
        write_atomic(&path, &serde_json::to_vec(index)?)?;
        Ok(path)
    }

    /// Return the persisted index, or build, persist and return a new one
    ///
    /// `build` only runs when `force` is set or no usable index exists.
    /// Corrupt and stale indexes are rebuilt.
    pub fn load_or_build<E>(
        &self,
        descriptor: &RegisterDescriptor,
        force: bool,
        build: impl FnOnce() -> Result<Vec<Identifier>, E>,
    ) -> Result<CheckpointIndex, E>
    where
        E: From<CheckpointError>,
    {
        if !force {
            match self.load(descriptor) {
                Ok(Some(index)) => match self.max_age {
                    Some(max_age) if index.is_stale(max_age, Utc::now()) => {
                        info!(
                            register = %descriptor.name,
                            created_at = %index.created_at,
                            "Checkpoint index is stale, rebuilding"
                        );
                    }
                    _ => {
                        info!(
                            register = %descriptor.name,
                            identifiers = index.len(),
                            "Loaded checkpoint index"
                        );
                        return Ok(index);
                    }
                },
                Ok(None) => {}
                Err(e) => warn!(register = %descriptor.name, error = %e, "Ignoring unusable checkpoint index"),
            }
        }

        let index = CheckpointIndex::new(descriptor, build()?);
        let path = self.save(&index, descriptor)?;
        info!(
            register = %descriptor.name,
            identifiers = index.len(),
            path = %path.display(),
            "Saved checkpoint index"
        );
        Ok(index)
    }
}
