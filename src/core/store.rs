//! Content-addressed object store: immutable bytes addressed by SHA-256,
//! with JSON metadata sidecars.
//!
//! # For implementers
//!
//! - All state mutations go straight to disk; there is no in-memory cache
//!   layer here (the metadata index owns reverse-index lookups).
//! - `store` is naturally idempotent: writing the same bytes twice produces
//!   the same id and the second write is a no-op.

use crate::core::error::PortError;
use crate::core::metadata::Metadata;
use crate::core::time::now_utc;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};

/// Content-addressed identifier: lowercase hex SHA-256 of the object bytes.
pub type ObjectId = String;

pub fn hash_bytes(bytes: &[u8]) -> ObjectId {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Owns the `objects/` and `metadata/` trees under a store root.
#[derive(Debug, Clone)]
pub struct ObjectStore {
    root: PathBuf,
}

impl ObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn objects_dir(&self) -> PathBuf {
        self.root.join("objects")
    }

    fn metadata_dir(&self) -> PathBuf {
        self.root.join("metadata")
    }

    /// Fan-out path for an id: `objects/<id[0:2]>/<id[2:4]>/<id>`. Callable
    /// without reading the bytes (spec's `get_path` invariant).
    pub fn path_for(&self, id: &str) -> PathBuf {
        self.objects_dir().join(&id[0..2]).join(&id[2..4]).join(id)
    }

    fn metadata_path(&self, id: &str) -> PathBuf {
        self.metadata_dir().join(format!("{id}.json"))
    }

    pub fn exists(&self, id: &str) -> bool {
        self.path_for(id).exists()
    }

    /// Write `bytes` under their content hash if absent. Idempotent: a
    /// second call with identical bytes returns the same id without
    /// re-writing.
    pub fn store(&self, bytes: &[u8]) -> Result<ObjectId, PortError> {
        let id = hash_bytes(bytes);
        let path = self.path_for(&id);
        if path.exists() {
            return Ok(id);
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, bytes)?;
        Ok(id)
    }

    /// Store `bytes` and attach `meta`, filling in `id`, `size`, and
    /// timestamps.
    pub fn store_with_metadata(
        &self,
        bytes: &[u8],
        mut meta: Metadata,
    ) -> Result<ObjectId, PortError> {
        let id = self.store(bytes)?;
        meta.id = id.clone();
        meta.size = bytes.len() as u64;
        self.save_metadata(meta)?;
        Ok(id)
    }

    pub fn read(&self, id: &str) -> Result<Vec<u8>, PortError> {
        let path = self.path_for(id);
        fs::read(&path).map_err(|_| PortError::NotFound(format!("object {id}")))
    }

    /// Write the JSON sidecar for `meta`. `created` is preserved across
    /// updates if an existing sidecar is present and `meta.created` was not
    /// already set by the caller; `modified`/`accessed` are bumped to now.
    pub fn save_metadata(&self, mut meta: Metadata) -> Result<(), PortError> {
        let path = self.metadata_path(&meta.id);
        if let Ok(existing) = self.load_metadata(&meta.id) {
            meta.created = existing.created;
        }
        let now = now_utc();
        meta.modified = now;
        meta.accessed = now;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let bytes = serde_json::to_vec_pretty(&meta)?;
        fs::write(&path, bytes)?;
        Ok(())
    }

    pub fn load_metadata(&self, id: &str) -> Result<Metadata, PortError> {
        let path = self.metadata_path(id);
        let bytes = fs::read(&path).map_err(|_| PortError::NotFound(format!("metadata {id}")))?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Enumerate every object id that has a metadata sidecar.
    pub fn list(&self) -> Result<Vec<ObjectId>, PortError> {
        let dir = self.metadata_dir();
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut ids = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            if let Some(name) = entry.file_name().to_str() {
                if let Some(id) = name.strip_suffix(".json") {
                    ids.push(id.to_string());
                }
            }
        }
        ids.sort();
        Ok(ids)
    }
}
