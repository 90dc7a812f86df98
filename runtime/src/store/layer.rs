//! Content-addressed layer store.
//!
//! Layer content lives under `layers/<hex>/` keyed by the deterministic
//! digest of the directory tree, so identical content registered by
//! independent builds is stored once. Per-layer metadata (such as the
//! build cache identity) lives under `layerdb/sha256/<hex>/<key>`.

use std::path::{Path, PathBuf};

use cimg_core::error::{CimgError, Result};
use cimg_core::{ContentDigest, StoreConfig};

use crate::build::layer::{copy_dir_recursive, digest_dir};

/// Layer store operations consumed by the builder.
pub trait LayerStore: Send + Sync {
    /// Register the content of `dir` as a layer and return its identity.
    ///
    /// Registering identical content again returns the same identity and
    /// does not store a second copy.
    fn register_layer(&self, dir: &Path) -> Result<ContentDigest>;

    /// Directory holding a registered layer's content.
    fn layer_data_dir(&self, id: &ContentDigest) -> PathBuf;

    /// Whether a layer's content is present.
    fn layer_exists(&self, id: &ContentDigest) -> bool {
        self.layer_data_dir(id).is_dir()
    }

    /// Attach a metadata value to a layer.
    fn set_metadata(&self, id: &ContentDigest, key: &str, value: &[u8]) -> Result<()>;

    /// Read a metadata value, `None` when unset.
    fn get_metadata(&self, id: &ContentDigest, key: &str) -> Result<Option<Vec<u8>>>;
}

/// Filesystem-backed layer store.
pub struct FsLayerStore {
    layers_dir: PathBuf,
    layerdb_dir: PathBuf,
}

impl FsLayerStore {
    /// Open (and create if needed) the layer store described by `config`.
    pub fn new(config: &StoreConfig) -> Result<Self> {
        let layers_dir = config.layers_dir();
        let layerdb_dir = config.layerdb_dir();
        for dir in [&layers_dir, &layerdb_dir] {
            std::fs::create_dir_all(dir).map_err(|e| {
                CimgError::LayerStoreError(format!(
                    "Failed to create layer store directory {}: {}",
                    dir.display(),
                    e
                ))
            })?;
        }
        Ok(Self {
            layers_dir,
            layerdb_dir,
        })
    }

    /// Number of registered layers.
    pub fn layer_count(&self) -> Result<usize> {
        let mut count = 0;
        for entry in std::fs::read_dir(&self.layers_dir)? {
            let entry = entry?;
            let name = entry.file_name();
            if entry.path().is_dir() && !name.to_string_lossy().starts_with('.') {
                count += 1;
            }
        }
        Ok(count)
    }

    fn metadata_path(&self, id: &ContentDigest, key: &str) -> Result<PathBuf> {
        if key.is_empty() || key.contains('/') || key.contains("..") {
            return Err(CimgError::LayerStoreError(format!(
                "Invalid metadata key '{}'",
                key
            )));
        }
        Ok(self.layerdb_dir.join(id.hex()).join(key))
    }
}

impl LayerStore for FsLayerStore {
    fn register_layer(&self, dir: &Path) -> Result<ContentDigest> {
        if !dir.is_dir() {
            return Err(CimgError::LayerStoreError(format!(
                "Layer source {} is not a directory",
                dir.display()
            )));
        }

        let id = digest_dir(dir)?;
        let target = self.layer_data_dir(&id);
        if target.is_dir() {
            tracing::debug!(layer = %id, "Layer already registered");
            return Ok(id);
        }

        // Stage under a unique name, then rename into place so concurrent
        // registrations of the same content never observe a partial copy.
        let staging = self
            .layers_dir
            .join(format!(".tmp-{}", uuid::Uuid::new_v4()));
        copy_dir_recursive(dir, &staging).map_err(|e| {
            let _ = std::fs::remove_dir_all(&staging);
            CimgError::LayerStoreError(format!(
                "Failed to stage layer {} from {}: {}",
                id,
                dir.display(),
                e
            ))
        })?;

        if let Err(e) = std::fs::rename(&staging, &target) {
            let _ = std::fs::remove_dir_all(&staging);
            if !target.is_dir() {
                return Err(CimgError::LayerStoreError(format!(
                    "Failed to register layer {}: {}",
                    id, e
                )));
            }
            tracing::debug!(layer = %id, "Layer registered concurrently");
            return Ok(id);
        }

        tracing::debug!(layer = %id, path = %target.display(), "Registered layer");
        Ok(id)
    }

    fn layer_data_dir(&self, id: &ContentDigest) -> PathBuf {
        self.layers_dir.join(id.hex())
    }

    fn set_metadata(&self, id: &ContentDigest, key: &str, value: &[u8]) -> Result<()> {
        let path = self.metadata_path(id, key)?;
        let dir = self.layerdb_dir.join(id.hex());
        std::fs::create_dir_all(&dir).map_err(|e| {
            CimgError::LayerStoreError(format!(
                "Failed to create metadata directory {}: {}",
                dir.display(),
                e
            ))
        })?;

        let tmp = dir.join(format!(".{}.{}", key, uuid::Uuid::new_v4()));
        std::fs::write(&tmp, value)
            .and_then(|_| std::fs::rename(&tmp, &path))
            .map_err(|e| {
                let _ = std::fs::remove_file(&tmp);
                CimgError::LayerStoreError(format!(
                    "Failed to write metadata {} for layer {}: {}",
                    key, id, e
                ))
            })
    }

    fn get_metadata(&self, id: &ContentDigest, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.metadata_path(id, key)?;
        match std::fs::read(&path) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(CimgError::LayerStoreError(format!(
                "Failed to read metadata {} for layer {}: {}",
                key, id, e
            ))),
        }
    }
}
