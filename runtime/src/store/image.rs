//! Disk-based cluster image store.
//!
//! Image metadata documents are stored as YAML under `images/<id>.yaml`.
//! An in-memory name index is backed by a persistent `index.json`. Other
//! stores may share the same root, so the on-disk index is re-read before
//! every index write and whenever a lookup misses.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use cimg_core::error::{CimgError, Result};
use cimg_core::StoreConfig;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::image::Image;

/// Image store operations consumed by the builder.
#[async_trait]
pub trait ImageStore: Send + Sync {
    /// Load a previously saved image by name.
    async fn get_by_name(&self, name: &str) -> Result<Image>;

    /// Persist an image under `name`, replacing any previous image of that name.
    async fn save(&self, image: &Image, name: &str) -> Result<()>;

    /// Summaries of all named images.
    async fn list(&self) -> Result<Vec<ImageSummary>>;
}

/// Index entry for a named image.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageSummary {
    /// Image name as given at build time
    pub name: String,
    /// Image identity (hex)
    pub id: String,
    /// Number of layers
    pub layer_count: usize,
    /// When the image was saved
    pub saved_at: DateTime<Utc>,
}

/// Persistent index stored as JSON on disk.
#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreIndex {
    images: Vec<ImageSummary>,
}

/// Filesystem-backed image store.
pub struct FsImageStore {
    /// Root directory for image metadata
    store_dir: PathBuf,
    /// In-memory index: name → summary
    index: Arc<RwLock<HashMap<String, ImageSummary>>>,
}

impl FsImageStore {
    /// Open the image store described by `config`.
    ///
    /// Creates the store directory if it doesn't exist and loads any
    /// existing index from disk.
    pub fn new(config: &StoreConfig) -> Result<Self> {
        let store_dir = config.images_dir();
        std::fs::create_dir_all(&store_dir).map_err(|e| {
            CimgError::ImageStoreError(format!(
                "Failed to create image store directory {}: {}",
                store_dir.display(),
                e
            ))
        })?;

        let index = load_index(&store_dir)?;
        Ok(Self {
            store_dir,
            index: Arc::new(RwLock::new(index)),
        })
    }

    /// Get the store directory path.
    pub fn store_dir(&self) -> &Path {
        &self.store_dir
    }

    fn metadata_path(&self, id: &str) -> PathBuf {
        self.store_dir.join(format!("{}.yaml", id))
    }

    /// Replace the in-memory index with the one on disk.
    async fn reload(&self) -> Result<()> {
        let mut index = self.index.write().await;
        *index = load_index(&self.store_dir)?;
        Ok(())
    }

    async fn save_index(&self, index: &HashMap<String, ImageSummary>) -> Result<()> {
        let mut images: Vec<ImageSummary> = index.values().cloned().collect();
        images.sort_by(|a, b| a.name.cmp(&b.name));
        let data = serde_json::to_string_pretty(&StoreIndex { images })?;
        write_atomic(&self.store_dir.join("index.json"), data.as_bytes()).await
    }
}

#[async_trait]
impl ImageStore for FsImageStore {
    async fn get_by_name(&self, name: &str) -> Result<Image> {
        let cached = self.index.read().await.get(name).map(|s| s.id.clone());
        let id = match cached {
            Some(id) => id,
            None => {
                self.reload().await?;
                self.index
                    .read()
                    .await
                    .get(name)
                    .map(|summary| summary.id.clone())
                    .ok_or_else(|| {
                        CimgError::ImageStoreError(format!("Image not found: {}", name))
                    })?
            }
        };

        let path = self.metadata_path(&id);
        let data = tokio::fs::read_to_string(&path).await.map_err(|e| {
            CimgError::ImageStoreError(format!(
                "Failed to read image metadata {}: {}",
                path.display(),
                e
            ))
        })?;
        let image: Image = serde_yaml::from_str(&data)?;
        Ok(image)
    }

    async fn save(&self, image: &Image, name: &str) -> Result<()> {
        if image.spec.id.is_empty() {
            return Err(CimgError::ImageStoreError(format!(
                "Refusing to save image {} without an id",
                name
            )));
        }

        let data = serde_yaml::to_string(image)?;
        write_atomic(&self.metadata_path(&image.spec.id), data.as_bytes()).await?;

        let mut index = self.index.write().await;
        *index = load_index(&self.store_dir)?;
        index.insert(
            name.to_string(),
            ImageSummary {
                name: name.to_string(),
                id: image.spec.id.clone(),
                layer_count: image.spec.layers.len(),
                saved_at: Utc::now(),
            },
        );
        self.save_index(&index).await?;

        tracing::debug!(name, id = %image.spec.id, "Saved image metadata");
        Ok(())
    }

    async fn list(&self) -> Result<Vec<ImageSummary>> {
        self.reload().await?;
        let index = self.index.read().await;
        let mut images: Vec<ImageSummary> = index.values().cloned().collect();
        images.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(images)
    }
}

/// Load the name index, dropping entries whose metadata file is gone.
fn load_index(store_dir: &Path) -> Result<HashMap<String, ImageSummary>> {
    let index_path = store_dir.join("index.json");
    if !index_path.exists() {
        return Ok(HashMap::new());
    }

    let data = std::fs::read_to_string(&index_path).map_err(|e| {
        CimgError::ImageStoreError(format!(
            "Failed to read image store index {}: {}",
            index_path.display(),
            e
        ))
    })?;
    let store_index: StoreIndex = serde_json::from_str(&data).map_err(|e| {
        CimgError::ImageStoreError(format!("Failed to parse image store index: {}", e))
    })?;

    Ok(store_index
        .images
        .into_iter()
        .filter(|image| store_dir.join(format!("{}.yaml", image.id)).is_file())
        .map(|image| (image.name.clone(), image))
        .collect())
}

async fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let tmp = path.with_file_name(format!(".{}.{}", file_name, uuid::Uuid::new_v4()));

    let result = match tokio::fs::write(&tmp, data).await {
        Ok(()) => tokio::fs::rename(&tmp, path).await,
        Err(e) => Err(e),
    };

    result.map_err(|e| {
        let _ = std::fs::remove_file(&tmp);
        CimgError::ImageStoreError(format!("Failed to write {}: {}", path.display(), e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::{generate_image_id, Layer, LayerType};
    use tempfile::TempDir;

    fn sample_image() -> Image {
        let mut image = Image::new(vec![
            Layer::new(LayerType::From, "scratch"),
            Layer::new(LayerType::Run, "echo hi"),
        ]);
        image.spec.id = generate_image_id(&image).unwrap();
        image
    }

    #[tokio::test]
    async fn test_new_creates_directory() {
        let tmp = TempDir::new().unwrap();
        let store = FsImageStore::new(&StoreConfig::new(tmp.path())).unwrap();
        assert!(store.store_dir().is_dir());
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_save_and_get() {
        let tmp = TempDir::new().unwrap();
        let store = FsImageStore::new(&StoreConfig::new(tmp.path())).unwrap();
        let image = sample_image();

        store.save(&image, "kubernetes:v1.22").await.unwrap();
        let fetched = store.get_by_name("kubernetes:v1.22").await.unwrap();
        assert_eq!(fetched, image);

        let list = store.list().await.unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].layer_count, 2);
        assert_eq!(list[0].id, image.spec.id);
    }

    #[tokio::test]
    async fn test_get_nonexistent() {
        let tmp = TempDir::new().unwrap();
        let store = FsImageStore::new(&StoreConfig::new(tmp.path())).unwrap();
        let err = store.get_by_name("missing").await.unwrap_err();
        assert!(matches!(err, CimgError::ImageStoreError(_)));
    }

    #[tokio::test]
    async fn test_save_without_id_fails() {
        let tmp = TempDir::new().unwrap();
        let store = FsImageStore::new(&StoreConfig::new(tmp.path())).unwrap();
        let image = Image::new(vec![Layer::new(LayerType::From, "scratch")]);
        assert!(store.save(&image, "noid").await.is_err());
    }

    #[tokio::test]
    async fn test_save_replaces_name() {
        let tmp = TempDir::new().unwrap();
        let store = FsImageStore::new(&StoreConfig::new(tmp.path())).unwrap();
        let first = sample_image();
        store.save(&first, "app:latest").await.unwrap();

        let mut second = Image::new(vec![Layer::new(LayerType::From, "scratch")]);
        second.spec.id = generate_image_id(&second).unwrap();
        store.save(&second, "app:latest").await.unwrap();

        assert_eq!(store.get_by_name("app:latest").await.unwrap(), second);
        assert_eq!(store.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_index_persistence() {
        let tmp = TempDir::new().unwrap();
        let config = StoreConfig::new(tmp.path());
        let image = sample_image();

        {
            let store = FsImageStore::new(&config).unwrap();
            store.save(&image, "persist:v1").await.unwrap();
        }

        {
            let store = FsImageStore::new(&config).unwrap();
            assert_eq!(store.get_by_name("persist:v1").await.unwrap(), image);
        }
    }

    #[tokio::test]
    async fn test_index_drops_missing_metadata() {
        let tmp = TempDir::new().unwrap();
        let config = StoreConfig::new(tmp.path());
        let image = sample_image();
        {
            let store = FsImageStore::new(&config).unwrap();
            store.save(&image, "gone:v1").await.unwrap();
        }
        std::fs::remove_file(config.images_dir().join(format!("{}.yaml", image.spec.id))).unwrap();

        let store = FsImageStore::new(&config).unwrap();
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_stores_sharing_a_root_keep_each_others_entries() {
        let tmp = TempDir::new().unwrap();
        let config = StoreConfig::new(tmp.path());
        let first = FsImageStore::new(&config).unwrap();
        let second = FsImageStore::new(&config).unwrap();

        let a = sample_image();
        let mut b = Image::new(vec![Layer::new(LayerType::From, "scratch")]);
        b.spec.id = generate_image_id(&b).unwrap();

        first.save(&a, "a:v1").await.unwrap();
        second.save(&b, "b:v1").await.unwrap();

        // Visible through the store that did not write it
        assert_eq!(first.get_by_name("b:v1").await.unwrap(), b);

        let reopened = FsImageStore::new(&config).unwrap();
        let names: Vec<String> = reopened
            .list()
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.name)
            .collect();
        assert_eq!(names, vec!["a:v1".to_string(), "b:v1".to_string()]);
    }
}
