//! Base image availability.
//!
//! The builder only needs two things from the image distribution layer:
//! make sure a named base image is present locally, and read the cluster
//! file the base image was built with. `LocalImageService` answers both
//! from the local image store; registry transport is not part of cimg.

use std::sync::Arc;

use async_trait::async_trait;
use cimg_core::error::{CimgError, Result};

use crate::image::ANNOTATION_CLUSTERFILE;
use crate::reference::ImageReference;
use crate::store::ImageStore;

/// Image distribution operations consumed by the builder.
#[async_trait]
pub trait ImageService: Send + Sync {
    /// Ensure `reference` is available in the local image store.
    async fn pull_if_not_exist(&self, reference: &str) -> Result<()>;

    /// Cluster file recorded on `reference`, empty when there is none.
    async fn cluster_file_from_image(&self, reference: &str) -> String;
}

/// Image service backed only by the local image store.
pub struct LocalImageService {
    store: Arc<dyn ImageStore>,
}

impl LocalImageService {
    pub fn new(store: Arc<dyn ImageStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ImageService for LocalImageService {
    async fn pull_if_not_exist(&self, reference: &str) -> Result<()> {
        let parsed = ImageReference::parse(reference)?;

        match self.store.get_by_name(parsed.raw()).await {
            Ok(image) => {
                tracing::info!(
                    reference = %parsed.raw(),
                    id = %image.spec.id,
                    "Using local image"
                );
                Ok(())
            }
            Err(e) => Err(CimgError::BaseImageNotFound(format!(
                "{} is not in the local image store and no registry is configured ({})",
                parsed.full_reference(),
                e
            ))),
        }
    }

    async fn cluster_file_from_image(&self, reference: &str) -> String {
        match self.store.get_by_name(reference).await {
            Ok(image) => image
                .annotation(ANNOTATION_CLUSTERFILE)
                .unwrap_or_default()
                .to_string(),
            Err(e) => {
                tracing::debug!(reference, error = %e, "No cluster file from image");
                String::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::{generate_image_id, Image, Layer, LayerType};
    use crate::store::FsImageStore;
    use cimg_core::StoreConfig;
    use tempfile::TempDir;

    async fn store_with_base(tmp: &TempDir) -> Arc<dyn ImageStore> {
        let store = FsImageStore::new(&StoreConfig::new(tmp.path())).unwrap();
        let mut image = Image::new(vec![Layer::new(LayerType::From, "scratch")]);
        image.set_annotation(ANNOTATION_CLUSTERFILE, "kind: Cluster\n");
        image.spec.id = generate_image_id(&image).unwrap();
        store.save(&image, "base:v1").await.unwrap();
        Arc::new(store)
    }

    #[tokio::test]
    async fn test_pull_present_image() {
        let tmp = TempDir::new().unwrap();
        let service = LocalImageService::new(store_with_base(&tmp).await);
        service.pull_if_not_exist("base:v1").await.unwrap();
    }

    #[tokio::test]
    async fn test_pull_missing_image() {
        let tmp = TempDir::new().unwrap();
        let service = LocalImageService::new(store_with_base(&tmp).await);
        let err = service.pull_if_not_exist("other:v1").await.unwrap_err();
        assert!(matches!(err, CimgError::BaseImageNotFound(_)));
    }

    #[tokio::test]
    async fn test_pull_invalid_reference() {
        let tmp = TempDir::new().unwrap();
        let service = LocalImageService::new(store_with_base(&tmp).await);
        let err = service.pull_if_not_exist("").await.unwrap_err();
        assert!(matches!(err, CimgError::InvalidReference(_)));
    }

    #[tokio::test]
    async fn test_cluster_file_from_image() {
        let tmp = TempDir::new().unwrap();
        let service = LocalImageService::new(store_with_base(&tmp).await);
        assert_eq!(
            service.cluster_file_from_image("base:v1").await,
            "kind: Cluster\n"
        );
        assert_eq!(service.cluster_file_from_image("missing").await, "");
    }
}
