//! cimg Runtime - cluster image build engine.
//!
//! This crate provides the build pipeline, the layer-chain build cache,
//! and the filesystem layer and image stores it writes through.

#![allow(clippy::result_large_err)]

pub mod build;
pub mod cache;
pub mod image;
pub mod pull;
pub mod reference;
pub mod store;

// Re-export common types
pub use build::{BuildReport, BuildWarning, BuilderLayers, Kubefile, LayerOutcome, LocalBuilder};
pub use cache::{CacheId, CacheProbe, ChainId, ChainService};
pub use image::{generate_image_id, Image, ImageSpec, Layer, LayerType, ANNOTATION_CLUSTERFILE, MAX_LAYER_DEPTH};
pub use pull::{ImageService, LocalImageService};
pub use reference::ImageReference;
pub use store::{FsImageStore, FsLayerStore, ImageStore, ImageSummary, LayerStore};

/// cimg Runtime version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
