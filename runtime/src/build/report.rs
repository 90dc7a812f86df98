//! Build results.

use cimg_core::ContentDigest;
use serde::Serialize;

use crate::image::LayerType;

/// Outcome of a successful build.
#[derive(Debug, Clone, Serialize)]
pub struct BuildReport {
    /// Image identity (64 hex chars)
    pub image_id: String,
    /// Name the image was saved under
    pub reference: String,
    /// Total layers in the image, inherited and new
    pub layer_count: usize,
    /// Per-instruction results for this build's own layers
    pub layers: Vec<LayerOutcome>,
    /// Non-fatal problems encountered along the way
    pub warnings: Vec<BuildWarning>,
}

impl BuildReport {
    /// Number of instructions satisfied from the build cache.
    pub fn cache_hits(&self) -> usize {
        self.layers.iter().filter(|l| l.cached).count()
    }
}

/// Result of one executed instruction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LayerOutcome {
    pub kind: LayerType,
    pub value: String,
    /// `None` when the instruction produced no content
    pub id: Option<ContentDigest>,
    /// Reused from a previous build
    pub cached: bool,
}

/// A cache bookkeeping write that failed without failing the build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BuildWarning {
    /// `cacheID` metadata could not be attached to a new layer
    CacheMetadataWrite { layer: ContentDigest, message: String },
    /// The chain index entry for a new layer could not be written
    CacheIndexWrite { layer: ContentDigest, message: String },
}

impl std::fmt::Display for BuildWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CacheMetadataWrite { layer, message } => {
                write!(f, "failed to store cache id for layer {}: {}", layer, message)
            }
            Self::CacheIndexWrite { layer, message } => {
                write!(f, "failed to index layer {} in build cache: {}", layer, message)
            }
        }
    }
}
