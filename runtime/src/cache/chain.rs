//! Build cache keyed by layer chains.
//!
//! A chain identity summarizes the exact ordered prefix of layers applied
//! so far. A copy instruction is a cache hit only if a previous build
//! recorded the same (chain, cache identity) pair and the layer it produced
//! is still in the layer store.
//!
//! Index entries live under `cache/chains/<hex>` and contain the layer
//! digest as text.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use cimg_core::error::{CimgError, Result};
use cimg_core::ContentDigest;

use crate::build::handler::relative_path;
use crate::build::layer::digest_path;
use crate::store::LayerStore;

/// Cumulative identity of an ordered layer prefix.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct ChainId(Option<ContentDigest>);

impl ChainId {
    /// The empty chain.
    pub fn root() -> Self {
        Self(None)
    }

    /// Chain after applying `digest` on top of this one.
    ///
    /// The first element becomes the chain itself; every later element is
    /// folded in as `sha256(parent + " " + digest)`.
    pub fn extend(&self, digest: &ContentDigest) -> Self {
        match &self.0 {
            None => Self(Some(digest.clone())),
            Some(parent) => Self(Some(ContentDigest::from_bytes(
                format!("{} {}", parent, digest).as_bytes(),
            ))),
        }
    }

    /// Chain over a whole sequence, left to right.
    pub fn from_layers<'a>(layers: impl IntoIterator<Item = &'a ContentDigest>) -> Self {
        layers
            .into_iter()
            .fold(Self::root(), |chain, digest| chain.extend(digest))
    }

    pub fn digest(&self) -> Option<&ContentDigest> {
        self.0.as_ref()
    }
}

impl std::fmt::Display for ChainId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.0 {
            Some(digest) => write!(f, "{}", digest),
            None => write!(f, "<root>"),
        }
    }
}

/// Content-derived key of a copy instruction's sources.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheId(ContentDigest);

impl CacheId {
    /// Hash the instruction text together with the digest of every source.
    ///
    /// Sources resolve inside `context_dir` exactly as the copy resolves
    /// them, absolute paths included. A missing or escaping source is an
    /// error because the copy itself would fail.
    pub fn for_copy(descriptor: &str, context_dir: &Path, sources: &[&str]) -> Result<Self> {
        let mut material = String::from(descriptor);
        for src in sources {
            let rel = relative_path(src).ok_or_else(|| CimgError::InstructionFailed {
                instruction: descriptor.to_string(),
                message: format!("COPY source '{}' escapes the build context", src),
            })?;
            let path = context_dir.join(rel);
            let digest = digest_path(&path).map_err(|e| CimgError::InstructionFailed {
                instruction: descriptor.to_string(),
                message: format!("Failed to hash COPY source {}: {}", src, e),
            })?;
            material.push('\n');
            material.push_str(src);
            material.push(' ');
            material.push_str(&digest.to_string());
        }
        Ok(Self(ContentDigest::from_bytes(material.as_bytes())))
    }

    pub fn from_digest(digest: ContentDigest) -> Self {
        Self(digest)
    }

    pub fn digest(&self) -> &ContentDigest {
        &self.0
    }
}

impl std::fmt::Display for CacheId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Result of a cache probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheProbe {
    /// A previous build produced this layer from the same chain and content
    Hit {
        layer_id: ContentDigest,
        cache_id: CacheId,
    },
    /// Nothing reusable
    Miss,
}

/// Chain-keyed build cache.
pub struct ChainService {
    index_dir: PathBuf,
    layer_store: Arc<dyn LayerStore>,
}

impl ChainService {
    /// Open the cache index at `index_dir`.
    pub fn new(index_dir: &Path, layer_store: Arc<dyn LayerStore>) -> Result<Self> {
        std::fs::create_dir_all(index_dir).map_err(|e| {
            CimgError::CacheError(format!(
                "Failed to create cache index directory {}: {}",
                index_dir.display(),
                e
            ))
        })?;
        Ok(Self {
            index_dir: index_dir.to_path_buf(),
            layer_store,
        })
    }

    /// Look up the layer a previous build produced for `cache_id` on top of
    /// `chain`. Unreadable or stale entries are misses.
    pub fn probe(&self, chain: &ChainId, cache_id: &CacheId) -> CacheProbe {
        let key = chain.extend(cache_id.digest());
        let Some(key_digest) = key.digest() else {
            return CacheProbe::Miss;
        };
        let entry = self.entry_path(key_digest);

        let content = match std::fs::read_to_string(&entry) {
            Ok(content) => content,
            Err(_) => {
                tracing::debug!(chain = %chain, cache_id = %cache_id, "Cache miss");
                return CacheProbe::Miss;
            }
        };

        let layer_id = match ContentDigest::parse(content.trim()) {
            Ok(id) => id,
            Err(e) => {
                tracing::debug!(entry = %entry.display(), error = %e, "Corrupt cache entry");
                return CacheProbe::Miss;
            }
        };

        if !self.layer_store.layer_exists(&layer_id) {
            tracing::debug!(layer = %layer_id, "Cached layer no longer in layer store");
            return CacheProbe::Miss;
        }

        tracing::debug!(chain = %chain, layer = %layer_id, "Cache hit");
        CacheProbe::Hit {
            layer_id,
            cache_id: cache_id.clone(),
        }
    }

    /// Remember that `layer_id` was produced for `cache_id` on top of `chain`.
    pub fn record(&self, chain: &ChainId, cache_id: &CacheId, layer_id: &ContentDigest) -> Result<()> {
        let key = chain.extend(cache_id.digest());
        let Some(key_digest) = key.digest() else {
            return Ok(());
        };
        let entry = self.entry_path(key_digest);
        let tmp = self
            .index_dir
            .join(format!(".{}.{}", key_digest.hex(), uuid::Uuid::new_v4()));

        std::fs::write(&tmp, layer_id.to_string())
            .and_then(|_| std::fs::rename(&tmp, &entry))
            .map_err(|e| {
                let _ = std::fs::remove_file(&tmp);
                CimgError::CacheError(format!(
                    "Failed to record cache entry {}: {}",
                    entry.display(),
                    e
                ))
            })
    }

    fn entry_path(&self, key: &ContentDigest) -> PathBuf {
        self.index_dir.join(key.hex())
    }
}
