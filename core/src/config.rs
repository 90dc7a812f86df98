use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{CimgError, Result};

/// Reserved name of the cluster configuration file.
pub const DEFAULT_CLUSTER_FILE_NAME: &str = "Clusterfile";

/// Build configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BuildConfig {
    /// Build type (informational)
    #[serde(default)]
    pub build_type: BuildType,

    /// Disable cache probing; cache identities are still recorded
    #[serde(default)]
    pub no_cache: bool,

    /// Target image name
    #[serde(default)]
    pub image_name: String,
}

/// Kind of build requested by the caller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildType {
    #[default]
    Local,
    Lite,
    Cloud,
}

impl std::fmt::Display for BuildType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Local => write!(f, "local"),
            Self::Lite => write!(f, "lite"),
            Self::Cloud => write!(f, "cloud"),
        }
    }
}

impl std::str::FromStr for BuildType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "local" => Ok(Self::Local),
            "lite" => Ok(Self::Lite),
            "cloud" => Ok(Self::Cloud),
            _ => Err(format!(
                "unknown build type: '{}' (supported: local, lite, cloud)",
                s
            )),
        }
    }
}

/// Store locations
///
/// Every store is rooted under `root`; nothing falls back to a global
/// default once this value is constructed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Root directory (e.g., ~/.cimg)
    #[serde(default)]
    pub root: PathBuf,

    /// Cluster file used when neither the build context nor the base image
    /// provides one
    #[serde(default)]
    pub default_cluster_file: Option<PathBuf>,
}

impl StoreConfig {
    /// Config rooted at `root` with the default layout.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            default_cluster_file: None,
        }
    }

    /// Load from a YAML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            CimgError::ConfigError(format!(
                "Failed to read config {}: {}",
                path.display(),
                e
            ))
        })?;
        let config: StoreConfig = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Directory holding registered layer content.
    pub fn layers_dir(&self) -> PathBuf {
        self.root.join("layers")
    }

    /// Directory holding per-layer metadata.
    pub fn layerdb_dir(&self) -> PathBuf {
        self.root.join("layerdb").join("sha256")
    }

    /// Directory holding image metadata and the name index.
    pub fn images_dir(&self) -> PathBuf {
        self.root.join("images")
    }

    /// Directory holding the build cache chain index.
    pub fn cache_dir(&self) -> PathBuf {
        self.root.join("cache").join("chains")
    }

    /// Local fallback cluster file.
    pub fn cluster_file_path(&self) -> PathBuf {
        self.default_cluster_file
            .clone()
            .unwrap_or_else(|| self.root.join("etc").join(DEFAULT_CLUSTER_FILE_NAME))
    }
}
