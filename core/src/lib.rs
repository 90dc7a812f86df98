//! cimg Core - Foundational Types
//!
//! Error taxonomy, configuration and content digests shared by the
//! build runtime and the CLI.

pub mod config;
pub mod digest;
pub mod error;

// Re-export commonly used types
pub use config::{BuildConfig, BuildType, StoreConfig, DEFAULT_CLUSTER_FILE_NAME};
pub use digest::ContentDigest;
pub use error::{CimgError, Result};

/// cimg version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
