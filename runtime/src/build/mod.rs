//! Cluster image build support.
//!
//! Provides Kubefile parsing, layer content utilities, instruction
//! handlers and the local build pipeline.
//!
//! # Usage
//!
//! ```text
//! cimg build -t kubernetes:v1.22.0 .
//! ```
//!
//! # Supported Instructions
//!
//! FROM, COPY, RUN, CMD

pub mod builder;
pub mod handler;
pub mod kubefile;
pub mod layer;
pub mod report;

pub use builder::{BuilderLayers, LocalBuilder, CACHE_ID_KEY};
pub use kubefile::Kubefile;
pub use layer::{digest_dir, digest_path, DirSnapshot};
pub use report::{BuildReport, BuildWarning, LayerOutcome};
