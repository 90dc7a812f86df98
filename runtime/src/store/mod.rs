//! Layer and image stores.
//!
//! Both stores are shared by concurrent builds. Writes go through a
//! temporary file or directory followed by a rename.

pub mod image;
pub mod layer;

pub use image::{FsImageStore, ImageStore, ImageSummary};
pub use layer::{FsLayerStore, LayerStore};
