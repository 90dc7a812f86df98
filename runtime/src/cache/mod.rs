//! Build cache.
//!
//! COPY layers are reused across builds when the chain of layers beneath
//! them and the content they copy are both unchanged.

pub mod chain;

pub use chain::{CacheId, CacheProbe, ChainId, ChainService};
