//! cimg CLI - build and inspect cluster images.

pub mod commands;
pub mod output;
