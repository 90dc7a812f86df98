//! CLI command definitions and dispatch.

mod build;
mod images;
mod inspect;

use std::path::PathBuf;

use cimg_core::StoreConfig;
use clap::{Parser, Subcommand};

/// cimg - build cluster images from Kubefiles.
#[derive(Parser)]
#[command(name = "cimg", version, about)]
pub struct Cli {
    /// Store root directory (default: ~/.cimg)
    #[arg(long, global = true, env = "CIMG_ROOT")]
    pub root: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Subcommand)]
pub enum Command {
    /// Build a cluster image from a Kubefile
    Build(build::BuildArgs),
    /// Display image metadata
    Inspect(inspect::InspectArgs),
    /// List built images
    Images(images::ImagesArgs),
}

/// Default store root (~/.cimg).
pub(crate) fn default_root() -> PathBuf {
    dirs::home_dir()
        .map(|h| h.join(".cimg"))
        .unwrap_or_else(|| PathBuf::from(".cimg"))
}

/// Store configuration for the selected root.
///
/// A `config.yaml` inside the root, when present, overrides the defaults.
pub(crate) fn store_config(root: Option<PathBuf>) -> Result<StoreConfig, Box<dyn std::error::Error>> {
    let root = root.unwrap_or_else(default_root);
    let config_path = root.join("config.yaml");
    if config_path.is_file() {
        let mut config = StoreConfig::from_file(&config_path)?;
        config.root = root;
        return Ok(config);
    }
    Ok(StoreConfig::new(root))
}

/// Dispatch a parsed CLI to the appropriate command handler.
pub async fn dispatch(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let config = store_config(cli.root)?;
    match cli.command {
        Command::Build(args) => build::execute(args, config).await,
        Command::Inspect(args) => inspect::execute(args, config).await,
        Command::Images(args) => images::execute(args, config).await,
    }
}
