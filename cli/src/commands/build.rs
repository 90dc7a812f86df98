//! `cimg build` command - Build a cluster image from a Kubefile.
//!
//! Parses the Kubefile, makes sure the base image is present, executes
//! each instruction and saves the image in the local image store.

use std::path::PathBuf;

use cimg_core::{BuildConfig, BuildType, StoreConfig};
use cimg_runtime::LocalBuilder;
use clap::Args;

use crate::output;

#[derive(Args)]
pub struct BuildArgs {
    /// Build context directory (contains the Kubefile and source files)
    #[arg(default_value = ".")]
    pub path: String,

    /// Name and optionally tag for the image (e.g., "kubernetes:v1.22.0")
    #[arg(short = 't', long = "tag")]
    pub tag: Option<String>,

    /// Path to Kubefile (default: <PATH>/Kubefile)
    #[arg(short = 'f', long = "file")]
    pub file: Option<String>,

    /// Do not reuse cached layers
    #[arg(long)]
    pub no_cache: bool,

    /// Build type: local, lite or cloud
    #[arg(long = "build-type", default_value = "local")]
    pub build_type: BuildType,

    /// Only print the image id
    #[arg(short, long)]
    pub quiet: bool,
}

pub async fn execute(args: BuildArgs, store: StoreConfig) -> Result<(), Box<dyn std::error::Error>> {
    let context_dir = PathBuf::from(&args.path)
        .canonicalize()
        .map_err(|e| format!("Invalid build context path '{}': {}", args.path, e))?;

    if !context_dir.is_dir() {
        return Err(format!(
            "Build context '{}' is not a directory",
            context_dir.display()
        )
        .into());
    }

    let kubefile = resolve_kubefile(&context_dir, args.file.as_deref());
    if !kubefile.exists() {
        return Err(format!("Kubefile not found at {}", kubefile.display()).into());
    }

    let name = args
        .tag
        .clone()
        .ok_or("an image name is required (-t NAME)")?;

    let config = BuildConfig {
        build_type: args.build_type,
        no_cache: args.no_cache,
        image_name: name.clone(),
    };
    tracing::debug!(root = %store.root.display(), "Opening stores");

    let builder = LocalBuilder::new(config, store)?;
    let report = builder.build(&name, &context_dir, &kubefile).await?;

    if args.quiet {
        println!("{}", report.image_id);
        return Ok(());
    }

    for layer in &report.layers {
        let id = layer
            .id
            .as_ref()
            .map(|id| output::short_id(&id.to_string()).to_string())
            .unwrap_or_else(|| "<none>".to_string());
        let cached = if layer.cached { " (cached)" } else { "" };
        println!("{} {} -> {}{}", layer.kind, layer.value, id, cached);
    }
    for warning in &report.warnings {
        eprintln!("Warning: {warning}");
    }
    println!(
        "Successfully built {} ({}, {} layers)",
        report.reference,
        output::short_id(&report.image_id),
        report.layer_count
    );
    Ok(())
}

/// Kubefile path: `file` relative to the context unless absolute.
fn resolve_kubefile(context_dir: &std::path::Path, file: Option<&str>) -> PathBuf {
    match file {
        Some(f) => {
            let p = PathBuf::from(f);
            if p.is_absolute() {
                p
            } else {
                context_dir.join(p)
            }
        }
        None => context_dir.join("Kubefile"),
    }
}
