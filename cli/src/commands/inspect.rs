//! `cimg inspect` command - display image metadata.

use cimg_core::StoreConfig;
use cimg_runtime::{FsImageStore, ImageStore};
use clap::{Args, ValueEnum};

#[derive(Clone, Copy, ValueEnum)]
pub enum InspectFormat {
    Yaml,
    Json,
}

#[derive(Args)]
pub struct InspectArgs {
    /// Image name to inspect
    pub image: String,

    /// Output format
    #[arg(long, value_enum, default_value = "yaml")]
    pub format: InspectFormat,
}

pub async fn execute(args: InspectArgs, store: StoreConfig) -> Result<(), Box<dyn std::error::Error>> {
    let store = FsImageStore::new(&store)?;
    let image = store.get_by_name(&args.image).await?;

    match args.format {
        InspectFormat::Yaml => print!("{}", serde_yaml::to_string(&image)?),
        InspectFormat::Json => println!("{}", serde_json::to_string_pretty(&image)?),
    }
    Ok(())
}
