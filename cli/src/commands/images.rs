//! `cimg images` command.

use cimg_core::StoreConfig;
use cimg_runtime::{FsImageStore, ImageStore};
use clap::Args;

use crate::output;

#[derive(Args)]
pub struct ImagesArgs {
    /// Only show image names (one per line)
    #[arg(short, long)]
    pub quiet: bool,
}

pub async fn execute(args: ImagesArgs, store: StoreConfig) -> Result<(), Box<dyn std::error::Error>> {
    let store = FsImageStore::new(&store)?;
    let images = store.list().await?;

    if args.quiet {
        for image in &images {
            println!("{}", image.name);
        }
        return Ok(());
    }

    let mut table = output::new_table(&["NAME", "IMAGE ID", "LAYERS", "CREATED"]);
    for image in &images {
        table.add_row(vec![
            image.name.clone(),
            output::short_id(&image.id).to_string(),
            image.layer_count.to_string(),
            output::format_ago(&image.saved_at),
        ]);
    }

    println!("{table}");
    Ok(())
}
