//! `rom-patcher create`: build a patch from two ROM images

use std::error::Error;

use rompatch::{create_patch, PatchFormat};
use tracing::info;

use crate::commands::load_buffer;
use crate::CreateArgs;

pub fn handle(args: CreateArgs) -> Result<(), Box<dyn Error>> {
    let original = load_buffer(&args.original)?;
    let modified = load_buffer(&args.modified)?;

    let format = PatchFormat::from(args.format);
    let patch = create_patch(&original, &modified, format)?;
    let exported = patch.export()?;
    info!(%format, size = exported.len(), "patch built");

    // Default output name: the modified ROM's stem with the patch
    // extension, next to the modified ROM.
    let output_path = match args.output {
        Some(path) => path,
        None => {
            let file_name = format!("{}.{}", modified.name(), format.extension());
            args.modified.with_file_name(file_name)
        }
    };

    std::fs::write(&output_path, exported.bytes())
        .map_err(|e| format!("cannot write {}: {e}", output_path.display()))?;
    println!("{format} patch written to {}", output_path.display());
    Ok(())
}
