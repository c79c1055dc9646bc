//! `rom-patcher patch`: apply a patch to a ROM image

use std::error::Error;

use rompatch::{apply_with_options, parse_patch, ApplyOptions};
use tracing::info;

use crate::commands::load_buffer;
use crate::PatchArgs;

pub fn handle(args: PatchArgs) -> Result<(), Box<dyn Error>> {
    let rom = load_buffer(&args.rom)?;
    let mut patch_file = load_buffer(&args.patch)?;

    let patch = parse_patch(&mut patch_file)?;
    info!(format = %patch.format(), "recognized patch format");

    let options = ApplyOptions {
        validate_checksum: args.validate_checksum,
        remove_header: args.remove_header,
        add_header: args.add_header,
        fix_checksum: args.fix_checksum,
        output_suffix: args.output_suffix,
    };
    let output = apply_with_options(&patch, &rom, &options)?;

    // Default output name: the patch's stem with the ROM's extension,
    // next to the ROM.
    let output_path = match args.output {
        Some(path) => path,
        None => {
            let suffix = if args.output_suffix { " (patched)" } else { "" };
            let file_name = format!("{}{suffix}.{}", patch_file.name(), rom.extension());
            args.rom.with_file_name(file_name)
        }
    };

    std::fs::write(&output_path, output.bytes())
        .map_err(|e| format!("cannot write {}: {e}", output_path.display()))?;
    println!("Patched ROM written to {}", output_path.display());
    Ok(())
}
