//! `rom-patcher info`: checksums and system information for a ROM image

use std::error::Error;

use rompatch::{header_info_for, RomSystem};

use crate::commands::load_buffer;
use crate::InfoArgs;

pub fn handle(args: InfoArgs) -> Result<(), Box<dyn Error>> {
    let rom = load_buffer(&args.rom)?;

    println!("File:    {}", args.rom.display());
    println!("Size:    {} bytes", rom.len());

    let system = RomSystem::detect(&rom);
    println!(
        "System:  {}",
        system.map(|s| s.name()).unwrap_or("not recognized")
    );
    if let Some(info) = header_info_for(rom.extension()) {
        println!("Header:  {} ({} bytes)", info.name, info.size);
    }

    println!("CRC32:   {:08x}", rom.crc32(0, None)?);
    println!("MD5:     {}", hex::encode(rom.md5(0, None)?));
    println!("SHA-1:   {}", hex::encode(rom.sha1(0, None)?));
    Ok(())
}
