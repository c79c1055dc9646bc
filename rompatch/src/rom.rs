//! ROM system detection, platform header policy, and checksum repair
//!
//! Patches usually target the bare cartridge body, but dumps in the wild
//! carry copier/loader headers (iNES, fwNES, LNX, SNES copier). This module
//! recognizes the console a ROM belongs to, decides when a header can be
//! stripped or prefixed, and recomputes the in-ROM checksum that Game Boy
//! and Mega Drive ROMs store after a patch has touched them.

use tracing::{debug, info};

use crate::buffer::{ByteBuffer, Endian};
use crate::error::{Error, Result};

/// The 48-byte Nintendo logo every Game Boy ROM carries at `0x104`
pub const GAMEBOY_LOGO: [u8; 48] = [
    0xCE, 0xED, 0x66, 0x66, 0xCC, 0x0D, 0x00, 0x0B, 0x03, 0x73, 0x00, 0x83, 0x00, 0x0C, 0x00,
    0x0D, 0x00, 0x08, 0x11, 0x1F, 0x88, 0x89, 0x00, 0x0E, 0xDC, 0xCC, 0x6E, 0xE6, 0xDD, 0xDD,
    0xD9, 0x99, 0xBB, 0xBB, 0x67, 0x63, 0x6E, 0x0E, 0xEC, 0xCC, 0xDD, 0xDC, 0x99, 0x9F, 0xBB,
    0xB9, 0x33, 0x3E,
];

/// Strings a Mega Drive / Genesis ROM puts in its console field at `0x100`
const GENESIS_SIGNATURES: [&str; 3] = ["SEGA", "GENESIS", "MEGA DR"];

/// Byte-order permutations of the Nintendo 64 boot signature
const N64_SIGNATURES: [[u8; 4]; 3] = [
    [0x80, 0x37, 0x12, 0x40],
    [0x37, 0x80, 0x40, 0x12],
    [0x40, 0x12, 0x37, 0x80],
];

/// Raw size of one Famicom Disk System side
const FDS_SIDE_SIZE: usize = 65500;

/// Console a ROM image was recognized as
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RomSystem {
    GameBoy,
    SegaGenesis,
    Nintendo64,
    FamicomDiskSystem,
}

impl RomSystem {
    /// Human-readable console name
    pub fn name(&self) -> &'static str {
        match self {
            RomSystem::GameBoy => "Game Boy",
            RomSystem::SegaGenesis => "Sega Mega Drive/Genesis",
            RomSystem::Nintendo64 => "Nintendo 64",
            RomSystem::FamicomDiskSystem => "Famicom Disk System",
        }
    }

    /// Recognize the console from fixed offsets in the ROM image.
    ///
    /// Anything of 0x200 bytes or less is too small to probe.
    pub fn detect(rom: &ByteBuffer) -> Option<RomSystem> {
        let data = rom.bytes();
        if data.len() <= 0x200 {
            return None;
        }

        // Only the first 32 logo bytes are compared; some licensed carts
        // ship altered tail rows.
        if data.len() >= 0x150 && data[0x104..0x124] == GAMEBOY_LOGO[..32] {
            return Some(RomSystem::GameBoy);
        }

        if data.len() > 0x100 {
            let console: String = data[0x100..0x10C].iter().map(|&b| b as char).collect();
            if GENESIS_SIGNATURES.iter().any(|sig| console.contains(sig)) {
                return Some(RomSystem::SegaGenesis);
            }
        }

        if data.len() >= 0x40 && N64_SIGNATURES.iter().any(|sig| data[..4] == *sig) {
            return Some(RomSystem::Nintendo64);
        }

        if data.len() == FDS_SIDE_SIZE {
            return Some(RomSystem::FamicomDiskSystem);
        }

        None
    }
}

/// A platform header convention, keyed by file extension
#[derive(Debug, Clone, Copy)]
pub struct HeaderInfo {
    pub extensions: &'static [&'static str],
    /// Header length in bytes
    pub size: usize,
    /// Body length must be a multiple of this
    pub rom_size_multiple: usize,
    pub name: &'static str,
}

/// Built-in header conventions
pub const HEADER_TABLE: [HeaderInfo; 4] = [
    HeaderInfo {
        extensions: &["nes"],
        size: 16,
        rom_size_multiple: 1024,
        name: "iNES",
    },
    HeaderInfo {
        extensions: &["fds"],
        size: 16,
        rom_size_multiple: FDS_SIDE_SIZE,
        name: "fwNES",
    },
    HeaderInfo {
        extensions: &["lnx"],
        size: 64,
        rom_size_multiple: 1024,
        name: "LNX",
    },
    HeaderInfo {
        extensions: &["sfc", "smc", "swc", "fig"],
        size: 512,
        rom_size_multiple: 262144,
        name: "SNES copier",
    },
];

/// Look up the header convention for a file extension
pub fn header_info_for(extension: &str) -> Option<&'static HeaderInfo> {
    HEADER_TABLE
        .iter()
        .find(|info| info.extensions.contains(&extension))
}

/// True when the ROM looks like it carries a strippable header: the
/// extension is known, the size is not a clean kibibyte multiple, and the
/// body that would remain fits the convention's size grid.
pub fn can_remove_header(rom: &ByteBuffer) -> bool {
    let Some(info) = header_info_for(rom.extension()) else {
        return false;
    };
    rom.len() <= 0x60_0200
        && rom.len() % 1024 != 0
        && rom.len() > info.size
        && (rom.len() - info.size) % info.rom_size_multiple == 0
}

/// True when a bare ROM body of a known extension can take a header prefix
pub fn can_add_header(rom: &ByteBuffer) -> bool {
    let Some(info) = header_info_for(rom.extension()) else {
        return false;
    };
    rom.len() <= 0x60_0000 && rom.len() % info.rom_size_multiple == 0
}

/// Split a headered ROM into its header and bare body
pub fn remove_header(rom: &ByteBuffer) -> Result<(ByteBuffer, ByteBuffer)> {
    let info = header_info_for(rom.extension()).ok_or_else(|| {
        Error::InvalidSource(format!(
            "no header convention for extension {:?}",
            rom.extension()
        ))
    })?;
    if rom.len() <= info.size {
        return Err(Error::InvalidSource(format!(
            "{} bytes is too small to carry a {} byte {} header",
            rom.len(),
            info.size,
            info.name
        )));
    }
    let header = rom.slice(0, info.size)?;
    let mut body = rom.slice(info.size, rom.len() - info.size)?;
    body.set_name(rom.name());
    debug!(header = info.name, size = info.size, "removed ROM header");
    Ok((header, body))
}

/// Prefix a bare ROM body with a header.
///
/// For fwNES the prefix is the real `FDS\x1A` header with the side count;
/// every other convention gets zero filler, which is enough for patches
/// that expect headered offsets.
pub fn add_header(rom: &ByteBuffer) -> Result<ByteBuffer> {
    let info = header_info_for(rom.extension()).ok_or_else(|| {
        Error::InvalidSource(format!(
            "no header convention for extension {:?}",
            rom.extension()
        ))
    })?;
    let mut out = ByteBuffer::with_len(info.size + rom.len());
    if info.name == "fwNES" {
        out.write_bytes(&[0x46, 0x44, 0x53, 0x1A])?;
        out.write_u8((rom.len() / FDS_SIDE_SIZE) as u8)?;
    }
    rom.copy_to(&mut out, 0, rom.len(), info.size)?;
    out.set_name(rom.name());
    debug!(header = info.name, size = info.size, "added ROM header");
    Ok(out)
}

/// Recompute the in-ROM checksum after patching.
///
/// Only Game Boy and Mega Drive store one worth fixing; every other
/// detected system is left alone. Returns whether the image changed.
pub fn fix_checksum(rom: &mut ByteBuffer) -> Result<bool> {
    match RomSystem::detect(rom) {
        Some(RomSystem::GameBoy) => fix_gameboy_checksum(rom),
        Some(RomSystem::SegaGenesis) => fix_genesis_checksum(rom),
        _ => Ok(false),
    }
}

/// Header checksum at `0x14D`: the wrapping sum `c -= byte + 1` over the
/// 25 title/licensee bytes at `0x134..=0x14C`. The checksum byte itself is
/// not part of the sum.
fn fix_gameboy_checksum(rom: &mut ByteBuffer) -> Result<bool> {
    let data = rom.bytes();
    let current = data[0x14D];
    let mut checksum: u8 = 0;
    for i in 0..25 {
        checksum = checksum.wrapping_sub(data[0x134 + i]).wrapping_sub(1);
    }
    if checksum == current {
        return Ok(false);
    }

    rom.push_pos();
    rom.seek(0x14D)?;
    rom.write_u8(checksum)?;
    rom.pop_pos();
    info!(old = current, new = checksum, "fixed Game Boy header checksum");
    Ok(true)
}

/// Cartridge checksum at `0x18E`: wrapping 16-bit sum of the big-endian
/// words from `0x200` to the end of the image.
fn fix_genesis_checksum(rom: &mut ByteBuffer) -> Result<bool> {
    let data = rom.bytes();
    let current = u16::from_be_bytes([data[0x18E], data[0x18F]]);
    let mut checksum: u16 = 0;
    for word in data[0x200..].chunks(2) {
        let value = if word.len() == 2 {
            u16::from_be_bytes([word[0], word[1]])
        } else {
            u16::from(word[0]) << 8
        };
        checksum = checksum.wrapping_add(value);
    }
    if checksum == current {
        return Ok(false);
    }

    rom.push_pos();
    rom.set_endian(Endian::Big);
    rom.seek(0x18E)?;
    rom.write_u16(checksum)?;
    rom.pop_pos();
    info!(
        old = current,
        new = checksum,
        "fixed Mega Drive cartridge checksum"
    );
    Ok(true)
}
