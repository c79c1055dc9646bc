//! Patch format dispatch and the header-aware apply/create pipelines
//!
//! The codecs only know buffers; this module is where file-level concerns
//! meet them: recognizing a patch by its magic, stripping or faking a
//! platform header around the codec run, repairing the in-ROM checksum
//! afterwards, and building new patches in a chosen format.

use tracing::{debug, info};

use crate::bps::{BpsPatch, BPS_MAGIC};
use crate::buffer::ByteBuffer;
use crate::error::{Error, Result};
use crate::ips::{IpsPatch, IPS_MAGIC};
use crate::rom;
use crate::ups::{UpsPatch, UPS_MAGIC};

/// Largest original size for which the BPS builder considers delta mode
const BPS_DELTA_LIMIT: usize = 4 * 1024 * 1024;

/// Suffix appended to the display name of a patched ROM
const PATCHED_SUFFIX: &str = " (patched)";

/// The three supported patch formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchFormat {
    Ips,
    Ups,
    Bps,
}

impl PatchFormat {
    /// Recognize a format from the first bytes of a patch file
    pub fn from_magic(data: &[u8]) -> Option<Self> {
        if data.starts_with(IPS_MAGIC) {
            Some(PatchFormat::Ips)
        } else if data.starts_with(UPS_MAGIC) {
            Some(PatchFormat::Ups)
        } else if data.starts_with(BPS_MAGIC) {
            Some(PatchFormat::Bps)
        } else {
            None
        }
    }

    /// Canonical file extension
    pub fn extension(&self) -> &'static str {
        match self {
            PatchFormat::Ips => "ips",
            PatchFormat::Ups => "ups",
            PatchFormat::Bps => "bps",
        }
    }
}

impl std::fmt::Display for PatchFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            PatchFormat::Ips => "IPS",
            PatchFormat::Ups => "UPS",
            PatchFormat::Bps => "BPS",
        })
    }
}

/// A parsed patch of any supported format
#[derive(Debug, Clone)]
pub enum Patch {
    Ips(IpsPatch),
    Ups(UpsPatch),
    Bps(BpsPatch),
}

impl Patch {
    /// Which codec this patch belongs to
    pub fn format(&self) -> PatchFormat {
        match self {
            Patch::Ips(_) => PatchFormat::Ips,
            Patch::Ups(_) => PatchFormat::Ups,
            Patch::Bps(_) => PatchFormat::Bps,
        }
    }

    /// Apply to a ROM image, producing a freshly owned buffer
    pub fn apply(&self, rom: &ByteBuffer, validate: bool) -> Result<ByteBuffer> {
        match self {
            Patch::Ips(patch) => patch.apply(rom, validate),
            Patch::Ups(patch) => patch.apply(rom, validate),
            Patch::Bps(patch) => patch.apply(rom, validate),
        }
    }

    /// Serialize to the on-disk patch format
    pub fn export(&self) -> Result<ByteBuffer> {
        match self {
            Patch::Ips(patch) => patch.export(),
            Patch::Ups(patch) => patch.export(),
            Patch::Bps(patch) => patch.export(),
        }
    }
}

/// Parse a patch buffer, dispatching on its magic
pub fn parse_patch(file: &mut ByteBuffer) -> Result<Patch> {
    let format = PatchFormat::from_magic(file.bytes()).ok_or(Error::UnknownPatchFormat)?;
    debug!(%format, size = file.len(), "dispatching patch");
    match format {
        PatchFormat::Ips => Ok(Patch::Ips(IpsPatch::parse(file)?)),
        PatchFormat::Ups => Ok(Patch::Ups(UpsPatch::parse(file)?)),
        PatchFormat::Bps => Ok(Patch::Bps(BpsPatch::parse(file)?)),
    }
}

/// Build a patch from an original and a modified ROM image
pub fn create_patch(
    original: &ByteBuffer,
    modified: &ByteBuffer,
    format: PatchFormat,
) -> Result<Patch> {
    match format {
        PatchFormat::Ips => Ok(Patch::Ips(IpsPatch::build(original, modified)?)),
        PatchFormat::Ups => Ok(Patch::Ups(UpsPatch::build(original, modified)?)),
        PatchFormat::Bps => {
            let delta_mode = original.len() <= BPS_DELTA_LIMIT;
            Ok(Patch::Bps(BpsPatch::build(original, modified, delta_mode)?))
        }
    }
}

/// Knobs for the full apply pipeline
#[derive(Debug, Clone, Copy, Default)]
pub struct ApplyOptions {
    /// Check the patch's source/target/patch checksums where the format
    /// has them
    pub validate_checksum: bool,
    /// Strip a platform header before patching and put it back afterwards
    pub remove_header: bool,
    /// Prefix a temporary header before patching and drop it afterwards
    pub add_header: bool,
    /// Recompute the in-ROM checksum on the patched image
    pub fix_checksum: bool,
    /// Append " (patched)" to the output's display name
    pub output_suffix: bool,
}

/// Apply a patch with the full header/checksum pipeline.
///
/// Header removal and addition are mutually exclusive; removal wins when
/// both are requested and possible. Either transform is silently skipped
/// when the ROM does not qualify for it.
pub fn apply_with_options(
    patch: &Patch,
    rom: &ByteBuffer,
    options: &ApplyOptions,
) -> Result<ByteBuffer> {
    let mut extracted_header: Option<ByteBuffer> = None;
    let mut fake_header_size = 0usize;

    let working = if options.remove_header && rom::can_remove_header(rom) {
        let (header, body) = rom::remove_header(rom)?;
        extracted_header = Some(header);
        body
    } else if options.add_header && rom::can_add_header(rom) {
        let headered = rom::add_header(rom)?;
        fake_header_size = headered.len() - rom.len();
        headered
    } else {
        rom.clone()
    };

    let mut output = patch.apply(&working, options.validate_checksum)?;

    if let Some(header) = extracted_header {
        let mut restored = ByteBuffer::with_len(header.len() + output.len());
        header.copy_to(&mut restored, 0, header.len(), 0)?;
        output.copy_to(&mut restored, 0, output.len(), header.len())?;
        output = restored;
    } else if fake_header_size > 0 {
        // A truncating patch can legally shrink the output below the
        // injected header length.
        if output.len() < fake_header_size {
            return Err(Error::PatchFailed(
                "patched output is smaller than the injected header".into(),
            ));
        }
        output = output.slice(fake_header_size, output.len() - fake_header_size)?;
    }

    if options.fix_checksum {
        rom::fix_checksum(&mut output)?;
    }

    let mut name = rom.name().to_string();
    if options.output_suffix {
        name.push_str(PATCHED_SUFFIX);
    }
    let output = output.with_name(name).with_extension(rom.extension());

    info!(
        format = %patch.format(),
        input = rom.len(),
        output = output.len(),
        "patch applied"
    );
    Ok(output)
}
