//! rom-patcher CLI library
//!
//! Argument types and command handlers for the `rom-patcher` binary.

pub mod commands;

use std::path::PathBuf;

use clap::{Args, Subcommand, ValueEnum};
use rompatch::PatchFormat;

#[derive(Subcommand)]
pub enum Commands {
    /// Apply an IPS, UPS, or BPS patch to a ROM image
    Patch(PatchArgs),

    /// Create a patch from an original and a modified ROM image
    Create(CreateArgs),

    /// Show checksums and system information for a ROM image
    Info(InfoArgs),
}

#[derive(Args)]
pub struct PatchArgs {
    /// ROM image to patch
    pub rom: PathBuf,

    /// Patch file; the format is recognized from its magic
    pub patch: PathBuf,

    /// Verify the source, target, and patch checksums where the format
    /// carries them
    #[arg(long)]
    pub validate_checksum: bool,

    /// Prefix a temporary platform header before patching
    #[arg(long)]
    pub add_header: bool,

    /// Strip the platform header before patching and restore it afterwards
    #[arg(long)]
    pub remove_header: bool,

    /// Recompute the in-ROM checksum on the patched image
    #[arg(long)]
    pub fix_checksum: bool,

    /// Append " (patched)" to the derived output name
    #[arg(long)]
    pub output_suffix: bool,

    /// Write the patched ROM here instead of the derived name
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

#[derive(Args)]
pub struct CreateArgs {
    /// Unmodified ROM image
    pub original: PathBuf,

    /// Modified ROM image
    pub modified: PathBuf,

    /// Patch format to emit
    #[arg(short, long, value_enum, default_value = "ips")]
    pub format: FormatArg,

    /// Write the patch here instead of the derived name
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

#[derive(Args)]
pub struct InfoArgs {
    /// ROM image to inspect
    pub rom: PathBuf,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
pub enum FormatArg {
    Ips,
    Ups,
    Bps,
}

impl From<FormatArg> for PatchFormat {
    fn from(format: FormatArg) -> Self {
        match format {
            FormatArg::Ips => PatchFormat::Ips,
            FormatArg::Ups => PatchFormat::Ups,
            FormatArg::Bps => PatchFormat::Bps,
        }
    }
}
