//! Command handlers for the rom-patcher CLI

pub mod create;
pub mod info;
pub mod patch;

use std::error::Error;
use std::path::Path;

use rompatch::ByteBuffer;

/// Load a file into a buffer, carrying over its stem and extension
pub fn load_buffer(path: &Path) -> Result<ByteBuffer, Box<dyn Error>> {
    let data = std::fs::read(path)
        .map_err(|e| format!("cannot read {}: {e}", path.display()))?;
    let name = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default();
    let extension = path
        .extension()
        .map(|ext| ext.to_string_lossy().into_owned())
        .unwrap_or_default();
    Ok(ByteBuffer::from_bytes(data)
        .with_name(name)
        .with_extension(extension))
}
