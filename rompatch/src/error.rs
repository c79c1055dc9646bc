//! Error types for buffer and patch operations

use thiserror::Error;

/// Result type for patch operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the buffer, the codecs, and the ROM orchestrator
#[derive(Error, Debug)]
pub enum Error {
    /// Input data cannot be used as a source buffer
    #[error("invalid source: {0}")]
    InvalidSource(String),

    /// Offset lies outside the buffer
    #[error("offset {offset:#x} out of bounds (buffer size {size:#x})")]
    OutOfBounds { offset: usize, size: usize },

    /// Length is not valid for the requested operation
    #[error("invalid length: {0}")]
    InvalidLength(usize),

    /// A structured read or write would run past the end of the buffer
    #[error("unexpected end of file at offset {offset:#x} (buffer size {size:#x})")]
    EndOfFile { offset: usize, size: usize },

    /// No codec recognizes the patch magic
    #[error("unknown patch format (unrecognized magic)")]
    UnknownPatchFormat,

    /// Magic bytes do not match the expected format
    #[error("invalid magic: expected {expected:?}")]
    InvalidMagic { expected: &'static str },

    /// A patch record is malformed
    #[error("invalid record at offset {offset:#x}: {reason}")]
    InvalidRecord { offset: usize, reason: String },

    /// Patch metadata is malformed
    #[error("invalid metadata: {0}")]
    InvalidMetadata(String),

    /// Source ROM checksum does not match the patch header
    #[error("source checksum mismatch: expected {expected:08x}, got {actual:08x}")]
    SourceChecksumMismatch { expected: u32, actual: u32 },

    /// Patched output checksum does not match the patch header
    #[error("target checksum mismatch: expected {expected:08x}, got {actual:08x}")]
    TargetChecksumMismatch { expected: u32, actual: u32 },

    /// Patch file checksum does not match its own trailing CRC32
    #[error("patch checksum mismatch: expected {expected:08x}, got {actual:08x}")]
    PatchChecksumMismatch { expected: u32, actual: u32 },

    /// Patch application or construction failed
    #[error("patch failed: {0}")]
    PatchFailed(String),
}
