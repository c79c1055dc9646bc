//! ROM patching library
//!
//! Implements the three classic ROM patch formats (IPS, UPS, and BPS)
//! over an in-memory buffer abstraction, plus the platform plumbing that
//! real patching needs: console detection, copier-header add/remove, and
//! post-patch checksum repair for Game Boy and Mega Drive images.
//!
//! The library never touches the file system; callers load bytes into a
//! [`ByteBuffer`] and get freshly owned buffers back.
//!
//! ## Applying a patch
//!
//! ```
//! use rompatch::{parse_patch, ByteBuffer};
//!
//! let rom = ByteBuffer::from_bytes(vec![0u8; 8]);
//! let mut patch_file = ByteBuffer::from_bytes(vec![
//!     0x50, 0x41, 0x54, 0x43, 0x48, // "PATCH"
//!     0x00, 0x00, 0x05, 0x00, 0x03, 0xAA, 0xBB, 0xCC,
//!     0x45, 0x4F, 0x46, // "EOF"
//! ]);
//!
//! let patch = parse_patch(&mut patch_file)?;
//! let patched = patch.apply(&rom, false)?;
//! assert_eq!(&patched.bytes()[5..], &[0xAA, 0xBB, 0xCC]);
//! # Ok::<(), rompatch::Error>(())
//! ```

pub mod bps;
pub mod buffer;
pub mod error;
pub mod hash;
pub mod ips;
pub mod patcher;
pub mod rom;
pub mod ups;
pub mod vlv;

pub use bps::{BpsAction, BpsPatch};
pub use buffer::{ByteBuffer, Endian};
pub use error::{Error, Result};
pub use ips::{IpsData, IpsPatch, IpsRecord};
pub use patcher::{
    apply_with_options, create_patch, parse_patch, ApplyOptions, Patch, PatchFormat,
};
pub use rom::{
    add_header, can_add_header, can_remove_header, fix_checksum, header_info_for, remove_header,
    HeaderInfo, RomSystem,
};
pub use ups::{UpsPatch, UpsRecord};
