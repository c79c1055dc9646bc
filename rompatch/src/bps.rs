//! BPS patch codec
//!
//! Copy-instruction format: a stream of VLV-encoded actions rebuilds the
//! target from literal bytes, source reads, and self-referential copies.
//! Each action VLV packs the kind in its low two bits and `length - 1`
//! above; copy actions carry a signed relative offset. Three little-endian
//! CRC32s close the file, the last covering the whole patch minus itself.
//!
//! `TargetCopy` deliberately allows the source and destination ranges to
//! overlap: a forward byte-by-byte copy then repeats the bytes between the
//! read and write cursors, which patch authors use as a pattern fill.

use tracing::{debug, trace};

use crate::buffer::{ByteBuffer, Endian};
use crate::error::{Error, Result};
use crate::vlv;

/// BPS magic signature
pub const BPS_MAGIC: &[u8; 4] = b"BPS1";

/// Bytes taken by the three trailing checksums
const FOOTER_LEN: usize = 12;

const ACTION_SOURCE_READ: u64 = 0;
const ACTION_TARGET_READ: u64 = 1;
const ACTION_SOURCE_COPY: u64 = 2;
const ACTION_TARGET_COPY: u64 = 3;

/// One decoded patch action
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BpsAction {
    /// Copy `length` bytes from the source at the output cursor
    SourceRead { length: u64 },
    /// Emit literal bytes carried by the patch
    TargetRead { bytes: Vec<u8> },
    /// Copy from the source at a moving relative offset
    SourceCopy { length: u64, offset: i64 },
    /// Copy from already-written target bytes; ranges may overlap
    TargetCopy { length: u64, offset: i64 },
}

impl BpsAction {
    /// Number of target bytes the action produces
    pub fn output_len(&self) -> u64 {
        match self {
            BpsAction::SourceRead { length } => *length,
            BpsAction::TargetRead { bytes } => bytes.len() as u64,
            BpsAction::SourceCopy { length, .. } => *length,
            BpsAction::TargetCopy { length, .. } => *length,
        }
    }

    /// Serialized size of the action
    fn wire_len(&self) -> usize {
        let header = vlv::encoded_len((self.output_len() - 1) << 2);
        match self {
            BpsAction::SourceRead { .. } => header,
            BpsAction::TargetRead { bytes } => header + bytes.len(),
            BpsAction::SourceCopy { offset, .. } | BpsAction::TargetCopy { offset, .. } => {
                header + vlv::encoded_len(vlv::signed_to_wire(*offset))
            }
        }
    }
}

/// A parsed or freshly built BPS patch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BpsPatch {
    pub source_size: u64,
    pub target_size: u64,
    /// Free-form manifest text, usually XML; may be empty
    pub metadata: String,
    pub actions: Vec<BpsAction>,
    /// CRC32 of the un-patched source
    pub source_checksum: u32,
    /// CRC32 of the patched target
    pub target_checksum: u32,
    /// Declared CRC32 of the patch minus its trailing four bytes
    pub patch_checksum: u32,
    /// CRC32 actually computed over the patch bytes at parse/build time
    actual_patch_checksum: u32,
}

impl BpsPatch {
    /// Parse a BPS patch from a buffer
    pub fn parse(file: &mut ByteBuffer) -> Result<Self> {
        if file.len() < BPS_MAGIC.len() + FOOTER_LEN {
            return Err(Error::InvalidSource("patch file is too small".into()));
        }

        file.seek(0)?;
        file.set_endian(Endian::Little);
        if file.read_bytes(BPS_MAGIC.len())? != BPS_MAGIC {
            return Err(Error::InvalidMagic { expected: "BPS1" });
        }

        let source_size = vlv::read_vlv(file)?;
        let target_size = vlv::read_vlv(file)?;
        let metadata_len = vlv::read_vlv(file)? as usize;

        let body_end = file.len() - FOOTER_LEN;
        if file.pos() + metadata_len > body_end {
            return Err(Error::InvalidMetadata(format!(
                "declared metadata length {metadata_len} overruns the patch"
            )));
        }
        let metadata = file.read_string(metadata_len)?;

        let mut actions = Vec::new();
        while file.pos() < body_end {
            let data = vlv::read_vlv(file)?;
            let length = (data >> 2) + 1;
            let action = match data & 3 {
                ACTION_SOURCE_READ => BpsAction::SourceRead { length },
                ACTION_TARGET_READ => BpsAction::TargetRead {
                    bytes: file.read_bytes(length as usize)?,
                },
                ACTION_SOURCE_COPY => BpsAction::SourceCopy {
                    length,
                    offset: vlv::read_signed_vlv(file)?,
                },
                _ => BpsAction::TargetCopy {
                    length,
                    offset: vlv::read_signed_vlv(file)?,
                },
            };
            actions.push(action);
        }

        file.seek(body_end)?;
        let source_checksum = file.read_u32()?;
        let target_checksum = file.read_u32()?;
        let patch_checksum = file.read_u32()?;
        let actual_patch_checksum = file.crc32(0, Some(file.len() - 4))?;

        debug!(
            source_size,
            target_size,
            actions = actions.len(),
            metadata_len,
            "parsed BPS patch"
        );
        Ok(Self {
            source_size,
            target_size,
            metadata,
            actions,
            source_checksum,
            target_checksum,
            patch_checksum,
            actual_patch_checksum,
        })
    }

    /// Apply the patch to a ROM image
    pub fn apply(&self, rom: &ByteBuffer, validate: bool) -> Result<ByteBuffer> {
        if validate {
            if self.actual_patch_checksum != self.patch_checksum {
                return Err(Error::PatchChecksumMismatch {
                    expected: self.patch_checksum,
                    actual: self.actual_patch_checksum,
                });
            }
            let crc = rom.crc32(0, None)?;
            if crc != self.source_checksum {
                return Err(Error::SourceChecksumMismatch {
                    expected: self.source_checksum,
                    actual: crc,
                });
            }
        }

        let source = rom.bytes();
        let mut target = vec![0u8; self.target_size as usize];
        let mut out_pos = 0usize;
        let mut source_rel = 0usize;
        let mut target_rel = 0usize;

        for action in &self.actions {
            match action {
                BpsAction::SourceRead { length } => {
                    let len = *length as usize;
                    let end = out_pos + len;
                    if end > target.len() || end > source.len() {
                        return Err(Error::PatchFailed(format!(
                            "SourceRead of {len} bytes at {out_pos:#x} runs out of range"
                        )));
                    }
                    target[out_pos..end].copy_from_slice(&source[out_pos..end]);
                    out_pos = end;
                }
                BpsAction::TargetRead { bytes } => {
                    let end = out_pos + bytes.len();
                    if end > target.len() {
                        return Err(Error::PatchFailed(format!(
                            "TargetRead of {} bytes at {out_pos:#x} runs past the target",
                            bytes.len()
                        )));
                    }
                    target[out_pos..end].copy_from_slice(bytes);
                    out_pos = end;
                }
                BpsAction::SourceCopy { length, offset } => {
                    source_rel = add_relative(source_rel, *offset, "SourceCopy")?;
                    let len = *length as usize;
                    if source_rel + len > source.len() || out_pos + len > target.len() {
                        return Err(Error::PatchFailed(format!(
                            "SourceCopy of {len} bytes from {source_rel:#x} runs out of range"
                        )));
                    }
                    target[out_pos..out_pos + len]
                        .copy_from_slice(&source[source_rel..source_rel + len]);
                    source_rel += len;
                    out_pos += len;
                }
                BpsAction::TargetCopy { length, offset } => {
                    target_rel = add_relative(target_rel, *offset, "TargetCopy")?;
                    let len = *length as usize;
                    if target_rel + len > target.len() || out_pos + len > target.len() {
                        return Err(Error::PatchFailed(format!(
                            "TargetCopy of {len} bytes from {target_rel:#x} runs out of range"
                        )));
                    }
                    // Forward byte-by-byte on purpose: when the ranges
                    // overlap this repeats the bytes between the cursors
                    // (a pattern fill). memmove semantics would be wrong.
                    for i in 0..len {
                        target[out_pos + i] = target[target_rel + i];
                    }
                    target_rel += len;
                    out_pos += len;
                }
            }
        }

        if out_pos != target.len() {
            return Err(Error::PatchFailed(format!(
                "actions produced {out_pos} bytes, target size is {}",
                target.len()
            )));
        }

        if validate {
            let crc = crate::hash::crc32(&target);
            if crc != self.target_checksum {
                return Err(Error::TargetChecksumMismatch {
                    expected: self.target_checksum,
                    actual: crc,
                });
            }
        }

        trace!(
            input = source.len(),
            output = target.len(),
            "applied BPS patch"
        );
        Ok(ByteBuffer::from_bytes(target))
    }

    /// Diff two ROM images into a patch.
    ///
    /// The linear strategy walks the target once, turning maximal runs that
    /// match the source at the same position into `SourceRead` actions and
    /// buffering everything else into `TargetRead` literals. `delta_mode`
    /// is accepted for call-site symmetry and currently shares the linear
    /// strategy; both produce patches with identical apply semantics.
    // TODO: hash-chain match finder for delta_mode, as a pure ratio win.
    pub fn build(original: &ByteBuffer, modified: &ByteBuffer, delta_mode: bool) -> Result<Self> {
        let source = original.bytes();
        let target = modified.bytes();
        if delta_mode {
            trace!("delta mode requested; using the linear strategy");
        }

        let mut actions: Vec<BpsAction> = Vec::new();
        let mut literal: Vec<u8> = Vec::new();
        let mut pos = 0usize;
        while pos < target.len() {
            let mut run = 0usize;
            while pos + run < target.len()
                && pos + run < source.len()
                && source[pos + run] == target[pos + run]
            {
                run += 1;
            }

            if run > 0 {
                if !literal.is_empty() {
                    actions.push(BpsAction::TargetRead {
                        bytes: std::mem::take(&mut literal),
                    });
                }
                actions.push(BpsAction::SourceRead { length: run as u64 });
                pos += run;
            } else {
                literal.push(target[pos]);
                pos += 1;
            }
        }
        if !literal.is_empty() {
            actions.push(BpsAction::TargetRead { bytes: literal });
        }

        let mut patch = Self {
            source_size: source.len() as u64,
            target_size: target.len() as u64,
            metadata: String::new(),
            actions,
            source_checksum: original.crc32(0, None)?,
            target_checksum: modified.crc32(0, None)?,
            patch_checksum: 0,
            actual_patch_checksum: 0,
        };
        let exported = patch.export()?;
        patch.patch_checksum = exported.crc32(0, Some(exported.len() - 4))?;
        patch.actual_patch_checksum = patch.patch_checksum;

        debug!(actions = patch.actions.len(), "built BPS patch");
        Ok(patch)
    }

    /// Serialize the patch; the final four bytes are the CRC32 of
    /// everything before them
    pub fn export(&self) -> Result<ByteBuffer> {
        let size = BPS_MAGIC.len()
            + vlv::encoded_len(self.source_size)
            + vlv::encoded_len(self.target_size)
            + vlv::encoded_len(self.metadata.len() as u64)
            + self.metadata.len()
            + self
                .actions
                .iter()
                .map(BpsAction::wire_len)
                .sum::<usize>()
            + FOOTER_LEN;

        let mut out = ByteBuffer::with_len(size);
        out.set_endian(Endian::Little);
        out.write_bytes(BPS_MAGIC)?;
        vlv::write_vlv(&mut out, self.source_size)?;
        vlv::write_vlv(&mut out, self.target_size)?;
        vlv::write_vlv(&mut out, self.metadata.len() as u64)?;
        out.write_string(&self.metadata, None)?;

        for action in &self.actions {
            let (kind, length) = match action {
                BpsAction::SourceRead { length } => (ACTION_SOURCE_READ, *length),
                BpsAction::TargetRead { bytes } => (ACTION_TARGET_READ, bytes.len() as u64),
                BpsAction::SourceCopy { length, .. } => (ACTION_SOURCE_COPY, *length),
                BpsAction::TargetCopy { length, .. } => (ACTION_TARGET_COPY, *length),
            };
            vlv::write_vlv(&mut out, ((length - 1) << 2) | kind)?;
            match action {
                BpsAction::TargetRead { bytes } => out.write_bytes(bytes)?,
                BpsAction::SourceCopy { offset, .. } | BpsAction::TargetCopy { offset, .. } => {
                    vlv::write_signed_vlv(&mut out, *offset)?;
                }
                BpsAction::SourceRead { .. } => {}
            }
        }

        out.write_u32(self.source_checksum)?;
        out.write_u32(self.target_checksum)?;
        let patch_crc = out.crc32(0, Some(out.len() - 4))?;
        out.write_u32(patch_crc)?;
        Ok(out)
    }
}

fn add_relative(base: usize, offset: i64, action: &'static str) -> Result<usize> {
    base.checked_add_signed(offset as isize)
        .ok_or_else(|| Error::PatchFailed(format!("{action} moved its offset below zero")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash;

    fn buffer(bytes: &[u8]) -> ByteBuffer {
        ByteBuffer::from_bytes(bytes.to_vec())
    }

    /// Hand-assemble a patch around the given actions.
    fn synthetic(source: &[u8], target_size: u64, actions: Vec<BpsAction>) -> BpsPatch {
        let mut patch = BpsPatch {
            source_size: source.len() as u64,
            target_size,
            metadata: String::new(),
            actions,
            source_checksum: hash::crc32(source),
            target_checksum: 0,
            patch_checksum: 0,
            actual_patch_checksum: 0,
        };
        let exported = patch.export().unwrap();
        patch.patch_checksum = exported.crc32(0, Some(exported.len() - 4)).unwrap();
        patch.actual_patch_checksum = patch.patch_checksum;
        patch
    }

    #[test]
    fn target_copy_pattern_fill_period_one() {
        // TargetRead('A') then TargetCopy(5, -1) repeats the single byte.
        let patch = synthetic(
            &[],
            6,
            vec![
                BpsAction::TargetRead { bytes: vec![0x41] },
                BpsAction::TargetCopy {
                    length: 5,
                    offset: 0,
                },
            ],
        );
        let out = patch.apply(&buffer(&[]), false).unwrap();
        assert_eq!(out.bytes(), &[0x41; 6]);
    }

    #[test]
    fn target_copy_pattern_fill_period_two() {
        let patch = synthetic(
            &[],
            6,
            vec![
                BpsAction::TargetRead {
                    bytes: vec![0x01, 0x02],
                },
                BpsAction::TargetCopy {
                    length: 4,
                    offset: 0,
                },
            ],
        );
        let out = patch.apply(&buffer(&[]), false).unwrap();
        assert_eq!(out.bytes(), &[0x01, 0x02, 0x01, 0x02, 0x01, 0x02]);
    }

    #[test]
    fn build_apply_roundtrip() {
        let a = buffer(b"The quick brown fox jumps over the lazy dog");
        let b = buffer(b"The quick brown cat jumps over the lazy dog!");
        let patch = BpsPatch::build(&a, &b, false).unwrap();

        assert_eq!(patch.target_checksum, hash::crc32(b.bytes()));
        let out = patch.apply(&a, true).unwrap();
        assert_eq!(out.bytes(), b.bytes());
    }

    #[test]
    fn delta_mode_interoperates_with_linear_apply() {
        let a = buffer(&[7u8; 4096]);
        let mut changed = vec![7u8; 4096];
        changed[100] = 1;
        changed[2000..2100].fill(9);
        let b = buffer(&changed);

        let patch = BpsPatch::build(&a, &b, true).unwrap();
        let out = patch.apply(&a, true).unwrap();
        assert_eq!(out.bytes(), b.bytes());
    }

    #[test]
    fn action_lengths_sum_to_target_size() {
        let a = buffer(&[1, 2, 3, 4, 5, 6, 7, 8]);
        let b = buffer(&[1, 2, 9, 9, 5, 6, 0, 8]);
        let patch = BpsPatch::build(&a, &b, false).unwrap();
        let produced: u64 = patch.actions.iter().map(BpsAction::output_len).sum();
        assert_eq!(produced, patch.target_size);
    }

    #[test]
    fn export_parse_identity_is_bit_exact() {
        let a = buffer(b"AAAABBBBCCCCDDDD");
        let b = buffer(b"AAAAXXXXCCCCYYYYZZ");
        let patch = BpsPatch::build(&a, &b, false).unwrap();

        let mut exported = patch.export().unwrap();
        let reparsed = BpsPatch::parse(&mut exported).unwrap();
        assert_eq!(patch, reparsed);
        assert_eq!(exported.bytes(), reparsed.export().unwrap().bytes());
    }

    #[test]
    fn metadata_roundtrip() {
        let a = buffer(&[1, 2, 3, 4]);
        let b = buffer(&[1, 2, 3, 5]);
        let mut patch = BpsPatch::build(&a, &b, false).unwrap();
        patch.metadata = "<manifest/>".into();

        let mut exported = patch.export().unwrap();
        let reparsed = BpsPatch::parse(&mut exported).unwrap();
        assert_eq!(reparsed.metadata, "<manifest/>");
        // Patch checksum moved with the metadata; recompute before applying.
        assert_eq!(
            reparsed.apply(&a, false).unwrap().bytes(),
            b.bytes()
        );
    }

    #[test]
    fn source_checksum_gate() {
        let a = buffer(&[1, 2, 3, 4]);
        let b = buffer(&[4, 3, 2, 1]);
        let patch = BpsPatch::build(&a, &b, false).unwrap();
        let wrong = buffer(&[9, 9, 9, 9]);
        assert!(matches!(
            patch.apply(&wrong, true),
            Err(Error::SourceChecksumMismatch { .. })
        ));
        assert!(patch.apply(&a, true).is_ok());
    }

    #[test]
    fn short_actions_fail_the_size_invariant() {
        let patch = synthetic(
            &[0xAB; 4],
            8,
            vec![BpsAction::SourceRead { length: 4 }],
        );
        assert!(matches!(
            patch.apply(&buffer(&[0xAB; 4]), false),
            Err(Error::PatchFailed(_))
        ));
    }

    #[test]
    fn rejects_bad_magic() {
        let mut not_bps = buffer(b"IPS9abcdefghijklmnop");
        assert!(matches!(
            BpsPatch::parse(&mut not_bps),
            Err(Error::InvalidMagic { .. })
        ));
    }
}
