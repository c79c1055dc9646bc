//! UPS patch codec
//!
//! XOR-based successor to IPS: VLV-encoded relative offsets, runs of XOR
//! bytes terminated by `0x00`, declared input/output sizes, and three
//! little-endian CRC32s at the tail (source, target, and the patch itself
//! minus its own four checksum bytes). Because every change is an XOR, one
//! patch converts A to B and B back to A.

use tracing::{debug, trace};

use crate::buffer::{ByteBuffer, Endian};
use crate::error::{Error, Result};
use crate::vlv;

/// UPS magic signature
pub const UPS_MAGIC: &[u8; 4] = b"UPS1";

/// Bytes taken by the three trailing checksums
const FOOTER_LEN: usize = 12;

/// A run of XOR bytes at a relative position
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpsRecord {
    /// Distance from the end of the previous record's span (plus its
    /// terminator) to the start of this run
    pub relative_offset: u64,
    /// Non-zero XOR bytes; the terminating `0x00` is implicit
    pub xor: Vec<u8>,
}

/// A parsed or freshly built UPS patch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpsPatch {
    pub input_size: u64,
    pub output_size: u64,
    pub records: Vec<UpsRecord>,
    /// CRC32 of the un-patched input
    pub input_checksum: u32,
    /// CRC32 of the patched output
    pub output_checksum: u32,
    /// Declared CRC32 of the patch minus its trailing four bytes
    pub patch_checksum: u32,
    /// CRC32 actually computed over the patch bytes at parse/build time
    actual_patch_checksum: u32,
}

impl UpsPatch {
    /// Parse a UPS patch from a buffer
    pub fn parse(file: &mut ByteBuffer) -> Result<Self> {
        if file.len() < UPS_MAGIC.len() + FOOTER_LEN {
            return Err(Error::InvalidSource("patch file is too small".into()));
        }

        file.seek(0)?;
        file.set_endian(Endian::Little);
        if file.read_bytes(UPS_MAGIC.len())? != UPS_MAGIC {
            return Err(Error::InvalidMagic { expected: "UPS1" });
        }

        let input_size = vlv::read_vlv(file)?;
        let output_size = vlv::read_vlv(file)?;
        if input_size == 0 || output_size == 0 {
            return Err(Error::InvalidRecord {
                offset: UPS_MAGIC.len(),
                reason: "declared file sizes must be non-zero".into(),
            });
        }

        let body_end = file.len() - FOOTER_LEN;
        let mut records = Vec::new();
        while file.pos() < body_end {
            let relative_offset = vlv::read_vlv(file)?;
            let mut xor = Vec::new();
            loop {
                if file.pos() >= body_end {
                    return Err(Error::InvalidRecord {
                        offset: file.pos(),
                        reason: "XOR run is missing its terminator".into(),
                    });
                }
                let byte = file.read_u8()?;
                if byte == 0 {
                    break;
                }
                xor.push(byte);
            }
            records.push(UpsRecord {
                relative_offset,
                xor,
            });
        }

        file.seek(body_end)?;
        let input_checksum = file.read_u32()?;
        let output_checksum = file.read_u32()?;
        let patch_checksum = file.read_u32()?;
        let actual_patch_checksum = file.crc32(0, Some(file.len() - 4))?;

        debug!(
            input_size,
            output_size,
            records = records.len(),
            "parsed UPS patch"
        );
        Ok(Self {
            input_size,
            output_size,
            records,
            input_checksum,
            output_checksum,
            patch_checksum,
            actual_patch_checksum,
        })
    }

    /// Apply the patch to a ROM image.
    ///
    /// With `validate`, the patch's own CRC and the source CRC gate the
    /// application and the output CRC is verified afterwards. Without it,
    /// application is best-effort and oversized inputs widen the declared
    /// sizes (bit-for-bit compatible with Rom Patcher JS PR #40).
    pub fn apply(&self, rom: &ByteBuffer, validate: bool) -> Result<ByteBuffer> {
        if validate {
            if self.actual_patch_checksum != self.patch_checksum {
                return Err(Error::PatchChecksumMismatch {
                    expected: self.patch_checksum,
                    actual: self.actual_patch_checksum,
                });
            }
            let crc = rom.crc32(0, None)?;
            if crc != self.input_checksum {
                return Err(Error::SourceChecksumMismatch {
                    expected: self.input_checksum,
                    actual: crc,
                });
            }
        }

        let source = rom.bytes();
        let mut input_size = self.input_size as usize;
        let mut output_size = self.output_size as usize;
        if !validate && source.len() > input_size {
            input_size = source.len();
            if output_size < input_size {
                output_size = input_size;
            }
        }

        let mut target = vec![0u8; output_size];
        let prefix = source.len().min(input_size).min(output_size);
        target[..prefix].copy_from_slice(&source[..prefix]);

        let mut pos = 0usize;
        for record in &self.records {
            pos += record.relative_offset as usize;
            for (i, &x) in record.xor.iter().enumerate() {
                let index = pos + i;
                if index >= target.len() {
                    break;
                }
                let byte = source.get(index).copied().unwrap_or(0);
                target[index] = byte ^ x;
            }
            // The record terminator occupies one position in offset space.
            pos += record.xor.len() + 1;
        }

        if validate {
            let crc = crate::hash::crc32(&target);
            if crc != self.output_checksum {
                return Err(Error::TargetChecksumMismatch {
                    expected: self.output_checksum,
                    actual: crc,
                });
            }
        }

        trace!(
            input = source.len(),
            output = target.len(),
            "applied UPS patch"
        );
        Ok(ByteBuffer::from_bytes(target))
    }

    /// Diff two ROM images into a patch
    pub fn build(original: &ByteBuffer, modified: &ByteBuffer) -> Result<Self> {
        let source = original.bytes();
        let target = modified.bytes();

        let mut records = Vec::new();
        let mut previous_seek = 0usize;
        let mut pos = 0usize;
        while pos < target.len() {
            if source.get(pos).copied().unwrap_or(0) == target[pos] {
                pos += 1;
                continue;
            }

            let start = pos;
            let mut xor = Vec::new();
            while pos < target.len() {
                let x = source.get(pos).copied().unwrap_or(0) ^ target[pos];
                if x == 0 {
                    break;
                }
                xor.push(x);
                pos += 1;
            }

            records.push(UpsRecord {
                relative_offset: (start - previous_seek) as u64,
                xor,
            });
            previous_seek = pos + 1;
        }

        let mut patch = Self {
            input_size: source.len() as u64,
            output_size: target.len() as u64,
            records,
            input_checksum: original.crc32(0, None)?,
            output_checksum: modified.crc32(0, None)?,
            patch_checksum: 0,
            actual_patch_checksum: 0,
        };
        let exported = patch.export()?;
        patch.patch_checksum = exported.crc32(0, Some(exported.len() - 4))?;
        patch.actual_patch_checksum = patch.patch_checksum;

        debug!(records = patch.records.len(), "built UPS patch");
        Ok(patch)
    }

    /// Serialize the patch; the final four bytes are the CRC32 of
    /// everything before them
    pub fn export(&self) -> Result<ByteBuffer> {
        let size = UPS_MAGIC.len()
            + vlv::encoded_len(self.input_size)
            + vlv::encoded_len(self.output_size)
            + self
                .records
                .iter()
                .map(|record| vlv::encoded_len(record.relative_offset) + record.xor.len() + 1)
                .sum::<usize>()
            + FOOTER_LEN;

        let mut out = ByteBuffer::with_len(size);
        out.set_endian(Endian::Little);
        out.write_bytes(UPS_MAGIC)?;
        vlv::write_vlv(&mut out, self.input_size)?;
        vlv::write_vlv(&mut out, self.output_size)?;
        for record in &self.records {
            vlv::write_vlv(&mut out, record.relative_offset)?;
            out.write_bytes(&record.xor)?;
            out.write_u8(0)?;
        }
        out.write_u32(self.input_checksum)?;
        out.write_u32(self.output_checksum)?;
        let patch_crc = out.crc32(0, Some(out.len() - 4))?;
        out.write_u32(patch_crc)?;
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash;

    fn buffer(bytes: &[u8]) -> ByteBuffer {
        ByteBuffer::from_bytes(bytes.to_vec())
    }

    #[test]
    fn build_apply_is_symmetric() {
        let a = buffer(&[0x41, 0x42, 0x43, 0x44]);
        let b = buffer(&[0x41, 0x42, 0x47, 0x44]);
        let patch = UpsPatch::build(&a, &b).unwrap();

        assert_eq!(patch.input_checksum, hash::crc32(a.bytes()));
        assert_eq!(patch.output_checksum, hash::crc32(b.bytes()));

        let forward = patch.apply(&a, false).unwrap();
        assert_eq!(forward.bytes(), b.bytes());
        let backward = patch.apply(&forward, false).unwrap();
        assert_eq!(backward.bytes(), a.bytes());
    }

    #[test]
    fn patch_checksum_covers_all_but_its_own_bytes() {
        let a = buffer(&[1, 2, 3, 4, 5, 6, 7, 8]);
        let b = buffer(&[1, 2, 0, 4, 5, 6, 0, 8]);
        let patch = UpsPatch::build(&a, &b).unwrap();

        let exported = patch.export().unwrap();
        let declared = {
            let mut tail = exported.clone();
            tail.seek(exported.len() - 4).unwrap();
            tail.read_u32().unwrap()
        };
        assert_eq!(
            declared,
            hash::crc32(&exported.bytes()[..exported.len() - 4])
        );
        assert_eq!(declared, patch.patch_checksum);
    }

    #[test]
    fn export_parse_identity() {
        let a = buffer(&[0u8; 300]);
        let mut changed = vec![0u8; 300];
        changed[10] = 1;
        changed[200] = 2;
        changed[299] = 3;
        let b = buffer(&changed);

        let patch = UpsPatch::build(&a, &b).unwrap();
        let mut exported = patch.export().unwrap();
        let reparsed = UpsPatch::parse(&mut exported).unwrap();
        assert_eq!(patch, reparsed);
        assert_eq!(exported.bytes(), reparsed.export().unwrap().bytes());
    }

    #[test]
    fn validated_apply_checks_source_crc() {
        let a = buffer(&[1, 2, 3, 4]);
        let b = buffer(&[1, 9, 3, 4]);
        let patch = UpsPatch::build(&a, &b).unwrap();

        assert!(patch.apply(&a, true).is_ok());
        let wrong = buffer(&[5, 5, 5, 5]);
        assert!(matches!(
            patch.apply(&wrong, true),
            Err(Error::SourceChecksumMismatch { .. })
        ));
    }

    #[test]
    fn corrupted_patch_fails_checksum_validation() {
        let a = buffer(&[1, 2, 3, 4]);
        let b = buffer(&[1, 9, 3, 4]);
        let mut exported = UpsPatch::build(&a, &b).unwrap().export().unwrap();

        // Flip an XOR byte; the trailing patch CRC no longer matches.
        let mut bytes = exported.bytes().to_vec();
        let index = bytes.len() - FOOTER_LEN - 2;
        bytes[index] ^= 0xFF;
        exported = ByteBuffer::from_bytes(bytes);

        let patch = UpsPatch::parse(&mut exported).unwrap();
        assert!(matches!(
            patch.apply(&a, true),
            Err(Error::PatchChecksumMismatch { .. })
        ));
        assert!(patch.apply(&a, false).is_ok());
    }

    #[test]
    fn oversized_rom_widens_sizes_when_not_validating() {
        let a = buffer(&[1, 2, 3, 4]);
        let b = buffer(&[1, 2, 3, 5]);
        let patch = UpsPatch::build(&a, &b).unwrap();

        // A ROM longer than the declared input keeps its full length.
        let longer = buffer(&[1, 2, 3, 4, 0xAA, 0xBB]);
        let out = patch.apply(&longer, false).unwrap();
        assert_eq!(out.bytes(), &[1, 2, 3, 5, 0xAA, 0xBB]);
    }

    #[test]
    fn growing_patch_zero_fills_the_extension() {
        let a = buffer(&[1, 2]);
        let b = buffer(&[1, 2, 0, 0x77]);
        let patch = UpsPatch::build(&a, &b).unwrap();
        let out = patch.apply(&a, true).unwrap();
        assert_eq!(out.bytes(), b.bytes());
    }

    #[test]
    fn rejects_bad_magic_and_zero_sizes() {
        let mut not_ups = buffer(b"NOPE12345678123456781234");
        assert!(matches!(
            UpsPatch::parse(&mut not_ups),
            Err(Error::InvalidMagic { .. })
        ));
    }
}
