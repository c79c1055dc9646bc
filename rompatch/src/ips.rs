//! IPS patch codec
//!
//! The oldest of the three formats: big-endian records of
//! `offset:u24, length:u16, data`, a zero length marking an RLE record,
//! an `EOF` terminator, and an optional 3-byte truncation length after it.
//! Offsets are capped at 16 MiB by the 24-bit field; the format carries no
//! checksums of its own.

use tracing::{debug, trace};

use crate::buffer::{ByteBuffer, Endian};
use crate::error::{Error, Result};

/// IPS magic signature
pub const IPS_MAGIC: &[u8; 5] = b"PATCH";

/// The `EOF` terminator read as a 24-bit offset
const EOF_MARKER: u32 = 0x45_4F_46;

/// Largest offset a 24-bit record can address (16 MiB)
const MAX_OFFSET: usize = 1 << 24;

/// Longest data run a single record can carry
const MAX_RECORD_LEN: usize = 0xFFFF;

/// Builder heuristic: gaps shorter than this merge into the previous record
const MERGE_DISTANCE: usize = 6;

/// Payload of a single IPS record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IpsData {
    /// Literal bytes written at the record offset
    Simple(Vec<u8>),
    /// One byte repeated `len` times
    Rle { len: u16, byte: u8 },
}

impl IpsData {
    /// Number of target bytes the record covers
    pub fn len(&self) -> usize {
        match self {
            IpsData::Simple(data) => data.len(),
            IpsData::Rle { len, .. } => *len as usize,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Serialized size past the 3-byte offset
    fn wire_len(&self) -> usize {
        match self {
            IpsData::Simple(data) => 2 + data.len(),
            IpsData::Rle { .. } => 2 + 2 + 1,
        }
    }
}

/// One patch record: where to write and what
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IpsRecord {
    pub offset: u32,
    pub data: IpsData,
}

impl IpsRecord {
    /// First target offset past the record
    fn end(&self) -> usize {
        self.offset as usize + self.data.len()
    }
}

/// A parsed or freshly built IPS patch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IpsPatch {
    /// Records in file order; later records may overlap earlier ones
    pub records: Vec<IpsRecord>,
    /// Optional output truncation length
    pub truncate: Option<u32>,
}

impl IpsPatch {
    /// Parse an IPS patch from a buffer
    pub fn parse(file: &mut ByteBuffer) -> Result<Self> {
        file.seek(0)?;
        file.set_endian(Endian::Big);

        if file.read_bytes(IPS_MAGIC.len())? != IPS_MAGIC {
            return Err(Error::InvalidMagic { expected: "PATCH" });
        }

        let mut patch = IpsPatch::default();
        while !file.is_eof() {
            let offset = file.read_u24()?;

            if offset == EOF_MARKER {
                if file.is_eof() {
                    break;
                }
                if file.pos() + 3 == file.len() {
                    patch.truncate = Some(file.read_u24()?);
                    break;
                }
                // "EOF" with any other amount of data left is a real record
                // offset, so fall through.
            }

            let length = file.read_u16()?;
            let data = if length == 0 {
                let len = file.read_u16()?;
                let byte = file.read_u8()?;
                IpsData::Rle { len, byte }
            } else {
                IpsData::Simple(file.read_bytes(length as usize)?)
            };
            patch.records.push(IpsRecord { offset, data });
        }

        debug!(
            records = patch.records.len(),
            truncate = ?patch.truncate,
            "parsed IPS patch"
        );
        Ok(patch)
    }

    /// Output size produced when applying against `input_size` source bytes
    fn target_size(&self, input_size: usize) -> usize {
        match self.truncate {
            Some(len) => len as usize,
            None => self
                .records
                .iter()
                .fold(input_size, |acc, record| acc.max(record.end())),
        }
    }

    /// Apply the patch to a ROM image.
    ///
    /// IPS carries no checksums, so `validate` has nothing to check and the
    /// application is always best-effort.
    pub fn apply(&self, rom: &ByteBuffer, _validate: bool) -> Result<ByteBuffer> {
        let source = rom.bytes();
        let target_size = self.target_size(source.len());
        let mut target = vec![0u8; target_size];

        let prefix = source.len().min(target_size);
        target[..prefix].copy_from_slice(&source[..prefix]);

        for record in &self.records {
            let offset = record.offset as usize;
            if offset >= target.len() {
                continue;
            }
            // Writes past a truncated end are dropped.
            let end = record.end().min(target.len());
            match &record.data {
                IpsData::Simple(data) => {
                    target[offset..end].copy_from_slice(&data[..end - offset]);
                }
                IpsData::Rle { byte, .. } => target[offset..end].fill(*byte),
            }
        }

        trace!(
            input = source.len(),
            output = target.len(),
            "applied IPS patch"
        );
        Ok(ByteBuffer::from_bytes(target))
    }

    /// Diff two ROM images into a patch.
    ///
    /// Scans the modified file against the original (reading zeros past its
    /// end), emitting a record per differing run. Runs close behind a simple
    /// record are folded into it; runs of one repeated byte become RLE
    /// records when that pays off.
    pub fn build(original: &ByteBuffer, modified: &ByteBuffer) -> Result<Self> {
        let source = original.bytes();
        let target = modified.bytes();
        let mut patch = IpsPatch::default();

        let mut pos = 0;
        while pos < target.len() {
            if source.get(pos).copied().unwrap_or(0) == target[pos] {
                pos += 1;
                continue;
            }

            let start = pos;
            let mut run = Vec::new();
            let mut rle_eligible = true;
            while pos < target.len() && run.len() < MAX_RECORD_LEN {
                if source.get(pos).copied().unwrap_or(0) == target[pos] {
                    break;
                }
                if target[pos] != target[start] {
                    rle_eligible = false;
                }
                run.push(target[pos]);
                pos += 1;
            }

            if !patch.merge_into_previous(target, start, &run, rle_eligible) {
                patch.push_record(start, run, rle_eligible)?;
            }
        }

        if target.len() > source.len() {
            patch.cover_extended_tail(target.len())?;
        } else if target.len() < source.len() {
            patch.truncate = Some(target.len() as u32);
        }

        debug!(
            records = patch.records.len(),
            truncate = ?patch.truncate,
            "built IPS patch"
        );
        Ok(patch)
    }

    /// Fold a differing run into the preceding simple record when the gap
    /// between them is tiny. Matches the reference builder: the gap bound
    /// ignores the 5-byte record header a separate record would cost, and a
    /// long RLE-worthy run is never folded.
    fn merge_into_previous(
        &mut self,
        target: &[u8],
        start: usize,
        run: &[u8],
        rle_eligible: bool,
    ) -> bool {
        let Some(previous) = self.records.last_mut() else {
            return false;
        };
        let IpsData::Simple(data) = &mut previous.data else {
            return false;
        };

        let gap_start = previous.offset as usize + data.len();
        let distance = start - gap_start;
        if distance >= MERGE_DISTANCE
            || data.len() + distance + run.len() >= MAX_RECORD_LEN
            || (rle_eligible && run.len() > MERGE_DISTANCE)
        {
            return false;
        }

        data.extend_from_slice(&target[gap_start..start]);
        data.extend_from_slice(run);
        true
    }

    fn push_record(&mut self, offset: usize, run: Vec<u8>, rle_eligible: bool) -> Result<()> {
        if offset >= MAX_OFFSET {
            return Err(Error::PatchFailed(
                "files are too big for the IPS format".into(),
            ));
        }
        let data = if rle_eligible && run.len() > 2 {
            IpsData::Rle {
                len: run.len() as u16,
                byte: run[0],
            }
        } else {
            IpsData::Simple(run)
        };
        self.records.push(IpsRecord {
            offset: offset as u32,
            data,
        });
        Ok(())
    }

    /// When the modified file grew but its new tail matched the implicit
    /// zero padding, no record reaches the end; plant a one-byte record at
    /// the last offset so apply recomputes the right size.
    fn cover_extended_tail(&mut self, target_len: usize) -> Result<()> {
        let covered = self.records.iter().map(IpsRecord::end).max().unwrap_or(0);
        if covered >= target_len {
            return Ok(());
        }
        let last = target_len - 1;
        if last >= MAX_OFFSET {
            return Err(Error::PatchFailed(
                "files are too big for the IPS format".into(),
            ));
        }
        self.records.push(IpsRecord {
            offset: last as u32,
            data: IpsData::Simple(vec![0x00]),
        });
        Ok(())
    }

    /// Serialize the patch
    pub fn export(&self) -> Result<ByteBuffer> {
        let size = IPS_MAGIC.len()
            + self
                .records
                .iter()
                .map(|record| 3 + record.data.wire_len())
                .sum::<usize>()
            + 3
            + if self.truncate.is_some() { 3 } else { 0 };

        let mut out = ByteBuffer::with_len(size);
        out.write_bytes(IPS_MAGIC)?;
        for record in &self.records {
            out.write_u24(record.offset)?;
            match &record.data {
                IpsData::Simple(data) => {
                    if data.is_empty() || data.len() > MAX_RECORD_LEN {
                        return Err(Error::InvalidLength(data.len()));
                    }
                    out.write_u16(data.len() as u16)?;
                    out.write_bytes(data)?;
                }
                IpsData::Rle { len, byte } => {
                    out.write_u16(0)?;
                    out.write_u16(*len)?;
                    out.write_u8(*byte)?;
                }
            }
        }
        out.write_bytes(b"EOF")?;
        if let Some(len) = self.truncate {
            out.write_u24(len)?;
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(bytes: &[u8]) -> IpsPatch {
        IpsPatch::parse(&mut ByteBuffer::from_bytes(bytes.to_vec())).unwrap()
    }

    fn apply(patch: &IpsPatch, rom: &[u8]) -> Vec<u8> {
        patch
            .apply(&ByteBuffer::from_bytes(rom.to_vec()), false)
            .unwrap()
            .into_bytes()
    }

    #[test]
    fn simple_record() {
        let patch = parse(&[
            0x50, 0x41, 0x54, 0x43, 0x48, // PATCH
            0x00, 0x00, 0x05, // offset 5
            0x00, 0x03, // length 3
            0xAA, 0xBB, 0xCC, // data
            0x45, 0x4F, 0x46, // EOF
        ]);
        assert_eq!(
            apply(&patch, &[0x00; 8]),
            &[0x00, 0x00, 0x00, 0x00, 0x00, 0xAA, 0xBB, 0xCC]
        );
    }

    #[test]
    fn rle_record() {
        let patch = parse(&[
            0x50, 0x41, 0x54, 0x43, 0x48, // PATCH
            0x00, 0x00, 0x02, // offset 2
            0x00, 0x00, // RLE marker
            0x00, 0x04, // run length 4
            0xFF, // fill byte
            0x45, 0x4F, 0x46, // EOF
        ]);
        assert_eq!(
            apply(&patch, &[0x00; 6]),
            &[0x00, 0x00, 0xFF, 0xFF, 0xFF, 0xFF]
        );
    }

    #[test]
    fn truncation() {
        let patch = parse(&[
            0x50, 0x41, 0x54, 0x43, 0x48, // PATCH
            0x45, 0x4F, 0x46, // EOF
            0x00, 0x00, 0x04, // truncate to 4
        ]);
        assert_eq!(patch.truncate, Some(4));
        assert_eq!(
            apply(&patch, &[0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88]),
            &[0x11, 0x22, 0x33, 0x44]
        );
    }

    #[test]
    fn eof_offset_with_trailing_records_is_a_record() {
        // "EOF" as a record offset, followed by a real record and terminator.
        let patch = parse(&[
            0x50, 0x41, 0x54, 0x43, 0x48, // PATCH
            0x45, 0x4F, 0x46, // offset 0x454F46
            0x00, 0x01, // length 1
            0x7F, // data
            0x45, 0x4F, 0x46, // EOF
        ]);
        assert_eq!(patch.records.len(), 1);
        assert_eq!(patch.records[0].offset, 0x45_4F_46);
    }

    #[test]
    fn apply_is_idempotent() {
        let patch = parse(&[
            0x50, 0x41, 0x54, 0x43, 0x48, 0x00, 0x00, 0x01, 0x00, 0x02, 0xAB, 0xCD, 0x45, 0x4F,
            0x46,
        ]);
        let rom = [0u8; 4];
        let once = apply(&patch, &rom);
        let twice = apply(&patch, &once);
        assert_eq!(once, twice);
    }

    #[test]
    fn build_then_apply_roundtrip() {
        let original = ByteBuffer::from_bytes(vec![0x10, 0x20, 0x30, 0x40, 0x50, 0x60]);
        let modified = ByteBuffer::from_bytes(vec![0x10, 0x21, 0x30, 0x40, 0x51, 0x60]);
        let patch = IpsPatch::build(&original, &modified).unwrap();
        assert_eq!(apply(&patch, original.bytes()), modified.bytes());
    }

    #[test]
    fn build_emits_rle_for_long_fills() {
        let original = ByteBuffer::from_bytes(vec![0u8; 64]);
        let mut bytes = vec![0u8; 64];
        bytes[8..40].fill(0xEE);
        let modified = ByteBuffer::from_bytes(bytes);

        let patch = IpsPatch::build(&original, &modified).unwrap();
        assert_eq!(patch.records.len(), 1);
        assert!(matches!(
            patch.records[0].data,
            IpsData::Rle { len: 32, byte: 0xEE }
        ));
        assert_eq!(apply(&patch, original.bytes()), modified.bytes());
    }

    #[test]
    fn build_merges_nearby_runs() {
        let original = ByteBuffer::from_bytes(vec![0u8; 16]);
        let mut bytes = vec![0u8; 16];
        bytes[2] = 1;
        bytes[5] = 2; // 2-byte gap, folds into the first record
        let modified = ByteBuffer::from_bytes(bytes);

        let patch = IpsPatch::build(&original, &modified).unwrap();
        assert_eq!(patch.records.len(), 1);
        assert_eq!(
            patch.records[0].data,
            IpsData::Simple(vec![1, 0, 0, 2]),
        );
        assert_eq!(apply(&patch, original.bytes()), modified.bytes());
    }

    #[test]
    fn build_grown_file_with_zero_tail() {
        let original = ByteBuffer::from_bytes(vec![1, 2, 3]);
        let modified = ByteBuffer::from_bytes(vec![1, 2, 3, 0, 0, 0]);
        let patch = IpsPatch::build(&original, &modified).unwrap();
        // The grown tail is all zeros, so only the planted size record exists.
        assert_eq!(patch.records.len(), 1);
        assert_eq!(patch.records[0].offset, 5);
        assert_eq!(apply(&patch, original.bytes()), modified.bytes());
    }

    #[test]
    fn build_shrunk_file_truncates() {
        let original = ByteBuffer::from_bytes(vec![1, 2, 3, 4, 5]);
        let modified = ByteBuffer::from_bytes(vec![1, 2, 3]);
        let patch = IpsPatch::build(&original, &modified).unwrap();
        assert_eq!(patch.truncate, Some(3));
        assert_eq!(apply(&patch, original.bytes()), modified.bytes());
    }

    #[test]
    fn build_rejects_offsets_past_16_mib() {
        let size = MAX_OFFSET + 16;
        let original = ByteBuffer::from_bytes(vec![0u8; size]);
        let mut bytes = vec![0u8; size];
        bytes[MAX_OFFSET + 1] = 0xFF;
        let modified = ByteBuffer::from_bytes(bytes);

        assert!(matches!(
            IpsPatch::build(&original, &modified),
            Err(Error::PatchFailed(_))
        ));
    }

    #[test]
    fn export_parse_identity() {
        let original = ByteBuffer::from_bytes(vec![0u8; 32]);
        let mut bytes = vec![0u8; 32];
        bytes[0] = 9;
        bytes[10..20].fill(0x55);
        bytes[30] = 1;
        let modified = ByteBuffer::from_bytes(bytes);

        let patch = IpsPatch::build(&original, &modified).unwrap();
        let mut exported = patch.export().unwrap();
        let reparsed = IpsPatch::parse(&mut exported).unwrap();
        assert_eq!(patch, reparsed);
    }
}
