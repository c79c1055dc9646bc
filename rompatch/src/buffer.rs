//! Cursored byte buffer over an in-memory file image
//!
//! All codec parsing and serialization goes through [`ByteBuffer`]: a
//! fixed-length owned byte vector with a cursor, a selectable integer
//! endianness, and the display name / extension metadata the ROM header
//! policy keys on. Structured reads and writes are bounds-checked up front
//! and never advance the cursor on failure.

use byteorder::{BigEndian, ByteOrder, LittleEndian};

use crate::error::{Error, Result};
use crate::hash;

/// Byte order used by the structured read/write operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Endian {
    /// Big-endian (the default; IPS and ROM headers use it)
    #[default]
    Big,
    /// Little-endian (UPS and BPS checksum fields)
    Little,
}

/// Fixed-length mutable byte buffer with a cursor
#[derive(Debug, Clone, Default)]
pub struct ByteBuffer {
    data: Vec<u8>,
    pos: usize,
    saved: Vec<usize>,
    endian: Endian,
    name: String,
    extension: String,
}

impl ByteBuffer {
    /// Wrap an existing byte vector
    pub fn from_bytes(data: Vec<u8>) -> Self {
        Self {
            data,
            ..Self::default()
        }
    }

    /// Allocate a zero-filled buffer of `len` bytes
    pub fn with_len(len: usize) -> Self {
        Self::from_bytes(vec![0u8; len])
    }

    /// Set the display name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set the lowercase file-extension tag used by the header policy
    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = extension.into().to_lowercase();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn extension(&self) -> &str {
        &self.extension
    }

    pub fn set_endian(&mut self, endian: Endian) {
        self.endian = endian;
    }

    pub fn endian(&self) -> Endian {
        self.endian
    }

    /// Total buffer length; fixed at construction
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Current cursor position
    pub fn pos(&self) -> usize {
        self.pos
    }

    /// True once the cursor has reached the end of the buffer
    pub fn is_eof(&self) -> bool {
        self.pos >= self.data.len()
    }

    /// Whole buffer contents
    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    /// Consume the buffer, returning the underlying vector
    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    /// Move the cursor to an absolute offset (may sit at `len`, one past the
    /// last byte)
    pub fn seek(&mut self, pos: usize) -> Result<()> {
        if pos > self.data.len() {
            return Err(Error::OutOfBounds {
                offset: pos,
                size: self.data.len(),
            });
        }
        self.pos = pos;
        Ok(())
    }

    /// Advance the cursor by `n` bytes
    pub fn skip(&mut self, n: usize) -> Result<()> {
        self.seek(self.pos + n)
    }

    /// Save the cursor on an internal stack
    pub fn push_pos(&mut self) {
        self.saved.push(self.pos);
    }

    /// Restore the most recently saved cursor
    pub fn pop_pos(&mut self) {
        if let Some(pos) = self.saved.pop() {
            self.pos = pos;
        }
    }

    fn check_span(&self, width: usize) -> Result<()> {
        if self.pos + width > self.data.len() {
            return Err(Error::EndOfFile {
                offset: self.pos,
                size: self.data.len(),
            });
        }
        Ok(())
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        self.check_span(1)?;
        let value = self.data[self.pos];
        self.pos += 1;
        Ok(value)
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        self.check_span(2)?;
        let span = &self.data[self.pos..self.pos + 2];
        let value = match self.endian {
            Endian::Big => BigEndian::read_u16(span),
            Endian::Little => LittleEndian::read_u16(span),
        };
        self.pos += 2;
        Ok(value)
    }

    pub fn read_u24(&mut self) -> Result<u32> {
        self.check_span(3)?;
        let span = &self.data[self.pos..self.pos + 3];
        let value = match self.endian {
            Endian::Big => BigEndian::read_u24(span),
            Endian::Little => LittleEndian::read_u24(span),
        };
        self.pos += 3;
        Ok(value)
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        self.check_span(4)?;
        let span = &self.data[self.pos..self.pos + 4];
        let value = match self.endian {
            Endian::Big => BigEndian::read_u32(span),
            Endian::Little => LittleEndian::read_u32(span),
        };
        self.pos += 4;
        Ok(value)
    }

    /// Read `n` raw bytes into a fresh vector
    pub fn read_bytes(&mut self, n: usize) -> Result<Vec<u8>> {
        self.check_span(n)?;
        let bytes = self.data[self.pos..self.pos + n].to_vec();
        self.pos += n;
        Ok(bytes)
    }

    /// Read an `n`-byte ASCII field. The result is truncated at the first
    /// NUL byte, but the cursor still advances by the full `n`.
    pub fn read_string(&mut self, n: usize) -> Result<String> {
        self.check_span(n)?;
        let span = &self.data[self.pos..self.pos + n];
        let end = span.iter().position(|&b| b == 0).unwrap_or(n);
        let text = span[..end].iter().map(|&b| b as char).collect();
        self.pos += n;
        Ok(text)
    }

    pub fn write_u8(&mut self, value: u8) -> Result<()> {
        self.check_span(1)?;
        self.data[self.pos] = value;
        self.pos += 1;
        Ok(())
    }

    pub fn write_u16(&mut self, value: u16) -> Result<()> {
        self.check_span(2)?;
        let span = &mut self.data[self.pos..self.pos + 2];
        match self.endian {
            Endian::Big => BigEndian::write_u16(span, value),
            Endian::Little => LittleEndian::write_u16(span, value),
        }
        self.pos += 2;
        Ok(())
    }

    pub fn write_u24(&mut self, value: u32) -> Result<()> {
        self.check_span(3)?;
        let span = &mut self.data[self.pos..self.pos + 3];
        match self.endian {
            Endian::Big => BigEndian::write_u24(span, value),
            Endian::Little => LittleEndian::write_u24(span, value),
        }
        self.pos += 3;
        Ok(())
    }

    pub fn write_u32(&mut self, value: u32) -> Result<()> {
        self.check_span(4)?;
        let span = &mut self.data[self.pos..self.pos + 4];
        match self.endian {
            Endian::Big => BigEndian::write_u32(span, value),
            Endian::Little => LittleEndian::write_u32(span, value),
        }
        self.pos += 4;
        Ok(())
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.check_span(bytes.len())?;
        self.data[self.pos..self.pos + bytes.len()].copy_from_slice(bytes);
        self.pos += bytes.len();
        Ok(())
    }

    /// Write an ASCII string. With `pad_to`, the field is zero-padded (or
    /// the string truncated) to exactly that many bytes.
    pub fn write_string(&mut self, text: &str, pad_to: Option<usize>) -> Result<()> {
        match pad_to {
            None => self.write_bytes(text.as_bytes()),
            Some(width) => {
                self.check_span(width)?;
                let mut field = vec![0u8; width];
                let n = text.len().min(width);
                field[..n].copy_from_slice(&text.as_bytes()[..n]);
                self.write_bytes(&field)
            }
        }
    }

    /// Allocate a fresh buffer holding `len` bytes starting at `offset`.
    /// The slice inherits the endianness but not the name.
    pub fn slice(&self, offset: usize, len: usize) -> Result<ByteBuffer> {
        if offset + len > self.data.len() {
            return Err(Error::OutOfBounds {
                offset: offset + len,
                size: self.data.len(),
            });
        }
        let mut out = ByteBuffer::from_bytes(self.data[offset..offset + len].to_vec());
        out.endian = self.endian;
        Ok(out)
    }

    /// Copy `len` bytes at `src_off` into `target` at `tgt_off`
    pub fn copy_to(
        &self,
        target: &mut ByteBuffer,
        src_off: usize,
        len: usize,
        tgt_off: usize,
    ) -> Result<()> {
        if src_off + len > self.data.len() {
            return Err(Error::OutOfBounds {
                offset: src_off + len,
                size: self.data.len(),
            });
        }
        if tgt_off + len > target.data.len() {
            return Err(Error::OutOfBounds {
                offset: tgt_off + len,
                size: target.data.len(),
            });
        }
        target.data[tgt_off..tgt_off + len].copy_from_slice(&self.data[src_off..src_off + len]);
        Ok(())
    }

    fn hash_range(&self, start: usize, len: Option<usize>) -> Result<&[u8]> {
        let len = len.unwrap_or(self.data.len().saturating_sub(start));
        if start + len > self.data.len() {
            return Err(Error::OutOfBounds {
                offset: start + len,
                size: self.data.len(),
            });
        }
        Ok(&self.data[start..start + len])
    }

    /// CRC32 over `[start, start + len)`, defaulting to the end of the buffer
    pub fn crc32(&self, start: usize, len: Option<usize>) -> Result<u32> {
        Ok(hash::crc32(self.hash_range(start, len)?))
    }

    /// Adler-32 over a byte range
    pub fn adler32(&self, start: usize, len: Option<usize>) -> Result<u32> {
        Ok(hash::adler32(self.hash_range(start, len)?))
    }

    /// CRC-16/CCITT-FALSE over a byte range
    pub fn crc16(&self, start: usize, len: Option<usize>) -> Result<u16> {
        Ok(hash::crc16(self.hash_range(start, len)?))
    }

    /// MD5 over a byte range
    pub fn md5(&self, start: usize, len: Option<usize>) -> Result<[u8; 16]> {
        Ok(hash::md5(self.hash_range(start, len)?))
    }

    /// SHA-1 over a byte range
    pub fn sha1(&self, start: usize, len: Option<usize>) -> Result<[u8; 20]> {
        Ok(hash::sha1(self.hash_range(start, len)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endianness_roundtrip() {
        for endian in [Endian::Big, Endian::Little] {
            let mut buf = ByteBuffer::with_len(9);
            buf.set_endian(endian);
            buf.write_u16(0xBEEF).unwrap();
            buf.write_u24(0xC0FFEE).unwrap();
            buf.write_u32(0xDEAD_BEEF).unwrap();

            buf.seek(0).unwrap();
            assert_eq!(buf.read_u16().unwrap(), 0xBEEF);
            assert_eq!(buf.read_u24().unwrap(), 0xC0FFEE);
            assert_eq!(buf.read_u32().unwrap(), 0xDEAD_BEEF);
            assert!(buf.is_eof());
        }
    }

    #[test]
    fn big_endian_is_the_default_wire_order() {
        let mut buf = ByteBuffer::with_len(2);
        buf.write_u16(0x1234).unwrap();
        assert_eq!(buf.bytes(), &[0x12, 0x34]);

        let mut buf = ByteBuffer::with_len(2);
        buf.set_endian(Endian::Little);
        buf.write_u16(0x1234).unwrap();
        assert_eq!(buf.bytes(), &[0x34, 0x12]);
    }

    #[test]
    fn out_of_range_read_leaves_cursor_unchanged() {
        let mut buf = ByteBuffer::from_bytes(vec![1, 2, 3]);
        buf.seek(2).unwrap();
        let err = buf.read_u32().unwrap_err();
        assert!(matches!(err, Error::EndOfFile { offset: 2, size: 3 }));
        assert_eq!(buf.pos(), 2);
        assert_eq!(buf.read_u8().unwrap(), 3);
    }

    #[test]
    fn out_of_range_write_leaves_cursor_unchanged() {
        let mut buf = ByteBuffer::with_len(3);
        buf.seek(1).unwrap();
        assert!(buf.write_u32(1).is_err());
        assert_eq!(buf.pos(), 1);
        assert_eq!(buf.bytes(), &[0, 0, 0]);
    }

    #[test]
    fn seek_past_end_is_out_of_bounds() {
        let mut buf = ByteBuffer::with_len(4);
        buf.seek(4).unwrap();
        assert!(buf.is_eof());
        assert!(matches!(
            buf.seek(5),
            Err(Error::OutOfBounds { offset: 5, size: 4 })
        ));
    }

    #[test]
    fn cursor_stack() {
        let mut buf = ByteBuffer::with_len(8);
        buf.seek(3).unwrap();
        buf.push_pos();
        buf.seek(7).unwrap();
        buf.pop_pos();
        assert_eq!(buf.pos(), 3);
    }

    #[test]
    fn read_string_stops_at_nul_but_advances_fully() {
        let mut buf = ByteBuffer::from_bytes(b"SEGA\0MEGA DR".to_vec());
        assert_eq!(buf.read_string(12).unwrap(), "SEGA");
        assert_eq!(buf.pos(), 12);
    }

    #[test]
    fn write_string_zero_pads_fixed_fields() {
        let mut buf = ByteBuffer::with_len(8);
        buf.write_string("ABC", Some(6)).unwrap();
        assert_eq!(buf.bytes(), &[0x41, 0x42, 0x43, 0, 0, 0, 0, 0]);
        assert_eq!(buf.pos(), 6);
    }

    #[test]
    fn slice_is_independent() {
        let parent = ByteBuffer::from_bytes(vec![0, 1, 2, 3, 4]).with_name("parent");
        let mut child = parent.slice(1, 3).unwrap();
        assert_eq!(child.bytes(), &[1, 2, 3]);
        assert_eq!(child.name(), "");

        child.seek(0).unwrap();
        child.write_u8(0xFF).unwrap();
        assert_eq!(parent.bytes(), &[0, 1, 2, 3, 4]);
    }

    #[test]
    fn copy_to_between_buffers() {
        let src = ByteBuffer::from_bytes(vec![9, 8, 7, 6]);
        let mut dst = ByteBuffer::with_len(6);
        src.copy_to(&mut dst, 1, 2, 4).unwrap();
        assert_eq!(dst.bytes(), &[0, 0, 0, 0, 8, 7]);
        assert!(src.copy_to(&mut dst, 3, 2, 0).is_err());
    }

    #[test]
    fn hashes_default_to_the_buffer_tail() {
        let buf = ByteBuffer::from_bytes(b"xx123456789".to_vec());
        assert_eq!(buf.crc32(2, None).unwrap(), 0xCBF4_3926);
        assert_eq!(buf.crc16(2, Some(9)).unwrap(), 0x29B1);
        assert!(buf.crc32(2, Some(10)).is_err());
    }
}
