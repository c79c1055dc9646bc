//! Checksum and digest helpers shared by the codecs and the ROM tooling
//!
//! CRC32 is the only checksum the patch formats themselves mandate; the
//! rest are identity/display helpers surfaced by the buffer API.

use md5::{Digest, Md5};
use sha1::Sha1;

/// CRC-16/CCITT-FALSE polynomial
const CRC16_POLY: u16 = 0x1021;

/// Adler-32 modulus
const ADLER_MOD: u32 = 65521;

/// IEEE CRC32 (reflected, poly `0xEDB88320`, seed and final xor `0xFFFFFFFF`)
pub fn crc32(data: &[u8]) -> u32 {
    crc32fast::hash(data)
}

/// Adler-32 with seed `a=1, b=0`, result `(b << 16) | a`
pub fn adler32(data: &[u8]) -> u32 {
    let mut a: u32 = 1;
    let mut b: u32 = 0;
    for &byte in data {
        a = (a + u32::from(byte)) % ADLER_MOD;
        b = (b + a) % ADLER_MOD;
    }
    (b << 16) | a
}

/// CRC-16/CCITT-FALSE: non-reflected, seed `0xFFFF`, no final xor
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;
    for &byte in data {
        crc ^= u16::from(byte) << 8;
        for _ in 0..8 {
            if crc & 0x8000 != 0 {
                crc = (crc << 1) ^ CRC16_POLY;
            } else {
                crc <<= 1;
            }
        }
    }
    crc
}

/// MD5 digest
pub fn md5(data: &[u8]) -> [u8; 16] {
    let mut hasher = Md5::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// SHA-1 digest
pub fn sha1(data: &[u8]) -> [u8; 20] {
    let mut hasher = Sha1::new();
    hasher.update(data);
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;

    const CHECK_INPUT: &[u8] = b"123456789";

    #[test]
    fn crc32_check_value() {
        assert_eq!(crc32(CHECK_INPUT), 0xCBF4_3926);
    }

    #[test]
    fn crc32_empty() {
        assert_eq!(crc32(&[]), 0);
    }

    #[test]
    fn adler32_check_values() {
        assert_eq!(adler32(CHECK_INPUT), 0x091E_01DE);
        assert_eq!(adler32(b"Wikipedia"), 0x11E6_0398);
        assert_eq!(adler32(&[]), 1);
    }

    #[test]
    fn crc16_check_value() {
        assert_eq!(crc16(CHECK_INPUT), 0x29B1);
        assert_eq!(crc16(&[]), 0xFFFF);
    }

    #[test]
    fn md5_check_value() {
        assert_eq!(
            hex::encode(md5(CHECK_INPUT)),
            "25f9e794323b453885f5181f1b624d0b"
        );
        assert_eq!(
            hex::encode(md5(b"")),
            "d41d8cd98f00b204e9800998ecf8427e"
        );
    }

    #[test]
    fn sha1_check_value() {
        assert_eq!(
            hex::encode(sha1(b"abc")),
            "a9993e364706816aba3e25717850c26c9cd0d89d"
        );
    }
}
