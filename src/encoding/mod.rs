//! Wire encoding primitives shared by the blob file format and the
//! blob-index values stored in the LSM.
//!
//! Fixed-width integers use big-endian encoding for cross-platform
//! portability; variable-length integers use LEB128 (7 bits per byte,
//! continuation in the high bit). CRC32C (Castagnoli) covers every framed
//! structure.

pub mod format;

use crc::{Crc, CRC_32_ISCSI};

use crate::error::Result;
use crate::Error;

/// CRC32C, the checksum used by every framed structure in this crate.
pub const CRC32C: Crc<u32> = Crc::<u32>::new(&CRC_32_ISCSI);

/// Maximum encoded length of a varint-encoded u64.
pub const MAX_VARINT_LEN: usize = 10;

/// Appends a LEB128-encoded u64 to the buffer.
pub fn put_varint(dst: &mut Vec<u8>, mut v: u64) {
    while v >= 0x80 {
        dst.push((v as u8) | 0x80);
        v >>= 7;
    }
    dst.push(v as u8);
}

/// Decodes a LEB128-encoded u64 from the front of the slice, advancing it
/// past the consumed bytes.
pub fn get_varint(src: &mut &[u8]) -> Result<u64> {
    let slice: &[u8] = *src;
    let mut result: u64 = 0;
    for (i, &byte) in slice.iter().take(MAX_VARINT_LEN).enumerate() {
        result |= u64::from(byte & 0x7f) << (i * 7);
        if byte & 0x80 == 0 {
            *src = &slice[i + 1..];
            return Ok(result);
        }
    }
    Err(Error::Corruption("truncated varint".to_string()))
}

/// Returns the encoded length of a varint without encoding it.
pub fn varint_len(mut v: u64) -> usize {
    let mut len = 1;
    while v >= 0x80 {
        v >>= 7;
        len += 1;
    }
    len
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_varint_roundtrip() {
        let values = [
            0u64,
            1,
            127,
            128,
            300,
            16_383,
            16_384,
            u32::MAX as u64,
            u64::MAX,
        ];
        for &v in &values {
            let mut buf = Vec::new();
            put_varint(&mut buf, v);
            assert_eq!(buf.len(), varint_len(v));

            let mut slice = buf.as_slice();
            let decoded = get_varint(&mut slice).expect("decode failed");
            assert_eq!(decoded, v);
            assert!(slice.is_empty());
        }
    }

    #[test]
    fn test_varint_consumes_prefix_only() {
        let mut buf = Vec::new();
        put_varint(&mut buf, 300);
        buf.extend_from_slice(b"tail");

        let mut slice = buf.as_slice();
        assert_eq!(get_varint(&mut slice).unwrap(), 300);
        assert_eq!(slice, b"tail");
    }

    #[test]
    fn test_varint_truncated() {
        // Continuation bit set with no following byte.
        let buf = [0x80u8];
        let mut slice = &buf[..];
        assert!(get_varint(&mut slice).is_err());
    }

    #[test]
    fn test_crc32c_vector() {
        // Known CRC32C test vector: "123456789" -> 0xE3069283.
        assert_eq!(CRC32C.checksum(b"123456789"), 0xE306_9283);
    }
}
