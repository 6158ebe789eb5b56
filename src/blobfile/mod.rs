//! Blob file format and access path.
//!
//! A blob file is append-only and write-once:
//!
//! ```text
//! +--------------------------------------------------+
//! | Header (12 bytes)                                |
//! |  - Magic: u32                                    |
//! |  - Version: u32                                  |
//! |  - Flags: u32 (bit 0 = has uncompression dict)   |
//! +--------------------------------------------------+
//! | Record 0 .. Record N-1                           |
//! |  - crc32c: u32 over codec byte + compressed body |
//! |  - codec: u8                                     |
//! |  - compressed body:                              |
//! |      varint key_len | key | varint val_len | val |
//! +--------------------------------------------------+
//! | [optional uncompression dictionary block]        |
//! |  - crc32c: u32 | dictionary bytes                |
//! +--------------------------------------------------+
//! | Footer (28 bytes)                                |
//! |  - dict block handle (2 varints, padded to 20)   |
//! |  - Magic: u32                                    |
//! |  - crc32c: u32 over the first 24 bytes           |
//! +--------------------------------------------------+
//! ```
//!
//! Records store keys redundantly so a file is self-describing without the
//! LSM; GC rewrites rely on that.

pub mod cache;
pub mod compression;
pub mod meta;
pub mod reader;
pub mod writer;

use std::path::{Path, PathBuf};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use bytes::Bytes;

use crate::encoding::{get_varint, put_varint, CRC32C};
use crate::error::Result;
use crate::{corruption, Error};

/// Magic number in the header and footer.
pub const BLOB_FILE_MAGIC: u32 = 0xB10B_F11E;

/// Current blob file format version.
pub const BLOB_FILE_VERSION: u32 = 1;

/// Header flag: the file carries an uncompression dictionary block.
pub const FLAG_HAS_UNCOMPRESSION_DICTIONARY: u32 = 1;

/// Encoded header length. Reads at open time are bounded by this.
pub const HEADER_ENCODED_LENGTH: usize = 12;

/// Encoded footer length, fixed so it can be located from the file size.
pub const FOOTER_ENCODED_LENGTH: usize = 28;

const FOOTER_HANDLE_PADDED_LENGTH: usize = 20;

/// Returns the path of a blob file under the given directory.
pub fn blob_file_path(dir: &Path, file_number: u64) -> PathBuf {
    dir.join(format!("{:06}.blob", file_number))
}

/// A pointer into a blob file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BlobHandle {
    pub offset: u64,
    pub size: u64,
}

impl BlobHandle {
    pub fn encode_to(&self, dst: &mut Vec<u8>) {
        put_varint(dst, self.offset);
        put_varint(dst, self.size);
    }

    pub fn decode_from(src: &mut &[u8]) -> Result<Self> {
        let offset = get_varint(src)?;
        let size = get_varint(src)?;
        Ok(Self { offset, size })
    }
}

/// Blob file header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlobFileHeader {
    pub version: u32,
    pub flags: u32,
}

impl BlobFileHeader {
    pub fn new(flags: u32) -> Self {
        Self {
            version: BLOB_FILE_VERSION,
            flags,
        }
    }

    pub fn has_uncompression_dictionary(&self) -> bool {
        self.flags & FLAG_HAS_UNCOMPRESSION_DICTIONARY != 0
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HEADER_ENCODED_LENGTH);
        buf.write_u32::<BigEndian>(BLOB_FILE_MAGIC).unwrap();
        buf.write_u32::<BigEndian>(self.version).unwrap();
        buf.write_u32::<BigEndian>(self.flags).unwrap();
        buf
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_ENCODED_LENGTH {
            return Err(corruption!("blob file header too short: {}", bytes.len()));
        }
        let mut cursor = bytes;
        let magic = cursor.read_u32::<BigEndian>()?;
        if magic != BLOB_FILE_MAGIC {
            return Err(corruption!("bad blob file magic: {:#x}", magic));
        }
        let version = cursor.read_u32::<BigEndian>()?;
        if version != BLOB_FILE_VERSION {
            return Err(corruption!("unsupported blob file version: {}", version));
        }
        let flags = cursor.read_u32::<BigEndian>()?;
        Ok(Self { version, flags })
    }
}

/// Blob file footer. The dictionary handle is all-zero when the file has no
/// dictionary block.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BlobFileFooter {
    pub dictionary_handle: BlobHandle,
}

impl BlobFileFooter {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(FOOTER_ENCODED_LENGTH);
        self.dictionary_handle.encode_to(&mut buf);
        buf.resize(FOOTER_HANDLE_PADDED_LENGTH, 0);
        buf.write_u32::<BigEndian>(BLOB_FILE_MAGIC).unwrap();
        let crc = CRC32C.checksum(&buf);
        buf.write_u32::<BigEndian>(crc).unwrap();
        buf
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < FOOTER_ENCODED_LENGTH {
            return Err(corruption!("blob file footer too short: {}", bytes.len()));
        }
        let body = &bytes[..FOOTER_ENCODED_LENGTH - 4];
        let mut crc_cursor = &bytes[FOOTER_ENCODED_LENGTH - 4..];
        let crc = crc_cursor.read_u32::<BigEndian>()?;
        if crc != CRC32C.checksum(body) {
            return Err(corruption!("blob file footer checksum mismatch"));
        }
        let mut magic_cursor = &body[FOOTER_HANDLE_PADDED_LENGTH..];
        let magic = magic_cursor.read_u32::<BigEndian>()?;
        if magic != BLOB_FILE_MAGIC {
            return Err(corruption!("bad blob file footer magic: {:#x}", magic));
        }
        let mut handle_cursor = &body[..FOOTER_HANDLE_PADDED_LENGTH];
        let dictionary_handle = BlobHandle::decode_from(&mut handle_cursor)?;
        Ok(Self { dictionary_handle })
    }
}

/// One logical record: the user key and its value. The `Bytes` are slices
/// of a shared decoded buffer; cloning is the pin, dropping the release.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlobRecord {
    pub key: Bytes,
    pub value: Bytes,
}

impl BlobRecord {
    /// Encodes the record body (uncompressed form).
    pub fn encode_to(&self, dst: &mut Vec<u8>) {
        put_varint(dst, self.key.len() as u64);
        dst.extend_from_slice(&self.key);
        put_varint(dst, self.value.len() as u64);
        dst.extend_from_slice(&self.value);
    }

    /// Decodes a record body, slicing key and value out of the shared
    /// buffer without copying.
    pub fn decode(body: &Bytes) -> Result<Self> {
        let mut cursor = body.as_ref();
        let key_len = get_varint(&mut cursor)? as usize;
        if cursor.len() < key_len {
            return Err(corruption!("blob record key truncated"));
        }
        let key_start = body.len() - cursor.len();
        let key = body.slice(key_start..key_start + key_len);
        cursor = &cursor[key_len..];

        let value_len = get_varint(&mut cursor)? as usize;
        if cursor.len() < value_len {
            return Err(corruption!("blob record value truncated"));
        }
        let value_start = body.len() - cursor.len();
        let value = body.slice(value_start..value_start + value_len);
        cursor = &cursor[value_len..];

        if !cursor.is_empty() {
            return Err(corruption!(
                "blob record has {} trailing bytes",
                cursor.len()
            ));
        }
        Ok(Self { key, value })
    }
}

/// The value stored in the LSM under the blob-index value type: a pointer
/// to one record in one blob file. The all-zero encoding is the deletion
/// marker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BlobIndex {
    pub file_number: u64,
    pub blob_handle: BlobHandle,
}

impl BlobIndex {
    pub fn deletion_marker() -> Self {
        Self::default()
    }

    pub fn is_deletion_marker(&self) -> bool {
        self.file_number == 0 && self.blob_handle.offset == 0 && self.blob_handle.size == 0
    }

    pub fn encode_to(&self, dst: &mut Vec<u8>) {
        put_varint(dst, self.file_number);
        self.blob_handle.encode_to(dst);
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.encode_to(&mut buf);
        buf
    }

    pub fn decode_from(src: &mut &[u8]) -> Result<Self> {
        let file_number = get_varint(src).map_err(|_| bad_index())?;
        let blob_handle = BlobHandle::decode_from(src).map_err(|_| bad_index())?;
        Ok(Self {
            file_number,
            blob_handle,
        })
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut cursor = bytes;
        let index = Self::decode_from(&mut cursor)?;
        if !cursor.is_empty() {
            return Err(bad_index());
        }
        Ok(index)
    }
}

/// A GC-produced merge operand: the rewrite destination plus the pre-GC
/// location it replaces.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeBlobIndex {
    pub blob_index: BlobIndex,
    pub source_file_number: u64,
    pub source_file_offset: u64,
}

impl MergeBlobIndex {
    pub fn encode_to(&self, dst: &mut Vec<u8>) {
        self.blob_index.encode_to(dst);
        put_varint(dst, self.source_file_number);
        put_varint(dst, self.source_file_offset);
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.encode_to(&mut buf);
        buf
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut cursor = bytes;
        let blob_index = BlobIndex::decode_from(&mut cursor)?;
        let source_file_number = get_varint(&mut cursor).map_err(|_| bad_index())?;
        let source_file_offset = get_varint(&mut cursor).map_err(|_| bad_index())?;
        if !cursor.is_empty() {
            return Err(bad_index());
        }
        Ok(Self {
            blob_index,
            source_file_number,
            source_file_offset,
        })
    }
}

fn bad_index() -> Error {
    Error::Corruption("undecodable blob index".to_string())
}
