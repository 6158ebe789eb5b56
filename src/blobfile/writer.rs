//! Append-only blob file writer.
//!
//! Writes the header eagerly, records sequentially, then the optional
//! dictionary block and the footer on `finish`. Files are write-once; there
//! is no rewrite-in-place path.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use byteorder::{BigEndian, WriteBytesExt};

use super::compression::{compress, CompressionType};
use super::{
    BlobFileFooter, BlobFileHeader, BlobHandle, BlobRecord, FLAG_HAS_UNCOMPRESSION_DICTIONARY,
    HEADER_ENCODED_LENGTH,
};
use crate::encoding::CRC32C;
use crate::error::Result;

pub struct Writer {
    writer: BufWriter<File>,
    path: PathBuf,
    /// Current write position.
    position: u64,
    compression: CompressionType,
    /// Raw dictionary bytes; written as a trailing block and advertised via
    /// the header flag and footer handle.
    dictionary: Option<Vec<u8>>,
    record_count: u64,
}

impl Writer {
    /// Creates a blob file at the given path and writes its header.
    pub fn new(
        path: &Path,
        compression: CompressionType,
        dictionary: Option<Vec<u8>>,
    ) -> Result<Self> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);

        let flags = if dictionary.is_some() {
            FLAG_HAS_UNCOMPRESSION_DICTIONARY
        } else {
            0
        };
        let header = BlobFileHeader::new(flags);
        writer.write_all(&header.encode())?;

        Ok(Self {
            writer,
            path: path.to_path_buf(),
            position: HEADER_ENCODED_LENGTH as u64,
            compression,
            dictionary,
            record_count: 0,
        })
    }

    /// Appends one record and returns the handle that a blob index needs to
    /// read it back.
    pub fn add_record(&mut self, key: &[u8], value: &[u8]) -> Result<BlobHandle> {
        let record = BlobRecord {
            key: key.to_vec().into(),
            value: value.to_vec().into(),
        };
        let mut body = Vec::with_capacity(key.len() + value.len() + 8);
        record.encode_to(&mut body);

        let compressed = compress(&body, self.compression, self.dictionary.as_deref())?;

        // crc32c | codec | compressed body; the CRC covers everything after
        // itself.
        let codec: u8 = self.compression.into();
        let mut digest = CRC32C.digest();
        digest.update(&[codec]);
        digest.update(&compressed);
        let crc = digest.finalize();

        let offset = self.position;
        self.writer.write_u32::<BigEndian>(crc)?;
        self.writer.write_u8(codec)?;
        self.writer.write_all(&compressed)?;

        let size = 4 + 1 + compressed.len() as u64;
        self.position += size;
        self.record_count += 1;

        Ok(BlobHandle { offset, size })
    }

    pub fn record_count(&self) -> u64 {
        self.record_count
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Writes the dictionary block (if any) and the footer, syncs, and
    /// returns the final file size.
    pub fn finish(mut self) -> Result<u64> {
        let mut footer = BlobFileFooter::default();

        if let Some(dict) = &self.dictionary {
            let offset = self.position;
            let crc = CRC32C.checksum(dict);
            self.writer.write_u32::<BigEndian>(crc)?;
            self.writer.write_all(dict)?;
            let size = 4 + dict.len() as u64;
            self.position += size;
            footer.dictionary_handle = BlobHandle { offset, size };
        }

        self.writer.write_all(&footer.encode())?;
        self.position += super::FOOTER_ENCODED_LENGTH as u64;

        self.writer.flush()?;
        let file = self
            .writer
            .into_inner()
            .map_err(|e| std::io::Error::other(e.to_string()))?;
        file.sync_all()?;

        Ok(self.position)
    }
}
