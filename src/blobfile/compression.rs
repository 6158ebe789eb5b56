//! Value compression for blob records.
//!
//! The codec is recorded per record; the optional zstd dictionary is a
//! file-level block installed into the decoder at open time.

use std::io::Read;

use crate::error::Result;
use crate::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionType {
    None,
    Lz4,
    Zstd,
}

impl CompressionType {
    pub fn is_none(&self) -> bool {
        matches!(self, CompressionType::None)
    }
}

impl TryFrom<u8> for CompressionType {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(CompressionType::None),
            1 => Ok(CompressionType::Lz4),
            2 => Ok(CompressionType::Zstd),
            _ => Err(Error::Corruption(format!(
                "invalid compression type: {}",
                value
            ))),
        }
    }
}

impl From<CompressionType> for u8 {
    fn from(value: CompressionType) -> Self {
        match value {
            CompressionType::None => 0,
            CompressionType::Lz4 => 1,
            CompressionType::Zstd => 2,
        }
    }
}

/// Compresses a record body with the given codec. The dictionary applies to
/// zstd only.
pub fn compress(
    data: &[u8],
    compression_type: CompressionType,
    dictionary: Option<&[u8]>,
) -> Result<Vec<u8>> {
    match compression_type {
        CompressionType::None => Ok(data.to_vec()),
        CompressionType::Lz4 => Ok(lz4_flex::compress_prepend_size(data)),
        CompressionType::Zstd => match dictionary {
            Some(dict) => {
                let mut encoder = zstd::stream::Encoder::with_dictionary(
                    Vec::new(),
                    zstd::DEFAULT_COMPRESSION_LEVEL,
                    dict,
                )
                .map_err(|e| Error::Corruption(format!("zstd dictionary rejected: {e}")))?;
                std::io::Write::write_all(&mut encoder, data)?;
                Ok(encoder.finish()?)
            }
            None => Ok(zstd::stream::encode_all(
                data,
                zstd::DEFAULT_COMPRESSION_LEVEL,
            )?),
        },
    }
}

/// Decompresses a record body with the codec recorded in its header.
pub fn decompress(
    data: &[u8],
    compression_type: CompressionType,
    dictionary: Option<&[u8]>,
) -> Result<Vec<u8>> {
    match compression_type {
        CompressionType::None => Ok(data.to_vec()),
        CompressionType::Lz4 => lz4_flex::decompress_size_prepended(data)
            .map_err(|e| Error::Corruption(format!("lz4 decompression failed: {e}"))),
        CompressionType::Zstd => match dictionary {
            Some(dict) => {
                let mut decoder = zstd::stream::Decoder::with_dictionary(data, dict)
                    .map_err(|e| Error::Corruption(format!("zstd decompression failed: {e}")))?;
                let mut out = Vec::new();
                decoder
                    .read_to_end(&mut out)
                    .map_err(|e| Error::Corruption(format!("zstd decompression failed: {e}")))?;
                Ok(out)
            }
            None => zstd::stream::decode_all(data)
                .map_err(|e| Error::Corruption(format!("zstd decompression failed: {e}"))),
        },
    }
}
