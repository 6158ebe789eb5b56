//! Blob file reader and sequential prefetcher.

use std::fs::File;
use std::os::unix::fs::FileExt;
use std::os::unix::io::AsRawFd;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use byteorder::{BigEndian, ReadBytesExt};
use bytes::Bytes;

use super::compression::{decompress, CompressionType};
use super::{
    BlobFileFooter, BlobFileHeader, BlobHandle, BlobRecord, FOOTER_ENCODED_LENGTH,
    HEADER_ENCODED_LENGTH,
};
use crate::cache::Cache;
use crate::encoding::{put_varint, CRC32C};
use crate::error::Result;
use crate::stats::BlobStats;
use crate::{corruption, Error};

/// Readahead growth cap for sequential scans.
pub const MAX_READAHEAD_SIZE: u64 = 256 << 10;

/// Decoded record bodies, shared across all readers of a column family.
/// Keyed by file-unique prefix plus record offset.
pub type ValueCache = Arc<Mutex<Cache<Vec<u8>, Bytes>>>;

/// Fixed per-entry overhead charged on top of the buffer bytes.
const CACHE_VALUE_OVERHEAD: usize = std::mem::size_of::<Bytes>();

/// Decodes the on-disk record framing into the uncompressed record body.
struct RecordDecoder {
    dictionary: Option<Vec<u8>>,
}

impl RecordDecoder {
    /// Verifies the CRC, then decompresses per the record's codec byte.
    /// Uncompressed records are sliced out of the read buffer without
    /// copying.
    fn decode(&self, raw: Bytes) -> Result<Bytes> {
        if raw.len() < 5 {
            return Err(corruption!("blob record too short: {} bytes", raw.len()));
        }
        let mut cursor = raw.as_ref();
        let crc = cursor.read_u32::<BigEndian>()?;
        if crc != CRC32C.checksum(&raw[4..]) {
            return Err(corruption!("blob record checksum mismatch"));
        }
        let codec = CompressionType::try_from(raw[4])?;
        if codec.is_none() {
            Ok(raw.slice(5..))
        } else {
            let body = decompress(&raw[5..], codec, self.dictionary.as_deref())?;
            Ok(Bytes::from(body))
        }
    }
}

/// Random-access reader for one blob file. Immutable after open; shared by
/// the file cache and any number of prefetchers.
pub struct Reader {
    file: File,
    decoder: RecordDecoder,
    cache: Option<ValueCache>,
    /// Cache-unique prefix for this open file's value-cache keys.
    cache_prefix: Vec<u8>,
    stats: Option<Arc<BlobStats>>,
    prefetch_hints: AtomicU64,
}

impl Reader {
    /// Opens a blob file: validates header and footer, and materializes the
    /// uncompression dictionary when the header advertises one.
    pub fn open(
        file: File,
        file_size: u64,
        cache: Option<ValueCache>,
        stats: Option<Arc<BlobStats>>,
    ) -> Result<Self> {
        if file_size < FOOTER_ENCODED_LENGTH as u64 {
            return Err(corruption!(
                "file is too short to be a blob file: {} bytes",
                file_size
            ));
        }

        let mut header_buf = [0u8; HEADER_ENCODED_LENGTH];
        read_exact_at(&file, &mut header_buf, 0)?;
        let header = BlobFileHeader::decode(&header_buf)?;

        let mut footer_buf = [0u8; FOOTER_ENCODED_LENGTH];
        read_exact_at(&file, &mut footer_buf, file_size - FOOTER_ENCODED_LENGTH as u64)?;
        let footer = BlobFileFooter::decode(&footer_buf)?;

        let dictionary = if header.has_uncompression_dictionary() {
            Some(read_dictionary(&file, &footer)?)
        } else {
            None
        };

        let cache_prefix = match &cache {
            Some(cache) => {
                // No portable OS file-unique-id; a cache-assigned id keeps
                // prefixes unique across opens.
                let id = cache.lock()?.new_id();
                let mut prefix = Vec::new();
                put_varint(&mut prefix, id);
                prefix
            }
            None => Vec::new(),
        };

        Ok(Self {
            file,
            decoder: RecordDecoder { dictionary },
            cache,
            cache_prefix,
            stats,
            prefetch_hints: AtomicU64::new(0),
        })
    }

    /// Reads and decodes one record. The returned record's buffers stay
    /// valid for as long as the caller holds them, whether or not the cache
    /// evicts the entry in the meantime.
    pub fn get(&self, handle: &BlobHandle) -> Result<BlobRecord> {
        let mut cache_key = Vec::new();
        if let Some(cache) = &self.cache {
            cache_key = self.cache_prefix.clone();
            put_varint(&mut cache_key, handle.offset);
            if let Some(body) = cache.lock()?.get(&cache_key) {
                if let Some(stats) = &self.stats {
                    stats.tickers().record_cache_hit();
                }
                return BlobRecord::decode(&body);
            }
        }
        if let Some(stats) = &self.stats {
            stats.tickers().record_cache_miss();
        }

        let body = self.read_record(handle)?;

        if let Some(cache) = &self.cache {
            let charge = body.len() + CACHE_VALUE_OVERHEAD;
            cache.lock()?.insert(cache_key, body.clone(), charge);
        }

        BlobRecord::decode(&body)
    }

    /// Hints the OS to read ahead; cheap and advisory.
    pub fn prefetch(&self, offset: u64, size: u64) {
        self.prefetch_hints.fetch_add(1, Ordering::Relaxed);
        unsafe {
            libc::posix_fadvise(
                self.file.as_raw_fd(),
                offset as libc::off_t,
                size as libc::off_t,
                libc::POSIX_FADV_WILLNEED,
            );
        }
    }

    /// Number of readahead hints issued so far.
    pub fn prefetch_hints(&self) -> u64 {
        self.prefetch_hints.load(Ordering::Relaxed)
    }

    fn read_record(&self, handle: &BlobHandle) -> Result<Bytes> {
        let mut buf = vec![0u8; handle.size as usize];
        read_exact_at(&self.file, &mut buf, handle.offset)?;
        self.decoder.decode(Bytes::from(buf))
    }
}

fn read_exact_at(file: &File, buf: &mut [u8], offset: u64) -> Result<()> {
    file.read_exact_at(buf, offset).map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            corruption!("short read of {} bytes at offset {}", buf.len(), offset)
        } else {
            Error::from(e)
        }
    })
}

fn read_dictionary(file: &File, footer: &BlobFileFooter) -> Result<Vec<u8>> {
    let handle = footer.dictionary_handle;
    if handle.size < 4 {
        return Err(corruption!("dictionary block too short: {}", handle.size));
    }
    let mut buf = vec![0u8; handle.size as usize];
    read_exact_at(file, &mut buf, handle.offset)?;
    let mut cursor = buf.as_slice();
    let crc = cursor.read_u32::<BigEndian>()?;
    let dict = &buf[4..];
    if crc != CRC32C.checksum(dict) {
        return Err(corruption!("dictionary block checksum mismatch"));
    }
    Ok(dict.to_vec())
}

/// Stateful wrapper over a reader for forward-sequential scans (GC rewrite
/// input, range reads). Detects strictly sequential access and issues
/// exponentially growing readahead hints; any out-of-order access resets
/// the window. Owned by exactly one user.
pub struct Prefetcher {
    reader: Arc<Reader>,
    last_offset: u64,
    readahead_size: u64,
    readahead_limit: u64,
}

impl Prefetcher {
    pub fn new(reader: Arc<Reader>) -> Self {
        Self {
            reader,
            last_offset: 0,
            readahead_size: 0,
            readahead_limit: 0,
        }
    }

    pub fn get(&mut self, handle: &BlobHandle) -> Result<BlobRecord> {
        if handle.offset == self.last_offset {
            self.last_offset = handle.offset + handle.size;
            if handle.offset + handle.size > self.readahead_limit {
                self.readahead_size = self.readahead_size.max(handle.size);
                self.reader.prefetch(handle.offset, self.readahead_size);
                self.readahead_limit = handle.offset + self.readahead_size;
                self.readahead_size = (self.readahead_size * 2).min(MAX_READAHEAD_SIZE);
            }
        } else {
            self.last_offset = handle.offset + handle.size;
            self.readahead_size = 0;
            self.readahead_limit = 0;
        }

        self.reader.get(handle)
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::blobfile::blob_file_path;
    use crate::blobfile::writer::Writer;

    fn write_blob_file(
        dir: &std::path::Path,
        file_number: u64,
        compression: CompressionType,
        dictionary: Option<Vec<u8>>,
        records: &[(&[u8], Vec<u8>)],
    ) -> (std::path::PathBuf, Vec<BlobHandle>, u64) {
        let path = blob_file_path(dir, file_number);
        let mut writer = Writer::new(&path, compression, dictionary).unwrap();
        let mut handles = Vec::new();
        for (key, value) in records {
            handles.push(writer.add_record(key, value).unwrap());
        }
        let file_size = writer.finish().unwrap();
        (path, handles, file_size)
    }

    fn open_reader(
        path: &std::path::Path,
        file_size: u64,
        cache: Option<ValueCache>,
        stats: Option<Arc<BlobStats>>,
    ) -> Reader {
        let file = File::open(path).unwrap();
        Reader::open(file, file_size, cache, stats).unwrap()
    }

    #[test]
    fn test_roundtrip_plain() {
        let dir = TempDir::new().unwrap();
        let records: Vec<(&[u8], Vec<u8>)> = vec![
            (b"alpha", b"first value".to_vec()),
            (b"beta", vec![0xab; 4096]),
            (b"gamma", Vec::new()),
        ];
        let (path, handles, file_size) =
            write_blob_file(dir.path(), 1, CompressionType::None, None, &records);

        let reader = open_reader(&path, file_size, None, None);
        for ((key, value), handle) in records.iter().zip(&handles) {
            let record = reader.get(handle).unwrap();
            assert_eq!(record.key.as_ref(), *key);
            assert_eq!(record.value.as_ref(), value.as_slice());
        }
    }

    #[test]
    fn test_roundtrip_compressed() {
        let dir = TempDir::new().unwrap();
        let value = b"a compressible value ".repeat(100);
        for (n, codec) in [(1u64, CompressionType::Lz4), (2, CompressionType::Zstd)] {
            let records: Vec<(&[u8], Vec<u8>)> = vec![(b"key", value.clone())];
            let (path, handles, file_size) =
                write_blob_file(dir.path(), n, codec, None, &records);

            let reader = open_reader(&path, file_size, None, None);
            let record = reader.get(&handles[0]).unwrap();
            assert_eq!(record.value.as_ref(), value.as_slice());
        }
    }

    #[test]
    fn test_roundtrip_with_dictionary() {
        let dir = TempDir::new().unwrap();
        let dict = b"shared sample content for the dictionary".repeat(20);
        let value = b"shared sample content in every record".repeat(10);
        let records: Vec<(&[u8], Vec<u8>)> = vec![(b"key", value.clone())];
        let (path, handles, file_size) = write_blob_file(
            dir.path(),
            1,
            CompressionType::Zstd,
            Some(dict),
            &records,
        );

        let reader = open_reader(&path, file_size, None, None);
        let record = reader.get(&handles[0]).unwrap();
        assert_eq!(record.value.as_ref(), value.as_slice());
    }

    #[test]
    fn test_open_rejects_short_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("stub.blob");
        std::fs::write(&path, b"tiny").unwrap();

        let file = File::open(&path).unwrap();
        let result = Reader::open(file, 4, None, None);
        assert!(matches!(result, Err(Error::Corruption(_))));
    }

    #[test]
    fn test_open_rejects_bad_magic() {
        let dir = TempDir::new().unwrap();
        let records: Vec<(&[u8], Vec<u8>)> = vec![(b"k", b"v".to_vec())];
        let (path, _, file_size) =
            write_blob_file(dir.path(), 1, CompressionType::None, None, &records);

        let mut bytes = std::fs::read(&path).unwrap();
        bytes[0] ^= 0xff;
        std::fs::write(&path, &bytes).unwrap();

        let file = File::open(&path).unwrap();
        assert!(matches!(
            Reader::open(file, file_size, None, None),
            Err(Error::Corruption(_))
        ));
    }

    #[test]
    fn test_get_detects_record_corruption() {
        let dir = TempDir::new().unwrap();
        let records: Vec<(&[u8], Vec<u8>)> = vec![(b"key", vec![0x11; 64])];
        let (path, handles, file_size) =
            write_blob_file(dir.path(), 1, CompressionType::None, None, &records);

        // Flip a byte inside the record body.
        let mut bytes = std::fs::read(&path).unwrap();
        let target = handles[0].offset as usize + 10;
        bytes[target] ^= 0xff;
        std::fs::write(&path, &bytes).unwrap();

        let reader = open_reader(&path, file_size, None, None);
        assert!(matches!(
            reader.get(&handles[0]),
            Err(Error::Corruption(_))
        ));
    }

    #[test]
    fn test_get_detects_short_read() {
        let dir = TempDir::new().unwrap();
        let records: Vec<(&[u8], Vec<u8>)> = vec![(b"key", vec![0x22; 64])];
        let (path, _, file_size) =
            write_blob_file(dir.path(), 1, CompressionType::None, None, &records);

        let reader = open_reader(&path, file_size, None, None);
        let past_end = BlobHandle {
            offset: file_size - 8,
            size: 64,
        };
        assert!(matches!(reader.get(&past_end), Err(Error::Corruption(_))));
    }

    #[test]
    fn test_value_cache_hit() {
        let dir = TempDir::new().unwrap();
        let value = vec![0x5a; 1024 * 1024];
        let records: Vec<(&[u8], Vec<u8>)> = vec![(b"a", value.clone())];
        let (path, handles, file_size) =
            write_blob_file(dir.path(), 7, CompressionType::None, None, &records);

        let cache: ValueCache = Arc::new(Mutex::new(Cache::new(4 * 1024 * 1024, None)));
        let stats = Arc::new(BlobStats::new());
        let reader = open_reader(&path, file_size, Some(cache.clone()), Some(stats.clone()));

        let first = reader.get(&handles[0]).unwrap();
        let second = reader.get(&handles[0]).unwrap();
        assert_eq!(first.value, second.value);
        assert_eq!(first.value.as_ref(), value.as_slice());

        let tickers = stats.tickers();
        assert_eq!(tickers.blob_cache_miss.load(Ordering::Relaxed), 1);
        assert_eq!(tickers.blob_cache_hit.load(Ordering::Relaxed), 1);
        // One entry, one underlying read.
        assert_eq!(cache.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_cached_value_survives_eviction() {
        let dir = TempDir::new().unwrap();
        let records: Vec<(&[u8], Vec<u8>)> = vec![(b"a", vec![0x01; 256])];
        let (path, handles, file_size) =
            write_blob_file(dir.path(), 1, CompressionType::None, None, &records);

        let cache: ValueCache = Arc::new(Mutex::new(Cache::new(1024, None)));
        let reader = open_reader(&path, file_size, Some(cache.clone()), None);

        let record = reader.get(&handles[0]).unwrap();
        // Push the entry out of the cache; the pinned buffer must stay
        // intact.
        cache
            .lock()
            .unwrap()
            .insert(b"filler".to_vec(), Bytes::from(vec![0u8; 2048]), 2048);
        assert_eq!(record.value.as_ref(), vec![0x01; 256].as_slice());
    }

    #[test]
    fn test_prefetcher_sequential_hint_growth() {
        let dir = TempDir::new().unwrap();
        let record_size = 1024usize;
        let count = 256usize;
        let records: Vec<(&[u8], Vec<u8>)> = (0..count)
            .map(|_| (b"k".as_slice(), vec![0x33; record_size]))
            .collect();
        let (path, handles, file_size) =
            write_blob_file(dir.path(), 1, CompressionType::None, None, &records);

        let reader = Arc::new(open_reader(&path, file_size, None, None));
        let mut prefetcher = Prefetcher::new(reader.clone());

        // The writer lays records out back to back starting at the header,
        // and the prefetcher tracks from offset 0, so the first get resets
        // and the rest stream.
        for handle in &handles {
            prefetcher.get(handle).unwrap();
        }

        let hints = reader.prefetch_hints();
        assert!(hints > 0);
        // Doubling readahead means the hint count stays logarithmic in the
        // scanned byte count, not linear in the record count.
        assert!(hints < 20, "issued {} hints for {} records", hints, count);
        assert!(prefetcher.readahead_size <= MAX_READAHEAD_SIZE);
    }

    #[test]
    fn test_prefetcher_resets_on_random_access() {
        let dir = TempDir::new().unwrap();
        let records: Vec<(&[u8], Vec<u8>)> = (0..8)
            .map(|_| (b"k".as_slice(), vec![0x44; 512]))
            .collect();
        let (path, handles, file_size) =
            write_blob_file(dir.path(), 1, CompressionType::None, None, &records);

        let reader = Arc::new(open_reader(&path, file_size, None, None));
        let mut prefetcher = Prefetcher::new(reader.clone());

        prefetcher.get(&handles[0]).unwrap();
        assert_eq!(prefetcher.last_offset, handles[0].offset + handles[0].size);

        // Jump backwards: the readahead window must reset.
        prefetcher.get(&handles[0]).unwrap();
        assert_eq!(prefetcher.readahead_size, 0);
        assert_eq!(prefetcher.readahead_limit, 0);

        let record = prefetcher.get(&handles[1]).unwrap();
        assert_eq!(record.value.as_ref(), vec![0x44; 512].as_slice());
    }
}
