//! Open-reader cache.
//!
//! Readers are opened lazily and kept in an LRU keyed by file number;
//! eviction drops the `Arc`, closing the file once in-flight reads finish.
//! The decoded-value cache is created here and shared by every reader so
//! cache budgets apply per column family, not per file.

use std::fs::File;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use super::reader::{Prefetcher, Reader, ValueCache};
use super::{blob_file_path, BlobHandle, BlobRecord};
use crate::cache::Cache;
use crate::config::BlobConfig;
use crate::error::Result;
use crate::stats::BlobStats;

pub struct FileCache {
    dir: PathBuf,
    readers: Mutex<Cache<u64, Arc<Reader>>>,
    value_cache: Option<ValueCache>,
    stats: Option<Arc<BlobStats>>,
}

impl FileCache {
    pub fn new(config: &BlobConfig, stats: Option<Arc<BlobStats>>) -> Self {
        let value_cache: Option<ValueCache> = if config.blob_cache_size > 0 {
            Some(Arc::new(Mutex::new(Cache::new(config.blob_cache_size, None))))
        } else {
            None
        };
        Self {
            dir: config.dir.clone(),
            readers: Mutex::new(Cache::new(config.max_open_blob_files, None)),
            value_cache,
            stats,
        }
    }

    /// Reads one record through the open-reader cache.
    pub fn get(&self, file_number: u64, file_size: u64, handle: &BlobHandle) -> Result<BlobRecord> {
        let reader = self.find_reader(file_number, file_size)?;
        reader.get(handle)
    }

    /// Creates a prefetcher over the (possibly freshly opened) reader for
    /// the given file.
    pub fn new_prefetcher(&self, file_number: u64, file_size: u64) -> Result<Prefetcher> {
        let reader = self.find_reader(file_number, file_size)?;
        Ok(Prefetcher::new(reader))
    }

    /// Drops the open reader for a file, if any. In-flight reads holding
    /// the `Arc` finish normally; the file closes when the last clone goes.
    pub fn evict(&self, file_number: u64) {
        self.readers.lock().unwrap().remove(&file_number);
    }

    fn find_reader(&self, file_number: u64, file_size: u64) -> Result<Arc<Reader>> {
        if let Some(reader) = self.readers.lock()?.get(&file_number) {
            return Ok(reader);
        }

        // Open outside the cache lock; a racing open of the same file just
        // wastes one descriptor until the loser's entry is replaced.
        let path = blob_file_path(&self.dir, file_number);
        let file = File::open(&path)?;
        let reader = Arc::new(Reader::open(
            file,
            file_size,
            self.value_cache.clone(),
            self.stats.clone(),
        )?);

        self.readers
            .lock()?
            .insert(file_number, reader.clone(), 1);
        Ok(reader)
    }
}
