//! Blob layer statistics.
//!
//! Two surfaces: cache tickers incremented on the read path, and per-column-
//! family internal counters queryable by name through the host engine's
//! integer-property mechanism. Counters make no attempt to avoid cross-thread
//! contention beyond relaxed atomics.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

/// Property name for the total size of live blob records.
pub const LIVE_BLOB_SIZE: &str = "cinder.live-blob-size";
/// Property name for the number of live blob files.
pub const NUM_LIVE_BLOB_FILE: &str = "cinder.num-live-blob-file";
/// Property name for the number of obsolete blob files awaiting deletion.
pub const NUM_OBSOLETE_BLOB_FILE: &str = "cinder.num-obsolete-blob-file";
/// Property name for the total size of live blob files.
pub const LIVE_BLOB_FILE_SIZE: &str = "cinder.live-blob-file-size";
/// Property name for the total size of obsolete blob files.
pub const OBSOLETE_BLOB_FILE_SIZE: &str = "cinder.obsolete-blob-file-size";

/// Read-path tickers.
#[derive(Default)]
pub struct Tickers {
    pub blob_cache_hit: AtomicU64,
    pub blob_cache_miss: AtomicU64,
}

impl Tickers {
    pub fn record_cache_hit(&self) {
        self.blob_cache_hit.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_miss(&self) {
        self.blob_cache_miss.fetch_add(1, Ordering::Relaxed);
    }
}

/// Per-column-family internal counters.
#[derive(Default)]
pub struct InternalStats {
    live_blob_size: AtomicU64,
    num_live_blob_file: AtomicU64,
    num_obsolete_blob_file: AtomicU64,
    live_blob_file_size: AtomicU64,
    obsolete_blob_file_size: AtomicU64,
}

/// The internal stat kinds, addressable by property name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatsType {
    LiveBlobSize,
    NumLiveBlobFile,
    NumObsoleteBlobFile,
    LiveBlobFileSize,
    ObsoleteBlobFileSize,
}

impl InternalStats {
    fn counter(&self, ty: StatsType) -> &AtomicU64 {
        match ty {
            StatsType::LiveBlobSize => &self.live_blob_size,
            StatsType::NumLiveBlobFile => &self.num_live_blob_file,
            StatsType::NumObsoleteBlobFile => &self.num_obsolete_blob_file,
            StatsType::LiveBlobFileSize => &self.live_blob_file_size,
            StatsType::ObsoleteBlobFileSize => &self.obsolete_blob_file_size,
        }
    }

    pub fn add(&self, ty: StatsType, value: u64) {
        self.counter(ty).fetch_add(value, Ordering::Relaxed);
    }

    pub fn sub(&self, ty: StatsType, value: u64) {
        self.counter(ty).fetch_sub(value, Ordering::Relaxed);
    }

    pub fn get(&self, ty: StatsType) -> u64 {
        self.counter(ty).load(Ordering::Relaxed)
    }

    /// Resolves an integer property by name.
    pub fn get_int_property(&self, property: &str) -> Option<u64> {
        let ty = match property {
            LIVE_BLOB_SIZE => StatsType::LiveBlobSize,
            NUM_LIVE_BLOB_FILE => StatsType::NumLiveBlobFile,
            NUM_OBSOLETE_BLOB_FILE => StatsType::NumObsoleteBlobFile,
            LIVE_BLOB_FILE_SIZE => StatsType::LiveBlobFileSize,
            OBSOLETE_BLOB_FILE_SIZE => StatsType::ObsoleteBlobFileSize,
            _ => return None,
        };
        Some(self.get(ty))
    }
}

/// Statistics handle shared across the blob layer: global tickers plus one
/// `InternalStats` per column family. Passed in explicitly wherever needed;
/// there is no process-wide instance.
#[derive(Default)]
pub struct BlobStats {
    tickers: Tickers,
    internal: RwLock<HashMap<u32, Arc<InternalStats>>>,
}

impl BlobStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tickers(&self) -> &Tickers {
        &self.tickers
    }

    /// Returns the internal stats for a column family, creating them on
    /// first use.
    pub fn internal_stats(&self, cf_id: u32) -> Arc<InternalStats> {
        if let Some(stats) = self.internal.read().unwrap().get(&cf_id) {
            return stats.clone();
        }
        let mut internal = self.internal.write().unwrap();
        internal.entry(cf_id).or_default().clone()
    }
}
