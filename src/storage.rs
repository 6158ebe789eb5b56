//! Per-column-family blob file registry.
//!
//! Owns the metadata for every live blob file, the obsolete list awaiting
//! snapshot release, and the GC score snapshot. A single readers-writer
//! lock guards all of it; the file cache has its own synchronization and
//! is never called while holding this lock on a path that can recurse.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::{Arc, RwLock, Weak};

use crate::blobfile::cache::FileCache;
use crate::blobfile::meta::{BlobFileMeta, FileEvent};
use crate::blobfile::reader::Prefetcher;
use crate::blobfile::{blob_file_path, BlobIndex, BlobRecord};
use crate::config::BlobConfig;
use crate::engine::SequenceNumber;
use crate::error::Result;
use crate::gc::GcScore;
use crate::corruption;
use crate::stats::{BlobStats, InternalStats, StatsType};

struct State {
    files: HashMap<u64, Arc<BlobFileMeta>>,
    /// Files no longer referenced by any future operation, with the
    /// sequence at which they became invisible.
    obsolete_files: Vec<(u64, SequenceNumber)>,
    /// Last computed GC priorities, highest score first.
    gc_score: Vec<GcScore>,
}

pub struct BlobStorage {
    config: BlobConfig,
    file_cache: Arc<FileCache>,
    state: RwLock<State>,
    internal_stats: Option<Arc<InternalStats>>,
}

impl BlobStorage {
    pub fn new(cf_id: u32, config: BlobConfig, stats: Option<Arc<BlobStats>>) -> Self {
        let file_cache = Arc::new(FileCache::new(&config, stats.clone()));
        let internal_stats = stats.map(|s| s.internal_stats(cf_id));
        Self {
            config,
            file_cache,
            state: RwLock::new(State {
                files: HashMap::new(),
                obsolete_files: Vec::new(),
                gc_score: Vec::new(),
            }),
            internal_stats,
        }
    }

    pub fn config(&self) -> &BlobConfig {
        &self.config
    }

    pub fn file_cache(&self) -> &Arc<FileCache> {
        &self.file_cache
    }

    /// Registers a blob file produced by the writer plane.
    pub fn add_blob_file(&self, file: Arc<BlobFileMeta>) {
        let mut state = self.state.write().unwrap();
        if let Some(stats) = &self.internal_stats {
            stats.add(StatsType::NumLiveBlobFile, 1);
            stats.add(StatsType::LiveBlobFileSize, file.file_size());
        }
        state.files.insert(file.file_number(), file);
    }

    /// Looks up a file's metadata. The returned weak reference dangles once
    /// the file is erased by obsolescence; consumers must tolerate that.
    pub fn find_file(&self, file_number: u64) -> Weak<BlobFileMeta> {
        let state = self.state.read().unwrap();
        match state.files.get(&file_number) {
            Some(file) => Arc::downgrade(file),
            None => Weak::new(),
        }
    }

    /// Resolves a blob index to its record. A file missing from the
    /// registry is a dangling pointer from the LSM, which is corruption.
    pub fn get(&self, index: &BlobIndex) -> Result<BlobRecord> {
        let file = self
            .find_file(index.file_number)
            .upgrade()
            .ok_or_else(|| corruption!("missing blob file: {}", index.file_number))?;
        self.file_cache
            .get(file.file_number(), file.file_size(), &index.blob_handle)
    }

    /// Creates a prefetcher for sequentially scanning one blob file.
    pub fn new_prefetcher(&self, file_number: u64) -> Result<Prefetcher> {
        let file = self
            .find_file(file_number)
            .upgrade()
            .ok_or_else(|| corruption!("missing blob file: {}", file_number))?;
        self.file_cache
            .new_prefetcher(file.file_number(), file.file_size())
    }

    /// Marks a file obsolete at the given sequence. Physical deletion waits
    /// until every snapshot at or before that sequence is released.
    pub fn mark_file_obsolete(
        &self,
        file: &Arc<BlobFileMeta>,
        obsolete_sequence: SequenceNumber,
    ) -> Result<()> {
        let mut state = self.state.write().unwrap();
        file.transit(FileEvent::Delete)?;
        state
            .obsolete_files
            .push((file.file_number(), obsolete_sequence));
        if let Some(stats) = &self.internal_stats {
            stats.sub(StatsType::NumLiveBlobFile, 1);
            stats.sub(StatsType::LiveBlobFileSize, file.file_size());
            stats.add(StatsType::NumObsoleteBlobFile, 1);
            stats.add(StatsType::ObsoleteBlobFileSize, file.file_size());
        }
        Ok(())
    }

    /// Collects the paths of obsolete files no longer visible to any live
    /// snapshot, erasing them from the registry and reader cache. The
    /// caller unlinks the returned paths; a failed unlink is retried by the
    /// caller's next sweep.
    pub fn get_obsolete_files(&self, oldest_live_sequence: SequenceNumber) -> Vec<PathBuf> {
        let mut state = self.state.write().unwrap();
        let mut paths = Vec::new();

        let mut kept = Vec::new();
        let obsolete = std::mem::take(&mut state.obsolete_files);
        for (file_number, obsolete_sequence) in obsolete {
            // The file is deletable once the oldest snapshot is past the
            // sequence at which it became obsolete.
            if oldest_live_sequence > obsolete_sequence {
                let file_size = state
                    .files
                    .remove(&file_number)
                    .map(|f| f.file_size())
                    .unwrap_or(0);
                self.file_cache.evict(file_number);

                tracing::info!(
                    file_number,
                    obsolete_sequence,
                    oldest_live_sequence,
                    "obsolete blob file not visible to any snapshot, deleting"
                );

                if let Some(stats) = &self.internal_stats {
                    stats.sub(StatsType::NumObsoleteBlobFile, 1);
                    stats.sub(StatsType::ObsoleteBlobFileSize, file_size);
                }
                paths.push(blob_file_path(&self.config.dir, file_number));
            } else {
                kept.push((file_number, obsolete_sequence));
            }
        }
        state.obsolete_files = kept;
        paths
    }

    /// Rebuilds the GC score snapshot over non-obsolete files, highest
    /// score first. Small files always score 1.0 so they get merged away
    /// even when cold.
    pub fn compute_gc_score(&self) {
        let mut state = self.state.write().unwrap();
        let mut scores: Vec<GcScore> = state
            .files
            .values()
            .filter(|file| !file.is_obsolete())
            .map(|file| GcScore {
                file_number: file.file_number(),
                score: if file.file_size() < self.config.merge_small_file_threshold {
                    1.0
                } else {
                    file.discardable_ratio()
                },
            })
            .collect();
        scores.sort_by(|a, b| b.score.total_cmp(&a.score));
        state.gc_score = scores;
    }

    /// Returns the last computed score snapshot. Entries may be stale;
    /// consumers resolve them through `find_file` and skip misses.
    pub fn gc_score(&self) -> Vec<GcScore> {
        self.state.read().unwrap().gc_score.clone()
    }

    /// Read-locked snapshot of the registry for observability.
    pub fn export_blob_files(&self) -> BTreeMap<u64, Weak<BlobFileMeta>> {
        let state = self.state.read().unwrap();
        state
            .files
            .iter()
            .map(|(n, file)| (*n, Arc::downgrade(file)))
            .collect()
    }

    #[cfg(test)]
    pub(crate) fn obsolete_file_count(&self) -> usize {
        self.state.read().unwrap().obsolete_files.len()
    }
}

/// Resolves the blob storage of a column family. The version-set that
/// persists this mapping lives in the host engine; this crate only consumes
/// it.
pub trait StorageProvider: Send + Sync {
    fn blob_storage(&self, cf_id: u32) -> Option<Arc<BlobStorage>>;
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::blobfile::compression::CompressionType;
    use crate::blobfile::writer::Writer;
    use crate::blobfile::BlobHandle;
    use crate::stats::NUM_LIVE_BLOB_FILE;
    use crate::Error;

    fn write_blob_file(dir: &std::path::Path, file_number: u64, value: &[u8]) -> (BlobHandle, u64) {
        let path = blob_file_path(dir, file_number);
        let mut writer = Writer::new(&path, CompressionType::None, None).unwrap();
        let handle = writer.add_record(b"key", value).unwrap();
        let file_size = writer.finish().unwrap();
        (handle, file_size)
    }

    fn live_file(file_number: u64, file_size: u64) -> Arc<BlobFileMeta> {
        let meta = Arc::new(BlobFileMeta::new(file_number, file_size));
        meta.transit(FileEvent::FlushCompleted).unwrap();
        meta
    }

    #[test]
    fn test_find_file() {
        let dir = TempDir::new().unwrap();
        let storage = BlobStorage::new(0, BlobConfig::new(dir.path()), None);

        storage.add_blob_file(live_file(1, 100));

        assert!(storage.find_file(1).upgrade().is_some());
        assert!(storage.find_file(2).upgrade().is_none());
    }

    #[test]
    fn test_get_resolves_index() {
        let dir = TempDir::new().unwrap();
        let (handle, file_size) = write_blob_file(dir.path(), 1, b"hello blob");

        let storage = BlobStorage::new(0, BlobConfig::new(dir.path()), None);
        storage.add_blob_file(live_file(1, file_size));

        let index = BlobIndex {
            file_number: 1,
            blob_handle: handle,
        };
        let record = storage.get(&index).unwrap();
        assert_eq!(record.value.as_ref(), b"hello blob");
    }

    #[test]
    fn test_get_missing_file_is_corruption() {
        let dir = TempDir::new().unwrap();
        let storage = BlobStorage::new(0, BlobConfig::new(dir.path()), None);

        let index = BlobIndex {
            file_number: 3,
            blob_handle: BlobHandle { offset: 0, size: 8 },
        };
        assert!(matches!(storage.get(&index), Err(Error::Corruption(_))));
    }

    #[test]
    fn test_obsolete_retention() {
        let dir = TempDir::new().unwrap();
        let (handle, file_size) = write_blob_file(dir.path(), 7, b"retained");

        let storage = BlobStorage::new(0, BlobConfig::new(dir.path()), None);
        let file = live_file(7, file_size);
        storage.add_blob_file(file.clone());

        storage.mark_file_obsolete(&file, 1000).unwrap();
        assert!(file.is_obsolete());

        // A snapshot at or before the obsolete sequence still pins the file.
        assert!(storage.get_obsolete_files(999).is_empty());
        assert_eq!(storage.obsolete_file_count(), 1);
        let index = BlobIndex {
            file_number: 7,
            blob_handle: handle,
        };
        assert!(storage.get(&index).is_ok());

        // Once the oldest snapshot moves past it, the file is deletable.
        let paths = storage.get_obsolete_files(1001);
        assert_eq!(paths, vec![blob_file_path(dir.path(), 7)]);
        assert_eq!(storage.obsolete_file_count(), 0);
        assert!(storage.find_file(7).upgrade().is_none());
        assert!(matches!(storage.get(&index), Err(Error::Corruption(_))));
    }

    #[test]
    fn test_gc_score_ordering() {
        let dir = TempDir::new().unwrap();
        let config = BlobConfig::new(dir.path()).merge_small_file_threshold(1024);
        let storage = BlobStorage::new(0, config, None);

        let big_hot = live_file(1, 10_000);
        big_hot.add_discardable_size(1_000); // ratio 0.1
        let big_cold = live_file(2, 10_000);
        big_cold.add_discardable_size(9_000); // ratio 0.9
        let small = live_file(3, 512); // below threshold, scores 1.0

        storage.add_blob_file(big_hot);
        storage.add_blob_file(big_cold);
        storage.add_blob_file(small);
        storage.compute_gc_score();

        let scores = storage.gc_score();
        assert_eq!(scores.len(), 3);
        assert_eq!(scores[0].file_number, 3);
        assert_eq!(scores[0].score, 1.0);
        assert_eq!(scores[1].file_number, 2);
        assert_eq!(scores[2].file_number, 1);
    }

    #[test]
    fn test_gc_score_skips_obsolete() {
        let dir = TempDir::new().unwrap();
        let storage = BlobStorage::new(0, BlobConfig::new(dir.path()), None);

        let file = live_file(1, 100);
        storage.add_blob_file(file.clone());
        storage.mark_file_obsolete(&file, 10).unwrap();
        storage.compute_gc_score();

        assert!(storage.gc_score().is_empty());
    }

    #[test]
    fn test_export_blob_files() {
        let dir = TempDir::new().unwrap();
        let storage = BlobStorage::new(0, BlobConfig::new(dir.path()), None);

        storage.add_blob_file(live_file(2, 100));
        storage.add_blob_file(live_file(1, 100));

        let exported = storage.export_blob_files();
        let numbers: Vec<u64> = exported.keys().copied().collect();
        assert_eq!(numbers, vec![1, 2]);
        assert!(exported[&1].upgrade().is_some());
    }

    #[test]
    fn test_stats_accounting() {
        let dir = TempDir::new().unwrap();
        let stats = Arc::new(BlobStats::new());
        let storage = BlobStorage::new(5, BlobConfig::new(dir.path()), Some(stats.clone()));

        let file = live_file(1, 4096);
        storage.add_blob_file(file.clone());

        let internal = stats.internal_stats(5);
        assert_eq!(internal.get_int_property(NUM_LIVE_BLOB_FILE), Some(1));
        assert_eq!(internal.get(StatsType::LiveBlobFileSize), 4096);

        storage.mark_file_obsolete(&file, 100).unwrap();
        assert_eq!(internal.get(StatsType::NumLiveBlobFile), 0);
        assert_eq!(internal.get(StatsType::NumObsoleteBlobFile), 1);
        assert_eq!(internal.get(StatsType::ObsoleteBlobFileSize), 4096);

        storage.get_obsolete_files(101);
        assert_eq!(internal.get(StatsType::NumObsoleteBlobFile), 0);
        assert_eq!(internal.get(StatsType::ObsoleteBlobFileSize), 0);
    }
}
