use std::path::PathBuf;

use crate::blobfile::compression::CompressionType;

/// Configuration for the blob storage layer of one column family.
#[derive(Debug, Clone)]
pub struct BlobConfig {
    /// Directory where blob files live
    pub dir: PathBuf,

    /// Target size for blob files produced by GC rewrites (default: 256MB)
    pub blob_file_target_size: u64,

    /// Minimum total input size for a GC batch to be worth running (default: 16MB)
    pub min_gc_batch_size: u64,

    /// Maximum total input size collected into one GC batch (default: 1GB)
    pub max_gc_batch_size: u64,

    /// Discardable ratio at which a file becomes a GC candidate (default: 0.5)
    pub blob_file_discardable_ratio: f64,

    /// Files at or below this size score 1.0 for GC regardless of garbage
    /// (default: 8MB)
    pub merge_small_file_threshold: u64,

    /// Byte budget for the decoded-value cache; 0 disables it (default: 0)
    pub blob_cache_size: usize,

    /// Maximum number of blob files held open by the reader cache (default: 1024)
    pub max_open_blob_files: usize,

    /// Compression applied to record values by the writer (default: None)
    pub compression: CompressionType,
}

impl Default for BlobConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("./cinder"),
            blob_file_target_size: 256 * 1024 * 1024,
            min_gc_batch_size: 16 * 1024 * 1024,
            max_gc_batch_size: 1024 * 1024 * 1024,
            blob_file_discardable_ratio: 0.5,
            merge_small_file_threshold: 8 * 1024 * 1024,
            blob_cache_size: 0,
            max_open_blob_files: 1024,
            compression: CompressionType::None,
        }
    }
}

impl BlobConfig {
    /// Create a new config with the given blob directory
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            ..Default::default()
        }
    }

    /// Set the GC output file target size
    pub fn blob_file_target_size(mut self, size: u64) -> Self {
        self.blob_file_target_size = size;
        self
    }

    /// Set the minimum GC batch size
    pub fn min_gc_batch_size(mut self, size: u64) -> Self {
        self.min_gc_batch_size = size;
        self
    }

    /// Set the maximum GC batch size
    pub fn max_gc_batch_size(mut self, size: u64) -> Self {
        self.max_gc_batch_size = size;
        self
    }

    /// Set the discardable ratio threshold
    pub fn blob_file_discardable_ratio(mut self, ratio: f64) -> Self {
        self.blob_file_discardable_ratio = ratio;
        self
    }

    /// Set the small-file merge threshold
    pub fn merge_small_file_threshold(mut self, size: u64) -> Self {
        self.merge_small_file_threshold = size;
        self
    }

    /// Set the decoded-value cache budget in bytes
    pub fn blob_cache_size(mut self, size: usize) -> Self {
        self.blob_cache_size = size;
        self
    }

    /// Set the open-reader cache capacity
    pub fn max_open_blob_files(mut self, count: usize) -> Self {
        self.max_open_blob_files = count;
        self
    }

    /// Set the value compression codec
    pub fn compression(mut self, compression: CompressionType) -> Self {
        self.compression = compression;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = BlobConfig::default();
        assert_eq!(config.dir, PathBuf::from("./cinder"));
        assert_eq!(config.blob_file_target_size, 256 * 1024 * 1024);
        assert_eq!(config.min_gc_batch_size, 16 * 1024 * 1024);
        assert_eq!(config.blob_file_discardable_ratio, 0.5);
        assert_eq!(config.blob_cache_size, 0);
        assert_eq!(config.compression, CompressionType::None);
    }

    #[test]
    fn test_config_builder() {
        let config = BlobConfig::new("/tmp/blobs")
            .min_gc_batch_size(1024 * 1024)
            .max_gc_batch_size(100 * 1024 * 1024)
            .blob_file_discardable_ratio(0.25)
            .blob_cache_size(32 * 1024 * 1024)
            .compression(CompressionType::Lz4);

        assert_eq!(config.dir, PathBuf::from("/tmp/blobs"));
        assert_eq!(config.min_gc_batch_size, 1024 * 1024);
        assert_eq!(config.max_gc_batch_size, 100 * 1024 * 1024);
        assert_eq!(config.blob_file_discardable_ratio, 0.25);
        assert_eq!(config.blob_cache_size, 32 * 1024 * 1024);
        assert_eq!(config.compression, CompressionType::Lz4);
    }
}
