//! Picks which blob files to rewrite in one GC round.

use super::BlobGc;
use crate::blobfile::meta::FileState;
use crate::config::BlobConfig;
use crate::storage::BlobStorage;

pub struct GcPicker {
    config: BlobConfig,
}

impl GcPicker {
    pub fn new(config: BlobConfig) -> Self {
        Self { config }
    }

    /// Walks the storage's score snapshot in descending order and collects
    /// a batch bounded by `max_gc_batch_size` input bytes and
    /// `blob_file_target_size` estimated output bytes. Once the batch is
    /// full, keeps scanning only to decide whether enough eligible files
    /// remain to warrant another round right after this one.
    ///
    /// Returns `None` when nothing is worth rewriting; picking never fails
    /// and is cheap to re-run.
    pub fn pick_blob_gc(&self, storage: &BlobStorage) -> Option<BlobGc> {
        let mut inputs = Vec::new();
        let mut batch_size: u64 = 0;
        let mut estimate_output_size: u64 = 0;
        let mut stop_picking = false;
        let mut maybe_continue_next_time = false;
        let mut next_gc_size: u64 = 0;

        for gc_score in storage.gc_score() {
            // Entries can be stale relative to the snapshot; a miss means
            // the file was erased since the last score computation.
            let file = match storage.find_file(gc_score.file_number).upgrade() {
                Some(file) => file,
                None => continue,
            };
            if file.file_state() != FileState::Normal {
                // Already in a GC round, or not yet live.
                tracing::debug!(
                    file_number = file.file_number(),
                    state = ?file.file_state(),
                    "blob file not eligible for gc"
                );
                continue;
            }

            // Scores are sorted descending, so the first file failing every
            // eligibility test ends the scan: nothing after it can qualify.
            let eligible = file.file_size() <= self.config.merge_small_file_threshold
                || file.gc_mark()
                || file.discardable_ratio() >= self.config.blob_file_discardable_ratio;

            if !stop_picking {
                if !eligible {
                    break;
                }
                batch_size += file.file_size();
                estimate_output_size += file.file_size() - file.discardable_size();
                inputs.push(file);
                if batch_size >= self.config.max_gc_batch_size
                    || estimate_output_size >= self.config.blob_file_target_size
                {
                    // The batch is full; keep scanning only for the
                    // continue-next-time decision.
                    stop_picking = true;
                }
            } else if eligible {
                next_gc_size += file.file_size();
                if next_gc_size > self.config.min_gc_batch_size {
                    maybe_continue_next_time = true;
                    tracing::info!(
                        next_gc_size,
                        "eligible blob files remain, trigger gc again after this round"
                    );
                    break;
                }
            } else {
                break;
            }
        }

        tracing::debug!(
            batch_size,
            estimate_output_size,
            input_files = inputs.len(),
            "picked gc batch"
        );
        if inputs.is_empty() || batch_size < self.config.min_gc_batch_size {
            return None;
        }
        Some(BlobGc::new(inputs, maybe_continue_next_time))
    }
}
