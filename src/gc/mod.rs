//! Garbage collection of blob files: scoring, picking, and the batch
//! handed to a rewrite job.

pub mod picker;

use std::sync::Arc;

use crate::blobfile::meta::{BlobFileMeta, FileEvent};
use crate::error::Result;

/// GC priority for one blob file.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GcScore {
    pub file_number: u64,
    /// In [0, 1]: the discardable ratio, or 1.0 for files small enough to
    /// merge away unconditionally.
    pub score: f64,
}

/// One round's worth of blob files to rewrite.
///
/// The host's GC job calls `mark_begin` before reading the inputs so the
/// picker skips them in concurrent rounds, and `mark_completed` when the
/// round ends (successfully or not) before the rewritten inputs are marked
/// obsolete.
pub struct BlobGc {
    inputs: Vec<Arc<BlobFileMeta>>,
    maybe_continue_next_time: bool,
}

impl BlobGc {
    pub fn new(inputs: Vec<Arc<BlobFileMeta>>, maybe_continue_next_time: bool) -> Self {
        Self {
            inputs,
            maybe_continue_next_time,
        }
    }

    pub fn inputs(&self) -> &[Arc<BlobFileMeta>] {
        &self.inputs
    }

    /// Whether enough eligible files remain beyond this batch to warrant
    /// scheduling another round immediately after.
    pub fn maybe_continue_next_time(&self) -> bool {
        self.maybe_continue_next_time
    }

    pub fn mark_begin(&self) -> Result<()> {
        for file in &self.inputs {
            file.transit(FileEvent::GcBegin)?;
        }
        Ok(())
    }

    pub fn mark_completed(&self) -> Result<()> {
        for file in &self.inputs {
            file.transit(FileEvent::GcCompleted)?;
        }
        Ok(())
    }
}
