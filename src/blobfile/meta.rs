//! In-memory metadata for one blob file.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

use crate::error::Result;
use crate::Error;

/// Lifecycle state of a blob file.
///
/// `Init` covers the window between file creation and the flush/compaction
/// that produced it registering its output. Only `Normal` files are eligible
/// for GC; `BeingGc` files are skipped by the picker; `Obsolete` files wait
/// for snapshot release before physical deletion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileState {
    Init,
    Normal,
    BeingGc,
    Obsolete,
}

/// Events that drive the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileEvent {
    FlushCompleted,
    CompactionCompleted,
    GcBegin,
    GcCompleted,
    Delete,
}

/// Shared metadata record for one blob file. The registry owns the `Arc`;
/// GC rounds and prefetchers hold `Weak` references and tolerate the file
/// vanishing underneath them.
#[derive(Debug)]
pub struct BlobFileMeta {
    file_number: u64,
    file_size: u64,
    /// Bytes whose referencing LSM entries have been overwritten or
    /// deleted. Never exceeds `file_size`.
    discardable_size: AtomicU64,
    /// Set to force the file into the next GC round.
    gc_mark: AtomicBool,
    state: Mutex<FileState>,
}

impl BlobFileMeta {
    pub fn new(file_number: u64, file_size: u64) -> Self {
        Self {
            file_number,
            file_size,
            discardable_size: AtomicU64::new(0),
            gc_mark: AtomicBool::new(false),
            state: Mutex::new(FileState::Init),
        }
    }

    pub fn file_number(&self) -> u64 {
        self.file_number
    }

    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    pub fn file_state(&self) -> FileState {
        *self.state.lock().unwrap()
    }

    pub fn is_obsolete(&self) -> bool {
        self.file_state() == FileState::Obsolete
    }

    pub fn discardable_size(&self) -> u64 {
        self.discardable_size.load(Ordering::Relaxed)
    }

    /// Accounts bytes discarded by an overwrite or delete of a referencing
    /// LSM entry, clamped at the file size.
    pub fn add_discardable_size(&self, bytes: u64) {
        let mut current = self.discardable_size.load(Ordering::Relaxed);
        loop {
            let next = (current + bytes).min(self.file_size);
            match self.discardable_size.compare_exchange_weak(
                current,
                next,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return,
                Err(observed) => current = observed,
            }
        }
    }

    pub fn discardable_ratio(&self) -> f64 {
        if self.file_size == 0 {
            return 0.0;
        }
        self.discardable_size() as f64 / self.file_size as f64
    }

    pub fn gc_mark(&self) -> bool {
        self.gc_mark.load(Ordering::Relaxed)
    }

    pub fn set_gc_mark(&self, mark: bool) {
        self.gc_mark.store(mark, Ordering::Relaxed);
    }

    /// Applies a lifecycle event. Transitions not in the state machine are
    /// rejected.
    pub fn transit(&self, event: FileEvent) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let next = match (*state, event) {
            (FileState::Init, FileEvent::FlushCompleted) => FileState::Normal,
            (FileState::Init, FileEvent::CompactionCompleted) => FileState::Normal,
            (FileState::Normal, FileEvent::GcBegin) => FileState::BeingGc,
            (FileState::BeingGc, FileEvent::GcCompleted) => FileState::Normal,
            (FileState::Init, FileEvent::Delete)
            | (FileState::Normal, FileEvent::Delete)
            | (FileState::BeingGc, FileEvent::Delete) => FileState::Obsolete,
            (current, event) => {
                return Err(Error::InvalidState(format!(
                    "blob file {}: invalid transition {:?} on {:?}",
                    self.file_number, event, current
                )));
            }
        };
        *state = next;
        Ok(())
    }
}
