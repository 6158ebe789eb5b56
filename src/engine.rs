//! The narrow surface through which this crate talks to the host LSM
//! engine. The engine owns snapshots, sequence numbers, compaction
//! scheduling, and merge application; we only define the shapes it calls
//! us with.

use crate::error::Error;

/// LSM sequence number.
pub type SequenceNumber = u64;

/// The value type tag the engine attaches to an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    /// An inline value stored directly in the LSM.
    Value,
    /// An encoded blob index pointing into a blob file.
    BlobIndex,
}

/// Decision returned by a compaction filter for one entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Keep,
    Remove,
    ChangeValue(Vec<u8>),
    RemoveAndSkipUntil(Vec<u8>),
}

/// A user-supplied compaction filter, invoked once per entry during
/// compaction.
pub trait CompactionFilter: Send + Sync {
    fn name(&self) -> &str;

    fn filter(&self, level: usize, key: &[u8], value_type: ValueType, value: &[u8]) -> Decision;
}

/// Mints one filter per compaction run.
pub trait CompactionFilterFactory: Send + Sync {
    fn name(&self) -> &str;

    fn create(&self, context: &CompactionContext) -> Box<dyn CompactionFilter>;
}

/// Per-compaction context handed to filter factories.
#[derive(Debug, Clone, Copy)]
pub struct CompactionContext {
    pub column_family_id: u32,
}

/// Input to a full merge: the optional base value with its type, and the
/// operand list in application order (oldest first).
pub struct MergeInput<'a> {
    pub key: &'a [u8],
    pub existing: Option<(ValueType, &'a [u8])>,
    pub operands: &'a [Vec<u8>],
}

/// Output of a successful full merge.
pub struct MergeOutput {
    pub value_type: ValueType,
    pub value: MergeValue,
}

/// Either the base value survives untouched, or the merge produced a new
/// encoding.
pub enum MergeValue {
    /// Emit the existing base value unchanged.
    Existing,
    /// Emit this newly encoded value.
    New(Vec<u8>),
}

/// An associative-update operator the engine applies to reconcile merge
/// operands against a base value. Returning `None` signals merge failure;
/// the engine escalates it as corruption.
pub trait MergeOperator: Send + Sync {
    fn name(&self) -> &str;

    fn full_merge(&self, input: MergeInput) -> Option<MergeOutput>;

    /// Collapses operands without a base value. Operators that need the base
    /// return `None` and the engine keeps the operands as-is.
    fn partial_merge(&self, key: &[u8], operands: &[Vec<u8>]) -> Option<Vec<u8>> {
        let _ = (key, operands);
        None
    }
}

/// Where background components report errors the caller cannot observe
/// directly (compaction filter resolution failures, merge decode failures).
/// The engine escalates these to the administrator.
pub trait ErrorSink: Send + Sync {
    fn set_background_error(&self, error: Error);
}
