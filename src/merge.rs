//! Reconciles GC rewrites with concurrent foreground writes.
//!
//! A GC rewrite relocates a record and emits a merge operand carrying both
//! the new location and the location it replaced. Between the rewrite
//! reading the old record and the engine applying the operand, a foreground
//! writer may have overwritten the key. The merge operator is the single
//! point where that race resolves, and it always resolves in favor of the
//! foreground write:
//!
//! - base is an inline value: the base wins, operands are dropped
//! - base is a blob index: an operand applies only if its source names the
//!   base's exact location (same file, same offset); afterwards further
//!   operands chain by naming the previously accepted destination
//! - no base, or the base is the deletion marker: the key is deleted; emit
//!   the deletion marker
//!
//! Operands whose source matches nothing rewrote an older version that has
//! since been superseded, and are discarded.

use crate::blobfile::{BlobIndex, MergeBlobIndex};
use crate::engine::{MergeInput, MergeOperator, MergeOutput, MergeValue, ValueType};

pub struct BlobIndexMergeOperator;

impl MergeOperator for BlobIndexMergeOperator {
    fn name(&self) -> &str {
        "blob-index-merge-operator"
    }

    fn full_merge(&self, input: MergeInput) -> Option<MergeOutput> {
        // A foreground put of an inline value supersedes every pending GC
        // operand for this key.
        if let Some((ValueType::Value, _)) = input.existing {
            return Some(MergeOutput {
                value_type: ValueType::Value,
                value: MergeValue::Existing,
            });
        }

        let mut existing_index = BlobIndex::default();
        let mut existing_valid = false;
        if let Some((_, value)) = input.existing {
            existing_index = BlobIndex::decode(value).ok()?;
            existing_valid = !existing_index.is_deletion_marker();
        }
        if !existing_valid {
            // The key is deleted at the blob layer; operands rewrite
            // versions that no longer matter.
            return Some(MergeOutput {
                value_type: ValueType::BlobIndex,
                value: MergeValue::New(BlobIndex::deletion_marker().encode()),
            });
        }

        let mut merge_index = BlobIndex::default();
        for operand in input.operands {
            let index = MergeBlobIndex::decode(operand).ok()?;
            if existing_valid {
                // An operand sourced from the base's location proves the
                // base was rewritten; adopt the rewrite destination.
                if index.source_file_number == existing_index.file_number
                    && index.source_file_offset == existing_index.blob_handle.offset
                {
                    existing_valid = false;
                    merge_index = index.blob_index;
                }
            } else if index.source_file_number == merge_index.file_number
                && index.source_file_offset == merge_index.blob_handle.offset
            {
                // A later rewrite of the already-accepted rewrite.
                merge_index = index.blob_index;
            }
        }

        if existing_valid {
            Some(MergeOutput {
                value_type: ValueType::BlobIndex,
                value: MergeValue::Existing,
            })
        } else {
            Some(MergeOutput {
                value_type: ValueType::BlobIndex,
                value: MergeValue::New(merge_index.encode()),
            })
        }
    }

    // Operands cannot be collapsed without seeing the base value.
}
