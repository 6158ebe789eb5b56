//! Blob-aware compaction filtering.
//!
//! User filters see logical values. For entries whose value is a blob
//! index, the adapter resolves the record behind it, presents the payload
//! as an inline value, and enforces one invariant on the way back: a
//! blob-index entry must never be rewritten as an inline value by the
//! filter, because the entry's value type stays blob-index.
//!
//! Every resolution failure degrades to keeping the entry: a stale index
//! will be dropped by a later compaction once nothing references the file,
//! and keeping is always safe.

use std::sync::Arc;

use crate::blobfile::BlobIndex;
use crate::engine::{
    CompactionContext, CompactionFilter, CompactionFilterFactory, Decision, ErrorSink, ValueType,
};
use crate::error::Error;
use crate::storage::{BlobStorage, StorageProvider};

/// The wrapped user filter: shared when the factory was configured with a
/// single filter instance, owned when minted per-compaction by the user's
/// own factory.
enum FilterHandle {
    Shared(Arc<dyn CompactionFilter>),
    Owned(Box<dyn CompactionFilter>),
}

impl FilterHandle {
    fn get(&self) -> &dyn CompactionFilter {
        match self {
            FilterHandle::Shared(filter) => filter.as_ref(),
            FilterHandle::Owned(filter) => filter.as_ref(),
        }
    }
}

pub struct BlobIndexFilter {
    name: String,
    inner: FilterHandle,
    /// Absent when the column family has no blob storage; every blob-index
    /// entry is then kept untouched.
    storage: Option<Arc<BlobStorage>>,
    error_sink: Arc<dyn ErrorSink>,
}

impl BlobIndexFilter {
    fn new(
        inner: FilterHandle,
        storage: Option<Arc<BlobStorage>>,
        error_sink: Arc<dyn ErrorSink>,
    ) -> Self {
        let name = format!("blob-index-filter.{}", inner.get().name());
        Self {
            name,
            inner,
            storage,
            error_sink,
        }
    }
}

impl CompactionFilter for BlobIndexFilter {
    fn name(&self) -> &str {
        &self.name
    }

    fn filter(&self, level: usize, key: &[u8], value_type: ValueType, value: &[u8]) -> Decision {
        if value_type != ValueType::BlobIndex {
            return self.inner.get().filter(level, key, value_type, value);
        }

        let index = match BlobIndex::decode(value) {
            Ok(index) => index,
            Err(error) => {
                self.error_sink.set_background_error(error);
                return Decision::Keep;
            }
        };
        if index.is_deletion_marker() {
            return Decision::Keep;
        }

        let storage = match &self.storage {
            Some(storage) => storage,
            None => return Decision::Keep,
        };

        let record = match storage.get(&index) {
            Ok(record) => record,
            Err(Error::Corruption(_)) => {
                // A stale or dangling index; keep the entry rather than
                // guess.
                return Decision::Keep;
            }
            Err(error) => {
                self.error_sink.set_background_error(error);
                return Decision::Keep;
            }
        };

        let decision = self
            .inner
            .get()
            .filter(level, key, ValueType::Value, &record.value);
        if matches!(decision, Decision::ChangeValue(_)) {
            tracing::warn!(
                key = %crate::encoding::format::bytes(key),
                "compaction filter attempted to change the value of a blob-index entry"
            );
            self.error_sink.set_background_error(Error::NotSupported(
                "compaction filter must not change the value of a blob-index entry".to_string(),
            ));
            return Decision::Keep;
        }
        decision
    }
}

/// The user's filtering configuration: a single shared filter, or a factory
/// minting one per compaction.
pub enum UserFilter {
    Shared(Arc<dyn CompactionFilter>),
    Factory(Arc<dyn CompactionFilterFactory>),
}

pub struct BlobIndexFilterFactory {
    name: String,
    user_filter: UserFilter,
    provider: Arc<dyn StorageProvider>,
    error_sink: Arc<dyn ErrorSink>,
}

impl BlobIndexFilterFactory {
    pub fn new(
        user_filter: UserFilter,
        provider: Arc<dyn StorageProvider>,
        error_sink: Arc<dyn ErrorSink>,
    ) -> Self {
        let name = match &user_filter {
            UserFilter::Shared(filter) => format!("blob-index-filter-factory.{}", filter.name()),
            UserFilter::Factory(factory) => format!("blob-index-filter-factory.{}", factory.name()),
        };
        Self {
            name,
            user_filter,
            provider,
            error_sink,
        }
    }
}

impl CompactionFilterFactory for BlobIndexFilterFactory {
    fn name(&self) -> &str {
        &self.name
    }

    fn create(&self, context: &CompactionContext) -> Box<dyn CompactionFilter> {
        let storage = self.provider.blob_storage(context.column_family_id);
        let inner = match &self.user_filter {
            UserFilter::Shared(filter) => FilterHandle::Shared(filter.clone()),
            UserFilter::Factory(factory) => FilterHandle::Owned(factory.create(context)),
        };
        Box::new(BlobIndexFilter::new(inner, storage, self.error_sink.clone()))
    }
}
