// Current-Pointer Storage Abstraction
//
// Defines the durability contract for the table's only mutable state: the
// pointer to the current metadata. Everything the pointer references is
// immutable, so a backend only has to provide an atomic compare-and-swap.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::metadata::{MetadataError, TableMetadata};
use crate::snapshot::SnapshotId;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("table already exists at {location}")]
    AlreadyExists { location: String },

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("metadata encoding error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("corrupt table state: {0}")]
    Corrupt(String),
}

impl From<MetadataError> for StoreError {
    fn from(e: MetadataError) -> Self {
        StoreError::Corrupt(e.to_string())
    }
}

/// Result of a compare-and-swap attempt that did not fail outright.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapOutcome {
    Swapped,
    /// Another writer moved the pointer first.
    Conflict { current: Option<SnapshotId> },
}

/// Storage backend for the current-metadata pointer.
///
/// Properties required from implementations:
/// - `compare_and_swap` is atomic with respect to every other writer
/// - a successful swap is durable before it returns
/// - readers observe either the old or the new metadata, never a mix
pub trait PointerStore: Send + Sync {
    /// Install the first metadata of a table. Fails if one already exists.
    fn create(&self, metadata: Arc<TableMetadata>) -> Result<(), StoreError>;

    /// Load the current metadata, or `None` if the table was never created.
    fn load(&self) -> Result<Option<Arc<TableMetadata>>, StoreError>;

    /// Replace the current metadata with `next` only if the current snapshot
    /// id still equals `expected`.
    fn compare_and_swap(
        &self,
        expected: Option<SnapshotId>,
        next: Arc<TableMetadata>,
    ) -> Result<SwapOutcome, StoreError>;
}

impl<S: PointerStore + ?Sized> PointerStore for Arc<S> {
    fn create(&self, metadata: Arc<TableMetadata>) -> Result<(), StoreError> {
        (**self).create(metadata)
    }

    fn load(&self) -> Result<Option<Arc<TableMetadata>>, StoreError> {
        (**self).load()
    }

    fn compare_and_swap(
        &self,
        expected: Option<SnapshotId>,
        next: Arc<TableMetadata>,
    ) -> Result<SwapOutcome, StoreError> {
        (**self).compare_and_swap(expected, next)
    }
}

/// Process-local pointer cell.
#[derive(Debug, Default)]
pub struct InMemoryPointerStore {
    current: Mutex<Option<Arc<TableMetadata>>>,
}

impl InMemoryPointerStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PointerStore for InMemoryPointerStore {
    fn create(&self, metadata: Arc<TableMetadata>) -> Result<(), StoreError> {
        let mut current = self.current.lock();
        if current.is_some() {
            return Err(StoreError::AlreadyExists {
                location: metadata.location().to_string(),
            });
        }
        *current = Some(metadata);
        Ok(())
    }

    fn load(&self) -> Result<Option<Arc<TableMetadata>>, StoreError> {
        Ok(self.current.lock().clone())
    }

    fn compare_and_swap(
        &self,
        expected: Option<SnapshotId>,
        next: Arc<TableMetadata>,
    ) -> Result<SwapOutcome, StoreError> {
        let mut current = self.current.lock();
        let observed = current
            .as_ref()
            .ok_or_else(|| StoreError::Corrupt("swap on a table that was never created".into()))?
            .current_snapshot_id();

        if observed != expected {
            return Ok(SwapOutcome::Conflict { current: observed });
        }

        *current = Some(next);
        Ok(SwapOutcome::Swapped)
    }
}
