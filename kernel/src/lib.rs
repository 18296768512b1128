// Tidemark Kernel
//
// Snapshot-based table metadata: versioned schemas, immutable manifests,
// an append-only snapshot log, optimistic commits, and time travel.

pub mod schema;
pub mod manifest;
pub mod snapshot;
pub mod log;
pub mod metadata;
pub mod invariants;
pub mod commit;
pub mod travel;
pub mod table;

pub use commit::{Changeset, CommitConfig, CommitConflictError, CommitError, ValidationError};
pub use log::{FileSystemPointerStore, InMemoryPointerStore, NotFoundError, PointerStore};
pub use snapshot::SnapshotId;
pub use table::{Table, TableError};
pub use travel::{ReadView, SnapshotSelector};
