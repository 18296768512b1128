// Table
//
// The public surface of one table: `commit` is the only write entry point,
// `read` the only read entry point, and `history`/`snapshots` expose the
// metadata tables. A Table holds no metadata of its own; every call loads
// whatever the pointer store currently publishes.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::info;

use crate::commit::{
    Changeset, Clock, CommitConfig, CommitCoordinator, CommitError, CommitReport, ConfigError,
    SystemClock,
};
use crate::log::{NotFoundError, PointerStore, StoreError};
use crate::metadata::{HistoryEntry, SnapshotEntry, TableMetadata};
use crate::schema::{ColumnSpec, IncompatibleSchemaError, Schema};
use crate::snapshot::SnapshotId;
use crate::travel::{ReadView, SnapshotSelector, TimeTravelResolver};

#[derive(Debug, thiserror::Error)]
pub enum TableError {
    #[error(transparent)]
    Commit(#[from] CommitError),

    #[error(transparent)]
    NotFound(#[from] NotFoundError),

    #[error("pointer store error: {0}")]
    Store(#[from] StoreError),

    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("invalid table schema: {0}")]
    Schema(#[from] IncompatibleSchemaError),
}

pub struct Table<S> {
    coordinator: CommitCoordinator<S>,
}

impl<S: PointerStore> Table<S> {
    /// Create a table with schema v1 and no snapshot.
    pub fn create(
        store: S,
        location: impl Into<String>,
        columns: Vec<ColumnSpec>,
        properties: BTreeMap<String, String>,
    ) -> Result<Self, TableError> {
        Self::create_with_clock(store, location, columns, properties, Arc::new(SystemClock))
    }

    pub fn create_with_clock(
        store: S,
        location: impl Into<String>,
        columns: Vec<ColumnSpec>,
        properties: BTreeMap<String, String>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, TableError> {
        let config = CommitConfig::from_properties(&properties)?;
        let metadata = TableMetadata::new(location, columns, properties, clock.now())?;
        let uuid = metadata.table_uuid();
        let location = metadata.location().to_string();

        store.create(Arc::new(metadata))?;
        info!(%uuid, %location, "created table");

        Ok(Self {
            coordinator: CommitCoordinator::new(store)
                .with_clock(clock)
                .with_config(config),
        })
    }

    /// Open an existing table. The retry bound comes from the table
    /// properties unless overridden with [`Table::with_config`].
    pub fn open(store: S) -> Result<Self, TableError> {
        let metadata = store.load()?.ok_or(NotFoundError::Table)?;
        let config = CommitConfig::from_properties(metadata.properties())?;

        Ok(Self {
            coordinator: CommitCoordinator::new(store).with_config(config),
        })
    }

    pub fn with_clock(self, clock: Arc<dyn Clock>) -> Self {
        Self {
            coordinator: self.coordinator.with_clock(clock),
        }
    }

    pub fn with_config(self, config: CommitConfig) -> Self {
        Self {
            coordinator: self.coordinator.with_config(config),
        }
    }

    pub fn config(&self) -> CommitConfig {
        self.coordinator.config()
    }

    pub fn store(&self) -> &S {
        self.coordinator.store()
    }

    pub fn commit(
        &self,
        base: Option<SnapshotId>,
        changeset: Changeset,
    ) -> Result<SnapshotId, CommitError> {
        self.coordinator.commit(base, changeset)
    }

    pub fn commit_with_report(
        &self,
        base: Option<SnapshotId>,
        changeset: &Changeset,
    ) -> Result<CommitReport, CommitError> {
        self.coordinator.commit_with_report(base, changeset)
    }

    pub fn metadata(&self) -> Result<Arc<TableMetadata>, TableError> {
        Ok(self.coordinator.store().load()?.ok_or(NotFoundError::Table)?)
    }

    pub fn current_snapshot_id(&self) -> Result<Option<SnapshotId>, TableError> {
        Ok(self.metadata()?.current_snapshot_id())
    }

    pub fn schema(&self) -> Result<Arc<Schema>, TableError> {
        Ok(self.metadata()?.current_schema().clone())
    }

    pub fn read(&self, selector: SnapshotSelector) -> Result<ReadView, TableError> {
        let metadata = self.metadata()?;
        Ok(TimeTravelResolver::new(&metadata).resolve(selector)?)
    }

    /// Rows of the `history` metadata table, oldest first.
    pub fn history(&self) -> Result<Vec<HistoryEntry>, TableError> {
        Ok(self.metadata()?.history().collect())
    }

    /// Rows of the `snapshots` metadata table, oldest first.
    pub fn snapshots(&self) -> Result<Vec<SnapshotEntry>, TableError> {
        Ok(self.metadata()?.snapshot_entries().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commit::ManualClock;
    use crate::log::{FileSystemPointerStore, InMemoryPointerStore};
    use crate::manifest::DataFile;
    use crate::schema::{ColumnPosition, DataType, SchemaChange};
    use crate::snapshot::Operation;
    use chrono::{DateTime, Duration, TimeZone, Utc};

    fn t(minute: u32, second: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 9, minute, second).unwrap()
    }

    fn columns() -> Vec<ColumnSpec> {
        vec![
            ColumnSpec::new("id", DataType::Int, false),
            ColumnSpec::new("name", DataType::String, true),
        ]
    }

    fn table_at(
        clock: &Arc<ManualClock>,
    ) -> Table<InMemoryPointerStore> {
        Table::create_with_clock(
            InMemoryPointerStore::new(),
            "mem://employees",
            columns(),
            BTreeMap::new(),
            clock.clone(),
        )
        .unwrap()
    }

    fn add_bonus() -> Changeset {
        Changeset::evolve(SchemaChange::AddColumn {
            name: "bonus".into(),
            data_type: DataType::Int,
            nullable: true,
            position: ColumnPosition::Last,
        })
    }

    #[test]
    fn time_travel_across_schema_change() {
        let clock = Arc::new(ManualClock::new(t(0, 0)));
        let table = table_at(&clock);

        clock.set(t(1, 0));
        let s1 = table
            .commit(None, Changeset::append(vec![DataFile::new("a.parquet", 3, 900)]))
            .unwrap();
        clock.set(t(2, 0));
        let s2 = table.commit(Some(s1), add_bonus()).unwrap();

        let at_1_5 = table.read(SnapshotSelector::AsOf(t(1, 30))).unwrap();
        assert_eq!(at_1_5.snapshot_id(), Some(s1));
        assert_eq!(
            at_1_5.schema().column_names().collect::<Vec<_>>(),
            vec!["id", "name"]
        );

        let at_2_5 = table.read(SnapshotSelector::AsOf(t(2, 30))).unwrap();
        assert_eq!(at_2_5.snapshot_id(), Some(s2));
        assert_eq!(
            at_2_5.schema().column_names().collect::<Vec<_>>(),
            vec!["id", "name", "bonus"]
        );
    }

    #[test]
    fn read_by_id_round_trips_the_committed_list() {
        let clock = Arc::new(ManualClock::new(t(0, 0)));
        let table = table_at(&clock);

        let s1 = table
            .commit(None, Changeset::append(vec![DataFile::new("a.parquet", 3, 900)]))
            .unwrap();
        let committed = table.metadata().unwrap().current_snapshot().unwrap().clone();

        let s2 = table
            .commit(Some(s1), Changeset::append(vec![DataFile::new("b.parquet", 1, 300)]))
            .unwrap();
        assert_ne!(s1, s2);

        let view = table.read(SnapshotSelector::ById(s1)).unwrap();
        assert!(Arc::ptr_eq(view.manifest_list(), committed.manifest_list()));
        assert_eq!(view.manifest_list().total_records(), 3);
    }

    #[test]
    fn dropped_column_still_resolves_in_old_snapshot() {
        let clock = Arc::new(ManualClock::new(t(0, 0)));
        let table = table_at(&clock);

        clock.set(t(1, 0));
        let s1 = table
            .commit(None, Changeset::append(vec![DataFile::new("a.parquet", 3, 900)]))
            .unwrap();
        clock.set(t(2, 0));
        table
            .commit(Some(s1), Changeset::evolve(SchemaChange::DropColumn { id: 2 }))
            .unwrap();

        assert!(table.schema().unwrap().column_by_id(2).is_none());

        let old = table.read(SnapshotSelector::AsOf(t(1, 59))).unwrap();
        assert_eq!(old.schema().column_by_id(2).unwrap().name, "name");
        assert_eq!(old.files().count(), 1);
    }

    #[test]
    fn history_is_a_single_chain() {
        let clock = Arc::new(ManualClock::new(t(0, 0)));
        let table = table_at(&clock);

        let mut base = None;
        for i in 0..4 {
            clock.advance(Duration::seconds(10));
            let id = table
                .commit(
                    base,
                    Changeset::append(vec![DataFile::new(format!("part-{i}.parquet"), 1, 10)]),
                )
                .unwrap();
            base = Some(id);
        }

        let history = table.history().unwrap();
        assert_eq!(history.len(), 4);
        assert!(history[0].parent_id.is_none());
        for pair in history.windows(2) {
            assert_eq!(pair[1].parent_id, Some(pair[0].snapshot_id));
            assert!(pair[1].made_current_at >= pair[0].made_current_at);
        }
        assert!(history.iter().all(|h| h.is_current_ancestor));
        assert!(history.iter().all(|h| h.operation == Operation::Append));

        let snapshots = table.snapshots().unwrap();
        assert_eq!(snapshots[3].summary["total-data-files"], "4");
    }

    #[test]
    fn partition_values_survive_commit_and_reopen() {
        let dir = tempfile::TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::new(t(0, 0)));
        let table = Table::create_with_clock(
            FileSystemPointerStore::new(dir.path()),
            "file://events",
            columns(),
            BTreeMap::new(),
            clock.clone(),
        )
        .unwrap();

        clock.set(t(1, 0));
        let s1 = table
            .commit(
                None,
                Changeset::append(vec![
                    DataFile::new("day=01/a.parquet", 4, 400).with_partition("day", "2025-06-01"),
                    DataFile::new("day=02/b.parquet", 6, 600).with_partition("day", "2025-06-02"),
                ]),
            )
            .unwrap();
        clock.set(t(2, 0));
        table
            .commit(
                Some(s1),
                Changeset::append(vec![DataFile::new("day=03/c.parquet", 1, 100)
                    .with_partition("day", "2025-06-03")
                    .with_partition("region", "eu")]),
            )
            .unwrap();

        let reopened = Table::open(FileSystemPointerStore::new(dir.path())).unwrap();
        let partitions = |view: &ReadView| -> Vec<BTreeMap<String, String>> {
            let mut found: Vec<_> = view.files().map(|f| f.partition.clone()).collect();
            found.sort();
            found
        };

        let by_id = reopened.read(SnapshotSelector::ById(s1)).unwrap();
        let days: Vec<_> = partitions(&by_id)
            .into_iter()
            .map(|p| p["day"].clone())
            .collect();
        assert_eq!(days, vec!["2025-06-01", "2025-06-02"]);

        let latest = reopened.read(SnapshotSelector::AsOf(t(2, 30))).unwrap();
        let found = partitions(&latest);
        assert_eq!(found.len(), 3);
        assert_eq!(found[2]["day"], "2025-06-03");
        assert_eq!(found[2]["region"], "eu");

        let earlier = reopened.read(SnapshotSelector::AsOf(t(1, 30))).unwrap();
        assert_eq!(partitions(&earlier), partitions(&by_id));
    }

    #[test]
    fn create_twice_fails() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = FileSystemPointerStore::new(dir.path());
        Table::create(store, "file://employees", columns(), BTreeMap::new()).unwrap();

        let err = Table::create(
            FileSystemPointerStore::new(dir.path()),
            "file://employees",
            columns(),
            BTreeMap::new(),
        )
        .err()
        .unwrap();
        assert!(matches!(
            err,
            TableError::Store(StoreError::AlreadyExists { .. })
        ));
    }

    #[test]
    fn reopen_from_disk_sees_commits() {
        let dir = tempfile::TempDir::new().unwrap();
        let table = Table::create(
            FileSystemPointerStore::new(dir.path()),
            "file://employees",
            columns(),
            BTreeMap::new(),
        )
        .unwrap();
        let s1 = table
            .commit(None, Changeset::append(vec![DataFile::new("a.parquet", 2, 100)]))
            .unwrap();

        let reopened = Table::open(FileSystemPointerStore::new(dir.path())).unwrap();
        assert_eq!(reopened.current_snapshot_id().unwrap(), Some(s1));
        let view = reopened.read(SnapshotSelector::Current).unwrap();
        assert_eq!(view.manifest_list().total_records(), 2);
    }

    #[test]
    fn open_missing_table_is_not_found() {
        let err = Table::open(InMemoryPointerStore::new()).err().unwrap();
        assert!(matches!(err, TableError::NotFound(NotFoundError::Table)));
    }

    #[test]
    fn retry_bound_comes_from_properties() {
        let mut properties = BTreeMap::new();
        properties.insert(
            crate::commit::config::RETRY_PROPERTY.to_string(),
            "1".to_string(),
        );
        let table = Table::create(
            InMemoryPointerStore::new(),
            "mem://t",
            columns(),
            properties,
        )
        .unwrap();
        assert_eq!(table.config().max_retries, 1);

        let table = table.with_config(CommitConfig::default_config());
        assert_eq!(table.config().max_retries, 4);
    }

    #[test]
    fn invalid_schema_is_rejected_at_create() {
        let err = Table::create(
            InMemoryPointerStore::new(),
            "mem://t",
            vec![],
            BTreeMap::new(),
        )
        .err()
        .unwrap();
        assert!(matches!(
            err,
            TableError::Schema(IncompatibleSchemaError::EmptySchema)
        ));
    }
}
