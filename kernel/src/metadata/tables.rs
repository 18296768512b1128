// Metadata Tables
//
// Row views over the snapshot log, shaped like the `history` and
// `snapshots` metadata tables query engines expose.

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::TableMetadata;
use crate::snapshot::{Operation, SnapshotId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HistoryEntry {
    pub made_current_at: DateTime<Utc>,
    pub snapshot_id: SnapshotId,
    pub parent_id: Option<SnapshotId>,
    pub operation: Operation,
    pub is_current_ancestor: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SnapshotEntry {
    pub committed_at: DateTime<Utc>,
    pub snapshot_id: SnapshotId,
    pub parent_id: Option<SnapshotId>,
    pub operation: Operation,
    pub manifest_list: String,
    pub summary: BTreeMap<String, String>,
}

pub(crate) fn history(metadata: &TableMetadata) -> impl Iterator<Item = HistoryEntry> + '_ {
    let current_lineage: HashSet<SnapshotId> = match metadata.current_snapshot_id() {
        Some(id) => metadata
            .snapshots()
            .ancestors_of(id)
            .map(|s| s.snapshot_id())
            .collect(),
        None => HashSet::new(),
    };

    metadata.snapshots().history().map(move |s| HistoryEntry {
        made_current_at: s.committed_at(),
        snapshot_id: s.snapshot_id(),
        parent_id: s.parent_snapshot_id(),
        operation: s.operation(),
        is_current_ancestor: current_lineage.contains(&s.snapshot_id()),
    })
}

pub(crate) fn snapshots(metadata: &TableMetadata) -> impl Iterator<Item = SnapshotEntry> + '_ {
    metadata.snapshots().history().map(|s| SnapshotEntry {
        committed_at: s.committed_at(),
        snapshot_id: s.snapshot_id(),
        parent_id: s.parent_snapshot_id(),
        operation: s.operation(),
        manifest_list: s.manifest_list().location().to_string(),
        summary: s.summary().clone(),
    })
}
