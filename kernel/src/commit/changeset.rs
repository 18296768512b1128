// Changesets
//
// The set of writes a single commit proposes. A changeset is expressed
// against table identity (file paths, column ids) rather than a particular
// snapshot, so it can be re-validated on top of a newer base.

use serde::{Deserialize, Serialize};

use crate::manifest::DataFile;
use crate::schema::SchemaChange;
use crate::snapshot::Operation;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Changeset {
    /// Add new data files.
    Append { files: Vec<DataFile> },

    /// Replace live files with new ones in a single snapshot.
    Overwrite {
        remove: Vec<String>,
        add: Vec<DataFile>,
    },

    /// Remove live files.
    Delete { remove: Vec<String> },

    /// Publish a new schema version built from the current one.
    EvolveSchema { changes: Vec<SchemaChange> },
}

impl Changeset {
    pub fn append(files: Vec<DataFile>) -> Self {
        Changeset::Append { files }
    }

    pub fn evolve(change: SchemaChange) -> Self {
        Changeset::EvolveSchema {
            changes: vec![change],
        }
    }

    pub fn operation(&self) -> Operation {
        match self {
            Changeset::Append { .. } => Operation::Append,
            Changeset::Overwrite { .. } => Operation::Overwrite,
            Changeset::Delete { .. } => Operation::Delete,
            Changeset::EvolveSchema { .. } => Operation::SchemaChange,
        }
    }
}
