// Schema Registry
//
// Owns the append-only history of schema versions for one table and the
// column id counter. Publishing never touches an existing version: it
// derives a new one from a base and appends it.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::{
    Column, ColumnId, ColumnPosition, ColumnSpec, IncompatibleSchemaError, Schema, SchemaChange,
    SchemaId, INITIAL_SCHEMA_ID,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "RegistryFile", try_from = "RegistryFile")]
pub struct SchemaRegistry {
    latest: Arc<Schema>,
    /// Every version before `latest`, oldest first.
    previous: Vec<Arc<Schema>>,
    last_column_id: ColumnId,
}

/// On-disk shape of the registry.
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct RegistryFile {
    schemas: Vec<Arc<Schema>>,
    last_column_id: ColumnId,
}

impl From<SchemaRegistry> for RegistryFile {
    fn from(registry: SchemaRegistry) -> Self {
        let mut schemas = registry.previous;
        schemas.push(registry.latest);
        Self {
            schemas,
            last_column_id: registry.last_column_id,
        }
    }
}

impl TryFrom<RegistryFile> for SchemaRegistry {
    type Error = IncompatibleSchemaError;

    /// Re-checks every decoded version, so a registry read back from disk
    /// holds the same guarantees as one built through `create`/`evolve`.
    fn try_from(file: RegistryFile) -> Result<Self, Self::Error> {
        let mut previous = Vec::with_capacity(file.schemas.len());
        for schema in file.schemas {
            let checked = Schema::new(schema.schema_id(), schema.columns().to_vec())?;
            if let Some(prior) = previous.last().map(|s: &Arc<Schema>| s.schema_id()) {
                if checked.schema_id() <= prior {
                    return Err(IncompatibleSchemaError::VersionOutOfOrder {
                        id: checked.schema_id(),
                    });
                }
            }
            if checked.highest_column_id() > file.last_column_id {
                return Err(IncompatibleSchemaError::ColumnIdNotAssigned {
                    id: checked.highest_column_id(),
                    last: file.last_column_id,
                });
            }
            previous.push(Arc::new(checked));
        }

        let latest = previous.pop().ok_or(IncompatibleSchemaError::NoVersions)?;
        Ok(Self {
            latest,
            previous,
            last_column_id: file.last_column_id,
        })
    }
}

impl SchemaRegistry {
    /// Start a registry whose first version holds `columns`, numbered from 1.
    pub fn create(columns: Vec<ColumnSpec>) -> Result<Self, IncompatibleSchemaError> {
        let columns: Vec<Column> = columns
            .into_iter()
            .zip(1..)
            .map(|(spec, id)| Column {
                id,
                name: spec.name,
                data_type: spec.data_type,
                nullable: spec.nullable,
            })
            .collect();

        let schema = Schema::new(INITIAL_SCHEMA_ID, columns)?;
        let last_column_id = schema.highest_column_id();

        Ok(Self {
            latest: Arc::new(schema),
            previous: Vec::new(),
            last_column_id,
        })
    }

    /// Publish a single change on top of `base`.
    pub fn publish(
        &mut self,
        base: &Schema,
        change: &SchemaChange,
    ) -> Result<Arc<Schema>, IncompatibleSchemaError> {
        self.evolve(base, std::slice::from_ref(change))
    }

    /// Apply `changes` in order to `base` and publish the result as one new
    /// version. Nothing is appended if any change is rejected.
    pub fn evolve(
        &mut self,
        base: &Schema,
        changes: &[SchemaChange],
    ) -> Result<Arc<Schema>, IncompatibleSchemaError> {
        if self.by_id(base.schema_id()).is_none() {
            return Err(IncompatibleSchemaError::UnknownSchema {
                id: base.schema_id(),
            });
        }

        let mut columns = base.columns().to_vec();
        let mut last_column_id = self.last_column_id;

        for change in changes {
            self.apply(&mut columns, &mut last_column_id, change)?;
        }

        let schema = Arc::new(Schema::new(self.next_schema_id(), columns)?);
        let replaced = std::mem::replace(&mut self.latest, schema.clone());
        self.previous.push(replaced);
        self.last_column_id = last_column_id;

        Ok(schema)
    }

    fn apply(
        &self,
        columns: &mut Vec<Column>,
        last_column_id: &mut ColumnId,
        change: &SchemaChange,
    ) -> Result<(), IncompatibleSchemaError> {
        match change {
            SchemaChange::AddColumn {
                name,
                data_type,
                nullable,
                position,
            } => {
                if name.trim().is_empty() {
                    return Err(IncompatibleSchemaError::EmptyName);
                }
                if columns.iter().any(|c| &c.name == name) {
                    return Err(IncompatibleSchemaError::DuplicateName { name: name.clone() });
                }
                if !nullable {
                    return Err(IncompatibleSchemaError::RequiredColumnAdded { name: name.clone() });
                }

                let index = match position {
                    ColumnPosition::First => 0,
                    ColumnPosition::Last => columns.len(),
                    ColumnPosition::After(anchor) => {
                        let at = self.position_of(columns, *anchor, *last_column_id)?;
                        at + 1
                    }
                };

                *last_column_id += 1;
                columns.insert(
                    index,
                    Column {
                        id: *last_column_id,
                        name: name.clone(),
                        data_type: *data_type,
                        nullable: true,
                    },
                );
            }

            SchemaChange::DropColumn { id } => {
                let at = self.position_of(columns, *id, *last_column_id)?;
                if columns.len() == 1 {
                    return Err(IncompatibleSchemaError::EmptySchema);
                }
                columns.remove(at);
            }

            SchemaChange::RenameColumn { id, new_name } => {
                let at = self.position_of(columns, *id, *last_column_id)?;
                if new_name.trim().is_empty() {
                    return Err(IncompatibleSchemaError::EmptyName);
                }
                if columns
                    .iter()
                    .any(|c| c.id != *id && &c.name == new_name)
                {
                    return Err(IncompatibleSchemaError::DuplicateName {
                        name: new_name.clone(),
                    });
                }
                columns[at].name = new_name.clone();
            }

            SchemaChange::UpdateColumnType { id, data_type } => {
                let at = self.position_of(columns, *id, *last_column_id)?;
                let current = columns[at].data_type;
                if !current.can_promote_to(data_type) {
                    return Err(IncompatibleSchemaError::InvalidTypePromotion {
                        id: *id,
                        from: current,
                        to: *data_type,
                    });
                }
                columns[at].data_type = *data_type;
            }

            SchemaChange::MakeOptional { id } => {
                let at = self.position_of(columns, *id, *last_column_id)?;
                columns[at].nullable = true;
            }
        }

        Ok(())
    }

    /// Index of an active column, distinguishing retired ids from ids that
    /// were never assigned.
    fn position_of(
        &self,
        columns: &[Column],
        id: ColumnId,
        last_column_id: ColumnId,
    ) -> Result<usize, IncompatibleSchemaError> {
        match columns.iter().position(|c| c.id == id) {
            Some(at) => Ok(at),
            None if id >= 1 && id <= last_column_id => {
                Err(IncompatibleSchemaError::ColumnAlreadyDropped { id })
            }
            None => Err(IncompatibleSchemaError::UnknownColumn { id }),
        }
    }

    pub fn by_id(&self, id: SchemaId) -> Option<&Arc<Schema>> {
        self.versions().find(|s| s.schema_id() == id)
    }

    pub fn latest(&self) -> &Arc<Schema> {
        &self.latest
    }

    /// All versions, oldest first.
    pub fn versions(&self) -> impl Iterator<Item = &Arc<Schema>> {
        self.previous.iter().chain(std::iter::once(&self.latest))
    }

    pub fn last_column_id(&self) -> ColumnId {
        self.last_column_id
    }

    /// Whether a column id was assigned at some point but is not part of
    /// the latest version.
    pub fn is_retired(&self, id: ColumnId) -> bool {
        id >= 1 && id <= self.last_column_id && self.latest().column_by_id(id).is_none()
    }

    fn next_schema_id(&self) -> SchemaId {
        self.latest().schema_id() + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::DataType;

    fn employees() -> SchemaRegistry {
        SchemaRegistry::create(vec![
            ColumnSpec::new("id", DataType::Int, false),
            ColumnSpec::new("name", DataType::String, true),
            ColumnSpec::new("department", DataType::String, true),
            ColumnSpec::new("salary", DataType::Int, true),
            ColumnSpec::new("hire_date", DataType::Timestamp, true),
        ])
        .unwrap()
    }

    fn add(name: &str, position: ColumnPosition) -> SchemaChange {
        SchemaChange::AddColumn {
            name: name.into(),
            data_type: DataType::Int,
            nullable: true,
            position,
        }
    }

    #[test]
    fn create_assigns_sequential_ids() {
        let registry = employees();
        let schema = registry.latest();

        assert_eq!(schema.schema_id(), INITIAL_SCHEMA_ID);
        assert_eq!(registry.last_column_id(), 5);
        assert_eq!(schema.column_by_name("hire_date").unwrap().id, 5);
    }

    #[test]
    fn add_column_after_anchor() {
        let mut registry = employees();
        let base = registry.latest().clone();
        let salary = base.column_by_name("salary").unwrap().id;

        let v2 = registry
            .publish(&base, &add("bonus", ColumnPosition::After(salary)))
            .unwrap();

        assert_eq!(v2.schema_id(), 2);
        let names: Vec<_> = v2.column_names().collect();
        assert_eq!(
            names,
            vec!["id", "name", "department", "salary", "bonus", "hire_date"]
        );
        assert_eq!(v2.column_by_name("bonus").unwrap().id, 6);

        // The base version is untouched.
        assert_eq!(registry.by_id(1).unwrap().columns().len(), 5);
    }

    #[test]
    fn dropped_ids_are_never_reused() {
        let mut registry = employees();
        let v1 = registry.latest().clone();
        let v2 = registry
            .publish(&v1, &SchemaChange::DropColumn { id: 5 })
            .unwrap();
        let v3 = registry
            .publish(&v2, &add("hire_date", ColumnPosition::Last))
            .unwrap();

        assert!(v3.column_by_id(5).is_none());
        assert_eq!(v3.column_by_name("hire_date").unwrap().id, 6);
        assert!(registry.is_retired(5));
        assert!(registry.by_id(1).unwrap().column_by_id(5).is_some());
    }

    #[test]
    fn drop_distinguishes_retired_and_unknown_ids() {
        let mut registry = employees();
        let v1 = registry.latest().clone();
        let v2 = registry
            .publish(&v1, &SchemaChange::DropColumn { id: 3 })
            .unwrap();

        let err = registry
            .publish(&v2, &SchemaChange::DropColumn { id: 3 })
            .unwrap_err();
        assert_eq!(err, IncompatibleSchemaError::ColumnAlreadyDropped { id: 3 });

        let err = registry
            .publish(&v2, &SchemaChange::DropColumn { id: 42 })
            .unwrap_err();
        assert_eq!(err, IncompatibleSchemaError::UnknownColumn { id: 42 });
    }

    #[test]
    fn rename_collision_is_rejected() {
        let mut registry = employees();
        let v1 = registry.latest().clone();

        let err = registry
            .publish(
                &v1,
                &SchemaChange::RenameColumn {
                    id: 2,
                    new_name: "department".into(),
                },
            )
            .unwrap_err();

        assert!(matches!(err, IncompatibleSchemaError::DuplicateName { .. }));
        assert_eq!(registry.versions().count(), 1);
    }

    #[test]
    fn rename_to_same_name_is_allowed() {
        let mut registry = employees();
        let v1 = registry.latest().clone();

        let v2 = registry
            .publish(
                &v1,
                &SchemaChange::RenameColumn {
                    id: 2,
                    new_name: "name".into(),
                },
            )
            .unwrap();

        assert_eq!(v2.column_by_id(2).unwrap().name, "name");
    }

    #[test]
    fn required_column_cannot_be_added() {
        let mut registry = employees();
        let v1 = registry.latest().clone();

        let err = registry
            .publish(
                &v1,
                &SchemaChange::AddColumn {
                    name: "bonus".into(),
                    data_type: DataType::Int,
                    nullable: false,
                    position: ColumnPosition::Last,
                },
            )
            .unwrap_err();

        assert!(matches!(
            err,
            IncompatibleSchemaError::RequiredColumnAdded { .. }
        ));
    }

    #[test]
    fn batch_evolution_is_all_or_nothing() {
        let mut registry = employees();
        let v1 = registry.latest().clone();

        let err = registry
            .evolve(
                &v1,
                &[
                    add("bonus", ColumnPosition::First),
                    SchemaChange::UpdateColumnType {
                        id: 2,
                        data_type: DataType::Long,
                    },
                ],
            )
            .unwrap_err();

        assert!(matches!(
            err,
            IncompatibleSchemaError::InvalidTypePromotion { id: 2, .. }
        ));
        assert_eq!(registry.versions().count(), 1);
        assert_eq!(registry.last_column_id(), 5);
    }

    #[test]
    fn type_promotion_and_make_optional() {
        let mut registry = employees();
        let v1 = registry.latest().clone();

        let v2 = registry
            .evolve(
                &v1,
                &[
                    SchemaChange::UpdateColumnType {
                        id: 4,
                        data_type: DataType::Long,
                    },
                    SchemaChange::MakeOptional { id: 1 },
                ],
            )
            .unwrap();

        assert_eq!(v2.column_by_id(4).unwrap().data_type, DataType::Long);
        assert!(v2.column_by_id(1).unwrap().nullable);
        assert!(!v1.column_by_id(1).unwrap().nullable);
    }

    #[test]
    fn cannot_drop_last_column() {
        let mut registry =
            SchemaRegistry::create(vec![ColumnSpec::new("id", DataType::Long, false)]).unwrap();
        let v1 = registry.latest().clone();

        let err = registry
            .publish(&v1, &SchemaChange::DropColumn { id: 1 })
            .unwrap_err();
        assert_eq!(err, IncompatibleSchemaError::EmptySchema);
    }

    #[test]
    fn decoding_keeps_version_order() {
        let mut registry = employees();
        let v1 = registry.latest().clone();
        registry
            .publish(&v1, &SchemaChange::DropColumn { id: 3 })
            .unwrap();

        let json = serde_json::to_value(&registry).unwrap();
        assert_eq!(json["schemas"].as_array().unwrap().len(), 2);
        assert_eq!(json["last-column-id"], 5);

        let decoded: SchemaRegistry = serde_json::from_value(json).unwrap();
        assert_eq!(decoded, registry);
        assert_eq!(decoded.latest().schema_id(), 2);
    }

    #[test]
    fn decoding_rejects_broken_histories() {
        let empty = serde_json::json!({ "schemas": [], "last-column-id": 0 });
        let err = serde_json::from_value::<SchemaRegistry>(empty).unwrap_err();
        assert!(err.to_string().contains("no versions"));

        let v1 = serde_json::to_value(employees().latest()).unwrap();
        let repeated = serde_json::json!({ "schemas": [v1.clone(), v1], "last-column-id": 5 });
        let err = serde_json::from_value::<SchemaRegistry>(repeated).unwrap_err();
        assert!(err.to_string().contains("out of order"));

        let no_columns = serde_json::json!({
            "schemas": [{ "schema-id": 1, "columns": [] }],
            "last-column-id": 0,
        });
        assert!(serde_json::from_value::<SchemaRegistry>(no_columns).is_err());

        let unassigned = serde_json::json!({
            "schemas": [serde_json::to_value(employees().latest()).unwrap()],
            "last-column-id": 2,
        });
        let err = serde_json::from_value::<SchemaRegistry>(unassigned).unwrap_err();
        assert!(err.to_string().contains("last assigned id"));
    }
}
