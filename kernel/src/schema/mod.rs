// Versioned Table Schemas
//
// A schema is an ordered list of typed columns, each carrying a column id
// that is assigned once and never reused. Schemas are immutable once
// published; evolution always produces a new version (see `registry`).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub mod registry;

pub use registry::SchemaRegistry;

/// Identifier of a published schema version.
pub type SchemaId = u32;

/// Identifier of a column. Unique across the whole life of a table.
pub type ColumnId = u32;

/// Schema id assigned to the schema a table is created with.
pub const INITIAL_SCHEMA_ID: SchemaId = 1;

/// Primitive column types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    Boolean,
    Int,
    Long,
    Float,
    Double,
    Date,
    Timestamp,
    String,
    Binary,
    Decimal { precision: u8, scale: u8 },
}

impl DataType {
    /// Whether values of `self` can be read as `target` without rewriting
    /// any data file.
    pub fn can_promote_to(&self, target: &DataType) -> bool {
        use DataType::*;

        match (self, target) {
            (a, b) if a == b => true,
            (Int, Long) | (Float, Double) => true,
            (
                Decimal { precision, scale },
                Decimal {
                    precision: target_precision,
                    scale: target_scale,
                },
            ) => scale == target_scale && target_precision >= precision,
            _ => false,
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataType::Boolean => f.write_str("boolean"),
            DataType::Int => f.write_str("int"),
            DataType::Long => f.write_str("long"),
            DataType::Float => f.write_str("float"),
            DataType::Double => f.write_str("double"),
            DataType::Date => f.write_str("date"),
            DataType::Timestamp => f.write_str("timestamp"),
            DataType::String => f.write_str("string"),
            DataType::Binary => f.write_str("binary"),
            DataType::Decimal { precision, scale } => write!(f, "decimal({precision},{scale})"),
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("unknown data type `{0}`")]
pub struct ParseDataTypeError(pub String);

impl FromStr for DataType {
    type Err = ParseDataTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        let parsed = match normalized.as_str() {
            "boolean" | "bool" => DataType::Boolean,
            "int" | "integer" => DataType::Int,
            "long" | "bigint" => DataType::Long,
            "float" => DataType::Float,
            "double" => DataType::Double,
            "date" => DataType::Date,
            "timestamp" => DataType::Timestamp,
            "string" => DataType::String,
            "binary" => DataType::Binary,
            other => {
                let args = other
                    .strip_prefix("decimal(")
                    .and_then(|rest| rest.strip_suffix(')'))
                    .ok_or_else(|| ParseDataTypeError(s.to_string()))?;
                let (precision, scale) = args
                    .split_once(',')
                    .ok_or_else(|| ParseDataTypeError(s.to_string()))?;
                DataType::Decimal {
                    precision: precision
                        .trim()
                        .parse()
                        .map_err(|_| ParseDataTypeError(s.to_string()))?,
                    scale: scale
                        .trim()
                        .parse()
                        .map_err(|_| ParseDataTypeError(s.to_string()))?,
                }
            }
        };
        Ok(parsed)
    }
}

/// A single column of a published schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub id: ColumnId,
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: DataType,
    #[serde(default)]
    pub nullable: bool,
}

/// A column definition before an id has been assigned to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: DataType,
    #[serde(default = "default_nullable")]
    pub nullable: bool,
}

fn default_nullable() -> bool {
    true
}

impl ColumnSpec {
    pub fn new(name: impl Into<String>, data_type: DataType, nullable: bool) -> Self {
        Self {
            name: name.into(),
            data_type,
            nullable,
        }
    }
}

/// Where a new column is placed in the column order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ColumnPosition {
    First,
    After(ColumnId),
    #[default]
    Last,
}

/// One schema evolution step. Columns are addressed by id so that a change
/// stays meaningful when it is re-applied on top of a newer schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SchemaChange {
    AddColumn {
        name: String,
        data_type: DataType,
        nullable: bool,
        #[serde(default)]
        position: ColumnPosition,
    },
    DropColumn {
        id: ColumnId,
    },
    RenameColumn {
        id: ColumnId,
        new_name: String,
    },
    UpdateColumnType {
        id: ColumnId,
        data_type: DataType,
    },
    MakeOptional {
        id: ColumnId,
    },
}

/// Schema evolution rule violations.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum IncompatibleSchemaError {
    #[error("column name `{name}` is already in use")]
    DuplicateName { name: String },

    #[error("column id {id} appears more than once")]
    DuplicateColumnId { id: ColumnId },

    #[error("column name must not be empty")]
    EmptyName,

    #[error("column id {id} does not exist")]
    UnknownColumn { id: ColumnId },

    #[error("column id {id} has already been dropped")]
    ColumnAlreadyDropped { id: ColumnId },

    #[error("cannot add required column `{name}`: existing data has no value for it")]
    RequiredColumnAdded { name: String },

    #[error("cannot change column {id} from {from} to {to}")]
    InvalidTypePromotion {
        id: ColumnId,
        from: DataType,
        to: DataType,
    },

    #[error("a schema must keep at least one column")]
    EmptySchema,

    #[error("schema version {id} does not exist")]
    UnknownSchema { id: SchemaId },

    #[error("schema history has no versions")]
    NoVersions,

    #[error("schema version {id} is out of order")]
    VersionOutOfOrder { id: SchemaId },

    #[error("column id {id} is above the last assigned id {last}")]
    ColumnIdNotAssigned { id: ColumnId, last: ColumnId },
}

/// An immutable, published schema version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Schema {
    schema_id: SchemaId,
    columns: Vec<Column>,
}

impl Schema {
    /// Build a schema, checking that names and ids are unique.
    pub fn new(schema_id: SchemaId, columns: Vec<Column>) -> Result<Self, IncompatibleSchemaError> {
        if columns.is_empty() {
            return Err(IncompatibleSchemaError::EmptySchema);
        }

        for (idx, column) in columns.iter().enumerate() {
            if column.name.trim().is_empty() {
                return Err(IncompatibleSchemaError::EmptyName);
            }
            let earlier = &columns[..idx];
            if earlier.iter().any(|c| c.id == column.id) {
                return Err(IncompatibleSchemaError::DuplicateColumnId { id: column.id });
            }
            if earlier.iter().any(|c| c.name == column.name) {
                return Err(IncompatibleSchemaError::DuplicateName {
                    name: column.name.clone(),
                });
            }
        }

        Ok(Self { schema_id, columns })
    }

    pub fn schema_id(&self) -> SchemaId {
        self.schema_id
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column_by_id(&self, id: ColumnId) -> Option<&Column> {
        self.columns.iter().find(|c| c.id == id)
    }

    pub fn column_by_name(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }

    pub fn highest_column_id(&self) -> ColumnId {
        self.columns.iter().map(|c| c.id).max().unwrap_or(0)
    }
}
