use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use tracing::Level;

use tidemark_kernel::commit::{Changeset, CommitConfig, CommitReport};
use tidemark_kernel::manifest::DataFile;
use tidemark_kernel::schema::{ColumnId, ColumnPosition, ColumnSpec, DataType, Schema, SchemaChange};
use tidemark_kernel::snapshot::{Operation, SnapshotId};
use tidemark_kernel::{FileSystemPointerStore, ReadView, SnapshotSelector, Table};

mod demo;

/// Tidemark table CLI
#[derive(Parser, Debug)]
#[command(name = "tidemark")]
#[command(about = "Snapshot-based table metadata: commits, schema evolution, time travel", long_about = None)]
struct Cli {
    /// Table directory (holds `metadata/`)
    #[arg(long, global = true, default_value = ".")]
    table: PathBuf,

    /// Path to commit config JSON
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log at DEBUG instead of INFO
    #[arg(long, short, global = true, default_value_t = false)]
    verbose: bool,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Create a table with an initial schema and no snapshot
    Create {
        /// Column as `name:type` or `name:type:required`; repeatable
        #[arg(long = "column", required = true, value_parser = parse_column)]
        columns: Vec<ColumnSpec>,

        /// Table property as `key=value`; repeatable
        #[arg(long = "property", value_parser = parse_property)]
        properties: Vec<(String, String)>,
    },

    /// Commit new data files
    Append {
        #[command(flatten)]
        base: BaseArg,

        /// Data file as `path:records[:bytes][,key=value...]`; repeatable
        #[arg(long = "file", required = true, value_parser = parse_data_file)]
        files: Vec<DataFile>,
    },

    /// Replace live data files with new ones
    Overwrite {
        #[command(flatten)]
        base: BaseArg,

        /// Path of a live data file to remove; repeatable
        #[arg(long = "remove", required = true)]
        remove: Vec<String>,

        /// Data file as `path:records[:bytes][,key=value...]`; repeatable
        #[arg(long = "file", required = true, value_parser = parse_data_file)]
        files: Vec<DataFile>,
    },

    /// Remove live data files
    Delete {
        #[command(flatten)]
        base: BaseArg,

        /// Path of a live data file to remove; repeatable
        #[arg(long = "remove", required = true)]
        remove: Vec<String>,
    },

    /// Evolve the table schema
    Alter {
        #[command(flatten)]
        base: BaseArg,

        #[command(subcommand)]
        change: AlterCommand,
    },

    /// Resolve a table state and print its schema and live files
    Read {
        #[arg(long = "snapshot-id", conflicts_with = "as_of")]
        snapshot_id: Option<u64>,

        /// RFC 3339 timestamp, e.g. 2025-06-01T12:00:00Z
        #[arg(long = "as-of")]
        as_of: Option<DateTime<Utc>>,
    },

    /// Print the `history` metadata table
    History,

    /// Print the `snapshots` metadata table
    Snapshots,

    /// Replay the employees walkthrough against an in-memory table
    Demo,
}

#[derive(Debug, Args)]
struct BaseArg {
    /// Snapshot the change was prepared against (default: current)
    #[arg(long)]
    base: Option<u64>,
}

#[derive(Debug, Subcommand)]
enum AlterCommand {
    AddColumn {
        #[arg(long)]
        name: String,

        #[arg(long = "type")]
        data_type: DataType,

        #[arg(long, conflicts_with = "first")]
        after: Option<ColumnId>,

        #[arg(long, default_value_t = false)]
        first: bool,
    },
    DropColumn {
        #[arg(long)]
        id: ColumnId,
    },
    RenameColumn {
        #[arg(long)]
        id: ColumnId,

        #[arg(long)]
        to: String,
    },
    UpdateType {
        #[arg(long)]
        id: ColumnId,

        #[arg(long = "type")]
        data_type: DataType,
    },
    MakeOptional {
        #[arg(long)]
        id: ColumnId,
    },
}

impl AlterCommand {
    fn into_change(self) -> SchemaChange {
        match self {
            AlterCommand::AddColumn {
                name,
                data_type,
                after,
                first,
            } => {
                let position = match (first, after) {
                    (true, _) => ColumnPosition::First,
                    (false, Some(id)) => ColumnPosition::After(id),
                    (false, None) => ColumnPosition::Last,
                };
                SchemaChange::AddColumn {
                    name,
                    data_type,
                    nullable: true,
                    position,
                }
            }
            AlterCommand::DropColumn { id } => SchemaChange::DropColumn { id },
            AlterCommand::RenameColumn { id, to } => SchemaChange::RenameColumn { id, new_name: to },
            AlterCommand::UpdateType { id, data_type } => {
                SchemaChange::UpdateColumnType { id, data_type }
            }
            AlterCommand::MakeOptional { id } => SchemaChange::MakeOptional { id },
        }
    }
}

/// Wrapper for commit output
#[derive(Debug, Serialize)]
struct CommitOutput {
    snapshot_id: SnapshotId,
    operation: Operation,
    attempts: u32,
}

impl From<CommitReport> for CommitOutput {
    fn from(report: CommitReport) -> Self {
        Self {
            snapshot_id: report.snapshot_id,
            operation: report.operation,
            attempts: report.attempts,
        }
    }
}

/// Wrapper for read output
#[derive(Debug, Serialize)]
struct ReadOutput<'a> {
    snapshot_id: Option<SnapshotId>,
    committed_at: Option<DateTime<Utc>>,
    schema: &'a Schema,
    manifest_list: &'a str,
    files: Vec<&'a DataFile>,
}

impl<'a> From<&'a ReadView> for ReadOutput<'a> {
    fn from(view: &'a ReadView) -> Self {
        Self {
            snapshot_id: view.snapshot_id(),
            committed_at: view.snapshot().map(|s| s.committed_at()),
            schema: view.schema(),
            manifest_list: view.manifest_list().location(),
            files: view.files().collect(),
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    let config = cli.config.as_deref().map(load_config).transpose()?;

    match cli.cmd {
        Command::Create {
            columns,
            properties,
        } => {
            let store = FileSystemPointerStore::new(&cli.table);
            let location = cli.table.display().to_string();
            let table = Table::create(store, location, columns, properties.into_iter().collect())
                .with_context(|| format!("creating table at {}", cli.table.display()))?;
            print_json(&*table.schema()?)
        }

        Command::Append { base, files } => {
            commit(&cli.table, config, base, Changeset::Append { files })
        }

        Command::Overwrite {
            base,
            remove,
            files,
        } => commit(
            &cli.table,
            config,
            base,
            Changeset::Overwrite { remove, add: files },
        ),

        Command::Delete { base, remove } => {
            commit(&cli.table, config, base, Changeset::Delete { remove })
        }

        Command::Alter { base, change } => commit(
            &cli.table,
            config,
            base,
            Changeset::evolve(change.into_change()),
        ),

        Command::Read { snapshot_id, as_of } => {
            let table = open(&cli.table, config)?;
            let selector = match (snapshot_id, as_of) {
                (Some(id), _) => SnapshotSelector::ById(SnapshotId(id)),
                (None, Some(t)) => SnapshotSelector::AsOf(t),
                (None, None) => SnapshotSelector::Current,
            };
            let view = table.read(selector)?;
            print_json(&ReadOutput::from(&view))
        }

        Command::History => print_json(&open(&cli.table, config)?.history()?),

        Command::Snapshots => print_json(&open(&cli.table, config)?.snapshots()?),

        Command::Demo => print_json(&demo::run(config.unwrap_or_default())?),
    }
}

fn load_config(path: &Path) -> Result<CommitConfig> {
    let data = fs::read_to_string(path)
        .with_context(|| format!("reading config {}", path.display()))?;
    Ok(serde_json::from_str(&data)?)
}

fn open(root: &Path, config: Option<CommitConfig>) -> Result<Table<FileSystemPointerStore>> {
    let table = Table::open(FileSystemPointerStore::new(root))
        .with_context(|| format!("opening table at {}", root.display()))?;
    Ok(match config {
        Some(config) => table.with_config(config),
        None => table,
    })
}

fn commit(
    root: &Path,
    config: Option<CommitConfig>,
    base: BaseArg,
    changeset: Changeset,
) -> Result<()> {
    let table = open(root, config)?;
    let base = match base.base {
        Some(id) => Some(SnapshotId(id)),
        None => table.current_snapshot_id()?,
    };
    let report = table.commit_with_report(base, &changeset)?;
    print_json(&CommitOutput::from(report))
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn parse_column(s: &str) -> Result<ColumnSpec> {
    let mut parts = s.splitn(3, ':');
    let name = parts.next().unwrap_or_default();
    let data_type = parts
        .next()
        .ok_or_else(|| anyhow!("expected `name:type[:required]`, got `{s}`"))?
        .parse::<DataType>()?;
    let nullable = match parts.next() {
        None | Some("optional") => true,
        Some("required") => false,
        Some(other) => return Err(anyhow!("unknown column modifier `{other}`")),
    };
    Ok(ColumnSpec::new(name, data_type, nullable))
}

/// `path:records[:bytes]`, optionally followed by `,key=value` partition
/// pairs.
fn parse_data_file(s: &str) -> Result<DataFile> {
    let mut pairs = s.split(',');
    let spec = pairs.next().unwrap_or_default();

    let mut parts = spec.rsplitn(3, ':').collect::<Vec<_>>();
    parts.reverse();
    let mut file = match parts.as_slice() {
        [path, records, bytes] => DataFile::new(*path, records.parse()?, bytes.parse()?),
        [path, records] => DataFile::new(*path, records.parse()?, 0),
        _ => {
            return Err(anyhow!(
                "expected `path:records[:bytes][,key=value...]`, got `{s}`"
            ))
        }
    };

    for pair in pairs {
        let (field, value) = parse_property(pair)?;
        file = file.with_partition(field, value);
    }
    Ok(file)
}

fn parse_property(s: &str) -> Result<(String, String)> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| anyhow!("expected `key=value`, got `{s}`"))?;
    Ok((key.trim().to_string(), value.trim().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_columns() {
        let column = parse_column("id:int:required").unwrap();
        assert_eq!(column.name, "id");
        assert_eq!(column.data_type, DataType::Int);
        assert!(!column.nullable);

        let column = parse_column("price:decimal(10,2)").unwrap();
        assert_eq!(
            column.data_type,
            DataType::Decimal {
                precision: 10,
                scale: 2
            }
        );
        assert!(column.nullable);

        assert!(parse_column("id").is_err());
        assert!(parse_column("id:int:sometimes").is_err());
    }

    #[test]
    fn parses_data_files() {
        let file = parse_data_file("data/a.parquet:100:2048").unwrap();
        assert_eq!(file.file_path, "data/a.parquet");
        assert_eq!(file.record_count, 100);
        assert_eq!(file.file_size_in_bytes, 2048);

        // Paths may themselves contain colons.
        let file = parse_data_file("s3://bucket/a.parquet:7:1").unwrap();
        assert_eq!(file.file_path, "s3://bucket/a.parquet");

        assert!(parse_data_file("a.parquet").is_err());
    }

    #[test]
    fn parses_partition_pairs() {
        let file = parse_data_file("day=01/a.parquet:5:512,day=2025-06-01,region=eu").unwrap();
        assert_eq!(file.file_path, "day=01/a.parquet");
        assert_eq!(file.record_count, 5);
        assert_eq!(file.partition["day"], "2025-06-01");
        assert_eq!(file.partition["region"], "eu");

        let file = parse_data_file("a.parquet:5").unwrap();
        assert!(file.partition.is_empty());

        assert!(parse_data_file("a.parquet:5,day").is_err());
    }

    #[test]
    fn parses_properties() {
        assert_eq!(
            parse_property("commit.retry.num-retries = 2").unwrap(),
            ("commit.retry.num-retries".to_string(), "2".to_string())
        );
        assert!(parse_property("oops").is_err());
    }

    #[test]
    fn cli_is_well_formed() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn alter_add_column_after() {
        let cli = Cli::try_parse_from([
            "tidemark",
            "--table",
            "/tmp/t",
            "alter",
            "add-column",
            "--name",
            "bonus",
            "--type",
            "int",
            "--after",
            "4",
        ])
        .unwrap();

        match cli.cmd {
            Command::Alter { change, .. } => assert_eq!(
                change.into_change(),
                SchemaChange::AddColumn {
                    name: "bonus".into(),
                    data_type: DataType::Int,
                    nullable: true,
                    position: ColumnPosition::After(4),
                }
            ),
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
