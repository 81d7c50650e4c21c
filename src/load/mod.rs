// src/load/mod.rs
//! Write a cleaned batch to the target table.
//!
//! Incoming rows are first staged in a scratch table of the in-memory
//! default database, then moved into the attached target in one
//! transaction: `CREATE TABLE AS` for a new table, `INSERT BY NAME` for an
//! append, or `DROP` + `CREATE TABLE AS` from a merged stage when the
//! incoming batch brings more columns than the stored table has.
//!
//! Nothing serialises concurrent loads of the same table: two runs can both
//! inspect the table and then both swap it.

pub mod merge;
pub mod pool;

use anyhow::{bail, Context, Result};
use duckdb::Connection;
use serde::Serialize;
use std::{
    fmt,
    sync::atomic::{AtomicUsize, Ordering},
    time::Instant,
};
use tracing::{debug, error, info, warn};

use crate::arrow::{
    array::ArrayRef,
    compute::{cast, concat_batches},
    datatypes::{DataType, Field, Schema, TimeUnit},
    record_batch::RecordBatch,
};
use pool::{ConnectionPool, TARGET_CATALOG};

/// Rows handed to the appender per call; one DuckDB vector.
const STAGE_CHUNK: usize = 2048;

static STAGE_SEQ: AtomicUsize = AtomicUsize::new(0);

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableRef {
    pub schema: String,
    pub table: String,
}

impl TableRef {
    pub fn new(schema: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            table: table.into(),
        }
    }

    /// Fully qualified, quoted name inside the attached target.
    pub fn qualified(&self) -> String {
        format!(
            "{}.{}.{}",
            TARGET_CATALOG,
            quote_ident(&self.schema),
            quote_ident(&self.table)
        )
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.table)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadAction {
    Create,
    Append,
    MergeReplace,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum LoadOutcome {
    Loaded {
        action: LoadAction,
        rows_written: usize,
    },
    Failed {
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoadReport {
    pub outcome: LoadOutcome,
    /// Row count of the target after the attempt, if it could be read.
    pub table_rows: Option<i64>,
    pub elapsed_secs: f64,
}

impl LoadReport {
    pub fn is_failed(&self) -> bool {
        matches!(self.outcome, LoadOutcome::Failed { .. })
    }
}

/// Choose how to write `incoming` columns given the stored table's column
/// count (`None` when the table does not exist).
pub fn plan(stored: Option<usize>, incoming: usize) -> LoadAction {
    match stored {
        None => LoadAction::Create,
        Some(n) if incoming > n => LoadAction::MergeReplace,
        Some(_) => LoadAction::Append,
    }
}

/// Load `batch` into `target`.
///
/// Only a failure to get a connection is returned as `Err`. Anything that
/// goes wrong while writing ends up in [`LoadOutcome::Failed`]; the target's
/// row count is read either way.
#[tracing::instrument(level = "info", skip(pool, batch), fields(table = %target, rows = batch.num_rows()))]
pub fn load(pool: &ConnectionPool, batch: &RecordBatch, target: &TableRef) -> Result<LoadReport> {
    let started = Instant::now();
    let mut conn = pool.get().context("checking out connection")?;

    let mut stages = Vec::new();
    let result = write(&mut conn, batch, target, &mut stages);
    drop_stages(&conn, &stages);

    let outcome = match result {
        Ok((action, rows_written)) => {
            info!(?action, rows_written, "table {} loaded", target);
            LoadOutcome::Loaded {
                action,
                rows_written,
            }
        }
        Err(e) => {
            error!("loading {} failed: {:#}", target, e);
            LoadOutcome::Failed {
                reason: format!("{:#}", e),
            }
        }
    };

    let table_rows = match count_rows(&conn, target) {
        Ok(n) => {
            info!("{} now holds {} rows", target, n);
            Some(n)
        }
        Err(e) => {
            warn!("could not count rows of {}: {:#}", target, e);
            None
        }
    };

    Ok(LoadReport {
        outcome,
        table_rows,
        elapsed_secs: started.elapsed().as_secs_f64(),
    })
}

fn write(
    conn: &mut Connection,
    batch: &RecordBatch,
    target: &TableRef,
    stages: &mut Vec<String>,
) -> Result<(LoadAction, usize)> {
    let incoming = normalize_for_sql(batch)?;
    let stage = stage_table(conn, &incoming, stages).context("staging incoming rows")?;

    let stored = stored_columns(conn, target).context("inspecting target")?;
    let action = plan(stored, incoming.num_columns());
    debug!(?action, ?stored, incoming = incoming.num_columns(), "planned load");

    let table = target.qualified();
    match action {
        LoadAction::Create => {
            let tx = conn.transaction()?;
            tx.execute_batch(&format!(
                "CREATE SCHEMA IF NOT EXISTS {}.{};
                 CREATE TABLE {} AS SELECT * FROM {};",
                TARGET_CATALOG,
                quote_ident(&target.schema),
                table,
                quote_ident(&stage)
            ))
            .context("creating table")?;
            tx.commit().context("committing create")?;
            Ok((action, incoming.num_rows()))
        }
        LoadAction::Append => {
            let tx = conn.transaction()?;
            tx.execute_batch(&format!(
                "INSERT INTO {} BY NAME SELECT * FROM {};",
                table,
                quote_ident(&stage)
            ))
            .context("appending rows")?;
            tx.commit().context("committing append")?;
            Ok((action, incoming.num_rows()))
        }
        LoadAction::MergeReplace => {
            let existing = read_table(conn, target).context("reading stored rows")?;
            let merged = normalize_for_sql(&merge::merge_rows(&existing, &incoming)?)?;
            info!(
                stored_rows = existing.num_rows(),
                incoming_rows = incoming.num_rows(),
                merged_rows = merged.num_rows(),
                columns = merged.num_columns(),
                "rebuilding {} with new columns",
                target
            );
            let merged_stage =
                stage_table(conn, &merged, stages).context("staging merged rows")?;

            let tx = conn.transaction()?;
            tx.execute_batch(&format!(
                "DROP TABLE {table};
                 CREATE TABLE {table} AS SELECT * FROM {};",
                quote_ident(&merged_stage)
            ))
            .context("replacing table")?;
            tx.commit().context("committing replace")?;
            Ok((action, merged.num_rows()))
        }
    }
}

/// Widen column types the SQL side cannot store as-is: categorical to its
/// value type, half floats to `REAL`, one-byte integers to `SMALLINT`, large
/// strings to plain strings, timestamps to microseconds.
pub fn normalize_for_sql(batch: &RecordBatch) -> Result<RecordBatch> {
    let schema = batch.schema();
    let mut fields = Vec::with_capacity(batch.num_columns());
    let mut columns: Vec<ArrayRef> = Vec::with_capacity(batch.num_columns());

    for (field, col) in schema.fields().iter().zip(batch.columns()) {
        let target = sql_storage_type(field.data_type());
        if &target == field.data_type() {
            fields.push(field.as_ref().clone());
            columns.push(col.clone());
        } else {
            columns.push(
                cast(col, &target)
                    .with_context(|| format!("widening `{}` to {}", field.name(), target))?,
            );
            fields.push(Field::new(field.name(), target, field.is_nullable()));
        }
    }
    RecordBatch::try_new(std::sync::Arc::new(Schema::new(fields)), columns)
        .context("normalizing batch for SQL")
}

fn sql_storage_type(dt: &DataType) -> DataType {
    match dt {
        DataType::Dictionary(_, value) => sql_storage_type(value),
        DataType::Float16 => DataType::Float32,
        DataType::Int8 => DataType::Int16,
        DataType::LargeUtf8 => DataType::Utf8,
        DataType::Timestamp(_, tz) => DataType::Timestamp(TimeUnit::Microsecond, tz.clone()),
        other => other.clone(),
    }
}

/// DuckDB column type for an Arrow type produced by [`normalize_for_sql`].
pub fn sql_type(dt: &DataType) -> Result<String> {
    Ok(match dt {
        DataType::Boolean => "BOOLEAN".into(),
        DataType::Int16 => "SMALLINT".into(),
        DataType::Int32 => "INTEGER".into(),
        DataType::Int64 => "BIGINT".into(),
        DataType::Float32 => "REAL".into(),
        DataType::Float64 => "DOUBLE".into(),
        DataType::Utf8 => "VARCHAR".into(),
        DataType::Date32 => "DATE".into(),
        DataType::Timestamp(TimeUnit::Microsecond, None) => "TIMESTAMP".into(),
        DataType::Timestamp(TimeUnit::Microsecond, Some(_)) => "TIMESTAMPTZ".into(),
        DataType::Decimal128(p, s) => format!("DECIMAL({}, {})", p, s),
        other => bail!("no SQL column type for {}", other),
    })
}

pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Create a scratch table shaped like `batch` and append its rows.
fn stage_table(
    conn: &Connection,
    batch: &RecordBatch,
    stages: &mut Vec<String>,
) -> Result<String> {
    let name = format!("sheetpipe_stage_{}", STAGE_SEQ.fetch_add(1, Ordering::SeqCst));
    let columns = batch
        .schema()
        .fields()
        .iter()
        .map(|f| Ok(format!("{} {}", quote_ident(f.name()), sql_type(f.data_type())?)))
        .collect::<Result<Vec<_>>>()?
        .join(", ");
    conn.execute_batch(&format!("CREATE TABLE {} ({});", quote_ident(&name), columns))
        .with_context(|| format!("creating scratch table {}", name))?;
    stages.push(name.clone());

    let mut appender = conn.appender(&name)?;
    let mut offset = 0;
    while offset < batch.num_rows() {
        let len = STAGE_CHUNK.min(batch.num_rows() - offset);
        appender
            .append_record_batch(batch.slice(offset, len))
            .with_context(|| format!("appending rows {}..{}", offset, offset + len))?;
        offset += len;
    }
    appender.flush()?;
    debug!(stage = %name, rows = batch.num_rows(), "staged rows");
    Ok(name)
}

fn drop_stages(conn: &Connection, stages: &[String]) {
    for name in stages {
        if let Err(e) = conn.execute_batch(&format!("DROP TABLE IF EXISTS {};", quote_ident(name))) {
            warn!("could not drop scratch table {}: {}", name, e);
        }
    }
}

/// Stored column count, or `None` when the table does not exist.
pub fn stored_columns(conn: &Connection, target: &TableRef) -> Result<Option<usize>> {
    let tables: i64 = conn.query_row(
        "SELECT count(*) FROM information_schema.tables
         WHERE table_catalog = ? AND table_schema = ? AND table_name = ?",
        duckdb::params![TARGET_CATALOG, target.schema, target.table],
        |r| r.get(0),
    )?;
    if tables == 0 {
        return Ok(None);
    }
    let columns: i64 = conn.query_row(
        "SELECT count(*) FROM information_schema.columns
         WHERE table_catalog = ? AND table_schema = ? AND table_name = ?",
        duckdb::params![TARGET_CATALOG, target.schema, target.table],
        |r| r.get(0),
    )?;
    Ok(Some(columns as usize))
}

/// Every stored row of `target`, read in the engine's vector-sized chunks.
pub fn read_table(conn: &Connection, target: &TableRef) -> Result<RecordBatch> {
    let mut stmt = conn.prepare(&format!("SELECT * FROM {}", target.qualified()))?;
    let chunks = stmt.query_arrow([])?;
    let schema = chunks.get_schema();
    let batches: Vec<RecordBatch> = chunks.collect();
    concat_batches(&schema, &batches).context("collecting stored rows")
}

pub fn count_rows(conn: &Connection, target: &TableRef) -> Result<i64> {
    let n = conn.query_row(
        &format!("SELECT count(*) FROM {}", target.qualified()),
        [],
        |r| r.get(0),
    )?;
    Ok(n)
}
