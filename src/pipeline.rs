// src/pipeline.rs
//! One ingestion run: fetch → parse → clean → load.

use anyhow::{Context, Result};
use chrono::{Local, NaiveDateTime};
use object_store::{path::Path, ObjectStore};
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

use crate::{
    clean::{clean, CleanOptions, CleanReport},
    config::IngestConfig,
    fetch::{fetch_object, object_key, open_store, resolve},
    load::{self, pool::ConnectionPool, LoadReport, TableRef},
    sheet::{read_workbook, SheetOptions},
};

/// What a run did, printed as JSON by the `sheetpipe` binary.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub source: String,
    pub target: TableRef,
    pub run_started: NaiveDateTime,
    pub clean: CleanReport,
    pub load: LoadReport,
}

impl RunSummary {
    pub fn succeeded(&self) -> bool {
        !self.load.is_failed()
    }
}

/// Run against the store and database named in `cfg`.
pub async fn run(cfg: &IngestConfig) -> Result<RunSummary> {
    let run_started = Local::now().naive_local();
    let (store, prefix) = open_store(&cfg.source.store_url())?;

    let db = cfg.database.clone();
    let pool = tokio::task::spawn_blocking(move || ConnectionPool::open(&db))
        .await
        .context("connection task panicked")?
        .context("connecting to target database")?;

    run_with(store.as_ref(), &prefix, Arc::new(pool), cfg, run_started).await
}

/// Run with an already opened store and pool. Parsing, cleaning and loading
/// happen on the blocking thread pool.
pub async fn run_with(
    store: &dyn ObjectStore,
    prefix: &Path,
    pool: Arc<ConnectionPool>,
    cfg: &IngestConfig,
    run_started: NaiveDateTime,
) -> Result<RunSummary> {
    let key = resolve(
        prefix,
        &object_key(&cfg.source.organization_id, &cfg.source.filename),
    );
    info!(source = %key, started = %run_started, "ingestion run");
    let bytes = fetch_object(store, &key).await?;

    let sheet_opts = SheetOptions {
        sheet: cfg.source.sheet.clone(),
        header_row: cfg.source.header_row,
    };
    let clean_opts = CleanOptions {
        timestamp_column: cfg.target.timestamp_column.clone(),
        run_started,
    };
    let target = TableRef::new(&cfg.target.schema, &cfg.target.table);

    let (clean_report, load_report) = tokio::task::spawn_blocking({
        let target = target.clone();
        move || -> Result<(CleanReport, LoadReport)> {
            let raw = read_workbook(bytes, &sheet_opts)?;
            let (cleaned, report) = clean(&raw, &clean_opts)?;
            let loaded = load::load(&pool, &cleaned, &target)?;
            Ok((report, loaded))
        }
    })
    .await
    .context("ingest task panicked")??;

    Ok(RunSummary {
        source: key.to_string(),
        target,
        run_started,
        clean: clean_report,
        load: load_report,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Backend, DatabaseConfig, SourceConfig, TargetConfig};
    use crate::load::{LoadAction, LoadOutcome};
    use chrono::NaiveDate;
    use object_store::{memory::InMemory, PutPayload};
    use rust_xlsxwriter::Workbook;

    fn config() -> IngestConfig {
        IngestConfig {
            source: SourceConfig {
                organization_id: "company".into(),
                bucket: "bucket-data".into(),
                filename: "filename.xlsx".into(),
                store_url: Some("memory://".into()),
                ..SourceConfig::default()
            },
            target: TargetConfig::default(),
            database: DatabaseConfig {
                backend: Backend::DuckDb,
                path: Some(":memory:".into()),
                pool_size: 2,
                max_overflow: 1,
                ..DatabaseConfig::default()
            },
        }
    }

    fn workbook() -> Result<Vec<u8>> {
        let mut workbook = Workbook::new();
        let sheet = workbook.add_worksheet();
        sheet.write_string(0, 0, "Monthly extract")?;
        for (j, label) in ["Código", "Descripción", "Valor"].iter().enumerate() {
            sheet.write_string(2, j as u16, *label)?;
        }
        let rows = [("A-1", "Widget", 3.0), ("B (2)", "Gadget: large", 4.5), ("A-1", "Widget", 3.0)];
        for (i, (code, desc, value)) in rows.iter().enumerate() {
            let r = 3 + i as u32;
            sheet.write_string(r, 0, *code)?;
            sheet.write_string(r, 1, *desc)?;
            sheet.write_number(r, 2, *value)?;
        }
        Ok(workbook.save_to_buffer()?)
    }

    fn started() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2022, 3, 28)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
    }

    #[tokio::test]
    async fn end_to_end_create_then_append() -> Result<()> {
        crate::logging::init_test_logging();
        let cfg = config();
        let store = InMemory::new();
        store
            .put(
                &object_key("company", "filename.xlsx"),
                PutPayload::from(workbook()?),
            )
            .await?;
        let pool = Arc::new(ConnectionPool::open(&cfg.database)?);

        let first = run_with(&store, &Path::default(), pool.clone(), &cfg, started()).await?;
        assert!(first.succeeded());
        assert_eq!(
            first.source,
            "business_cases/company/INPUTS/raw/filename.xlsx"
        );
        assert_eq!(first.clean.rows_in, 3);
        assert_eq!(first.clean.rows_out, 2);
        assert_eq!(
            first.load.outcome,
            LoadOutcome::Loaded {
                action: LoadAction::Create,
                rows_written: 2
            }
        );
        assert_eq!(first.load.table_rows, Some(2));

        {
            let conn = pool.get()?;
            let columns = load::stored_columns(&conn, &first.target)?;
            assert_eq!(columns, Some(4));
            let code: String = conn.query_row(
                "SELECT codigo FROM ingest_target.stg_schema.stg_table WHERE valor = 4.5",
                [],
                |r| r.get(0),
            )?;
            assert_eq!(code, "B2");
        }

        let second = run_with(&store, &Path::default(), pool, &cfg, started()).await?;
        assert_eq!(second.load.table_rows, Some(4));

        let json = serde_json::to_value(&second)?;
        assert_eq!(json["load"]["outcome"]["status"], "loaded");
        assert_eq!(json["load"]["outcome"]["action"], "append");
        assert_eq!(json["target"]["table"], "stg_table");
        Ok(())
    }

    #[tokio::test]
    async fn missing_source_is_an_error() -> Result<()> {
        let cfg = config();
        let store = InMemory::new();
        let pool = Arc::new(ConnectionPool::open(&cfg.database)?);
        let err = run_with(&store, &Path::default(), pool, &cfg, started())
            .await
            .unwrap_err();
        assert!(format!("{:#}", err).contains("filename.xlsx"));
        Ok(())
    }
}
