//! Run configuration: an optional YAML file, then environment overrides.
//!
//! Credentials have no built-in defaults; a postgres target without host,
//! database, user and password is rejected by [`IngestConfig::validate`].

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::{fmt, fs, path::Path, str::FromStr};

use crate::clean::stamp::DEFAULT_TIMESTAMP_COLUMN;

/// Zero-based row holding the column labels in the source sheet.
pub const DEFAULT_HEADER_ROW: usize = 2;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    pub source: SourceConfig,
    pub target: TargetConfig,
    pub database: DatabaseConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub organization_id: String,
    pub bucket: String,
    pub filename: String,
    /// Overrides the `s3://{bucket}` store location (e.g. `file:///data`).
    pub store_url: Option<String>,
    /// Sheet name; the first sheet when unset.
    pub sheet: Option<String>,
    pub header_row: usize,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            organization_id: String::new(),
            bucket: String::new(),
            filename: String::new(),
            store_url: None,
            sheet: None,
            header_row: DEFAULT_HEADER_ROW,
        }
    }
}

impl SourceConfig {
    pub fn store_url(&self) -> String {
        self.store_url
            .clone()
            .unwrap_or_else(|| format!("s3://{}", self.bucket))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetConfig {
    pub schema: String,
    pub table: String,
    pub timestamp_column: String,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            schema: "stg_schema".into(),
            table: "stg_table".into(),
            timestamp_column: DEFAULT_TIMESTAMP_COLUMN.into(),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    #[default]
    Postgres,
    DuckDb,
}

impl FromStr for Backend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(Backend::Postgres),
            "duckdb" => Ok(Backend::DuckDb),
            other => bail!("unknown database backend `{}`", other),
        }
    }
}

#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub backend: Backend,
    pub host: Option<String>,
    pub port: u16,
    pub name: Option<String>,
    pub user: Option<String>,
    pub password: Option<String>,
    /// DuckDB file for the `duckdb` backend; `:memory:` is accepted.
    pub path: Option<String>,
    pub pool_size: usize,
    pub max_overflow: usize,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            backend: Backend::Postgres,
            host: None,
            port: 5432,
            name: None,
            user: None,
            password: None,
            path: None,
            pool_size: 10,
            max_overflow: 20,
        }
    }
}

impl fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("backend", &self.backend)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("name", &self.name)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("path", &self.path)
            .field("pool_size", &self.pool_size)
            .field("max_overflow", &self.max_overflow)
            .finish()
    }
}

impl IngestConfig {
    /// Read `path` (if any), apply process-environment overrides, validate.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut cfg = match path {
            Some(p) => {
                let text = fs::read_to_string(p)
                    .with_context(|| format!("reading config {}", p.display()))?;
                Self::from_yaml_str(&text).with_context(|| format!("parsing {}", p.display()))?
            }
            None => Self::default(),
        };
        cfg.apply_overrides(|key| std::env::var(key).ok())?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_yaml_str(text: &str) -> Result<Self> {
        serde_yaml::from_str(text).context("deserializing ingest config")
    }

    /// Overlay values found through `lookup` (normally `std::env::var`).
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let src = &mut self.source;
        set_string(&lookup, "SHEETPIPE_ORG_ID", &mut src.organization_id);
        set_string(&lookup, "SHEETPIPE_BUCKET", &mut src.bucket);
        set_string(&lookup, "SHEETPIPE_FILENAME", &mut src.filename);
        set_option(&lookup, "SHEETPIPE_STORE_URL", &mut src.store_url);
        set_option(&lookup, "SHEETPIPE_SHEET", &mut src.sheet);
        set_parsed(&lookup, "SHEETPIPE_HEADER_ROW", &mut src.header_row)?;

        let tgt = &mut self.target;
        set_string(&lookup, "SHEETPIPE_SCHEMA", &mut tgt.schema);
        set_string(&lookup, "SHEETPIPE_TABLE", &mut tgt.table);
        set_string(&lookup, "SHEETPIPE_TIMESTAMP_COLUMN", &mut tgt.timestamp_column);

        let db = &mut self.database;
        set_parsed(&lookup, "SHEETPIPE_DB_BACKEND", &mut db.backend)?;
        set_option(&lookup, "PSQL_HOST", &mut db.host);
        set_parsed(&lookup, "PSQL_PORT", &mut db.port)?;
        set_option(&lookup, "PSQL_DB", &mut db.name);
        set_option(&lookup, "PSQL_USER", &mut db.user);
        set_option(&lookup, "PSQL_PASSWORD", &mut db.password);
        set_option(&lookup, "SHEETPIPE_DUCKDB_PATH", &mut db.path);
        set_parsed(&lookup, "SHEETPIPE_POOL_SIZE", &mut db.pool_size)?;
        set_parsed(&lookup, "SHEETPIPE_MAX_OVERFLOW", &mut db.max_overflow)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let src = &self.source;
        for (key, value) in [
            ("source.organization_id", &src.organization_id),
            ("source.bucket", &src.bucket),
            ("source.filename", &src.filename),
            ("target.schema", &self.target.schema),
            ("target.table", &self.target.table),
            ("target.timestamp_column", &self.target.timestamp_column),
        ] {
            if value.trim().is_empty() {
                bail!("`{}` must be set", key);
            }
        }

        let db = &self.database;
        if db.pool_size == 0 {
            bail!("`database.pool_size` must be at least 1");
        }
        match db.backend {
            Backend::Postgres => {
                for (key, value) in [
                    ("database.host", &db.host),
                    ("database.name", &db.name),
                    ("database.user", &db.user),
                    ("database.password", &db.password),
                ] {
                    if value.as_deref().map_or(true, |v| v.is_empty()) {
                        bail!("`{}` must be set for the postgres backend", key);
                    }
                }
            }
            Backend::DuckDb => {
                if db.path.as_deref().map_or(true, |v| v.is_empty()) {
                    bail!("`database.path` must be set for the duckdb backend");
                }
            }
        }
        Ok(())
    }
}

fn set_string<F: Fn(&str) -> Option<String>>(lookup: &F, key: &str, slot: &mut String) {
    if let Some(v) = lookup(key) {
        *slot = v;
    }
}

fn set_option<F: Fn(&str) -> Option<String>>(lookup: &F, key: &str, slot: &mut Option<String>) {
    if let Some(v) = lookup(key) {
        *slot = Some(v);
    }
}

fn set_parsed<F, T>(lookup: &F, key: &str, slot: &mut T) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: fmt::Display,
{
    if let Some(v) = lookup(key) {
        *slot = v
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid {}=`{}`: {}", key, v, e))?;
    }
    Ok(())
}
