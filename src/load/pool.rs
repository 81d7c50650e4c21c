// src/load/pool.rs
use anyhow::{anyhow, bail, Context, Result};
use duckdb::Connection;
use std::{
    ops::{Deref, DerefMut},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    },
};
use tracing::{debug, info};

use crate::config::{Backend, DatabaseConfig};

/// Catalog name the target database is attached under.
pub const TARGET_CATALOG: &str = "ingest_target";

/// A DuckDB instance with the target attached, handing out cloned
/// connections. Every clone sees the same scratch database and the same
/// attached target.
///
/// Up to `pool_size` idle connections are kept for reuse. At most
/// `pool_size + max_overflow` can be checked out at once; past that
/// [`ConnectionPool::get`] fails straight away rather than waiting.
pub struct ConnectionPool {
    root: Mutex<Connection>,
    idle: Mutex<Vec<Connection>>,
    checked_out: AtomicUsize,
    pool_size: usize,
    max_overflow: usize,
}

impl ConnectionPool {
    /// Open an in-memory scratch database and attach the configured target.
    pub fn open(cfg: &DatabaseConfig) -> Result<Self> {
        let root = Connection::open_in_memory().context("opening scratch database")?;
        root.execute_batch(&attach_sql(cfg)?)
            .with_context(|| format!("attaching {:?} target", cfg.backend))?;
        info!(backend = ?cfg.backend, catalog = TARGET_CATALOG, "target attached");
        Ok(Self::from_connection(root, cfg.pool_size, cfg.max_overflow))
    }

    /// Wrap an already prepared connection.
    pub fn from_connection(root: Connection, pool_size: usize, max_overflow: usize) -> Self {
        Self {
            root: Mutex::new(root),
            idle: Mutex::new(Vec::with_capacity(pool_size)),
            checked_out: AtomicUsize::new(0),
            pool_size,
            max_overflow,
        }
    }

    pub fn capacity(&self) -> usize {
        self.pool_size + self.max_overflow
    }

    pub fn checked_out(&self) -> usize {
        self.checked_out.load(Ordering::SeqCst)
    }

    pub fn idle(&self) -> usize {
        self.idle.lock().map(|v| v.len()).unwrap_or(0)
    }

    pub fn get(&self) -> Result<PooledConnection<'_>> {
        let previous = self.checked_out.fetch_add(1, Ordering::SeqCst);
        if previous >= self.capacity() {
            self.checked_out.fetch_sub(1, Ordering::SeqCst);
            bail!(
                "connection pool exhausted ({} checked out, limit {})",
                previous,
                self.capacity()
            );
        }

        match self.checkout() {
            Ok(conn) => Ok(PooledConnection {
                conn: Some(conn),
                pool: self,
            }),
            Err(e) => {
                self.checked_out.fetch_sub(1, Ordering::SeqCst);
                Err(e)
            }
        }
    }

    fn checkout(&self) -> Result<Connection> {
        let reused = self
            .idle
            .lock()
            .map_err(|_| anyhow!("connection pool lock poisoned"))?
            .pop();
        if let Some(conn) = reused {
            return Ok(conn);
        }
        let root = self
            .root
            .lock()
            .map_err(|_| anyhow!("connection pool lock poisoned"))?;
        debug!("opening pooled connection");
        root.try_clone().context("cloning connection")
    }

    fn give_back(&self, conn: Connection) {
        if let Ok(mut idle) = self.idle.lock() {
            if idle.len() < self.pool_size {
                idle.push(conn);
            }
        }
        self.checked_out.fetch_sub(1, Ordering::SeqCst);
    }
}

/// A checked-out connection; returned to its pool on drop.
pub struct PooledConnection<'a> {
    conn: Option<Connection>,
    pool: &'a ConnectionPool,
}

impl Deref for PooledConnection<'_> {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        self.conn.as_ref().expect("connection present until drop")
    }
}

impl DerefMut for PooledConnection<'_> {
    fn deref_mut(&mut self) -> &mut Connection {
        self.conn.as_mut().expect("connection present until drop")
    }
}

impl Drop for PooledConnection<'_> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.give_back(conn);
        }
    }
}

/// SQL that attaches the configured target as [`TARGET_CATALOG`].
pub fn attach_sql(cfg: &DatabaseConfig) -> Result<String> {
    match cfg.backend {
        Backend::Postgres => Ok(format!(
            "INSTALL postgres; LOAD postgres; ATTACH {} AS {} (TYPE POSTGRES);",
            sql_literal(&conninfo(cfg)?),
            TARGET_CATALOG
        )),
        Backend::DuckDb => {
            let path = cfg
                .path
                .as_deref()
                .context("duckdb backend needs a database path")?;
            Ok(format!("ATTACH {} AS {};", sql_literal(path), TARGET_CATALOG))
        }
    }
}

/// libpq key/value connection string for a postgres target.
pub fn conninfo(cfg: &DatabaseConfig) -> Result<String> {
    let host = cfg.host.as_deref().context("postgres host is not set")?;
    let name = cfg.name.as_deref().context("postgres database is not set")?;
    let user = cfg.user.as_deref().context("postgres user is not set")?;
    let password = cfg
        .password
        .as_deref()
        .context("postgres password is not set")?;

    Ok([
        ("host", host.to_string()),
        ("port", cfg.port.to_string()),
        ("dbname", name.to_string()),
        ("user", user.to_string()),
        ("password", password.to_string()),
    ]
    .iter()
    .map(|(k, v)| format!("{}={}", k, conninfo_value(v)))
    .collect::<Vec<_>>()
    .join(" "))
}

fn conninfo_value(v: &str) -> String {
    format!("'{}'", v.replace('\\', "\\\\").replace('\'', "\\'"))
}

/// Single-quoted SQL string literal.
pub fn sql_literal(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_target(pool_size: usize, max_overflow: usize) -> DatabaseConfig {
        DatabaseConfig {
            backend: Backend::DuckDb,
            path: Some(":memory:".into()),
            pool_size,
            max_overflow,
            ..DatabaseConfig::default()
        }
    }

    #[test]
    fn checkouts_are_bounded() -> Result<()> {
        let pool = ConnectionPool::open(&memory_target(1, 1))?;
        let a = pool.get()?;
        let b = pool.get()?;
        assert_eq!(pool.checked_out(), 2);
        let err = pool.get().err().context("third checkout should fail")?;
        assert!(err.to_string().contains("exhausted"));

        drop(a);
        drop(b);
        assert_eq!(pool.checked_out(), 0);
        // only `pool_size` connections are kept idle
        assert_eq!(pool.idle(), 1);
        let _c = pool.get()?;
        assert_eq!(pool.idle(), 0);
        Ok(())
    }

    #[test]
    fn clones_share_the_attached_target() -> Result<()> {
        let pool = ConnectionPool::open(&memory_target(2, 0))?;
        {
            let conn = pool.get()?;
            conn.execute_batch("CREATE TABLE ingest_target.main.t AS SELECT 42 AS v;")?;
        }
        let a = pool.get()?;
        let b = pool.get()?;
        let v: i32 = b.query_row("SELECT v FROM ingest_target.main.t", [], |r| r.get(0))?;
        assert_eq!(v, 42);
        drop(a);
        Ok(())
    }

    #[test]
    fn postgres_attach_needs_credentials() {
        let cfg = DatabaseConfig::default();
        assert!(attach_sql(&cfg).is_err());
    }

    #[test]
    fn conninfo_quotes_values() -> Result<()> {
        let cfg = DatabaseConfig {
            host: Some("db.internal".into()),
            name: Some("warehouse".into()),
            user: Some("loader".into()),
            password: Some("it's\\secret".into()),
            ..DatabaseConfig::default()
        };
        let info = conninfo(&cfg)?;
        assert_eq!(
            info,
            "host='db.internal' port='5432' dbname='warehouse' user='loader' password='it\\'s\\\\secret'"
        );
        let sql = attach_sql(&cfg)?;
        assert!(sql.contains("password=''it\\''s\\\\secret''"));
        assert!(sql.ends_with("AS ingest_target (TYPE POSTGRES);"));
        Ok(())
    }
}
