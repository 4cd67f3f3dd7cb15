use std::path::Path;

use anyhow::Context;
use sha2::{Digest, Sha256};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::ConnectOptions;
use sqlx::SqlitePool;
use tracing::{info, warn};

use crate::error::{AppError, AppResult};
use crate::time::now_ms;

pub mod backup;
pub mod export;
pub mod guard;
pub mod health;

/// Baseline schema, applied once to a fresh database and checksum-pinned
/// afterwards. There is deliberately no migration chain.
const SCHEMA_SQL: &str = include_str!("../../schema/baseline.sql");

pub const SCHEMA_VERSION: &str = "baseline";

/// Tables that hold domain rows, in FK-safe insert order. Export, restore
/// and reports all iterate this list instead of discovering tables ad hoc.
pub const DOMAIN_TABLES: [&str; 6] = [
    "users",
    "clients",
    "cases",
    "client_documents",
    "appointments",
    "invoices",
];

/// Open the database with the crate-wide connection settings.
///
/// One connection only: every surface of this app is a single writer and
/// SQLite serializes the rest. WAL + FULL synchronous is the durability
/// setting the health checks assume.
pub async fn open_pool(db_path: &Path) -> anyhow::Result<SqlitePool> {
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create database directory {}", parent.display()))?;
    }

    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Full)
        .foreign_keys(true)
        .log_statements(log::LevelFilter::Off);

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .after_connect(|conn, _| {
            Box::pin(async move {
                sqlx::query("PRAGMA busy_timeout = 5000;")
                    .execute(&mut *conn)
                    .await?;
                sqlx::query("PRAGMA wal_autocheckpoint = 1000;")
                    .execute(&mut *conn)
                    .await?;
                Ok::<_, sqlx::Error>(())
            })
        })
        .connect_with(options)
        .await
        .with_context(|| format!("open sqlite database at {}", db_path.display()))?;

    log_effective_pragmas(&pool).await;

    Ok(pool)
}

async fn log_effective_pragmas(pool: &SqlitePool) {
    let (sqlite_ver,): (String,) = sqlx::query_as("select sqlite_version()")
        .fetch_one(pool)
        .await
        .unwrap_or((String::from("unknown"),));

    let jm: (String,) = sqlx::query_as("PRAGMA journal_mode;")
        .fetch_one(pool)
        .await
        .unwrap_or((String::from("unknown"),));

    let fks: (i64,) = sqlx::query_as("PRAGMA foreign_keys;")
        .fetch_one(pool)
        .await
        .unwrap_or((i64::MIN,));

    info!(
        target: "lawdesk",
        event = "db_open",
        sqlite_version = %sqlite_ver,
        journal_mode = %jm.0,
        foreign_keys = %fks.0
    );

    if !jm.0.eq_ignore_ascii_case("wal") {
        warn!(
            target: "lawdesk",
            event = "db_open_warning",
            msg = "journal_mode != WAL; running with reduced crash safety"
        );
    }
}

fn cleaned_schema() -> String {
    SCHEMA_SQL
        .lines()
        .filter(|line| {
            let t = line.trim_start();
            !(t.is_empty() || t.starts_with("--"))
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn schema_checksum() -> String {
    format!("{:x}", Sha256::digest(cleaned_schema().as_bytes()))
}

/// Apply the baseline schema to a fresh database, or verify that an
/// existing database still matches it. A database whose recorded checksum
/// differs from the embedded schema was patched out of band and is refused.
pub async fn bootstrap(pool: &SqlitePool) -> AppResult<()> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS schema_version (\
           version    TEXT PRIMARY KEY,\
           applied_at INTEGER NOT NULL,\
           checksum   TEXT NOT NULL\
         )",
    )
    .execute(pool)
    .await?;

    let checksum = schema_checksum();
    let applied: Option<(String, String)> =
        sqlx::query_as("SELECT version, checksum FROM schema_version WHERE version = ?")
            .bind(SCHEMA_VERSION)
            .fetch_optional(pool)
            .await?;

    if let Some((version, stored)) = applied {
        if stored != checksum {
            return Err(AppError::new(
                "SCHEMA/DRIFT",
                "database schema does not match this build",
            )
            .with_context("version", version)
            .with_context("expected", checksum)
            .with_context("stored", stored));
        }
        info!(target: "lawdesk", event = "schema_current", version = %version);
        return Ok(());
    }

    let cleaned = cleaned_schema();
    let mut tx = pool.begin().await?;
    for stmt in cleaned.split(';') {
        let s = stmt.trim();
        if s.is_empty() {
            continue;
        }
        sqlx::query(s).execute(&mut *tx).await.map_err(|e| {
            AppError::from(e)
                .with_context("operation", "bootstrap_schema")
                .with_context("sql", preview(s))
        })?;
    }
    sqlx::query("INSERT INTO schema_version (version, applied_at, checksum) VALUES (?, ?, ?)")
        .bind(SCHEMA_VERSION)
        .bind(now_ms())
        .bind(&checksum)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;

    info!(target: "lawdesk", event = "schema_applied", version = SCHEMA_VERSION);
    Ok(())
}

/// SHA-256 over the live `sqlite_master` contents in stable order. Shared
/// by the health report, backup manifests and export metadata so all three
/// agree on what "the schema" is.
pub async fn live_schema_hash(pool: &SqlitePool) -> anyhow::Result<String> {
    use sqlx::Row;

    let rows = sqlx::query(
        "SELECT type, name, tbl_name, sql FROM sqlite_master\n         WHERE type IN ('table','index','trigger','view')\n         ORDER BY type, name",
    )
    .fetch_all(pool)
    .await?;

    let mut hasher = Sha256::new();
    for row in rows {
        let ty: String = row.try_get("type")?;
        let name: String = row.try_get("name")?;
        let tbl: String = row.try_get("tbl_name")?;
        let sql: Option<String> = row.try_get("sql").ok();

        hasher.update(ty.as_bytes());
        hasher.update([0]);
        hasher.update(name.as_bytes());
        hasher.update([0]);
        hasher.update(tbl.as_bytes());
        hasher.update([0]);
        if let Some(sql) = sql {
            hasher.update(sql.as_bytes());
        }
        hasher.update([0]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct VacuumSummary {
    pub duration_ms: u64,
    pub size_before_bytes: i64,
    pub size_after_bytes: i64,
}

/// `VACUUM` plus a truncating WAL checkpoint, timed.
pub async fn vacuum(pool: &SqlitePool, db_path: &Path) -> AppResult<VacuumSummary> {
    let started = std::time::Instant::now();
    let size_before_bytes = std::fs::metadata(db_path)
        .map(|meta| meta.len() as i64)
        .unwrap_or(0);
    sqlx::query("VACUUM;").execute(pool).await?;
    sqlx::query("PRAGMA wal_checkpoint(TRUNCATE);")
        .execute(pool)
        .await?;
    let summary = VacuumSummary {
        duration_ms: started.elapsed().as_millis() as u64,
        size_before_bytes,
        size_after_bytes: std::fs::metadata(db_path)
            .map(|meta| meta.len() as i64)
            .unwrap_or(0),
    };
    info!(
        target: "lawdesk",
        event = "db_vacuum",
        duration_ms = summary.duration_ms,
        size_before_bytes = summary.size_before_bytes,
        size_after_bytes = summary.size_after_bytes,
    );
    Ok(summary)
}

fn preview(sql: &str) -> String {
    let flat = sql.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.len() > 80 {
        format!("{}…", &flat[..80])
    } else {
        flat
    }
}

/// Write a file via a temp sibling + rename so readers never observe a
/// half-written payload.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    use std::io::Write;

    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.flush()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}
