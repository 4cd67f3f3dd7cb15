//! Database health battery run by `db status`, at server startup, and by
//! the CLI gate before any mutating maintenance command.
//!
//! Four checks: `quick_check`, `integrity_check`, `foreign_key_check`
//! (with offender rows) and a storage sanity pass that inspects the WAL
//! header on disk and attempts a checkpoint self-heal when the WAL looks
//! like junk. Any failed check marks the whole report unhealthy.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result};
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{pool::PoolConnection, Row, Sqlite, SqlitePool};

const EXPECTED_JOURNAL_MODE: &str = "wal";
const EXPECTED_PAGE_SIZE: i64 = 4096;
const WAL_HEADER_MAGIC: &[u8; 4] = b"WAL\0";

pub const STORAGE_SANITY_HEAL_NOTE: &str = "wal header healed after checkpoint";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DbHealthStatus {
    Ok,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DbHealthCheck {
    pub name: String,
    pub passed: bool,
    #[serde(default)]
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DbHealthOffender {
    pub table: String,
    pub rowid: i64,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DbHealthReport {
    pub status: DbHealthStatus,
    pub checks: Vec<DbHealthCheck>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub offenders: Vec<DbHealthOffender>,
    pub schema_hash: String,
    pub app_version: String,
    pub generated_at: String,
}

impl DbHealthReport {
    pub fn is_healthy(&self) -> bool {
        self.status == DbHealthStatus::Ok
    }
}

pub async fn run_health_checks(pool: &SqlitePool, db_path: &Path) -> Result<DbHealthReport> {
    let mut conn = pool
        .acquire()
        .await
        .context("acquire connection for health checks")?;

    let mut checks: Vec<DbHealthCheck> = Vec::new();
    let mut offenders: Vec<DbHealthOffender> = Vec::new();
    let mut overall_ok = true;

    let quick = scalar_pragma_check(&mut conn, "quick_check", "PRAGMA quick_check;").await;
    overall_ok &= quick.passed;
    checks.push(quick);

    let integrity =
        scalar_pragma_check(&mut conn, "integrity_check", "PRAGMA integrity_check(1);").await;
    overall_ok &= integrity.passed;
    checks.push(integrity);

    let fk_result = run_foreign_key_check(&mut conn).await;
    overall_ok &= fk_result.check.passed;
    offenders.extend(fk_result.offenders);
    checks.push(fk_result.check);

    let storage_check = run_storage_sanity(&mut conn, db_path).await;
    overall_ok &= storage_check.passed;
    checks.push(storage_check);

    drop(conn);
    let schema_hash = crate::db::live_schema_hash(pool).await.unwrap_or_default();

    let status = if overall_ok {
        DbHealthStatus::Ok
    } else {
        DbHealthStatus::Error
    };

    let generated_at = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
    Ok(DbHealthReport {
        status,
        checks,
        offenders,
        schema_hash,
        app_version: env!("CARGO_PKG_VERSION").to_string(),
        generated_at,
    })
}

struct ForeignKeyCheckResult {
    check: DbHealthCheck,
    offenders: Vec<DbHealthOffender>,
}

/// `quick_check` and `integrity_check` share the same contract: a single
/// row whose text is exactly "ok" on success.
async fn scalar_pragma_check(
    conn: &mut PoolConnection<Sqlite>,
    name: &str,
    sql: &str,
) -> DbHealthCheck {
    let start = Instant::now();
    let mut check = DbHealthCheck {
        name: name.to_string(),
        passed: true,
        duration_ms: 0,
        details: None,
    };

    match sqlx::query_scalar::<_, String>(sql)
        .fetch_one(conn.as_mut())
        .await
    {
        Ok(result) => {
            if !result.eq_ignore_ascii_case("ok") {
                check.passed = false;
                check.details = Some(result);
            }
        }
        Err(err) => {
            check.passed = false;
            check.details = Some(format!("{name} failed: {err}"));
        }
    }

    check.duration_ms = start.elapsed().as_millis() as u64;
    check
}

async fn run_foreign_key_check(conn: &mut PoolConnection<Sqlite>) -> ForeignKeyCheckResult {
    let start = Instant::now();
    let mut check = DbHealthCheck {
        name: "foreign_key_check".to_string(),
        passed: true,
        duration_ms: 0,
        details: None,
    };

    let rows = sqlx::query("PRAGMA foreign_key_check;")
        .fetch_all(conn.as_mut())
        .await;

    let mut offenders = Vec::new();
    match rows {
        Ok(rows) => {
            for row in rows {
                if let Some(offender) = offender_from_row(&row) {
                    offenders.push(offender);
                }
            }
            if !offenders.is_empty() {
                check.passed = false;
                check.details = Some(format!("{} foreign key violation(s)", offenders.len()));
            }
        }
        Err(err) => {
            check.passed = false;
            check.details = Some(format!("foreign_key_check failed: {err}"));
        }
    }

    check.duration_ms = start.elapsed().as_millis() as u64;
    ForeignKeyCheckResult { check, offenders }
}

fn offender_from_row(row: &SqliteRow) -> Option<DbHealthOffender> {
    let table: String = row.try_get("table").ok()?;
    let rowid: i64 = row.try_get("rowid").ok()?;
    let parent: Option<String> = row.try_get("parent").ok();
    let fkid: Option<i64> = row.try_get("fkid").ok();

    let mut message = String::new();
    if let Some(parent) = parent {
        message.push_str(&format!("missing parent '{parent}'"));
    }
    if let Some(fkid) = fkid {
        if !message.is_empty() {
            message.push_str(", ");
        }
        message.push_str(&format!("constraint #{fkid}"));
    }
    if message.is_empty() {
        message.push_str("foreign key violation");
    }

    Some(DbHealthOffender {
        table,
        rowid,
        message,
    })
}

async fn run_storage_sanity(conn: &mut PoolConnection<Sqlite>, db_path: &Path) -> DbHealthCheck {
    let start = Instant::now();
    let mut check = DbHealthCheck {
        name: "storage_sanity".to_string(),
        passed: true,
        duration_ms: 0,
        details: None,
    };

    let mut messages: Vec<String> = Vec::new();

    let journal_mode = sqlx::query_scalar::<_, String>("PRAGMA journal_mode;")
        .fetch_one(conn.as_mut())
        .await;
    let page_size = sqlx::query_scalar::<_, i64>("PRAGMA page_size;")
        .fetch_one(conn.as_mut())
        .await;

    match journal_mode {
        Ok(mode) => {
            if !mode.eq_ignore_ascii_case(EXPECTED_JOURNAL_MODE) {
                check.passed = false;
                messages.push(format!(
                    "journal_mode mismatch: expected {EXPECTED_JOURNAL_MODE}, got {mode}"
                ));
            } else {
                messages.push(format!("journal_mode={mode}"));
            }
        }
        Err(err) => {
            check.passed = false;
            messages.push(format!("journal_mode query failed: {err}"));
        }
    }

    match page_size {
        Ok(size) => {
            if size != EXPECTED_PAGE_SIZE {
                check.passed = false;
                messages.push(format!(
                    "page_size mismatch: expected {EXPECTED_PAGE_SIZE}, got {size}"
                ));
            } else {
                messages.push(format!("page_size={size}"));
            }

            let mut wal_state = inspect_wal_file(db_path, size);
            let mut heal_summary: Option<WalHealSummary> = None;
            let mut wal_checkpoint_error: Option<String> = None;

            if !wal_state.passed && wal_state.healable {
                messages.push(format!("wal anomaly detected: {}", wal_state.details));
                match attempt_wal_self_heal(conn).await {
                    Ok(summary) => {
                        if let Some(ref full_error) = summary.full_error {
                            messages.push(format!(
                                "wal checkpoint FULL failed: {full_error}; applied TRUNCATE fallback"
                            ));
                        }
                        wal_state = inspect_wal_file(db_path, size);
                        heal_summary = Some(summary);
                    }
                    Err(err) => {
                        wal_checkpoint_error = Some(format!("wal checkpoint repair failed: {err}"));
                    }
                }
            } else if !wal_state.passed {
                check.passed = false;
            }

            if let Some(error) = wal_checkpoint_error {
                messages.push(error);
                check.passed = false;
            }

            let final_message = if let Some(summary) = heal_summary.as_ref() {
                let method = summary.method();
                if wal_state.passed {
                    format!(
                        "{STORAGE_SANITY_HEAL_NOTE} ({method}); final wal state: {}",
                        wal_state.details
                    )
                } else {
                    check.passed = false;
                    format!(
                        "wal anomaly persists after checkpoint ({method}); final wal state: {}",
                        wal_state.details
                    )
                }
            } else {
                wal_state.details.clone()
            };

            messages.push(final_message);

            if !wal_state.passed {
                check.passed = false;
            }
        }
        Err(err) => {
            check.passed = false;
            messages.push(format!("page_size query failed: {err}"));
        }
    }

    check.duration_ms = start.elapsed().as_millis() as u64;
    if !messages.is_empty() {
        check.details = Some(messages.join("; "));
    }
    check
}

struct WalState {
    passed: bool,
    details: String,
    healable: bool,
}

#[derive(Clone)]
struct WalHealSummary {
    kind: WalHealKind,
    full_error: Option<String>,
}

impl WalHealSummary {
    fn method(&self) -> &'static str {
        match self.kind {
            WalHealKind::Full => "FULL",
            WalHealKind::FullThenTruncate => "FULL+TRUNCATE",
            WalHealKind::TruncateAfterFullError => "TRUNCATE (after FULL error)",
        }
    }
}

#[derive(Clone, Copy)]
enum WalHealKind {
    Full,
    FullThenTruncate,
    TruncateAfterFullError,
}

async fn attempt_wal_self_heal(conn: &mut PoolConnection<Sqlite>) -> Result<WalHealSummary> {
    match sqlx::query_as::<_, (i64, i64, i64)>("PRAGMA wal_checkpoint(FULL);")
        .fetch_one(conn.as_mut())
        .await
    {
        Ok((_, frames_after_full, _)) => {
            if frames_after_full > 0 {
                sqlx::query_as::<_, (i64, i64, i64)>("PRAGMA wal_checkpoint(TRUNCATE);")
                    .fetch_one(conn.as_mut())
                    .await?;
                Ok(WalHealSummary {
                    kind: WalHealKind::FullThenTruncate,
                    full_error: None,
                })
            } else {
                Ok(WalHealSummary {
                    kind: WalHealKind::Full,
                    full_error: None,
                })
            }
        }
        Err(err) => {
            sqlx::query_as::<_, (i64, i64, i64)>("PRAGMA wal_checkpoint(TRUNCATE);")
                .fetch_one(conn.as_mut())
                .await?;
            Ok(WalHealSummary {
                kind: WalHealKind::TruncateAfterFullError,
                full_error: Some(err.to_string()),
            })
        }
    }
}

fn inspect_wal_file(db_path: &Path, page_size: i64) -> WalState {
    let wal_path = wal_path(db_path);
    match std::fs::metadata(&wal_path) {
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => WalState {
            passed: true,
            details: "wal=absent".to_string(),
            healable: false,
        },
        Err(err) => WalState {
            passed: false,
            details: format!("wal metadata error: {err}"),
            healable: false,
        },
        Ok(meta) => {
            let len = meta.len();
            if len == 0 {
                return WalState {
                    passed: true,
                    details: "wal=empty".to_string(),
                    healable: false,
                };
            }
            if len < 32 {
                return WalState {
                    passed: false,
                    details: format!("wal too small: {len} bytes"),
                    healable: true,
                };
            }

            let mut header = [0u8; 32];
            if let Err(err) = File::open(&wal_path).and_then(|mut f| f.read_exact(&mut header)) {
                return WalState {
                    passed: false,
                    details: format!("wal read error: {err}"),
                    healable: false,
                };
            }

            if &header[0..4] != WAL_HEADER_MAGIC {
                return WalState {
                    passed: false,
                    details: "wal magic header mismatch".to_string(),
                    healable: true,
                };
            }

            let wal_page_size = u32::from_be_bytes([header[8], header[9], header[10], header[11]]);
            let wal_page_size = match wal_page_size {
                0 | 1 => page_size as u32,
                value => value,
            } as i64;

            if wal_page_size != page_size {
                return WalState {
                    passed: false,
                    details: format!(
                        "wal page size mismatch: expected {page_size}, header {wal_page_size}"
                    ),
                    healable: false,
                };
            }

            let frame_size = (wal_page_size as u64) + 24;
            let payload = len - 32;
            if payload % frame_size != 0 {
                return WalState {
                    passed: false,
                    details: format!("wal size misaligned: len={len}, frame_size={frame_size}"),
                    healable: true,
                };
            }
            let frames = payload / frame_size;
            WalState {
                passed: true,
                details: format!("wal frames={frames}"),
                healable: false,
            }
        }
    }
}

fn wal_path(db_path: &Path) -> PathBuf {
    let mut os_string = db_path.as_os_str().to_os_string();
    os_string.push("-wal");
    PathBuf::from(os_string)
}
