use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sqlx::{sqlite::SqliteRow, Column, Row, SqlitePool, TypeInfo, ValueRef};
use tracing::{info, warn};

use crate::db::DOMAIN_TABLES;
use crate::{AppError, AppResult};

const EXPORT_FILE_PREFIX: &str = "lawdesk-export-";

/// One self-contained JSON document holding every domain table. The format
/// is deliberately plain (a map of table name to row objects) so an export
/// can be inspected and diffed with ordinary tools.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportDocument {
    pub generated_at: String,
    pub app_version: String,
    pub schema_hash: String,
    pub tables: BTreeMap<String, Vec<Value>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExportSummary {
    pub path: String,
    pub generated_at: String,
    pub table_counts: BTreeMap<String, u64>,
    pub total_rows: u64,
    pub size_bytes: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RestoreSummary {
    pub path: String,
    pub generated_at: String,
    pub table_counts: BTreeMap<String, u64>,
    pub total_rows: u64,
}

/// Dump every domain table, ordered by id, into
/// `<out_parent>/lawdesk-export-<stamp>[-NN].json`.
pub async fn create_export(pool: &SqlitePool, out_parent: &Path) -> AppResult<ExportSummary> {
    fs::create_dir_all(out_parent).map_err(|err| {
        AppError::from(err)
            .with_context("operation", "create_out_parent")
            .with_context("path", out_parent.display().to_string())
    })?;

    let schema_hash = crate::db::live_schema_hash(pool)
        .await
        .map_err(|err| AppError::from(err).with_context("operation", "schema_hash"))?;

    let mut tables: BTreeMap<String, Vec<Value>> = BTreeMap::new();
    let mut table_counts: BTreeMap<String, u64> = BTreeMap::new();
    let mut total_rows = 0_u64;
    for table in DOMAIN_TABLES {
        let rows = sqlx::query(&format!("SELECT * FROM {table} ORDER BY id"))
            .fetch_all(pool)
            .await
            .map_err(|err| {
                AppError::from(err)
                    .with_context("operation", "dump_table")
                    .with_context("table", table.to_string())
            })?;
        let values: Vec<Value> = rows.into_iter().map(row_to_value).collect();
        table_counts.insert(table.to_string(), values.len() as u64);
        total_rows += values.len() as u64;
        tables.insert(table.to_string(), values);
    }

    let generated_at = crate::time::fmt_ms(crate::time::now_ms());
    let doc = ExportDocument {
        generated_at: generated_at.clone(),
        app_version: env!("CARGO_PKG_VERSION").to_string(),
        schema_hash,
        tables,
    };

    let path = unique_export_path(out_parent)?;
    let payload = serde_json::to_vec_pretty(&doc)
        .map_err(|err| AppError::from(err).with_context("operation", "serialize_export"))?;
    crate::db::write_atomic(&path, &payload).map_err(|err| {
        AppError::from(err)
            .with_context("operation", "write_export")
            .with_context("path", path.display().to_string())
    })?;

    info!(
        target: "lawdesk",
        event = "export_created",
        path = %path.display(),
        rows = total_rows,
        "Exported domain tables"
    );

    Ok(ExportSummary {
        path: path.to_string_lossy().into_owned(),
        generated_at,
        table_counts,
        total_rows,
        size_bytes: payload.len() as u64,
    })
}

/// Parse an export file and refuse it outright if it names a table this
/// application does not own.
pub fn read_export(path: &Path) -> AppResult<ExportDocument> {
    let bytes = fs::read(path).map_err(|err| {
        AppError::from(err)
            .with_context("operation", "read_export")
            .with_context("path", path.display().to_string())
    })?;
    let doc: ExportDocument = serde_json::from_slice(&bytes).map_err(|err| {
        AppError::from(err)
            .with_context("operation", "parse_export")
            .with_context("path", path.display().to_string())
    })?;
    for table in doc.tables.keys() {
        if !DOMAIN_TABLES.contains(&table.as_str()) {
            return Err(AppError::new(
                "EXPORT/UNKNOWN_TABLE",
                "Export file contains an unknown table",
            )
            .with_context("table", table.clone())
            .with_context("path", path.display().to_string()));
        }
    }
    Ok(doc)
}

/// Replace the full domain state with the contents of an export file.
///
/// Runs in one transaction: children are cleared before parents, rows are
/// re-inserted parents-first, and per-table counts are verified before
/// commit. A table absent from the file is restored as empty.
pub async fn restore(pool: &SqlitePool, path: &Path) -> AppResult<RestoreSummary> {
    let doc = read_export(path)?;

    let live_hash = crate::db::live_schema_hash(pool).await.unwrap_or_default();
    if !doc.schema_hash.is_empty() && doc.schema_hash != live_hash {
        warn!(
            target: "lawdesk",
            event = "restore_schema_mismatch",
            file_hash = %doc.schema_hash,
            live_hash = %live_hash,
            "Export was taken against a different schema"
        );
    }

    let mut tx = pool.begin().await.map_err(AppError::from)?;

    for table in DOMAIN_TABLES.iter().rev() {
        sqlx::query(&format!("DELETE FROM {table}"))
            .execute(&mut *tx)
            .await
            .map_err(|err| {
                AppError::from(err)
                    .with_context("operation", "clear_table")
                    .with_context("table", table.to_string())
            })?;
    }

    let mut table_counts: BTreeMap<String, u64> = BTreeMap::new();
    let mut total_rows = 0_u64;
    for table in DOMAIN_TABLES {
        let rows = doc.tables.get(table).map(Vec::as_slice).unwrap_or(&[]);
        for row in rows {
            insert_row(&mut tx, table, row).await?;
        }
        let count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table}"))
            .fetch_one(&mut *tx)
            .await
            .map_err(|err| {
                AppError::from(err)
                    .with_context("operation", "verify_count")
                    .with_context("table", table.to_string())
            })?;
        if count as u64 != rows.len() as u64 {
            return Err(AppError::new(
                "EXPORT/COUNT_MISMATCH",
                "Restored row count does not match the export file",
            )
            .with_context("table", table.to_string())
            .with_context("expected", rows.len().to_string())
            .with_context("actual", count.to_string()));
        }
        table_counts.insert(table.to_string(), count as u64);
        total_rows += count as u64;
    }

    tx.commit().await.map_err(AppError::from)?;

    info!(
        target: "lawdesk",
        event = "restore_complete",
        path = %path.display(),
        rows = total_rows,
        "Restored domain tables from export"
    );

    Ok(RestoreSummary {
        path: path.to_string_lossy().into_owned(),
        generated_at: doc.generated_at,
        table_counts,
        total_rows,
    })
}

async fn insert_row(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    table: &str,
    row: &Value,
) -> AppResult<()> {
    let Value::Object(data) = row else {
        return Err(
            AppError::new("EXPORT/MALFORMED_ROW", "Export row is not a JSON object")
                .with_context("table", table.to_string()),
        );
    };

    let mut names: Vec<&str> = Vec::with_capacity(data.len());
    for key in data.keys() {
        if !is_identifier(key) {
            return Err(AppError::new(
                "EXPORT/MALFORMED_ROW",
                "Export row has an invalid column name",
            )
            .with_context("table", table.to_string())
            .with_context("column", key.clone()));
        }
        names.push(key.as_str());
    }

    let placeholders: Vec<&str> = names.iter().map(|_| "?").collect();
    let sql = format!(
        "INSERT INTO {table} ({}) VALUES ({})",
        names.join(","),
        placeholders.join(",")
    );
    let mut query = sqlx::query(&sql);
    for value in data.values() {
        query = bind_value(query, value);
    }
    query.execute(&mut **tx).await.map_err(|err| {
        AppError::from(err)
            .with_context("operation", "restore_insert")
            .with_context("table", table.to_string())
    })?;
    Ok(())
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn row_to_value(row: SqliteRow) -> Value {
    let mut map = Map::new();
    for col in row.columns() {
        let idx = col.ordinal();
        let v = row.try_get_raw(idx).ok();
        let val = match v {
            Some(raw) => {
                if raw.is_null() {
                    Value::Null
                } else {
                    match raw.type_info().name() {
                        "INTEGER" => row
                            .try_get::<i64, _>(idx)
                            .map(Value::from)
                            .unwrap_or(Value::Null),
                        "REAL" => row
                            .try_get::<f64, _>(idx)
                            .map(Value::from)
                            .unwrap_or(Value::Null),
                        _ => row
                            .try_get::<String, _>(idx)
                            .map(Value::from)
                            .unwrap_or(Value::Null),
                    }
                }
            }
            None => Value::Null,
        };
        map.insert(col.name().to_string(), val);
    }
    Value::Object(map)
}

fn bind_value<'q>(
    q: sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>>,
    v: &Value,
) -> sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>> {
    match v {
        Value::Null => q.bind(Option::<i64>::None),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                q.bind(i)
            } else if let Some(f) = n.as_f64() {
                q.bind(f)
            } else {
                q.bind(Option::<i64>::None)
            }
        }
        Value::Bool(b) => q.bind(*b as i64),
        Value::String(s) => q.bind(s.clone()),
        _ => q.bind(v.to_string()),
    }
}

fn unique_export_path(root: &Path) -> AppResult<PathBuf> {
    let base = format!(
        "{EXPORT_FILE_PREFIX}{}",
        crate::time::stamp(crate::time::now_ms())
    );
    for suffix in 0..100 {
        let candidate = if suffix == 0 {
            root.join(format!("{base}.json"))
        } else {
            root.join(format!("{base}-{suffix:02}.json"))
        };
        if !candidate.exists() {
            return Ok(candidate);
        }
    }
    Err(AppError::new(
        "EXPORT/NAME_COLLISION",
        "Unable to allocate export file name",
    ))
}
