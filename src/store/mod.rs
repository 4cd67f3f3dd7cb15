//! Typed persistence for the domain tables.
//!
//! One module per entity, each exposing `create / get / list / update /
//! delete` free functions over the pool. Input structs deserialize straight
//! from request bodies; enum-valued fields arrive as strings and are parsed
//! here so a bad value reports `VALIDATION/ENUM` instead of a decode error.
//!
//! Patch structs follow one rule: an absent field is left unchanged, `null`
//! clears a nullable column, a value sets it. Every successful update
//! restamps `updated_at`.

use serde::{Deserialize, Deserializer};
use sqlx::sqlite::SqliteArguments;
use sqlx::Sqlite;

use crate::{AppError, AppResult};

pub mod appointments;
pub mod cases;
pub mod clients;
pub mod documents;
pub mod invoices;
pub mod users;

pub(crate) fn required(field: &'static str, value: &str) -> AppResult<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(
            AppError::new("VALIDATION/REQUIRED", format!("{field} must not be empty"))
                .with_context("field", field),
        );
    }
    Ok(trimmed.to_string())
}

pub(crate) fn required_ms(field: &'static str, value: i64) -> AppResult<i64> {
    if value <= 0 {
        return Err(
            AppError::new("VALIDATION/REQUIRED", format!("{field} must be set"))
                .with_context("field", field),
        );
    }
    Ok(value)
}

/// Trim an optional text field; blank strings collapse to `NULL`.
pub(crate) fn optional(value: Option<String>) -> Option<String> {
    value.and_then(|v| {
        let trimmed = v.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

pub(crate) fn non_negative(field: &'static str, value: i64) -> AppResult<i64> {
    if value < 0 {
        return Err(
            AppError::new("VALIDATION/RANGE", format!("{field} must not be negative"))
                .with_context("field", field)
                .with_context("value", value.to_string()),
        );
    }
    Ok(value)
}

pub(crate) fn positive(field: &'static str, value: i64) -> AppResult<i64> {
    if value <= 0 {
        return Err(
            AppError::new("VALIDATION/RANGE", format!("{field} must be positive"))
                .with_context("field", field)
                .with_context("value", value.to_string()),
        );
    }
    Ok(value)
}

/// Parse an enum-valued field, falling back to the enum's default when the
/// field is blank or absent.
pub(crate) fn parse_or_default<T>(value: Option<&str>) -> AppResult<T>
where
    T: std::str::FromStr + Default,
    AppError: From<T::Err>,
{
    match value.map(str::trim).filter(|s| !s.is_empty()) {
        Some(raw) => Ok(raw.parse::<T>()?),
        None => Ok(T::default()),
    }
}

/// Distinguishes "field absent" from "field set to null" in patch bodies.
pub(crate) fn double_option<'de, T, D>(de: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Deserialize::deserialize(de).map(Some)
}

pub(crate) fn map_unique(err: sqlx::Error, column: &'static str) -> AppError {
    let app = AppError::from(err);
    if app.code() == "SQLX/UNIQUE" {
        app.with_context("column", column)
    } else {
        app
    }
}

pub(crate) fn is_unique_on(err: &AppError, column: &str) -> bool {
    err.code() == "SQLX/UNIQUE"
        && err.context().get("column").map(String::as_str) == Some(column)
}

/// Bind argument for a dynamically assembled listing query.
pub(crate) enum Arg {
    Text(String),
    Int(i64),
}

pub(crate) fn bind_args<'q, T>(
    mut query: sqlx::query::QueryAs<'q, Sqlite, T, SqliteArguments<'q>>,
    args: &'q [Arg],
) -> sqlx::query::QueryAs<'q, Sqlite, T, SqliteArguments<'q>> {
    for arg in args {
        query = match arg {
            Arg::Text(value) => query.bind(value.as_str()),
            Arg::Int(value) => query.bind(*value),
        };
    }
    query
}

/// Next sequential number for `C<year>-NNNN` / `INV-<year>-NNNN` style
/// columns, scanning the current maximum inside the caller's transaction.
pub(crate) async fn next_numbered(
    tx: &mut sqlx::Transaction<'_, Sqlite>,
    table: &'static str,
    column: &'static str,
    prefix: &str,
) -> AppResult<String> {
    let sql = format!(
        "SELECT {column} FROM {table} WHERE {column} LIKE ?1 ORDER BY {column} DESC LIMIT 1"
    );
    let last: Option<String> = sqlx::query_scalar(&sql)
        .bind(format!("{prefix}%"))
        .fetch_optional(&mut **tx)
        .await?;
    let next = last
        .as_deref()
        .and_then(|value| value.rsplit('-').next())
        .and_then(|digits| digits.parse::<i64>().ok())
        .unwrap_or(0)
        + 1;
    Ok(format!("{prefix}{next:04}"))
}
