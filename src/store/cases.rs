//! Case files. Every case belongs to a client; documents, appointments, and
//! invoices hang off it with `ON DELETE SET NULL`, so closing out a case
//! never takes the paperwork with it.

use chrono::Datelike;
use sqlx::SqlitePool;

use crate::model::{Case, CaseStatus};
use crate::AppResult;

use super::{
    bind_args, is_unique_on, map_unique, optional, parse_or_default, required, Arg,
};

#[derive(Debug, Clone, Default, serde::Deserialize)]
#[serde(default)]
pub struct NewCase {
    /// Court-issued number; generated as `C<year>-NNNN` when omitted.
    pub case_number: Option<String>,
    pub title: String,
    pub case_type: Option<String>,
    pub status: Option<String>,
    pub description: Option<String>,
    pub court_name: Option<String>,
    pub judge_name: Option<String>,
    pub next_hearing_date: Option<i64>,
    pub client_id: String,
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
#[serde(default)]
pub struct CasePatch {
    pub case_number: Option<String>,
    pub title: Option<String>,
    #[serde(deserialize_with = "super::double_option")]
    pub case_type: Option<Option<String>>,
    pub status: Option<String>,
    #[serde(deserialize_with = "super::double_option")]
    pub description: Option<Option<String>>,
    #[serde(deserialize_with = "super::double_option")]
    pub court_name: Option<Option<String>>,
    #[serde(deserialize_with = "super::double_option")]
    pub judge_name: Option<Option<String>>,
    #[serde(deserialize_with = "super::double_option")]
    pub next_hearing_date: Option<Option<i64>>,
    pub client_id: Option<String>,
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
#[serde(default)]
pub struct CaseFilter {
    pub status: Option<String>,
    pub client_id: Option<String>,
    /// Matches case number or title, substring style.
    pub search: Option<String>,
}

pub async fn create(pool: &SqlitePool, input: NewCase) -> AppResult<Case> {
    let now = crate::time::now_ms();
    let explicit_number = optional(input.case_number);
    let case = Case {
        id: crate::id::new_uuid_v7(),
        case_number: String::new(),
        title: required("title", &input.title)?,
        case_type: optional(input.case_type),
        status: parse_or_default::<CaseStatus>(input.status.as_deref())?,
        description: optional(input.description),
        court_name: optional(input.court_name),
        judge_name: optional(input.judge_name),
        next_hearing_date: input.next_hearing_date,
        client_id: required("client_id", &input.client_id)?,
        created_at: now,
        updated_at: now,
    };
    // A generated number can lose a race to a concurrent insert; one retry
    // picks up the next free sequence.
    match insert_attempt(pool, case.clone(), explicit_number.clone()).await {
        Err(err) if explicit_number.is_none() && is_unique_on(&err, "case_number") => {
            insert_attempt(pool, case, None).await
        }
        other => other,
    }
}

async fn insert_attempt(
    pool: &SqlitePool,
    mut case: Case,
    explicit_number: Option<String>,
) -> AppResult<Case> {
    let mut tx = pool.begin().await?;
    case.case_number = match explicit_number {
        Some(number) => number,
        None => {
            let year = crate::time::to_date(case.created_at).year();
            super::next_numbered(&mut tx, "cases", "case_number", &format!("C{year}-")).await?
        }
    };
    sqlx::query(
        "INSERT INTO cases \
         (id, case_number, title, case_type, status, description, court_name, judge_name, \
          next_hearing_date, client_id, created_at, updated_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
    )
    .bind(&case.id)
    .bind(&case.case_number)
    .bind(&case.title)
    .bind(&case.case_type)
    .bind(case.status)
    .bind(&case.description)
    .bind(&case.court_name)
    .bind(&case.judge_name)
    .bind(case.next_hearing_date)
    .bind(&case.client_id)
    .bind(case.created_at)
    .bind(case.updated_at)
    .execute(&mut *tx)
    .await
    .map_err(|err| map_unique(err, "case_number"))?;
    tx.commit().await?;
    tracing::debug!(
        target: "lawdesk",
        event = "case_created",
        id = case.id.as_str(),
        case_number = case.case_number.as_str(),
    );
    Ok(case)
}

pub async fn get(pool: &SqlitePool, id: &str) -> AppResult<Option<Case>> {
    let case = sqlx::query_as::<_, Case>("SELECT * FROM cases WHERE id = ?1")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(case)
}

/// Newest cases first.
pub async fn list(pool: &SqlitePool, filter: &CaseFilter) -> AppResult<Vec<Case>> {
    let mut sql = String::from("SELECT * FROM cases");
    let mut clauses: Vec<String> = Vec::new();
    let mut binds: Vec<Arg> = Vec::new();

    if let Some(raw) = filter
        .status
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
    {
        let status: CaseStatus = raw.parse()?;
        binds.push(Arg::Text(status.as_str().to_string()));
        clauses.push(format!("status = ?{}", binds.len()));
    }
    if let Some(client_id) = filter
        .client_id
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
    {
        binds.push(Arg::Text(client_id.to_string()));
        clauses.push(format!("client_id = ?{}", binds.len()));
    }
    if let Some(term) = filter
        .search
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
    {
        binds.push(Arg::Text(format!("%{term}%")));
        let n = binds.len();
        clauses.push(format!("(case_number LIKE ?{n} OR title LIKE ?{n})"));
    }
    if !clauses.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&clauses.join(" AND "));
    }
    sql.push_str(" ORDER BY created_at DESC, id DESC");

    let query = sqlx::query_as::<_, Case>(&sql);
    Ok(bind_args(query, &binds).fetch_all(pool).await?)
}

pub async fn update(pool: &SqlitePool, id: &str, patch: CasePatch) -> AppResult<Option<Case>> {
    let Some(mut case) = get(pool, id).await? else {
        return Ok(None);
    };
    if let Some(v) = patch.case_number {
        case.case_number = required("case_number", &v)?;
    }
    if let Some(v) = patch.title {
        case.title = required("title", &v)?;
    }
    if let Some(v) = patch.case_type {
        case.case_type = optional(v);
    }
    if let Some(v) = patch.status {
        case.status = required("status", &v)?.parse()?;
    }
    if let Some(v) = patch.description {
        case.description = optional(v);
    }
    if let Some(v) = patch.court_name {
        case.court_name = optional(v);
    }
    if let Some(v) = patch.judge_name {
        case.judge_name = optional(v);
    }
    if let Some(v) = patch.next_hearing_date {
        case.next_hearing_date = v;
    }
    if let Some(v) = patch.client_id {
        case.client_id = required("client_id", &v)?;
    }
    case.updated_at = crate::time::now_ms();

    sqlx::query(
        "UPDATE cases SET case_number = ?1, title = ?2, case_type = ?3, status = ?4, \
         description = ?5, court_name = ?6, judge_name = ?7, next_hearing_date = ?8, \
         client_id = ?9, updated_at = ?10 WHERE id = ?11",
    )
    .bind(&case.case_number)
    .bind(&case.title)
    .bind(&case.case_type)
    .bind(case.status)
    .bind(&case.description)
    .bind(&case.court_name)
    .bind(&case.judge_name)
    .bind(case.next_hearing_date)
    .bind(&case.client_id)
    .bind(case.updated_at)
    .bind(id)
    .execute(pool)
    .await
    .map_err(|err| map_unique(err, "case_number"))?;
    tracing::debug!(target: "lawdesk", event = "case_updated", id);
    Ok(Some(case))
}

pub async fn delete(pool: &SqlitePool, id: &str) -> AppResult<bool> {
    let result = sqlx::query("DELETE FROM cases WHERE id = ?1")
        .bind(id)
        .execute(pool)
        .await?;
    let deleted = result.rows_affected() > 0;
    if deleted {
        tracing::debug!(target: "lawdesk", event = "case_deleted", id);
    }
    Ok(deleted)
}
