//! Client records: the people (or companies) the office represents.

use sqlx::SqlitePool;

use crate::model::Client;
use crate::{AppError, AppResult};

use super::{bind_args, map_unique, optional, required, Arg};

#[derive(Debug, Clone, Default, serde::Deserialize)]
#[serde(default)]
pub struct NewClient {
    pub first_name: String,
    pub last_name: String,
    pub national_id: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub address: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
#[serde(default)]
pub struct ClientPatch {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    #[serde(deserialize_with = "super::double_option")]
    pub national_id: Option<Option<String>>,
    #[serde(deserialize_with = "super::double_option")]
    pub phone: Option<Option<String>>,
    #[serde(deserialize_with = "super::double_option")]
    pub email: Option<Option<String>>,
    #[serde(deserialize_with = "super::double_option")]
    pub address: Option<Option<String>>,
    #[serde(deserialize_with = "super::double_option")]
    pub notes: Option<Option<String>>,
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
#[serde(default)]
pub struct ClientFilter {
    /// Matches first name, last name, or national id, substring style.
    pub search: Option<String>,
}

pub async fn create(pool: &SqlitePool, input: NewClient) -> AppResult<Client> {
    let now = crate::time::now_ms();
    let client = Client {
        id: crate::id::new_uuid_v7(),
        first_name: required("first_name", &input.first_name)?,
        last_name: required("last_name", &input.last_name)?,
        national_id: optional(input.national_id),
        phone: optional(input.phone),
        email: optional(input.email),
        address: optional(input.address),
        notes: optional(input.notes),
        created_at: now,
        updated_at: now,
    };
    sqlx::query(
        "INSERT INTO clients \
         (id, first_name, last_name, national_id, phone, email, address, notes, created_at, updated_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
    )
    .bind(&client.id)
    .bind(&client.first_name)
    .bind(&client.last_name)
    .bind(&client.national_id)
    .bind(&client.phone)
    .bind(&client.email)
    .bind(&client.address)
    .bind(&client.notes)
    .bind(client.created_at)
    .bind(client.updated_at)
    .execute(pool)
    .await
    .map_err(|err| map_unique(err, "national_id"))?;
    tracing::debug!(target: "lawdesk", event = "client_created", id = client.id.as_str());
    Ok(client)
}

pub async fn get(pool: &SqlitePool, id: &str) -> AppResult<Option<Client>> {
    let client = sqlx::query_as::<_, Client>("SELECT * FROM clients WHERE id = ?1")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(client)
}

/// Clients in directory order: last name, then first name, case-insensitive.
pub async fn list(pool: &SqlitePool, filter: &ClientFilter) -> AppResult<Vec<Client>> {
    let mut sql = String::from("SELECT * FROM clients");
    let mut binds: Vec<Arg> = Vec::new();

    if let Some(term) = filter
        .search
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
    {
        binds.push(Arg::Text(format!("%{term}%")));
        sql.push_str(" WHERE first_name LIKE ?1 OR last_name LIKE ?1 OR national_id LIKE ?1");
    }
    sql.push_str(" ORDER BY last_name COLLATE NOCASE, first_name COLLATE NOCASE, id");

    let query = sqlx::query_as::<_, Client>(&sql);
    Ok(bind_args(query, &binds).fetch_all(pool).await?)
}

pub async fn update(pool: &SqlitePool, id: &str, patch: ClientPatch) -> AppResult<Option<Client>> {
    let Some(mut client) = get(pool, id).await? else {
        return Ok(None);
    };
    if let Some(v) = patch.first_name {
        client.first_name = required("first_name", &v)?;
    }
    if let Some(v) = patch.last_name {
        client.last_name = required("last_name", &v)?;
    }
    if let Some(v) = patch.national_id {
        client.national_id = optional(v);
    }
    if let Some(v) = patch.phone {
        client.phone = optional(v);
    }
    if let Some(v) = patch.email {
        client.email = optional(v);
    }
    if let Some(v) = patch.address {
        client.address = optional(v);
    }
    if let Some(v) = patch.notes {
        client.notes = optional(v);
    }
    client.updated_at = crate::time::now_ms();

    sqlx::query(
        "UPDATE clients SET first_name = ?1, last_name = ?2, national_id = ?3, phone = ?4, \
         email = ?5, address = ?6, notes = ?7, updated_at = ?8 WHERE id = ?9",
    )
    .bind(&client.first_name)
    .bind(&client.last_name)
    .bind(&client.national_id)
    .bind(&client.phone)
    .bind(&client.email)
    .bind(&client.address)
    .bind(&client.notes)
    .bind(client.updated_at)
    .bind(id)
    .execute(pool)
    .await
    .map_err(|err| map_unique(err, "national_id"))?;
    tracing::debug!(target: "lawdesk", event = "client_updated", id);
    Ok(Some(client))
}

/// Fails with `CLIENT/HAS_CASES` while cases still reference the client;
/// their documents go with them through the `ON DELETE CASCADE` rule.
pub async fn delete(pool: &SqlitePool, id: &str) -> AppResult<bool> {
    let mut tx = pool.begin().await?;
    let case_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM cases WHERE client_id = ?1")
        .bind(id)
        .fetch_one(&mut *tx)
        .await?;
    if case_count > 0 {
        return Err(AppError::new(
            "CLIENT/HAS_CASES",
            "Client still has cases on file; close or delete them first.",
        )
        .with_context("client_id", id.to_string())
        .with_context("case_count", case_count.to_string()));
    }
    let result = sqlx::query("DELETE FROM clients WHERE id = ?1")
        .bind(id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;
    let deleted = result.rows_affected() > 0;
    if deleted {
        tracing::debug!(target: "lawdesk", event = "client_deleted", id);
    }
    Ok(deleted)
}
