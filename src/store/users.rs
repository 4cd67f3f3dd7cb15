//! Staff accounts. Roles gate nothing here (there is no login layer); they
//! exist so the office can record who a matter is assigned to.

use sqlx::SqlitePool;

use crate::model::{User, UserRole};
use crate::AppResult;

use super::{map_unique, required};

#[derive(Debug, Clone, Default, serde::Deserialize)]
#[serde(default)]
pub struct NewUser {
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub role: String,
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
#[serde(default)]
pub struct UserPatch {
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub role: Option<String>,
}

pub async fn create(pool: &SqlitePool, input: NewUser) -> AppResult<User> {
    let now = crate::time::now_ms();
    let role: UserRole = required("role", &input.role)?.parse()?;
    let user = User {
        id: crate::id::new_uuid_v7(),
        username: required("username", &input.username)?,
        first_name: required("first_name", &input.first_name)?,
        last_name: required("last_name", &input.last_name)?,
        role,
        created_at: now,
        updated_at: now,
    };
    sqlx::query(
        "INSERT INTO users (id, username, first_name, last_name, role, created_at, updated_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
    )
    .bind(&user.id)
    .bind(&user.username)
    .bind(&user.first_name)
    .bind(&user.last_name)
    .bind(user.role)
    .bind(user.created_at)
    .bind(user.updated_at)
    .execute(pool)
    .await
    .map_err(|err| map_unique(err, "username"))?;
    tracing::debug!(target: "lawdesk", event = "user_created", id = user.id.as_str());
    Ok(user)
}

pub async fn get(pool: &SqlitePool, id: &str) -> AppResult<Option<User>> {
    let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = ?1")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(user)
}

pub async fn list(pool: &SqlitePool) -> AppResult<Vec<User>> {
    let users = sqlx::query_as::<_, User>("SELECT * FROM users ORDER BY username COLLATE NOCASE")
        .fetch_all(pool)
        .await?;
    Ok(users)
}

pub async fn update(pool: &SqlitePool, id: &str, patch: UserPatch) -> AppResult<Option<User>> {
    let Some(mut user) = get(pool, id).await? else {
        return Ok(None);
    };
    if let Some(v) = patch.username {
        user.username = required("username", &v)?;
    }
    if let Some(v) = patch.first_name {
        user.first_name = required("first_name", &v)?;
    }
    if let Some(v) = patch.last_name {
        user.last_name = required("last_name", &v)?;
    }
    if let Some(v) = patch.role {
        user.role = required("role", &v)?.parse()?;
    }
    user.updated_at = crate::time::now_ms();

    sqlx::query(
        "UPDATE users SET username = ?1, first_name = ?2, last_name = ?3, role = ?4, \
         updated_at = ?5 WHERE id = ?6",
    )
    .bind(&user.username)
    .bind(&user.first_name)
    .bind(&user.last_name)
    .bind(user.role)
    .bind(user.updated_at)
    .bind(id)
    .execute(pool)
    .await
    .map_err(|err| map_unique(err, "username"))?;
    tracing::debug!(target: "lawdesk", event = "user_updated", id);
    Ok(Some(user))
}

pub async fn delete(pool: &SqlitePool, id: &str) -> AppResult<bool> {
    let result = sqlx::query("DELETE FROM users WHERE id = ?1")
        .bind(id)
        .execute(pool)
        .await?;
    let deleted = result.rows_affected() > 0;
    if deleted {
        tracing::debug!(target: "lawdesk", event = "user_deleted", id);
    }
    Ok(deleted)
}

/// Seed the standing admin account on a fresh database.
pub async fn ensure_admin_user(pool: &SqlitePool) -> AppResult<Option<User>> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users")
        .fetch_one(pool)
        .await?;
    if count > 0 {
        return Ok(None);
    }
    let admin = create(
        pool,
        NewUser {
            username: "admin".into(),
            first_name: "System".into(),
            last_name: "Administrator".into(),
            role: UserRole::Admin.as_str().into(),
        },
    )
    .await?;
    tracing::info!(
        target: "lawdesk",
        event = "admin_user_seeded",
        id = admin.id.as_str(),
    );
    Ok(Some(admin))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::testutil::test_pool;
    use tempfile::tempdir;

    #[tokio::test]
    async fn create_parses_role_and_enforces_unique_username() {
        let dir = tempdir().expect("tempdir");
        let pool = test_pool(dir.path()).await;

        let user = create(
            &pool,
            NewUser {
                username: "mkhalil".into(),
                first_name: "Mona".into(),
                last_name: "Khalil".into(),
                role: "lawyer".into(),
            },
        )
        .await
        .expect("create user");
        assert_eq!(user.role, UserRole::Lawyer);

        let err = create(
            &pool,
            NewUser {
                username: "mkhalil".into(),
                first_name: "Mia".into(),
                last_name: "Khalil".into(),
                role: "secretary".into(),
            },
        )
        .await
        .expect_err("duplicate username rejected");
        assert_eq!(err.code(), "SQLX/UNIQUE");
        assert_eq!(err.context().get("column"), Some(&"username".to_string()));

        let err = create(
            &pool,
            NewUser {
                username: "other".into(),
                first_name: "A".into(),
                last_name: "B".into(),
                role: "janitor".into(),
            },
        )
        .await
        .expect_err("unknown role rejected");
        assert_eq!(err.code(), "VALIDATION/ENUM");
    }

    #[tokio::test]
    async fn ensure_admin_seeds_empty_table_once() {
        let dir = tempdir().expect("tempdir");
        let pool = test_pool(dir.path()).await;

        let seeded = ensure_admin_user(&pool).await.expect("seed admin");
        let admin = seeded.expect("admin created");
        assert_eq!(admin.username, "admin");
        assert_eq!(admin.role, UserRole::Admin);

        assert!(ensure_admin_user(&pool)
            .await
            .expect("second call")
            .is_none());
        assert_eq!(list(&pool).await.expect("list").len(), 1);
    }

    #[tokio::test]
    async fn update_changes_role_in_place() {
        let dir = tempdir().expect("tempdir");
        let pool = test_pool(dir.path()).await;

        let user = create(
            &pool,
            NewUser {
                username: "afarouk".into(),
                first_name: "Ali".into(),
                last_name: "Farouk".into(),
                role: "secretary".into(),
            },
        )
        .await
        .expect("create user");

        let patch: UserPatch = serde_json::from_str(r#"{"role": "admin"}"#).expect("parse patch");
        let updated = update(&pool, &user.id, patch)
            .await
            .expect("update")
            .expect("user exists");
        assert_eq!(updated.role, UserRole::Admin);
        assert_eq!(updated.username, "afarouk");

        assert!(delete(&pool, &user.id).await.expect("delete"));
        assert!(!delete(&pool, &user.id).await.expect("delete again"));
    }
}
