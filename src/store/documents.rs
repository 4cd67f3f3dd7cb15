//! Client paperwork metadata. Rows point at files under the uploads root by
//! stored name; the name must clear the uploads guard before it is ever
//! written to the database, and deleting a row takes the file with it.

use sqlx::SqlitePool;

use crate::model::{ClientDocument, DocumentType};
use crate::uploads::UploadStore;
use crate::AppResult;

use super::{bind_args, map_unique, optional, required, Arg};

#[derive(Debug, Clone, Default, serde::Deserialize)]
#[serde(default)]
pub struct NewDocument {
    pub document_type: String,
    pub description: Option<String>,
    /// Defaults to `YYYYMMDD_HHMMSS_<sanitized original>`.
    pub stored_name: Option<String>,
    pub original_name: String,
    /// Snapshotted from disk when omitted and the file already exists.
    pub size_bytes: Option<i64>,
    pub client_id: String,
    pub case_id: Option<String>,
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
#[serde(default)]
pub struct DocumentPatch {
    pub document_type: Option<String>,
    #[serde(deserialize_with = "super::double_option")]
    pub description: Option<Option<String>>,
    pub stored_name: Option<String>,
    pub original_name: Option<String>,
    #[serde(deserialize_with = "super::double_option")]
    pub size_bytes: Option<Option<i64>>,
    pub client_id: Option<String>,
    #[serde(deserialize_with = "super::double_option")]
    pub case_id: Option<Option<String>>,
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
#[serde(default)]
pub struct DocumentFilter {
    pub client_id: Option<String>,
    pub case_id: Option<String>,
    pub document_type: Option<String>,
}

pub async fn create(
    pool: &SqlitePool,
    uploads: &UploadStore,
    input: NewDocument,
) -> AppResult<ClientDocument> {
    let now = crate::time::now_ms();
    let document_type: DocumentType = required("document_type", &input.document_type)?.parse()?;
    let original_name = required("original_name", &input.original_name)?;
    let stored_name = match optional(input.stored_name) {
        Some(name) => name,
        None => crate::uploads::stamped_name(&original_name, now),
    };
    let path = uploads.resolve(&stored_name)?;
    let size_bytes = match input.size_bytes {
        Some(v) => Some(v),
        None => std::fs::metadata(&path).ok().map(|meta| meta.len() as i64),
    };
    let document = ClientDocument {
        id: crate::id::new_uuid_v7(),
        document_type,
        description: optional(input.description),
        stored_name,
        original_name,
        size_bytes,
        client_id: required("client_id", &input.client_id)?,
        case_id: optional(input.case_id),
        created_at: now,
        updated_at: now,
    };
    sqlx::query(
        "INSERT INTO client_documents \
         (id, document_type, description, stored_name, original_name, size_bytes, \
          client_id, case_id, created_at, updated_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
    )
    .bind(&document.id)
    .bind(document.document_type)
    .bind(&document.description)
    .bind(&document.stored_name)
    .bind(&document.original_name)
    .bind(document.size_bytes)
    .bind(&document.client_id)
    .bind(&document.case_id)
    .bind(document.created_at)
    .bind(document.updated_at)
    .execute(pool)
    .await
    .map_err(|err| map_unique(err, "stored_name"))?;
    tracing::debug!(
        target: "lawdesk",
        event = "document_created",
        id = document.id.as_str(),
        stored_name = document.stored_name.as_str(),
    );
    Ok(document)
}

pub async fn get(pool: &SqlitePool, id: &str) -> AppResult<Option<ClientDocument>> {
    let document =
        sqlx::query_as::<_, ClientDocument>("SELECT * FROM client_documents WHERE id = ?1")
            .bind(id)
            .fetch_optional(pool)
            .await?;
    Ok(document)
}

/// Most recently added first.
pub async fn list(pool: &SqlitePool, filter: &DocumentFilter) -> AppResult<Vec<ClientDocument>> {
    let mut sql = String::from("SELECT * FROM client_documents");
    let mut clauses: Vec<String> = Vec::new();
    let mut binds: Vec<Arg> = Vec::new();

    if let Some(client_id) = filter
        .client_id
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
    {
        binds.push(Arg::Text(client_id.to_string()));
        clauses.push(format!("client_id = ?{}", binds.len()));
    }
    if let Some(case_id) = filter
        .case_id
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
    {
        binds.push(Arg::Text(case_id.to_string()));
        clauses.push(format!("case_id = ?{}", binds.len()));
    }
    if let Some(raw) = filter
        .document_type
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
    {
        let document_type: DocumentType = raw.parse()?;
        binds.push(Arg::Text(document_type.as_str().to_string()));
        clauses.push(format!("document_type = ?{}", binds.len()));
    }
    if !clauses.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&clauses.join(" AND "));
    }
    sql.push_str(" ORDER BY created_at DESC, id DESC");

    let query = sqlx::query_as::<_, ClientDocument>(&sql);
    Ok(bind_args(query, &binds).fetch_all(pool).await?)
}

pub async fn update(
    pool: &SqlitePool,
    uploads: &UploadStore,
    id: &str,
    patch: DocumentPatch,
) -> AppResult<Option<ClientDocument>> {
    let Some(mut document) = get(pool, id).await? else {
        return Ok(None);
    };
    if let Some(v) = patch.document_type {
        document.document_type = required("document_type", &v)?.parse()?;
    }
    if let Some(v) = patch.description {
        document.description = optional(v);
    }
    if let Some(v) = patch.stored_name {
        let name = required("stored_name", &v)?;
        uploads.resolve(&name)?;
        document.stored_name = name;
    }
    if let Some(v) = patch.original_name {
        document.original_name = required("original_name", &v)?;
    }
    if let Some(v) = patch.size_bytes {
        document.size_bytes = v;
    }
    if let Some(v) = patch.client_id {
        document.client_id = required("client_id", &v)?;
    }
    if let Some(v) = patch.case_id {
        document.case_id = optional(v);
    }
    document.updated_at = crate::time::now_ms();

    sqlx::query(
        "UPDATE client_documents SET document_type = ?1, description = ?2, stored_name = ?3, \
         original_name = ?4, size_bytes = ?5, client_id = ?6, case_id = ?7, updated_at = ?8 \
         WHERE id = ?9",
    )
    .bind(document.document_type)
    .bind(&document.description)
    .bind(&document.stored_name)
    .bind(&document.original_name)
    .bind(document.size_bytes)
    .bind(&document.client_id)
    .bind(&document.case_id)
    .bind(document.updated_at)
    .bind(id)
    .execute(pool)
    .await
    .map_err(|err| map_unique(err, "stored_name"))?;
    tracing::debug!(target: "lawdesk", event = "document_updated", id);
    Ok(Some(document))
}

/// Remove the row, then the file behind it (best effort — a file that is
/// already gone or fails the guard only warns).
pub async fn delete(pool: &SqlitePool, uploads: &UploadStore, id: &str) -> AppResult<bool> {
    let Some(document) = get(pool, id).await? else {
        return Ok(false);
    };
    sqlx::query("DELETE FROM client_documents WHERE id = ?1")
        .bind(id)
        .execute(pool)
        .await?;
    match uploads.resolve(&document.stored_name) {
        Ok(path) => {
            if let Err(err) = std::fs::remove_file(&path) {
                if err.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(
                        target: "lawdesk",
                        event = "document_file_unremoved",
                        id,
                        stored_name = document.stored_name.as_str(),
                        error = %err,
                    );
                }
            }
        }
        Err(err) => {
            tracing::warn!(
                target: "lawdesk",
                event = "document_file_unremoved",
                id,
                stored_name = document.stored_name.as_str(),
                error = %err,
            );
        }
    }
    tracing::debug!(target: "lawdesk", event = "document_deleted", id);
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::testutil::test_pool;
    use tempfile::tempdir;

    async fn seed_client(pool: &SqlitePool) -> String {
        let client = crate::store::clients::create(
            pool,
            crate::store::clients::NewClient {
                first_name: "Layla".into(),
                last_name: "Haddad".into(),
                ..Default::default()
            },
        )
        .await
        .expect("create client");
        client.id
    }

    fn uploaded(client_id: &str, original: &str) -> NewDocument {
        NewDocument {
            document_type: "contract".into(),
            original_name: original.into(),
            client_id: client_id.into(),
            ..NewDocument::default()
        }
    }

    #[tokio::test]
    async fn create_defaults_to_a_stamped_stored_name() {
        let dir = tempdir().expect("tempdir");
        let pool = test_pool(dir.path()).await;
        let uploads = UploadStore::new(dir.path().join("uploads"));
        let client_id = seed_client(&pool).await;

        let document = create(&pool, &uploads, uploaded(&client_id, "Lease Agreement.pdf"))
            .await
            .expect("create document");
        assert!(crate::uploads::stamp_of(&document.stored_name).is_some());
        assert!(document.stored_name.ends_with("_Lease_Agreement.pdf"));
        assert_eq!(document.document_type, DocumentType::Contract);
        assert_eq!(document.size_bytes, None);
    }

    #[tokio::test]
    async fn create_snapshots_size_from_disk() {
        let dir = tempdir().expect("tempdir");
        let pool = test_pool(dir.path()).await;
        let uploads_dir = dir.path().join("uploads");
        std::fs::create_dir_all(&uploads_dir).expect("uploads dir");
        std::fs::write(uploads_dir.join("k.pdf"), b"12345").expect("write file");
        let uploads = UploadStore::new(&uploads_dir);
        let client_id = seed_client(&pool).await;

        let document = create(
            &pool,
            &uploads,
            NewDocument {
                stored_name: Some("k.pdf".into()),
                ..uploaded(&client_id, "contract.pdf")
            },
        )
        .await
        .expect("create document");
        assert_eq!(document.size_bytes, Some(5));

        let explicit = create(
            &pool,
            &uploads,
            NewDocument {
                stored_name: Some("other.pdf".into()),
                size_bytes: Some(99),
                ..uploaded(&client_id, "contract.pdf")
            },
        )
        .await
        .expect("create with explicit size");
        assert_eq!(explicit.size_bytes, Some(99));
    }

    #[tokio::test]
    async fn create_rejects_guard_failures_and_bad_types() {
        let dir = tempdir().expect("tempdir");
        let pool = test_pool(dir.path()).await;
        let uploads = UploadStore::new(dir.path().join("uploads"));
        let client_id = seed_client(&pool).await;

        let err = create(
            &pool,
            &uploads,
            NewDocument {
                stored_name: Some("../escape.pdf".into()),
                ..uploaded(&client_id, "contract.pdf")
            },
        )
        .await
        .expect_err("traversal rejected");
        assert_eq!(err.code(), "FILENAME/INVALID");

        let err = create(
            &pool,
            &uploads,
            NewDocument {
                document_type: "spreadsheet".into(),
                ..uploaded(&client_id, "contract.pdf")
            },
        )
        .await
        .expect_err("unknown type rejected");
        assert_eq!(err.code(), "VALIDATION/ENUM");
    }

    #[tokio::test]
    async fn duplicate_stored_name_reports_column() {
        let dir = tempdir().expect("tempdir");
        let pool = test_pool(dir.path()).await;
        let uploads = UploadStore::new(dir.path().join("uploads"));
        let client_id = seed_client(&pool).await;

        create(
            &pool,
            &uploads,
            NewDocument {
                stored_name: Some("same.pdf".into()),
                ..uploaded(&client_id, "a.pdf")
            },
        )
        .await
        .expect("first document");
        let err = create(
            &pool,
            &uploads,
            NewDocument {
                stored_name: Some("same.pdf".into()),
                ..uploaded(&client_id, "b.pdf")
            },
        )
        .await
        .expect_err("duplicate stored name rejected");
        assert_eq!(err.code(), "SQLX/UNIQUE");
        assert_eq!(err.context().get("column"), Some(&"stored_name".to_string()));
    }

    #[tokio::test]
    async fn list_filters_by_type_and_client() {
        let dir = tempdir().expect("tempdir");
        let pool = test_pool(dir.path()).await;
        let uploads = UploadStore::new(dir.path().join("uploads"));
        let client_id = seed_client(&pool).await;

        create(
            &pool,
            &uploads,
            NewDocument {
                document_type: "identity".into(),
                stored_name: Some("id-card.png".into()),
                ..uploaded(&client_id, "id.png")
            },
        )
        .await
        .expect("identity document");
        create(
            &pool,
            &uploads,
            NewDocument {
                stored_name: Some("agreement.pdf".into()),
                ..uploaded(&client_id, "agreement.pdf")
            },
        )
        .await
        .expect("contract document");

        let identity = list(
            &pool,
            &DocumentFilter {
                document_type: Some("identity".into()),
                ..DocumentFilter::default()
            },
        )
        .await
        .expect("list identity");
        assert_eq!(identity.len(), 1);
        assert_eq!(identity[0].stored_name, "id-card.png");

        let mine = list(
            &pool,
            &DocumentFilter {
                client_id: Some(client_id.clone()),
                ..DocumentFilter::default()
            },
        )
        .await
        .expect("list for client");
        assert_eq!(mine.len(), 2);
    }

    #[tokio::test]
    async fn update_revalidates_stored_name() {
        let dir = tempdir().expect("tempdir");
        let pool = test_pool(dir.path()).await;
        let uploads = UploadStore::new(dir.path().join("uploads"));
        let client_id = seed_client(&pool).await;

        let document = create(
            &pool,
            &uploads,
            NewDocument {
                stored_name: Some("first.pdf".into()),
                ..uploaded(&client_id, "first.pdf")
            },
        )
        .await
        .expect("create document");

        let patch: DocumentPatch =
            serde_json::from_str(r#"{"stored_name": "../evil.pdf"}"#).expect("parse");
        let err = update(&pool, &uploads, &document.id, patch)
            .await
            .expect_err("traversal rejected");
        assert_eq!(err.code(), "FILENAME/INVALID");

        let patch: DocumentPatch =
            serde_json::from_str(r#"{"stored_name": "renamed.pdf", "case_id": null}"#)
                .expect("parse");
        let updated = update(&pool, &uploads, &document.id, patch)
            .await
            .expect("update")
            .expect("document exists");
        assert_eq!(updated.stored_name, "renamed.pdf");
    }

    #[tokio::test]
    async fn delete_removes_row_and_file() {
        let dir = tempdir().expect("tempdir");
        let pool = test_pool(dir.path()).await;
        let uploads_dir = dir.path().join("uploads");
        std::fs::create_dir_all(&uploads_dir).expect("uploads dir");
        std::fs::write(uploads_dir.join("doomed.pdf"), b"x").expect("write file");
        let uploads = UploadStore::new(&uploads_dir);
        let client_id = seed_client(&pool).await;

        let document = create(
            &pool,
            &uploads,
            NewDocument {
                stored_name: Some("doomed.pdf".into()),
                ..uploaded(&client_id, "doomed.pdf")
            },
        )
        .await
        .expect("create document");

        assert!(delete(&pool, &uploads, &document.id)
            .await
            .expect("delete document"));
        assert!(!uploads_dir.join("doomed.pdf").exists());
        assert!(get(&pool, &document.id)
            .await
            .expect("get after delete")
            .is_none());
        assert!(!delete(&pool, &uploads, &document.id)
            .await
            .expect("delete again"));
    }
}
