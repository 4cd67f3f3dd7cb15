use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;

use super::{not_found, ApiError};
use crate::db::guard::ensure_db_writable;
use crate::model::ClientDocument;
use crate::state::AppState;
use crate::store::documents::{self, DocumentFilter, DocumentPatch, NewDocument};

/// Document record plus the mime type guessed from the stored name, so the
/// desktop client can pick an icon without touching the file.
#[derive(Debug, serde::Serialize)]
pub struct DocumentBody {
    #[serde(flatten)]
    pub record: ClientDocument,
    pub mime: String,
}

impl From<ClientDocument> for DocumentBody {
    fn from(record: ClientDocument) -> Self {
        let mime = crate::uploads::mime_for(&record.stored_name);
        Self { record, mime }
    }
}

fn with_mime(rows: Vec<ClientDocument>) -> Vec<DocumentBody> {
    rows.into_iter().map(DocumentBody::from).collect()
}

pub async fn list(
    State(state): State<AppState>,
    Query(filter): Query<DocumentFilter>,
) -> Result<impl IntoResponse, ApiError> {
    let rows = documents::list(&state.pool, &filter).await?;
    Ok(Json(with_mime(rows)))
}

/// Documents belonging to one client; 404 when the client itself is missing.
pub async fn for_client(
    State(state): State<AppState>,
    Path(client_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    crate::store::clients::get(&state.pool, &client_id)
        .await?
        .ok_or_else(|| not_found("CLIENT", &client_id))?;
    let filter = DocumentFilter {
        client_id: Some(client_id),
        ..Default::default()
    };
    let rows = documents::list(&state.pool, &filter).await?;
    Ok(Json(with_mime(rows)))
}

pub async fn create(
    State(state): State<AppState>,
    Json(input): Json<NewDocument>,
) -> Result<impl IntoResponse, ApiError> {
    let _guard = ensure_db_writable(&state)?;
    let document = documents::create(&state.pool, &state.uploads, input).await?;
    Ok((StatusCode::CREATED, Json(DocumentBody::from(document))))
}

pub async fn get(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let document = documents::get(&state.pool, &id)
        .await?
        .ok_or_else(|| not_found("DOCUMENT", &id))?;
    Ok(Json(DocumentBody::from(document)))
}

pub async fn update(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(patch): Json<DocumentPatch>,
) -> Result<impl IntoResponse, ApiError> {
    let _guard = ensure_db_writable(&state)?;
    let document = documents::update(&state.pool, &state.uploads, &id, patch)
        .await?
        .ok_or_else(|| not_found("DOCUMENT", &id))?;
    Ok(Json(DocumentBody::from(document)))
}

pub async fn remove(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let _guard = ensure_db_writable(&state)?;
    if documents::delete(&state.pool, &state.uploads, &id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(not_found("DOCUMENT", &id))
    }
}
