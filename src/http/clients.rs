use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;

use super::{not_found, ApiError};
use crate::db::guard::ensure_db_writable;
use crate::state::AppState;
use crate::store::clients::{self, ClientFilter, ClientPatch, NewClient};

pub async fn list(
    State(state): State<AppState>,
    Query(filter): Query<ClientFilter>,
) -> Result<impl IntoResponse, ApiError> {
    let rows = clients::list(&state.pool, &filter).await?;
    Ok(Json(rows))
}

pub async fn create(
    State(state): State<AppState>,
    Json(input): Json<NewClient>,
) -> Result<impl IntoResponse, ApiError> {
    let _guard = ensure_db_writable(&state)?;
    let client = clients::create(&state.pool, input).await?;
    Ok((StatusCode::CREATED, Json(client)))
}

pub async fn get(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let client = clients::get(&state.pool, &id)
        .await?
        .ok_or_else(|| not_found("CLIENT", &id))?;
    Ok(Json(client))
}

pub async fn update(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(patch): Json<ClientPatch>,
) -> Result<impl IntoResponse, ApiError> {
    let _guard = ensure_db_writable(&state)?;
    let client = clients::update(&state.pool, &id, patch)
        .await?
        .ok_or_else(|| not_found("CLIENT", &id))?;
    Ok(Json(client))
}

pub async fn remove(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let _guard = ensure_db_writable(&state)?;
    if clients::delete(&state.pool, &id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(not_found("CLIENT", &id))
    }
}
