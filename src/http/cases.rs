use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;

use super::{not_found, ApiError};
use crate::db::guard::ensure_db_writable;
use crate::state::AppState;
use crate::store::cases::{self, CaseFilter, CasePatch, NewCase};

pub async fn list(
    State(state): State<AppState>,
    Query(filter): Query<CaseFilter>,
) -> Result<impl IntoResponse, ApiError> {
    let rows = cases::list(&state.pool, &filter).await?;
    Ok(Json(rows))
}

pub async fn create(
    State(state): State<AppState>,
    Json(input): Json<NewCase>,
) -> Result<impl IntoResponse, ApiError> {
    let _guard = ensure_db_writable(&state)?;
    let case = cases::create(&state.pool, input).await?;
    Ok((StatusCode::CREATED, Json(case)))
}

pub async fn get(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let case = cases::get(&state.pool, &id)
        .await?
        .ok_or_else(|| not_found("CASE", &id))?;
    Ok(Json(case))
}

pub async fn update(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(patch): Json<CasePatch>,
) -> Result<impl IntoResponse, ApiError> {
    let _guard = ensure_db_writable(&state)?;
    let case = cases::update(&state.pool, &id, patch)
        .await?
        .ok_or_else(|| not_found("CASE", &id))?;
    Ok(Json(case))
}

pub async fn remove(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let _guard = ensure_db_writable(&state)?;
    if cases::delete(&state.pool, &id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(not_found("CASE", &id))
    }
}
