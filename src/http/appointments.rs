use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;

use super::{not_found, ApiError};
use crate::db::guard::ensure_db_writable;
use crate::state::AppState;
use crate::store::appointments::{self, AppointmentFilter, AppointmentPatch, NewAppointment};

pub async fn list(
    State(state): State<AppState>,
    Query(filter): Query<AppointmentFilter>,
) -> Result<impl IntoResponse, ApiError> {
    let rows = appointments::list(&state.pool, &filter).await?;
    Ok(Json(rows))
}

pub async fn create(
    State(state): State<AppState>,
    Json(input): Json<NewAppointment>,
) -> Result<impl IntoResponse, ApiError> {
    let _guard = ensure_db_writable(&state)?;
    let appointment = appointments::create(&state.pool, input).await?;
    Ok((StatusCode::CREATED, Json(appointment)))
}

pub async fn get(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let appointment = appointments::get(&state.pool, &id)
        .await?
        .ok_or_else(|| not_found("APPOINTMENT", &id))?;
    Ok(Json(appointment))
}

pub async fn update(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(patch): Json<AppointmentPatch>,
) -> Result<impl IntoResponse, ApiError> {
    let _guard = ensure_db_writable(&state)?;
    let appointment = appointments::update(&state.pool, &id, patch)
        .await?
        .ok_or_else(|| not_found("APPOINTMENT", &id))?;
    Ok(Json(appointment))
}

pub async fn remove(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let _guard = ensure_db_writable(&state)?;
    if appointments::delete(&state.pool, &id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(not_found("APPOINTMENT", &id))
    }
}
