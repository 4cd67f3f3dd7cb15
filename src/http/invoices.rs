use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;

use super::{not_found, ApiError};
use crate::db::guard::ensure_db_writable;
use crate::state::AppState;
use crate::store::invoices::{self, InvoiceFilter, InvoicePatch, NewInvoice};

pub async fn list(
    State(state): State<AppState>,
    Query(filter): Query<InvoiceFilter>,
) -> Result<impl IntoResponse, ApiError> {
    let rows = invoices::list(&state.pool, &filter).await?;
    Ok(Json(rows))
}

pub async fn create(
    State(state): State<AppState>,
    Json(input): Json<NewInvoice>,
) -> Result<impl IntoResponse, ApiError> {
    let _guard = ensure_db_writable(&state)?;
    let invoice = invoices::create(&state.pool, input).await?;
    Ok((StatusCode::CREATED, Json(invoice)))
}

pub async fn get(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let invoice = invoices::get(&state.pool, &id)
        .await?
        .ok_or_else(|| not_found("INVOICE", &id))?;
    Ok(Json(invoice))
}

pub async fn update(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(patch): Json<InvoicePatch>,
) -> Result<impl IntoResponse, ApiError> {
    let _guard = ensure_db_writable(&state)?;
    let invoice = invoices::update(&state.pool, &id, patch)
        .await?
        .ok_or_else(|| not_found("INVOICE", &id))?;
    Ok(Json(invoice))
}

pub async fn remove(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let _guard = ensure_db_writable(&state)?;
    if invoices::delete(&state.pool, &id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(not_found("INVOICE", &id))
    }
}
