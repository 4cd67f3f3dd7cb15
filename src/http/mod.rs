//! JSON API over the domain stores.
//!
//! One router, shared `AppState`, `tower-http` tracing with a UUIDv7
//! `x-request-id` on every response. Mutating handlers consult the cached
//! database health report before touching the pool.

pub mod appointments;
pub mod cases;
pub mod clients;
pub mod documents;
pub mod invoices;
pub mod users;

use std::net::SocketAddr;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use tower_http::cors::CorsLayer;
use tower_http::request_id::{
    MakeRequestId, PropagateRequestIdLayer, RequestId, SetRequestIdLayer,
};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::db::health::DbHealthReport;
use crate::error::AppError;
use crate::state::AppState;

/// Time-ordered request correlation ids; they sort chronologically in logs.
#[derive(Clone, Default)]
struct MakeRequestUuidV7;

impl MakeRequestId for MakeRequestUuidV7 {
    fn make_request_id<B>(&mut self, _request: &axum::http::Request<B>) -> Option<RequestId> {
        let id = Uuid::now_v7().to_string().parse().ok()?;
        Some(RequestId::new(id))
    }
}

/// `AppError` carried across the handler boundary; `IntoResponse` picks the
/// status from the error code.
#[derive(Debug)]
pub struct ApiError(pub AppError);

impl From<AppError> for ApiError {
    fn from(err: AppError) -> Self {
        Self(err)
    }
}

fn status_for(code: &str) -> StatusCode {
    match code {
        c if c.starts_with("VALIDATION/") || c.starts_with("FILENAME/") => {
            StatusCode::BAD_REQUEST
        }
        c if c.ends_with("/NOT_FOUND") => StatusCode::NOT_FOUND,
        "SQLX/ROW_NOT_FOUND" => StatusCode::NOT_FOUND,
        "SQLX/UNIQUE" | "SQLX/FOREIGN_KEY" | "CLIENT/HAS_CASES" => StatusCode::CONFLICT,
        crate::db::guard::DB_UNHEALTHY_CODE | "DB_MAINTENANCE_ACTIVE" => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0.code);
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(
                target: "lawdesk",
                event = "http_internal_error",
                code = %self.0.code,
                message = %self.0.message
            );
        }
        (status, Json(self.0)).into_response()
    }
}

/// 404 body for a row that does not exist: `{AREA}/NOT_FOUND`.
pub(crate) fn not_found(area: &str, id: &str) -> ApiError {
    ApiError(
        AppError::new(format!("{area}/NOT_FOUND"), "No such record.").with_context("id", id),
    )
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/health/recheck", post(recheck))
        .route("/api/overview", get(overview))
        .route("/api/clients", get(clients::list).post(clients::create))
        .route(
            "/api/clients/:id",
            get(clients::get).put(clients::update).delete(clients::remove),
        )
        .route("/api/clients/:id/documents", get(documents::for_client))
        .route("/api/cases", get(cases::list).post(cases::create))
        .route(
            "/api/cases/:id",
            get(cases::get).put(cases::update).delete(cases::remove),
        )
        .route(
            "/api/appointments",
            get(appointments::list).post(appointments::create),
        )
        .route(
            "/api/appointments/:id",
            get(appointments::get)
                .put(appointments::update)
                .delete(appointments::remove),
        )
        .route("/api/invoices", get(invoices::list).post(invoices::create))
        .route(
            "/api/invoices/:id",
            get(invoices::get)
                .put(invoices::update)
                .delete(invoices::remove),
        )
        .route("/api/documents", get(documents::list).post(documents::create))
        .route(
            "/api/documents/:id",
            get(documents::get)
                .put(documents::update)
                .delete(documents::remove),
        )
        .route("/api/users", get(users::list).post(users::create))
        .route(
            "/api/users/:id",
            get(users::get).put(users::update).delete(users::remove),
        )
        .layer(TraceLayer::new_for_http())
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuidV7))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Bind and serve until ctrl-c.
pub async fn serve(state: AppState, addr: SocketAddr) -> anyhow::Result<()> {
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(target: "lawdesk", event = "http_listen", addr = %addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    tracing::info!(target: "lawdesk", event = "http_shutdown");
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

#[derive(serde::Serialize)]
struct HealthBody {
    status: &'static str,
    db: DbHealthReport,
}

/// Liveness plus the cached health report. Always 200; the body says
/// whether the database itself is trustworthy.
async fn health(State(state): State<AppState>) -> Json<HealthBody> {
    let db = state.cached_health();
    let status = if db.is_healthy() { "ok" } else { "degraded" };
    Json(HealthBody { status, db })
}

/// Re-run the full check battery and swap the cached report. The write
/// guard reads the cache, so this is how a healed database gets its writes
/// back without a restart. Holds the maintenance flag; a second recheck
/// while one runs gets `DB_MAINTENANCE_ACTIVE`.
async fn recheck(State(state): State<AppState>) -> Result<Json<HealthBody>, ApiError> {
    let _maintenance = state.begin_maintenance()?;
    let db = state.refresh_health().await?;
    let status = if db.is_healthy() { "ok" } else { "degraded" };
    Ok(Json(HealthBody { status, db }))
}

async fn overview(
    State(state): State<AppState>,
) -> Result<Json<crate::reports::Overview>, ApiError> {
    let report = crate::reports::overview(&state.pool, &state.uploads).await?;
    Ok(Json(report))
}
