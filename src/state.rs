use sqlx::SqlitePool;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::db::health::{run_health_checks, DbHealthReport};
use crate::error::{AppError, AppResult};
use crate::uploads::UploadStore;

/// Shared handle for the HTTP server and maintenance commands. Cheap to
/// clone; every field is behind an Arc (the pool is internally shared).
#[derive(Clone)]
pub struct AppState {
    pub pool: SqlitePool,
    pub db_path: Arc<PathBuf>,
    pub uploads: Arc<UploadStore>,
    pub db_health: Arc<Mutex<DbHealthReport>>,
    pub maintenance: Arc<AtomicBool>,
}

impl AppState {
    pub fn new(
        pool: SqlitePool,
        db_path: PathBuf,
        uploads: UploadStore,
        health: DbHealthReport,
    ) -> Self {
        Self {
            pool,
            db_path: Arc::new(db_path),
            uploads: Arc::new(uploads),
            db_health: Arc::new(Mutex::new(health)),
            maintenance: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn cached_health(&self) -> DbHealthReport {
        self.db_health
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Re-run the health battery and replace the cached report. Maintenance
    /// commands that can heal the database call this afterwards so the
    /// write guard sees fresh state.
    pub async fn refresh_health(&self) -> AppResult<DbHealthReport> {
        let report = run_health_checks(&self.pool, &self.db_path)
            .await
            .map_err(AppError::from)?;
        *self.db_health.lock().unwrap_or_else(|e| e.into_inner()) = report.clone();
        Ok(report)
    }

    pub fn begin_maintenance(&self) -> AppResult<MaintenanceGuard> {
        MaintenanceGuard::begin(self.maintenance.clone())
    }

    pub fn maintenance_active(&self) -> bool {
        self.maintenance.load(Ordering::SeqCst)
    }
}

/// Serializes maintenance operations (backup, restore, repair). Held for
/// the duration of the operation; dropping it reopens the gate.
#[derive(Debug)]
pub struct MaintenanceGuard {
    flag: Arc<AtomicBool>,
}

impl MaintenanceGuard {
    fn begin(flag: Arc<AtomicBool>) -> AppResult<Self> {
        if flag
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(AppError::new(
                "DB_MAINTENANCE_ACTIVE",
                "Database maintenance is already running.",
            ));
        }
        Ok(Self { flag })
    }
}

impl Drop for MaintenanceGuard {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::health::DbHealthStatus;
    use sqlx::sqlite::SqlitePoolOptions;
    use tempfile::tempdir;

    fn sample_state() -> (tempfile::TempDir, AppState) {
        let tmp = tempdir().expect("tempdir");
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_lazy("sqlite::memory:")
            .expect("pool");
        let uploads = UploadStore::new(tmp.path().join("uploads"));
        let state = AppState::new(
            pool,
            tmp.path().join("lawdesk.sqlite3"),
            uploads,
            DbHealthReport {
                status: DbHealthStatus::Ok,
                checks: Vec::new(),
                offenders: Vec::new(),
                schema_hash: String::new(),
                app_version: String::new(),
                generated_at: String::new(),
            },
        );
        (tmp, state)
    }

    #[tokio::test]
    async fn maintenance_guard_is_exclusive() {
        let (_tmp, state) = sample_state();
        let guard = state.begin_maintenance().expect("first guard");
        assert!(state.maintenance_active());

        let err = state.begin_maintenance().expect_err("second guard refused");
        assert_eq!(err.code(), "DB_MAINTENANCE_ACTIVE");

        drop(guard);
        assert!(!state.maintenance_active());
        state.begin_maintenance().expect("guard again after drop");
    }
}
