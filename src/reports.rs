//! The numbers a front desk wants at a glance: caseload, today's calendar,
//! money outstanding, and whether the uploads directory still lines up with
//! the books.

use serde::Serialize;
use sqlx::SqlitePool;

use crate::model::InvoiceStatus;
use crate::uploads::UploadStore;
use crate::AppResult;

#[derive(Debug, Clone, Serialize)]
pub struct Overview {
    pub generated_at: String,
    pub clients: i64,
    pub users: i64,
    pub documents: i64,
    pub cases: CaseCounts,
    pub appointments: AppointmentCounts,
    pub invoices: InvoiceCounts,
    pub receivables: Receivables,
    pub uploads: UploadTotals,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CaseCounts {
    pub total: i64,
    pub active: i64,
    pub closed: i64,
    pub suspended: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct AppointmentCounts {
    pub total: i64,
    pub today: i64,
    pub next_upcoming: Option<UpcomingAppointment>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct UpcomingAppointment {
    pub id: String,
    pub title: String,
    pub scheduled_at: i64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct InvoiceCounts {
    pub total: i64,
    pub pending: i64,
    pub paid: i64,
    pub overdue: i64,
    pub cancelled: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Receivables {
    pub outstanding_invoices: i64,
    pub outstanding_cents: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct UploadTotals {
    pub files: u64,
    pub total_bytes: i64,
    pub missing_rows: u64,
}

pub async fn overview(pool: &SqlitePool, uploads: &UploadStore) -> AppResult<Overview> {
    let now = crate::time::now_ms();

    let clients = count(pool, "clients").await?;
    let users = count(pool, "users").await?;
    let documents = count(pool, "client_documents").await?;

    let mut cases = CaseCounts::default();
    for (status, n) in group_counts(pool, "cases").await? {
        cases.total += n;
        match status.as_str() {
            "active" => cases.active = n,
            "closed" => cases.closed = n,
            "suspended" => cases.suspended = n,
            _ => {}
        }
    }

    let mut invoices = InvoiceCounts::default();
    for (status, n) in group_counts(pool, "invoices").await? {
        invoices.total += n;
        match status.as_str() {
            "pending" => invoices.pending = n,
            "paid" => invoices.paid = n,
            "overdue" => invoices.overdue = n,
            "cancelled" => invoices.cancelled = n,
            _ => {}
        }
    }

    let appointments_total = count(pool, "appointments").await?;
    let (today_start, today_end) = crate::time::day_bounds(now);
    let today: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM appointments WHERE scheduled_at >= ?1 AND scheduled_at < ?2",
    )
    .bind(today_start)
    .bind(today_end)
    .fetch_one(pool)
    .await?;
    let next_upcoming = sqlx::query_as::<_, UpcomingAppointment>(
        "SELECT id, title, scheduled_at FROM appointments \
         WHERE scheduled_at >= ?1 AND status = 'scheduled' \
         ORDER BY scheduled_at, id LIMIT 1",
    )
    .bind(now)
    .fetch_optional(pool)
    .await?;

    let receivables = outstanding(pool).await?;

    let entries = uploads.list()?;
    let scan = crate::uploads::reconcile::scan(pool, uploads).await?;
    let upload_totals = UploadTotals {
        files: entries.len() as u64,
        total_bytes: entries.iter().map(|e| e.size_bytes).sum(),
        missing_rows: scan.missing.len() as u64,
    };

    Ok(Overview {
        generated_at: crate::time::fmt_ms(now),
        clients,
        users,
        documents,
        cases,
        appointments: AppointmentCounts {
            total: appointments_total,
            today,
            next_upcoming,
        },
        invoices,
        receivables,
        uploads: upload_totals,
    })
}

async fn count(pool: &SqlitePool, table: &str) -> AppResult<i64> {
    let n: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table}"))
        .fetch_one(pool)
        .await?;
    Ok(n)
}

async fn group_counts(pool: &SqlitePool, table: &str) -> AppResult<Vec<(String, i64)>> {
    let rows: Vec<(String, i64)> =
        sqlx::query_as(&format!("SELECT status, COUNT(*) FROM {table} GROUP BY status"))
            .fetch_all(pool)
            .await?;
    Ok(rows)
}

/// Invoices still awaiting money, per the status enum's own definition of
/// outstanding.
async fn outstanding(pool: &SqlitePool) -> AppResult<Receivables> {
    let statuses: Vec<&str> = InvoiceStatus::ALL
        .iter()
        .filter(|s| s.is_outstanding())
        .map(|s| s.as_str())
        .collect();
    let placeholders = (1..=statuses.len())
        .map(|i| format!("?{i}"))
        .collect::<Vec<_>>()
        .join(", ");
    let sql = format!(
        "SELECT COUNT(*), COALESCE(SUM(total_cents), 0) FROM invoices WHERE status IN ({placeholders})"
    );
    let mut query = sqlx::query_as::<_, (i64, i64)>(&sql);
    for status in &statuses {
        query = query.bind(*status);
    }
    let (outstanding_invoices, outstanding_cents) = query.fetch_one(pool).await?;
    Ok(Receivables {
        outstanding_invoices,
        outstanding_cents,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store;
    use tempfile::tempdir;

    #[tokio::test]
    async fn overview_of_empty_database_is_all_zeroes() {
        let dir = tempdir().expect("tempdir");
        let pool = crate::db::open_pool(&dir.path().join("t.sqlite3"))
            .await
            .expect("open pool");
        crate::db::bootstrap(&pool).await.expect("bootstrap");
        let uploads = UploadStore::new(dir.path().join("uploads"));

        let report = overview(&pool, &uploads).await.expect("overview");
        assert_eq!(report.clients, 0);
        assert_eq!(report.cases.total, 0);
        assert_eq!(report.receivables.outstanding_cents, 0);
        assert_eq!(report.uploads.files, 0);
        assert!(report.appointments.next_upcoming.is_none());
        assert!(!report.generated_at.is_empty());
    }

    #[tokio::test]
    async fn overview_counts_the_seeded_office() {
        let dir = tempdir().expect("tempdir");
        let pool = crate::db::open_pool(&dir.path().join("t.sqlite3"))
            .await
            .expect("open pool");
        crate::db::bootstrap(&pool).await.expect("bootstrap");
        let uploads_dir = dir.path().join("uploads");
        std::fs::create_dir_all(&uploads_dir).expect("uploads dir");
        std::fs::write(uploads_dir.join("kept.pdf"), b"12345").expect("write file");
        let uploads = UploadStore::new(&uploads_dir);

        let client = store::clients::create(
            &pool,
            store::clients::NewClient {
                first_name: "Layla".into(),
                last_name: "Haddad".into(),
                ..Default::default()
            },
        )
        .await
        .expect("client");
        store::cases::create(
            &pool,
            store::cases::NewCase {
                title: "Contract dispute".into(),
                client_id: client.id.clone(),
                ..Default::default()
            },
        )
        .await
        .expect("case");
        store::cases::create(
            &pool,
            store::cases::NewCase {
                title: "Old estate".into(),
                status: Some("closed".into()),
                client_id: client.id.clone(),
                ..Default::default()
            },
        )
        .await
        .expect("closed case");

        store::invoices::create(
            &pool,
            store::invoices::NewInvoice {
                client_id: client.id.clone(),
                amount_cents: 10_000,
                ..Default::default()
            },
        )
        .await
        .expect("pending invoice");
        store::invoices::create(
            &pool,
            store::invoices::NewInvoice {
                client_id: client.id.clone(),
                amount_cents: 2_000,
                status: Some("paid".into()),
                ..Default::default()
            },
        )
        .await
        .expect("paid invoice");

        // Last millisecond of today: inside the day window and still ahead
        // of now, whatever wall-clock time the test runs at.
        let (_, today_end) = crate::time::day_bounds(crate::time::now_ms());
        store::appointments::create(
            &pool,
            store::appointments::NewAppointment {
                title: "Next hearing".into(),
                scheduled_at: today_end - 1,
                ..Default::default()
            },
        )
        .await
        .expect("appointment");

        store::documents::create(
            &pool,
            &uploads,
            store::documents::NewDocument {
                document_type: "contract".into(),
                original_name: "kept.pdf".into(),
                stored_name: Some("kept.pdf".into()),
                client_id: client.id.clone(),
                ..Default::default()
            },
        )
        .await
        .expect("matched document");
        store::documents::create(
            &pool,
            &uploads,
            store::documents::NewDocument {
                document_type: "other".into(),
                original_name: "gone.pdf".into(),
                stored_name: Some("gone.pdf".into()),
                client_id: client.id.clone(),
                ..Default::default()
            },
        )
        .await
        .expect("missing document");

        let report = overview(&pool, &uploads).await.expect("overview");
        assert_eq!(report.clients, 1);
        assert_eq!(report.cases.total, 2);
        assert_eq!(report.cases.active, 1);
        assert_eq!(report.cases.closed, 1);
        assert_eq!(report.invoices.pending, 1);
        assert_eq!(report.invoices.paid, 1);
        assert_eq!(report.receivables.outstanding_invoices, 1);
        assert_eq!(report.receivables.outstanding_cents, 10_000);
        assert_eq!(report.appointments.today, 1);
        assert_eq!(
            report
                .appointments
                .next_upcoming
                .as_ref()
                .map(|a| a.title.as_str()),
            Some("Next hearing")
        );
        assert_eq!(report.documents, 2);
        assert_eq!(report.uploads.files, 1);
        assert_eq!(report.uploads.total_bytes, 5);
        assert_eq!(report.uploads.missing_rows, 1);
    }
}
