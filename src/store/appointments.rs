//! Office calendar: hearings, consultations, deadlines. Appointments can
//! float free or be pinned to a client and/or case.

use sqlx::SqlitePool;

use crate::model::{Appointment, AppointmentStatus};
use crate::AppResult;

use super::{
    bind_args, optional, parse_or_default, positive, required, required_ms, Arg,
};

#[derive(Debug, Clone, serde::Deserialize)]
#[serde(default)]
pub struct NewAppointment {
    pub title: String,
    pub description: Option<String>,
    pub location: Option<String>,
    /// Milliseconds since the epoch, UTC.
    pub scheduled_at: i64,
    pub duration_minutes: i64,
    pub status: Option<String>,
    pub client_id: Option<String>,
    pub case_id: Option<String>,
}

impl Default for NewAppointment {
    fn default() -> Self {
        Self {
            title: String::new(),
            description: None,
            location: None,
            scheduled_at: 0,
            duration_minutes: 60,
            status: None,
            client_id: None,
            case_id: None,
        }
    }
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
#[serde(default)]
pub struct AppointmentPatch {
    pub title: Option<String>,
    #[serde(deserialize_with = "super::double_option")]
    pub description: Option<Option<String>>,
    #[serde(deserialize_with = "super::double_option")]
    pub location: Option<Option<String>>,
    pub scheduled_at: Option<i64>,
    pub duration_minutes: Option<i64>,
    pub status: Option<String>,
    #[serde(deserialize_with = "super::double_option")]
    pub client_id: Option<Option<String>>,
    #[serde(deserialize_with = "super::double_option")]
    pub case_id: Option<Option<String>>,
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
#[serde(default)]
pub struct AppointmentFilter {
    pub status: Option<String>,
    pub client_id: Option<String>,
    pub case_id: Option<String>,
    /// Any instant in the target day (UTC); keeps that day's appointments.
    pub on_day: Option<i64>,
    /// Keep appointments scheduled at or after the current time.
    pub upcoming: Option<bool>,
}

pub async fn create(pool: &SqlitePool, input: NewAppointment) -> AppResult<Appointment> {
    let now = crate::time::now_ms();
    let appointment = Appointment {
        id: crate::id::new_uuid_v7(),
        title: required("title", &input.title)?,
        description: optional(input.description),
        location: optional(input.location),
        scheduled_at: required_ms("scheduled_at", input.scheduled_at)?,
        duration_minutes: positive("duration_minutes", input.duration_minutes)?,
        status: parse_or_default::<AppointmentStatus>(input.status.as_deref())?,
        client_id: optional(input.client_id),
        case_id: optional(input.case_id),
        created_at: now,
        updated_at: now,
    };
    sqlx::query(
        "INSERT INTO appointments \
         (id, title, description, location, scheduled_at, duration_minutes, status, \
          client_id, case_id, created_at, updated_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
    )
    .bind(&appointment.id)
    .bind(&appointment.title)
    .bind(&appointment.description)
    .bind(&appointment.location)
    .bind(appointment.scheduled_at)
    .bind(appointment.duration_minutes)
    .bind(appointment.status)
    .bind(&appointment.client_id)
    .bind(&appointment.case_id)
    .bind(appointment.created_at)
    .bind(appointment.updated_at)
    .execute(pool)
    .await?;
    tracing::debug!(
        target: "lawdesk",
        event = "appointment_created",
        id = appointment.id.as_str(),
    );
    Ok(appointment)
}

pub async fn get(pool: &SqlitePool, id: &str) -> AppResult<Option<Appointment>> {
    let appointment = sqlx::query_as::<_, Appointment>("SELECT * FROM appointments WHERE id = ?1")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(appointment)
}

/// Chronological order, earliest first.
pub async fn list(pool: &SqlitePool, filter: &AppointmentFilter) -> AppResult<Vec<Appointment>> {
    let mut sql = String::from("SELECT * FROM appointments");
    let mut clauses: Vec<String> = Vec::new();
    let mut binds: Vec<Arg> = Vec::new();

    if let Some(raw) = filter
        .status
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
    {
        let status: AppointmentStatus = raw.parse()?;
        binds.push(Arg::Text(status.as_str().to_string()));
        clauses.push(format!("status = ?{}", binds.len()));
    }
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
    if let Some(on_day) = filter.on_day {
        let (start, end) = crate::time::day_bounds(on_day);
        binds.push(Arg::Int(start));
        clauses.push(format!("scheduled_at >= ?{}", binds.len()));
        binds.push(Arg::Int(end));
        clauses.push(format!("scheduled_at < ?{}", binds.len()));
    }
    if filter.upcoming == Some(true) {
        binds.push(Arg::Int(crate::time::now_ms()));
        clauses.push(format!("scheduled_at >= ?{}", binds.len()));
    }
    if !clauses.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&clauses.join(" AND "));
    }
    sql.push_str(" ORDER BY scheduled_at, id");

    let query = sqlx::query_as::<_, Appointment>(&sql);
    Ok(bind_args(query, &binds).fetch_all(pool).await?)
}

pub async fn update(
    pool: &SqlitePool,
    id: &str,
    patch: AppointmentPatch,
) -> AppResult<Option<Appointment>> {
    let Some(mut appointment) = get(pool, id).await? else {
        return Ok(None);
    };
    if let Some(v) = patch.title {
        appointment.title = required("title", &v)?;
    }
    if let Some(v) = patch.description {
        appointment.description = optional(v);
    }
    if let Some(v) = patch.location {
        appointment.location = optional(v);
    }
    if let Some(v) = patch.scheduled_at {
        appointment.scheduled_at = required_ms("scheduled_at", v)?;
    }
    if let Some(v) = patch.duration_minutes {
        appointment.duration_minutes = positive("duration_minutes", v)?;
    }
    if let Some(v) = patch.status {
        appointment.status = required("status", &v)?.parse()?;
    }
    if let Some(v) = patch.client_id {
        appointment.client_id = optional(v);
    }
    if let Some(v) = patch.case_id {
        appointment.case_id = optional(v);
    }
    appointment.updated_at = crate::time::now_ms();

    sqlx::query(
        "UPDATE appointments SET title = ?1, description = ?2, location = ?3, scheduled_at = ?4, \
         duration_minutes = ?5, status = ?6, client_id = ?7, case_id = ?8, updated_at = ?9 \
         WHERE id = ?10",
    )
    .bind(&appointment.title)
    .bind(&appointment.description)
    .bind(&appointment.location)
    .bind(appointment.scheduled_at)
    .bind(appointment.duration_minutes)
    .bind(appointment.status)
    .bind(&appointment.client_id)
    .bind(&appointment.case_id)
    .bind(appointment.updated_at)
    .bind(id)
    .execute(pool)
    .await?;
    tracing::debug!(target: "lawdesk", event = "appointment_updated", id);
    Ok(Some(appointment))
}

pub async fn delete(pool: &SqlitePool, id: &str) -> AppResult<bool> {
    let result = sqlx::query("DELETE FROM appointments WHERE id = ?1")
        .bind(id)
        .execute(pool)
        .await?;
    let deleted = result.rows_affected() > 0;
    if deleted {
        tracing::debug!(target: "lawdesk", event = "appointment_deleted", id);
    }
    Ok(deleted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::testutil::test_pool;
    use tempfile::tempdir;

    // 2024-01-15 10:30:45 UTC
    const BASE_MS: i64 = 1_705_314_645_000;
    const DAY_MS: i64 = 86_400_000;

    fn at(title: &str, scheduled_at: i64) -> NewAppointment {
        NewAppointment {
            title: title.into(),
            scheduled_at,
            ..NewAppointment::default()
        }
    }

    #[tokio::test]
    async fn create_applies_defaults() {
        let dir = tempdir().expect("tempdir");
        let pool = test_pool(dir.path()).await;

        let input: NewAppointment = serde_json::from_str(
            r#"{"title": "Intake meeting", "scheduled_at": 1705314645000}"#,
        )
        .expect("parse input");
        let appointment = create(&pool, input).await.expect("create appointment");
        assert_eq!(appointment.duration_minutes, 60);
        assert_eq!(appointment.status, AppointmentStatus::Scheduled);
        assert_eq!(appointment.client_id, None);
    }

    #[tokio::test]
    async fn create_validates_schedule_and_duration() {
        let dir = tempdir().expect("tempdir");
        let pool = test_pool(dir.path()).await;

        let err = create(&pool, at("No time", 0))
            .await
            .expect_err("missing schedule rejected");
        assert_eq!(err.code(), "VALIDATION/REQUIRED");

        let err = create(
            &pool,
            NewAppointment {
                duration_minutes: 0,
                ..at("Zero length", BASE_MS)
            },
        )
        .await
        .expect_err("zero duration rejected");
        assert_eq!(err.code(), "VALIDATION/RANGE");
    }

    #[tokio::test]
    async fn list_filters_by_day_window() {
        let dir = tempdir().expect("tempdir");
        let pool = test_pool(dir.path()).await;

        create(&pool, at("Yesterday", BASE_MS - DAY_MS))
            .await
            .expect("yesterday");
        let today = create(&pool, at("Today", BASE_MS)).await.expect("today");
        create(&pool, at("Tomorrow", BASE_MS + DAY_MS))
            .await
            .expect("tomorrow");

        let hits = list(
            &pool,
            &AppointmentFilter {
                on_day: Some(BASE_MS),
                ..AppointmentFilter::default()
            },
        )
        .await
        .expect("list on day");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, today.id);

        let all = list(&pool, &AppointmentFilter::default())
            .await
            .expect("list all");
        let titles: Vec<&str> = all.iter().map(|a| a.title.as_str()).collect();
        assert_eq!(titles, vec!["Yesterday", "Today", "Tomorrow"]);
    }

    #[tokio::test]
    async fn list_upcoming_drops_past_entries() {
        let dir = tempdir().expect("tempdir");
        let pool = test_pool(dir.path()).await;

        create(&pool, at("Long past", BASE_MS)).await.expect("past");
        let soon = create(&pool, at("Soon", crate::time::now_ms() + 3_600_000))
            .await
            .expect("future");

        let hits = list(
            &pool,
            &AppointmentFilter {
                upcoming: Some(true),
                ..AppointmentFilter::default()
            },
        )
        .await
        .expect("list upcoming");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, soon.id);
    }

    #[tokio::test]
    async fn update_reschedules_and_detaches_client() {
        let dir = tempdir().expect("tempdir");
        let pool = test_pool(dir.path()).await;

        let client = crate::store::clients::create(
            &pool,
            crate::store::clients::NewClient {
                first_name: "Layla".into(),
                last_name: "Haddad".into(),
                ..Default::default()
            },
        )
        .await
        .expect("create client");

        let appointment = create(
            &pool,
            NewAppointment {
                client_id: Some(client.id.clone()),
                ..at("Hearing", BASE_MS)
            },
        )
        .await
        .expect("create appointment");

        let patch: AppointmentPatch = serde_json::from_str(
            r#"{"scheduled_at": 1705401045000, "status": "completed", "client_id": null}"#,
        )
        .expect("parse patch");
        let updated = update(&pool, &appointment.id, patch)
            .await
            .expect("update")
            .expect("appointment exists");
        assert_eq!(updated.scheduled_at, BASE_MS + DAY_MS);
        assert_eq!(updated.status, AppointmentStatus::Completed);
        assert_eq!(updated.client_id, None);
    }
}
