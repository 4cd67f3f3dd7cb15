//! Billing. All money lives in integer cents; `total_cents` is derived from
//! amount plus tax unless the office overrides it (discounts, write-offs).

use chrono::Datelike;
use sqlx::SqlitePool;

use crate::model::{Invoice, InvoiceStatus};
use crate::AppResult;

use super::{
    bind_args, is_unique_on, map_unique, non_negative, optional, parse_or_default, required, Arg,
};

const THIRTY_DAYS_MS: i64 = 30 * 86_400_000;

#[derive(Debug, Clone, Default, serde::Deserialize)]
#[serde(default)]
pub struct NewInvoice {
    /// Generated as `INV-<year>-NNNN` (year of the issue date) when omitted.
    pub invoice_number: Option<String>,
    pub client_id: String,
    pub case_id: Option<String>,
    /// Defaults to now; `due_date` defaults to thirty days later.
    pub issue_date: Option<i64>,
    pub due_date: Option<i64>,
    pub description: Option<String>,
    pub amount_cents: i64,
    pub tax_cents: i64,
    pub total_cents: Option<i64>,
    pub status: Option<String>,
    pub paid_at: Option<i64>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
#[serde(default)]
pub struct InvoicePatch {
    pub invoice_number: Option<String>,
    pub client_id: Option<String>,
    #[serde(deserialize_with = "super::double_option")]
    pub case_id: Option<Option<String>>,
    pub issue_date: Option<i64>,
    pub due_date: Option<i64>,
    #[serde(deserialize_with = "super::double_option")]
    pub description: Option<Option<String>>,
    pub amount_cents: Option<i64>,
    pub tax_cents: Option<i64>,
    pub total_cents: Option<i64>,
    pub status: Option<String>,
    #[serde(deserialize_with = "super::double_option")]
    pub paid_at: Option<Option<i64>>,
    #[serde(deserialize_with = "super::double_option")]
    pub notes: Option<Option<String>>,
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
#[serde(default)]
pub struct InvoiceFilter {
    pub status: Option<String>,
    pub client_id: Option<String>,
    pub case_id: Option<String>,
}

pub async fn create(pool: &SqlitePool, input: NewInvoice) -> AppResult<Invoice> {
    let now = crate::time::now_ms();
    let explicit_number = optional(input.invoice_number);
    let issue_date = input.issue_date.unwrap_or(now);
    let amount_cents = non_negative("amount_cents", input.amount_cents)?;
    let tax_cents = non_negative("tax_cents", input.tax_cents)?;
    let total_cents = match input.total_cents {
        Some(v) => non_negative("total_cents", v)?,
        None => amount_cents + tax_cents,
    };
    let status = parse_or_default::<InvoiceStatus>(input.status.as_deref())?;
    let paid_at = if status == InvoiceStatus::Paid {
        input.paid_at.or(Some(now))
    } else {
        input.paid_at
    };
    let invoice = Invoice {
        id: crate::id::new_uuid_v7(),
        invoice_number: String::new(),
        client_id: required("client_id", &input.client_id)?,
        case_id: optional(input.case_id),
        issue_date,
        due_date: input.due_date.unwrap_or(issue_date + THIRTY_DAYS_MS),
        description: optional(input.description),
        amount_cents,
        tax_cents,
        total_cents,
        status,
        paid_at,
        notes: optional(input.notes),
        created_at: now,
        updated_at: now,
    };
    match insert_attempt(pool, invoice.clone(), explicit_number.clone()).await {
        Err(err) if explicit_number.is_none() && is_unique_on(&err, "invoice_number") => {
            insert_attempt(pool, invoice, None).await
        }
        other => other,
    }
}

async fn insert_attempt(
    pool: &SqlitePool,
    mut invoice: Invoice,
    explicit_number: Option<String>,
) -> AppResult<Invoice> {
    let mut tx = pool.begin().await?;
    invoice.invoice_number = match explicit_number {
        Some(number) => number,
        None => {
            let year = crate::time::to_date(invoice.issue_date).year();
            super::next_numbered(&mut tx, "invoices", "invoice_number", &format!("INV-{year}-"))
                .await?
        }
    };
    sqlx::query(
        "INSERT INTO invoices \
         (id, invoice_number, client_id, case_id, issue_date, due_date, description, \
          amount_cents, tax_cents, total_cents, status, paid_at, notes, created_at, updated_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
    )
    .bind(&invoice.id)
    .bind(&invoice.invoice_number)
    .bind(&invoice.client_id)
    .bind(&invoice.case_id)
    .bind(invoice.issue_date)
    .bind(invoice.due_date)
    .bind(&invoice.description)
    .bind(invoice.amount_cents)
    .bind(invoice.tax_cents)
    .bind(invoice.total_cents)
    .bind(invoice.status)
    .bind(invoice.paid_at)
    .bind(&invoice.notes)
    .bind(invoice.created_at)
    .bind(invoice.updated_at)
    .execute(&mut *tx)
    .await
    .map_err(|err| map_unique(err, "invoice_number"))?;
    tx.commit().await?;
    tracing::debug!(
        target: "lawdesk",
        event = "invoice_created",
        id = invoice.id.as_str(),
        invoice_number = invoice.invoice_number.as_str(),
    );
    Ok(invoice)
}

pub async fn get(pool: &SqlitePool, id: &str) -> AppResult<Option<Invoice>> {
    let invoice = sqlx::query_as::<_, Invoice>("SELECT * FROM invoices WHERE id = ?1")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(invoice)
}

/// Most recently issued first.
pub async fn list(pool: &SqlitePool, filter: &InvoiceFilter) -> AppResult<Vec<Invoice>> {
    let mut sql = String::from("SELECT * FROM invoices");
    let mut clauses: Vec<String> = Vec::new();
    let mut binds: Vec<Arg> = Vec::new();

    if let Some(raw) = filter
        .status
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
    {
        let status: InvoiceStatus = raw.parse()?;
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
    if !clauses.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&clauses.join(" AND "));
    }
    sql.push_str(" ORDER BY issue_date DESC, id DESC");

    let query = sqlx::query_as::<_, Invoice>(&sql);
    Ok(bind_args(query, &binds).fetch_all(pool).await?)
}

pub async fn update(pool: &SqlitePool, id: &str, patch: InvoicePatch) -> AppResult<Option<Invoice>> {
    let Some(mut invoice) = get(pool, id).await? else {
        return Ok(None);
    };
    if let Some(v) = patch.invoice_number {
        invoice.invoice_number = required("invoice_number", &v)?;
    }
    if let Some(v) = patch.client_id {
        invoice.client_id = required("client_id", &v)?;
    }
    if let Some(v) = patch.case_id {
        invoice.case_id = optional(v);
    }
    if let Some(v) = patch.issue_date {
        invoice.issue_date = v;
    }
    if let Some(v) = patch.due_date {
        invoice.due_date = v;
    }
    if let Some(v) = patch.description {
        invoice.description = optional(v);
    }
    let amounts_patched = patch.amount_cents.is_some() || patch.tax_cents.is_some();
    if let Some(v) = patch.amount_cents {
        invoice.amount_cents = non_negative("amount_cents", v)?;
    }
    if let Some(v) = patch.tax_cents {
        invoice.tax_cents = non_negative("tax_cents", v)?;
    }
    match patch.total_cents {
        Some(v) => invoice.total_cents = non_negative("total_cents", v)?,
        None if amounts_patched => {
            invoice.total_cents = invoice.amount_cents + invoice.tax_cents;
        }
        None => {}
    }
    if let Some(v) = patch.status {
        invoice.status = required("status", &v)?.parse()?;
    }
    let paid_at_patched = patch.paid_at.is_some();
    if let Some(v) = patch.paid_at {
        invoice.paid_at = v;
    }
    // Marking paid stamps the payment time; leaving paid clears it, unless
    // the caller set paid_at explicitly.
    if invoice.status == InvoiceStatus::Paid {
        if invoice.paid_at.is_none() {
            invoice.paid_at = Some(crate::time::now_ms());
        }
    } else if !paid_at_patched {
        invoice.paid_at = None;
    }
    if let Some(v) = patch.notes {
        invoice.notes = optional(v);
    }
    invoice.updated_at = crate::time::now_ms();

    sqlx::query(
        "UPDATE invoices SET invoice_number = ?1, client_id = ?2, case_id = ?3, issue_date = ?4, \
         due_date = ?5, description = ?6, amount_cents = ?7, tax_cents = ?8, total_cents = ?9, \
         status = ?10, paid_at = ?11, notes = ?12, updated_at = ?13 WHERE id = ?14",
    )
    .bind(&invoice.invoice_number)
    .bind(&invoice.client_id)
    .bind(&invoice.case_id)
    .bind(invoice.issue_date)
    .bind(invoice.due_date)
    .bind(&invoice.description)
    .bind(invoice.amount_cents)
    .bind(invoice.tax_cents)
    .bind(invoice.total_cents)
    .bind(invoice.status)
    .bind(invoice.paid_at)
    .bind(&invoice.notes)
    .bind(invoice.updated_at)
    .bind(id)
    .execute(pool)
    .await
    .map_err(|err| map_unique(err, "invoice_number"))?;
    tracing::debug!(target: "lawdesk", event = "invoice_updated", id);
    Ok(Some(invoice))
}

pub async fn delete(pool: &SqlitePool, id: &str) -> AppResult<bool> {
    let result = sqlx::query("DELETE FROM invoices WHERE id = ?1")
        .bind(id)
        .execute(pool)
        .await?;
    let deleted = result.rows_affected() > 0;
    if deleted {
        tracing::debug!(target: "lawdesk", event = "invoice_deleted", id);
    }
    Ok(deleted)
}
