use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::error::AppError;

/// Parse failure for any of the closed enum fields below. Carries the field
/// name so API errors can point at the offending input.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("invalid {field}: {value}")]
pub struct EnumParseError {
    field: &'static str,
    value: String,
}

impl EnumParseError {
    fn new(field: &'static str, value: impl Into<String>) -> Self {
        Self {
            field,
            value: value.into(),
        }
    }

    pub fn field(&self) -> &'static str {
        self.field
    }

    pub fn value(&self) -> &str {
        &self.value
    }
}

impl From<EnumParseError> for AppError {
    fn from(err: EnumParseError) -> Self {
        AppError::new("VALIDATION/ENUM", err.to_string())
            .with_context("field", err.field)
            .with_context("value", err.value().to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum UserRole {
    Admin,
    Lawyer,
    Secretary,
}

impl UserRole {
    pub const ALL: [UserRole; 3] = [UserRole::Admin, UserRole::Lawyer, UserRole::Secretary];

    pub const fn as_str(self) -> &'static str {
        match self {
            UserRole::Admin => "admin",
            UserRole::Lawyer => "lawyer",
            UserRole::Secretary => "secretary",
        }
    }
}

impl FromStr for UserRole {
    type Err = EnumParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "admin" => Ok(UserRole::Admin),
            "lawyer" => Ok(UserRole::Lawyer),
            "secretary" => Ok(UserRole::Secretary),
            other => Err(EnumParseError::new("role", other)),
        }
    }
}

impl fmt::Display for UserRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum CaseStatus {
    Active,
    Closed,
    Suspended,
}

impl CaseStatus {
    pub const ALL: [CaseStatus; 3] = [
        CaseStatus::Active,
        CaseStatus::Closed,
        CaseStatus::Suspended,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            CaseStatus::Active => "active",
            CaseStatus::Closed => "closed",
            CaseStatus::Suspended => "suspended",
        }
    }
}

impl Default for CaseStatus {
    fn default() -> Self {
        CaseStatus::Active
    }
}

impl FromStr for CaseStatus {
    type Err = EnumParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(CaseStatus::Active),
            "closed" => Ok(CaseStatus::Closed),
            "suspended" => Ok(CaseStatus::Suspended),
            other => Err(EnumParseError::new("status", other)),
        }
    }
}

impl fmt::Display for CaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Canonical document categories. The list is finite and matches the
/// CHECK constraint on `client_documents.document_type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum DocumentType {
    Identity,
    PowerOfAttorney,
    Contract,
    Other,
}

impl DocumentType {
    pub const ALL: [DocumentType; 4] = [
        DocumentType::Identity,
        DocumentType::PowerOfAttorney,
        DocumentType::Contract,
        DocumentType::Other,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            DocumentType::Identity => "identity",
            DocumentType::PowerOfAttorney => "power_of_attorney",
            DocumentType::Contract => "contract",
            DocumentType::Other => "other",
        }
    }

    pub fn iter() -> impl Iterator<Item = DocumentType> {
        Self::ALL.into_iter()
    }
}

impl FromStr for DocumentType {
    type Err = EnumParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "identity" => Ok(DocumentType::Identity),
            "power_of_attorney" => Ok(DocumentType::PowerOfAttorney),
            "contract" => Ok(DocumentType::Contract),
            "other" => Ok(DocumentType::Other),
            other => Err(EnumParseError::new("document_type", other)),
        }
    }
}

impl fmt::Display for DocumentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum AppointmentStatus {
    Scheduled,
    Completed,
    Cancelled,
}

impl AppointmentStatus {
    pub const ALL: [AppointmentStatus; 3] = [
        AppointmentStatus::Scheduled,
        AppointmentStatus::Completed,
        AppointmentStatus::Cancelled,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            AppointmentStatus::Scheduled => "scheduled",
            AppointmentStatus::Completed => "completed",
            AppointmentStatus::Cancelled => "cancelled",
        }
    }
}

impl Default for AppointmentStatus {
    fn default() -> Self {
        AppointmentStatus::Scheduled
    }
}

impl FromStr for AppointmentStatus {
    type Err = EnumParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "scheduled" => Ok(AppointmentStatus::Scheduled),
            "completed" => Ok(AppointmentStatus::Completed),
            "cancelled" => Ok(AppointmentStatus::Cancelled),
            other => Err(EnumParseError::new("status", other)),
        }
    }
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum InvoiceStatus {
    Pending,
    Paid,
    Overdue,
    Cancelled,
}

impl InvoiceStatus {
    pub const ALL: [InvoiceStatus; 4] = [
        InvoiceStatus::Pending,
        InvoiceStatus::Paid,
        InvoiceStatus::Overdue,
        InvoiceStatus::Cancelled,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            InvoiceStatus::Pending => "pending",
            InvoiceStatus::Paid => "paid",
            InvoiceStatus::Overdue => "overdue",
            InvoiceStatus::Cancelled => "cancelled",
        }
    }

    /// Statuses that still count toward receivables.
    pub const fn is_outstanding(self) -> bool {
        matches!(self, InvoiceStatus::Pending | InvoiceStatus::Overdue)
    }
}

impl Default for InvoiceStatus {
    fn default() -> Self {
        InvoiceStatus::Pending
    }
}

impl FromStr for InvoiceStatus {
    type Err = EnumParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(InvoiceStatus::Pending),
            "paid" => Ok(InvoiceStatus::Paid),
            "overdue" => Ok(InvoiceStatus::Overdue),
            "cancelled" => Ok(InvoiceStatus::Cancelled),
            other => Err(EnumParseError::new("status", other)),
        }
    }
}

impl fmt::Display for InvoiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: String,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub role: UserRole,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Client {
    pub id: String,
    pub first_name: String,
    pub last_name: String,
    pub national_id: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub address: Option<String>,
    pub notes: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Case {
    pub id: String,
    pub case_number: String,
    pub title: String,
    pub case_type: Option<String>,
    pub status: CaseStatus,
    pub description: Option<String>,
    pub court_name: Option<String>,
    pub judge_name: Option<String>,
    pub next_hearing_date: Option<i64>,
    pub client_id: String,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct ClientDocument {
    pub id: String,
    pub document_type: DocumentType,
    pub description: Option<String>,
    /// Name the file is expected to have inside the uploads directory.
    pub stored_name: String,
    /// Name the file had when it was registered.
    pub original_name: String,
    pub size_bytes: Option<i64>,
    pub client_id: String,
    pub case_id: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Appointment {
    pub id: String,
    pub title: String,
    pub description: Option<String>,
    pub location: Option<String>,
    pub scheduled_at: i64,
    pub duration_minutes: i64,
    pub status: AppointmentStatus,
    pub client_id: Option<String>,
    pub case_id: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Invoice {
    pub id: String,
    pub invoice_number: String,
    pub client_id: String,
    pub case_id: Option<String>,
    pub issue_date: i64,
    pub due_date: i64,
    pub description: Option<String>,
    pub amount_cents: i64,
    pub tax_cents: i64,
    pub total_cents: i64,
    pub status: InvoiceStatus,
    pub paid_at: Option<i64>,
    pub notes: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_type_round_trips() {
        for variant in DocumentType::iter() {
            let slug = variant.as_str();
            let parsed = DocumentType::from_str(slug).expect("parse");
            assert_eq!(variant, parsed);
            assert_eq!(slug, parsed.to_string());
        }
    }

    #[test]
    fn statuses_round_trip() {
        for variant in CaseStatus::ALL {
            assert_eq!(CaseStatus::from_str(variant.as_str()).unwrap(), variant);
        }
        for variant in AppointmentStatus::ALL {
            assert_eq!(
                AppointmentStatus::from_str(variant.as_str()).unwrap(),
                variant
            );
        }
        for variant in InvoiceStatus::ALL {
            assert_eq!(InvoiceStatus::from_str(variant.as_str()).unwrap(), variant);
        }
        for variant in UserRole::ALL {
            assert_eq!(UserRole::from_str(variant.as_str()).unwrap(), variant);
        }
    }

    #[test]
    fn rejects_unknown_with_field_name() {
        let err = DocumentType::from_str("passport").unwrap_err();
        assert_eq!(err.field(), "document_type");
        assert_eq!(err.value(), "passport");

        let app: AppError = err.into();
        assert_eq!(app.code(), "VALIDATION/ENUM");
        assert_eq!(
            app.context().get("value"),
            Some(&"passport".to_string())
        );
    }

    #[test]
    fn serde_uses_snake_case() {
        let json = serde_json::to_string(&DocumentType::PowerOfAttorney).unwrap();
        assert_eq!(json, "\"power_of_attorney\"");
        let back: DocumentType = serde_json::from_str("\"power_of_attorney\"").unwrap();
        assert_eq!(back, DocumentType::PowerOfAttorney);
    }

    #[test]
    fn outstanding_statuses() {
        assert!(InvoiceStatus::Pending.is_outstanding());
        assert!(InvoiceStatus::Overdue.is_outstanding());
        assert!(!InvoiceStatus::Paid.is_outstanding());
        assert!(!InvoiceStatus::Cancelled.is_outstanding());
    }
}
