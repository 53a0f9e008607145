use rust_decimal::Decimal;
use serde_json::json;
use thiserror::Error;

/// Failures raised by the ledger, calendar and import layers.
///
/// Every variant maps onto one IPC error code, so handlers can forward these
/// without re-classifying them.
#[derive(Debug, Error)]
pub enum SchoolError {
    #[error("{0}")]
    Validation(String),

    #[error("date is not a working day: {reason}")]
    NonWorkingDay {
        reason: String,
        kind: &'static str,
        description: Option<String>,
    },

    #[error("a holiday already exists on this date: {title}")]
    DuplicateHoliday { title: String },

    #[error("payment amount {amount:.2} exceeds remaining balance {remaining:.2}")]
    ExceedsBalance { amount: Decimal, remaining: Decimal },

    #[error("no installment plan exists for this fee")]
    NoInstallmentPlan,

    #[error("student still has {count} fee record(s); delete them first")]
    StudentHasFees { count: i64 },

    #[error("{0}")]
    Duplicate(String),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("record was modified by another writer; reload and retry")]
    Conflict,

    #[error(transparent)]
    Storage(#[from] rusqlite::Error),
}

impl SchoolError {
    pub fn validation(message: impl Into<String>) -> Self {
        SchoolError::Validation(message.into())
    }

    pub fn code(&self) -> &'static str {
        match self {
            SchoolError::Validation(_) => "bad_params",
            SchoolError::NonWorkingDay { .. } => "non_working_day",
            SchoolError::DuplicateHoliday { .. } => "duplicate_holiday",
            SchoolError::ExceedsBalance { .. } => "payment_exceeds_balance",
            SchoolError::NoInstallmentPlan => "no_installment_plan",
            SchoolError::StudentHasFees { .. } => "student_has_fees",
            SchoolError::Duplicate(_) => "duplicate",
            SchoolError::NotFound(_) => "not_found",
            SchoolError::Conflict => "write_conflict",
            SchoolError::Storage(_) => "db_query_failed",
        }
    }

    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            SchoolError::NonWorkingDay {
                reason,
                kind,
                description,
            } => Some(json!({
                "reason": reason,
                "kind": kind,
                "description": description,
            })),
            SchoolError::DuplicateHoliday { title } => Some(json!({ "existingTitle": title })),
            SchoolError::ExceedsBalance { amount, remaining } => Some(json!({
                "amount": format!("{:.2}", amount),
                "remaining": format!("{:.2}", remaining),
            })),
            SchoolError::StudentHasFees { count } => Some(json!({ "feeCount": count })),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, SchoolError>;
