//! Domain-specific error types following panic-free policy.

use crate::CatalogId;
use thiserror::Error;

/// Errors that can occur in domain operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A duration string could not be parsed
    #[error("Invalid duration {input:?}: {reason}")]
    InvalidDuration { input: String, reason: String },

    /// A record's total does not match the sum of its daily entries
    #[error("Inconsistent record {catalog_id}: total {total_seconds}s, daily sum {daily_sum}s")]
    InconsistentRecord {
        catalog_id: CatalogId,
        total_seconds: u64,
        daily_sum: u64,
    },

    /// Invalid field value
    #[error("Invalid {field}: {value} (expected {expected})")]
    InvalidFieldValue {
        field: String,
        value: String,
        expected: String,
    },
}

/// Result type for domain operations.
pub type DomainResult<T> = Result<T, DomainError>;
