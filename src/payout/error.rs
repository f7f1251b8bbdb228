//! Payout Error Types
//!
//! One error type for the whole payout domain. Every variant carries a stable
//! code, a retryable flag and an HTTP status suggestion so API callers and the
//! task queue can act on it without inspecting messages.

use serde::Serialize;
use thiserror::Error;

use super::types::{Amount, PayeeAccountId, TransferId};

/// Payout error types
#[derive(Error, Debug, Clone)]
pub enum PayoutError {
    // === Validation Errors ===
    #[error("Payee account not found: {0}")]
    InvalidPayeeAccount(PayeeAccountId),

    #[error("Transfer not found: {0}")]
    TransferNotFound(TransferId),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    // === State Conflict Errors ===
    #[error("Transfer {0} was deleted")]
    TransferDeleted(TransferId),

    #[error("Transfer amount {expected} does not match attached transactions {actual}")]
    AmountMismatch { expected: Amount, actual: Amount },

    #[error("Invalid transfer state: {0}")]
    InvalidState(String),

    #[error("Transfer {0} was already submitted")]
    DuplicateTransfer(TransferId),

    #[error("Payouts are disabled for transfer {0}")]
    TransferDisabled(TransferId),

    #[error("Transfer {0} has a gateway attempt in progress")]
    TransferProcessing(TransferId),

    #[error("Amount {amount} exceeds limit {limit}")]
    AmountLimitExceeded { amount: Amount, limit: Amount },

    #[error("Negative transfer amount: {0}")]
    NegativeAmount(Amount),

    #[error("Payee account {0} has no gateway account")]
    NoGatewayAccount(PayeeAccountId),

    // === Gateway Errors ===
    #[error("Gateway rejected payout: {code}")]
    GatewayFailed { code: String },

    #[error("Gateway submission error: {}", .code.as_deref().unwrap_or("unknown"))]
    GatewaySubmission { code: Option<String> },

    #[error("Gateway outcome unknown: {0}")]
    GatewayUnknown(String),

    // === Infrastructure Errors ===
    #[error("Lock busy: {0}")]
    LockBusy(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Task bus error: {0}")]
    TaskBus(String),

    #[error("Internal system error: {0}")]
    SystemError(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl PayoutError {
    /// Get the error code for API responses
    pub fn code(&self) -> &'static str {
        match self {
            PayoutError::InvalidPayeeAccount(_) => "INVALID_PAYEE_ACCOUNT",
            PayoutError::TransferNotFound(_) => "TRANSFER_NOT_FOUND",
            PayoutError::InvalidRequest(_) => "INVALID_REQUEST",
            PayoutError::TransferDeleted(_) => "TRANSFER_DELETED",
            PayoutError::AmountMismatch { .. } => "AMOUNT_MISMATCH",
            PayoutError::InvalidState(_) => "INVALID_STATE",
            PayoutError::DuplicateTransfer(_) => "DUPLICATE_TRANSFER",
            PayoutError::TransferDisabled(_) => "TRANSFER_DISABLED",
            PayoutError::TransferProcessing(_) => "TRANSFER_PROCESSING",
            PayoutError::AmountLimitExceeded { .. } => "AMOUNT_LIMIT_EXCEEDED",
            PayoutError::NegativeAmount(_) => "NEGATIVE_AMOUNT",
            PayoutError::NoGatewayAccount(_) => "NO_GATEWAY_ACCOUNT",
            PayoutError::GatewayFailed { .. } => "GATEWAY_FAILED",
            PayoutError::GatewaySubmission { .. } => "GATEWAY_SUBMISSION_ERROR",
            PayoutError::GatewayUnknown(_) => "GATEWAY_UNKNOWN_ERROR",
            PayoutError::LockBusy(_) => "LOCK_BUSY",
            PayoutError::DatabaseError(_) => "DATABASE_ERROR",
            PayoutError::TaskBus(_) => "TASK_BUS_ERROR",
            PayoutError::SystemError(_) => "SYSTEM_ERROR",
            PayoutError::InvalidConfig(_) => "INVALID_CONFIG",
        }
    }

    /// Whether the caller (or the task queue) may retry the operation
    pub fn retryable(&self) -> bool {
        matches!(
            self,
            PayoutError::GatewaySubmission { .. }
                | PayoutError::GatewayUnknown(_)
                | PayoutError::LockBusy(_)
                | PayoutError::DatabaseError(_)
                | PayoutError::TaskBus(_)
                | PayoutError::SystemError(_)
        )
    }

    /// Get HTTP status code suggestion
    pub fn http_status(&self) -> u16 {
        match self {
            PayoutError::InvalidPayeeAccount(_) | PayoutError::InvalidRequest(_) => 400,
            PayoutError::TransferNotFound(_) => 404,
            PayoutError::TransferDeleted(_)
            | PayoutError::DuplicateTransfer(_)
            | PayoutError::TransferProcessing(_)
            | PayoutError::LockBusy(_) => 409,
            PayoutError::AmountMismatch { .. }
            | PayoutError::InvalidState(_)
            | PayoutError::TransferDisabled(_)
            | PayoutError::AmountLimitExceeded { .. }
            | PayoutError::NegativeAmount(_)
            | PayoutError::NoGatewayAccount(_)
            | PayoutError::GatewayFailed { .. } => 422,
            PayoutError::GatewaySubmission { .. } | PayoutError::GatewayUnknown(_) => 502,
            PayoutError::DatabaseError(_)
            | PayoutError::TaskBus(_)
            | PayoutError::SystemError(_)
            | PayoutError::InvalidConfig(_) => 500,
        }
    }

    /// Build the user-visible `{error_code, error_message, retryable}` triple.
    ///
    /// Gateway errors only expose the extracted code, never the gateway's text.
    pub fn to_response(&self) -> ErrorResponse {
        let error_message = match self {
            PayoutError::GatewayUnknown(_) => "Payment gateway did not respond".to_string(),
            PayoutError::DatabaseError(_) | PayoutError::SystemError(_) => {
                "Internal error".to_string()
            }
            other => other.to_string(),
        };

        ErrorResponse {
            error_code: self.code().to_string(),
            error_message,
            retryable: self.retryable(),
        }
    }
}

impl From<sqlx::Error> for PayoutError {
    fn from(e: sqlx::Error) -> Self {
        PayoutError::DatabaseError(e.to_string())
    }
}

impl From<anyhow::Error> for PayoutError {
    fn from(e: anyhow::Error) -> Self {
        PayoutError::SystemError(e.to_string())
    }
}

/// Stable error body returned to API callers
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorResponse {
    pub error_code: String,
    pub error_message: String,
    pub retryable: bool,
}
