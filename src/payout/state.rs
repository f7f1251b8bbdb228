//! Transfer State Definitions
//!
//! Local transfer statuses, gateway statuses, and the fixed mapping between
//! them. The mapping is shared by submission, the drift sweep and webhooks.

use std::fmt;
use std::str::FromStr;

use super::types::{GatewayTransferAttempt, Transfer, TransferMethod};

/// Local transfer status
///
/// State IDs are designed for PostgreSQL storage as SMALLINT.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i16)]
pub enum TransferStatus {
    /// Row inserted, transactions not yet attached
    Creating = 0,
    /// Transactions attached, not yet submitted
    New = 10,
    Created = 20,
    Pending = 30,
    InTransit = 40,
    /// Terminal: funds reached the payee
    Paid = 50,
    /// Terminal: gateway rejected or failed the payout
    Failed = -10,
    /// Terminal: payout cancelled at the gateway
    Cancelled = -20,
    /// Local failure, see `status_code`
    Error = -30,
    /// Soft-deleted or emptied transfer
    Deleted = -40,
}

impl TransferStatus {
    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            0 => Some(TransferStatus::Creating),
            10 => Some(TransferStatus::New),
            20 => Some(TransferStatus::Created),
            30 => Some(TransferStatus::Pending),
            40 => Some(TransferStatus::InTransit),
            50 => Some(TransferStatus::Paid),
            -10 => Some(TransferStatus::Failed),
            -20 => Some(TransferStatus::Cancelled),
            -30 => Some(TransferStatus::Error),
            -40 => Some(TransferStatus::Deleted),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransferStatus::Creating => "CREATING",
            TransferStatus::New => "NEW",
            TransferStatus::Created => "CREATED",
            TransferStatus::Pending => "PENDING",
            TransferStatus::InTransit => "IN_TRANSIT",
            TransferStatus::Paid => "PAID",
            TransferStatus::Failed => "FAILED",
            TransferStatus::Cancelled => "CANCELLED",
            TransferStatus::Error => "ERROR",
            TransferStatus::Deleted => "DELETED",
        }
    }

    /// Map a gateway payout status onto the local status
    pub fn from_gateway(status: GatewayStatus) -> Self {
        match status {
            GatewayStatus::Canceled => TransferStatus::Cancelled,
            GatewayStatus::Paid => TransferStatus::Paid,
            GatewayStatus::Pending => TransferStatus::Pending,
            GatewayStatus::Failed => TransferStatus::Failed,
            GatewayStatus::InTransit => TransferStatus::InTransit,
            GatewayStatus::Created => TransferStatus::Created,
        }
    }
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<i16> for TransferStatus {
    type Error = ();

    fn try_from(value: i16) -> Result<Self, ()> {
        TransferStatus::from_id(value).ok_or(())
    }
}

/// Reason codes stored next to ERROR / FAILED statuses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferStatusCode {
    AmountMismatch,
    InvalidState,
    AmountLimitExceeded,
    NegativeAmount,
    InvalidPayeeAccount,
    NoGatewayAccount,
    GatewaySubmissionError,
    UnknownError,
}

impl TransferStatusCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferStatusCode::AmountMismatch => "amount_mismatch",
            TransferStatusCode::InvalidState => "invalid_state",
            TransferStatusCode::AmountLimitExceeded => "amount_limit_exceeded",
            TransferStatusCode::NegativeAmount => "negative_amount",
            TransferStatusCode::InvalidPayeeAccount => "invalid_payee_account",
            TransferStatusCode::NoGatewayAccount => "no_gateway_account",
            TransferStatusCode::GatewaySubmissionError => "gateway_submission_error",
            TransferStatusCode::UnknownError => "unknown_error",
        }
    }
}

impl fmt::Display for TransferStatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Payout status as reported by the gateway
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GatewayStatus {
    Pending,
    Paid,
    Failed,
    Canceled,
    InTransit,
    Created,
}

impl GatewayStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            GatewayStatus::Pending => "pending",
            GatewayStatus::Paid => "paid",
            GatewayStatus::Failed => "failed",
            GatewayStatus::Canceled => "canceled",
            GatewayStatus::InTransit => "in_transit",
            GatewayStatus::Created => "created",
        }
    }

    /// No further gateway transitions are expected
    #[inline]
    pub fn is_final(&self) -> bool {
        matches!(
            self,
            GatewayStatus::Paid | GatewayStatus::Failed | GatewayStatus::Canceled
        )
    }

    /// Failed or canceled: the attempt no longer blocks a resubmission
    #[inline]
    pub fn is_failure(&self) -> bool {
        matches!(self, GatewayStatus::Failed | GatewayStatus::Canceled)
    }
}

impl fmt::Display for GatewayStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for GatewayStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(GatewayStatus::Pending),
            "paid" => Ok(GatewayStatus::Paid),
            "failed" => Ok(GatewayStatus::Failed),
            "canceled" | "cancelled" => Ok(GatewayStatus::Canceled),
            "in_transit" => Ok(GatewayStatus::InTransit),
            "created" => Ok(GatewayStatus::Created),
            _ => Err(format!("Unknown gateway status: {}", s)),
        }
    }
}

/// Local bookkeeping of one payout call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i16)]
pub enum SubmissionStatus {
    /// Row persisted, gateway call issued or outcome unknown
    Submitting = 0,
    /// Gateway accepted the payout
    Submitted = 1,
    /// Gateway explicitly rejected the payout
    FailedToSubmit = -1,
}

impl SubmissionStatus {
    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            0 => Some(SubmissionStatus::Submitting),
            1 => Some(SubmissionStatus::Submitted),
            -1 => Some(SubmissionStatus::FailedToSubmit),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SubmissionStatus::Submitting => "submitting",
            SubmissionStatus::Submitted => "submitted",
            SubmissionStatus::FailedToSubmit => "failed_to_submit",
        }
    }
}

impl fmt::Display for SubmissionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Re-derive a transfer's status from its own fields and its latest attempt.
///
/// Returns `None` when the latest attempt carries no gateway status, i.e.
/// there is no gateway truth to derive from and the stored status stands.
pub fn derive_transfer_status(
    transfer: &Transfer,
    latest_attempt: Option<&GatewayTransferAttempt>,
) -> Option<TransferStatus> {
    let method = match transfer.method {
        Some(method) if transfer.deleted_at.is_none() => method,
        _ => return Some(TransferStatus::Deleted),
    };

    if (transfer.amount == 0 || method != TransferMethod::Gateway)
        && transfer.submitted_at.is_some()
    {
        return Some(TransferStatus::Paid);
    }

    match latest_attempt {
        Some(attempt) => attempt.gateway_status.map(TransferStatus::from_gateway),
        None => Some(TransferStatus::New),
    }
}
