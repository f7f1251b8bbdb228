//! Payout Core Types
//!
//! Ledger records, request/outcome types and small value enums.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc, Weekday};
use serde::{Deserialize, Serialize};

use super::error::PayoutError;
use super::state::{GatewayStatus, SubmissionStatus, TransferStatus};

/// Money in minor currency units (cents). Never a float.
pub type Amount = i64;
pub type TransferId = i64;
pub type TransactionId = i64;
pub type PayeeAccountId = i64;
pub type AttemptId = i64;
/// Operator or service identity recorded as `created_by` / `submitted_by`
pub type ActorId = i64;

/// How a transfer is paid out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferMethod {
    /// Payout through the payment gateway
    Gateway,
    /// Paid outside the system by check
    Check,
    /// Administrative no-op, nothing moves
    NoOp,
}

impl TransferMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferMethod::Gateway => "gateway",
            TransferMethod::Check => "check",
            TransferMethod::NoOp => "no_op",
        }
    }
}

impl fmt::Display for TransferMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for TransferMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "gateway" | "stripe" => Ok(TransferMethod::Gateway),
            "check" => Ok(TransferMethod::Check),
            "no_op" | "noop" => Ok(TransferMethod::NoOp),
            _ => Err(format!("Invalid transfer method: {}", s)),
        }
    }
}

/// Origin of a create-transfer request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferType {
    /// Weekly/daily payout run; eligibility gates apply
    Scheduled,
    /// Operator-initiated; gates are skipped
    Manual,
}

/// One unit of payable work
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    pub id: TransactionId,
    pub payee_account_id: PayeeAccountId,
    pub amount: Amount,
    pub transfer_id: Option<TransferId>,
    pub created_at: DateTime<Utc>,
}

/// Payee (driver / merchant) account as seen by the payout engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayeeAccount {
    pub id: PayeeAccountId,
    /// Payee category used to tag metrics ("dasher", "merchant", ...)
    pub category: String,
    pub currency: String,
    /// Connected sub-account at the gateway
    pub gateway_account_id: Option<String>,
    pub gateway_country: Option<String>,
    pub payout_day: Option<Weekday>,
    pub payouts_disabled: bool,
    pub bank_updated_at: Option<DateTime<Utc>>,
}

/// Aggregation of transactions awaiting one payout
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transfer {
    pub id: TransferId,
    pub payee_account_id: PayeeAccountId,
    pub currency: String,
    pub subtotal: Amount,
    pub amount: Amount,
    pub method: Option<TransferMethod>,
    pub status: TransferStatus,
    pub status_code: Option<String>,
    pub created_by: Option<ActorId>,
    pub created_at: DateTime<Utc>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub submitted_by: Option<ActorId>,
    pub deleted_at: Option<DateTime<Utc>>,
}

/// Insert payload for a transfer
#[derive(Debug, Clone)]
pub struct NewTransfer {
    pub payee_account_id: PayeeAccountId,
    pub currency: String,
    pub amount: Amount,
    pub method: Option<TransferMethod>,
    pub status: TransferStatus,
    pub created_by: Option<ActorId>,
}

/// Funds moved from the pooled balance into the payee's gateway sub-account
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntermediateTransfer {
    pub id: i64,
    pub transfer_id: TransferId,
    pub payee_account_id: PayeeAccountId,
    pub currency: String,
    pub amount: Amount,
    pub gateway_transfer_id: Option<String>,
    pub gateway_status: Option<String>,
    pub submitted_at: Option<DateTime<Utc>>,
}

impl IntermediateTransfer {
    /// Funds for this row have been moved at least once
    #[inline]
    pub fn is_submitted(&self) -> bool {
        self.gateway_transfer_id.is_some()
    }
}

/// One discrete payout call against the gateway
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayTransferAttempt {
    /// Also the idempotency key sent to the gateway
    pub id: AttemptId,
    pub transfer_id: TransferId,
    pub gateway_id: Option<String>,
    pub gateway_status: Option<GatewayStatus>,
    pub failure_code: Option<String>,
    pub submission_status: SubmissionStatus,
    pub bank_last4: Option<String>,
    pub submitted_at: Option<DateTime<Utc>>,
    /// `created` of the newest webhook event applied to this attempt
    pub last_event_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl GatewayTransferAttempt {
    /// Not failed/canceled: blocks any new submission for the transfer
    pub fn is_ongoing(&self) -> bool {
        if self.submission_status == SubmissionStatus::FailedToSubmit {
            return false;
        }
        !self.gateway_status.is_some_and(|s| s.is_failure())
    }

    pub fn idempotency_key(&self) -> String {
        format!("payout-attempt-{}", self.id)
    }
}

/// Create-transfer input
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateTransferRequest {
    pub payee_account_id: PayeeAccountId,
    pub end_time: DateTime<Utc>,
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub payout_day: Option<Weekday>,
    #[serde(default)]
    pub payout_countries: Option<Vec<String>>,
    pub transfer_type: TransferType,
    #[serde(default)]
    pub submit_after_creation: bool,
    #[serde(default)]
    pub created_by: Option<ActorId>,
}

impl CreateTransferRequest {
    pub fn new(
        payee_account_id: PayeeAccountId,
        end_time: DateTime<Utc>,
        transfer_type: TransferType,
    ) -> Self {
        Self {
            payee_account_id,
            end_time,
            start_time: None,
            payout_day: None,
            payout_countries: None,
            transfer_type,
            submit_after_creation: false,
            created_by: None,
        }
    }
}

/// Why a create-transfer request produced no transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    PayoutDayNotMatch,
    PayoutCountryNotMatch,
    PayeeBlocked,
    BankChangeHold,
    NoUnpaidTransactions,
}

impl SkipReason {
    pub fn code(&self) -> &'static str {
        match self {
            SkipReason::PayoutDayNotMatch => "PAYOUT_DAY_NOT_MATCH",
            SkipReason::PayoutCountryNotMatch => "PAYOUT_COUNTRY_NOT_MATCH",
            SkipReason::PayeeBlocked => "PAYOUT_BLOCKED",
            SkipReason::BankChangeHold => "RECENTLY_UPDATED_BANK",
            SkipReason::NoUnpaidTransactions => "NO_UNPAID_TRANSACTIONS",
        }
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Create-transfer result: expected business outcomes are values, not errors
#[derive(Debug, Clone, PartialEq)]
pub enum CreateTransferOutcome {
    Created {
        transfer: Transfer,
        /// Transactions actually claimed by this transfer
        attached: u64,
    },
    Skipped(SkipReason),
}

impl CreateTransferOutcome {
    pub fn transfer(&self) -> Option<&Transfer> {
        match self {
            CreateTransferOutcome::Created { transfer, .. } => Some(transfer),
            CreateTransferOutcome::Skipped(_) => None,
        }
    }

    pub fn skip_reason(&self) -> Option<SkipReason> {
        match self {
            CreateTransferOutcome::Created { .. } => None,
            CreateTransferOutcome::Skipped(reason) => Some(*reason),
        }
    }
}

/// Submit-transfer input
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitTransferRequest {
    pub transfer_id: TransferId,
    pub method: TransferMethod,
    #[serde(default)]
    pub retry: bool,
    #[serde(default)]
    pub submitted_by: Option<ActorId>,
}

impl SubmitTransferRequest {
    pub fn new(transfer_id: TransferId, method: TransferMethod) -> Self {
        Self {
            transfer_id,
            method,
            retry: false,
            submitted_by: None,
        }
    }

    pub fn with_retry(mut self) -> Self {
        self.retry = true;
        self
    }
}

/// Submit-transfer result
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitTransferOutcome {
    pub transfer_id: TransferId,
    pub status: TransferStatus,
    /// Gateway attempt created by this submission (none for dummy transfers)
    pub attempt_id: Option<AttemptId>,
}

/// Sum amounts without silent overflow
pub fn sum_amounts<I>(amounts: I) -> Result<Amount, PayoutError>
where
    I: IntoIterator<Item = Amount>,
{
    amounts.into_iter().try_fold(0i64, |acc, amount| {
        acc.checked_add(amount)
            .ok_or_else(|| PayoutError::SystemError("Amount overflow".to_string()))
    })
}
