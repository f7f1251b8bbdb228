//! Ledger Repositories
//!
//! One trait per ledger entity. Orchestrators only see these traits; the
//! Postgres implementation lives in [`pg`], the in-memory test double in
//! `memory` (test builds only).
//!
//! Conditional updates return `bool` (true = row changed) so callers can
//! detect that another worker got there first.

pub mod pg;

#[cfg(test)]
pub mod memory;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc, Weekday};

use super::error::PayoutError;
use super::state::{GatewayStatus, TransferStatus};
use super::types::{
    ActorId, Amount, AttemptId, GatewayTransferAttempt, IntermediateTransfer, NewTransfer,
    PayeeAccount, PayeeAccountId, Transaction, TransactionId, Transfer, TransferId,
    TransferMethod,
};

pub use pg::PgPayoutStore;

#[async_trait]
pub trait PayeeAccountRepository: Send + Sync {
    async fn get(&self, id: PayeeAccountId) -> Result<Option<PayeeAccount>, PayoutError>;

    /// Accounts whose scheduled payout falls on `day`, ordered by id
    async fn list_by_payout_day(
        &self,
        day: Weekday,
        after_id: PayeeAccountId,
        limit: i64,
    ) -> Result<Vec<PayeeAccount>, PayoutError>;
}

#[async_trait]
pub trait TransactionRepository: Send + Sync {
    /// Unattached transactions of a payee created in `[start, end)`
    async fn list_unattached(
        &self,
        payee_account_id: PayeeAccountId,
        start: Option<DateTime<Utc>>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Transaction>, PayoutError>;

    async fn list_by_transfer(
        &self,
        transfer_id: TransferId,
    ) -> Result<Vec<Transaction>, PayoutError>;

    /// Claim transactions for a transfer. Only rows still unattached are
    /// updated; returns the number of rows claimed.
    async fn assign_transfer(
        &self,
        ids: &[TransactionId],
        transfer_id: TransferId,
    ) -> Result<u64, PayoutError>;

    /// Corrective release of every transaction attached to a transfer
    async fn unassign_transfer(&self, transfer_id: TransferId) -> Result<u64, PayoutError>;
}

#[async_trait]
pub trait TransferRepository: Send + Sync {
    async fn create(&self, new: NewTransfer) -> Result<Transfer, PayoutError>;

    async fn get(&self, id: TransferId) -> Result<Option<Transfer>, PayoutError>;

    async fn update_status(
        &self,
        id: TransferId,
        status: TransferStatus,
        status_code: Option<&str>,
    ) -> Result<(), PayoutError>;

    /// Atomic CAS: update only if the current status matches `expected`
    async fn update_status_if(
        &self,
        id: TransferId,
        expected: TransferStatus,
        new_status: TransferStatus,
    ) -> Result<bool, PayoutError>;

    async fn mark_submitted(
        &self,
        id: TransferId,
        status: TransferStatus,
        method: TransferMethod,
        submitted_by: Option<ActorId>,
        submitted_at: DateTime<Utc>,
    ) -> Result<(), PayoutError>;

    async fn mark_deleted(
        &self,
        id: TransferId,
        deleted_at: DateTime<Utc>,
    ) -> Result<(), PayoutError>;

    /// Unsubmitted, undeleted transfers in one of `statuses` created before `older_than`
    async fn find_stuck(
        &self,
        statuses: &[TransferStatus],
        older_than: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Transfer>, PayoutError>;

    /// Gateway transfers submitted at or after `since`
    async fn find_submitted_since(
        &self,
        since: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Transfer>, PayoutError>;
}

#[async_trait]
pub trait GatewayAttemptRepository: Send + Sync {
    /// Insert a new attempt in `submitting`
    async fn create(&self, transfer_id: TransferId) -> Result<GatewayTransferAttempt, PayoutError>;

    async fn list_by_transfer(
        &self,
        transfer_id: TransferId,
    ) -> Result<Vec<GatewayTransferAttempt>, PayoutError>;

    /// Highest-id attempt, the authoritative one for status derivation
    async fn get_latest(
        &self,
        transfer_id: TransferId,
    ) -> Result<Option<GatewayTransferAttempt>, PayoutError>;

    async fn get_by_gateway_id(
        &self,
        gateway_id: &str,
    ) -> Result<Option<GatewayTransferAttempt>, PayoutError>;

    async fn mark_submitted(
        &self,
        id: AttemptId,
        gateway_id: &str,
        gateway_status: GatewayStatus,
        bank_last4: Option<&str>,
        submitted_at: DateTime<Utc>,
    ) -> Result<(), PayoutError>;

    async fn mark_failed_to_submit(
        &self,
        id: AttemptId,
        failure_code: Option<&str>,
    ) -> Result<(), PayoutError>;

    /// Apply a gateway status observation.
    ///
    /// Never overwrites a stored `failed` status. When `event_at` is given the
    /// update only applies if it is strictly newer than the last applied
    /// event. Returns whether the row changed.
    async fn update_gateway_status(
        &self,
        id: AttemptId,
        status: GatewayStatus,
        failure_code: Option<&str>,
        event_at: Option<DateTime<Utc>>,
    ) -> Result<bool, PayoutError>;

    /// Attempts still `submitting` whose row was last touched before `older_than`
    async fn find_stale_submitting(
        &self,
        older_than: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<GatewayTransferAttempt>, PayoutError>;
}

#[async_trait]
pub trait IntermediateTransferRepository: Send + Sync {
    async fn get_by_transfer_id(
        &self,
        transfer_id: TransferId,
    ) -> Result<Option<IntermediateTransfer>, PayoutError>;

    /// Insert; the store enforces one row per transfer
    async fn create(
        &self,
        transfer_id: TransferId,
        payee_account_id: PayeeAccountId,
        currency: &str,
        amount: Amount,
    ) -> Result<IntermediateTransfer, PayoutError>;

    async fn update_amount(&self, id: i64, amount: Amount) -> Result<(), PayoutError>;

    async fn mark_submitted(
        &self,
        id: i64,
        gateway_transfer_id: &str,
        gateway_status: &str,
        submitted_at: DateTime<Utc>,
    ) -> Result<(), PayoutError>;
}

/// Repository handles injected into orchestrators, monitors and webhooks
#[derive(Clone)]
pub struct PayoutStore {
    pub accounts: Arc<dyn PayeeAccountRepository>,
    pub transactions: Arc<dyn TransactionRepository>,
    pub transfers: Arc<dyn TransferRepository>,
    pub attempts: Arc<dyn GatewayAttemptRepository>,
    pub intermediates: Arc<dyn IntermediateTransferRepository>,
}

impl PayoutStore {
    /// All repositories backed by one Postgres pool
    pub fn postgres(pool: sqlx::PgPool) -> Self {
        let store = Arc::new(PgPayoutStore::new(pool));
        Self {
            accounts: store.clone(),
            transactions: store.clone(),
            transfers: store.clone(),
            attempts: store.clone(),
            intermediates: store,
        }
    }

    #[cfg(test)]
    pub fn memory(store: Arc<memory::MemoryStore>) -> Self {
        Self {
            accounts: store.clone(),
            transactions: store.clone(),
            transfers: store.clone(),
            attempts: store.clone(),
            intermediates: store,
        }
    }
}
