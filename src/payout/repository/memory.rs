//! In-memory ledger used by unit and scenario tests

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc, Weekday};

use crate::payout::error::PayoutError;
use crate::payout::state::{GatewayStatus, SubmissionStatus, TransferStatus};
use crate::payout::types::{
    ActorId, Amount, AttemptId, GatewayTransferAttempt, IntermediateTransfer, NewTransfer,
    PayeeAccount, PayeeAccountId, Transaction, TransactionId, Transfer, TransferId,
    TransferMethod,
};

use super::{
    GatewayAttemptRepository, IntermediateTransferRepository, PayeeAccountRepository,
    TransactionRepository, TransferRepository,
};

#[derive(Default)]
struct Inner {
    accounts: BTreeMap<PayeeAccountId, PayeeAccount>,
    transactions: BTreeMap<TransactionId, Transaction>,
    transfers: BTreeMap<TransferId, Transfer>,
    attempts: BTreeMap<AttemptId, GatewayTransferAttempt>,
    intermediates: BTreeMap<i64, IntermediateTransfer>,
    next_id: i64,
}

impl Inner {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with<R>(&self, f: impl FnOnce(&mut Inner) -> R) -> R {
        let mut guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut guard)
    }

    // === Seeding / inspection helpers ===

    pub fn add_account(&self, account: PayeeAccount) {
        self.with(|s| {
            s.accounts.insert(account.id, account);
        });
    }

    pub fn update_account(&self, id: PayeeAccountId, f: impl FnOnce(&mut PayeeAccount)) {
        self.with(|s| {
            if let Some(account) = s.accounts.get_mut(&id) {
                f(account);
            }
        });
    }

    pub fn add_transaction(&self, payee_account_id: PayeeAccountId, amount: Amount) -> TransactionId {
        self.add_transaction_at(payee_account_id, amount, Utc::now() - chrono::Duration::minutes(5))
    }

    pub fn add_transaction_at(
        &self,
        payee_account_id: PayeeAccountId,
        amount: Amount,
        created_at: DateTime<Utc>,
    ) -> TransactionId {
        self.with(|s| {
            let id = s.next_id();
            s.transactions.insert(
                id,
                Transaction {
                    id,
                    payee_account_id,
                    amount,
                    transfer_id: None,
                    created_at,
                },
            );
            id
        })
    }

    /// Attach a transaction directly, bypassing the unattached check
    pub fn attach(&self, transaction_id: TransactionId, transfer_id: TransferId) {
        self.with(|s| {
            if let Some(tx) = s.transactions.get_mut(&transaction_id) {
                tx.transfer_id = Some(transfer_id);
            }
        });
    }

    pub fn transaction(&self, id: TransactionId) -> Option<Transaction> {
        self.with(|s| s.transactions.get(&id).cloned())
    }

    pub fn transfer(&self, id: TransferId) -> Option<Transfer> {
        self.with(|s| s.transfers.get(&id).cloned())
    }

    pub fn transfers(&self) -> Vec<Transfer> {
        self.with(|s| s.transfers.values().cloned().collect())
    }

    pub fn update_transfer(&self, id: TransferId, f: impl FnOnce(&mut Transfer)) {
        self.with(|s| {
            if let Some(transfer) = s.transfers.get_mut(&id) {
                f(transfer);
            }
        });
    }

    pub fn attempts_of(&self, transfer_id: TransferId) -> Vec<GatewayTransferAttempt> {
        self.with(|s| {
            s.attempts
                .values()
                .filter(|a| a.transfer_id == transfer_id)
                .cloned()
                .collect()
        })
    }

    pub fn attempt(&self, id: AttemptId) -> Option<GatewayTransferAttempt> {
        self.with(|s| s.attempts.get(&id).cloned())
    }

    pub fn update_attempt(&self, id: AttemptId, f: impl FnOnce(&mut GatewayTransferAttempt)) {
        self.with(|s| {
            if let Some(attempt) = s.attempts.get_mut(&id) {
                f(attempt);
            }
        });
    }

    pub fn intermediate_of(&self, transfer_id: TransferId) -> Option<IntermediateTransfer> {
        self.with(|s| {
            s.intermediates
                .values()
                .find(|i| i.transfer_id == transfer_id)
                .cloned()
        })
    }
}

#[async_trait]
impl PayeeAccountRepository for MemoryStore {
    async fn get(&self, id: PayeeAccountId) -> Result<Option<PayeeAccount>, PayoutError> {
        Ok(self.with(|s| s.accounts.get(&id).cloned()))
    }

    async fn list_by_payout_day(
        &self,
        day: Weekday,
        after_id: PayeeAccountId,
        limit: i64,
    ) -> Result<Vec<PayeeAccount>, PayoutError> {
        Ok(self.with(|s| {
            s.accounts
                .values()
                .filter(|a| a.id > after_id && a.payout_day == Some(day))
                .take(limit.max(0) as usize)
                .cloned()
                .collect()
        }))
    }
}

#[async_trait]
impl TransactionRepository for MemoryStore {
    async fn list_unattached(
        &self,
        payee_account_id: PayeeAccountId,
        start: Option<DateTime<Utc>>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Transaction>, PayoutError> {
        Ok(self.with(|s| {
            s.transactions
                .values()
                .filter(|t| {
                    t.payee_account_id == payee_account_id
                        && t.transfer_id.is_none()
                        && t.created_at < end
                        && start.is_none_or(|start| t.created_at >= start)
                })
                .cloned()
                .collect()
        }))
    }

    async fn list_by_transfer(
        &self,
        transfer_id: TransferId,
    ) -> Result<Vec<Transaction>, PayoutError> {
        Ok(self.with(|s| {
            s.transactions
                .values()
                .filter(|t| t.transfer_id == Some(transfer_id))
                .cloned()
                .collect()
        }))
    }

    async fn assign_transfer(
        &self,
        ids: &[TransactionId],
        transfer_id: TransferId,
    ) -> Result<u64, PayoutError> {
        Ok(self.with(|s| {
            let mut updated = 0;
            for id in ids {
                if let Some(tx) = s.transactions.get_mut(id)
                    && tx.transfer_id.is_none()
                {
                    tx.transfer_id = Some(transfer_id);
                    updated += 1;
                }
            }
            updated
        }))
    }

    async fn unassign_transfer(&self, transfer_id: TransferId) -> Result<u64, PayoutError> {
        Ok(self.with(|s| {
            let mut updated = 0;
            for tx in s.transactions.values_mut() {
                if tx.transfer_id == Some(transfer_id) {
                    tx.transfer_id = None;
                    updated += 1;
                }
            }
            updated
        }))
    }
}

#[async_trait]
impl TransferRepository for MemoryStore {
    async fn create(&self, new: NewTransfer) -> Result<Transfer, PayoutError> {
        Ok(self.with(|s| {
            let id = s.next_id();
            let transfer = Transfer {
                id,
                payee_account_id: new.payee_account_id,
                currency: new.currency,
                subtotal: new.amount,
                amount: new.amount,
                method: new.method,
                status: new.status,
                status_code: None,
                created_by: new.created_by,
                created_at: Utc::now(),
                submitted_at: None,
                submitted_by: None,
                deleted_at: None,
            };
            s.transfers.insert(id, transfer.clone());
            transfer
        }))
    }

    async fn get(&self, id: TransferId) -> Result<Option<Transfer>, PayoutError> {
        Ok(self.with(|s| s.transfers.get(&id).cloned()))
    }

    async fn update_status(
        &self,
        id: TransferId,
        status: TransferStatus,
        status_code: Option<&str>,
    ) -> Result<(), PayoutError> {
        self.with(|s| {
            if let Some(t) = s.transfers.get_mut(&id) {
                t.status = status;
                t.status_code = status_code.map(str::to_string);
            }
        });
        Ok(())
    }

    async fn update_status_if(
        &self,
        id: TransferId,
        expected: TransferStatus,
        new_status: TransferStatus,
    ) -> Result<bool, PayoutError> {
        Ok(self.with(|s| match s.transfers.get_mut(&id) {
            Some(t) if t.status == expected => {
                t.status = new_status;
                true
            }
            _ => false,
        }))
    }

    async fn mark_submitted(
        &self,
        id: TransferId,
        status: TransferStatus,
        method: TransferMethod,
        submitted_by: Option<ActorId>,
        submitted_at: DateTime<Utc>,
    ) -> Result<(), PayoutError> {
        self.with(|s| {
            if let Some(t) = s.transfers.get_mut(&id) {
                t.status = status;
                t.status_code = None;
                t.method = Some(method);
                t.submitted_by = submitted_by;
                t.submitted_at = Some(submitted_at);
            }
        });
        Ok(())
    }

    async fn mark_deleted(
        &self,
        id: TransferId,
        deleted_at: DateTime<Utc>,
    ) -> Result<(), PayoutError> {
        self.with(|s| {
            if let Some(t) = s.transfers.get_mut(&id) {
                t.status = TransferStatus::Deleted;
                t.deleted_at = Some(deleted_at);
            }
        });
        Ok(())
    }

    async fn find_stuck(
        &self,
        statuses: &[TransferStatus],
        older_than: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Transfer>, PayoutError> {
        Ok(self.with(|s| {
            s.transfers
                .values()
                .filter(|t| {
                    statuses.contains(&t.status)
                        && t.created_at < older_than
                        && t.submitted_at.is_none()
                        && t.deleted_at.is_none()
                })
                .take(limit.max(0) as usize)
                .cloned()
                .collect()
        }))
    }

    async fn find_submitted_since(
        &self,
        since: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Transfer>, PayoutError> {
        Ok(self.with(|s| {
            s.transfers
                .values()
                .filter(|t| {
                    t.method == Some(TransferMethod::Gateway)
                        && t.submitted_at.is_some_and(|at| at >= since)
                })
                .take(limit.max(0) as usize)
                .cloned()
                .collect()
        }))
    }
}

#[async_trait]
impl GatewayAttemptRepository for MemoryStore {
    async fn create(&self, transfer_id: TransferId) -> Result<GatewayTransferAttempt, PayoutError> {
        Ok(self.with(|s| {
            let id = s.next_id();
            let now = Utc::now();
            let attempt = GatewayTransferAttempt {
                id,
                transfer_id,
                gateway_id: None,
                gateway_status: None,
                failure_code: None,
                submission_status: SubmissionStatus::Submitting,
                bank_last4: None,
                submitted_at: None,
                last_event_at: None,
                created_at: now,
                updated_at: now,
            };
            s.attempts.insert(id, attempt.clone());
            attempt
        }))
    }

    async fn list_by_transfer(
        &self,
        transfer_id: TransferId,
    ) -> Result<Vec<GatewayTransferAttempt>, PayoutError> {
        Ok(self.attempts_of(transfer_id))
    }

    async fn get_latest(
        &self,
        transfer_id: TransferId,
    ) -> Result<Option<GatewayTransferAttempt>, PayoutError> {
        Ok(self.attempts_of(transfer_id).into_iter().max_by_key(|a| a.id))
    }

    async fn get_by_gateway_id(
        &self,
        gateway_id: &str,
    ) -> Result<Option<GatewayTransferAttempt>, PayoutError> {
        Ok(self.with(|s| {
            s.attempts
                .values()
                .find(|a| a.gateway_id.as_deref() == Some(gateway_id))
                .cloned()
        }))
    }

    async fn mark_submitted(
        &self,
        id: AttemptId,
        gateway_id: &str,
        gateway_status: GatewayStatus,
        bank_last4: Option<&str>,
        submitted_at: DateTime<Utc>,
    ) -> Result<(), PayoutError> {
        self.update_attempt(id, |a| {
            a.submission_status = SubmissionStatus::Submitted;
            a.gateway_id = Some(gateway_id.to_string());
            a.gateway_status = Some(gateway_status);
            a.bank_last4 = bank_last4.map(str::to_string);
            a.submitted_at = Some(submitted_at);
            a.updated_at = Utc::now();
        });
        Ok(())
    }

    async fn mark_failed_to_submit(
        &self,
        id: AttemptId,
        failure_code: Option<&str>,
    ) -> Result<(), PayoutError> {
        self.update_attempt(id, |a| {
            a.submission_status = SubmissionStatus::FailedToSubmit;
            a.failure_code = failure_code.map(str::to_string);
            a.updated_at = Utc::now();
        });
        Ok(())
    }

    async fn update_gateway_status(
        &self,
        id: AttemptId,
        status: GatewayStatus,
        failure_code: Option<&str>,
        event_at: Option<DateTime<Utc>>,
    ) -> Result<bool, PayoutError> {
        Ok(self.with(|s| {
            let Some(a) = s.attempts.get_mut(&id) else {
                return false;
            };
            if a.gateway_status == Some(GatewayStatus::Failed) {
                return false;
            }
            if let (Some(at), Some(last)) = (event_at, a.last_event_at)
                && at <= last
            {
                return false;
            }
            a.gateway_status = Some(status);
            if let Some(code) = failure_code {
                a.failure_code = Some(code.to_string());
            }
            if event_at.is_some() {
                a.last_event_at = event_at;
            }
            a.updated_at = Utc::now();
            true
        }))
    }

    async fn find_stale_submitting(
        &self,
        older_than: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<GatewayTransferAttempt>, PayoutError> {
        Ok(self.with(|s| {
            s.attempts
                .values()
                .filter(|a| {
                    a.submission_status == SubmissionStatus::Submitting
                        && a.updated_at < older_than
                })
                .take(limit.max(0) as usize)
                .cloned()
                .collect()
        }))
    }
}

#[async_trait]
impl IntermediateTransferRepository for MemoryStore {
    async fn get_by_transfer_id(
        &self,
        transfer_id: TransferId,
    ) -> Result<Option<IntermediateTransfer>, PayoutError> {
        Ok(self.intermediate_of(transfer_id))
    }

    async fn create(
        &self,
        transfer_id: TransferId,
        payee_account_id: PayeeAccountId,
        currency: &str,
        amount: Amount,
    ) -> Result<IntermediateTransfer, PayoutError> {
        self.with(|s| {
            if s.intermediates.values().any(|i| i.transfer_id == transfer_id) {
                return Err(PayoutError::DatabaseError(format!(
                    "duplicate intermediate transfer for transfer {}",
                    transfer_id
                )));
            }
            let id = s.next_id();
            let row = IntermediateTransfer {
                id,
                transfer_id,
                payee_account_id,
                currency: currency.to_string(),
                amount,
                gateway_transfer_id: None,
                gateway_status: None,
                submitted_at: None,
            };
            s.intermediates.insert(id, row.clone());
            Ok(row)
        })
    }

    async fn update_amount(&self, id: i64, amount: Amount) -> Result<(), PayoutError> {
        self.with(|s| {
            if let Some(row) = s.intermediates.get_mut(&id) {
                row.amount = amount.max(0);
            }
        });
        Ok(())
    }

    async fn mark_submitted(
        &self,
        id: i64,
        gateway_transfer_id: &str,
        gateway_status: &str,
        submitted_at: DateTime<Utc>,
    ) -> Result<(), PayoutError> {
        self.with(|s| {
            if let Some(row) = s.intermediates.get_mut(&id) {
                row.gateway_transfer_id = Some(gateway_transfer_id.to_string());
                row.gateway_status = Some(gateway_status.to_string());
                row.submitted_at = Some(submitted_at);
            }
        });
        Ok(())
    }
}
