//! Create-Transfer Orchestrator
//!
//! Aggregates a payee's unattached transactions into one transfer.
//!
//! Flow:
//! 1. Load the payee account (`InvalidPayeeAccount` if absent).
//! 2. Scheduled runs only: eligibility gates, first failing gate wins and
//!    yields a skip outcome (payout day, payout country, block list, bank
//!    change hold).
//! 3. Under the per-payee lease: list unattached transactions in
//!    `[start_time, end_time)`, insert the transfer in CREATING, claim the
//!    transactions, CAS CREATING -> NEW.
//! 4. Release the lease; optionally publish a submit task.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use super::error::PayoutError;
use super::lock::{DistributedLock, acquire_with_wait};
use super::policy::PayoutPolicy;
use super::repository::PayoutStore;
use super::state::TransferStatus;
use super::tasks::{PayoutTask, TaskBus, TaskEnvelope};
use super::types::{
    CreateTransferOutcome, CreateTransferRequest, NewTransfer, PayeeAccount, SkipReason,
    SubmitTransferRequest, TransferType, sum_amounts,
};

pub struct CreateTransferOrchestrator {
    store: PayoutStore,
    lock: Arc<dyn DistributedLock>,
    bus: Arc<dyn TaskBus>,
    policy: Arc<PayoutPolicy>,
    task_max_retries: u32,
}

impl CreateTransferOrchestrator {
    pub fn new(
        store: PayoutStore,
        lock: Arc<dyn DistributedLock>,
        bus: Arc<dyn TaskBus>,
        policy: Arc<PayoutPolicy>,
        task_max_retries: u32,
    ) -> Self {
        Self {
            store,
            lock,
            bus,
            policy,
            task_max_retries,
        }
    }

    pub async fn create_transfer(
        &self,
        req: CreateTransferRequest,
    ) -> Result<CreateTransferOutcome, PayoutError> {
        let account = self
            .store
            .accounts
            .get(req.payee_account_id)
            .await?
            .ok_or(PayoutError::InvalidPayeeAccount(req.payee_account_id))?;

        if req.transfer_type == TransferType::Scheduled
            && let Some(reason) = self.check_eligibility(&req, &account)
        {
            info!(
                payee_account_id = account.id,
                skip_reason = reason.code(),
                "Scheduled transfer skipped"
            );
            return Ok(CreateTransferOutcome::Skipped(reason));
        }

        let lock_key = format!("payout:payee:{}", account.id);
        let handle = acquire_with_wait(
            &self.lock,
            &lock_key,
            self.policy.lock_ttl,
            self.policy.lock_wait,
        )
        .await?;

        let result = self.create_locked(&req, &account).await;

        match self.lock.release(&handle).await {
            Ok(true) => {}
            Ok(false) => warn!(
                payee_account_id = account.id,
                lock_key = %lock_key,
                "Lock lease lost before release, possible duplicate transfer creation"
            ),
            Err(e) => warn!(lock_key = %lock_key, error = %e, "Failed to release lock"),
        }

        let outcome = result?;

        if req.submit_after_creation
            && let CreateTransferOutcome::Created { transfer, .. } = &outcome
        {
            let submit = SubmitTransferRequest {
                transfer_id: transfer.id,
                method: self.policy.default_method,
                retry: false,
                submitted_by: req.created_by,
            };
            // The stuck-transfer sweep re-enqueues anything left in NEW
            if let Err(e) = self.publish_submit(submit).await {
                error!(transfer_id = transfer.id, error = %e, "Failed to enqueue submit task");
            }
        }

        Ok(outcome)
    }

    /// First failing gate, if any
    fn check_eligibility(
        &self,
        req: &CreateTransferRequest,
        account: &PayeeAccount,
    ) -> Option<SkipReason> {
        if let Some(day) = req.payout_day
            && account.payout_day != Some(day)
        {
            return Some(SkipReason::PayoutDayNotMatch);
        }

        if let Some(countries) = &req.payout_countries {
            let matches = account.gateway_country.as_deref().is_some_and(|country| {
                countries.iter().any(|c| c.eq_ignore_ascii_case(country))
            });
            if !matches {
                return Some(SkipReason::PayoutCountryNotMatch);
            }
        }

        if self.policy.is_blocked(account.id) {
            return Some(SkipReason::PayeeBlocked);
        }

        if self.policy.in_bank_change_hold(account, Utc::now()) {
            return Some(SkipReason::BankChangeHold);
        }

        None
    }

    async fn create_locked(
        &self,
        req: &CreateTransferRequest,
        account: &PayeeAccount,
    ) -> Result<CreateTransferOutcome, PayoutError> {
        let transactions = self
            .store
            .transactions
            .list_unattached(account.id, req.start_time, req.end_time)
            .await?;

        if transactions.is_empty() {
            debug!(payee_account_id = account.id, "No unpaid transactions");
            return Ok(CreateTransferOutcome::Skipped(
                SkipReason::NoUnpaidTransactions,
            ));
        }

        let amount = sum_amounts(transactions.iter().map(|t| t.amount))?;
        let ids: Vec<_> = transactions.iter().map(|t| t.id).collect();

        let mut transfer = self
            .store
            .transfers
            .create(NewTransfer {
                payee_account_id: account.id,
                currency: account.currency.clone(),
                amount,
                method: Some(self.policy.default_method),
                status: TransferStatus::Creating,
                created_by: req.created_by,
            })
            .await?;

        let attached = self
            .store
            .transactions
            .assign_transfer(&ids, transfer.id)
            .await?;

        if attached != ids.len() as u64 {
            warn!(
                transfer_id = transfer.id,
                expected = ids.len(),
                attached,
                "Transaction assignment count mismatch"
            );
        }

        if attached == 0 {
            // Every transaction was claimed elsewhere; nothing to pay
            self.store
                .transfers
                .update_status_if(transfer.id, TransferStatus::Creating, TransferStatus::Deleted)
                .await?;
            return Ok(CreateTransferOutcome::Skipped(
                SkipReason::NoUnpaidTransactions,
            ));
        }

        if self
            .store
            .transfers
            .update_status_if(transfer.id, TransferStatus::Creating, TransferStatus::New)
            .await?
        {
            transfer.status = TransferStatus::New;
        } else if let Some(current) = self.store.transfers.get(transfer.id).await? {
            warn!(
                transfer_id = transfer.id,
                status = %current.status,
                "Transfer left CREATING concurrently"
            );
            transfer = current;
        }

        info!(
            transfer_id = transfer.id,
            payee_account_id = account.id,
            amount,
            attached,
            "Transfer created"
        );

        Ok(CreateTransferOutcome::Created { transfer, attached })
    }

    async fn publish_submit(&self, req: SubmitTransferRequest) -> Result<(), PayoutError> {
        let envelope =
            TaskEnvelope::new(&PayoutTask::SubmitTransfer(req), self.task_max_retries)?;
        self.bus.publish(envelope).await
    }
}
