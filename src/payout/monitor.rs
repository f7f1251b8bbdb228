//! Reconciliation Worker
//!
//! Background sweeps that repair local state:
//!
//! - **stuck-creating**: transfers left in CREATING/NEW past the threshold.
//!   Zero attached transactions -> DELETED; amounts that disagree are logged
//!   and left alone; otherwise advance to NEW and enqueue submission.
//! - **status drift**: recently submitted gateway transfers are re-polled and
//!   re-derived from their latest attempt. Attempts stuck in `submitting`
//!   (unknown outcome) are replayed under their original idempotency key.
//!
//! Per-item failures are logged and never abort a sweep.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use super::error::PayoutError;
use super::gateway::GatewayClient;
use super::repository::PayoutStore;
use super::state::{TransferStatus, derive_transfer_status};
use super::submit::SubmitTransferOrchestrator;
use super::tasks::{PayoutTask, TaskBus, TaskEnvelope};
use super::types::{SubmitTransferRequest, Transfer, TransferId, sum_amounts};
use crate::config::MonitorConfig;

/// Re-derive a transfer's status from its latest attempt and persist it if
/// it changed. Transfers without attempts are left alone.
pub async fn sync_transfer_status(
    store: &PayoutStore,
    transfer_id: TransferId,
) -> Result<Option<TransferStatus>, PayoutError> {
    let Some(transfer) = store.transfers.get(transfer_id).await? else {
        return Ok(None);
    };
    let Some(latest) = store.attempts.get_latest(transfer_id).await? else {
        return Ok(None);
    };
    let Some(derived) = derive_transfer_status(&transfer, Some(&latest)) else {
        return Ok(None);
    };

    let code = match derived {
        TransferStatus::Failed => latest.failure_code.clone(),
        _ => None,
    };
    if derived == transfer.status && code == transfer.status_code {
        return Ok(None);
    }

    store
        .transfers
        .update_status(transfer_id, derived, code.as_deref())
        .await?;
    info!(
        transfer_id,
        old_status = %transfer.status,
        new_status = %derived,
        "Transfer status reconciled"
    );
    Ok(Some(derived))
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StuckSweepReport {
    pub scanned: usize,
    pub advanced: usize,
    pub deleted: usize,
    pub mismatched: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DriftSweepReport {
    pub scanned: usize,
    pub updated: usize,
    pub replayed: usize,
    pub failed: usize,
}

enum StuckAction {
    Advanced,
    Deleted,
    Mismatched,
}

pub struct ReconciliationWorker {
    store: PayoutStore,
    gateway: Arc<dyn GatewayClient>,
    submit: Arc<SubmitTransferOrchestrator>,
    bus: Arc<dyn TaskBus>,
    config: MonitorConfig,
    task_max_retries: u32,
}

impl ReconciliationWorker {
    pub fn new(
        store: PayoutStore,
        gateway: Arc<dyn GatewayClient>,
        submit: Arc<SubmitTransferOrchestrator>,
        bus: Arc<dyn TaskBus>,
        config: MonitorConfig,
        task_max_retries: u32,
    ) -> Self {
        Self {
            store,
            gateway,
            submit,
            bus,
            config,
            task_max_retries,
        }
    }

    /// Run both sweeps forever
    pub async fn run(&self) {
        info!(
            scan_interval_secs = self.config.scan_interval_secs,
            stuck_threshold_secs = self.config.stuck_threshold_secs,
            drift_window_hours = self.config.drift_window_hours,
            "Starting reconciliation worker"
        );

        let mut interval =
            tokio::time::interval(Duration::from_secs(self.config.scan_interval_secs.max(1)));
        loop {
            interval.tick().await;

            match self.stuck_creating_sweep().await {
                Ok(report) if report.scanned > 0 => info!(?report, "Stuck-transfer sweep done"),
                Ok(_) => debug!("No stuck transfers"),
                Err(e) => error!(error = %e, "Stuck-transfer sweep failed"),
            }

            match self.status_drift_sweep().await {
                Ok(report) if report.scanned > 0 => info!(?report, "Status-drift sweep done"),
                Ok(_) => debug!("No submitted transfers to reconcile"),
                Err(e) => error!(error = %e, "Status-drift sweep failed"),
            }
        }
    }

    pub async fn stuck_creating_sweep(&self) -> Result<StuckSweepReport, PayoutError> {
        let threshold = chrono::Duration::seconds(self.config.stuck_threshold_secs as i64);
        let stuck = self
            .store
            .transfers
            .find_stuck(
                &[TransferStatus::Creating, TransferStatus::New],
                Utc::now() - threshold,
                self.config.batch_size,
            )
            .await?;

        let mut report = StuckSweepReport {
            scanned: stuck.len(),
            ..Default::default()
        };

        for transfer in &stuck {
            match self.recover_stuck(transfer).await {
                Ok(StuckAction::Advanced) => report.advanced += 1,
                Ok(StuckAction::Deleted) => report.deleted += 1,
                Ok(StuckAction::Mismatched) => report.mismatched += 1,
                Err(e) => {
                    report.failed += 1;
                    error!(transfer_id = transfer.id, error = %e, "Failed to recover stuck transfer");
                }
            }
        }

        Ok(report)
    }

    async fn recover_stuck(&self, transfer: &Transfer) -> Result<StuckAction, PayoutError> {
        let transactions = self.store.transactions.list_by_transfer(transfer.id).await?;

        if transactions.is_empty() {
            // Status only; deleted_at is reserved for operator deletes
            if self
                .store
                .transfers
                .update_status_if(transfer.id, transfer.status, TransferStatus::Deleted)
                .await?
            {
                info!(transfer_id = transfer.id, "Empty stuck transfer deleted");
            } else {
                debug!(transfer_id = transfer.id, "Stuck transfer moved concurrently");
            }
            return Ok(StuckAction::Deleted);
        }

        let attached = sum_amounts(transactions.iter().map(|t| t.amount))?;
        if attached != transfer.amount {
            warn!(
                transfer_id = transfer.id,
                amount = transfer.amount,
                attached,
                "Stuck transfer amount does not match attached transactions"
            );
            return Ok(StuckAction::Mismatched);
        }

        if transfer.status == TransferStatus::Creating
            && !self
                .store
                .transfers
                .update_status_if(transfer.id, TransferStatus::Creating, TransferStatus::New)
                .await?
        {
            debug!(transfer_id = transfer.id, "Stuck transfer moved concurrently");
            return Ok(StuckAction::Advanced);
        }

        let Some(method) = transfer.method else {
            return Err(PayoutError::InvalidState(format!(
                "transfer {} has no method",
                transfer.id
            )));
        };
        let task = PayoutTask::SubmitTransfer(SubmitTransferRequest {
            transfer_id: transfer.id,
            method,
            retry: false,
            submitted_by: transfer.created_by,
        });
        self.bus
            .publish(TaskEnvelope::new(&task, self.task_max_retries)?)
            .await?;

        info!(transfer_id = transfer.id, "Stuck transfer re-enqueued for submission");
        Ok(StuckAction::Advanced)
    }

    pub async fn status_drift_sweep(&self) -> Result<DriftSweepReport, PayoutError> {
        let mut report = DriftSweepReport::default();

        let stale_before =
            Utc::now() - chrono::Duration::seconds(self.config.stale_submitting_secs as i64);
        let stale = self
            .store
            .attempts
            .find_stale_submitting(stale_before, self.config.batch_size)
            .await?;

        for attempt in &stale {
            match self.submit.resume_attempt(attempt).await {
                Ok(Some(status)) => {
                    report.replayed += 1;
                    info!(attempt_id = attempt.id, status = %status, "Unknown payout outcome resolved");
                }
                Ok(None) => {}
                Err(e) => {
                    report.failed += 1;
                    error!(attempt_id = attempt.id, error = %e, "Failed to replay payout");
                }
            }
        }

        let mut since = Utc::now() - chrono::Duration::hours(self.config.drift_window_hours);
        loop {
            let page = self
                .store
                .transfers
                .find_submitted_since(since, self.config.batch_size)
                .await?;

            for transfer in &page {
                report.scanned += 1;
                match self.reconcile_transfer(transfer).await {
                    Ok(true) => report.updated += 1,
                    Ok(false) => {}
                    Err(e) => {
                        report.failed += 1;
                        error!(transfer_id = transfer.id, error = %e, "Failed to reconcile transfer");
                    }
                }
            }

            match page.last().and_then(|t| t.submitted_at) {
                Some(last) if page.len() as i64 >= self.config.batch_size => {
                    since = last + chrono::Duration::microseconds(1);
                }
                _ => break,
            }
        }

        Ok(report)
    }

    /// Poll the gateway for a non-final latest attempt, then re-derive
    async fn reconcile_transfer(&self, transfer: &Transfer) -> Result<bool, PayoutError> {
        let Some(latest) = self.store.attempts.get_latest(transfer.id).await? else {
            return Ok(false);
        };

        if let Some(gateway_id) = latest.gateway_id.as_deref()
            && !latest.gateway_status.is_some_and(|s| s.is_final())
        {
            let account = self
                .store
                .accounts
                .get(transfer.payee_account_id)
                .await?
                .ok_or(PayoutError::InvalidPayeeAccount(transfer.payee_account_id))?;
            let gateway_account = account
                .gateway_account_id
                .ok_or(PayoutError::NoGatewayAccount(transfer.payee_account_id))?;

            let payout = self
                .gateway
                .retrieve_payout(gateway_id, &gateway_account)
                .await
                .map_err(|e| PayoutError::GatewayUnknown(e.to_string()))?;

            // The poll is an observation at `now`; older webhooks must not undo it
            let observed_at = Utc::now();
            let applied = self
                .store
                .attempts
                .update_gateway_status(
                    latest.id,
                    payout.status,
                    payout.failure_code.as_deref(),
                    Some(observed_at),
                )
                .await?;
            if applied && Some(payout.status) != latest.gateway_status {
                debug!(
                    transfer_id = transfer.id,
                    attempt_id = latest.id,
                    gateway_status = %payout.status,
                    "Attempt refreshed from gateway"
                );
            }
        }

        Ok(sync_transfer_status(&self.store, transfer.id).await?.is_some())
    }
}
