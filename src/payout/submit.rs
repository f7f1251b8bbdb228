//! Submit-Transfer Orchestrator
//!
//! Validates a transfer, tops up the payee's gateway sub-account and issues
//! the payout.
//!
//! Validation order:
//! 1. transfer exists, payee account exists, transfer not deleted
//! 2. attached transactions exist and sum to `amount`
//! 3. duplicate guard (`retry = false`) / disabled guard (`retry = true`)
//! 4. negative amount, then the dummy short-circuit (zero amount or
//!    non-gateway method)
//! 5. amount limit, then the "already processing" guard
//!
//! Integrity failures persist `ERROR/<code>` before raising. State-conflict
//! guards raise without touching the transfer, so a duplicate trigger can
//! never knock a PENDING transfer into ERROR.
//!
//! A gateway call that times out leaves its attempt in `submitting`. That
//! attempt blocks resubmission until the reconciliation worker replays it
//! under the same idempotency key.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use super::error::PayoutError;
use super::gateway::{
    GatewayClient, GatewayError, GatewayErrorClass, GatewayPayout, IntermediateTransferParams,
    PayoutParams,
};
use super::metrics::PayoutMetrics;
use super::policy::PayoutPolicy;
use super::repository::PayoutStore;
use super::state::{TransferStatus, TransferStatusCode};
use super::types::{
    ActorId, GatewayTransferAttempt, PayeeAccount, SubmitTransferOutcome, SubmitTransferRequest,
    Transfer, TransferId, TransferMethod, sum_amounts,
};

pub struct SubmitTransferOrchestrator {
    store: PayoutStore,
    gateway: Arc<dyn GatewayClient>,
    metrics: Arc<PayoutMetrics>,
    policy: Arc<PayoutPolicy>,
    /// Pooled balance that funds intermediate transfers
    platform_account_id: String,
}

impl SubmitTransferOrchestrator {
    pub fn new(
        store: PayoutStore,
        gateway: Arc<dyn GatewayClient>,
        metrics: Arc<PayoutMetrics>,
        policy: Arc<PayoutPolicy>,
        platform_account_id: String,
    ) -> Self {
        Self {
            store,
            gateway,
            metrics,
            policy,
            platform_account_id,
        }
    }

    pub async fn submit_transfer(
        &self,
        req: SubmitTransferRequest,
    ) -> Result<SubmitTransferOutcome, PayoutError> {
        let transfer_id = req.transfer_id;
        let transfer = self
            .store
            .transfers
            .get(transfer_id)
            .await?
            .ok_or(PayoutError::TransferNotFound(transfer_id))?;

        let account = match self.store.accounts.get(transfer.payee_account_id).await? {
            Some(account) => account,
            None => {
                return self
                    .reject(
                        transfer_id,
                        TransferStatusCode::InvalidPayeeAccount,
                        PayoutError::InvalidPayeeAccount(transfer.payee_account_id),
                    )
                    .await;
            }
        };

        if transfer.deleted_at.is_some() || transfer.status == TransferStatus::Deleted {
            return Err(PayoutError::TransferDeleted(transfer_id));
        }

        let transactions = self.store.transactions.list_by_transfer(transfer_id).await?;
        if transactions.is_empty() {
            return self
                .reject(
                    transfer_id,
                    TransferStatusCode::InvalidState,
                    PayoutError::InvalidState(format!(
                        "transfer {} has no attached transactions",
                        transfer_id
                    )),
                )
                .await;
        }

        let attached = sum_amounts(transactions.iter().map(|t| t.amount))?;
        if attached != transfer.amount {
            return self
                .reject(
                    transfer_id,
                    TransferStatusCode::AmountMismatch,
                    PayoutError::AmountMismatch {
                        expected: transfer.amount,
                        actual: attached,
                    },
                )
                .await;
        }

        let attempts = self.store.attempts.list_by_transfer(transfer_id).await?;

        if !req.retry
            && (transfer.submitted_at.is_some()
                || (req.method == TransferMethod::Gateway && !attempts.is_empty()))
        {
            return Err(PayoutError::DuplicateTransfer(transfer_id));
        }

        if req.retry && account.payouts_disabled && transfer.status == TransferStatus::Error {
            return Err(PayoutError::TransferDisabled(transfer_id));
        }

        if transfer.amount < 0 {
            return self
                .reject(
                    transfer_id,
                    TransferStatusCode::NegativeAmount,
                    PayoutError::NegativeAmount(transfer.amount),
                )
                .await;
        }

        if transfer.amount == 0 || req.method != TransferMethod::Gateway {
            return self.submit_dummy(&transfer, &req).await;
        }

        let limit = self.policy.amount_limit(&account);
        if transfer.amount > limit
            && self.policy.bank_changed_recently(&account, Utc::now())
            && !self.policy.can_override_amount_limit(req.submitted_by)
            && !self.policy.can_override_amount_limit(transfer.created_by)
        {
            return self
                .reject(
                    transfer_id,
                    TransferStatusCode::AmountLimitExceeded,
                    PayoutError::AmountLimitExceeded {
                        amount: transfer.amount,
                        limit,
                    },
                )
                .await;
        }

        if attempts.iter().any(|a| a.is_ongoing()) {
            return Err(PayoutError::TransferProcessing(transfer_id));
        }

        self.metrics
            .record_submit_attempt(&account.category, transfer.amount);

        let gateway_account = match account.gateway_account_id.clone() {
            Some(gateway_account) => gateway_account,
            None => {
                self.store
                    .transfers
                    .update_status(
                        transfer_id,
                        TransferStatus::Failed,
                        Some(TransferStatusCode::NoGatewayAccount.as_str()),
                    )
                    .await?;
                warn!(transfer_id, payee_account_id = account.id, "Payee has no gateway account");
                return Err(PayoutError::NoGatewayAccount(account.id));
            }
        };

        match self.ensure_funds(&transfer, &gateway_account).await {
            Ok(()) => {}
            Err(TopUpError::Gateway(e)) => return self.reject_gateway_error(transfer_id, e).await,
            Err(TopUpError::Store(e)) => return Err(e),
        }

        let attempt = self.store.attempts.create(transfer_id).await?;
        info!(
            transfer_id,
            attempt_id = attempt.id,
            amount = transfer.amount,
            "Submitting payout"
        );

        let params = self.payout_params(&transfer, &gateway_account, &attempt);
        let result = self.call(self.gateway.create_payout(&params)).await;

        match result {
            Ok(payout) => {
                let status = self
                    .record_payout(&transfer, &account, &attempt, req.submitted_by, &payout)
                    .await?;
                Ok(SubmitTransferOutcome {
                    transfer_id,
                    status,
                    attempt_id: Some(attempt.id),
                })
            }
            Err(e) => Err(self.record_payout_error(transfer_id, &attempt, e).await?),
        }
    }

    /// Replay a payout whose outcome was never learned, under the attempt's
    /// original idempotency key.
    ///
    /// Returns the resulting transfer status, or `None` if the gateway still
    /// gave no answer.
    pub async fn resume_attempt(
        &self,
        attempt: &GatewayTransferAttempt,
    ) -> Result<Option<TransferStatus>, PayoutError> {
        let transfer = self
            .store
            .transfers
            .get(attempt.transfer_id)
            .await?
            .ok_or(PayoutError::TransferNotFound(attempt.transfer_id))?;
        let account = self
            .store
            .accounts
            .get(transfer.payee_account_id)
            .await?
            .ok_or(PayoutError::InvalidPayeeAccount(transfer.payee_account_id))?;
        let gateway_account = account
            .gateway_account_id
            .clone()
            .ok_or(PayoutError::NoGatewayAccount(account.id))?;

        let params = self.payout_params(&transfer, &gateway_account, attempt);
        match self.call(self.gateway.create_payout(&params)).await {
            Ok(payout) => {
                let status = self
                    .record_payout(&transfer, &account, attempt, transfer.submitted_by, &payout)
                    .await?;
                Ok(Some(status))
            }
            Err(e) if e.classify(&self.policy.failed_gateway_codes) == GatewayErrorClass::Unknown => {
                debug!(attempt_id = attempt.id, error = %e, "Payout replay still unanswered");
                Ok(None)
            }
            Err(e) => {
                let err = self.record_payout_error(transfer.id, attempt, e).await?;
                warn!(attempt_id = attempt.id, error = %err, "Payout replay rejected");
                Ok(self
                    .store
                    .transfers
                    .get(transfer.id)
                    .await?
                    .map(|t| t.status))
            }
        }
    }

    async fn submit_dummy(
        &self,
        transfer: &Transfer,
        req: &SubmitTransferRequest,
    ) -> Result<SubmitTransferOutcome, PayoutError> {
        self.store
            .transfers
            .mark_submitted(
                transfer.id,
                TransferStatus::Paid,
                req.method,
                req.submitted_by,
                Utc::now(),
            )
            .await?;

        info!(
            transfer_id = transfer.id,
            method = %req.method,
            amount = transfer.amount,
            "Dummy transfer marked paid"
        );

        Ok(SubmitTransferOutcome {
            transfer_id: transfer.id,
            status: TransferStatus::Paid,
            attempt_id: None,
        })
    }

    /// Move the shortfall between the transfer amount and the sub-account
    /// balance from the platform balance.
    ///
    /// `IntermediateTransfer.amount` holds the largest shortfall funded for
    /// the transfer. It grows only after the gateway accepted the top-up and
    /// never drops below what was already moved.
    async fn ensure_funds(
        &self,
        transfer: &Transfer,
        gateway_account: &str,
    ) -> Result<(), TopUpError> {
        let balance = self
            .call(
                self.gateway
                    .retrieve_balance(gateway_account, &transfer.currency),
            )
            .await?;
        let shortfall = transfer.amount.saturating_sub(balance);
        let existing = self
            .store
            .intermediates
            .get_by_transfer_id(transfer.id)
            .await?;

        if shortfall <= 0 {
            if let Some(row) = existing
                && !row.is_submitted()
                && row.amount != 0
            {
                self.store
                    .intermediates
                    .update_amount(row.id, 0)
                    .await?;
            }
            return Ok(());
        }

        let row = match existing {
            Some(row) => row,
            None => {
                self.store
                    .intermediates
                    .create(
                        transfer.id,
                        transfer.payee_account_id,
                        &transfer.currency,
                        shortfall,
                    )
                    .await?
            }
        };
        let new_amount = row.amount.max(shortfall);

        // A replayed top-up reuses its key; a top-up after a funded one does not
        let idempotency_key = match &row.gateway_transfer_id {
            Some(previous) => format!("intermediate-{}-{}-{}", row.id, new_amount, previous),
            None => format!("intermediate-{}-{}", row.id, new_amount),
        };
        let params = IntermediateTransferParams {
            amount: shortfall,
            currency: transfer.currency.clone(),
            source_account: self.platform_account_id.clone(),
            destination_account: gateway_account.to_string(),
            idempotency_key,
        };
        let moved = self
            .call(self.gateway.create_intermediate_transfer(&params))
            .await?;

        if new_amount != row.amount {
            self.store
                .intermediates
                .update_amount(row.id, new_amount)
                .await?;
        }
        self.store
            .intermediates
            .mark_submitted(
                row.id,
                &moved.id,
                moved.status.as_deref().unwrap_or("created"),
                Utc::now(),
            )
            .await?;

        info!(
            transfer_id = transfer.id,
            shortfall,
            intermediate_amount = new_amount,
            "Sub-account topped up"
        );
        Ok(())
    }

    fn payout_params(
        &self,
        transfer: &Transfer,
        gateway_account: &str,
        attempt: &GatewayTransferAttempt,
    ) -> PayoutParams {
        let mut metadata = BTreeMap::new();
        metadata.insert("transfer_id".to_string(), transfer.id.to_string());
        metadata.insert(
            "payee_account_id".to_string(),
            transfer.payee_account_id.to_string(),
        );
        metadata.insert("attempt_id".to_string(), attempt.id.to_string());

        PayoutParams {
            amount: transfer.amount,
            currency: transfer.currency.clone(),
            account: gateway_account.to_string(),
            metadata,
            idempotency_key: attempt.idempotency_key(),
        }
    }

    async fn record_payout(
        &self,
        transfer: &Transfer,
        account: &PayeeAccount,
        attempt: &GatewayTransferAttempt,
        submitted_by: Option<ActorId>,
        payout: &GatewayPayout,
    ) -> Result<TransferStatus, PayoutError> {
        let now = Utc::now();
        let bank_last4 = payout
            .bank_account
            .as_ref()
            .and_then(|b| b.last4.as_deref());

        self.store
            .attempts
            .mark_submitted(attempt.id, &payout.id, payout.status, bank_last4, now)
            .await?;

        let status = TransferStatus::from_gateway(payout.status);
        self.store
            .transfers
            .mark_submitted(transfer.id, status, TransferMethod::Gateway, submitted_by, now)
            .await?;

        self.metrics
            .record_submit_success(&account.category, transfer.amount);

        info!(
            transfer_id = transfer.id,
            attempt_id = attempt.id,
            gateway_id = %payout.id,
            status = %status,
            "Payout submitted"
        );
        Ok(status)
    }

    /// Persist the outcome of a failed payout call; returns the error to raise
    async fn record_payout_error(
        &self,
        transfer_id: TransferId,
        attempt: &GatewayTransferAttempt,
        error: GatewayError,
    ) -> Result<PayoutError, PayoutError> {
        match error.classify(&self.policy.failed_gateway_codes) {
            GatewayErrorClass::Failed(code) => {
                self.store
                    .attempts
                    .mark_failed_to_submit(attempt.id, Some(&code))
                    .await?;
                self.store
                    .transfers
                    .update_status(transfer_id, TransferStatus::Failed, Some(&code))
                    .await?;
                warn!(transfer_id, attempt_id = attempt.id, failure_code = %code, "Payout failed");
                Ok(PayoutError::GatewayFailed { code })
            }
            GatewayErrorClass::SubmissionError(code) => {
                self.store
                    .attempts
                    .mark_failed_to_submit(attempt.id, code.as_deref())
                    .await?;
                self.store
                    .transfers
                    .update_status(
                        transfer_id,
                        TransferStatus::Error,
                        Some(TransferStatusCode::GatewaySubmissionError.as_str()),
                    )
                    .await?;
                warn!(
                    transfer_id,
                    attempt_id = attempt.id,
                    error_code = code.as_deref().unwrap_or("unknown"),
                    "Payout submission error"
                );
                Ok(PayoutError::GatewaySubmission { code })
            }
            GatewayErrorClass::Unknown => {
                // Attempt stays `submitting`; reconciliation replays it
                self.store
                    .transfers
                    .update_status(
                        transfer_id,
                        TransferStatus::Error,
                        Some(TransferStatusCode::UnknownError.as_str()),
                    )
                    .await?;
                error!(
                    transfer_id,
                    attempt_id = attempt.id,
                    error = %error,
                    "Payout outcome unknown"
                );
                Ok(PayoutError::GatewayUnknown(error.to_string()))
            }
        }
    }

    /// Top-up or balance failure, before any attempt exists
    async fn reject_gateway_error<T>(
        &self,
        transfer_id: TransferId,
        error: GatewayError,
    ) -> Result<T, PayoutError> {
        let (code, err) = match error.classify(&self.policy.failed_gateway_codes) {
            GatewayErrorClass::Unknown => (
                TransferStatusCode::UnknownError,
                PayoutError::GatewayUnknown(error.to_string()),
            ),
            _ => (
                TransferStatusCode::GatewaySubmissionError,
                PayoutError::GatewaySubmission {
                    code: error.error_code(),
                },
            ),
        };
        self.reject(transfer_id, code, err).await
    }

    /// Persist ERROR/<code>, then raise `err`
    async fn reject<T>(
        &self,
        transfer_id: TransferId,
        code: TransferStatusCode,
        err: PayoutError,
    ) -> Result<T, PayoutError> {
        self.store
            .transfers
            .update_status(transfer_id, TransferStatus::Error, Some(code.as_str()))
            .await?;
        warn!(transfer_id, status_code = %code, error = %err, "Transfer rejected");
        Err(err)
    }

    /// Bound a gateway call by the configured timeout
    async fn call<T>(
        &self,
        fut: impl Future<Output = Result<T, GatewayError>>,
    ) -> Result<T, GatewayError> {
        match tokio::time::timeout(self.policy.gateway_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(GatewayError::Timeout(
                self.policy.gateway_timeout.as_millis() as u64,
            )),
        }
    }
}

enum TopUpError {
    Gateway(GatewayError),
    Store(PayoutError),
}

impl From<GatewayError> for TopUpError {
    fn from(e: GatewayError) -> Self {
        TopUpError::Gateway(e)
    }
}

impl From<PayoutError> for TopUpError {
    fn from(e: PayoutError) -> Self {
        TopUpError::Store(e)
    }
}
