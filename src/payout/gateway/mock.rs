//! Scriptable gateway double
//!
//! Keeps per-account balances, honours idempotency keys, and can be told to
//! fail top-ups or fail and stall payout calls.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use super::*;

#[derive(Default)]
pub struct MockGateway {
    balances: Mutex<HashMap<String, Amount>>,
    /// idempotency key -> transfer
    transfers: Mutex<HashMap<String, GatewayTransfer>>,
    transfer_log: Mutex<Vec<IntermediateTransferParams>>,
    /// idempotency key -> payout id
    payout_keys: Mutex<HashMap<String, String>>,
    payouts: Mutex<HashMap<String, GatewayPayout>>,
    /// Configured behavior
    payout_error: Mutex<Option<GatewayError>>,
    transfer_error: Mutex<Option<GatewayError>>,
    payout_delay: Mutex<Option<Duration>>,
    transfer_count: AtomicUsize,
    payout_count: AtomicUsize,
    balance_count: AtomicUsize,
}

impl MockGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_balance(&self, account: &str, amount: Amount) {
        self.balances
            .lock()
            .unwrap()
            .insert(account.to_string(), amount);
    }

    pub fn balance(&self, account: &str) -> Amount {
        self.balances
            .lock()
            .unwrap()
            .get(account)
            .copied()
            .unwrap_or(0)
    }

    /// Every following payout call fails with `error`
    pub fn set_payout_error(&self, error: Option<GatewayError>) {
        *self.payout_error.lock().unwrap() = error;
    }

    pub fn set_transfer_error(&self, error: Option<GatewayError>) {
        *self.transfer_error.lock().unwrap() = error;
    }

    /// Every following payout call sleeps first
    pub fn set_payout_delay(&self, delay: Option<Duration>) {
        *self.payout_delay.lock().unwrap() = delay;
    }

    /// Simulate the gateway moving a payout along
    pub fn set_payout_status(&self, payout_id: &str, status: GatewayStatus) {
        if let Some(payout) = self.payouts.lock().unwrap().get_mut(payout_id) {
            payout.status = status;
        }
    }

    pub fn transfer_count(&self) -> usize {
        self.transfer_count.load(Ordering::SeqCst)
    }

    pub fn payout_count(&self) -> usize {
        self.payout_count.load(Ordering::SeqCst)
    }

    pub fn balance_count(&self) -> usize {
        self.balance_count.load(Ordering::SeqCst)
    }

    /// Intermediate transfers actually executed (replays excluded)
    pub fn transfers(&self) -> Vec<IntermediateTransferParams> {
        self.transfer_log.lock().unwrap().clone()
    }

    pub fn payouts(&self) -> Vec<GatewayPayout> {
        self.payouts.lock().unwrap().values().cloned().collect()
    }
}

#[async_trait]
impl GatewayClient for MockGateway {
    async fn create_intermediate_transfer(
        &self,
        params: &IntermediateTransferParams,
    ) -> Result<GatewayTransfer, GatewayError> {
        self.transfer_count.fetch_add(1, Ordering::SeqCst);

        if let Some(error) = self.transfer_error.lock().unwrap().clone() {
            return Err(error);
        }

        let mut transfers = self.transfers.lock().unwrap();
        if let Some(existing) = transfers.get(&params.idempotency_key) {
            return Ok(existing.clone());
        }

        let transfer = GatewayTransfer {
            id: format!("tr_{}", transfers.len() + 1),
            status: Some("paid".to_string()),
        };
        transfers.insert(params.idempotency_key.clone(), transfer.clone());
        self.transfer_log.lock().unwrap().push(params.clone());

        *self
            .balances
            .lock()
            .unwrap()
            .entry(params.destination_account.clone())
            .or_insert(0) += params.amount;

        Ok(transfer)
    }

    async fn create_payout(&self, params: &PayoutParams) -> Result<GatewayPayout, GatewayError> {
        self.payout_count.fetch_add(1, Ordering::SeqCst);

        let delay = *self.payout_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if let Some(error) = self.payout_error.lock().unwrap().clone() {
            return Err(error);
        }

        let existing = self
            .payout_keys
            .lock()
            .unwrap()
            .get(&params.idempotency_key)
            .cloned();
        if let Some(payout_id) = existing
            && let Some(payout) = self.payouts.lock().unwrap().get(&payout_id)
        {
            return Ok(payout.clone());
        }

        {
            let mut balances = self.balances.lock().unwrap();
            let balance = balances.entry(params.account.clone()).or_insert(0);
            if *balance < params.amount {
                return Err(GatewayError::Api {
                    http_status: 400,
                    code: None,
                    message: "Insufficient funds in account balance".to_string(),
                });
            }
            *balance -= params.amount;
        }

        let mut payouts = self.payouts.lock().unwrap();
        let payout = GatewayPayout {
            id: format!("po_{}", payouts.len() + 1),
            status: GatewayStatus::Pending,
            failure_code: None,
            bank_account: Some(BankAccountSummary {
                last4: Some("6789".to_string()),
                bank_name: Some("TEST BANK".to_string()),
            }),
        };
        payouts.insert(payout.id.clone(), payout.clone());
        self.payout_keys
            .lock()
            .unwrap()
            .insert(params.idempotency_key.clone(), payout.id.clone());

        Ok(payout)
    }

    async fn retrieve_payout(
        &self,
        payout_id: &str,
        _account: &str,
    ) -> Result<GatewayPayout, GatewayError> {
        self.payouts
            .lock()
            .unwrap()
            .get(payout_id)
            .cloned()
            .ok_or_else(|| GatewayError::Api {
                http_status: 404,
                code: Some("resource_missing".to_string()),
                message: format!("No such payout: {}", payout_id),
            })
    }

    async fn retrieve_balance(
        &self,
        account: &str,
        _currency: &str,
    ) -> Result<Amount, GatewayError> {
        self.balance_count.fetch_add(1, Ordering::SeqCst);
        Ok(self.balance(account))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payout_params(key: &str, amount: Amount) -> PayoutParams {
        PayoutParams {
            amount,
            currency: "USD".to_string(),
            account: "acct_1".to_string(),
            metadata: BTreeMap::new(),
            idempotency_key: key.to_string(),
        }
    }

    #[tokio::test]
    async fn test_payout_replay_is_idempotent() {
        let gateway = MockGateway::new();
        gateway.set_balance("acct_1", 1000);

        let first = gateway.create_payout(&payout_params("k1", 600)).await.unwrap();
        let replay = gateway.create_payout(&payout_params("k1", 600)).await.unwrap();
        assert_eq!(first.id, replay.id);
        assert_eq!(gateway.balance("acct_1"), 400);
        assert_eq!(gateway.payouts().len(), 1);
    }

    #[tokio::test]
    async fn test_payout_insufficient_funds() {
        let gateway = MockGateway::new();
        let err = gateway.create_payout(&payout_params("k1", 1)).await.unwrap_err();
        assert_eq!(err.error_code(), Some("balance_insufficient".to_string()));
    }
}
