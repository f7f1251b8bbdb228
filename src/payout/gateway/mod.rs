//! Payment Gateway Facade
//!
//! The four primitives the payout engine needs from the gateway. Every
//! money-moving call carries an idempotency key so that a replay after an
//! unknown outcome cannot move funds twice.

pub mod error;
pub mod http;

#[cfg(test)]
pub mod mock;

pub use error::{GatewayError, GatewayErrorClass, extract_error_code};
pub use http::HttpGatewayClient;

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::state::GatewayStatus;
use super::types::Amount;

/// Move funds from the platform balance into a connected sub-account
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IntermediateTransferParams {
    pub amount: Amount,
    pub currency: String,
    pub source_account: String,
    pub destination_account: String,
    pub idempotency_key: String,
}

/// Gateway-side record of an intermediate transfer
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct GatewayTransfer {
    pub id: String,
    #[serde(default)]
    pub status: Option<String>,
}

/// Pay a connected sub-account's balance out to its bank account
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PayoutParams {
    pub amount: Amount,
    pub currency: String,
    pub account: String,
    pub metadata: BTreeMap<String, String>,
    pub idempotency_key: String,
}

/// Last digits and bank name of the payout destination
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BankAccountSummary {
    pub last4: Option<String>,
    #[serde(default)]
    pub bank_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayPayout {
    pub id: String,
    pub status: GatewayStatus,
    pub failure_code: Option<String>,
    pub bank_account: Option<BankAccountSummary>,
}

#[async_trait]
pub trait GatewayClient: Send + Sync {
    async fn create_intermediate_transfer(
        &self,
        params: &IntermediateTransferParams,
    ) -> Result<GatewayTransfer, GatewayError>;

    async fn create_payout(&self, params: &PayoutParams) -> Result<GatewayPayout, GatewayError>;

    async fn retrieve_payout(
        &self,
        payout_id: &str,
        account: &str,
    ) -> Result<GatewayPayout, GatewayError>;

    /// Available balance of `account` in `currency`, minor units
    async fn retrieve_balance(&self, account: &str, currency: &str)
    -> Result<Amount, GatewayError>;
}
