//! REST client for a Stripe-style payment gateway

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{RequestBuilder, Response};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::{debug, info};

use super::error::GatewayError;
use super::{
    BankAccountSummary, GatewayClient, GatewayPayout, GatewayTransfer,
    IntermediateTransferParams, PayoutParams,
};
use crate::config::GatewayConfig;
use crate::payout::state::GatewayStatus;
use crate::payout::types::Amount;

/// Header selecting the connected sub-account a call acts on
const ACCOUNT_HEADER: &str = "Stripe-Account";
const IDEMPOTENCY_HEADER: &str = "Idempotency-Key";

pub struct HttpGatewayClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    timeout_ms: u64,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Destination {
    Expanded(BankAccountSummary),
    Id(String),
}

#[derive(Deserialize)]
struct PayoutBody {
    id: String,
    status: String,
    #[serde(default)]
    failure_code: Option<String>,
    #[serde(default)]
    destination: Option<Destination>,
}

#[derive(Deserialize)]
struct BalanceBody {
    available: Vec<BalanceEntry>,
}

#[derive(Deserialize)]
struct BalanceEntry {
    amount: Amount,
    currency: String,
}

impl TryFrom<PayoutBody> for GatewayPayout {
    type Error = GatewayError;

    fn try_from(body: PayoutBody) -> Result<Self, Self::Error> {
        let status = body
            .status
            .parse::<GatewayStatus>()
            .map_err(GatewayError::Decode)?;
        let bank_account = match body.destination {
            Some(Destination::Expanded(summary)) => Some(summary),
            Some(Destination::Id(destination)) => {
                debug!(payout_id = %body.id, destination = %destination, "Payout destination not expanded");
                None
            }
            None => None,
        };
        Ok(GatewayPayout {
            id: body.id,
            status,
            failure_code: body.failure_code,
            bank_account,
        })
    }
}

impl HttpGatewayClient {
    pub fn new(config: &GatewayConfig) -> Result<Self, GatewayError> {
        info!("Initializing gateway client for {}", config.base_url);

        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| GatewayError::Transport(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            timeout_ms: config.timeout_ms,
        })
    }

    fn request(&self, method: reqwest::Method, path: &str) -> RequestBuilder {
        self.client
            .request(method, format!("{}{}", self.base_url, path))
            .bearer_auth(&self.api_key)
    }

    async fn send<R: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<R, GatewayError> {
        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                GatewayError::Timeout(self.timeout_ms)
            } else {
                GatewayError::Transport(e.to_string())
            }
        })?;

        if !response.status().is_success() {
            return Err(Self::api_error(response).await);
        }

        response
            .json::<R>()
            .await
            .map_err(|e| GatewayError::Decode(e.to_string()))
    }

    async fn api_error(response: Response) -> GatewayError {
        let http_status = response.status();
        match response.json::<ErrorEnvelope>().await {
            Ok(envelope) => GatewayError::Api {
                http_status: http_status.as_u16(),
                code: envelope.error.code,
                message: envelope.error.message.unwrap_or_default(),
            },
            Err(_) => GatewayError::Api {
                http_status: http_status.as_u16(),
                code: None,
                message: http_status
                    .canonical_reason()
                    .unwrap_or("gateway error")
                    .to_string(),
            },
        }
    }
}

#[async_trait]
impl GatewayClient for HttpGatewayClient {
    async fn create_intermediate_transfer(
        &self,
        params: &IntermediateTransferParams,
    ) -> Result<GatewayTransfer, GatewayError> {
        debug!(
            amount = params.amount,
            destination = %params.destination_account,
            "Creating intermediate transfer"
        );

        let builder = self
            .request(reqwest::Method::POST, "/v1/transfers")
            .header(IDEMPOTENCY_HEADER, &params.idempotency_key)
            .header(ACCOUNT_HEADER, &params.source_account)
            .json(&json!({
                "amount": params.amount,
                "currency": params.currency.to_lowercase(),
                "destination": params.destination_account,
            }));

        self.send(builder).await
    }

    async fn create_payout(&self, params: &PayoutParams) -> Result<GatewayPayout, GatewayError> {
        debug!(amount = params.amount, account = %params.account, "Creating payout");

        let builder = self
            .request(reqwest::Method::POST, "/v1/payouts")
            .header(IDEMPOTENCY_HEADER, &params.idempotency_key)
            .header(ACCOUNT_HEADER, &params.account)
            .json(&json!({
                "amount": params.amount,
                "currency": params.currency.to_lowercase(),
                "metadata": params.metadata,
                "expand": ["destination"],
            }));

        let body: PayoutBody = self.send(builder).await?;
        body.try_into()
    }

    async fn retrieve_payout(
        &self,
        payout_id: &str,
        account: &str,
    ) -> Result<GatewayPayout, GatewayError> {
        let builder = self
            .request(reqwest::Method::GET, &format!("/v1/payouts/{}", payout_id))
            .header(ACCOUNT_HEADER, account);

        let body: PayoutBody = self.send(builder).await?;
        body.try_into()
    }

    async fn retrieve_balance(
        &self,
        account: &str,
        currency: &str,
    ) -> Result<Amount, GatewayError> {
        let builder = self
            .request(reqwest::Method::GET, "/v1/balance")
            .header(ACCOUNT_HEADER, account);

        let body: BalanceBody = self.send(builder).await?;
        body.available
            .iter()
            .filter(|entry| entry.currency.eq_ignore_ascii_case(currency))
            .try_fold(0i64, |acc, entry| acc.checked_add(entry.amount))
            .ok_or_else(|| GatewayError::Decode("balance overflow".to_string()))
    }
}
