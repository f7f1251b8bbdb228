//! Gateway webhook ingestion
//!
//! The gateway pushes `{id, type: "<resource>.<action>", created, data.object}`
//! events. Known events update the matching attempt (last event wins by
//! `created`, `failed` is sticky) and re-derive the transfer status when the
//! attempt is the transfer's latest one.
//!
//! Known events always answer 200: business failures are logged, not
//! surfaced, so the gateway does not retry-storm us.

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    routing::{get, post},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use super::error::PayoutError;
use super::monitor::sync_transfer_status;
use super::repository::PayoutStore;
use super::state::{GatewayStatus, TransferStatus};
use super::types::{AttemptId, GatewayTransferAttempt, TransferId};
use crate::config::WebhookConfig;

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    /// Unix seconds at which the gateway produced the event
    pub created: i64,
    pub data: WebhookEventData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEventData {
    pub object: WebhookObject,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookObject {
    pub id: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub failure_code: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventResource {
    Transfer,
    Payout,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventAction {
    Created,
    Updated,
    Paid,
    Failed,
    Canceled,
    Reversed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventKind {
    pub resource: EventResource,
    pub action: EventAction,
}

impl EventKind {
    pub fn parse(event_type: &str) -> Option<Self> {
        let (resource, action) = event_type.split_once('.')?;
        let resource = match resource {
            "transfer" => EventResource::Transfer,
            "payout" => EventResource::Payout,
            _ => return None,
        };
        let action = match action {
            "created" => EventAction::Created,
            "updated" => EventAction::Updated,
            "paid" => EventAction::Paid,
            "failed" => EventAction::Failed,
            "canceled" => EventAction::Canceled,
            "reversed" => EventAction::Reversed,
            _ => return None,
        };
        Some(Self { resource, action })
    }

    /// Status implied by the action when the object carries none
    fn implied_status(&self) -> Option<GatewayStatus> {
        match self.action {
            EventAction::Paid => Some(GatewayStatus::Paid),
            EventAction::Failed => Some(GatewayStatus::Failed),
            EventAction::Canceled => Some(GatewayStatus::Canceled),
            EventAction::Created | EventAction::Updated | EventAction::Reversed => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookOutcome {
    Applied {
        attempt_id: AttemptId,
        /// New transfer status, when the transfer changed
        transfer_status: Option<TransferStatus>,
    },
    /// Older than the last applied event, or the attempt already failed
    Stale,
    /// No attempt matches the event object
    Unmatched,
    /// Event carries no usable status
    Ignored,
}

pub struct WebhookIngestor {
    store: PayoutStore,
}

impl WebhookIngestor {
    pub fn new(store: PayoutStore) -> Self {
        Self { store }
    }

    pub async fn apply_event(&self, event: &WebhookEvent) -> Result<WebhookOutcome, PayoutError> {
        let kind = EventKind::parse(&event.event_type).ok_or_else(|| {
            PayoutError::InvalidRequest(format!("unknown event type {}", event.event_type))
        })?;
        let event_at = DateTime::<Utc>::from_timestamp(event.created, 0).ok_or_else(|| {
            PayoutError::InvalidRequest(format!("invalid event timestamp {}", event.created))
        })?;
        let object = &event.data.object;

        let status = match object.status.as_deref() {
            Some(raw) => match raw.parse::<GatewayStatus>() {
                Ok(status) => Some(status),
                Err(_) => kind.implied_status(),
            },
            None => kind.implied_status(),
        };
        let Some(status) = status else {
            debug!(event_id = %event.id, event_type = %event.event_type, "Event without status ignored");
            return Ok(WebhookOutcome::Ignored);
        };

        let Some(attempt) = self.find_attempt(object).await? else {
            info!(event_id = %event.id, object_id = %object.id, "No attempt matches webhook event");
            return Ok(WebhookOutcome::Unmatched);
        };

        let applied = self
            .store
            .attempts
            .update_gateway_status(
                attempt.id,
                status,
                object.failure_code.as_deref(),
                Some(event_at),
            )
            .await?;
        if !applied {
            debug!(
                event_id = %event.id,
                attempt_id = attempt.id,
                gateway_status = %status,
                "Stale webhook event ignored"
            );
            return Ok(WebhookOutcome::Stale);
        }

        let is_latest = self
            .store
            .attempts
            .get_latest(attempt.transfer_id)
            .await?
            .is_some_and(|latest| latest.id == attempt.id);
        let transfer_status = if is_latest {
            sync_transfer_status(&self.store, attempt.transfer_id).await?
        } else {
            None
        };

        info!(
            event_id = %event.id,
            attempt_id = attempt.id,
            transfer_id = attempt.transfer_id,
            gateway_status = %status,
            "Webhook event applied"
        );
        Ok(WebhookOutcome::Applied {
            attempt_id: attempt.id,
            transfer_status,
        })
    }

    /// By gateway id, else by the `transfer_id`/`attempt_id` metadata we send
    async fn find_attempt(
        &self,
        object: &WebhookObject,
    ) -> Result<Option<GatewayTransferAttempt>, PayoutError> {
        if let Some(attempt) = self.store.attempts.get_by_gateway_id(&object.id).await? {
            return Ok(Some(attempt));
        }

        let transfer_id = object
            .metadata
            .get("transfer_id")
            .and_then(|v| v.parse::<TransferId>().ok());
        let attempt_id = object
            .metadata
            .get("attempt_id")
            .and_then(|v| v.parse::<AttemptId>().ok());
        let (Some(transfer_id), Some(attempt_id)) = (transfer_id, attempt_id) else {
            return Ok(None);
        };

        Ok(self
            .store
            .attempts
            .list_by_transfer(transfer_id)
            .await?
            .into_iter()
            .find(|a| a.id == attempt_id))
    }
}

/// Response envelope
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    /// 0 for success
    pub code: i32,
    pub msg: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            code: 0,
            msg: "ok".to_string(),
            data: Some(data),
        }
    }

    pub fn error(code: i32, msg: impl Into<String>) -> Self {
        Self {
            code,
            msg: msg.into(),
            data: None,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct WebhookAck {
    pub received: bool,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub timestamp: i64,
}

pub async fn handle_gateway_event(
    State(ingestor): State<Arc<WebhookIngestor>>,
    Json(event): Json<WebhookEvent>,
) -> (StatusCode, Json<ApiResponse<WebhookAck>>) {
    if EventKind::parse(&event.event_type).is_none() {
        warn!(event_id = %event.id, event_type = %event.event_type, "Unknown webhook event type");
        return (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::error(400, "Unsupported event")),
        );
    }

    if let Err(e) = ingestor.apply_event(&event).await {
        error!(event_id = %event.id, error = %e, "Failed to apply webhook event");
    }

    (
        StatusCode::OK,
        Json(ApiResponse::success(WebhookAck { received: true })),
    )
}

pub async fn health_check() -> (StatusCode, Json<ApiResponse<HealthResponse>>) {
    (
        StatusCode::OK,
        Json(ApiResponse::success(HealthResponse {
            status: "ok",
            timestamp: Utc::now().timestamp_millis(),
        })),
    )
}

pub fn router(ingestor: Arc<WebhookIngestor>) -> Router {
    Router::new()
        .route("/webhooks/gateway", post(handle_gateway_event))
        .route("/health", get(health_check))
        .with_state(ingestor)
}

/// Bind and serve the webhook endpoint until the server stops
pub async fn run_server(config: &WebhookConfig, ingestor: Arc<WebhookIngestor>) -> anyhow::Result<()> {
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(%addr, "Webhook server listening");
    axum::serve(listener, router(ingestor)).await?;
    Ok(())
}
