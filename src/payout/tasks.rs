//! Background Task Envelope, Bus and Consumer
//!
//! Tasks travel as flat JSON envelopes:
//!
//! ```text
//! {"id": "...", "task_type": "submit_transfer", "topic": "submit-transfer",
//!  "max_retries": 5, "attempts": 0, "args": {"transfer_id": 7, ...}}
//! ```
//!
//! Delivery is at-least-once. Handlers are idempotent (submission has its own
//! duplicate/processing guards), so a re-publish after a failure is safe.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{Semaphore, mpsc};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::create::CreateTransferOrchestrator;
use super::error::PayoutError;
use super::submit::SubmitTransferOrchestrator;
use super::types::{CreateTransferRequest, SubmitTransferRequest};

pub const CREATE_TRANSFER_TOPIC: &str = "create-transfer";
pub const SUBMIT_TRANSFER_TOPIC: &str = "submit-transfer";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    CreateTransfer,
    SubmitTransfer,
}

impl TaskType {
    pub fn topic(&self) -> &'static str {
        match self {
            TaskType::CreateTransfer => CREATE_TRANSFER_TOPIC,
            TaskType::SubmitTransfer => SUBMIT_TRANSFER_TOPIC,
        }
    }
}

/// Closed set of task kinds with their typed payloads
#[derive(Debug, Clone, PartialEq)]
pub enum PayoutTask {
    CreateTransfer(CreateTransferRequest),
    SubmitTransfer(SubmitTransferRequest),
}

impl PayoutTask {
    pub fn task_type(&self) -> TaskType {
        match self {
            PayoutTask::CreateTransfer(_) => TaskType::CreateTransfer,
            PayoutTask::SubmitTransfer(_) => TaskType::SubmitTransfer,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskEnvelope {
    pub id: Uuid,
    pub task_type: TaskType,
    pub topic: String,
    pub max_retries: u32,
    pub attempts: u32,
    pub args: serde_json::Value,
}

impl TaskEnvelope {
    pub fn new(task: &PayoutTask, max_retries: u32) -> Result<Self, PayoutError> {
        let args = match task {
            PayoutTask::CreateTransfer(req) => serde_json::to_value(req),
            PayoutTask::SubmitTransfer(req) => serde_json::to_value(req),
        }
        .map_err(|e| PayoutError::TaskBus(format!("Failed to encode task args: {}", e)))?;

        let task_type = task.task_type();
        Ok(Self {
            id: Uuid::new_v4(),
            task_type,
            topic: task_type.topic().to_string(),
            max_retries,
            attempts: 0,
            args,
        })
    }

    /// Decode `args` into the payload type selected by `task_type`
    pub fn task(&self) -> Result<PayoutTask, PayoutError> {
        let decoded = match self.task_type {
            TaskType::CreateTransfer => {
                serde_json::from_value(self.args.clone()).map(PayoutTask::CreateTransfer)
            }
            TaskType::SubmitTransfer => {
                serde_json::from_value(self.args.clone()).map(PayoutTask::SubmitTransfer)
            }
        };
        decoded.map_err(|e| PayoutError::TaskBus(format!("Invalid task args: {}", e)))
    }

    pub fn to_json(&self) -> Result<String, PayoutError> {
        serde_json::to_string(self)
            .map_err(|e| PayoutError::TaskBus(format!("Failed to encode envelope: {}", e)))
    }

    pub fn from_json(raw: &str) -> Result<Self, PayoutError> {
        serde_json::from_str(raw)
            .map_err(|e| PayoutError::TaskBus(format!("Invalid envelope: {}", e)))
    }
}

#[async_trait]
pub trait TaskBus: Send + Sync {
    async fn publish(&self, envelope: TaskEnvelope) -> Result<(), PayoutError>;
}

/// In-process bus: one bounded mpsc channel per topic, JSON on the wire
pub struct ChannelTaskBus {
    senders: HashMap<String, mpsc::Sender<String>>,
}

impl ChannelTaskBus {
    /// Build the bus and hand back one receiver per topic
    pub fn new(queue_size: usize) -> (Self, HashMap<String, mpsc::Receiver<String>>) {
        let mut senders = HashMap::new();
        let mut receivers = HashMap::new();
        for topic in [CREATE_TRANSFER_TOPIC, SUBMIT_TRANSFER_TOPIC] {
            let (tx, rx) = mpsc::channel(queue_size);
            senders.insert(topic.to_string(), tx);
            receivers.insert(topic.to_string(), rx);
        }
        (Self { senders }, receivers)
    }
}

#[async_trait]
impl TaskBus for ChannelTaskBus {
    async fn publish(&self, envelope: TaskEnvelope) -> Result<(), PayoutError> {
        let sender = self
            .senders
            .get(&envelope.topic)
            .ok_or_else(|| PayoutError::TaskBus(format!("Unknown topic: {}", envelope.topic)))?;

        let raw = envelope.to_json()?;
        sender
            .send(raw)
            .await
            .map_err(|_| PayoutError::TaskBus(format!("Topic {} closed", envelope.topic)))?;

        debug!(task_id = %envelope.id, topic = %envelope.topic, attempts = envelope.attempts, "Task published");
        Ok(())
    }
}

/// What happened to one delivered envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    Completed,
    /// Re-published with `attempts + 1`
    Retried,
    /// Terminal failure, logged and discarded
    Dropped,
}

pub struct TaskConsumer {
    create: Arc<CreateTransferOrchestrator>,
    submit: Arc<SubmitTransferOrchestrator>,
    bus: Arc<dyn TaskBus>,
    permits: Arc<Semaphore>,
}

impl TaskConsumer {
    pub fn new(
        create: Arc<CreateTransferOrchestrator>,
        submit: Arc<SubmitTransferOrchestrator>,
        bus: Arc<dyn TaskBus>,
        concurrency: usize,
    ) -> Self {
        Self {
            create,
            submit,
            bus,
            permits: Arc::new(Semaphore::new(concurrency.max(1))),
        }
    }

    /// Drain one topic until its channel closes
    pub async fn run(self: Arc<Self>, topic: String, mut rx: mpsc::Receiver<String>) {
        info!(topic = %topic, "Starting task consumer");

        while let Some(raw) = rx.recv().await {
            let envelope = match TaskEnvelope::from_json(&raw) {
                Ok(envelope) => envelope,
                Err(e) => {
                    error!(topic = %topic, error = %e, "Dropping undecodable task");
                    continue;
                }
            };

            let permit = match self.permits.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };
            let consumer = self.clone();
            tokio::spawn(async move {
                consumer.process(envelope).await;
                drop(permit);
            });
        }

        info!(topic = %topic, "Task consumer stopped");
    }

    /// Handle one envelope, re-publishing retryable failures
    pub async fn process(&self, mut envelope: TaskEnvelope) -> TaskOutcome {
        let result = match envelope.task() {
            Ok(task) => self.dispatch(task, envelope.attempts).await,
            Err(e) => Err(e),
        };

        let err = match result {
            Ok(()) => return TaskOutcome::Completed,
            Err(e) => e,
        };

        if !err.retryable() {
            error!(
                task_id = %envelope.id,
                task_type = ?envelope.task_type,
                error_code = err.code(),
                error = %err,
                "Task failed permanently"
            );
            return TaskOutcome::Dropped;
        }

        envelope.attempts += 1;
        if envelope.attempts >= envelope.max_retries {
            error!(
                task_id = %envelope.id,
                task_type = ?envelope.task_type,
                attempts = envelope.attempts,
                error = %err,
                "Task retries exhausted"
            );
            return TaskOutcome::Dropped;
        }

        warn!(
            task_id = %envelope.id,
            task_type = ?envelope.task_type,
            attempts = envelope.attempts,
            error = %err,
            "Task failed, re-publishing"
        );
        match self.bus.publish(envelope).await {
            Ok(()) => TaskOutcome::Retried,
            Err(e) => {
                error!(error = %e, "Failed to re-publish task");
                TaskOutcome::Dropped
            }
        }
    }

    async fn dispatch(&self, task: PayoutTask, attempts: u32) -> Result<(), PayoutError> {
        match task {
            PayoutTask::CreateTransfer(req) => {
                self.create.create_transfer(req).await?;
            }
            PayoutTask::SubmitTransfer(mut req) => {
                // A redelivery may follow a partial run of the same task
                if attempts > 0 {
                    req.retry = true;
                }
                self.submit.submit_transfer(req).await?;
            }
        }
        Ok(())
    }
}
