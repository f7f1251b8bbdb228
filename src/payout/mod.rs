//! Payout Engine
//!
//! Aggregates a payee's unpaid transactions into a transfer, funds the
//! payee's gateway sub-account, submits the payout and keeps local state in
//! line with the gateway afterwards.
//!
//! # Transfer lifecycle
//!
//! ```text
//! CREATING → NEW ──submit──▶ CREATED / PENDING → IN_TRANSIT → PAID
//!    │        │                    │
//!    │        ├──▶ ERROR (local)   └──▶ FAILED / CANCELLED (gateway)
//!    ▼        ▼
//!       DELETED
//! ```
//!
//! After submission the transfer's status is always re-derivable from its
//! latest [`GatewayTransferAttempt`]; webhooks and the drift sweep do exactly
//! that.
//!
//! # Money-safety rules
//!
//! 1. **One owner per transaction**: transactions are claimed with a
//!    conditional update, never re-assigned.
//! 2. **Persist before call**: an attempt row exists before the payout call,
//!    and its id is the gateway idempotency key.
//! 3. **Unknown is not failed**: a timed-out payout keeps its attempt in
//!    `submitting`; it is replayed with the same key, never re-created.
//! 4. **Failed is sticky**: no webhook moves an attempt out of `failed`.

pub mod admin;
pub mod create;
pub mod error;
pub mod gateway;
pub mod lock;
pub mod metrics;
pub mod monitor;
pub mod policy;
pub mod repository;
pub mod scheduler;
pub mod state;
pub mod submit;
pub mod tasks;
pub mod types;
pub mod webhook;


// Re-exports for convenience
pub use admin::TransferAdmin;
pub use create::CreateTransferOrchestrator;
pub use error::{ErrorResponse, PayoutError};
pub use gateway::{GatewayClient, GatewayError, HttpGatewayClient};
pub use lock::{DistributedLock, PgLeaseLock};
pub use metrics::PayoutMetrics;
pub use monitor::ReconciliationWorker;
pub use policy::PayoutPolicy;
pub use repository::{PayoutStore, PgPayoutStore};
pub use scheduler::PayoutScheduler;
pub use state::{GatewayStatus, SubmissionStatus, TransferStatus, TransferStatusCode};
pub use submit::SubmitTransferOrchestrator;
pub use tasks::{ChannelTaskBus, PayoutTask, TaskBus, TaskConsumer, TaskEnvelope};
pub use types::{
    CreateTransferOutcome, CreateTransferRequest, GatewayTransferAttempt, SubmitTransferOutcome,
    SubmitTransferRequest, Transfer, TransferMethod, TransferType,
};
pub use webhook::WebhookIngestor;
