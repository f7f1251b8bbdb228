//! Payout Engine
//!
//! Moves money owed to payees (drivers, merchants) from a pooled platform
//! balance to their bank accounts through an external payment gateway, with
//! exactly-once payout semantics.
//!
//! # Modules
//!
//! - [`config`] - YAML application config
//! - [`logging`] - tracing subscriber with rolling file output
//! - [`db`] - PostgreSQL pool and row helpers
//! - [`payout`] - transfer creation, submission, tasks and reconciliation

pub mod config;
pub mod db;
pub mod logging;
pub mod payout;

// Convenient re-exports at crate root
pub use config::AppConfig;
pub use payout::{PayoutError, TransferStatus};
