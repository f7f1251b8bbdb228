use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;

use anyhow::Context;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    pub log_level: String,
    pub log_dir: String,
    pub log_file: String,
    pub use_json: bool,
    pub rotation: String,
    pub enable_tracing: bool,
    /// PostgreSQL connection URL for the payout ledger
    pub postgres_url: String,
    #[serde(default = "default_postgres_max_connections")]
    pub postgres_max_connections: u32,
    #[serde(default)]
    pub webhook: WebhookConfig,
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub payout: PayoutConfig,
    #[serde(default)]
    pub tasks: TaskConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct WebhookConfig {
    pub host: String,
    pub port: u16,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8090,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct GatewayConfig {
    pub base_url: String,
    pub api_key: String,
    /// Pooled platform balance that funds intermediate transfers
    pub platform_account_id: String,
    #[serde(default = "default_gateway_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_postgres_max_connections() -> u32 {
    20
}

fn default_gateway_timeout_ms() -> u64 {
    10_000
}

/// Payout policy knobs (eligibility gates, amount limits, gateway error buckets)
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct PayoutConfig {
    pub lock_ttl_ms: u64,
    pub lock_wait_ms: u64,
    /// Scheduled payouts are held this long after a bank account change
    pub bank_change_hold_hours: i64,
    /// Amount-limit overrides are required when the bank changed this recently
    pub bank_change_lookback_hours: i64,
    pub default_amount_limit: i64,
    pub currency_amount_limits: HashMap<String, i64>,
    pub account_amount_limits: HashMap<i64, i64>,
    pub amount_limit_override_allow_list: Vec<i64>,
    pub blocked_payee_ids: Vec<i64>,
    pub failed_gateway_codes: Vec<String>,
    pub default_method: String,
}

impl Default for PayoutConfig {
    fn default() -> Self {
        Self {
            lock_ttl_ms: 30_000,
            lock_wait_ms: 2_000,
            bank_change_hold_hours: 0,
            bank_change_lookback_hours: 7 * 24,
            default_amount_limit: 500_000,
            currency_amount_limits: HashMap::new(),
            account_amount_limits: HashMap::new(),
            amount_limit_override_allow_list: Vec::new(),
            blocked_payee_ids: Vec::new(),
            failed_gateway_codes: vec![
                "no_external_account".to_string(),
                "payouts_not_allowed".to_string(),
            ],
            default_method: "gateway".to_string(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct TaskConfig {
    pub queue_size: usize,
    pub max_retries: u32,
    pub concurrency: usize,
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            queue_size: 1024,
            max_retries: 5,
            concurrency: 8,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct MonitorConfig {
    pub scan_interval_secs: u64,
    pub stuck_threshold_secs: u64,
    pub drift_window_hours: i64,
    pub stale_submitting_secs: u64,
    pub batch_size: i64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            scan_interval_secs: 60,
            stuck_threshold_secs: 15 * 60,
            drift_window_hours: 7 * 24,
            stale_submitting_secs: 5 * 60,
            batch_size: 100,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct SchedulerConfig {
    pub enabled: bool,
    pub interval_secs: u64,
    pub payout_countries: Option<Vec<String>>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_secs: 24 * 60 * 60,
            payout_countries: None,
        }
    }
}

impl AppConfig {
    pub fn load(env: &str) -> anyhow::Result<Self> {
        let config_path = format!("config/{}.yaml", env);
        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path))?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> anyhow::Result<Self> {
        serde_yaml::from_str(content).context("Failed to parse config yaml")
    }
}
