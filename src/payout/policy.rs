//! Payout policy derived from the `payout` config section

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};

use super::error::PayoutError;

use super::types::{ActorId, Amount, PayeeAccount, PayeeAccountId, TransferMethod};
use crate::config::PayoutConfig;

#[derive(Debug, Clone)]
pub struct PayoutPolicy {
    pub lock_ttl: Duration,
    pub lock_wait: Duration,
    pub bank_change_hold: chrono::Duration,
    pub bank_change_lookback: chrono::Duration,
    pub default_amount_limit: Amount,
    currency_amount_limits: HashMap<String, Amount>,
    account_amount_limits: HashMap<PayeeAccountId, Amount>,
    override_allow_list: HashSet<ActorId>,
    blocked_payees: HashSet<PayeeAccountId>,
    pub failed_gateway_codes: Vec<String>,
    pub default_method: TransferMethod,
    pub gateway_timeout: Duration,
}

impl PayoutPolicy {
    pub fn from_config(
        config: &PayoutConfig,
        gateway_timeout_ms: u64,
    ) -> Result<Self, PayoutError> {
        Ok(Self {
            lock_ttl: Duration::from_millis(config.lock_ttl_ms),
            lock_wait: Duration::from_millis(config.lock_wait_ms),
            bank_change_hold: hours("bank_change_hold_hours", config.bank_change_hold_hours)?,
            bank_change_lookback: hours(
                "bank_change_lookback_hours",
                config.bank_change_lookback_hours,
            )?,
            default_amount_limit: config.default_amount_limit,
            currency_amount_limits: config
                .currency_amount_limits
                .iter()
                .map(|(currency, limit)| (currency.to_uppercase(), *limit))
                .collect(),
            account_amount_limits: config.account_amount_limits.clone(),
            override_allow_list: config.amount_limit_override_allow_list.iter().copied().collect(),
            blocked_payees: config.blocked_payee_ids.iter().copied().collect(),
            failed_gateway_codes: config.failed_gateway_codes.clone(),
            default_method: config
                .default_method
                .parse()
                .map_err(PayoutError::InvalidConfig)?,
            gateway_timeout: Duration::from_millis(gateway_timeout_ms),
        })
    }

    /// Account override, else currency ceiling, else the default
    pub fn amount_limit(&self, account: &PayeeAccount) -> Amount {
        if let Some(limit) = self.account_amount_limits.get(&account.id) {
            return *limit;
        }
        self.currency_amount_limits
            .get(&account.currency.to_uppercase())
            .copied()
            .unwrap_or(self.default_amount_limit)
    }

    pub fn can_override_amount_limit(&self, actor: Option<ActorId>) -> bool {
        actor.is_some_and(|a| self.override_allow_list.contains(&a))
    }

    pub fn is_blocked(&self, payee_account_id: PayeeAccountId) -> bool {
        self.blocked_payees.contains(&payee_account_id)
    }

    /// Scheduled payouts are held while the last bank change is inside the hold window
    pub fn in_bank_change_hold(&self, account: &PayeeAccount, now: DateTime<Utc>) -> bool {
        self.bank_change_hold > chrono::Duration::zero()
            && account
                .bank_updated_at
                .is_some_and(|at| now - at < self.bank_change_hold)
    }

    pub fn bank_changed_recently(&self, account: &PayeeAccount, now: DateTime<Utc>) -> bool {
        account
            .bank_updated_at
            .is_some_and(|at| now - at < self.bank_change_lookback)
    }
}

fn hours(field: &str, value: i64) -> Result<TimeDelta, PayoutError> {
    TimeDelta::try_hours(value)
        .filter(|d| *d >= TimeDelta::zero())
        .ok_or_else(|| PayoutError::InvalidConfig(format!("{} out of range: {}", field, value)))
}

impl Default for PayoutPolicy {
    fn default() -> Self {
        Self {
            lock_ttl: Duration::from_secs(30),
            lock_wait: Duration::from_secs(2),
            bank_change_hold: chrono::Duration::zero(),
            bank_change_lookback: chrono::Duration::hours(7 * 24),
            default_amount_limit: 500_000,
            currency_amount_limits: HashMap::new(),
            account_amount_limits: HashMap::new(),
            override_allow_list: HashSet::new(),
            blocked_payees: HashSet::new(),
            failed_gateway_codes: vec![
                "no_external_account".to_string(),
                "payouts_not_allowed".to_string(),
            ],
            default_method: TransferMethod::Gateway,
            gateway_timeout: Duration::from_secs(10),
        }
    }
}
