//! Payout Counters
//!
//! Count/amount counters keyed by metric name and payee category. Injected
//! into the orchestrators; recording never fails and never touches the
//! money-movement path.

use std::collections::BTreeMap;

use dashmap::DashMap;

use super::types::Amount;

pub const SUBMIT_ATTEMPT: &str = "payout.submit.attempt";
pub const SUBMIT_SUCCESS: &str = "payout.submit.success";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counter {
    pub count: u64,
    pub amount: i128,
}

#[derive(Default)]
pub struct PayoutMetrics {
    counters: DashMap<(&'static str, String), Counter>,
}

impl PayoutMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn record_submit_attempt(&self, category: &str, amount: Amount) {
        self.record(SUBMIT_ATTEMPT, category, amount);
    }

    #[inline]
    pub fn record_submit_success(&self, category: &str, amount: Amount) {
        self.record(SUBMIT_SUCCESS, category, amount);
    }

    pub fn record(&self, metric: &'static str, category: &str, amount: Amount) {
        let mut counter = self
            .counters
            .entry((metric, category.to_string()))
            .or_default();
        counter.count += 1;
        counter.amount += amount as i128;
    }

    pub fn get(&self, metric: &'static str, category: &str) -> Counter {
        self.counters
            .get(&(metric, category.to_string()))
            .map(|c| *c)
            .unwrap_or_default()
    }

    /// `"<metric>.count{category}"` / `"<metric>.amount{category}"` view, sorted
    pub fn snapshot(&self) -> BTreeMap<String, i128> {
        let mut out = BTreeMap::new();
        for entry in self.counters.iter() {
            let (metric, category) = entry.key();
            let counter = entry.value();
            out.insert(
                format!("{}.count{{category={}}}", metric, category),
                counter.count as i128,
            );
            out.insert(
                format!("{}.amount{{category={}}}", metric, category),
                counter.amount,
            );
        }
        out
    }
}
