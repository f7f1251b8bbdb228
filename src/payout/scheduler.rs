//! Scheduled payout run
//!
//! Once per interval, every payee whose payout day is today gets a scheduled
//! create-transfer task that submits on creation. Re-running a day is
//! harmless: already-claimed transactions leave nothing to aggregate.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Datelike, Utc, Weekday};
use tracing::{error, info};

use super::error::PayoutError;
use super::repository::PayoutStore;
use super::tasks::{PayoutTask, TaskBus, TaskEnvelope};
use super::types::{CreateTransferRequest, PayeeAccountId, TransferType};
use crate::config::SchedulerConfig;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScheduleReport {
    pub accounts: usize,
    pub published: usize,
    pub failed: usize,
}

pub struct PayoutScheduler {
    store: PayoutStore,
    bus: Arc<dyn TaskBus>,
    config: SchedulerConfig,
    batch_size: i64,
    task_max_retries: u32,
}

impl PayoutScheduler {
    pub fn new(
        store: PayoutStore,
        bus: Arc<dyn TaskBus>,
        config: SchedulerConfig,
        batch_size: i64,
        task_max_retries: u32,
    ) -> Self {
        Self {
            store,
            bus,
            config,
            batch_size: batch_size.max(1),
            task_max_retries,
        }
    }

    pub async fn run(&self) {
        info!(
            interval_secs = self.config.interval_secs,
            payout_countries = ?self.config.payout_countries,
            "Starting payout scheduler"
        );

        let mut interval =
            tokio::time::interval(Duration::from_secs(self.config.interval_secs.max(1)));
        loop {
            interval.tick().await;
            let now = Utc::now();
            match self.schedule_day(now.weekday(), now).await {
                Ok(report) => info!(?report, "Scheduled payout run done"),
                Err(e) => error!(error = %e, "Scheduled payout run failed"),
            }
        }
    }

    /// Publish one scheduled create-transfer task per payee paid on `day`
    pub async fn schedule_day(
        &self,
        day: Weekday,
        end_time: DateTime<Utc>,
    ) -> Result<ScheduleReport, PayoutError> {
        let mut report = ScheduleReport::default();
        let mut after_id: PayeeAccountId = 0;

        loop {
            let accounts = self
                .store
                .accounts
                .list_by_payout_day(day, after_id, self.batch_size)
                .await?;
            let Some(last) = accounts.last() else {
                break;
            };
            after_id = last.id;

            for account in &accounts {
                report.accounts += 1;
                let mut req = CreateTransferRequest::new(account.id, end_time, TransferType::Scheduled);
                req.payout_day = Some(day);
                req.payout_countries = self.config.payout_countries.clone();
                req.submit_after_creation = true;

                let published = match TaskEnvelope::new(&PayoutTask::CreateTransfer(req), self.task_max_retries) {
                    Ok(envelope) => self.bus.publish(envelope).await,
                    Err(e) => Err(e),
                };
                match published {
                    Ok(()) => report.published += 1,
                    Err(e) => {
                        report.failed += 1;
                        error!(payee_account_id = account.id, error = %e, "Failed to schedule payout");
                    }
                }
            }

            if (accounts.len() as i64) < self.batch_size {
                break;
            }
        }

        Ok(report)
    }
}
