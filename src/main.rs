//! Payout Engine service
//!
//! ```text
//! ┌───────────┐   create-transfer   ┌──────────┐  submit-transfer  ┌──────────┐
//! │ Scheduler │────────────────────▶│  Create  │──────────────────▶│  Submit  │──▶ Gateway
//! └───────────┘                     └──────────┘                   └──────────┘
//!                                                                       ▲
//! ┌────────────────┐  stuck / drift sweeps                              │
//! │ Reconciliation │────────────────────────────────────────────────────┘
//! └────────────────┘
//! ┌────────────────┐
//! │ Webhook server │◀── gateway events
//! └────────────────┘
//! ```

use std::sync::Arc;

use anyhow::Context;

use payout_engine::config::AppConfig;
use payout_engine::db::Database;
use payout_engine::payout::webhook::{self, WebhookIngestor};
use payout_engine::payout::{
    ChannelTaskBus, CreateTransferOrchestrator, DistributedLock, GatewayClient,
    HttpGatewayClient, PayoutMetrics, PayoutPolicy, PayoutScheduler, PayoutStore, PgLeaseLock,
    ReconciliationWorker, SubmitTransferOrchestrator, TaskBus, TaskConsumer,
};

fn get_env() -> String {
    let args: Vec<String> = std::env::args().collect();
    for i in 0..args.len() {
        if (args[i] == "--env" || args[i] == "-e") && i + 1 < args.len() {
            return args[i + 1].clone();
        }
    }
    "dev".to_string()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env = get_env();
    let app_config = AppConfig::load(&env)?;
    let _log_guard = payout_engine::logging::init_logging(&app_config);

    tracing::info!(
        env = %env,
        git_hash = env!("GIT_HASH"),
        "Starting payout engine"
    );

    // ============================================================
    // INFRASTRUCTURE
    // ============================================================

    let db = Database::connect(&app_config.postgres_url, app_config.postgres_max_connections)
        .await
        .context("Failed to connect to PostgreSQL")?;
    let pool = db.pool().clone();

    let store = PayoutStore::postgres(pool.clone());
    let lock: Arc<dyn DistributedLock> = Arc::new(PgLeaseLock::new(pool));
    let gateway: Arc<dyn GatewayClient> = Arc::new(
        HttpGatewayClient::new(&app_config.gateway).context("Failed to build gateway client")?,
    );
    let metrics = Arc::new(PayoutMetrics::new());
    let policy = Arc::new(
        PayoutPolicy::from_config(&app_config.payout, app_config.gateway.timeout_ms)
            .context("Invalid payout config")?,
    );

    let (bus, receivers) = ChannelTaskBus::new(app_config.tasks.queue_size);
    let bus: Arc<dyn TaskBus> = Arc::new(bus);
    let max_retries = app_config.tasks.max_retries;

    // ============================================================
    // SERVICES
    // ============================================================

    let create = Arc::new(CreateTransferOrchestrator::new(
        store.clone(),
        lock,
        bus.clone(),
        policy.clone(),
        max_retries,
    ));
    let submit = Arc::new(SubmitTransferOrchestrator::new(
        store.clone(),
        gateway.clone(),
        metrics,
        policy,
        app_config.gateway.platform_account_id.clone(),
    ));

    let consumer = Arc::new(TaskConsumer::new(
        create,
        submit.clone(),
        bus.clone(),
        app_config.tasks.concurrency,
    ));
    for (topic, rx) in receivers {
        tokio::spawn(consumer.clone().run(topic, rx));
    }

    let worker = ReconciliationWorker::new(
        store.clone(),
        gateway,
        submit,
        bus.clone(),
        app_config.monitor.clone(),
        max_retries,
    );
    tokio::spawn(async move { worker.run().await });

    if app_config.scheduler.enabled {
        let scheduler = PayoutScheduler::new(
            store.clone(),
            bus,
            app_config.scheduler.clone(),
            app_config.monitor.batch_size,
            max_retries,
        );
        tokio::spawn(async move { scheduler.run().await });
    } else {
        tracing::info!("Payout scheduler disabled");
    }

    // ============================================================
    // WEBHOOK SERVER
    // ============================================================

    let ingestor = Arc::new(WebhookIngestor::new(store));
    tokio::select! {
        result = webhook::run_server(&app_config.webhook, ingestor) => {
            result.context("Webhook server stopped")?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown signal received");
        }
    }

    Ok(())
}
