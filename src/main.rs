use std::sync::Arc;

use alert_queue::{
    api::run_api_server,
    clients::{postgres::PgJobStore, redis::RedisClient},
    config::Config,
    events::AlertEventBus,
    queue::{
        orchestrator::{HybridQueue, MAINTENANCE_QUEUE},
        scheduler::Scheduler,
    },
    sender::LogSender,
};
use anyhow::{Error, Result, anyhow};
use serde_json::json;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .json()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config = Config::load()?;

    let redis = Arc::new(RedisClient::connect(&config).await?);
    let store = Arc::new(PgJobStore::connect(&config.database_url).await?);
    let events = Arc::new(AlertEventBus::new());

    let queue = Arc::new(HybridQueue::new(
        Arc::clone(&store),
        Arc::clone(&redis),
        Arc::clone(&redis),
        Arc::new(LogSender),
        events,
        config.queue_config(),
    ));

    let _workers = queue.spawn_queue_workers();
    let _consumer = queue.spawn_fast_path_consumer();

    let mut scheduler = Scheduler::new(Arc::clone(&store));
    scheduler.add(
        "overflow-sweep",
        MAINTENANCE_QUEUE,
        &config.sweep_schedule,
        json!({}),
        0,
    )?;
    tokio::spawn(scheduler.run());

    info!("Hybrid queue started");

    run_api_server(config, queue)
        .await
        .map_err(|e| anyhow!("API server failed: {}", e))
}
