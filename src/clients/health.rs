use std::{collections::HashMap, time::Instant};

use chrono::Utc;
use redis::AsyncCommands;
use tracing::{debug, warn};

use crate::{
    clients::postgres::PgJobStore,
    config::Config,
    models::health::{HealthCheckResponse, HealthStatus, ServiceHealth},
};

pub struct HealthChecker {
    config: Config,
}

impl HealthChecker {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    pub async fn check_all(&self) -> HealthCheckResponse {
        let mut checks = HashMap::new();

        let db_health = self.check_database().await;
        checks.insert("durable_store".to_string(), db_health);

        let redis_health = self.check_redis().await;
        checks.insert("lock_store".to_string(), redis_health);

        let overall_status = determine_overall_status(&checks);

        HealthCheckResponse {
            status: overall_status,
            timestamp: Utc::now(),
            checks,
        }
    }

    async fn check_database(&self) -> ServiceHealth {
        let start = Instant::now();

        match PgJobStore::connect(&self.config.database_url).await {
            Ok(store) => match store.health_check().await {
                Ok(_) => {
                    let elapsed = start.elapsed().as_millis() as u64;
                    debug!(response_time_ms = elapsed, "Database health check passed");
                    ServiceHealth::healthy(elapsed)
                }
                Err(e) => {
                    warn!(error = %e, "Database health check failed");
                    ServiceHealth::unhealthy(format!("Health check query failed: {}", e))
                }
            },
            Err(e) => {
                warn!(error = %e, "Database connection failed");
                ServiceHealth::unhealthy(format!("Connection failed: {}", e))
            }
        }
    }

    async fn check_redis(&self) -> ServiceHealth {
        let start = Instant::now();

        match redis::Client::open(self.config.redis_url.as_str()) {
            Ok(client) => match client.get_multiplexed_async_connection().await {
                Ok(mut conn) => match conn.ping::<String>().await {
                    Ok(_) => {
                        let elapsed = start.elapsed().as_millis() as u64;
                        debug!(response_time_ms = elapsed, "Redis health check passed");
                        ServiceHealth::healthy(elapsed)
                    }
                    Err(e) => {
                        warn!(error = %e, "Redis ping failed");
                        ServiceHealth::unhealthy(format!("Ping failed: {}", e))
                    }
                },
                Err(e) => {
                    warn!(error = %e, "Redis connection failed");
                    ServiceHealth::unhealthy(format!("Connection failed: {}", e))
                }
            },
            Err(e) => {
                warn!(error = %e, "Redis client creation failed");
                ServiceHealth::unhealthy(format!("Client creation failed: {}", e))
            }
        }
    }
}

fn determine_overall_status(checks: &HashMap<String, ServiceHealth>) -> HealthStatus {
    let unhealthy = checks
        .values()
        .filter(|health| health.status == HealthStatus::Unhealthy)
        .count();

    // Either store alone keeps a delivery path alive; losing both means
    // no path can make progress.
    if unhealthy == checks.len() {
        HealthStatus::Unhealthy
    } else if unhealthy > 0 {
        HealthStatus::Degraded
    } else {
        HealthStatus::Healthy
    }
}
