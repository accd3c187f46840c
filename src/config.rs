use std::time::Duration;

use anyhow::{Error, Result, anyhow};
use dotenvy::dotenv;
use serde::Deserialize;

use crate::models::retry::RetryConfig;

#[derive(Clone, Deserialize, Debug)]
pub struct Config {
    pub redis_url: String,
    pub database_url: String,

    #[serde(default = "default_insurance_delay_seconds")]
    pub insurance_delay_seconds: u64,
    #[serde(default = "default_lock_ttl_seconds")]
    pub lock_ttl_seconds: u64,
    #[serde(default = "default_completed_marker_ttl_seconds")]
    pub completed_marker_ttl_seconds: u64,
    #[serde(default = "default_fastpath_record_ttl_seconds")]
    pub fastpath_record_ttl_seconds: u64,
    #[serde(default = "default_staleness_threshold_seconds")]
    pub staleness_threshold_seconds: u64,
    #[serde(default = "default_sweep_schedule")]
    pub sweep_schedule: String,
    #[serde(default = "default_sender_timeout_seconds")]
    pub sender_timeout_seconds: u64,
    #[serde(default = "default_escalation_delay_seconds")]
    pub escalation_delay_seconds: u64,

    #[serde(default = "default_worker_concurrency")]
    pub worker_concurrency: usize,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_email_retry_limit")]
    pub email_retry_limit: u32,
    #[serde(default = "default_push_retry_limit")]
    pub push_retry_limit: u32,
    #[serde(default = "default_sms_retry_limit")]
    pub sms_retry_limit: u32,
    #[serde(default = "default_job_retry_delay_ms")]
    pub job_retry_delay_ms: u64,
    #[serde(default = "default_metrics_retention_days")]
    pub metrics_retention_days: u64,

    #[serde(default = "default_max_retry_attempts")]
    pub max_retry_attempts: u32,
    #[serde(default = "default_initial_retry_delay_ms")]
    pub initial_retry_delay_ms: u64,
    #[serde(default = "default_max_retry_delay_ms")]
    pub max_retry_delay_ms: u64,
    #[serde(default = "default_retry_backoff_multiplier")]
    pub retry_backoff_multiplier: u64,

    #[serde(default = "default_server_port")]
    pub server_port: u16,
}

impl Config {
    pub fn load() -> Result<Self, Error> {
        dotenv().ok();

        let config = envy::from_env::<Self>()
            .map_err(|e| anyhow!("Invalid or missing environment variable: {}", e))?;
        Ok(config)
    }

    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.max_retry_attempts,
            initial_delay_ms: self.initial_retry_delay_ms,
            max_delay_ms: self.max_retry_delay_ms,
            backoff_multiplier: self.retry_backoff_multiplier,
        }
    }

    pub fn queue_config(&self) -> QueueConfig {
        QueueConfig {
            insurance_delay: Duration::from_secs(self.insurance_delay_seconds),
            lock_ttl: Duration::from_secs(self.lock_ttl_seconds),
            completed_ttl: Duration::from_secs(self.completed_marker_ttl_seconds),
            fastpath_record_ttl: Duration::from_secs(self.fastpath_record_ttl_seconds),
            staleness_threshold: Duration::from_secs(self.staleness_threshold_seconds),
            sender_timeout: Duration::from_secs(self.sender_timeout_seconds),
            escalation_delay: Duration::from_secs(self.escalation_delay_seconds),
            worker_concurrency: self.worker_concurrency,
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            email_retry_limit: self.email_retry_limit,
            push_retry_limit: self.push_retry_limit,
            sms_retry_limit: self.sms_retry_limit,
            retry_delay: Duration::from_millis(self.job_retry_delay_ms),
            metrics_retention: Duration::from_secs(self.metrics_retention_days * 24 * 60 * 60),
        }
    }
}

/// Tunables of the hybrid queue itself, independent of where the
/// backing stores live.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub insurance_delay: Duration,
    pub lock_ttl: Duration,
    pub completed_ttl: Duration,
    pub fastpath_record_ttl: Duration,
    pub staleness_threshold: Duration,
    pub sender_timeout: Duration,
    pub escalation_delay: Duration,
    pub worker_concurrency: usize,
    pub poll_interval: Duration,
    pub email_retry_limit: u32,
    pub push_retry_limit: u32,
    pub sms_retry_limit: u32,
    pub retry_delay: Duration,
    pub metrics_retention: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            insurance_delay: Duration::from_secs(default_insurance_delay_seconds()),
            lock_ttl: Duration::from_secs(default_lock_ttl_seconds()),
            completed_ttl: Duration::from_secs(default_completed_marker_ttl_seconds()),
            fastpath_record_ttl: Duration::from_secs(default_fastpath_record_ttl_seconds()),
            staleness_threshold: Duration::from_secs(default_staleness_threshold_seconds()),
            sender_timeout: Duration::from_secs(default_sender_timeout_seconds()),
            escalation_delay: Duration::from_secs(default_escalation_delay_seconds()),
            worker_concurrency: default_worker_concurrency(),
            poll_interval: Duration::from_millis(default_poll_interval_ms()),
            email_retry_limit: default_email_retry_limit(),
            push_retry_limit: default_push_retry_limit(),
            sms_retry_limit: default_sms_retry_limit(),
            retry_delay: Duration::from_millis(default_job_retry_delay_ms()),
            metrics_retention: Duration::from_secs(
                default_metrics_retention_days() * 24 * 60 * 60,
            ),
        }
    }
}

fn default_insurance_delay_seconds() -> u64 {
    60
}

fn default_lock_ttl_seconds() -> u64 {
    30
}

fn default_completed_marker_ttl_seconds() -> u64 {
    3600
}

fn default_fastpath_record_ttl_seconds() -> u64 {
    24 * 60 * 60
}

fn default_staleness_threshold_seconds() -> u64 {
    120
}

fn default_sweep_schedule() -> String {
    "*/30 * * * * *".to_string()
}

fn default_sender_timeout_seconds() -> u64 {
    10
}

fn default_escalation_delay_seconds() -> u64 {
    300
}

fn default_worker_concurrency() -> usize {
    3
}

fn default_poll_interval_ms() -> u64 {
    500
}

fn default_email_retry_limit() -> u32 {
    5
}

fn default_push_retry_limit() -> u32 {
    2
}

fn default_sms_retry_limit() -> u32 {
    3
}

fn default_job_retry_delay_ms() -> u64 {
    1000
}

fn default_metrics_retention_days() -> u64 {
    7
}

fn default_max_retry_attempts() -> u32 {
    3
}

fn default_initial_retry_delay_ms() -> u64 {
    100
}

fn default_max_retry_delay_ms() -> u64 {
    2000
}

fn default_retry_backoff_multiplier() -> u64 {
    2
}

fn default_server_port() -> u16 {
    8080
}
