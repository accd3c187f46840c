use std::collections::HashMap;
use std::time::Duration;

use anyhow::{Error, Result, anyhow};
use async_trait::async_trait;
use futures_util::StreamExt;
use redis::{AsyncCommands, Client, aio::MultiplexedConnection};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::config::Config;
use crate::models::retry::RetryConfig;
use crate::queue::store::{Broadcast, KvStore};
use crate::utils::retry_with_backoff;

pub struct RedisClient {
    client: Client,
    connection: MultiplexedConnection,
    retry_config: RetryConfig,
}

impl RedisClient {
    pub async fn connect(config: &Config) -> Result<Self, Error> {
        info!("Connecting to Redis");

        let client = Client::open(config.redis_url.as_str())
            .map_err(|e| anyhow!("Failed to create redis client: {}", e))?;

        let connection = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| anyhow!("Failed to connect to redis: {}", e))?;

        info!("Redis connection established");

        Ok(Self {
            client,
            connection,
            retry_config: config.retry_config(),
        })
    }

    fn ttl_seconds(ttl: Duration) -> u64 {
        ttl.as_secs().max(1)
    }
}

#[async_trait]
impl KvStore for RedisClient {
    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, Error> {
        let mut conn = self.connection.clone();

        let outcome: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("EX")
            .arg(Self::ttl_seconds(ttl))
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow!("Failed to set key {}: {}", key, e))?;

        Ok(outcome.is_some())
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), Error> {
        // Retried: losing a completion marker reopens the dedup window.
        retry_with_backoff(&self.retry_config, || {
            let mut conn = self.connection.clone();
            let key = key.to_string();
            let value = value.to_string();
            let seconds = Self::ttl_seconds(ttl);

            async move {
                conn.set_ex::<_, _, ()>(&key, &value, seconds)
                    .await
                    .map_err(|e| e.to_string())
            }
        })
        .await
        .map_err(|e| anyhow!("Failed to set key {}: {}", key, e))?;

        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, Error> {
        let mut conn = self.connection.clone();
        let value: Option<String> = conn
            .get(key)
            .await
            .map_err(|e| anyhow!("Failed to get key {}: {}", key, e))?;
        Ok(value)
    }

    async fn del(&self, key: &str) -> Result<(), Error> {
        let mut conn = self.connection.clone();
        conn.del::<_, ()>(key)
            .await
            .map_err(|e| anyhow!("Failed to delete key {}: {}", key, e))?;
        Ok(())
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, String)>, Error> {
        let mut conn = self.connection.clone();
        let pattern = format!("{}*", prefix);
        let mut keys = Vec::new();
        let mut cursor: u64 = 0;

        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(100)
                .query_async(&mut conn)
                .await
                .map_err(|e| anyhow!("Failed to scan prefix {}: {}", prefix, e))?;

            keys.extend(batch);
            cursor = next;
            if cursor == 0 {
                break;
            }
        }

        let mut entries = Vec::with_capacity(keys.len());
        for key in keys {
            let value: Option<String> = conn
                .get(&key)
                .await
                .map_err(|e| anyhow!("Failed to get key {}: {}", key, e))?;
            // Keys can expire between the scan and the read
            if let Some(value) = value {
                entries.push((key, value));
            }
        }

        Ok(entries)
    }

    async fn hash_incr(
        &self,
        key: &str,
        field: &str,
        by: i64,
        ttl: Duration,
    ) -> Result<i64, Error> {
        let mut conn = self.connection.clone();

        let count: i64 = conn
            .hincr(key, field, by)
            .await
            .map_err(|e| anyhow!("Failed to increment {}:{}: {}", key, field, e))?;

        conn.expire::<_, ()>(key, Self::ttl_seconds(ttl) as i64)
            .await
            .map_err(|e| anyhow!("Failed to set expiry on {}: {}", key, e))?;

        Ok(count)
    }

    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, i64>, Error> {
        let mut conn = self.connection.clone();
        let fields: HashMap<String, i64> = conn
            .hgetall(key)
            .await
            .map_err(|e| anyhow!("Failed to read hash {}: {}", key, e))?;
        Ok(fields)
    }
}

#[async_trait]
impl Broadcast for RedisClient {
    async fn publish(&self, channel: &str, payload: &str) -> Result<(), Error> {
        let mut conn = self.connection.clone();
        conn.publish::<_, _, ()>(channel, payload)
            .await
            .map_err(|e| anyhow!("Failed to publish to {}: {}", channel, e))?;
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<mpsc::UnboundedReceiver<String>, Error> {
        let mut pubsub = self
            .client
            .get_async_pubsub()
            .await
            .map_err(|e| anyhow!("Failed to open pubsub connection: {}", e))?;

        pubsub
            .subscribe(channel)
            .await
            .map_err(|e| anyhow!("Failed to subscribe to {}: {}", channel, e))?;

        let channel = channel.to_string();
        let (tx, rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            let mut stream = pubsub.into_on_message();

            while let Some(message) = stream.next().await {
                let payload: String = match message.get_payload() {
                    Ok(payload) => payload,
                    Err(e) => {
                        warn!(channel = %channel, error = %e, "Discarding undecodable pubsub message");
                        continue;
                    }
                };

                if tx.send(payload).is_err() {
                    break;
                }
            }

            info!(channel = %channel, "Pubsub subscription closed");
        });

        Ok(rx)
    }
}
