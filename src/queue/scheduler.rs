use std::sync::Arc;
use std::time::Duration;

use anyhow::{Error, Result, anyhow};
use chrono::{DateTime, Utc};
use croner::Cron;
use serde_json::Value as JsonValue;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::models::job::NewJob;
use crate::queue::store::JobStore;

struct Schedule {
    name: String,
    queue: String,
    cron: Cron,
    payload: JsonValue,
    priority: i32,
}

/// Wall-clock cron scheduler over the durable store. Every tick is an
/// enqueue with singleton key `schedule:<name>`, so a tick that lands
/// while the previous run is still pending or active is suppressed by
/// the store rather than piling up.
pub struct Scheduler<S> {
    store: Arc<S>,
    schedules: Vec<Schedule>,
}

impl<S: JobStore> Scheduler<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            schedules: Vec::new(),
        }
    }

    /// Expressions are evaluated in UTC; a seconds field is accepted.
    pub fn add(
        &mut self,
        name: &str,
        queue: &str,
        expression: &str,
        payload: JsonValue,
        priority: i32,
    ) -> Result<(), Error> {
        let cron = Cron::new(expression)
            .with_seconds_optional()
            .parse()
            .map_err(|e| anyhow!("Invalid cron expression {}: {}", expression, e))?;

        self.schedules.push(Schedule {
            name: name.to_string(),
            queue: queue.to_string(),
            cron,
            payload,
            priority,
        });
        Ok(())
    }

    pub async fn run(self) {
        if self.schedules.is_empty() {
            return;
        }

        loop {
            let now = Utc::now();
            let mut upcoming: Vec<(DateTime<Utc>, &Schedule)> = Vec::new();

            for schedule in &self.schedules {
                match schedule.cron.find_next_occurrence(&now, false) {
                    Ok(at) => upcoming.push((at, schedule)),
                    Err(e) => {
                        warn!(schedule = %schedule.name, error = %e, "Schedule has no next occurrence");
                    }
                }
            }

            let Some(earliest) = upcoming.iter().map(|(at, _)| *at).min() else {
                warn!("No runnable schedules remain, scheduler stopping");
                return;
            };

            let wait = (earliest - Utc::now()).to_std().unwrap_or(Duration::ZERO);
            sleep(wait).await;

            for (at, schedule) in upcoming {
                if at == earliest {
                    self.tick(schedule).await;
                }
            }
        }
    }

    async fn tick(&self, schedule: &Schedule) {
        let job = NewJob::new(schedule.payload.clone())
            .with_priority(schedule.priority)
            .with_singleton_key(format!("schedule:{}", schedule.name));

        match self.store.enqueue(&schedule.queue, job).await {
            Ok(Some(job_id)) => {
                debug!(schedule = %schedule.name, job_id = %job_id, "Scheduled job enqueued");
            }
            Ok(None) => {
                debug!(schedule = %schedule.name, "Previous run still in flight, tick skipped");
            }
            Err(e) => {
                warn!(schedule = %schedule.name, error = %e, "Failed to enqueue scheduled job");
            }
        }
    }
}
