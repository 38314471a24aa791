//! Per-launch statistics accumulation and publishing (§6 "Stats sink",
//! §10.5 "Launch-level stats accumulation").
//!
//! The message-bus stats sink's transport is out of scope as infrastructure
//! (§2); this module fixes the JSON envelope shape from §6 and a
//! [`StatsSink`] trait with a real `lapin`-based AMQP adapter plus a no-op
//! for when no broker is configured.
use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use chrono::Local;
use lapin::options::{BasicPublishOptions, ConfirmSelectOptions};
use lapin::{BasicProperties, Connection, ConnectionProperties};
use serde::{Deserialize, Serialize};
use tracing::instrument;
use uuid::Uuid;

use crate::error::{AnalyzerError, Result};

/// One captured per-test-item processing failure (§7 "per-test-item
/// processing error").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub test_item: Uuid,
    pub message: String,
}

/// Accumulated per-launch counters, published to the stats sink at the end
/// of `analyze_logs` (§4.5, §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LaunchStats {
    pub launch_id: Uuid,
    pub number_of_log_lines: i64,
    pub processed: u32,
    pub not_found: u32,
    pub model_info: HashSet<String>,
    pub processed_time_ms: u64,
    pub gather_date: String,
    pub gather_datetime: String,
    pub errors: Vec<ErrorRecord>,
    pub errors_count: u32,
}

impl LaunchStats {
    pub fn new(launch_id: Uuid, number_of_log_lines: i64) -> Self {
        let now = Local::now();
        Self {
            launch_id,
            number_of_log_lines,
            processed: 0,
            not_found: 0,
            model_info: HashSet::new(),
            processed_time_ms: 0,
            gather_date: now.format("%Y-%m-%d").to_string(),
            gather_datetime: now.format("%Y-%m-%d %H:%M:%S").to_string(),
            errors: Vec::new(),
            errors_count: 0,
        }
    }

    pub fn record_error(&mut self, test_item: Uuid, message: impl Into<String>) {
        self.errors.push(ErrorRecord {
            test_item,
            message: message.into(),
        });
        self.errors_count += 1;
    }

    pub fn set_processed_time(&mut self, elapsed: Duration) {
        self.processed_time_ms = elapsed.as_millis() as u64;
    }
}

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Publishes the `{launchId → statsRecord}` envelope (§6). Infrastructure
/// boundary, so production code talks through this trait rather than a
/// concrete `lapin::Channel`.
pub trait StatsSink: Send + Sync {
    fn publish<'a>(&'a self, stats: &'a std::collections::HashMap<Uuid, LaunchStats>) -> BoxFuture<'a, Result<()>>;
}

/// Drops stats on the floor; used when `EngineConfig::amqp_url` is unset.
#[derive(Debug, Default)]
pub struct NoopStatsSink;

impl StatsSink for NoopStatsSink {
    fn publish<'a>(&'a self, _stats: &'a std::collections::HashMap<Uuid, LaunchStats>) -> BoxFuture<'a, Result<()>> {
        Box::pin(async { Ok(()) })
    }
}

/// Publishes the envelope to `exchange_name` with routing key `stats_info`
/// over AMQP (§6).
pub struct AmqpStatsSink {
    amqp_url: String,
    exchange_name: String,
}

impl AmqpStatsSink {
    pub fn new(amqp_url: impl Into<String>, exchange_name: impl Into<String>) -> Self {
        Self {
            amqp_url: amqp_url.into(),
            exchange_name: exchange_name.into(),
        }
    }
}

impl StatsSink for AmqpStatsSink {
    #[instrument(skip(self, stats), fields(exchange = %self.exchange_name, launches = stats.len()))]
    fn publish<'a>(&'a self, stats: &'a std::collections::HashMap<Uuid, LaunchStats>) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let payload = serde_json::to_vec(stats)?;

            let connection = Connection::connect(&self.amqp_url, ConnectionProperties::default())
                .await
                .map_err(|e| AnalyzerError::Transport(e.to_string()))?;
            let channel = connection
                .create_channel()
                .await
                .map_err(|e| AnalyzerError::Transport(e.to_string()))?;
            channel
                .confirm_select(ConfirmSelectOptions::default())
                .await
                .map_err(|e| AnalyzerError::Transport(e.to_string()))?;

            channel
                .basic_publish(
                    &self.exchange_name,
                    "stats_info",
                    BasicPublishOptions::default(),
                    &payload,
                    BasicProperties::default().with_content_type("application/json".into()),
                )
                .await
                .map_err(|e| AnalyzerError::Transport(e.to_string()))?
                .await
                .map_err(|e| AnalyzerError::Transport(e.to_string()))?;

            tracing::debug!("published launch stats");
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_stats_start_at_zero() {
        let stats = LaunchStats::new(Uuid::new_v4(), -1);
        assert_eq!(stats.processed, 0);
        assert_eq!(stats.errors_count, 0);
    }

    #[test]
    fn record_error_increments_count() {
        let mut stats = LaunchStats::new(Uuid::new_v4(), -1);
        stats.record_error(Uuid::new_v4(), "boom");
        assert_eq!(stats.errors_count, 1);
        assert_eq!(stats.errors.len(), 1);
    }

    #[tokio::test]
    async fn noop_sink_always_succeeds() {
        let sink = NoopStatsSink;
        let stats = std::collections::HashMap::new();
        assert!(sink.publish(&stats).await.is_ok());
    }
}
