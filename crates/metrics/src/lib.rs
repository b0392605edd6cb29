//! Diagnostics and metrics export for the E2EE pipeline. Keeps the host
//! system sampler and CSV export pattern, re-pointed at handshake/rotation
//! timing, per-kind frame stats, and chat cryptor stats instead of
//! stream/power telemetry.

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use chat::ChatStats;
use chrono::{DateTime, Utc};
use csv::Writer;
use pipeline::FrameStatsSnapshot;
use serde::{Deserialize, Serialize};
use sysinfo::System;
use tokio::sync::RwLock;
use tokio::time::{interval, Duration};

/// One completed handshake or rotation round-trip.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeMetrics {
    pub ts_start: DateTime<Utc>,
    pub ts_end: DateTime<Utc>,
    pub mechanism: String,
    pub role: String,
    pub generation: u64,
    pub success: bool,
}

/// A point-in-time read of one media kind's [`FrameStatsSnapshot`],
/// flattened for CSV export.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameMetricsSample {
    pub ts: DateTime<Utc>,
    pub media_kind: String,
    pub direction: String,
    pub total_frames: u64,
    pub processed_frames: u64,
    pub crypto_errors: u64,
    pub dropped_frames: u64,
    pub average_latency_ms: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMetricsSample {
    pub ts: DateTime<Utc>,
    pub messages_encrypted: u64,
    pub messages_decrypted: u64,
    pub verification_failures: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemSample {
    pub ts: DateTime<Utc>,
    pub cpu_pct: f32,
    pub mem_mb: f64,
}

pub struct MetricsCollector {
    system: Arc<RwLock<System>>,
    node_id: String,
    system_samples: Arc<RwLock<Vec<SystemSample>>>,
    exchange_metrics: Arc<RwLock<Vec<ExchangeMetrics>>>,
    frame_metrics: Arc<RwLock<Vec<FrameMetricsSample>>>,
    chat_metrics: Arc<RwLock<Vec<ChatMetricsSample>>>,
}

impl MetricsCollector {
    pub fn new(node_id: String) -> Self {
        Self {
            system: Arc::new(RwLock::new(System::new_all())),
            node_id,
            system_samples: Arc::new(RwLock::new(Vec::new())),
            exchange_metrics: Arc::new(RwLock::new(Vec::new())),
            frame_metrics: Arc::new(RwLock::new(Vec::new())),
            chat_metrics: Arc::new(RwLock::new(Vec::new())),
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Samples host CPU/memory every 250ms in the background.
    pub fn start_collection(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(Duration::from_millis(250));
            loop {
                ticker.tick().await;

                let mut sys = self.system.write().await;
                sys.refresh_cpu();
                sys.refresh_memory();

                let cpu_pct: f32 = sys.cpus().iter().map(|c| c.cpu_usage()).sum::<f32>() / sys.cpus().len() as f32;
                let mem_mb = sys.used_memory() as f64 / (1024.0 * 1024.0);
                drop(sys);

                self.system_samples.write().await.push(SystemSample {
                    ts: Utc::now(),
                    cpu_pct,
                    mem_mb,
                });
            }
        })
    }

    pub async fn record_exchange(&self, metrics: ExchangeMetrics) {
        self.exchange_metrics.write().await.push(metrics);
    }

    pub async fn record_frame_snapshot(&self, media_kind: &str, direction: &str, snapshot: &FrameStatsSnapshot) {
        self.frame_metrics.write().await.push(FrameMetricsSample {
            ts: Utc::now(),
            media_kind: media_kind.to_string(),
            direction: direction.to_string(),
            total_frames: snapshot.total_frames,
            processed_frames: snapshot.processed_frames,
            crypto_errors: snapshot.crypto_errors,
            dropped_frames: snapshot.dropped_frames,
            average_latency_ms: snapshot.average_latency_ms,
        });
    }

    pub async fn record_chat_snapshot(&self, stats: ChatStats) {
        self.chat_metrics.write().await.push(ChatMetricsSample {
            ts: Utc::now(),
            messages_encrypted: stats.messages_encrypted,
            messages_decrypted: stats.messages_decrypted,
            verification_failures: stats.verification_failures,
        });
    }

    /// Writes a caller-supplied batch of handshake/rotation metrics to CSV —
    /// a static method since benches collect these outside a collector.
    pub fn write_exchange_csv<P: AsRef<Path>>(metrics: &[ExchangeMetrics], path: P) -> Result<()> {
        let mut writer = Writer::from_path(path)?;
        for m in metrics {
            writer.serialize(m)?;
        }
        writer.flush()?;
        Ok(())
    }

    pub async fn write_frame_csv<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let samples = self.frame_metrics.read().await;
        let mut writer = Writer::from_path(path)?;
        for s in samples.iter() {
            writer.serialize(s)?;
        }
        writer.flush()?;
        Ok(())
    }

    pub async fn write_chat_csv<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let samples = self.chat_metrics.read().await;
        let mut writer = Writer::from_path(path)?;
        for s in samples.iter() {
            writer.serialize(s)?;
        }
        writer.flush()?;
        Ok(())
    }

    pub async fn write_system_csv<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let samples = self.system_samples.read().await;
        let mut writer = Writer::from_path(path)?;
        for s in samples.iter() {
            writer.serialize(s)?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Mean/p50/p95 of every recorded frame sample's moving-average
    /// latency.
    pub async fn get_latency_stats(&self) -> (f64, f64, f64) {
        let samples = self.frame_metrics.read().await;
        if samples.is_empty() {
            return (0.0, 0.0, 0.0);
        }

        let mut latencies: Vec<f64> = samples.iter().map(|m| m.average_latency_ms).collect();
        latencies.sort_by(|a, b| a.partial_cmp(b).unwrap());

        let mean = latencies.iter().sum::<f64>() / latencies.len() as f64;
        let p50 = latencies[latencies.len() / 2];
        let p95 = latencies[(latencies.len() * 95) / 100];

        (mean, p50, p95)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn recording_exchange_metrics_appends_to_the_buffer() {
        let collector = MetricsCollector::new("node-a".to_string());
        let start = Utc::now();
        collector
            .record_exchange(ExchangeMetrics {
                ts_start: start,
                ts_end: start,
                mechanism: "ecdh-p256+ecdsa-p256".to_string(),
                role: "initiator".to_string(),
                generation: 0,
                success: true,
            })
            .await;
        assert_eq!(collector.exchange_metrics.read().await.len(), 1);
    }

    #[tokio::test]
    async fn latency_stats_are_empty_with_no_samples() {
        let collector = MetricsCollector::new("node-a".to_string());
        assert_eq!(collector.get_latency_stats().await, (0.0, 0.0, 0.0));
    }

    #[tokio::test]
    async fn latency_percentiles_are_computed_from_recorded_samples() {
        let collector = MetricsCollector::new("node-a".to_string());
        let snapshot = FrameStatsSnapshot {
            total_frames: 10,
            processed_frames: 10,
            crypto_errors: 0,
            dropped_frames: 0,
            average_latency_ms: 2.0,
            last_key_rotation: None,
        };
        collector.record_frame_snapshot("video", "encrypt", &snapshot).await;
        let (mean, p50, _p95) = collector.get_latency_stats().await;
        assert_eq!(mean, 2.0);
        assert_eq!(p50, 2.0);
    }
}
