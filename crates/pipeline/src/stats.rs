use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

/// Per-direction counters. Counters are lock-free; the moving
/// average latency and `last_key_rotation` timestamp sit behind a small
/// `RwLock` since they're read far less often than frames are counted.
pub struct FrameStats {
    total_frames: AtomicU64,
    processed_frames: AtomicU64,
    crypto_errors: AtomicU64,
    dropped_frames: AtomicU64,
    latency: RwLock<LatencyState>,
}

struct LatencyState {
    moving_average_ms: f64,
    last_key_rotation: Option<DateTime<Utc>>,
}

/// Exponential moving average smoothing factor; favours recent frames
/// without needing to retain a latency history.
const EMA_ALPHA: f64 = 0.2;

impl FrameStats {
    pub fn new() -> Self {
        Self {
            total_frames: AtomicU64::new(0),
            processed_frames: AtomicU64::new(0),
            crypto_errors: AtomicU64::new(0),
            dropped_frames: AtomicU64::new(0),
            latency: RwLock::new(LatencyState {
                moving_average_ms: 0.0,
                last_key_rotation: None,
            }),
        }
    }

    pub async fn record_processed(&self, latency_ms: f64) {
        self.total_frames.fetch_add(1, Ordering::Relaxed);
        self.processed_frames.fetch_add(1, Ordering::Relaxed);
        let mut latency = self.latency.write().await;
        latency.moving_average_ms = if latency.moving_average_ms == 0.0 {
            latency_ms
        } else {
            EMA_ALPHA * latency_ms + (1.0 - EMA_ALPHA) * latency.moving_average_ms
        };
    }

    pub fn record_crypto_error(&self) {
        self.total_frames.fetch_add(1, Ordering::Relaxed);
        self.crypto_errors.fetch_add(1, Ordering::Relaxed);
        self.dropped_frames.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped(&self) {
        self.total_frames.fetch_add(1, Ordering::Relaxed);
        self.dropped_frames.fetch_add(1, Ordering::Relaxed);
    }

    pub async fn note_key_rotation(&self) {
        self.latency.write().await.last_key_rotation = Some(Utc::now());
    }

    pub async fn snapshot(&self) -> FrameStatsSnapshot {
        let latency = self.latency.read().await;
        FrameStatsSnapshot {
            total_frames: self.total_frames.load(Ordering::Relaxed),
            processed_frames: self.processed_frames.load(Ordering::Relaxed),
            crypto_errors: self.crypto_errors.load(Ordering::Relaxed),
            dropped_frames: self.dropped_frames.load(Ordering::Relaxed),
            average_latency_ms: latency.moving_average_ms,
            last_key_rotation: latency.last_key_rotation,
        }
    }
}

impl Default for FrameStats {
    fn default() -> Self {
        Self::new()
    }
}

/// An immutable point-in-time read of [`FrameStats`], suitable for handing
/// to the session controller on the `STATS_UPDATE_INTERVAL` tick.
#[derive(Debug, Clone)]
pub struct FrameStatsSnapshot {
    pub total_frames: u64,
    pub processed_frames: u64,
    pub crypto_errors: u64,
    pub dropped_frames: u64,
    pub average_latency_ms: f64,
    pub last_key_rotation: Option<DateTime<Utc>>,
}
