use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crypto::KeyMaterial;
use tokio::sync::RwLock;
use tokio::time::sleep;

use crate::error::{PipelineError, Result};
use crate::stats::FrameStatsSnapshot;
use crate::transport::{FrameTransport, MediaKind, PlatformVariant};
use crate::worker::{Direction, FrameWorker};

/// Bridges the frame codec to the host's frame-transport hook. Owns
/// one encrypt worker per outgoing `MediaKind` and one decrypt worker per
/// incoming `MediaKind` — separated for parallelism and key isolation, not
/// security.
pub struct FramePipelineAdapter {
    transport: Arc<dyn FrameTransport>,
    encrypt_workers: RwLock<HashMap<MediaKind, Arc<FrameWorker>>>,
    decrypt_workers: RwLock<HashMap<MediaKind, Arc<FrameWorker>>>,
}

impl FramePipelineAdapter {
    pub fn new(transport: Arc<dyn FrameTransport>) -> Self {
        Self {
            transport,
            encrypt_workers: RwLock::new(HashMap::new()),
            decrypt_workers: RwLock::new(HashMap::new()),
        }
    }

    pub fn platform_variant(&self) -> Option<PlatformVariant> {
        self.transport.platform_variant()
    }

    /// Installs an encryption transform for an outgoing track. Returns the
    /// worker handle the caller's frame hook invokes per frame.
    pub async fn attach_sender(&self, kind: MediaKind) -> Result<Arc<FrameWorker>> {
        if self.transport.platform_variant().is_none() {
            return Err(PipelineError::UnsupportedPlatform);
        }
        let worker = FrameWorker::new(Direction::Encrypt);
        self.encrypt_workers.write().await.insert(kind, Arc::clone(&worker));
        Ok(worker)
    }

    /// Installs a decryption transform for an incoming track. For
    /// the chain-of-transforms model the caller must do this in the
    /// track-arrival callback, before publishing the stream — that
    /// ordering is the caller's responsibility, not this adapter's.
    pub async fn attach_receiver(&self, kind: MediaKind) -> Result<Arc<FrameWorker>> {
        if self.transport.platform_variant().is_none() {
            return Err(PipelineError::UnsupportedPlatform);
        }
        let worker = FrameWorker::new(Direction::Decrypt);
        self.decrypt_workers.write().await.insert(kind, Arc::clone(&worker));
        Ok(worker)
    }

    /// Pushes `key_material` to every attached worker. The caller awaits
    /// this before calling `enable_encryption()` — key install is
    /// barriered against frames flowing with the old key.
    pub async fn update_key(&self, key_material: &KeyMaterial) {
        for worker in self.encrypt_workers.read().await.values() {
            worker.install_key(key_material.clone()).await;
        }
        for worker in self.decrypt_workers.read().await.values() {
            worker.install_key(key_material.clone()).await;
        }
    }

    pub async fn enable_encryption(&self) {
        for worker in self.encrypt_workers.read().await.values() {
            worker.set_enabled(true);
        }
    }

    pub async fn disable_encryption(&self) {
        for worker in self.encrypt_workers.read().await.values() {
            worker.set_enabled(false);
        }
    }

    /// Applies newly derived key material using whichever install ordering
    /// the host platform requires. Transforms are assumed already attached
    /// in pass-through mode before this is called.
    pub async fn apply_new_key(&self, key_material: KeyMaterial, sync_delay: Duration) {
        match self.transport.platform_variant() {
            Some(PlatformVariant::ChainOfTransforms) | None => {
                self.update_key(&key_material).await;
                sleep(sync_delay).await;
                self.enable_encryption().await;
            }
            Some(PlatformVariant::ScriptTransform) => {
                self.update_key(&key_material).await;
                self.enable_encryption().await;
            }
        }
    }

    /// Snapshot of every attached worker's stats, keyed by kind — flushed
    /// by the session controller on `STATS_UPDATE_INTERVAL`.
    pub async fn stats(&self) -> PipelineStats {
        let mut senders = HashMap::new();
        for (kind, worker) in self.encrypt_workers.read().await.iter() {
            senders.insert(*kind, worker.stats().await);
        }
        let mut receivers = HashMap::new();
        for (kind, worker) in self.decrypt_workers.read().await.iter() {
            receivers.insert(*kind, worker.stats().await);
        }
        PipelineStats { senders, receivers }
    }

    /// Drains in-flight frames to pass-through and drops every worker
    /// handle, as part of an orderly session tear-down.
    pub async fn teardown(&self) {
        self.disable_encryption().await;
        self.encrypt_workers.write().await.clear();
        self.decrypt_workers.write().await.clear();
    }
}

#[derive(Debug, Clone)]
pub struct PipelineStats {
    pub senders: HashMap<MediaKind, FrameStatsSnapshot>,
    pub receivers: HashMap<MediaKind, FrameStatsSnapshot>,
}
