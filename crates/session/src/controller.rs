//! The glue between the key-exchange state machine, the frame pipeline
//! adapter, and the chat cryptor. Owns the one session-long signing key
//! and hands an `Arc` of it to both consumers, and drives the
//! activation/tear-down sequences.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chat::{ChatCryptor, ChatEnvelope, DecryptedMessage};
use crypto::{KeyMaterial, SigningKeyPair};
use exchange::{ExchangeEvent, KeyExchangeManager, Role, SignallingTransport};
use pipeline::{FramePipelineAdapter, FrameTransport, PipelineStats};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep};
use tracing::{debug, info, warn};

use crate::config::SessionConfig;
use crate::error::{Result, SessionError};
use crate::status::SessionStatus;

struct PeerIdentity {
    signing_public_key: Vec<u8>,
    fingerprint: String,
}

#[derive(Default)]
struct Tasks {
    event_drain: Option<JoinHandle<()>>,
    stats_timer: Option<JoinHandle<()>>,
}

pub struct SessionController {
    room_id: String,
    peer_id: String,
    transport: Arc<dyn SignallingTransport>,
    config: SessionConfig,
    signing: Arc<SigningKeyPair>,
    exchange: Arc<KeyExchangeManager>,
    pipeline: Arc<FramePipelineAdapter>,
    chat: RwLock<Option<ChatCryptor>>,
    peer: RwLock<Option<PeerIdentity>>,
    status: RwLock<SessionStatus>,
    latest_stats: RwLock<Option<PipelineStats>>,
    generation: AtomicU64,
    tasks: Mutex<Tasks>,
}

impl SessionController {
    pub fn new(
        role: Role,
        room_id: impl Into<String>,
        peer_id: impl Into<String>,
        signalling_transport: Arc<dyn SignallingTransport>,
        frame_transport: Arc<dyn FrameTransport>,
        config: SessionConfig,
    ) -> Arc<Self> {
        let room_id = room_id.into();
        let peer_id = peer_id.into();
        let signing = Arc::new(SigningKeyPair::generate());
        let pipeline = Arc::new(FramePipelineAdapter::new(frame_transport));
        let initial_status = if pipeline.platform_variant().is_none() {
            SessionStatus::Unsupported
        } else {
            SessionStatus::Disabled
        };

        let (exchange, mut event_rx) = KeyExchangeManager::new(
            role,
            room_id.clone(),
            peer_id.clone(),
            Arc::clone(&signalling_transport),
            Arc::clone(&signing),
            config.exchange.clone(),
        );

        let controller = Arc::new(Self {
            room_id,
            peer_id,
            transport: signalling_transport,
            config,
            signing,
            exchange,
            pipeline,
            chat: RwLock::new(None),
            peer: RwLock::new(None),
            status: RwLock::new(initial_status),
            latest_stats: RwLock::new(None),
            generation: AtomicU64::new(0),
            tasks: Mutex::new(Tasks::default()),
        });

        let drain_controller = Arc::clone(&controller);
        let drain_task = tokio::spawn(async move {
            while let Some(event) = event_rx.recv().await {
                drain_controller.handle_exchange_event(event).await;
            }
        });
        controller
            .tasks
            .try_lock()
            .expect("no other task touches session tasks during construction")
            .event_drain = Some(drain_task);

        controller
    }

    pub fn pipeline(&self) -> &Arc<FramePipelineAdapter> {
        &self.pipeline
    }

    pub async fn status(&self) -> SessionStatus {
        self.status.read().await.clone()
    }

    pub fn local_fingerprint(&self) -> String {
        self.signing.fingerprint()
    }

    pub async fn remote_fingerprint(&self) -> Option<String> {
        self.peer.read().await.as_ref().map(|p| p.fingerprint.clone())
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    pub async fn stats(&self) -> Option<PipelineStats> {
        self.latest_stats.read().await.clone()
    }

    /// Starts the handshake and the periodic stats-reporting timer.
    /// Idempotent per call site's lifecycle, but
    /// calling it twice on the same controller is not supported.
    pub async fn start(self: &Arc<Self>) {
        if matches!(*self.status.read().await, SessionStatus::Unsupported) {
            warn!("starting session on an unsupported platform variant; frames will pass through");
        }
        *self.status.write().await = SessionStatus::Initializing;
        sleep(self.config.e2ee_init_delay).await;

        *self.status.write().await = SessionStatus::KeyExchange;
        self.exchange.initialize().await;

        let stats_controller = Arc::clone(self);
        let stats_interval = self.config.stats_update_interval;
        let stats_task = tokio::spawn(async move {
            let mut ticker = interval(stats_interval);
            loop {
                ticker.tick().await;
                let snapshot = stats_controller.pipeline.stats().await;
                *stats_controller.latest_stats.write().await = Some(snapshot);
            }
        });
        self.tasks.lock().await.stats_timer = Some(stats_task);
    }

    pub async fn on_user_joined(self: &Arc<Self>) {
        self.exchange.on_user_joined().await;
    }

    /// Diagnostic passthrough — only the initiator may trigger an
    /// out-of-band rotation.
    pub async fn rotate_keys(self: &Arc<Self>) -> Result<()> {
        self.exchange.rotate_keys().await.map_err(Into::into)
    }

    pub async fn handle_key_offer(self: &Arc<Self>, json: &str) -> Result<()> {
        self.exchange.handle_key_offer(json).await.map_err(Into::into)
    }

    pub async fn handle_key_answer(self: &Arc<Self>, json: &str) -> Result<()> {
        self.exchange.handle_key_answer(json).await.map_err(Into::into)
    }

    pub async fn handle_key_rotation(self: &Arc<Self>, json: &str) -> Result<()> {
        self.exchange.handle_key_rotation(json).await.map_err(Into::into)
    }

    pub async fn send_chat(&self, plaintext: &[u8]) -> Result<()> {
        let envelope = {
            let guard = self.chat.read().await;
            let cryptor = guard.as_ref().ok_or(SessionError::NotActive)?;
            cryptor.encrypt(plaintext)
        };
        self.transport
            .send_chat(&self.room_id, &self.peer_id, envelope.to_json())
            .await?;
        Ok(())
    }

    pub async fn handle_chat(&self, json: &str) -> Result<DecryptedMessage> {
        let envelope = ChatEnvelope::from_json(json)?;
        let guard = self.chat.read().await;
        let cryptor = guard.as_ref().ok_or(SessionError::NotActive)?;
        Ok(cryptor.decrypt(&envelope)?)
    }

    async fn handle_exchange_event(self: &Arc<Self>, event: ExchangeEvent) {
        match event {
            ExchangeEvent::Complete {
                generation,
                key_material,
                peer_signing_public_key,
                peer_fingerprint,
            } => {
                self.activate(generation, key_material, peer_signing_public_key, peer_fingerprint)
                    .await;
            }
            ExchangeEvent::Rotated { generation, key_material } => {
                self.apply_rotation(generation, key_material).await;
            }
            ExchangeEvent::Error(err) => {
                warn!(%err, "key exchange reported an error");
                *self.status.write().await = SessionStatus::Error(err.to_string());
            }
        }
    }

    /// Activation sequence: install the key, flip the platform-specific
    /// switch to enable encryption, bring up the chat cryptor, then declare
    /// the session active.
    async fn activate(
        self: &Arc<Self>,
        generation: u64,
        key_material: KeyMaterial,
        peer_signing_public_key: Vec<u8>,
        peer_fingerprint: String,
    ) {
        self.pipeline.apply_new_key(key_material.clone(), self.config.sync_delay).await;

        let cryptor = ChatCryptor::new(key_material, Arc::clone(&self.signing), peer_signing_public_key.clone());
        *self.chat.write().await = Some(cryptor);
        *self.peer.write().await = Some(PeerIdentity {
            signing_public_key: peer_signing_public_key,
            fingerprint: peer_fingerprint,
        });
        self.generation.store(generation, Ordering::SeqCst);
        *self.status.write().await = SessionStatus::Active;
        info!(generation, "session active");
    }

    async fn apply_rotation(self: &Arc<Self>, generation: u64, key_material: KeyMaterial) {
        *self.status.write().await = SessionStatus::KeyRotation;
        self.pipeline.apply_new_key(key_material.clone(), self.config.sync_delay).await;

        let peer_signing_public_key = match self.peer.read().await.as_ref() {
            Some(peer) => peer.signing_public_key.clone(),
            None => {
                warn!("rotation completed with no established peer identity, dropping chat cryptor refresh");
                *self.status.write().await = SessionStatus::Active;
                return;
            }
        };
        let cryptor = ChatCryptor::new(key_material, Arc::clone(&self.signing), peer_signing_public_key);
        *self.chat.write().await = Some(cryptor);
        self.generation.store(generation, Ordering::SeqCst);
        *self.status.write().await = SessionStatus::Active;
        debug!(generation, "key rotation applied");
    }

    /// Orderly tear-down: stop timers, drain pending frames to
    /// pass-through, release the exchange manager, then drop worker and
    /// chat state.
    pub async fn teardown(self: &Arc<Self>) {
        if let Some(task) = self.tasks.lock().await.stats_timer.take() {
            task.abort();
        }
        self.pipeline.disable_encryption().await;
        debug!("signalling handlers would be unregistered by the host here");
        self.exchange.cleanup().await;
        self.pipeline.teardown().await;

        *self.status.write().await = SessionStatus::Disabled;
        *self.chat.write().await = None;
        *self.peer.write().await = None;
        self.generation.store(0, Ordering::SeqCst);
    }

    /// Best-effort synchronous tear-down for page-unload-equivalent
    /// situations: aborts background tasks directly and flips status
    /// without waiting on any lock or performing any delay. Skips anything
    /// it can't acquire immediately rather than blocking.
    pub fn emergency_teardown(self: &Arc<Self>) {
        if let Ok(mut tasks) = self.tasks.try_lock() {
            if let Some(task) = tasks.stats_timer.take() {
                task.abort();
            }
            if let Some(task) = tasks.event_drain.take() {
                task.abort();
            }
        }
        if let Ok(mut status) = self.status.try_write() {
            *status = SessionStatus::Disabled;
        } else {
            warn!("emergency teardown could not acquire status lock, leaving stale status in place");
        }
    }
}
