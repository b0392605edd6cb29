//! The key-exchange state machine: drives the initial handshake and
//! subsequent key rotations for one peer connection. This is the most
//! intricate component in the pipeline — everything else just consumes the
//! [`ExchangeEvent`]s it produces.

use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::Utc;
use crypto::{EcdhKeyPair, SigningKeyPair};
use rand::rngs::OsRng;
use rand::{Rng, RngCore};
use tokio::sync::{mpsc, Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use crate::config::ExchangeConfig;
use crate::error::{ExchangeError, Result};
use crate::events::ExchangeEvent;
use crate::message::{handshake_canonical_string, rotation_canonical_string, KeyExchangeMessage, ExchangePayload};
use crate::nonce_table::NonceTable;
use crate::role::Role;
use crate::rotation::RotationBookkeeping;
use crate::state::ExchangeState;
use crate::transport::SignallingTransport;

struct Inner {
    state: ExchangeState,
    signing: Arc<SigningKeyPair>,
    local_ephemeral: Option<EcdhKeyPair>,
    pending_rotation_ephemeral: Option<EcdhKeyPair>,
    nonce_table: NonceTable,
    rotation: RotationBookkeeping,
    generation: u64,
}

#[derive(Default)]
struct Tasks {
    retry_task: Option<JoinHandle<()>>,
    rotation_timer_task: Option<JoinHandle<()>>,
    rotation_response_task: Option<JoinHandle<()>>,
    nonce_cleanup_task: Option<JoinHandle<()>>,
}

impl Tasks {
    fn abort_all(&mut self) {
        for task in [
            self.retry_task.take(),
            self.rotation_timer_task.take(),
            self.rotation_response_task.take(),
            self.nonce_cleanup_task.take(),
        ] {
            if let Some(task) = task {
                task.abort();
            }
        }
    }
}

pub struct KeyExchangeManager {
    role: Role,
    room_id: String,
    peer_id: String,
    transport: Arc<dyn SignallingTransport>,
    config: ExchangeConfig,
    inner: Mutex<Inner>,
    tasks: Mutex<Tasks>,
    complete_notify: Notify,
    event_tx: mpsc::UnboundedSender<ExchangeEvent>,
}

impl KeyExchangeManager {
    /// `signing` is the session-long ECDSA keypair, owned by the session
    /// controller and shared with the chat cryptor — the exchange manager
    /// only ever reads it to sign outgoing messages.
    pub fn new(
        role: Role,
        room_id: impl Into<String>,
        peer_id: impl Into<String>,
        transport: Arc<dyn SignallingTransport>,
        signing: Arc<SigningKeyPair>,
        config: ExchangeConfig,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<ExchangeEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let capacity = config.processed_generations_capacity;
        let manager = Arc::new(Self {
            role,
            room_id: room_id.into(),
            peer_id: peer_id.into(),
            transport,
            config,
            inner: Mutex::new(Inner {
                state: ExchangeState::Idle,
                signing,
                local_ephemeral: None,
                pending_rotation_ephemeral: None,
                nonce_table: NonceTable::new(),
                rotation: RotationBookkeeping::new(capacity),
                generation: 0,
            }),
            tasks: Mutex::new(Tasks::default()),
            complete_notify: Notify::new(),
            event_tx,
        });
        (manager, event_rx)
    }

    pub async fn state(&self) -> ExchangeState {
        self.inner.lock().await.state.clone()
    }

    pub async fn generation(&self) -> u64 {
        self.inner.lock().await.generation
    }

    /// Generates this side's first ephemeral keypair and, if we're the
    /// initiator, schedules the offer after [`ExchangeConfig::stabilization_delay`],
    /// giving the remote side's message handlers time to mount.
    pub async fn initialize(self: &Arc<Self>) {
        {
            let mut inner = self.inner.lock().await;
            inner.local_ephemeral = Some(EcdhKeyPair::generate());
        }

        let cleanup = Arc::clone(self);
        let cleanup_task = tokio::spawn(async move {
            loop {
                sleep(cleanup.config.nonce_cleanup_interval).await;
                let mut inner = cleanup.inner.lock().await;
                inner.nonce_table.purge_expired(cleanup.config.nonce_max_age);
            }
        });
        self.tasks.lock().await.nonce_cleanup_task = Some(cleanup_task);

        if self.role == Role::Initiator {
            let manager = Arc::clone(self);
            let task = tokio::spawn(async move {
                sleep(manager.config.stabilization_delay).await;
                manager.send_offer_with_retries().await;
            });
            self.tasks.lock().await.retry_task = Some(task);
        }
    }

    /// Late-join re-trigger: cancels any outstanding retry loop and
    /// starts a fresh handshake after a short delay. Only the initiator
    /// drives this; a participant just waits for the re-sent offer.
    pub async fn on_user_joined(self: &Arc<Self>) {
        if self.role != Role::Initiator {
            return;
        }
        if let Some(task) = self.tasks.lock().await.retry_task.take() {
            task.abort();
        }
        {
            let mut inner = self.inner.lock().await;
            inner.local_ephemeral = Some(EcdhKeyPair::generate());
            inner.state = ExchangeState::Idle;
            inner.generation = 0;
        }
        let manager = Arc::clone(self);
        let task = tokio::spawn(async move {
            sleep(manager.config.late_join_delay).await;
            manager.send_offer_with_retries().await;
        });
        self.tasks.lock().await.retry_task = Some(task);
    }

    async fn send_offer_with_retries(self: &Arc<Self>) {
        let message = {
            let mut inner = self.inner.lock().await;
            let ephemeral = match inner.local_ephemeral.as_ref() {
                Some(e) => e,
                None => {
                    warn!("send_offer_with_retries called with no local ephemeral keypair");
                    return;
                }
            };
            let public_key = ephemeral.public_key_bytes();
            let fingerprint = ephemeral.fingerprint();
            let nonce = random_nonce();
            let public_key_b64 = STANDARD.encode(&public_key);
            let canonical = handshake_canonical_string(&public_key_b64, &fingerprint, &nonce);
            let signature = inner.signing.sign(canonical.as_bytes());
            inner.state = ExchangeState::Initiating;
            KeyExchangeMessage::KeyOffer(ExchangePayload {
                public_key: public_key_b64,
                fingerprint,
                signature: STANDARD.encode(signature),
                generation: 1,
                timestamp: now_millis(),
                nonce,
                signing_public_key: inner.signing.export_public_base64(),
            })
        };
        let json = message.to_json();

        for attempt in 0..=self.config.max_retry_attempts {
            if let Err(err) = self
                .transport
                .send_key_offer(&self.room_id, &self.peer_id, json.clone())
                .await
            {
                warn!(%err, attempt, "failed to send keyOffer, will retry on timeout");
            }

            let wait = self.config.attempt_timeout(attempt) + jitter(self.config.retry_jitter_max);
            match timeout(wait, self.complete_notify.notified()).await {
                Ok(()) => return,
                Err(_) => {
                    if attempt == self.config.max_retry_attempts {
                        let mut inner = self.inner.lock().await;
                        inner.state = ExchangeState::Error("handshake timed out".into());
                        self.emit(ExchangeEvent::Error(ExchangeError::HandshakeTimeout(attempt + 1)));
                        return;
                    }
                    debug!(attempt, "keyOffer timed out, retrying with backoff");
                }
            }
        }
    }

    /// Participant-side handler for an incoming `keyOffer`.
    pub async fn handle_key_offer(self: &Arc<Self>, json: &str) -> Result<()> {
        let parsed = KeyExchangeMessage::from_json(json)?;
        let KeyExchangeMessage::KeyOffer(payload) = parsed else {
            return Err(ExchangeError::InvalidMessage("expected keyOffer".into()));
        };

        let mut inner = self.inner.lock().await;
        if !inner.nonce_table.insert_if_new(&payload.nonce) {
            debug!("dropping replayed keyOffer nonce");
            return Ok(());
        }

        let public_key_bytes = STANDARD
            .decode(&payload.public_key)
            .map_err(|_| ExchangeError::InvalidMessage("publicKey not valid base64".into()))?;
        let signing_key_bytes = STANDARD
            .decode(&payload.signing_public_key)
            .map_err(|_| ExchangeError::InvalidMessage("signingPublicKey not valid base64".into()))?;
        let signature = STANDARD
            .decode(&payload.signature)
            .map_err(|_| ExchangeError::InvalidMessage("signature not valid base64".into()))?;

        let canonical = handshake_canonical_string(&payload.public_key, &payload.fingerprint, &payload.nonce);
        if !crypto::verify(canonical.as_bytes(), &signature, &signing_key_bytes).unwrap_or(false) {
            inner.state = ExchangeState::Error("keyOffer verification failed".into());
            drop(inner);
            self.emit(ExchangeEvent::Error(ExchangeError::VerificationFailed));
            return Err(ExchangeError::VerificationFailed);
        }

        inner.state = ExchangeState::Responding;

        let ephemeral = inner.local_ephemeral.take().ok_or_else(|| {
            ExchangeError::InvalidMessage("no local ephemeral keypair ready to answer with".into())
        })?;
        let local_public = ephemeral.public_key_bytes();
        let local_fingerprint = ephemeral.fingerprint();
        let key_material = ephemeral
            .derive(&public_key_bytes, 1, payload.fingerprint.clone())
            .map_err(|_| ExchangeError::InvalidMessage("failed to derive shared key from keyOffer".into()))?;

        let answer_nonce = random_nonce();
        let local_public_b64 = STANDARD.encode(&local_public);
        let answer_canonical = handshake_canonical_string(&local_public_b64, &local_fingerprint, &answer_nonce);
        let answer_signature = inner.signing.sign(answer_canonical.as_bytes());
        let answer = KeyExchangeMessage::KeyAnswer(ExchangePayload {
            public_key: local_public_b64,
            fingerprint: local_fingerprint,
            signature: STANDARD.encode(answer_signature),
            generation: 1,
            timestamp: now_millis(),
            nonce: answer_nonce,
            signing_public_key: inner.signing.export_public_base64(),
        });

        inner.generation = 1;
        inner.state = ExchangeState::Complete;
        drop(inner);

        self.transport
            .send_key_answer(&self.room_id, &self.peer_id, answer.to_json())
            .await?;

        info!("handshake complete (participant)");
        self.emit(ExchangeEvent::Complete {
            generation: 1,
            key_material,
            peer_signing_public_key: signing_key_bytes,
            peer_fingerprint: payload.fingerprint,
        });
        Ok(())
    }

    /// Initiator-side handler for the matching `keyAnswer`.
    pub async fn handle_key_answer(self: &Arc<Self>, json: &str) -> Result<()> {
        let parsed = KeyExchangeMessage::from_json(json)?;
        let KeyExchangeMessage::KeyAnswer(payload) = parsed else {
            return Err(ExchangeError::InvalidMessage("expected keyAnswer".into()));
        };

        let mut inner = self.inner.lock().await;
        if !inner.nonce_table.insert_if_new(&payload.nonce) {
            debug!("dropping replayed keyAnswer nonce");
            return Ok(());
        }

        let public_key_bytes = STANDARD
            .decode(&payload.public_key)
            .map_err(|_| ExchangeError::InvalidMessage("publicKey not valid base64".into()))?;
        let signing_key_bytes = STANDARD
            .decode(&payload.signing_public_key)
            .map_err(|_| ExchangeError::InvalidMessage("signingPublicKey not valid base64".into()))?;
        let signature = STANDARD
            .decode(&payload.signature)
            .map_err(|_| ExchangeError::InvalidMessage("signature not valid base64".into()))?;

        let canonical = handshake_canonical_string(&payload.public_key, &payload.fingerprint, &payload.nonce);
        if !crypto::verify(canonical.as_bytes(), &signature, &signing_key_bytes).unwrap_or(false) {
            inner.state = ExchangeState::Error("keyAnswer verification failed".into());
            drop(inner);
            self.emit(ExchangeEvent::Error(ExchangeError::VerificationFailed));
            return Err(ExchangeError::VerificationFailed);
        }

        let ephemeral = inner.local_ephemeral.take().ok_or_else(|| {
            ExchangeError::InvalidMessage("no local ephemeral keypair awaiting an answer".into())
        })?;
        let key_material = ephemeral
            .derive(&public_key_bytes, 1, payload.fingerprint.clone())
            .map_err(|_| ExchangeError::InvalidMessage("failed to derive shared key from keyAnswer".into()))?;

        inner.generation = 1;
        inner.state = ExchangeState::Complete;
        drop(inner);

        self.complete_notify.notify_waiters();
        info!("handshake complete (initiator)");
        self.emit(ExchangeEvent::Complete {
            generation: 1,
            key_material,
            peer_signing_public_key: signing_key_bytes,
            peer_fingerprint: payload.fingerprint,
        });

        self.start_rotation_timer().await;
        Ok(())
    }

    async fn start_rotation_timer(self: &Arc<Self>) {
        let manager = Arc::clone(self);
        let task = tokio::spawn(async move {
            loop {
                sleep(manager.config.rotation_period).await;
                manager.initiate_rotation().await;
            }
        });
        self.tasks.lock().await.rotation_timer_task = Some(task);
    }

    /// Manually trigger a rotation outside the periodic timer. Only valid
    /// for the initiator — role is fixed for the lifetime of the session.
    pub async fn rotate_keys(self: &Arc<Self>) -> Result<()> {
        if self.role != Role::Initiator {
            return Err(ExchangeError::NotInitiator);
        }
        self.initiate_rotation().await;
        Ok(())
    }

    async fn initiate_rotation(self: &Arc<Self>) {
        let message = {
            let mut inner = self.inner.lock().await;
            if !inner.state.is_complete() {
                return;
            }
            if inner.rotation.pending_response_generation.is_some() {
                debug!("rotation already in flight, skipping this tick");
                return;
            }
            let new_generation = inner.generation + 1;
            let ephemeral = EcdhKeyPair::generate();
            let public_key = ephemeral.public_key_bytes();
            let fingerprint = ephemeral.fingerprint();
            inner.pending_rotation_ephemeral = Some(ephemeral);

            let nonce = random_nonce();
            let public_key_b64 = STANDARD.encode(&public_key);
            let canonical = rotation_canonical_string(&public_key_b64, &fingerprint, &nonce, new_generation);
            let signature = inner.signing.sign(canonical.as_bytes());
            inner.rotation.pending_response_generation = Some(new_generation);

            KeyExchangeMessage::KeyRotation(ExchangePayload {
                public_key: public_key_b64,
                fingerprint,
                signature: STANDARD.encode(signature),
                generation: new_generation,
                timestamp: now_millis(),
                nonce,
                signing_public_key: inner.signing.export_public_base64(),
            })
        };

        if let Err(err) = self
            .transport
            .send_key_rotation(&self.room_id, &self.peer_id, message.to_json())
            .await
        {
            warn!(%err, "failed to send keyRotation, will retry next period");
            return;
        }

        let generation = message.payload().generation;
        let manager = Arc::clone(self);
        let timeout_task = tokio::spawn(async move {
            sleep(manager.config.rotation_response_timeout).await;
            let mut inner = manager.inner.lock().await;
            if inner.rotation.pending_response_generation == Some(generation) {
                warn!(generation, "rotation response timed out, staying on previous generation");
                inner.rotation.pending_response_generation = None;
                inner.pending_rotation_ephemeral = None;
            }
        });
        self.tasks.lock().await.rotation_response_task = Some(timeout_task);
    }

    /// Handles an incoming `keyRotation`, whether it is the peer's response
    /// to a rotation we started or a fresh rotation the peer initiated.
    /// Verification and loop-prevention failures here degrade silently:
    /// the previous generation's key stays active and no
    /// [`ExchangeEvent::Error`] is emitted.
    pub async fn handle_key_rotation(self: &Arc<Self>, json: &str) -> Result<()> {
        let parsed = KeyExchangeMessage::from_json(json)?;
        let KeyExchangeMessage::KeyRotation(payload) = parsed else {
            return Err(ExchangeError::InvalidMessage("expected keyRotation".into()));
        };

        let mut inner = self.inner.lock().await;
        if !inner.nonce_table.insert_if_new(&payload.nonce) {
            debug!("dropping replayed keyRotation nonce");
            return Ok(());
        }
        if inner.rotation.is_processed(payload.generation) {
            debug!(generation = payload.generation, "dropping already-processed rotation generation");
            return Ok(());
        }

        let public_key_bytes = STANDARD
            .decode(&payload.public_key)
            .map_err(|_| ExchangeError::InvalidMessage("publicKey not valid base64".into()))?;
        let signing_key_bytes = STANDARD
            .decode(&payload.signing_public_key)
            .map_err(|_| ExchangeError::InvalidMessage("signingPublicKey not valid base64".into()))?;
        let signature = STANDARD
            .decode(&payload.signature)
            .map_err(|_| ExchangeError::InvalidMessage("signature not valid base64".into()))?;

        let canonical =
            rotation_canonical_string(&payload.public_key, &payload.fingerprint, &payload.nonce, payload.generation);
        if !crypto::verify(canonical.as_bytes(), &signature, &signing_key_bytes).unwrap_or(false) {
            warn!("keyRotation verification failed, keeping previous generation active");
            return Ok(());
        }

        let is_our_own_rotation = inner.rotation.pending_response_generation == Some(payload.generation);

        let key_material = if is_our_own_rotation {
            let ephemeral = match inner.pending_rotation_ephemeral.take() {
                Some(e) => e,
                None => return Ok(()),
            };
            inner.rotation.pending_response_generation = None;
            if let Some(task) = self.tasks.lock().await.rotation_response_task.take() {
                task.abort();
            }
            ephemeral
                .derive(&public_key_bytes, payload.generation, payload.fingerprint.clone())
                .map_err(|_| ExchangeError::InvalidMessage("failed to derive shared key from rotation response".into()))?
        } else {
            if payload.generation <= inner.generation {
                debug!(generation = payload.generation, "dropping stale rotation");
                return Ok(());
            }
            let ephemeral = EcdhKeyPair::generate();
            let local_public = ephemeral.public_key_bytes();
            let local_fingerprint = ephemeral.fingerprint();
            let key_material = ephemeral
                .derive(&public_key_bytes, payload.generation, payload.fingerprint.clone())
                .map_err(|_| ExchangeError::InvalidMessage("failed to derive shared key from rotation".into()))?;

            let nonce = random_nonce();
            let local_public_b64 = STANDARD.encode(&local_public);
            let response_canonical =
                rotation_canonical_string(&local_public_b64, &local_fingerprint, &nonce, payload.generation);
            let response_signature = inner.signing.sign(response_canonical.as_bytes());
            let response = KeyExchangeMessage::KeyRotation(ExchangePayload {
                public_key: local_public_b64,
                fingerprint: local_fingerprint,
                signature: STANDARD.encode(response_signature),
                generation: payload.generation,
                timestamp: now_millis(),
                nonce,
                signing_public_key: inner.signing.export_public_base64(),
            });
            drop(inner);
            self.transport
                .send_key_rotation(&self.room_id, &self.peer_id, response.to_json())
                .await?;
            inner = self.inner.lock().await;
            key_material
        };

        inner.rotation.mark_processed(payload.generation);
        inner.generation = payload.generation;
        let generation = payload.generation;
        drop(inner);

        info!(generation, "key rotation complete");
        self.emit(ExchangeEvent::Rotated { generation, key_material });
        Ok(())
    }

    /// Tears down all background tasks and wipes key material, as the
    /// exchange-manager-cleanup step of an orderly session teardown.
    pub async fn cleanup(self: &Arc<Self>) {
        self.tasks.lock().await.abort_all();
        let mut inner = self.inner.lock().await;
        inner.state = ExchangeState::Idle;
        inner.local_ephemeral = None;
        inner.pending_rotation_ephemeral = None;
        inner.nonce_table = NonceTable::new();
        inner.rotation = RotationBookkeeping::new(self.config.processed_generations_capacity);
        inner.generation = 0;
    }

    fn emit(&self, event: ExchangeEvent) {
        let _ = self.event_tx.send(event);
    }
}

fn random_nonce() -> String {
    let mut bytes = [0u8; 16];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

fn jitter(max: std::time::Duration) -> std::time::Duration {
    let max_millis = max.as_millis().max(1) as u64;
    std::time::Duration::from_millis(rand::thread_rng().gen_range(0..=max_millis))
}
