use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crypto::{AesGcmFrameCodec, KeyMaterial};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::time::timeout;
use tracing::warn;

use crate::stats::{FrameStats, FrameStatsSnapshot};

/// In-flight worker operations are bounded by this timeout; on expiry the
/// frame is counted as dropped.
pub const OPERATION_TIMEOUT: Duration = Duration::from_secs(5);
/// The pending operations map is bounded; above this many outstanding
/// operations a warning is raised.
pub const MAX_PENDING_OPERATIONS: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Direction {
    Encrypt,
    Decrypt,
}

#[derive(Debug)]
pub enum FrameOutcome {
    Processed(Vec<u8>),
    PassThrough(Vec<u8>),
    Dropped,
}

enum WorkerJob {
    Process {
        frame: Vec<u8>,
        aad: Vec<u8>,
        reply: oneshot::Sender<crypto::Result<Vec<u8>>>,
    },
    InstallKey(KeyMaterial),
}

/// One execution context per direction: frames and key installs are sent
/// as messages and processed sequentially by a single background task, so
/// the caller's context never touches the codec directly and never blocks
/// on a slow crypto call beyond `OPERATION_TIMEOUT`.
pub struct FrameWorker {
    direction: Direction,
    job_tx: mpsc::Sender<WorkerJob>,
    has_key: AtomicBool,
    encryption_enabled: AtomicBool,
    pending: Mutex<HashMap<u64, Instant>>,
    next_op_id: AtomicU64,
    stats: FrameStats,
}

impl FrameWorker {
    pub(crate) fn new(direction: Direction) -> Arc<Self> {
        let (job_tx, mut job_rx) = mpsc::channel::<WorkerJob>(MAX_PENDING_OPERATIONS);
        let worker = Arc::new(Self {
            direction,
            job_tx,
            has_key: AtomicBool::new(false),
            encryption_enabled: AtomicBool::new(false),
            pending: Mutex::new(HashMap::new()),
            next_op_id: AtomicU64::new(0),
            stats: FrameStats::new(),
        });

        tokio::spawn(async move {
            let mut codec: Option<AesGcmFrameCodec> = None;
            while let Some(job) = job_rx.recv().await {
                match job {
                    WorkerJob::InstallKey(key_material) => {
                        codec = Some(AesGcmFrameCodec::new(key_material));
                    }
                    WorkerJob::Process { frame, aad, reply } => {
                        let result = match &codec {
                            Some(codec) => match direction {
                                Direction::Encrypt => codec.encrypt(&frame, &aad),
                                Direction::Decrypt => codec.decrypt(&frame, &aad),
                            },
                            None => Err(crypto::CryptoError::NotInitialised),
                        };
                        let _ = reply.send(result);
                    }
                }
            }
        });

        worker
    }

    /// Sender-side pass-through toggle. Decrypt workers ignore this —
    /// receivers always attempt decryption once a key is present.
    pub fn set_enabled(&self, enabled: bool) {
        self.encryption_enabled.store(enabled, Ordering::Relaxed);
    }

    pub async fn install_key(&self, key_material: KeyMaterial) {
        self.stats.note_key_rotation().await;
        self.has_key.store(true, Ordering::Relaxed);
        let _ = self.job_tx.send(WorkerJob::InstallKey(key_material)).await;
    }

    pub async fn stats(&self) -> FrameStatsSnapshot {
        self.stats.snapshot().await
    }

    /// Process one frame. Never surfaces an error to the caller — failures
    /// are absorbed into the stats counters and the frame is dropped. A
    /// burst of decrypt failures right after rotation is expected and must
    /// not surface as an error event.
    pub async fn process(&self, frame: Vec<u8>, aad: Vec<u8>) -> FrameOutcome {
        if !self.has_key.load(Ordering::Relaxed) {
            return FrameOutcome::PassThrough(frame);
        }
        if self.direction == Direction::Encrypt && !self.encryption_enabled.load(Ordering::Relaxed) {
            return FrameOutcome::PassThrough(frame);
        }

        let op_id = self.next_op_id.fetch_add(1, Ordering::Relaxed);
        {
            let mut pending = self.pending.lock().await;
            pending.insert(op_id, Instant::now());
            if pending.len() > MAX_PENDING_OPERATIONS {
                warn!(pending = pending.len(), "pending frame operations exceed MAX_PENDING_OPERATIONS");
            }
        }

        let (reply_tx, reply_rx) = oneshot::channel();
        let started = Instant::now();
        if self
            .job_tx
            .send(WorkerJob::Process { frame, aad, reply: reply_tx })
            .await
            .is_err()
        {
            self.pending.lock().await.remove(&op_id);
            self.stats.record_dropped();
            return FrameOutcome::Dropped;
        }

        let outcome = match timeout(OPERATION_TIMEOUT, reply_rx).await {
            Ok(Ok(Ok(bytes))) => {
                self.stats
                    .record_processed(started.elapsed().as_secs_f64() * 1000.0)
                    .await;
                FrameOutcome::Processed(bytes)
            }
            Ok(Ok(Err(_))) => {
                self.stats.record_crypto_error();
                FrameOutcome::Dropped
            }
            Ok(Err(_)) => {
                self.stats.record_dropped();
                FrameOutcome::Dropped
            }
            Err(_) => {
                warn!(op_id, "frame operation exceeded OPERATION_TIMEOUT");
                self.stats.record_dropped();
                FrameOutcome::Dropped
            }
        };

        self.pending.lock().await.remove(&op_id);
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crypto::EcdhKeyPair;

    fn matching_key_materials() -> (KeyMaterial, KeyMaterial) {
        let alice = EcdhKeyPair::generate();
        let bob = EcdhKeyPair::generate();
        let alice_pub = alice.public_key_bytes();
        let bob_pub = bob.public_key_bytes();
        let a = alice.derive(&bob_pub, 1, "bob".into()).unwrap();
        let b = bob.derive(&alice_pub, 1, "alice".into()).unwrap();
        (a, b)
    }

    #[tokio::test]
    async fn frame_passes_through_before_a_key_is_installed() {
        let worker = FrameWorker::new(Direction::Encrypt);
        match worker.process(b"hello".to_vec(), b"aad".to_vec()).await {
            FrameOutcome::PassThrough(bytes) => assert_eq!(bytes, b"hello"),
            other => panic!("expected pass-through, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn encrypt_then_decrypt_round_trips() {
        let (key_a, key_b) = matching_key_materials();
        let sender = FrameWorker::new(Direction::Encrypt);
        let receiver = FrameWorker::new(Direction::Decrypt);
        sender.install_key(key_a).await;
        receiver.install_key(key_b).await;
        sender.set_enabled(true);

        let ciphertext = match sender.process(b"frame-bytes".to_vec(), b"aad".to_vec()).await {
            FrameOutcome::Processed(bytes) => bytes,
            other => panic!("expected processed frame, got {other:?}"),
        };
        let plaintext = match receiver.process(ciphertext, b"aad".to_vec()).await {
            FrameOutcome::Processed(bytes) => bytes,
            other => panic!("expected processed frame, got {other:?}"),
        };
        assert_eq!(plaintext, b"frame-bytes");
        assert_eq!(sender.stats().await.processed_frames, 1);
        assert_eq!(receiver.stats().await.processed_frames, 1);
    }

    #[tokio::test]
    async fn disabled_encryption_passes_frames_through_unchanged() {
        let (key_a, _) = matching_key_materials();
        let sender = FrameWorker::new(Direction::Encrypt);
        sender.install_key(key_a).await;
        // encryption_enabled defaults to false until enable_encryption() is called
        match sender.process(b"hello".to_vec(), b"aad".to_vec()).await {
            FrameOutcome::PassThrough(bytes) => assert_eq!(bytes, b"hello"),
            other => panic!("expected pass-through, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn wrong_key_drops_frame_as_a_crypto_error() {
        let (key_a, _) = matching_key_materials();
        let other = EcdhKeyPair::generate();
        let other_pub = other.public_key_bytes();
        let unrelated = EcdhKeyPair::generate()
            .derive(&other_pub, 1, "x".into())
            .unwrap();

        let sender = FrameWorker::new(Direction::Encrypt);
        let receiver = FrameWorker::new(Direction::Decrypt);
        sender.install_key(key_a).await;
        receiver.install_key(unrelated).await;
        sender.set_enabled(true);

        let ciphertext = match sender.process(b"frame".to_vec(), b"aad".to_vec()).await {
            FrameOutcome::Processed(bytes) => bytes,
            other => panic!("expected processed frame, got {other:?}"),
        };
        match receiver.process(ciphertext, b"aad".to_vec()).await {
            FrameOutcome::Dropped => {}
            other => panic!("expected dropped frame, got {other:?}"),
        }
        assert_eq!(receiver.stats().await.crypto_errors, 1);
    }
}
