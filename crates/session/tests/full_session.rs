//! End-to-end scenario wiring two `SessionController`s over in-process
//! loopback transports — exercises handshake, activation, chat, and
//! rotation the way a real two-party call would.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use exchange::TransportError;
use pipeline::PlatformVariant;
use session::{SessionConfig, SessionController, SessionStatus};
use tokio::sync::mpsc;
use tokio::time::timeout;

#[derive(Clone, Copy, Debug)]
enum Kind {
    Offer,
    Answer,
    Rotation,
    Chat,
}

struct ChannelTransport {
    tx: mpsc::UnboundedSender<(Kind, String)>,
}

#[async_trait]
impl exchange::SignallingTransport for ChannelTransport {
    async fn send_key_offer(&self, _room_id: &str, _peer_id: &str, json: String) -> Result<(), TransportError> {
        self.tx.send((Kind::Offer, json)).map_err(|e| TransportError::Failed(e.to_string()))
    }

    async fn send_key_answer(&self, _room_id: &str, _peer_id: &str, json: String) -> Result<(), TransportError> {
        self.tx.send((Kind::Answer, json)).map_err(|e| TransportError::Failed(e.to_string()))
    }

    async fn send_key_rotation(&self, _room_id: &str, _peer_id: &str, json: String) -> Result<(), TransportError> {
        self.tx.send((Kind::Rotation, json)).map_err(|e| TransportError::Failed(e.to_string()))
    }

    async fn send_chat(&self, _room_id: &str, _peer_id: &str, json: String) -> Result<(), TransportError> {
        self.tx.send((Kind::Chat, json)).map_err(|e| TransportError::Failed(e.to_string()))
    }
}

struct FixedVariant(Option<PlatformVariant>);

impl pipeline::FrameTransport for FixedVariant {
    fn platform_variant(&self) -> Option<PlatformVariant> {
        self.0
    }
}

fn fast_config() -> SessionConfig {
    SessionConfig {
        exchange: exchange::ExchangeConfig {
            stabilization_delay: Duration::from_millis(5),
            late_join_delay: Duration::from_millis(5),
            rotation_period: Duration::from_millis(40),
            rotation_response_timeout: Duration::from_millis(200),
            nonce_cleanup_interval: Duration::from_millis(50),
            ..exchange::ExchangeConfig::default()
        },
        sync_delay: Duration::from_millis(5),
        stats_update_interval: Duration::from_millis(50),
        e2ee_init_delay: Duration::from_millis(5),
    }
}

async fn wait_for_active(controller: &Arc<SessionController>) {
    for _ in 0..200 {
        if controller.status().await.is_active() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("session never became active");
}

#[tokio::test]
async fn handshake_activates_both_controllers_with_matching_fingerprints() {
    let (tx_to_participant, mut rx_to_participant) = mpsc::unbounded_channel();
    let (tx_to_initiator, mut rx_to_initiator) = mpsc::unbounded_channel();

    let initiator = SessionController::new(
        exchange::Role::Initiator,
        "room-1",
        "participant",
        Arc::new(ChannelTransport { tx: tx_to_participant }),
        Arc::new(FixedVariant(Some(PlatformVariant::ChainOfTransforms))),
        fast_config(),
    );
    let participant = SessionController::new(
        exchange::Role::Participant,
        "room-1",
        "initiator",
        Arc::new(ChannelTransport { tx: tx_to_initiator }),
        Arc::new(FixedVariant(Some(PlatformVariant::ChainOfTransforms))),
        fast_config(),
    );

    let participant_dispatch = Arc::clone(&participant);
    tokio::spawn(async move {
        while let Some((kind, json)) = rx_to_participant.recv().await {
            match kind {
                Kind::Offer => {
                    let _ = participant_dispatch.handle_key_offer(&json).await;
                }
                Kind::Rotation => {
                    let _ = participant_dispatch.handle_key_rotation(&json).await;
                }
                Kind::Chat => {
                    let _ = participant_dispatch.handle_chat(&json).await;
                }
                Kind::Answer => unreachable!("participant never receives a keyAnswer"),
            }
        }
    });

    let initiator_dispatch = Arc::clone(&initiator);
    tokio::spawn(async move {
        while let Some((kind, json)) = rx_to_initiator.recv().await {
            match kind {
                Kind::Answer => {
                    let _ = initiator_dispatch.handle_key_answer(&json).await;
                }
                Kind::Rotation => {
                    let _ = initiator_dispatch.handle_key_rotation(&json).await;
                }
                Kind::Chat => {
                    let _ = initiator_dispatch.handle_chat(&json).await;
                }
                Kind::Offer => unreachable!("initiator never receives a keyOffer"),
            }
        }
    });

    initiator.start().await;
    participant.start().await;

    timeout(Duration::from_secs(2), wait_for_active(&initiator)).await.unwrap();
    timeout(Duration::from_secs(2), wait_for_active(&participant)).await.unwrap();

    assert_eq!(initiator.generation(), 1);
    assert_eq!(participant.generation(), 1);
    assert_eq!(
        participant.remote_fingerprint().await.unwrap(),
        initiator.local_fingerprint()
    );
    assert_eq!(
        initiator.remote_fingerprint().await.unwrap(),
        participant.local_fingerprint()
    );
}

#[tokio::test]
async fn rotation_keeps_chat_working_across_generations() {
    let (tx_to_participant, mut rx_to_participant) = mpsc::unbounded_channel();
    let (tx_to_initiator, mut rx_to_initiator) = mpsc::unbounded_channel();

    let initiator = SessionController::new(
        exchange::Role::Initiator,
        "room-1",
        "participant",
        Arc::new(ChannelTransport { tx: tx_to_participant }),
        Arc::new(FixedVariant(Some(PlatformVariant::ScriptTransform))),
        fast_config(),
    );
    let participant = SessionController::new(
        exchange::Role::Participant,
        "room-1",
        "initiator",
        Arc::new(ChannelTransport { tx: tx_to_initiator }),
        Arc::new(FixedVariant(Some(PlatformVariant::ScriptTransform))),
        fast_config(),
    );

    let participant_dispatch = Arc::clone(&participant);
    let (chat_tx, mut chat_rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        while let Some((kind, json)) = rx_to_participant.recv().await {
            match kind {
                Kind::Offer => {
                    let _ = participant_dispatch.handle_key_offer(&json).await;
                }
                Kind::Rotation => {
                    let _ = participant_dispatch.handle_key_rotation(&json).await;
                }
                Kind::Chat => {
                    if let Ok(message) = participant_dispatch.handle_chat(&json).await {
                        let _ = chat_tx.send(message);
                    }
                }
                Kind::Answer => unreachable!(),
            }
        }
    });

    let initiator_dispatch = Arc::clone(&initiator);
    tokio::spawn(async move {
        while let Some((kind, json)) = rx_to_initiator.recv().await {
            match kind {
                Kind::Answer => {
                    let _ = initiator_dispatch.handle_key_answer(&json).await;
                }
                Kind::Rotation => {
                    let _ = initiator_dispatch.handle_key_rotation(&json).await;
                }
                Kind::Chat => {}
                Kind::Offer => unreachable!(),
            }
        }
    });

    initiator.start().await;
    participant.start().await;
    timeout(Duration::from_secs(2), wait_for_active(&initiator)).await.unwrap();
    timeout(Duration::from_secs(2), wait_for_active(&participant)).await.unwrap();

    // Wait for at least one rotation to land on both sides (handshake
    // completes at generation 1, so a landed rotation means >= 2).
    for _ in 0..200 {
        if initiator.generation() >= 2 && participant.generation() >= 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(initiator.generation() >= 2);
    assert!(participant.generation() >= 2);

    initiator.send_chat(b"still here after rotation").await.unwrap();
    let received = timeout(Duration::from_secs(1), chat_rx.recv()).await.unwrap().unwrap();
    assert_eq!(received.plaintext, b"still here after rotation");
    assert!(received.verified);
}

#[tokio::test]
async fn unsupported_platform_still_constructs_but_reports_status() {
    let (tx_to_participant, _rx) = mpsc::unbounded_channel();
    let controller = SessionController::new(
        exchange::Role::Initiator,
        "room-1",
        "participant",
        Arc::new(ChannelTransport { tx: tx_to_participant }),
        Arc::new(FixedVariant(None)),
        fast_config(),
    );
    assert_eq!(controller.status().await, SessionStatus::Unsupported);
}
