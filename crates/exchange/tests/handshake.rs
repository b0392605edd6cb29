//! End-to-end handshake and rotation scenarios over an in-process loopback
//! transport — no real network, but real tokio tasks and real timers.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use exchange::{ExchangeConfig, ExchangeEvent, KeyExchangeManager, Role, SignallingTransport, TransportError};
use tokio::sync::mpsc;
use tokio::time::timeout;

#[derive(Clone, Copy, Debug)]
enum Kind {
    Offer,
    Answer,
    Rotation,
}

struct ChannelTransport {
    tx: mpsc::UnboundedSender<(Kind, String)>,
}

#[async_trait]
impl SignallingTransport for ChannelTransport {
    async fn send_key_offer(&self, _room_id: &str, _peer_id: &str, json: String) -> Result<(), TransportError> {
        self.tx
            .send((Kind::Offer, json))
            .map_err(|e| TransportError::Failed(e.to_string()))
    }

    async fn send_key_answer(&self, _room_id: &str, _peer_id: &str, json: String) -> Result<(), TransportError> {
        self.tx
            .send((Kind::Answer, json))
            .map_err(|e| TransportError::Failed(e.to_string()))
    }

    async fn send_key_rotation(&self, _room_id: &str, _peer_id: &str, json: String) -> Result<(), TransportError> {
        self.tx
            .send((Kind::Rotation, json))
            .map_err(|e| TransportError::Failed(e.to_string()))
    }

    async fn send_chat(&self, _room_id: &str, _peer_id: &str, _json: String) -> Result<(), TransportError> {
        Ok(())
    }
}

/// Durations small enough that a handshake/rotation completes in well under
/// a second of wall-clock test time, without changing the retry/backoff
/// shape the production defaults describe.
fn fast_config() -> ExchangeConfig {
    ExchangeConfig {
        stabilization_delay: Duration::from_millis(5),
        late_join_delay: Duration::from_millis(5),
        rotation_period: Duration::from_millis(40),
        rotation_response_timeout: Duration::from_millis(200),
        nonce_cleanup_interval: Duration::from_millis(50),
        ..ExchangeConfig::default()
    }
}

struct Harness {
    initiator: Arc<KeyExchangeManager>,
    participant: Arc<KeyExchangeManager>,
    initiator_events: mpsc::UnboundedReceiver<ExchangeEvent>,
    participant_events: mpsc::UnboundedReceiver<ExchangeEvent>,
}

fn wire_up(config: ExchangeConfig) -> Harness {
    let (tx_to_participant, mut rx_to_participant) = mpsc::unbounded_channel();
    let (tx_to_initiator, mut rx_to_initiator) = mpsc::unbounded_channel();

    let (initiator, initiator_events) = KeyExchangeManager::new(
        Role::Initiator,
        "room-1",
        "participant",
        Arc::new(ChannelTransport { tx: tx_to_participant }),
        Arc::new(crypto::SigningKeyPair::generate()),
        config.clone(),
    );
    let (participant, participant_events) = KeyExchangeManager::new(
        Role::Participant,
        "room-1",
        "initiator",
        Arc::new(ChannelTransport { tx: tx_to_initiator }),
        Arc::new(crypto::SigningKeyPair::generate()),
        config,
    );

    let participant_for_dispatch = Arc::clone(&participant);
    tokio::spawn(async move {
        while let Some((kind, json)) = rx_to_participant.recv().await {
            match kind {
                Kind::Offer => {
                    let _ = participant_for_dispatch.handle_key_offer(&json).await;
                }
                Kind::Rotation => {
                    let _ = participant_for_dispatch.handle_key_rotation(&json).await;
                }
                Kind::Answer => unreachable!("participant never receives a keyAnswer"),
            }
        }
    });

    let initiator_for_dispatch = Arc::clone(&initiator);
    tokio::spawn(async move {
        while let Some((kind, json)) = rx_to_initiator.recv().await {
            match kind {
                Kind::Answer => {
                    let _ = initiator_for_dispatch.handle_key_answer(&json).await;
                }
                Kind::Rotation => {
                    let _ = initiator_for_dispatch.handle_key_rotation(&json).await;
                }
                Kind::Offer => unreachable!("initiator never receives a keyOffer"),
            }
        }
    });

    Harness {
        initiator,
        participant,
        initiator_events,
        participant_events,
    }
}

#[tokio::test]
async fn both_sides_complete_with_matching_key_material() {
    let mut harness = wire_up(fast_config());
    harness.initiator.initialize().await;
    harness.participant.initialize().await;

    let initiator_event = timeout(Duration::from_secs(2), harness.initiator_events.recv())
        .await
        .expect("initiator did not complete in time")
        .unwrap();
    let participant_event = timeout(Duration::from_secs(2), harness.participant_events.recv())
        .await
        .expect("participant did not complete in time")
        .unwrap();

    let ExchangeEvent::Complete { key_material: initiator_key, generation: initiator_gen, .. } = initiator_event else {
        panic!("expected Complete on initiator, got {initiator_event:?}");
    };
    let ExchangeEvent::Complete { key_material: participant_key, generation: participant_gen, .. } = participant_event else {
        panic!("expected Complete on participant, got {participant_event:?}");
    };

    assert_eq!(initiator_gen, 1);
    assert_eq!(participant_gen, 1);
    assert_eq!(initiator_key.key_bytes(), participant_key.key_bytes());
}

#[tokio::test]
async fn periodic_rotation_advances_generation_on_both_sides() {
    let mut harness = wire_up(fast_config());
    harness.initiator.initialize().await;
    harness.participant.initialize().await;

    // Drain the initial Complete event on both sides.
    let _ = timeout(Duration::from_secs(2), harness.initiator_events.recv()).await.unwrap();
    let _ = timeout(Duration::from_secs(2), harness.participant_events.recv()).await.unwrap();

    let initiator_rotated = timeout(Duration::from_secs(2), harness.initiator_events.recv())
        .await
        .expect("initiator did not rotate in time")
        .unwrap();
    let participant_rotated = timeout(Duration::from_secs(2), harness.participant_events.recv())
        .await
        .expect("participant did not rotate in time")
        .unwrap();

    let ExchangeEvent::Rotated { generation: g1, key_material: k1 } = initiator_rotated else {
        panic!("expected Rotated on initiator, got {initiator_rotated:?}");
    };
    let ExchangeEvent::Rotated { generation: g2, key_material: k2 } = participant_rotated else {
        panic!("expected Rotated on participant, got {participant_rotated:?}");
    };

    assert_eq!(g1, 2);
    assert_eq!(g2, 2);
    assert_eq!(k1.key_bytes(), k2.key_bytes());
    assert_eq!(harness.initiator.generation().await, 2);
    assert_eq!(harness.participant.generation().await, 2);
}

#[tokio::test]
async fn participant_cannot_manually_rotate() {
    let harness = wire_up(fast_config());
    let err = harness.participant.rotate_keys().await.unwrap_err();
    assert!(matches!(err, exchange::ExchangeError::NotInitiator));
}
