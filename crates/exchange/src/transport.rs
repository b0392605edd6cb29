use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("signalling channel send failed: {0}")]
    Failed(String),
}

/// The ordinary signalling/chat channel the pipeline is layered on top of.
/// Negotiating and maintaining this channel is out of scope here;
/// implementors just need to get a JSON string to the named peer.
///
/// `async_trait` is used rather than a plain `async fn` in the trait so that
/// this can be stored as a `dyn SignallingTransport` — the manager holds one
/// trait object rather than being generic over the concrete transport.
#[async_trait]
pub trait SignallingTransport: Send + Sync {
    async fn send_key_offer(&self, room_id: &str, peer_id: &str, json: String) -> Result<(), TransportError>;
    async fn send_key_answer(&self, room_id: &str, peer_id: &str, json: String) -> Result<(), TransportError>;
    async fn send_key_rotation(&self, room_id: &str, peer_id: &str, json: String) -> Result<(), TransportError>;
    async fn send_chat(&self, room_id: &str, peer_id: &str, json: String) -> Result<(), TransportError>;
}
