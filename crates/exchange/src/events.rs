use crypto::KeyMaterial;

use crate::error::ExchangeError;

/// Pushed to the owner (the `session` crate) over an unbounded channel so
/// the manager's internal tasks never block waiting for the caller to drain
/// events.
#[derive(Debug)]
pub enum ExchangeEvent {
    /// The initial handshake completed; `key_material` is ready to install
    /// into the frame pipeline.
    Complete {
        generation: u64,
        key_material: KeyMaterial,
        peer_signing_public_key: Vec<u8>,
        peer_fingerprint: String,
    },
    /// A rotation completed; the pipeline should swap in `key_material` for
    /// `generation`.
    Rotated { generation: u64, key_material: KeyMaterial },
    /// A handshake-level failure. Rotation failures are not reported here —
    /// they degrade silently instead.
    Error(ExchangeError),
}
