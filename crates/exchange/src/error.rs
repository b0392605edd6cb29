use thiserror::Error;

use crate::transport::TransportError;

/// Errors raised by the key-exchange state machine. Verification and
/// timeout failures during the *initial handshake* are terminal for that
/// handshake and surfaced to the caller; the same failures during a
/// *rotation* are logged and dropped by the manager rather than raised here
/// (the previous generation's key stays active).
#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error("key-exchange message failed signature or nonce verification")]
    VerificationFailed,

    #[error("no answer received after {0} attempts")]
    HandshakeTimeout(u32),

    #[error("malformed key-exchange message: {0}")]
    InvalidMessage(String),

    #[error("signalling transport call failed: {0}")]
    SignallingFailure(String),

    #[error("rotate_keys() called on a non-initiator session")]
    NotInitiator,
}

impl From<TransportError> for ExchangeError {
    fn from(err: TransportError) -> Self {
        ExchangeError::SignallingFailure(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ExchangeError>;
