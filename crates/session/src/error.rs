use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("frame transport does not support any known platform variant")]
    Unsupported,
    #[error("session is not active yet")]
    NotActive,
    #[error("key exchange error: {0}")]
    Exchange(#[from] exchange::ExchangeError),
    #[error("chat error: {0}")]
    Chat(#[from] chat::ChatError),
    #[error("signalling transport error: {0}")]
    Transport(#[from] exchange::TransportError),
}

pub type Result<T> = std::result::Result<T, SessionError>;
