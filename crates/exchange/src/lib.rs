//! The handshake and rotation protocol
//! layered on top of whatever signalling channel the host application
//! already has open. See [`manager::KeyExchangeManager`] for the entry
//! point.

pub mod config;
pub mod error;
pub mod events;
pub mod manager;
pub mod message;
pub mod nonce_table;
pub mod role;
pub mod rotation;
pub mod state;
pub mod transport;

pub use config::ExchangeConfig;
pub use error::{ExchangeError, Result};
pub use events::ExchangeEvent;
pub use manager::KeyExchangeManager;
pub use message::{ExchangePayload, KeyExchangeMessage};
pub use role::Role;
pub use state::ExchangeState;
pub use transport::{SignallingTransport, TransportError};
