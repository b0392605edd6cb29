//! Wires the key-exchange state machine, the frame pipeline adapter, and
//! the chat cryptor into one lifecycle, owning the session-long signing
//! key they share. See [`controller::SessionController`].

pub mod config;
pub mod controller;
pub mod error;
pub mod status;

pub use config::SessionConfig;
pub use controller::SessionController;
pub use error::{Result, SessionError};
pub use status::SessionStatus;
