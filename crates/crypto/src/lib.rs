use thiserror::Error;

pub mod capability;
pub mod frame_codec;
pub mod key_agreement;
pub mod signature;

pub use frame_codec::AesGcmFrameCodec;
pub use key_agreement::{EcdhKeyPair, KeyMaterial};
pub use signature::SigningKeyPair;

/// Errors shared by every crypto primitive in this crate. Per-operation
/// detail lives in the variant; callers match on it instead of downcasting
/// a boxed error.
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("frame codec has no key installed")]
    NotInitialised,
    #[error("ciphertext shorter than IV + tag ({min} bytes required, got {got})")]
    TooShort { min: usize, got: usize },
    #[error("AEAD authentication failed (wrong key, corrupted IV, or tampering)")]
    AuthFailure,
    #[error("underlying AEAD primitive returned an error")]
    CryptoFailure,
    #[error("invalid peer public key encoding")]
    InvalidPublicKey,
    #[error("invalid signature encoding")]
    InvalidSignature,
    #[error("HKDF expand failed for context {0:?}")]
    KdfExpandFailed(&'static str),
    #[error("key material has unexpected length: expected {expected}, got {got}")]
    BadKeyMaterialLength { expected: usize, got: usize },
}

pub type Result<T> = std::result::Result<T, CryptoError>;

/// 96-bit IV + 128-bit tag: every ciphertext produced by [`frame_codec`]
/// expands the plaintext by exactly this much.
pub const IV_LEN: usize = 12;
pub const TAG_LEN: usize = 16;
pub const FRAME_OVERHEAD: usize = IV_LEN + TAG_LEN;
