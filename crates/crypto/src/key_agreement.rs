//! Key agreement: ECDH P-256 keypair generation and
//! HKDF-backed derivation of the active AES-256-GCM [`KeyMaterial`].

use crate::{CryptoError, Result};
use chrono::{DateTime, Utc};
use hkdf::Hkdf;
use p256::ecdh::EphemeralSecret;
use p256::{EncodedPoint, PublicKey};
use rand::rngs::OsRng;
use sha2::Sha256;
use zeroize::Zeroize;

/// Context string folded into HKDF-expand so that media keys and any future
/// derivation from the same shared secret are cryptographically separated.
const MEDIA_KEY_INFO: &[u8] = b"e2ee-media-frame-key-v1";

/// Ephemeral ECDH keypair. One is generated per handshake/rotation and
/// consumed (moved) by [`EcdhKeyPair::derive`] — there is no way to derive
/// twice from the same keypair, matching "ephemeral per generation;
/// destroyed on cleanup or overwritten on rotation".
pub struct EcdhKeyPair {
    secret: EphemeralSecret,
    public: PublicKey,
}

impl EcdhKeyPair {
    pub fn generate() -> Self {
        let secret = EphemeralSecret::random(&mut OsRng);
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }

    /// Raw uncompressed SEC1 public point, as carried on the wire inside a
    /// Key-Exchange Message after base64 encoding.
    pub fn public_key_bytes(&self) -> Vec<u8> {
        EncodedPoint::from(self.public).as_bytes().to_vec()
    }

    /// SHA-256 fingerprint of the raw public key, lowercase hex.
    pub fn fingerprint(&self) -> String {
        crate::signature::sha256_hex(&self.public_key_bytes())
    }

    /// Consume this keypair and the peer's raw public key to derive the
    /// shared [`KeyMaterial`] for `generation`. Both peers must supply the
    /// same `generation` and the same HKDF context for the result to match.
    pub fn derive(
        self,
        peer_public_bytes: &[u8],
        generation: u64,
        peer_fingerprint: String,
    ) -> Result<KeyMaterial> {
        let peer_public = PublicKey::from_sec1_bytes(peer_public_bytes)
            .map_err(|_| CryptoError::InvalidPublicKey)?;

        let shared_secret = self.secret.diffie_hellman(&peer_public);

        let hk = Hkdf::<Sha256>::new(None, shared_secret.raw_secret_bytes());
        let mut key_bytes = [0u8; 32];
        hk.expand(MEDIA_KEY_INFO, &mut key_bytes)
            .map_err(|_| CryptoError::KdfExpandFailed("media-frame-key"))?;

        Ok(KeyMaterial::new(key_bytes, generation, peer_fingerprint))
    }
}

/// The currently active symmetric key; at most one is live at a time.
/// Holds the raw AES-256-GCM key rather than a constructed cipher object so
/// that it can be cheaply cloned and shipped to workers over an explicit
/// message-passing channel, each worker holding its own copy.
#[derive(Clone)]
pub struct KeyMaterial {
    key_bytes: [u8; 32],
    pub created_at: DateTime<Utc>,
    pub generation: u64,
    pub peer_fingerprint: String,
}

impl KeyMaterial {
    pub(crate) fn new(key_bytes: [u8; 32], generation: u64, peer_fingerprint: String) -> Self {
        Self {
            key_bytes,
            created_at: Utc::now(),
            generation,
            peer_fingerprint,
        }
    }

    /// Build a `KeyMaterial` from raw bytes handed off by a prior peer (used
    /// when transporting key material between the controller and a worker
    /// in the same process rather than across a real postMessage boundary).
    /// `key_bytes` must be exactly 32 bytes.
    pub fn from_parts(
        key_bytes: &[u8],
        generation: u64,
        peer_fingerprint: String,
    ) -> Result<Self> {
        let key_bytes: [u8; 32] = key_bytes.try_into().map_err(|_| CryptoError::BadKeyMaterialLength {
            expected: 32,
            got: key_bytes.len(),
        })?;
        Ok(Self::new(key_bytes, generation, peer_fingerprint))
    }

    pub fn key_bytes(&self) -> &[u8; 32] {
        &self.key_bytes
    }
}

impl std::fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("key_bytes", &"<redacted>")
            .field("created_at", &self.created_at)
            .field("generation", &self.generation)
            .field("peer_fingerprint", &self.peer_fingerprint)
            .finish()
    }
}

impl Drop for KeyMaterial {
    fn drop(&mut self) {
        self.key_bytes.zeroize();
    }
}
