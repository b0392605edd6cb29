//! Encrypts and signs individual chat messages using the same shared
//! [`KeyMaterial`] and session-long signing key the handshake established,
//! verifying incoming messages against the peer's signing key learned from
//! that handshake.

use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use crypto::{AesGcmFrameCodec, KeyMaterial, SigningKeyPair};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Wire envelope for one encrypted chat message: `iv`/`ciphertext` are
/// base64, `signature` is DER+base64, `senderFingerprint` is 64 hex chars.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatEnvelope {
    pub iv: String,
    pub ciphertext: String,
    pub signature: String,
    pub sender_fingerprint: String,
}

impl ChatEnvelope {
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).expect("ChatEnvelope always serialises")
    }

    pub fn from_json(json: &str) -> Result<Self, ChatError> {
        serde_json::from_str(json).map_err(|e| ChatError::Malformed(e.to_string()))
    }
}

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("chat envelope is malformed: {0}")]
    Malformed(String),
    #[error("chat message failed to decrypt")]
    DecryptionFailed,
}

/// A verified incoming chat message. `verified` is `false` when the
/// signature did not check out against the peer's signing key; the
/// message is still surfaced to the caller, just flagged.
#[derive(Debug, Clone)]
pub struct DecryptedMessage {
    pub plaintext: Vec<u8>,
    pub sender_fingerprint: String,
    pub verified: bool,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ChatStats {
    pub messages_encrypted: u64,
    pub messages_decrypted: u64,
    pub verification_failures: u64,
}

/// No associated data is bound into chat frames — unlike media frames,
/// each chat message is its own independent AEAD unit with no generation
/// or kind to bind.
const CHAT_AAD: &[u8] = b"";

pub struct ChatCryptor {
    codec: AesGcmFrameCodec,
    signing: Arc<SigningKeyPair>,
    peer_signing_public_key: Vec<u8>,
    stats: std::sync::Mutex<ChatStats>,
}

impl ChatCryptor {
    /// `signing` is the same session-long keypair used to sign handshake
    /// messages; `peer_signing_public_key` is the raw SEC1 point learned
    /// from the verified handshake (`ExchangeEvent::Complete`).
    pub fn new(key_material: KeyMaterial, signing: Arc<SigningKeyPair>, peer_signing_public_key: Vec<u8>) -> Self {
        Self {
            codec: AesGcmFrameCodec::new(key_material),
            signing,
            peer_signing_public_key,
            stats: std::sync::Mutex::new(ChatStats::default()),
        }
    }

    pub fn peer_fingerprint_matches(&self, fingerprint: &str) -> bool {
        crypto::signature::sha256_hex(&self.peer_signing_public_key) == fingerprint
    }

    pub fn stats(&self) -> ChatStats {
        *self.stats.lock().expect("chat stats mutex poisoned")
    }

    pub fn encrypt(&self, plaintext: &[u8]) -> ChatEnvelope {
        let wire = self
            .codec
            .encrypt(plaintext, CHAT_AAD)
            .expect("AES-256-GCM encryption does not fail for well-formed input");
        let (iv, ciphertext) = wire.split_at(crypto::IV_LEN);
        let signature = self.signing.sign(ciphertext);
        let envelope = ChatEnvelope {
            iv: STANDARD.encode(iv),
            ciphertext: STANDARD.encode(ciphertext),
            signature: STANDARD.encode(signature),
            sender_fingerprint: self.signing.fingerprint(),
        };
        self.stats.lock().expect("chat stats mutex poisoned").messages_encrypted += 1;
        envelope
    }

    pub fn decrypt(&self, envelope: &ChatEnvelope) -> Result<DecryptedMessage, ChatError> {
        let iv = STANDARD
            .decode(&envelope.iv)
            .map_err(|_| ChatError::Malformed("iv not valid base64".into()))?;
        let ciphertext = STANDARD
            .decode(&envelope.ciphertext)
            .map_err(|_| ChatError::Malformed("ciphertext not valid base64".into()))?;
        let signature = STANDARD
            .decode(&envelope.signature)
            .map_err(|_| ChatError::Malformed("signature not valid base64".into()))?;

        let verified = crypto::verify(&ciphertext, &signature, &self.peer_signing_public_key).unwrap_or(false);
        if !verified {
            self.stats.lock().expect("chat stats mutex poisoned").verification_failures += 1;
        }

        let mut wire = Vec::with_capacity(iv.len() + ciphertext.len());
        wire.extend_from_slice(&iv);
        wire.extend_from_slice(&ciphertext);
        let plaintext = self.codec.decrypt(&wire, CHAT_AAD).map_err(|_| ChatError::DecryptionFailed)?;

        self.stats.lock().expect("chat stats mutex poisoned").messages_decrypted += 1;
        Ok(DecryptedMessage {
            plaintext,
            sender_fingerprint: envelope.sender_fingerprint.clone(),
            verified,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crypto::EcdhKeyPair;

    fn cryptor_pair() -> (ChatCryptor, ChatCryptor) {
        let alice_ecdh = EcdhKeyPair::generate();
        let bob_ecdh = EcdhKeyPair::generate();
        let alice_pub = alice_ecdh.public_key_bytes();
        let bob_pub = bob_ecdh.public_key_bytes();
        let alice_key = alice_ecdh.derive(&bob_pub, 0, "bob".into()).unwrap();
        let bob_key = bob_ecdh.derive(&alice_pub, 0, "alice".into()).unwrap();

        let alice_signing = Arc::new(SigningKeyPair::generate());
        let bob_signing = Arc::new(SigningKeyPair::generate());

        let alice = ChatCryptor::new(alice_key, Arc::clone(&alice_signing), bob_signing.export_public());
        let bob = ChatCryptor::new(bob_key, bob_signing, alice_signing.export_public());
        (alice, bob)
    }

    #[test]
    fn round_trip_is_verified() {
        let (alice, bob) = cryptor_pair();
        let envelope = alice.encrypt(b"hey bob");
        let message = bob.decrypt(&envelope).unwrap();
        assert_eq!(message.plaintext, b"hey bob");
        assert!(message.verified);
        assert_eq!(alice.stats().messages_encrypted, 1);
        assert_eq!(bob.stats().messages_decrypted, 1);
    }

    #[test]
    fn tampered_ciphertext_fails_both_verification_and_decryption() {
        let (alice, bob) = cryptor_pair();
        let mut envelope = alice.encrypt(b"hey bob");
        let mut ciphertext = STANDARD.decode(&envelope.ciphertext).unwrap();
        ciphertext[0] ^= 0xff;
        envelope.ciphertext = STANDARD.encode(ciphertext);

        let err = bob.decrypt(&envelope).unwrap_err();
        assert!(matches!(err, ChatError::DecryptionFailed));
        assert_eq!(bob.stats().verification_failures, 1);
    }

    #[test]
    fn wrong_peer_signing_key_surfaces_unverified_but_still_decrypts() {
        let alice_ecdh = EcdhKeyPair::generate();
        let bob_ecdh = EcdhKeyPair::generate();
        let alice_pub = alice_ecdh.public_key_bytes();
        let bob_pub = bob_ecdh.public_key_bytes();
        let alice_key = alice_ecdh.derive(&bob_pub, 0, "bob".into()).unwrap();
        let bob_key = bob_ecdh.derive(&alice_pub, 0, "alice".into()).unwrap();

        let alice_signing = Arc::new(SigningKeyPair::generate());
        let bob_signing = Arc::new(SigningKeyPair::generate());
        // Bob is pinned to the wrong signing key for Alice — the AES key
        // still matches, so decryption succeeds, but the signature won't
        // verify against the wrong public key.
        let impostor_signing_key = SigningKeyPair::generate().export_public();

        let alice = ChatCryptor::new(alice_key, alice_signing, bob_signing.export_public());
        let bob = ChatCryptor::new(bob_key, bob_signing, impostor_signing_key);

        let envelope = alice.encrypt(b"hey bob");
        let message = bob.decrypt(&envelope).unwrap();
        assert_eq!(message.plaintext, b"hey bob");
        assert!(!message.verified);
        assert_eq!(bob.stats().verification_failures, 1);
    }
}
