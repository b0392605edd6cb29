//! ECDSA P-256/SHA-256 session signing key, plus the SHA-256 fingerprinting
//! used both for wire identity and the human-facing safety number.

use crate::{CryptoError, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use p256::ecdsa::signature::{Signer, Verifier};
use p256::ecdsa::{Signature, SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};

/// SHA-256 of `bytes`, lowercase hex — used for both ECDH and ECDSA public
/// key fingerprints.
pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Chunk a 64-character hex fingerprint into 4-character groups for display
/// as a human-verifiable safety number.
pub fn format_safety_number(fingerprint_hex: &str) -> String {
    fingerprint_hex
        .as_bytes()
        .chunks(4)
        .map(|chunk| std::str::from_utf8(chunk).expect("hex is ASCII"))
        .collect::<Vec<_>>()
        .join(" ")
}

/// The session-long ECDSA signing keypair. Generated once per session and
/// used to authenticate every key-exchange message and chat envelope for
/// that session's lifetime.
pub struct SigningKeyPair {
    signing_key: SigningKey,
    verifying_key: VerifyingKey,
    peer_verifying_key: Option<VerifyingKey>,
}

impl SigningKeyPair {
    pub fn generate() -> Self {
        let signing_key = SigningKey::random(&mut OsRng);
        let verifying_key = *signing_key.verifying_key();
        Self {
            signing_key,
            verifying_key,
            peer_verifying_key: None,
        }
    }

    /// Sign `data`, returning a DER-encoded ECDSA signature as carried on
    /// the wire.
    pub fn sign(&self, data: &[u8]) -> Vec<u8> {
        let signature: Signature = self.signing_key.sign(data);
        signature.to_der().as_bytes().to_vec()
    }

    /// Raw uncompressed SEC1 public key bytes.
    pub fn export_public(&self) -> Vec<u8> {
        self.verifying_key.to_encoded_point(false).as_bytes().to_vec()
    }

    pub fn export_public_base64(&self) -> String {
        STANDARD.encode(self.export_public())
    }

    /// SHA-256 fingerprint (hex) of this peer's own signing public key.
    pub fn fingerprint(&self) -> String {
        sha256_hex(&self.export_public())
    }

    /// Record the peer's signing public key, learned from the verified
    /// first message of a handshake. Stored so the session can survive
    /// reconnects where it lost prior state.
    pub fn import_peer_public(&mut self, bytes: &[u8]) -> Result<()> {
        let verifying_key =
            VerifyingKey::from_sec1_bytes(bytes).map_err(|_| CryptoError::InvalidPublicKey)?;
        self.peer_verifying_key = Some(verifying_key);
        Ok(())
    }

    /// Verify `data`/`signature_der` against the previously imported peer
    /// public key.
    pub fn verify_with_peer(&self, data: &[u8], signature_der: &[u8]) -> Result<bool> {
        let peer = self
            .peer_verifying_key
            .as_ref()
            .ok_or(CryptoError::InvalidPublicKey)?;
        verify_with_key(peer, data, signature_der)
    }

    pub fn peer_fingerprint(&self) -> Option<String> {
        self.peer_verifying_key
            .as_ref()
            .map(|vk| sha256_hex(&vk.to_encoded_point(false).as_bytes().to_vec()))
    }
}

/// Stateless verification against an arbitrary raw public key, matching the
/// distilled spec's `verify(bytes, sig, peer_public_key) -> bool` shape —
/// every Key-Exchange Message carries its own `signingPublicKey`, so the
/// exchange state machine verifies against the key in the message itself,
/// not necessarily one pinned ahead of time.
pub fn verify(data: &[u8], signature_der: &[u8], peer_public_key: &[u8]) -> Result<bool> {
    let verifying_key =
        VerifyingKey::from_sec1_bytes(peer_public_key).map_err(|_| CryptoError::InvalidPublicKey)?;
    verify_with_key(&verifying_key, data, signature_der)
}

fn verify_with_key(verifying_key: &VerifyingKey, data: &[u8], signature_der: &[u8]) -> Result<bool> {
    let signature = Signature::from_der(signature_der).map_err(|_| CryptoError::InvalidSignature)?;
    Ok(verifying_key.verify(data, &signature).is_ok())
}
