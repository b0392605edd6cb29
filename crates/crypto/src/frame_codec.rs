//! Frame codec: AES-256-GCM encrypt/decrypt of one media frame, with a
//! fresh random 96-bit IV per call. Stateless beyond the current
//! [`KeyMaterial`] — see `pipeline` for how the active codec is swapped out
//! atomically across a rotation.

use crate::{CryptoError, KeyMaterial, Result, IV_LEN, TAG_LEN};
use aes_gcm::aead::{Aead, Payload};
use aes_gcm::{Aes256Gcm, KeyInit, Nonce};
use rand::{rngs::OsRng, RngCore};

/// Encrypts/decrypts frames under one [`KeyMaterial`]. A new codec is built
/// per generation; the pipeline adapter swaps the active codec rather than
/// mutating one in place, so a frame mid-flight always finishes under the
/// key it started with.
pub struct AesGcmFrameCodec {
    key_material: KeyMaterial,
    cipher: Aes256Gcm,
}

impl AesGcmFrameCodec {
    pub fn new(key_material: KeyMaterial) -> Self {
        let cipher = Aes256Gcm::new_from_slice(key_material.key_bytes())
            .expect("KeyMaterial always carries a 32-byte key");
        Self { key_material, cipher }
    }

    pub fn generation(&self) -> u64 {
        self.key_material.generation
    }

    pub fn key_material(&self) -> &KeyMaterial {
        &self.key_material
    }

    /// Encrypt one frame. `aad` binds associated data — the pipeline
    /// adapter passes `generation || kind` — that is authenticated but not
    /// encrypted. Returns `IV(12) ‖ ciphertext ‖ tag(16)`; a zero-length frame is legal
    /// and yields exactly [`crate::FRAME_OVERHEAD`] bytes.
    pub fn encrypt(&self, frame: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
        let mut iv = [0u8; IV_LEN];
        OsRng.fill_bytes(&mut iv);
        let nonce = Nonce::from_slice(&iv);

        let ciphertext = self
            .cipher
            .encrypt(nonce, Payload { msg: frame, aad })
            .map_err(|_| CryptoError::CryptoFailure)?;

        let mut wire = Vec::with_capacity(IV_LEN + ciphertext.len());
        wire.extend_from_slice(&iv);
        wire.extend_from_slice(&ciphertext);
        Ok(wire)
    }

    /// Decrypt a wire-format frame. Rejects anything shorter than
    /// `IV_LEN + TAG_LEN` as malformed before touching the AEAD.
    pub fn decrypt(&self, wire: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
        if wire.len() < IV_LEN + TAG_LEN {
            return Err(CryptoError::TooShort {
                min: IV_LEN + TAG_LEN,
                got: wire.len(),
            });
        }
        let (iv, ciphertext) = wire.split_at(IV_LEN);
        let nonce = Nonce::from_slice(iv);

        self.cipher
            .decrypt(nonce, Payload { msg: ciphertext, aad })
            .map_err(|_| CryptoError::AuthFailure)
    }
}
