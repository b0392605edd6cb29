//! The key-exchange message wire format. One JSON object per message,
//! internally tagged on `type`, carried over whatever signalling channel
//! the host application already has open.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};

use crate::error::{ExchangeError, Result};

/// Shared body of `keyOffer`/`keyAnswer`/`keyRotation` — the three message
/// kinds differ only in which party sends them and when, not in shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExchangePayload {
    pub public_key: String,
    pub fingerprint: String,
    pub signature: String,
    pub generation: u64,
    pub timestamp: i64,
    pub nonce: String,
    pub signing_public_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum KeyExchangeMessage {
    #[serde(rename = "keyOffer")]
    KeyOffer(ExchangePayload),
    #[serde(rename = "keyAnswer")]
    KeyAnswer(ExchangePayload),
    #[serde(rename = "keyRotation")]
    KeyRotation(ExchangePayload),
}

impl KeyExchangeMessage {
    pub fn payload(&self) -> &ExchangePayload {
        match self {
            KeyExchangeMessage::KeyOffer(p)
            | KeyExchangeMessage::KeyAnswer(p)
            | KeyExchangeMessage::KeyRotation(p) => p,
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).expect("KeyExchangeMessage always serialises")
    }

    /// Deserialise and run strict field-level validation before handing the
    /// message back — a structurally valid but semantically bogus field
    /// (wrong-length hex, non-canonical base64) is rejected here rather
    /// than deeper in the state machine.
    pub fn from_json(json: &str) -> Result<Self> {
        let message: KeyExchangeMessage = serde_json::from_str(json)
            .map_err(|e| ExchangeError::InvalidMessage(e.to_string()))?;
        message.validate()?;
        Ok(message)
    }

    fn validate(&self) -> Result<()> {
        let payload = self.payload();

        let public_key = decode_base64(&payload.public_key, "publicKey")?;
        if public_key.len() != 65 {
            return Err(ExchangeError::InvalidMessage(format!(
                "publicKey must decode to 65 bytes (uncompressed P-256 point), got {}",
                public_key.len()
            )));
        }

        let signing_public_key = decode_base64(&payload.signing_public_key, "signingPublicKey")?;
        if signing_public_key.len() != 65 {
            return Err(ExchangeError::InvalidMessage(format!(
                "signingPublicKey must decode to 65 bytes, got {}",
                signing_public_key.len()
            )));
        }

        let signature = decode_base64(&payload.signature, "signature")?;
        if signature.is_empty() || signature.len() > 150 {
            return Err(ExchangeError::InvalidMessage(
                "signature outside plausible DER length bounds".into(),
            ));
        }

        if payload.fingerprint.len() != 64 || !is_lowercase_hex(&payload.fingerprint) {
            return Err(ExchangeError::InvalidMessage(
                "fingerprint must be 64 lowercase hex characters".into(),
            ));
        }

        if payload.nonce.len() != 32 || !is_lowercase_hex(&payload.nonce) {
            return Err(ExchangeError::InvalidMessage(
                "nonce must be 32 lowercase hex characters".into(),
            ));
        }

        if payload.timestamp <= 0 {
            return Err(ExchangeError::InvalidMessage(
                "timestamp must be a positive epoch millisecond value".into(),
            ));
        }

        Ok(())
    }
}

fn decode_base64(field: &str, name: &'static str) -> Result<Vec<u8>> {
    STANDARD
        .decode(field)
        .map_err(|_| ExchangeError::InvalidMessage(format!("{name} is not valid base64")))
}

fn is_lowercase_hex(s: &str) -> bool {
    s.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

/// The exact string signed over a handshake message: `publicKey : fingerprint
/// : nonce`. Binding the fingerprint (rather than signing the public key
/// alone) means a tampered key and a tampered fingerprint both fail
/// verification independently.
pub fn handshake_canonical_string(public_key_b64: &str, fingerprint_hex: &str, nonce_hex: &str) -> String {
    format!("{public_key_b64} : {fingerprint_hex} : {nonce_hex}")
}

/// The rotation variant additionally binds the new generation number, so a
/// replayed rotation message from an earlier generation cannot be relabelled.
pub fn rotation_canonical_string(
    public_key_b64: &str,
    fingerprint_hex: &str,
    nonce_hex: &str,
    generation: u64,
) -> String {
    format!("{public_key_b64} : {fingerprint_hex} : {nonce_hex} : {generation}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_payload() -> ExchangePayload {
        ExchangePayload {
            public_key: STANDARD.encode([4u8; 65]),
            fingerprint: "a".repeat(64),
            signature: STANDARD.encode([1u8; 70]),
            generation: 0,
            timestamp: 1,
            nonce: "b".repeat(32),
            signing_public_key: STANDARD.encode([4u8; 65]),
        }
    }

    #[test]
    fn round_trips_through_json() {
        let message = KeyExchangeMessage::KeyOffer(sample_payload());
        let json = message.to_json();
        assert!(json.contains("\"type\":\"keyOffer\""));
        let parsed = KeyExchangeMessage::from_json(&json).unwrap();
        assert_eq!(parsed.payload().nonce, sample_payload().nonce);
    }

    #[test]
    fn unknown_extra_fields_are_ignored() {
        let mut payload = serde_json::to_value(sample_payload()).unwrap();
        payload["type"] = serde_json::json!("keyAnswer");
        payload["somethingElse"] = serde_json::json!("ignored");
        let json = payload.to_string();
        assert!(KeyExchangeMessage::from_json(&json).is_ok());
    }

    #[test]
    fn wrong_length_fingerprint_is_rejected() {
        let mut payload = sample_payload();
        payload.fingerprint = "short".into();
        let message = KeyExchangeMessage::KeyRotation(payload);
        let err = KeyExchangeMessage::from_json(&message.to_json()).unwrap_err();
        assert!(matches!(err, ExchangeError::InvalidMessage(_)));
    }

    #[test]
    fn non_base64_public_key_is_rejected() {
        let mut payload = sample_payload();
        payload.public_key = "not base64 !!".into();
        let message = KeyExchangeMessage::KeyOffer(payload);
        let err = KeyExchangeMessage::from_json(&message.to_json()).unwrap_err();
        assert!(matches!(err, ExchangeError::InvalidMessage(_)));
    }
}
