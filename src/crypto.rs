//! Integrity primitives: payload checksums and record signatures.
//!
//! The indexer only consumes these through the [`IntegrityPrimitives`] trait.
//! [`Ed25519Primitives`] is the default implementation:
//! - checksum: lower-case hex SHA-256 of the canonical payload JSON
//!   (object keys sorted, no insignificant whitespace)
//! - signature: Ed25519 over `"{payloadChecksum}:{keyId}:{role}:{timestamp}"`,
//!   base64-encoded, verified against the signer's base64 public key

use crate::models::{Payload, RECORD_FORMAT_VERSION, RecordHeader, Signature, SignedRecord};
use crate::{Error, Result};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use ed25519_dalek::{Signer as _, SigningKey, Verifier as _, VerifyingKey};
use sha2::{Digest, Sha256};
use std::collections::HashMap;

/// Resolves an actor id to its base64-encoded public key.
pub trait KeyResolver {
    fn resolve_public_key(&self, actor_id: &str) -> Option<String>;
}

impl KeyResolver for HashMap<String, String> {
    fn resolve_public_key(&self, actor_id: &str) -> Option<String> {
        self.get(actor_id).cloned()
    }
}

/// Checksum and signature primitives used by the integrity validator.
pub trait IntegrityPrimitives: Send + Sync {
    /// Checksum of a payload.
    fn checksum(&self, payload: &serde_json::Value) -> Result<String>;

    /// Verify every signature in the header. Returns `false` if any signer
    /// cannot be resolved or any signature is invalid.
    fn verify_signatures(&self, header: &RecordHeader, resolver: &dyn KeyResolver) -> bool;
}

/// SHA-256 checksums and Ed25519 signatures.
#[derive(Debug, Clone, Copy, Default)]
pub struct Ed25519Primitives;

impl IntegrityPrimitives for Ed25519Primitives {
    fn checksum(&self, payload: &serde_json::Value) -> Result<String> {
        payload_checksum(payload)
    }

    fn verify_signatures(&self, header: &RecordHeader, resolver: &dyn KeyResolver) -> bool {
        header.signatures.iter().all(|sig| {
            resolver
                .resolve_public_key(&sig.key_id)
                .is_some_and(|key| verify_signature(&key, &header.payload_checksum, sig))
        })
    }
}

/// Hex SHA-256 of the canonical JSON form of `payload`.
///
/// `serde_json::Value` objects are backed by a sorted map, so serializing a
/// value yields keys in a stable order regardless of input order.
pub fn payload_checksum(payload: &serde_json::Value) -> Result<String> {
    let canonical = serde_json::to_vec(payload)?;
    let mut hasher = Sha256::new();
    hasher.update(&canonical);
    Ok(format!("{:x}", hasher.finalize()))
}

/// The message a signer commits to.
pub fn signing_message(payload_checksum: &str, key_id: &str, role: &str, timestamp: i64) -> String {
    format!("{}:{}:{}:{}", payload_checksum, key_id, role, timestamp)
}

/// Sign a payload checksum on behalf of `key_id`.
pub fn sign(
    signing_key: &SigningKey,
    payload_checksum: &str,
    key_id: &str,
    role: &str,
    timestamp: i64,
) -> Signature {
    let message = signing_message(payload_checksum, key_id, role, timestamp);
    let signature = signing_key.sign(message.as_bytes());
    Signature {
        key_id: key_id.to_string(),
        role: role.to_string(),
        notes: None,
        signature: STANDARD.encode(signature.to_bytes()),
        timestamp,
    }
}

/// Wrap a payload in a header with a fresh checksum and one signature.
pub fn sign_record<P: Payload + serde::Serialize>(
    payload: P,
    signing_key: &SigningKey,
    key_id: &str,
    role: &str,
    timestamp: i64,
) -> Result<SignedRecord<P>> {
    let checksum = payload_checksum(&serde_json::to_value(&payload)?)?;
    let signature = sign(signing_key, &checksum, key_id, role, timestamp);
    Ok(SignedRecord {
        header: RecordHeader {
            version: RECORD_FORMAT_VERSION.to_string(),
            kind: P::KIND,
            payload_checksum: checksum,
            signatures: vec![signature],
        },
        payload,
    })
}

/// Append a signature to an existing record (e.g., a reviewer sign-off).
pub fn add_signature<P>(
    record: &mut SignedRecord<P>,
    signing_key: &SigningKey,
    key_id: &str,
    role: &str,
    timestamp: i64,
) {
    let signature = sign(
        signing_key,
        &record.header.payload_checksum,
        key_id,
        role,
        timestamp,
    );
    record.header.signatures.push(signature);
}

/// Base64 encoding of a verifying key, as stored on actor records.
pub fn encode_public_key(key: &VerifyingKey) -> String {
    STANDARD.encode(key.to_bytes())
}

/// Decode a base64 public key.
pub fn decode_public_key(encoded: &str) -> Result<VerifyingKey> {
    let bytes = STANDARD
        .decode(encoded)
        .map_err(|e| Error::InvalidInput(format!("public key is not base64: {}", e)))?;
    let bytes: [u8; 32] = bytes
        .try_into()
        .map_err(|_| Error::InvalidInput("public key must be 32 bytes".to_string()))?;
    VerifyingKey::from_bytes(&bytes)
        .map_err(|e| Error::InvalidInput(format!("invalid public key: {}", e)))
}

/// Verify one signature against a base64 public key.
pub fn verify_signature(public_key: &str, payload_checksum: &str, sig: &Signature) -> bool {
    let Ok(key) = decode_public_key(public_key) else {
        return false;
    };
    let Ok(bytes) = STANDARD.decode(&sig.signature) else {
        return false;
    };
    let Ok(signature) = ed25519_dalek::Signature::try_from(bytes.as_slice()) else {
        return false;
    };
    let message = signing_message(payload_checksum, &sig.key_id, &sig.role, sig.timestamp);
    key.verify(message.as_bytes(), &signature).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RecordKind;
    use serde_json::json;

    fn key(seed: u8) -> SigningKey {
        SigningKey::from_bytes(&[seed; 32])
    }

    fn header_signed_by(signing_key: &SigningKey, key_id: &str) -> RecordHeader {
        let checksum = payload_checksum(&json!({"id": "x"})).unwrap();
        RecordHeader {
            version: "1.0".to_string(),
            kind: RecordKind::Task,
            signatures: vec![sign(signing_key, &checksum, key_id, "author", 1_700_000_000)],
            payload_checksum: checksum,
        }
    }

    #[test]
    fn test_checksum_ignores_key_order() {
        let a: serde_json::Value = serde_json::from_str(r#"{"b":1,"a":2}"#).unwrap();
        let b: serde_json::Value = serde_json::from_str(r#"{"a":2,"b":1}"#).unwrap();
        assert_eq!(payload_checksum(&a).unwrap(), payload_checksum(&b).unwrap());
        assert_eq!(payload_checksum(&a).unwrap().len(), 64);
    }

    #[test]
    fn test_checksum_changes_with_content() {
        let a = payload_checksum(&json!({"title": "a"})).unwrap();
        let b = payload_checksum(&json!({"title": "b"})).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_verify_valid_signature() {
        let signing_key = key(7);
        let header = header_signed_by(&signing_key, "human:alice");
        let mut keys = HashMap::new();
        keys.insert(
            "human:alice".to_string(),
            encode_public_key(&signing_key.verifying_key()),
        );

        assert!(Ed25519Primitives.verify_signatures(&header, &keys));
    }

    #[test]
    fn test_verify_rejects_unknown_signer() {
        let header = header_signed_by(&key(7), "human:alice");
        let keys: HashMap<String, String> = HashMap::new();
        assert!(!Ed25519Primitives.verify_signatures(&header, &keys));
    }

    #[test]
    fn test_verify_rejects_wrong_key() {
        let header = header_signed_by(&key(7), "human:alice");
        let mut keys = HashMap::new();
        keys.insert(
            "human:alice".to_string(),
            encode_public_key(&key(8).verifying_key()),
        );
        assert!(!Ed25519Primitives.verify_signatures(&header, &keys));
    }

    #[test]
    fn test_verify_rejects_changed_checksum() {
        let signing_key = key(7);
        let mut header = header_signed_by(&signing_key, "human:alice");
        header.payload_checksum = "0".repeat(64);
        let mut keys = HashMap::new();
        keys.insert(
            "human:alice".to_string(),
            encode_public_key(&signing_key.verifying_key()),
        );
        assert!(!Ed25519Primitives.verify_signatures(&header, &keys));
    }

    #[test]
    fn test_decode_public_key_rejects_garbage() {
        assert!(decode_public_key("not base64!").is_err());
        assert!(decode_public_key(&STANDARD.encode([1u8; 5])).is_err());
    }
}
