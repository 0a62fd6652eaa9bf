use crate::envelope::{CommandRequest, SignedEnvelope};
use crate::error::GateError;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use ed25519_dalek::{Signer, SigningKey};
use serde_json::Value;
use std::path::Path;

pub const SEED_LEN: usize = 32;

/// Ed25519 envelope signer.
///
/// Only trusted local callers should hold one; the service exposes it solely when
/// local signing is explicitly enabled.
#[derive(Clone)]
pub struct EnvelopeSigner {
    key: SigningKey,
}

impl std::fmt::Debug for EnvelopeSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnvelopeSigner")
            .field("public_key", &self.public_key_base64())
            .finish()
    }
}

impl EnvelopeSigner {
    pub fn from_seed(seed: &[u8]) -> Result<Self, GateError> {
        let seed: [u8; SEED_LEN] = seed.try_into().map_err(|_| {
            GateError::KeyLoad(format!(
                "expected {} byte seed, got {} bytes",
                SEED_LEN,
                seed.len()
            ))
        })?;
        Ok(Self {
            key: SigningKey::from_bytes(&seed),
        })
    }

    pub fn from_base64(encoded: &str) -> Result<Self, GateError> {
        let bytes = STANDARD
            .decode(encoded.trim())
            .map_err(|e| GateError::KeyLoad(format!("seed is not valid base64: {e}")))?;
        Self::from_seed(&bytes)
    }

    /// Load a base64 seed from a key file.
    pub fn from_key_file(path: &Path) -> Result<Self, GateError> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            GateError::KeyLoad(format!("failed to read key file {}: {e}", path.display()))
        })?;
        Self::from_base64(&contents)
    }

    pub fn public_key_base64(&self) -> String {
        STANDARD.encode(self.key.verifying_key().as_bytes())
    }

    /// Detached signature over the envelope's canonical encoding.
    pub fn sign(&self, envelope: &SignedEnvelope) -> [u8; 64] {
        self.sign_bytes(envelope.encode().as_bytes())
    }

    pub fn sign_bytes(&self, msg: &[u8]) -> [u8; 64] {
        self.key.sign(msg).to_bytes()
    }

    /// Build a ready-to-submit request for `action` stamped with the current time.
    pub fn sign_command(&self, action: &str, params: Value) -> CommandRequest {
        self.sign_envelope(&SignedEnvelope::new(action, params))
    }

    pub fn sign_envelope(&self, envelope: &SignedEnvelope) -> CommandRequest {
        let msg = envelope.encode();
        let sig = self.sign_bytes(msg.as_bytes());
        CommandRequest::new(msg, STANDARD.encode(sig), self.public_key_base64())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn rejects_seed_of_wrong_length() {
        let err = EnvelopeSigner::from_seed(&[1u8; 31]).unwrap_err();
        assert_eq!(err.code(), "KEY_LOAD_ERROR");
        assert!(EnvelopeSigner::from_seed(&[1u8; 64]).is_err());
        assert!(EnvelopeSigner::from_base64("%%%").is_err());
    }

    #[test]
    fn signed_request_carries_canonical_message() {
        let signer = EnvelopeSigner::from_seed(&[9u8; 32]).unwrap();
        let request = signer.sign_command("list-notes", json!({}));
        let msg = request.msg.clone().unwrap();
        let envelope = SignedEnvelope::decode(&msg).unwrap();
        assert_eq!(envelope.encode(), msg);
        assert_eq!(STANDARD.decode(request.sig.unwrap()).unwrap().len(), 64);
        assert_eq!(
            STANDARD.decode(request.public_key.unwrap()).unwrap().len(),
            32
        );
    }

    #[test]
    fn loads_seed_from_key_file() {
        let path = std::env::temp_dir().join(format!("notegate-key-{}", uuid::Uuid::new_v4()));
        std::fs::write(&path, format!("{}\n", STANDARD.encode([3u8; 32]))).unwrap();
        let signer = EnvelopeSigner::from_key_file(&path).unwrap();
        let expected = EnvelopeSigner::from_seed(&[3u8; 32]).unwrap();
        assert_eq!(signer.public_key_base64(), expected.public_key_base64());
        std::fs::remove_file(path).ok();

        let missing = std::env::temp_dir().join("notegate-key-does-not-exist");
        assert!(EnvelopeSigner::from_key_file(&missing).is_err());
    }
}
