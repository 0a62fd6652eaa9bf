use crate::envelope::{fingerprint, CommandRequest, SignedEnvelope};
use crate::error::GateError;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, warn};

/// Result of the non-mutating signature check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureCheck {
    pub valid: bool,
    pub authorized: bool,
}

/// A request that passed every check.
#[derive(Debug, Clone)]
pub struct VerifiedCommand {
    pub envelope: SignedEnvelope,
    pub public_key: String,
    pub fingerprint: String,
}

/// Signature, allow-list and freshness gate for signed commands.
pub struct CommandAuthority {
    allowed: BTreeSet<[u8; 32]>,
    freshness_window: Duration,
    replay: Option<ReplayGuard>,
}

impl CommandAuthority {
    /// Build from base64 public keys. A key that does not decode to 32 bytes is a
    /// configuration error; an empty list enables open mode.
    pub fn new(authorized_keys: &[String], freshness_window: Duration) -> Result<Self, GateError> {
        let mut allowed = BTreeSet::new();
        for key in authorized_keys {
            let bytes = decode_fixed::<32>(key).ok_or_else(|| {
                GateError::Config(format!("authorized key '{}' is not a base64 Ed25519 key", key))
            })?;
            VerifyingKey::from_bytes(&bytes).map_err(|_| {
                GateError::Config(format!("authorized key '{}' is not a valid curve point", key))
            })?;
            allowed.insert(bytes);
        }

        if allowed.is_empty() {
            warn!(
                "authorized key list is empty: open mode accepts any valid signature; \
                 configure authorized keys before exposing this gateway"
            );
        }

        Ok(Self {
            allowed,
            freshness_window,
            replay: None,
        })
    }

    /// Remember accepted envelopes for twice the freshness window and reject repeats.
    pub fn with_replay_protection(mut self) -> Self {
        self.replay = Some(ReplayGuard::new(self.freshness_window * 2));
        self
    }

    pub fn open_mode(&self) -> bool {
        self.allowed.is_empty()
    }

    pub fn freshness_window(&self) -> Duration {
        self.freshness_window
    }

    /// Check signature and allow-list membership without touching any state.
    pub fn verify_signature(&self, request: &CommandRequest) -> SignatureCheck {
        let (Some(msg), Some(sig), Some(public_key)) = (
            request.msg.as_deref(),
            request.sig.as_deref(),
            request.public_key.as_deref(),
        ) else {
            return SignatureCheck {
                valid: false,
                authorized: false,
            };
        };

        let valid = signature_valid(msg, sig, public_key);
        SignatureCheck {
            valid,
            authorized: valid && self.is_authorized(public_key),
        }
    }

    pub fn process_signed_command(
        &self,
        request: &CommandRequest,
    ) -> Result<VerifiedCommand, GateError> {
        self.process_signed_command_at(request, chrono::Utc::now().timestamp())
    }

    /// Run every check in order, stopping at the first failure:
    /// missing fields, signature, authorization, envelope parse, envelope fields,
    /// freshness, and the replay ledger when enabled.
    pub fn process_signed_command_at(
        &self,
        request: &CommandRequest,
        now: i64,
    ) -> Result<VerifiedCommand, GateError> {
        let missing = request.missing_fields();
        if !missing.is_empty() {
            return Err(GateError::MissingFields(missing.join(", ")));
        }
        let msg = request.msg.as_deref().unwrap_or_default();
        let sig = request.sig.as_deref().unwrap_or_default();
        let public_key = request.public_key.as_deref().unwrap_or_default();
        let fingerprint = fingerprint(msg);

        if !signature_valid(msg, sig, public_key) {
            debug!(fingerprint = %fingerprint, "rejected envelope with invalid signature");
            return Err(GateError::Signature);
        }

        if !self.is_authorized(public_key) {
            warn!(fingerprint = %fingerprint, "rejected envelope signed by unlisted key");
            return Err(GateError::Authorization);
        }
        if self.open_mode() {
            debug!(fingerprint = %fingerprint, "accepting envelope in open mode");
        }

        let envelope = SignedEnvelope::decode(msg)?;
        self.check_freshness(envelope.timestamp, now)?;

        if let Some(replay) = &self.replay {
            replay.check_and_record(msg, now)?;
        }

        Ok(VerifiedCommand {
            envelope,
            public_key: public_key.to_string(),
            fingerprint,
        })
    }

    /// `|now - timestamp| <= window`, inclusive on both sides.
    pub fn check_freshness(&self, timestamp: i64, now: i64) -> Result<(), GateError> {
        let window = self.freshness_window.as_secs() as i64;
        let skew = now.saturating_sub(timestamp);
        if skew > window {
            return Err(GateError::Timestamp(format!(
                "envelope is {} seconds old, window is {} seconds",
                skew, window
            )));
        }
        if -skew > window {
            return Err(GateError::Timestamp(format!(
                "envelope is {} seconds in the future, window is {} seconds",
                -skew, window
            )));
        }
        Ok(())
    }

    fn is_authorized(&self, public_key: &str) -> bool {
        if self.allowed.is_empty() {
            return true;
        }
        decode_fixed::<32>(public_key)
            .map(|bytes| self.allowed.contains(&bytes))
            .unwrap_or(false)
    }
}

fn signature_valid(msg: &str, sig: &str, public_key: &str) -> bool {
    let Some(sig_bytes) = decode_fixed::<64>(sig) else {
        return false;
    };
    let Some(key_bytes) = decode_fixed::<32>(public_key) else {
        return false;
    };
    let Ok(verifying_key) = VerifyingKey::from_bytes(&key_bytes) else {
        return false;
    };
    let signature = Signature::from_bytes(&sig_bytes);
    verifying_key.verify(msg.as_bytes(), &signature).is_ok()
}

fn decode_fixed<const N: usize>(encoded: &str) -> Option<[u8; N]> {
    let bytes = STANDARD.decode(encoded.trim()).ok()?;
    bytes.as_slice().try_into().ok()
}

/// Bounded memory of accepted messages, keyed by BLAKE3 digest.
struct ReplayGuard {
    retention: i64,
    seen: Mutex<HashMap<[u8; 32], i64>>,
}

impl ReplayGuard {
    fn new(retention: Duration) -> Self {
        Self {
            retention: retention.as_secs() as i64,
            seen: Mutex::new(HashMap::new()),
        }
    }

    fn check_and_record(&self, msg: &str, now: i64) -> Result<(), GateError> {
        let digest = *blake3::hash(msg.as_bytes()).as_bytes();
        let mut seen = self
            .seen
            .lock()
            .map_err(|_| GateError::Config("replay ledger lock poisoned".to_string()))?;
        let horizon = now - self.retention;
        seen.retain(|_, accepted_at| *accepted_at >= horizon);

        if seen.contains_key(&digest) {
            warn!(fingerprint = %fingerprint(msg), "rejected replayed envelope");
            return Err(GateError::Replay);
        }
        seen.insert(digest, now);
        Ok(())
    }
}
