//! Signed command envelopes and their canonical encoding.
//!
//! The signature covers the canonical JSON text of `{action, nonce, params, timestamp}`:
//! compact, with object keys sorted at every depth. Signer and verifier therefore hash
//! identical bytes no matter how the envelope was assembled.

use crate::error::GateError;
use chrono::Utc;
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

const NONCE_LEN: usize = 16;
const ENVELOPE_FIELDS: [&str; 4] = ["action", "params", "timestamp", "nonce"];

/// Unit of authorization: what the caller asks for, and when.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignedEnvelope {
    pub action: String,
    pub params: Value,
    /// Unix seconds.
    pub timestamp: i64,
    pub nonce: String,
}

impl SignedEnvelope {
    pub fn new(action: impl Into<String>, params: Value) -> Self {
        Self::at(action, params, Utc::now().timestamp())
    }

    pub fn at(action: impl Into<String>, params: Value, timestamp: i64) -> Self {
        Self {
            action: action.into(),
            params,
            timestamp,
            nonce: random_nonce(),
        }
    }

    pub fn to_value(&self) -> Value {
        serde_json::json!({
            "action": self.action,
            "params": self.params,
            "timestamp": self.timestamp,
            "nonce": self.nonce,
        })
    }

    /// Canonical text the signature is computed over.
    pub fn encode(&self) -> String {
        canonical_json(&self.to_value())
    }

    /// Parse a received message.
    ///
    /// Non-JSON or mistyped input is an `Envelope` error; a well-formed object that
    /// lacks one of the four fields is an `EnvelopeFields` error.
    pub fn decode(msg: &str) -> Result<Self, GateError> {
        let value: Value = serde_json::from_str(msg)
            .map_err(|_| GateError::Envelope("message is not valid JSON".to_string()))?;
        let Value::Object(mut map) = value else {
            return Err(GateError::Envelope(
                "message must be a JSON object".to_string(),
            ));
        };

        if let Some(unexpected) = map
            .keys()
            .find(|key| !ENVELOPE_FIELDS.contains(&key.as_str()))
        {
            return Err(GateError::Envelope(format!(
                "unexpected field '{}'",
                unexpected
            )));
        }

        let missing: Vec<&str> = ENVELOPE_FIELDS
            .iter()
            .copied()
            .filter(|field| map.get(*field).map(Value::is_null).unwrap_or(true))
            .collect();
        if !missing.is_empty() {
            return Err(GateError::EnvelopeFields(missing.join(", ")));
        }

        let action = take_string(&mut map, "action")?;
        let nonce = take_string(&mut map, "nonce")?;
        let timestamp = map
            .get("timestamp")
            .and_then(Value::as_i64)
            .ok_or_else(|| GateError::Envelope("field 'timestamp' must be an integer".into()))?;
        let params = map.remove("params").unwrap_or(Value::Null);

        Ok(Self {
            action,
            params,
            timestamp,
            nonce,
        })
    }
}

/// Wire form of a signed command. Fields are optional so absence can be reported.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandRequest {
    #[serde(default)]
    pub msg: Option<String>,
    #[serde(default)]
    pub sig: Option<String>,
    #[serde(default, rename = "publicKey", alias = "public_key")]
    pub public_key: Option<String>,
}

impl CommandRequest {
    pub fn new(msg: String, sig: String, public_key: String) -> Self {
        Self {
            msg: Some(msg),
            sig: Some(sig),
            public_key: Some(public_key),
        }
    }

    /// Names of absent or blank fields, in wire order.
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        for (name, value) in [
            ("msg", &self.msg),
            ("sig", &self.sig),
            ("publicKey", &self.public_key),
        ] {
            if value.as_deref().map(str::trim).unwrap_or("").is_empty() {
                missing.push(name);
            }
        }
        missing
    }
}

/// Short BLAKE3 fingerprint used to identify a message in logs.
pub fn fingerprint(msg: &str) -> String {
    blake3::hash(msg.as_bytes()).to_hex()[..16].to_string()
}

/// Compact JSON with lexicographically sorted object keys at every depth.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (index, key) in keys.into_iter().enumerate() {
                if index > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(&map[key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (index, item) in items.iter().enumerate() {
                if index > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

fn take_string(map: &mut Map<String, Value>, field: &str) -> Result<String, GateError> {
    match map.remove(field) {
        Some(Value::String(value)) if !value.trim().is_empty() => Ok(value),
        Some(Value::String(_)) => Err(GateError::EnvelopeFields(field.to_string())),
        _ => Err(GateError::Envelope(format!(
            "field '{}' must be a string",
            field
        ))),
    }
}

fn random_nonce() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(NONCE_LEN)
        .map(char::from)
        .collect()
}
