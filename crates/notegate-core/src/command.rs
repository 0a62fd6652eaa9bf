//! Typed wallet commands.
//!
//! An envelope's `{action, params}` pair decodes into exactly one `WalletCommand`
//! variant. Unknown actions and unknown parameter fields are rejected, then each
//! variant's raw record goes through its own validator.

use crate::envelope::SignedEnvelope;
use crate::error::GateError;
use crate::validation::{
    validate_address, validate_simple_spend, validate_swap, ValidatedSimpleSpendParams,
    ValidatedSwapParams,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Raw `simple-spend` parameters as sent by the caller.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct SimpleSpendRequest {
    pub recipients: Vec<RecipientRequest>,
    pub gifts: Vec<u64>,
    pub names: Vec<Vec<String>>,
    pub fee: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct RecipientRequest {
    pub count: u64,
    pub address: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct PubkeyRequest {
    pub pubkey: String,
}

/// Raw `swap` parameters; the signed copy of the terms passed to swap initiation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct SwapRequest {
    pub swap_id: String,
    pub recipient: String,
    pub amount: u64,
    pub fee: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct NoParams {}

/// Wire shape, adjacently tagged exactly like the envelope.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "action", content = "params", rename_all = "kebab-case")]
enum RawCommand {
    SimpleSpend(SimpleSpendRequest),
    ListNotes(NoParams),
    ListNotesByPubkey(PubkeyRequest),
    ListPubkeys(NoParams),
    UpdateBalance(NoParams),
    Swap(SwapRequest),
}

/// A validated command ready for the builder.
#[derive(Debug, Clone, PartialEq)]
pub enum WalletCommand {
    SimpleSpend(ValidatedSimpleSpendParams),
    ListNotes,
    ListNotesByPubkey { pubkey: String },
    ListPubkeys,
    UpdateBalance,
    Swap(ValidatedSwapParams),
}

pub const SUPPORTED_ACTIONS: [&str; 6] = [
    "simple-spend",
    "list-notes",
    "list-notes-by-pubkey",
    "list-pubkeys",
    "update-balance",
    "swap",
];

impl WalletCommand {
    pub fn from_envelope(envelope: &SignedEnvelope) -> Result<Self, GateError> {
        Self::decode(&envelope.action, &envelope.params)
    }

    pub fn decode(action: &str, params: &Value) -> Result<Self, GateError> {
        if !SUPPORTED_ACTIONS.contains(&action) {
            return Err(GateError::validation(format!(
                "unsupported action '{}'",
                action
            )));
        }

        // Null params are treated as "no parameters" for the read-only actions.
        let params = if params.is_null() {
            Value::Object(Default::default())
        } else {
            params.clone()
        };
        let raw: RawCommand = serde_json::from_value(serde_json::json!({
            "action": action,
            "params": params,
        }))
        .map_err(|e| GateError::validation(format!("invalid params for '{}': {}", action, e)))?;

        match raw {
            RawCommand::SimpleSpend(request) => {
                Ok(Self::SimpleSpend(validate_simple_spend(&request)?))
            }
            RawCommand::ListNotes(_) => Ok(Self::ListNotes),
            RawCommand::ListNotesByPubkey(request) => Ok(Self::ListNotesByPubkey {
                pubkey: validate_address(&request.pubkey)?,
            }),
            RawCommand::ListPubkeys(_) => Ok(Self::ListPubkeys),
            RawCommand::UpdateBalance(_) => Ok(Self::UpdateBalance),
            RawCommand::Swap(request) => Ok(Self::Swap(validate_swap(&request)?)),
        }
    }

    pub fn action(&self) -> &'static str {
        match self {
            Self::SimpleSpend(_) => "simple-spend",
            Self::ListNotes => "list-notes",
            Self::ListNotesByPubkey { .. } => "list-notes-by-pubkey",
            Self::ListPubkeys => "list-pubkeys",
            Self::UpdateBalance => "update-balance",
            Self::Swap(_) => "swap",
        }
    }

    /// Commands whose output is a note listing.
    pub fn lists_notes(&self) -> bool {
        matches!(self, Self::ListNotes | Self::ListNotesByPubkey { .. })
    }
}
