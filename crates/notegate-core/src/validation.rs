//! Parameter validation and argument sanitization.
//!
//! Every value that ends up on the wallet's command line passes through here.
//! Address checks are structural (charset plus decoded length window); they do not
//! verify checksums.

use crate::command::{RecipientRequest, SimpleSpendRequest, SwapRequest};
use crate::error::GateError;
use serde::{Deserialize, Serialize};

pub const MAX_RECIPIENTS: usize = 50;
pub const MAX_NAMES: usize = 50;
pub const MAX_RECIPIENT_COUNT: u64 = 999;
pub const MAX_GIFT: u64 = 1_000_000_000;
pub const MIN_FEE: u64 = 1;
pub const MAX_FEE: u64 = 1000;
pub const MAX_ARG_CHARS: usize = 100;
pub const MAX_SWAP_ID_CHARS: usize = 64;

pub const ADDRESS_MIN_CHARS: usize = 150;
pub const ADDRESS_MAX_CHARS: usize = 156;
pub const ADDRESS_MIN_DECODED: usize = 110;
pub const ADDRESS_MAX_DECODED: usize = 115;

const BASE58_ALPHABET: &[u8; 58] = b"123456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz";
const UNSAFE_CHARS: [char; 8] = [';', '|', '&', '$', '`', '\\', '\'', '"'];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatedRecipient {
    pub count: u64,
    pub address: String,
}

/// First/last name pair identifying a note.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NoteName {
    pub first: String,
    pub last: String,
}

/// Spend instruction handed to the builder. `gifts.len() == recipients.len()`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatedSimpleSpendParams {
    pub recipients: Vec<ValidatedRecipient>,
    pub gifts: Vec<u64>,
    pub names: Vec<NoteName>,
    pub fee: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatedSwapParams {
    pub swap_id: String,
    pub recipient: String,
    pub amount: u64,
    pub fee: u64,
}

/// Strip shell metacharacters, collapse whitespace, trim and truncate.
///
/// Returns a validation error when nothing is left.
pub fn sanitize_argument(raw: &str) -> Result<String, GateError> {
    let stripped: String = raw.chars().filter(|c| !UNSAFE_CHARS.contains(c)).collect();
    let collapsed = stripped.split_whitespace().collect::<Vec<_>>().join(" ");
    let truncated: String = collapsed.chars().take(MAX_ARG_CHARS).collect();
    let sanitized = truncated.trim_end().to_string();
    if sanitized.is_empty() {
        return Err(GateError::validation(
            "value is empty after sanitization",
        ));
    }
    Ok(sanitized)
}

pub fn validate_address(address: &str) -> Result<String, GateError> {
    if let Some(bad) = address
        .bytes()
        .find(|byte| !BASE58_ALPHABET.contains(byte))
    {
        return Err(GateError::validation(format!(
            "address contains non base-58 character {:?}",
            bad as char
        )));
    }

    let length = address.len();
    if !(ADDRESS_MIN_CHARS..=ADDRESS_MAX_CHARS).contains(&length) {
        return Err(GateError::validation(format!(
            "address length {} outside {}..={}",
            length, ADDRESS_MIN_CHARS, ADDRESS_MAX_CHARS
        )));
    }

    let decoded = base58_decode(address)
        .ok_or_else(|| GateError::validation("address is not valid base-58"))?;
    if !(ADDRESS_MIN_DECODED..=ADDRESS_MAX_DECODED).contains(&decoded.len()) {
        return Err(GateError::validation(format!(
            "address decodes to {} bytes, expected {}..={}",
            decoded.len(),
            ADDRESS_MIN_DECODED,
            ADDRESS_MAX_DECODED
        )));
    }

    Ok(address.to_string())
}

pub fn validate_fee(fee: u64) -> Result<u64, GateError> {
    if !(MIN_FEE..=MAX_FEE).contains(&fee) {
        return Err(GateError::validation(format!(
            "fee {} outside {}..={}",
            fee, MIN_FEE, MAX_FEE
        )));
    }
    Ok(fee)
}

pub fn validate_amount(field: &str, amount: u64) -> Result<u64, GateError> {
    if amount == 0 || amount > MAX_GIFT {
        return Err(GateError::validation(format!(
            "{} {} outside 1..={}",
            field, amount, MAX_GIFT
        )));
    }
    Ok(amount)
}

pub fn validate_recipient(recipient: &RecipientRequest) -> Result<ValidatedRecipient, GateError> {
    if recipient.count == 0 || recipient.count > MAX_RECIPIENT_COUNT {
        return Err(GateError::validation(format!(
            "recipient count {} outside 1..={}",
            recipient.count, MAX_RECIPIENT_COUNT
        )));
    }
    Ok(ValidatedRecipient {
        count: recipient.count,
        address: validate_address(&recipient.address)?,
    })
}

/// Validate one name component. Besides sanitization, the result must be a single
/// token free of the list delimiters used on the command line.
pub fn validate_name_component(raw: &str) -> Result<String, GateError> {
    let sanitized = sanitize_argument(raw)?;
    if sanitized
        .chars()
        .any(|c| c.is_whitespace() || matches!(c, '[' | ']' | ','))
    {
        return Err(GateError::validation(format!(
            "name component '{}' must be a single token",
            sanitized
        )));
    }
    Ok(sanitized)
}

pub fn validate_names(names: &[Vec<String>]) -> Result<Vec<NoteName>, GateError> {
    if names.is_empty() {
        return Err(GateError::validation("names must not be empty"));
    }
    if names.len() > MAX_NAMES {
        return Err(GateError::validation(format!(
            "at most {} names allowed, got {}",
            MAX_NAMES,
            names.len()
        )));
    }

    names
        .iter()
        .enumerate()
        .map(|(index, pair)| match pair.as_slice() {
            [first, last] => Ok(NoteName {
                first: validate_name_component(first)?,
                last: validate_name_component(last)?,
            }),
            _ => Err(GateError::validation(format!(
                "names[{}] must contain exactly two strings",
                index
            ))),
        })
        .collect()
}

pub fn validate_simple_spend(
    request: &SimpleSpendRequest,
) -> Result<ValidatedSimpleSpendParams, GateError> {
    if request.recipients.is_empty() {
        return Err(GateError::validation("recipients must not be empty"));
    }
    if request.recipients.len() > MAX_RECIPIENTS {
        return Err(GateError::validation(format!(
            "at most {} recipients allowed, got {}",
            MAX_RECIPIENTS,
            request.recipients.len()
        )));
    }
    let recipients = request
        .recipients
        .iter()
        .map(validate_recipient)
        .collect::<Result<Vec<_>, _>>()?;

    if request.gifts.len() != recipients.len() {
        return Err(GateError::validation(format!(
            "gifts length {} does not match recipients length {}",
            request.gifts.len(),
            recipients.len()
        )));
    }
    let gifts = request
        .gifts
        .iter()
        .map(|gift| validate_amount("gift", *gift))
        .collect::<Result<Vec<_>, _>>()?;

    let names = validate_names(&request.names)?;
    let fee = validate_fee(request.fee)?;

    Ok(ValidatedSimpleSpendParams {
        recipients,
        gifts,
        names,
        fee,
    })
}

pub fn validate_swap_id(swap_id: &str) -> Result<String, GateError> {
    let valid = !swap_id.is_empty()
        && swap_id.len() <= MAX_SWAP_ID_CHARS
        && swap_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ':'));
    if !valid {
        return Err(GateError::validation(format!(
            "swap_id must be 1..={} characters of [A-Za-z0-9._:-]",
            MAX_SWAP_ID_CHARS
        )));
    }
    Ok(swap_id.to_string())
}

pub fn validate_swap(request: &SwapRequest) -> Result<ValidatedSwapParams, GateError> {
    Ok(ValidatedSwapParams {
        swap_id: validate_swap_id(&request.swap_id)?,
        recipient: validate_address(&request.recipient)?,
        amount: validate_amount("amount", request.amount)?,
        fee: validate_fee(request.fee)?,
    })
}

/// Decode base-58 text (Bitcoin alphabet) into bytes, preserving leading zero bytes.
pub fn base58_decode(input: &str) -> Option<Vec<u8>> {
    bs58::decode(input).into_vec().ok()
}
