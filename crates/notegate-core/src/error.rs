use thiserror::Error;

/// Gateway errors.
///
/// Every variant is recoverable at the boundary and maps to a stable machine-readable
/// code. Display strings are safe to return to callers: signature failures never say
/// which check failed, and execution failures keep tool output in `detail`, which is
/// only logged.
#[derive(Debug, Error)]
pub enum GateError {
    #[error("missing required fields: {0}")]
    MissingFields(String),

    #[error("invalid signature")]
    Signature,

    #[error("public key is not authorized")]
    Authorization,

    #[error("invalid envelope: {0}")]
    Envelope(String),

    #[error("envelope missing required fields: {0}")]
    EnvelopeFields(String),

    #[error("timestamp outside freshness window: {0}")]
    Timestamp(String),

    #[error("envelope already processed")]
    Replay,

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("insufficient balance: required {required}, available {available}")]
    InsufficientBalance { required: u64, available: u64 },

    #[error("wallet command failed during {step}")]
    Execution { step: String, detail: String },

    #[error("ledger query failed: {0}")]
    Ledger(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("key material error: {0}")]
    KeyLoad(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl GateError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn execution(step: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::Execution {
            step: step.into(),
            detail: detail.into(),
        }
    }

    /// Stable code returned alongside the message.
    pub fn code(&self) -> &'static str {
        match self {
            Self::MissingFields(_) => "MISSING_FIELDS",
            Self::Signature => "INVALID_SIGNATURE",
            Self::Authorization => "UNAUTHORIZED_KEY",
            Self::Envelope(_) => "INVALID_ENVELOPE",
            Self::EnvelopeFields(_) => "MISSING_ENVELOPE_FIELDS",
            Self::Timestamp(_) => "STALE_TIMESTAMP",
            Self::Replay => "REPLAYED_ENVELOPE",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::InsufficientBalance { .. } => "INSUFFICIENT_BALANCE",
            Self::Execution { .. } => "EXECUTION_ERROR",
            Self::Ledger(_) => "LEDGER_ERROR",
            Self::NotFound(_) => "NOT_FOUND",
            Self::Conflict(_) => "CONFLICT",
            Self::KeyLoad(_) => "KEY_LOAD_ERROR",
            Self::Config(_) => "CONFIG_ERROR",
        }
    }

    /// Whether resubmitting (with a fresh envelope where needed) can succeed.
    pub fn retryable(&self) -> bool {
        matches!(
            self,
            Self::Timestamp(_) | Self::Execution { .. } | Self::Ledger(_)
        )
    }

    /// Caller-side faults as opposed to failures of the wallet or ledger.
    pub fn is_client_fault(&self) -> bool {
        !matches!(
            self,
            Self::Execution { .. } | Self::Ledger(_) | Self::KeyLoad(_) | Self::Config(_)
        )
    }
}
