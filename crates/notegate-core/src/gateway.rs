//! Orchestrates authority, validation, building and execution for each entry point.

use crate::authority::{CommandAuthority, SignatureCheck};
use crate::builder::{build_swap_spend, plan_for};
use crate::command::{SwapRequest, WalletCommand};
use crate::config::GateConfig;
use crate::envelope::CommandRequest;
use crate::error::GateError;
use crate::executor::{CommandExecutor, NoteSource, WalletTool};
use crate::ledger::LedgerClient;
use crate::notes::{parse_notes, NoteListing};
use crate::selection::{select_notes, swap_spend_params, SelectionTarget};
use crate::signer::EnvelopeSigner;
use crate::swap::{SwapMonitor, SwapStore, SwapTransaction};
use crate::validation::validate_swap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandOutput {
    pub action: String,
    pub command: String,
    pub stdout: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<NoteListing>,
}

/// Boundary result: exactly one of `output` or `error`/`code` is set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<CommandOutput>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl From<Result<CommandOutput, GateError>> for CommandResult {
    fn from(result: Result<CommandOutput, GateError>) -> Self {
        match result {
            Ok(output) => Self {
                success: true,
                output: Some(output),
                error: None,
                code: None,
            },
            Err(err) => Self {
                success: false,
                output: None,
                error: Some(err.to_string()),
                code: Some(err.code().to_string()),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapInitiation {
    pub swap: SwapTransaction,
    pub command: String,
    pub selected_notes: usize,
    pub selected_total: u64,
}

pub struct WalletGateway {
    authority: CommandAuthority,
    signer: Option<EnvelopeSigner>,
    local_signing: bool,
    executor: CommandExecutor,
    ledger: Arc<dyn LedgerClient>,
    monitor: SwapMonitor,
    unit: u64,
}

impl WalletGateway {
    pub fn new(
        config: &GateConfig,
        tool: Arc<dyn WalletTool>,
        ledger: Arc<dyn LedgerClient>,
        store: Arc<SwapStore>,
    ) -> Result<Self, GateError> {
        let mut authority = CommandAuthority::new(&config.authorized_keys, config.freshness_window)?;
        if config.replay_protection {
            authority = authority.with_replay_protection();
        }
        let signer = config
            .signing_key_path
            .as_deref()
            .map(EnvelopeSigner::from_key_file)
            .transpose()?;

        let executor = CommandExecutor::new(tool, &config.drafts_dir, config.command_timeout);
        let monitor = SwapMonitor::new(
            store,
            Arc::new(executor.clone()),
            ledger.clone(),
            config.confirmation_timeout_blocks,
        );

        Ok(Self {
            authority,
            signer,
            local_signing: config.enable_local_signing,
            executor,
            ledger,
            monitor,
            unit: config.unit,
        })
    }

    pub fn with_signer(mut self, signer: EnvelopeSigner) -> Self {
        self.signer = Some(signer);
        self
    }

    pub fn authority(&self) -> &CommandAuthority {
        &self.authority
    }

    pub fn ledger(&self) -> &Arc<dyn LedgerClient> {
        &self.ledger
    }

    pub fn store(&self) -> &Arc<SwapStore> {
        self.monitor.store()
    }

    pub fn local_signing_enabled(&self) -> bool {
        self.local_signing && self.signer.is_some()
    }

    pub async fn submit_command(&self, request: &CommandRequest) -> Result<CommandOutput, GateError> {
        let verified = self.authority.process_signed_command(request)?;
        let command = WalletCommand::from_envelope(&verified.envelope)?;
        if matches!(command, WalletCommand::Swap(_)) {
            return Err(GateError::validation(
                "swap commands are submitted through swap initiation",
            ));
        }
        info!(action = command.action(), fingerprint = %verified.fingerprint, "command accepted");

        let plan = plan_for(&command)?;
        let outcome = self.executor.execute(&plan).await?;
        let notes = command.lists_notes().then(|| parse_notes(&outcome.stdout));

        Ok(CommandOutput {
            action: command.action().to_string(),
            command: outcome.command,
            stdout: outcome.stdout,
            notes,
        })
    }

    /// Sign `{action, params}` with the local key. Only available when enabled.
    pub fn create_signed_command(&self, action: &str, params: Value) -> Result<CommandRequest, GateError> {
        let signer = match (&self.signer, self.local_signing) {
            (Some(signer), true) => signer,
            _ => return Err(GateError::NotFound("local signing is disabled".to_string())),
        };
        WalletCommand::decode(action, &params)?;
        Ok(signer.sign_command(action, params))
    }

    pub fn verify_signature(&self, request: &CommandRequest) -> SignatureCheck {
        self.authority.verify_signature(request)
    }

    pub async fn initiate_swap(
        &self,
        terms: &SwapRequest,
        request: &CommandRequest,
    ) -> Result<SwapInitiation, GateError> {
        let verified = self.authority.process_signed_command(request)?;
        let WalletCommand::Swap(signed) = WalletCommand::from_envelope(&verified.envelope)? else {
            return Err(GateError::validation("signed envelope is not a swap"));
        };
        let swap = validate_swap(terms)?;
        if signed != swap {
            return Err(GateError::validation(
                "swap terms do not match the signed envelope",
            ));
        }
        if self.monitor.store().contains(&swap.swap_id).await {
            return Err(GateError::Conflict(format!(
                "swap '{}' already exists",
                swap.swap_id
            )));
        }

        let notes = self.executor.current_notes().await?;
        let height = self.ledger.height().await?;
        let target = SelectionTarget::new(swap.amount, swap.fee).with_unit(self.unit);
        let selection = select_notes(&target, &notes)?;
        let params = swap_spend_params(&swap, &selection.notes, self.unit)?;
        let plan = build_swap_spend(&params, &target)?;
        let payment_total = params.gifts.iter().sum::<u64>();

        let registered = self
            .monitor
            .register(&swap, &notes, height, payment_total)
            .await?;
        match self.executor.execute(&plan).await {
            Ok(outcome) => {
                info!(swap_id = %swap.swap_id, notes = selection.notes.len(), "swap spend sent");
                Ok(SwapInitiation {
                    swap: registered,
                    command: outcome.command,
                    selected_notes: selection.notes.len(),
                    selected_total: selection.total,
                })
            }
            Err(err) => {
                warn!(swap_id = %swap.swap_id, error = %err, "swap spend failed");
                self.monitor.mark_failed(&swap.swap_id, &err.to_string()).await?;
                Err(err)
            }
        }
    }

    pub async fn swap_status(&self, swap_id: &str) -> Result<SwapTransaction, GateError> {
        self.monitor.status(swap_id).await
    }
}
