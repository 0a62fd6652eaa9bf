//! Rendering validated commands into wallet invocations.
//!
//! Invocations are argument vectors; nothing here ever goes through a shell.
//! `display()` exists for logs and results only.

use crate::command::WalletCommand;
use crate::error::GateError;
use crate::selection::SelectionTarget;
use crate::validation::ValidatedSimpleSpendParams;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletInvocation {
    pub subcommand: String,
    pub args: Vec<String>,
}

impl WalletInvocation {
    pub fn new(subcommand: impl Into<String>) -> Self {
        Self {
            subcommand: subcommand.into(),
            args: Vec::new(),
        }
    }

    pub fn flag(mut self, name: &str, value: impl Into<String>) -> Self {
        self.args.push(format!("--{name}"));
        self.args.push(value.into());
        self
    }

    /// Subcommand followed by its arguments.
    pub fn argv(&self) -> Vec<String> {
        std::iter::once(self.subcommand.clone())
            .chain(self.args.iter().cloned())
            .collect()
    }

    pub fn display(&self) -> String {
        self.argv()
            .iter()
            .map(|token| shell_quote(token))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl std::fmt::Display for WalletInvocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.display())
    }
}

/// How a command runs against the wallet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionPlan {
    /// One invocation; its stdout is the result.
    Single(WalletInvocation),
    /// Draft creation followed by `sign-tx` and `send-tx` on the produced draft.
    DraftSpend(WalletInvocation),
}

impl ExecutionPlan {
    pub fn first(&self) -> &WalletInvocation {
        match self {
            Self::Single(invocation) | Self::DraftSpend(invocation) => invocation,
        }
    }
}

pub fn plan_for(command: &WalletCommand) -> Result<ExecutionPlan, GateError> {
    let plan = match command {
        WalletCommand::SimpleSpend(params) => ExecutionPlan::DraftSpend(build_simple_spend(params)),
        WalletCommand::ListNotes => ExecutionPlan::Single(WalletInvocation::new("list-notes")),
        WalletCommand::ListNotesByPubkey { pubkey } => ExecutionPlan::Single(
            WalletInvocation::new("list-notes-by-pubkey").flag("pubkey", pubkey.clone()),
        ),
        WalletCommand::ListPubkeys => ExecutionPlan::Single(WalletInvocation::new("list-pubkeys")),
        WalletCommand::UpdateBalance => {
            ExecutionPlan::Single(WalletInvocation::new("update-balance"))
        }
        WalletCommand::Swap(_) => {
            return Err(GateError::validation(
                "swap commands are planned from a note selection",
            ))
        }
    };
    Ok(plan)
}

pub fn build_simple_spend(params: &ValidatedSimpleSpendParams) -> WalletInvocation {
    let names = params
        .names
        .iter()
        .map(|name| format!("[{} {}]", name.first, name.last))
        .collect::<Vec<_>>()
        .join(",");
    let recipients = params
        .recipients
        .iter()
        .map(|recipient| format!("[{} {}]", recipient.count, recipient.address))
        .collect::<Vec<_>>()
        .join(",");
    let gifts = params
        .gifts
        .iter()
        .map(u64::to_string)
        .collect::<Vec<_>>()
        .join(",");

    WalletInvocation::new("simple-spend")
        .flag("names", names)
        .flag("recipients", recipients)
        .flag("gifts", gifts)
        .flag("fee", params.fee.to_string())
}

/// Swap spends must move exactly `(amount + fee) * unit`.
pub fn build_swap_spend(
    params: &ValidatedSimpleSpendParams,
    target: &SelectionTarget,
) -> Result<ExecutionPlan, GateError> {
    let required = target.required()?;
    let total = params
        .gifts
        .iter()
        .try_fold(0u64, |acc, gift| acc.checked_add(*gift))
        .ok_or_else(|| GateError::validation("gift total overflows"))?;
    if total != required {
        return Err(GateError::validation(format!(
            "swap gifts total {} but {} is required",
            total, required
        )));
    }
    Ok(ExecutionPlan::DraftSpend(build_simple_spend(params)))
}

pub fn sign_tx(draft: &Path) -> WalletInvocation {
    WalletInvocation::new("sign-tx").flag("draft", draft.to_string_lossy())
}

pub fn send_tx(draft: &Path) -> WalletInvocation {
    WalletInvocation::new("send-tx").flag("draft", draft.to_string_lossy())
}

fn shell_quote(token: &str) -> String {
    let plain = !token.is_empty()
        && token
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '/' | ':' | '-'));
    if plain {
        return token.to_string();
    }
    let escaped = token.replace('\\', "\\\\").replace('"', "\\\"");
    format!("\"{escaped}\"")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validation::{NoteName, ValidatedRecipient};

    fn spend() -> ValidatedSimpleSpendParams {
        ValidatedSimpleSpendParams {
            recipients: vec![
                ValidatedRecipient {
                    count: 1,
                    address: "addr1".into(),
                },
                ValidatedRecipient {
                    count: 1,
                    address: "addr2".into(),
                },
            ],
            gifts: vec![100, 200],
            names: vec![
                NoteName {
                    first: "a".into(),
                    last: "b".into(),
                },
                NoteName {
                    first: "c".into(),
                    last: "d".into(),
                },
            ],
            fee: 10,
        }
    }

    #[test]
    fn renders_simple_spend() {
        let invocation = build_simple_spend(&spend());
        assert_eq!(
            invocation.display(),
            r#"simple-spend --names "[a b],[c d]" --recipients "[1 addr1],[1 addr2]" --gifts "100,200" --fee 10"#
        );
        assert_eq!(
            invocation.argv(),
            vec![
                "simple-spend",
                "--names",
                "[a b],[c d]",
                "--recipients",
                "[1 addr1],[1 addr2]",
                "--gifts",
                "100,200",
                "--fee",
                "10"
            ]
        );
    }

    #[test]
    fn plans_single_invocations() {
        let plan = plan_for(&WalletCommand::ListNotesByPubkey {
            pubkey: "pk".into(),
        })
        .unwrap();
        assert_eq!(
            plan,
            ExecutionPlan::Single(WalletInvocation {
                subcommand: "list-notes-by-pubkey".into(),
                args: vec!["--pubkey".into(), "pk".into()],
            })
        );
        assert_eq!(
            plan_for(&WalletCommand::UpdateBalance).unwrap().first().display(),
            "update-balance"
        );
        assert!(matches!(
            plan_for(&WalletCommand::SimpleSpend(spend())).unwrap(),
            ExecutionPlan::DraftSpend(_)
        ));
    }

    #[test]
    fn draft_steps_reference_the_draft() {
        let path = Path::new("/tmp/drafts/x/tx.draft");
        assert_eq!(sign_tx(path).display(), "sign-tx --draft /tmp/drafts/x/tx.draft");
        assert_eq!(send_tx(path).argv()[2], "/tmp/drafts/x/tx.draft");
        assert_eq!(
            WalletInvocation::new("x").flag("p", "a b").display(),
            r#"x --p "a b""#
        );
    }

    #[test]
    fn swap_spend_checks_gift_total() {
        let target = SelectionTarget::new(290, 10).with_unit(1);
        assert!(build_swap_spend(&spend(), &target).is_ok());
        let target = SelectionTarget::new(290, 11).with_unit(1);
        assert!(build_swap_spend(&spend(), &target).is_err());
    }
}
