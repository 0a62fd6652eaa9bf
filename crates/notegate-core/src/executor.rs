//! Wallet execution: single invocations and the draft → sign → send protocol.

use crate::builder::{send_tx, sign_tx, ExecutionPlan, WalletInvocation};
use crate::error::GateError;
use crate::notes::{parse_notes, NoteListing, ParsedNote};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

const DRAFT_EXTENSION: &str = "draft";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolOutput {
    pub stdout: String,
    pub stderr: String,
}

impl ToolOutput {
    pub fn stdout(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }
}

/// Runs one wallet invocation. Implementations must not involve a shell.
#[async_trait]
pub trait WalletTool: Send + Sync {
    fn tool_id(&self) -> &'static str;

    /// A non-zero exit is an `Execution` error whose step is the subcommand.
    async fn run(
        &self,
        invocation: &WalletInvocation,
        workdir: Option<&Path>,
    ) -> Result<ToolOutput, GateError>;
}

/// Current wallet notes, for swap snapshots.
#[async_trait]
pub trait NoteSource: Send + Sync {
    async fn current_notes(&self) -> Result<Vec<ParsedNote>, GateError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    /// Rendered form of the first invocation.
    pub command: String,
    pub steps: Vec<String>,
    pub stdout: String,
}

#[derive(Clone)]
pub struct CommandExecutor {
    tool: Arc<dyn WalletTool>,
    drafts_dir: PathBuf,
    timeout: Duration,
}

impl CommandExecutor {
    pub fn new(tool: Arc<dyn WalletTool>, drafts_dir: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            tool,
            drafts_dir: drafts_dir.into(),
            timeout,
        }
    }

    pub fn drafts_dir(&self) -> &Path {
        &self.drafts_dir
    }

    pub async fn execute(&self, plan: &ExecutionPlan) -> Result<ExecutionOutcome, GateError> {
        match plan {
            ExecutionPlan::Single(invocation) => {
                let output = self.run_step(invocation, invocation.subcommand.as_str(), None).await?;
                Ok(ExecutionOutcome {
                    command: invocation.display(),
                    steps: vec![invocation.subcommand.clone()],
                    stdout: output.stdout,
                })
            }
            ExecutionPlan::DraftSpend(create) => {
                let workspace = DraftWorkspace::create(&self.drafts_dir).await?;
                let result = self.run_draft_protocol(create, workspace.path()).await;
                workspace.cleanup().await;
                result
            }
        }
    }

    /// Run `list-notes` and parse its output.
    pub async fn list_notes(&self) -> Result<NoteListing, GateError> {
        let invocation = WalletInvocation::new("list-notes");
        let output = self.run_step(&invocation, "list-notes", None).await?;
        Ok(parse_notes(&output.stdout))
    }

    async fn run_draft_protocol(
        &self,
        create: &WalletInvocation,
        workdir: &Path,
    ) -> Result<ExecutionOutcome, GateError> {
        self.run_step(create, "draft", Some(workdir)).await?;
        let draft = locate_draft(workdir).await?;
        debug!(draft = %draft.display(), "draft created");

        let sign = sign_tx(&draft);
        self.run_step(&sign, "sign", Some(workdir)).await?;
        let send = send_tx(&draft);
        let sent = self.run_step(&send, "send", Some(workdir)).await?;

        Ok(ExecutionOutcome {
            command: create.display(),
            steps: vec![
                create.subcommand.clone(),
                sign.subcommand.clone(),
                send.subcommand.clone(),
            ],
            stdout: sent.stdout,
        })
    }

    async fn run_step(
        &self,
        invocation: &WalletInvocation,
        step: &str,
        workdir: Option<&Path>,
    ) -> Result<ToolOutput, GateError> {
        info!(step, command = %invocation.display(), tool = self.tool.tool_id(), "running wallet command");
        let result = match tokio::time::timeout(self.timeout, self.tool.run(invocation, workdir)).await {
            Ok(result) => result,
            Err(_) => Err(GateError::execution(
                step,
                format!("timed out after {}s", self.timeout.as_secs()),
            )),
        };

        match result {
            Ok(output) => Ok(output),
            Err(GateError::Execution { detail, .. }) => {
                warn!(step, detail = %detail, "wallet command failed");
                Err(GateError::execution(step, detail))
            }
            Err(other) => {
                warn!(step, error = %other, "wallet command failed");
                Err(other)
            }
        }
    }
}

#[async_trait]
impl NoteSource for CommandExecutor {
    /// Snapshots must be complete: a note missing from a garbled listing would read as spent.
    async fn current_notes(&self) -> Result<Vec<ParsedNote>, GateError> {
        let listing = self.list_notes().await?;
        if listing.discarded > 0 {
            warn!(discarded = listing.discarded, "note listing has unreadable blocks");
            return Err(GateError::execution(
                "list-notes",
                format!("{} note blocks could not be parsed", listing.discarded),
            ));
        }
        Ok(listing.notes)
    }
}

/// Per-spend scratch directory under the drafts dir.
///
/// `cleanup` removes it asynchronously; `Drop` removes it if cleanup never ran.
#[derive(Debug)]
pub struct DraftWorkspace {
    path: PathBuf,
    removed: bool,
}

impl DraftWorkspace {
    pub async fn create(drafts_dir: &Path) -> Result<Self, GateError> {
        let path = drafts_dir.join(format!("spend-{}", Uuid::new_v4()));
        tokio::fs::create_dir_all(&path).await.map_err(|e| {
            GateError::execution("prepare-draft", format!("{}: {e}", path.display()))
        })?;
        Ok(Self {
            path,
            removed: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn cleanup(mut self) {
        if let Err(err) = tokio::fs::remove_dir_all(&self.path).await {
            warn!(path = %self.path.display(), error = %err, "failed to remove draft workspace");
        }
        self.removed = true;
    }
}

impl Drop for DraftWorkspace {
    fn drop(&mut self) {
        if !self.removed {
            let _ = std::fs::remove_dir_all(&self.path);
        }
    }
}

/// The draft file produced by the create step. Several candidates resolve to the
/// lexicographically first.
pub async fn locate_draft(workdir: &Path) -> Result<PathBuf, GateError> {
    let mut entries = tokio::fs::read_dir(workdir)
        .await
        .map_err(|e| GateError::execution("draft", format!("{}: {e}", workdir.display())))?;

    let mut drafts = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| GateError::execution("draft", e.to_string()))?
    {
        let path = entry.path();
        if path.extension().and_then(|ext| ext.to_str()) == Some(DRAFT_EXTENSION) {
            drafts.push(path);
        }
    }
    drafts.sort();
    drafts
        .into_iter()
        .next()
        .ok_or_else(|| GateError::execution("draft", "no draft file was produced"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Records invocations; `simple-spend` writes a draft into the workdir.
    #[derive(Default)]
    struct RecordingTool {
        calls: Mutex<Vec<(Vec<String>, Option<PathBuf>)>>,
        fail_on: Option<&'static str>,
        skip_draft: bool,
        delay: Option<Duration>,
        listing: Option<&'static str>,
    }

    impl RecordingTool {
        fn calls(&self) -> Vec<(Vec<String>, Option<PathBuf>)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl WalletTool for RecordingTool {
        fn tool_id(&self) -> &'static str {
            "recording"
        }

        async fn run(
            &self,
            invocation: &WalletInvocation,
            workdir: Option<&Path>,
        ) -> Result<ToolOutput, GateError> {
            self.calls
                .lock()
                .unwrap()
                .push((invocation.argv(), workdir.map(Path::to_path_buf)));
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if self.fail_on == Some(invocation.subcommand.as_str()) {
                return Err(GateError::execution(
                    invocation.subcommand.clone(),
                    "exit status 1: /secret/path unreadable",
                ));
            }
            if invocation.subcommand == "simple-spend" && !self.skip_draft {
                if let Some(dir) = workdir {
                    std::fs::write(dir.join("tx-1.draft"), b"draft").unwrap();
                }
            }
            if invocation.subcommand == "list-notes" {
                return Ok(ToolOutput::stdout(
                    self.listing.unwrap_or("- name: [a b]\n- assets: 70\n"),
                ));
            }
            Ok(ToolOutput::stdout(format!("ok {}", invocation.subcommand)))
        }
    }

    fn drafts_dir() -> PathBuf {
        std::env::temp_dir().join(format!("notegate-drafts-{}", Uuid::new_v4()))
    }

    fn spend() -> ExecutionPlan {
        ExecutionPlan::DraftSpend(
            WalletInvocation::new("simple-spend")
                .flag("names", "[a b]")
                .flag("fee", "1"),
        )
    }

    fn leftover_entries(dir: &Path) -> usize {
        std::fs::read_dir(dir).map(|d| d.count()).unwrap_or(0)
    }

    #[tokio::test]
    async fn draft_protocol_signs_and_sends_the_located_draft() {
        let tool = Arc::new(RecordingTool::default());
        let dir = drafts_dir();
        let executor = CommandExecutor::new(tool.clone(), &dir, Duration::from_secs(5));

        let outcome = executor.execute(&spend()).await.unwrap();
        assert_eq!(outcome.steps, vec!["simple-spend", "sign-tx", "send-tx"]);
        assert_eq!(outcome.stdout, "ok send-tx");

        let calls = tool.calls();
        assert_eq!(calls.len(), 3);
        let workdir = calls[0].1.clone().unwrap();
        assert!(workdir.starts_with(&dir));
        let draft = workdir.join("tx-1.draft");
        assert_eq!(calls[1].0, vec!["sign-tx".to_string(), "--draft".into(), draft.to_string_lossy().into_owned()]);
        assert_eq!(calls[2].0[0], "send-tx");
        assert!(!workdir.exists());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn failed_step_aborts_and_cleans_up() {
        let tool = Arc::new(RecordingTool {
            fail_on: Some("sign-tx"),
            ..Default::default()
        });
        let dir = drafts_dir();
        let executor = CommandExecutor::new(tool.clone(), &dir, Duration::from_secs(5));

        let err = executor.execute(&spend()).await.unwrap_err();
        assert_eq!(err.to_string(), "wallet command failed during sign");
        assert!(!err.to_string().contains("secret"));
        assert_eq!(tool.calls().len(), 2);
        assert_eq!(leftover_entries(&dir), 0);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn missing_draft_is_a_draft_failure() {
        let tool = Arc::new(RecordingTool {
            skip_draft: true,
            ..Default::default()
        });
        let dir = drafts_dir();
        let executor = CommandExecutor::new(tool.clone(), &dir, Duration::from_secs(5));

        let err = executor.execute(&spend()).await.unwrap_err();
        assert_eq!(err.to_string(), "wallet command failed during draft");
        assert_eq!(tool.calls().len(), 1);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn single_invocation_times_out() {
        let tool = Arc::new(RecordingTool {
            delay: Some(Duration::from_millis(200)),
            ..Default::default()
        });
        let executor = CommandExecutor::new(tool, drafts_dir(), Duration::from_millis(20));
        let plan = ExecutionPlan::Single(WalletInvocation::new("update-balance"));
        let err = executor.execute(&plan).await.unwrap_err();
        match err {
            GateError::Execution { step, detail } => {
                assert_eq!(step, "update-balance");
                assert!(detail.contains("timed out"));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test]
    async fn lists_and_parses_notes() {
        let executor = CommandExecutor::new(
            Arc::new(RecordingTool::default()),
            drafts_dir(),
            Duration::from_secs(5),
        );
        let notes = executor.current_notes().await.unwrap();
        assert_eq!(notes, vec![ParsedNote::new("a", "b", 70)]);
    }

    #[tokio::test]
    async fn snapshot_refuses_unreadable_blocks() {
        let executor = CommandExecutor::new(
            Arc::new(RecordingTool {
                listing: Some("name: [a b]\nassets: ???\nname: [c d]\nassets: 50\n"),
                ..Default::default()
            }),
            drafts_dir(),
            Duration::from_secs(5),
        );
        let listing = executor.list_notes().await.unwrap();
        assert_eq!(listing.notes.len(), 1);
        assert_eq!(listing.discarded, 1);

        match executor.current_notes().await.unwrap_err() {
            GateError::Execution { step, detail } => {
                assert_eq!(step, "list-notes");
                assert!(detail.contains("1 note blocks"));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test]
    async fn dropped_workspace_is_removed() {
        let dir = drafts_dir();
        let path = {
            let workspace = DraftWorkspace::create(&dir).await.unwrap();
            workspace.path().to_path_buf()
        };
        assert!(!path.exists());
        std::fs::remove_dir_all(&dir).ok();
    }
}
