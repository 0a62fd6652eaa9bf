use async_trait::async_trait;
use notegate_core::builder::WalletInvocation;
use notegate_core::error::GateError;
use notegate_core::executor::{ToolOutput, WalletTool};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tracing::debug;

pub const SOCKET_FLAG: &str = "--nockchain-socket";
const READ_CHUNK: usize = 8 * 1024;

/// Runs the wallet binary directly with an argument vector.
///
/// The child is killed when the future is dropped, so an outer timeout terminates it.
#[derive(Debug, Clone)]
pub struct ProcessWalletTool {
    binary: PathBuf,
    socket: Option<PathBuf>,
    max_output_bytes: usize,
}

impl ProcessWalletTool {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            socket: None,
            max_output_bytes: 1024 * 1024,
        }
    }

    pub fn with_socket(mut self, socket: impl Into<PathBuf>) -> Self {
        self.socket = Some(socket.into());
        self
    }

    pub fn with_max_output_bytes(mut self, max_output_bytes: usize) -> Self {
        self.max_output_bytes = max_output_bytes;
        self
    }

    /// Full argument vector passed to the binary.
    pub fn command_args(&self, invocation: &WalletInvocation) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(socket) = &self.socket {
            args.push(SOCKET_FLAG.to_string());
            args.push(socket.to_string_lossy().into_owned());
        }
        args.extend(invocation.argv());
        args
    }
}

#[async_trait]
impl WalletTool for ProcessWalletTool {
    fn tool_id(&self) -> &'static str {
        "process"
    }

    async fn run(
        &self,
        invocation: &WalletInvocation,
        workdir: Option<&Path>,
    ) -> Result<ToolOutput, GateError> {
        let step = invocation.subcommand.as_str();
        let mut command = Command::new(&self.binary);
        command
            .args(self.command_args(invocation))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = workdir {
            command.current_dir(dir);
        }

        let mut child = command.spawn().map_err(|e| {
            GateError::execution(step, format!("failed to start {}: {e}", self.binary.display()))
        })?;
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let (stdout, stderr, status) = tokio::join!(
            read_capped(stdout, self.max_output_bytes),
            read_capped(stderr, self.max_output_bytes),
            child.wait()
        );
        let status = status.map_err(|e| GateError::execution(step, e.to_string()))?;
        let (stdout, stdout_truncated) =
            stdout.map_err(|e| GateError::execution(step, format!("reading stdout: {e}")))?;
        let (stderr, _) =
            stderr.map_err(|e| GateError::execution(step, format!("reading stderr: {e}")))?;
        let stderr = String::from_utf8_lossy(&stderr).trim().to_string();

        if !status.success() {
            return Err(GateError::execution(step, format!("{status}: {stderr}")));
        }
        if stdout_truncated {
            return Err(GateError::execution(
                step,
                format!("stdout exceeded {} bytes", self.max_output_bytes),
            ));
        }
        debug!(step, bytes = stdout.len(), "wallet command completed");

        Ok(ToolOutput {
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr,
        })
    }
}

/// Read everything, keeping at most `cap` bytes. The flag reports whether anything was dropped.
async fn read_capped<R: AsyncRead + Unpin>(
    reader: Option<R>,
    cap: usize,
) -> std::io::Result<(Vec<u8>, bool)> {
    let Some(mut reader) = reader else {
        return Ok((Vec::new(), false));
    };
    let mut kept = Vec::new();
    let mut truncated = false;
    let mut chunk = [0u8; READ_CHUNK];
    loop {
        let read = reader.read(&mut chunk).await?;
        if read == 0 {
            break;
        }
        let room = cap.saturating_sub(kept.len());
        kept.extend_from_slice(&chunk[..read.min(room)]);
        if read > room {
            truncated = true;
        }
    }
    Ok((kept, truncated))
}
