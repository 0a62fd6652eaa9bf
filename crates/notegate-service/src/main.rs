use clap::Parser;
use notegate_core::GateConfig;
use notegate_service::sweeper::spawn_sweeper;
use notegate_service::{build_router, ServiceConfig, ServiceState};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "notegated", version, about = "Signed-command gateway for a custodial note wallet")]
struct Cli {
    /// REST socket address to bind, e.g. 127.0.0.1:8095
    #[arg(long, default_value = "127.0.0.1:8095", env = "NOTEGATE_LISTEN")]
    listen: SocketAddr,
    /// Wallet binary invoked for every command.
    #[arg(long, default_value = "nockchain-wallet", env = "NOTEGATE_WALLET_BIN")]
    wallet_bin: PathBuf,
    /// Node socket passed to the wallet.
    #[arg(long, default_value = ".socket/nockchain_npc.sock", env = "NOTEGATE_WALLET_SOCKET")]
    wallet_socket: PathBuf,
    /// File holding the base64 Ed25519 seed used for local signing.
    #[arg(long, env = "NOTEGATE_SIGNING_KEY")]
    signing_key: Option<PathBuf>,
    /// Comma-separated base64 public keys. Empty runs in open mode.
    #[arg(long, default_value = "", env = "NOTEGATE_AUTHORIZED_KEYS")]
    authorized_keys: String,
    /// Parent directory for per-spend draft workspaces.
    #[arg(long, default_value = "./drafts", env = "NOTEGATE_DRAFTS_DIR")]
    drafts_dir: PathBuf,
    /// Ledger explorer API base URL.
    #[arg(long, default_value = "http://127.0.0.1:3000/api", env = "NOTEGATE_LEDGER_URL")]
    ledger_url: String,
    #[arg(long, default_value_t = 5, env = "NOTEGATE_FRESHNESS_MINUTES")]
    freshness_minutes: u64,
    /// Blocks to wait for a swap payment before giving up.
    #[arg(long, default_value_t = 3, env = "NOTEGATE_CONFIRMATION_BLOCKS")]
    confirmation_blocks: u64,
    /// How long finished swaps stay queryable.
    #[arg(long, default_value_t = 24, env = "NOTEGATE_RETENTION_HOURS")]
    retention_hours: u64,
    #[arg(long, default_value_t = 60, env = "NOTEGATE_SWEEP_MINUTES")]
    sweep_minutes: u64,
    /// Upper bound for each wallet invocation and ledger request.
    #[arg(long, default_value_t = 30, env = "NOTEGATE_COMMAND_TIMEOUT_SECS")]
    command_timeout_secs: u64,
    #[arg(long, default_value_t = 1024 * 1024, env = "NOTEGATE_MAX_OUTPUT_BYTES")]
    max_output_bytes: usize,
    /// Smallest ledger units per coin.
    #[arg(long, default_value_t = notegate_core::config::DEFAULT_UNIT, env = "NOTEGATE_UNIT")]
    unit: u64,
    /// Reject a second submission of an already accepted envelope.
    #[arg(long, default_value_t = false, env = "NOTEGATE_REPLAY_PROTECTION")]
    replay_protection: bool,
    /// Expose POST /v1/commands/sign. Development only.
    #[arg(long, default_value_t = false, env = "NOTEGATE_ENABLE_LOCAL_SIGNING")]
    enable_local_signing: bool,
}

impl Cli {
    fn gate_config(&self) -> anyhow::Result<GateConfig> {
        if self.unit == 0 {
            anyhow::bail!("--unit must be positive");
        }
        if self.sweep_minutes == 0 {
            anyhow::bail!("--sweep-minutes must be positive");
        }
        Ok(GateConfig {
            wallet_socket: self.wallet_socket.clone(),
            signing_key_path: self.signing_key.clone(),
            authorized_keys: GateConfig::parse_key_list(&self.authorized_keys),
            drafts_dir: self.drafts_dir.clone(),
            freshness_window: Duration::from_secs(self.freshness_minutes * 60),
            confirmation_timeout_blocks: self.confirmation_blocks,
            swap_retention: Duration::from_secs(self.retention_hours * 60 * 60),
            sweep_interval: Duration::from_secs(self.sweep_minutes * 60),
            command_timeout: Duration::from_secs(self.command_timeout_secs),
            max_output_bytes: self.max_output_bytes,
            unit: self.unit,
            replay_protection: self.replay_protection,
            enable_local_signing: self.enable_local_signing,
        })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(std::env::var("RUST_LOG").unwrap_or_else(|_| {
            "notegate_service=info,notegate_core=info,info".to_string()
        }))
        .init();

    let cli = Cli::parse();
    let gate = cli.gate_config()?;
    let sweep_interval = gate.sweep_interval;
    let retention = gate.swap_retention;

    let state = ServiceState::bootstrap(ServiceConfig {
        gate,
        wallet_bin: cli.wallet_bin.clone(),
        ledger_url: cli.ledger_url.clone(),
    })
    .await?;
    let sweeper = spawn_sweeper(state.gateway.store().clone(), sweep_interval, retention);
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(cli.listen).await?;
    info!("notegate-service REST listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    sweeper.abort();
    info!("notegate-service stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %err, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::warn!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received Ctrl+C, shutting down"),
        _ = terminate => info!("received terminate signal, shutting down"),
    }
}
