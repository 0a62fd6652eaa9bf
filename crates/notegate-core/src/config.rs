use std::path::PathBuf;
use std::time::Duration;

/// Smallest ledger units per whole coin.
pub const DEFAULT_UNIT: u64 = 65_536;

/// Resolved gateway configuration.
///
/// Values arrive already resolved (CLI flags or environment); this type only carries
/// them and their defaults.
#[derive(Debug, Clone)]
pub struct GateConfig {
    pub wallet_socket: PathBuf,
    pub signing_key_path: Option<PathBuf>,
    /// Base64 Ed25519 public keys. Empty means open mode.
    pub authorized_keys: Vec<String>,
    pub drafts_dir: PathBuf,
    pub freshness_window: Duration,
    pub confirmation_timeout_blocks: u64,
    pub swap_retention: Duration,
    pub sweep_interval: Duration,
    pub command_timeout: Duration,
    pub max_output_bytes: usize,
    pub unit: u64,
    pub replay_protection: bool,
    /// Expose `create_signed_command` to callers. Development only.
    pub enable_local_signing: bool,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            wallet_socket: PathBuf::from(".socket/nockchain_npc.sock"),
            signing_key_path: None,
            authorized_keys: Vec::new(),
            drafts_dir: PathBuf::from("./drafts"),
            freshness_window: Duration::from_secs(5 * 60),
            confirmation_timeout_blocks: 3,
            swap_retention: Duration::from_secs(24 * 60 * 60),
            sweep_interval: Duration::from_secs(60 * 60),
            command_timeout: Duration::from_secs(30),
            max_output_bytes: 1024 * 1024,
            unit: DEFAULT_UNIT,
            replay_protection: false,
            enable_local_signing: false,
        }
    }
}

impl GateConfig {
    /// Parse a comma-separated key list, dropping blanks.
    pub fn parse_key_list(raw: &str) -> Vec<String> {
        raw.split(',')
            .map(str::trim)
            .filter(|key| !key.is_empty())
            .map(str::to_string)
            .collect()
    }

    pub fn open_mode(&self) -> bool {
        self.authorized_keys.is_empty()
    }
}
