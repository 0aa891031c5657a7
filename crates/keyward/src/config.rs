use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_RPC_URL: &str = "https://rpc-devnet.r5.network/";
pub const DEFAULT_KEYSTORE_FILE: &str = "wallet.key";
/// One week. Longer waits are an operator mistake, and huge values overflow `Instant`.
pub const MAX_RECEIPT_TIMEOUT_SECONDS: u64 = 7 * 24 * 60 * 60;
pub const MAX_QUERY_INTERVAL_SECONDS: u64 = 24 * 60 * 60;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RpcConfig {
    /// Primary JSON-RPC endpoint of the node.
    pub url: String,
    /// Additional endpoints tried in order if the primary fails.
    pub fallback_urls: Vec<String>,
    /// Pin the chain id used for EIP-155 signatures. If unset, the node is asked.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chain_id: Option<u64>,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_RPC_URL.into(),
            fallback_urls: vec![],
            chain_id: None,
        }
    }
}

impl RpcConfig {
    /// Primary first, then fallbacks; blanks and duplicates dropped.
    pub fn all_urls(&self) -> Vec<String> {
        let mut urls: Vec<String> = Vec::with_capacity(1 + self.fallback_urls.len());
        for u in std::iter::once(&self.url).chain(self.fallback_urls.iter()) {
            let t = u.trim();
            if t.is_empty() || urls.iter().any(|x| x == t) {
                continue;
            }
            urls.push(t.to_owned());
        }
        urls
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct WalletConfig {
    pub rpc: RpcConfig,
    /// Keystore file name, relative to the config directory.
    pub keystore_file: String,
    /// How often an interactive front end should refresh balance and height.
    pub query_interval_seconds: u64,
    /// Number of trailing blocks scanned by `history`.
    pub history_block_range: u64,
    /// How long `send` waits for a receipt before reporting a timeout.
    pub receipt_timeout_seconds: u64,
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self {
            rpc: RpcConfig::default(),
            keystore_file: DEFAULT_KEYSTORE_FILE.into(),
            query_interval_seconds: 60,
            history_block_range: 1080,
            receipt_timeout_seconds: 20 * 60,
        }
    }
}

impl WalletConfig {
    pub const fn receipt_timeout(&self) -> Duration {
        Duration::from_secs(self.receipt_timeout_seconds)
    }

    pub const fn query_interval(&self) -> Duration {
        Duration::from_secs(self.query_interval_seconds)
    }

    /// Reject settings that would make the wallet unusable rather than silently clamping them.
    pub fn validate(&self) -> eyre::Result<()> {
        if self.rpc.all_urls().is_empty() {
            eyre::bail!("rpc.url must not be empty");
        }
        let name = self.keystore_file.trim();
        if name.is_empty() || name.contains('/') || name.contains('\\') || name == ".." {
            eyre::bail!("keystore_file must be a plain file name");
        }
        if !(1..=MAX_RECEIPT_TIMEOUT_SECONDS).contains(&self.receipt_timeout_seconds) {
            eyre::bail!("receipt_timeout_seconds must be in 1..={MAX_RECEIPT_TIMEOUT_SECONDS}");
        }
        if !(1..=MAX_QUERY_INTERVAL_SECONDS).contains(&self.query_interval_seconds) {
            eyre::bail!("query_interval_seconds must be in 1..={MAX_QUERY_INTERVAL_SECONDS}");
        }
        Ok(())
    }
}
