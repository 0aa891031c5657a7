use crate::{config::WalletConfig, paths::WalletPaths};
use eyre::Context as _;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
}

/// Apply environment variable overrides. These are never written back to disk.
fn apply_env_overrides(cfg: &mut WalletConfig) -> eyre::Result<()> {
    fn env_trimmed(var: &str) -> Option<String> {
        std::env::var(var)
            .ok()
            .map(|v| v.trim().to_owned())
            .filter(|v| !v.is_empty())
    }

    if let Some(v) = env_trimmed("KEYWARD_RPC_URL") {
        cfg.rpc.url = v;
    }
    if let Some(v) = env_trimmed("KEYWARD_CHAIN_ID") {
        let id = v.parse::<u64>().context("parse KEYWARD_CHAIN_ID")?;
        cfg.rpc.chain_id = Some(id);
    }
    if let Some(v) = env_trimmed("KEYWARD_RECEIPT_TIMEOUT_SECONDS") {
        let n = v
            .parse::<u64>()
            .context("parse KEYWARD_RECEIPT_TIMEOUT_SECONDS")?;
        if n > 0 {
            cfg.receipt_timeout_seconds = n;
        }
    }
    Ok(())
}

impl ConfigStore {
    pub fn new(paths: &WalletPaths) -> Self {
        Self {
            path: paths.config_file(),
        }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    pub fn load_or_init_default(&self) -> eyre::Result<WalletConfig> {
        let mut cfg = if self.path.exists() {
            let s = crate::fsutil::read_private_string(&self.path)?;
            toml::from_str(&s).context("parse config.toml")?
        } else {
            let cfg = WalletConfig::default();
            self.save(&cfg)?;
            cfg
        };
        apply_env_overrides(&mut cfg)?;
        cfg.validate().context("invalid config.toml")?;
        Ok(cfg)
    }

    pub fn save(&self, cfg: &WalletConfig) -> eyre::Result<()> {
        let s = toml::to_string_pretty(cfg).context("serialize config.toml")?;
        crate::fsutil::write_string_atomic_restrictive(
            &self.path,
            &s,
            crate::fsutil::MODE_FILE_PRIVATE,
        )
        .context("write config.toml")?;
        Ok(())
    }
}
