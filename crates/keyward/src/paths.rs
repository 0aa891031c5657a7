use directories::ProjectDirs;
use eyre::ContextCompat as _;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct WalletPaths {
    pub config_dir: PathBuf,
    pub data_dir: PathBuf,
    pub log_file: PathBuf,
}

impl WalletPaths {
    pub fn discover() -> eyre::Result<Self> {
        // Test/CI override knobs.
        if let (Ok(data_dir), Ok(config_dir)) = (
            std::env::var("KEYWARD_DATA_DIR"),
            std::env::var("KEYWARD_CONFIG_DIR"),
        ) {
            return Ok(Self::at(PathBuf::from(config_dir), PathBuf::from(data_dir)));
        }

        // macOS: ~/Library/Application Support/keyward
        // Linux: ~/.config/keyward (config), ~/.local/share/keyward (data)
        // Windows: %APPDATA%\\keyward
        let proj =
            ProjectDirs::from("", "", "keyward").context("failed to resolve project dirs")?;
        Ok(Self::at(
            proj.config_dir().to_path_buf(),
            proj.data_dir().to_path_buf(),
        ))
    }

    pub fn at(config_dir: PathBuf, data_dir: PathBuf) -> Self {
        let log_file = data_dir.join("keyward.log.jsonl");
        Self {
            config_dir,
            data_dir,
            log_file,
        }
    }

    pub fn config_file(&self) -> PathBuf {
        self.config_dir.join("config.toml")
    }

    /// The keystore lives under the config dir so it shares the 0700 directory with settings.
    pub fn keystore_file(&self, file_name: &str) -> PathBuf {
        self.config_dir.join(file_name)
    }

    pub fn keystore_lock_file(&self) -> PathBuf {
        self.data_dir.join("keystore.lock")
    }

    pub fn sent_journal_file(&self) -> PathBuf {
        self.data_dir.join("sent.jsonl")
    }

    pub fn ensure_private_dirs(&self) -> eyre::Result<()> {
        crate::fsutil::ensure_private_dir(&self.config_dir)?;
        crate::fsutil::ensure_private_dir(&self.data_dir)?;
        Ok(())
    }
}
