pub mod codec;
pub mod kdf;

pub use codec::{decrypt, encrypt, EncryptedKeystore};

use crate::{config::WalletConfig, errors::WalletError, paths::WalletPaths};
use eyre::Context as _;
use fs2::FileExt as _;
use std::{
    fs::{File, OpenOptions},
    path::{Path, PathBuf},
};

/// The single keystore file plus the advisory lock that serializes writers.
#[derive(Debug, Clone)]
pub struct KeystoreFile {
    path: PathBuf,
    lock_path: PathBuf,
}

impl KeystoreFile {
    pub fn new(paths: &WalletPaths, cfg: &WalletConfig) -> Self {
        Self::at(
            paths.keystore_file(cfg.keystore_file.trim()),
            paths.keystore_lock_file(),
        )
    }

    pub const fn at(path: PathBuf, lock_path: PathBuf) -> Self {
        Self { path, lock_path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Read failures are storage errors; content that does not parse is an authentication error.
    pub fn load(&self) -> Result<EncryptedKeystore, WalletError> {
        let s = crate::fsutil::read_private_string(&self.path)
            .map_err(|e| WalletError::storage(&e))?;
        EncryptedKeystore::from_json(&s)
    }

    /// Atomically replace the keystore. On failure the previous file is left as it was.
    pub fn save(&self, ks: &EncryptedKeystore) -> Result<(), WalletError> {
        let body = ks.to_json()?;
        self.with_write_lock(|| {
            crate::fsutil::write_string_atomic_restrictive(
                &self.path,
                &body,
                crate::fsutil::MODE_FILE_PRIVATE,
            )
            .context("write keystore")
        })
        .map_err(|e| WalletError::storage(&e))?;
        tracing::debug!(path = %self.path.display(), "keystore saved");
        Ok(())
    }

    /// Returns `false` if there was no file to delete.
    pub fn delete(&self) -> Result<bool, WalletError> {
        let removed = self
            .with_write_lock(|| crate::fsutil::remove_private_file(&self.path))
            .map_err(|e| WalletError::storage(&e))?;
        tracing::debug!(path = %self.path.display(), removed, "keystore deleted");
        Ok(removed)
    }

    fn with_write_lock<T>(&self, f: impl FnOnce() -> eyre::Result<T>) -> eyre::Result<T> {
        let lock = self.acquire_write_lock()?;
        let out = f();
        fs2::FileExt::unlock(&lock).context("unlock keystore")?;
        out
    }

    fn acquire_write_lock(&self) -> eyre::Result<File> {
        if let Some(parent) = self.lock_path.parent() {
            crate::fsutil::ensure_private_dir(parent)?;
        }
        let mut oo = OpenOptions::new();
        oo.create(true).read(true).write(true).truncate(false);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt as _;
            oo.mode(crate::fsutil::MODE_FILE_PRIVATE);
        }
        let f = oo.open(&self.lock_path).context("open lock file")?;
        // Fail fast instead of hanging a prompt if another process is mid-write.
        match f.try_lock_exclusive() {
            Ok(()) => Ok(f),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                eyre::bail!("keystore is busy (another keyward process is writing)")
            }
            Err(e) => Err(eyre::Report::new(e).wrap_err("lock exclusive")),
        }
    }
}
