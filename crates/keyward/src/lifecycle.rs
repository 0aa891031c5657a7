//! Create/import/unlock/reset state machine over the keystore file.
//!
//! Front ends drive the transitions and never touch the keystore directly. Every method either
//! completes its transition or leaves both the in-memory state and the file untouched.

use crate::{
    errors::WalletError,
    keys::KeyMaterial,
    keystore::{self, KeystoreFile},
};
use alloy::primitives::Address;
use secrecy::{ExposeSecret as _, SecretString};
use zeroize::Zeroizing;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalletState {
    NoKeystore,
    Locked,
    Unlocked,
    Terminated,
}

impl WalletState {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NoKeystore => "no_keystore",
            Self::Locked => "locked",
            Self::Unlocked => "unlocked",
            Self::Terminated => "terminated",
        }
    }
}

/// Where the key for a new keystore comes from.
#[derive(Debug)]
pub enum KeySource {
    Generate,
    /// Hex private key, optionally `0x`-prefixed.
    Import(SecretString),
}

/// Explicit answer to a destructive-operation prompt. Separate from authentication.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confirmation {
    Confirmed,
    Declined,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryAction {
    Retry,
    Reimport,
    Abandon,
}

const RECOVERY_ACTIONS: [RecoveryAction; 3] = [
    RecoveryAction::Retry,
    RecoveryAction::Reimport,
    RecoveryAction::Abandon,
];

enum Inner {
    NoKeystore,
    Locked { failed_attempts: u32 },
    Unlocked(KeyMaterial),
    Terminated,
}

pub struct WalletLifecycle {
    file: KeystoreFile,
    inner: Inner,
}

impl std::fmt::Debug for WalletLifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WalletLifecycle")
            .field("keystore", &self.file.path())
            .field("state", &self.state())
            .finish()
    }
}

fn check_new_password(password: &SecretString, confirm: &SecretString) -> Result<(), WalletError> {
    if password.expose_secret().is_empty() {
        return Err(WalletError::validation("password must not be empty"));
    }
    if password.expose_secret() != confirm.expose_secret() {
        return Err(WalletError::validation("passwords do not match"));
    }
    Ok(())
}

fn key_from_source(source: &KeySource) -> Result<KeyMaterial, WalletError> {
    match source {
        KeySource::Generate => Ok(KeyMaterial::generate()),
        KeySource::Import(hex) => KeyMaterial::from_hex(hex),
    }
}

impl WalletLifecycle {
    /// A missing keystore file starts in `NoKeystore`, an existing one in `Locked`.
    pub fn open(file: KeystoreFile) -> Self {
        let inner = if file.exists() {
            Inner::Locked { failed_attempts: 0 }
        } else {
            Inner::NoKeystore
        };
        Self { file, inner }
    }

    pub const fn state(&self) -> WalletState {
        match self.inner {
            Inner::NoKeystore => WalletState::NoKeystore,
            Inner::Locked { .. } => WalletState::Locked,
            Inner::Unlocked(_) => WalletState::Unlocked,
            Inner::Terminated => WalletState::Terminated,
        }
    }

    pub const fn keystore(&self) -> &KeystoreFile {
        &self.file
    }

    /// Consecutive failed unlocks since the keystore was last opened or unlocked.
    pub const fn failed_attempts(&self) -> u32 {
        match self.inner {
            Inner::Locked { failed_attempts } => failed_attempts,
            Inner::NoKeystore | Inner::Unlocked(_) | Inner::Terminated => 0,
        }
    }

    /// Offered only after a failed unlock.
    pub const fn recovery_actions(&self) -> &'static [RecoveryAction] {
        match self.inner {
            Inner::Locked { failed_attempts } if failed_attempts > 0 => &RECOVERY_ACTIONS,
            Inner::Locked { .. } | Inner::NoKeystore | Inner::Unlocked(_) | Inner::Terminated => {
                &[]
            }
        }
    }

    fn invalid(&self, op: &'static str) -> WalletError {
        WalletError::InvalidState {
            op,
            state: self.state().as_str(),
        }
    }

    /// Generate or import a key, persist it encrypted, and enter `Unlocked`.
    pub fn create(
        &mut self,
        source: &KeySource,
        password: &SecretString,
        confirm: &SecretString,
    ) -> Result<Address, WalletError> {
        if !matches!(self.inner, Inner::NoKeystore) {
            return Err(self.invalid("create"));
        }
        self.persist_new_key(source, password, confirm)
    }

    fn persist_new_key(
        &mut self,
        source: &KeySource,
        password: &SecretString,
        confirm: &SecretString,
    ) -> Result<Address, WalletError> {
        let key = key_from_source(source)?;
        check_new_password(password, confirm)?;
        let sealed = keystore::encrypt(&key, password)?;
        self.file.save(&sealed)?;

        let address = key.address();
        let imported = matches!(source, KeySource::Import(_));
        tracing::info!(%address, imported, "keystore created");
        self.inner = Inner::Unlocked(key);
        Ok(address)
    }

    /// Decrypt the persisted keystore. A failure keeps the wallet `Locked` and enables recovery.
    pub fn unlock(&mut self, password: &SecretString) -> Result<Address, WalletError> {
        let Inner::Locked { failed_attempts } = self.inner else {
            return Err(self.invalid("unlock"));
        };
        match self.file.load().and_then(|ks| keystore::decrypt(&ks, password)) {
            Ok(key) => {
                let address = key.address();
                tracing::debug!(%address, "wallet unlocked");
                self.inner = Inner::Unlocked(key);
                Ok(address)
            }
            Err(e) => {
                let failed_attempts = failed_attempts.saturating_add(1);
                tracing::warn!(failed_attempts, code = e.code(), "unlock failed");
                self.inner = Inner::Locked { failed_attempts };
                Err(e)
            }
        }
    }

    /// Overwrite the keystore with a new key after a failed unlock.
    pub fn reimport(
        &mut self,
        source: &KeySource,
        password: &SecretString,
        confirm: &SecretString,
        confirmation: Confirmation,
    ) -> Result<Address, WalletError> {
        if !self.recovery_actions().contains(&RecoveryAction::Reimport) {
            return Err(self.invalid("reimport"));
        }
        if confirmation == Confirmation::Declined {
            return Err(WalletError::UserDeclined);
        }
        self.persist_new_key(source, password, confirm)
    }

    /// Give up after a failed unlock. Terminal.
    pub fn abandon(&mut self) -> Result<(), WalletError> {
        if !self.recovery_actions().contains(&RecoveryAction::Abandon) {
            return Err(self.invalid("abandon"));
        }
        tracing::debug!("wallet abandoned");
        self.inner = Inner::Terminated;
        Ok(())
    }

    /// Drop the in-memory key. The keystore file stays.
    pub fn lock(&mut self) -> Result<(), WalletError> {
        if !matches!(self.inner, Inner::Unlocked(_)) {
            return Err(self.invalid("lock"));
        }
        self.inner = Inner::Locked { failed_attempts: 0 };
        tracing::debug!("wallet locked");
        Ok(())
    }

    /// Delete the keystore. Requires an explicit yes and a password that decrypts the file on
    /// disk; the in-memory key is not trusted for this.
    pub fn reset(
        &mut self,
        confirmation: Confirmation,
        password: &SecretString,
    ) -> Result<(), WalletError> {
        if !matches!(self.inner, Inner::Unlocked(_)) {
            return Err(self.invalid("reset"));
        }
        if confirmation == Confirmation::Declined {
            return Err(WalletError::UserDeclined);
        }
        drop(self.reauthenticate(password)?);
        self.file.delete()?;
        tracing::info!(path = %self.file.path().display(), "keystore reset");
        self.inner = Inner::NoKeystore;
        Ok(())
    }

    /// `0x`-prefixed hex private key, after re-authenticating against the persisted keystore.
    pub fn reveal_private_key(
        &self,
        password: &SecretString,
    ) -> Result<Zeroizing<String>, WalletError> {
        if !matches!(self.inner, Inner::Unlocked(_)) {
            return Err(self.invalid("export_key"));
        }
        let key = self.reauthenticate(password)?;
        Ok(Zeroizing::new(format!(
            "0x{}",
            hex::encode(key.private_key_bytes().as_slice())
        )))
    }

    fn reauthenticate(&self, password: &SecretString) -> Result<KeyMaterial, WalletError> {
        let ks = self.file.load()?;
        keystore::decrypt(&ks, password).inspect_err(|_| {
            tracing::warn!("re-authentication failed");
        })
    }

    /// Borrow the unlocked key for signing.
    pub fn key_material(&self) -> Result<&KeyMaterial, WalletError> {
        match &self.inner {
            Inner::Unlocked(key) => Ok(key),
            Inner::NoKeystore | Inner::Locked { .. } | Inner::Terminated => {
                Err(self.invalid("sign"))
            }
        }
    }

    pub fn address(&self) -> Result<Address, WalletError> {
        match &self.inner {
            Inner::Unlocked(key) => Ok(key.address()),
            Inner::NoKeystore | Inner::Locked { .. } | Inner::Terminated => {
                Err(self.invalid("address"))
            }
        }
    }
}
