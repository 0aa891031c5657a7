//! Password-protected local secp256k1 wallet.
//!
//! The [`lifecycle::WalletLifecycle`] owns the only unlocked [`keys::KeyMaterial`]; the
//! [`tx::TransactionBuilder`] borrows it to sign EIP-155 transfers against chain state from a
//! [`client::BlockchainClient`].
#![expect(
    clippy::multiple_crate_versions,
    reason = "transitive dependency duplication"
)]

pub mod amount;
pub mod chains;
pub mod client;
pub mod config;
pub mod errors;
pub mod fsutil;
pub mod journal;
pub mod keys;
pub mod keystore;
pub mod lifecycle;
pub mod paths;
pub mod query;
pub mod retry;
pub mod store;
pub mod tx;

pub use errors::WalletError;
