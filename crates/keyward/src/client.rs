//! Capability the wallet needs from a node.

use crate::{errors::WalletError, tx::SignedTransactionEnvelope};
use alloy::primitives::{Address, B256, U256};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxReceipt {
    pub tx_hash: B256,
    pub block_number: Option<u64>,
    pub gas_used: u64,
    pub success: bool,
}

/// One transaction touching a watched address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxRecord {
    pub block_number: u64,
    pub tx_hash: B256,
    pub from: Address,
    /// `None` for contract creation.
    pub to: Option<Address>,
    pub value: U256,
}

impl TxRecord {
    pub fn direction(&self, owner: Address) -> &'static str {
        match (self.from == owner, self.to == Some(owner)) {
            (true, true) => "self",
            (true, false) => "out",
            _ => "in",
        }
    }
}

/// Everything here is public chain data; implementations never see key material.
#[async_trait]
pub trait BlockchainClient: Send + Sync {
    async fn chain_id(&self) -> Result<u64, WalletError>;

    async fn current_block_height(&self) -> Result<u64, WalletError>;

    async fn balance_of(&self, address: Address) -> Result<U256, WalletError>;

    /// Next nonce the node expects from `address`, counting pending transactions.
    async fn nonce_of(&self, address: Address) -> Result<u64, WalletError>;

    async fn suggested_gas_price(&self) -> Result<u128, WalletError>;

    async fn estimate_gas(&self, from: Address, to: Address, value: U256)
        -> Result<u64, WalletError>;

    async fn broadcast(&self, tx: &SignedTransactionEnvelope) -> Result<B256, WalletError>;

    /// Poll until the receipt shows up; `WalletError::Timeout` after `timeout`.
    async fn wait_for_receipt(
        &self,
        tx_hash: B256,
        timeout: Duration,
    ) -> Result<TxReceipt, WalletError>;

    /// Transactions from or to `address` in `from_block..=to_block`. Blocks that cannot be loaded
    /// are skipped.
    async fn transactions_in_range(
        &self,
        address: Address,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<TxRecord>, WalletError>;
}
