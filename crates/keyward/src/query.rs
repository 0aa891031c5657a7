//! Read-only chain views for the wallet address. These take the address only; key material never
//! crosses into a network task.

use crate::{
    client::{BlockchainClient, TxRecord},
    errors::WalletError,
};
use alloy::primitives::{Address, U256};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WalletStatus {
    pub address: Address,
    pub block_height: u64,
    pub balance: U256,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct History {
    pub from_block: u64,
    pub to_block: u64,
    pub records: Vec<TxRecord>,
}

/// `max(0, height - span) ..= height`.
pub const fn recent_range(height: u64, span: u64) -> (u64, u64) {
    (height.saturating_sub(span), height)
}

pub async fn status(
    client: &dyn BlockchainClient,
    address: Address,
) -> Result<WalletStatus, WalletError> {
    let block_height = client.current_block_height().await?;
    let balance = client.balance_of(address).await?;
    Ok(WalletStatus {
        address,
        block_height,
        balance,
    })
}

/// Transactions touching `address` in the last `span` blocks.
pub async fn recent_history(
    client: &dyn BlockchainClient,
    address: Address,
    span: u64,
) -> Result<History, WalletError> {
    let height = client.current_block_height().await?;
    let (from_block, to_block) = recent_range(height, span);
    tracing::debug!(%address, from_block, to_block, "scanning history");
    let records = client
        .transactions_in_range(address, from_block, to_block)
        .await?;
    Ok(History {
        from_block,
        to_block,
        records,
    })
}
