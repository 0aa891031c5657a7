use crate::{
    client::{BlockchainClient, TxReceipt, TxRecord},
    config::RpcConfig,
    errors::WalletError,
    retry::{never_final, with_endpoint_failover, BackoffConfig},
    tx::SignedTransactionEnvelope,
};
use alloy::{
    network::{ReceiptResponse as _, TransactionBuilder as _, TransactionResponse as _},
    primitives::{Address, B256, U256},
    providers::{Provider as _, RootProvider},
    rpc::types::{BlockNumberOrTag, TransactionReceipt, TransactionRequest},
};
use async_trait::async_trait;
use eyre::Context as _;
use reqwest::Client;
use std::time::Duration;
use tokio::sync::OnceCell;

const DEFAULT_RPC_TIMEOUT: Duration = Duration::from_secs(20);
const DEFAULT_RPC_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const RECEIPT_POLL_INTERVAL: Duration = Duration::from_millis(250);

type EvmProvider = RootProvider;

/// The node already has this exact transaction; broadcasting it again is a success.
fn broadcast_err_is_ok(err: &eyre::Report) -> bool {
    let s = format!("{err:#}").to_lowercase();
    s.contains("already known")
        || s.contains("known transaction")
        || s.contains("already imported")
        || s.contains("already in mempool")
}

/// The node understood the transaction and refused it; another endpoint will say the same.
fn broadcast_err_is_final(err: &eyre::Report) -> bool {
    let s = format!("{err:#}").to_lowercase();
    s.contains("nonce too low")
        || s.contains("insufficient funds")
        || s.contains("underpriced")
        || s.contains("intrinsic gas too low")
        || s.contains("invalid sender")
        || s.contains("exceeds block gas limit")
}

/// Node refusals become `Rejected` so callers never retry them; everything else is transport.
fn broadcast_error(err: &eyre::Report) -> WalletError {
    if broadcast_err_is_final(err) {
        WalletError::Rejected(format!("{err:#}"))
    } else {
        WalletError::network(err)
    }
}

fn receipt_from_rpc(r: &TransactionReceipt) -> TxReceipt {
    TxReceipt {
        tx_hash: r.transaction_hash(),
        block_number: r.block_number(),
        gas_used: r.gas_used(),
        success: r.status(),
    }
}

/// Keep the transaction only if it touches `watched`.
fn record_if_touches(
    watched: Address,
    block_number: u64,
    tx_hash: B256,
    from: Address,
    to: Option<Address>,
    value: U256,
) -> Option<TxRecord> {
    (from == watched || to == Some(watched)).then_some(TxRecord {
        block_number,
        tx_hash,
        from,
        to,
        value,
    })
}

/// JSON-RPC node client over `alloy` with ordered endpoint failover.
#[derive(Debug)]
pub struct EvmRpcClient {
    urls: Vec<String>,
    chain_id: OnceCell<u64>,
    backoff: BackoffConfig,
}

impl EvmRpcClient {
    pub fn new(rpc: &RpcConfig) -> eyre::Result<Self> {
        let urls = rpc.all_urls();
        if urls.is_empty() {
            eyre::bail!("no rpc endpoints configured");
        }
        for u in &urls {
            u.parse::<reqwest::Url>()
                .with_context(|| format!("invalid rpc url: {u}"))?;
        }
        Ok(Self {
            urls,
            chain_id: OnceCell::new_with(rpc.chain_id),
            backoff: BackoffConfig::default(),
        })
    }

    #[must_use]
    pub fn with_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn urls(&self) -> &[String] {
        &self.urls
    }

    fn provider_for_url(url: &str) -> eyre::Result<EvmProvider> {
        let u: reqwest::Url = url
            .parse()
            .with_context(|| format!("invalid rpc url: {url}"))?;
        let client = Client::builder()
            .timeout(DEFAULT_RPC_TIMEOUT)
            .connect_timeout(DEFAULT_RPC_CONNECT_TIMEOUT)
            .build()
            .context("build rpc http client")?;
        let http = alloy::transports::http::Http::with_client(client, u);
        let rpc_client = alloy::rpc::client::RpcClient::new(http, false);
        Ok(RootProvider::new(rpc_client))
    }

    async fn with_failover<T, Fut>(
        &self,
        label: &'static str,
        backoff: &BackoffConfig,
        f: impl Fn(EvmProvider) -> Fut + Sync,
    ) -> eyre::Result<T>
    where
        T: Send,
        Fut: std::future::Future<Output = eyre::Result<T>> + Send,
    {
        with_endpoint_failover(
            &self.urls,
            backoff,
            |u| {
                let u = u.clone();
                let f = &f;
                async move {
                    let p = Self::provider_for_url(&u)?;
                    f(p).await
                }
            },
            never_final,
            label,
        )
        .await
    }

    async fn fetch_receipt(&self, tx_hash: B256) -> eyre::Result<Option<TransactionReceipt>> {
        // The poll loop paces retries itself.
        self.with_failover("get transaction receipt", &BackoffConfig::immediate(1), |p| async move {
            p.get_transaction_receipt(tx_hash)
                .await
                .context("get transaction receipt")
        })
        .await
    }

    async fn block_records(&self, address: Address, number: u64) -> eyre::Result<Vec<TxRecord>> {
        let block = self
            .with_failover("get block", &BackoffConfig::immediate(1), |p| async move {
                p.get_block_by_number(BlockNumberOrTag::Number(number))
                    .full()
                    .await
                    .context("get block by number")
            })
            .await?;
        let Some(block) = block else {
            return Ok(vec![]);
        };
        Ok(block
            .transactions
            .txns()
            .filter_map(|tx| {
                record_if_touches(
                    address,
                    number,
                    tx.tx_hash(),
                    tx.from(),
                    alloy::consensus::Transaction::to(tx),
                    alloy::consensus::Transaction::value(tx),
                )
            })
            .collect())
    }
}

#[async_trait]
impl BlockchainClient for EvmRpcClient {
    async fn chain_id(&self) -> Result<u64, WalletError> {
        self.chain_id
            .get_or_try_init(|| async {
                self.with_failover("get chain id", &self.backoff, |p| async move {
                    p.get_chain_id().await.context("get chain id")
                })
                .await
            })
            .await
            .copied()
            .map_err(|e| WalletError::network(&e))
    }

    async fn current_block_height(&self) -> Result<u64, WalletError> {
        self.with_failover("get block number", &self.backoff, |p| async move {
            p.get_block_number().await.context("get block number")
        })
        .await
        .map_err(|e| WalletError::network(&e))
    }

    async fn balance_of(&self, address: Address) -> Result<U256, WalletError> {
        self.with_failover("get balance", &self.backoff, |p| async move {
            p.get_balance(address).await.context("get balance")
        })
        .await
        .map_err(|e| WalletError::network(&e))
    }

    async fn nonce_of(&self, address: Address) -> Result<u64, WalletError> {
        self.with_failover("get nonce", &self.backoff, |p| async move {
            p.get_transaction_count(address)
                .pending()
                .await
                .context("get transaction count")
        })
        .await
        .map_err(|e| WalletError::network(&e))
    }

    async fn suggested_gas_price(&self) -> Result<u128, WalletError> {
        self.with_failover("get gas price", &self.backoff, |p| async move {
            p.get_gas_price().await.context("get gas price")
        })
        .await
        .map_err(|e| WalletError::network(&e))
    }

    async fn estimate_gas(
        &self,
        from: Address,
        to: Address,
        value: U256,
    ) -> Result<u64, WalletError> {
        let req = TransactionRequest::default()
            .with_from(from)
            .with_to(to)
            .with_value(value);
        self.with_failover("estimate gas", &self.backoff, |p| {
            let req = req.clone();
            async move { p.estimate_gas(req).await.context("estimate gas") }
        })
        .await
        .map_err(|e| WalletError::network(&e))
    }

    async fn broadcast(&self, tx: &SignedTransactionEnvelope) -> Result<B256, WalletError> {
        let raw = tx.raw_bytes().clone();
        with_endpoint_failover(
            &self.urls,
            &self.backoff,
            |u| {
                let u = u.clone();
                let raw = raw.clone();
                async move {
                    let p = Self::provider_for_url(&u)?;
                    match p.send_raw_transaction(&raw).await {
                        Ok(_pending) => Ok(()),
                        Err(e) => {
                            let report: eyre::Report = e.into();
                            if broadcast_err_is_ok(&report) {
                                tracing::debug!(endpoint = %u, "node already has transaction");
                                Ok(())
                            } else {
                                Err(report.wrap_err("send raw transaction"))
                            }
                        }
                    }
                }
            },
            broadcast_err_is_final,
            "broadcast transaction",
        )
        .await
        .map_err(|e| {
            tracing::warn!(tx_hash = %tx.tx_hash(), error = %format!("{e:#}"), "broadcast failed");
            broadcast_error(&e)
        })?;
        Ok(tx.tx_hash())
    }

    async fn wait_for_receipt(
        &self,
        tx_hash: B256,
        timeout: Duration,
    ) -> Result<TxReceipt, WalletError> {
        let deadline = tokio::time::Instant::now()
            .checked_add(timeout)
            .ok_or_else(|| {
                WalletError::validation(format!("receipt timeout {timeout:?} is too large"))
            })?;
        loop {
            match self.fetch_receipt(tx_hash).await {
                Ok(Some(r)) => return Ok(receipt_from_rpc(&r)),
                Ok(None) => {}
                // A flaky node mid-wait is not a reason to give up before the deadline.
                Err(e) => {
                    tracing::debug!(%tx_hash, error = %format!("{e:#}"), "receipt poll failed");
                }
            }
            if tokio::time::Instant::now() + RECEIPT_POLL_INTERVAL > deadline {
                return Err(WalletError::Timeout { tx_hash });
            }
            tokio::time::sleep(RECEIPT_POLL_INTERVAL).await;
        }
    }

    async fn transactions_in_range(
        &self,
        address: Address,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<TxRecord>, WalletError> {
        if from_block > to_block {
            return Err(WalletError::validation(format!(
                "empty block range {from_block}..={to_block}"
            )));
        }
        let mut out = vec![];
        for number in from_block..=to_block {
            match self.block_records(address, number).await {
                Ok(mut recs) => out.append(&mut recs),
                Err(e) => {
                    tracing::warn!(block = number, error = %format!("{e:#}"), "skipping block");
                }
            }
        }
        Ok(out)
    }
}
