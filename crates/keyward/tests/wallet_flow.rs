use alloy::{
    consensus::{Transaction as _, TxEnvelope},
    eips::eip2718::Decodable2718 as _,
    primitives::{Address, B256, U256},
};
use async_trait::async_trait;
use keyward::{
    client::{BlockchainClient, TxReceipt, TxRecord},
    errors::WalletError,
    journal::{SentJournal, SentOutcome},
    keystore::KeystoreFile,
    lifecycle::{KeySource, WalletLifecycle, WalletState},
    query,
    tx::{TransactionBuilder, TransferRequest, DEFAULT_TRANSFER_GAS},
};
use secrecy::SecretString;
use std::{
    path::Path,
    str::FromStr as _,
    sync::Mutex,
    time::Duration,
};

const KEY_HEX: &str = "0x4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318";
const DEAD: &str = "0x000000000000000000000000000000000000dEaD";

fn pw(s: &str) -> SecretString {
    SecretString::new(s.to_owned().into())
}

fn keystore_in(dir: &Path) -> KeystoreFile {
    KeystoreFile::at(
        dir.join("cfg").join("wallet.key"),
        dir.join("data").join("keystore.lock"),
    )
}

#[derive(Default)]
struct Calls {
    nonce: u32,
    estimate: u32,
    broadcast: Vec<Vec<u8>>,
}

/// In-memory node.
struct FakeNode {
    chain_id: u64,
    height: u64,
    nonce: u64,
    /// Added to `nonce` on every query after the first, as if another sender kept using the key.
    nonce_step: u64,
    gas_price: u128,
    estimate: Option<u64>,
    mined: bool,
    records: Vec<TxRecord>,
    calls: Mutex<Calls>,
}

impl FakeNode {
    fn new() -> Self {
        Self {
            chain_id: 1337,
            height: 2_000,
            nonce: 0,
            nonce_step: 0,
            gas_price: 1_000_000_000,
            estimate: Some(30_000),
            mined: true,
            records: vec![],
            calls: Mutex::new(Calls::default()),
        }
    }

    fn with_calls<T>(&self, f: impl FnOnce(&mut Calls) -> T) -> Result<T, WalletError> {
        let mut guard = self
            .calls
            .lock()
            .map_err(|e| WalletError::Network(format!("poisoned: {e}")))?;
        Ok(f(&mut guard))
    }
}

#[async_trait]
impl BlockchainClient for FakeNode {
    async fn chain_id(&self) -> Result<u64, WalletError> {
        Ok(self.chain_id)
    }

    async fn current_block_height(&self) -> Result<u64, WalletError> {
        Ok(self.height)
    }

    async fn balance_of(&self, _address: Address) -> Result<U256, WalletError> {
        Ok(U256::from(2_500_000_000_000_000_000_u128))
    }

    async fn nonce_of(&self, _address: Address) -> Result<u64, WalletError> {
        let earlier = self.with_calls(|c| {
            c.nonce += 1;
            c.nonce - 1
        })?;
        Ok(self.nonce + self.nonce_step * u64::from(earlier))
    }

    async fn suggested_gas_price(&self) -> Result<u128, WalletError> {
        Ok(self.gas_price)
    }

    async fn estimate_gas(
        &self,
        _from: Address,
        _to: Address,
        _value: U256,
    ) -> Result<u64, WalletError> {
        self.with_calls(|c| c.estimate += 1)?;
        self.estimate
            .ok_or_else(|| WalletError::Network("execution reverted".into()))
    }

    async fn broadcast(
        &self,
        tx: &keyward::tx::SignedTransactionEnvelope,
    ) -> Result<B256, WalletError> {
        let raw = tx.raw_bytes().to_vec();
        self.with_calls(|c| c.broadcast.push(raw))?;
        Ok(tx.tx_hash())
    }

    async fn wait_for_receipt(
        &self,
        tx_hash: B256,
        _timeout: Duration,
    ) -> Result<TxReceipt, WalletError> {
        if self.mined {
            Ok(TxReceipt {
                tx_hash,
                block_number: Some(self.height + 1),
                gas_used: 21_000,
                success: true,
            })
        } else {
            Err(WalletError::Timeout { tx_hash })
        }
    }

    async fn transactions_in_range(
        &self,
        address: Address,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<TxRecord>, WalletError> {
        Ok(self
            .records
            .iter()
            .filter(|r| (from_block..=to_block).contains(&r.block_number))
            .filter(|r| r.from == address || r.to == Some(address))
            .cloned()
            .collect())
    }
}

fn unlocked_import(dir: &Path) -> eyre::Result<WalletLifecycle> {
    let mut w = WalletLifecycle::open(keystore_in(dir));
    w.create(&KeySource::Import(pw(KEY_HEX)), &pw("correct-horse"), &pw("correct-horse"))?;
    Ok(w)
}

#[test]
fn generated_key_survives_reload_from_disk() -> eyre::Result<()> {
    let dir = tempfile::tempdir()?;
    let mut first = WalletLifecycle::open(keystore_in(dir.path()));
    let address = first.create(&KeySource::Generate, &pw("correct-horse"), &pw("correct-horse"))?;
    let scalar = first.reveal_private_key(&pw("correct-horse"))?;
    drop(first);

    let mut again = WalletLifecycle::open(keystore_in(dir.path()));
    assert_eq!(again.state(), WalletState::Locked);
    assert_eq!(again.unlock(&pw("correct-horse"))?, address);
    let reloaded = again.reveal_private_key(&pw("correct-horse"))?;
    assert_eq!(reloaded.as_str(), scalar.as_str());
    assert_eq!(reloaded.len(), 2 + 64);
    Ok(())
}

#[test]
fn keystore_file_is_json_with_salt_and_wallet() -> eyre::Result<()> {
    let dir = tempfile::tempdir()?;
    let w = unlocked_import(dir.path())?;
    let s = std::fs::read_to_string(w.keystore().path())?;
    let v: serde_json::Value = serde_json::from_str(&s)?;
    assert!(v.get("salt").and_then(serde_json::Value::as_str).is_some());
    assert!(v.get("wallet").and_then(serde_json::Value::as_str).is_some());
    assert!(!s.contains(KEY_HEX.trim_start_matches("0x")), "plaintext key on disk");
    Ok(())
}

#[tokio::test]
async fn transfer_to_dead_address_signs_and_recovers_sender() -> eyre::Result<()> {
    let dir = tempfile::tempdir()?;
    let w = unlocked_import(dir.path())?;
    let key = w.key_material()?;
    let node = FakeNode::new();

    let req = TransferRequest {
        to: DEAD.into(),
        value: "1500000000000000000".into(),
        gas_limit: Some(21_000),
        gas_price: Some("1000000000".into()),
    };
    let env = TransactionBuilder::new(&node).build(key, &req, 5).await?;
    assert_eq!(env.recover_signer()?, key.address());

    let decoded = TxEnvelope::decode_2718(&mut env.raw_bytes().as_ref())?;
    assert_eq!(decoded.nonce(), 5);
    assert_eq!(decoded.gas_limit(), 21_000);
    assert_eq!(decoded.chain_id(), Some(1337));
    assert_eq!(decoded.to(), Some(Address::from_str(DEAD)?));
    assert_eq!(decoded.value(), U256::from(1_500_000_000_000_000_000_u128));
    assert_eq!(node.with_calls(|c| c.estimate)?, 0, "explicit gas limit skips estimate");
    Ok(())
}

#[tokio::test]
async fn negative_value_is_rejected_before_touching_the_node() -> eyre::Result<()> {
    let dir = tempfile::tempdir()?;
    let w = unlocked_import(dir.path())?;
    let node = FakeNode::new();
    let req = TransferRequest {
        to: DEAD.into(),
        value: "-1".into(),
        ..Default::default()
    };
    let res = TransactionBuilder::new(&node)
        .send(w.key_material()?, &req, Duration::from_secs(1))
        .await;
    assert!(matches!(res, Err(WalletError::Validation(_))));
    let (nonce_calls, sent) = node.with_calls(|c| (c.nonce, c.broadcast.len()))?;
    assert_eq!(nonce_calls, 0);
    assert_eq!(sent, 0);
    Ok(())
}

#[tokio::test]
async fn send_uses_fresh_nonce_and_journals_outcome() -> eyre::Result<()> {
    let dir = tempfile::tempdir()?;
    let w = unlocked_import(dir.path())?;
    let node = FakeNode {
        nonce: 7,
        ..FakeNode::new()
    };
    let journal = SentJournal::new(dir.path().join("data").join("sent.jsonl"));
    let req = TransferRequest {
        to: DEAD.into(),
        value: "1".into(),
        ..Default::default()
    };

    let receipt = TransactionBuilder::new(&node)
        .with_journal(&journal)
        .send(w.key_material()?, &req, Duration::from_secs(1))
        .await?;
    assert!(receipt.success);

    let raw = node
        .with_calls(|c| c.broadcast.first().cloned())?
        .ok_or_else(|| eyre::eyre!("nothing broadcast"))?;
    let decoded = TxEnvelope::decode_2718(&mut raw.as_slice())?;
    assert_eq!(decoded.nonce(), 7);
    assert_eq!(decoded.gas_limit(), 30_000, "node estimate is used");
    assert_eq!(decoded.gas_price(), Some(1_000_000_000));

    let outcomes: Vec<_> = journal.read_all()?.iter().map(|r| r.outcome).collect();
    assert_eq!(outcomes, vec![SentOutcome::Submitted, SentOutcome::Confirmed]);
    assert!(journal
        .read_all()?
        .iter()
        .all(|r| r.tx_hash == receipt.tx_hash && r.nonce == 7));
    Ok(())
}

#[tokio::test]
async fn nonce_that_moves_during_confirmation_is_not_signed() -> eyre::Result<()> {
    let dir = tempfile::tempdir()?;
    let w = unlocked_import(dir.path())?;
    let key = w.key_material()?;
    let node = FakeNode {
        nonce: 3,
        nonce_step: 1,
        ..FakeNode::new()
    };
    let journal = SentJournal::new(dir.path().join("sent.jsonl"));
    let builder = TransactionBuilder::new(&node).with_journal(&journal);
    let transfer = TransferRequest {
        to: DEAD.into(),
        value: "1".into(),
        ..Default::default()
    }
    .validate()?;

    let nonce = node.nonce_of(key.address()).await?;
    let tx = builder.prepare(key, &transfer, nonce).await?;
    // Another transaction from the same key lands while the user reads the summary.
    let res = builder.submit(key, &tx, Duration::from_secs(1)).await;

    assert!(
        matches!(&res, Err(WalletError::Validation(m)) if m.contains("nonce moved")),
        "{res:?}"
    );
    assert_eq!(node.with_calls(|c| c.broadcast.len())?, 0);
    assert!(journal.read_all()?.is_empty());
    Ok(())
}

#[tokio::test]
async fn oversized_receipt_timeout_is_refused_before_signing() -> eyre::Result<()> {
    let dir = tempfile::tempdir()?;
    let w = unlocked_import(dir.path())?;
    let node = FakeNode::new();
    let req = TransferRequest {
        to: DEAD.into(),
        value: "1".into(),
        ..Default::default()
    };
    let res = TransactionBuilder::new(&node)
        .send(w.key_material()?, &req, Duration::from_secs(u64::MAX))
        .await;
    assert!(matches!(res, Err(WalletError::Validation(_))), "{res:?}");
    assert_eq!(node.with_calls(|c| c.broadcast.len())?, 0);
    Ok(())
}

#[tokio::test]
async fn failed_estimate_falls_back_to_plain_transfer_gas() -> eyre::Result<()> {
    let dir = tempfile::tempdir()?;
    let w = unlocked_import(dir.path())?;
    let node = FakeNode {
        estimate: None,
        ..FakeNode::new()
    };
    let req = TransferRequest {
        to: DEAD.into(),
        value: "1".into(),
        ..Default::default()
    };
    let env = TransactionBuilder::new(&node)
        .build(w.key_material()?, &req, 0)
        .await?;
    let decoded = TxEnvelope::decode_2718(&mut env.raw_bytes().as_ref())?;
    assert_eq!(decoded.gas_limit(), DEFAULT_TRANSFER_GAS);
    Ok(())
}

#[tokio::test]
async fn receipt_timeout_carries_hash_and_is_journaled() -> eyre::Result<()> {
    let dir = tempfile::tempdir()?;
    let w = unlocked_import(dir.path())?;
    let node = FakeNode {
        mined: false,
        ..FakeNode::new()
    };
    let journal = SentJournal::new(dir.path().join("sent.jsonl"));
    let req = TransferRequest {
        to: DEAD.into(),
        value: "1".into(),
        ..Default::default()
    };
    let err = TransactionBuilder::new(&node)
        .with_journal(&journal)
        .send(w.key_material()?, &req, Duration::from_millis(1))
        .await
        .err()
        .ok_or_else(|| eyre::eyre!("expected timeout"))?;
    let WalletError::Timeout { tx_hash } = err else {
        eyre::bail!("expected timeout, got {err:?}");
    };
    let latest = journal.latest_by_hash()?;
    assert_eq!(latest.len(), 1);
    assert_eq!(
        latest.first().map(|r| (r.tx_hash, r.outcome)),
        Some((tx_hash, SentOutcome::Timeout))
    );
    Ok(())
}

#[tokio::test]
async fn locked_wallet_cannot_lend_key() -> eyre::Result<()> {
    let dir = tempfile::tempdir()?;
    let mut w = unlocked_import(dir.path())?;
    w.lock()?;
    assert!(matches!(
        w.key_material(),
        Err(WalletError::InvalidState { op: "sign", state: "locked" })
    ));
    Ok(())
}

#[tokio::test]
async fn status_and_history_only_need_the_address() -> eyre::Result<()> {
    let dir = tempfile::tempdir()?;
    let address = unlocked_import(dir.path())?.address()?;
    let other = Address::repeat_byte(0x42);
    let rec = |block_number: u64, from: Address, to: Address| TxRecord {
        block_number,
        tx_hash: B256::repeat_byte(u8::try_from(block_number % 256).unwrap_or(0)),
        from,
        to: Some(to),
        value: U256::from(1_u64),
    };
    let node = FakeNode {
        records: vec![
            rec(100, address, other),
            rec(1_500, other, address),
            rec(1_999, other, other),
        ],
        ..FakeNode::new()
    };

    let st = query::status(&node, address).await?;
    assert_eq!(st.block_height, 2_000);
    assert_eq!(st.balance, U256::from(2_500_000_000_000_000_000_u128));

    let h = query::recent_history(&node, address, 1_080).await?;
    assert_eq!((h.from_block, h.to_block), (920, 2_000));
    assert_eq!(h.records.len(), 1);
    assert_eq!(h.records.first().map(|r| r.direction(address)), Some("in"));
    Ok(())
}
