//! Outgoing transfer assembly, signing and submission.

use crate::{
    amount::parse_amount_base_u256,
    client::{BlockchainClient, TxReceipt},
    config::MAX_RECEIPT_TIMEOUT_SECONDS,
    errors::WalletError,
    journal::{SentJournal, SentOutcome, SentRecord},
    keys::KeyMaterial,
};
use alloy::{
    consensus::{SignableTransaction as _, TxEnvelope, TxLegacy},
    eips::eip2718::{Decodable2718 as _, Encodable2718 as _},
    primitives::{Address, Bytes, TxKind, B256, U256},
    signers::SignerSync as _,
};
use std::{str::FromStr as _, time::Duration};

/// Gas used by a plain value transfer; used when estimation fails.
pub const DEFAULT_TRANSFER_GAS: u64 = 21_000;
const MAX_RECEIPT_TIMEOUT: Duration = Duration::from_secs(MAX_RECEIPT_TIMEOUT_SECONDS);

/// Raw user input for a transfer. Nothing here is trusted until [`TransferRequest::validate`].
#[derive(Debug, Clone, Default)]
pub struct TransferRequest {
    pub to: String,
    /// Base units, decimal integer.
    pub value: String,
    /// Estimated by the node when omitted.
    pub gas_limit: Option<u64>,
    /// Base units per gas, decimal integer. Node suggestion when omitted.
    pub gas_price: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidatedTransfer {
    pub to: Address,
    pub value: U256,
    pub gas_limit: Option<u64>,
    pub gas_price: Option<u128>,
}

/// `0x` followed by exactly 40 hex digits. Checksum casing is not enforced.
pub fn parse_recipient(s: &str) -> Result<Address, WalletError> {
    let s = s.trim();
    let body = s
        .strip_prefix("0x")
        .ok_or_else(|| WalletError::validation("recipient must start with 0x"))?;
    if body.len() != 40 || !body.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(WalletError::validation(
            "recipient must be 0x followed by 40 hex characters",
        ));
    }
    Address::from_str(s).map_err(|e| WalletError::validation(format!("recipient: {e}")))
}

impl TransferRequest {
    pub fn validate(&self) -> Result<ValidatedTransfer, WalletError> {
        let to = parse_recipient(&self.to)?;
        let value = parse_amount_base_u256(&self.value)
            .map_err(|e| WalletError::validation(format!("value: {e}")))?;
        if self.gas_limit == Some(0) {
            return Err(WalletError::validation("gas limit must be positive"));
        }
        let gas_price = self
            .gas_price
            .as_deref()
            .map(|p| {
                let wide = parse_amount_base_u256(p)
                    .map_err(|e| WalletError::validation(format!("gas price: {e}")))?;
                u128::try_from(wide).map_err(|_e| WalletError::validation("gas price too large"))
            })
            .transpose()?;
        Ok(ValidatedTransfer {
            to,
            value,
            gas_limit: self.gas_limit,
            gas_price,
        })
    }
}

/// Fully specified, unsigned transfer. The sender is fixed by the key it was built for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingTransaction {
    from: Address,
    pub to: Address,
    pub value: U256,
    pub gas_limit: u64,
    pub gas_price: u128,
    pub nonce: u64,
    pub chain_id: u64,
}

impl OutgoingTransaction {
    pub fn new(
        key: &KeyMaterial,
        transfer: &ValidatedTransfer,
        gas_limit: u64,
        gas_price: u128,
        nonce: u64,
        chain_id: u64,
    ) -> Self {
        Self {
            from: key.address(),
            to: transfer.to,
            value: transfer.value,
            gas_limit,
            gas_price,
            nonce,
            chain_id,
        }
    }

    pub const fn sender(&self) -> Address {
        self.from
    }

    fn to_legacy(&self) -> TxLegacy {
        TxLegacy {
            chain_id: Some(self.chain_id),
            nonce: self.nonce,
            gas_price: self.gas_price,
            gas_limit: self.gas_limit,
            to: TxKind::Call(self.to),
            value: self.value,
            input: Bytes::new(),
        }
    }
}

/// Signed EIP-155 legacy transaction ready for `eth_sendRawTransaction`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedTransactionEnvelope {
    raw_bytes: Bytes,
    tx_hash: B256,
}

impl SignedTransactionEnvelope {
    pub const fn raw_bytes(&self) -> &Bytes {
        &self.raw_bytes
    }

    pub const fn tx_hash(&self) -> B256 {
        self.tx_hash
    }

    /// Decode the envelope and recover who signed it.
    pub fn recover_signer(&self) -> Result<Address, WalletError> {
        let env = TxEnvelope::decode_2718(&mut self.raw_bytes.as_ref())
            .map_err(|e| WalletError::Signing(format!("decode envelope: {e}")))?;
        let signed = env
            .as_legacy()
            .ok_or_else(|| WalletError::Signing("not a legacy transaction".into()))?;
        signed
            .signature()
            .recover_address_from_prehash(&signed.tx().signature_hash())
            .map_err(|e| WalletError::Signing(format!("recover signer: {e}")))
    }
}

/// Deterministic (RFC 6979) signature over the EIP-155 signing hash.
pub fn sign_transaction(
    key: &KeyMaterial,
    tx: &OutgoingTransaction,
) -> Result<SignedTransactionEnvelope, WalletError> {
    if tx.gas_limit == 0 {
        return Err(WalletError::validation("gas limit must be positive"));
    }
    if tx.from != key.address() {
        return Err(WalletError::Signing(
            "transaction sender does not match the signing key".into(),
        ));
    }
    let unsigned = tx.to_legacy();
    let sig = key
        .signer()
        .sign_hash_sync(&unsigned.signature_hash())
        .map_err(|e| WalletError::Signing(e.to_string()))?;
    let signed = unsigned.into_signed(sig);
    let tx_hash = *signed.hash();
    let raw_bytes = Bytes::from(TxEnvelope::Legacy(signed).encoded_2718());
    Ok(SignedTransactionEnvelope { raw_bytes, tx_hash })
}

/// Assembles transfers against chain state supplied by a [`BlockchainClient`].
pub struct TransactionBuilder<'a> {
    client: &'a dyn BlockchainClient,
    journal: Option<&'a SentJournal>,
}

impl<'a> TransactionBuilder<'a> {
    pub const fn new(client: &'a dyn BlockchainClient) -> Self {
        Self {
            client,
            journal: None,
        }
    }

    /// Record every broadcast and its outcome.
    #[must_use]
    pub const fn with_journal(mut self, journal: &'a SentJournal) -> Self {
        self.journal = Some(journal);
        self
    }

    /// Validate, fill in gas and chain id, and sign with the given nonce.
    pub async fn build(
        &self,
        key: &KeyMaterial,
        req: &TransferRequest,
        nonce: u64,
    ) -> Result<SignedTransactionEnvelope, WalletError> {
        let transfer = req.validate()?;
        let tx = self.prepare(key, &transfer, nonce).await?;
        sign_transaction(key, &tx)
    }

    /// Resolve the fields the caller left open.
    pub async fn prepare(
        &self,
        key: &KeyMaterial,
        transfer: &ValidatedTransfer,
        nonce: u64,
    ) -> Result<OutgoingTransaction, WalletError> {
        let from = key.address();
        let chain_id = self.client.chain_id().await?;
        let gas_price = match transfer.gas_price {
            Some(p) => p,
            None => self.client.suggested_gas_price().await?,
        };
        let gas_limit = match transfer.gas_limit {
            Some(g) => g,
            None => match self
                .client
                .estimate_gas(from, transfer.to, transfer.value)
                .await
            {
                Ok(g) if g > 0 => g,
                Ok(_) => DEFAULT_TRANSFER_GAS,
                Err(e) => {
                    tracing::warn!(
                        code = e.code(),
                        error = %e,
                        "gas estimate failed; using default"
                    );
                    DEFAULT_TRANSFER_GAS
                }
            },
        };
        Ok(OutgoingTransaction::new(
            key, transfer, gas_limit, gas_price, nonce, chain_id,
        ))
    }

    /// Fetch a fresh nonce, sign, broadcast, then wait up to `timeout` for the receipt.
    pub async fn send(
        &self,
        key: &KeyMaterial,
        req: &TransferRequest,
        timeout: Duration,
    ) -> Result<TxReceipt, WalletError> {
        let transfer = req.validate()?;
        let nonce = self.client.nonce_of(key.address()).await?;
        let tx = self.prepare(key, &transfer, nonce).await?;
        self.submit(key, &tx, timeout).await
    }

    /// Sign a prepared transaction, broadcast it and wait for the receipt.
    ///
    /// Front ends that show the resolved gas before asking for confirmation call `prepare` and
    /// then this. The nonce is re-read from the node right before signing; if it moved while the
    /// user was deciding, nothing is signed and the caller has to prepare again.
    pub async fn submit(
        &self,
        key: &KeyMaterial,
        tx: &OutgoingTransaction,
        timeout: Duration,
    ) -> Result<TxReceipt, WalletError> {
        if timeout > MAX_RECEIPT_TIMEOUT {
            return Err(WalletError::validation(format!(
                "receipt timeout {timeout:?} exceeds {MAX_RECEIPT_TIMEOUT:?}"
            )));
        }
        let current = self.client.nonce_of(tx.sender()).await?;
        if current != tx.nonce {
            tracing::warn!(prepared = tx.nonce, current, "nonce moved before signing");
            return Err(WalletError::validation(format!(
                "nonce moved from {} to {current} since the transaction was prepared; \
                 nothing was signed",
                tx.nonce
            )));
        }
        let envelope = sign_transaction(key, tx)?;

        let tx_hash = self.client.broadcast(&envelope).await?;
        tracing::info!(%tx_hash, nonce = tx.nonce, to = %tx.to, "transaction broadcast");
        self.record(tx, tx_hash, SentOutcome::Submitted);

        match self.client.wait_for_receipt(tx_hash, timeout).await {
            Ok(receipt) => {
                let outcome = if receipt.success {
                    SentOutcome::Confirmed
                } else {
                    SentOutcome::Failed
                };
                self.record(tx, tx_hash, outcome);
                Ok(receipt)
            }
            Err(e) => {
                if matches!(e, WalletError::Timeout { .. }) {
                    self.record(tx, tx_hash, SentOutcome::Timeout);
                }
                Err(e)
            }
        }
    }

    fn record(&self, tx: &OutgoingTransaction, tx_hash: B256, outcome: SentOutcome) {
        let Some(journal) = self.journal else {
            return;
        };
        let rec = SentRecord::now(tx_hash, tx.nonce, tx.to, tx.value, outcome);
        if let Err(e) = journal.append(&rec) {
            tracing::warn!(%tx_hash, error = %format!("{e:#}"), "failed to append sent journal");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::keccak256;
    use secrecy::SecretString;

    const KEY_HEX: &str = "0x4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318";
    const DEAD: &str = "0x000000000000000000000000000000000000dEaD";

    fn key() -> eyre::Result<KeyMaterial> {
        Ok(KeyMaterial::from_hex(&SecretString::new(
            KEY_HEX.to_owned().into(),
        ))?)
    }

    fn transfer() -> eyre::Result<ValidatedTransfer> {
        Ok(TransferRequest {
            to: DEAD.into(),
            value: "1500000000000000000".into(),
            gas_limit: Some(21_000),
            gas_price: Some("1000000000".into()),
        }
        .validate()?)
    }

    #[test]
    fn validation_rejects_bad_recipient_forms() {
        for bad in [
            "000000000000000000000000000000000000dEaD",
            "0x000000000000000000000000000000000000dEa",
            "0x000000000000000000000000000000000000dEaDD",
            "0x000000000000000000000000000000000000dEaZ",
            "",
        ] {
            assert!(
                matches!(parse_recipient(bad), Err(WalletError::Validation(_))),
                "{bad:?}"
            );
        }
        assert!(parse_recipient(DEAD).is_ok());
    }

    #[test]
    fn validation_rejects_negative_value_and_zero_gas() {
        let neg = TransferRequest {
            to: DEAD.into(),
            value: "-1".into(),
            ..Default::default()
        };
        assert!(matches!(neg.validate(), Err(WalletError::Validation(_))));

        let zero_gas = TransferRequest {
            to: DEAD.into(),
            value: "1".into(),
            gas_limit: Some(0),
            gas_price: None,
        };
        assert!(matches!(zero_gas.validate(), Err(WalletError::Validation(_))));

        let neg_price = TransferRequest {
            to: DEAD.into(),
            value: "1".into(),
            gas_limit: None,
            gas_price: Some("-5".into()),
        };
        assert!(matches!(neg_price.validate(), Err(WalletError::Validation(_))));
    }

    #[test]
    fn signing_is_deterministic_and_recoverable() -> eyre::Result<()> {
        let k = key()?;
        let tx = OutgoingTransaction::new(&k, &transfer()?, 21_000, 1_000_000_000, 5, 1337);
        let a = sign_transaction(&k, &tx)?;
        let b = sign_transaction(&k, &tx)?;
        assert_eq!(a, b);
        assert_eq!(a.recover_signer()?, k.address());
        assert_eq!(a.tx_hash(), keccak256(a.raw_bytes()));
        Ok(())
    }

    #[test]
    fn consecutive_nonces_hash_differently() -> eyre::Result<()> {
        let k = key()?;
        let t = transfer()?;
        let a = sign_transaction(&k, &OutgoingTransaction::new(&k, &t, 21_000, 1, 5, 1))?;
        let b = sign_transaction(&k, &OutgoingTransaction::new(&k, &t, 21_000, 1, 6, 1))?;
        assert_ne!(a.tx_hash(), b.tx_hash());
        Ok(())
    }

    #[test]
    fn chain_id_is_bound_into_the_signature() -> eyre::Result<()> {
        let k = key()?;
        let t = transfer()?;
        let a = sign_transaction(&k, &OutgoingTransaction::new(&k, &t, 21_000, 1, 0, 1))?;
        let b = sign_transaction(&k, &OutgoingTransaction::new(&k, &t, 21_000, 1, 0, 2))?;
        assert_ne!(a.raw_bytes(), b.raw_bytes());
        Ok(())
    }

    #[test]
    fn foreign_key_cannot_sign() -> eyre::Result<()> {
        let k = key()?;
        let other = KeyMaterial::generate();
        let tx = OutgoingTransaction::new(&k, &transfer()?, 21_000, 1, 0, 1);
        assert!(matches!(
            sign_transaction(&other, &tx),
            Err(WalletError::Signing(_))
        ));
        Ok(())
    }
}
