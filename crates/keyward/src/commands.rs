use crate::cli_output::{self, notice, print_json};
use eyre::Context as _;
use keyward::{
    amount::{
        format_amount_base_to_ui_string, parse_amount_ui_to_base_u256, GWEI_DECIMALS,
        NATIVE_DECIMALS,
    },
    chains::evm::EvmRpcClient,
    client::BlockchainClient as _,
    config::WalletConfig,
    errors::WalletError,
    journal::SentJournal,
    keystore::KeystoreFile,
    lifecycle::{Confirmation, KeySource, RecoveryAction, WalletLifecycle, WalletState},
    paths::WalletPaths,
    query,
    store::ConfigStore,
    tx::{TransactionBuilder, TransferRequest},
};
use alloy::primitives::{Address, U256};
use serde_json::json;

#[derive(Debug, Clone)]
pub struct SendArgs {
    pub to: String,
    pub amount: String,
    pub gas_limit: Option<u64>,
    pub gas_price_gwei: Option<String>,
    pub yes: bool,
}

pub struct App {
    paths: WalletPaths,
    cfg: WalletConfig,
}

impl App {
    pub fn load(paths: WalletPaths) -> eyre::Result<Self> {
        let cfg = ConfigStore::new(&paths).load_or_init_default()?;
        Ok(Self { paths, cfg })
    }

    fn keystore(&self) -> KeystoreFile {
        KeystoreFile::new(&self.paths, &self.cfg)
    }

    fn client(&self) -> eyre::Result<EvmRpcClient> {
        EvmRpcClient::new(&self.cfg.rpc).context("configure rpc client")
    }

    pub fn paths(&self) -> eyre::Result<()> {
        print_json(&json!({
            "config_dir": self.paths.config_dir,
            "data_dir": self.paths.data_dir,
            "log_file": self.paths.log_file,
            "config_file": self.paths.config_file(),
            "keystore_file": self.keystore().path(),
            "sent_journal": self.paths.sent_journal_file(),
        }))
    }

    pub fn init(&self, import: bool) -> eyre::Result<()> {
        let mut wallet = WalletLifecycle::open(self.keystore());
        if wallet.state() != WalletState::NoKeystore {
            eyre::bail!(
                "a keystore already exists at {}; run `keyward reset` first",
                self.keystore().path().display()
            );
        }
        let source = self.read_key_source(import)?;
        let (password, confirm) = cli_output::read_new_password()?;
        let address = wallet.create(&source, &password, &confirm)?;
        print_json(&json!({
            "address": address,
            "keystore_file": self.keystore().path(),
        }))
    }

    /// Import: prompt for a key and check it before asking for passwords.
    fn read_key_source(&self, import: bool) -> eyre::Result<KeySource> {
        if !import {
            return Ok(KeySource::Generate);
        }
        let hex = cli_output::read_private_key("Private key (hex): ")?;
        drop(keyward::keys::KeyMaterial::from_hex(&hex)?);
        Ok(KeySource::Import(hex))
    }

    /// Unlock the keystore, walking the user through recovery on a terminal.
    fn unlock(&self) -> eyre::Result<WalletLifecycle> {
        let mut wallet = WalletLifecycle::open(self.keystore());
        if wallet.state() == WalletState::NoKeystore {
            eyre::bail!(
                "no keystore at {}; run `keyward init` first",
                self.keystore().path().display()
            );
        }
        // With the password coming from the environment a retry would just fail again.
        let can_recover = cli_output::interactive() && !cli_output::password_from_env();
        loop {
            let password = cli_output::read_password("Password: ")?;
            match wallet.unlock(&password) {
                Ok(_) => return Ok(wallet),
                Err(WalletError::Authentication) if can_recover => {
                    notice("Incorrect password or corrupt keystore.");
                }
                Err(e) => return Err(e.into()),
            }

            match cli_output::choose_recovery(wallet.recovery_actions())? {
                RecoveryAction::Retry => {}
                RecoveryAction::Reimport => match self.reimport(&mut wallet) {
                    Ok(address) => {
                        notice(&format!("Keystore replaced; wallet address {address}."));
                        return Ok(wallet);
                    }
                    Err(e @ (WalletError::Validation(_) | WalletError::UserDeclined)) => {
                        notice(&format!("Reimport aborted: {e}"));
                    }
                    Err(e) => return Err(e.into()),
                },
                RecoveryAction::Abandon => {
                    wallet.abandon()?;
                    eyre::bail!("wallet abandoned");
                }
            }
        }
    }

    fn reimport(&self, wallet: &mut WalletLifecycle) -> Result<Address, WalletError> {
        let prompt_failed = |e: eyre::Report| WalletError::validation(format!("{e:#}"));
        let hex = cli_output::read_private_key("Private key to import (empty to generate): ")
            .map_err(prompt_failed)?;
        let source = if secrecy::ExposeSecret::expose_secret(&hex).trim().is_empty() {
            KeySource::Generate
        } else {
            KeySource::Import(hex)
        };
        let (password, confirm) = cli_output::read_new_password().map_err(prompt_failed)?;
        let confirmation = cli_output::confirm(
            &format!(
                "Overwrite the keystore at {}?",
                wallet.keystore().path().display()
            ),
            false,
        )
        .map_err(prompt_failed)?;
        wallet.reimport(&source, &password, &confirm, confirmation)
    }

    pub fn address(&self) -> eyre::Result<()> {
        let wallet = self.unlock()?;
        print_json(&json!({ "address": wallet.address()? }))
    }

    /// With `watch`, refresh every `query_interval_seconds` until interrupted.
    pub async fn status(&self, watch: bool) -> eyre::Result<()> {
        let address = self.unlock()?.address()?;
        let client = self.client()?;
        if !watch {
            return print_status(&client, address).await;
        }
        let mut ticker = tokio::time::interval(self.cfg.query_interval());
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                r = tokio::signal::ctrl_c() => {
                    r.context("listen for ctrl-c")?;
                    return Ok(());
                }
            }
            // A node hiccup should not end the watch.
            match print_status(&client, address).await {
                Ok(()) => {}
                Err(e)
                    if e
                        .downcast_ref::<WalletError>()
                        .is_some_and(WalletError::is_retryable) =>
                {
                    notice(&format!("status refresh failed: {e:#}"));
                }
                Err(e) => return Err(e),
            }
        }
    }

    pub async fn history(&self, blocks: Option<u64>) -> eyre::Result<()> {
        let address = self.unlock()?.address()?;
        let span = blocks.unwrap_or(self.cfg.history_block_range);
        let client = self.client()?;
        let h = query::recent_history(&client, address, span).await?;
        let txs: Vec<_> = h
            .records
            .iter()
            .map(|r| {
                json!({
                    "block": r.block_number,
                    "tx_hash": r.tx_hash,
                    "direction": r.direction(address),
                    "from": r.from,
                    "to": r.to,
                    "value": format_amount_base_to_ui_string(r.value, NATIVE_DECIMALS),
                })
            })
            .collect();
        print_json(&json!({
            "address": address,
            "from_block": h.from_block,
            "to_block": h.to_block,
            "transactions": txs,
        }))
    }

    pub async fn send(&self, args: SendArgs) -> eyre::Result<()> {
        let value = parse_amount_ui_to_base_u256(&args.amount, NATIVE_DECIMALS)
            .map_err(|e| WalletError::validation(format!("amount: {e:#}")))?;
        let gas_price = args
            .gas_price_gwei
            .as_deref()
            .map(|g| parse_amount_ui_to_base_u256(g, GWEI_DECIMALS))
            .transpose()
            .map_err(|e| WalletError::validation(format!("gas price: {e:#}")))?;
        let transfer = TransferRequest {
            to: args.to,
            value: value.to_string(),
            gas_limit: args.gas_limit,
            gas_price: gas_price.map(|p| p.to_string()),
        }
        .validate()?;

        let wallet = self.unlock()?;
        let key = wallet.key_material()?;
        let client = self.client()?;
        let journal = SentJournal::new(self.paths.sent_journal_file());
        let builder = TransactionBuilder::new(&client).with_journal(&journal);

        let nonce = client.nonce_of(key.address()).await?;
        let tx = builder.prepare(key, &transfer, nonce).await?;
        let max_fee = U256::from(tx.gas_limit).saturating_mul(U256::from(tx.gas_price));
        notice(&format!(
            "From:      {}\nTo:        {}\nAmount:    {}\nGas limit: {}\n\
             Gas price: {} gwei\nMax fee:   {}\nNonce:     {}\nChain id:  {}",
            tx.sender(),
            tx.to,
            format_amount_base_to_ui_string(tx.value, NATIVE_DECIMALS),
            tx.gas_limit,
            format_amount_base_to_ui_string(U256::from(tx.gas_price), GWEI_DECIMALS),
            format_amount_base_to_ui_string(max_fee, NATIVE_DECIMALS),
            tx.nonce,
            tx.chain_id,
        ));
        if cli_output::confirm("Sign and broadcast?", args.yes)? == Confirmation::Declined {
            return Err(WalletError::UserDeclined.into());
        }

        match builder.submit(key, &tx, self.cfg.receipt_timeout()).await {
            Ok(r) => {
                print_json(&json!({
                    "tx_hash": r.tx_hash,
                    "block_number": r.block_number,
                    "gas_used": r.gas_used,
                    "status": if r.success { "confirmed" } else { "failed" },
                }))?;
                if !r.success {
                    eyre::bail!("transaction {} reverted", r.tx_hash);
                }
                Ok(())
            }
            Err(e @ WalletError::Timeout { .. }) => {
                notice(&format!(
                    "The transaction may still confirm. Check {} before resending.",
                    journal.path().display()
                ));
                Err(e.into())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Latest journaled outcome of every broadcast, oldest first. Needs no password.
    pub fn sent(&self) -> eyre::Result<()> {
        let journal = SentJournal::new(self.paths.sent_journal_file());
        print_json(&json!({
            "sent_journal": journal.path(),
            "transactions": journal.latest_by_hash()?,
        }))
    }

    pub fn export_key(&self) -> eyre::Result<()> {
        let wallet = self.unlock()?;
        let password = cli_output::read_password("Password (again, to export): ")?;
        let hex = wallet.reveal_private_key(&password)?;
        cli_output::print_line(hex.as_str())
    }

    pub fn reset(&self, yes: bool) -> eyre::Result<()> {
        let mut wallet = self.unlock()?;
        let question = format!(
            "Delete the keystore at {}? Funds are lost without a backup of the key.",
            wallet.keystore().path().display()
        );
        if cli_output::confirm(&question, yes)? == Confirmation::Declined {
            return Err(WalletError::UserDeclined.into());
        }
        let password = cli_output::read_password("Password (to confirm reset): ")?;
        wallet.reset(Confirmation::Confirmed, &password)?;
        print_json(&json!({ "reset": true }))
    }
}

async fn print_status(client: &EvmRpcClient, address: Address) -> eyre::Result<()> {
    let st = query::status(client, address).await?;
    print_json(&json!({
        "address": st.address,
        "block_height": st.block_height,
        "balance": format_amount_base_to_ui_string(st.balance, NATIVE_DECIMALS),
        "balance_base": st.balance.to_string(),
    }))
}
