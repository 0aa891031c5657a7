#![expect(
    clippy::multiple_crate_versions,
    reason = "transitive dependency duplication"
)]

use clap::{Parser, Subcommand};
use keyward::errors::{ErrorReport, WalletError};
use tracing_subscriber::prelude::*;

mod cli_output;
mod commands;

#[derive(Parser, Debug)]
#[command(name = "keyward", version)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print resolved paths (useful for debugging).
    Paths,

    /// Create the keystore from a freshly generated key, or import one with `--import`.
    Init {
        /// Read a hex private key (prompt, or `KEYWARD_IMPORT_KEY`).
        #[arg(long, default_value_t = false)]
        import: bool,
    },

    /// Unlock and print the wallet address.
    Address,

    /// Block height and balance of the wallet address.
    Status {
        /// Keep refreshing every `query_interval_seconds` until Ctrl-C.
        #[arg(long, default_value_t = false)]
        watch: bool,
    },

    /// Transactions touching the wallet address in recent blocks.
    History {
        /// How many trailing blocks to scan (default: `history_block_range` from config).
        #[arg(long)]
        blocks: Option<u64>,
    },

    /// Sign and broadcast a native transfer, then wait for its receipt.
    Send {
        /// Recipient, `0x` followed by 40 hex characters.
        #[arg(long)]
        to: String,

        /// Amount in whole units, e.g. `1.5`.
        #[arg(long)]
        amount: String,

        /// Gas limit. Estimated by the node when omitted.
        #[arg(long)]
        gas_limit: Option<u64>,

        /// Gas price in gwei. Node suggestion when omitted.
        #[arg(long)]
        gas_price_gwei: Option<String>,

        /// Skip the confirmation prompt (required for non-interactive shells).
        #[arg(long, default_value_t = false)]
        yes: bool,
    },

    /// Outcome of every transaction this wallet has broadcast.
    Sent,

    /// Print the private key after re-entering the password.
    ExportKey,

    /// Delete the keystore after confirmation and re-authentication.
    Reset {
        /// Skip the confirmation prompt (required for non-interactive shells).
        #[arg(long, default_value_t = false)]
        yes: bool,
    },
}

fn init_logging(
    paths: &keyward::paths::WalletPaths,
) -> tracing_appender::non_blocking::WorkerGuard {
    let env_filter = tracing_subscriber::EnvFilter::from_default_env();
    let file_name = paths
        .log_file
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("keyward.log.jsonl");
    let file_appender = tracing_appender::rolling::never(&paths.data_dir, file_name);
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(std::io::stderr)
        .with_filter(env_filter.clone());
    let file_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(file_writer)
        .with_filter(env_filter);

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(file_layer)
        .init();

    guard
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();

    let paths = keyward::paths::WalletPaths::discover()?;
    paths.ensure_private_dirs()?;
    let _log_guard = init_logging(&paths);

    let app = commands::App::load(paths)?;
    let res = match cli.cmd {
        Command::Paths => app.paths(),
        Command::Init { import } => app.init(import),
        Command::Address => app.address(),
        Command::Status { watch } => app.status(watch).await,
        Command::History { blocks } => app.history(blocks).await,
        Command::Send {
            to,
            amount,
            gas_limit,
            gas_price_gwei,
            yes,
        } => {
            app.send(commands::SendArgs {
                to,
                amount,
                gas_limit,
                gas_price_gwei,
                yes,
            })
            .await
        }
        Command::Sent => app.sent(),
        Command::ExportKey => app.export_key(),
        Command::Reset { yes } => app.reset(yes),
    };
    if let Some(e) = res.as_ref().err().and_then(|e| e.downcast_ref::<WalletError>()) {
        tracing::debug!(code = e.code(), "command failed");
        cli_output::print_error_report(&ErrorReport::from(e));
    }
    res
}
