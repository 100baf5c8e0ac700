use clap::{Parser, Subcommand};
use serde_json::json;
use std::path::PathBuf;

use chainwatch::config::load_config;
use chainwatch::ledger::Ledger;
use chainwatch::utxo::UtxoClient;

#[derive(Parser)]
#[command(name = "chainwatch-cli")]
#[command(about = "Inspect and manage a chainwatch ledger", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "chainwatch.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the next block height to process
    Cursor,
    /// List watched addresses
    Watched,
    /// Show the spendable balance of an address
    Balance { address: String },
    /// List unspent outputs of an address
    Unspent {
        address: String,
        /// Include outputs reserved by a local send
        #[arg(long)]
        include_used: bool,
    },
    /// Watch an address, from a height or from the chain tip
    Import {
        address: String,
        #[arg(long)]
        from_height: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    let open_ledger = || Ledger::open(&config.ledger.url, &config.network.name);

    let output = match cli.command {
        Commands::Cursor => {
            let cursor = open_ledger()?.cursor()?;
            json!({ "cursor": cursor })
        }
        Commands::Watched => serde_json::to_value(open_ledger()?.list_watched_addresses()?)?,
        Commands::Balance { address } => {
            let balance = open_ledger()?.balance(&address)?;
            json!({ "address": address, "balance": balance })
        }
        Commands::Unspent {
            address,
            include_used,
        } => serde_json::to_value(open_ledger()?.list_unspent_outputs(&address, include_used)?)?,
        Commands::Import {
            address,
            from_height,
        } => {
            let client = UtxoClient::from_config(&config).await?;
            let height = client.import_address(&address, from_height).await?;
            json!({ "address": address, "from_height": height })
        }
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
