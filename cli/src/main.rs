//! PBFTCHAIN CLI - Command Line Interface

use colored::Colorize;
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use pbftchain_cli::{ApiClient, BlockInfo, WalletManager};
use std::path::PathBuf;
use std::time::{Duration, Instant};

#[derive(Parser)]
#[command(name = "pbftchain")]
#[command(about = "PBFTCHAIN - client for a PBFT replica cluster")]
#[command(version)]
struct Cli {
    /// Replica URL
    #[arg(short, long, default_value = "http://127.0.0.1:8001")]
    node: String,

    /// Wallets directory
    #[arg(short, long)]
    wallets_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Wallet operations
    Wallet {
        #[command(subcommand)]
        action: WalletAction,
    },

    /// Sign and submit a transaction
    Submit {
        /// Signing wallet
        #[arg(short, long)]
        wallet: String,

        /// Transaction id
        #[arg(long)]
        id: String,

        #[arg(long)]
        from: String,

        #[arg(long)]
        to: String,

        #[arg(short, long)]
        amount: u64,

        /// Wait until the transaction is committed
        #[arg(long)]
        wait: bool,

        /// Give up waiting after this many seconds
        #[arg(long, default_value = "30")]
        timeout: u64,
    },

    /// Show the committed ledger
    Ledger,

    /// Show one block
    Block { index: u64 },

    /// Replica status
    Status,
}

#[derive(Subcommand)]
enum WalletAction {
    /// Create a new wallet
    Create { name: String },

    /// List all wallets
    List,

    /// Show wallet info
    Info { name: String },

    /// Import wallet from secret key
    Import {
        name: String,

        /// Secret key (hex)
        secret: String,
    },

    /// Export wallet secret key
    Export { name: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let wallet_manager =
        WalletManager::new(cli.wallets_dir.unwrap_or_else(WalletManager::default_dir));
    let api_client = ApiClient::new(&cli.node)?;

    match cli.command {
        Commands::Wallet { action } => {
            handle_wallet_command(action, &wallet_manager)?;
        }

        Commands::Submit {
            wallet,
            id,
            from,
            to,
            amount,
            wait,
            timeout,
        } => {
            let wallet = wallet_manager.get(&wallet)?;
            let tx = wallet.sign_transaction(&id, &from, &to, amount);

            let resp = api_client.submit_transaction(&tx).await?;
            println!("{} Transaction {} {}", "✔".green(), resp.id.bold(), resp.status);

            if wait && !resp.is_committed() {
                let index = wait_for_commit(&api_client, &id, Duration::from_secs(timeout)).await?;
                println!("{} Committed in block {}", "✔".green(), index);
            } else if let Some(index) = resp.block {
                println!("Block: {}", index);
            }
        }

        Commands::Ledger => {
            let blocks = api_client.ledger().await?;
            println!("{} ({} blocks)", "Ledger".bold(), blocks.len());
            for block in &blocks {
                print_block_line(block);
            }
        }

        Commands::Block { index } => {
            let block = api_client.block(index).await?;
            println!("{} {}", "Block".bold(), block.index);
            println!("Hash:      {}", block.hash);
            println!("Prev hash: {}", block.prev_hash);
            println!("Timestamp: {}", block.timestamp);
            println!("Proposer:  {}", block.proposer);
            println!("Transactions ({}):", block.transactions.len());
            for tx in &block.transactions {
                println!("  {:<16} {} -> {} : {}", tx.id, tx.from, tx.to, tx.amount);
            }
        }

        Commands::Status => {
            let status = api_client.status().await?;
            println!("{}", "PBFTCHAIN Replica Status".bold());
            println!("========================");
            println!("Replica:      {}", status.replica_id);
            println!("View:         {}", status.view);
            let leader = if status.is_leader {
                format!("{} (this replica)", status.leader).green()
            } else {
                status.leader.to_string().normal()
            };
            println!("Leader:       {}", leader);
            println!("Ledger:       {} blocks", status.ledger_length);
            println!("Tail:         {} {}", status.tail_index, truncate(&status.tail_hash, 16));
            println!("Pending:      {}", status.pending_transactions);
            println!("Quorum:       {} of {}", status.quorum_size, status.replicas);
        }
    }

    Ok(())
}

/// Poll the replica until `id` is committed
async fn wait_for_commit(client: &ApiClient, id: &str, timeout: Duration) -> anyhow::Result<u64> {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(ProgressStyle::with_template("{spinner} {msg}")?);
    spinner.enable_steady_tick(Duration::from_millis(100));
    spinner.set_message(format!("Waiting for {} to commit...", id));

    let started = Instant::now();
    loop {
        let status = client.transaction(id).await?;
        if let Some(index) = status.block {
            spinner.finish_and_clear();
            return Ok(index);
        }
        if started.elapsed() >= timeout {
            spinner.finish_and_clear();
            anyhow::bail!("{} still {} after {:?}", id, status.status, timeout);
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
    }
}

fn handle_wallet_command(action: WalletAction, manager: &WalletManager) -> anyhow::Result<()> {
    match action {
        WalletAction::Create { name } => {
            let wallet = manager.create(&name)?;
            println!("{} Wallet '{}' created!", "✔".green(), name);
            println!("Public Key: {}", wallet.public_key_hex());
        }

        WalletAction::List => {
            let wallets = manager.list()?;

            if wallets.is_empty() {
                println!("No wallets found.");
            } else {
                println!("{:<20} Public Key", "Name");
                println!("{:-<20} {:-<64}", "", "");
                for w in wallets {
                    println!("{:<20} {}", w.name, w.public_key);
                }
            }
        }

        WalletAction::Info { name } => {
            let wallet = manager.get(&name)?;
            println!("Wallet: {}", wallet.name());
            println!("Public Key: {}", wallet.public_key_hex());
        }

        WalletAction::Import { name, secret } => {
            let wallet = manager.import(&name, &secret)?;
            println!("{} Wallet '{}' imported!", "✔".green(), name);
            println!("Public Key: {}", wallet.public_key_hex());
        }

        WalletAction::Export { name } => {
            let wallet = manager.get(&name)?;
            println!("{}", "Keep this secret key safe!".yellow());
            println!("Secret Key: {}", hex::encode(wallet.keypair().secret_bytes()));
        }
    }

    Ok(())
}

fn print_block_line(block: &BlockInfo) {
    println!(
        "{:>6}  {}  proposer {}  {} tx",
        block.index,
        truncate(&block.hash, 16).cyan(),
        block.proposer,
        block.transactions.len()
    );
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        s.to_string()
    } else {
        format!("{}...", &s[..max_len])
    }
}
