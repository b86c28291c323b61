//! PBFTCHAIN Node Binary

use anyhow::Context;
use clap::{Parser, Subcommand};
use pbftchain_core::{NodeConfig, PeerConfig, ReplicaId};
use pbftchain_crypto::derivation::derive_replica_keypair;
use pbftchain_crypto::keys::{KeyFile, KeyPair};
use pbftchain_node::NodeBuilder;
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "pbftchain-node")]
#[command(about = "PBFTCHAIN Node - Byzantine fault tolerant block ordering")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a replica
    Run {
        /// Configuration file path
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Override the configured replica id
        #[arg(long)]
        replica_id: Option<u64>,

        /// Derive and pin every replica key from this seed (development only)
        #[arg(long)]
        dev_seed: Option<String>,
    },

    /// Generate a new keypair
    Keygen {
        /// Output file path
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Write configuration files for a local cluster
    Cluster {
        /// Number of replicas
        #[arg(long, default_value = "4")]
        replicas: u64,

        /// Output directory
        #[arg(short, long)]
        output: PathBuf,

        /// First listen port; replica i listens on base_port + i - 1
        #[arg(long, default_value = "8001")]
        base_port: u16,

        /// Pin the keys derived from this seed in every config
        #[arg(long)]
        dev_seed: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            replica_id,
            dev_seed,
        } => {
            let mut config = match config {
                Some(path) => NodeConfig::from_file(&path)
                    .with_context(|| format!("loading {}", path.display()))?,
                None => NodeConfig::default(),
            };
            if let Some(id) = replica_id {
                config.replica_id = ReplicaId(id);
            }
            init_logging(&config.log_level);

            info!("Starting PBFTCHAIN node...");

            let keypair = match &dev_seed {
                Some(seed) => derive_replica_keypair(seed, config.replica_id)?,
                None => load_or_create_keypair(&config.data_dir)?,
            };

            let mut builder = NodeBuilder::new().config(config).keypair(keypair);
            if let Some(seed) = dev_seed {
                builder = builder.dev_seed(seed);
            }

            let node = builder.build()?;
            node.start().await?;
        }

        Commands::Keygen { output } => {
            let keypair = KeyPair::generate();
            let json = serde_json::to_string_pretty(&KeyFile::from(&keypair))?;

            match output {
                Some(path) => {
                    std::fs::write(&path, &json)?;
                    println!("Keypair saved to: {}", path.display());
                }
                None => {
                    println!("{}", json);
                }
            }
        }

        Commands::Cluster {
            replicas,
            output,
            base_port,
            dev_seed,
        } => {
            init_logging("info");
            let configs = cluster_configs(replicas, base_port, dev_seed.as_deref())?;

            std::fs::create_dir_all(&output)?;
            for config in configs {
                let path = output.join(format!("replica-{}.json", config.replica_id.0));
                std::fs::write(&path, config.to_json()?)?;
                println!("Wrote {}", path.display());
            }
        }
    }

    Ok(())
}

/// `RUST_LOG` wins over the configured level
fn init_logging(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn cluster_configs(
    replicas: u64,
    base_port: u16,
    dev_seed: Option<&str>,
) -> anyhow::Result<Vec<NodeConfig>> {
    anyhow::ensure!(replicas > 0, "a cluster needs at least one replica");
    let ids: Vec<ReplicaId> = (1..=replicas).map(ReplicaId).collect();

    let mut peers = Vec::with_capacity(ids.len());
    for &id in &ids {
        let public_key = match dev_seed {
            Some(seed) => Some(derive_replica_keypair(seed, id)?.public_key().to_hex()),
            None => None,
        };
        peers.push(PeerConfig {
            id,
            address: format!("http://{}", listen_addr(base_port, id)?),
            public_key,
        });
    }

    let mut configs = Vec::with_capacity(ids.len());
    for &id in &ids {
        let mut config = NodeConfig::default();
        config.name = format!("replica-{}", id.0);
        config.replica_id = id;
        config.data_dir = PathBuf::from(format!("./data/replica-{}", id.0));
        config.consensus.replicas = ids.clone();
        config.network.listen_addr = listen_addr(base_port, id)?;
        config.network.peers = peers.iter().filter(|p| p.id != id).cloned().collect();
        config.validate()?;
        configs.push(config);
    }
    Ok(configs)
}

fn listen_addr(base_port: u16, id: ReplicaId) -> anyhow::Result<String> {
    let offset = u16::try_from(id.0 - 1).context("replica id out of port range")?;
    let port = base_port
        .checked_add(offset)
        .context("replica port out of range")?;
    Ok(format!("127.0.0.1:{}", port))
}

fn load_or_create_keypair(data_dir: &Path) -> anyhow::Result<KeyPair> {
    let key_path = data_dir.join("node_key.json");

    if key_path.exists() {
        let content = std::fs::read_to_string(&key_path)?;
        let key_file: KeyFile = serde_json::from_str(&content)?;
        let keypair = key_file.to_keypair()?;
        info!("Loaded keypair from {}", key_path.display());
        return Ok(keypair);
    }

    // Create new keypair
    std::fs::create_dir_all(data_dir)?;

    let keypair = KeyPair::generate();
    std::fs::write(
        &key_path,
        serde_json::to_string_pretty(&KeyFile::from(&keypair))?,
    )?;
    info!(
        "Generated new keypair {}, saved to {}",
        keypair.public_key().to_hex(),
        key_path.display()
    );

    Ok(keypair)
}
