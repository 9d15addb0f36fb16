// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// TALLY NODE - ledger node binary
//
// Config precedence: TOML file < TALLY_* environment < CLI flags.
// Starts the peer listener, the optional production ticker, one initial
// sync against peers, then reads console commands from stdin until quit,
// EOF (headless) or Ctrl+C.
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tally_node::console::{self, Command};
use tally_node::{LedgerService, NodeConfig};
use tokio::io::{self, AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "tally-node")]
#[command(about = "Tally ledger node", long_about = None)]
#[command(version)]
struct Cli {
    /// TOML config file
    #[arg(short, long, env = "TALLY_CONFIG")]
    config: Option<PathBuf>,

    #[arg(long)]
    node_id: Option<String>,

    /// Address to accept peer connections on (host:port)
    #[arg(short, long)]
    listen: Option<String>,

    /// Peer address, repeatable
    #[arg(short, long = "peer")]
    peers: Vec<String>,

    /// Enables sled persistence under this directory
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Produce a block every N ms (0 = only on `mine`)
    #[arg(long)]
    block_interval_ms: Option<u64>,

    /// Seed for validator selection
    #[arg(long)]
    seed: Option<u64>,

    /// Ignore stdin; run until Ctrl+C
    #[arg(long)]
    headless: bool,
}

fn load_config(cli: &Cli) -> Result<NodeConfig, Box<dyn std::error::Error>> {
    let mut config = match &cli.config {
        Some(path) => NodeConfig::load_from_file(path)?,
        None => NodeConfig::default(),
    };
    config.apply_env()?;

    if let Some(id) = &cli.node_id {
        config.node_id = id.clone();
    }
    if let Some(listen) = &cli.listen {
        config.listen_addr = listen.clone();
    }
    if !cli.peers.is_empty() {
        config.peers = cli.peers.clone();
    }
    if let Some(dir) = &cli.data_dir {
        config.data_dir = Some(dir.clone());
    }
    if let Some(ms) = cli.block_interval_ms {
        config.block_interval_ms = ms;
    }
    if let Some(seed) = cli.seed {
        config.selection_seed = Some(seed);
    }
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;

    let service = Arc::new(LedgerService::from_config(&config)?);
    log::info!(
        "🚀 {} starting (height {}, {} peer(s))",
        config.node_id,
        service.chain_len(),
        config.peers.len()
    );

    let listener = tally_network::bind(&config.listen_addr).await?;
    {
        let handler = Arc::clone(&service);
        let max = config.max_message_bytes;
        tokio::spawn(async move {
            if let Err(e) = tally_network::serve(listener, handler, max).await {
                log::error!("Peer listener stopped: {}", e);
            }
        });
    }

    if config.block_interval_ms > 0 {
        let producer = Arc::clone(&service);
        let period = Duration::from_millis(config.block_interval_ms);
        tokio::spawn(producer.run_producer(period));
        log::info!("⛏️  Producing every {} ms", config.block_interval_ms);
    }

    if !config.peers.is_empty() && service.resolve_conflicts().await {
        log::info!("🔄 Synced to height {} from peers", service.chain_len());
    }

    if !cli.headless {
        println!("{}", console::HELP);
    }

    let mut stdin = BufReader::new(io::stdin()).lines();
    let mut stdin_closed = cli.headless;

    loop {
        tokio::select! {
            result = stdin.next_line(), if !stdin_closed => {
                match result {
                    Ok(Some(line)) => match Command::parse(&line) {
                        Ok(Some(Command::Quit)) => break,
                        Ok(Some(command)) => println!("{}", console::execute(&service, command).await),
                        Ok(None) => {}
                        Err(e) => println!("❌ {}", e),
                    },
                    Ok(None) => {
                        stdin_closed = true;
                        log::info!("📡 Running in headless mode (stdin closed)");
                    }
                    Err(e) => {
                        log::warn!("stdin error: {}", e);
                        stdin_closed = true;
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                log::info!("🛑 Ctrl+C received, shutting down");
                break;
            }
        }
    }

    service.flush()?;
    log::info!("✅ Clean shutdown complete");
    Ok(())
}
