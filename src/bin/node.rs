//! Minimal operator entry point: open the ledger, bootstrap the chain when
//! it is empty, evict stale mempool entries and report the head.

use aurum::block::Chain;
use aurum::config;
use aurum::error::Result;
use aurum::ledger::Ledger;
use aurum::transaction::Txs;
use clap::Parser;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "aurum-node", about = "Aurum ledger node", version)]
struct Args {
    /// Path to the configuration file.
    #[arg(long, default_value = "config.toml")]
    config: String,
    /// Override the database path from the configuration.
    #[arg(long)]
    db: Option<String>,
}

fn main() {
    tracing_subscriber::fmt().init();
    if let Err(e) = run() {
        error!(error = %e, "node failed");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let args = Args::parse();
    let mut config = config::load_config(&args.config)?;
    if let Some(db) = args.db {
        config.database.path = db;
    }

    info!(coin = %config.coin, testnet = config.testnet, "starting aurum node");
    let ledger = Ledger::open(&config.database.path)?;
    let chain = Chain::new(&ledger, &config);

    // The first read on an empty store installs the genesis block; a failure
    // there is fatal and we must not keep running.
    let head = chain.current()?;
    let difficulty = chain.difficulty()?;
    let purged = ledger.exclusive(|conn| Txs::new(conn).purge_stale(head.height))?;

    info!(
        height = head.height,
        block = %head.id,
        difficulty,
        purged,
        "chain ready"
    );
    Ok(())
}
