mod constants;

use anyhow::{Context, Result};
use clap::Parser;
use constants::{DEFAULT_PAYLOAD, DEFAULT_TICK_MS};
use pow_ledger::{CancelFlag, ChainConfig, ChainLedger, LedgerError, Miner, MiningError};
use serde_json::Value;
use std::{
    path::PathBuf,
    time::{Duration, Instant},
};
use tokio::{
    sync::watch,
    task,
    time::{Interval, MissedTickBehavior},
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "pow-ledger-node")]
#[command(about = "Mines a block into an in-memory proof-of-work ledger on every tick")]
struct Args {
    /// JSON file with chain configuration overrides
    #[arg(long)]
    config: Option<PathBuf>,

    /// Milliseconds between two mining ticks
    #[arg(long, default_value_t = DEFAULT_TICK_MS)]
    tick_ms: u64,

    /// Stop after this many ticks (0 = run until Ctrl-C)
    #[arg(long, default_value_t = 0)]
    rounds: u64,

    /// Payload for every block; parsed as JSON, otherwise kept as a string
    #[arg(long, default_value = DEFAULT_PAYLOAD)]
    payload: String,

    /// Search nonces on all cores
    #[arg(long)]
    parallel: bool,

    /// Print the chain on one line instead of pretty JSON
    #[arg(long)]
    compact: bool,

    /// Give up on a tick's nonce search after this many milliseconds
    #[arg(long)]
    mine_timeout_ms: Option<u64>,

    /// Override the target block interval (ms)
    #[arg(long)]
    block_interval_ms: Option<u64>,

    /// Override the number of blocks between retargets
    #[arg(long)]
    adjustment_interval: Option<u64>,

    /// Override the genesis difficulty
    #[arg(long)]
    genesis_difficulty: Option<u32>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = load_config(&args).await?;
    let ledger = ChainLedger::with_config(config).context("invalid chain configuration")?;
    let miner = Miner::new(ledger.config().cancel_check_interval).parallel(args.parallel);
    let mut ledger = ledger.with_miner(miner);
    let payload = parse_payload(&args.payload);

    let cancel = ledger.cancel_flag();
    let (stop_tx, mut stop_rx) = watch::channel(false);
    let watcher_cancel = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("shutdown requested");
                watcher_cancel.trigger();
                let _ = stop_tx.send(true);
            }
            Err(e) => warn!("cannot listen for Ctrl-C: {e}"),
        }
    });

    info!(
        tick_ms = args.tick_ms,
        difficulty = ledger.required_difficulty(),
        "pow-ledger-node started"
    );

    let mut ticker = tokio::time::interval(Duration::from_millis(args.tick_ms.max(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut ticks = 0u64;

    loop {
        if !next_tick(&mut ticker, &mut stop_rx, &cancel).await {
            break;
        }

        let deadline = args
            .mine_timeout_ms
            .map(|ms| Instant::now() + Duration::from_millis(ms));
        ledger.miner_mut().set_deadline(deadline);

        let next = payload.clone();
        let (returned, outcome) = task::spawn_blocking(move || {
            let outcome = ledger.produce_next(next).map(|b| b.index());
            (ledger, outcome)
        })
        .await
        .context("mining task panicked")?;
        ledger = returned;

        match outcome {
            Ok(height) => info!(height, "tick produced a block"),
            Err(LedgerError::Mining(MiningError::Cancelled { nonce })) => {
                info!(nonce, "mining cancelled");
                break;
            }
            // not fatal, the next tick retries with a fresh timestamp
            Err(e) => warn!("tick produced no block: {e}"),
        }

        let valid = ledger.is_valid_chain();
        info!(length = ledger.len(), valid, "chain status");
        println!("{}", render(&ledger, args.compact)?);

        ticks += 1;
        if args.rounds != 0 && ticks >= args.rounds {
            break;
        }
    }

    info!(length = ledger.len(), "pow-ledger-node stopped");
    Ok(())
}

/// Wait for the next tick. Returns false once shutdown was requested, even
/// when a tick is already due.
async fn next_tick(
    ticker: &mut Interval,
    stop_rx: &mut watch::Receiver<bool>,
    cancel: &CancelFlag,
) -> bool {
    if cancel.is_triggered() || *stop_rx.borrow() {
        return false;
    }
    tokio::select! {
        biased;
        Ok(()) = stop_rx.changed() => false,
        _ = ticker.tick() => !cancel.is_triggered(),
    }
}

async fn load_config(args: &Args) -> Result<ChainConfig> {
    let mut config = match &args.config {
        Some(path) => {
            let raw = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("reading config {}", path.display()))?;
            serde_json::from_str(&raw)
                .with_context(|| format!("parsing config {}", path.display()))?
        }
        None => ChainConfig::default(),
    };
    apply_overrides(&mut config, args);
    Ok(config)
}

fn apply_overrides(config: &mut ChainConfig, args: &Args) {
    if let Some(ms) = args.block_interval_ms {
        config.block_generation_interval_ms = ms;
    }
    if let Some(blocks) = args.adjustment_interval {
        config.difficulty_adjustment_interval = blocks;
    }
    if let Some(difficulty) = args.genesis_difficulty {
        config.genesis_difficulty = difficulty;
    }
}

fn parse_payload(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

fn render(ledger: &ChainLedger, compact: bool) -> Result<String> {
    let out = if compact {
        serde_json::to_string(ledger)?
    } else {
        serde_json::to_string_pretty(ledger)?
    };
    Ok(out)
}
