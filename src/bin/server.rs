//! spotcore server - headless trading engine
//!
//! Drives the orchestrator over a recorded candle stream: newline-delimited
//! JSON, either a file path given as the first argument or stdin.
//!
//! # Environment Variables
//! See `spotcore::config::Config::from_env` for the full list
//! (`BACKTEST_MODE`, `PAPER_TRADING`, `FRESH_START`, `MIN_TRADE_CONFIDENCE`,
//! `AI_ENABLE_LLM`, `DATA_DIR`, plus the risk/signal/AI tunables).

use anyhow::Result;
use spotcore::ai::{AiDecisionModule, RuleBasedReasoner};
use spotcore::config::Config;
use spotcore::domain::Candle;
use spotcore::execution::{ExecutionLayer, PaperVenue};
use spotcore::journal::TradeJournal;
use spotcore::orchestrator::Orchestrator;
use spotcore::pattern_memory::{PatternMemory, Partition};
use spotcore::risk::RiskManager;
use spotcore::signal::SignalGenerator;
use spotcore::state::StateManager;
use std::io::BufRead;
use tracing::{info, warn, Level};
use tracing_subscriber::prelude::*;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let stdout_layer = tracing_subscriber::fmt::layer().with_target(false).pretty();
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .with(stdout_layer)
        .init();

    info!("spotcore server {} starting...", env!("CARGO_PKG_VERSION"));
    info!("Mode: HEADLESS (no UI, no HTTP server)");

    let config = Config::from_env()?;
    info!(
        "Configuration loaded: backtest={} paper={} ai_mode={:?}",
        config.backtest_mode, config.paper_trading, config.ai_mode
    );

    tokio::fs::create_dir_all(&config.data_dir).await?;
    let ai_data_dir = config.data_dir.join("ai");
    tokio::fs::create_dir_all(&ai_data_dir).await?;

    let partition = if config.backtest_mode {
        Partition::Backtest
    } else if config.paper_trading {
        Partition::Paper
    } else {
        Partition::Live
    };

    let state = StateManager::init(
        config.persistence_mode(),
        &config.data_dir,
        config.initial_balance,
    )
    .await?;
    let pattern_memory_trading = PatternMemory::load(&config.data_dir, partition).await?;
    let pattern_memory_ai = PatternMemory::load(&ai_data_dir, partition).await?;
    let risk = RiskManager::new(config.risk.clone(), config.initial_balance);
    let signal = SignalGenerator::new(
        Default::default(),
        config.min_signals_to_trade,
        config.min_signal_confidence,
    );
    let ai = AiDecisionModule::new(config.decision.clone(), std::sync::Arc::new(RuleBasedReasoner));
    let venue_name = if config.paper_trading { "paper" } else { "live" };
    let execution = ExecutionLayer::new(std::sync::Arc::new(PaperVenue::default()), venue_name);
    let journal = TradeJournal::init(&config.data_dir).await?;

    let mut orchestrator = Orchestrator::new(
        state,
        pattern_memory_trading,
        pattern_memory_ai,
        risk,
        signal,
        ai,
        execution,
        journal,
    );

    info!("Engine running. Reading candles...");
    let args: Vec<String> = std::env::args().collect();
    let mut processed = 0u64;

    let lines: Box<dyn BufRead> = if let Some(path) = args.get(1) {
        Box::new(std::io::BufReader::new(std::fs::File::open(path)?))
    } else {
        Box::new(std::io::BufReader::new(std::io::stdin()))
    };

    for line in lines.lines() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let candle: Candle = match serde_json::from_str(line) {
            Ok(c) => c,
            Err(e) => {
                warn!("skipping malformed candle line: {}", e);
                continue;
            }
        };
        let outcome = orchestrator.on_candle(candle).await;
        processed += 1;
        if processed % 1000 == 0 {
            info!("processed {} candles, last outcome: {:?}", processed, outcome);
        }
    }

    info!("Candle stream exhausted. Flushing state...");
    orchestrator.flush().await;
    info!("Done. {} candles processed.", processed);

    Ok(())
}
