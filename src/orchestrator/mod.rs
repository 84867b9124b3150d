//! Per-bar loop stitching every subsystem together (spec §2, SPEC_FULL
//! §4.8). Grounded on the teacher's `Application::build`/`start`
//! composition-root pattern (`examples/Zuytan-rustrade/src/application/system.rs`).

use crate::ai::{AiDecisionModule, MarketContext, Recommendation};
use crate::domain::{Candle, Direction, FeatureVector, IndicatorSnapshot, RejectReason};
use crate::execution::{ExecutionLayer, SubmitPlan};
use crate::indicators::IndicatorEngine;
use crate::journal::{EntryRecord, ExitRecord, TradeJournal};
use crate::pattern_memory::PatternMemory;
use crate::risk::{MarketConditions, RiskManager};
use crate::signal::{IndicatorFrame, SignalGenerator};
use crate::state::{CommitResult, StateManager, StateUpdate};
use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use tracing::{info, warn};

const SYMBOL: &str = "BTC/USD";

/// Outcome of feeding one candle through the pipeline (spec §4.8).
#[derive(Debug, Clone)]
pub enum BarOutcome {
    NoAction,
    Opened(crate::domain::Position),
    Rejected(RejectReason),
    /// A venue/network failure happened on submission. Deliberately kept
    /// out of `RejectReason`, which spec §7 fixes as a closed, stable
    /// enumeration surfaced verbatim to callers and the journal.
    VenueError(String),
    Closed { order_id: String, net_pnl: Decimal },
}

pub struct Orchestrator {
    state: StateManager,
    pattern_memory_trading: PatternMemory,
    pattern_memory_ai: PatternMemory,
    risk: RiskManager,
    signal: SignalGenerator,
    ai: AiDecisionModule,
    execution: ExecutionLayer,
    journal: TradeJournal,
    indicators: IndicatorEngine,
    consecutive_venue_errors: u32,
    emergency_mode: bool,
    last_candle: Option<Candle>,
}

impl Orchestrator {
    pub fn new(
        state: StateManager,
        pattern_memory_trading: PatternMemory,
        pattern_memory_ai: PatternMemory,
        risk: RiskManager,
        signal: SignalGenerator,
        ai: AiDecisionModule,
        execution: ExecutionLayer,
        journal: TradeJournal,
    ) -> Self {
        Self {
            state,
            pattern_memory_trading,
            pattern_memory_ai,
            risk,
            signal,
            ai,
            execution,
            journal,
            indicators: IndicatorEngine::new(),
            consecutive_venue_errors: 0,
            emergency_mode: false,
            last_candle: None,
        }
    }

    /// Drive the full pipeline for one incoming candle.
    pub async fn on_candle(&mut self, candle: Candle) -> BarOutcome {
        let now = Utc
            .timestamp_millis_opt(candle.timestamp_ms)
            .single()
            .unwrap_or_else(Utc::now);

        if self.emergency_mode {
            warn!("Orchestrator: in emergency mode, skipping bar");
            self.last_candle = Some(candle);
            return BarOutcome::NoAction;
        }

        // Advance the rolling indicator windows exactly once per candle,
        // then hand the resulting frame to both the exit check and (if no
        // position closes) the entry path — recomputing it would
        // double-count this bar in every rolling window.
        let frame = self.build_indicator_frame(&candle);

        // Exit-condition check against any currently open position comes
        // first: stop-loss/take-profit/AI reversal own the candle before a
        // fresh entry is even considered.
        if let Some(outcome) = self.check_exit_conditions(&candle, &frame, now).await {
            self.last_candle = Some(candle);
            return outcome;
        }

        let signal = self.signal.evaluate(&frame);

        if signal.direction == Direction::Hold {
            self.last_candle = Some(candle);
            return BarOutcome::NoAction;
        }

        let features = match self.build_feature_vector(&candle, &frame, signal.direction) {
            Ok(f) => f,
            Err(_) => {
                self.last_candle = Some(candle);
                return BarOutcome::NoAction;
            }
        };

        let context = MarketContext {
            volatility: estimate_volatility(&candle),
            rsi: frame.rsi,
            macd_bias: frame.macd_line.zip(frame.macd_signal).map(|(l, s)| l - s),
            regime: frame.regime.clone(),
            timestamp: now,
        };

        let decision = self
            .ai
            .decide(
                signal.direction,
                signal.confidence * 100.0,
                &features.quantized_key(),
                &self.pattern_memory_ai,
                &features,
                context,
            )
            .await;

        if decision.vetoed || matches!(decision.recommendation, Recommendation::Hold) {
            self.last_candle = Some(candle);
            return BarOutcome::NoAction;
        }

        let snapshot = self.state.snapshot().await;
        let conditions = MarketConditions {
            volatility: estimate_volatility(&candle),
            counter_trend: frame.regime.as_deref().map(|r| r.to_lowercase().contains("down")).unwrap_or(false)
                && signal.direction == Direction::Buy,
            confidence: decision.confidence,
        };

        let sized_usd = match self.risk.calculate_position_size(
            snapshot.total_balance_usd,
            Decimal::try_from(candle.close).unwrap_or(Decimal::ZERO),
            &conditions,
            now,
        ) {
            Ok(size) => size,
            Err(reason) => {
                self.last_candle = Some(candle);
                return BarOutcome::Rejected(reason);
            }
        };

        let plan = SubmitPlan {
            symbol: SYMBOL.to_string(),
            direction: signal.direction,
            usd_size: sized_usd,
            price: Decimal::try_from(candle.close).unwrap_or(Decimal::ZERO),
            confidence: decision.confidence,
            entry_indicators: indicator_snapshot(&frame),
            patterns: signal.contributing.iter().map(|s| s.name.to_string()).collect(),
            current_holdings: snapshot.position_asset_units,
            stop_loss_override: None,
            take_profit_override: None,
        };

        let submission = match self.execution.submit(plan, now).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!("Orchestrator: execution error: {}", e);
                self.consecutive_venue_errors += 1;
                if self.risk.consecutive_error_gate(self.consecutive_venue_errors) {
                    self.emergency_mode = true;
                    self.risk.warn_emergency();
                }
                self.last_candle = Some(candle);
                return match e {
                    crate::domain::ExecutionError::NoHoldings { .. } => {
                        BarOutcome::Rejected(RejectReason::NoHoldings)
                    }
                    crate::domain::ExecutionError::DuplicateIntent { .. } => {
                        BarOutcome::Rejected(RejectReason::DuplicateOrderPrevented)
                    }
                    crate::domain::ExecutionError::PositionTooSmall { .. } => {
                        BarOutcome::Rejected(RejectReason::PositionTooSmall)
                    }
                    crate::domain::ExecutionError::Venue { reason } => BarOutcome::VenueError(reason),
                };
            }
        };
        self.consecutive_venue_errors = 0;

        if submission.duplicate {
            self.last_candle = Some(candle);
            return BarOutcome::Rejected(RejectReason::DuplicateOrderPrevented);
        }

        let commit = self
            .state
            .update_state(
                StateUpdate::OpenPosition {
                    symbol: SYMBOL.to_string(),
                    intent_id: submission.intent_id.clone(),
                    size: submission.asset_size,
                    price: Decimal::try_from(candle.close).unwrap_or(Decimal::ZERO),
                    stop_loss: submission.stop_loss,
                    take_profit: submission.take_profit,
                    entry_indicators: indicator_snapshot(&frame),
                    patterns: signal.contributing.iter().map(|s| s.name.to_string()).collect(),
                    confidence: decision.confidence,
                },
                "orchestrator.open_position",
            )
            .await;

        self.last_candle = Some(candle.clone());

        match commit {
            Ok(CommitResult::Opened(position)) => {
                let entry = EntryRecord {
                    order_id: position.id.clone(),
                    symbol: SYMBOL.to_string(),
                    timestamp: now,
                    direction: position.direction,
                    entry_price: position.entry_price,
                    size: position.size,
                    usd_value: position.usd_cost,
                    confidence: position.confidence,
                    regime: frame.regime.clone(),
                    patterns: position.patterns.clone(),
                    indicators: indicator_snapshot(&frame),
                    fees: Decimal::ZERO,
                };
                if let Err(e) = self.journal.record_entry(entry).await {
                    warn!("Orchestrator: failed to journal entry: {}", e);
                }
                BarOutcome::Opened(position)
            }
            Ok(_) => BarOutcome::NoAction,
            Err(e) => {
                warn!("Orchestrator: state commit failed: {}", e);
                BarOutcome::NoAction
            }
        }
    }

    async fn check_exit_conditions(
        &mut self,
        candle: &Candle,
        frame: &IndicatorFrame,
        now: DateTime<Utc>,
    ) -> Option<BarOutcome> {
        let snapshot = self.state.snapshot().await;
        let position = snapshot.active_trades.get(SYMBOL)?.clone();

        let price = Decimal::try_from(candle.close).unwrap_or(Decimal::ZERO);
        let hit_stop = price <= position.stop_loss;
        let hit_take = price >= position.take_profit;

        if !hit_stop && !hit_take {
            return None;
        }
        let exit_reason = if hit_stop { "stop_loss" } else { "take_profit" };

        let commit = self
            .state
            .update_state(
                StateUpdate::ClosePosition {
                    symbol: SYMBOL.to_string(),
                    price,
                    size: None,
                },
                "orchestrator.close_position",
            )
            .await;

        match commit {
            Ok(CommitResult::Closed(close)) => {
                let post_close = self.state.snapshot().await;
                self.risk
                    .record_outcome(close.pnl, post_close.total_balance_usd, now);

                let features = self.build_feature_vector(candle, frame, Direction::Hold).ok();
                if let Some(features) = &features {
                    self.pattern_memory_trading.record(features, close.pnl.to_f64().unwrap_or(0.0), now);
                    self.ai.update_outcome(&features.quantized_key(), close.pnl > Decimal::ZERO, now);
                }

                let exit = ExitRecord {
                    order_id: position.id.clone(),
                    timestamp: now,
                    exit_price: price,
                    fees: Decimal::ZERO,
                    hold_time_ms: (now - position.entry_time).num_milliseconds(),
                    mfe: Decimal::ZERO,
                    mae: Decimal::ZERO,
                    balance_after: post_close.total_balance_usd,
                    exit_reason: exit_reason.to_string(),
                };
                let order_id = exit.order_id.clone();
                let net_pnl = close.pnl;
                if let Err(e) = self.journal.record_exit(exit).await {
                    warn!("Orchestrator: failed to journal exit: {}", e);
                }

                info!("Orchestrator: closed position on {} (pnl {})", exit_reason, close.pnl);
                Some(BarOutcome::Closed { order_id, net_pnl })
            }
            Ok(_) => Some(BarOutcome::NoAction),
            Err(e) => {
                warn!("Orchestrator: close_position failed: {}", e);
                Some(BarOutcome::NoAction)
            }
        }
    }

    /// Drive `on_candle` over an ordered stream, used by the offline
    /// backtest binary.
    pub async fn run_stream<I: IntoIterator<Item = Candle>>(&mut self, candles: I) -> Vec<BarOutcome> {
        let mut outcomes = Vec::new();
        for candle in candles {
            outcomes.push(self.on_candle(candle).await);
        }
        outcomes
    }

    fn build_indicator_frame(&mut self, candle: &Candle) -> IndicatorFrame {
        self.indicators.update(candle)
    }

    fn build_feature_vector(
        &self,
        candle: &Candle,
        frame: &IndicatorFrame,
        last_direction: Direction,
    ) -> Result<FeatureVector, crate::domain::FeatureVectorError> {
        let price_change_pct = if candle.open != 0.0 {
            (candle.close - candle.open) / candle.open
        } else {
            0.0
        };
        let wick_ratio = if candle.high != candle.low {
            (candle.high - candle.close).abs() / (candle.high - candle.low)
        } else {
            0.0
        };
        FeatureVector::canonical(
            frame.rsi.unwrap_or(50.0),
            frame.macd_line.unwrap_or(0.0) - frame.macd_signal.unwrap_or(0.0),
            0.0,
            0.0,
            estimate_volatility(candle),
            wick_ratio,
            price_change_pct,
            1.0,
            crate::domain::direction_as_feature(last_direction.as_order_side()),
        )
    }

    pub async fn flush(&mut self) {
        if let Err(e) = self.pattern_memory_trading.persist().await {
            warn!("Orchestrator: failed to persist trading pattern memory: {}", e);
        }
        if let Err(e) = self.pattern_memory_ai.persist().await {
            warn!("Orchestrator: failed to persist AI pattern memory: {}", e);
        }
        if let Err(e) = self.journal.persist_stats_cache().await {
            warn!("Orchestrator: failed to persist journal stats cache: {}", e);
        }
    }
}

fn estimate_volatility(candle: &Candle) -> f64 {
    if candle.close == 0.0 {
        return 0.0;
    }
    (candle.high - candle.low).abs() / candle.close
}

fn indicator_snapshot(frame: &IndicatorFrame) -> IndicatorSnapshot {
    IndicatorSnapshot {
        rsi: frame.rsi,
        macd: frame.macd_line,
        macd_signal: frame.macd_signal,
        trend: None,
        volatility: None,
        volume: frame.volume,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::{AiDecisionModule, DecisionConfig, RuleBasedReasoner};
    use crate::execution::{ExecutionLayer, PaperVenue};
    use crate::journal::TradeJournal;
    use crate::pattern_memory::{PatternMemory, Partition};
    use crate::risk::{RiskConfig, RiskManager};
    use crate::signal::SignalGenerator;
    use crate::state::{PersistenceMode, StateManager};
    use rust_decimal_macros::dec;

    async fn build_orchestrator(dir: &std::path::Path) -> Orchestrator {
        let state = StateManager::init(PersistenceMode::Backtest, dir, dec!(10000))
            .await
            .unwrap();
        let pattern_memory_trading = PatternMemory::load(&dir.join("trading"), Partition::Backtest)
            .await
            .unwrap();
        let pattern_memory_ai = PatternMemory::load(&dir.join("ai"), Partition::Backtest)
            .await
            .unwrap();
        let risk = RiskManager::new(RiskConfig::default(), dec!(10000));
        let signal = SignalGenerator::default();
        let ai = AiDecisionModule::new(DecisionConfig::default(), std::sync::Arc::new(RuleBasedReasoner));
        let execution = ExecutionLayer::new(std::sync::Arc::new(PaperVenue::default()), "paper");
        let journal = TradeJournal::init(&dir.join("journal")).await.unwrap();

        Orchestrator::new(
            state,
            pattern_memory_trading,
            pattern_memory_ai,
            risk,
            signal,
            ai,
            execution,
            journal,
        )
    }

    /// A gently oscillating uptrend, long enough to warm up every indicator
    /// (MACD's 26+9-bar window is the slowest) and keep RSI away from both
    /// the `<30`/`>70` evaluator bands and the `>85` safety override, so the
    /// bullish EMA stack and MACD carry the signal on their own.
    fn uptrend_candles(bars: usize, start_ms: i64) -> Vec<Candle> {
        let mut candles = Vec::with_capacity(bars);
        let mut close = 100.0_f64;
        for i in 0..bars {
            let step = match i % 5 {
                0 | 1 | 2 => 2.0,
                _ => -2.4,
            };
            let open = close;
            close += step;
            let high = close.max(open) + 1.0;
            let low = close.min(open) - 1.0;
            candles.push(Candle {
                timestamp_ms: start_ms + i as i64 * 60_000,
                open,
                high,
                low,
                close,
                volume: 1_000.0,
            });
        }
        candles
    }

    #[tokio::test]
    async fn a_sustained_uptrend_opens_a_position_through_the_real_indicator_path() {
        let dir = std::env::temp_dir().join(format!(
            "spotcore-orchestrator-test-{}",
            uuid::Uuid::new_v4()
        ));
        tokio::fs::create_dir_all(&dir).await.unwrap();

        let mut orchestrator = build_orchestrator(&dir).await;

        // 2024-01-01T12:00:00Z: comfortably inside daytime hours so the
        // risk assessment's low-liquidity-hours penalty never triggers.
        let candles = uptrend_candles(182, 1_704_110_400_000);
        let outcomes = orchestrator.run_stream(candles).await;

        assert!(
            outcomes
                .iter()
                .any(|o| matches!(o, BarOutcome::Opened(_))),
            "expected at least one position to open from a real, indicator-driven uptrend; got {:?}",
            outcomes,
        );

        let _ = tokio::fs::remove_dir_all(&dir).await;
    }
}
