//! Stateless aggregation of the fourteen evaluators into one directional
//! decision (spec §4.4).
//!
//! Grounded on the teacher's strategy-returns-`Option` aggregation style
//! (`examples/Zuytan-rustrade/src/application/market_data/signal_generator.rs`).

use crate::domain::Direction;
use crate::signal::evaluators::{self, EvalDirection, EvaluatorSignal, IndicatorFrame};

const DEFAULT_MIN_SIGNALS_TO_TRADE: usize = 2;
const DEFAULT_MIN_CONFIDENCE: f64 = 0.25;

/// Per-evaluator weight. Every evaluator defaults to 1.0; callers with a
/// richer config may override individual weights.
#[derive(Debug, Clone)]
pub struct EvaluatorWeights {
    pub weights: std::collections::HashMap<&'static str, f64>,
}

impl Default for EvaluatorWeights {
    fn default() -> Self {
        let names = [
            "rsi", "macd", "ema_stack", "bollinger", "patterns", "regime", "momentum", "tpo",
            "support_resistance", "ema_sma_crossover", "liquidity_sweep", "ma_dynamic_sr",
            "multi_timeframe",
        ];
        Self {
            weights: names.iter().map(|n| (*n, 1.0)).collect(),
        }
    }
}

impl EvaluatorWeights {
    fn weight_of(&self, name: &str) -> f64 {
        self.weights.get(name).copied().unwrap_or(1.0)
    }
}

#[derive(Debug, Clone)]
pub struct SignalOutcome {
    pub direction: Direction,
    pub confidence: f64,
    pub agreeing_evaluators: usize,
    pub contributing: Vec<EvaluatorSignal>,
}

pub struct SignalGenerator {
    weights: EvaluatorWeights,
    min_signals_to_trade: usize,
    min_confidence: f64,
}

impl Default for SignalGenerator {
    fn default() -> Self {
        Self {
            weights: EvaluatorWeights::default(),
            min_signals_to_trade: DEFAULT_MIN_SIGNALS_TO_TRADE,
            min_confidence: DEFAULT_MIN_CONFIDENCE,
        }
    }
}

impl SignalGenerator {
    pub fn new(weights: EvaluatorWeights, min_signals_to_trade: usize, min_confidence: f64) -> Self {
        Self {
            weights,
            min_signals_to_trade,
            min_confidence,
        }
    }

    pub fn evaluate(&self, frame: &IndicatorFrame) -> SignalOutcome {
        let signals: Vec<EvaluatorSignal> = [
            evaluators::rsi(frame),
            evaluators::macd(frame),
            evaluators::ema_stack(frame),
            evaluators::bollinger(frame),
            evaluators::patterns(frame),
            evaluators::regime(frame),
            evaluators::momentum(frame),
            evaluators::tpo(frame),
            evaluators::support_resistance(frame),
            evaluators::ema_sma_crossover(frame),
            evaluators::liquidity_sweep(frame),
            evaluators::ma_dynamic_support_resistance(frame),
            evaluators::multi_timeframe(frame),
        ]
        .into_iter()
        .flatten()
        .collect();

        let volume_mult = evaluators::volume_multiplier(frame);

        let mut bull_total = 0.0;
        let mut bear_total = 0.0;
        let mut total_weight = 0.0;
        let mut buy_count = 0usize;
        let mut sell_count = 0usize;

        for signal in &signals {
            let w = self.weights.weight_of(signal.name);
            total_weight += w;
            match signal.direction {
                EvalDirection::Buy => {
                    bull_total += signal.strength * w;
                    buy_count += 1;
                }
                EvalDirection::Sell => {
                    bear_total += signal.strength * w;
                    sell_count += 1;
                }
                EvalDirection::Neutral => {}
            }
        }
        bull_total *= volume_mult;
        bear_total *= volume_mult;

        let (mut direction, agreeing) = if bull_total > bear_total {
            (Direction::Buy, buy_count)
        } else if bear_total > bull_total {
            (Direction::Sell, sell_count)
        } else {
            (Direction::Hold, 0)
        };

        let mut confidence = if total_weight > 0.0 {
            ((bull_total - bear_total).abs() / total_weight).clamp(0.0, 1.0)
        } else {
            0.0
        };

        if agreeing < self.min_signals_to_trade || confidence < self.min_confidence {
            direction = Direction::Hold;
            confidence = 0.0;
        }

        apply_safety_overrides(&mut direction, &mut confidence, frame);

        SignalOutcome {
            direction,
            confidence,
            agreeing_evaluators: agreeing,
            contributing: signals,
        }
    }
}

/// Applied last, can only force a decision to hold (spec §4.4).
fn apply_safety_overrides(direction: &mut Direction, confidence: &mut f64, frame: &IndicatorFrame) {
    if let Some(rsi) = frame.rsi {
        if *direction == Direction::Buy && rsi > 85.0 {
            *direction = Direction::Hold;
            *confidence = 0.0;
            return;
        }
        if *direction == Direction::Sell && rsi < 15.0 {
            *direction = Direction::Hold;
            *confidence = 0.0;
            return;
        }
    }
    if let Some(regime) = &frame.regime {
        if regime.to_lowercase().contains("down") && *direction == Direction::Buy && *confidence < 0.4 {
            *direction = Direction::Hold;
            *confidence = 0.0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requires_minimum_agreeing_evaluators() {
        let gen = SignalGenerator::default();
        let frame = IndicatorFrame {
            rsi: Some(15.0),
            ..Default::default()
        };
        let outcome = gen.evaluate(&frame);
        // Only one evaluator (rsi) fires — below min_signals_to_trade.
        assert_eq!(outcome.direction, Direction::Hold);
    }

    #[test]
    fn overbought_rsi_forces_hold_even_when_buy_would_otherwise_win() {
        // RSI's own evaluator votes sell at this level, so give it a token
        // weight and let the other buy-side evaluators dominate the
        // aggregate — isolating the safety override rather than the
        // ordinary firing rule.
        let mut weights = EvaluatorWeights::default();
        weights.weights.insert("rsi", 0.01);
        let gen = SignalGenerator::new(weights, DEFAULT_MIN_SIGNALS_TO_TRADE, DEFAULT_MIN_CONFIDENCE);

        let frame = IndicatorFrame {
            rsi: Some(90.0),
            macd_line: Some(10.0),
            macd_signal: Some(2.0),
            ema_9: Some(105.0),
            ema_20: Some(100.0),
            ema_50: Some(95.0),
            price: 110.0,
            momentum_10bar_pct: Some(2.0),
            ..Default::default()
        };
        let outcome = gen.evaluate(&frame);
        assert_eq!(outcome.direction, Direction::Hold);
        assert_eq!(outcome.confidence, 0.0);
    }

    #[test]
    fn downtrend_regime_blocks_weak_buy() {
        let gen = SignalGenerator::default();
        let frame = IndicatorFrame {
            rsi: Some(25.0),
            momentum_10bar_pct: Some(0.6),
            regime: Some("downtrend".to_string()),
            ..Default::default()
        };
        let outcome = gen.evaluate(&frame);
        assert_eq!(outcome.direction, Direction::Hold);
    }
}
