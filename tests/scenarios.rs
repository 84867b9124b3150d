//! Integration tests for the concrete scenarios spelled out in spec.md §8,
//! exercising the public API the way the orchestrator would, rather than
//! module-internal state.

use chrono::Utc;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal_macros::dec;
use spotcore::domain::{Direction, FeatureVector};
use spotcore::pattern_memory::{EvaluatedDirection, PatternMemory, Partition};
use spotcore::risk::{MarketConditions, RiskConfig, RiskManager};
use spotcore::signal::{EvaluatorWeights, SignalGenerator};

/// Scenario 4: a shallow (6%) drawdown plus a confident signal shrinks the
/// sized position to roughly $146.64 of a $9,400 balance, not the deeper
/// $70.40 the other risk-manager test exercises at 12% drawdown.
#[test]
fn drawdown_step_down_matches_spec_scenario_146_64() {
    let mut rm = RiskManager::new(RiskConfig::default(), dec!(10000));
    let now = Utc::now();

    // A breakeven trade at balance=9400 puts the account 6% under its
    // 10000 peak without touching the win/loss streak counters, matching
    // the scenario's "recovery inactive, no streak adjustment" premise.
    rm.record_outcome(dec!(0), dec!(9400), now);

    let market = MarketConditions {
        volatility: 0.02,
        counter_trend: false,
        confidence: 0.7,
    };
    let sized = rm
        .calculate_position_size(dec!(9400), dec!(50000), &market, now)
        .expect("6% drawdown must not hit the hard gate");

    let sized_f64 = sized.to_f64().unwrap();
    assert!(
        (sized_f64 - 146.64).abs() < 0.01,
        "expected ~146.64, got {sized_f64}"
    );
}

/// Scenario 5: a five-times-recorded winning pattern is found by the
/// nearest-neighbor fallback for a query vector one quantization step
/// away, clears the 0.8 similarity gate, and reports a confident buy.
#[tokio::test]
async fn pattern_memory_nearest_neighbor_matches_spec_scenario_5() {
    let dir = std::env::temp_dir().join(format!("spotcore-scenario5-{}", uuid::Uuid::new_v4()));
    tokio::fs::create_dir_all(&dir).await.unwrap();

    let mut pm = PatternMemory::load(&dir, Partition::Backtest).await.unwrap();
    let now = Utc::now();

    let stored = FeatureVector::new(vec![0.50, 0.10, 1.0, 0.02, 0.01, 0.50, 0.00, 0.00, 0.0]).unwrap();
    for _ in 0..5 {
        pm.record(&stored, 2.0, now);
    }

    let query = FeatureVector::new(vec![0.51, 0.11, 1.0, 0.02, 0.01, 0.50, 0.00, 0.00, 0.0]).unwrap();
    let result = pm.evaluate(&query, now);

    assert!(!result.exact_match, "quantized keys differ, this must fall to the neighbor path");
    assert_eq!(result.direction, EvaluatedDirection::Buy);
    assert_eq!(result.win_rate, 1.0);
    assert!(result.confidence >= 0.6, "got confidence {}", result.confidence);

    let _ = tokio::fs::remove_dir_all(&dir).await;
}

/// Boundary case from spec.md §8: exactly `min_signals_to_trade` agreeing
/// evaluators at exactly `min_confidence` still fires instead of being
/// rejected by an off-by-one gate.
#[test]
fn signal_generator_fires_at_exact_boundary_confidence() {
    let generator = SignalGenerator::new(EvaluatorWeights::default(), 2, 0.25);
    let mut frame = spotcore::signal::IndicatorFrame {
        price: 50_000.0,
        ema_9: Some(51_000.0),
        ema_20: Some(50_000.0),
        ema_50: Some(49_000.0),
        macd_line: Some(1.0),
        macd_signal: Some(0.5),
        ..Default::default()
    };
    frame.regime = Some("uptrend".to_string());

    let outcome = generator.evaluate(&frame);
    assert!(outcome.agreeing_evaluators >= 2);
    assert_ne!(outcome.direction, Direction::Hold);
}
