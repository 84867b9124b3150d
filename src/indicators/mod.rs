//! Rolling-window technical indicators feeding the Signal Generator
//! (spec §2, §4.4). Grounded on the teacher's `ta`-crate indicator-service
//! pattern (`examples/Zuytan-rustrade/src/application/monitoring/feature_engineering_service.rs`):
//! one stateful indicator per metric, advanced with `Next::next` on every
//! new close, with `Option` fields standing in for "not warmed up yet"
//! where the teacher's version just eats the early noise.

use std::collections::VecDeque;

use ta::indicators::{
    BollingerBands, ExponentialMovingAverage, MovingAverageConvergenceDivergence,
    RelativeStrengthIndex, SimpleMovingAverage,
};
use ta::Next;

use crate::domain::Candle;
use crate::signal::IndicatorFrame;

const RSI_PERIOD: usize = 14;
const MACD_FAST: usize = 12;
const MACD_SLOW: usize = 26;
const MACD_SIGNAL: usize = 9;
const EMA_FAST_PERIOD: usize = 9;
const EMA_MID_PERIOD: usize = 20;
const EMA_SLOW_PERIOD: usize = 50;
const BB_PERIOD: usize = 20;
const BB_STD_DEV: f64 = 2.0;
const VOLUME_PERIOD: usize = 20;
const MOMENTUM_LOOKBACK: usize = 10;

/// Per-symbol rolling indicator state, advanced one candle at a time.
/// `IndicatorFrame` fields that need longer history than has accumulated
/// so far are left `None` rather than reporting a noisy warm-up value.
pub struct IndicatorEngine {
    rsi: RelativeStrengthIndex,
    macd: MovingAverageConvergenceDivergence,
    ema_9: ExponentialMovingAverage,
    ema_20: ExponentialMovingAverage,
    ema_50: ExponentialMovingAverage,
    bb: BollingerBands,
    volume_avg: SimpleMovingAverage,
    closes: VecDeque<f64>,
    bars_seen: usize,
}

impl IndicatorEngine {
    pub fn new() -> Self {
        Self {
            rsi: RelativeStrengthIndex::new(RSI_PERIOD).expect("valid rsi period"),
            macd: MovingAverageConvergenceDivergence::new(MACD_FAST, MACD_SLOW, MACD_SIGNAL)
                .expect("valid macd periods"),
            ema_9: ExponentialMovingAverage::new(EMA_FAST_PERIOD).expect("valid ema period"),
            ema_20: ExponentialMovingAverage::new(EMA_MID_PERIOD).expect("valid ema period"),
            ema_50: ExponentialMovingAverage::new(EMA_SLOW_PERIOD).expect("valid ema period"),
            bb: BollingerBands::new(BB_PERIOD, BB_STD_DEV).expect("valid bollinger params"),
            volume_avg: SimpleMovingAverage::new(VOLUME_PERIOD).expect("valid sma period"),
            closes: VecDeque::with_capacity(MOMENTUM_LOOKBACK + 1),
            bars_seen: 0,
        }
    }

    /// Advance every rolling indicator by one candle and build the frame
    /// the evaluators read. Must be called exactly once per candle, in
    /// timestamp order — calling it more than once for the same bar
    /// double-counts it in every rolling window.
    pub fn update(&mut self, candle: &Candle) -> IndicatorFrame {
        let price = candle.close;
        let macd_val = self.macd.next(price);
        let bb_val = self.bb.next(price);
        let rsi_val = self.rsi.next(price);
        let ema_9 = self.ema_9.next(price);
        let ema_20 = self.ema_20.next(price);
        let ema_50 = self.ema_50.next(price);
        let volume_avg_20 = self.volume_avg.next(candle.volume);

        self.bars_seen += 1;
        self.closes.push_back(price);
        if self.closes.len() > MOMENTUM_LOOKBACK + 1 {
            self.closes.pop_front();
        }
        let momentum_10bar_pct = (self.closes.len() > MOMENTUM_LOOKBACK)
            .then(|| self.closes[0])
            .filter(|past| *past != 0.0)
            .map(|past| (price - past) / past * 100.0);

        // MACD's 26+9-bar warm-up is the slowest of the bunch; gate every
        // indicator on it so the evaluators see either a fully warmed-up
        // bar or nothing; the rsi/ema/bollinger windows alone warm up
        // sooner but a partial frame is not materially more useful.
        let ready = self.bars_seen >= MACD_SLOW + MACD_SIGNAL;

        IndicatorFrame {
            rsi: ready.then_some(rsi_val),
            macd_line: ready.then_some(macd_val.macd),
            macd_signal: ready.then_some(macd_val.signal),
            ema_9: ready.then_some(ema_9),
            ema_20: ready.then_some(ema_20),
            ema_50: ready.then_some(ema_50),
            price,
            bb_upper: ready.then_some(bb_val.upper),
            bb_lower: ready.then_some(bb_val.lower),
            bb_mid: ready.then_some(bb_val.average),
            volume: Some(candle.volume),
            volume_avg_20: (self.bars_seen >= VOLUME_PERIOD).then_some(volume_avg_20),
            momentum_10bar_pct,
            ..Default::default()
        }
    }
}

impl Default for IndicatorEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candle(close: f64, volume: f64) -> Candle {
        Candle {
            timestamp_ms: 0,
            open: close,
            high: close,
            low: close,
            close,
            volume,
        }
    }

    #[test]
    fn withholds_slow_indicators_until_warmed_up() {
        let mut engine = IndicatorEngine::new();
        let frame = engine.update(&candle(100.0, 10.0));
        assert!(frame.rsi.is_none());
        assert!(frame.macd_line.is_none());
        assert!(frame.ema_9.is_none());
        assert_eq!(frame.price, 100.0);
    }

    #[test]
    fn reports_real_values_once_history_accumulates() {
        let mut engine = IndicatorEngine::new();
        let mut frame = IndicatorFrame::default();
        for i in 0..60 {
            let price = 100.0 + i as f64;
            frame = engine.update(&candle(price, 10.0));
        }
        assert!(frame.rsi.is_some());
        assert!(frame.macd_line.is_some());
        assert!(frame.macd_signal.is_some());
        assert!(frame.ema_9.is_some());
        assert!(frame.ema_20.is_some());
        assert!(frame.ema_50.is_some());
        assert!(frame.bb_upper.is_some());
        assert!(frame.volume_avg_20.is_some());
        assert!(frame.momentum_10bar_pct.is_some());

        // A steady uptrend of higher closes should push RSI well above 50
        // and put the fast EMA above the slow ones.
        assert!(frame.rsi.unwrap() > 50.0);
        assert!(frame.ema_9.unwrap() > frame.ema_50.unwrap());
    }

    #[test]
    fn momentum_reflects_ten_bar_percent_change() {
        let mut engine = IndicatorEngine::new();
        let mut frame = IndicatorFrame::default();
        for _ in 0..10 {
            frame = engine.update(&candle(100.0, 10.0));
        }
        assert!(frame.momentum_10bar_pct.is_none());
        frame = engine.update(&candle(110.0, 10.0));
        assert!(frame.momentum_10bar_pct.is_some());
    }
}
