//! The fourteen independent sub-evaluators combined by the Signal
//! Generator (spec §4.4). Each is a pure function of an `IndicatorFrame`.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EvalDirection {
    Buy,
    Sell,
    Neutral,
}

#[derive(Debug, Clone)]
pub struct EvaluatorSignal {
    pub name: &'static str,
    pub direction: EvalDirection,
    pub strength: f64,
}

/// Everything the fourteen evaluators read. Populated by whatever upstream
/// indicator pipeline the caller maintains; this module is pure.
#[derive(Debug, Clone, Default)]
pub struct IndicatorFrame {
    pub rsi: Option<f64>,
    pub macd_line: Option<f64>,
    pub macd_signal: Option<f64>,
    pub ema_9: Option<f64>,
    pub ema_20: Option<f64>,
    pub ema_50: Option<f64>,
    pub price: f64,
    pub bb_upper: Option<f64>,
    pub bb_lower: Option<f64>,
    pub bb_mid: Option<f64>,
    pub patterns: Vec<(String, f64)>,
    pub regime: Option<String>,
    pub volume: Option<f64>,
    pub volume_avg_20: Option<f64>,
    pub momentum_10bar_pct: Option<f64>,
    pub tpo_zone: Option<f64>,
    pub support_levels: Vec<f64>,
    pub resistance_levels: Vec<f64>,
    pub ema_cross_confluence: Option<f64>,
    pub ema_cross_blowoff: bool,
    pub liquidity_sweep: Option<(EvalDirection, f64)>,
    pub ma_bounce: Option<(EvalDirection, f64)>,
    pub higher_tf_bias: Option<(EvalDirection, f64)>,
}

pub fn rsi(frame: &IndicatorFrame) -> Option<EvaluatorSignal> {
    let rsi = frame.rsi?;
    let (direction, strength) = if rsi < 20.0 {
        (EvalDirection::Buy, 1.0)
    } else if rsi < 30.0 {
        (EvalDirection::Buy, (30.0 - rsi) / 10.0)
    } else if rsi > 80.0 {
        (EvalDirection::Sell, 1.0)
    } else if rsi > 70.0 {
        (EvalDirection::Sell, (rsi - 70.0) / 10.0)
    } else {
        return None;
    };
    Some(EvaluatorSignal {
        name: "rsi",
        direction,
        strength: strength.clamp(0.0, 1.0),
    })
}

pub fn macd(frame: &IndicatorFrame) -> Option<EvaluatorSignal> {
    let line = frame.macd_line?;
    let signal = frame.macd_signal?;
    let diff = line - signal;
    if diff == 0.0 {
        return None;
    }
    let direction = if diff > 0.0 { EvalDirection::Buy } else { EvalDirection::Sell };
    let strength = (diff.abs() / 50.0).min(1.0);
    Some(EvaluatorSignal { name: "macd", direction, strength })
}

pub fn ema_stack(frame: &IndicatorFrame) -> Option<EvaluatorSignal> {
    let (e9, e20, e50) = (frame.ema_9?, frame.ema_20?, frame.ema_50?);
    let bullish_count = [e9 > e20, e20 > e50, frame.price > e9].iter().filter(|b| **b).count();
    let bearish_count = [e9 < e20, e20 < e50, frame.price < e9].iter().filter(|b| **b).count();

    if bullish_count == 3 {
        Some(EvaluatorSignal { name: "ema_stack", direction: EvalDirection::Buy, strength: 1.0 })
    } else if bearish_count == 3 {
        Some(EvaluatorSignal { name: "ema_stack", direction: EvalDirection::Sell, strength: 1.0 })
    } else if bullish_count == 2 {
        Some(EvaluatorSignal { name: "ema_stack", direction: EvalDirection::Buy, strength: 0.5 })
    } else if bearish_count == 2 {
        Some(EvaluatorSignal { name: "ema_stack", direction: EvalDirection::Sell, strength: 0.5 })
    } else {
        None
    }
}

pub fn bollinger(frame: &IndicatorFrame) -> Option<EvaluatorSignal> {
    let (upper, lower, mid) = (frame.bb_upper?, frame.bb_lower?, frame.bb_mid?);
    if upper <= lower {
        return None;
    }
    let position = (frame.price - lower) / (upper - lower);
    if position <= 0.1 {
        Some(EvaluatorSignal { name: "bollinger", direction: EvalDirection::Buy, strength: 1.0 - position * 5.0 })
    } else if position >= 0.9 {
        Some(EvaluatorSignal { name: "bollinger", direction: EvalDirection::Sell, strength: (position - 0.9) * 5.0 + 0.5 })
    } else if frame.price < mid {
        Some(EvaluatorSignal { name: "bollinger", direction: EvalDirection::Buy, strength: 0.2 })
    } else {
        None
    }
}

pub fn patterns(frame: &IndicatorFrame) -> Option<EvaluatorSignal> {
    if frame.patterns.is_empty() {
        return None;
    }
    let (mut bull, mut bear) = (0.0, 0.0);
    for (name, confidence) in &frame.patterns {
        let lower = name.to_lowercase();
        if lower.contains("bull") || lower.contains("hammer") || lower.contains("bottom") {
            bull += confidence;
        } else if lower.contains("bear") || lower.contains("shooting") || lower.contains("top") {
            bear += confidence;
        }
    }
    if bull == 0.0 && bear == 0.0 {
        return None;
    }
    if bull >= bear {
        Some(EvaluatorSignal { name: "patterns", direction: EvalDirection::Buy, strength: bull.clamp(0.0, 1.0) })
    } else {
        Some(EvaluatorSignal { name: "patterns", direction: EvalDirection::Sell, strength: bear.clamp(0.0, 1.0) })
    }
}

pub fn regime(frame: &IndicatorFrame) -> Option<EvaluatorSignal> {
    let regime = frame.regime.as_ref()?.to_lowercase();
    if regime.contains("up") || regime.contains("bull") {
        Some(EvaluatorSignal { name: "regime", direction: EvalDirection::Buy, strength: 0.4 })
    } else if regime.contains("down") || regime.contains("bear") {
        Some(EvaluatorSignal { name: "regime", direction: EvalDirection::Sell, strength: 0.4 })
    } else {
        None
    }
}

/// Volume produces a multiplier (not a direction), applied by the
/// aggregator to both bull and bear totals.
pub fn volume_multiplier(frame: &IndicatorFrame) -> f64 {
    match (frame.volume, frame.volume_avg_20) {
        (Some(v), Some(avg)) if avg > 0.0 => {
            let ratio = v / avg;
            ratio.clamp(0.5, 1.5)
        }
        _ => 1.0,
    }
}

pub fn momentum(frame: &IndicatorFrame) -> Option<EvaluatorSignal> {
    let pct = frame.momentum_10bar_pct?;
    if pct > 0.5 {
        Some(EvaluatorSignal { name: "momentum", direction: EvalDirection::Buy, strength: (pct / 3.0).min(1.0) })
    } else if pct < -0.5 {
        Some(EvaluatorSignal { name: "momentum", direction: EvalDirection::Sell, strength: (-pct / 3.0).min(1.0) })
    } else {
        None
    }
}

pub fn tpo(frame: &IndicatorFrame) -> Option<EvaluatorSignal> {
    let zone = frame.tpo_zone?;
    if zone > 0.6 {
        Some(EvaluatorSignal { name: "tpo", direction: EvalDirection::Buy, strength: zone })
    } else if zone < -0.6 {
        Some(EvaluatorSignal { name: "tpo", direction: EvalDirection::Sell, strength: -zone })
    } else {
        None
    }
}

pub fn support_resistance(frame: &IndicatorFrame) -> Option<EvaluatorSignal> {
    const PROXIMITY: f64 = 0.005;
    for level in &frame.support_levels {
        if level > &0.0 && (frame.price - level).abs() / level <= PROXIMITY {
            return Some(EvaluatorSignal { name: "support_resistance", direction: EvalDirection::Buy, strength: 0.6 });
        }
    }
    for level in &frame.resistance_levels {
        if level > &0.0 && (frame.price - level).abs() / level <= PROXIMITY {
            return Some(EvaluatorSignal { name: "support_resistance", direction: EvalDirection::Sell, strength: 0.6 });
        }
    }
    None
}

pub fn ema_sma_crossover(frame: &IndicatorFrame) -> Option<EvaluatorSignal> {
    let confluence = frame.ema_cross_confluence?;
    if confluence == 0.0 {
        return None;
    }
    let direction = if confluence > 0.0 { EvalDirection::Buy } else { EvalDirection::Sell };
    let mut strength = confluence.abs().min(1.0);
    if frame.ema_cross_blowoff {
        strength *= 0.5;
    }
    Some(EvaluatorSignal { name: "ema_sma_crossover", direction, strength })
}

pub fn liquidity_sweep(frame: &IndicatorFrame) -> Option<EvaluatorSignal> {
    let (direction, confidence) = frame.liquidity_sweep?;
    Some(EvaluatorSignal { name: "liquidity_sweep", direction, strength: confidence.clamp(0.0, 1.0) })
}

pub fn ma_dynamic_support_resistance(frame: &IndicatorFrame) -> Option<EvaluatorSignal> {
    let (direction, confidence) = frame.ma_bounce?;
    Some(EvaluatorSignal { name: "ma_dynamic_sr", direction, strength: confidence.clamp(0.0, 1.0) })
}

pub fn multi_timeframe(frame: &IndicatorFrame) -> Option<EvaluatorSignal> {
    let (direction, strength) = frame.higher_tf_bias?;
    Some(EvaluatorSignal { name: "multi_timeframe", direction, strength: strength.clamp(0.0, 1.0) })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rsi_strong_buy_under_20() {
        let frame = IndicatorFrame { rsi: Some(15.0), ..Default::default() };
        let s = rsi(&frame).unwrap();
        assert_eq!(s.direction, EvalDirection::Buy);
        assert_eq!(s.strength, 1.0);
    }

    #[test]
    fn rsi_neutral_band_returns_none() {
        let frame = IndicatorFrame { rsi: Some(50.0), ..Default::default() };
        assert!(rsi(&frame).is_none());
    }

    #[test]
    fn ema_stack_perfect_bullish() {
        let frame = IndicatorFrame {
            ema_9: Some(105.0),
            ema_20: Some(100.0),
            ema_50: Some(95.0),
            price: 110.0,
            ..Default::default()
        };
        let s = ema_stack(&frame).unwrap();
        assert_eq!(s.direction, EvalDirection::Buy);
        assert_eq!(s.strength, 1.0);
    }

    #[test]
    fn volume_multiplier_clamped() {
        let frame = IndicatorFrame { volume: Some(1000.0), volume_avg_20: Some(100.0), ..Default::default() };
        assert_eq!(volume_multiplier(&frame), 1.5);
    }
}
