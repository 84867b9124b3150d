use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// One OHLCV sample for a fixed time interval. Immutable once constructed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub timestamp_ms: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "BUY"),
            OrderSide::Sell => write!(f, "SELL"),
        }
    }
}

/// A BUY/SELL/HOLD decision as produced by the Signal Generator / AI module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Buy,
    Sell,
    Hold,
}

impl Direction {
    pub fn as_order_side(self) -> Option<OrderSide> {
        match self {
            Direction::Buy => Some(OrderSide::Buy),
            Direction::Sell => Some(OrderSide::Sell),
            Direction::Hold => None,
        }
    }
}

/// Canonical feature vector length (see spec §3).
pub const FEATURE_VECTOR_LEN: usize = 9;

/// Per-element clamp bound applied before any vector is accepted.
const FEATURE_CLAMP: f64 = 999_999.0;

/// Fixed-length, ordered, finite-valued encoding of a market snapshot.
///
/// Element order: `[rsi/100, macd-signal, trend, bb_width, volatility,
/// wick_ratio, price_change_pct, volume_change_ratio, last_position_direction]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector(Vec<f64>);

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum FeatureVectorError {
    #[error("feature vector element {index} is not finite: {value}")]
    NonFinite { index: usize, value: f64 },
}

impl FeatureVector {
    /// Construct from raw elements, clamping each to +/-999999 and
    /// rejecting any non-finite input.
    pub fn new(elements: Vec<f64>) -> Result<Self, FeatureVectorError> {
        let mut clamped = Vec::with_capacity(elements.len());
        for (index, value) in elements.into_iter().enumerate() {
            if !value.is_finite() {
                return Err(FeatureVectorError::NonFinite { index, value });
            }
            clamped.push(value.clamp(-FEATURE_CLAMP, FEATURE_CLAMP));
        }
        Ok(Self(clamped))
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Canonical 9-element snapshot as described in spec §3.
    #[allow(clippy::too_many_arguments)]
    pub fn canonical(
        rsi: f64,
        macd_minus_signal: f64,
        trend: f64,
        bb_width: f64,
        volatility: f64,
        wick_ratio: f64,
        price_change_pct: f64,
        volume_change_ratio: f64,
        last_position_direction: f64,
    ) -> Result<Self, FeatureVectorError> {
        Self::new(vec![
            rsi / 100.0,
            macd_minus_signal,
            trend,
            bb_width,
            volatility,
            wick_ratio,
            price_change_pct,
            volume_change_ratio,
            last_position_direction,
        ])
    }

    /// Quantized key: each element formatted to 2 decimals, comma-joined.
    /// Vectors longer than 50 elements are truncated before keying.
    pub fn quantized_key(&self) -> String {
        let slice = if self.0.len() > 50 {
            &self.0[..50]
        } else {
            &self.0[..]
        };
        slice
            .iter()
            .map(|v| {
                if v.is_finite() {
                    format!("{:.2}", v)
                } else {
                    "0.00".to_string()
                }
            })
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// Position direction recorded on the trailing feature element, matches
/// spec's `{-1,0,+1}` domain for `last_position_direction`.
pub fn direction_as_feature(direction: Option<OrderSide>) -> f64 {
    match direction {
        Some(OrderSide::Buy) => 1.0,
        Some(OrderSide::Sell) => -1.0,
        None => 0.0,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionStatus {
    Open,
    Closed,
}

/// Snapshot of indicators captured at entry time, stored on the Position
/// for later analytics/journal breakdowns.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct IndicatorSnapshot {
    pub rsi: Option<f64>,
    pub macd: Option<f64>,
    pub macd_signal: Option<f64>,
    pub trend: Option<f64>,
    pub volatility: Option<f64>,
    pub volume: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Position {
    pub id: String,
    pub intent_id: String,
    pub direction: OrderSide,
    pub entry_price: Decimal,
    /// Size in asset units.
    pub size: Decimal,
    pub usd_cost: Decimal,
    pub entry_time: DateTime<Utc>,
    pub stop_loss: Decimal,
    pub take_profit: Decimal,
    pub entry_indicators: IndicatorSnapshot,
    pub patterns: Vec<String>,
    pub confidence: f64,
    pub status: PositionStatus,
}

impl Position {
    /// Invariant check used by the State Manager before/after every commit.
    pub fn is_internally_consistent(&self) -> bool {
        if self.size < Decimal::ZERO {
            return false;
        }
        if self.size > Decimal::ZERO && self.entry_price <= Decimal::ZERO {
            return false;
        }
        true
    }
}
