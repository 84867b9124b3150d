//! Order submission with strict idempotency (spec §4.6).
//!
//! Grounded on `domain::ports::ExecutionService` (trait-object collaborator
//! injected as `Arc<dyn Trait>`) and the teacher's intent-hashing instinct
//! for exchange idempotency, generalized from HMAC request signing to a
//! plain SHA-256 digest since no live venue is in scope.

use crate::domain::{Direction, ExecutionError, IndicatorSnapshot};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    Pending,
    Filled,
    Partial,
    Rejected,
}

#[derive(Debug, Clone)]
pub struct OrderRequest {
    pub symbol: String,
    pub side: crate::domain::OrderSide,
    pub quantity: Decimal,
    pub client_order_id: String,
}

#[derive(Debug, Clone)]
pub struct OrderResult {
    pub order_id: String,
    pub status: OrderStatus,
    pub filled_qty: Decimal,
    pub avg_price: Decimal,
}

/// External trading venue, injected as `Arc<dyn VenueAdapter>` — never
/// implemented here (spec §1 out of scope); see `PaperVenue` for the
/// offline default.
#[async_trait]
pub trait VenueAdapter: Send + Sync {
    async fn place_order(&self, request: OrderRequest) -> Result<OrderResult, ExecutionError>;
}

/// Synthesizes an instant fill at the requested price, keyed by
/// `client_order_id` so repeated submissions are idempotent even without
/// a real exchange behind it.
pub struct PaperVenue {
    fills: std::sync::Mutex<HashMap<String, OrderResult>>,
}

impl Default for PaperVenue {
    fn default() -> Self {
        Self {
            fills: std::sync::Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl VenueAdapter for PaperVenue {
    async fn place_order(&self, request: OrderRequest) -> Result<OrderResult, ExecutionError> {
        let mut fills = self.fills.lock().unwrap();
        if let Some(existing) = fills.get(&request.client_order_id) {
            return Ok(existing.clone());
        }
        let result = OrderResult {
            order_id: format!("paper-{}", request.client_order_id),
            status: OrderStatus::Filled,
            filled_qty: request.quantity,
            avg_price: Decimal::ZERO,
        };
        fills.insert(request.client_order_id.clone(), result.clone());
        Ok(result)
    }
}

struct PendingIntent {
    order_id: String,
    submitted_at: DateTime<Utc>,
}

const DEDUP_TTL_SECS: i64 = 300;
const DEFAULT_MIN_TRADE_SIZE: Decimal = Decimal::from_parts(1, 0, 0, false, 1); // 0.1

#[derive(Debug, Clone)]
pub struct SubmitPlan {
    pub symbol: String,
    pub direction: Direction,
    pub usd_size: Decimal,
    pub price: Decimal,
    pub confidence: f64,
    pub entry_indicators: IndicatorSnapshot,
    pub patterns: Vec<String>,
    pub current_holdings: Decimal,
    pub stop_loss_override: Option<Decimal>,
    pub take_profit_override: Option<Decimal>,
}

#[derive(Debug, Clone)]
pub struct SubmitOutcome {
    pub intent_id: String,
    pub client_order_id: String,
    pub order_result: Option<OrderResult>,
    pub duplicate: bool,
    pub original_order: Option<String>,
    pub stop_loss: Decimal,
    pub take_profit: Decimal,
    pub asset_size: Decimal,
}

pub struct ExecutionLayer {
    venue: std::sync::Arc<dyn VenueAdapter>,
    venue_name: String,
    seen_intents: HashMap<String, PendingIntent>,
    min_trade_size: Decimal,
}

impl ExecutionLayer {
    pub fn new(venue: std::sync::Arc<dyn VenueAdapter>, venue_name: impl Into<String>) -> Self {
        Self {
            venue,
            venue_name: venue_name.into(),
            seen_intents: HashMap::new(),
            min_trade_size: DEFAULT_MIN_TRADE_SIZE,
        }
    }

    fn prune_intents(&mut self, now: DateTime<Utc>) {
        self.seen_intents
            .retain(|_, pending| (now - pending.submitted_at).num_seconds() < DEDUP_TTL_SECS);
    }

    /// Spec §4.6: SHA-256 over `"{timestamp}-{symbol}-{direction}-{confidence:4f}"`.
    fn intent_id(symbol: &str, direction: Direction, confidence: f64, now: DateTime<Utc>) -> String {
        let input = format!(
            "{}-{}-{:?}-{:.4}",
            now.timestamp_millis(),
            symbol,
            direction,
            confidence
        );
        let digest = Sha256::digest(input.as_bytes());
        hex::encode(digest)[..16].to_string()
    }

    fn client_order_id(intent_id: &str, venue: &str) -> String {
        let input = format!("{}-{}", intent_id, venue);
        let digest = Sha256::digest(input.as_bytes());
        hex::encode(digest)[..16].to_string()
    }

    pub async fn submit(&mut self, plan: SubmitPlan, now: DateTime<Utc>) -> Result<SubmitOutcome, ExecutionError> {
        self.prune_intents(now);

        let intent_id = Self::intent_id(&plan.symbol, plan.direction, plan.confidence, now);
        if let Some(pending) = self.seen_intents.get(&intent_id) {
            return Ok(SubmitOutcome {
                intent_id: intent_id.clone(),
                client_order_id: String::new(),
                order_result: None,
                duplicate: true,
                original_order: Some(pending.order_id.clone()),
                stop_loss: Decimal::ZERO,
                take_profit: Decimal::ZERO,
                asset_size: Decimal::ZERO,
            });
        }

        let side = plan.direction.as_order_side().ok_or_else(|| ExecutionError::Venue {
            reason: "cannot submit an order for a Hold direction".to_string(),
        })?;

        // Spot guardrail: selling requires existing holdings, clamped.
        let mut asset_size = if plan.price > Decimal::ZERO {
            plan.usd_size / plan.price
        } else {
            Decimal::ZERO
        };

        if side == crate::domain::OrderSide::Sell {
            if plan.current_holdings <= Decimal::ZERO {
                return Err(ExecutionError::NoHoldings {
                    requested: asset_size,
                    held: plan.current_holdings,
                });
            }
            asset_size = asset_size.min(plan.current_holdings);
        }

        if plan.usd_size < self.min_trade_size {
            return Err(ExecutionError::PositionTooSmall {
                usd: plan.usd_size,
                minimum: self.min_trade_size,
            });
        }

        let client_order_id = Self::client_order_id(&intent_id, &self.venue_name);

        let order_result = match self.venue.place_order(OrderRequest {
            symbol: plan.symbol.clone(),
            side,
            quantity: asset_size,
            client_order_id: client_order_id.clone(),
        }).await {
            Ok(result) => result,
            Err(ExecutionError::Venue { reason }) if is_duplicate_error(&reason) => {
                warn!("ExecutionLayer: venue reported duplicate, treating as idempotent success");
                OrderResult {
                    order_id: client_order_id.clone(),
                    status: OrderStatus::Filled,
                    filled_qty: asset_size,
                    avg_price: plan.price,
                }
            }
            Err(e) => return Err(e),
        };

        self.seen_intents.insert(
            intent_id.clone(),
            PendingIntent {
                order_id: order_result.order_id.clone(),
                submitted_at: now,
            },
        );

        let stop_loss = plan.stop_loss_override.unwrap_or_else(|| {
            default_stop(plan.price, side)
        });
        let take_profit = plan.take_profit_override.unwrap_or_else(|| {
            default_take(plan.price, side)
        });

        info!(
            "ExecutionLayer: submitted {:?} {} {} (intent {})",
            side, asset_size, plan.symbol, intent_id
        );

        Ok(SubmitOutcome {
            intent_id,
            client_order_id,
            order_result: Some(order_result),
            duplicate: false,
            original_order: None,
            stop_loss,
            take_profit,
            asset_size,
        })
    }
}

fn default_stop(price: Decimal, side: crate::domain::OrderSide) -> Decimal {
    match side {
        crate::domain::OrderSide::Buy => price * Decimal::new(98, 2),
        crate::domain::OrderSide::Sell => price * Decimal::new(102, 2),
    }
}

fn default_take(price: Decimal, side: crate::domain::OrderSide) -> Decimal {
    match side {
        crate::domain::OrderSide::Buy => price * Decimal::new(104, 2),
        crate::domain::OrderSide::Sell => price * Decimal::new(96, 2),
    }
}

fn is_duplicate_error(reason: &str) -> bool {
    let lower = reason.to_lowercase();
    lower.contains("duplicate") || lower.contains("already exists")
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn duplicate_intent_short_circuits() {
        let mut layer = ExecutionLayer::new(std::sync::Arc::new(PaperVenue::default()), "paper");
        let now = Utc::now();
        let plan = SubmitPlan {
            symbol: "BTC/USD".to_string(),
            direction: Direction::Buy,
            usd_size: dec!(100),
            price: dec!(50000),
            confidence: 0.6,
            entry_indicators: IndicatorSnapshot::default(),
            patterns: vec![],
            current_holdings: Decimal::ZERO,
            stop_loss_override: None,
            take_profit_override: None,
        };
        let first = layer.submit(plan.clone(), now).await.unwrap();
        assert!(!first.duplicate);
        let second = layer.submit(plan, now).await.unwrap();
        assert!(second.duplicate);
        assert_eq!(second.original_order, Some(first.order_result.unwrap().order_id));
    }

    #[tokio::test]
    async fn sell_without_holdings_rejected() {
        let mut layer = ExecutionLayer::new(std::sync::Arc::new(PaperVenue::default()), "paper");
        let plan = SubmitPlan {
            symbol: "BTC/USD".to_string(),
            direction: Direction::Sell,
            usd_size: dec!(100),
            price: dec!(50000),
            confidence: 0.6,
            entry_indicators: IndicatorSnapshot::default(),
            patterns: vec![],
            current_holdings: Decimal::ZERO,
            stop_loss_override: None,
            take_profit_override: None,
        };
        let err = layer.submit(plan, Utc::now()).await.unwrap_err();
        assert!(matches!(err, ExecutionError::NoHoldings { .. }));
    }

    #[tokio::test]
    async fn default_stop_take_are_two_and_four_percent() {
        let mut layer = ExecutionLayer::new(std::sync::Arc::new(PaperVenue::default()), "paper");
        let plan = SubmitPlan {
            symbol: "BTC/USD".to_string(),
            direction: Direction::Buy,
            usd_size: dec!(100),
            price: dec!(50000),
            confidence: 0.6,
            entry_indicators: IndicatorSnapshot::default(),
            patterns: vec![],
            current_holdings: Decimal::ZERO,
            stop_loss_override: None,
            take_profit_override: None,
        };
        let outcome = layer.submit(plan, Utc::now()).await.unwrap();
        assert_eq!(outcome.stop_loss, dec!(49000.00));
        assert_eq!(outcome.take_profit, dec!(52000.00));
    }
}
