//! Single source of truth for positions, balances and P&L (spec §4.1).
//!
//! Grounded on the teacher's `RiskStateManager`/`PortfolioStateManager`
//! pattern of one owned state value mutated through exactly one path
//! (`examples/Zuytan-rustrade/src/application/risk_management/state/risk_state_manager.rs`).

use crate::domain::{IndicatorSnapshot, Position, PositionStatus, StateError};
use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

const TRANSACTION_LOG_CAP: usize = 100;

/// How the State Manager initializes and whether it persists (spec §4.1
/// "State initialization modes").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistenceMode {
    /// Load a persisted snapshot if present; persist on every commit.
    Normal,
    /// Never touch disk.
    Backtest,
    /// Reset to the configured initial balance, persist once, then behave
    /// like `Normal`.
    FreshStart,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AccountState {
    pub balance_usd: Decimal,
    pub total_balance_usd: Decimal,
    pub in_position_usd: Decimal,
    pub position_asset_units: Decimal,
    pub entry_price_avg: Decimal,
    pub realized_pnl: Decimal,
    pub unrealized_pnl: Decimal,
    pub peak_balance: Decimal,
    pub current_drawdown_pct: f64,
    pub consecutive_wins: u32,
    pub consecutive_losses: u32,
    pub trade_count: u64,
    pub daily_trade_count: u64,
    pub last_update_ts: DateTime<Utc>,
    pub is_trading: bool,
    pub recovery_mode: bool,
    pub active_trades: HashMap<String, Position>,
}

impl AccountState {
    pub fn fresh(initial_balance: Decimal) -> Self {
        Self {
            balance_usd: initial_balance,
            total_balance_usd: initial_balance,
            in_position_usd: Decimal::ZERO,
            position_asset_units: Decimal::ZERO,
            entry_price_avg: Decimal::ZERO,
            realized_pnl: Decimal::ZERO,
            unrealized_pnl: Decimal::ZERO,
            peak_balance: initial_balance,
            current_drawdown_pct: 0.0,
            consecutive_wins: 0,
            consecutive_losses: 0,
            trade_count: 0,
            daily_trade_count: 0,
            last_update_ts: Utc::now(),
            is_trading: true,
            recovery_mode: false,
            active_trades: HashMap::new(),
        }
    }

    /// Recompute invariants (spec §3/§8); returns the list of violated ones.
    pub fn validate(&self) -> Vec<String> {
        let mut violations = Vec::new();

        let expected_total = self.balance_usd + self.in_position_usd + self.unrealized_pnl;
        if (self.total_balance_usd - expected_total).abs() > Decimal::new(1, 2) {
            violations.push(format!(
                "total_balance {} != balance+in_position+unrealized {}",
                self.total_balance_usd, expected_total
            ));
        }
        if self.position_asset_units < Decimal::ZERO {
            violations.push("position_asset_units < 0".to_string());
        }
        if self.balance_usd < Decimal::ZERO {
            violations.push("balance_usd < 0".to_string());
        }
        let position_is_zero = self.position_asset_units == Decimal::ZERO;
        let in_position_is_zero = self.in_position_usd == Decimal::ZERO;
        if position_is_zero != in_position_is_zero {
            violations.push("position_asset_units == 0 does not match in_position == 0".to_string());
        }
        if self.position_asset_units > Decimal::ZERO && self.entry_price_avg <= Decimal::ZERO {
            violations.push("position_asset_units > 0 but entry_price_avg <= 0".to_string());
        }
        violations
    }
}

/// On-disk shape of `state.json`: active trades are an ordered sequence of
/// `[id, trade]` pairs, reconstructed into a keyed map on load (spec §6).
#[derive(Debug, Serialize, Deserialize)]
struct PersistedAccountState {
    balance_usd: Decimal,
    total_balance_usd: Decimal,
    in_position_usd: Decimal,
    position_asset_units: Decimal,
    entry_price_avg: Decimal,
    realized_pnl: Decimal,
    unrealized_pnl: Decimal,
    peak_balance: Decimal,
    current_drawdown_pct: f64,
    consecutive_wins: u32,
    consecutive_losses: u32,
    trade_count: u64,
    daily_trade_count: u64,
    last_update_ts: DateTime<Utc>,
    is_trading: bool,
    recovery_mode: bool,
    active_trades: Vec<(String, Position)>,
}

impl From<&AccountState> for PersistedAccountState {
    fn from(s: &AccountState) -> Self {
        Self {
            balance_usd: s.balance_usd,
            total_balance_usd: s.total_balance_usd,
            in_position_usd: s.in_position_usd,
            position_asset_units: s.position_asset_units,
            entry_price_avg: s.entry_price_avg,
            realized_pnl: s.realized_pnl,
            unrealized_pnl: s.unrealized_pnl,
            peak_balance: s.peak_balance,
            current_drawdown_pct: s.current_drawdown_pct,
            consecutive_wins: s.consecutive_wins,
            consecutive_losses: s.consecutive_losses,
            trade_count: s.trade_count,
            daily_trade_count: s.daily_trade_count,
            last_update_ts: s.last_update_ts,
            is_trading: s.is_trading,
            recovery_mode: s.recovery_mode,
            active_trades: s.active_trades.clone().into_iter().collect(),
        }
    }
}

impl From<PersistedAccountState> for AccountState {
    fn from(p: PersistedAccountState) -> Self {
        Self {
            balance_usd: p.balance_usd,
            total_balance_usd: p.total_balance_usd,
            in_position_usd: p.in_position_usd,
            position_asset_units: p.position_asset_units,
            entry_price_avg: p.entry_price_avg,
            realized_pnl: p.realized_pnl,
            unrealized_pnl: p.unrealized_pnl,
            peak_balance: p.peak_balance,
            current_drawdown_pct: p.current_drawdown_pct,
            consecutive_wins: p.consecutive_wins,
            consecutive_losses: p.consecutive_losses,
            trade_count: p.trade_count,
            daily_trade_count: p.daily_trade_count,
            last_update_ts: p.last_update_ts,
            is_trading: p.is_trading,
            recovery_mode: p.recovery_mode,
            active_trades: p.active_trades.into_iter().collect(),
        }
    }
}

/// Proposed mutation passed to `update_state`. A sum type rather than a
/// stringly-typed op name, per spec §9's redesign note on mode discrimination.
#[derive(Debug, Clone)]
pub enum StateUpdate {
    OpenPosition {
        symbol: String,
        intent_id: String,
        size: Decimal,
        price: Decimal,
        stop_loss: Decimal,
        take_profit: Decimal,
        entry_indicators: IndicatorSnapshot,
        patterns: Vec<String>,
        confidence: f64,
    },
    ClosePosition {
        symbol: String,
        price: Decimal,
        /// `None` closes the entire held size.
        size: Option<Decimal>,
    },
    MarkToMarket {
        symbol: String,
        price: Decimal,
    },
    UpdateBalance {
        amount: Decimal,
        reason: String,
    },
    ResetDaily,
    SetRecoveryMode(bool),
    EmergencyReset {
        safe_balance: Option<Decimal>,
    },
}

/// Outcome of a successfully committed `ClosePosition` update, handed back
/// to callers (Risk Manager, Trade Journal, Pattern Memory) for feedback.
#[derive(Debug, Clone)]
pub struct CloseOutcome {
    pub position: Position,
    pub close_size: Decimal,
    pub pnl: Decimal,
    pub full_close: bool,
}

/// Result of a committed update, discriminated by what actually happened.
#[derive(Debug, Clone)]
pub enum CommitResult {
    Opened(Position),
    Closed(CloseOutcome),
    Other,
}

pub trait StateListener: Send + Sync {
    fn on_state_change(&self, update: &StateUpdate, context: &str, new_state: &AccountState);
}

struct Inner {
    state: AccountState,
    tx_log: VecDeque<TransactionLogEntry>,
}

#[derive(Debug, Clone)]
struct TransactionLogEntry {
    timestamp: DateTime<Utc>,
    context: String,
    summary: String,
}

pub struct StateManager {
    inner: Mutex<Inner>,
    listeners: std::sync::RwLock<Vec<Arc<dyn StateListener>>>,
    mode: PersistenceMode,
    state_path: PathBuf,
}

impl StateManager {
    /// Construct per spec §4.1's three initialization modes.
    pub async fn init(
        mode: PersistenceMode,
        data_dir: &std::path::Path,
        initial_balance: Decimal,
    ) -> Result<Self, StateError> {
        let state_path = data_dir.join("state.json");

        let state = match mode {
            PersistenceMode::Backtest => AccountState::fresh(initial_balance),
            PersistenceMode::FreshStart => {
                let fresh = AccountState::fresh(initial_balance);
                let persisted = PersistedAccountState::from(&fresh);
                crate::persistence::write_json_atomic(&state_path, &persisted)
                    .await
                    .map_err(|e| StateError::Persistence {
                        reason: e.to_string(),
                    })?;
                fresh
            }
            PersistenceMode::Normal => {
                let loaded: Option<PersistedAccountState> =
                    crate::persistence::read_json_opt(&state_path)
                        .await
                        .map_err(|e| StateError::Persistence {
                            reason: e.to_string(),
                        })?;
                match loaded {
                    Some(p) => p.into(),
                    None => AccountState::fresh(initial_balance),
                }
            }
        };

        Ok(Self {
            inner: Mutex::new(Inner {
                state,
                tx_log: VecDeque::new(),
            }),
            listeners: std::sync::RwLock::new(Vec::new()),
            mode,
            state_path,
        })
    }

    pub fn subscribe(&self, listener: Arc<dyn StateListener>) {
        self.listeners.write().unwrap().push(listener);
    }

    pub async fn snapshot(&self) -> AccountState {
        self.inner.lock().await.state.clone()
    }

    pub async fn validate_state(&self) -> Vec<String> {
        self.inner.lock().await.state.validate()
    }

    /// The sole mutation entry point (spec §4.1 steps 1-8).
    pub async fn update_state(
        &self,
        update: StateUpdate,
        context: &str,
    ) -> Result<CommitResult, StateError> {
        // Step 1: acquire the single process-wide mutex for this manager.
        let mut guard = self.inner.lock().await;

        // Step 2: capture a rollback snapshot.
        let rollback = guard.state.clone();

        // Step 3: validate the proposed update before touching anything.
        if let Err(e) = validate_update(&guard.state, &update) {
            debug!("StateManager: rejecting update ({}): {}", context, e);
            return Err(e);
        }

        // Step 4: apply, stamp last_update.
        let result = apply_update(&mut guard.state, &update);
        guard.state.last_update_ts = Utc::now();

        // Defensive: if apply somehow broke an invariant, roll back and
        // report loudly rather than commit corrupt state.
        let violations = guard.state.validate();
        if !violations.is_empty() {
            error!(
                "StateManager: update ({}) produced invariant violations {:?}, rolling back",
                context, violations
            );
            guard.state = rollback;
            return Err(StateError::InvariantViolation {
                reason: violations.join("; "),
            });
        }

        // Step 5: append to the bounded transaction log.
        guard.tx_log.push_back(TransactionLogEntry {
            timestamp: Utc::now(),
            context: context.to_string(),
            summary: format!("{:?}", update),
        });
        while guard.tx_log.len() > TRANSACTION_LOG_CAP {
            guard.tx_log.pop_front();
        }

        let new_state = guard.state.clone();

        // Step 6: invoke listeners outside of any further locking, isolating
        // panics so one bad listener cannot break the commit path.
        let listeners = self.listeners.read().unwrap().clone();
        for listener in listeners {
            let update_ref = &update;
            let new_state_ref = &new_state;
            let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                listener.on_state_change(update_ref, context, new_state_ref);
            }));
            if outcome.is_err() {
                error!("StateManager: listener panicked and was isolated");
            }
        }

        // Step 7: persist (best-effort, skipped in backtest mode). Failure
        // here is logged but does not roll back already-applied effects.
        if self.mode != PersistenceMode::Backtest {
            let persisted = PersistedAccountState::from(&new_state);
            if let Err(e) = crate::persistence::write_json_atomic(&self.state_path, &persisted).await
            {
                warn!("StateManager: persistence failed after commit: {}", e);
            }
        }

        // Step 8: release the mutex (guard drops at end of scope).
        Ok(result)
    }
}

fn validate_update(state: &AccountState, update: &StateUpdate) -> Result<(), StateError> {
    match update {
        StateUpdate::OpenPosition { size, price, .. } => {
            if *size < Decimal::ZERO || *price <= Decimal::ZERO {
                return Err(StateError::InvariantViolation {
                    reason: "open_position requires size >= 0 and price > 0".to_string(),
                });
            }
            let cost = size * price;
            if state.balance_usd - cost < Decimal::ZERO {
                return Err(StateError::InvariantViolation {
                    reason: format!(
                        "insufficient balance: need {}, have {}",
                        cost, state.balance_usd
                    ),
                });
            }
            Ok(())
        }
        StateUpdate::ClosePosition { symbol, size, .. } => {
            let held = state
                .active_trades
                .get(symbol)
                .map(|p| p.size)
                .unwrap_or(Decimal::ZERO);
            let close_size = size.unwrap_or(held);
            if close_size < Decimal::ZERO || close_size > held {
                return Err(StateError::InvariantViolation {
                    reason: format!("cannot close {} of {} held", close_size, held),
                });
            }
            Ok(())
        }
        StateUpdate::UpdateBalance { amount, .. } => {
            if state.balance_usd + amount < Decimal::ZERO {
                return Err(StateError::InvariantViolation {
                    reason: "update_balance would make balance negative".to_string(),
                });
            }
            Ok(())
        }
        StateUpdate::MarkToMarket { .. }
        | StateUpdate::ResetDaily
        | StateUpdate::SetRecoveryMode(_)
        | StateUpdate::EmergencyReset { .. } => Ok(()),
    }
}

fn apply_update(state: &mut AccountState, update: &StateUpdate) -> CommitResult {
    match update {
        StateUpdate::OpenPosition {
            symbol,
            intent_id,
            size,
            price,
            stop_loss,
            take_profit,
            entry_indicators,
            patterns,
            confidence,
        } => {
            let existing = state.active_trades.get(symbol);
            let (new_units, new_avg) = match existing {
                Some(pos) => {
                    let total_units = pos.size + size;
                    let new_avg = if total_units > Decimal::ZERO {
                        (pos.size * pos.entry_price + size * price) / total_units
                    } else {
                        *price
                    };
                    (total_units, new_avg)
                }
                None => (*size, *price),
            };

            state.balance_usd -= size * price;
            state.in_position_usd += size * price;
            state.position_asset_units = new_units;
            state.entry_price_avg = new_avg;
            state.trade_count += 1;
            state.daily_trade_count += 1;
            state.total_balance_usd = state.balance_usd + state.in_position_usd + state.unrealized_pnl;

            let position = Position {
                id: uuid::Uuid::new_v4().to_string(),
                intent_id: intent_id.clone(),
                direction: crate::domain::OrderSide::Buy,
                entry_price: new_avg,
                size: new_units,
                usd_cost: new_units * new_avg,
                entry_time: Utc::now(),
                stop_loss: *stop_loss,
                take_profit: *take_profit,
                entry_indicators: entry_indicators.clone(),
                patterns: patterns.clone(),
                confidence: *confidence,
                status: PositionStatus::Open,
            };
            state.active_trades.insert(symbol.clone(), position.clone());
            info!(
                "StateManager: opened {} units of {} at {} (avg {})",
                size, symbol, price, new_avg
            );
            CommitResult::Opened(position)
        }
        StateUpdate::ClosePosition { symbol, price, size } => {
            let mut position = state
                .active_trades
                .get(symbol)
                .cloned()
                .expect("validated above: position exists");
            let held = position.size;
            let close_size = size.unwrap_or(held);
            let full_close = close_size == held;

            // Credit the USD value received, not the raw PnL amount — the
            // spec's called-out common bug is crediting only the PnL.
            let pnl = close_size * (price - position.entry_price);
            state.balance_usd += close_size * price;
            state.in_position_usd -= close_size * position.entry_price;
            state.realized_pnl += pnl;

            if full_close {
                state.position_asset_units = Decimal::ZERO;
                state.entry_price_avg = Decimal::ZERO;
                state.active_trades.remove(symbol);
            } else {
                position.size -= close_size;
                position.usd_cost = position.size * position.entry_price;
                state.position_asset_units -= close_size;
                state.active_trades.insert(symbol.clone(), position.clone());
            }

            if pnl > Decimal::ZERO {
                state.consecutive_wins += 1;
                state.consecutive_losses = 0;
            } else if pnl < Decimal::ZERO {
                state.consecutive_losses += 1;
                state.consecutive_wins = 0;
            }

            state.total_balance_usd = state.balance_usd + state.in_position_usd + state.unrealized_pnl;
            if state.total_balance_usd > state.peak_balance {
                state.peak_balance = state.total_balance_usd;
            }
            state.current_drawdown_pct = if state.peak_balance > Decimal::ZERO {
                ((state.peak_balance - state.total_balance_usd) / state.peak_balance)
                    .to_f64()
                    .unwrap_or(0.0)
            } else {
                0.0
            };

            info!(
                "StateManager: closed {} of {} at {} -> pnl {}",
                close_size, symbol, price, pnl
            );

            let mut closed_position = position;
            closed_position.status = PositionStatus::Closed;
            closed_position.size = close_size;
            CommitResult::Closed(CloseOutcome {
                position: closed_position,
                close_size,
                pnl,
                full_close,
            })
        }
        StateUpdate::MarkToMarket { symbol, price } => {
            if let Some(pos) = state.active_trades.get(symbol) {
                state.unrealized_pnl = pos.size * (price - pos.entry_price);
            } else {
                state.unrealized_pnl = Decimal::ZERO;
            }
            state.total_balance_usd = state.balance_usd + state.in_position_usd + state.unrealized_pnl;
            if state.total_balance_usd > state.peak_balance {
                state.peak_balance = state.total_balance_usd;
            }
            state.current_drawdown_pct = if state.peak_balance > Decimal::ZERO {
                ((state.peak_balance - state.total_balance_usd) / state.peak_balance)
                    .to_f64()
                    .unwrap_or(0.0)
            } else {
                0.0
            };
            CommitResult::Other
        }
        StateUpdate::UpdateBalance { amount, reason } => {
            state.balance_usd += amount;
            state.total_balance_usd = state.balance_usd + state.in_position_usd + state.unrealized_pnl;
            debug!("StateManager: balance adjusted by {} ({})", amount, reason);
            CommitResult::Other
        }
        StateUpdate::ResetDaily => {
            state.daily_trade_count = 0;
            CommitResult::Other
        }
        StateUpdate::SetRecoveryMode(on) => {
            state.recovery_mode = *on;
            CommitResult::Other
        }
        StateUpdate::EmergencyReset { safe_balance } => {
            warn!("StateManager: EMERGENCY RESET triggered");
            state.active_trades.clear();
            state.position_asset_units = Decimal::ZERO;
            state.entry_price_avg = Decimal::ZERO;
            state.in_position_usd = Decimal::ZERO;
            state.unrealized_pnl = Decimal::ZERO;
            if let Some(balance) = safe_balance {
                state.balance_usd = *balance;
            }
            state.total_balance_usd = state.balance_usd + state.in_position_usd + state.unrealized_pnl;
            state.recovery_mode = true;
            CommitResult::Other
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    async fn manager(initial: Decimal) -> StateManager {
        let dir = std::env::temp_dir().join(format!("spotcore-state-test-{}", uuid::Uuid::new_v4()));
        StateManager::init(PersistenceMode::Backtest, &dir, initial)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn clean_round_trip_scenario() {
        // spec §8 scenario 1
        let mgr = manager(dec!(10000)).await;

        mgr.update_state(
            StateUpdate::OpenPosition {
                symbol: "BTC/USD".to_string(),
                intent_id: "abc".to_string(),
                size: dec!(0.001),
                price: dec!(100000),
                stop_loss: dec!(98000),
                take_profit: dec!(104000),
                entry_indicators: IndicatorSnapshot::default(),
                patterns: vec![],
                confidence: 0.7,
            },
            "test",
        )
        .await
        .unwrap();

        let snap = mgr.snapshot().await;
        assert_eq!(snap.balance_usd, dec!(9900));
        assert_eq!(snap.in_position_usd, dec!(100));
        assert_eq!(snap.position_asset_units, dec!(0.001));
        assert_eq!(snap.entry_price_avg, dec!(100000));

        let result = mgr
            .update_state(
                StateUpdate::ClosePosition {
                    symbol: "BTC/USD".to_string(),
                    price: dec!(101000),
                    size: None,
                },
                "test",
            )
            .await
            .unwrap();

        match result {
            CommitResult::Closed(outcome) => {
                assert_eq!(outcome.pnl, dec!(1.00));
                assert!(outcome.full_close);
            }
            _ => panic!("expected Closed"),
        }

        let snap = mgr.snapshot().await;
        assert_eq!(snap.balance_usd, dec!(10001.00));
        assert_eq!(snap.in_position_usd, dec!(0));
        assert_eq!(snap.position_asset_units, dec!(0));
        assert_eq!(snap.realized_pnl, dec!(1.00));
        assert_eq!(snap.total_balance_usd, dec!(10001.00));
        assert!(snap.validate().is_empty());
    }

    #[tokio::test]
    async fn insufficient_balance_aborts_without_mutation() {
        let mgr = manager(dec!(100)).await;
        let before = mgr.snapshot().await;

        let err = mgr
            .update_state(
                StateUpdate::OpenPosition {
                    symbol: "BTC/USD".to_string(),
                    intent_id: "x".to_string(),
                    size: dec!(1),
                    price: dec!(100000),
                    stop_loss: dec!(0),
                    take_profit: dec!(0),
                    entry_indicators: IndicatorSnapshot::default(),
                    patterns: vec![],
                    confidence: 0.5,
                },
                "test",
            )
            .await;

        assert!(err.is_err());
        let after = mgr.snapshot().await;
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn full_close_restores_position_to_zero() {
        // spec §8 invariant 4
        let mgr = manager(dec!(10000)).await;
        mgr.update_state(
            StateUpdate::OpenPosition {
                symbol: "ETH/USD".to_string(),
                intent_id: "i".to_string(),
                size: dec!(1),
                price: dec!(2000),
                stop_loss: dec!(1900),
                take_profit: dec!(2200),
                entry_indicators: IndicatorSnapshot::default(),
                patterns: vec![],
                confidence: 0.6,
            },
            "t",
        )
        .await
        .unwrap();
        mgr.update_state(
            StateUpdate::ClosePosition {
                symbol: "ETH/USD".to_string(),
                price: dec!(2000),
                size: None,
            },
            "t",
        )
        .await
        .unwrap();
        let snap = mgr.snapshot().await;
        assert_eq!(snap.position_asset_units, Decimal::ZERO);
        assert_eq!(snap.in_position_usd, Decimal::ZERO);
        assert!(snap.active_trades.is_empty());
    }
}
