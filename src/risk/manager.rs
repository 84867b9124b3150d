//! Capital preservation gate and position sizer (spec §4.3).
//!
//! Grounded on the teacher's `RiskManager` struct-of-services composition
//! and config-with-validate pattern
//! (`examples/Zuytan-rustrade/src/application/risk_management/risk_manager.rs`,
//! `src/domain/risk/risk_config.rs`).

use crate::domain::RejectReason;
use chrono::{DateTime, Datelike, Duration, IsoWeek, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct RiskConfig {
    pub base_risk_pct: f64,
    pub min_position_pct: f64,
    pub max_position_pct: f64,
    pub max_drawdown_pct: f64,
    pub recovery_threshold_pct: f64,
    pub per_loss_reduction: f64,
    pub per_win_increase: f64,
    pub max_win_streak_multiplier: f64,
    pub daily_loss_limit_pct: f64,
    pub weekly_loss_limit_pct: f64,
    pub monthly_loss_limit_pct: f64,
    pub recovery_backoff: Duration,
    pub alert_ttl: Duration,
    pub min_time_in_recovery: Duration,
    pub recovery_exit_wins_required: u32,
    pub recovery_exit_win_rate_pct: f64,
    /// Below this confidence, a recovery-mode entry is rejected outright
    /// (`RECOVERY_CONFIDENCE`) rather than merely halved by step 3.
    pub recovery_min_confidence: f64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            base_risk_pct: 0.02,
            min_position_pct: 0.005,
            max_position_pct: 0.05,
            max_drawdown_pct: 0.15,
            recovery_threshold_pct: 0.10,
            per_loss_reduction: 0.20,
            per_win_increase: 0.10,
            max_win_streak_multiplier: 2.0,
            daily_loss_limit_pct: 0.05,
            weekly_loss_limit_pct: 0.10,
            monthly_loss_limit_pct: 0.20,
            recovery_backoff: Duration::minutes(5),
            alert_ttl: Duration::hours(1),
            min_time_in_recovery: Duration::minutes(10),
            recovery_exit_wins_required: 3,
            recovery_exit_win_rate_pct: 0.60,
            recovery_min_confidence: 0.5,
        }
    }
}

impl RiskConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.min_position_pct > self.max_position_pct {
            return Err("min_position_pct must be <= max_position_pct".to_string());
        }
        if self.base_risk_pct <= 0.0 {
            return Err("base_risk_pct must be positive".to_string());
        }
        if self.max_drawdown_pct <= 0.0 || self.max_drawdown_pct > 1.0 {
            return Err("max_drawdown_pct must be in (0, 1]".to_string());
        }
        Ok(())
    }
}

/// UTC-keyed loss-limit bucket (spec §4.3 "Period bucketing"). Never reset
/// by local time; the key is recomputed and compared on every mutation.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PeriodBucket {
    pub key: String,
    pub starting_balance: Decimal,
    pub realized_pnl: Decimal,
}

impl PeriodBucket {
    fn loss_pct(&self) -> f64 {
        if self.starting_balance <= Decimal::ZERO {
            return 0.0;
        }
        (-self.realized_pnl / self.starting_balance)
            .to_f64()
            .unwrap_or(0.0)
            .max(0.0)
    }

    fn roll_if_stale(&mut self, new_key: &str, balance: Decimal) {
        if self.key != new_key {
            self.key = new_key.to_string();
            self.starting_balance = balance;
            self.realized_pnl = Decimal::ZERO;
        }
    }
}

fn daily_key(ts: DateTime<Utc>) -> String {
    ts.format("%Y-%m-%d").to_string()
}

fn iso_week_key(ts: DateTime<Utc>) -> String {
    let week: IsoWeek = ts.iso_week();
    format!("{}-W{:02}", week.year(), week.week())
}

fn monthly_key(ts: DateTime<Utc>) -> String {
    ts.format("%Y-%m").to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertSeverity {
    Info,
    Warning,
    Critical,
}

#[derive(Debug, Clone)]
pub struct Alert {
    pub timestamp: DateTime<Utc>,
    pub severity: AlertSeverity,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct MarketConditions {
    pub volatility: f64,
    pub counter_trend: bool,
    pub confidence: f64,
}

pub struct RiskManager {
    config: RiskConfig,
    daily: PeriodBucket,
    weekly: PeriodBucket,
    monthly: PeriodBucket,
    peak_balance: Decimal,
    current_drawdown_pct: f64,
    consecutive_wins: u32,
    consecutive_losses: u32,
    recovery_mode: bool,
    recovery_entered_at: Option<DateTime<Utc>>,
    last_recovery_exit: Option<DateTime<Utc>>,
    alerts: VecDeque<Alert>,
    last_alert_by_kind: std::collections::HashMap<String, DateTime<Utc>>,
}

impl RiskManager {
    pub fn new(config: RiskConfig, initial_balance: Decimal) -> Self {
        let now = Utc::now();
        Self {
            daily: PeriodBucket {
                key: daily_key(now),
                starting_balance: initial_balance,
                realized_pnl: Decimal::ZERO,
            },
            weekly: PeriodBucket {
                key: iso_week_key(now),
                starting_balance: initial_balance,
                realized_pnl: Decimal::ZERO,
            },
            monthly: PeriodBucket {
                key: monthly_key(now),
                starting_balance: initial_balance,
                realized_pnl: Decimal::ZERO,
            },
            peak_balance: initial_balance,
            current_drawdown_pct: 0.0,
            consecutive_wins: 0,
            consecutive_losses: 0,
            recovery_mode: false,
            recovery_entered_at: None,
            last_recovery_exit: None,
            alerts: VecDeque::new(),
            last_alert_by_kind: std::collections::HashMap::new(),
            config,
        }
    }

    fn roll_buckets(&mut self, now: DateTime<Utc>, balance: Decimal) {
        self.daily.roll_if_stale(&daily_key(now), balance);
        self.weekly.roll_if_stale(&iso_week_key(now), balance);
        self.monthly.roll_if_stale(&monthly_key(now), balance);
    }

    fn any_period_limit_breached(&self) -> Option<RejectReason> {
        if self.daily.loss_pct() >= self.config.daily_loss_limit_pct {
            return Some(RejectReason::DailyLossLimit);
        }
        if self.weekly.loss_pct() >= self.config.weekly_loss_limit_pct {
            return Some(RejectReason::WeeklyLossLimit);
        }
        if self.monthly.loss_pct() >= self.config.monthly_loss_limit_pct {
            return Some(RejectReason::MonthlyLossLimit);
        }
        None
    }

    /// Ten-step position-sizing pipeline (spec §4.3).
    pub fn calculate_position_size(
        &mut self,
        balance: Decimal,
        _price: Decimal,
        market: &MarketConditions,
        now: DateTime<Utc>,
    ) -> Result<Decimal, RejectReason> {
        self.roll_buckets(now, balance);

        // Step 1: hard gates.
        if self.current_drawdown_pct >= self.config.max_drawdown_pct {
            return Err(RejectReason::MaxDrawdownExceeded);
        }
        if let Some(reason) = self.any_period_limit_breached() {
            return Err(reason);
        }
        if self.recovery_mode && market.confidence < self.config.recovery_min_confidence {
            return Err(RejectReason::RecoveryConfidence);
        }

        // Step 2: base.
        let mut pct = self.config.base_risk_pct;

        // Step 3: recovery halving.
        if self.recovery_mode {
            pct *= 0.5;
        }

        // Step 4: drawdown band multiplier. Spec expresses drawdown as a
        // signed figure where negative means "in drawdown"; we store it as
        // a nonnegative magnitude, so invert the sign for the comparison.
        let signed_drawdown = -self.current_drawdown_pct;
        pct *= if signed_drawdown < -0.10 {
            0.4
        } else if signed_drawdown < -0.05 {
            0.6
        } else if signed_drawdown < -0.02 {
            0.8
        } else if signed_drawdown > 0.10 {
            1.2
        } else {
            1.0
        };

        // Step 5: consecutive losses.
        pct *= 1.0 - (self.consecutive_losses as f64 * 0.2).min(0.8);

        // Step 6: consecutive wins.
        pct *= 1.0
            + (self.consecutive_wins as f64 * self.config.per_win_increase)
                .min(self.config.max_win_streak_multiplier - 1.0);

        // Step 7: volatility.
        pct *= if market.volatility > 0.04 {
            0.5
        } else if market.volatility < 0.015 {
            1.2
        } else {
            1.0
        };

        // Step 8: counter-trend penalty.
        if market.counter_trend {
            pct *= 1.0 - 0.3;
        }

        // Step 9: confidence adjustment.
        pct *= if market.confidence < 0.4 {
            0.8
        } else if market.confidence > 0.6 {
            1.3
        } else {
            1.0
        };

        // Step 10: clamp and convert to USD.
        pct = pct.clamp(self.config.min_position_pct, self.config.max_position_pct);
        let balance_f64 = balance.to_f64().unwrap_or(0.0);
        let sized = balance_f64 * pct;
        let cap = balance_f64 * 0.95;
        let sized_usd = sized.min(cap).max(0.0);

        Decimal::try_from(sized_usd).map_err(|_| RejectReason::PositionTooSmall)
    }

    /// Record a closed trade's outcome; updates streaks, drawdown, period
    /// buckets, recovery transitions and alerts (spec §4.3).
    pub fn record_outcome(&mut self, pnl: Decimal, new_balance: Decimal, now: DateTime<Utc>) {
        self.roll_buckets(now, new_balance);

        if pnl > Decimal::ZERO {
            self.consecutive_wins += 1;
            self.consecutive_losses = 0;
        } else if pnl < Decimal::ZERO {
            self.consecutive_losses += 1;
            self.consecutive_wins = 0;
        }

        self.daily.realized_pnl += pnl;
        self.weekly.realized_pnl += pnl;
        self.monthly.realized_pnl += pnl;

        if new_balance > self.peak_balance {
            self.peak_balance = new_balance;
        }
        self.current_drawdown_pct = if self.peak_balance > Decimal::ZERO {
            ((self.peak_balance - new_balance) / self.peak_balance)
                .to_f64()
                .unwrap_or(0.0)
                .max(0.0)
        } else {
            0.0
        };

        self.update_recovery_mode(now);
        self.maybe_alert(now);
    }

    fn update_recovery_mode(&mut self, now: DateTime<Utc>) {
        if !self.recovery_mode {
            let backoff_elapsed = self
                .last_recovery_exit
                .map(|exit| now - exit >= self.config.recovery_backoff)
                .unwrap_or(true);
            if self.current_drawdown_pct >= self.config.recovery_threshold_pct && backoff_elapsed {
                self.recovery_mode = true;
                self.recovery_entered_at = Some(now);
                info!("RiskManager: entering recovery mode (drawdown {:.2}%)", self.current_drawdown_pct * 100.0);
            }
        } else {
            let entered = self.recovery_entered_at.unwrap_or(now);
            let enough_time = now - entered >= self.config.min_time_in_recovery;
            let below_threshold =
                self.current_drawdown_pct < self.config.recovery_threshold_pct * 0.8;
            let recovered_confidence = self.consecutive_wins >= self.config.recovery_exit_wins_required
                || self.recent_win_rate_above(self.config.recovery_exit_win_rate_pct);

            if enough_time && below_threshold && recovered_confidence {
                self.recovery_mode = false;
                self.last_recovery_exit = Some(now);
                self.recovery_entered_at = None;
                info!("RiskManager: exiting recovery mode");
            }
        }
    }

    fn recent_win_rate_above(&self, threshold_pct: f64) -> bool {
        let total = self.consecutive_wins + self.consecutive_losses;
        if total == 0 {
            return false;
        }
        (self.consecutive_wins as f64 / total as f64) > threshold_pct
    }

    fn maybe_alert(&mut self, now: DateTime<Utc>) {
        self.prune_alerts(now);

        let candidates: Vec<(&'static str, AlertSeverity, String)> = {
            let mut c = Vec::new();
            if self.current_drawdown_pct >= self.config.max_drawdown_pct {
                c.push((
                    "max_drawdown",
                    AlertSeverity::Critical,
                    format!("drawdown {:.2}% at/above max", self.current_drawdown_pct * 100.0),
                ));
            } else if self.current_drawdown_pct >= self.config.recovery_threshold_pct {
                c.push((
                    "recovery_threshold",
                    AlertSeverity::Warning,
                    format!("drawdown {:.2}% above recovery threshold", self.current_drawdown_pct * 100.0),
                ));
            }
            if self.consecutive_losses >= 3 {
                c.push((
                    "loss_streak",
                    AlertSeverity::Info,
                    format!("{} consecutive losses", self.consecutive_losses),
                ));
            }
            c
        };

        for (kind, severity, message) in candidates {
            let gap_ok = self
                .last_alert_by_kind
                .get(kind)
                .map(|last| now - *last >= Duration::minutes(5))
                .unwrap_or(true);
            if !gap_ok {
                continue;
            }
            self.last_alert_by_kind.insert(kind.to_string(), now);
            self.alerts.push_back(Alert {
                timestamp: now,
                severity,
                message,
            });
            while self.alerts.len() > 50 {
                self.alerts.pop_front();
            }
        }
    }

    fn prune_alerts(&mut self, now: DateTime<Utc>) {
        let ttl = self.config.alert_ttl;
        self.alerts.retain(|a| now - a.timestamp < ttl);
    }

    pub fn alerts(&self) -> impl Iterator<Item = &Alert> {
        self.alerts.iter()
    }

    pub fn is_in_recovery(&self) -> bool {
        self.recovery_mode
    }

    pub fn current_drawdown_pct(&self) -> f64 {
        self.current_drawdown_pct
    }

    pub fn consecutive_error_gate(&self, consecutive_errors: u32) -> bool {
        // spec §7: >=10 consecutive venue errors flips emergency mode.
        consecutive_errors >= 10
    }

    pub fn warn_emergency(&self) {
        warn!("RiskManager: emergency mode — halting further submissions");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn market(volatility: f64, counter_trend: bool, confidence: f64) -> MarketConditions {
        MarketConditions {
            volatility,
            counter_trend,
            confidence,
        }
    }

    #[test]
    fn drawdown_step_down_scenario() {
        // spec §8: sized position shrinks under a deep drawdown.
        let mut rm = RiskManager::new(RiskConfig::default(), dec!(10000));
        let now = Utc::now();
        rm.peak_balance = dec!(10000);
        rm.current_drawdown_pct = 0.12; // > 10%

        let size = rm
            .calculate_position_size(dec!(8800), dec!(50000), &market(0.02, false, 0.5), now)
            .unwrap();
        // base 2% * drawdown-band 0.4 = 0.8% of 8800 = 70.40, within bounds.
        assert_eq!(size, dec!(70.4));
    }

    #[test]
    fn recovery_mode_rejects_low_confidence_entries_outright() {
        let mut rm = RiskManager::new(RiskConfig::default(), dec!(10000));
        let t0 = Utc::now();
        rm.record_outcome(dec!(-1100), dec!(8900), t0);
        assert!(rm.is_in_recovery());

        let err = rm
            .calculate_position_size(dec!(8900), dec!(50000), &market(0.02, false, 0.3), t0)
            .unwrap_err();
        assert_eq!(err, RejectReason::RecoveryConfidence);

        // A confident signal still sizes (at half risk, per step 3).
        assert!(rm
            .calculate_position_size(dec!(8900), dec!(50000), &market(0.02, false, 0.8), t0)
            .is_ok());
    }

    #[test]
    fn max_drawdown_rejects_outright() {
        let mut rm = RiskManager::new(RiskConfig::default(), dec!(10000));
        rm.current_drawdown_pct = 0.20;
        let err = rm
            .calculate_position_size(dec!(8000), dec!(50000), &market(0.02, false, 0.5), Utc::now())
            .unwrap_err();
        assert_eq!(err, RejectReason::MaxDrawdownExceeded);
    }

    #[test]
    fn recovery_mode_enters_on_drawdown_and_exits_after_hysteresis() {
        let mut rm = RiskManager::new(RiskConfig::default(), dec!(10000));
        let t0 = Utc::now();
        rm.record_outcome(dec!(-1100), dec!(8900), t0);
        assert!(rm.is_in_recovery());

        // Too soon: recovery should not exit yet even with a win streak.
        rm.consecutive_wins = 5;
        rm.current_drawdown_pct = 0.01;
        rm.update_recovery_mode(t0 + Duration::minutes(1));
        assert!(rm.is_in_recovery());

        rm.update_recovery_mode(t0 + Duration::minutes(11));
        assert!(!rm.is_in_recovery());
    }

    #[test]
    fn period_buckets_roll_on_new_utc_day() {
        let mut rm = RiskManager::new(RiskConfig::default(), dec!(10000));
        let t0 = Utc::now();
        rm.record_outcome(dec!(-100), dec!(9900), t0);
        assert_eq!(rm.daily.realized_pnl, dec!(-100));

        let next_day = t0 + Duration::days(2);
        rm.roll_buckets(next_day, dec!(9900));
        assert_eq!(rm.daily.realized_pnl, Decimal::ZERO);
        assert_eq!(rm.daily.starting_balance, dec!(9900));
    }
}
