//! Immutable financial record and derived analytics (spec §4.7).
//!
//! Grounded on the teacher's hand-rolled statistics style (no stats crate)
//! in `examples/Zuytan-rustrade/src/domain/performance/stats.rs` and the
//! breakdown-by-dimension approach in `performance/calculator.rs`, plus
//! `settings_persistence.rs`'s atomic-write pattern for the stats cache.

use crate::domain::IndicatorSnapshot;
use chrono::{DateTime, Datelike, NaiveDate, Timelike, Utc, Weekday};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

const TRADE_WINDOW_CAP: usize = 5_000;
const EQUITY_CAP: usize = 10_000;
const SHARPE_WINDOW: usize = 500;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryRecord {
    pub order_id: String,
    pub symbol: String,
    pub timestamp: DateTime<Utc>,
    pub direction: crate::domain::OrderSide,
    pub entry_price: Decimal,
    pub size: Decimal,
    pub usd_value: Decimal,
    pub confidence: f64,
    pub regime: Option<String>,
    pub patterns: Vec<String>,
    pub indicators: IndicatorSnapshot,
    pub fees: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExitRecord {
    pub order_id: String,
    pub timestamp: DateTime<Utc>,
    pub exit_price: Decimal,
    pub fees: Decimal,
    pub hold_time_ms: i64,
    pub mfe: Decimal,
    pub mae: Decimal,
    pub balance_after: Decimal,
    pub exit_reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum LedgerRecord {
    Entry(EntryRecord),
    Exit(ExitRecord),
}

/// A completed trade, entry paired with exit, as held in the bounded
/// in-memory trade window.
#[derive(Debug, Clone)]
pub struct Trade {
    pub entry: EntryRecord,
    pub exit: ExitRecord,
    pub gross_pnl: Decimal,
    pub net_pnl: Decimal,
    pub pnl_pct: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EquityPoint {
    pub timestamp: DateTime<Utc>,
    pub balance: Decimal,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DailyAggregate {
    pub trades: u64,
    pub wins: u64,
    pub net_pnl: Decimal,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JournalStats {
    pub total_trades: u64,
    pub wins: u64,
    pub losses: u64,
    pub win_rate: f64,
    pub gross_pnl: Decimal,
    pub net_pnl: Decimal,
    pub balance: Decimal,
    pub peak_balance: Decimal,
    pub current_drawdown_pct: f64,
    pub max_drawdown_pct: f64,
    pub avg_win: Decimal,
    pub avg_loss: Decimal,
    pub avg_hold_ms_win: f64,
    pub avg_hold_ms_loss: f64,
    pub avg_hold_ms_overall: f64,
    pub best_trade: Decimal,
    pub worst_trade: Decimal,
    pub profit_factor: f64,
    pub expectancy: Decimal,
    pub payoff_ratio: f64,
    pub recovery_factor: f64,
    pub calmar: f64,
    pub sharpe: f64,
    pub sortino: f64,
    pub today: HashMap<String, DailyAggregate>,
}

pub struct TradeJournal {
    ledger_path: PathBuf,
    equity_path: PathBuf,
    stats_path: PathBuf,
    export_dir: PathBuf,
    open_entries: HashMap<String, EntryRecord>,
    trades: VecDeque<Trade>,
    equity_curve: VecDeque<EquityPoint>,
    recent_returns_pct: VecDeque<f64>,
    stats: JournalStats,
    gross_wins_total: Decimal,
    gross_losses_total: Decimal,
}

impl TradeJournal {
    pub async fn init(data_dir: &Path) -> Result<Self, crate::domain::PersistenceError> {
        let journal_dir = data_dir.join("journal");
        let ledger_path = journal_dir.join("trade-ledger.jsonl");
        let equity_path = journal_dir.join("equity-snapshots.jsonl");
        let stats_path = journal_dir.join("journal-stats.json");
        let export_dir = journal_dir.join("exports");

        let records: Vec<LedgerRecord> = crate::persistence::read_jsonl(&ledger_path).await?;
        let equity_points: Vec<EquityPoint> = crate::persistence::read_jsonl(&equity_path).await?;

        let mut journal = Self {
            ledger_path,
            equity_path,
            stats_path,
            export_dir,
            open_entries: HashMap::new(),
            trades: VecDeque::new(),
            equity_curve: VecDeque::new(),
            recent_returns_pct: VecDeque::new(),
            stats: JournalStats::default(),
            gross_wins_total: Decimal::ZERO,
            gross_losses_total: Decimal::ZERO,
        };

        // Rebuild from the ledger sequentially; it is the source of truth.
        for record in records {
            match record {
                LedgerRecord::Entry(entry) => {
                    journal.open_entries.insert(entry.order_id.clone(), entry);
                }
                LedgerRecord::Exit(exit) => journal.pair_and_fold(exit, false).await,
            }
        }
        for point in equity_points {
            journal.equity_curve.push_back(point);
            while journal.equity_curve.len() > EQUITY_CAP {
                journal.equity_curve.pop_front();
            }
        }

        info!(
            "TradeJournal: rebuilt {} trades, {} equity points from ledger",
            journal.trades.len(),
            journal.equity_curve.len()
        );

        Ok(journal)
    }

    pub async fn record_entry(&mut self, entry: EntryRecord) -> Result<(), crate::domain::PersistenceError> {
        crate::persistence::append_jsonl(&self.ledger_path, &LedgerRecord::Entry(entry.clone())).await?;
        self.open_entries.insert(entry.order_id.clone(), entry);
        Ok(())
    }

    pub async fn record_exit(&mut self, exit: ExitRecord) -> Result<(), crate::domain::PersistenceError> {
        crate::persistence::append_jsonl(&self.ledger_path, &LedgerRecord::Exit(exit.clone())).await?;
        self.pair_and_fold(exit, true).await;
        Ok(())
    }

    async fn pair_and_fold(&mut self, exit: ExitRecord, persist_equity: bool) {
        let Some(entry) = self.open_entries.remove(&exit.order_id) else {
            warn!(
                "TradeJournal: exit for unknown order {} (no matching entry)",
                exit.order_id
            );
            return;
        };

        let gross_pnl = (exit.exit_price - entry.entry_price) * entry.size;
        let fees = entry.fees + exit.fees;
        let net_pnl = gross_pnl - fees;
        let pnl_pct = if entry.usd_value > Decimal::ZERO {
            (net_pnl / entry.usd_value).to_f64().unwrap_or(0.0)
        } else {
            0.0
        };

        let trade = Trade {
            entry: entry.clone(),
            exit: exit.clone(),
            gross_pnl,
            net_pnl,
            pnl_pct,
        };

        self.fold_stats(&trade);
        self.trades.push_back(trade);
        while self.trades.len() > TRADE_WINDOW_CAP {
            self.trades.pop_front();
        }

        let point = EquityPoint {
            timestamp: exit.timestamp,
            balance: exit.balance_after,
        };
        self.equity_curve.push_back(point.clone());
        while self.equity_curve.len() > EQUITY_CAP {
            self.equity_curve.pop_front();
        }
        if persist_equity {
            if let Err(e) = crate::persistence::append_jsonl(&self.equity_path, &point).await {
                warn!("TradeJournal: failed to persist equity point: {}", e);
            }
        }
    }

    fn fold_stats(&mut self, trade: &Trade) {
        let s = &mut self.stats;
        s.total_trades += 1;
        let is_win = trade.net_pnl > Decimal::ZERO;
        if is_win {
            s.wins += 1;
            self.gross_wins_total += trade.net_pnl;
        } else if trade.net_pnl < Decimal::ZERO {
            s.losses += 1;
            self.gross_losses_total += -trade.net_pnl;
        }
        s.win_rate = if s.total_trades > 0 {
            s.wins as f64 / s.total_trades as f64
        } else {
            0.0
        };
        s.gross_pnl += trade.gross_pnl;
        s.net_pnl += trade.net_pnl;
        s.balance = trade.exit.balance_after;
        if s.balance > s.peak_balance {
            s.peak_balance = s.balance;
        }
        s.current_drawdown_pct = if s.peak_balance > Decimal::ZERO {
            ((s.peak_balance - s.balance) / s.peak_balance).to_f64().unwrap_or(0.0).max(0.0)
        } else {
            0.0
        };
        if s.current_drawdown_pct > s.max_drawdown_pct {
            s.max_drawdown_pct = s.current_drawdown_pct;
        }

        if trade.net_pnl > s.best_trade {
            s.best_trade = trade.net_pnl;
        }
        if trade.net_pnl < s.worst_trade {
            s.worst_trade = trade.net_pnl;
        }

        s.avg_win = if s.wins > 0 {
            self.gross_wins_total / Decimal::from(s.wins)
        } else {
            Decimal::ZERO
        };
        s.avg_loss = if s.losses > 0 {
            self.gross_losses_total / Decimal::from(s.losses)
        } else {
            Decimal::ZERO
        };

        let hold_ms = trade.exit.hold_time_ms as f64;
        s.avg_hold_ms_overall = running_avg(s.avg_hold_ms_overall, s.total_trades, hold_ms);
        if is_win {
            s.avg_hold_ms_win = running_avg(s.avg_hold_ms_win, s.wins, hold_ms);
        } else if trade.net_pnl < Decimal::ZERO {
            s.avg_hold_ms_loss = running_avg(s.avg_hold_ms_loss, s.losses, hold_ms);
        }

        s.profit_factor = if self.gross_losses_total > Decimal::ZERO {
            (self.gross_wins_total / self.gross_losses_total).to_f64().unwrap_or(0.0)
        } else {
            0.0
        };
        s.expectancy = if s.total_trades > 0 {
            s.net_pnl / Decimal::from(s.total_trades)
        } else {
            Decimal::ZERO
        };
        s.payoff_ratio = if s.avg_loss > Decimal::ZERO {
            (s.avg_win / s.avg_loss).to_f64().unwrap_or(0.0)
        } else {
            0.0
        };
        s.recovery_factor = if s.max_drawdown_pct > 0.0 {
            s.net_pnl.to_f64().unwrap_or(0.0) / (s.max_drawdown_pct * s.peak_balance.to_f64().unwrap_or(1.0))
        } else {
            0.0
        };
        s.calmar = if s.max_drawdown_pct > 0.0 {
            let net_pct = if s.peak_balance > Decimal::ZERO {
                (s.net_pnl / s.peak_balance).to_f64().unwrap_or(0.0)
            } else {
                0.0
            };
            net_pct / s.max_drawdown_pct
        } else {
            0.0
        };

        self.recent_returns_pct.push_back(trade.pnl_pct);
        while self.recent_returns_pct.len() > SHARPE_WINDOW {
            self.recent_returns_pct.pop_front();
        }
        let (sharpe, sortino) = compute_sharpe_sortino(&self.recent_returns_pct);
        s.sharpe = sharpe;
        s.sortino = sortino;

        let date_key = trade.exit.timestamp.format("%Y-%m-%d").to_string();
        let daily = s.today.entry(date_key).or_default();
        daily.trades += 1;
        if is_win {
            daily.wins += 1;
        }
        daily.net_pnl += trade.net_pnl;
    }

    pub fn stats(&self) -> &JournalStats {
        &self.stats
    }

    pub async fn persist_stats_cache(&self) -> Result<(), crate::domain::PersistenceError> {
        crate::persistence::write_json_atomic(&self.stats_path, &self.stats).await
    }

    /// Paginated, optionally-filtered trade history (most recent first).
    pub fn query_trades(&self, offset: usize, limit: usize, regime: Option<&str>) -> Vec<&Trade> {
        self.trades
            .iter()
            .rev()
            .filter(|t| regime.map(|r| t.entry.regime.as_deref() == Some(r)).unwrap_or(true))
            .skip(offset)
            .take(limit)
            .collect()
    }

    /// Equity curve downsampled to at most `cap` points.
    pub fn equity_curve(&self, cap: usize) -> Vec<EquityPoint> {
        downsample(&self.equity_curve, cap)
    }

    pub fn breakdown_by_regime(&self) -> HashMap<String, (u64, Decimal)> {
        let mut out: HashMap<String, (u64, Decimal)> = HashMap::new();
        for t in &self.trades {
            let key = t.entry.regime.clone().unwrap_or_else(|| "unknown".to_string());
            let e = out.entry(key).or_insert((0, Decimal::ZERO));
            e.0 += 1;
            e.1 += t.net_pnl;
        }
        out
    }

    pub fn breakdown_by_pattern(&self) -> HashMap<String, (u64, Decimal)> {
        let mut out: HashMap<String, (u64, Decimal)> = HashMap::new();
        for t in &self.trades {
            for pattern in &t.entry.patterns {
                let e = out.entry(pattern.clone()).or_insert((0, Decimal::ZERO));
                e.0 += 1;
                e.1 += t.net_pnl;
            }
        }
        out
    }

    pub fn breakdown_by_hour_of_day(&self) -> HashMap<u32, (u64, Decimal)> {
        let mut out: HashMap<u32, (u64, Decimal)> = HashMap::new();
        for t in &self.trades {
            let e = out.entry(t.entry.timestamp.hour()).or_insert((0, Decimal::ZERO));
            e.0 += 1;
            e.1 += t.net_pnl;
        }
        out
    }

    pub fn breakdown_by_day_of_week(&self) -> HashMap<Weekday, (u64, Decimal)> {
        let mut out: HashMap<Weekday, (u64, Decimal)> = HashMap::new();
        for t in &self.trades {
            let e = out.entry(t.entry.timestamp.weekday()).or_insert((0, Decimal::ZERO));
            e.0 += 1;
            e.1 += t.net_pnl;
        }
        out
    }

    pub fn breakdown_by_confidence_band(&self) -> HashMap<&'static str, (u64, Decimal)> {
        let mut out: HashMap<&'static str, (u64, Decimal)> = HashMap::new();
        for t in &self.trades {
            let band = confidence_band(t.entry.confidence);
            let e = out.entry(band).or_insert((0, Decimal::ZERO));
            e.0 += 1;
            e.1 += t.net_pnl;
        }
        out
    }

    pub fn breakdown_by_exit_reason(&self) -> HashMap<String, (u64, Decimal)> {
        let mut out: HashMap<String, (u64, Decimal)> = HashMap::new();
        for t in &self.trades {
            let e = out.entry(t.exit.exit_reason.clone()).or_insert((0, Decimal::ZERO));
            e.0 += 1;
            e.1 += t.net_pnl;
        }
        out
    }

    pub fn breakdown_by_month(&self) -> HashMap<String, (u64, Decimal)> {
        let mut out: HashMap<String, (u64, Decimal)> = HashMap::new();
        for t in &self.trades {
            let key = t.exit.timestamp.format("%Y-%m").to_string();
            let e = out.entry(key).or_insert((0, Decimal::ZERO));
            e.0 += 1;
            e.1 += t.net_pnl;
        }
        out
    }

    /// Daily summaries for the last `n` UTC days.
    pub fn daily_summaries(&self, n: u32, now: NaiveDate) -> Vec<(NaiveDate, DailyAggregate)> {
        (0..n)
            .filter_map(|offset| {
                let date = now - chrono::Duration::days(offset as i64);
                let key = date.format("%Y-%m-%d").to_string();
                self.stats.today.get(&key).map(|agg| (date, agg.clone()))
            })
            .collect()
    }

    pub fn streak_info(&self) -> (u32, u32, bool) {
        let mut wins = 0u32;
        let mut losses = 0u32;
        for t in self.trades.iter().rev() {
            if t.net_pnl > Decimal::ZERO {
                if losses > 0 {
                    break;
                }
                wins += 1;
            } else if t.net_pnl < Decimal::ZERO {
                if wins > 0 {
                    break;
                }
                losses += 1;
            } else {
                break;
            }
        }
        (wins, losses, wins > 0)
    }

    /// CSV export over `[from, to]`, fixed column order (spec §6).
    pub async fn export_csv(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        filename: &str,
    ) -> Result<PathBuf, crate::domain::PersistenceError> {
        tokio::fs::create_dir_all(&self.export_dir)
            .await
            .map_err(|e| crate::domain::PersistenceError::Write {
                path: self.export_dir.display().to_string(),
                reason: e.to_string(),
            })?;
        let path = self.export_dir.join(filename);

        let mut wtr = csv::Writer::from_writer(vec![]);
        wtr.write_record([
            "Date", "Time_UTC", "Order_ID", "Direction", "Entry_Price", "Exit_Price", "Size_BTC",
            "USD_Value", "Gross_PnL", "Fees", "Net_PnL", "PnL_Percent", "Hold_Duration",
            "Exit_Reason", "Confidence", "Regime", "Patterns", "RSI", "MACD", "Trend",
            "Balance_After",
        ])
        .map_err(csv_err(&path))?;

        for t in self.trades.iter().filter(|t| t.exit.timestamp >= from && t.exit.timestamp <= to) {
            wtr.write_record(&[
                t.exit.timestamp.format("%Y-%m-%d").to_string(),
                t.exit.timestamp.format("%H:%M:%S").to_string(),
                t.entry.order_id.clone(),
                t.entry.direction.to_string(),
                t.entry.entry_price.to_string(),
                t.exit.exit_price.to_string(),
                t.entry.size.to_string(),
                t.entry.usd_value.to_string(),
                t.gross_pnl.to_string(),
                (t.entry.fees + t.exit.fees).to_string(),
                t.net_pnl.to_string(),
                format!("{:.4}", t.pnl_pct),
                t.exit.hold_time_ms.to_string(),
                t.exit.exit_reason.clone(),
                format!("{:.2}", t.entry.confidence),
                t.entry.regime.clone().unwrap_or_default(),
                t.entry.patterns.join("|"),
                t.entry.indicators.rsi.map(|v| v.to_string()).unwrap_or_default(),
                t.entry.indicators.macd.map(|v| v.to_string()).unwrap_or_default(),
                t.entry.indicators.trend.map(|v| v.to_string()).unwrap_or_default(),
                t.exit.balance_after.to_string(),
            ])
            .map_err(csv_err(&path))?;
        }

        let bytes = wtr.into_inner().map_err(|e| crate::domain::PersistenceError::Write {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| crate::domain::PersistenceError::Write {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?;
        Ok(path)
    }

    /// Full JSON report: stats, streaks, daily summaries, breakdowns, and a
    /// 200-point equity curve (spec §6 exports).
    pub async fn export_json_report(&self, filename: &str, now: NaiveDate) -> Result<PathBuf, crate::domain::PersistenceError> {
        tokio::fs::create_dir_all(&self.export_dir)
            .await
            .map_err(|e| crate::domain::PersistenceError::Write {
                path: self.export_dir.display().to_string(),
                reason: e.to_string(),
            })?;
        let path = self.export_dir.join(filename);

        let (win_streak, loss_streak, on_win_streak) = self.streak_info();
        let report = JsonReport {
            stats: self.stats.clone(),
            win_streak,
            loss_streak,
            on_win_streak,
            daily_summaries: self
                .daily_summaries(30, now)
                .into_iter()
                .map(|(date, agg)| (date.to_string(), agg))
                .collect(),
            breakdown_by_regime: self.breakdown_by_regime(),
            breakdown_by_exit_reason: self.breakdown_by_exit_reason(),
            equity_curve: self.equity_curve(200),
        };

        crate::persistence::write_json_atomic(&path, &report).await?;
        Ok(path)
    }
}

#[derive(Debug, Serialize)]
struct JsonReport {
    stats: JournalStats,
    win_streak: u32,
    loss_streak: u32,
    on_win_streak: bool,
    daily_summaries: Vec<(String, DailyAggregate)>,
    breakdown_by_regime: HashMap<String, (u64, Decimal)>,
    breakdown_by_exit_reason: HashMap<String, (u64, Decimal)>,
    equity_curve: Vec<EquityPoint>,
}

fn csv_err(path: &Path) -> impl Fn(csv::Error) -> crate::domain::PersistenceError + '_ {
    move |e| crate::domain::PersistenceError::Write {
        path: path.display().to_string(),
        reason: e.to_string(),
    }
}

fn running_avg(prev_avg: f64, count: u64, new_value: f64) -> f64 {
    if count == 0 {
        return new_value;
    }
    prev_avg + (new_value - prev_avg) / count as f64
}

fn confidence_band(confidence: f64) -> &'static str {
    if confidence < 0.3 {
        "low"
    } else if confidence < 0.6 {
        "medium"
    } else if confidence < 0.8 {
        "high"
    } else {
        "very_high"
    }
}

fn downsample<T: Clone>(points: &VecDeque<T>, cap: usize) -> Vec<T> {
    if points.len() <= cap || cap == 0 {
        return points.iter().cloned().collect();
    }
    let step = points.len() as f64 / cap as f64;
    (0..cap)
        .map(|i| points[(i as f64 * step) as usize].clone())
        .collect()
}

/// Annualized Sharpe/Sortino over the rolling returns window, `sqrt(252)`
/// scaling as the teacher's stats module uses for daily-bar series.
fn compute_sharpe_sortino(returns: &VecDeque<f64>) -> (f64, f64) {
    if returns.len() < 2 {
        return (0.0, 0.0);
    }
    let n = returns.len() as f64;
    let mean = returns.iter().sum::<f64>() / n;
    let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / n;
    let std_dev = variance.sqrt();

    let downside: Vec<f64> = returns.iter().filter(|r| **r < 0.0).copied().collect();
    let downside_dev = if downside.is_empty() {
        0.0
    } else {
        (downside.iter().map(|r| r.powi(2)).sum::<f64>() / downside.len() as f64).sqrt()
    };

    let sharpe = if std_dev > 0.0 {
        (mean / std_dev) * (252f64).sqrt()
    } else {
        0.0
    };
    let sortino = if downside_dev > 0.0 {
        (mean / downside_dev) * (252f64).sqrt()
    } else {
        0.0
    };
    (sharpe, sortino)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn entry(order_id: &str, price: Decimal, size: Decimal, ts: DateTime<Utc>) -> EntryRecord {
        EntryRecord {
            order_id: order_id.to_string(),
            symbol: "BTC/USD".to_string(),
            timestamp: ts,
            direction: crate::domain::OrderSide::Buy,
            entry_price: price,
            size,
            usd_value: price * size,
            confidence: 0.6,
            regime: Some("uptrend".to_string()),
            patterns: vec!["hammer".to_string()],
            indicators: IndicatorSnapshot::default(),
            fees: dec!(0.1),
        }
    }

    fn exit(order_id: &str, price: Decimal, ts: DateTime<Utc>, balance_after: Decimal) -> ExitRecord {
        ExitRecord {
            order_id: order_id.to_string(),
            timestamp: ts,
            exit_price: price,
            fees: dec!(0.1),
            hold_time_ms: 60_000,
            mfe: Decimal::ZERO,
            mae: Decimal::ZERO,
            balance_after,
            exit_reason: "take_profit".to_string(),
        }
    }

    async fn journal() -> TradeJournal {
        let dir = std::env::temp_dir().join(format!("spotcore-journal-test-{}", uuid::Uuid::new_v4()));
        TradeJournal::init(&dir).await.unwrap()
    }

    #[tokio::test]
    async fn pairs_entry_and_exit_and_computes_pnl() {
        let mut j = journal().await;
        let t0 = Utc::now();
        j.record_entry(entry("ord-1", dec!(100), dec!(1), t0)).await.unwrap();
        j.record_exit(exit("ord-1", dec!(110), t0, dec!(10000))).await.unwrap();

        let stats = j.stats();
        assert_eq!(stats.total_trades, 1);
        assert_eq!(stats.wins, 1);
        assert_eq!(stats.gross_pnl, dec!(10));
        assert_eq!(stats.net_pnl, dec!(9.8));
    }

    #[tokio::test]
    async fn exit_without_matching_entry_is_skipped_with_warning() {
        let mut j = journal().await;
        j.record_exit(exit("ghost", dec!(100), Utc::now(), dec!(10000))).await.unwrap();
        assert_eq!(j.stats().total_trades, 0);
    }

    #[tokio::test]
    async fn breakdown_by_regime_aggregates_net_pnl() {
        let mut j = journal().await;
        let t0 = Utc::now();
        j.record_entry(entry("ord-1", dec!(100), dec!(1), t0)).await.unwrap();
        j.record_exit(exit("ord-1", dec!(110), t0, dec!(10000))).await.unwrap();
        let breakdown = j.breakdown_by_regime();
        assert_eq!(breakdown.get("uptrend").unwrap().0, 1);
    }
}
