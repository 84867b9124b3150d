//! Environment-driven configuration (spec.md §6, SPEC_FULL.md ambient
//! stack). Grounded on the teacher's `config/mod.rs` per-domain-merged
//! pattern, corrected to use the actual `dotenvy` crate API.

use crate::ai::DecisionConfig;
use crate::risk::RiskConfig;
use crate::state::PersistenceMode;
use anyhow::{Context, Result};
use rust_decimal::Decimal;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub backtest_mode: bool,
    pub paper_trading: bool,
    pub fresh_start: bool,
    pub min_trade_confidence: f64,
    pub ai_enable_llm: bool,
    pub ai_mode: crate::ai::AiMode,
    pub data_dir: PathBuf,
    pub initial_balance: Decimal,
    pub risk: RiskConfig,
    pub min_signals_to_trade: usize,
    pub min_signal_confidence: f64,
    pub decision: DecisionConfig,
}

impl Config {
    /// Load configuration from the process environment, calling
    /// `dotenvy::dotenv().ok()` first so a local `.env` can seed it.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let backtest_mode = env_bool("BACKTEST_MODE", false);
        let paper_trading = env_bool("PAPER_TRADING", true);
        let fresh_start = env_bool("FRESH_START", false);
        let min_trade_confidence = env_f64("MIN_TRADE_CONFIDENCE", 0.25);
        let ai_enable_llm = env_bool("AI_ENABLE_LLM", true);
        let ai_mode = std::env::var("AI_MODE")
            .ok()
            .and_then(|s| crate::ai::AiMode::from_str(&s).ok())
            .unwrap_or(crate::ai::AiMode::Advisory);
        let data_dir = std::env::var("DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./data"));

        let initial_balance = std::env::var("INITIAL_BALANCE_USD")
            .ok()
            .and_then(|s| Decimal::from_str(&s).ok())
            .unwrap_or(Decimal::new(10_000, 0));

        let mut risk = RiskConfig::default();
        risk.base_risk_pct = env_f64("RISK_BASE_PCT", risk.base_risk_pct);
        risk.min_position_pct = env_f64("RISK_MIN_POSITION_PCT", risk.min_position_pct);
        risk.max_position_pct = env_f64("RISK_MAX_POSITION_PCT", risk.max_position_pct);
        risk.max_drawdown_pct = env_f64("RISK_MAX_DRAWDOWN_PCT", risk.max_drawdown_pct);
        risk.daily_loss_limit_pct = env_f64("RISK_DAILY_LOSS_LIMIT_PCT", risk.daily_loss_limit_pct);
        risk.weekly_loss_limit_pct = env_f64("RISK_WEEKLY_LOSS_LIMIT_PCT", risk.weekly_loss_limit_pct);
        risk.monthly_loss_limit_pct = env_f64("RISK_MONTHLY_LOSS_LIMIT_PCT", risk.monthly_loss_limit_pct);
        risk.recovery_min_confidence = env_f64("RISK_RECOVERY_MIN_CONFIDENCE", risk.recovery_min_confidence);
        risk.validate().map_err(|e| anyhow::anyhow!(e)).context("invalid risk configuration")?;

        let min_signals_to_trade = std::env::var("SIGNAL_MIN_AGREEING")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(2);
        let min_signal_confidence = env_f64("SIGNAL_MIN_CONFIDENCE", 0.25);

        let decision = DecisionConfig {
            mode: ai_mode,
            min_confidence_override: env_f64("AI_MIN_CONFIDENCE_OVERRIDE", 0.35),
            emergency_stop_pct: env_f64("AI_EMERGENCY_STOP_PCT", 0.05),
            enable_veto: env_bool("AI_ENABLE_VETO", true),
            enable_llm: ai_enable_llm,
            llm_timeout: Duration::from_secs(
                std::env::var("AI_LLM_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(3),
            ),
            min_sample_for_blend: std::env::var("AI_MIN_SAMPLE_FOR_BLEND")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(10),
        };

        Ok(Self {
            backtest_mode,
            paper_trading,
            fresh_start,
            min_trade_confidence,
            ai_enable_llm,
            ai_mode,
            data_dir,
            initial_balance,
            risk,
            min_signals_to_trade,
            min_signal_confidence,
            decision,
        })
    }

    pub fn persistence_mode(&self) -> PersistenceMode {
        if self.backtest_mode {
            PersistenceMode::Backtest
        } else if self.fresh_start {
            PersistenceMode::FreshStart
        } else {
            PersistenceMode::Normal
        }
    }
}

fn env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .and_then(|s| match s.to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Some(true),
            "0" | "false" | "no" | "off" => Some(false),
            _ => None,
        })
        .unwrap_or(default)
}

fn env_f64(key: &str, default: f64) -> f64 {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

impl FromStr for crate::ai::AiMode {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "passive" => Ok(crate::ai::AiMode::Passive),
            "advisory" => Ok(crate::ai::AiMode::Advisory),
            "hybrid" => Ok(crate::ai::AiMode::Hybrid),
            "autonomous" => Ok(crate::ai::AiMode::Autonomous),
            _ => Err(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_parse_without_any_env_vars() {
        for key in [
            "BACKTEST_MODE",
            "PAPER_TRADING",
            "FRESH_START",
            "MIN_TRADE_CONFIDENCE",
            "AI_ENABLE_LLM",
            "AI_MODE",
            "DATA_DIR",
        ] {
            std::env::remove_var(key);
        }
        let config = Config::from_env().unwrap();
        assert!(!config.backtest_mode);
        assert!(config.paper_trading);
        assert_eq!(config.ai_mode, crate::ai::AiMode::Advisory);
        assert_eq!(config.min_signals_to_trade, 2);
    }

    #[test]
    fn ai_mode_parses_case_insensitively() {
        assert_eq!(
            crate::ai::AiMode::from_str("HYBRID").unwrap(),
            crate::ai::AiMode::Hybrid
        );
        assert!(crate::ai::AiMode::from_str("bogus").is_err());
    }
}
