//! Risk Manager (spec §4.3): position sizing, loss-limit gating and
//! recovery-mode hysteresis.

pub mod manager;

pub use manager::{Alert, AlertSeverity, MarketConditions, PeriodBucket, RiskConfig, RiskManager};
