use rust_decimal::Decimal;
use thiserror::Error;

/// Stable rejection-reason strings surfaced verbatim to the journal and to
/// callers (spec §7). `Display` yields exactly the listed strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    NoHoldings,
    DuplicateOrderPrevented,
    MaxDrawdownExceeded,
    DailyLossLimit,
    WeeklyLossLimit,
    MonthlyLossLimit,
    RecoveryConfidence,
    PositionTooSmall,
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RejectReason::NoHoldings => "NO_HOLDINGS",
            RejectReason::DuplicateOrderPrevented => "DUPLICATE_ORDER_PREVENTED",
            RejectReason::MaxDrawdownExceeded => "MAX_DRAWDOWN_EXCEEDED",
            RejectReason::DailyLossLimit => "DAILY_LOSS_LIMIT",
            RejectReason::WeeklyLossLimit => "WEEKLY_LOSS_LIMIT",
            RejectReason::MonthlyLossLimit => "MONTHLY_LOSS_LIMIT",
            RejectReason::RecoveryConfidence => "RECOVERY_CONFIDENCE",
            RejectReason::PositionTooSmall => "POSITION_TOO_SMALL",
        };
        write!(f, "{s}")
    }
}

/// Errors from State Manager mutation attempts.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("invariant violation: {reason}")]
    InvariantViolation { reason: String },

    #[error("persistence failed: {reason}")]
    Persistence { reason: String },
}

/// Errors from malformed candle/feature input.
#[derive(Debug, Error)]
pub enum InputError {
    #[error("invalid candle for {symbol}: {reason}")]
    InvalidCandle { symbol: String, reason: String },

    #[error("invalid feature vector: {reason}")]
    InvalidFeatures { reason: String },
}

/// Errors surfaced by the Risk Manager when blocking a trade.
#[derive(Debug, Error)]
pub enum RiskBlocked {
    #[error("{0}")]
    Reason(RejectReason),
}

/// Errors from the Execution Layer.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("no holdings to sell: requested {requested}, held {held}")]
    NoHoldings { requested: Decimal, held: Decimal },

    #[error("duplicate intent {intent_id}, original order {original_order}")]
    DuplicateIntent {
        intent_id: String,
        original_order: String,
    },

    #[error("venue error: {reason}")]
    Venue { reason: String },

    #[error("position too small: {usd} < minimum {minimum}")]
    PositionTooSmall { usd: Decimal, minimum: Decimal },
}

/// Errors from disk persistence across any subsystem.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("failed to read {path}: {reason}")]
    Read { path: String, reason: String },

    #[error("failed to write {path}: {reason}")]
    Write { path: String, reason: String },

    #[error("failed to parse {path}: {reason}")]
    Parse { path: String, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reject_reason_strings_are_stable() {
        assert_eq!(RejectReason::NoHoldings.to_string(), "NO_HOLDINGS");
        assert_eq!(
            RejectReason::DuplicateOrderPrevented.to_string(),
            "DUPLICATE_ORDER_PREVENTED"
        );
        assert_eq!(
            RejectReason::MaxDrawdownExceeded.to_string(),
            "MAX_DRAWDOWN_EXCEEDED"
        );
        assert_eq!(RejectReason::DailyLossLimit.to_string(), "DAILY_LOSS_LIMIT");
        assert_eq!(
            RejectReason::WeeklyLossLimit.to_string(),
            "WEEKLY_LOSS_LIMIT"
        );
        assert_eq!(
            RejectReason::MonthlyLossLimit.to_string(),
            "MONTHLY_LOSS_LIMIT"
        );
        assert_eq!(
            RejectReason::RecoveryConfidence.to_string(),
            "RECOVERY_CONFIDENCE"
        );
        assert_eq!(
            RejectReason::PositionTooSmall.to_string(),
            "POSITION_TOO_SMALL"
        );
    }
}
