//! Shared data model (spec §3): candles, feature vectors, positions, errors.

pub mod errors;
pub mod types;

pub use errors::{ExecutionError, InputError, PersistenceError, RejectReason, RiskBlocked, StateError};
pub use types::{
    Candle, Direction, FeatureVector, FeatureVectorError, IndicatorSnapshot, OrderSide, Position,
    PositionStatus, FEATURE_VECTOR_LEN,
};
