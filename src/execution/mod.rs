//! Execution Layer (spec §4.6): idempotent order submission with the
//! spot-only guardrail.

pub mod executor;

pub use executor::{
    ExecutionLayer, OrderRequest, OrderResult, OrderStatus, PaperVenue, SubmitOutcome, SubmitPlan,
    VenueAdapter,
};
