//! State Manager (spec §4.1): the single source of truth for account
//! balance, the open position and derived performance figures.

pub mod manager;

pub use manager::{
    AccountState, CloseOutcome, CommitResult, PersistenceMode, StateListener, StateManager,
    StateUpdate,
};
