//! Trade Journal (spec §4.7): append-only ledger, derived analytics, and
//! CSV/JSON exports. The ledger is the source of truth; cached stats are
//! rebuildable from it.

pub mod ledger;

pub use ledger::{
    DailyAggregate, EntryRecord, EquityPoint, ExitRecord, JournalStats, LedgerRecord, Trade,
    TradeJournal,
};
