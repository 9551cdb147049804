//! Persistence for chunked translation jobs: snapshot stores and the token
//! usage ledger.

mod file_store;
mod index;
mod memory_store;
mod usage_ledger;

pub use file_store::{DEFAULT_MAX_ENTRIES, DEFAULT_TTL_DAYS, FileJobStore, StoreConfig};
pub use index::SessionIndex;
pub use memory_store::MemoryJobStore;
pub use usage_ledger::{
    DailyUsage, FileUsageLedger, HISTORY_DAYS, INPUT_USD_PER_MILLION, OUTPUT_USD_PER_MILLION,
    UsageHistory, UsageSummary,
};
