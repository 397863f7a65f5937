pub mod dedup;
pub mod fetcher;
pub mod ledger;
pub mod pagination;
pub mod processor;
pub mod retry;
pub mod scheduler;
pub mod sink;
pub mod stats;
