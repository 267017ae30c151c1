//! Correlation of out-of-band workflow callbacks with polling clients.
//!
//! Each integration owns one [`CorrelationStore`], keyed by the session id the
//! triggering code generated before starting the external workflow.

mod entry;
mod store;

pub use entry::{Entry, EntryKind, FinalResult, StatusUpdate};
pub use store::{
    CorrelationStore, Lookup, StoreStats, SweepableStore, DEFAULT_SHARD_COUNT, DEFAULT_TTL,
};
