#![doc = include_str!("../README.md")]
// Declare modules
pub mod chain;
pub mod codec;
pub mod config;
pub mod error;
pub mod log;
pub mod store;
pub mod telemetry;
pub mod tier;
pub mod types;
pub mod window;

/// Ordered finest-to-coarsest tiers with eviction forwarding.
pub use crate::chain::{Cascade, CascadeStep, TierChain};
/// Binary layout of a tier record.
pub use crate::codec::TierRecordCodec;
/// Tier and store configuration.
pub use crate::config::{StoreConfig, TierConfig, TierPattern, TierSpec};
/// Error type for tier store operations.
pub use crate::error::TierError;
/// Record storage backends.
pub use crate::log::{FileLog, IndexedLog, MemoryLog};
/// File-backed chain opened from a [`StoreConfig`].
pub use crate::store::TierStore;
/// Structured event hook for observability.
pub use crate::telemetry::{TierEvent, TierEventListener};
/// One resolution level of the store.
pub use crate::tier::{Tier, TierMetadata};
/// Record and sample types.
pub use crate::types::{MetricIndex, PeriodAggregate, RecordHeader, TierRecord, TimestampMs, Value};
/// Rollup decision for one sample.
pub use crate::window::{PeriodWindow, WindowOutcome};
