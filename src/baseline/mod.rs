//! Per-channel streaming baselines.
//!
//! Each channel keeps a Welford accumulator (`count`, `mean`, `m2`); no raw
//! history is retained. The full set of accumulators is a [`BaselineTable`],
//! loaded and saved as one snapshot through a
//! [`BaselineStore`](crate::storage::BaselineStore).

pub mod manager;
pub mod stat;
pub mod table;

pub use manager::{BaselineManager, ChannelUpdate, LoadedBaseline};
pub use stat::RunningStat;
pub use table::{BaselineTable, LAST_UPDATED_KEY};

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum StatsError {
    #[error("non-finite value {value} rejected by accumulator")]
    InvalidValue { value: f64 },

    #[error("value {value} would overflow the accumulator")]
    Overflow { value: f64 },

    #[error("invalid accumulator state: {reason}")]
    InvalidState { reason: String },
}
