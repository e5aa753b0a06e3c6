//! Launcher core: query ranking and result aggregation.
//!
//! A keystroke becomes a [`Query`] with a fresh [`Generation`]. The [`Aggregator`] matches it
//! against every local [`CandidateProvider`] with [`beacon_matcher`], asks the accepting
//! extension workers of a [`beacon_worker::SupervisorHandle`] in parallel, and hands the merged
//! pool to the [`Ranker`]. Results of a superseded generation are never surfaced.
//!
//! [`Session`] wires all of it from a [`LauncherConfig`].

#![warn(missing_docs)]

pub mod aggregator;
mod candidate;
pub mod config;
mod error;
pub mod provider;
mod query;
pub mod rank;
mod session;
pub mod usage;

pub use aggregator::{Aggregator, AggregatorBuilder, LatestResults, QueryOutcome, QueryResults, SearchConfig};
pub use candidate::{Candidate, CandidateId, Source};
pub use config::{ConfigError, LauncherConfig};
pub use error::{Error, Result};
pub use provider::{CandidateProvider, DesktopEntryProvider, ProviderError, StaticProvider};
pub use query::{Generation, GenerationClock, Query};
pub use rank::{RankWeights, RankedItem, Ranker, Scored};
pub use session::{STATIC_PROVIDER, Session};
pub use usage::{MemoryUsageStore, UsageRecord, UsageStore};
