//! OP Call Tracker - Call Sequencing and Race Resolution
//!
//! Lets overlapping invocations of one async operation decide whether their
//! result is still the freshest available:
//! - Monotonic sequence numbers per tracked call
//! - Per-state high-water marks (updating, fulfilled, rejected)
//! - Staleness and "latest" predicates that hold under any completion order
//! - Aggregate in-flight flags for observers
//! - A strictly nested ambient context for a call's synchronous prologue
//!
//! Everything here is single-threaded bookkeeping; nothing is awaited.

pub mod config;
pub mod context_stack;
pub mod error;
pub mod flags;
pub mod metrics;
pub mod track;
pub mod tracker;

pub use config::TrackerConfig;
pub use context_stack::{ContextStack, Restore, TrackContext};
pub use error::{ContextError, Result, TrackerError};
pub use flags::{Counters, HasFlags, LatestFlags, TrackerFlags};
pub use metrics::TrackerMetrics;
pub use track::{DataKey, Track, TrackState};
pub use tracker::{SharedDataEvent, Tracker, TrackerEvent};
