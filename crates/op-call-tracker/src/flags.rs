//! Aggregate projections over a tracker's high-water marks.
//!
//! These flags answer "is anything in flight" style questions without
//! inspecting individual tracks. Every flag is a pure function of the
//! counter snapshot, so it can be recomputed after each counter change.

use serde::{Deserialize, Serialize};

/// Snapshot of a tracker's counters.
///
/// The four high-water marks never decrease. `unsettled` counts live calls
/// that have not been fulfilled or rejected yet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counters {
    pub total_created: u64,
    pub latest_updating: u64,
    pub latest_fulfilled: u64,
    pub latest_rejected: u64,
    pub unsettled: u64,
}

impl Counters {
    pub fn latest_finished(&self) -> u64 {
        self.latest_fulfilled.max(self.latest_rejected)
    }
}

/// "Has any call reached state X" projections.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HasFlags {
    /// At least one live call has not settled
    pub tracking: bool,
    /// The newest progress report has not been overtaken by a finish
    pub updating: bool,
    pub fulfilled: bool,
    pub rejected: bool,
    pub finished: bool,
}

/// "Has the most recently created call reached state X" projections.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LatestFlags {
    pub fulfilled: bool,
    pub finished: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackerFlags {
    pub has: HasFlags,
    pub latest: LatestFlags,
}

impl From<Counters> for HasFlags {
    fn from(c: Counters) -> Self {
        let finished = c.latest_finished();
        Self {
            tracking: c.unsettled > 0,
            updating: c.latest_updating > finished,
            fulfilled: c.latest_fulfilled > 0,
            rejected: c.latest_rejected > 0,
            finished: finished > 0,
        }
    }
}

impl From<Counters> for LatestFlags {
    fn from(c: Counters) -> Self {
        let any = c.total_created > 0;
        Self {
            fulfilled: any && c.latest_fulfilled == c.total_created,
            finished: any && c.latest_finished() == c.total_created && c.unsettled == 0,
        }
    }
}

impl From<Counters> for TrackerFlags {
    fn from(c: Counters) -> Self {
        Self {
            has: c.into(),
            latest: c.into(),
        }
    }
}
