//! Session-start governor
//!
//! Identify attempts spend a remote, per-token budget. Before each spawn the
//! manager asks the governor what to do; supplied budget values are used
//! once and then forgotten so the following spawn re-polls the bootstrap.

use crate::bootstrap::SessionStartLimit;
use std::time::Duration;
use tracing::{debug, warn};

/// What the manager must do before the next identify
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GovernorStep {
    /// No fresh budget on hand; ask the bootstrap collaborator
    Refresh,
    /// Budget exhausted; hold spawning for this long
    Wait(Duration),
    /// Go ahead
    Proceed,
}

#[derive(Debug, Default)]
pub struct SessionGovernor {
    supplied: Option<SessionStartLimit>,
    last_seen: Option<SessionStartLimit>,
}

impl SessionGovernor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hand the governor a fresh budget snapshot
    pub fn supply(&mut self, limit: SessionStartLimit) {
        debug!(
            total = limit.total,
            remaining = limit.remaining,
            reset_after_ms = limit.reset_after.as_millis() as u64,
            "Session start limit"
        );
        self.supplied = Some(limit);
        self.last_seen = Some(limit);
    }

    /// Decide the next step, consuming the supplied snapshot
    pub fn check(&mut self) -> GovernorStep {
        match self.supplied.take() {
            None => GovernorStep::Refresh,
            Some(limit) if limit.remaining == 0 => {
                warn!(
                    reset_after_ms = limit.reset_after.as_millis() as u64,
                    "Session start budget exhausted, delaying identify"
                );
                GovernorStep::Wait(limit.reset_after)
            }
            Some(_) => GovernorStep::Proceed,
        }
    }

    /// Most recent snapshot, for observability
    pub fn last_seen(&self) -> Option<SessionStartLimit> {
        self.last_seen
    }
}
