//! Wall-clock allowance for one scheduled invocation.
//!
//! The scheduler stops the connector after a fixed time; pipelines consult a
//! [`DeadlineBudget`] before starting work they may not be able to finish.

use std::time::{Duration, Instant};

use keyfed_federation::ExecutionBudget;

/// Budget that runs out at a fixed monotonic deadline.
#[derive(Debug, Clone, Copy)]
pub struct DeadlineBudget {
    deadline: Instant,
}

impl DeadlineBudget {
    /// Starts a budget of `allowance` from now.
    pub fn starting_now(allowance: Duration) -> Self {
        Self {
            deadline: Instant::now() + allowance,
        }
    }

    /// A budget ending `reserve` before this one, for work that must leave
    /// time for a later stage.
    pub fn reserving(&self, reserve: Duration) -> Self {
        Self {
            deadline: self.deadline.checked_sub(reserve).unwrap_or_else(Instant::now),
        }
    }
}

impl ExecutionBudget for DeadlineBudget {
    fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }
}
