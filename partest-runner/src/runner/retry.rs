// Copyright (c) The partest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::runner::{AttemptOutcome, UnitState};

/// How many times a failing unit is run again.
///
/// Retries are immediate: a retried unit goes back into the queue and runs as soon as a slot is
/// free.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct RetryPolicy {
    retries: u32,
}

impl RetryPolicy {
    /// Creates a policy that retries a failing unit up to `retries` times.
    pub fn new(retries: u32) -> Self {
        Self { retries }
    }

    /// Returns the retry budget.
    pub fn retries(self) -> u32 {
        self.retries
    }

    /// Returns the total number of attempts a unit may be given.
    pub fn total_attempts(self) -> u32 {
        self.retries.saturating_add(1)
    }

    /// Returns the state a unit moves to after an attempt with `outcome`, given that
    /// `retries_used` retries have already been spent on it.
    ///
    /// Returns `None` for fatal outcomes, which end the whole run.
    pub fn next_state(self, retries_used: u32, outcome: &AttemptOutcome) -> Option<UnitState> {
        match outcome {
            AttemptOutcome::Passed => Some(UnitState::Succeeded),
            AttemptOutcome::Failed { .. } if should_retry(retries_used, self.retries, outcome) => {
                Some(UnitState::FailedRetryable)
            }
            AttemptOutcome::Failed { .. } => Some(UnitState::FailedTerminal),
            AttemptOutcome::Fatal(_) => None,
        }
    }
}

/// Decides whether a unit should be run again.
///
/// A unit is retried if its attempt failed (but did not crash) and fewer than `retry_budget`
/// retries have been used.
pub fn should_retry(retries_used: u32, retry_budget: u32, outcome: &AttemptOutcome) -> bool {
    outcome.is_failure() && retries_used < retry_budget
}
