// Copyright (c) The partest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use chrono::{DateTime, FixedOffset};
use partest_metadata::PartestExitCode;
use std::time::Duration;

/// Cumulative statistics for a run.
///
/// Test counters only reflect the last attempt of every unit: earlier attempts of retried units
/// are never counted.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct RunStats {
    /// The number of suites that started, excluding the aggregate root and every unit's
    /// top-level suite.
    pub suites: usize,

    /// The number of tests that passed, failed or were skipped. Hook failures are not counted.
    pub tests: usize,

    /// The number of tests that passed.
    pub passes: usize,

    /// The number of test and hook failures.
    pub failures: usize,

    /// The number of tests that were skipped.
    pub pending: usize,

    /// When the run started.
    pub start: Option<DateTime<FixedOffset>>,

    /// When the run ended.
    pub end: Option<DateTime<FixedOffset>>,

    /// How long the run took.
    pub duration: Option<Duration>,

    /// The number of units that failed with no retries left.
    pub units_failed: usize,

    /// The number of units among `units_failed` that did not record a single failure, for
    /// example because the worker exited with a nonzero code after a clean run.
    pub units_failed_without_failures: usize,

    /// The number of unit attempts that failed and were retried.
    pub units_retried: usize,
}

impl RunStats {
    /// Returns the number of failures that decide the exit code.
    ///
    /// Every unit that failed counts at least once, even if it recorded no failures of its own.
    pub fn net_failures(&self) -> usize {
        self.failures + self.units_failed_without_failures
    }

    /// Returns true if the run is considered a success.
    pub fn is_success(&self) -> bool {
        self.net_failures() == 0
    }

    /// Returns the exit code for this run: the net failure count, capped at 255.
    pub fn exit_code(&self) -> i32 {
        PartestExitCode::for_failures(self.net_failures())
    }
}
