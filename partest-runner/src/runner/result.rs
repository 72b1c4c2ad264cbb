// Copyright (c) The partest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::errors::FatalUnitErrorKind;
use camino::Utf8PathBuf;
use chrono::{DateTime, FixedOffset};
use partest_metadata::{RecordedEventKind, WorkerMessage};
use std::{fmt, time::Duration};
use tracing::warn;

/// Identifies a unit within a run, in the order units were added.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct UnitId(usize);

impl UnitId {
    pub(crate) fn new(index: usize) -> Self {
        Self(index)
    }

    /// Returns the 0-indexed position of the unit.
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unit-{}", self.0)
    }
}

/// A single test file to run.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct UnitInfo {
    /// The unit's identifier.
    pub id: UnitId,

    /// The test file.
    pub file: Utf8PathBuf,
}

/// Which attempt of a unit this is.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct AttemptData {
    /// The 1-indexed attempt number.
    pub attempt: u32,

    /// The total number of attempts the unit may be given.
    pub total_attempts: u32,
}

impl AttemptData {
    /// Returns true if this is the last attempt the unit may be given.
    pub fn is_last_attempt(&self) -> bool {
        self.attempt >= self.total_attempts
    }
}

/// The state of a unit within the scheduler.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum UnitState {
    /// Waiting for a free slot.
    Pending,

    /// Currently running.
    Running,

    /// Finished cleanly.
    Succeeded,

    /// Failed, and will be run again.
    FailedRetryable,

    /// Failed with no retries left.
    FailedTerminal,
}

impl UnitState {
    /// Returns true if the unit will not be run again.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::FailedTerminal)
    }
}

/// A lifecycle event recorded by a unit, stamped with its arrival time.
#[derive(Clone, Debug, PartialEq)]
pub struct RecordedEvent {
    /// Time elapsed since the attempt started when the event arrived.
    pub elapsed: Duration,

    /// The event.
    pub kind: RecordedEventKind,
}

/// A protocol line that could not be parsed.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MalformedLine {
    /// The line, without the trailing newline.
    pub line: String,

    /// Why it could not be parsed.
    pub error: String,
}

/// The result of running a single attempt of a unit.
#[derive(Clone, Debug)]
pub struct ExecutionResult {
    /// The unit that ran.
    pub unit: UnitInfo,

    /// Which attempt this was.
    pub attempt: AttemptData,

    /// The worker's exit code, or `None` if it was terminated by a signal.
    pub exit_code: Option<i32>,

    /// When the attempt started.
    pub start_time: DateTime<FixedOffset>,

    /// How long the worker process ran.
    pub time_taken: Duration,

    /// Recorded lifecycle events, in the order they arrived.
    pub events: Vec<RecordedEvent>,

    /// The serialized artifact bundle, present if the worker finished its run cleanly.
    pub bundle: Option<String>,

    /// Worker standard output, excluding protocol lines.
    pub stdout: String,

    /// Worker standard error.
    pub stderr: String,

    /// Protocol lines that could not be parsed.
    pub malformed_lines: Vec<MalformedLine>,

    /// True if the worker's output was still open when the leak timeout expired after it
    /// exited. Output written after that point is lost.
    pub leaked: bool,
}

impl ExecutionResult {
    /// Returns true if the worker reported the end of its run.
    pub fn saw_run_end(&self) -> bool {
        self.events
            .iter()
            .any(|event| matches!(event.kind, RecordedEventKind::RunEnd))
    }

    /// Returns the number of test and hook failures recorded.
    pub fn test_failures(&self) -> usize {
        self.events
            .iter()
            .filter(|event| matches!(event.kind, RecordedEventKind::TestFail { .. }))
            .count()
    }

    /// Returns the time between the first and the last recorded event.
    pub fn exec_time(&self) -> Duration {
        match (self.events.first(), self.events.last()) {
            (Some(first), Some(last)) => last.elapsed.saturating_sub(first.elapsed),
            _ => Duration::ZERO,
        }
    }

    /// Classifies this attempt.
    ///
    /// A crash takes precedence over malformed output, since a worker that dies mid-write
    /// usually leaves a truncated protocol line behind.
    pub fn outcome(&self) -> AttemptOutcome {
        let saw_run_end = self.saw_run_end();
        if !saw_run_end && self.exit_code != Some(0) {
            return AttemptOutcome::Fatal(FatalUnitErrorKind::Crashed {
                exit_code: self.exit_code,
            });
        }

        if let Some(first) = self.malformed_lines.first() {
            return AttemptOutcome::Fatal(FatalUnitErrorKind::MalformedOutput {
                first_line: first.line.clone(),
                count: self.malformed_lines.len(),
            });
        }

        if !saw_run_end {
            return AttemptOutcome::Fatal(FatalUnitErrorKind::NoRunEnd);
        }

        let test_failures = self.test_failures();
        if self.exit_code == Some(0) && test_failures == 0 {
            AttemptOutcome::Passed
        } else {
            AttemptOutcome::Failed { test_failures }
        }
    }
}

/// The classification of a single attempt.
#[derive(Clone, Debug)]
pub enum AttemptOutcome {
    /// The unit exited 0, reported the end of its run, and recorded no failures.
    Passed,

    /// The unit ran to completion but failed.
    Failed {
        /// The number of test and hook failures recorded. May be 0 if the worker exited with a
        /// nonzero code after a clean run.
        test_failures: usize,
    },

    /// The unit could not be run to completion. This halts the whole run.
    Fatal(FatalUnitErrorKind),
}

impl AttemptOutcome {
    /// Returns true if the attempt failed but ran to completion.
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

/// Collects worker output line by line into the parts of an [`ExecutionResult`].
#[derive(Debug, Default)]
pub(crate) struct LineAccumulator {
    pub(crate) events: Vec<RecordedEvent>,
    pub(crate) bundle: Option<String>,
    pub(crate) stdout: String,
    pub(crate) malformed_lines: Vec<MalformedLine>,
}

impl LineAccumulator {
    pub(crate) fn push_line(&mut self, line: &str, elapsed: Duration) {
        match partest_metadata::parse_line(line) {
            None => {
                self.stdout.push_str(line);
                self.stdout.push('\n');
            }
            Some(Ok(WorkerMessage::Event { event })) => {
                self.events.push(RecordedEvent {
                    elapsed,
                    kind: event,
                });
            }
            Some(Ok(WorkerMessage::Artifacts { bundle })) => {
                if self.bundle.replace(bundle).is_some() {
                    warn!("worker sent more than one artifact bundle, keeping the last one");
                }
            }
            Some(Err(error)) => {
                self.malformed_lines.push(MalformedLine {
                    line: line.to_owned(),
                    error: error.to_string(),
                });
            }
        }
    }
}
