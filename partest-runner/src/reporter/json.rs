// Copyright (c) The partest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The `json` reporter, which writes a single document once the run ends.

use super::events::{NodeInfo, ReporterEvent, ReporterEventKind};
use crate::{aggregator::RunStats, errors::WriteEventError};
use chrono::{DateTime, FixedOffset};
use partest_metadata::{NodeKind, TestError};
use serde::Serialize;
use std::io::Write;

#[derive(Debug, Default)]
pub(super) struct JsonReporter {
    tests: Vec<JsonTest>,
    passes: Vec<JsonTest>,
    failures: Vec<JsonTest>,
    pending: Vec<JsonTest>,
}

impl JsonReporter {
    pub(super) fn write_event(
        &mut self,
        event: &ReporterEvent<'_>,
        writer: &mut dyn Write,
    ) -> Result<(), WriteEventError> {
        match &event.kind {
            ReporterEventKind::Pass { test } => {
                let test = JsonTest::new(test, None);
                self.tests.push(test.clone());
                self.passes.push(test);
            }
            ReporterEventKind::Fail { test, error } => {
                let is_test = test.kind == NodeKind::Test;
                let test = JsonTest::new(test, Some(*error));
                if is_test {
                    self.tests.push(test.clone());
                }
                self.failures.push(test);
            }
            ReporterEventKind::Pending { test } => {
                let test = JsonTest::new(test, None);
                self.tests.push(test.clone());
                self.pending.push(test);
            }
            ReporterEventKind::End { stats, .. } => {
                let report = JsonReport {
                    stats: JsonStats::new(stats),
                    tests: &self.tests,
                    pending: &self.pending,
                    failures: &self.failures,
                    passes: &self.passes,
                };
                serde_json::to_writer_pretty(&mut *writer, &report)
                    .map_err(WriteEventError::Json)?;
                writeln!(writer).map_err(WriteEventError::Io)?;
            }
            ReporterEventKind::Start { .. }
            | ReporterEventKind::Suite { .. }
            | ReporterEventKind::SuiteEnd { .. }
            | ReporterEventKind::Test { .. }
            | ReporterEventKind::Retry(_) => {}
        }
        Ok(())
    }
}

#[derive(Serialize)]
struct JsonReport<'a> {
    stats: JsonStats,
    tests: &'a [JsonTest],
    pending: &'a [JsonTest],
    failures: &'a [JsonTest],
    passes: &'a [JsonTest],
}

#[derive(Serialize)]
struct JsonStats {
    suites: usize,
    tests: usize,
    passes: usize,
    pending: usize,
    failures: usize,
    start: Option<DateTime<FixedOffset>>,
    end: Option<DateTime<FixedOffset>>,
    duration: Option<u64>,
}

impl JsonStats {
    fn new(stats: &RunStats) -> Self {
        Self {
            suites: stats.suites,
            tests: stats.tests,
            passes: stats.passes,
            pending: stats.pending,
            failures: stats.failures,
            start: stats.start,
            end: stats.end,
            duration: stats.duration.map(|d| d.as_millis() as u64),
        }
    }
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct JsonTest {
    title: String,
    full_title: String,
    file: Option<String>,
    duration: Option<u64>,
    err: JsonError,
}

impl JsonTest {
    fn new(node: &NodeInfo<'_>, error: Option<&TestError>) -> Self {
        Self {
            title: node.title.to_owned(),
            full_title: node.full_title.clone(),
            file: node.file.map(str::to_owned),
            duration: node.duration_ms,
            err: JsonError {
                message: error.map(|e| e.message.clone()),
                stack: error.and_then(|e| e.stack.clone()),
            },
        }
    }
}

/// Serializes as `{}` for tests that did not fail.
#[derive(Clone, Debug, Serialize)]
struct JsonError {
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stack: Option<String>,
}
