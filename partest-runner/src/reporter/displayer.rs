// Copyright (c) The partest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The human-readable `spec` reporter.

use super::events::{NodeInfo, ReporterEvent, ReporterEventKind, RetryKind};
use crate::{
    aggregator::RunStats,
    errors::WriteEventError,
    helpers::{format_duration, plural},
};
use owo_colors::{OwoColorize, Style};
use partest_metadata::{NodeKind, TestError};
use std::{io::Write, time::Duration};
use swrite::{SWrite, swrite};

/// Prints suites and tests as they are replayed, then a summary with every failure.
#[derive(Debug)]
pub(super) struct SpecReporter {
    styles: Styles,
    slow_threshold: Duration,
    failures: Vec<FailureEntry>,
}

#[derive(Debug)]
struct FailureEntry {
    full_title: String,
    kind: NodeKind,
    error: TestError,
}

impl SpecReporter {
    pub(super) fn new(slow_threshold: Duration, should_colorize: bool) -> Self {
        let mut styles = Styles::default();
        if should_colorize {
            styles.colorize();
        }
        Self {
            styles,
            slow_threshold,
            failures: Vec::new(),
        }
    }

    pub(super) fn write_event(
        &mut self,
        event: &ReporterEvent<'_>,
        writer: &mut dyn Write,
    ) -> Result<(), WriteEventError> {
        self.write_event_impl(event, writer)
            .map_err(WriteEventError::Io)
    }

    fn write_event_impl(
        &mut self,
        event: &ReporterEvent<'_>,
        writer: &mut dyn Write,
    ) -> std::io::Result<()> {
        match &event.kind {
            ReporterEventKind::Start { .. } => {
                writeln!(writer)?;
            }
            ReporterEventKind::Suite { suite } => {
                if suite.title.is_empty() {
                    return Ok(());
                }
                if suite.depth == 1 {
                    writeln!(writer)?;
                }
                writeln!(writer, "{}{}", indent(suite.depth), suite.title)?;
            }
            ReporterEventKind::SuiteEnd { .. } | ReporterEventKind::Test { .. } => {}
            ReporterEventKind::Pass { test } => {
                write!(
                    writer,
                    "{}{} {}",
                    indent(test.depth + 1),
                    "✔".style(self.styles.pass),
                    test.title.style(self.styles.light),
                )?;
                self.write_speed(test, writer)?;
                writeln!(writer)?;
            }
            ReporterEventKind::Fail { test, error } => {
                self.failures.push(FailureEntry {
                    full_title: test.full_title.clone(),
                    kind: test.kind,
                    error: (*error).clone(),
                });
                writeln!(
                    writer,
                    "{}{}",
                    indent(test.depth + 1),
                    format!("{}) {}", self.failures.len(), test.title).style(self.styles.fail),
                )?;
            }
            ReporterEventKind::Pending { test } => {
                writeln!(
                    writer,
                    "{}{}",
                    indent(test.depth + 1),
                    format!("- {}", test.title).style(self.styles.pending),
                )?;
            }
            // Tests retried within a unit are only reported once they pass or fail for good.
            ReporterEventKind::Retry(RetryKind::Test { .. }) => {}
            ReporterEventKind::Retry(RetryKind::Unit {
                unit,
                attempt,
                exit_code,
                test_failures,
                ..
            }) => {
                let mut msg = format!(
                    "{} failed (attempt {}/{})",
                    unit.file, attempt.attempt, attempt.total_attempts
                );
                if *test_failures > 0 {
                    swrite!(
                        msg,
                        " with {test_failures} {}",
                        plural::failures_str(*test_failures)
                    );
                } else if let Some(code) = exit_code {
                    swrite!(msg, " with exit code {code}");
                }
                swrite!(msg, ", retrying");
                writeln!(writer, "  {}", msg.style(self.styles.retry))?;
            }
            ReporterEventKind::End { stats, .. } => {
                self.write_epilogue(stats, writer)?;
            }
        }
        Ok(())
    }

    fn write_speed(&self, test: &NodeInfo<'_>, writer: &mut dyn Write) -> std::io::Result<()> {
        let Some(duration_ms) = test.duration_ms else {
            return Ok(());
        };
        let duration = Duration::from_millis(duration_ms);
        let style = if duration > self.slow_threshold {
            self.styles.slow
        } else if duration > self.slow_threshold / 2 {
            self.styles.medium
        } else {
            return Ok(());
        };
        write!(
            writer,
            " {}",
            format!("({})", format_duration(duration)).style(style)
        )
    }

    fn write_epilogue(&self, stats: &RunStats, writer: &mut dyn Write) -> std::io::Result<()> {
        writeln!(writer)?;
        writeln!(
            writer,
            "  {} {}",
            format!("{} passing", stats.passes).style(self.styles.pass),
            format!("({})", format_duration(stats.duration.unwrap_or_default()))
                .style(self.styles.light),
        )?;
        if stats.pending > 0 {
            writeln!(
                writer,
                "  {}",
                format!("{} pending", stats.pending).style(self.styles.pending)
            )?;
        }
        if stats.failures > 0 {
            writeln!(
                writer,
                "  {}",
                format!("{} failing", stats.failures).style(self.styles.fail)
            )?;
        }
        if stats.units_failed_without_failures > 0 {
            let count = stats.units_failed_without_failures;
            writeln!(
                writer,
                "  {}",
                format!(
                    "{count} {} exited with a nonzero code",
                    plural::files_str(count)
                )
                .style(self.styles.fail)
            )?;
        }
        writeln!(writer)?;

        for (index, failure) in self.failures.iter().enumerate() {
            let mut header = format!("  {}) {}", index + 1, failure.full_title);
            if failure.kind == NodeKind::Hook {
                swrite!(header, " (hook)");
            }
            writeln!(writer, "{header}:")?;
            writeln!(
                writer,
                "     {}",
                failure.error.message.style(self.styles.fail)
            )?;
            if let Some(stack) = &failure.error.stack {
                for line in stack.lines() {
                    writeln!(writer, "      {}", line.style(self.styles.light))?;
                }
            }
            writeln!(writer)?;
        }
        Ok(())
    }
}

fn indent(depth: usize) -> String {
    "  ".repeat(depth)
}

#[derive(Debug, Default)]
struct Styles {
    pass: Style,
    fail: Style,
    pending: Style,
    retry: Style,
    light: Style,
    medium: Style,
    slow: Style,
}

impl Styles {
    fn colorize(&mut self) {
        self.pass = Style::new().green();
        self.fail = Style::new().red();
        self.pending = Style::new().cyan();
        self.retry = Style::new().magenta();
        self.light = Style::new().dimmed();
        self.medium = Style::new().yellow();
        self.slow = Style::new().red().bold();
    }
}
