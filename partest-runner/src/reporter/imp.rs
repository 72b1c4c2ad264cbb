// Copyright (c) The partest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Prints out aggregated test results.
//!
//! The main structure in this module is [`Reporter`].

use super::{displayer::SpecReporter, events::ReporterEvent, json::JsonReporter};
use crate::errors::WriteEventError;
use serde::Deserialize;
use std::{
    fmt,
    io::{self, BufWriter, Write},
    time::Duration,
};

/// The kind of reporter to use.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub enum ReporterKind {
    /// A hierarchical, human-readable view of suites and tests.
    #[default]
    Spec,

    /// A single JSON document written at the end of the run.
    Json,
}

impl fmt::Display for ReporterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Spec => write!(f, "spec"),
            Self::Json => write!(f, "json"),
        }
    }
}

/// Where the reporter writes to.
///
/// This is usually standard output, but can be an in-memory buffer for tests.
pub enum ReporterOutput<'a> {
    /// Write to standard output.
    Stdout,

    /// Write to a buffer.
    Buffer(&'a mut Vec<u8>),
}

/// Reporter builder.
#[derive(Debug, Default)]
pub struct ReporterBuilder {
    kind: ReporterKind,
    should_colorize: bool,
    slow_threshold: Option<Duration>,
}

impl ReporterBuilder {
    /// Sets the kind of reporter.
    pub fn set_kind(&mut self, kind: ReporterKind) -> &mut Self {
        self.kind = kind;
        self
    }

    /// Set to true if the reporter should colorize output.
    pub fn set_colorize(&mut self, should_colorize: bool) -> &mut Self {
        self.should_colorize = should_colorize;
        self
    }

    /// Sets the duration after which a test is considered slow.
    pub fn set_slow_threshold(&mut self, slow_threshold: Duration) -> &mut Self {
        self.slow_threshold = Some(slow_threshold);
        self
    }

    /// Creates a new reporter.
    pub fn build<'a>(&self, output: ReporterOutput<'a>) -> Reporter<'a> {
        let inner = match self.kind {
            ReporterKind::Spec => {
                let slow_threshold = self.slow_threshold.unwrap_or(Duration::from_millis(75));
                ReporterImpl::Spec(SpecReporter::new(slow_threshold, self.should_colorize))
            }
            ReporterKind::Json => ReporterImpl::Json(JsonReporter::default()),
        };
        Reporter { inner, output }
    }
}

/// Writes aggregated events in the chosen format.
pub struct Reporter<'a> {
    inner: ReporterImpl,
    output: ReporterOutput<'a>,
}

impl Reporter<'_> {
    /// Reports an event.
    pub fn report_event(&mut self, event: ReporterEvent<'_>) -> Result<(), WriteEventError> {
        match &mut self.output {
            ReporterOutput::Stdout => {
                let mut writer = BufWriter::new(io::stdout().lock());
                self.inner.write_event(&event, &mut writer)?;
                writer.flush().map_err(WriteEventError::Io)
            }
            ReporterOutput::Buffer(buf) => self.inner.write_event(&event, *buf),
        }
    }
}

impl fmt::Debug for Reporter<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reporter").finish_non_exhaustive()
    }
}

enum ReporterImpl {
    Spec(SpecReporter),
    Json(JsonReporter),
}

impl ReporterImpl {
    fn write_event(
        &mut self,
        event: &ReporterEvent<'_>,
        writer: &mut dyn Write,
    ) -> Result<(), WriteEventError> {
        match self {
            Self::Spec(reporter) => reporter.write_event(event, writer),
            Self::Json(reporter) => reporter.write_event(event, writer),
        }
    }
}
