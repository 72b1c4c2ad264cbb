// Copyright (c) The partest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Errors produced by partest.

use camino::{Utf8Path, Utf8PathBuf};
use config::ConfigError;
use partest_metadata::{NodeId, NodeKind, PartestExitCode};
use std::{fmt, sync::Arc};
use thiserror::Error;

/// An error that occurred while parsing the config.
#[derive(Debug, Error)]
#[error("failed to parse partest config at `{config_file}`")]
pub struct ConfigParseError {
    config_file: Utf8PathBuf,
    #[source]
    kind: ConfigParseErrorKind,
}

impl ConfigParseError {
    pub(crate) fn new(config_file: impl Into<Utf8PathBuf>, kind: ConfigParseErrorKind) -> Self {
        Self {
            config_file: config_file.into(),
            kind,
        }
    }

    /// Returns the config file for this error.
    pub fn config_file(&self) -> &Utf8Path {
        &self.config_file
    }

    /// Returns the kind of error this is.
    pub fn kind(&self) -> &ConfigParseErrorKind {
        &self.kind
    }
}

/// The kind of error that occurred while parsing a config.
///
/// Returned by [`ConfigParseError::kind`].
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigParseErrorKind {
    /// An error occurred while building the config.
    #[error(transparent)]
    BuildError(Box<ConfigError>),

    /// An error occurred while deserializing the config.
    #[error(transparent)]
    DeserializeError(Box<serde_path_to_error::Error<ConfigError>>),
}

/// An error which indicates that a profile was requested but not known to partest.
#[derive(Clone, Debug, Error)]
#[error("profile `{profile}` not found (known profiles: {})", .all_profiles.join(", "))]
pub struct ProfileNotFound {
    profile: String,
    all_profiles: Vec<String>,
}

impl ProfileNotFound {
    pub(crate) fn new(
        profile: impl Into<String>,
        all_profiles: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        let mut all_profiles: Vec<_> = all_profiles.into_iter().map(|s| s.into()).collect();
        all_profiles.sort_unstable();
        Self {
            profile: profile.into(),
            all_profiles,
        }
    }

    /// Returns the profile that wasn't found.
    pub fn profile(&self) -> &str {
        &self.profile
    }
}

/// An error that occurs while parsing a [`MaxParallel`](crate::config::MaxParallel) value from a
/// string.
#[derive(Clone, Debug, Error)]
#[error("unrecognized value for max-parallel: {input}\n(hint: {hint})")]
pub struct MaxParallelParseError {
    input: String,
    hint: &'static str,
}

impl MaxParallelParseError {
    pub(crate) fn new(input: impl Into<String>, hint: &'static str) -> Self {
        Self {
            input: input.into(),
            hint,
        }
    }
}

/// An error that occurs while building the unit scheduler.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SchedulerBuildError {
    /// An error occurred while creating the Tokio runtime.
    #[error("error creating Tokio runtime")]
    TokioRuntimeCreate(#[source] std::io::Error),
}

/// An error that occurs while running a single attempt of a unit.
#[derive(Clone, Debug, Error)]
#[non_exhaustive]
pub enum UnitExecuteError {
    /// The worker process could not be started.
    #[error("failed to start worker `{program}`")]
    Spawn {
        /// The worker program.
        program: String,

        /// The underlying error.
        #[source]
        error: Arc<std::io::Error>,
    },

    /// Reading the worker's output failed.
    #[error("failed to read worker output")]
    ReadOutput(#[source] Arc<std::io::Error>),

    /// Waiting for the worker to exit failed.
    #[error("failed to wait for worker to exit")]
    Wait(#[source] Arc<std::io::Error>),
}

/// An error that occurs while decoding a unit's artifact bundle.
#[derive(Debug, Error)]
#[error("failed to decode artifact bundle for `{file}`")]
pub struct BundleDecodeError {
    file: Utf8PathBuf,
    #[source]
    kind: BundleDecodeErrorKind,
}

impl BundleDecodeError {
    pub(crate) fn new(file: impl Into<Utf8PathBuf>, kind: BundleDecodeErrorKind) -> Self {
        Self {
            file: file.into(),
            kind,
        }
    }

    /// Returns the unit file the bundle came from.
    pub fn file(&self) -> &Utf8Path {
        &self.file
    }

    /// Returns the kind of error this is.
    pub fn kind(&self) -> &BundleDecodeErrorKind {
        &self.kind
    }
}

/// The kind of error that occurred while decoding an artifact bundle.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum BundleDecodeErrorKind {
    /// The bundle is not valid JSON, or does not match the expected shape.
    #[error("invalid JSON")]
    Json(#[source] serde_json::Error),

    /// The suite graph in the bundle is inconsistent.
    #[error("invalid suite graph")]
    Graph(#[source] GraphDecodeError),
}

/// A structural problem with a serialized suite graph.
#[derive(Clone, Debug, Eq, Error, PartialEq)]
#[non_exhaustive]
pub enum GraphDecodeError {
    /// Two nodes share the same id.
    #[error("duplicate node id {id}")]
    DuplicateId {
        /// The duplicated id.
        id: NodeId,
    },

    /// A link refers to a node that does not exist.
    #[error("node {from} refers to missing node {to}")]
    DanglingRef {
        /// The node holding the link.
        from: NodeId,

        /// The missing node.
        to: NodeId,
    },

    /// A child link refers to a node of the wrong kind.
    #[error("node {parent} lists {child} as a child {expected:?}, but it is not one")]
    KindMismatch {
        /// The suite holding the link.
        parent: NodeId,

        /// The child node.
        child: NodeId,

        /// The kind the link expected.
        expected: NodeKind,
    },

    /// A child's parent link does not point back at the suite listing it.
    #[error("node {child} is listed under {expected}, but its parent is {}", DisplayParent(*.found))]
    ParentMismatch {
        /// The child node.
        child: NodeId,

        /// The suite that lists the child.
        expected: NodeId,

        /// The parent the child points at.
        found: Option<NodeId>,
    },

    /// A node is reachable more than once, through shared or cyclic child links.
    #[error("node {id} is reachable more than once")]
    SharedNode {
        /// The node reached twice.
        id: NodeId,
    },

    /// A node is not reachable from the root.
    #[error("node {id} is not reachable from the root suite")]
    Unreachable {
        /// The unreachable node.
        id: NodeId,
    },

    /// The root is not a suite.
    #[error("root node {id} is not a suite")]
    RootNotSuite {
        /// The root id.
        id: NodeId,
    },

    /// The root has a parent.
    #[error("root node {id} has a parent")]
    RootHasParent {
        /// The root id.
        id: NodeId,
    },
}

struct DisplayParent(Option<NodeId>);

impl fmt::Display for DisplayParent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(id) => write!(f, "{id}"),
            None => write!(f, "missing"),
        }
    }
}

/// An error that aborts the whole run because a unit could not be run to completion.
#[derive(Clone, Debug)]
pub struct FatalUnitError {
    file: Utf8PathBuf,
    attempt: u32,
    kind: FatalUnitErrorKind,
}

impl fmt::Display for FatalUnitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unit `{}` (attempt {}) {}", self.file, self.attempt, self.kind)
    }
}

// The kind is part of the message, so the chain continues from the kind's own source.
impl std::error::Error for FatalUnitError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match &self.kind {
            FatalUnitErrorKind::Execute(error) => Some(error),
            _ => None,
        }
    }
}

impl FatalUnitError {
    pub(crate) fn new(file: impl Into<Utf8PathBuf>, attempt: u32, kind: FatalUnitErrorKind) -> Self {
        Self {
            file: file.into(),
            attempt,
            kind,
        }
    }

    /// Returns the unit file.
    pub fn file(&self) -> &Utf8Path {
        &self.file
    }

    /// Returns the 1-indexed attempt that failed.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Returns the kind of error this is.
    pub fn kind(&self) -> &FatalUnitErrorKind {
        &self.kind
    }

    /// Returns the exit code partest should exit with.
    ///
    /// This is the worker's own exit code if it crashed with one, otherwise a documented
    /// [`PartestExitCode`].
    pub fn exit_code(&self) -> i32 {
        match &self.kind {
            FatalUnitErrorKind::Crashed {
                exit_code: Some(code),
            } if *code != 0 => *code,
            FatalUnitErrorKind::Crashed { .. }
            | FatalUnitErrorKind::NoRunEnd
            | FatalUnitErrorKind::MalformedOutput { .. } => PartestExitCode::UNIT_PROTOCOL_ERROR,
            FatalUnitErrorKind::Execute(UnitExecuteError::Spawn { .. }) => {
                PartestExitCode::UNIT_START_FAILED
            }
            FatalUnitErrorKind::Execute(_) => PartestExitCode::UNIT_PROTOCOL_ERROR,
        }
    }
}

/// The kind of fatal unit error.
#[derive(Clone, Debug, Error)]
#[non_exhaustive]
pub enum FatalUnitErrorKind {
    /// The worker exited without reporting the end of its run.
    #[error("crashed{}", DisplayExitCode(*.exit_code))]
    Crashed {
        /// The exit code, or `None` if the worker was terminated by a signal.
        exit_code: Option<i32>,
    },

    /// The worker exited successfully but never reported the end of its run.
    #[error("exited successfully without reporting the end of its run")]
    NoRunEnd,

    /// The worker wrote protocol lines that could not be parsed.
    #[error("wrote {count} malformed protocol line(s), first: `{first_line}`")]
    MalformedOutput {
        /// The first malformed line.
        first_line: String,

        /// The number of malformed lines.
        count: usize,
    },

    /// The worker could not be run.
    #[error("could not be run")]
    Execute(UnitExecuteError),
}

struct DisplayExitCode(Option<i32>);

impl fmt::Display for DisplayExitCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(code) => write!(f, " with exit code {code}"),
            None => write!(f, " (terminated by signal)"),
        }
    }
}

/// An error returned by [`UnitScheduler::try_execute`](crate::runner::UnitScheduler::try_execute).
#[derive(Debug, Error)]
pub enum SchedulerError<E> {
    /// A unit crashed or could not be run, and the run was halted.
    #[error("run halted")]
    Fatal(#[source] FatalUnitError),

    /// The callback returned an error, and the run was halted.
    #[error("error from callback")]
    Callback(#[source] E),
}

/// An error returned while aggregating results.
#[derive(Debug, Error)]
pub enum AggregateError<E> {
    /// A unit's artifact bundle could not be decoded.
    #[error("failed to merge unit results")]
    Bundle(#[source] BundleDecodeError),

    /// A unit exited with a nonzero code without reporting the end of its run.
    #[error("unit `{file}` crashed{}", DisplayExitCode(*.exit_code))]
    UnitCrashed {
        /// The unit file.
        file: Utf8PathBuf,

        /// The exit code.
        exit_code: Option<i32>,
    },

    /// The reporter callback returned an error.
    #[error("error from reporter")]
    Callback(#[source] E),
}

impl<E> AggregateError<E> {
    /// Returns the exit code partest should exit with, or `None` for callback errors.
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            Self::Bundle(_) => Some(PartestExitCode::UNIT_PROTOCOL_ERROR),
            Self::UnitCrashed {
                exit_code: Some(code),
                ..
            } if *code != 0 => Some(*code),
            Self::UnitCrashed { .. } => Some(PartestExitCode::UNIT_PROTOCOL_ERROR),
            Self::Callback(_) => None,
        }
    }
}

/// An error that occurs while writing an event.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum WriteEventError {
    /// An error occurred while writing the event to the provided output.
    #[error("error writing to output")]
    Io(#[source] std::io::Error),

    /// An error occurred while serializing the JSON report.
    #[error("error serializing JSON report")]
    Json(#[source] serde_json::Error),
}
