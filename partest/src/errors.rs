// Copyright (c) The partest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::output::{NO_HEADING_TARGET, StderrStyles};
use camino::FromPathBufError;
use owo_colors::OwoColorize;
use partest_metadata::PartestExitCode;
use partest_runner::errors::*;
use std::error::Error;
use thiserror::Error;
use tracing::error;

pub(crate) type Result<T, E = ExpectedError> = std::result::Result<T, E>;

// The #[error()] strings are placeholders. Errors are expected to be printed with
// display_to_stderr, which colorizes them.

/// An error that partest reports to the user and maps to an exit code.
#[derive(Debug, Error)]
#[doc(hidden)]
pub enum ExpectedError {
    #[error("could not determine current directory")]
    GetCurrentDirFailed {
        #[source]
        err: std::io::Error,
    },
    #[error("current directory is not valid UTF-8")]
    CurrentDirInvalidUtf8 {
        #[source]
        err: FromPathBufError,
    },
    #[error("config parse error")]
    ConfigParseError {
        #[from]
        err: ConfigParseError,
    },
    #[error("profile not found")]
    ProfileNotFound {
        #[from]
        err: ProfileNotFound,
    },
    #[error("no test files specified")]
    NoUnits,
    #[error("scheduler build error")]
    SchedulerBuildError {
        #[from]
        err: SchedulerBuildError,
    },
    #[error("unit failed fatally")]
    FatalUnit {
        #[source]
        err: FatalUnitError,
    },
    #[error("result aggregation failed")]
    AggregateFailed {
        #[source]
        err: AggregateError<WriteEventError>,
    },
    #[error("error writing output")]
    WriteEventError {
        #[source]
        err: WriteEventError,
    },
}

impl ExpectedError {
    pub(crate) fn from_scheduler_error(
        error: SchedulerError<AggregateError<WriteEventError>>,
    ) -> Self {
        match error {
            SchedulerError::Fatal(err) => Self::FatalUnit { err },
            SchedulerError::Callback(AggregateError::Callback(err)) => {
                Self::WriteEventError { err }
            }
            SchedulerError::Callback(err) => Self::AggregateFailed { err },
        }
    }

    /// Returns the exit code for the process.
    pub fn process_exit_code(&self) -> i32 {
        match self {
            Self::GetCurrentDirFailed { .. }
            | Self::CurrentDirInvalidUtf8 { .. }
            | Self::ConfigParseError { .. }
            | Self::ProfileNotFound { .. }
            | Self::SchedulerBuildError { .. } => PartestExitCode::SETUP_ERROR,
            Self::NoUnits => PartestExitCode::NO_UNITS,
            Self::FatalUnit { err } => err.exit_code(),
            Self::AggregateFailed { err } => err
                .exit_code()
                .unwrap_or(PartestExitCode::WRITE_OUTPUT_ERROR),
            Self::WriteEventError { .. } => PartestExitCode::WRITE_OUTPUT_ERROR,
        }
    }

    /// Displays this error to stderr.
    pub fn display_to_stderr(&self, styles: &StderrStyles) {
        let mut next_error = match &self {
            Self::GetCurrentDirFailed { err } => {
                error!("could not determine current directory");
                Some(err as &dyn Error)
            }
            Self::CurrentDirInvalidUtf8 { err } => {
                error!("current directory is not valid UTF-8");
                Some(err as &dyn Error)
            }
            Self::ConfigParseError { err } => {
                error!(
                    "failed to parse partest config at `{}`",
                    err.config_file().style(styles.bold)
                );
                Some(err.kind() as &dyn Error)
            }
            Self::ProfileNotFound { err } => {
                error!("{err}");
                None
            }
            Self::NoUnits => {
                error!("no test files specified");
                None
            }
            Self::SchedulerBuildError { err } => {
                error!("failed to build scheduler");
                Some(err as &dyn Error)
            }
            Self::FatalUnit { err } => {
                error!(
                    "unit `{}` failed on attempt {}, halting run",
                    err.file().style(styles.bold),
                    err.attempt(),
                );
                Some(err.kind() as &dyn Error)
            }
            Self::AggregateFailed { err } => match err {
                AggregateError::UnitCrashed { .. } => {
                    error!("{err}, halting run");
                    None
                }
                AggregateError::Bundle(bundle_error) => {
                    error!(
                        "failed to merge results for `{}`, halting run",
                        bundle_error.file().style(styles.bold)
                    );
                    Some(bundle_error.kind() as &dyn Error)
                }
                AggregateError::Callback(write_error) => {
                    error!("error writing output");
                    Some(write_error as &dyn Error)
                }
            },
            Self::WriteEventError { err } => {
                error!("error writing output");
                Some(err as &dyn Error)
            }
        };

        while let Some(err) = next_error {
            error!(
                target: NO_HEADING_TARGET,
                "\n{}:\n  {}",
                "Caused by".style(styles.warning_text),
                err
            );
            next_error = err.source();
        }
    }
}
