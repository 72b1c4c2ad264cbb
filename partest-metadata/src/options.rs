// Copyright (c) The partest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::WorkerEnvError;
use serde::{Deserialize, Serialize};
use std::env;

/// Options passed identically to every worker in a run.
///
/// This is a flat, serializable snapshot computed once before any unit is scheduled. Workers
/// receive it as JSON through the [`WorkerEnv::THREAD_OPTIONS`] environment variable.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ThreadOptions {
    /// Per-test timeout in milliseconds. `None` disables timeouts.
    #[serde(default)]
    pub timeout_ms: Option<u64>,

    /// Tests that take longer than this many milliseconds are reported as slow.
    #[serde(default)]
    pub slow_ms: Option<u64>,

    /// Only run tests whose full title matches this pattern.
    #[serde(default)]
    pub grep: Option<String>,

    /// Wait for the worker to signal readiness before starting the root suite.
    #[serde(default)]
    pub delay: bool,

    /// Force the worker to exit as soon as its run ends.
    #[serde(default)]
    pub exit_immediately: bool,

    /// Modules to load before the test file, in order.
    #[serde(default)]
    pub requires: Vec<String>,

    /// Compiler hooks to register before the test file, in order.
    #[serde(default)]
    pub compilers: Vec<String>,

    /// Options applied to the worker's root suite.
    #[serde(default)]
    pub suite_options: SuiteOptions,
}

impl ThreadOptions {
    /// Serializes these options into the string form used in the environment.
    pub fn to_env_value(&self) -> String {
        serde_json::to_string(self).expect("thread options are always serializable")
    }

    /// Parses options from the string form used in the environment.
    pub fn from_env_value(value: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(value)
    }
}

/// Options that a worker applies to its root suite.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SuiteOptions {
    /// Abort the unit after the first test failure.
    #[serde(default)]
    pub bail: bool,

    /// Fail if a test or suite is marked exclusive.
    #[serde(default)]
    pub forbid_only: bool,

    /// Fail if a test or suite is pending.
    #[serde(default)]
    pub forbid_pending: bool,

    /// Report full stack traces instead of trimmed ones.
    #[serde(default)]
    pub full_stack_trace: bool,

    /// Require every test to be asynchronous.
    #[serde(default)]
    pub async_only: bool,

    /// Check for global variable leaks.
    #[serde(default)]
    pub check_leaks: bool,
}

/// The environment a worker is started with.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct WorkerEnv {
    /// The unique identifier for this run.
    pub run_id: String,

    /// The test file this worker must run.
    pub unit_file: String,

    /// The 1-indexed attempt number.
    pub attempt: u32,

    /// The total number of attempts this unit may be given.
    pub total_attempts: u32,

    /// Options shared by all workers in this run.
    pub options: ThreadOptions,
}

impl WorkerEnv {
    /// Always set to `1` for worker processes.
    pub const PARTEST: &'static str = "PARTEST";

    /// The run identifier.
    pub const RUN_ID: &'static str = "PARTEST_RUN_ID";

    /// The test file to run.
    pub const UNIT_FILE: &'static str = "PARTEST_UNIT_FILE";

    /// The 1-indexed attempt number.
    pub const ATTEMPT: &'static str = "PARTEST_ATTEMPT";

    /// The total number of attempts.
    pub const TOTAL_ATTEMPTS: &'static str = "PARTEST_TOTAL_ATTEMPTS";

    /// [`ThreadOptions`] as JSON.
    pub const THREAD_OPTIONS: &'static str = "PARTEST_THREAD_OPTIONS";

    /// Reads the worker environment from the current process.
    pub fn from_env() -> Result<Self, WorkerEnvError> {
        let options = read_var(Self::THREAD_OPTIONS)?;
        Ok(Self {
            run_id: read_var(Self::RUN_ID)?,
            unit_file: read_var(Self::UNIT_FILE)?,
            attempt: read_u32(Self::ATTEMPT)?,
            total_attempts: read_u32(Self::TOTAL_ATTEMPTS)?,
            options: ThreadOptions::from_env_value(&options)
                .map_err(WorkerEnvError::ThreadOptions)?,
        })
    }

    /// Returns the environment variables to set for a worker, as key-value pairs.
    pub fn to_vars(&self) -> Vec<(&'static str, String)> {
        vec![
            (Self::PARTEST, "1".to_owned()),
            (Self::RUN_ID, self.run_id.clone()),
            (Self::UNIT_FILE, self.unit_file.clone()),
            (Self::ATTEMPT, self.attempt.to_string()),
            (Self::TOTAL_ATTEMPTS, self.total_attempts.to_string()),
            (Self::THREAD_OPTIONS, self.options.to_env_value()),
        ]
    }
}

fn read_var(name: &'static str) -> Result<String, WorkerEnvError> {
    env::var(name).map_err(|_| WorkerEnvError::Missing { name })
}

fn read_u32(name: &'static str) -> Result<u32, WorkerEnvError> {
    let value = read_var(name)?;
    value
        .parse()
        .map_err(|_| WorkerEnvError::InvalidInteger { name, value })
}
