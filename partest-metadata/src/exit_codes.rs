// Copyright (c) The partest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

/// Documented exit codes for `partest` failures.
///
/// A completed run exits with the number of failed tests, capped at 255 (so 0 means success).
/// Runs that could not complete exit with one of the codes documented here, or with the exit
/// code of the worker process that crashed.
///
/// Unknown/unexpected failures will always result in exit code 1.
pub enum PartestExitCode {}

impl PartestExitCode {
    /// No errors occurred and every test passed.
    pub const OK: i32 = 0;

    /// No test files were passed in.
    pub const NO_UNITS: i32 = 4;

    /// A worker produced output that could not be understood: a malformed protocol line, an
    /// artifact bundle that could not be reconstructed, or a run that ended without reporting its
    /// end.
    ///
    /// Also used when a worker was terminated by a signal and so has no exit code of its own.
    pub const UNIT_PROTOCOL_ERROR: i32 = 103;

    /// A worker process could not be started.
    pub const UNIT_START_FAILED: i32 = 104;

    /// Writing data to stdout or stderr produced an error.
    pub const WRITE_OUTPUT_ERROR: i32 = 110;

    /// A user issue happened while setting up a partest invocation.
    pub const SETUP_ERROR: i32 = 96;

    /// The largest exit code a completed run can produce.
    pub const MAX_FAILURE_CODE: i32 = 255;

    /// Returns the exit code for a completed run with `failures` failed tests.
    pub fn for_failures(failures: usize) -> i32 {
        failures.min(Self::MAX_FAILURE_CODE as usize) as i32
    }
}
