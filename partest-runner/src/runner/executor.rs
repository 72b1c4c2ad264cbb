// Copyright (c) The partest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Running a single unit in an isolated worker process.
//!
//! The executor knows nothing about other units: it runs one attempt and hands back an
//! [`ExecutionResult`]. Scheduling and retries are the scheduler's job.

use crate::{
    config::WorkerConfig,
    errors::UnitExecuteError,
    runner::{AttemptData, ExecutionResult, LineAccumulator, UnitInfo},
    time::stopwatch,
};
use partest_metadata::{ThreadOptions, WorkerEnv};
use std::{future::Future, process::Stdio, sync::Arc};
use tokio::{
    io::{AsyncBufReadExt, AsyncReadExt, BufReader},
    process::Command,
    time::Instant,
};
use tracing::{debug, instrument, warn};
use uuid::Uuid;

/// Runs one attempt of one unit.
///
/// Implemented by [`ProcessExecutor`] for real runs. The scheduler is generic over this trait so
/// other executors can be plugged in.
pub trait UnitExecutor {
    /// Runs `unit` once and returns its result.
    ///
    /// Errors are reserved for failures to run the unit at all. A unit that runs and fails, or
    /// crashes, is reported through the returned [`ExecutionResult`].
    fn execute(
        &self,
        run_id: Uuid,
        unit: &UnitInfo,
        attempt: AttemptData,
        options: &ThreadOptions,
    ) -> impl Future<Output = Result<ExecutionResult, UnitExecuteError>>;
}

/// Runs each unit in a fresh worker process.
///
/// The worker is invoked as `<program> <args...> <file>`, with its configuration passed through
/// the environment (see [`WorkerEnv`]). Workers are killed if their attempt is dropped before it
/// completes.
#[derive(Clone, Debug)]
pub struct ProcessExecutor {
    worker: WorkerConfig,
}

impl ProcessExecutor {
    /// Creates a new executor for the given worker.
    pub fn new(worker: WorkerConfig) -> Self {
        Self { worker }
    }

    fn make_command(
        &self,
        run_id: Uuid,
        unit: &UnitInfo,
        attempt: AttemptData,
        options: &ThreadOptions,
    ) -> Command {
        let mut cmd = Command::new(&self.worker.program);
        cmd.args(&self.worker.args)
            .arg(unit.file.as_str())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let env = WorkerEnv {
            run_id: run_id.to_string(),
            unit_file: unit.file.to_string(),
            attempt: attempt.attempt,
            total_attempts: attempt.total_attempts,
            options: options.clone(),
        };
        cmd.envs(env.to_vars());
        cmd
    }
}

impl UnitExecutor for ProcessExecutor {
    #[instrument(level = "debug", skip_all, fields(file = %unit.file, attempt = attempt.attempt))]
    async fn execute(
        &self,
        run_id: Uuid,
        unit: &UnitInfo,
        attempt: AttemptData,
        options: &ThreadOptions,
    ) -> Result<ExecutionResult, UnitExecuteError> {
        let mut cmd = self.make_command(run_id, unit, attempt, options);
        let stopwatch = stopwatch();
        let mut child = cmd.spawn().map_err(|error| UnitExecuteError::Spawn {
            program: self.worker.program.clone(),
            error: Arc::new(error),
        })?;
        debug!(pid = ?child.id(), "spawned worker");

        let child_stdout = child.stdout.take();
        let child_stderr = child.stderr.take();
        let mut acc = LineAccumulator::default();
        let mut stderr = Vec::new();

        let mut leaked = false;

        let status = {
            // Set up futures for reading from stdout and stderr.
            let stdout_fut = async {
                if let Some(child_stdout) = child_stdout {
                    // Lines are read as bytes. Only protocol lines need to be valid UTF-8.
                    let mut reader = BufReader::new(child_stdout);
                    let mut buf = Vec::new();
                    while reader.read_until(b'\n', &mut buf).await? > 0 {
                        let line = String::from_utf8_lossy(trim_line_ending(&buf));
                        acc.push_line(&line, stopwatch.elapsed());
                        buf.clear();
                    }
                }
                Ok::<_, std::io::Error>(())
            };
            tokio::pin!(stdout_fut);
            let mut stdout_done = false;

            let stderr_fut = async {
                if let Some(mut child_stderr) = child_stderr {
                    child_stderr.read_to_end(&mut stderr).await?;
                }
                Ok::<_, std::io::Error>(())
            };
            tokio::pin!(stderr_fut);
            let mut stderr_done = false;

            // Armed once the worker exits.
            let leak_timer = tokio::time::sleep(self.worker.leak_timeout);
            tokio::pin!(leak_timer);

            let mut status = None;
            loop {
                tokio::select! {
                    res = &mut stdout_fut, if !stdout_done => {
                        stdout_done = true;
                        res.map_err(|error| UnitExecuteError::ReadOutput(Arc::new(error)))?;
                    }
                    res = &mut stderr_fut, if !stderr_done => {
                        stderr_done = true;
                        res.map_err(|error| UnitExecuteError::ReadOutput(Arc::new(error)))?;
                    }
                    res = child.wait(), if status.is_none() => {
                        status = Some(res.map_err(|error| UnitExecuteError::Wait(Arc::new(error)))?);
                        leak_timer
                            .as_mut()
                            .reset(Instant::now() + self.worker.leak_timeout);
                    }
                    () = &mut leak_timer, if status.is_some() && !(stdout_done && stderr_done) => {
                        leaked = true;
                    }
                }

                if let Some(status) = status
                    && ((stdout_done && stderr_done) || leaked)
                {
                    break status;
                }
            }
        };

        if leaked {
            warn!(
                leak_timeout = ?self.worker.leak_timeout,
                "worker exited but its output was still open, output may be lost"
            );
        }

        let snapshot = stopwatch.snapshot();
        debug!(
            exit_code = ?status.code(),
            events = acc.events.len(),
            "worker exited"
        );

        Ok(ExecutionResult {
            unit: unit.clone(),
            attempt,
            exit_code: status.code(),
            start_time: snapshot.start_time,
            time_taken: snapshot.duration,
            events: acc.events,
            bundle: acc.bundle,
            stdout: acc.stdout,
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
            malformed_lines: acc.malformed_lines,
            leaked,
        })
    }
}

/// Strips a trailing `\n` or `\r\n`.
fn trim_line_ending(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}
