// Copyright (c) The partest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{
    config::MaxParallel,
    errors::{FatalUnitError, FatalUnitErrorKind, SchedulerBuildError, SchedulerError},
    runner::{
        AttemptData, AttemptOutcome, ExecutionResult, RetryPolicy, UnitExecutor, UnitId,
        UnitInfo, UnitState,
    },
    time::{StopwatchStart, stopwatch},
};
use camino::Utf8PathBuf;
use chrono::{DateTime, FixedOffset, Local};
use debug_ignore::DebugIgnore;
use futures::prelude::*;
use futures::stream::FuturesUnordered;
use partest_metadata::ThreadOptions;
use std::{collections::VecDeque, convert::Infallible, time::Duration};
use tokio::runtime::Runtime;
use tracing::debug;
use uuid::Uuid;

/// Unit scheduler options.
#[derive(Debug, Default)]
pub struct SchedulerBuilder {
    max_parallel: Option<MaxParallel>,
    retries: Option<RetryPolicy>,
}

impl SchedulerBuilder {
    /// Sets the number of units to run simultaneously.
    pub fn set_max_parallel(&mut self, max_parallel: MaxParallel) -> &mut Self {
        self.max_parallel = Some(max_parallel);
        self
    }

    /// Sets the retry policy for failing units.
    pub fn set_retries(&mut self, retries: RetryPolicy) -> &mut Self {
        self.retries = Some(retries);
        self
    }

    /// Creates a new scheduler that runs units through `executor`.
    ///
    /// `thread_options` is passed unchanged to every attempt.
    pub fn build<X: UnitExecutor>(
        &self,
        executor: X,
        thread_options: ThreadOptions,
    ) -> Result<UnitScheduler<X>, SchedulerBuildError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .thread_name("partest-runner-worker")
            .build()
            .map_err(SchedulerBuildError::TokioRuntimeCreate)?;

        Ok(UnitScheduler {
            executor,
            thread_options,
            max_parallel: self.max_parallel.unwrap_or_default(),
            retries: self.retries.unwrap_or_default(),
            run_id: Uuid::new_v4(),
            units: Vec::new(),
            runtime,
        })
    }
}

/// Runs a set of units with bounded parallelism, retrying failed units.
///
/// Created through [`SchedulerBuilder::build`]. Units are registered with [`Self::add`] and run
/// by [`Self::execute`] or [`Self::try_execute`], which consume the scheduler.
#[derive(Debug)]
pub struct UnitScheduler<X> {
    executor: X,
    thread_options: ThreadOptions,
    max_parallel: MaxParallel,
    retries: RetryPolicy,
    run_id: Uuid,
    units: Vec<UnitInfo>,
    runtime: Runtime,
}

impl<X: UnitExecutor> UnitScheduler<X> {
    /// Registers a unit. Units are started in the order they are added.
    pub fn add(&mut self, file: impl Into<Utf8PathBuf>) -> UnitId {
        let id = UnitId::new(self.units.len());
        self.units.push(UnitInfo {
            id,
            file: file.into(),
        });
        id
    }

    /// Returns the unique id of this run.
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Returns the number of registered units.
    pub fn unit_count(&self) -> usize {
        self.units.len()
    }

    /// Runs every registered unit, calling `callback` for each scheduler event.
    ///
    /// Returns an error if a unit crashed or could not be run.
    pub fn execute<F>(self, mut callback: F) -> Result<SchedulerStats, FatalUnitError>
    where
        F: FnMut(SchedulerEvent),
    {
        let res = self.try_execute::<Infallible, _>(|event| {
            callback(event);
            Ok(())
        });
        match res {
            Ok(stats) => Ok(stats),
            Err(SchedulerError::Fatal(error)) => Err(error),
            Err(SchedulerError::Callback(never)) => match never {},
        }
    }

    /// Runs every registered unit, calling `callback` for each scheduler event.
    ///
    /// The callback may return an error, which halts the run: no further units are started and
    /// running workers are killed.
    pub fn try_execute<E, F>(self, callback: F) -> Result<SchedulerStats, SchedulerError<E>>
    where
        F: FnMut(SchedulerEvent) -> Result<(), E>,
    {
        let Self {
            executor,
            thread_options,
            max_parallel,
            retries,
            run_id,
            units,
            runtime,
        } = self;

        let mut ctx = SchedulerContext {
            callback: DebugIgnore(callback),
            stopwatch: stopwatch(),
            executor: &executor,
            thread_options: &thread_options,
            max_parallel: max_parallel.compute(units.len()),
            retries,
            run_id,
            units: &units,
        };
        let res = runtime.block_on(ctx.run());

        // Any workers still running were killed when their attempts were dropped.
        runtime.shutdown_background();
        res
    }
}

/// Counters describing a completed run, as seen by the scheduler.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct SchedulerStats {
    /// The number of units registered.
    pub unit_count: usize,

    /// The total number of attempts started.
    pub attempts: usize,

    /// The number of units that succeeded.
    pub succeeded: usize,

    /// The number of units that failed with no retries left.
    pub failed: usize,

    /// The number of attempts that failed and were retried.
    pub retried: usize,
}

impl SchedulerStats {
    /// Returns true if every unit succeeded.
    pub fn is_success(&self) -> bool {
        self.failed == 0 && self.succeeded == self.unit_count
    }
}

/// An event produced by the scheduler.
#[derive(Clone, Debug)]
pub struct SchedulerEvent {
    /// The time at which the event was generated, including the offset from UTC.
    pub timestamp: DateTime<FixedOffset>,

    /// The amount of time elapsed since the start of the run.
    pub elapsed: Duration,

    /// The kind of event this is.
    pub kind: SchedulerEventKind,
}

/// The kind of scheduler event this is.
///
/// Forms part of [`SchedulerEvent`].
#[derive(Clone, Debug)]
pub enum SchedulerEventKind {
    /// The run started.
    RunStarted {
        /// The unique id of this run.
        run_id: Uuid,

        /// The number of units that will be run.
        unit_count: usize,

        /// The number of units that may run simultaneously.
        max_parallel: usize,

        /// The retry policy.
        retries: RetryPolicy,
    },

    /// An attempt of a unit started.
    UnitStarted {
        /// The unit.
        unit: UnitInfo,

        /// Which attempt this is.
        attempt: AttemptData,

        /// The number of attempts running, including this one.
        running: usize,
    },

    /// An attempt failed, and the unit will be run again.
    UnitAttemptFailedWillRetry {
        /// The result of the failed attempt.
        result: ExecutionResult,
    },

    /// A unit finished for good.
    UnitFinished {
        /// The result of the last attempt.
        result: ExecutionResult,

        /// Either [`UnitState::Succeeded`] or [`UnitState::FailedTerminal`].
        state: UnitState,
    },

    /// A unit crashed or could not be run. No further events follow.
    UnitCrashed {
        /// The unit.
        unit: UnitInfo,

        /// Which attempt crashed.
        attempt: AttemptData,

        /// The result of the attempt, if the worker could be run at all.
        result: Option<ExecutionResult>,

        /// The error the run is halted with.
        error: FatalUnitError,
    },

    /// Every unit finished.
    AllDone {
        /// Counters for the run.
        stats: SchedulerStats,
    },
}

#[derive(Debug)]
struct SchedulerContext<'a, X, F> {
    callback: DebugIgnore<F>,
    stopwatch: StopwatchStart,
    executor: &'a X,
    thread_options: &'a ThreadOptions,
    max_parallel: usize,
    retries: RetryPolicy,
    run_id: Uuid,
    units: &'a [UnitInfo],
}

impl<'a, X, F, E> SchedulerContext<'a, X, F>
where
    X: UnitExecutor,
    F: FnMut(SchedulerEvent) -> Result<(), E>,
{
    async fn run(&mut self) -> Result<SchedulerStats, SchedulerError<E>> {
        let units = self.units;
        let total_attempts = self.retries.total_attempts();
        let mut stats = SchedulerStats {
            unit_count: units.len(),
            ..SchedulerStats::default()
        };

        // (unit index, 1-indexed attempt number)
        let mut pending: VecDeque<(usize, u32)> = (0..units.len()).map(|i| (i, 1)).collect();
        let mut running = FuturesUnordered::new();

        self.callback(SchedulerEventKind::RunStarted {
            run_id: self.run_id,
            unit_count: units.len(),
            max_parallel: self.max_parallel,
            retries: self.retries,
        })?;

        loop {
            while running.len() < self.max_parallel {
                let Some((index, attempt)) = pending.pop_front() else {
                    break;
                };
                let unit = &units[index];
                let attempt = AttemptData {
                    attempt,
                    total_attempts,
                };
                stats.attempts += 1;
                debug!(file = %unit.file, attempt = attempt.attempt, "starting unit");
                self.callback(SchedulerEventKind::UnitStarted {
                    unit: unit.clone(),
                    attempt,
                    running: running.len() + 1,
                })?;

                let executor = self.executor;
                let thread_options = self.thread_options;
                let run_id = self.run_id;
                running.push(async move {
                    let res = executor
                        .execute(run_id, unit, attempt, thread_options)
                        .await;
                    (index, attempt, res)
                });
            }

            let Some((index, attempt, res)) = running.next().await else {
                // Nothing is pending or running.
                break;
            };
            let unit = &units[index];

            let result = match res {
                Ok(result) => result,
                Err(error) => {
                    let error = FatalUnitError::new(
                        &unit.file,
                        attempt.attempt,
                        FatalUnitErrorKind::Execute(error),
                    );
                    return Err(self.halt(unit, attempt, None, error));
                }
            };

            let outcome = result.outcome();
            match self.retries.next_state(attempt.attempt - 1, &outcome) {
                Some(UnitState::FailedRetryable) => {
                    debug_assert!(!attempt.is_last_attempt());
                    debug!(
                        file = %unit.file,
                        attempt = attempt.attempt,
                        "unit failed, will retry"
                    );
                    stats.retried += 1;
                    pending.push_back((index, attempt.attempt + 1));
                    self.callback(SchedulerEventKind::UnitAttemptFailedWillRetry { result })?;
                }
                Some(state) => {
                    debug_assert!(state.is_terminal());
                    debug!(file = %unit.file, ?state, "unit finished");
                    if state == UnitState::Succeeded {
                        stats.succeeded += 1;
                    } else {
                        stats.failed += 1;
                    }
                    self.callback(SchedulerEventKind::UnitFinished { result, state })?;
                }
                None => {
                    let AttemptOutcome::Fatal(kind) = outcome else {
                        unreachable!("only fatal outcomes have no next state");
                    };
                    let error = FatalUnitError::new(&unit.file, attempt.attempt, kind);
                    return Err(self.halt(unit, attempt, Some(result), error));
                }
            }
        }

        debug!(?stats, "all units done");
        self.callback(SchedulerEventKind::AllDone { stats })?;
        Ok(stats)
    }

    /// Reports a fatal error. The caller drops every in-flight attempt after this returns.
    fn halt(
        &mut self,
        unit: &UnitInfo,
        attempt: AttemptData,
        result: Option<ExecutionResult>,
        error: FatalUnitError,
    ) -> SchedulerError<E> {
        debug!(file = %unit.file, %error, "halting run");
        let res = self.callback(SchedulerEventKind::UnitCrashed {
            unit: unit.clone(),
            attempt,
            result,
            error: error.clone(),
        });
        match res {
            Ok(()) => SchedulerError::Fatal(error),
            Err(error) => error,
        }
    }

    fn callback(&mut self, kind: SchedulerEventKind) -> Result<(), SchedulerError<E>> {
        (self.callback)(SchedulerEvent {
            timestamp: Local::now().fixed_offset(),
            elapsed: self.stopwatch.elapsed(),
            kind,
        })
        .map_err(SchedulerError::Callback)
    }
}
