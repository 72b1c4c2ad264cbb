// Copyright (c) The partest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{
    aggregator::{RetriedTests, RunStats},
    artifact::decode_bundle,
    errors::AggregateError,
    reporter::events::{NodeInfo, NodePosition, ReporterEvent, ReporterEventKind, RetryKind},
    runner::{ExecutionResult, SchedulerEvent, SchedulerEventKind, UnitState},
    suite::{NodeMap, RootSuite},
    time::{StopwatchStart, stopwatch},
};
use chrono::Local;
use debug_ignore::DebugIgnore;
use partest_metadata::{EventNode, NodeKind, RecordedEventKind};
use tracing::{debug, warn};

/// Merges finished units into a single suite tree and a single ordered event stream.
///
/// The aggregator is driven by [`SchedulerEvent`]s, one at a time, and calls its callback with
/// the resulting [`ReporterEvent`]s. Each unit's recorded events are replayed in one go when the
/// unit finishes, so events from different units never interleave.
#[derive(Debug)]
pub struct ResultAggregator<F> {
    callback: DebugIgnore<F>,
    stopwatch: StopwatchStart,
    root_suite: RootSuite,
    stats: RunStats,
    retried_tests: RetriedTests,
    halted: bool,
}

impl<F> ResultAggregator<F> {
    /// Creates a new aggregator that reports events to `callback`.
    pub fn new<E>(callback: F) -> Self
    where
        F: FnMut(ReporterEvent<'_>) -> Result<(), E>,
    {
        Self {
            callback: DebugIgnore(callback),
            stopwatch: stopwatch(),
            root_suite: RootSuite::new(),
            stats: RunStats::default(),
            retried_tests: RetriedTests::new(),
            halted: false,
        }
    }

    /// Returns the statistics collected so far.
    pub fn stats(&self) -> &RunStats {
        &self.stats
    }

    /// Returns the merged suite tree.
    pub fn root_suite(&self) -> &RootSuite {
        &self.root_suite
    }

    /// Returns the tests that were retried within their unit.
    pub fn retried_tests(&self) -> &RetriedTests {
        &self.retried_tests
    }

    /// Returns the exit code for the run: the number of failures, capped at 255.
    ///
    /// Only meaningful once the run is complete. A halted run exits with the code of the error
    /// that halted it instead.
    pub fn exit_code(&self) -> i32 {
        self.stats.exit_code()
    }

    /// Handles a scheduler event.
    ///
    /// Once a unit has crashed, all further events are ignored.
    pub fn on_scheduler_event<E>(
        &mut self,
        event: SchedulerEvent,
    ) -> Result<(), AggregateError<E>>
    where
        F: FnMut(ReporterEvent<'_>) -> Result<(), E>,
    {
        if self.halted {
            return Ok(());
        }

        match event.kind {
            SchedulerEventKind::RunStarted {
                run_id,
                unit_count,
                max_parallel,
                ..
            } => {
                self.stats.start = Some(event.timestamp);
                self.emit(ReporterEventKind::Start {
                    run_id,
                    unit_count,
                    max_parallel,
                })?;
                self.emit(ReporterEventKind::Suite {
                    suite: root_info(),
                })
            }
            SchedulerEventKind::UnitStarted { .. } => Ok(()),
            SchedulerEventKind::UnitAttemptFailedWillRetry { result } => {
                self.on_unit_will_retry(&result)
            }
            SchedulerEventKind::UnitFinished { result, state } => {
                self.on_unit_finished(&result, state)
            }
            SchedulerEventKind::UnitCrashed { error, .. } => {
                debug!(%error, "run halted, no further events are aggregated");
                self.halted = true;
                Ok(())
            }
            SchedulerEventKind::AllDone { .. } => {
                self.stats.end = Some(event.timestamp);
                self.stats.duration = Some(event.elapsed);
                self.emit(ReporterEventKind::SuiteEnd {
                    suite: root_info(),
                })?;
                emit_impl(
                    &mut self.callback.0,
                    &self.stopwatch,
                    ReporterEventKind::End {
                        stats: &self.stats,
                        root_suite: &self.root_suite,
                        retried_tests: &self.retried_tests,
                    },
                )
            }
        }
    }

    fn on_unit_will_retry<E>(&mut self, result: &ExecutionResult) -> Result<(), AggregateError<E>>
    where
        F: FnMut(ReporterEvent<'_>) -> Result<(), E>,
    {
        self.stats.units_retried += 1;
        self.emit(ReporterEventKind::Retry(RetryKind::Unit {
            unit: &result.unit,
            attempt: result.attempt,
            exit_code: result.exit_code,
            test_failures: result.test_failures(),
            events: &result.events,
        }))
    }

    fn on_unit_finished<E>(
        &mut self,
        result: &ExecutionResult,
        state: UnitState,
    ) -> Result<(), AggregateError<E>>
    where
        F: FnMut(ReporterEvent<'_>) -> Result<(), E>,
    {
        if !result.saw_run_end() && result.exit_code != Some(0) {
            self.halted = true;
            return Err(AggregateError::UnitCrashed {
                file: result.unit.file.clone(),
                exit_code: result.exit_code,
            });
        }

        let map = match &result.bundle {
            Some(json) => {
                let bundle = decode_bundle(&result.unit.file, json).map_err(|error| {
                    self.halted = true;
                    AggregateError::Bundle(error)
                })?;
                let map = self.root_suite.graft(&bundle.graph);
                self.retried_tests.merge(&result.unit.file, bundle.retried_tests);
                map
            }
            None => {
                warn!(
                    file = %result.unit.file,
                    "unit finished without sending its suite tree, results will be incomplete"
                );
                NodeMap::default()
            }
        };

        let mut replay = Replay {
            callback: &mut self.callback.0,
            stopwatch: &self.stopwatch,
            root_suite: &self.root_suite,
            stats: &mut self.stats,
            map: &map,
        };
        for event in &result.events {
            replay.replay(&event.kind)?;
        }

        if state == UnitState::FailedTerminal {
            self.stats.units_failed += 1;
            if result.test_failures() == 0 {
                self.stats.units_failed_without_failures += 1;
            }
        }
        debug!(file = %result.unit.file, ?state, "merged unit");
        Ok(())
    }

    fn emit<E>(&mut self, kind: ReporterEventKind<'_>) -> Result<(), AggregateError<E>>
    where
        F: FnMut(ReporterEvent<'_>) -> Result<(), E>,
    {
        emit_impl(&mut self.callback.0, &self.stopwatch, kind)
    }
}

/// Replays one unit's recorded events against the merged tree.
struct Replay<'a, F> {
    callback: &'a mut F,
    stopwatch: &'a StopwatchStart,
    root_suite: &'a RootSuite,
    stats: &'a mut RunStats,
    map: &'a NodeMap,
}

impl<F> Replay<'_, F> {
    fn replay<E>(&mut self, event: &RecordedEventKind) -> Result<(), AggregateError<E>>
    where
        F: FnMut(ReporterEvent<'_>) -> Result<(), E>,
    {
        let kind = match event {
            // The aggregator owns the single start and end of the run.
            RecordedEventKind::RunBegin | RecordedEventKind::RunEnd => return Ok(()),
            RecordedEventKind::Unknown => {
                warn!("dropping recorded event of unknown kind");
                return Ok(());
            }
            RecordedEventKind::SuiteBegin { suite } => {
                if !suite.root {
                    self.stats.suites += 1;
                }
                ReporterEventKind::Suite {
                    suite: self.node_info(suite),
                }
            }
            RecordedEventKind::SuiteEnd { suite } => ReporterEventKind::SuiteEnd {
                suite: self.node_info(suite),
            },
            RecordedEventKind::TestBegin { test } => ReporterEventKind::Test {
                test: self.node_info(test),
            },
            RecordedEventKind::TestPass { test } => {
                self.stats.tests += 1;
                self.stats.passes += 1;
                ReporterEventKind::Pass {
                    test: self.node_info(test),
                }
            }
            RecordedEventKind::TestFail { test, error } => {
                if test.kind == NodeKind::Test {
                    self.stats.tests += 1;
                }
                self.stats.failures += 1;
                ReporterEventKind::Fail {
                    test: self.node_info(test),
                    error,
                }
            }
            RecordedEventKind::TestPending { test } => {
                self.stats.tests += 1;
                self.stats.pending += 1;
                ReporterEventKind::Pending {
                    test: self.node_info(test),
                }
            }
            RecordedEventKind::TestRetry { test, error } => {
                ReporterEventKind::Retry(RetryKind::Test {
                    test: self.node_info(test),
                    error,
                })
            }
        };
        emit_impl(&mut *self.callback, self.stopwatch, kind)
    }

    /// Translates a unit-local node into the merged tree.
    fn node_info<'n>(&self, node: &'n EventNode) -> NodeInfo<'n> {
        let root_suite = self.root_suite;
        let position = match node.kind {
            NodeKind::Suite if node.root => self.map.top().map(NodePosition::UnitTop),
            NodeKind::Suite => self.map.suite(node.id).map(NodePosition::Suite),
            NodeKind::Test => self.map.test(node.id).map(NodePosition::Test),
            NodeKind::Hook => self.map.suite(node.id).map(NodePosition::Hook),
        }
        .unwrap_or(NodePosition::Detached);

        let (full_title, depth, duration_ms) = match position {
            NodePosition::UnitTop(id) | NodePosition::Suite(id) => (
                root_suite.suite_full_title(id),
                root_suite.suite_title_path(id).len(),
                node.duration_ms,
            ),
            NodePosition::Test(id) => {
                let test = root_suite.test(id);
                (
                    root_suite.test_full_title(id),
                    root_suite.suite_title_path(test.parent).len(),
                    node.duration_ms.or(test.duration_ms),
                )
            }
            NodePosition::Hook(id) => (
                node.full_title.clone(),
                root_suite.suite_title_path(id).len(),
                node.duration_ms,
            ),
            NodePosition::Root | NodePosition::Detached => {
                let depth = node
                    .parent
                    .and_then(|parent| self.map.suite(parent))
                    .map_or(0, |parent| root_suite.suite_title_path(parent).len());
                (node.full_title.clone(), depth, node.duration_ms)
            }
        };

        NodeInfo {
            kind: node.kind,
            title: &node.title,
            full_title,
            depth,
            file: node.file.as_deref(),
            duration_ms,
            position,
        }
    }
}

fn emit_impl<F, E>(
    callback: &mut F,
    stopwatch: &StopwatchStart,
    kind: ReporterEventKind<'_>,
) -> Result<(), AggregateError<E>>
where
    F: FnMut(ReporterEvent<'_>) -> Result<(), E>,
{
    callback(ReporterEvent {
        timestamp: Local::now().fixed_offset(),
        elapsed: stopwatch.elapsed(),
        kind,
    })
    .map_err(AggregateError::Callback)
}

fn root_info() -> NodeInfo<'static> {
    NodeInfo {
        kind: NodeKind::Suite,
        title: "",
        full_title: String::new(),
        depth: 0,
        file: None,
        duration_ms: None,
        position: NodePosition::Root,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        errors::{FatalUnitError, FatalUnitErrorKind},
        runner::{AttemptData, RetryPolicy, SchedulerStats, test_helpers::ResultBuilder},
    };
    use partest_metadata::PartestExitCode;
    use pretty_assertions::assert_eq;
    use std::{convert::Infallible, time::Duration};
    use uuid::Uuid;

    #[derive(Debug)]
    struct Outcome {
        log: Vec<String>,
        stats: RunStats,
        exit_code: i32,
        unit_files: Vec<String>,
        retried_tests: usize,
        error: Option<AggregateError<Infallible>>,
    }

    fn describe(kind: &ReporterEventKind<'_>) -> String {
        match kind {
            ReporterEventKind::Start { unit_count, .. } => format!("start {unit_count}"),
            ReporterEventKind::Suite { suite } if suite.is_root() => "root".to_owned(),
            ReporterEventKind::SuiteEnd { suite } if suite.is_root() => "root end".to_owned(),
            ReporterEventKind::Suite { suite } => format!("suite [{}]", suite.full_title),
            ReporterEventKind::SuiteEnd { suite } => format!("suite end [{}]", suite.full_title),
            ReporterEventKind::Test { test } => format!("test [{}]", test.full_title),
            ReporterEventKind::Pass { test } => format!("pass [{}]", test.full_title),
            ReporterEventKind::Fail { test, .. } => format!("fail [{}]", test.full_title),
            ReporterEventKind::Pending { test } => format!("pending [{}]", test.full_title),
            ReporterEventKind::Retry(RetryKind::Test { test, .. }) => {
                format!("retry test [{}]", test.full_title)
            }
            ReporterEventKind::Retry(RetryKind::Unit { unit, attempt, .. }) => {
                format!("retry unit {} #{}", unit.file, attempt.attempt)
            }
            ReporterEventKind::End { stats, .. } => format!("end {}", stats.tests),
        }
    }

    fn aggregate(kinds: Vec<SchedulerEventKind>) -> Outcome {
        let mut log = Vec::new();
        let mut aggregator = ResultAggregator::new(|event: ReporterEvent<'_>| {
            log.push(describe(&event.kind));
            Ok::<_, Infallible>(())
        });

        let mut error = None;
        for kind in kinds {
            let event = SchedulerEvent {
                timestamp: Local::now().fixed_offset(),
                elapsed: Duration::from_millis(10),
                kind,
            };
            if let Err(err) = aggregator.on_scheduler_event(event) {
                error = Some(err);
                break;
            }
        }

        let root = aggregator.root_suite();
        let unit_files = root
            .unit_suites()
            .iter()
            .map(|&id| root.suite(id).file.clone().unwrap_or_default())
            .collect();
        let stats = *aggregator.stats();
        let exit_code = aggregator.exit_code();
        let retried_tests = aggregator.retried_tests().len();
        drop(aggregator);

        Outcome {
            log,
            stats,
            exit_code,
            unit_files,
            retried_tests,
            error,
        }
    }

    fn run_started(unit_count: usize) -> SchedulerEventKind {
        SchedulerEventKind::RunStarted {
            run_id: Uuid::nil(),
            unit_count,
            max_parallel: 1,
            retries: RetryPolicy::default(),
        }
    }

    fn finished(result: ExecutionResult, state: UnitState) -> SchedulerEventKind {
        SchedulerEventKind::UnitFinished { result, state }
    }

    fn all_done() -> SchedulerEventKind {
        SchedulerEventKind::AllDone {
            stats: SchedulerStats::default(),
        }
    }

    fn passing_unit(file: &str, suite: &str) -> ExecutionResult {
        ResultBuilder::new(file)
            .run_begin()
            .suite(suite)
            .passing_test("works")
            .run_end()
            .build()
    }

    #[test]
    fn serial_units_replay_in_order() {
        let outcome = aggregate(vec![
            run_started(2),
            finished(passing_unit("a.js", "a"), UnitState::Succeeded),
            finished(passing_unit("b.js", "b"), UnitState::Succeeded),
            all_done(),
        ]);

        assert_eq!(
            outcome.log,
            vec![
                "start 2",
                "root",
                "suite []",
                "suite [a]",
                "test [a works]",
                "pass [a works]",
                "suite end [a]",
                "suite end []",
                "suite []",
                "suite [b]",
                "test [b works]",
                "pass [b works]",
                "suite end [b]",
                "suite end []",
                "root end",
                "end 2",
            ]
        );
        assert_eq!(outcome.exit_code, 0);
        assert_eq!(outcome.stats.suites, 2, "unit top-level suites are not counted");
        assert_eq!(outcome.stats.passes, 2);
        assert_eq!(outcome.unit_files, vec!["a.js", "b.js"]);
        assert!(outcome.stats.start.is_some() && outcome.stats.end.is_some());
    }

    #[test]
    fn root_children_follow_completion_order() {
        let outcome = aggregate(vec![
            run_started(3),
            finished(passing_unit("c.js", "c"), UnitState::Succeeded),
            finished(passing_unit("a.js", "a"), UnitState::Succeeded),
            finished(passing_unit("b.js", "b"), UnitState::Succeeded),
            all_done(),
        ]);
        assert_eq!(outcome.unit_files, vec!["c.js", "a.js", "b.js"]);
        assert_eq!(outcome.stats.tests, 3);
    }

    #[test]
    fn earlier_attempts_are_not_counted() {
        let failing = |attempt| {
            ResultBuilder::new("flaky.js")
                .attempt(attempt, 3)
                .exit_code(Some(1))
                .run_begin()
                .suite("flaky")
                .failing_test("one")
                .failing_test("two")
                .run_end()
                .build()
        };
        let passing = ResultBuilder::new("flaky.js")
            .attempt(3, 3)
            .run_begin()
            .suite("flaky")
            .passing_test("one")
            .pending_test("two")
            .run_end()
            .build();

        let outcome = aggregate(vec![
            run_started(1),
            SchedulerEventKind::UnitAttemptFailedWillRetry { result: failing(1) },
            SchedulerEventKind::UnitAttemptFailedWillRetry { result: failing(2) },
            finished(passing, UnitState::Succeeded),
            all_done(),
        ]);

        let retries: Vec<_> = outcome
            .log
            .iter()
            .filter(|line| line.starts_with("retry"))
            .collect();
        assert_eq!(retries, vec!["retry unit flaky.js #1", "retry unit flaky.js #2"]);
        assert_eq!(outcome.stats.failures, 0);
        assert_eq!(outcome.stats.passes + outcome.stats.pending, 2);
        assert_eq!(outcome.stats.tests, 2);
        assert_eq!(outcome.stats.units_retried, 2);
        assert_eq!(outcome.unit_files, vec!["flaky.js"], "only the last attempt is merged");
        assert_eq!(outcome.exit_code, 0);
    }

    #[test]
    fn failures_and_hooks() {
        let result = ResultBuilder::new("a.js")
            .exit_code(Some(3))
            .run_begin()
            .suite("outer")
            .suite("inner")
            .failing_test("breaks")
            .end_suite()
            .hook_failure("before each")
            .pending_test("later")
            .run_end()
            .build();
        let outcome = aggregate(vec![
            run_started(1),
            finished(result, UnitState::FailedTerminal),
            all_done(),
        ]);

        assert!(outcome.log.contains(&"fail [outer inner breaks]".to_owned()));
        assert!(outcome.log.contains(&"fail [outer \"before each\"]".to_owned()));
        assert_eq!(outcome.stats.suites, 2);
        assert_eq!(outcome.stats.failures, 2);
        assert_eq!(outcome.stats.tests, 2, "hook failures are not tests");
        assert_eq!(outcome.stats.pending, 1);
        assert_eq!(outcome.stats.units_failed, 1);
        assert_eq!(outcome.exit_code, 2);
    }

    #[test]
    fn failed_unit_without_test_failures_still_fails_the_run() {
        let result = ResultBuilder::new("a.js")
            .exit_code(Some(1))
            .run_begin()
            .passing_test("fine")
            .run_end()
            .build();
        let outcome = aggregate(vec![
            run_started(1),
            finished(result, UnitState::FailedTerminal),
            all_done(),
        ]);
        assert_eq!(outcome.stats.failures, 0);
        assert_eq!(outcome.stats.units_failed_without_failures, 1);
        assert_eq!(outcome.exit_code, 1);
    }

    #[test]
    fn crash_without_run_end_is_fatal() {
        let result = ResultBuilder::new("crash.js")
            .exit_code(Some(1))
            .run_begin()
            .passing_test("before crash")
            .build();
        let outcome = aggregate(vec![
            run_started(2),
            finished(result, UnitState::FailedTerminal),
            finished(passing_unit("b.js", "b"), UnitState::Succeeded),
            all_done(),
        ]);

        let error = outcome.error.expect("crash is fatal");
        assert_eq!(error.exit_code(), Some(1));
        assert!(!outcome.log.iter().any(|line| line.starts_with("end")));
        assert!(!outcome.log.iter().any(|line| line.starts_with("pass")));
    }

    #[test]
    fn crashed_event_halts_aggregation() {
        let error = FatalUnitError::new("crash.js", 1, FatalUnitErrorKind::NoRunEnd);
        let outcome = aggregate(vec![
            run_started(1),
            SchedulerEventKind::UnitCrashed {
                unit: ResultBuilder::new("crash.js").build().unit,
                attempt: AttemptData {
                    attempt: 1,
                    total_attempts: 1,
                },
                result: None,
                error,
            },
            all_done(),
        ]);
        assert!(outcome.error.is_none());
        assert_eq!(outcome.log, vec!["start 1", "root"]);
    }

    #[test]
    fn corrupt_bundle_is_fatal() {
        let mut result = passing_unit("a.js", "a");
        result.bundle = Some("{\"suite-graph\":".to_owned());
        let outcome = aggregate(vec![run_started(1), finished(result, UnitState::Succeeded)]);
        let error = outcome.error.expect("bundle error");
        assert!(matches!(error, AggregateError::Bundle(_)));
        assert_eq!(error.exit_code(), Some(PartestExitCode::UNIT_PROTOCOL_ERROR));
    }

    #[test]
    fn unknown_events_are_dropped() {
        let result = ResultBuilder::new("a.js")
            .run_begin()
            .event_at(Duration::from_millis(50), RecordedEventKind::Unknown)
            .passing_test("works")
            .run_end()
            .build();
        let outcome = aggregate(vec![
            run_started(1),
            finished(result, UnitState::Succeeded),
            all_done(),
        ]);
        assert_eq!(outcome.stats.passes, 1);
        assert_eq!(outcome.log.len(), 8);
    }

    #[test]
    fn missing_bundle_reports_detached_nodes() {
        let result = ResultBuilder::new("a.js")
            .without_bundle()
            .run_begin()
            .suite("s")
            .passing_test("t")
            .run_end()
            .build();
        let outcome = aggregate(vec![
            run_started(1),
            finished(result, UnitState::Succeeded),
            all_done(),
        ]);
        assert!(outcome.log.contains(&"pass [s t]".to_owned()));
        assert!(outcome.unit_files.is_empty());
        assert_eq!(outcome.stats.passes, 1);
    }

    #[test]
    fn retried_tests_are_collected() {
        let result = ResultBuilder::new("a.js")
            .run_begin()
            .suite("s")
            .retried_test("flaky", 2)
            .run_end()
            .build();
        let outcome = aggregate(vec![
            run_started(1),
            finished(result, UnitState::Succeeded),
            all_done(),
        ]);
        let retries = outcome
            .log
            .iter()
            .filter(|line| *line == "retry test [s flaky]")
            .count();
        assert_eq!(retries, 2);
        assert_eq!(outcome.retried_tests, 1);
        assert_eq!(outcome.stats.passes, 1);
        assert_eq!(outcome.stats.failures, 0);
    }

    #[test]
    fn node_positions_map_into_merged_tree() {
        let mut positions = Vec::new();
        let mut aggregator = ResultAggregator::new(|event: ReporterEvent<'_>| {
            if let ReporterEventKind::Pass { test } = event.kind {
                positions.push((test.position, test.depth));
            }
            Ok::<_, Infallible>(())
        });
        for result in [passing_unit("a.js", "a"), passing_unit("b.js", "b")] {
            aggregator
                .on_scheduler_event::<Infallible>(SchedulerEvent {
                    timestamp: Local::now().fixed_offset(),
                    elapsed: Duration::ZERO,
                    kind: finished(result, UnitState::Succeeded),
                })
                .unwrap();
        }
        drop(aggregator);

        // Both units use local id 2 for their test, but they map to distinct merged tests.
        assert_eq!(positions.len(), 2);
        assert_ne!(positions[0].0, positions[1].0);
        assert!(matches!(positions[1].0, NodePosition::Test(_)));
        assert_eq!(positions[1].1, 1);
    }
}
