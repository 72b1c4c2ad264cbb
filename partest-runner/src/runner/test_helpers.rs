// Copyright (c) The partest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Builders for execution results, shared by tests across the crate.

use crate::runner::{AttemptData, ExecutionResult, RecordedEvent, UnitId, UnitInfo};
use chrono::Local;
use partest_metadata::{
    ArtifactBundle, NodeId, RecordedEventKind, RetriedTestRecord, SuiteGraphBuilder, TestError,
    TestState,
};
use std::time::Duration;

/// Builds the result a well-behaved worker would produce, one event at a time.
///
/// Events are stamped 1ms apart unless [`Self::event_at`] is used.
#[derive(Debug)]
pub(crate) struct ResultBuilder {
    unit: UnitInfo,
    attempt: AttemptData,
    exit_code: Option<i32>,
    graph: SuiteGraphBuilder,
    suite_stack: Vec<NodeId>,
    events: Vec<RecordedEvent>,
    retried_tests: Vec<RetriedTestRecord>,
    elapsed: Duration,
    with_bundle: bool,
    bundle: Option<String>,
}

impl ResultBuilder {
    pub(crate) fn new(file: &str) -> Self {
        Self {
            unit: UnitInfo {
                id: UnitId::new(0),
                file: file.into(),
            },
            attempt: AttemptData {
                attempt: 1,
                total_attempts: 1,
            },
            exit_code: Some(0),
            graph: SuiteGraphBuilder::new(Some(file.to_owned())),
            suite_stack: Vec::new(),
            events: Vec::new(),
            retried_tests: Vec::new(),
            elapsed: Duration::ZERO,
            with_bundle: true,
            bundle: None,
        }
    }

    pub(crate) fn unit_id(mut self, index: usize) -> Self {
        self.unit.id = UnitId::new(index);
        self
    }

    pub(crate) fn attempt(mut self, attempt: u32, total_attempts: u32) -> Self {
        self.attempt = AttemptData {
            attempt,
            total_attempts,
        };
        self
    }

    pub(crate) fn exit_code(mut self, exit_code: Option<i32>) -> Self {
        self.exit_code = exit_code;
        self
    }

    /// Skips sending the artifact bundle at the end of the run.
    pub(crate) fn without_bundle(mut self) -> Self {
        self.with_bundle = false;
        self
    }

    pub(crate) fn event_at(mut self, elapsed: Duration, kind: RecordedEventKind) -> Self {
        self.elapsed = elapsed;
        self.events.push(RecordedEvent { elapsed, kind });
        self
    }

    pub(crate) fn run_begin(mut self) -> Self {
        self.push(RecordedEventKind::RunBegin);
        let root = self.graph.root();
        self.suite_stack.push(root);
        self.push(RecordedEventKind::SuiteBegin {
            suite: self.graph.event_node(root),
        });
        self
    }

    pub(crate) fn suite(mut self, title: &str) -> Self {
        let id = self.graph.add_suite(self.current_suite(), title);
        self.suite_stack.push(id);
        self.push(RecordedEventKind::SuiteBegin {
            suite: self.graph.event_node(id),
        });
        self
    }

    pub(crate) fn end_suite(mut self) -> Self {
        let id = self.suite_stack.pop().expect("a suite is open");
        self.push(RecordedEventKind::SuiteEnd {
            suite: self.graph.event_node(id),
        });
        self
    }

    pub(crate) fn passing_test(mut self, title: &str) -> Self {
        let id = self.begin_test(title);
        self.graph.set_test_state(id, TestState::Passed, Some(1));
        self.push(RecordedEventKind::TestPass {
            test: self.graph.event_node(id),
        });
        self
    }

    pub(crate) fn failing_test(mut self, title: &str) -> Self {
        let id = self.begin_test(title);
        self.graph.set_test_state(id, TestState::Failed, Some(1));
        self.push(RecordedEventKind::TestFail {
            test: self.graph.event_node(id),
            error: test_error(title),
        });
        self
    }

    pub(crate) fn pending_test(mut self, title: &str) -> Self {
        let id = self.graph.add_test(self.current_suite(), title);
        self.graph.set_test_state(id, TestState::Pending, None);
        self.push(RecordedEventKind::TestPending {
            test: self.graph.event_node(id),
        });
        self
    }

    pub(crate) fn hook_failure(mut self, title: &str) -> Self {
        self.push(RecordedEventKind::TestFail {
            test: self.graph.hook_node(self.current_suite(), title),
            error: test_error(title),
        });
        self
    }

    /// A test that fails `retries` times within the worker, then passes.
    pub(crate) fn retried_test(mut self, title: &str, retries: u32) -> Self {
        let id = self.begin_test(title);
        for _ in 0..retries {
            self.push(RecordedEventKind::TestRetry {
                test: self.graph.event_node(id),
                error: test_error(title),
            });
        }
        self.graph.set_test_state(id, TestState::Passed, Some(1));
        self.push(RecordedEventKind::TestPass {
            test: self.graph.event_node(id),
        });

        let suite_path = self.suite_stack[1..]
            .iter()
            .map(|&suite| self.graph.event_node(suite).title)
            .collect();
        self.retried_tests.push(RetriedTestRecord {
            suite_path,
            title: title.to_owned(),
            retries,
            state: TestState::Passed,
            duration_ms: Some(1),
            error: Some(test_error(title)),
        });
        self
    }

    /// Closes every open suite and ends the run.
    pub(crate) fn run_end(mut self) -> Self {
        while !self.suite_stack.is_empty() {
            self = self.end_suite();
        }
        self.push(RecordedEventKind::RunEnd);
        if self.with_bundle {
            let bundle = ArtifactBundle {
                suite_graph: self.graph.build(),
                retried_tests: self.retried_tests.clone(),
            };
            self.bundle = Some(bundle.to_json());
        }
        self
    }

    pub(crate) fn build(self) -> ExecutionResult {
        ExecutionResult {
            unit: self.unit,
            attempt: self.attempt,
            exit_code: self.exit_code,
            start_time: Local::now().fixed_offset(),
            time_taken: self.elapsed,
            events: self.events,
            bundle: self.bundle,
            stdout: String::new(),
            stderr: String::new(),
            malformed_lines: Vec::new(),
            leaked: false,
        }
    }

    fn current_suite(&self) -> NodeId {
        *self.suite_stack.last().expect("run_begin was called")
    }

    fn begin_test(&mut self, title: &str) -> NodeId {
        let id = self.graph.add_test(self.current_suite(), title);
        self.push(RecordedEventKind::TestBegin {
            test: self.graph.event_node(id),
        });
        id
    }

    fn push(&mut self, kind: RecordedEventKind) {
        self.elapsed += Duration::from_millis(1);
        self.events.push(RecordedEvent {
            elapsed: self.elapsed,
            kind,
        });
    }
}

fn test_error(title: &str) -> TestError {
    TestError {
        message: format!("{title} failed"),
        stack: None,
    }
}
