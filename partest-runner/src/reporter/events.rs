// Copyright (c) The partest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Events for the reporter.
//!
//! These types form the interface between the aggregator and the reporter. They are produced by
//! [`ResultAggregator`](crate::aggregator::ResultAggregator) and consumed by
//! [`Reporter`](super::Reporter), and they look the same whether units ran one after another or
//! in parallel.

use crate::{
    aggregator::{RetriedTests, RunStats},
    runner::{AttemptData, RecordedEvent, UnitInfo},
    suite::{RootSuite, SuiteId, TestId},
};
use chrono::{DateTime, FixedOffset};
use partest_metadata::{NodeKind, TestError};
use std::time::Duration;
use uuid::Uuid;

/// A reporter event.
#[derive(Clone, Debug)]
pub struct ReporterEvent<'a> {
    /// The time at which the event was generated, including the offset from UTC.
    pub timestamp: DateTime<FixedOffset>,

    /// The amount of time elapsed since the start of the run.
    pub elapsed: Duration,

    /// The kind of event this is.
    pub kind: ReporterEventKind<'a>,
}

/// The kind of reporter event this is.
///
/// Forms part of [`ReporterEvent`].
#[derive(Clone, Debug)]
pub enum ReporterEventKind<'a> {
    /// The run started.
    Start {
        /// The unique id of this run.
        run_id: Uuid,

        /// The number of units that will be run.
        unit_count: usize,

        /// The number of units that may run simultaneously.
        max_parallel: usize,
    },

    /// A suite started.
    Suite {
        /// The suite.
        suite: NodeInfo<'a>,
    },

    /// A suite finished.
    SuiteEnd {
        /// The suite.
        suite: NodeInfo<'a>,
    },

    /// A test started.
    Test {
        /// The test.
        test: NodeInfo<'a>,
    },

    /// A test passed.
    Pass {
        /// The test.
        test: NodeInfo<'a>,
    },

    /// A test or hook failed.
    Fail {
        /// The test or hook.
        test: NodeInfo<'a>,

        /// The failure.
        error: &'a TestError,
    },

    /// A test was skipped.
    Pending {
        /// The test.
        test: NodeInfo<'a>,
    },

    /// A test or a whole unit is being retried.
    Retry(RetryKind<'a>),

    /// The run finished.
    End {
        /// Final statistics.
        stats: &'a RunStats,

        /// The merged suite tree.
        root_suite: &'a RootSuite,

        /// Tests that were retried within their unit.
        retried_tests: &'a RetriedTests,
    },
}

/// What is being retried.
#[derive(Clone, Debug)]
pub enum RetryKind<'a> {
    /// A test failed and is retried within its unit.
    Test {
        /// The test.
        test: NodeInfo<'a>,

        /// The failure that triggered the retry.
        error: &'a TestError,
    },

    /// A unit attempt failed, and the whole unit will be run again. None of the attempt's events
    /// are reported otherwise.
    Unit {
        /// The unit.
        unit: &'a UnitInfo,

        /// The attempt that failed.
        attempt: AttemptData,

        /// The worker's exit code.
        exit_code: Option<i32>,

        /// The number of failures the attempt recorded.
        test_failures: usize,

        /// The events the attempt recorded.
        events: &'a [RecordedEvent],
    },
}

/// A suite, test or hook as seen by a reporter.
#[derive(Clone, Debug)]
pub struct NodeInfo<'a> {
    /// What kind of node this is.
    pub kind: NodeKind,

    /// The node title.
    pub title: &'a str,

    /// The titles of this node and its enclosing suites, joined by spaces.
    pub full_title: String,

    /// The number of titled suites enclosing this node. A suite counts itself.
    pub depth: usize,

    /// The file the node was defined in.
    pub file: Option<&'a str>,

    /// How long the node took to run, in milliseconds.
    pub duration_ms: Option<u64>,

    /// The node's position in the merged tree.
    pub position: NodePosition,
}

impl NodeInfo<'_> {
    /// Returns true if this is the aggregate root suite.
    pub fn is_root(&self) -> bool {
        matches!(self.position, NodePosition::Root)
    }
}

/// Where a node sits in the merged [`RootSuite`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum NodePosition {
    /// The aggregate root suite.
    Root,

    /// A unit's top-level suite.
    UnitTop(SuiteId),

    /// Any other suite.
    Suite(SuiteId),

    /// A test.
    Test(TestId),

    /// A hook, running within the given suite.
    Hook(SuiteId),

    /// A node that is not part of the merged tree, for example because the unit sent no artifact
    /// bundle.
    Detached,
}
