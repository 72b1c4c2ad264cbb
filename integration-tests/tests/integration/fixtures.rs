// Copyright (c) The partest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use camino::{Utf8Path, Utf8PathBuf};
use camino_tempfile_ext::prelude::*;
use integration_tests::{partest_cli::PartestCli, scenario::Scenario};
use partest_metadata::ThreadOptions;
use partest_runner::{
    aggregator::{ResultAggregator, RunStats},
    config::{MaxParallel, WorkerConfig},
    errors::SchedulerError,
    reporter::events::{ReporterEvent, ReporterEventKind, RetryKind},
    runner::{ProcessExecutor, RetryPolicy, SchedulerBuilder, SchedulerEventKind},
};
use std::convert::Infallible;

/// A temporary directory holding scripted units.
pub(crate) struct TempUnits {
    dir: Utf8TempDir,
}

impl TempUnits {
    pub(crate) fn new() -> Self {
        let dir = Utf8TempDir::with_prefix("partest-units-").expect("created temp dir");
        Self { dir }
    }

    pub(crate) fn path(&self) -> &Utf8Path {
        self.dir.path()
    }

    /// Writes a unit file and returns its path.
    pub(crate) fn add(&self, name: &str, scenario: &Scenario) -> Utf8PathBuf {
        let path = self.dir.child(name).to_path_buf();
        scenario.write_to(&path).expect("wrote scenario");
        path
    }

    pub(crate) fn write_config(&self, contents: &str) -> Utf8PathBuf {
        let child = self.dir.child(".config/partest.toml");
        child.write_str(contents).expect("wrote config");
        child.to_path_buf()
    }
}

pub(crate) fn fake_worker() -> WorkerConfig {
    WorkerConfig::new(env!("CARGO_BIN_EXE_fake-worker"), Vec::new())
}

/// A `partest-dup` invocation that runs units through `fake-worker`.
pub(crate) fn partest_cli() -> PartestCli {
    let mut cli = PartestCli::new(env!("CARGO_BIN_EXE_partest-dup"));
    cli.args(["--worker", env!("CARGO_BIN_EXE_fake-worker")]);
    cli
}

#[derive(Debug)]
pub(crate) struct RunOutcome {
    /// One line per reporter event.
    pub(crate) log: Vec<String>,
    /// Stats from the `end` event, if the run got that far.
    pub(crate) stats: Option<RunStats>,
    /// Files of the merged unit suites, in the order they were grafted.
    pub(crate) unit_files: Vec<String>,
    /// The largest number of units observed running at once.
    pub(crate) max_running: usize,
    pub(crate) exit_code: i32,
}

/// Runs `files` in-process through [`ProcessExecutor`] and `fake-worker`.
pub(crate) fn run_units(files: &[Utf8PathBuf], max_parallel: usize, retries: u32) -> RunOutcome {
    let mut builder = SchedulerBuilder::default();
    builder
        .set_max_parallel(MaxParallel::Count(max_parallel))
        .set_retries(RetryPolicy::new(retries));
    let mut scheduler = builder
        .build(ProcessExecutor::new(fake_worker()), ThreadOptions::default())
        .expect("built scheduler");
    for file in files {
        scheduler.add(file.clone());
    }

    let mut log = Vec::new();
    let mut stats = None;
    let mut unit_files = Vec::new();
    let mut max_running = 0;

    let mut aggregator = ResultAggregator::new(|event: ReporterEvent<'_>| {
        if let ReporterEventKind::End {
            stats: end_stats,
            root_suite,
            ..
        } = &event.kind
        {
            stats = Some(**end_stats);
            unit_files = root_suite
                .unit_suites()
                .iter()
                .map(|&id| root_suite.suite(id).file.clone().unwrap_or_default())
                .collect();
        }
        log.push(describe(&event.kind));
        Ok::<_, Infallible>(())
    });

    let res = scheduler.try_execute(|event| {
        if let SchedulerEventKind::UnitStarted { running, .. } = &event.kind {
            max_running = max_running.max(*running);
        }
        aggregator.on_scheduler_event(event)
    });
    let exit_code = match res {
        Ok(_) => aggregator.exit_code(),
        Err(SchedulerError::Fatal(error)) => error.exit_code(),
        Err(SchedulerError::Callback(error)) => error
            .exit_code()
            .expect("aggregator callback is infallible"),
    };
    drop(aggregator);

    RunOutcome {
        log,
        stats,
        unit_files,
        max_running,
        exit_code,
    }
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
            format!(
                "retry unit {} #{}",
                unit.file.file_name().unwrap_or_default(),
                attempt.attempt
            )
        }
        ReporterEventKind::End { stats, .. } => format!("end {}", stats.tests),
    }
}
