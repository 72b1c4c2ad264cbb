// Copyright (c) The partest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{
    ExpectedError, Result,
    output::{OutputContext, OutputOpts},
};
use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand, ValueEnum};
use partest_metadata::ThreadOptions;
use partest_runner::{
    aggregator::ResultAggregator,
    config::{MaxParallel, PartestConfig, PartestProfile, WorkerConfig},
    reporter::{ReporterBuilder, ReporterKind, ReporterOutput},
    runner::{ProcessExecutor, RetryPolicy, SchedulerBuilder},
};
use std::time::Duration;
use supports_color::Stream;
use tracing::debug;

/// Runs test files in parallel, one isolated worker process per file.
///
/// Each file is run by the configured worker program, which reports its suites and tests back
/// over standard output. Results from all files are merged into a single report.
#[derive(Debug, Parser)]
#[command(
    version,
    styles = crate::output::clap_styles::style(),
    max_term_width = 100,
    args_conflicts_with_subcommands = true
)]
pub struct PartestApp {
    #[clap(flatten)]
    output: OutputOpts,

    #[clap(flatten)]
    run_opts: RunOpts,

    #[clap(subcommand)]
    command: Option<Command>,
}

impl PartestApp {
    /// Initializes the output context.
    pub fn init_output(&self) -> OutputContext {
        self.output.init()
    }

    /// Executes the app.
    ///
    /// Returns the exit code.
    pub fn exec(self, output: OutputContext) -> Result<i32> {
        let run_opts = match self.command {
            Some(Command::Run(run_opts)) => run_opts,
            None => self.run_opts,
        };
        run_opts.exec(output)
    }
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run test files (the default when files are passed directly)
    Run(RunOpts),
}

#[derive(Debug, Args)]
struct RunOpts {
    /// Test files to run, one worker process each
    #[arg(value_name = "FILES")]
    files: Vec<Utf8PathBuf>,

    #[clap(flatten)]
    config_opts: ConfigOpts,

    #[clap(flatten)]
    runner_opts: SchedulerOpts,

    #[clap(flatten)]
    worker_opts: WorkerOpts,

    #[clap(flatten)]
    reporter_opts: ReporterOpts,
}

impl RunOpts {
    fn exec(self, output: OutputContext) -> Result<i32> {
        let config = self.config_opts.make_config()?;
        let profile = self.config_opts.make_profile(&config)?;

        if self.files.is_empty() {
            return Err(ExpectedError::NoUnits);
        }

        let worker = self.worker_opts.worker_config(config.worker());
        let thread_options = self.worker_opts.thread_options(&profile);
        let slow_threshold = thread_options
            .slow_ms
            .map_or_else(|| profile.slow_timeout(), Duration::from_millis);
        debug!(
            "running {} files with worker `{}` (profile: {})",
            self.files.len(),
            worker.program,
            profile.name(),
        );

        let mut scheduler = self
            .runner_opts
            .to_builder(&profile)
            .build(ProcessExecutor::new(worker), thread_options)?;
        for file in self.files {
            scheduler.add(file);
        }

        let mut reporter = self
            .reporter_opts
            .to_builder(&profile, slow_threshold, output)
            .build(ReporterOutput::Stdout);
        let mut aggregator = ResultAggregator::new(|event| reporter.report_event(event));

        scheduler
            .try_execute(|event| aggregator.on_scheduler_event(event))
            .map_err(ExpectedError::from_scheduler_error)?;

        Ok(aggregator.exit_code())
    }
}

#[derive(Debug, Default, Args)]
#[command(next_help_heading = "Config options")]
struct ConfigOpts {
    /// Config file [default: .config/partest.toml in the current directory]
    #[arg(long, value_name = "PATH")]
    config_file: Option<Utf8PathBuf>,

    /// Partest profile to use
    #[arg(long, short = 'P', env = "PARTEST_PROFILE")]
    profile: Option<String>,
}

impl ConfigOpts {
    fn make_config(&self) -> Result<PartestConfig> {
        let current_dir = std::env::current_dir()
            .map_err(|err| ExpectedError::GetCurrentDirFailed { err })?;
        let current_dir = Utf8PathBuf::try_from(current_dir)
            .map_err(|err| ExpectedError::CurrentDirInvalidUtf8 { err })?;
        Ok(PartestConfig::from_sources(&current_dir, self.config_file.as_deref())?)
    }

    fn make_profile<'cfg>(&self, config: &'cfg PartestConfig) -> Result<PartestProfile<'cfg>> {
        let name = self
            .profile
            .as_deref()
            .unwrap_or(PartestConfig::DEFAULT_PROFILE);
        Ok(config.profile(name)?)
    }
}

#[derive(Debug, Default, Args)]
#[command(next_help_heading = "Runner options")]
struct SchedulerOpts {
    /// Number of files to run simultaneously [default: from profile]
    ///
    /// An integer, a negative integer (relative to the number of CPUs), "num-cpus" or
    /// "num-units".
    #[arg(
        long,
        short = 'j',
        visible_alias = "jobs",
        value_name = "N",
        allow_negative_numbers = true
    )]
    max_parallel: Option<MaxParallel>,

    /// Number of retries for failing files [default: from profile]
    #[arg(long, value_name = "N")]
    retries: Option<u32>,
}

impl SchedulerOpts {
    fn to_builder(&self, profile: &PartestProfile<'_>) -> SchedulerBuilder {
        let mut builder = SchedulerBuilder::default();
        builder
            .set_max_parallel(self.max_parallel.unwrap_or_else(|| profile.max_parallel()))
            .set_retries(RetryPolicy::new(self.retries.unwrap_or_else(|| profile.retries())));
        builder
    }
}

#[derive(Debug, Default, Args)]
#[command(next_help_heading = "Worker options")]
struct WorkerOpts {
    /// Worker program that runs a single file [default: from config]
    #[arg(long, value_name = "PROGRAM")]
    worker: Option<String>,

    /// Argument passed to the worker before the file (may be repeated)
    #[arg(long, value_name = "ARG", allow_hyphen_values = true)]
    worker_arg: Vec<String>,

    /// Per-test timeout in milliseconds
    #[arg(long, short = 't', value_name = "MS", conflicts_with = "no_timeouts")]
    timeout: Option<u64>,

    /// Disable per-test timeouts
    #[arg(long)]
    no_timeouts: bool,

    /// Duration in milliseconds after which a test is reported as slow
    #[arg(long, short = 's', value_name = "MS")]
    slow: Option<u64>,

    /// Only run tests whose full title matches this pattern
    #[arg(long, short = 'g', value_name = "PATTERN")]
    grep: Option<String>,

    /// Delay the start of each root suite until the worker signals it
    #[arg(long)]
    delay: bool,

    /// Force each worker to exit once its tests are done
    #[arg(long)]
    exit: bool,

    /// Module each worker loads before the test file (may be repeated)
    #[arg(long, short = 'r', value_name = "PATH")]
    require: Vec<String>,

    /// Compiler hook each worker loads before the test file (may be repeated)
    #[arg(long, value_name = "PATH")]
    compilers: Vec<String>,

    /// Stop each file's run after its first failure
    #[arg(long, short = 'b')]
    bail: bool,

    /// Fail if a file contains exclusive tests
    #[arg(long)]
    forbid_only: bool,

    /// Fail if a file contains pending tests
    #[arg(long)]
    forbid_pending: bool,

    /// Report full stack traces
    #[arg(long)]
    full_trace: bool,

    /// Require every test to be asynchronous
    #[arg(long, short = 'A')]
    async_only: bool,

    /// Check for global variable leaks
    #[arg(long)]
    check_leaks: bool,
}

impl WorkerOpts {
    fn worker_config(&self, config: &WorkerConfig) -> WorkerConfig {
        let mut worker = config.clone();
        if let Some(program) = &self.worker {
            // A worker named on the command line doesn't inherit the configured arguments.
            worker.program = program.clone();
            worker.args.clear();
        }
        worker.args.extend(self.worker_arg.iter().cloned());
        worker
    }

    /// Merges command-line flags into the profile's options. Flags can only turn options on.
    fn thread_options(&self, profile: &PartestProfile<'_>) -> ThreadOptions {
        let mut options = profile.thread_options();
        if self.no_timeouts {
            options.timeout_ms = None;
        } else if let Some(timeout) = self.timeout {
            options.timeout_ms = (timeout > 0).then_some(timeout);
        }
        if let Some(slow) = self.slow {
            options.slow_ms = Some(slow);
        }
        if let Some(grep) = &self.grep {
            options.grep = Some(grep.clone());
        }
        options.delay |= self.delay;
        options.exit_immediately |= self.exit;
        options.requires.extend(self.require.iter().cloned());
        options.compilers.extend(self.compilers.iter().cloned());

        let suite = &mut options.suite_options;
        suite.bail |= self.bail;
        suite.forbid_only |= self.forbid_only;
        suite.forbid_pending |= self.forbid_pending;
        suite.full_stack_trace |= self.full_trace;
        suite.async_only |= self.async_only;
        suite.check_leaks |= self.check_leaks;
        options
    }
}

#[derive(Debug, Default, Args)]
#[command(next_help_heading = "Reporter options")]
struct ReporterOpts {
    /// Reporter to use [default: from profile]
    #[arg(long, short = 'R', value_enum, value_name = "NAME")]
    reporter: Option<ReporterOpt>,
}

impl ReporterOpts {
    fn to_builder(
        &self,
        profile: &PartestProfile<'_>,
        slow_threshold: Duration,
        output: OutputContext,
    ) -> ReporterBuilder {
        let kind = match self.reporter {
            Some(reporter) => reporter.into(),
            None => profile.reporter(),
        };
        let mut builder = ReporterBuilder::default();
        builder
            .set_kind(kind)
            .set_colorize(output.color.should_colorize(Stream::Stdout))
            .set_slow_threshold(slow_threshold);
        builder
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ReporterOpt {
    Spec,
    Json,
}

impl From<ReporterOpt> for ReporterKind {
    fn from(value: ReporterOpt) -> Self {
        match value {
            ReporterOpt::Spec => ReporterKind::Spec,
            ReporterOpt::Json => ReporterKind::Json,
        }
    }
}
