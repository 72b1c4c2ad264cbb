// Copyright (c) The partest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Scripted units for the `fake-worker` helper.
//!
//! A scenario is a JSON file that doubles as the unit file: partest passes its path to
//! `fake-worker`, which reads it back and plays the script for the current attempt over the
//! worker protocol.

use camino::Utf8Path;
use color_eyre::{Result, eyre::WrapErr};
use partest_metadata::{
    ArtifactBundle, MessageWriter, NodeId, PROTOCOL_PREFIX, RecordedEventKind, RetriedTestRecord,
    SuiteGraphBuilder, TestError, TestState, ThreadOptions,
};
use serde::{Deserialize, Serialize};
use std::{io::Write, time::Duration};

/// A scripted unit: what the worker does on each attempt.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Scenario {
    /// One script per attempt. Attempts past the end replay the last script.
    pub attempts: Vec<AttemptScript>,
}

impl Scenario {
    /// A scenario that behaves the same way on every attempt.
    pub fn always(script: AttemptScript) -> Self {
        Self {
            attempts: vec![script],
        }
    }

    /// A scenario that plays `scripts` in order, one per attempt.
    pub fn attempts(scripts: impl IntoIterator<Item = AttemptScript>) -> Self {
        Self {
            attempts: scripts.into_iter().collect(),
        }
    }

    /// Returns the script for the given 1-indexed attempt.
    pub fn script_for(&self, attempt: u32) -> Option<&AttemptScript> {
        let index = (attempt.max(1) - 1) as usize;
        self.attempts.get(index).or_else(|| self.attempts.last())
    }

    /// Reads a scenario from a file.
    pub fn read_from(path: &Utf8Path) -> Result<Self> {
        let contents = fs_err::read_to_string(path)?;
        serde_json::from_str(&contents).wrap_err_with(|| format!("failed to parse `{path}`"))
    }

    /// Writes this scenario to a file.
    pub fn write_to(&self, path: &Utf8Path) -> Result<()> {
        let contents = serde_json::to_string_pretty(self)?;
        fs_err::write(path, contents)?;
        Ok(())
    }
}

/// What a worker does during a single attempt.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct AttemptScript {
    /// Tests directly in the unit's top-level suite.
    #[serde(default)]
    pub tests: Vec<ScriptTest>,

    /// Suites in the unit's top-level suite.
    #[serde(default)]
    pub suites: Vec<ScriptSuite>,

    /// How the attempt ends.
    #[serde(default)]
    pub ending: Ending,

    /// How long to sleep before reporting anything.
    #[serde(default)]
    pub sleep_ms: u64,
}

impl AttemptScript {
    /// Creates an empty script.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a test to the top-level suite.
    pub fn test(mut self, test: ScriptTest) -> Self {
        self.tests.push(test);
        self
    }

    /// Adds a suite to the top-level suite.
    pub fn suite(mut self, suite: ScriptSuite) -> Self {
        self.suites.push(suite);
        self
    }

    /// Sets how the attempt ends.
    pub fn ending(mut self, ending: Ending) -> Self {
        self.ending = ending;
        self
    }

    /// Sleeps before reporting anything.
    pub fn sleep_ms(mut self, sleep_ms: u64) -> Self {
        self.sleep_ms = sleep_ms;
        self
    }

    /// Plays this script for `file`, writing protocol messages to `writer`.
    ///
    /// Returns the exit code the worker should exit with.
    pub fn play(&self, file: &str, options: &ThreadOptions, writer: impl Write) -> Result<i32> {
        std::thread::sleep(Duration::from_millis(self.sleep_ms));

        let mut player = Player {
            writer: MessageWriter::new(writer),
            graph: SuiteGraphBuilder::new(Some(file.to_owned())),
            retried_tests: Vec::new(),
            failures: 0,
            grep: options.grep.as_deref(),
        };
        let root = player.graph.root();

        player.writer.write_event(RecordedEventKind::RunBegin)?;
        player.suite_begin(root)?;
        // Output that isn't a protocol line is passed through untouched.
        writeln!(player.writer_mut(), "running {file}")?;
        for test in &self.tests {
            player.play_test(root, test)?;
        }
        for suite in &self.suites {
            player.play_suite(root, suite)?;
        }

        match self.ending {
            Ending::Crash { exit_code } => return Ok(exit_code),
            Ending::Malformed => {
                writeln!(player.writer_mut(), "{PROTOCOL_PREFIX}{{\"type\": ")?;
            }
            Ending::Normal | Ending::Exit { .. } | Ending::NoBundle => {}
        }

        player.suite_end(root)?;
        player.writer.write_event(RecordedEventKind::RunEnd)?;
        if !matches!(self.ending, Ending::NoBundle) {
            player.writer.write_artifacts(&ArtifactBundle {
                suite_graph: player.graph.build(),
                retried_tests: player.retried_tests.clone(),
            })?;
        }

        Ok(match self.ending {
            Ending::Exit { exit_code } => exit_code,
            _ => player.failures.min(255) as i32,
        })
    }
}

/// How an attempt ends.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Ending {
    /// Ends the run cleanly, exiting with the number of failures.
    #[default]
    Normal,

    /// Ends the run cleanly, exiting with a fixed code.
    Exit {
        /// The exit code.
        exit_code: i32,
    },

    /// Exits without ending the run.
    Crash {
        /// The exit code.
        exit_code: i32,
    },

    /// Writes a protocol line that cannot be parsed, then ends the run cleanly.
    Malformed,

    /// Ends the run cleanly but never sends the artifact bundle.
    NoBundle,
}

/// A scripted suite.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ScriptSuite {
    /// The suite title.
    pub title: String,

    /// Tests in this suite.
    #[serde(default)]
    pub tests: Vec<ScriptTest>,

    /// Nested suites.
    #[serde(default)]
    pub suites: Vec<ScriptSuite>,

    /// If set, a `before all` hook with this message fails and no tests in the suite run.
    #[serde(default)]
    pub failing_hook: Option<String>,
}

impl ScriptSuite {
    /// Creates an empty suite.
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }

    /// Adds a test.
    pub fn test(mut self, test: ScriptTest) -> Self {
        self.tests.push(test);
        self
    }

    /// Adds a nested suite.
    pub fn suite(mut self, suite: ScriptSuite) -> Self {
        self.suites.push(suite);
        self
    }

    /// Makes the suite's `before all` hook fail.
    pub fn failing_hook(mut self, message: impl Into<String>) -> Self {
        self.failing_hook = Some(message.into());
        self
    }
}

/// A scripted test.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ScriptTest {
    /// The test title.
    pub title: String,

    /// The final state of the test.
    pub state: TestState,

    /// The number of times the test fails and is retried within the worker first.
    #[serde(default)]
    pub retries: u32,

    /// The reported duration.
    #[serde(default)]
    pub duration_ms: u64,
}

impl ScriptTest {
    /// A passing test.
    pub fn pass(title: impl Into<String>) -> Self {
        Self::new(title, TestState::Passed)
    }

    /// A failing test.
    pub fn fail(title: impl Into<String>) -> Self {
        Self::new(title, TestState::Failed)
    }

    /// A pending test.
    pub fn pending(title: impl Into<String>) -> Self {
        Self::new(title, TestState::Pending)
    }

    /// Retries the test `retries` times within the worker before its final state.
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    fn new(title: impl Into<String>, state: TestState) -> Self {
        Self {
            title: title.into(),
            state,
            retries: 0,
            duration_ms: 1,
        }
    }
}

struct Player<'a, W> {
    writer: MessageWriter<W>,
    graph: SuiteGraphBuilder,
    retried_tests: Vec<RetriedTestRecord>,
    failures: usize,
    grep: Option<&'a str>,
}

impl<W: Write> Player<'_, W> {
    fn writer_mut(&mut self) -> &mut W {
        self.writer.get_mut()
    }

    fn play_suite(&mut self, parent: NodeId, script: &ScriptSuite) -> Result<()> {
        let suite = self.graph.add_suite(parent, script.title.as_str());
        self.suite_begin(suite)?;
        if let Some(message) = &script.failing_hook {
            self.failures += 1;
            self.writer.write_event(RecordedEventKind::TestFail {
                test: self.graph.hook_node(suite, "before all"),
                error: TestError {
                    message: message.clone(),
                    stack: None,
                },
            })?;
        } else {
            for test in &script.tests {
                self.play_test(suite, test)?;
            }
            for nested in &script.suites {
                self.play_suite(suite, nested)?;
            }
        }
        self.suite_end(suite)
    }

    fn play_test(&mut self, parent: NodeId, script: &ScriptTest) -> Result<()> {
        let test = self.graph.add_test(parent, script.title.as_str());
        let node = self.graph.event_node(test);
        if let Some(grep) = self.grep
            && !node.full_title.contains(grep)
        {
            // Filtered tests stay in the tree but are never reported.
            return Ok(());
        }

        let duration_ms = Some(script.duration_ms);
        if script.state == TestState::Pending {
            self.graph.set_test_state(test, TestState::Pending, None);
            return Ok(self.writer.write_event(RecordedEventKind::TestPending {
                test: self.graph.event_node(test),
            })?);
        }

        self.writer
            .write_event(RecordedEventKind::TestBegin { test: node })?;
        for attempt in 0..script.retries {
            self.writer.write_event(RecordedEventKind::TestRetry {
                test: self.graph.event_node(test),
                error: attempt_error(&script.title, attempt + 1),
            })?;
        }

        self.graph.set_test_state(test, script.state, duration_ms);
        let node = self.graph.event_node(test);
        if script.state == TestState::Failed {
            self.failures += 1;
            self.writer.write_event(RecordedEventKind::TestFail {
                test: node.clone(),
                error: attempt_error(&script.title, script.retries + 1),
            })?;
        } else {
            self.writer
                .write_event(RecordedEventKind::TestPass { test: node.clone() })?;
        }

        if script.retries > 0 {
            let suite_path = self.suite_path(parent);
            self.retried_tests.push(RetriedTestRecord {
                suite_path,
                title: script.title.clone(),
                retries: script.retries,
                state: script.state,
                duration_ms,
                error: Some(attempt_error(&script.title, script.retries)),
            });
        }
        Ok(())
    }

    fn suite_begin(&mut self, suite: NodeId) -> Result<()> {
        Ok(self.writer.write_event(RecordedEventKind::SuiteBegin {
            suite: self.graph.event_node(suite),
        })?)
    }

    fn suite_end(&mut self, suite: NodeId) -> Result<()> {
        Ok(self.writer.write_event(RecordedEventKind::SuiteEnd {
            suite: self.graph.event_node(suite),
        })?)
    }

    /// Titles of the suites enclosing `suite`, outermost first, excluding the top-level suite.
    fn suite_path(&self, suite: NodeId) -> Vec<String> {
        let mut path = Vec::new();
        let mut current = suite;
        while current != self.graph.root() {
            let node = self.graph.event_node(current);
            path.push(node.title);
            match node.parent {
                Some(parent) => current = parent,
                None => break,
            }
        }
        path.reverse();
        path
    }
}

fn attempt_error(title: &str, attempt: u32) -> TestError {
    TestError {
        message: format!("{title} failed on try {attempt}"),
        stack: Some(format!("at {title} (try {attempt})")),
    }
}
