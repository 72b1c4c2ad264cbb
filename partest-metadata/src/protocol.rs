// Copyright (c) The partest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The line protocol spoken by workers on standard output.
//!
//! Every protocol message is a single line: [`PROTOCOL_PREFIX`] followed by a JSON-encoded
//! [`WorkerMessage`]. Lines without the prefix are ordinary output from the code under test and
//! are captured as-is.

use crate::{NodeId, SerializedSuiteGraph};
use serde::{Deserialize, Serialize};
use std::io::{self, Write};

/// The prefix marking a protocol line.
pub const PROTOCOL_PREFIX: &str = "##partest ";

/// A message sent from a worker to the runner.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum WorkerMessage {
    /// A lifecycle event, in the order it happened.
    Event {
        /// The event.
        event: RecordedEventKind,
    },

    /// The artifact bundle, sent once after the worker's run has ended cleanly.
    Artifacts {
        /// The JSON-encoded [`ArtifactBundle`].
        ///
        /// The bundle is kept in its serialized form until the runner merges it.
        bundle: String,
    },
}

/// A lifecycle event recorded by a worker.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum RecordedEventKind {
    /// The worker's run started.
    RunBegin,

    /// A suite started.
    SuiteBegin {
        /// The suite.
        suite: EventNode,
    },

    /// A suite finished.
    SuiteEnd {
        /// The suite.
        suite: EventNode,
    },

    /// A test started.
    TestBegin {
        /// The test.
        test: EventNode,
    },

    /// A test passed.
    TestPass {
        /// The test.
        test: EventNode,
    },

    /// A test or hook failed.
    TestFail {
        /// The test or hook.
        test: EventNode,

        /// The failure.
        error: TestError,
    },

    /// A test was skipped.
    TestPending {
        /// The test.
        test: EventNode,
    },

    /// A test failed and will be retried within the worker.
    TestRetry {
        /// The test.
        test: EventNode,

        /// The failure that triggered the retry.
        error: TestError,
    },

    /// The worker's run ended.
    RunEnd,

    /// An event kind this version of partest does not know about.
    #[serde(other)]
    Unknown,
}

impl RecordedEventKind {
    /// Returns the kebab-case name of this event kind.
    pub fn name(&self) -> &'static str {
        match self {
            Self::RunBegin => "run-begin",
            Self::SuiteBegin { .. } => "suite-begin",
            Self::SuiteEnd { .. } => "suite-end",
            Self::TestBegin { .. } => "test-begin",
            Self::TestPass { .. } => "test-pass",
            Self::TestFail { .. } => "test-fail",
            Self::TestPending { .. } => "test-pending",
            Self::TestRetry { .. } => "test-retry",
            Self::RunEnd => "run-end",
            Self::Unknown => "unknown",
        }
    }
}

/// A suite, test or hook as described in an event.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct EventNode {
    /// The local id of the node. For hooks, the id of the suite the hook runs in.
    pub id: NodeId,

    /// The node title.
    pub title: String,

    /// The titles of this node and all its ancestors, joined by spaces.
    #[serde(default)]
    pub full_title: String,

    /// What kind of node this is.
    pub kind: NodeKind,

    /// The id of the parent suite.
    #[serde(default)]
    pub parent: Option<NodeId>,

    /// Whether this is the worker's top-level suite.
    #[serde(default)]
    pub root: bool,

    /// The file the node was defined in.
    #[serde(default)]
    pub file: Option<String>,

    /// How long the node took to run, in milliseconds.
    #[serde(default)]
    pub duration_ms: Option<u64>,
}

/// The kind of an [`EventNode`].
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NodeKind {
    /// A suite.
    Suite,

    /// A test.
    Test,

    /// A hook (`before`, `after`, `beforeEach`, `afterEach`).
    Hook,
}

/// The final state of a test.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TestState {
    /// The test passed.
    Passed,

    /// The test failed.
    Failed,

    /// The test was skipped.
    Pending,
}

/// A test failure.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct TestError {
    /// The error message.
    pub message: String,

    /// The stack trace, if any.
    #[serde(default)]
    pub stack: Option<String>,
}

/// A test that finished after being retried within its worker.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RetriedTestRecord {
    /// The titles of the enclosing suites, outermost first, excluding the top-level suite.
    pub suite_path: Vec<String>,

    /// The test title.
    pub title: String,

    /// The number of times the test was retried.
    pub retries: u32,

    /// The state of the last attempt.
    pub state: TestState,

    /// The duration of the last attempt, in milliseconds.
    #[serde(default)]
    pub duration_ms: Option<u64>,

    /// The error from the last failed attempt.
    #[serde(default)]
    pub error: Option<TestError>,
}

/// Everything a worker hands back after its run ends cleanly.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ArtifactBundle {
    /// The worker's suite tree.
    pub suite_graph: SerializedSuiteGraph,

    /// Tests that were retried within the worker.
    #[serde(default)]
    pub retried_tests: Vec<RetriedTestRecord>,
}

impl ArtifactBundle {
    /// Serializes this bundle to JSON.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).expect("artifact bundles are always serializable")
    }

    /// Parses a bundle from JSON. No link validation is performed.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

/// Parses a line of worker output.
///
/// Returns `None` if the line is not a protocol line.
pub fn parse_line(line: &str) -> Option<Result<WorkerMessage, serde_json::Error>> {
    let message = line.strip_prefix(PROTOCOL_PREFIX)?;
    Some(serde_json::from_str(message.trim_end()))
}

/// Writes protocol messages to a writer, typically standard output.
#[derive(Debug)]
pub struct MessageWriter<W> {
    writer: W,
}

impl<W: Write> MessageWriter<W> {
    /// Creates a new writer.
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Writes a lifecycle event.
    pub fn write_event(&mut self, event: RecordedEventKind) -> io::Result<()> {
        self.write_message(&WorkerMessage::Event { event })
    }

    /// Writes the artifact bundle.
    pub fn write_artifacts(&mut self, bundle: &ArtifactBundle) -> io::Result<()> {
        self.write_message(&WorkerMessage::Artifacts {
            bundle: bundle.to_json(),
        })
    }

    /// Writes an arbitrary message.
    pub fn write_message(&mut self, message: &WorkerMessage) -> io::Result<()> {
        let json = serde_json::to_string(message).map_err(io::Error::other)?;
        writeln!(self.writer, "{PROTOCOL_PREFIX}{json}")?;
        // Each message is flushed so interleaved output keeps its position.
        self.writer.flush()
    }

    /// Returns a mutable reference to the underlying writer.
    ///
    /// Anything written directly is passed through by the runner as ordinary worker output.
    pub fn get_mut(&mut self) -> &mut W {
        &mut self.writer
    }

    /// Returns the underlying writer.
    pub fn into_inner(self) -> W {
        self.writer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SuiteGraphBuilder;
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    #[test]
    fn writer_output_parses() {
        let mut builder = SuiteGraphBuilder::new(None);
        let test = builder.add_test(builder.root(), "adds");
        builder.set_test_state(test, TestState::Passed, Some(1));

        let mut writer = MessageWriter::new(Vec::new());
        writer.write_event(RecordedEventKind::RunBegin).unwrap();
        writer
            .write_event(RecordedEventKind::TestPass {
                test: builder.event_node(test),
            })
            .unwrap();
        let bundle = ArtifactBundle {
            suite_graph: builder.build(),
            retried_tests: vec![],
        };
        writer.write_artifacts(&bundle).unwrap();

        let output = String::from_utf8(writer.into_inner()).unwrap();
        let messages: Vec<_> = output
            .lines()
            .map(|line| parse_line(line).expect("protocol line").unwrap())
            .collect();
        assert_eq!(messages.len(), 3);
        assert_eq!(
            messages[0],
            WorkerMessage::Event {
                event: RecordedEventKind::RunBegin
            }
        );
        let WorkerMessage::Artifacts { bundle: json } = &messages[2] else {
            panic!("expected artifacts, found {:?}", messages[2]);
        };
        assert_eq!(ArtifactBundle::from_json(json).unwrap(), bundle);
    }

    #[test_case("hello world" ; "plain output")]
    #[test_case("##partes {}" ; "near miss")]
    #[test_case("" ; "empty")]
    fn non_protocol_lines(line: &str) {
        assert!(parse_line(line).is_none());
    }

    #[test]
    fn unknown_event_kind() {
        let message =
            parse_line(r#"##partest {"type":"event","event":{"kind":"test-slow"}}"#).unwrap();
        assert_eq!(
            message.unwrap(),
            WorkerMessage::Event {
                event: RecordedEventKind::Unknown
            }
        );
    }

    #[test]
    fn malformed_protocol_line() {
        let message = parse_line("##partest {not json").unwrap();
        assert!(message.is_err());
    }
}
