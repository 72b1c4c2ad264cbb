// Copyright (c) The partest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The serialized form of a worker's suite tree.
//!
//! A suite tree is cyclic: every child points back at its parent. To serialize it, every node
//! gets a local `$id`, and every link (child lists as well as parent back-references) is written
//! as a `{"$ref": id}` marker. The runner reconstructs the graph through an id table and
//! validates every link.

use crate::{EventNode, NodeKind, TestState};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A node identifier, local to one worker.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub u32);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A link to a node, serialized as `{"$ref": id}`.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
pub struct NodeRef {
    /// The node being referred to.
    #[serde(rename = "$ref")]
    pub id: NodeId,
}

impl NodeRef {
    /// Creates a new reference to `id`.
    pub fn new(id: NodeId) -> Self {
        Self { id }
    }
}

/// A worker's suite tree in serialized form.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SerializedSuiteGraph {
    /// The worker's top-level suite.
    pub root: NodeRef,

    /// All nodes in the graph, in any order.
    pub nodes: Vec<SerializedNode>,
}

/// A single node within a [`SerializedSuiteGraph`].
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum SerializedNode {
    /// A suite.
    Suite(SerializedSuite),

    /// A test.
    Test(SerializedTest),
}

impl SerializedNode {
    /// Returns the id of this node.
    pub fn id(&self) -> NodeId {
        match self {
            Self::Suite(suite) => suite.id,
            Self::Test(test) => test.id,
        }
    }

    /// Returns the kind of this node.
    pub fn kind(&self) -> NodeKind {
        match self {
            Self::Suite(_) => NodeKind::Suite,
            Self::Test(_) => NodeKind::Test,
        }
    }
}

/// A serialized suite.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SerializedSuite {
    /// The local id of this suite.
    #[serde(rename = "$id")]
    pub id: NodeId,

    /// The suite title. The top-level suite usually has an empty title.
    pub title: String,

    /// The parent of this suite, `None` for the top-level suite.
    #[serde(default)]
    pub parent: Option<NodeRef>,

    /// Whether this is the top-level suite.
    #[serde(default)]
    pub root: bool,

    /// Whether this suite is pending.
    #[serde(default)]
    pub pending: bool,

    /// The file this suite was defined in.
    #[serde(default)]
    pub file: Option<String>,

    /// Child suites, in definition order.
    #[serde(default)]
    pub suites: Vec<NodeRef>,

    /// Child tests, in definition order.
    #[serde(default)]
    pub tests: Vec<NodeRef>,
}

/// A serialized test.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SerializedTest {
    /// The local id of this test.
    #[serde(rename = "$id")]
    pub id: NodeId,

    /// The test title.
    pub title: String,

    /// The suite this test belongs to.
    pub parent: NodeRef,

    /// The final state of this test, `None` if it never ran.
    #[serde(default)]
    pub state: Option<TestState>,

    /// How long the test took, in milliseconds.
    #[serde(default)]
    pub duration_ms: Option<u64>,

    /// Whether this test is pending.
    #[serde(default)]
    pub pending: bool,

    /// The file this test was defined in.
    #[serde(default)]
    pub file: Option<String>,
}

/// Builds a [`SerializedSuiteGraph`] as a worker runs.
///
/// Node ids are assigned densely in insertion order, starting with the top-level suite.
#[derive(Clone, Debug)]
pub struct SuiteGraphBuilder {
    nodes: Vec<SerializedNode>,
}

impl SuiteGraphBuilder {
    /// Creates a new builder with an untitled top-level suite.
    pub fn new(file: Option<String>) -> Self {
        let root = SerializedSuite {
            id: NodeId(0),
            title: String::new(),
            parent: None,
            root: true,
            pending: false,
            file,
            suites: Vec::new(),
            tests: Vec::new(),
        };
        Self {
            nodes: vec![SerializedNode::Suite(root)],
        }
    }

    /// Returns the id of the top-level suite.
    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    /// Adds a suite under `parent`, returning its id.
    ///
    /// # Panics
    ///
    /// Panics if `parent` is not a suite created by this builder.
    pub fn add_suite(&mut self, parent: NodeId, title: impl Into<String>) -> NodeId {
        let id = self.next_id();
        let file = self.suite_mut(parent).file.clone();
        self.suite_mut(parent).suites.push(NodeRef::new(id));
        self.nodes.push(SerializedNode::Suite(SerializedSuite {
            id,
            title: title.into(),
            parent: Some(NodeRef::new(parent)),
            root: false,
            pending: false,
            file,
            suites: Vec::new(),
            tests: Vec::new(),
        }));
        id
    }

    /// Adds a test under `parent`, returning its id.
    ///
    /// # Panics
    ///
    /// Panics if `parent` is not a suite created by this builder.
    pub fn add_test(&mut self, parent: NodeId, title: impl Into<String>) -> NodeId {
        let id = self.next_id();
        let file = self.suite_mut(parent).file.clone();
        self.suite_mut(parent).tests.push(NodeRef::new(id));
        self.nodes.push(SerializedNode::Test(SerializedTest {
            id,
            title: title.into(),
            parent: NodeRef::new(parent),
            state: None,
            duration_ms: None,
            pending: false,
            file,
        }));
        id
    }

    /// Records the outcome of a test.
    ///
    /// # Panics
    ///
    /// Panics if `test` is not a test created by this builder.
    pub fn set_test_state(&mut self, test: NodeId, state: TestState, duration_ms: Option<u64>) {
        let test = self.test_mut(test);
        test.pending = state == TestState::Pending;
        test.state = Some(state);
        test.duration_ms = duration_ms;
    }

    /// Returns the event payload describing `id`.
    ///
    /// # Panics
    ///
    /// Panics if `id` was not created by this builder.
    pub fn event_node(&self, id: NodeId) -> EventNode {
        let node = &self.nodes[id.0 as usize];
        let (title, parent, root, file, duration_ms) = match node {
            SerializedNode::Suite(suite) => (
                suite.title.clone(),
                suite.parent.map(|p| p.id),
                suite.root,
                suite.file.clone(),
                None,
            ),
            SerializedNode::Test(test) => (
                test.title.clone(),
                Some(test.parent.id),
                false,
                test.file.clone(),
                test.duration_ms,
            ),
        };
        EventNode {
            id,
            title,
            full_title: self.full_title(id),
            kind: node.kind(),
            parent,
            root,
            file,
            duration_ms,
        }
    }

    /// Returns the event payload for a hook that runs within `suite`.
    ///
    /// Hooks are not part of the serialized graph. They are only referred to by events.
    pub fn hook_node(&self, suite: NodeId, title: impl Into<String>) -> EventNode {
        let title = title.into();
        let full_title = format!("{} \"{title}\"", self.full_title(suite));
        EventNode {
            // Hooks are never looked up by id, so they share their parent suite's id.
            id: suite,
            title,
            full_title: full_title.trim_start().to_owned(),
            kind: NodeKind::Hook,
            parent: Some(suite),
            root: false,
            file: self.suite_ref(suite).file.clone(),
            duration_ms: None,
        }
    }

    /// Returns the serialized graph.
    pub fn build(&self) -> SerializedSuiteGraph {
        SerializedSuiteGraph {
            root: NodeRef::new(self.root()),
            nodes: self.nodes.clone(),
        }
    }

    fn full_title(&self, id: NodeId) -> String {
        let mut titles = Vec::new();
        let mut current = Some(id);
        while let Some(id) = current {
            let (title, parent) = match &self.nodes[id.0 as usize] {
                SerializedNode::Suite(suite) => (&suite.title, suite.parent.map(|p| p.id)),
                SerializedNode::Test(test) => (&test.title, Some(test.parent.id)),
            };
            if !title.is_empty() {
                titles.push(title.as_str());
            }
            current = parent;
        }
        titles.reverse();
        titles.join(" ")
    }

    fn next_id(&self) -> NodeId {
        NodeId(self.nodes.len() as u32)
    }

    fn suite_ref(&self, id: NodeId) -> &SerializedSuite {
        match &self.nodes[id.0 as usize] {
            SerializedNode::Suite(suite) => suite,
            SerializedNode::Test(_) => panic!("node {id} is a test, not a suite"),
        }
    }

    fn suite_mut(&mut self, id: NodeId) -> &mut SerializedSuite {
        match &mut self.nodes[id.0 as usize] {
            SerializedNode::Suite(suite) => suite,
            SerializedNode::Test(_) => panic!("node {id} is a test, not a suite"),
        }
    }

    fn test_mut(&mut self, id: NodeId) -> &mut SerializedTest {
        match &mut self.nodes[id.0 as usize] {
            SerializedNode::Test(test) => test,
            SerializedNode::Suite(_) => panic!("node {id} is a suite, not a test"),
        }
    }
}
