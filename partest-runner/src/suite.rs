// Copyright (c) The partest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The merged suite tree.
//!
//! The main structure in this module is [`RootSuite`], which holds every unit's suite tree under
//! a single root, in the order units finished.

use crate::artifact::DecodedGraph;
use partest_metadata::{NodeId, TestState};
use std::collections::HashMap;

/// Identifies a suite within a [`RootSuite`].
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct SuiteId(usize);

/// Identifies a test within a [`RootSuite`].
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct TestId(usize);

/// A suite in the merged tree.
#[derive(Clone, Debug)]
pub struct Suite {
    /// The suite title.
    pub title: String,

    /// The parent suite. Only the root has no parent.
    pub parent: Option<SuiteId>,

    /// Whether this is the root of the merged tree. Unit top-level suites have this cleared when
    /// they are merged.
    pub root: bool,

    /// Whether this suite is pending.
    pub pending: bool,

    /// The file this suite was defined in.
    pub file: Option<String>,

    /// Child suites, in order.
    pub suites: Vec<SuiteId>,

    /// Child tests, in order.
    pub tests: Vec<TestId>,
}

/// A test in the merged tree.
#[derive(Clone, Debug)]
pub struct Test {
    /// The test title.
    pub title: String,

    /// The suite this test belongs to.
    pub parent: SuiteId,

    /// The final state of this test, `None` if it never ran.
    pub state: Option<TestState>,

    /// How long the test took, in milliseconds.
    pub duration_ms: Option<u64>,

    /// Whether this test is pending.
    pub pending: bool,

    /// The file this test was defined in.
    pub file: Option<String>,
}

/// The single aggregate suite tree handed to reporters.
#[derive(Clone, Debug)]
pub struct RootSuite {
    suites: Vec<Suite>,
    tests: Vec<Test>,
}

impl Default for RootSuite {
    fn default() -> Self {
        Self::new()
    }
}

impl RootSuite {
    /// Creates a new, empty root suite.
    pub fn new() -> Self {
        Self {
            suites: vec![Suite {
                title: String::new(),
                parent: None,
                root: true,
                pending: false,
                file: None,
                suites: Vec::new(),
                tests: Vec::new(),
            }],
            tests: Vec::new(),
        }
    }

    /// Returns the id of the root suite.
    pub fn root_id(&self) -> SuiteId {
        SuiteId(0)
    }

    /// Returns the root suite.
    pub fn root(&self) -> &Suite {
        &self.suites[0]
    }

    /// Returns the top-level suites of merged units, in the order the units finished.
    pub fn unit_suites(&self) -> &[SuiteId] {
        &self.root().suites
    }

    /// Returns the suite with the given id.
    pub fn suite(&self, id: SuiteId) -> &Suite {
        &self.suites[id.0]
    }

    /// Returns the test with the given id.
    pub fn test(&self, id: TestId) -> &Test {
        &self.tests[id.0]
    }

    /// Returns the total number of tests in the tree.
    pub fn test_count(&self) -> usize {
        self.tests.len()
    }

    /// Returns the number of suites in the tree, excluding the root.
    pub fn suite_count(&self) -> usize {
        self.suites.len() - 1
    }

    /// Returns the titles of `id` and its ancestors, outermost first, skipping empty titles.
    pub fn suite_title_path(&self, id: SuiteId) -> Vec<&str> {
        let mut titles = Vec::new();
        let mut current = Some(id);
        while let Some(id) = current {
            let suite = self.suite(id);
            if !suite.title.is_empty() {
                titles.push(suite.title.as_str());
            }
            current = suite.parent;
        }
        titles.reverse();
        titles
    }

    /// Returns the full title of a suite: its title path joined by spaces.
    pub fn suite_full_title(&self, id: SuiteId) -> String {
        self.suite_title_path(id).join(" ")
    }

    /// Returns the full title of a test: its suite's title path and its own title, joined by
    /// spaces.
    pub fn test_full_title(&self, id: TestId) -> String {
        let test = self.test(id);
        let mut titles = self.suite_title_path(test.parent);
        titles.push(&test.title);
        titles.join(" ")
    }

    /// Merges a unit's suite tree under the root, appending it after previously merged units.
    ///
    /// The unit's top-level suite becomes a child of the root and loses its root marker. Returns
    /// the mapping from the unit's local ids to ids in this tree.
    pub(crate) fn graft(&mut self, graph: &DecodedGraph) -> NodeMap {
        let mut map = NodeMap::default();
        let root = self.root_id();
        let top = self.graft_suite(graph, graph.root().id, root, &mut map);
        self.suites[root.0].suites.push(top);
        map.top = Some(top);
        map
    }

    fn graft_suite(
        &mut self,
        graph: &DecodedGraph,
        local: NodeId,
        parent: SuiteId,
        map: &mut NodeMap,
    ) -> SuiteId {
        let source = graph.suite(local);
        let id = SuiteId(self.suites.len());
        self.suites.push(Suite {
            title: source.title.clone(),
            parent: Some(parent),
            root: false,
            pending: source.pending,
            file: source.file.clone(),
            suites: Vec::with_capacity(source.suites.len()),
            tests: Vec::with_capacity(source.tests.len()),
        });
        map.suites.insert(local, id);

        for test_ref in &source.tests {
            let test = graph.test(test_ref.id);
            let test_id = TestId(self.tests.len());
            self.tests.push(Test {
                title: test.title.clone(),
                parent: id,
                state: test.state,
                duration_ms: test.duration_ms,
                pending: test.pending,
                file: test.file.clone(),
            });
            map.tests.insert(test_ref.id, test_id);
            self.suites[id.0].tests.push(test_id);
        }

        for child in &source.suites {
            let child_id = self.graft_suite(graph, child.id, id, map);
            self.suites[id.0].suites.push(child_id);
        }

        id
    }
}

/// Maps a unit's local node ids to ids in the [`RootSuite`] it was merged into.
#[derive(Clone, Debug, Default)]
pub struct NodeMap {
    top: Option<SuiteId>,
    suites: HashMap<NodeId, SuiteId>,
    tests: HashMap<NodeId, TestId>,
}

impl NodeMap {
    /// Returns the merged id of the unit's top-level suite.
    pub fn top(&self) -> Option<SuiteId> {
        self.top
    }

    /// Returns the merged id of a local suite.
    pub fn suite(&self, local: NodeId) -> Option<SuiteId> {
        self.suites.get(&local).copied()
    }

    /// Returns the merged id of a local test.
    pub fn test(&self, local: NodeId) -> Option<TestId> {
        self.tests.get(&local).copied()
    }
}
