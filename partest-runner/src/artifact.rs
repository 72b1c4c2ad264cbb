// Copyright (c) The partest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Decoding of the artifact bundles workers send at the end of their run.
//!
//! The suite graph in a bundle is cyclic, with every link written as a `$ref` marker. Decoding
//! rebuilds the graph through an id table and checks that it really is a tree: every link
//! resolves, child lists and parent links agree, and every node is reachable from the root
//! exactly once.

use crate::errors::{BundleDecodeError, BundleDecodeErrorKind, GraphDecodeError};
use camino::Utf8Path;
use indexmap::IndexMap;
use partest_metadata::{
    ArtifactBundle, NodeId, NodeKind, NodeRef, RetriedTestRecord, SerializedNode,
    SerializedSuite, SerializedTest,
};
use std::collections::HashSet;

/// A decoded and validated artifact bundle.
#[derive(Clone, Debug)]
pub struct DecodedBundle {
    /// The unit's suite tree.
    pub graph: DecodedGraph,

    /// Tests that were retried within the unit.
    pub retried_tests: Vec<RetriedTestRecord>,
}

/// Decodes a serialized artifact bundle produced by the unit at `file`.
pub fn decode_bundle(file: &Utf8Path, json: &str) -> Result<DecodedBundle, BundleDecodeError> {
    let bundle = ArtifactBundle::from_json(json)
        .map_err(|error| BundleDecodeError::new(file, BundleDecodeErrorKind::Json(error)))?;
    let graph = DecodedGraph::new(bundle.suite_graph.root, bundle.suite_graph.nodes)
        .map_err(|error| BundleDecodeError::new(file, BundleDecodeErrorKind::Graph(error)))?;
    Ok(DecodedBundle {
        graph,
        retried_tests: bundle.retried_tests,
    })
}

/// A suite graph whose links have been checked to form a tree.
#[derive(Clone, Debug)]
pub struct DecodedGraph {
    root: NodeId,
    nodes: IndexMap<NodeId, SerializedNode>,
}

impl DecodedGraph {
    /// Validates the nodes of a serialized graph rooted at `root`.
    pub fn new(root: NodeRef, nodes: Vec<SerializedNode>) -> Result<Self, GraphDecodeError> {
        let mut table = IndexMap::with_capacity(nodes.len());
        for node in nodes {
            let id = node.id();
            if table.insert(id, node).is_some() {
                return Err(GraphDecodeError::DuplicateId { id });
            }
        }

        let root = root.id;
        match table.get(&root) {
            None => return Err(GraphDecodeError::DanglingRef { from: root, to: root }),
            Some(SerializedNode::Test(_)) => return Err(GraphDecodeError::RootNotSuite { id: root }),
            Some(SerializedNode::Suite(suite)) if suite.parent.is_some() => {
                return Err(GraphDecodeError::RootHasParent { id: root });
            }
            Some(SerializedNode::Suite(_)) => {}
        }

        let this = Self { root, nodes: table };
        this.check_tree()?;
        Ok(this)
    }

    /// Returns the top-level suite.
    pub fn root(&self) -> &SerializedSuite {
        self.suite(self.root)
    }

    /// Returns the number of nodes in the graph.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns true if the graph has no nodes. Decoded graphs always have a root, so this is
    /// always false.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Returns the suite with the given id.
    ///
    /// # Panics
    ///
    /// Panics if `id` is not a suite in this graph. Ids reachable through a decoded graph's links
    /// always resolve.
    pub fn suite(&self, id: NodeId) -> &SerializedSuite {
        match self.nodes.get(&id) {
            Some(SerializedNode::Suite(suite)) => suite,
            _ => panic!("node {id} is not a suite in this graph"),
        }
    }

    /// Returns the test with the given id.
    ///
    /// # Panics
    ///
    /// Panics if `id` is not a test in this graph.
    pub fn test(&self, id: NodeId) -> &SerializedTest {
        match self.nodes.get(&id) {
            Some(SerializedNode::Test(test)) => test,
            _ => panic!("node {id} is not a test in this graph"),
        }
    }

    fn check_tree(&self) -> Result<(), GraphDecodeError> {
        let mut visited = HashSet::with_capacity(self.nodes.len());
        visited.insert(self.root);
        let mut stack = vec![self.root];

        while let Some(id) = stack.pop() {
            let suite = self.suite(id);
            for child in &suite.suites {
                let SerializedNode::Suite(child_suite) = self.link(id, *child, NodeKind::Suite)?
                else {
                    unreachable!("link() checks the node kind");
                };
                check_parent(child.id, id, child_suite.parent.map(|p| p.id))?;
                if !visited.insert(child.id) {
                    return Err(GraphDecodeError::SharedNode { id: child.id });
                }
                stack.push(child.id);
            }
            for child in &suite.tests {
                let SerializedNode::Test(test) = self.link(id, *child, NodeKind::Test)? else {
                    unreachable!("link() checks the node kind");
                };
                check_parent(child.id, id, Some(test.parent.id))?;
                if !visited.insert(child.id) {
                    return Err(GraphDecodeError::SharedNode { id: child.id });
                }
            }
        }

        match self.nodes.keys().find(|id| !visited.contains(*id)) {
            Some(&id) => Err(GraphDecodeError::Unreachable { id }),
            None => Ok(()),
        }
    }

    fn link(
        &self,
        from: NodeId,
        to: NodeRef,
        expected: NodeKind,
    ) -> Result<&SerializedNode, GraphDecodeError> {
        let node = self
            .nodes
            .get(&to.id)
            .ok_or(GraphDecodeError::DanglingRef { from, to: to.id })?;
        if node.kind() != expected {
            return Err(GraphDecodeError::KindMismatch {
                parent: from,
                child: to.id,
                expected,
            });
        }
        Ok(node)
    }
}

fn check_parent(
    child: NodeId,
    expected: NodeId,
    found: Option<NodeId>,
) -> Result<(), GraphDecodeError> {
    if found == Some(expected) {
        Ok(())
    } else {
        Err(GraphDecodeError::ParentMismatch {
            child,
            expected,
            found,
        })
    }
}
