// Copyright (c) The partest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use camino::{Utf8Path, Utf8PathBuf};
use indexmap::IndexMap;
use partest_metadata::RetriedTestRecord;

/// Identifies a test across units: the unit file, the titles of the enclosing suites, and the
/// test title.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct RetriedTestKey {
    /// The unit file.
    pub file: Utf8PathBuf,

    /// The titles of the enclosing suites, outermost first.
    pub suite_path: Vec<String>,

    /// The test title.
    pub title: String,
}

/// Tests that were retried within their unit, in the order they were first merged.
#[derive(Clone, Debug, Default)]
pub struct RetriedTests {
    tests: IndexMap<RetriedTestKey, RetriedTestRecord>,
}

impl RetriedTests {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Merges the retried tests reported by the unit at `file`.
    ///
    /// A test that is already present is replaced but keeps its position.
    pub fn merge(
        &mut self,
        file: &Utf8Path,
        records: impl IntoIterator<Item = RetriedTestRecord>,
    ) {
        for record in records {
            let key = RetriedTestKey {
                file: file.to_owned(),
                suite_path: record.suite_path.clone(),
                title: record.title.clone(),
            };
            self.tests.insert(key, record);
        }
    }

    /// Returns the record for a test.
    pub fn get(&self, key: &RetriedTestKey) -> Option<&RetriedTestRecord> {
        self.tests.get(key)
    }

    /// Iterates over retried tests in order.
    pub fn iter(&self) -> impl Iterator<Item = (&RetriedTestKey, &RetriedTestRecord)> + '_ {
        self.tests.iter()
    }

    /// Returns the number of retried tests.
    pub fn len(&self) -> usize {
        self.tests.len()
    }

    /// Returns true if no tests were retried.
    pub fn is_empty(&self) -> bool {
        self.tests.is_empty()
    }
}
