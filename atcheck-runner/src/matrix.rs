// Copyright (c) The atcheck Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The test matrix: which browsers each CI workflow drives, and the
//! cross-product of combinations to run.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A browser that a remote workflow can drive an assistive technology
/// against.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Browser {
    /// Google Chrome.
    Chrome,
    /// Mozilla Firefox.
    Firefox,
    /// Apple Safari.
    Safari,
    /// Microsoft Edge.
    Edge,
}

impl Browser {
    /// Returns the canonical lowercase name for this browser.
    pub fn as_str(self) -> &'static str {
        match self {
            Browser::Chrome => "chrome",
            Browser::Firefox => "firefox",
            Browser::Safari => "safari",
            Browser::Edge => "edge",
        }
    }
}

impl fmt::Display for Browser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The immutable identity of one logical test scenario: a CI workflow, the
/// browser it drives, and the test plan it executes.
///
/// Produced once by [`TestMatrix::enumerate`] and never mutated afterwards.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct TestCombination {
    /// The workflow file identifier, e.g. `voiceover-test.yml`.
    pub workflow_id: String,
    /// The browser the workflow drives.
    pub browser: Browser,
    /// The test plan identifier, e.g. `tests/checkbox`.
    pub test_plan: String,
}

impl fmt::Display for TestCombination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} + {} + {}", self.workflow_id, self.browser, self.test_plan)
    }
}

/// Maps each CI workflow to the browsers it is able to drive.
///
/// The map is insertion-ordered so that enumeration order matches the order
/// workflows appear in the configuration file.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(transparent)]
pub struct TestMatrix {
    workflows: IndexMap<String, Vec<Browser>>,
}

impl TestMatrix {
    /// Creates a matrix from a workflow → browsers map.
    pub fn new(workflows: IndexMap<String, Vec<Browser>>) -> Self {
        Self { workflows }
    }

    /// Returns true if the matrix has no workflows at all, or no browsers for
    /// any workflow.
    pub fn is_empty(&self) -> bool {
        self.workflows.values().all(|browsers| browsers.is_empty())
    }

    /// The total number of (workflow, browser) pairs in the matrix.
    pub fn pair_count(&self) -> usize {
        self.workflows.values().map(|browsers| browsers.len()).sum()
    }

    /// Enumerates the combinations for a single test plan, in matrix order
    /// (workflow outer, browser inner).
    pub fn combinations_for_plan(&self, plan: &str) -> Vec<TestCombination> {
        self.workflows
            .iter()
            .flat_map(|(workflow_id, browsers)| {
                browsers.iter().map(|browser| TestCombination {
                    workflow_id: workflow_id.clone(),
                    browser: *browser,
                    test_plan: plan.to_owned(),
                })
            })
            .collect()
    }

    /// Enumerates the full cross-product of {workflow × browser × test plan}.
    ///
    /// Plan-outer order: all combinations of the first plan, then the second,
    /// and so on, because plans are processed strictly one at a time. This is
    /// a pure function of the matrix and the plan list.
    pub fn enumerate(&self, plans: &[String]) -> Vec<TestCombination> {
        plans
            .iter()
            .flat_map(|plan| self.combinations_for_plan(plan))
            .collect()
    }
}
