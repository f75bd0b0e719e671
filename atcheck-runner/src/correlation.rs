// Copyright (c) The atcheck Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Correlation keys binding a dispatched run to its inbound callbacks.
//!
//! The key is handed to the remote execution as dispatch metadata and echoed
//! back in a header on every callback; it is the sole mechanism used to route
//! notifications to the right pending run.

use crate::matrix::TestCombination;
use std::{borrow::Cow, fmt};

/// The header under which the remote execution echoes the correlation key
/// back on every callback.
pub const CORRELATION_HEADER: &str = "x-atcheck-correlation";

/// An opaque string key identifying one run of one combination.
///
/// Deterministic: the same `(combination, run_index)` always produces the
/// same key. Injective: distinct inputs never collide, because the variable
/// components are escaped before joining.
#[derive(Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct CorrelationKey(String);

impl CorrelationKey {
    /// Derives the key for the given combination and run index.
    pub fn new(combination: &TestCombination, run_index: usize) -> Self {
        Self(format!(
            "{}:{}:{}:{run_index}",
            escape(&combination.workflow_id),
            combination.browser,
            escape(&combination.test_plan),
        ))
    }

    /// Reconstructs a key from its wire form, as echoed back by the remote
    /// side. No validation: an unknown key simply never matches a waiter.
    pub fn from_wire(raw: &str) -> Self {
        Self(raw.to_owned())
    }

    /// The wire form of the key.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CorrelationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Escapes the join separator (and the escape character itself) so that the
/// component boundaries in a key are unambiguous.
fn escape(component: &str) -> Cow<'_, str> {
    if component.contains(['%', ':']) {
        Cow::Owned(component.replace('%', "%25").replace(':', "%3A"))
    } else {
        Cow::Borrowed(component)
    }
}
