// Copyright (c) The atcheck Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Verdicts over the settled results of a combination's repeated runs.
//!
//! Two independent checks, both required for a PASS: every run must be
//! populated (no empty rows, no blank response strings), and every run must
//! equal run 0 row-for-row, element-for-element. Rows are compared by
//! arrival index, not by `row_id`: ordering parity across runs is assumed,
//! not verified, matching the observable behavior of the remote protocol.

use crate::registry::RunResult;
use std::fmt;

/// The pass/fail outcome for one combination.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum CombinationVerdict {
    /// All settled runs were populated and mutually equal.
    Pass,
    /// At least one check failed; the diff pinpoints the first divergence.
    Fail {
        /// Diagnostic for operator inspection.
        diff: ConsistencyDiff,
    },
}

impl CombinationVerdict {
    /// Returns true for a PASS.
    pub fn is_pass(&self) -> bool {
        matches!(self, CombinationVerdict::Pass)
    }
}

/// A structural description of the first consistency failure found.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ConsistencyDiff {
    /// No run settled at all; a vacuous pass is disallowed.
    NoSettledRuns,
    /// A run settled without producing a single row.
    EmptyRun {
        /// Index of the degenerate run.
        run_index: usize,
    },
    /// A row arrived with an empty response sequence.
    EmptyRow {
        /// Index of the run holding the row.
        run_index: usize,
        /// Arrival index of the row.
        row_index: usize,
    },
    /// A response string is empty after trimming whitespace.
    BlankResponse {
        /// Index of the run holding the response.
        run_index: usize,
        /// Arrival index of the row.
        row_index: usize,
        /// Position of the blank response within the row.
        response_index: usize,
    },
    /// A run settled with a different number of rows than run 0.
    RowCountMismatch {
        /// Index of the mismatching run.
        run_index: usize,
        /// Row count of the reference run.
        reference_rows: usize,
        /// Row count of the mismatching run.
        actual_rows: usize,
    },
    /// A row holds a different number of responses than the same row of
    /// run 0.
    ResponseCountMismatch {
        /// Index of the mismatching run.
        run_index: usize,
        /// Arrival index of the row.
        row_index: usize,
        /// Response count in the reference row.
        reference_responses: usize,
        /// Response count in the mismatching row.
        actual_responses: usize,
    },
    /// A response string differs from the reference at one position.
    ResponseMismatch {
        /// Index of the mismatching run.
        run_index: usize,
        /// Arrival index of the row.
        row_index: usize,
        /// Position of the differing response within the row.
        response_index: usize,
        /// What run 0 produced at this position.
        reference: String,
        /// What the mismatching run produced.
        actual: String,
    },
}

impl fmt::Display for ConsistencyDiff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConsistencyDiff::NoSettledRuns => {
                write!(f, "no runs settled; nothing to compare")
            }
            ConsistencyDiff::EmptyRun { run_index } => {
                write!(f, "run {run_index} settled without any result rows")
            }
            ConsistencyDiff::EmptyRow {
                run_index,
                row_index,
            } => {
                write!(f, "run {run_index} row {row_index} has no responses")
            }
            ConsistencyDiff::BlankResponse {
                run_index,
                row_index,
                response_index,
            } => {
                write!(
                    f,
                    "run {run_index} row {row_index} response {response_index} is blank"
                )
            }
            ConsistencyDiff::RowCountMismatch {
                run_index,
                reference_rows,
                actual_rows,
            } => {
                write!(
                    f,
                    "run {run_index} produced {actual_rows} rows, reference run produced {reference_rows}"
                )
            }
            ConsistencyDiff::ResponseCountMismatch {
                run_index,
                row_index,
                reference_responses,
                actual_responses,
            } => {
                write!(
                    f,
                    "run {run_index} row {row_index} has {actual_responses} responses, \
                     reference has {reference_responses}"
                )
            }
            ConsistencyDiff::ResponseMismatch {
                run_index,
                row_index,
                response_index,
                reference,
                actual,
            } => {
                write!(
                    f,
                    "run {run_index} row {row_index} response {response_index} differs: \
                     reference {reference:?}, actual {actual:?}"
                )
            }
        }
    }
}

/// Compares the settled results of all repeats of one combination.
///
/// `runs[0]` is the reference; zero settled runs is a FAIL by definition.
pub fn check_consistency(runs: &[RunResult]) -> CombinationVerdict {
    if let Some(diff) = populated_check(runs).or_else(|| equality_check(runs)) {
        CombinationVerdict::Fail { diff }
    } else {
        CombinationVerdict::Pass
    }
}

fn populated_check(runs: &[RunResult]) -> Option<ConsistencyDiff> {
    if runs.is_empty() {
        return Some(ConsistencyDiff::NoSettledRuns);
    }
    for (run_index, run) in runs.iter().enumerate() {
        if run.rows.is_empty() {
            return Some(ConsistencyDiff::EmptyRun { run_index });
        }
        for (row_index, row) in run.rows.iter().enumerate() {
            if row.responses.is_empty() {
                return Some(ConsistencyDiff::EmptyRow {
                    run_index,
                    row_index,
                });
            }
            for (response_index, response) in row.responses.iter().enumerate() {
                if response.trim().is_empty() {
                    return Some(ConsistencyDiff::BlankResponse {
                        run_index,
                        row_index,
                        response_index,
                    });
                }
            }
        }
    }
    None
}

fn equality_check(runs: &[RunResult]) -> Option<ConsistencyDiff> {
    let Some((reference, rest)) = runs.split_first() else {
        return Some(ConsistencyDiff::NoSettledRuns);
    };
    for (offset, run) in rest.iter().enumerate() {
        let run_index = offset + 1;
        if run.rows.len() != reference.rows.len() {
            return Some(ConsistencyDiff::RowCountMismatch {
                run_index,
                reference_rows: reference.rows.len(),
                actual_rows: run.rows.len(),
            });
        }
        for (row_index, (reference_row, row)) in
            reference.rows.iter().zip(run.rows.iter()).enumerate()
        {
            if row.responses.len() != reference_row.responses.len() {
                return Some(ConsistencyDiff::ResponseCountMismatch {
                    run_index,
                    row_index,
                    reference_responses: reference_row.responses.len(),
                    actual_responses: row.responses.len(),
                });
            }
            for (response_index, (reference_response, response)) in reference_row
                .responses
                .iter()
                .zip(row.responses.iter())
                .enumerate()
            {
                if response != reference_response {
                    return Some(ConsistencyDiff::ResponseMismatch {
                        run_index,
                        row_index,
                        response_index,
                        reference: reference_response.clone(),
                        actual: response.clone(),
                    });
                }
            }
        }
    }
    None
}
