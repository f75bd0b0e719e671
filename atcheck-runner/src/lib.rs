// Copyright (c) The atcheck Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

#![warn(missing_docs)]

//! Core functionality for atcheck: dispatching repeated remote
//! assistive-technology test runs, correlating their unsolicited callback
//! notifications, inferring completion, and verifying that repeated runs
//! agree.
//!
//! The flow of operations: enumerate the test matrix ([`matrix`]), drive it
//! plan by plan ([`sequencer`]), dispatch each repeat ([`dispatch`]) and
//! route its callbacks by correlation key ([`registry`]) until the idle
//! window settles the run, then compare the repeats ([`consistency`]).

pub mod config;
pub mod consistency;
pub mod correlation;
pub mod dispatch;
pub mod errors;
pub mod listener;
pub mod matrix;
pub mod registry;
pub mod reporter;
pub mod sequencer;
pub mod signal;
mod time;
pub mod tunnel;
