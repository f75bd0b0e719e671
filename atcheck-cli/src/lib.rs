// Copyright (c) The atcheck Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The atcheck command-line interface.
//!
//! The core logic lives in `atcheck-runner`; this crate parses arguments,
//! wires the listener, tunnel, dispatcher and sequencer together, and maps
//! outcomes to process exit codes.

mod dispatch;
mod errors;
mod output;

pub use dispatch::AtcheckApp;
pub use errors::ExpectedError;
