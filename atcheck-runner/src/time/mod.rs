// Copyright (c) The atcheck Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

mod idle_sleep;
mod stopwatch;

pub(crate) use idle_sleep::*;
pub(crate) use stopwatch::*;
