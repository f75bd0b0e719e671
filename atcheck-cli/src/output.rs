// Copyright (c) The atcheck Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Output and logging setup for the CLI.

use clap::{Args, ValueEnum};
use tracing_subscriber::EnvFilter;

#[derive(Copy, Clone, Debug, Args)]
#[command(next_help_heading = "Output options")]
pub(crate) struct OutputOpts {
    /// Verbose output
    #[arg(long, short, global = true, env = "ATCHECK_VERBOSE")]
    pub(crate) verbose: bool,

    /// Produce color output: auto, always, never
    #[arg(
        long,
        value_enum,
        default_value_t,
        hide_possible_values = true,
        global = true,
        value_name = "WHEN",
        env = "ATCHECK_COLOR"
    )]
    pub(crate) color: Color,
}

impl OutputOpts {
    pub(crate) fn init(self) -> OutputContext {
        let OutputOpts { verbose, color } = self;
        init_logging(verbose);
        OutputContext { color }
    }
}

/// The output settings the commands run under.
#[derive(Copy, Clone, Debug)]
pub(crate) struct OutputContext {
    pub(crate) color: Color,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, ValueEnum)]
#[must_use]
pub(crate) enum Color {
    #[default]
    Auto,
    Always,
    Never,
}

impl Color {
    pub(crate) fn should_colorize(self, stream: supports_color::Stream) -> bool {
        match self {
            Color::Auto => supports_color::on_cached(stream).is_some(),
            Color::Always => true,
            Color::Never => false,
        }
    }
}

/// Diagnostics go to stderr through `tracing`; the reporter owns what users
/// normally see. `ATCHECK_LOG` overrides the filter entirely.
fn init_logging(verbose: bool) {
    let default_filter = if verbose { "atcheck=debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_env("ATCHECK_LOG").unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
