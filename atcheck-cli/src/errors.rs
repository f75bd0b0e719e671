// Copyright (c) The atcheck Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Errors the CLI reports to users, and the exit codes they map to.

use atcheck_runner::errors::{
    ConfigReadError, ListenerError, SignalHandlerSetupError, TunnelError,
};
use owo_colors::{OwoColorize, Style};
use std::error::Error;
use thiserror::Error;

/// Process exit codes.
pub mod exit_codes {
    /// Every combination of every plan passed.
    pub const OK: i32 = 0;
    /// At least one combination failed verification.
    pub const CHECK_FAILED: i32 = 1;
    /// The run was interrupted by a signal before all plans completed.
    pub const INTERRUPTED: i32 = 4;
    /// Setup failed before any verification could happen.
    pub const SETUP_ERROR: i32 = 96;
}

/// An error which occurred during normal operation. Reported to stderr
/// without a backtrace and mapped to an exit code, unlike unexpected errors
/// which bubble up through `color_eyre`.
#[derive(Debug, Error)]
pub enum ExpectedError {
    /// The config file could not be read or is invalid.
    #[error(transparent)]
    ConfigRead {
        /// The underlying error.
        #[from]
        err: ConfigReadError,
    },

    /// The GitHub token environment variable is missing.
    #[error("`{var}` must be set to a token able to dispatch workflows")]
    MissingToken {
        /// The environment variable that was consulted.
        var: &'static str,
    },

    /// The tokio runtime could not be created.
    #[error("failed to create tokio runtime")]
    RuntimeCreate {
        /// The underlying I/O error.
        #[source]
        err: std::io::Error,
    },

    /// The callback listener could not be set up.
    #[error(transparent)]
    ListenerSetup {
        /// The underlying error.
        #[from]
        err: ListenerError,
    },

    /// The tunnel to the public internet could not be opened.
    #[error(transparent)]
    TunnelSetup {
        /// The underlying error.
        #[from]
        err: TunnelError,
    },

    /// The signal handler could not be installed.
    #[error(transparent)]
    SignalHandlerSetup {
        /// The underlying error.
        #[from]
        err: SignalHandlerSetupError,
    },
}

impl ExpectedError {
    /// The exit code the process should terminate with. Every expected error
    /// occurs before the first dispatch, so they all map to setup failure;
    /// verdicts and interrupts carry their codes through `Ok` returns.
    pub fn process_exit_code(&self) -> i32 {
        exit_codes::SETUP_ERROR
    }

    /// Writes the error and its cause chain to stderr.
    pub fn display_to_stderr(&self) {
        let mut error_style = Style::new();
        if supports_color::on_cached(supports_color::Stream::Stderr).is_some() {
            error_style = error_style.red().bold();
        }

        eprintln!("{}: {self}", "error".style(error_style));
        let mut next_error = self.source();
        while let Some(error) = next_error {
            eprintln!("  caused by: {error}");
            next_error = error.source();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino::Utf8PathBuf;

    #[test]
    fn expected_errors_exit_with_setup_code() {
        let err = ExpectedError::from(ConfigReadError::Invalid {
            path: Utf8PathBuf::from("atcheck.toml"),
            reason: "no test plans listed".to_owned(),
        });
        assert_eq!(err.process_exit_code(), exit_codes::SETUP_ERROR);

        let err = ExpectedError::MissingToken {
            var: "ATCHECK_GITHUB_TOKEN",
        };
        assert_eq!(err.process_exit_code(), exit_codes::SETUP_ERROR);
        assert!(err.to_string().contains("ATCHECK_GITHUB_TOKEN"));
    }
}
