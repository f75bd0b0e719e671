// Copyright (c) The atcheck Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Errors produced by atcheck.

use crate::correlation::CorrelationKey;
use camino::Utf8PathBuf;
use thiserror::Error;

/// An error that occurred while reading the atcheck configuration.
#[derive(Debug, Error)]
pub enum ConfigReadError {
    /// The config file could not be read.
    #[error("failed to read config at `{path}`")]
    Read {
        /// The path that was attempted.
        path: Utf8PathBuf,
        /// The underlying I/O error.
        #[source]
        err: std::io::Error,
    },

    /// The config file is not valid TOML of the expected shape.
    #[error("failed to parse config at `{path}`")]
    Parse {
        /// The path that was parsed.
        path: Utf8PathBuf,
        /// The underlying deserialization error.
        #[source]
        err: toml::de::Error,
    },

    /// The config parsed but is not usable.
    #[error("invalid config at `{path}`: {reason}")]
    Invalid {
        /// The path that was parsed.
        path: Utf8PathBuf,
        /// Human-readable explanation.
        reason: String,
    },
}

/// A waiter is already registered for a correlation key.
///
/// Correlation keys are unique across concurrently outstanding runs by
/// construction, so hitting this indicates a caller bug.
#[derive(Clone, Debug, Error)]
#[error("a waiter is already registered for correlation key `{key}`")]
pub struct DuplicateWaiterError {
    key: CorrelationKey,
}

impl DuplicateWaiterError {
    pub(crate) fn new(key: CorrelationKey) -> Self {
        Self { key }
    }
}

/// An error that occurred while issuing a workflow dispatch request.
///
/// Dispatch failures are recovered locally: the run is excluded from the
/// expected result set and is not retried.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The service answered with a non-success HTTP status.
    #[error("dispatch request rejected with HTTP status {status}")]
    Rejected {
        /// The HTTP status code returned.
        status: u16,
    },

    /// The request could not be sent at all.
    #[error("failed to send dispatch request")]
    Request {
        /// The underlying transport error.
        #[source]
        err: Box<ureq::Error>,
    },

    /// The blocking worker running the request went away.
    #[error("dispatch worker failed")]
    Worker {
        /// The join error from the worker task.
        #[source]
        err: tokio::task::JoinError,
    },
}

/// An error that occurred while opening a tunnel to the public internet.
#[derive(Debug, Error)]
pub enum TunnelError {
    /// The tunnel process could not be spawned.
    #[error("failed to spawn tunnel process `{command}`")]
    Spawn {
        /// The command that was attempted.
        command: String,
        /// The underlying I/O error.
        #[source]
        err: std::io::Error,
    },

    /// The tunnel API could not be queried.
    #[error("failed to query tunnel API at `{api_url}`")]
    Api {
        /// The API endpoint that was queried.
        api_url: String,
        /// The underlying transport error.
        #[source]
        err: Box<ureq::Error>,
    },

    /// The tunnel never reported a public URL.
    #[error("tunnel did not report a public URL within {}s", timeout.as_secs())]
    NoPublicUrl {
        /// How long we waited.
        timeout: std::time::Duration,
    },
}

/// An error that occurred while setting up the inbound callback listener.
#[derive(Debug, Error)]
pub enum ListenerError {
    /// The local socket could not be bound.
    #[error("failed to bind callback listener on port {port}")]
    Bind {
        /// The requested port (0 means ephemeral).
        port: u16,
        /// The underlying I/O error.
        #[source]
        err: std::io::Error,
    },
}

/// An error that occurred while setting up the signal handler.
#[derive(Debug, Error)]
#[error("error setting up signal handler")]
pub struct SignalHandlerSetupError(#[from] std::io::Error);
