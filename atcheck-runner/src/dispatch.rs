// Copyright (c) The atcheck Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Triggering remote executions via a workflow dispatch service.
//!
//! Dispatch is fire-and-forget: the service either accepts or rejects the
//! request, and acceptance says nothing about completion. Completion is
//! observed separately through the callback listener.

use crate::{errors::DispatchError, matrix::Browser};
use debug_ignore::DebugIgnore;
use serde::Serialize;
use std::future::Future;

/// One dispatch request: which workflow to run, at which ref, with which
/// inputs.
#[derive(Clone, Debug)]
pub struct DispatchRequest {
    /// The workflow file identifier.
    pub workflow_id: String,
    /// The git ref to run the workflow at.
    pub git_ref: String,
    /// The input bag passed through to the remote execution.
    pub inputs: DispatchInputs,
}

/// The inputs the remote execution needs to call back.
///
/// `callback_header` is the full `name: value` pair the remote side echoes
/// on every notification; the value is the run's correlation key.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchInputs {
    /// Public base URL to POST notifications to.
    pub callback_url: String,
    /// The `name: value` header pair to echo on every notification.
    pub callback_header: String,
    /// The test plan to execute.
    pub test_plan: String,
    /// The browser to drive.
    pub browser: Browser,
}

/// A service that can start one remote run.
///
/// Implementations must not retry: a rejected dispatch is reported as an
/// error and the caller excludes the run from aggregation.
pub trait WorkflowDispatcher: Send + Sync {
    /// Asks the service to start one remote run. `Ok` means the request was
    /// accepted, nothing more.
    fn dispatch(
        &self,
        request: DispatchRequest,
    ) -> impl Future<Output = Result<(), DispatchError>> + Send;
}

/// Dispatches workflows through the GitHub Actions `workflow_dispatch` REST
/// endpoint.
#[derive(Clone, Debug)]
pub struct GitHubDispatcher {
    agent: ureq::Agent,
    owner: String,
    repo: String,
    // The token must never show up in debug or log output.
    token: DebugIgnore<String>,
}

impl GitHubDispatcher {
    /// Creates a dispatcher for `owner/repo`, authenticating with `token`.
    pub fn new(
        owner: impl Into<String>,
        repo: impl Into<String>,
        token: impl Into<String>,
    ) -> Self {
        Self {
            agent: ureq::Agent::new_with_defaults(),
            owner: owner.into(),
            repo: repo.into(),
            token: DebugIgnore(token.into()),
        }
    }
}

impl WorkflowDispatcher for GitHubDispatcher {
    async fn dispatch(&self, request: DispatchRequest) -> Result<(), DispatchError> {
        let url = format!(
            "https://api.github.com/repos/{}/{}/actions/workflows/{}/dispatches",
            self.owner, self.repo, request.workflow_id,
        );
        let body = serde_json::json!({
            "ref": request.git_ref,
            "inputs": request.inputs,
        });

        let agent = self.agent.clone();
        let token = self.token.0.clone();
        // ureq is a blocking client; one small POST per run doesn't justify
        // an async HTTP stack.
        let result = tokio::task::spawn_blocking(move || {
            agent
                .post(&url)
                .header("authorization", &format!("Bearer {token}"))
                .header("accept", "application/vnd.github+json")
                .header("x-github-api-version", "2022-11-28")
                .header("user-agent", "atcheck")
                .send_json(&body)
        })
        .await
        .map_err(|err| DispatchError::Worker { err })?;

        match result {
            Ok(_response) => Ok(()),
            Err(ureq::Error::StatusCode(status)) => Err(DispatchError::Rejected { status }),
            Err(err) => Err(DispatchError::Request { err: Box::new(err) }),
        }
    }
}
