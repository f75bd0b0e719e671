// Copyright (c) The atcheck Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The callback registry: a single shared routing table from correlation
//! keys to pending runs, plus the per-run completion detector.
//!
//! The remote side streams partial results row-by-row and never sends an
//! explicit "all done" signal, so completion is inferred: once a run has
//! produced at least one row, silence for a full idle window means the run
//! is finished. A RUNNING notification cancels the countdown ("more output
//! is coming, don't guess yet"); the next COMPLETED row re-arms it.

use crate::{correlation::CorrelationKey, errors::DuplicateWaiterError, time::idle_sleep};
use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    pin::pin,
    sync::{Arc, Mutex},
    time::Duration,
};
use tokio::sync::{
    mpsc::{UnboundedSender, unbounded_channel},
    oneshot,
};
use tracing::{debug, warn};

/// The status carried by an inbound callback notification.
#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
#[serde(from = "String", into = "String")]
pub enum CallbackStatus {
    /// The remote run is still producing output; don't infer completion.
    Running,
    /// One result row is complete and attached to this notification.
    Completed,
    /// Any other status string. Ignored, but kept for diagnostics.
    Other(String),
}

impl From<String> for CallbackStatus {
    fn from(raw: String) -> Self {
        match raw.as_str() {
            "RUNNING" => CallbackStatus::Running,
            "COMPLETED" => CallbackStatus::Completed,
            _ => CallbackStatus::Other(raw),
        }
    }
}

impl From<CallbackStatus> for String {
    fn from(status: CallbackStatus) -> Self {
        match status {
            CallbackStatus::Running => "RUNNING".to_owned(),
            CallbackStatus::Completed => "COMPLETED".to_owned(),
            CallbackStatus::Other(raw) => raw,
        }
    }
}

/// The body of one inbound callback notification.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallbackPayload {
    /// Progress status for the run this notification belongs to.
    pub status: CallbackStatus,
    /// Which logical test row produced this output, when status is COMPLETED.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row_id: Option<u64>,
    /// Ordered screen-reader output strings for the row.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub responses: Vec<String>,
}

/// One unit of observed output from a remote run.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ResultRow {
    /// Identifies which underlying test case produced this row within a
    /// multi-row run, when the remote side reported it.
    pub row_id: Option<u64>,
    /// Ordered screen-reader output strings.
    pub responses: Vec<String>,
}

/// Everything one run produced, in arrival order.
///
/// Arrival order, not `row_id` order: no ordering guarantee exists across
/// network callbacks, and downstream comparison deliberately preserves what
/// was observed.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct RunResult {
    /// The accumulated rows.
    pub rows: Vec<ResultRow>,
}

/// A single shared routing table from correlation keys to pending runs.
///
/// One registry serves the whole process. It is owned by the orchestrator
/// and handed (by clone of the shared handle) to the inbound listener; there
/// is no ambient global state. Insertion and removal are atomic with respect
/// to the key, so a late duplicate notification for an already-settled run
/// is dropped rather than double-counted.
#[derive(Clone, Debug, Default)]
pub struct CallbackRegistry {
    waiters: Arc<Mutex<HashMap<CorrelationKey, UnboundedSender<CallbackPayload>>>>,
}

impl CallbackRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// The number of runs that have been dispatched but not yet settled.
    pub fn pending_runs(&self) -> usize {
        self.waiters.lock().expect("waiter map poisoned").len()
    }

    /// Installs a waiter for `key` and starts its completion detector with
    /// the given idle window.
    ///
    /// Fails if a waiter for the same key is already live: correlation keys
    /// must be unique across all concurrently outstanding runs.
    pub fn register(
        &self,
        key: CorrelationKey,
        idle_window: Duration,
    ) -> Result<RegisteredRun, DuplicateWaiterError> {
        let (notify_tx, notify_rx) = unbounded_channel();
        let (settled_tx, settled_rx) = oneshot::channel();

        {
            let mut waiters = self.waiters.lock().expect("waiter map poisoned");
            if waiters.contains_key(&key) {
                return Err(DuplicateWaiterError::new(key));
            }
            waiters.insert(key.clone(), notify_tx);
        }

        tokio::spawn(detect_completion(
            self.clone(),
            key,
            notify_rx,
            settled_tx,
            idle_window,
        ));

        Ok(RegisteredRun { settled_rx })
    }

    /// Routes one inbound notification to the waiter registered for `key`.
    ///
    /// A notification for an unknown key (never registered, or already
    /// settled) is dropped; this is never an error.
    pub fn dispatch_notification(&self, key: &CorrelationKey, payload: CallbackPayload) {
        let waiters = self.waiters.lock().expect("waiter map poisoned");
        match waiters.get(key) {
            Some(notify_tx) => {
                // The receiver lives until the detector removes this entry,
                // so a send failure can only be a settle racing this send.
                if notify_tx.send(payload).is_err() {
                    debug!(%key, "notification lost settle race, dropping");
                }
            }
            None => {
                debug!(%key, "no waiter for notification, dropping");
            }
        }
    }

    fn remove(&self, key: &CorrelationKey) {
        self.waiters.lock().expect("waiter map poisoned").remove(key);
    }
}

/// A successfully registered run, resolving once its completion detector
/// declares it finished.
#[derive(Debug)]
pub struct RegisteredRun {
    settled_rx: oneshot::Receiver<RunResult>,
}

impl RegisteredRun {
    /// Waits until the run settles and returns everything it produced.
    ///
    /// A run that never produces a first result never settles; callers that
    /// find this unacceptable must apply their own outer cancellation.
    pub async fn settled(self) -> RunResult {
        match self.settled_rx.await {
            Ok(result) => result,
            Err(_) => {
                // The detector task can only go away without resolving if
                // the runtime is tearing down. An empty result fails the
                // populated check downstream rather than wedging the caller.
                warn!("completion detector dropped without settling");
                RunResult::default()
            }
        }
    }
}

/// Completion detector states, in order.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum DetectorState {
    AwaitingFirstResult,
    Accumulating,
    Settled,
}

/// The per-run idle-timeout state machine.
///
/// Settlement removes the waiter from the registry *before* resolving the
/// future, so anything delivered after the idle window fired finds no waiter
/// and is dropped.
async fn detect_completion(
    registry: CallbackRegistry,
    key: CorrelationKey,
    mut notify_rx: tokio::sync::mpsc::UnboundedReceiver<CallbackPayload>,
    settled_tx: oneshot::Sender<RunResult>,
    idle_window: Duration,
) {
    let mut rows = Vec::new();
    let mut state = DetectorState::AwaitingFirstResult;
    let mut deadline = pin!(idle_sleep(idle_window));

    loop {
        tokio::select! {
            payload = notify_rx.recv() => {
                let Some(payload) = payload else {
                    // The registry dropped our sender: process shutdown.
                    // Settle with what we have.
                    break;
                };
                match payload.status {
                    CallbackStatus::Completed => {
                        rows.push(ResultRow {
                            row_id: payload.row_id,
                            responses: payload.responses,
                        });
                        if state == DetectorState::AwaitingFirstResult {
                            state = DetectorState::Accumulating;
                            debug!(%key, "first result row observed");
                        }
                        deadline.as_mut().arm();
                    }
                    CallbackStatus::Running => {
                        // Explicit "more is coming": cancel the countdown
                        // without re-arming. The next COMPLETED re-arms.
                        if deadline.is_armed() {
                            deadline.as_mut().disarm();
                        }
                    }
                    CallbackStatus::Other(raw) => {
                        warn!(%key, status = %raw, "ignoring callback with unrecognized status");
                    }
                }
            }
            // A disarmed deadline polls Pending forever, so this branch can
            // only fire while the countdown is live.
            () = deadline.as_mut() => {
                // The idle window elapsed with no progress: the run is done
                // with whatever has accumulated. This is a heuristic, not a
                // protocol guarantee.
                break;
            }
        }
    }

    state = DetectorState::Settled;
    registry.remove(&key);
    debug!(%key, ?state, rows = rows.len(), "run settled");
    let _ = settled_tx.send(RunResult { rows });
}
