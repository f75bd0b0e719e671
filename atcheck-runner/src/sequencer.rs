// Copyright (c) The atcheck Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The plan sequencer: drives the matrix plan by plan.
//!
//! Plans are strictly serialized — a plan only begins once every combination
//! of the previous plan has settled and been checked — because the full
//! matrix may be too large to run at once against shared CI infrastructure.
//! Within one plan, combinations run concurrently through a bounded queue,
//! and within one combination all repeats are outstanding at the same time.

use crate::{
    consistency::{CombinationVerdict, check_consistency},
    correlation::{CORRELATION_HEADER, CorrelationKey},
    dispatch::{DispatchInputs, DispatchRequest, WorkflowDispatcher},
    matrix::{TestCombination, TestMatrix},
    registry::{CallbackRegistry, RegisteredRun},
    time::stopwatch,
};
use chrono::{DateTime, Local};
use future_queue::StreamExt as _;
use futures::{StreamExt as _, future};
use std::time::Duration;
use tracing::{debug, warn};

/// Settings for one orchestration run.
#[derive(Clone, Debug)]
pub struct SequencerOpts {
    /// How many times each combination is repeated.
    pub runs_per_combination: usize,
    /// Idle window handed to each run's completion detector.
    pub idle_window: Duration,
    /// Maximum combinations of one plan in flight at once.
    pub plan_concurrency: usize,
    /// The git ref workflows run at.
    pub git_ref: String,
    /// Public URL the remote executions POST notifications to.
    pub callback_url: String,
}

/// The outcome of one combination: its verdict plus run accounting.
#[derive(Clone, Debug)]
pub struct CombinationOutcome {
    /// The combination that ran.
    pub combination: TestCombination,
    /// The consistency verdict over its settled runs.
    pub verdict: CombinationVerdict,
    /// How many repeats were attempted.
    pub attempted_runs: usize,
    /// How many dispatches were accepted (rejected ones are excluded from
    /// the expected result set, not retried).
    pub dispatched_runs: usize,
    /// Wall-clock time from first dispatch to last settle.
    pub elapsed: Duration,
}

/// All combination outcomes of one plan.
#[derive(Clone, Debug)]
pub struct PlanVerdict {
    /// The plan identifier.
    pub plan: String,
    /// One outcome per combination, in settle order.
    pub combinations: Vec<CombinationOutcome>,
}

impl PlanVerdict {
    /// A plan passes iff every combination passed.
    pub fn passed(&self) -> bool {
        self.combinations
            .iter()
            .all(|outcome| outcome.verdict.is_pass())
    }
}

/// The overall result of an orchestration run.
#[derive(Clone, Debug)]
pub struct RunVerdict {
    /// One verdict per plan, in plan order.
    pub plans: Vec<PlanVerdict>,
    /// When the run started.
    pub started_at: DateTime<Local>,
    /// Total wall-clock time.
    pub elapsed: Duration,
}

impl RunVerdict {
    /// The run passes iff every plan passed.
    pub fn passed(&self) -> bool {
        self.plans.iter().all(PlanVerdict::passed)
    }
}

/// Progress events emitted while the sequencer runs, in emission order.
#[derive(Clone, Debug)]
pub enum SequencerEvent<'a> {
    /// The run is starting.
    RunStarted {
        /// Number of plans to process.
        plan_count: usize,
        /// Total combinations across all plans.
        combination_count: usize,
        /// Repeats per combination.
        runs_per_combination: usize,
    },
    /// A plan is starting; no plan overlaps another.
    PlanStarted {
        /// The plan identifier.
        plan: &'a str,
        /// Combinations in this plan.
        combinations: usize,
    },
    /// A combination finished and was checked.
    CombinationFinished {
        /// The plan the combination belongs to.
        plan: &'a str,
        /// Its outcome.
        outcome: &'a CombinationOutcome,
    },
    /// A plan finished; its verdict is final.
    PlanFinished {
        /// The plan identifier.
        plan: &'a str,
        /// Whether every combination of the plan passed.
        passed: bool,
    },
}

/// Drives test plans strictly one at a time against a dispatcher and the
/// shared callback registry.
#[derive(Debug)]
pub struct PlanSequencer<'a, D> {
    dispatcher: &'a D,
    registry: &'a CallbackRegistry,
    opts: SequencerOpts,
}

impl<'a, D: WorkflowDispatcher> PlanSequencer<'a, D> {
    /// Creates a sequencer over the given dispatcher and registry.
    pub fn new(dispatcher: &'a D, registry: &'a CallbackRegistry, opts: SequencerOpts) -> Self {
        Self {
            dispatcher,
            registry,
            opts,
        }
    }

    /// Runs every plan to completion and aggregates the verdicts.
    ///
    /// `on_event` observes progress; it is called from the driving task, so
    /// combination events arrive in settle order, never interleaved.
    pub async fn run<F>(&self, matrix: &TestMatrix, plans: &[String], mut on_event: F) -> RunVerdict
    where
        F: FnMut(SequencerEvent<'_>),
    {
        let run_stopwatch = stopwatch();
        on_event(SequencerEvent::RunStarted {
            plan_count: plans.len(),
            combination_count: matrix.pair_count() * plans.len(),
            runs_per_combination: self.opts.runs_per_combination,
        });

        let mut plan_verdicts = Vec::with_capacity(plans.len());
        for plan in plans {
            let combinations = matrix.combinations_for_plan(plan);
            on_event(SequencerEvent::PlanStarted {
                plan,
                combinations: combinations.len(),
            });

            let mut outcomes = Vec::with_capacity(combinations.len());
            {
                let mut settled_stream = futures::stream::iter(
                    combinations
                        .into_iter()
                        .map(|combination| (1usize, move |_cx| self.run_combination(combination))),
                )
                .future_queue(self.opts.plan_concurrency);
                while let Some(outcome) = settled_stream.next().await {
                    on_event(SequencerEvent::CombinationFinished {
                        plan,
                        outcome: &outcome,
                    });
                    outcomes.push(outcome);
                }
            }

            // Every waiter of this plan has settled; nothing may leak into
            // the next plan.
            debug_assert_eq!(self.registry.pending_runs(), 0);

            let plan_verdict = PlanVerdict {
                plan: plan.clone(),
                combinations: outcomes,
            };
            on_event(SequencerEvent::PlanFinished {
                plan,
                passed: plan_verdict.passed(),
            });
            plan_verdicts.push(plan_verdict);
        }

        let snapshot = run_stopwatch.snapshot();
        RunVerdict {
            plans: plan_verdicts,
            started_at: snapshot.start_time,
            elapsed: snapshot.duration,
        }
    }

    /// Dispatches all repeats of one combination, waits for every accepted
    /// repeat to settle, then checks consistency.
    async fn run_combination(&self, combination: TestCombination) -> CombinationOutcome {
        let combination_stopwatch = stopwatch();
        let attempted_runs = self.opts.runs_per_combination;
        let mut waiters = Vec::with_capacity(attempted_runs);

        // Repeats are dispatched sequentially; their completions settle in
        // any order.
        for run_index in 0..attempted_runs {
            let key = CorrelationKey::new(&combination, run_index);
            let request = DispatchRequest {
                workflow_id: combination.workflow_id.clone(),
                git_ref: self.opts.git_ref.clone(),
                inputs: DispatchInputs {
                    callback_url: self.opts.callback_url.clone(),
                    callback_header: format!("{CORRELATION_HEADER}: {key}"),
                    test_plan: combination.test_plan.clone(),
                    browser: combination.browser,
                },
            };
            match self.dispatcher.dispatch(request).await {
                Ok(()) => match self.registry.register(key, self.opts.idle_window) {
                    Ok(waiter) => waiters.push(waiter),
                    Err(err) => {
                        // Keys are unique per enumeration, so this would be
                        // a caller bug; exclude the run rather than crash.
                        warn!(%combination, run_index, %err, "waiter registration failed, excluding run");
                    }
                },
                Err(err) => {
                    warn!(%combination, run_index, %err, "dispatch rejected, excluding run");
                }
            }
        }

        let dispatched_runs = waiters.len();
        debug!(%combination, dispatched_runs, attempted_runs, "awaiting settles");
        let results = future::join_all(waiters.into_iter().map(RegisteredRun::settled)).await;
        let verdict = check_consistency(&results);

        CombinationOutcome {
            combination,
            verdict,
            attempted_runs,
            dispatched_runs,
            elapsed: combination_stopwatch.snapshot().duration,
        }
    }
}
