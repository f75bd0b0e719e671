// Copyright (c) The atcheck Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Functionality for reporting verdicts as the sequencer produces them.

use crate::{
    consistency::CombinationVerdict,
    sequencer::{RunVerdict, SequencerEvent},
};
use owo_colors::{OwoColorize, Style};
use std::{
    io,
    io::Write,
    time::Duration,
};

/// Styles for reporter output.
#[derive(Clone, Debug, Default)]
struct Styles {
    pass: Style,
    fail: Style,
    count: Style,
    combination: Style,
}

impl Styles {
    fn colorize(&mut self) {
        self.pass = Style::new().green().bold();
        self.fail = Style::new().red().bold();
        self.count = Style::new().bold();
        self.combination = Style::new().bold();
    }
}

/// Builder for [`Reporter`].
#[derive(Clone, Debug, Default)]
pub struct ReporterBuilder {
    colorize: bool,
}

impl ReporterBuilder {
    /// Creates a builder with color output disabled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enables or disables color output.
    pub fn set_colorize(&mut self, colorize: bool) -> &mut Self {
        self.colorize = colorize;
        self
    }

    /// Builds the reporter writing to `writer`.
    pub fn build<W: Write>(&self, writer: W) -> Reporter<W> {
        let mut styles = Styles::default();
        if self.colorize {
            styles.colorize();
        }
        Reporter { writer, styles }
    }
}

/// Writes verdicts and progress to a stream as the sequencer produces them.
#[derive(Debug)]
pub struct Reporter<W> {
    writer: W,
    styles: Styles,
}

impl<W: Write> Reporter<W> {
    /// Writes one sequencer event.
    pub fn report_event(&mut self, event: &SequencerEvent<'_>) -> io::Result<()> {
        match event {
            SequencerEvent::RunStarted {
                plan_count,
                combination_count,
                runs_per_combination,
            } => {
                let combinations = format!("{combination_count} combinations");
                let plans = format!("{plan_count} plans");
                writeln!(
                    self.writer,
                    "Checking {} across {} ({} runs each)",
                    combinations.style(self.styles.count),
                    plans.style(self.styles.count),
                    runs_per_combination,
                )
            }
            SequencerEvent::PlanStarted { plan, combinations } => {
                writeln!(
                    self.writer,
                    "Starting plan {} ({combinations} combinations)",
                    plan.style(self.styles.combination),
                )
            }
            SequencerEvent::CombinationFinished { plan: _, outcome } => {
                match &outcome.verdict {
                    CombinationVerdict::Pass => {
                        writeln!(
                            self.writer,
                            "    {} [{}] {} ({}/{} runs dispatched)",
                            "PASS".style(self.styles.pass),
                            display_duration(outcome.elapsed),
                            outcome.combination.to_string().style(self.styles.combination),
                            outcome.dispatched_runs,
                            outcome.attempted_runs,
                        )
                    }
                    CombinationVerdict::Fail { diff } => {
                        writeln!(
                            self.writer,
                            "    {} [{}] {} ({}/{} runs dispatched)\n         {diff}",
                            "FAIL".style(self.styles.fail),
                            display_duration(outcome.elapsed),
                            outcome.combination.to_string().style(self.styles.combination),
                            outcome.dispatched_runs,
                            outcome.attempted_runs,
                        )
                    }
                }
            }
            SequencerEvent::PlanFinished { plan, passed } => {
                let verdict = if *passed {
                    "PASS".style(self.styles.pass)
                } else {
                    "FAIL".style(self.styles.fail)
                };
                writeln!(
                    self.writer,
                    "Plan {}: {verdict}",
                    plan.style(self.styles.combination),
                )
            }
        }
    }

    /// Writes the final summary for a completed run.
    pub fn report_summary(&mut self, verdict: &RunVerdict) -> io::Result<()> {
        let passed_plans = verdict.plans.iter().filter(|plan| plan.passed()).count();
        let overall = if verdict.passed() {
            "PASS".style(self.styles.pass)
        } else {
            "FAIL".style(self.styles.fail)
        };
        writeln!(
            self.writer,
            "Overall: {overall} ({passed_plans}/{} plans) in {} (started {})",
            verdict.plans.len(),
            display_duration(verdict.elapsed),
            verdict.started_at.format("%Y-%m-%d %H:%M:%S"),
        )
    }

    /// Notes that the run was interrupted before completing.
    pub fn report_interrupted(&mut self) -> io::Result<()> {
        writeln!(
            self.writer,
            "{}: run interrupted before all plans completed",
            "FAIL".style(self.styles.fail),
        )
    }
}

fn display_duration(duration: Duration) -> String {
    let secs = duration.as_secs_f64();
    if secs >= 60.0 {
        format!("{}m {:.1}s", (secs / 60.0) as u64, secs % 60.0)
    } else {
        format!("{secs:.2}s")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        consistency::ConsistencyDiff,
        matrix::{Browser, TestCombination},
        sequencer::CombinationOutcome,
    };
    use pretty_assertions::assert_eq;

    fn outcome(verdict: CombinationVerdict) -> CombinationOutcome {
        CombinationOutcome {
            combination: TestCombination {
                workflow_id: "voiceover.yml".to_owned(),
                browser: Browser::Safari,
                test_plan: "tests/checkbox".to_owned(),
            },
            verdict,
            attempted_runs: 2,
            dispatched_runs: 2,
            elapsed: Duration::from_millis(1500),
        }
    }

    #[test]
    fn failed_combination_renders_the_diff() {
        let mut reporter = ReporterBuilder::new().build(Vec::new());
        reporter
            .report_event(&SequencerEvent::CombinationFinished {
                plan: "tests/checkbox",
                outcome: &outcome(CombinationVerdict::Fail {
                    diff: ConsistencyDiff::ResponseMismatch {
                        run_index: 1,
                        row_index: 0,
                        response_index: 1,
                        reference: "a".to_owned(),
                        actual: "b".to_owned(),
                    },
                }),
            })
            .unwrap();
        let output = String::from_utf8(reporter.writer).unwrap();
        assert!(output.contains("FAIL"), "{output}");
        assert!(
            output.contains("run 1 row 0 response 1 differs"),
            "{output}"
        );
    }

    #[test]
    fn passing_combination_renders_one_line() {
        let mut reporter = ReporterBuilder::new().build(Vec::new());
        reporter
            .report_event(&SequencerEvent::CombinationFinished {
                plan: "tests/checkbox",
                outcome: &outcome(CombinationVerdict::Pass),
            })
            .unwrap();
        let output = String::from_utf8(reporter.writer).unwrap();
        assert_eq!(
            output,
            "    PASS [1.50s] voiceover.yml + safari + tests/checkbox (2/2 runs dispatched)\n",
        );
    }
}
