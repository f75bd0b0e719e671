// Copyright (c) The atcheck Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Argument parsing and command execution.

use crate::{
    errors::{ExpectedError, exit_codes},
    output::{OutputContext, OutputOpts},
};
use atcheck_runner::{
    config::{AtcheckConfig, TunnelConfig},
    dispatch::GitHubDispatcher,
    errors::TunnelError,
    listener::CallbackListener,
    registry::CallbackRegistry,
    reporter::ReporterBuilder,
    sequencer::{PlanSequencer, SequencerOpts},
    signal::SignalHandlerKind,
    tunnel::{NgrokTunnel, StaticTunnel, TunnelProvider},
};
use camino::{Utf8Path, Utf8PathBuf};
use clap::{Args, Parser, Subcommand};
use std::{num::NonZeroUsize, time::Duration};
use tracing::{info, warn};

/// The environment variable holding the workflow dispatch token.
const GITHUB_TOKEN_VAR: &str = "ATCHECK_GITHUB_TOKEN";

/// The atcheck command-line app.
#[derive(Debug, Parser)]
#[command(
    name = "atcheck",
    version,
    about = "Dispatch repeated assistive-technology test runs and verify they agree"
)]
pub struct AtcheckApp {
    #[command(flatten)]
    output: OutputOpts,

    #[command(subcommand)]
    command: Command,
}

impl AtcheckApp {
    /// Executes the selected command, returning the process exit code.
    pub fn exec(self) -> Result<i32, ExpectedError> {
        let ctx = self.output.init();
        match self.command {
            Command::Run(opts) => run_command(opts, ctx),
            Command::CheckConfig { config } => check_config_command(&config),
        }
    }
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Dispatch the full matrix and verify run-to-run consistency
    Run(RunOpts),
    /// Load and validate a config file without dispatching anything
    CheckConfig {
        /// Path to the atcheck config
        #[arg(long, value_name = "PATH", default_value = "atcheck.toml")]
        config: Utf8PathBuf,
    },
}

#[derive(Debug, Args)]
#[command(next_help_heading = "Run options")]
struct RunOpts {
    /// Path to the atcheck config
    #[arg(long, value_name = "PATH", default_value = "atcheck.toml")]
    config: Utf8PathBuf,

    /// Repeats per combination (overrides the config)
    #[arg(long, value_name = "N")]
    runs: Option<NonZeroUsize>,

    /// Idle window after which a silent run settles, e.g. "45s" (overrides
    /// the config)
    #[arg(long, value_name = "DURATION", value_parser = humantime::parse_duration)]
    idle_window: Option<Duration>,

    /// Combinations of one plan in flight at once (overrides the config)
    #[arg(long, value_name = "N")]
    plan_concurrency: Option<NonZeroUsize>,

    /// Local port for the callback listener, 0 picks an ephemeral one
    /// (overrides the config)
    #[arg(long, value_name = "PORT")]
    listener_port: Option<u16>,
}

impl RunOpts {
    fn apply_overrides(&self, config: &mut AtcheckConfig) {
        if let Some(runs) = self.runs {
            config.runs_per_combination = runs.get();
        }
        if let Some(idle_window) = self.idle_window {
            config.idle_window = idle_window;
        }
        if let Some(plan_concurrency) = self.plan_concurrency {
            config.plan_concurrency = plan_concurrency.get();
        }
        if let Some(listener_port) = self.listener_port {
            config.listener_port = listener_port;
        }
    }
}

fn run_command(opts: RunOpts, ctx: OutputContext) -> Result<i32, ExpectedError> {
    let mut config = AtcheckConfig::from_file(&opts.config)?;
    opts.apply_overrides(&mut config);

    let token = std::env::var(GITHUB_TOKEN_VAR).map_err(|_| ExpectedError::MissingToken {
        var: GITHUB_TOKEN_VAR,
    })?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("atcheck-worker")
        .build()
        .map_err(|err| ExpectedError::RuntimeCreate { err })?;
    runtime.block_on(run_impl(config, token, ctx))
}

async fn run_impl(
    config: AtcheckConfig,
    token: String,
    ctx: OutputContext,
) -> Result<i32, ExpectedError> {
    let registry = CallbackRegistry::new();
    let listener = CallbackListener::bind(config.listener_port, registry.clone()).await?;
    info!(port = listener.local_port(), "callback listener bound");

    let mut tunnel = AnyTunnel::from_config(&config.tunnel);
    let base_url = tunnel.open_tunnel(listener.local_port()).await?;
    let callback_url = format!("{base_url}/callback");
    info!(%callback_url, "callback endpoint exposed");

    let dispatcher = GitHubDispatcher::new(
        config.github.owner.clone(),
        config.github.repo.clone(),
        token,
    );
    let mut signal_handler = SignalHandlerKind::Standard.build()?;

    let matrix = config.test_matrix();
    let sequencer = PlanSequencer::new(
        &dispatcher,
        &registry,
        SequencerOpts {
            runs_per_combination: config.runs_per_combination,
            idle_window: config.idle_window,
            plan_concurrency: config.plan_concurrency,
            git_ref: config.github.git_ref.clone(),
            callback_url,
        },
    );

    let mut builder = ReporterBuilder::new();
    builder.set_colorize(ctx.color.should_colorize(supports_color::Stream::Stderr));
    let mut reporter = builder.build(std::io::stderr());

    // Race the sequencer against shutdown signals. The reporter borrow ends
    // with this block so the summary below can use it again.
    let outcome = {
        let mut run_fut = std::pin::pin!(sequencer.run(&matrix, &config.plans, |event| {
            // Reporting failures mustn't abort the run.
            let _ = reporter.report_event(&event);
        }));
        let mut signals_done = false;
        loop {
            tokio::select! {
                verdict = &mut run_fut => break Ok(verdict),
                event = signal_handler.recv(), if !signals_done => {
                    match event {
                        Some(event) => break Err(event),
                        None => signals_done = true,
                    }
                }
            }
        }
    };

    tunnel.close().await;

    match outcome {
        Ok(verdict) => {
            let _ = reporter.report_summary(&verdict);
            if verdict.passed() {
                Ok(exit_codes::OK)
            } else {
                Ok(exit_codes::CHECK_FAILED)
            }
        }
        Err(event) => {
            warn!(?event, "run interrupted before completion");
            let _ = reporter.report_interrupted();
            Ok(exit_codes::INTERRUPTED)
        }
    }
}

fn check_config_command(path: &Utf8Path) -> Result<i32, ExpectedError> {
    let config = AtcheckConfig::from_file(path)?;
    let matrix = config.test_matrix();
    println!(
        "config at `{path}` is valid: {} combinations per plan, {} plans, {} runs each",
        matrix.pair_count(),
        config.plans.len(),
        config.runs_per_combination,
    );
    Ok(exit_codes::OK)
}

/// The configured tunnel provider. [`TunnelProvider`] isn't dyn-compatible,
/// so the selection is dispatched through an enum.
#[derive(Debug)]
enum AnyTunnel {
    Ngrok(NgrokTunnel),
    Static(StaticTunnel),
}

impl AnyTunnel {
    fn from_config(config: &TunnelConfig) -> Self {
        match config {
            TunnelConfig::Ngrok => Self::Ngrok(NgrokTunnel::new()),
            TunnelConfig::Static { base_url } => Self::Static(StaticTunnel::new(base_url.clone())),
        }
    }

    async fn open_tunnel(&mut self, local_port: u16) -> Result<String, TunnelError> {
        match self {
            Self::Ngrok(tunnel) => tunnel.open_tunnel(local_port).await,
            Self::Static(tunnel) => tunnel.open_tunnel(local_port).await,
        }
    }

    async fn close(&mut self) {
        match self {
            Self::Ngrok(tunnel) => tunnel.close().await,
            Self::Static(tunnel) => tunnel.close().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use pretty_assertions::assert_eq;

    #[test]
    fn verify_app() {
        AtcheckApp::command().debug_assert();
    }

    #[test]
    fn run_args_parse() {
        let app = AtcheckApp::try_parse_from([
            "atcheck",
            "run",
            "--config",
            "custom.toml",
            "--runs",
            "3",
            "--idle-window",
            "45s",
        ])
        .unwrap();
        let Command::Run(opts) = app.command else {
            panic!("expected run command");
        };
        assert_eq!(opts.config, "custom.toml");
        assert_eq!(opts.runs.map(NonZeroUsize::get), Some(3));
        assert_eq!(opts.idle_window, Some(Duration::from_secs(45)));
        assert_eq!(opts.plan_concurrency, None);
    }

    #[test]
    fn zero_runs_are_rejected_at_parse_time() {
        let result = AtcheckApp::try_parse_from(["atcheck", "run", "--runs", "0"]);
        assert!(result.is_err());
    }
}
