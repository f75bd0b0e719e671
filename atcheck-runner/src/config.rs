// Copyright (c) The atcheck Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration for an atcheck run, loaded from a TOML file.

use crate::{errors::ConfigReadError, matrix::{Browser, TestMatrix}};
use camino::Utf8Path;
use indexmap::IndexMap;
use serde::Deserialize;
use std::time::Duration;

/// Top-level configuration.
///
/// ```toml
/// plans = ["tests/checkbox", "tests/menu"]
/// runs-per-combination = 2
/// idle-window = "30s"
///
/// [matrix]
/// "voiceover.yml" = ["safari", "chrome"]
/// "nvda.yml" = ["firefox", "chrome"]
///
/// [github]
/// owner = "example"
/// repo = "at-harness"
/// ```
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct AtcheckConfig {
    /// Workflow → browsers map, in the order combinations should run.
    pub matrix: IndexMap<String, Vec<Browser>>,
    /// Test plan identifiers, processed strictly one at a time.
    pub plans: Vec<String>,
    /// How many times each combination is repeated.
    #[serde(default = "default_runs_per_combination")]
    pub runs_per_combination: usize,
    /// Idle window after which a silent run is declared complete.
    #[serde(default = "default_idle_window", with = "humantime_serde")]
    pub idle_window: Duration,
    /// How many combinations of one plan may be in flight at once.
    #[serde(default = "default_plan_concurrency")]
    pub plan_concurrency: usize,
    /// Local port for the callback listener; 0 picks an ephemeral port.
    #[serde(default)]
    pub listener_port: u16,
    /// How the listener is exposed to the public internet.
    #[serde(default)]
    pub tunnel: TunnelConfig,
    /// The GitHub repository hosting the workflows.
    pub github: GitHubConfig,
}

fn default_runs_per_combination() -> usize {
    2
}

fn default_idle_window() -> Duration {
    Duration::from_secs(30)
}

fn default_plan_concurrency() -> usize {
    // Effectively unbounded: within one plan all combinations may run
    // concurrently. Plans themselves are serialized by the sequencer.
    64
}

/// Tunnel provider selection.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case", tag = "mode")]
pub enum TunnelConfig {
    /// Spawn a local ngrok process.
    #[default]
    Ngrok,
    /// Use a preconfigured public base URL (existing ingress).
    Static {
        /// The public base URL routed to the listener.
        #[serde(rename = "base-url")]
        base_url: String,
    },
}

/// Coordinates of the repository whose workflows get dispatched.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct GitHubConfig {
    /// Repository owner.
    pub owner: String,
    /// Repository name.
    pub repo: String,
    /// The git ref workflows run at.
    #[serde(default = "default_git_ref")]
    pub git_ref: String,
}

fn default_git_ref() -> String {
    "main".to_owned()
}

impl AtcheckConfig {
    /// Reads and validates the configuration at `path`.
    pub fn from_file(path: &Utf8Path) -> Result<Self, ConfigReadError> {
        let raw = std::fs::read_to_string(path).map_err(|err| ConfigReadError::Read {
            path: path.to_owned(),
            err,
        })?;
        let config: AtcheckConfig =
            toml::from_str(&raw).map_err(|err| ConfigReadError::Parse {
                path: path.to_owned(),
                err,
            })?;
        config.validate(path)?;
        Ok(config)
    }

    fn validate(&self, path: &Utf8Path) -> Result<(), ConfigReadError> {
        let invalid = |reason: &str| ConfigReadError::Invalid {
            path: path.to_owned(),
            reason: reason.to_owned(),
        };
        if self.test_matrix().is_empty() {
            return Err(invalid("matrix has no (workflow, browser) pairs"));
        }
        if self.plans.is_empty() {
            return Err(invalid("no test plans listed"));
        }
        if self.runs_per_combination == 0 {
            return Err(invalid("runs-per-combination must be at least 1"));
        }
        if self.plan_concurrency == 0 {
            return Err(invalid("plan-concurrency must be at least 1"));
        }
        Ok(())
    }

    /// The matrix as an enumerable [`TestMatrix`].
    pub fn test_matrix(&self) -> TestMatrix {
        TestMatrix::new(self.matrix.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const SAMPLE: &str = r#"
        plans = ["tests/checkbox"]

        [matrix]
        "voiceover.yml" = ["safari"]
        "nvda.yml" = ["firefox", "chrome"]

        [github]
        owner = "example"
        repo = "at-harness"
    "#;

    #[test]
    fn sample_config_parses_with_defaults() {
        let config: AtcheckConfig = toml::from_str(SAMPLE).unwrap();
        assert_eq!(config.runs_per_combination, 2);
        assert_eq!(config.idle_window, Duration::from_secs(30));
        assert_eq!(config.listener_port, 0);
        assert_eq!(config.github.git_ref, "main");
        assert!(matches!(config.tunnel, TunnelConfig::Ngrok));
        assert_eq!(config.test_matrix().pair_count(), 3);
    }

    #[test]
    fn idle_window_accepts_humantime() {
        let raw = format!("idle-window = \"2m 30s\"\n{SAMPLE}");
        let config: AtcheckConfig = toml::from_str(&raw).unwrap();
        assert_eq!(config.idle_window, Duration::from_secs(150));
    }

    #[test]
    fn static_tunnel_config_parses() {
        let raw = format!(
            "{SAMPLE}\n[tunnel]\nmode = \"static\"\nbase-url = \"https://cb.example.test\"\n"
        );
        let config: AtcheckConfig = toml::from_str(&raw).unwrap();
        match config.tunnel {
            TunnelConfig::Static { base_url } => {
                assert_eq!(base_url, "https://cb.example.test");
            }
            other => panic!("expected static tunnel, got {other:?}"),
        }
    }

    #[test]
    fn empty_matrix_is_invalid() {
        let raw = r#"
            plans = ["p"]
            [matrix]
            [github]
            owner = "o"
            repo = "r"
        "#;
        let config: AtcheckConfig = toml::from_str(raw).unwrap();
        let err = config.validate(Utf8Path::new("atcheck.toml")).unwrap_err();
        assert!(err.to_string().contains("invalid config"));
    }
}
