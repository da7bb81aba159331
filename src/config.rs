use crate::core::{LinkError, Result, Role};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const ENV_SWEEP_INTERVAL_MS: &str = "LINKKEEPER_SWEEP_INTERVAL_MS";
pub const ENV_SWEEP_ON_START: &str = "LINKKEEPER_SWEEP_ON_START";
pub const ENV_VERBOSE: &str = "LINKKEEPER_VERBOSE";

/// Operator-facing settings for the consistency engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcilerConfig {
    /// Time between reconciliation sweeps, in milliseconds
    pub sweep_interval_ms: u64,

    /// Run one sweep as soon as the engine starts
    pub sweep_on_start: bool,

    /// Log non-essential progress lines at info instead of debug
    pub verbose: bool,

    /// Account role whose instances participate in cascade
    pub linked_role: Role,
}

impl ReconcilerConfig {
    pub fn new() -> Self {
        Self {
            sweep_interval_ms: 10 * 60 * 1000, // 10 minutes
            sweep_on_start: true,
            verbose: false,
            linked_role: Role::Student,
        }
    }

    /// Set the sweep interval
    pub fn sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval_ms = interval.as_millis().min(u64::MAX as u128) as u64;
        self
    }

    /// Enable or disable the startup sweep
    pub fn sweep_on_start(mut self, enabled: bool) -> Self {
        self.sweep_on_start = enabled;
        self
    }

    /// Set verbose logging
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Set the role that links Accounts to Profiles
    pub fn linked_role(mut self, role: Role) -> Self {
        self.linked_role = role;
        self
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }

    /// Defaults overlaid with `LINKKEEPER_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overlaid with whatever `lookup` returns for the
    /// `LINKKEEPER_*` keys.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::new();

        if let Some(raw) = lookup(ENV_SWEEP_INTERVAL_MS) {
            config.sweep_interval_ms = raw.trim().parse().map_err(|_| {
                LinkError::InvalidConfig(format!("{} must be an integer, got '{}'", ENV_SWEEP_INTERVAL_MS, raw))
            })?;
        }
        if let Some(raw) = lookup(ENV_SWEEP_ON_START) {
            config.sweep_on_start = parse_flag(ENV_SWEEP_ON_START, &raw)?;
        }
        if let Some(raw) = lookup(ENV_VERBOSE) {
            config.verbose = parse_flag(ENV_VERBOSE, &raw)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.sweep_interval_ms == 0 {
            return Err(LinkError::InvalidConfig(
                "sweep_interval_ms must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_flag(key: &str, raw: &str) -> Result<bool> {
    match raw.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(LinkError::InvalidConfig(format!(
            "{} must be a boolean, got '{}'",
            key, raw
        ))),
    }
}
