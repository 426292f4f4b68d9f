//! Daemon configuration.
//!
//! Every setting has a default and can be overridden from the process
//! environment; `main` applies CLI flags on top.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Top-level configuration for the daemon.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// TCP port for the HTTP front end.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Root directory holding one workspace per build.
    #[serde(default = "default_builds_dir")]
    pub builds_dir: PathBuf,

    /// Directory for per-build log files, kept outside the served tree.
    #[serde(default = "default_logs_dir")]
    pub logs_dir: PathBuf,

    /// Builder image every environment is created from.
    #[serde(default = "default_builder_image")]
    pub builder_image: String,

    /// Wall-clock budget for a single build.
    #[serde(default = "default_build_timeout")]
    pub build_timeout_seconds: u64,

    /// Builds allowed to run at once; the rest wait their turn.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_builds: usize,

    /// Interval between sweeps for orphaned environments.
    #[serde(default = "default_reaper_interval")]
    pub reaper_interval_seconds: u64,

    /// How long finished build records stay queryable.
    #[serde(default = "default_job_retention")]
    pub job_retention_seconds: u64,

    /// How long to wait for a build's output to drain after it exits.
    #[serde(default = "default_relay_grace")]
    pub relay_grace_seconds: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: default_port(),
            builds_dir: default_builds_dir(),
            logs_dir: default_logs_dir(),
            builder_image: default_builder_image(),
            build_timeout_seconds: default_build_timeout(),
            max_concurrent_builds: default_max_concurrent(),
            reaper_interval_seconds: default_reaper_interval(),
            job_retention_seconds: default_job_retention(),
            relay_grace_seconds: default_relay_grace(),
        }
    }
}

impl Config {
    /// Load from process environment variables, falling back to defaults.
    ///
    /// Reads `PORT`, `BUILDS_DIR`, `LOGS_DIR`, `BUILDER_IMAGE`,
    /// `BUILD_TIMEOUT`, `MAX_CONCURRENT_BUILDS`, `REAPER_INTERVAL`,
    /// `JOB_RETENTION` and `RELAY_GRACE` (durations in seconds).
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load using an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();
        if let Some(port) = parse_var(&lookup, "PORT")? {
            config.port = port;
        }
        if let Some(dir) = lookup("BUILDS_DIR").filter(|v| !v.is_empty()) {
            config.builds_dir = dir.into();
        }
        if let Some(dir) = lookup("LOGS_DIR").filter(|v| !v.is_empty()) {
            config.logs_dir = dir.into();
        }
        if let Some(image) = lookup("BUILDER_IMAGE").filter(|v| !v.is_empty()) {
            config.builder_image = image;
        }
        if let Some(secs) = parse_var(&lookup, "BUILD_TIMEOUT")? {
            config.build_timeout_seconds = secs;
        }
        if let Some(max) = parse_var(&lookup, "MAX_CONCURRENT_BUILDS")? {
            config.max_concurrent_builds = max;
        }
        if let Some(secs) = parse_var(&lookup, "REAPER_INTERVAL")? {
            config.reaper_interval_seconds = secs;
        }
        if let Some(secs) = parse_var(&lookup, "JOB_RETENTION")? {
            config.job_retention_seconds = secs;
        }
        if let Some(secs) = parse_var(&lookup, "RELAY_GRACE")? {
            config.relay_grace_seconds = secs;
        }
        config.validate()?;
        Ok(config)
    }

    /// Create a config from a JSON string (for testing).
    #[cfg(test)]
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json).context("Failed to parse JSON")?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            self.max_concurrent_builds > 0,
            "MAX_CONCURRENT_BUILDS must be at least 1"
        );
        anyhow::ensure!(self.build_timeout_seconds > 0, "BUILD_TIMEOUT must be at least 1");
        anyhow::ensure!(
            self.reaper_interval_seconds > 0,
            "REAPER_INTERVAL must be at least 1"
        );
        Ok(())
    }

    pub const fn build_timeout(&self) -> Duration {
        Duration::from_secs(self.build_timeout_seconds)
    }

    pub const fn reaper_interval(&self) -> Duration {
        Duration::from_secs(self.reaper_interval_seconds)
    }

    pub const fn job_retention(&self) -> Duration {
        Duration::from_secs(self.job_retention_seconds)
    }

    pub const fn relay_grace(&self) -> Duration {
        Duration::from_secs(self.relay_grace_seconds)
    }
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    lookup(key)
        .filter(|v| !v.trim().is_empty())
        .map(|v| v.trim().parse::<T>().with_context(|| format!("Invalid value for {key}: {v:?}")))
        .transpose()
}

const fn default_port() -> u16 {
    3000
}

fn default_builds_dir() -> PathBuf {
    "./builds".into()
}

fn default_logs_dir() -> PathBuf {
    "./logs".into()
}

fn default_builder_image() -> String {
    "react-native-builder:latest".into()
}

const fn default_build_timeout() -> u64 {
    3600
}

const fn default_max_concurrent() -> usize {
    4
}

const fn default_reaper_interval() -> u64 {
    300
}

const fn default_job_retention() -> u64 {
    86_400
}

const fn default_relay_grace() -> u64 {
    30
}
