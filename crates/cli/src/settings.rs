//! Layered settings
//!
//! Precedence, lowest first: built-in defaults, the TOML file (`--config`, or
//! `ferry.toml` in the platform config dir when present), `FERRY_*`
//! environment variables with `__` between sections
//! (`FERRY_RUNNER__MAX_CONCURRENCY=8`), then command-line flags.

use anyhow::{bail, Context, Result};
use config::{Config, Environment, File};
use directories::ProjectDirs;
use ferry_core::application::runner::RunnerConfig;
use ferry_core::BatchOptions;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const CONFIG_FILE_NAME: &str = "ferry.toml";
const ENV_PREFIX: &str = "FERRY";

/// Simulated upload-part workload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Parts in the initial batch
    pub units: usize,
    /// Probability that one attempt fails, in [0, 1]
    pub failure_rate: f64,
    /// Upper bound of the random per-attempt latency
    pub max_latency_ms: u64,
    /// Parts inserted into the running batch
    pub insert: usize,
    /// Delay before the mid-flight insertion
    pub insert_after_ms: u64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            units: 30,
            failure_rate: 0.2,
            max_latency_ms: 500,
            insert: 0,
            insert_after_ms: 100,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub runner: RunnerConfig,
    pub batch: BatchOptions,
    pub simulation: SimulationConfig,
}

impl Settings {
    /// Load settings from file and environment; missing keys take their
    /// serde defaults
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();

        match explicit {
            Some(path) => {
                builder = builder.add_source(File::from(path).required(true));
            }
            None => {
                if let Some(path) = default_config_path() {
                    builder = builder.add_source(File::from(path).required(false));
                }
            }
        }

        let settings: Settings = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to read settings")?
            .try_deserialize()
            .context("Invalid settings")?;

        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        self.runner
            .validate()
            .context("Invalid runner settings")?;
        ferry_core::application::batch::validate_options(&self.batch)
            .context("Invalid batch settings")?;
        if !(0.0..=1.0).contains(&self.simulation.failure_rate) {
            bail!(
                "simulation.failure_rate must be within [0, 1], got {}",
                self.simulation.failure_rate
            );
        }
        Ok(())
    }
}

/// `<config dir>/ferry.toml` for the current platform
pub fn default_config_path() -> Option<PathBuf> {
    ProjectDirs::from("dev", "ferry", "ferry").map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferry_core::application::batch::FailurePolicy;
    use std::io::Write;

    fn write_config(name: &str, body: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("ferry_settings_{}_{}.toml", name, std::process::id()));
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(body.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_defaults_are_valid() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.runner.max_concurrency, 5);
        assert_eq!(settings.batch.retries, 0);
    }

    #[test]
    fn test_load_from_file() {
        let path = write_config(
            "file",
            r#"
[runner]
max_concurrency = 3

[batch]
retries = 2
on_failure = "drain_all"

[simulation]
units = 12
"#,
        );

        let settings = Settings::load(Some(&path)).unwrap();
        assert_eq!(settings.runner.max_concurrency, 3);
        assert_eq!(settings.batch.retries, 2);
        assert_eq!(settings.batch.on_failure, FailurePolicy::DrainAll);
        assert_eq!(settings.simulation.units, 12);
        assert_eq!(settings.simulation.max_latency_ms, 500);

        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let path = write_config("zero", "[runner]\nmax_concurrency = 0\n");

        let err = Settings::load(Some(&path)).unwrap_err();
        assert!(format!("{:#}", err).contains("Invalid max concurrency"));

        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn test_failure_rate_out_of_range() {
        let mut settings = Settings::default();
        settings.simulation.failure_rate = 1.5;

        let err = settings.validate().unwrap_err();
        assert!(err.to_string().contains("failure_rate"));
    }

    #[test]
    fn test_missing_explicit_file_is_error() {
        let path = std::env::temp_dir().join("ferry_settings_does_not_exist.toml");
        assert!(Settings::load(Some(&path)).is_err());
    }
}
