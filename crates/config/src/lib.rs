#![deny(clippy::pedantic, unsafe_code)]
#![allow(clippy::module_name_repetitions)]

//! Configuration management for kiln
//!
//! This crate handles loading and merging configuration from:
//! - Default values (hard-coded)
//! - Configuration file (~/.config/kiln/config.toml)
//! - Environment variables
//! - CLI flags (applied by the CLI itself)

pub mod constants;

use kiln_errors::{ConfigError, Error};
use kiln_types::{ColorChoice, EmptyGlobPolicy, OutputFormat};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,

    #[serde(default)]
    pub build: BuildConfig,

    #[serde(default)]
    pub paths: PathConfig,
}

/// General configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    #[serde(default = "default_output_format")]
    pub default_output: OutputFormat,
    #[serde(default = "default_color_choice")]
    pub color: ColorChoice,
}

/// Build configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildConfig {
    /// Policy for copy and permission patterns that match nothing
    #[serde(default)]
    pub empty_glob: EmptyGlobPolicy,
    /// Default per-command timeout in seconds (0 = none)
    #[serde(default)]
    pub step_timeout: u64,
    /// Whole-sequence timeout in seconds (0 = none)
    #[serde(default)]
    pub sequence_timeout: u64,
    /// Shell interpreting run-command lines
    #[serde(default = "default_shell")]
    pub shell: String,
    /// Directory seeding the image filesystem before the first step
    #[serde(default)]
    pub base_rootfs: Option<PathBuf>,
}

/// Path configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PathConfig {
    pub output_dir: Option<PathBuf>,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            default_output: OutputFormat::Tty,
            color: ColorChoice::Auto,
        }
    }
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            empty_glob: EmptyGlobPolicy::Fail,
            step_timeout: 0,
            sequence_timeout: 0,
            shell: default_shell(),
            base_rootfs: None,
        }
    }
}

fn default_output_format() -> OutputFormat {
    OutputFormat::Tty
}

fn default_color_choice() -> ColorChoice {
    ColorChoice::Auto
}

fn default_shell() -> String {
    constants::DEFAULT_SHELL.to_string()
}

impl BuildConfig {
    /// Per-command timeout, `None` when disabled
    #[must_use]
    pub fn step_timeout(&self) -> Option<u64> {
        (self.step_timeout > 0).then_some(self.step_timeout)
    }

    /// Whole-sequence timeout, `None` when disabled
    #[must_use]
    pub fn sequence_timeout(&self) -> Option<u64> {
        (self.sequence_timeout > 0).then_some(self.sequence_timeout)
    }
}

impl Config {
    /// Get the default config file path
    ///
    /// # Errors
    ///
    /// Returns an error if the system config directory cannot be determined.
    pub fn default_path() -> Result<PathBuf, Error> {
        let config_dir = dirs::config_dir().ok_or_else(|| ConfigError::NotFound {
            path: "config directory".to_string(),
        })?;
        Ok(config_dir.join("kiln").join("config.toml"))
    }

    /// Directory receiving debug log files
    #[must_use]
    pub fn logs_dir() -> PathBuf {
        dirs::cache_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("kiln")
            .join("logs")
    }

    /// Load configuration from file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or does not parse.
    pub async fn load_from_file(path: &Path) -> Result<Self, Error> {
        let contents = fs::read_to_string(path)
            .await
            .map_err(|_| ConfigError::NotFound {
                path: path.display().to_string(),
            })?;

        toml::from_str(&contents)
            .map_err(|e| ConfigError::ParseError {
                message: e.to_string(),
            })
            .map_err(Into::into)
    }

    /// Load configuration with fallback to defaults
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration file exists but cannot be read
    /// or parsed.
    pub async fn load() -> Result<Self, Error> {
        let config_path = Self::default_path()?;

        if config_path.exists() {
            Self::load_from_file(&config_path).await
        } else {
            tracing::debug!(path = %config_path.display(), "no config file, using defaults");
            Ok(Self::default())
        }
    }

    /// Load configuration from an explicit path, or the default location
    ///
    /// # Errors
    ///
    /// Returns an error if the config file cannot be read or parsed
    pub async fn load_or_default(path: Option<&Path>) -> Result<Self, Error> {
        match path {
            Some(config_path) => Self::load_from_file(config_path).await,
            None => Self::load().await,
        }
    }

    /// Merge with environment variables
    ///
    /// # Errors
    ///
    /// Returns an error if an environment variable holds an invalid value.
    pub fn merge_env(&mut self) -> Result<(), Error> {
        self.merge_vars(|key| std::env::var(key).ok())
    }

    /// Merge values from a variable lookup (environment or a test double)
    ///
    /// # Errors
    ///
    /// Returns an error if a variable holds an invalid value.
    pub fn merge_vars<F>(&mut self, lookup: F) -> Result<(), Error>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(output) = lookup(constants::ENV_OUTPUT) {
            self.general.default_output = match output.as_str() {
                "plain" => OutputFormat::Plain,
                "tty" => OutputFormat::Tty,
                "json" => OutputFormat::Json,
                _ => return Err(invalid(constants::ENV_OUTPUT, output)),
            };
        }

        if let Some(color) = lookup(constants::ENV_COLOR) {
            self.general.color = match color.as_str() {
                "always" => ColorChoice::Always,
                "auto" => ColorChoice::Auto,
                "never" => ColorChoice::Never,
                _ => return Err(invalid(constants::ENV_COLOR, color)),
            };
        }

        if let Some(policy) = lookup(constants::ENV_EMPTY_GLOB) {
            self.build.empty_glob = policy
                .parse()
                .map_err(|_| invalid(constants::ENV_EMPTY_GLOB, policy))?;
        }

        if let Some(seconds) = lookup(constants::ENV_STEP_TIMEOUT) {
            self.build.step_timeout = seconds
                .parse()
                .map_err(|_| invalid(constants::ENV_STEP_TIMEOUT, seconds))?;
        }

        if let Some(seconds) = lookup(constants::ENV_SEQUENCE_TIMEOUT) {
            self.build.sequence_timeout = seconds
                .parse()
                .map_err(|_| invalid(constants::ENV_SEQUENCE_TIMEOUT, seconds))?;
        }

        if let Some(shell) = lookup(constants::ENV_SHELL) {
            if shell.trim().is_empty() {
                return Err(invalid(constants::ENV_SHELL, shell));
            }
            self.build.shell = shell;
        }

        Ok(())
    }

    /// Get the output directory (with default)
    #[must_use]
    pub fn output_dir(&self) -> PathBuf {
        self.paths
            .output_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from(constants::DEFAULT_OUTPUT_DIR))
    }
}

fn invalid(field: &str, value: String) -> Error {
    ConfigError::InvalidValue {
        field: field.to_string(),
        value,
    }
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.build.empty_glob, EmptyGlobPolicy::Fail);
        assert_eq!(config.build.shell, "/bin/sh");
        assert_eq!(config.build.step_timeout(), None);
        assert_eq!(config.output_dir(), PathBuf::from("kiln-out"));
    }

    #[test]
    fn test_timeouts_enabled_when_positive() {
        let mut config = Config::default();
        config.build.step_timeout = 30;
        config.build.sequence_timeout = 600;
        assert_eq!(config.build.step_timeout(), Some(30));
        assert_eq!(config.build.sequence_timeout(), Some(600));
    }
}
