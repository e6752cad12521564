#![deny(clippy::pedantic, unsafe_code)]
#![allow(clippy::module_name_repetitions)]

//! Core type definitions for kiln
//!
//! This crate provides the value types shared by the builder, the event
//! system and the CLI: build steps, file modes, image descriptors and the
//! small enums that drive output rendering.

pub mod image;
pub mod reports;
pub mod step;

pub use image::ImageDescriptor;
pub use reports::BuildReport;
pub use step::{BuildStep, FileMode, StepKind};

use kiln_errors::ConfigError;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Output format for CLI commands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Plain,
    Tty,
    Json,
}

impl Default for OutputFormat {
    fn default() -> Self {
        Self::Tty
    }
}

/// Color output choice
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColorChoice {
    Always,
    Auto,
    Never,
}

impl clap::ValueEnum for ColorChoice {
    fn value_variants<'a>() -> &'a [Self] {
        &[Self::Always, Self::Auto, Self::Never]
    }

    fn to_possible_value(&self) -> Option<clap::builder::PossibleValue> {
        Some(match self {
            Self::Always => clap::builder::PossibleValue::new("always"),
            Self::Auto => clap::builder::PossibleValue::new("auto"),
            Self::Never => clap::builder::PossibleValue::new("never"),
        })
    }
}

impl Default for ColorChoice {
    fn default() -> Self {
        Self::Auto
    }
}

/// What to do when a copy or permission pattern matches no files
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmptyGlobPolicy {
    /// Zero matches is a `SourceNotFound` failure
    Fail,
    /// Zero matches is a no-op
    Ignore,
}

impl Default for EmptyGlobPolicy {
    fn default() -> Self {
        Self::Fail
    }
}

impl FromStr for EmptyGlobPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fail" => Ok(Self::Fail),
            "ignore" => Ok(Self::Ignore),
            _ => Err(ConfigError::InvalidValue {
                field: "empty_glob".to_string(),
                value: s.to_string(),
            }),
        }
    }
}

impl std::fmt::Display for EmptyGlobPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Fail => write!(f, "fail"),
            Self::Ignore => write!(f, "ignore"),
        }
    }
}

impl clap::ValueEnum for EmptyGlobPolicy {
    fn value_variants<'a>() -> &'a [Self] {
        &[Self::Fail, Self::Ignore]
    }

    fn to_possible_value(&self) -> Option<clap::builder::PossibleValue> {
        Some(match self {
            Self::Fail => clap::builder::PossibleValue::new("fail"),
            Self::Ignore => clap::builder::PossibleValue::new("ignore"),
        })
    }
}

/// Terminal and non-terminal states of a build sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SequenceState {
    Running,
    Succeeded,
    Failed,
}

impl std::fmt::Display for SequenceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
        }
    }
}
