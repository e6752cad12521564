//! Image build error types

use std::borrow::Cow;

use crate::UserFacingError;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[non_exhaustive]
pub enum BuildError {
    #[error("path not found in image: {path}")]
    PathNotFound { path: String },

    #[error("no files match {pattern}")]
    SourceNotFound { pattern: String },

    #[error("command `{command}` {}", describe_exit(.exit_code))]
    StepExecution {
        command: String,
        exit_code: Option<i32>,
    },

    #[error("dependency manifest not found in image: {path}")]
    ManifestMissing { path: String },

    #[error("dependency installation from {manifest} failed: `{command}` {}", describe_exit(.exit_code))]
    ManifestInstallFailed {
        manifest: String,
        command: String,
        exit_code: Option<i32>,
    },

    #[error("failed to start `{command}`: {message}")]
    SpawnFailed { command: String, message: String },

    #[error("command `{command}` timed out after {seconds} seconds")]
    StepTimeout { command: String, seconds: u64 },

    #[error("build timeout after {seconds} seconds")]
    Timeout { seconds: u64 },

    #[error("recipe error: {message}")]
    RecipeError { message: String },

    #[error("invalid path: {path} - {reason}")]
    InvalidPath { path: String, reason: String },

    #[error("invalid file mode: {mode}")]
    InvalidMode { mode: String },

    #[error("invalid file mode: {value} (YAML read an unquoted number; quote octal modes, e.g. mode: \"0755\")")]
    UnquotedMode { value: u32 },

    #[error("failed to finalize image: {message}")]
    FinalizeFailed { message: String },
}

#[allow(clippy::ref_option)]
fn describe_exit(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exited with status {code}"),
        None => "was terminated by a signal".to_string(),
    }
}

impl BuildError {
    /// Whether this error came from a command returning a non-zero status.
    ///
    /// Manifest installation failures are a specialization of step execution
    /// failures and report `true` as well.
    #[must_use]
    pub fn is_step_execution(&self) -> bool {
        matches!(
            self,
            Self::StepExecution { .. } | Self::ManifestInstallFailed { .. }
        )
    }

    /// Exit status of the failed command, when the error carries one.
    #[must_use]
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            Self::StepExecution { exit_code, .. }
            | Self::ManifestInstallFailed { exit_code, .. } => *exit_code,
            _ => None,
        }
    }
}

impl UserFacingError for BuildError {
    fn user_message(&self) -> Cow<'_, str> {
        Cow::Owned(self.to_string())
    }

    fn user_hint(&self) -> Option<&'static str> {
        match self {
            Self::PathNotFound { .. } => {
                Some("Create the directory with an earlier `mkdir` step before using it.")
            }
            Self::SourceNotFound { .. } => Some(
                "Check the pattern against the source tree, or set `allow_empty: true` on the step.",
            ),
            Self::ManifestMissing { .. } => {
                Some("Copy the dependency manifest into the image before the install step.")
            }
            Self::StepTimeout { .. } | Self::Timeout { .. } => {
                Some("Increase the timeout in the recipe or configuration, then rebuild.")
            }
            Self::RecipeError { .. }
            | Self::InvalidPath { .. }
            | Self::InvalidMode { .. }
            | Self::UnquotedMode { .. } => {
                Some("Correct the recipe definition before retrying the build.")
            }
            _ => None,
        }
    }

    fn is_retryable(&self) -> bool {
        matches!(self, Self::StepTimeout { .. } | Self::Timeout { .. })
    }

    fn user_code(&self) -> Option<&'static str> {
        let code = match self {
            Self::PathNotFound { .. } => "build.path_not_found",
            Self::SourceNotFound { .. } => "build.source_not_found",
            Self::StepExecution { .. } => "build.step_execution",
            Self::ManifestMissing { .. } => "build.manifest_missing",
            Self::ManifestInstallFailed { .. } => "build.manifest_install_failed",
            Self::SpawnFailed { .. } => "build.spawn_failed",
            Self::StepTimeout { .. } => "build.step_timeout",
            Self::Timeout { .. } => "build.timeout",
            Self::RecipeError { .. } => "build.recipe_error",
            Self::InvalidPath { .. } => "build.invalid_path",
            Self::InvalidMode { .. } | Self::UnquotedMode { .. } => "build.invalid_mode",
            Self::FinalizeFailed { .. } => "build.finalize_failed",
        };
        Some(code)
    }
}
