use serde::{Deserialize, Serialize};

use crate::EventSource;
use kiln_errors::UserFacingError;

/// Structured failure information carried by failure events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureContext {
    /// Stable error code
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    /// Short user-facing message
    pub message: String,
    /// Optional remediation hint
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
    pub retryable: bool,
}

impl FailureContext {
    #[must_use]
    pub fn new(
        code: Option<impl Into<String>>,
        message: impl Into<String>,
        hint: Option<impl Into<String>>,
        retryable: bool,
    ) -> Self {
        Self {
            code: code.map(Into::into),
            message: message.into(),
            hint: hint.map(Into::into),
            retryable,
        }
    }

    /// Build failure context from a `UserFacingError` implementation.
    #[must_use]
    pub fn from_error<E: UserFacingError + ?Sized>(error: &E) -> Self {
        Self::new(
            error.user_code(),
            error.user_message().into_owned(),
            error.user_hint(),
            error.is_retryable(),
        )
    }
}

pub mod build;
pub mod general;

pub use build::*;
pub use general::*;

/// Top-level application event
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "domain", content = "event", rename_all = "snake_case")]
pub enum AppEvent {
    /// Warnings, errors and debug output
    General(GeneralEvent),

    /// Build sequence progress
    Build(BuildEvent),
}

impl AppEvent {
    #[must_use]
    pub fn event_source(&self) -> EventSource {
        match self {
            Self::General(_) => EventSource::GENERAL,
            Self::Build(_) => EventSource::BUILD,
        }
    }

    /// Determine the tracing level for this event
    #[must_use]
    pub fn log_level(&self) -> tracing::Level {
        use tracing::Level;

        match self {
            Self::General(GeneralEvent::Error { .. } | GeneralEvent::OperationFailed { .. })
            | Self::Build(BuildEvent::StepFailed { .. } | BuildEvent::SessionFailed { .. }) => {
                Level::ERROR
            }
            Self::General(GeneralEvent::Warning { .. }) => Level::WARN,
            Self::General(GeneralEvent::DebugLog { .. })
            | Self::Build(BuildEvent::StepOutput { .. }) => Level::DEBUG,
            _ => Level::INFO,
        }
    }

    /// Log target for structured logging
    #[must_use]
    pub fn log_target(&self) -> &'static str {
        match self {
            Self::General(_) => "kiln::events::general",
            Self::Build(_) => "kiln::events::build",
        }
    }

    /// Build session this event belongs to, if any
    #[must_use]
    pub fn session_id(&self) -> Option<&str> {
        match self {
            Self::Build(event) => Some(event.session_id()),
            Self::General(_) => None,
        }
    }
}
