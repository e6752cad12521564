use super::FailureContext;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Image build events, one stream per build session
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum BuildEvent {
    /// Sequence started against a base image
    SessionStarted {
        session_id: String,
        image: String,
        base_image: String,
        total_steps: usize,
    },

    /// A step began executing
    StepStarted {
        session_id: String,
        index: usize,
        kind: String,
        description: String,
    },

    /// A line of command output
    StepOutput {
        session_id: String,
        index: usize,
        line: String,
        is_stderr: bool,
    },

    /// A step finished successfully
    StepCompleted {
        session_id: String,
        index: usize,
        kind: String,
        duration: Duration,
    },

    /// A step failed; no later step will run
    StepFailed {
        session_id: String,
        index: usize,
        kind: String,
        failure: FailureContext,
    },

    /// Every step succeeded
    SessionCompleted {
        session_id: String,
        image: String,
        startup_command: Option<String>,
        duration: Duration,
    },

    /// The sequence halted; staging state was discarded
    SessionFailed {
        session_id: String,
        failed_step: Option<usize>,
        failure: FailureContext,
    },

    /// Image filesystem and descriptor written to the output directory
    Finalized { session_id: String, output: PathBuf },
}

impl BuildEvent {
    #[must_use]
    pub fn session_id(&self) -> &str {
        match self {
            Self::SessionStarted { session_id, .. }
            | Self::StepStarted { session_id, .. }
            | Self::StepOutput { session_id, .. }
            | Self::StepCompleted { session_id, .. }
            | Self::StepFailed { session_id, .. }
            | Self::SessionCompleted { session_id, .. }
            | Self::SessionFailed { session_id, .. }
            | Self::Finalized { session_id, .. } => session_id,
        }
    }
}
