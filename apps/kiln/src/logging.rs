//! Structured logging integration for events
//!
//! Converts build and general events into tracing records with structured
//! fields. Every record carries the event id and the session correlation id
//! so one build can be followed through a JSON log file.

use kiln_events::{AppEvent, BuildEvent, EventMessage, GeneralEvent};
use tracing::{debug, error, info, warn};

/// Log an `EventMessage` using the tracing infrastructure
pub fn log_event_with_tracing(message: &EventMessage) {
    let meta = &message.meta;

    match &message.event {
        AppEvent::General(general_event) => match general_event {
            GeneralEvent::Warning { message, context } => {
                warn!(
                    source = meta.source.as_str(),
                    event_id = %meta.event_id,
                    correlation = ?meta.correlation_id,
                    context = ?context,
                    "{message}"
                );
            }
            GeneralEvent::Error { message, details } => {
                error!(
                    source = meta.source.as_str(),
                    event_id = %meta.event_id,
                    correlation = ?meta.correlation_id,
                    details = ?details,
                    "{message}"
                );
            }
            GeneralEvent::DebugLog { message, context } => {
                debug!(
                    source = meta.source.as_str(),
                    event_id = %meta.event_id,
                    correlation = ?meta.correlation_id,
                    context = ?context,
                    "{message}"
                );
            }
            GeneralEvent::OperationStarted { operation } => {
                info!(
                    source = meta.source.as_str(),
                    event_id = %meta.event_id,
                    operation = %operation,
                    "Operation started"
                );
            }
            GeneralEvent::OperationCompleted { operation, success } => {
                info!(
                    source = meta.source.as_str(),
                    event_id = %meta.event_id,
                    operation = %operation,
                    success = success,
                    "Operation completed"
                );
            }
            GeneralEvent::OperationFailed { operation, error } => {
                error!(
                    source = meta.source.as_str(),
                    event_id = %meta.event_id,
                    operation = %operation,
                    error = %error,
                    "Operation failed"
                );
            }
        },

        AppEvent::Build(build_event) => match build_event {
            BuildEvent::SessionStarted {
                session_id,
                image,
                base_image,
                total_steps,
            } => {
                info!(
                    source = meta.source.as_str(),
                    event_id = %meta.event_id,
                    session_id = %session_id,
                    image = %image,
                    base_image = %base_image,
                    total_steps = total_steps,
                    "Build session started"
                );
            }
            BuildEvent::StepStarted {
                session_id,
                index,
                kind,
                description,
            } => {
                info!(
                    source = meta.source.as_str(),
                    event_id = %meta.event_id,
                    session_id = %session_id,
                    step = index,
                    kind = %kind,
                    description = %description,
                    "Step started"
                );
            }
            BuildEvent::StepOutput {
                session_id,
                index,
                line,
                is_stderr,
            } => {
                debug!(
                    source = meta.source.as_str(),
                    session_id = %session_id,
                    step = index,
                    stderr = is_stderr,
                    "{line}"
                );
            }
            BuildEvent::StepCompleted {
                session_id,
                index,
                kind,
                duration,
            } => {
                info!(
                    source = meta.source.as_str(),
                    event_id = %meta.event_id,
                    session_id = %session_id,
                    step = index,
                    kind = %kind,
                    duration_ms = duration.as_millis(),
                    "Step completed"
                );
            }
            BuildEvent::StepFailed {
                session_id,
                index,
                kind,
                failure,
            } => {
                error!(
                    source = meta.source.as_str(),
                    event_id = %meta.event_id,
                    session_id = %session_id,
                    step = index,
                    kind = %kind,
                    code = ?failure.code,
                    message = %failure.message,
                    hint = ?failure.hint,
                    "Step failed"
                );
            }
            BuildEvent::SessionCompleted {
                session_id,
                image,
                startup_command,
                duration,
            } => {
                info!(
                    source = meta.source.as_str(),
                    event_id = %meta.event_id,
                    session_id = %session_id,
                    image = %image,
                    startup_command = ?startup_command,
                    duration_ms = duration.as_millis(),
                    "Build session completed"
                );
            }
            BuildEvent::SessionFailed {
                session_id,
                failed_step,
                failure,
            } => {
                error!(
                    source = meta.source.as_str(),
                    event_id = %meta.event_id,
                    session_id = %session_id,
                    failed_step = ?failed_step,
                    code = ?failure.code,
                    message = %failure.message,
                    retryable = failure.retryable,
                    "Build session failed"
                );
            }
            BuildEvent::Finalized { session_id, output } => {
                info!(
                    source = meta.source.as_str(),
                    event_id = %meta.event_id,
                    session_id = %session_id,
                    output = %output.display(),
                    "Image finalized"
                );
            }
        },
    }
}
