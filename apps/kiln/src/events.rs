//! Event handling and progress display

use crate::logging::log_event_with_tracing;
use console::{style, Term};
use kiln_events::{AppEvent, BuildEvent, EventMessage, FailureContext, GeneralEvent};
use std::time::Duration;

/// Renders build progress to stderr and forwards every event to tracing
pub struct EventHandler {
    /// Whether colors are supported and enabled
    colors_enabled: bool,
    /// Whether debug mode is enabled
    debug_enabled: bool,
    /// Suppress console rendering so stdout stays machine-readable
    quiet: bool,
    /// Step count of the running session, for `[n/total]` prefixes
    total_steps: usize,
    term: Term,
}

impl EventHandler {
    pub fn new(colors_enabled: bool, debug_enabled: bool, quiet: bool) -> Self {
        Self {
            colors_enabled,
            debug_enabled,
            quiet,
            total_steps: 0,
            term: Term::stderr(),
        }
    }

    /// Handle incoming event
    pub fn handle_event(&mut self, message: EventMessage) {
        log_event_with_tracing(&message);

        if self.quiet {
            return;
        }

        match message.event {
            AppEvent::General(event) => self.handle_general_event(event),
            AppEvent::Build(event) => self.handle_build_event(event),
        }
    }

    fn handle_general_event(&mut self, event: GeneralEvent) {
        match event {
            GeneralEvent::Warning { message, context } => {
                let text = match context {
                    Some(context) => format!("warning: {message} ({context})"),
                    None => format!("warning: {message}"),
                };
                self.show_line(&self.paint_warning(&text));
            }
            GeneralEvent::Error { message, details } => {
                self.show_line(&self.paint_error(&format!("error: {message}")));
                if let Some(details) = details {
                    self.show_line(&format!("  {details}"));
                }
            }
            GeneralEvent::DebugLog { message, .. } => {
                if self.debug_enabled {
                    self.show_line(&self.paint_dim(&format!("debug: {message}")));
                }
            }
            GeneralEvent::OperationStarted { .. } | GeneralEvent::OperationCompleted { .. } => {}
            GeneralEvent::OperationFailed { operation, error } => {
                self.show_line(&self.paint_error(&format!("{operation} failed: {error}")));
            }
        }
    }

    fn handle_build_event(&mut self, event: BuildEvent) {
        match event {
            BuildEvent::SessionStarted {
                image,
                base_image,
                total_steps,
                ..
            } => {
                self.total_steps = total_steps;
                self.show_line(&format!(
                    "{} {image} from {base_image} ({total_steps} steps)",
                    self.paint_bold("Building")
                ));
            }
            BuildEvent::StepStarted {
                index, description, ..
            } => {
                let prefix = format!("[{index}/{}]", self.total_steps);
                self.show_line(&format!("{} {description}", self.paint_bold(&prefix)));
            }
            BuildEvent::StepOutput {
                line, is_stderr, ..
            } => {
                let text = format!("    {line}");
                if is_stderr {
                    self.show_line(&self.paint_warning(&text));
                } else {
                    self.show_line(&self.paint_dim(&text));
                }
            }
            BuildEvent::StepCompleted {
                index, duration, ..
            } => {
                if self.debug_enabled {
                    self.show_line(&self.paint_dim(&format!(
                        "    step {index} done in {}",
                        format_duration(duration)
                    )));
                }
            }
            BuildEvent::StepFailed {
                index,
                kind,
                failure,
                ..
            } => {
                self.show_line(&self.paint_error(&format!(
                    "Step {index} ({kind}) failed: {}",
                    failure.message
                )));
                self.show_failure_details(&failure);
            }
            BuildEvent::SessionCompleted {
                image, duration, ..
            } => {
                self.show_line(&self.paint_success(&format!(
                    "Built {image} in {}",
                    format_duration(duration)
                )));
            }
            BuildEvent::SessionFailed { failed_step, .. } => {
                let text = match failed_step {
                    Some(index) => format!("Build halted at step {index}; no image was written"),
                    None => "Build failed; no image was written".to_string(),
                };
                self.show_line(&self.paint_error(&text));
            }
            BuildEvent::Finalized { output, .. } => {
                if self.debug_enabled {
                    self.show_line(&self.paint_dim(&format!(
                        "    image written to {}",
                        output.display()
                    )));
                }
            }
        }
    }

    fn show_failure_details(&self, failure: &FailureContext) {
        if let Some(hint) = &failure.hint {
            self.show_line(&format!("  Hint: {hint}"));
        }
        if self.debug_enabled {
            if let Some(code) = &failure.code {
                self.show_line(&self.paint_dim(&format!("  Code: {code}")));
            }
        }
    }

    fn show_line(&self, line: &str) {
        // Progress is best-effort; a closed stderr must not fail the build
        self.term.write_line(line).unwrap_or(());
    }

    fn paint_bold(&self, text: &str) -> String {
        if self.colors_enabled {
            style(text).bold().to_string()
        } else {
            text.to_string()
        }
    }

    fn paint_dim(&self, text: &str) -> String {
        if self.colors_enabled {
            style(text).dim().to_string()
        } else {
            text.to_string()
        }
    }

    fn paint_warning(&self, text: &str) -> String {
        if self.colors_enabled {
            style(text).yellow().to_string()
        } else {
            text.to_string()
        }
    }

    fn paint_error(&self, text: &str) -> String {
        if self.colors_enabled {
            style(text).red().bold().to_string()
        } else {
            text.to_string()
        }
    }

    fn paint_success(&self, text: &str) -> String {
        if self.colors_enabled {
            style(text).green().to_string()
        } else {
            text.to_string()
        }
    }
}

/// Human-readable duration, millisecond precision below one second
pub fn format_duration(duration: Duration) -> String {
    if duration < Duration::from_secs(1) {
        format!("{}ms", duration.as_millis())
    } else {
        format!("{:.1}s", duration.as_secs_f64())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_handler_tracks_step_total() {
        let mut handler = EventHandler::new(false, false, true);
        handler.handle_event(EventMessage::from_event(AppEvent::Build(
            BuildEvent::SessionStarted {
                session_id: "build-1".to_string(),
                image: "app:1.0".to_string(),
                base_image: "python:3.12".to_string(),
                total_steps: 8,
            },
        )));
        // Quiet handlers log but never render or track
        assert_eq!(handler.total_steps, 0);

        let mut handler = EventHandler::new(false, false, false);
        handler.handle_event(EventMessage::from_event(AppEvent::Build(
            BuildEvent::SessionStarted {
                session_id: "build-1".to_string(),
                image: "app:1.0".to_string(),
                base_image: "python:3.12".to_string(),
                total_steps: 8,
            },
        )));
        assert_eq!(handler.total_steps, 8);
    }

    #[test]
    fn test_plain_painting_leaves_text_alone() {
        let handler = EventHandler::new(false, false, false);
        assert_eq!(handler.paint_error("boom"), "boom");
        assert_eq!(handler.paint_bold("[1/2]"), "[1/2]");
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_millis(250)), "250ms");
        assert_eq!(format_duration(Duration::from_millis(2500)), "2.5s");
    }
}
