//! Output rendering and formatting

use crate::error::CliError;
use comfy_table::{presets::UTF8_FULL, Attribute, Cell, ContentArrangement, Table};
use console::{Style, Term};
use kiln_builder::BuildPlan;
use kiln_types::{BuildReport, ColorChoice, ImageDescriptor};
use serde::Serialize;
use std::io;

/// Result of a CLI command, ready to render
#[derive(Debug, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum OperationResult {
    /// A finished build
    BuildReport(BuildReport),
    /// The resolved step list of a recipe
    Plan(BuildPlan),
    /// Descriptor of an existing image
    Image(ImageDescriptor),
}

impl OperationResult {
    /// Serialize to pretty JSON
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

#[derive(Serialize)]
struct ErrorOutput<'a> {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    failed_step: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<&'a kiln_errors::Error>,
}

impl<'a> ErrorOutput<'a> {
    fn new(error: &'a CliError) -> Self {
        Self {
            error: error.to_string(),
            code: error.code(),
            failed_step: error.failed_step(),
            detail: error.detail(),
        }
    }
}

/// Output renderer for CLI results
#[derive(Clone)]
pub struct OutputRenderer {
    /// Use JSON output format
    json_output: bool,
    /// Color configuration
    color_choice: ColorChoice,
    /// Terminal instance
    term: Term,
}

impl OutputRenderer {
    /// Create new output renderer
    pub fn new(json_output: bool, color_choice: ColorChoice) -> Self {
        Self {
            json_output,
            color_choice,
            term: Term::stdout(),
        }
    }

    /// Render operation result
    pub fn render_result(&self, result: &OperationResult) -> io::Result<()> {
        if self.json_output {
            self.render_json(result)
        } else {
            self.render_table(result)
        }
    }

    /// Render a failure. In JSON mode the error goes to stdout as an object so
    /// callers always get one JSON document; otherwise it goes to stderr.
    pub fn render_error(&self, error: &CliError) -> io::Result<()> {
        if self.json_output {
            let json = serde_json::to_string_pretty(&ErrorOutput::new(error)).map_err(io::Error::other)?;
            println!("{json}");
        } else {
            let label = self.style(Style::new().red().bold()).apply_to("Error:");
            eprintln!("{label} {error}");
        }
        Ok(())
    }

    /// Render as JSON
    fn render_json(&self, result: &OperationResult) -> io::Result<()> {
        let json = result.to_json().map_err(io::Error::other)?;
        println!("{json}");
        Ok(())
    }

    /// Render as formatted table
    fn render_table(&self, result: &OperationResult) -> io::Result<()> {
        match result {
            OperationResult::BuildReport(report) => self.render_build_report(report),
            OperationResult::Plan(plan) => self.render_plan(plan),
            OperationResult::Image(descriptor) => self.render_image(descriptor),
        }
    }

    fn render_build_report(&self, report: &BuildReport) -> io::Result<()> {
        let heading = self.style(Style::new().bold()).apply_to("Build Summary");
        println!("{heading}");
        println!();
        println!("Image:    {}", report.image);
        println!("Base:     {}", report.base_image);
        println!("Output:   {}", report.output_path.display());
        println!("Steps:    {}", report.steps_executed);
        println!(
            "Startup:  {}",
            report.startup_command.as_deref().unwrap_or("(none)")
        );
        println!("Duration: {}ms", report.duration_ms);

        Ok(())
    }

    fn render_plan(&self, plan: &BuildPlan) -> io::Result<()> {
        let heading = self.style(Style::new().bold()).apply_to(plan.reference());
        println!("{heading} from {}", plan.base_image);

        if !plan.environment.is_empty() {
            println!();
            for (key, value) in &plan.environment {
                println!("  {key}={value}");
            }
        }
        println!();

        let mut table = self.new_table();
        table.set_header(vec![
            Cell::new("#").add_attribute(Attribute::Bold),
            Cell::new("Action").add_attribute(Attribute::Bold),
            Cell::new("Arguments").add_attribute(Attribute::Bold),
        ]);

        for step in &plan.steps {
            table.add_row(vec![
                Cell::new(step.index),
                Cell::new(step.kind.name()),
                Cell::new(step.kind.arguments().join("  ")),
            ]);
        }

        println!("{table}");
        Ok(())
    }

    fn render_image(&self, descriptor: &ImageDescriptor) -> io::Result<()> {
        let mut table = self.new_table();
        table.set_header(vec![
            Cell::new("Field").add_attribute(Attribute::Bold),
            Cell::new("Value").add_attribute(Attribute::Bold),
        ]);

        table.add_row(vec![Cell::new("Image"), Cell::new(descriptor.reference())]);
        table.add_row(vec![Cell::new("Base"), Cell::new(&descriptor.base_image)]);
        table.add_row(vec![
            Cell::new("Working dir"),
            Cell::new(&descriptor.working_dir),
        ]);
        table.add_row(vec![
            Cell::new("Startup"),
            Cell::new(descriptor.startup_command.as_deref().unwrap_or("(none)")),
        ]);
        table.add_row(vec![Cell::new("Steps"), Cell::new(descriptor.steps)]);
        table.add_row(vec![
            Cell::new("Rootfs"),
            Cell::new(descriptor.rootfs.display()),
        ]);
        table.add_row(vec![
            Cell::new("Created"),
            Cell::new(descriptor.created_at.format("%Y-%m-%d %H:%M:%S UTC")),
        ]);
        for (key, value) in &descriptor.environment {
            table.add_row(vec![Cell::new(format!("env {key}")), Cell::new(value)]);
        }

        println!("{table}");
        Ok(())
    }

    fn new_table(&self) -> Table {
        let mut table = Table::new();
        table
            .load_preset(UTF8_FULL)
            .set_content_arrangement(ContentArrangement::Dynamic);
        if !self.colors_enabled() {
            table.force_no_tty();
        }
        table
    }

    fn style(&self, style: Style) -> Style {
        if self.colors_enabled() {
            style.force_styling(true)
        } else {
            style.force_styling(false)
        }
    }

    fn colors_enabled(&self) -> bool {
        match self.color_choice {
            ColorChoice::Always => true,
            ColorChoice::Never => false,
            ColorChoice::Auto => self.term.features().colors_supported(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_types::StepKind;

    #[test]
    fn test_plan_json_shape() {
        let plan = BuildPlan::new(
            "app",
            "1.0",
            "python:3.12",
            vec![
                StepKind::CreateDirectory {
                    path: "/app".to_string(),
                },
                StepKind::SetStartupCommand {
                    command: "python main.py".to_string(),
                },
            ],
        );

        let json = OperationResult::Plan(plan).to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["type"], "plan");
        assert_eq!(value["data"]["base_image"], "python:3.12");
        assert_eq!(value["data"]["steps"][1]["index"], 2);
        assert_eq!(value["data"]["steps"][1]["kind"], "set-startup-command");
    }

    #[test]
    fn test_error_json_carries_structured_detail() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let error = CliError::Build(
            kiln_errors::Error::io_with_path(&io, "/src/manifest").at_step(3, "copy-files"),
        );

        let value = serde_json::to_value(ErrorOutput::new(&error)).unwrap();
        assert_eq!(value["failed_step"], 3);
        assert_eq!(value["code"], "error.io");
        let detail = &value["detail"]["StepFailed"];
        assert_eq!(detail["kind"], "copy-files");
        assert_eq!(detail["source"]["Io"]["kind"], "NotFound");
        assert_eq!(detail["source"]["Io"]["path"], "/src/manifest");

        let parsed: kiln_errors::Error = serde_json::from_value(value["detail"].clone()).unwrap();
        assert!(matches!(
            parsed.root_cause(),
            kiln_errors::Error::Io {
                kind: std::io::ErrorKind::NotFound,
                ..
            }
        ));

        let args = CliError::InvalidArguments("bad".into());
        let value = serde_json::to_value(ErrorOutput::new(&args)).unwrap();
        assert!(value.get("detail").is_none());
    }

    #[test]
    fn test_colors_follow_choice() {
        assert!(OutputRenderer::new(false, ColorChoice::Always).colors_enabled());
        assert!(!OutputRenderer::new(false, ColorChoice::Never).colors_enabled());
    }
}
