//! kiln - Declarative container image builder
//!
//! Parses a recipe, runs its steps in order against a staging filesystem
//! and publishes the image only when every step succeeded.

mod cli;
mod display;
mod error;
mod events;
mod logging;

use crate::cli::{Cli, Commands};
use crate::display::{OperationResult, OutputRenderer};
use crate::error::CliError;
use crate::events::EventHandler;
use clap::Parser;
use kiln_builder::{BuildOptions, BuildRequest, Builder};
use kiln_config::Config;
use kiln_errors::Error;
use kiln_events::{EventEmitter, EventReceiver, EventSender};
use kiln_types::{ColorChoice, OutputFormat};
use std::path::{Path, PathBuf};
use std::process;
use tokio::select;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() {
    // Parse command line arguments first to check for JSON mode
    let cli = Cli::parse();
    let json_mode = cli.global.json;

    init_tracing(json_mode, cli.global.debug);

    if let Err(e) = run(cli).await {
        error!("Application error: {}", e);
        process::exit(1);
    }
}

/// Main application logic; failures are rendered here before returning
async fn run(cli: Cli) -> Result<(), CliError> {
    info!("Starting kiln v{}", env!("CARGO_PKG_VERSION"));

    let config = match load_config(&cli).await {
        Ok(config) => config,
        Err(e) => {
            let renderer = OutputRenderer::new(
                cli.global.json,
                cli.global.color.unwrap_or(ColorChoice::Auto),
            );
            renderer.render_error(&e)?;
            return Err(e);
        }
    };

    let json_output = cli.global.json || config.general.default_output == OutputFormat::Json;
    let color_choice = cli.global.color.unwrap_or(config.general.color);
    let renderer = OutputRenderer::new(json_output, color_choice);

    let (event_sender, event_receiver) = kiln_events::channel();

    let colors_enabled = match color_choice {
        ColorChoice::Always => true,
        ColorChoice::Never => false,
        ColorChoice::Auto => console::Term::stderr().features().colors_supported(),
    };
    let mut event_handler = EventHandler::new(colors_enabled, cli.global.debug, json_output);

    let operation = cli.command.name();
    event_sender.emit_operation_started(operation);

    let result = execute_command_with_events(
        cli.command,
        config,
        event_sender.clone(),
        event_receiver,
        &mut event_handler,
    )
    .await;

    match result {
        Ok(result) => {
            event_sender.emit_operation_completed(operation, true);
            renderer.render_result(&result)?;
            info!("Command completed successfully");
            Ok(())
        }
        Err(e) => {
            event_sender.emit_operation_failed(operation, e.to_string());
            renderer.render_error(&e)?;
            Err(e)
        }
    }
}

/// Load configuration with precedence file < environment < CLI flags
async fn load_config(cli: &Cli) -> Result<Config, CliError> {
    let mut config = Config::load_or_default(cli.global.config.as_deref()).await?;
    config.merge_env()?;
    apply_cli_config(&mut config, &cli.global, &cli.command)?;
    Ok(config)
}

/// Execute command with concurrent event handling
///
/// Ctrl-C drops the command future, which discards the staging filesystem
/// and kills any running command. Nothing is published.
async fn execute_command_with_events(
    command: Commands,
    config: Config,
    event_sender: EventSender,
    mut event_receiver: EventReceiver,
    event_handler: &mut EventHandler,
) -> Result<OperationResult, CliError> {
    let mut command_future = Box::pin(execute_command(command, config, event_sender));
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        select! {
            result = &mut command_future => {
                while let Ok(event) = event_receiver.try_recv() {
                    event_handler.handle_event(event);
                }
                return result;
            }
            event = event_receiver.recv() => {
                match event {
                    Some(event) => event_handler.handle_event(event),
                    None => { /* Channel closed: keep waiting for command to finish */ }
                }
            }
            _ = &mut ctrl_c => {
                warn!("Interrupted, cancelling build");
                drop(command_future);
                while let Ok(event) = event_receiver.try_recv() {
                    event_handler.handle_event(event);
                }
                return Err(CliError::Build(Error::Cancelled));
            }
        }
    }
}

/// Execute the specified command
async fn execute_command(
    command: Commands,
    config: Config,
    event_sender: EventSender,
) -> Result<OperationResult, CliError> {
    match command {
        Commands::Build {
            recipe,
            source,
            output,
            ..
        } => {
            let plan = kiln_builder::load_plan(&recipe).await?;

            let source_root = source.unwrap_or_else(|| recipe_dir(&recipe));
            let output_dir =
                output.unwrap_or_else(|| config.output_dir().join(&plan.metadata.name));

            let builder = Builder::with_options(BuildOptions::from(&config.build))
                .with_event_sender(event_sender);
            let outcome = builder
                .build(&plan, &BuildRequest::new(source_root, output_dir))
                .await?;

            Ok(OperationResult::BuildReport(outcome.report()))
        }
        Commands::Plan { recipe } => {
            let plan = kiln_builder::load_plan(&recipe).await?;
            Ok(OperationResult::Plan(plan))
        }
        Commands::Inspect { output } => {
            let descriptor = kiln_builder::load_descriptor(&output).await?;
            Ok(OperationResult::Image(descriptor))
        }
    }
}

/// Directory containing the recipe, used as the default build context
fn recipe_dir(recipe: &Path) -> PathBuf {
    match recipe.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

/// Initialize tracing/logging
///
/// Console logging stays off so progress rendering and JSON output are not
/// interleaved with log lines. `--debug` or `RUST_LOG` sends structured JSON
/// logs to a file under the kiln log directory.
fn init_tracing(json_mode: bool, debug_enabled_flag: bool) {
    let debug_enabled = std::env::var("RUST_LOG").is_ok() || debug_enabled_flag;

    if debug_enabled {
        let log_dir = Config::logs_dir();
        if let Err(e) = std::fs::create_dir_all(&log_dir) {
            if !json_mode {
                eprintln!("Warning: Failed to create log directory: {e}");
            }
        }

        let log_file = log_dir.join(format!(
            "kiln-{}.log",
            chrono::Utc::now().format("%Y%m%d-%H%M%S")
        ));

        match std::fs::File::create(&log_file) {
            Ok(file) => {
                tracing_subscriber::fmt()
                    .json()
                    .with_writer(file)
                    .with_env_filter(
                        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(
                            |_| tracing_subscriber::EnvFilter::new("info,kiln=debug"),
                        ),
                    )
                    .init();

                if !json_mode {
                    eprintln!("Debug logging to: {}", log_file.display());
                }
                return;
            }
            Err(e) => {
                if !json_mode {
                    eprintln!("Warning: Failed to create log file: {e}");
                }
            }
        }
    }

    tracing_subscriber::fmt()
        .with_writer(std::io::sink)
        .with_env_filter("off")
        .init();
}

/// Apply CLI configuration overrides (highest precedence)
fn apply_cli_config(
    config: &mut Config,
    global: &cli::GlobalArgs,
    command: &Commands,
) -> Result<(), CliError> {
    if let Some(color) = global.color {
        config.general.color = color;
    }

    if let Commands::Build {
        empty_glob,
        base_rootfs,
        step_timeout,
        sequence_timeout,
        ..
    } = command
    {
        if let Some(policy) = empty_glob {
            config.build.empty_glob = *policy;
        }
        if let Some(dir) = base_rootfs {
            if !dir.is_dir() {
                return Err(CliError::InvalidArguments(format!(
                    "--base-rootfs {} is not a directory",
                    dir.display()
                )));
            }
            config.build.base_rootfs = Some(dir.clone());
        }
        if let Some(seconds) = step_timeout {
            config.build.step_timeout = *seconds;
        }
        if let Some(seconds) = sequence_timeout {
            config.build.sequence_timeout = *seconds;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_types::EmptyGlobPolicy;

    #[test]
    fn test_cli_flags_override_config() {
        let cli = Cli::try_parse_from([
            "kiln",
            "build",
            "recipe.yml",
            "--empty-glob",
            "ignore",
            "--sequence-timeout",
            "600",
            "--color",
            "never",
        ])
        .unwrap();

        let mut config = Config::default();
        apply_cli_config(&mut config, &cli.global, &cli.command).unwrap();

        assert_eq!(config.build.empty_glob, EmptyGlobPolicy::Ignore);
        assert_eq!(config.build.sequence_timeout(), Some(600));
        assert_eq!(config.general.color, ColorChoice::Never);
    }

    #[test]
    fn test_missing_base_rootfs_is_rejected() {
        let cli = Cli::try_parse_from([
            "kiln",
            "build",
            "recipe.yml",
            "--base-rootfs",
            "/definitely/not/here",
        ])
        .unwrap();

        let mut config = Config::default();
        let err = apply_cli_config(&mut config, &cli.global, &cli.command).unwrap_err();
        assert!(matches!(err, CliError::InvalidArguments(_)));
    }

    #[test]
    fn test_recipe_dir_defaults() {
        assert_eq!(recipe_dir(Path::new("recipe.yml")), PathBuf::from("."));
        assert_eq!(
            recipe_dir(Path::new("project/recipe.yml")),
            PathBuf::from("project")
        );
    }
}
