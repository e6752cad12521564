//! Image bootstrap sequencer

use super::config::BuildOptions;
use super::context::BuildContext;
use crate::build_plan::BuildPlan;
use crate::environment::{CommandRunner, ShellRunner};
use crate::stages::execute_step;
use crate::utils::fileops::copy_directory_recursive;
use crate::utils::timeout::with_optional_timeout;
use chrono::Utc;
use kiln_errors::{BuildError, Error};
use kiln_events::{AppEvent, BuildEvent, EventEmitter, EventSender, FailureContext};
use kiln_types::image::{DESCRIPTOR_FILE, ROOTFS_DIR};
use kiln_types::{BuildReport, ImageDescriptor, SequenceState};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::fs;

/// Where a build reads from and writes to
#[derive(Debug, Clone)]
pub struct BuildRequest {
    /// Host source tree for copy steps
    pub source_root: PathBuf,
    /// Output directory receiving `image.json` and `rootfs/`
    pub output_dir: PathBuf,
}

impl BuildRequest {
    #[must_use]
    pub fn new(source_root: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            source_root: source_root.into(),
            output_dir: output_dir.into(),
        }
    }
}

/// A finalized image
#[derive(Debug, Clone)]
pub struct BuildOutcome {
    pub descriptor: ImageDescriptor,
    pub output_dir: PathBuf,
    pub duration: Duration,
}

impl BuildOutcome {
    /// Summary for CLI rendering
    #[must_use]
    pub fn report(&self) -> BuildReport {
        BuildReport {
            image: self.descriptor.reference(),
            base_image: self.descriptor.base_image.clone(),
            output_path: self.output_dir.clone(),
            startup_command: self.descriptor.startup_command.clone(),
            steps_executed: self.descriptor.steps,
            duration_ms: u64::try_from(self.duration.as_millis()).unwrap_or(u64::MAX),
        }
    }
}

/// Executes build plans step by step, all or nothing
#[derive(Clone)]
pub struct Builder {
    options: BuildOptions,
    runner: Arc<dyn CommandRunner>,
    event_sender: Option<EventSender>,
}

impl std::fmt::Debug for Builder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Builder")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl EventEmitter for Builder {
    fn event_sender(&self) -> Option<&EventSender> {
        self.event_sender.as_ref()
    }
}

impl Default for Builder {
    fn default() -> Self {
        Self::new()
    }
}

impl Builder {
    /// Create new builder
    #[must_use]
    pub fn new() -> Self {
        Self::with_options(BuildOptions::default())
    }

    /// Create builder with options; commands run through the configured shell
    #[must_use]
    pub fn with_options(options: BuildOptions) -> Self {
        let runner = Arc::new(ShellRunner::new(options.shell.clone()));
        Self {
            options,
            runner,
            event_sender: None,
        }
    }

    /// Replace the command runner
    #[must_use]
    pub fn with_runner(mut self, runner: Arc<dyn CommandRunner>) -> Self {
        self.runner = runner;
        self
    }

    /// Set event sender
    #[must_use]
    pub fn with_event_sender(mut self, event_sender: EventSender) -> Self {
        self.event_sender = Some(event_sender);
        self
    }

    #[must_use]
    pub fn options(&self) -> &BuildOptions {
        &self.options
    }

    /// Run every step of `plan` and finalize the image
    ///
    /// The output directory is only written once every step has succeeded.
    /// On failure, timeout or cancellation (dropping the returned future)
    /// the staging filesystem is discarded and nothing is published.
    ///
    /// # Errors
    ///
    /// Returns the first failing step's error wrapped in
    /// [`Error::StepFailed`], or a setup/finalization error.
    pub async fn build(&self, plan: &BuildPlan, request: &BuildRequest) -> Result<BuildOutcome, Error> {
        let start = Instant::now();

        check_source_root(&request.source_root).await?;
        check_replaceable_output(&request.output_dir).await?;
        let source_root = canonical(&request.source_root).await?;

        let parent = output_parent(&request.output_dir);
        fs::create_dir_all(&parent)
            .await
            .map_err(|e| Error::io_with_path(&e, &parent))?;

        // Staging sits next to the output so publishing is a rename
        let staging = tempfile::Builder::new()
            .prefix(".kiln-staging-")
            .tempdir_in(&parent)
            .map_err(|e| Error::io_with_path(&e, &parent))?;
        let image_root = staging.path().join(ROOTFS_DIR);
        fs::create_dir_all(&image_root)
            .await
            .map_err(|e| Error::io_with_path(&e, &image_root))?;

        let excluded =
            excluded_paths(&source_root, &parent, &request.output_dir, staging.path()).await?;

        if let Some(base) = &self.options.base_rootfs {
            if !base.is_dir() {
                return Err(BuildError::PathNotFound {
                    path: base.display().to_string(),
                }
                .into());
            }
            let base = canonical(base).await?;
            copy_directory_recursive(&base, &image_root, &excluded).await?;
        }

        let mut ctx = BuildContext::new(plan.base_image.clone(), image_root, source_root)
            .with_excluded(excluded)
            .with_environment(plan.environment.clone())
            .with_event_sender(self.event_sender.clone());

        self.emit(AppEvent::Build(BuildEvent::SessionStarted {
            session_id: ctx.session_id.clone(),
            image: plan.reference(),
            base_image: plan.base_image.clone(),
            total_steps: plan.len(),
        }));

        let sequence_timeout = self.options.sequence_timeout;
        let result = with_optional_timeout(self.run_steps(plan, &mut ctx), sequence_timeout, |seconds| {
            BuildError::Timeout { seconds }
        })
        .await;

        let result = match result {
            Ok(()) => {
                self.finalize(plan, &ctx, staging, &request.output_dir)
                    .await
            }
            Err(err) => Err(attribute_timeout(err, plan, &ctx)),
        };

        match result {
            Ok(descriptor) => {
                let duration = start.elapsed();
                self.emit(AppEvent::Build(BuildEvent::SessionCompleted {
                    session_id: ctx.session_id.clone(),
                    image: descriptor.reference(),
                    startup_command: descriptor.startup_command.clone(),
                    duration,
                }));
                Ok(BuildOutcome {
                    descriptor,
                    output_dir: request.output_dir.clone(),
                    duration,
                })
            }
            Err(err) => {
                self.emit(AppEvent::Build(BuildEvent::SessionFailed {
                    session_id: ctx.session_id.clone(),
                    failed_step: err.failed_step(),
                    failure: FailureContext::from_error(&err),
                }));
                Err(err)
            }
        }
    }

    /// Fold the steps over the context, stopping at the first failure
    async fn run_steps(&self, plan: &BuildPlan, ctx: &mut BuildContext) -> Result<(), Error> {
        for step in &plan.steps {
            let kind = step.kind.name();
            ctx.current_step = Some(step.index);
            self.emit(AppEvent::Build(BuildEvent::StepStarted {
                session_id: ctx.session_id.clone(),
                index: step.index,
                kind: kind.to_string(),
                description: step.kind.to_string(),
            }));

            let step_start = Instant::now();
            if let Err(err) = execute_step(step, ctx, self.runner.as_ref(), &self.options).await {
                let err = err.at_step(step.index, kind);
                self.emit(AppEvent::Build(BuildEvent::StepFailed {
                    session_id: ctx.session_id.clone(),
                    index: step.index,
                    kind: kind.to_string(),
                    failure: FailureContext::from_error(&err),
                }));
                return Err(err);
            }

            self.emit(AppEvent::Build(BuildEvent::StepCompleted {
                session_id: ctx.session_id.clone(),
                index: step.index,
                kind: kind.to_string(),
                duration: step_start.elapsed(),
            }));
        }
        ctx.current_step = None;
        Ok(())
    }

    /// Write the descriptor and publish the staged image as the output
    async fn finalize(
        &self,
        plan: &BuildPlan,
        ctx: &BuildContext,
        staging: tempfile::TempDir,
        output_dir: &Path,
    ) -> Result<ImageDescriptor, Error> {
        let descriptor = ImageDescriptor {
            name: plan.metadata.name.clone(),
            version: plan.metadata.version.clone(),
            base_image: ctx.base_image.clone(),
            working_dir: ctx.working_dir.clone(),
            environment: ctx.environment.clone(),
            startup_command: ctx.startup_command.clone(),
            steps: plan.len(),
            rootfs: PathBuf::from(ROOTFS_DIR),
            created_at: Utc::now(),
        };

        let json = serde_json::to_vec_pretty(&descriptor)?;
        let descriptor_path = staging.path().join(DESCRIPTOR_FILE);
        fs::write(&descriptor_path, json)
            .await
            .map_err(|e| Error::io_with_path(&e, &descriptor_path))?;

        check_replaceable_output(output_dir).await?;
        let previous = if fs::symlink_metadata(output_dir).await.is_ok() {
            let backup = output_parent(output_dir).join(format!(".kiln-previous-{}", uuid::Uuid::new_v4()));
            fs::rename(output_dir, &backup)
                .await
                .map_err(|e| finalize_error(&e, output_dir))?;
            Some(backup)
        } else {
            None
        };

        let staged = staging.keep();
        if let Err(e) = fs::rename(&staged, output_dir).await {
            // Put the previous image back and drop the staged one
            if let Some(backup) = &previous {
                let _ = fs::rename(backup, output_dir).await;
            }
            let _ = fs::remove_dir_all(&staged).await;
            return Err(finalize_error(&e, output_dir));
        }

        if let Some(backup) = previous {
            if let Err(e) = fs::remove_dir_all(&backup).await {
                self.emit_warning(format!(
                    "failed to remove previous image at {}: {e}",
                    backup.display()
                ));
            }
        }

        self.emit(AppEvent::Build(BuildEvent::Finalized {
            session_id: ctx.session_id.clone(),
            output: output_dir.to_path_buf(),
        }));

        Ok(descriptor)
    }
}

/// Read a finalized image descriptor from an output directory
///
/// # Errors
///
/// Returns an error if the descriptor is missing or malformed.
pub async fn load_descriptor(output_dir: &Path) -> Result<ImageDescriptor, Error> {
    let path = output_dir.join(DESCRIPTOR_FILE);
    let content = fs::read(&path)
        .await
        .map_err(|e| Error::io_with_path(&e, &path))?;
    Ok(serde_json::from_slice(&content)?)
}

/// Final state of a sequence given its result
#[must_use]
pub fn sequence_state<T>(result: &Result<T, Error>) -> SequenceState {
    match result {
        Ok(_) => SequenceState::Succeeded,
        Err(_) => SequenceState::Failed,
    }
}

fn output_parent(output_dir: &Path) -> PathBuf {
    match output_dir.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

async fn canonical(path: &Path) -> Result<PathBuf, Error> {
    fs::canonicalize(path)
        .await
        .map_err(|e| Error::io_with_path(&e, path))
}

/// Host paths copy steps must not read when the output lives inside the
/// source tree
///
/// The output parent is skipped as a whole when it is a subdirectory of the
/// source tree.
async fn excluded_paths(
    source_root: &Path,
    parent: &Path,
    output_dir: &Path,
    staging: &Path,
) -> Result<Vec<PathBuf>, Error> {
    let parent = canonical(parent).await?;
    let mut excluded = vec![canonical(staging).await?];
    if let Some(name) = output_dir.file_name() {
        excluded.push(parent.join(name));
    }
    if parent != source_root && parent.starts_with(source_root) {
        excluded.push(parent);
    }
    Ok(excluded)
}

fn finalize_error(err: &std::io::Error, output_dir: &Path) -> Error {
    BuildError::FinalizeFailed {
        message: format!("{}: {err}", output_dir.display()),
    }
    .into()
}

async fn check_source_root(source_root: &Path) -> Result<(), Error> {
    let is_dir = fs::metadata(source_root).await.is_ok_and(|m| m.is_dir());
    if is_dir {
        Ok(())
    } else {
        Err(BuildError::InvalidPath {
            path: source_root.display().to_string(),
            reason: "source tree is not a directory".to_string(),
        }
        .into())
    }
}

/// Only empty directories and earlier kiln images may be replaced
async fn check_replaceable_output(output_dir: &Path) -> Result<(), Error> {
    let Ok(meta) = fs::symlink_metadata(output_dir).await else {
        return Ok(());
    };
    let refuse = |reason: &str| -> Error {
        BuildError::FinalizeFailed {
            message: format!("refusing to replace {}: {reason}", output_dir.display()),
        }
        .into()
    };
    if !meta.is_dir() {
        return Err(refuse("not a directory"));
    }
    if output_dir.join(DESCRIPTOR_FILE).is_file() {
        return Ok(());
    }
    let mut entries = fs::read_dir(output_dir)
        .await
        .map_err(|e| Error::io_with_path(&e, output_dir))?;
    if entries.next_entry().await?.is_some() {
        return Err(refuse("it is not empty and holds no kiln image"));
    }
    Ok(())
}

/// A sequence timeout interrupts whichever step was running
fn attribute_timeout(err: Error, plan: &BuildPlan, ctx: &BuildContext) -> Error {
    let is_sequence_timeout = matches!(&err, Error::Build(BuildError::Timeout { .. }));
    match (is_sequence_timeout, ctx.current_step) {
        (true, Some(index)) => {
            let kind = plan
                .steps
                .iter()
                .find(|s| s.index == index)
                .map_or("unknown", |s| s.kind.name());
            err.at_step(index, kind)
        }
        _ => err,
    }
}
