//! Executors for each build step kind

use crate::build_plan::validate_copy_source;
use crate::core::config::BuildOptions;
use crate::core::context::BuildContext;
use crate::environment::{CommandRequest, CommandRunner};
use crate::utils::fileops::{copy_entry, literal_prefix, match_glob, prune_nested, GlobMatch};
use crate::utils::timeout::with_optional_timeout;
use kiln_errors::{BuildError, Error};
use kiln_events::EventEmitter;
use kiln_types::{BuildStep, EmptyGlobPolicy, FileMode, StepKind};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tokio::fs;

/// Execute a single build step against the context
///
/// # Errors
///
/// Returns the step's own failure, not yet attributed to the step index.
pub async fn execute_step(
    step: &BuildStep,
    ctx: &mut BuildContext,
    runner: &dyn CommandRunner,
    options: &BuildOptions,
) -> Result<(), Error> {
    match &step.kind {
        StepKind::CreateDirectory { path } => execute_create_directory(path, ctx).await,
        StepKind::SetWorkingDirectory { path } => execute_set_working_directory(path, ctx).await,
        StepKind::CopyFiles {
            source,
            destination,
            empty_glob,
        } => {
            let policy = options.empty_glob_for(*empty_glob);
            execute_copy_files(source, destination, policy, ctx).await
        }
        StepKind::RunCommand {
            command,
            manifest,
            timeout,
        } => {
            let timeout = timeout.or(options.step_timeout);
            execute_run_command(
                step.index,
                command,
                manifest.as_deref(),
                timeout,
                ctx,
                runner,
            )
            .await
        }
        StepKind::SetFilePermissions {
            pattern,
            mode,
            empty_glob,
        } => {
            let policy = options.empty_glob_for(*empty_glob);
            execute_set_file_permissions(pattern, *mode, policy, ctx).await
        }
        StepKind::SetStartupCommand { command } => {
            ctx.startup_command = Some(command.clone());
            Ok(())
        }
    }
}

async fn execute_create_directory(path: &str, ctx: &BuildContext) -> Result<(), Error> {
    let host = ctx.confined_host_path(ctx.resolve(path)).await?;
    fs::create_dir_all(&host)
        .await
        .map_err(|e| Error::io_with_path(&e, &host))?;
    Ok(())
}

async fn execute_set_working_directory(path: &str, ctx: &mut BuildContext) -> Result<(), Error> {
    let image_path = ctx.resolve(path);
    let host = ctx.confined_host_path(&image_path).await?;
    let is_dir = fs::metadata(&host).await.is_ok_and(|m| m.is_dir());
    if !is_dir {
        return Err(BuildError::PathNotFound { path: image_path }.into());
    }
    ctx.working_dir = image_path;
    Ok(())
}

fn no_matches(pattern: &str, policy: EmptyGlobPolicy, ctx: &BuildContext) -> Result<(), Error> {
    match policy {
        EmptyGlobPolicy::Fail => Err(BuildError::SourceNotFound {
            pattern: pattern.to_string(),
        }
        .into()),
        EmptyGlobPolicy::Ignore => {
            ctx.emit_warning(format!("no files match {pattern}; nothing to do"));
            Ok(())
        }
    }
}

async fn execute_copy_files(
    source: &str,
    destination: &str,
    policy: EmptyGlobPolicy,
    ctx: &BuildContext,
) -> Result<(), Error> {
    validate_copy_source(source)?;

    let matches = prune_nested(match_glob(&ctx.source_root, source, &ctx.excluded)?);
    if matches.is_empty() {
        return no_matches(source, policy, ctx);
    }

    let dest_image = ctx.resolve(destination);
    let dest_host = ctx.confined_host_path(&dest_image).await?;
    let dest_is_dir = destination.ends_with('/')
        || destination == "."
        || matches.len() > 1
        || matches.iter().any(|m| m.is_dir)
        || fs::metadata(&dest_host).await.is_ok_and(|m| m.is_dir());

    let prefix = literal_prefix(source.trim_start_matches("./"));
    for GlobMatch { relative, is_dir } in &matches {
        let from = if relative.as_os_str().is_empty() {
            ctx.source_root.clone()
        } else {
            ctx.source_root.join(relative)
        };
        let target = copy_target(
            Path::new(&dest_image),
            dest_is_dir,
            &prefix,
            relative,
            *is_dir,
        );
        let target = ctx.confined_host_path(&target).await?;
        copy_entry(&from, &target, &ctx.excluded).await?;
    }

    ctx.emit_debug(format!(
        "Copied {} entr{} matching {source} to {dest_image}",
        matches.len(),
        if matches.len() == 1 { "y" } else { "ies" }
    ));
    Ok(())
}

/// Where a matched entry lands in the image
///
/// Matches keep their path below the pattern's literal prefix. A literal
/// file match keeps its file name; a literal directory match has its
/// contents copied into the destination.
fn copy_target(
    dest: &Path,
    dest_is_dir: bool,
    prefix: &Path,
    relative: &Path,
    is_dir: bool,
) -> PathBuf {
    if !dest_is_dir {
        return dest.to_path_buf();
    }
    match relative.strip_prefix(prefix) {
        Ok(rest) if !rest.as_os_str().is_empty() => dest.join(rest),
        _ if is_dir => dest.to_path_buf(),
        _ => match relative.file_name() {
            Some(name) => dest.join(name),
            None => dest.to_path_buf(),
        },
    }
}

async fn execute_run_command(
    index: usize,
    command: &str,
    manifest: Option<&str>,
    timeout: Option<u64>,
    ctx: &BuildContext,
    runner: &dyn CommandRunner,
) -> Result<(), Error> {
    if let Some(manifest) = manifest {
        let manifest_path = ctx.resolve(manifest);
        let present = fs::metadata(ctx.confined_host_path(&manifest_path).await?)
            .await
            .is_ok_and(|m| m.is_file());
        if !present {
            return Err(BuildError::ManifestMissing {
                path: manifest_path,
            }
            .into());
        }
    }

    let request = CommandRequest {
        index,
        command: command.to_string(),
        image_dir: ctx.working_dir.clone(),
        host_dir: ctx.confined_host_path(&ctx.working_dir).await?,
        environment: ctx.environment.clone(),
    };

    let outcome = with_optional_timeout(runner.run(&request, ctx), timeout, |seconds| {
        BuildError::StepTimeout {
            command: command.to_string(),
            seconds,
        }
    })
    .await?;

    if outcome.success() {
        return Ok(());
    }

    let err = match manifest {
        Some(manifest) => BuildError::ManifestInstallFailed {
            manifest: manifest.to_string(),
            command: command.to_string(),
            exit_code: outcome.exit_code,
        },
        None => BuildError::StepExecution {
            command: command.to_string(),
            exit_code: outcome.exit_code,
        },
    };
    Err(err.into())
}

async fn execute_set_file_permissions(
    pattern: &str,
    mode: FileMode,
    policy: EmptyGlobPolicy,
    ctx: &BuildContext,
) -> Result<(), Error> {
    // Match against the image filesystem, rooted at `/`
    let image_pattern = ctx.resolve(pattern);
    let relative_pattern = image_pattern.trim_start_matches('/');

    let files: Vec<PathBuf> = match_glob(&ctx.image_root, relative_pattern, &[])?
        .into_iter()
        .filter(|m| !m.is_dir)
        .map(|m| ctx.image_root.join(m.relative))
        .collect();

    if files.is_empty() {
        return no_matches(pattern, policy, ctx);
    }

    for file in &files {
        // Entries reached through a link in a parent directory may sit
        // outside the image
        let confined = match ctx.image_path_of(file) {
            Some(image_path) => ctx.confined_host_path(image_path).await?,
            None => continue,
        };
        if &confined != file {
            ctx.emit_warning(format!(
                "skipping {} reached through a symbolic link",
                file.display()
            ));
            continue;
        }

        let meta = fs::symlink_metadata(file)
            .await
            .map_err(|e| Error::io_with_path(&e, file))?;
        // Links carry no mode of their own
        if meta.file_type().is_symlink() {
            continue;
        }
        let new_mode = mode.apply(meta.permissions().mode());
        fs::set_permissions(file, std::fs::Permissions::from_mode(new_mode))
            .await
            .map_err(|e| Error::io_with_path(&e, file))?;
    }

    ctx.emit_debug(format!(
        "Set mode {mode} on {} file(s) matching {image_pattern}",
        files.len()
    ));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_copy_target_placement() {
        let dest = Path::new("/stage/app");
        // Literal file into a directory keeps its name
        assert_eq!(
            copy_target(dest, true, Path::new("pyproject.toml"), Path::new("pyproject.toml"), false),
            PathBuf::from("/stage/app/pyproject.toml")
        );
        // Literal file onto a file path is renamed
        assert_eq!(
            copy_target(dest, false, Path::new("a.txt"), Path::new("a.txt"), false),
            PathBuf::from("/stage/app")
        );
        // Glob matches keep their path below the literal prefix
        assert_eq!(
            copy_target(dest, true, Path::new("docker"), Path::new("docker/run.sh"), false),
            PathBuf::from("/stage/app/run.sh")
        );
        assert_eq!(
            copy_target(dest, true, Path::new(""), Path::new("src"), true),
            PathBuf::from("/stage/app/src")
        );
        // Whole-tree and literal directory copies land in the destination
        assert_eq!(
            copy_target(dest, true, Path::new(""), Path::new(""), true),
            PathBuf::from("/stage/app")
        );
        assert_eq!(
            copy_target(dest, true, Path::new("static"), Path::new("static"), true),
            PathBuf::from("/stage/app")
        );
    }
}
