//! Command execution inside the build environment

use crate::core::context::BuildContext;
use async_trait::async_trait;
use kiln_config::constants::IMAGE_ROOT_ENV;
use kiln_errors::{BuildError, Error};
use kiln_events::EventEmitter;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;

/// A command line ready to run for one step
#[derive(Debug, Clone)]
pub struct CommandRequest {
    /// Index of the step issuing the command
    pub index: usize,
    pub command: String,
    /// Execution directory inside the image
    pub image_dir: String,
    /// Host location of `image_dir`
    pub host_dir: PathBuf,
    pub environment: BTreeMap<String, String>,
}

/// Result of a finished command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandOutcome {
    /// Exit status, `None` when the process was killed by a signal
    pub exit_code: Option<i32>,
}

impl CommandOutcome {
    #[must_use]
    pub fn success(self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Runs run-command lines on behalf of the sequencer
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run a command to completion
    ///
    /// # Errors
    ///
    /// Returns an error only if the command could not be started or waited
    /// on. A non-zero exit is reported through the outcome.
    async fn run(&self, request: &CommandRequest, ctx: &BuildContext)
        -> Result<CommandOutcome, Error>;
}

/// Default runner: interprets each command line with a POSIX shell
#[derive(Debug, Clone)]
pub struct ShellRunner {
    shell: String,
}

impl ShellRunner {
    #[must_use]
    pub fn new(shell: impl Into<String>) -> Self {
        Self {
            shell: shell.into(),
        }
    }
}

impl Default for ShellRunner {
    fn default() -> Self {
        Self::new(kiln_config::constants::DEFAULT_SHELL)
    }
}

#[async_trait]
impl CommandRunner for ShellRunner {
    async fn run(
        &self,
        request: &CommandRequest,
        ctx: &BuildContext,
    ) -> Result<CommandOutcome, Error> {
        ctx.emit_debug_with_context(
            format!("Executing: {} -c {}", self.shell, request.command),
            HashMap::from([
                ("working_dir".to_string(), request.image_dir.clone()),
                ("host_dir".to_string(), request.host_dir.display().to_string()),
            ]),
        );

        let mut child = Command::new(&self.shell)
            .arg("-c")
            .arg(&request.command)
            .current_dir(&request.host_dir)
            .envs(&request.environment)
            .env(IMAGE_ROOT_ENV, &ctx.image_root)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| BuildError::SpawnFailed {
                command: request.command.clone(),
                message: e.to_string(),
            })?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let (_, _, status) = tokio::join!(
            forward_lines(stdout, ctx, request.index, false),
            forward_lines(stderr, ctx, request.index, true),
            child.wait()
        );

        let status = status.map_err(|e| BuildError::SpawnFailed {
            command: request.command.clone(),
            message: e.to_string(),
        })?;

        Ok(CommandOutcome {
            exit_code: status.code(),
        })
    }
}

async fn forward_lines<R>(stream: Option<R>, ctx: &BuildContext, index: usize, is_stderr: bool)
where
    R: AsyncRead + Unpin,
{
    let Some(stream) = stream else {
        return;
    };
    // Drain to EOF whatever the encoding
    let mut reader = BufReader::new(stream);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(_) => {
                let line = buf.strip_suffix(b"\n").unwrap_or(&buf[..]);
                let line = line.strip_suffix(b"\r").unwrap_or(line);
                ctx.emit_output(index, String::from_utf8_lossy(line).into_owned(), is_stderr);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_events::{AppEvent, BuildEvent};
    use tempfile::TempDir;

    fn request(command: &str, dir: &TempDir) -> CommandRequest {
        CommandRequest {
            index: 4,
            command: command.to_string(),
            image_dir: "/".to_string(),
            host_dir: dir.path().to_path_buf(),
            environment: BTreeMap::from([("GREETING".to_string(), "hi".to_string())]),
        }
    }

    #[tokio::test]
    async fn test_shell_runner_forwards_output() {
        let temp = TempDir::new().unwrap();
        let (tx, mut rx) = kiln_events::channel();
        let ctx = BuildContext::new("scratch".into(), temp.path().to_path_buf(), temp.path().into())
            .with_event_sender(Some(tx));

        let outcome = ShellRunner::default()
            .run(&request("echo $GREETING; echo oops >&2", &temp), &ctx)
            .await
            .unwrap();
        assert!(outcome.success());
        drop(ctx);

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        while let Some(message) = rx.recv().await {
            if let AppEvent::Build(BuildEvent::StepOutput {
                index,
                line,
                is_stderr,
                ..
            }) = message.event
            {
                assert_eq!(index, 4);
                if is_stderr {
                    stderr.push(line);
                } else {
                    stdout.push(line);
                }
            }
        }
        assert_eq!(stdout, vec!["hi".to_string()]);
        assert_eq!(stderr, vec!["oops".to_string()]);
    }

    #[tokio::test]
    async fn test_invalid_utf8_output_is_drained() {
        let temp = TempDir::new().unwrap();
        let (tx, mut rx) = kiln_events::channel();
        let ctx = BuildContext::new("scratch".into(), temp.path().to_path_buf(), temp.path().into())
            .with_event_sender(Some(tx));

        // Enough output after the bad byte to fill the pipe buffer
        let outcome = ShellRunner::default()
            .run(
                &request(
                    "printf '\\377\\n'; head -c 300000 /dev/zero | tr '\\0' a; echo; echo done",
                    &temp,
                ),
                &ctx,
            )
            .await
            .unwrap();
        assert_eq!(outcome.exit_code, Some(0));
        drop(ctx);

        let mut lines = Vec::new();
        while let Some(message) = rx.recv().await {
            if let AppEvent::Build(BuildEvent::StepOutput { line, is_stderr: false, .. }) =
                message.event
            {
                lines.push(line);
            }
        }
        assert_eq!(lines.first().map(String::as_str), Some("\u{FFFD}"));
        assert_eq!(lines.get(1).map(String::len), Some(300_000));
        assert_eq!(lines.last().map(String::as_str), Some("done"));
    }

    #[tokio::test]
    async fn test_shell_runner_reports_exit_code() {
        let temp = TempDir::new().unwrap();
        let ctx = BuildContext::new("scratch".into(), temp.path().to_path_buf(), temp.path().into());

        let outcome = ShellRunner::default()
            .run(&request("exit 3", &temp), &ctx)
            .await
            .unwrap();
        assert_eq!(outcome.exit_code, Some(3));
        assert!(!outcome.success());
    }

    #[tokio::test]
    async fn test_shell_runner_exports_image_root() {
        let temp = TempDir::new().unwrap();
        let ctx = BuildContext::new("scratch".into(), temp.path().to_path_buf(), temp.path().into());

        let outcome = ShellRunner::default()
            .run(
                &request("touch \"$KILN_IMAGE_ROOT/marker\"", &temp),
                &ctx,
            )
            .await
            .unwrap();
        assert!(outcome.success());
        assert!(temp.path().join("marker").exists());
    }

    #[tokio::test]
    async fn test_missing_shell_is_spawn_failure() {
        let temp = TempDir::new().unwrap();
        let ctx = BuildContext::new("scratch".into(), temp.path().to_path_buf(), temp.path().into());

        let err = ShellRunner::new("/nonexistent/shell")
            .run(&request("true", &temp), &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Build(BuildError::SpawnFailed { .. })));
    }
}
