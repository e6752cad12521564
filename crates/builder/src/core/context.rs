//! Build context threaded through step execution

use crate::utils::fileops::{normalize_image_path, resolve_in_root};
use kiln_errors::Error;
use kiln_events::{AppEvent, BuildEvent, EventEmitter, EventSender};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Ambient state of one build sequence
///
/// Created at sequence start, mutated only by the step that owns each field,
/// and consumed to produce the image descriptor.
#[derive(Clone, Debug)]
pub struct BuildContext {
    /// Session identifier used to correlate events
    pub session_id: String,
    /// Base image identity, fixed at sequence start
    pub base_image: String,
    /// Current directory inside the image, always absolute and normalized
    pub working_dir: String,
    /// Recorded startup command; the last writer wins
    pub startup_command: Option<String>,
    /// Environment applied to every command
    pub environment: BTreeMap<String, String>,
    /// Host directory holding the image filesystem
    pub image_root: PathBuf,
    /// Host source tree copy steps read from
    pub source_root: PathBuf,
    /// Host paths under the source tree that copy steps never read
    pub excluded: Vec<PathBuf>,
    /// Step currently executing
    pub current_step: Option<usize>,
    /// Event sender for progress reporting
    pub event_sender: Option<EventSender>,
}

impl EventEmitter for BuildContext {
    fn event_sender(&self) -> Option<&EventSender> {
        self.event_sender.as_ref()
    }
}

impl BuildContext {
    /// Create new build context rooted at `/`
    #[must_use]
    pub fn new(base_image: String, image_root: PathBuf, source_root: PathBuf) -> Self {
        Self {
            session_id: format!("build-{}", uuid::Uuid::new_v4()),
            base_image,
            working_dir: "/".to_string(),
            startup_command: None,
            environment: BTreeMap::new(),
            image_root,
            source_root,
            excluded: Vec::new(),
            current_step: None,
            event_sender: None,
        }
    }

    /// Set event sender
    #[must_use]
    pub fn with_event_sender(mut self, event_sender: Option<EventSender>) -> Self {
        self.event_sender = event_sender;
        self
    }

    /// Set the command environment
    #[must_use]
    pub fn with_environment(mut self, environment: BTreeMap<String, String>) -> Self {
        self.environment = environment;
        self
    }

    /// Set the host paths copy steps skip in the source tree
    #[must_use]
    pub fn with_excluded(mut self, excluded: Vec<PathBuf>) -> Self {
        self.excluded = excluded;
        self
    }

    #[must_use]
    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = session_id.into();
        self
    }

    /// Resolve an image path against the current working directory
    #[must_use]
    pub fn resolve(&self, path: &str) -> String {
        normalize_image_path(&self.working_dir, path)
    }

    /// Host location of an absolute image path with symlinks resolved
    /// inside the image root, safe to write through
    ///
    /// # Errors
    ///
    /// Returns an error if the path crosses a symlink loop.
    pub async fn confined_host_path(&self, image_path: impl AsRef<Path>) -> Result<PathBuf, Error> {
        resolve_in_root(&self.image_root, image_path.as_ref()).await
    }

    /// Map a host path under the image root back to its image path
    #[must_use]
    pub fn image_path_of(&self, host: &Path) -> Option<String> {
        host.strip_prefix(&self.image_root)
            .ok()
            .map(|rel| format!("/{}", rel.to_string_lossy()))
    }

    /// Forward one line of command output
    pub fn emit_output(&self, index: usize, line: String, is_stderr: bool) {
        self.emit(AppEvent::Build(BuildEvent::StepOutput {
            session_id: self.session_id.clone(),
            index,
            line,
            is_stderr,
        }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolution_follows_working_dir() {
        let mut ctx = BuildContext::new(
            "python:3.11".into(),
            PathBuf::from("/tmp/stage/rootfs"),
            PathBuf::from("/src"),
        );
        assert_eq!(ctx.resolve("app"), "/app");

        ctx.working_dir = "/app".into();
        assert_eq!(ctx.resolve("."), "/app");
        assert_eq!(ctx.resolve("lib/x.py"), "/app/lib/x.py");
        assert_eq!(ctx.resolve("/etc/hosts"), "/etc/hosts");
        assert_eq!(ctx.resolve("../config"), "/config");
        assert_eq!(
            ctx.image_path_of(Path::new("/tmp/stage/rootfs/app/run.sh")),
            Some("/app/run.sh".to_string())
        );
    }

    #[tokio::test]
    async fn test_confined_host_path_stays_in_image() {
        let temp = tempfile::TempDir::new().unwrap();
        let root = temp.path().join("rootfs");
        let outside = temp.path().join("outside");
        std::fs::create_dir_all(&root).unwrap();
        std::fs::create_dir_all(&outside).unwrap();
        std::os::unix::fs::symlink(&outside, root.join("data")).unwrap();

        let ctx = BuildContext::new("alpine".into(), root.clone(), PathBuf::from("/src"));
        let host = ctx.confined_host_path("/data/created").await.unwrap();
        assert!(host.starts_with(&root));
        assert!(!host.starts_with(&outside));
        assert_eq!(
            ctx.confined_host_path("/app/run.sh").await.unwrap(),
            root.join("app/run.sh")
        );
    }
}
