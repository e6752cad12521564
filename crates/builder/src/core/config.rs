//! Build configuration

use kiln_types::EmptyGlobPolicy;
use std::path::PathBuf;

/// Settings the sequencer applies to every build
#[derive(Debug, Clone)]
pub struct BuildOptions {
    /// Policy for copy/permission patterns that match nothing, unless a step
    /// overrides it
    pub empty_glob: EmptyGlobPolicy,
    /// Default per-command timeout in seconds
    pub step_timeout: Option<u64>,
    /// Whole-sequence timeout in seconds
    pub sequence_timeout: Option<u64>,
    /// Shell interpreting run-command lines
    pub shell: String,
    /// Directory seeding the image filesystem
    pub base_rootfs: Option<PathBuf>,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            empty_glob: EmptyGlobPolicy::Fail,
            step_timeout: None,
            sequence_timeout: None,
            shell: kiln_config::constants::DEFAULT_SHELL.to_string(),
            base_rootfs: None,
        }
    }
}

impl From<&kiln_config::BuildConfig> for BuildOptions {
    fn from(config: &kiln_config::BuildConfig) -> Self {
        Self {
            empty_glob: config.empty_glob,
            step_timeout: config.step_timeout(),
            sequence_timeout: config.sequence_timeout(),
            shell: config.shell.clone(),
            base_rootfs: config.base_rootfs.clone(),
        }
    }
}

impl BuildOptions {
    #[must_use]
    pub fn with_empty_glob(mut self, policy: EmptyGlobPolicy) -> Self {
        self.empty_glob = policy;
        self
    }

    #[must_use]
    pub fn with_step_timeout(mut self, seconds: Option<u64>) -> Self {
        self.step_timeout = seconds.filter(|s| *s > 0);
        self
    }

    #[must_use]
    pub fn with_sequence_timeout(mut self, seconds: Option<u64>) -> Self {
        self.sequence_timeout = seconds.filter(|s| *s > 0);
        self
    }

    #[must_use]
    pub fn with_base_rootfs(mut self, path: PathBuf) -> Self {
        self.base_rootfs = Some(path);
        self
    }

    /// Effective policy for a step, honouring its own override
    #[must_use]
    pub fn empty_glob_for(&self, step_override: Option<EmptyGlobPolicy>) -> EmptyGlobPolicy {
        step_override.unwrap_or(self.empty_glob)
    }
}
