//! Build step definitions

use crate::EmptyGlobPolicy;
use kiln_errors::BuildError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One declarative provisioning instruction, with its position in the recipe
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildStep {
    /// 1-based declared order; strictly increasing across a step list
    pub index: usize,
    #[serde(flatten)]
    pub kind: StepKind,
}

impl BuildStep {
    #[must_use]
    pub fn new(index: usize, kind: StepKind) -> Self {
        Self { index, kind }
    }
}

impl fmt::Display for BuildStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.index, self.kind)
    }
}

/// The action a build step performs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum StepKind {
    /// Ensure a directory exists in the image
    CreateDirectory { path: String },

    /// Change the directory later relative paths resolve against
    SetWorkingDirectory { path: String },

    /// Copy host files matching `source` into the image at `destination`
    CopyFiles {
        source: String,
        destination: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        empty_glob: Option<EmptyGlobPolicy>,
    },

    /// Run a command line in the build environment
    RunCommand {
        command: String,
        /// Dependency manifest this command installs from
        #[serde(default, skip_serializing_if = "Option::is_none")]
        manifest: Option<String>,
        /// Per-step timeout in seconds
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timeout: Option<u64>,
    },

    /// Change the mode of image files matching `pattern`
    SetFilePermissions {
        pattern: String,
        mode: FileMode,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        empty_glob: Option<EmptyGlobPolicy>,
    },

    /// Record the container's startup command
    SetStartupCommand { command: String },
}

impl StepKind {
    /// Stable kebab-case name of the action
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::CreateDirectory { .. } => "create-directory",
            Self::SetWorkingDirectory { .. } => "set-working-directory",
            Self::CopyFiles { .. } => "copy-files",
            Self::RunCommand { .. } => "run-command",
            Self::SetFilePermissions { .. } => "set-file-permissions",
            Self::SetStartupCommand { .. } => "set-startup-command",
        }
    }

    /// Positional arguments of the action
    #[must_use]
    pub fn arguments(&self) -> Vec<String> {
        match self {
            Self::CreateDirectory { path } | Self::SetWorkingDirectory { path } => {
                vec![path.clone()]
            }
            Self::CopyFiles {
                source,
                destination,
                ..
            } => vec![source.clone(), destination.clone()],
            Self::RunCommand { command, .. } | Self::SetStartupCommand { command } => {
                vec![command.clone()]
            }
            Self::SetFilePermissions { pattern, mode, .. } => {
                vec![pattern.clone(), mode.to_string()]
            }
        }
    }
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CopyFiles {
                source,
                destination,
                ..
            } => write!(f, "{} {source} -> {destination}", self.name()),
            _ => write!(f, "{} {}", self.name(), self.arguments().join(" ")),
        }
    }
}

/// File mode applied by a set-file-permissions step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum FileMode {
    /// Add execute bits wherever the matching read bit is set
    Executable,
    /// Replace the permission bits with this octal mode
    Exact(u32),
}

impl FileMode {
    /// Compute the new mode from the file's current mode
    #[must_use]
    pub fn apply(self, current: u32) -> u32 {
        match self {
            Self::Executable => current | ((current & 0o444) >> 2),
            Self::Exact(mode) => (current & !0o7777) | mode,
        }
    }
}

impl FromStr for FileMode {
    type Err = BuildError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        match trimmed {
            "executable" | "+x" | "a+x" => Ok(Self::Executable),
            _ => {
                let digits = trimmed.strip_prefix("0o").unwrap_or(trimmed);
                if (3..=4).contains(&digits.len()) {
                    if let Ok(mode) = u32::from_str_radix(digits, 8) {
                        return Ok(Self::Exact(mode));
                    }
                }
                Err(BuildError::InvalidMode {
                    mode: s.to_string(),
                })
            }
        }
    }
}

impl TryFrom<String> for FileMode {
    type Error = BuildError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<FileMode> for String {
    fn from(mode: FileMode) -> Self {
        mode.to_string()
    }
}

impl fmt::Display for FileMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Executable => write!(f, "executable"),
            Self::Exact(mode) => write!(f, "{mode:o}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_modes() {
        assert_eq!("executable".parse::<FileMode>().unwrap(), FileMode::Executable);
        assert_eq!("+x".parse::<FileMode>().unwrap(), FileMode::Executable);
        assert_eq!("755".parse::<FileMode>().unwrap(), FileMode::Exact(0o755));
        assert_eq!("0o644".parse::<FileMode>().unwrap(), FileMode::Exact(0o644));
        assert!("rwx".parse::<FileMode>().is_err());
        assert!("7".parse::<FileMode>().is_err());
        assert!("888".parse::<FileMode>().is_err());
    }

    #[test]
    fn test_executable_mirrors_read_bits() {
        assert_eq!(FileMode::Executable.apply(0o100_644), 0o100_755);
        assert_eq!(FileMode::Executable.apply(0o100_600), 0o100_700);
        assert_eq!(FileMode::Exact(0o700).apply(0o100_644), 0o100_700);
    }

    #[test]
    fn test_step_display() {
        let step = BuildStep::new(
            3,
            StepKind::CopyFiles {
                source: "pyproject.toml".into(),
                destination: "/app".into(),
                empty_glob: None,
            },
        );
        assert_eq!(step.to_string(), "[3] copy-files pyproject.toml -> /app");
        assert_eq!(step.kind.name(), "copy-files");
    }
}
