//! YAML recipe format for kiln
//!
//! A recipe names a base image and lists the provisioning steps applied on
//! top of it, in order.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Complete YAML recipe structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct YamlRecipe {
    /// Image metadata (required)
    pub metadata: Metadata,

    /// Base image identity (required)
    pub base: String,

    /// Dynamic facts/variables (optional)
    #[serde(default)]
    pub facts: BTreeMap<String, String>,

    /// Environment applied to every command (optional)
    #[serde(default)]
    pub environment: Environment,

    /// Provisioning steps, executed in declared order (required)
    pub steps: Vec<ParsedStep>,
}

/// Image metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Metadata {
    pub name: String,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub description: Option<String>,
}

fn default_version() -> String {
    "latest".to_string()
}

/// Environment setup
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Environment {
    /// Environment variables
    #[serde(default)]
    pub variables: BTreeMap<String, String>,
}

/// Parsed build step from YAML recipe
///
/// Misspelled keys fail to parse instead of being dropped.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged, deny_unknown_fields)]
pub enum ParsedStep {
    Mkdir {
        mkdir: String,
    },
    Workdir {
        workdir: String,
    },
    Copy {
        copy: CopySpec,
    },
    // Shell command (passed to sh -c, supports pipes/redirects/etc)
    Run {
        run: String,
        /// Dependency manifest the command installs from
        #[serde(default)]
        manifest: Option<String>,
        /// Timeout in seconds, overriding the configured default
        #[serde(default)]
        timeout: Option<u64>,
    },
    Chmod {
        chmod: ChmodSpec,
    },
    Cmd {
        cmd: String,
    },
}

/// Copy specification
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CopySpec {
    /// Glob relative to the source tree
    pub from: String,
    /// Destination inside the image
    pub to: String,
    #[serde(default)]
    pub allow_empty: Option<bool>,
}

/// Permission specification
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChmodSpec {
    /// Glob over the image filesystem
    pub path: String,
    /// `executable` or an octal mode
    pub mode: ModeSpec,
    #[serde(default)]
    pub allow_empty: Option<bool>,
}

/// A file mode as written in YAML: `executable`, `"0755"` or a bare `755`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ModeSpec {
    Number(u32),
    Text(String),
}

impl std::fmt::Display for ModeSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            // Bare numbers are read as octal digits
            Self::Number(digits) => write!(f, "{digits}"),
            Self::Text(text) => f.write_str(text),
        }
    }
}
