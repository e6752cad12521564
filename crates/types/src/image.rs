//! Finalized image descriptor

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// File name of the descriptor inside an image output directory
pub const DESCRIPTOR_FILE: &str = "image.json";

/// Directory holding the image filesystem inside an output directory
pub const ROOTFS_DIR: &str = "rootfs";

/// Immutable description of a successfully built image
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageDescriptor {
    /// Recipe name
    pub name: String,
    /// Recipe version
    pub version: String,
    /// Base image the build started from
    pub base_image: String,
    /// Working directory in effect when the sequence finished
    pub working_dir: String,
    /// Environment applied to every command
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub environment: BTreeMap<String, String>,
    /// Command the container runs by default
    pub startup_command: Option<String>,
    /// Number of steps executed
    pub steps: usize,
    /// Image filesystem, relative to the descriptor
    pub rootfs: PathBuf,
    pub created_at: DateTime<Utc>,
}

impl ImageDescriptor {
    /// Image reference in `name:version` form
    #[must_use]
    pub fn reference(&self) -> String {
        format!("{}:{}", self.name, self.version)
    }
}
