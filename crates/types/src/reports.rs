//! Report types for CLI rendering

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Build report
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BuildReport {
    /// Image reference (`name:version`)
    pub image: String,
    /// Base image the build started from
    pub base_image: String,
    /// Output directory holding the descriptor and filesystem
    pub output_path: PathBuf,
    /// Recorded startup command
    pub startup_command: Option<String>,
    /// Number of steps executed
    pub steps_executed: usize,
    /// Build duration
    pub duration_ms: u64,
}
