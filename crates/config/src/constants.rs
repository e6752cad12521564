//! Fixed defaults and environment variable names

/// Shell used to interpret run-command lines
pub const DEFAULT_SHELL: &str = "/bin/sh";

/// Output directory used when neither config nor CLI names one
pub const DEFAULT_OUTPUT_DIR: &str = "kiln-out";

/// Exported to every command so it can locate the image filesystem
pub const IMAGE_ROOT_ENV: &str = "KILN_IMAGE_ROOT";

pub const ENV_OUTPUT: &str = "KILN_OUTPUT";
pub const ENV_COLOR: &str = "KILN_COLOR";
pub const ENV_EMPTY_GLOB: &str = "KILN_EMPTY_GLOB";
pub const ENV_STEP_TIMEOUT: &str = "KILN_STEP_TIMEOUT";
pub const ENV_SEQUENCE_TIMEOUT: &str = "KILN_SEQUENCE_TIMEOUT";
pub const ENV_SHELL: &str = "KILN_SHELL";
