//! Build environment: how commands reach the image filesystem

mod execution;

pub use execution::{CommandOutcome, CommandRequest, CommandRunner, ShellRunner};
