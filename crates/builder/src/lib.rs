#![deny(clippy::pedantic, unsafe_code)]
#![allow(clippy::module_name_repetitions)]
//! Image building from YAML recipes for kiln
//!
//! This crate parses recipes into ordered build plans and executes them
//! against a staging filesystem, one step at a time. A build either
//! publishes a complete image or nothing.

mod build_plan;
mod core;
mod environment;
mod recipe;
mod stages;
mod utils;

pub use build_plan::{BuildPlan, RecipeMetadata};
pub use crate::core::builder::{load_descriptor, sequence_state, BuildOutcome, BuildRequest, Builder};
pub use crate::core::config::BuildOptions;
pub use crate::core::context::BuildContext;
pub use environment::{CommandOutcome, CommandRequest, CommandRunner, ShellRunner};

// Re-export recipe types
pub use recipe::{
    parse_yaml_recipe, parse_yaml_recipe_from_string, ChmodSpec, CopySpec, ModeSpec, ParsedStep,
    YamlRecipe,
};

use kiln_errors::Error;
use std::path::Path;

/// Parse a recipe file straight into a build plan
///
/// # Errors
///
/// Returns an error if the recipe cannot be read, parsed or validated.
pub async fn load_plan(path: &Path) -> Result<BuildPlan, Error> {
    let recipe = parse_yaml_recipe(path).await?;
    BuildPlan::from_yaml(&recipe)
}
