//! YAML recipe parser with validation and variable expansion

use super::model::{ModeSpec, ParsedStep, YamlRecipe};
use kiln_errors::{BuildError, Error};
use std::collections::BTreeMap;
use std::path::Path;

/// Parse a YAML recipe from a file
///
/// # Errors
///
/// Returns an error if:
/// - The file cannot be read
/// - The YAML is invalid
/// - Required fields are missing
/// - Validation fails
pub async fn parse_yaml_recipe(path: &Path) -> Result<YamlRecipe, Error> {
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| BuildError::RecipeError {
            message: format!("failed to read recipe {}: {e}", path.display()),
        })?;

    parse_yaml_recipe_from_string(&content)
}

/// Parse a YAML recipe from a string
///
/// # Errors
///
/// Returns an error if:
/// - The YAML is invalid
/// - Required fields are missing
/// - Validation fails
pub fn parse_yaml_recipe_from_string(content: &str) -> Result<YamlRecipe, Error> {
    let mut recipe: YamlRecipe = serde_yml::from_str(content).map_err(|e| {
        let mut message = format!("failed to parse YAML: {e}");
        if message.contains("untagged enum ParsedStep") {
            message.push_str(" (unknown step kind or misspelled step key)");
        }
        BuildError::RecipeError { message }
    })?;

    validate_recipe(&recipe)?;

    expand_variables(&mut recipe);

    Ok(recipe)
}

fn recipe_error(message: impl Into<String>) -> Error {
    BuildError::RecipeError {
        message: message.into(),
    }
    .into()
}

/// Validate a parsed recipe
fn validate_recipe(recipe: &YamlRecipe) -> Result<(), Error> {
    if recipe.metadata.name.trim().is_empty() {
        return Err(recipe_error("metadata.name cannot be empty"));
    }

    if recipe.metadata.version.trim().is_empty() {
        return Err(recipe_error("metadata.version cannot be empty"));
    }

    if recipe.base.trim().is_empty() {
        return Err(recipe_error("base cannot be empty"));
    }

    if recipe.steps.is_empty() {
        return Err(recipe_error("steps cannot be empty"));
    }

    for (position, step) in recipe.steps.iter().enumerate() {
        let index = position + 1;
        let empty = match step {
            ParsedStep::Mkdir { mkdir: value }
            | ParsedStep::Workdir { workdir: value }
            | ParsedStep::Run { run: value, .. }
            | ParsedStep::Cmd { cmd: value } => value.trim().is_empty(),
            ParsedStep::Copy { copy } => copy.from.trim().is_empty() || copy.to.trim().is_empty(),
            ParsedStep::Chmod { chmod } => chmod.path.trim().is_empty(),
        };
        if empty {
            return Err(recipe_error(format!("step {index} has an empty argument")));
        }
    }

    Ok(())
}

/// Expand variables in the recipe using facts and built-in variables
fn expand_variables(recipe: &mut YamlRecipe) {
    let mut context = BTreeMap::new();

    // Built-in variables
    context.insert("NAME".to_string(), recipe.metadata.name.clone());
    context.insert("VERSION".to_string(), recipe.metadata.version.clone());
    context.insert("BASE".to_string(), recipe.base.clone());

    for (key, value) in &recipe.facts {
        context.insert(key.clone(), value.clone());
    }

    // Environment values may reference facts
    for value in recipe.environment.variables.values_mut() {
        *value = expand_string(value, &context);
    }
    for (key, value) in &recipe.environment.variables {
        context.insert(key.clone(), value.clone());
    }

    for step in &mut recipe.steps {
        expand_step(step, &context);
    }
}

/// Expand `${VAR}` references in a single string
///
/// Unknown variables are left in place so the shell can still see them.
pub(crate) fn expand_string(input: &str, context: &BTreeMap<String, String>) -> String {
    let mut result = input.to_string();
    for (key, value) in context {
        result = result.replace(&format!("${{{key}}}"), value);
    }
    result
}

fn expand_step(step: &mut ParsedStep, context: &BTreeMap<String, String>) {
    match step {
        ParsedStep::Mkdir { mkdir } => *mkdir = expand_string(mkdir, context),
        ParsedStep::Workdir { workdir } => *workdir = expand_string(workdir, context),
        ParsedStep::Copy { copy } => {
            copy.from = expand_string(&copy.from, context);
            copy.to = expand_string(&copy.to, context);
        }
        ParsedStep::Run { run, manifest, .. } => {
            *run = expand_string(run, context);
            if let Some(manifest) = manifest {
                *manifest = expand_string(manifest, context);
            }
        }
        ParsedStep::Chmod { chmod } => {
            chmod.path = expand_string(&chmod.path, context);
            if let ModeSpec::Text(mode) = &mut chmod.mode {
                *mode = expand_string(mode, context);
            }
        }
        ParsedStep::Cmd { cmd } => *cmd = expand_string(cmd, context),
    }
}
