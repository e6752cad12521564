//! Build plan representation for sequential execution

use crate::recipe::{ModeSpec, ParsedStep, YamlRecipe};
use kiln_errors::{BuildError, Error};
use kiln_types::{BuildStep, EmptyGlobPolicy, FileMode, StepKind};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Component, Path};

/// Image identity taken from the recipe
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecipeMetadata {
    pub name: String,
    pub version: String,
    pub description: Option<String>,
}

/// Complete build plan extracted from a recipe
///
/// Steps carry their 1-based declared order; the sequencer runs them in
/// exactly that order.
#[derive(Debug, Clone, Serialize)]
pub struct BuildPlan {
    pub metadata: RecipeMetadata,

    /// Base image identity, fixed for the whole sequence
    pub base_image: String,

    /// Environment variables applied to every command
    pub environment: BTreeMap<String, String>,

    pub steps: Vec<BuildStep>,
}

impl BuildPlan {
    /// Create a plan from step kinds, numbering them in order
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        version: impl Into<String>,
        base_image: impl Into<String>,
        steps: impl IntoIterator<Item = StepKind>,
    ) -> Self {
        Self {
            metadata: RecipeMetadata {
                name: name.into(),
                version: version.into(),
                description: None,
            },
            base_image: base_image.into(),
            environment: BTreeMap::new(),
            steps: number_steps(steps),
        }
    }

    /// Set an environment variable for every command
    #[must_use]
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment.insert(key.into(), value.into());
        self
    }

    /// Create a build plan from a YAML recipe
    ///
    /// # Errors
    ///
    /// Returns an error if a copy source escapes the source tree or a file
    /// mode does not parse.
    pub fn from_yaml(recipe: &YamlRecipe) -> Result<Self, Error> {
        let steps = recipe
            .steps
            .iter()
            .map(convert_step)
            .collect::<Result<Vec<_>, Error>>()?;

        Ok(Self {
            metadata: RecipeMetadata {
                name: recipe.metadata.name.clone(),
                version: recipe.metadata.version.clone(),
                description: recipe.metadata.description.clone(),
            },
            base_image: recipe.base.clone(),
            environment: recipe.environment.variables.clone(),
            steps: number_steps(steps),
        })
    }

    /// Image reference in `name:version` form
    #[must_use]
    pub fn reference(&self) -> String {
        format!("{}:{}", self.metadata.name, self.metadata.version)
    }

    /// The startup command the plan will record: the last one declared
    #[must_use]
    pub fn startup_command(&self) -> Option<&str> {
        self.steps.iter().rev().find_map(|step| match &step.kind {
            StepKind::SetStartupCommand { command } => Some(command.as_str()),
            _ => None,
        })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

fn number_steps(steps: impl IntoIterator<Item = StepKind>) -> Vec<BuildStep> {
    steps
        .into_iter()
        .enumerate()
        .map(|(position, kind)| BuildStep::new(position + 1, kind))
        .collect()
}

fn allow_empty_policy(allow_empty: Option<bool>) -> Option<EmptyGlobPolicy> {
    allow_empty.map(|allow| {
        if allow {
            EmptyGlobPolicy::Ignore
        } else {
            EmptyGlobPolicy::Fail
        }
    })
}

fn convert_step(step: &ParsedStep) -> Result<StepKind, Error> {
    let kind = match step {
        ParsedStep::Mkdir { mkdir } => StepKind::CreateDirectory {
            path: mkdir.clone(),
        },
        ParsedStep::Workdir { workdir } => StepKind::SetWorkingDirectory {
            path: workdir.clone(),
        },
        ParsedStep::Copy { copy } => {
            validate_copy_source(&copy.from)?;
            StepKind::CopyFiles {
                source: copy.from.clone(),
                destination: copy.to.clone(),
                empty_glob: allow_empty_policy(copy.allow_empty),
            }
        }
        ParsedStep::Run {
            run,
            manifest,
            timeout,
        } => StepKind::RunCommand {
            command: run.clone(),
            manifest: manifest.clone(),
            timeout: *timeout,
        },
        ParsedStep::Chmod { chmod } => StepKind::SetFilePermissions {
            pattern: chmod.path.clone(),
            mode: file_mode(&chmod.mode)?,
            empty_glob: allow_empty_policy(chmod.allow_empty),
        },
        ParsedStep::Cmd { cmd } => StepKind::SetStartupCommand {
            command: cmd.clone(),
        },
    };
    Ok(kind)
}

/// Bare YAML numbers are read as octal digits, so `755` means `0o755`
fn file_mode(mode: &ModeSpec) -> Result<FileMode, BuildError> {
    match mode {
        ModeSpec::Text(text) => text.parse(),
        ModeSpec::Number(value) => value
            .to_string()
            .parse()
            .map_err(|_| BuildError::UnquotedMode { value: *value }),
    }
}

/// Copy sources are host paths relative to the source tree and must stay in it
pub(crate) fn validate_copy_source(source: &str) -> Result<(), BuildError> {
    let path = Path::new(source);
    if path.is_absolute() {
        return Err(BuildError::InvalidPath {
            path: source.to_string(),
            reason: "copy source must be relative to the source tree".to_string(),
        });
    }
    if path.components().any(|c| matches!(c, Component::ParentDir)) {
        return Err(BuildError::InvalidPath {
            path: source.to_string(),
            reason: "copy source must not leave the source tree".to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recipe::parse_yaml_recipe_from_string;

    const RECIPE: &str = r#"
metadata:
  name: fastapi-app
  version: 0.1.0
base: python:3.11
steps:
  - mkdir: /app
  - workdir: /app
  - copy: { from: pyproject.toml, to: /app }
  - run: poetry install
    manifest: pyproject.toml
  - copy: { from: ".", to: "." }
  - chmod: { path: docker/*.sh, mode: 755, allow_empty: false }
  - cmd: run-migrations head
"#;

    #[test]
    fn test_steps_numbered_from_one() {
        let recipe = parse_yaml_recipe_from_string(RECIPE).unwrap();
        let plan = BuildPlan::from_yaml(&recipe).unwrap();

        let indices: Vec<usize> = plan.steps.iter().map(|s| s.index).collect();
        assert_eq!(indices, vec![1, 2, 3, 4, 5, 6, 7]);
        assert_eq!(plan.reference(), "fastapi-app:0.1.0");
        assert_eq!(plan.startup_command(), Some("run-migrations head"));
        assert_eq!(
            plan.steps[5].kind,
            StepKind::SetFilePermissions {
                pattern: "docker/*.sh".into(),
                mode: FileMode::Exact(0o755),
                empty_glob: Some(EmptyGlobPolicy::Fail),
            }
        );
    }

    #[test]
    fn test_last_startup_command_wins() {
        let plan = BuildPlan::new(
            "app",
            "1",
            "scratch",
            [
                StepKind::SetStartupCommand {
                    command: "first".into(),
                },
                StepKind::CreateDirectory { path: "/x".into() },
                StepKind::SetStartupCommand {
                    command: "second".into(),
                },
            ],
        );
        assert_eq!(plan.startup_command(), Some("second"));
    }

    #[test]
    fn test_copy_source_must_stay_in_tree() {
        assert!(validate_copy_source("src/*.py").is_ok());
        assert!(validate_copy_source(".").is_ok());
        assert!(matches!(
            validate_copy_source("/etc/passwd"),
            Err(BuildError::InvalidPath { .. })
        ));
        assert!(matches!(
            validate_copy_source("../secrets"),
            Err(BuildError::InvalidPath { .. })
        ));
    }

    #[test]
    fn test_bad_mode_rejected() {
        let yaml = r"
metadata:
  name: app
base: scratch
steps:
  - chmod: { path: bin/*, mode: sometimes }
";
        let recipe = parse_yaml_recipe_from_string(yaml).unwrap();
        let err = BuildPlan::from_yaml(&recipe).unwrap_err();
        assert!(matches!(
            err,
            Error::Build(BuildError::InvalidMode { .. })
        ));
    }

    #[test]
    fn test_unquoted_octal_mode_asks_for_quotes() {
        // YAML reads 0o755 as the integer 493
        let yaml = r"
metadata:
  name: app
base: scratch
steps:
  - chmod: { path: bin/*, mode: 0o755 }
";
        let recipe = parse_yaml_recipe_from_string(yaml).unwrap();
        let err = BuildPlan::from_yaml(&recipe).unwrap_err();
        assert!(matches!(
            err,
            Error::Build(BuildError::UnquotedMode { value: 493 })
        ));
        assert!(err.to_string().contains("quote octal modes"));

        let quoted = yaml.replace("mode: 0o755", r#"mode: "0o755""#);
        let plan = BuildPlan::from_yaml(&parse_yaml_recipe_from_string(&quoted).unwrap()).unwrap();
        assert!(matches!(
            plan.steps[0].kind,
            StepKind::SetFilePermissions {
                mode: FileMode::Exact(0o755),
                ..
            }
        ));
    }
}
