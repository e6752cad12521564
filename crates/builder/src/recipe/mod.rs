//! Recipe parsing

pub mod model;
pub mod parser;

pub use model::{ChmodSpec, CopySpec, ModeSpec, ParsedStep, YamlRecipe};
pub use parser::{parse_yaml_recipe, parse_yaml_recipe_from_string};
