use crate::error::{AppError, Result};
use indexmap::IndexMap;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub struct PromptTemplates {
    pub file_selection: String,
    pub generate_document: String,
    pub document_header: String,
    pub fallback_guidelines: String,
}

/// Builtin ignore rules grouped by category, in ignore-file dialect.
#[derive(Debug, Default, Deserialize)]
#[serde(transparent)]
pub struct BuiltinIgnores {
    pub categories: IndexMap<String, Vec<String>>,
}

impl BuiltinIgnores {
    pub fn patterns(&self) -> impl Iterator<Item = &str> {
        self.categories.values().flatten().map(String::as_str)
    }
}

static PROMPT_TEMPLATES: Lazy<PromptTemplates> = Lazy::new(|| {
    let yaml_content = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/../data/prompts.yaml"));
    serde_yml::from_str(yaml_content).expect("Failed to parse embedded data/prompts.yaml")
});
static BUILTIN_IGNORE_PATTERNS: Lazy<BuiltinIgnores> = Lazy::new(|| {
    let yaml_content = include_str!(concat!(
        env!("CARGO_MANIFEST_DIR"),
        "/../data/builtin_ignores.yaml"
    ));
    serde_yml::from_str(yaml_content).expect("Failed to parse embedded data/builtin_ignores.yaml")
});

pub fn get_prompt_templates() -> &'static PromptTemplates {
    &PROMPT_TEMPLATES
}
pub fn get_builtin_ignore_patterns() -> &'static BuiltinIgnores {
    &BUILTIN_IGNORE_PATTERNS
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Json,
    Yaml,
    Xml,
}

impl OutputFormat {
    pub fn parse(name: &str) -> Result<Self> {
        match name.to_lowercase().as_str() {
            "json" => Ok(OutputFormat::Json),
            "yaml" | "yml" => Ok(OutputFormat::Yaml),
            "xml" => Ok(OutputFormat::Xml),
            other => Err(AppError::Config(format!(
                "Unknown output format \"{}\". Use json, yaml or xml.",
                other
            ))),
        }
    }
}

pub fn serialize_to_json<T: Serialize>(value: &T, pretty: bool) -> Result<String> {
    if pretty {
        serde_json::to_string_pretty(value).map_err(AppError::JsonSerialize)
    } else {
        serde_json::to_string(value).map_err(AppError::JsonSerialize)
    }
}

pub fn serialize_to_yaml<T: Serialize>(value: &T) -> Result<String> {
    serde_yml::to_string(value).map_err(AppError::YamlError)
}

pub fn serialize_to_xml<T: Serialize>(value: &T, root_name: &str) -> Result<String> {
    quick_xml::se::to_string_with_root(root_name, value).map_err(AppError::from)
}

pub fn serialize<T: Serialize>(value: &T, format: OutputFormat, root_name: &str) -> Result<String> {
    match format {
        OutputFormat::Json => serialize_to_json(value, true),
        OutputFormat::Yaml => serialize_to_yaml(value),
        OutputFormat::Xml => serialize_to_xml(value, root_name),
    }
}
