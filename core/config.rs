use crate::error::{AppError, Result};
use log;
use parse_duration::parse;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_STATE_DIR: &str = ".promptmap";
pub const DEFAULT_CONFIG_FILENAME: &str = "promptmap.toml";
pub const DEFAULT_DEBUG_DIR: &str = ".promptmap/debug";
pub const DEFAULT_LEDGER_PATH: &str = ".promptmap/token_ledger.csv";
pub const DEFAULT_VECTOR_DB_PATH: &str = ".promptmap/vectors.db";
pub const API_KEY_ENV: &str = "GEMINI_API_KEY";
pub const DEBUG_CALLS_ENV: &str = "DEBUG_AI_CALLS";

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub budget: BudgetConfig,
    #[serde(default)]
    pub request: RequestConfig,
    #[serde(default)]
    pub ledger: LedgerConfig,
    #[serde(default)]
    pub embeddings: EmbeddingsConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct GeneralConfig {
    #[serde(default)]
    pub project_name: Option<String>,
    #[serde(default = "default_ignore_file")]
    pub ignore_file: String,
    #[serde(default = "default_true")]
    pub use_ignore_file: bool,
    #[serde(default = "default_true")]
    pub enable_builtin_ignore: bool,
    #[serde(default = "default_readme_file")]
    pub readme_file: String,
    #[serde(default = "default_output_file")]
    pub output_file: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum TokenizerKind {
    #[default]
    Bpe,
    Estimate,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct BudgetConfig {
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
    #[serde(default = "default_safety_margin")]
    pub safety_margin: f64,
    #[serde(default)]
    pub tokenizer: TokenizerKind,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct RequestConfig {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_cooldown")]
    pub cooldown: String,
    #[serde(default = "default_progress_interval")]
    pub progress_interval: String,
    #[serde(default = "default_timeout")]
    pub timeout: String,
    #[serde(default = "default_false")]
    pub debug_calls: bool,
    #[serde(default = "default_debug_dir")]
    pub debug_dir: PathBuf,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct LedgerConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_ledger_path")]
    pub path: PathBuf,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct EmbeddingsConfig {
    #[serde(default = "default_false")]
    pub enabled: bool,
    #[serde(default = "default_vector_db_path")]
    pub db_path: PathBuf,
    #[serde(default = "default_true")]
    pub use_local: bool,
    #[serde(default = "default_local_endpoint")]
    pub local_endpoint: String,
    #[serde(default = "default_local_model")]
    pub local_model: String,
    #[serde(default = "default_true")]
    pub use_remote: bool,
    #[serde(default = "default_remote_endpoint")]
    pub remote_endpoint: String,
    #[serde(default = "default_remote_model")]
    pub remote_model: String,
}

fn default_true() -> bool {
    true
}
fn default_false() -> bool {
    false
}
fn default_ignore_file() -> String {
    ".gitignore".to_string()
}
fn default_readme_file() -> String {
    "README.md".to_string()
}
fn default_output_file() -> String {
    "PROJECT_PROMPT.md".to_string()
}
fn default_max_tokens() -> usize {
    1_800_000
}
fn default_safety_margin() -> f64 {
    0.95
}
fn default_endpoint() -> String {
    "https://generativelanguage.googleapis.com/v1beta".to_string()
}
fn default_model() -> String {
    "gemini-1.5-pro".to_string()
}
fn default_max_attempts() -> u32 {
    3
}
fn default_cooldown() -> String {
    "60s".to_string()
}
fn default_progress_interval() -> String {
    "10s".to_string()
}
fn default_timeout() -> String {
    "300s".to_string()
}
fn default_debug_dir() -> PathBuf {
    PathBuf::from(DEFAULT_DEBUG_DIR)
}
fn default_ledger_path() -> PathBuf {
    PathBuf::from(DEFAULT_LEDGER_PATH)
}
fn default_vector_db_path() -> PathBuf {
    PathBuf::from(DEFAULT_VECTOR_DB_PATH)
}
fn default_local_endpoint() -> String {
    "http://localhost:11434".to_string()
}
fn default_local_model() -> String {
    "all-minilm".to_string()
}
fn default_remote_endpoint() -> String {
    default_endpoint()
}
fn default_remote_model() -> String {
    "models/embedding-001".to_string()
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            project_name: None,
            ignore_file: default_ignore_file(),
            use_ignore_file: default_true(),
            enable_builtin_ignore: default_true(),
            readme_file: default_readme_file(),
            output_file: default_output_file(),
        }
    }
}
impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
            safety_margin: default_safety_margin(),
            tokenizer: TokenizerKind::default(),
        }
    }
}
impl Default for RequestConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            model: default_model(),
            max_attempts: default_max_attempts(),
            cooldown: default_cooldown(),
            progress_interval: default_progress_interval(),
            timeout: default_timeout(),
            debug_calls: default_false(),
            debug_dir: default_debug_dir(),
        }
    }
}
impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            path: default_ledger_path(),
        }
    }
}
impl Default for EmbeddingsConfig {
    fn default() -> Self {
        Self {
            enabled: default_false(),
            db_path: default_vector_db_path(),
            use_local: default_true(),
            local_endpoint: default_local_endpoint(),
            local_model: default_local_model(),
            use_remote: default_true(),
            remote_endpoint: default_remote_endpoint(),
            remote_model: default_remote_model(),
        }
    }
}

impl Config {
    pub fn determine_project_root(cli_project_root: Option<&PathBuf>) -> Result<PathBuf> {
        let path_str_opt = cli_project_root
            .map(|p| p.to_string_lossy().to_string())
            .or_else(|| env::var("PROJECT_ROOT").ok().filter(|s| !s.is_empty()));

        let path_to_resolve = match path_str_opt {
            Some(p_str) => PathBuf::from(shellexpand::tilde(&p_str).as_ref()),
            None => env::current_dir().map_err(AppError::Io)?,
        };

        path_to_resolve.canonicalize().map_err(|e| {
            AppError::Io(std::io::Error::new(
                e.kind(),
                format!(
                    "Failed to canonicalize project root '{}': {}",
                    path_to_resolve.display(),
                    e
                ),
            ))
        })
    }

    pub fn resolve_config_path(
        project_root: &Path,
        cli_config_file: Option<&String>,
        cli_disable_config: bool,
    ) -> Result<Option<PathBuf>> {
        if cli_disable_config {
            log::debug!("Config file loading disabled via CLI flag.");
            return Ok(None);
        }

        match cli_config_file {
            Some(p_str) => {
                let path = PathBuf::from(shellexpand::tilde(p_str).as_ref());
                let path = if path.is_absolute() {
                    path
                } else {
                    project_root.join(path)
                };
                if !path.exists() {
                    return Err(AppError::Config(format!(
                        "Specified config file not found at path: {}",
                        path.display()
                    )));
                }
                log::debug!("Using specified config file path: {}", path.display());
                Ok(Some(path))
            }
            None => {
                let default_path = project_root
                    .join(DEFAULT_STATE_DIR)
                    .join(DEFAULT_CONFIG_FILENAME);
                if default_path.exists() {
                    log::debug!("Using default config file path: {}", default_path.display());
                    Ok(Some(default_path))
                } else {
                    log::debug!(
                        "No config file specified and default not found at: {}",
                        default_path.display()
                    );
                    Ok(None)
                }
            }
        }
    }

    pub fn load_from_path(config_path: &Path) -> Result<Self> {
        log::info!("Loading configuration from: {}", config_path.display());
        let toml_content = fs::read_to_string(config_path).map_err(|e| AppError::FileRead {
            path: config_path.to_path_buf(),
            source: e,
        })?;
        let config = toml::from_str::<Config>(&toml_content).map_err(|e| {
            AppError::TomlParse(format!(
                "Error parsing config file '{}': {}. Check TOML syntax and structure.",
                config_path.display(),
                e
            ))
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let margin = self.budget.safety_margin;
        if !(margin > 0.0 && margin <= 1.0) {
            return Err(AppError::Config(format!(
                "budget.safety_margin must be in (0, 1], got {}",
                margin
            )));
        }
        if self.budget.max_tokens == 0 {
            return Err(AppError::Config(
                "budget.max_tokens must be greater than 0".to_string(),
            ));
        }
        if self.request.max_attempts == 0 {
            return Err(AppError::Config(
                "request.max_attempts must be at least 1".to_string(),
            ));
        }
        self.cooldown()?;
        self.progress_interval()?;
        self.request_timeout()?;
        Ok(())
    }

    pub fn cooldown(&self) -> Result<Duration> {
        parse_duration_setting("request.cooldown", &self.request.cooldown)
    }

    pub fn progress_interval(&self) -> Result<Duration> {
        parse_duration_setting("request.progress_interval", &self.request.progress_interval)
    }

    pub fn request_timeout(&self) -> Result<Duration> {
        parse_duration_setting("request.timeout", &self.request.timeout)
    }

    /// Debug artifacts are on when the config asks for them or `DEBUG_AI_CALLS=true`.
    pub fn debug_calls_enabled(&self) -> bool {
        self.request.debug_calls
            || env::var(DEBUG_CALLS_ENV)
                .map(|v| v.eq_ignore_ascii_case("true"))
                .unwrap_or(false)
    }

    pub fn get_effective_project_name(&self, project_root: &Path) -> String {
        self.general.project_name.clone().unwrap_or_else(|| {
            project_root
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| "UnknownProject".to_string())
        })
    }

    /// Resolves a configured path against the project root unless it is absolute.
    pub fn resolve_in_project(project_root: &Path, configured: &Path) -> PathBuf {
        let expanded = PathBuf::from(shellexpand::tilde(&configured.to_string_lossy()).as_ref());
        if expanded.is_absolute() {
            expanded
        } else {
            project_root.join(expanded)
        }
    }
}

fn parse_duration_setting(key: &str, value: &str) -> Result<Duration> {
    parse(value).map_err(|e| {
        AppError::DurationParse(format!(
            "Invalid duration for {} '{}': {}. Use format like '500ms', '60s'.",
            key, value, e
        ))
    })
}

/// Reads the API credential from the environment.
pub fn api_key_from_env() -> Result<String> {
    env::var(API_KEY_ENV)
        .ok()
        .filter(|k| !k.trim().is_empty())
        .ok_or_else(|| AppError::MissingCredential(API_KEY_ENV.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.cooldown().unwrap(), Duration::from_secs(60));
        assert_eq!(config.progress_interval().unwrap(), Duration::from_secs(10));
        assert_eq!(config.request.max_attempts, 3);
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let config: Config = toml::from_str(
            r#"
            [budget]
            max_tokens = 1000
            tokenizer = "estimate"

            [request]
            cooldown = "0s"
            "#,
        )
        .unwrap();
        assert_eq!(config.budget.max_tokens, 1000);
        assert_eq!(config.budget.safety_margin, 0.95);
        assert_eq!(config.budget.tokenizer, TokenizerKind::Estimate);
        assert_eq!(config.cooldown().unwrap(), Duration::ZERO);
        assert_eq!(config.general.ignore_file, ".gitignore");
    }

    #[test]
    fn rejects_margin_out_of_range() {
        let mut config = Config::default();
        config.budget.safety_margin = 0.0;
        assert!(matches!(config.validate(), Err(AppError::Config(_))));
        config.budget.safety_margin = 1.5;
        assert!(matches!(config.validate(), Err(AppError::Config(_))));
        config.budget.safety_margin = 1.0;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_unknown_fields() {
        let parsed = toml::from_str::<Config>("[budget]\nceiling = 5\n");
        assert!(parsed.is_err());
    }

    #[test]
    fn rejects_bad_duration() {
        let mut config = Config::default();
        config.request.cooldown = "soon".to_string();
        assert!(matches!(config.validate(), Err(AppError::DurationParse(_))));
        assert!(matches!(config.cooldown(), Err(AppError::DurationParse(_))));
    }
}
