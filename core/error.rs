use std::path::PathBuf;
use thiserror::Error;

pub type Result<T, E = AppError> = std::result::Result<T, E>;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum AppError {
    #[error("Configuration Error: {0}")]
    Config(String),

    #[error("Missing credential: {0} is not set. Add it to your environment or a .env file.")]
    MissingCredential(String),

    #[error("TOML Parsing Error: {0}")]
    TomlParse(String),

    #[error("JSON Serialization Error: {0}")]
    JsonSerialize(#[from] serde_json::Error),

    #[error("YAML Parsing/Serialization Error: {0}")]
    YamlError(#[from] serde_yml::Error),

    #[error("XML Serialization Error: {0}")]
    XmlSerialize(String),

    #[error("Filesystem Error: {0}")]
    Io(#[from] std::io::Error),

    #[error("File Read Error: Path '{path}', Error: {source}")]
    FileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("File Write Error: Path '{path}', Error: {source}")]
    FileWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Directory Creation Error: Path '{path}', Error: {source}")]
    DirCreation {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Ignore Pattern Error: {0}")]
    Pattern(String),

    #[error("Duration Parsing Error: {0}")]
    DurationParse(String),

    #[error("Token limit exceeded: request needs {tokens} tokens, ceiling is {ceiling}")]
    TokenLimit { tokens: usize, ceiling: usize },

    #[error("Quota exceeded: remote service still rate limited after {attempts} attempt(s): {message}")]
    Quota { attempts: u32, message: String },

    #[error("Transport Error: {0}")]
    Transport(String),

    #[error("Response Parse Error: {0}")]
    Parse(String),

    #[error("HTTP Error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Vector Store Error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("Ledger Error: {0}")]
    Ledger(#[from] csv::Error),
}

impl AppError {
    /// Quota errors are the only ones the request layer retries.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AppError::Quota { .. })
    }
}

impl From<quick_xml::se::SeError> for AppError {
    fn from(err: quick_xml::se::SeError) -> Self {
        AppError::XmlSerialize(err.to_string())
    }
}
