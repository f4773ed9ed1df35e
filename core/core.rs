pub mod client;
pub mod config;
pub mod document;
pub mod embeddings;
pub mod error;
pub mod loader;
pub mod output_formats;
pub mod patterns;
pub mod pipeline;
pub mod scan;
pub mod select;
pub mod session;
pub mod tokens;

pub use client::{AttemptOutcome, HttpTransport, RawResponse, RequestClient, RetryPolicy, Transport};
pub use config::{Config, TokenizerKind, api_key_from_env};
pub use document::{DocumentOrigin, ProjectDocument};
pub use embeddings::{EmbeddingBackend, EmbeddingIndex, KeywordBackend, SimilarFile};
pub use error::{AppError, Result};
pub use loader::{LoadReport, TokenBudget, TokenBudgetLoader};
pub use output_formats::{OutputFormat, get_builtin_ignore_patterns, get_prompt_templates};
pub use patterns::{IgnoreRule, IgnoreRules, RuleOrigin};
pub use pipeline::{Pipeline, RunReport};
pub use scan::{FileRecord, ProjectSnapshot, TreeNode, scan_project};
pub use select::{Resolution, Selection, SelectionCandidate, SelectionOrigin};
pub use session::{AccountingEntry, EntryCategory, LedgerTotals, Session};
pub use tokens::TokenCounter;
