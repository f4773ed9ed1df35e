//! File-body embeddings with nearest-neighbour lookups over a SQLite store.
//!
//! The backend is chosen once, in priority order: a local Ollama-compatible
//! server, the remote embedding API when a key is configured, then a keyword
//! frequency vector that needs nothing external. Vectors are stored as
//! little-endian `f32` blobs and compared by brute-force cosine distance.
//! Every public query degrades to an empty result with a warning.

use crate::config::Config;
use crate::error::{AppError, Result};
use chrono::Local;
use log;
use rusqlite::{Connection, params};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fs;
use std::path::Path;
use std::time::Duration;

pub const KEYWORD_DIMENSIONS: usize = 64;
pub const REMOTE_INPUT_LIMIT: usize = 2048;

const KEYWORDS: [&str; 28] = [
    "class", "function", "def", "import", "export", "const", "var", "let", "return", "if",
    "else", "for", "while", "try", "catch", "async", "await", "component", "model",
    "controller", "view", "route", "database", "schema", "api", "http", "request", "response",
];

pub trait EmbeddingBackend {
    fn name(&self) -> &str;
    fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

/// Deterministic keyword-frequency vectors, unit-normalized and zero-padded.
#[derive(Debug, Default, Clone, Copy)]
pub struct KeywordBackend;

impl EmbeddingBackend for KeywordBackend {
    fn name(&self) -> &str {
        "keyword"
    }

    /// Text containing none of the keywords maps to the all-zero vector, which
    /// is at distance 1 from everything.
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let lowered = text.to_lowercase();
        let mut vector: Vec<f32> = KEYWORDS
            .iter()
            .map(|keyword| lowered.matches(keyword).count() as f32)
            .collect();
        let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt().max(1e-6);
        for value in &mut vector {
            *value /= norm;
        }
        vector.resize(KEYWORD_DIMENSIONS, 0.0);
        Ok(vector)
    }
}

#[derive(Deserialize)]
struct LocalEmbedding {
    embedding: Vec<f32>,
}

/// Ollama-compatible `/api/embeddings` server.
pub struct LocalBackend {
    client: reqwest::blocking::Client,
    endpoint: String,
    model: String,
    name: String,
}

impl LocalBackend {
    pub fn new(endpoint: &str, model: &str) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            model: model.to_string(),
            name: format!("local:{}", model),
        })
    }

    /// Checks the server answers and the configured model can embed.
    pub fn probe(&self) -> Result<()> {
        let tags_url = format!("{}/api/tags", self.endpoint);
        let response = self
            .client
            .get(&tags_url)
            .timeout(Duration::from_secs(2))
            .send()?;
        if !response.status().is_success() {
            return Err(AppError::Transport(format!(
                "{} answered HTTP {}",
                tags_url,
                response.status()
            )));
        }
        self.embed("probe").map(|_| ())
    }
}

impl EmbeddingBackend for LocalBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let response = self
            .client
            .post(format!("{}/api/embeddings", self.endpoint))
            .json(&json!({ "model": self.model, "prompt": text }))
            .send()?;
        let status = response.status();
        if !status.is_success() {
            return Err(AppError::Transport(format!(
                "Local embedding server answered HTTP {}",
                status
            )));
        }
        let decoded: LocalEmbedding = response
            .json()
            .map_err(|e| AppError::Parse(format!("Unexpected local embedding reply: {}", e)))?;
        if decoded.embedding.is_empty() {
            return Err(AppError::Parse("Local embedding reply was empty".to_string()));
        }
        Ok(decoded.embedding)
    }
}

#[derive(Deserialize)]
struct RemoteEmbedding {
    embedding: RemoteValues,
}

#[derive(Deserialize)]
struct RemoteValues {
    values: Vec<f32>,
}

/// Gemini `embedContent`.
pub struct RemoteBackend {
    client: reqwest::blocking::Client,
    url: String,
    model: String,
    api_key: String,
    name: String,
}

impl RemoteBackend {
    pub fn new(endpoint: &str, model: &str, api_key: String) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()?;
        let model = if model.starts_with("models/") {
            model.to_string()
        } else {
            format!("models/{}", model)
        };
        Ok(Self {
            client,
            url: format!("{}/{}:embedContent", endpoint.trim_end_matches('/'), model),
            name: format!("remote:{}", model),
            model,
            api_key,
        })
    }
}

impl EmbeddingBackend for RemoteBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let truncated: String = text.chars().take(REMOTE_INPUT_LIMIT).collect();
        let response = self
            .client
            .post(&self.url)
            .query(&[("key", self.api_key.as_str())])
            .json(&json!({
                "model": self.model,
                "content": { "parts": [{ "text": truncated }] }
            }))
            .send()?;
        let status = response.status();
        if !status.is_success() {
            return Err(AppError::Transport(format!(
                "Embedding API answered HTTP {}",
                status
            )));
        }
        let decoded: RemoteEmbedding = response
            .json()
            .map_err(|e| AppError::Parse(format!("Unexpected embedding reply: {}", e)))?;
        Ok(decoded.embedding.values)
    }
}

/// Probes the backend chain once and returns the first one available.
pub fn select_backend(config: &Config, api_key: Option<&str>) -> Box<dyn EmbeddingBackend> {
    let settings = &config.embeddings;
    if settings.use_local {
        match LocalBackend::new(&settings.local_endpoint, &settings.local_model) {
            Ok(local) => match local.probe() {
                Ok(()) => {
                    log::info!("Using local embedding model {}", settings.local_model);
                    return Box::new(local);
                }
                Err(e) => log::debug!("Local embedding server unavailable: {}", e),
            },
            Err(e) => log::debug!("Could not build local embedding client: {}", e),
        }
    }
    if settings.use_remote {
        if let Some(key) = api_key.filter(|k| !k.trim().is_empty()) {
            let remote = RemoteBackend::new(
                &settings.remote_endpoint,
                &settings.remote_model,
                key.to_string(),
            );
            match remote {
                Ok(remote) => {
                    log::info!("Using remote embedding model {}", settings.remote_model);
                    return Box::new(remote);
                }
                Err(e) => log::debug!("Could not build remote embedding client: {}", e),
            }
        }
    }
    log::warn!("No embedding model available, using keyword-based fallback (limited capability)");
    Box::new(KeywordBackend)
}

pub fn f32_slice_to_blob(v: &[f32]) -> Vec<u8> {
    v.iter().flat_map(|f| f.to_le_bytes()).collect()
}

pub fn blob_to_f32_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 1.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 1.0;
    }
    1.0 - dot / (norm_a * norm_b)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimilarFile {
    pub path: String,
    pub similarity: f32,
    pub content: String,
}

pub struct EmbeddingIndex {
    conn: Option<Connection>,
    backend: Box<dyn EmbeddingBackend>,
}

impl EmbeddingIndex {
    /// Opens the store under the project; an unusable store leaves the index inert.
    pub fn open(project_root: &Path, config: &Config, api_key: Option<&str>) -> Self {
        let db_path = Config::resolve_in_project(project_root, &config.embeddings.db_path);
        let conn = match open_store(&db_path) {
            Ok(conn) => {
                log::debug!("Vector store opened at {}", db_path.display());
                Some(conn)
            }
            Err(e) => {
                log::warn!("Vector store unavailable at {}: {}", db_path.display(), e);
                None
            }
        };
        Self {
            conn,
            backend: select_backend(config, api_key),
        }
    }

    pub fn with_connection(conn: Connection, backend: Box<dyn EmbeddingBackend>) -> Self {
        let conn = match ensure_table(&conn) {
            Ok(()) => Some(conn),
            Err(e) => {
                log::warn!("Could not prepare vector store: {}", e);
                None
            }
        };
        Self { conn, backend }
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    pub fn len(&self) -> usize {
        let Some(conn) = &self.conn else {
            return 0;
        };
        conn.query_row(
            "SELECT count(*) FROM embeddings WHERE backend = ?1",
            params![self.backend.name()],
            |row| row.get::<_, i64>(0),
        )
        .map(|count| count.max(0) as usize)
        .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Upserts `(path, content)` pairs. Returns how many were stored.
    pub fn index<'a, I>(&self, files: I) -> usize
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let Some(conn) = &self.conn else {
            log::warn!("Vector store unavailable, skipping indexing");
            return 0;
        };
        let mut stored = 0;
        for (path, content) in files {
            let result = self
                .backend
                .embed(content)
                .and_then(|vector| upsert(conn, self.backend.name(), path, &vector, content));
            match result {
                Ok(()) => stored += 1,
                Err(e) => log::warn!("Failed to index {}: {}", path, e),
            }
        }
        log::info!("Indexed {} files with {} embeddings", stored, self.backend.name());
        stored
    }

    pub fn query(&self, text: &str, n: usize) -> Vec<SimilarFile> {
        let result = self
            .backend
            .embed(text)
            .and_then(|vector| self.nearest(&vector, n, None));
        result.unwrap_or_else(|e| {
            log::warn!("Similarity query failed: {}", e);
            Vec::new()
        })
    }

    /// Files closest to the stored vector of `path`, excluding `path` itself.
    pub fn related_to(&self, path: &str, n: usize) -> Vec<SimilarFile> {
        let result = self.stored_vector(path).and_then(|stored| match stored {
            Some(vector) => self.nearest(&vector, n + 1, Some(path)),
            None => {
                log::warn!("{} is not in the vector store", path);
                Ok(Vec::new())
            }
        });
        let mut related = result.unwrap_or_else(|e| {
            log::warn!("Related-file query failed: {}", e);
            Vec::new()
        });
        related.truncate(n);
        related
    }

    fn stored_vector(&self, path: &str) -> Result<Option<Vec<f32>>> {
        let Some(conn) = &self.conn else {
            return Ok(None);
        };
        let mut stmt =
            conn.prepare("SELECT vector FROM embeddings WHERE path = ?1 AND backend = ?2")?;
        let mut rows = stmt.query(params![path, self.backend.name()])?;
        match rows.next()? {
            Some(row) => Ok(Some(blob_to_f32_vec(&row.get::<_, Vec<u8>>(0)?))),
            None => Ok(None),
        }
    }

    fn nearest(&self, query: &[f32], n: usize, exclude: Option<&str>) -> Result<Vec<SimilarFile>> {
        let Some(conn) = &self.conn else {
            return Ok(Vec::new());
        };
        let mut stmt =
            conn.prepare("SELECT path, vector, content FROM embeddings WHERE backend = ?1")?;
        let rows = stmt.query_map(params![self.backend.name()], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, Vec<u8>>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;

        let mut results = Vec::new();
        for row in rows {
            let (path, blob, content) = row?;
            if exclude == Some(path.as_str()) {
                continue;
            }
            let distance = cosine_distance(query, &blob_to_f32_vec(&blob));
            results.push(SimilarFile {
                path,
                similarity: 1.0 - distance.min(1.0),
                content,
            });
        }
        results.sort_by(|a, b| {
            b.similarity
                .total_cmp(&a.similarity)
                .then_with(|| a.path.cmp(&b.path))
        });
        results.truncate(n);
        Ok(results)
    }
}

fn open_store(db_path: &Path) -> Result<Connection> {
    if let Some(parent) = db_path.parent() {
        fs::create_dir_all(parent).map_err(|e| AppError::DirCreation {
            path: parent.to_path_buf(),
            source: e,
        })?;
    }
    let conn = Connection::open(db_path)?;
    ensure_table(&conn)?;
    Ok(conn)
}

fn ensure_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS embeddings (
            path TEXT PRIMARY KEY,
            backend TEXT NOT NULL,
            dim INTEGER NOT NULL,
            vector BLOB NOT NULL,
            content TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )",
    )?;
    Ok(())
}

fn upsert(
    conn: &Connection,
    backend: &str,
    path: &str,
    vector: &[f32],
    content: &str,
) -> Result<()> {
    conn.execute(
        "INSERT INTO embeddings (path, backend, dim, vector, content, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(path) DO UPDATE SET
            backend = excluded.backend,
            dim = excluded.dim,
            vector = excluded.vector,
            content = excluded.content,
            updated_at = excluded.updated_at",
        params![
            path,
            backend,
            vector.len() as i64,
            f32_slice_to_blob(vector),
            content,
            Local::now().to_rfc3339()
        ],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keyword_index() -> EmbeddingIndex {
        EmbeddingIndex::with_connection(
            Connection::open_in_memory().unwrap(),
            Box::new(KeywordBackend),
        )
    }

    #[test]
    fn keyword_vectors_are_deterministic_and_unit_length() {
        let backend = KeywordBackend;
        let text = "class Router { async route(request) { return response } }";
        let a = backend.embed(text).unwrap();
        let b = backend.embed(text).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), KEYWORD_DIMENSIONS);
        let norm = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
        assert!(a[28..].iter().all(|x| *x == 0.0));
    }

    #[test]
    fn text_without_keywords_is_the_zero_vector() {
        let vector = KeywordBackend.embed("lorem ipsum dolor sit amet").unwrap();
        assert_eq!(vector.len(), KEYWORD_DIMENSIONS);
        assert!(vector.iter().all(|x| *x == 0.0));
        assert_eq!(cosine_distance(&vector, &KeywordBackend.embed("class").unwrap()), 1.0);
    }

    #[test]
    fn keyword_counts_are_case_insensitive() {
        let backend = KeywordBackend;
        assert_eq!(backend.embed("IMPORT").unwrap(), backend.embed("import").unwrap());
    }

    #[test]
    fn blob_round_trip_preserves_values() {
        let values = vec![0.5_f32, -1.25, 3.0];
        assert_eq!(blob_to_f32_vec(&f32_slice_to_blob(&values)), values);
    }

    #[test]
    fn cosine_distance_bounds() {
        assert!(cosine_distance(&[1.0, 0.0], &[1.0, 0.0]).abs() < 1e-6);
        assert!((cosine_distance(&[1.0, 0.0], &[0.0, 1.0]) - 1.0).abs() < 1e-6);
        assert_eq!(cosine_distance(&[0.0, 0.0], &[1.0, 0.0]), 1.0);
        assert_eq!(cosine_distance(&[1.0], &[1.0, 0.0]), 1.0);
    }

    #[test]
    fn query_ranks_by_similarity() {
        let index = keyword_index();
        let stored = index.index([
            ("api.rs", "api http request response route"),
            ("model.rs", "model schema database"),
            ("ui.js", "component view export const"),
        ]);
        assert_eq!(stored, 3);
        assert_eq!(index.len(), 3);

        let results = index.query("handle the http request", 2);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].path, "api.rs");
        assert!(results[0].similarity > results[1].similarity);
        assert!(results.iter().all(|r| (0.0..=1.0).contains(&r.similarity)));
    }

    #[test]
    fn reindexing_upserts_by_path() {
        let index = keyword_index();
        index.index([("a.rs", "class")]);
        index.index([("a.rs", "function")]);
        assert_eq!(index.len(), 1);
        let results = index.query("function", 1);
        assert_eq!(results[0].content, "function");
    }

    #[test]
    fn related_excludes_the_file_itself() {
        let index = keyword_index();
        index.index([
            ("a.rs", "import export const"),
            ("b.rs", "import export let"),
            ("c.rs", "database schema"),
        ]);
        let related = index.related_to("a.rs", 2);
        assert_eq!(related.len(), 2);
        assert!(related.iter().all(|r| r.path != "a.rs"));
        assert_eq!(related[0].path, "b.rs");
    }

    fn offline_config() -> Config {
        let mut config = Config::default();
        config.embeddings.use_local = false;
        config.embeddings.use_remote = false;
        config
    }

    #[test]
    fn backend_chain_without_providers_is_keyword() {
        assert_eq!(select_backend(&offline_config(), Some("key")).name(), "keyword");
    }

    #[test]
    fn unreachable_local_server_degrades_to_keyword() {
        let mut config = offline_config();
        config.embeddings.use_local = true;
        config.embeddings.local_endpoint = "http://127.0.0.1:1".to_string();
        assert_eq!(select_backend(&config, None).name(), "keyword");
    }

    #[test]
    fn remote_backend_needs_a_key() {
        let mut config = offline_config();
        config.embeddings.use_remote = true;
        assert_eq!(select_backend(&config, None).name(), "keyword");
        assert_eq!(select_backend(&config, Some("  ")).name(), "keyword");
        assert_eq!(
            select_backend(&config, Some("secret")).name(),
            "remote:models/embedding-001"
        );
    }

    #[test]
    fn store_persists_across_opens() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let config = offline_config();
        {
            let index = EmbeddingIndex::open(temp_dir.path(), &config, None);
            assert!(index.is_empty());
            assert_eq!(index.index([("db.rs", "database schema model")]), 1);
        }
        let reopened = EmbeddingIndex::open(temp_dir.path(), &config, None);
        assert_eq!(reopened.len(), 1);
        let results = reopened.query("schema", 1);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].path, "db.rs");
        assert!(Config::resolve_in_project(temp_dir.path(), &config.embeddings.db_path).exists());
    }

    #[test]
    fn unknown_path_and_missing_store_degrade_to_empty() {
        let index = keyword_index();
        assert!(index.related_to("nope.rs", 3).is_empty());

        let inert = EmbeddingIndex {
            conn: None,
            backend: Box::new(KeywordBackend),
        };
        assert_eq!(inert.index([("a.rs", "class")]), 0);
        assert!(inert.query("class", 3).is_empty());
        assert!(inert.is_empty());
    }
}
