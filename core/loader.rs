use crate::config::Config;
use crate::error::Result;
use crate::output_formats::serialize_to_json;
use crate::scan::ProjectSnapshot;
use crate::session::Session;
use crate::tokens::TokenCounter;
use log;
use serde::Serialize;
use std::fs;
use std::path::Path;

/// Running token total bounded by `ceiling * margin`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TokenBudget {
    ceiling: usize,
    margin: f64,
    total: usize,
}

impl TokenBudget {
    pub fn new(ceiling: usize, margin: f64) -> Self {
        Self {
            ceiling,
            margin,
            total: 0,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.budget.max_tokens, config.budget.safety_margin)
    }

    pub fn limit(&self) -> f64 {
        self.ceiling as f64 * self.margin
    }

    pub fn fits(&self, cost: usize) -> bool {
        (self.total + cost) as f64 <= self.limit()
    }

    pub fn add(&mut self, cost: usize) {
        self.total += cost;
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn ceiling(&self) -> usize {
        self.ceiling
    }

    pub fn margin(&self) -> f64 {
        self.margin
    }
}

#[derive(Serialize)]
struct BaseInfo<'a> {
    name: &'a str,
    file_count: usize,
    file_tree: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    readme_content: Option<&'a str>,
}

/// Pretty JSON of the project metadata that is always sent.
pub fn base_metadata_json(snapshot: &ProjectSnapshot) -> Result<String> {
    serialize_to_json(
        &BaseInfo {
            name: snapshot.name(),
            file_count: snapshot.len(),
            file_tree: snapshot.render_tree(),
            readme_content: snapshot.readme(),
        },
        true,
    )
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoadedFile {
    pub path: String,
    pub tokens: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct LoadReport {
    pub base_tokens: usize,
    pub accepted: Vec<LoadedFile>,
    /// First candidate that did not fit; loading stopped there.
    pub stopped_at: Option<String>,
    pub total_tokens: usize,
    pub ceiling: usize,
    pub margin: f64,
}

impl LoadReport {
    pub fn accepted_paths(&self) -> impl Iterator<Item = &str> {
        self.accepted.iter().map(|f| f.path.as_str())
    }
}

/// Reads a file lossily. Failures become an inline marker instead of an error.
pub fn read_file_content(project_root: &Path, rel_path: &str) -> String {
    let full_path = project_root.join(rel_path);
    match fs::read(&full_path) {
        Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        Err(e) => {
            log::warn!("Error reading file {}: {}", rel_path, e);
            format!("Error reading file: {}", e)
        }
    }
}

pub struct TokenBudgetLoader<'a> {
    counter: &'a TokenCounter,
    ceiling: usize,
    margin: f64,
}

impl<'a> TokenBudgetLoader<'a> {
    pub fn new(counter: &'a TokenCounter, ceiling: usize, margin: f64) -> Self {
        Self {
            counter,
            ceiling,
            margin,
        }
    }

    pub fn from_config(counter: &'a TokenCounter, config: &Config) -> Self {
        Self::new(counter, config.budget.max_tokens, config.budget.safety_margin)
    }

    pub fn load(
        &self,
        snapshot: &mut ProjectSnapshot,
        selection: &[String],
        session: &mut Session,
    ) -> Result<LoadReport> {
        let base_json = base_metadata_json(snapshot)?;
        let base_cost = self.counter.count(&base_json);
        log::info!("Base project info: {} tokens", base_cost);
        Ok(self.load_from_base(base_cost, snapshot, selection, session))
    }

    /// Greedy prefix: accepts candidates in order and stops at the first that
    /// would push the total over `ceiling * margin`.
    pub fn load_from_base(
        &self,
        base_cost: usize,
        snapshot: &mut ProjectSnapshot,
        selection: &[String],
        session: &mut Session,
    ) -> LoadReport {
        let mut budget = TokenBudget::new(self.ceiling, self.margin);
        budget.add(base_cost);
        let mut accepted = Vec::new();
        let mut stopped_at = None;
        let root = snapshot.root().to_path_buf();

        for path in selection {
            if !snapshot.contains(path) {
                log::warn!("Skipping {}: not part of the project snapshot", path);
                continue;
            }
            let content = read_file_content(&root, path);
            let cost = self.counter.count(&content);
            if !budget.fits(cost) {
                log::warn!(
                    "Skipping {}: would exceed token limit ({} > {:.0})",
                    path,
                    budget.total() + cost,
                    budget.limit()
                );
                stopped_at = Some(path.clone());
                break;
            }
            budget.add(cost);
            snapshot.set_content(path, content);
            session.record_file_load(path, cost);
            log::info!("Added {}: {} tokens (total: {})", path, cost, budget.total());
            accepted.push(LoadedFile {
                path: path.clone(),
                tokens: cost,
            });
        }

        log::info!(
            "Loaded {} files with {} tokens (limit: {})",
            accepted.len(),
            budget.total(),
            self.ceiling
        );
        LoadReport {
            base_tokens: base_cost,
            accepted,
            stopped_at,
            total_tokens: budget.total(),
            ceiling: self.ceiling,
            margin: self.margin,
        }
    }
}
