use crate::client::{RequestClient, Transport};
use crate::config::Config;
use crate::document::{DocumentOrigin, ProjectDocument};
use crate::embeddings::EmbeddingIndex;
use crate::error::{AppError, Result};
use crate::loader::{LoadReport, TokenBudgetLoader};
use crate::patterns::IgnoreRules;
use crate::scan::{ProjectSnapshot, scan_project};
use crate::select::{Selection, heuristic_selection, select_files};
use crate::session::{LedgerTotals, Session};
use crate::tokens::TokenCounter;
use log;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug)]
pub struct RunReport {
    pub rule_count: usize,
    pub snapshot: ProjectSnapshot,
    pub selection: Selection,
    pub load: LoadReport,
    pub document: ProjectDocument,
    pub markdown: String,
    pub origin: DocumentOrigin,
    /// Why generation fell back, when it did.
    pub generation_error: Option<String>,
    pub quota_exhausted: bool,
    pub indexed_files: usize,
    pub output_path: PathBuf,
    pub totals: LedgerTotals,
}

pub struct Pipeline<'a> {
    config: &'a Config,
    project_root: PathBuf,
    api_key: Option<String>,
}

impl<'a> Pipeline<'a> {
    pub fn new(config: &'a Config, project_root: &Path) -> Self {
        Self {
            config,
            project_root: project_root.to_path_buf(),
            api_key: None,
        }
    }

    /// Key used by the remote embedding backend when indexing is enabled.
    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key;
        self
    }

    /// Rules, snapshot and selection without any network call.
    pub fn prepare_offline(&self) -> Result<(IgnoreRules, ProjectSnapshot, Selection)> {
        let rules = IgnoreRules::load(&self.project_root, self.config)?;
        let snapshot = scan_project(&self.project_root, &rules, self.config)?;
        let selection = heuristic_selection(&snapshot);
        Ok((rules, snapshot, selection))
    }

    /// Runs every stage. Without a transport the run is offline: heuristic
    /// selection and the local fallback document. The ledger total row is
    /// written whether or not a stage fails.
    pub fn run(
        &self,
        transport: Option<Box<dyn Transport>>,
        session: &mut Session,
    ) -> Result<RunReport> {
        let outcome = self.run_stages(transport, session);
        let totals = session.finalize();
        outcome.map(|report| RunReport { totals, ..report })
    }

    fn run_stages(
        &self,
        transport: Option<Box<dyn Transport>>,
        session: &mut Session,
    ) -> Result<RunReport> {
        log::info!("Step 1: Loading ignore rules...");
        let rules = IgnoreRules::load(&self.project_root, self.config)?;

        log::info!("Step 2: Scanning project structure...");
        let mut snapshot = scan_project(&self.project_root, &rules, self.config)?;

        let client = transport
            .map(|t| RequestClient::from_config(self.config, t))
            .transpose()?;

        log::info!("Step 3: Selecting important files...");
        let selection = match &client {
            Some(client) => select_files(client, session, &snapshot),
            None => {
                log::info!("Offline run, using heuristic selection");
                heuristic_selection(&snapshot)
            }
        };

        log::info!("Step 4: Loading files under the token budget...");
        let offline_counter;
        let counter = match &client {
            Some(client) => client.counter(),
            None => {
                offline_counter = TokenCounter::new(self.config.budget.tokenizer);
                &offline_counter
            }
        };
        let load = TokenBudgetLoader::from_config(counter, self.config).load(
            &mut snapshot,
            &selection.paths,
            session,
        )?;

        let indexed_files = if self.config.embeddings.enabled {
            log::info!("Indexing loaded files for similarity search...");
            let index =
                EmbeddingIndex::open(&self.project_root, self.config, self.api_key.as_deref());
            index.index(snapshot.records().filter_map(|record| {
                record
                    .content
                    .as_deref()
                    .map(|content| (record.path.as_str(), content))
            }))
        } else {
            0
        };

        log::info!("Step 5: Generating project document...");
        let document = ProjectDocument::assemble(&snapshot, &selection, &load);
        let (markdown, origin, generation_error, quota_exhausted) = match &client {
            Some(client) => match document.generate(client, session) {
                Ok(markdown) => (markdown, DocumentOrigin::Generated, None, false),
                Err(e) => {
                    log::warn!("Document generation failed ({}), writing fallback document", e);
                    let quota = e.is_retryable();
                    (
                        document.render_fallback(),
                        DocumentOrigin::Fallback,
                        Some(e.to_string()),
                        quota,
                    )
                }
            },
            None => (document.render_fallback(), DocumentOrigin::Fallback, None, false),
        };

        let output_path = self.project_root.join(&self.config.general.output_file);
        fs::write(&output_path, &markdown).map_err(|e| AppError::FileWrite {
            path: output_path.clone(),
            source: e,
        })?;
        log::info!("Wrote {}", output_path.display());

        Ok(RunReport {
            rule_count: rules.len(),
            snapshot,
            selection,
            load,
            document,
            markdown,
            origin,
            generation_error,
            quota_exhausted,
            indexed_files,
            output_path,
            totals: session.totals(),
        })
    }
}
