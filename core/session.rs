//! Per-run state: the token ledger and the debug artifact recorder.

use crate::config::Config;
use crate::error::{AppError, Result};
use chrono::{Local, SecondsFormat};
use log;
use serde::Serialize;
use std::fmt;
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryCategory {
    ApiCall,
    FileLoad,
    Total,
}

impl fmt::Display for EntryCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EntryCategory::ApiCall => "api_call",
            EntryCategory::FileLoad => "file_load",
            EntryCategory::Total => "total",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccountingEntry {
    pub timestamp: String,
    pub label: String,
    pub category: EntryCategory,
    pub input_tokens: usize,
    pub output_tokens: usize,
    pub total_tokens: usize,
}

impl AccountingEntry {
    pub fn new(
        label: &str,
        category: EntryCategory,
        input_tokens: usize,
        output_tokens: usize,
    ) -> Self {
        Self {
            timestamp: Local::now().to_rfc3339_opts(SecondsFormat::Secs, false),
            label: label.to_string(),
            category,
            input_tokens,
            output_tokens,
            total_tokens: input_tokens + output_tokens,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LedgerTotals {
    pub api_calls: usize,
    pub files_loaded: usize,
    pub input_tokens: usize,
    pub output_tokens: usize,
}

impl LedgerTotals {
    pub fn total_tokens(&self) -> usize {
        self.input_tokens + self.output_tokens
    }
}

/// Append-only CSV ledger. The file is opened for each row and closed again.
#[derive(Debug)]
pub struct Ledger {
    path: Option<PathBuf>,
    entries: Vec<AccountingEntry>,
}

impl Ledger {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self {
            path,
            entries: Vec::new(),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn entries(&self) -> &[AccountingEntry] {
        &self.entries
    }

    pub fn append(&mut self, entry: AccountingEntry) -> Result<()> {
        let persisted = match &self.path {
            Some(path) => write_row(path, &entry),
            None => Ok(()),
        };
        self.entries.push(entry);
        persisted
    }

    pub fn totals(&self) -> LedgerTotals {
        self.entries
            .iter()
            .fold(LedgerTotals::default(), |mut totals, entry| {
                match entry.category {
                    EntryCategory::ApiCall => totals.api_calls += 1,
                    EntryCategory::FileLoad => totals.files_loaded += 1,
                    EntryCategory::Total => return totals,
                }
                totals.input_tokens += entry.input_tokens;
                totals.output_tokens += entry.output_tokens;
                totals
            })
    }
}

fn write_row(path: &Path, entry: &AccountingEntry) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|e| AppError::DirCreation {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }
    }
    let needs_header = fs::metadata(path).map(|m| m.len() == 0).unwrap_or(true);
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| AppError::FileWrite {
            path: path.to_path_buf(),
            source: e,
        })?;
    let mut writer = csv::WriterBuilder::new()
        .has_headers(needs_header)
        .from_writer(file);
    writer.serialize(entry)?;
    writer.flush().map_err(|e| AppError::FileWrite {
        path: path.to_path_buf(),
        source: e,
    })?;
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    Request,
    Response,
    Extracted,
    /// Non-success reply; one file per attempt so retries keep every body.
    Error { attempt: u32 },
}

impl ArtifactKind {
    fn file_suffix(self) -> String {
        match self {
            ArtifactKind::Request => "request.txt".to_string(),
            ArtifactKind::Response => "response.json".to_string(),
            ArtifactKind::Extracted => "extracted.txt".to_string(),
            ArtifactKind::Error { attempt } => format!("error_attempt{}.txt", attempt),
        }
    }
}

/// Writes numbered per-call artifacts when enabled. Failures are only logged.
#[derive(Debug)]
pub struct DebugRecorder {
    dir: Option<PathBuf>,
}

impl DebugRecorder {
    pub fn disabled() -> Self {
        Self { dir: None }
    }

    pub fn enabled(dir: PathBuf) -> Self {
        if let Err(e) = fs::create_dir_all(&dir) {
            log::warn!("Could not create debug directory {}: {}", dir.display(), e);
        } else {
            log::info!("Debug artifacts will be written to {}", dir.display());
        }
        Self { dir: Some(dir) }
    }

    pub fn is_enabled(&self) -> bool {
        self.dir.is_some()
    }

    pub fn artifact_path(&self, call: u32, kind: ArtifactKind) -> Option<PathBuf> {
        self.dir
            .as_ref()
            .map(|dir| dir.join(format!("{:04}_{}", call, kind.file_suffix())))
    }

    pub fn record(&self, call: u32, kind: ArtifactKind, content: &str) {
        let Some(path) = self.artifact_path(call, kind) else {
            return;
        };
        match fs::write(&path, content) {
            Ok(()) => log::debug!("Saved debug artifact {}", path.display()),
            Err(e) => log::warn!("Failed to write debug artifact {}: {}", path.display(), e),
        }
    }
}

/// Explicit run state handed to collaborators by `&mut`.
#[derive(Debug)]
pub struct Session {
    ledger: Ledger,
    recorder: DebugRecorder,
    calls: u32,
    finalized: bool,
}

impl Session {
    pub fn start(project_root: &Path, config: &Config) -> Self {
        let ledger_path = config
            .ledger
            .enabled
            .then(|| Config::resolve_in_project(project_root, &config.ledger.path));
        let recorder = if config.debug_calls_enabled() {
            DebugRecorder::enabled(Config::resolve_in_project(
                project_root,
                &config.request.debug_dir,
            ))
        } else {
            DebugRecorder::disabled()
        };
        Self::with_parts(Ledger::new(ledger_path), recorder)
    }

    /// A session that keeps its ledger in memory and records nothing to disk.
    pub fn ephemeral() -> Self {
        Self::with_parts(Ledger::new(None), DebugRecorder::disabled())
    }

    pub fn with_parts(ledger: Ledger, recorder: DebugRecorder) -> Self {
        Self {
            ledger,
            recorder,
            calls: 0,
            finalized: false,
        }
    }

    /// Reserves the sequence number for the next outbound call.
    pub fn next_call(&mut self) -> u32 {
        self.calls += 1;
        self.calls
    }

    pub fn recorder(&self) -> &DebugRecorder {
        &self.recorder
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn record_call(&mut self, label: &str, input_tokens: usize, output_tokens: usize) {
        self.append(AccountingEntry::new(
            label,
            EntryCategory::ApiCall,
            input_tokens,
            output_tokens,
        ));
    }

    pub fn record_file_load(&mut self, path: &str, tokens: usize) {
        self.append(AccountingEntry::new(path, EntryCategory::FileLoad, tokens, 0));
    }

    fn append(&mut self, entry: AccountingEntry) {
        if let Err(e) = self.ledger.append(entry) {
            log::warn!("Failed to append to token ledger: {}", e);
        }
    }

    pub fn totals(&self) -> LedgerTotals {
        self.ledger.totals()
    }

    /// Appends the grand-total row once and returns the totals.
    pub fn finalize(&mut self) -> LedgerTotals {
        let totals = self.totals();
        if self.finalized {
            return totals;
        }
        self.finalized = true;
        self.append(AccountingEntry::new(
            "TOTAL",
            EntryCategory::Total,
            totals.input_tokens,
            totals.output_tokens,
        ));
        if let Some(path) = self.ledger.path() {
            log::info!(
                "Token ledger updated at {} ({} tokens this run)",
                path.display(),
                totals.total_tokens()
            );
        }
        totals
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn read_rows(path: &Path) -> Vec<csv::StringRecord> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .from_path(path)
            .unwrap();
        reader.records().map(|r| r.unwrap()).collect()
    }

    #[test]
    fn ledger_writes_header_once_and_total_row() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("state").join("ledger.csv");

        let mut session =
            Session::with_parts(Ledger::new(Some(path.clone())), DebugRecorder::disabled());
        session.record_call("file_selection", 100, 20);
        session.record_file_load("src/lib.rs", 50);
        let totals = session.finalize();
        assert_eq!(totals.api_calls, 1);
        assert_eq!(totals.files_loaded, 1);
        assert_eq!(totals.total_tokens(), 170);

        let mut second =
            Session::with_parts(Ledger::new(Some(path.clone())), DebugRecorder::disabled());
        second.record_call("generate_document", 10, 5);

        let rows = read_rows(&path);
        assert_eq!(
            rows[0].iter().collect::<Vec<_>>(),
            vec!["timestamp", "label", "category", "input_tokens", "output_tokens", "total_tokens"]
        );
        assert_eq!(rows.len(), 5);
        assert_eq!(&rows[1][2], "api_call");
        assert_eq!(&rows[2][1], "src/lib.rs");
        assert_eq!(&rows[2][2], "file_load");
        assert_eq!(&rows[3][2], "total");
        assert_eq!(&rows[3][5], "170");
        assert_eq!(&rows[4][1], "generate_document");
    }

    #[test]
    fn finalize_appends_total_only_once() {
        let mut session = Session::ephemeral();
        session.record_call("a", 1, 1);
        session.finalize();
        session.finalize();
        let totals: Vec<_> = session
            .ledger()
            .entries()
            .iter()
            .filter(|e| e.category == EntryCategory::Total)
            .collect();
        assert_eq!(totals.len(), 1);
        assert_eq!(session.totals().total_tokens(), 2);
    }

    #[test]
    fn debug_recorder_numbers_artifacts() {
        let temp_dir = TempDir::new().unwrap();
        let recorder = DebugRecorder::enabled(temp_dir.path().join("debug"));
        let mut session = Session::with_parts(Ledger::new(None), recorder);

        let call = session.next_call();
        session.recorder().record(call, ArtifactKind::Request, "hello");
        let call = session.next_call();
        session.recorder().record(call, ArtifactKind::Error { attempt: 1 }, "429 first");
        session.recorder().record(call, ArtifactKind::Error { attempt: 2 }, "429 second");

        let debug_dir = temp_dir.path().join("debug");
        assert_eq!(fs::read_to_string(debug_dir.join("0001_request.txt")).unwrap(), "hello");
        assert_eq!(
            fs::read_to_string(debug_dir.join("0002_error_attempt1.txt")).unwrap(),
            "429 first"
        );
        assert_eq!(
            fs::read_to_string(debug_dir.join("0002_error_attempt2.txt")).unwrap(),
            "429 second"
        );
    }

    #[test]
    fn disabled_recorder_writes_nothing() {
        let recorder = DebugRecorder::disabled();
        assert!(!recorder.is_enabled());
        assert!(recorder.artifact_path(1, ArtifactKind::Request).is_none());
        recorder.record(1, ArtifactKind::Request, "ignored");
    }
}
