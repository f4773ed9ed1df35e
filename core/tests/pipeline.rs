use promptmap_core::config::TokenizerKind;
use promptmap_core::{
    AppError, Config, DocumentOrigin, Pipeline, RawResponse, Resolution, Result, SelectionOrigin,
    Session, Transport,
};
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fs;
use std::path::Path;
use std::rc::Rc;
use tempfile::TempDir;

struct ScriptedTransport {
    replies: RefCell<VecDeque<RawResponse>>,
    calls: Rc<Cell<usize>>,
}

impl ScriptedTransport {
    fn boxed(replies: Vec<RawResponse>) -> (Box<dyn Transport>, Rc<Cell<usize>>) {
        let calls = Rc::new(Cell::new(0));
        let transport = ScriptedTransport {
            replies: RefCell::new(replies.into()),
            calls: Rc::clone(&calls),
        };
        (Box::new(transport), calls)
    }
}

impl Transport for ScriptedTransport {
    fn post(&self, _text: &str) -> Result<RawResponse> {
        self.calls.set(self.calls.get() + 1);
        self.replies
            .borrow_mut()
            .pop_front()
            .ok_or_else(|| AppError::Transport("script exhausted".to_string()))
    }
}

fn reply(text: &str) -> RawResponse {
    RawResponse {
        status: 200,
        body: serde_json::json!({
            "candidates": [{"content": {"parts": [{"text": text}]}}]
        })
        .to_string(),
    }
}

fn quota() -> RawResponse {
    RawResponse {
        status: 429,
        body: "{\"error\":{\"code\":429}}".to_string(),
    }
}

fn fixture() -> TempDir {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path();
    fs::write(root.join("a.txt"), "a".repeat(200)).unwrap();
    fs::write(root.join("b.txt"), "b".repeat(240)).unwrap();
    fs::write(root.join("c.png"), "not really a png").unwrap();
    fs::write(root.join(".gitignore"), "*.png\n").unwrap();
    temp_dir
}

fn test_config() -> Config {
    let mut config = Config::default();
    config.budget.tokenizer = TokenizerKind::Estimate;
    config.request.cooldown = "0s".to_string();
    config.request.progress_interval = "0s".to_string();
    config
}

fn ledger_rows(root: &Path) -> Vec<Vec<String>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_path(root.join(".promptmap/token_ledger.csv"))
        .unwrap();
    reader
        .records()
        .map(|r| r.unwrap().iter().map(str::to_string).collect())
        .collect()
}

#[test]
fn advisory_selection_drives_the_run() {
    let project = fixture();
    let root = project.path();
    let config = test_config();
    let (transport, calls) =
        ScriptedTransport::boxed(vec![reply("a.txt\nb.txt\nc.png"), reply("## Logic Map\n...")]);

    let mut session = Session::start(root, &config);
    let report = Pipeline::new(&config, root)
        .run(Some(transport), &mut session)
        .unwrap();

    assert!(!report.snapshot.contains("c.png"));
    assert_eq!(report.selection.origin, SelectionOrigin::Advisory);
    assert_eq!(report.selection.paths, vec!["a.txt", "b.txt"]);
    assert_eq!(report.selection.candidates[2].raw, "c.png");
    assert_eq!(report.selection.candidates[2].resolution, Resolution::Unresolved);

    let loaded: Vec<(&str, usize)> = report
        .load
        .accepted
        .iter()
        .map(|f| (f.path.as_str(), f.tokens))
        .collect();
    assert_eq!(loaded, vec![("a.txt", 50), ("b.txt", 60)]);

    assert_eq!(report.origin, DocumentOrigin::Generated);
    assert!(report.markdown.starts_with("# PROJECT_PROMPT - FOR AI ASSISTANTS ONLY"));
    assert!(report.markdown.contains("## Logic Map"));
    assert_eq!(
        fs::read_to_string(root.join("PROJECT_PROMPT.md")).unwrap(),
        report.markdown
    );
    assert_eq!(calls.get(), 2);

    let rows = ledger_rows(root);
    let categories: Vec<&str> = rows.iter().map(|r| r[2].as_str()).collect();
    assert_eq!(
        categories,
        vec!["api_call", "file_load", "file_load", "api_call", "total"]
    );
    assert_eq!(rows[0][1], "file_selection");
    assert_eq!(rows[1][1], "a.txt");
    assert_eq!(rows[3][1], "generate_document");
    assert_eq!(report.totals.api_calls, 2);
    assert_eq!(report.totals.files_loaded, 2);
}

#[test]
fn exhausted_quota_during_generation_writes_fallback() {
    let project = fixture();
    let root = project.path();
    let config = test_config();
    let (transport, calls) =
        ScriptedTransport::boxed(vec![reply("a.txt"), quota(), quota(), quota()]);

    let mut session = Session::start(root, &config);
    let report = Pipeline::new(&config, root)
        .run(Some(transport), &mut session)
        .unwrap();

    assert_eq!(calls.get(), 4);
    assert_eq!(report.origin, DocumentOrigin::Fallback);
    assert!(report.quota_exhausted);
    assert!(report.generation_error.is_some());
    assert!(report.markdown.contains("- `a.txt`"));
    assert!(report.markdown.contains(&"a".repeat(200)));
    assert!(root.join("PROJECT_PROMPT.md").exists());
}

#[test]
fn failed_selection_falls_back_to_heuristic() {
    let project = fixture();
    let root = project.path();
    fs::create_dir_all(root.join("src")).unwrap();
    fs::write(root.join("src/main.py"), "def main():\n    pass\n").unwrap();
    let config = test_config();
    let (transport, _calls) = ScriptedTransport::boxed(vec![
        RawResponse {
            status: 500,
            body: "boom".to_string(),
        },
        reply("generated"),
    ]);

    let mut session = Session::start(root, &config);
    let report = Pipeline::new(&config, root)
        .run(Some(transport), &mut session)
        .unwrap();

    assert_eq!(report.selection.origin, SelectionOrigin::Heuristic);
    assert!(report.selection.paths.contains(&"src/main.py".to_string()));
    assert!(!report.selection.paths.contains(&"a.txt".to_string()));
    assert_eq!(report.origin, DocumentOrigin::Generated);
}

#[test]
fn offline_run_makes_no_calls() {
    let project = fixture();
    let root = project.path();
    let config = test_config();

    let mut session = Session::ephemeral();
    let report = Pipeline::new(&config, root).run(None, &mut session).unwrap();

    assert_eq!(report.selection.origin, SelectionOrigin::Heuristic);
    assert_eq!(report.selection.paths, vec![".gitignore"]);
    assert_eq!(report.origin, DocumentOrigin::Fallback);
    assert!(report.generation_error.is_none());
    assert_eq!(report.totals.api_calls, 0);
    assert!(!root.join(".promptmap/token_ledger.csv").exists());
}

#[test]
fn ledger_is_totalled_when_the_output_write_fails() {
    let project = fixture();
    let root = project.path();
    fs::create_dir_all(root.join("PROJECT_PROMPT.md")).unwrap();
    let config = test_config();
    let (transport, _calls) = ScriptedTransport::boxed(vec![reply("a.txt"), reply("doc")]);

    let mut session = Session::start(root, &config);
    let result = Pipeline::new(&config, root).run(Some(transport), &mut session);

    assert!(matches!(result, Err(AppError::FileWrite { .. })));
    let rows = ledger_rows(root);
    let categories: Vec<&str> = rows.iter().map(|r| r[2].as_str()).collect();
    assert_eq!(categories, vec!["api_call", "file_load", "api_call", "total"]);
    assert_eq!(rows[3][1], "TOTAL");
}

#[test]
fn enabled_embeddings_index_loaded_files() {
    let project = fixture();
    let root = project.path();
    let mut config = test_config();
    config.embeddings.enabled = true;
    config.embeddings.use_local = false;
    config.embeddings.use_remote = false;
    let (transport, _calls) =
        ScriptedTransport::boxed(vec![reply("a.txt\nb.txt"), reply("generated")]);

    let mut session = Session::start(root, &config);
    let report = Pipeline::new(&config, root)
        .run(Some(transport), &mut session)
        .unwrap();

    assert_eq!(report.indexed_files, 2);
    assert!(Config::resolve_in_project(root, &config.embeddings.db_path).exists());
}
