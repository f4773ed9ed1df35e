use crate::client::RequestClient;
use crate::output_formats::get_prompt_templates;
use crate::scan::{ProjectSnapshot, normalize_separators};
use crate::session::Session;
use log;
use once_cell::sync::Lazy;
use regex::{Captures, Regex, RegexSet};
use serde::Serialize;

pub const FILE_SELECTION_LABEL: &str = "file_selection";

/// Paths worth loading when no advisory answer is available.
static IMPORTANCE_PATTERNS: Lazy<RegexSet> = Lazy::new(|| {
    RegexSet::new([
        // configuration
        r"package\.json$",
        r"setup\.py$",
        r"requirements\.txt$",
        r"Gemfile$",
        r"composer\.json$",
        r"\.gitignore$",
        r"\.env\.example$",
        r"Dockerfile$",
        r"docker-compose\.yml$",
        r"\.eslintrc",
        r"tsconfig\.json$",
        r"webpack\.config\.js$",
        // entry points
        r"index\.(js|ts|py|php|html)$",
        r"app\.(js|ts|py|php)$",
        r"main\.(js|ts|py|php)$",
        // documentation
        r"README\.md$",
        r"CONTRIBUTING\.md$",
        r"LICENSE$",
        // conventional source directories
        r"^src/",
        r"^app/",
        r"^lib/",
        r"^core/",
        r"^controllers/",
        r"^models/",
        r"^views/",
        r"^templates/",
        r"^public/",
        r"^tests/",
        r"^docs/",
    ])
    .expect("Failed to compile builtin importance patterns")
});

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "path", rename_all = "snake_case")]
pub enum Resolution {
    Exact(String),
    Fuzzy(String),
    Unresolved,
}

impl Resolution {
    pub fn path(&self) -> Option<&str> {
        match self {
            Resolution::Exact(path) | Resolution::Fuzzy(path) => Some(path),
            Resolution::Unresolved => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SelectionCandidate {
    pub raw: String,
    pub resolution: Resolution,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionOrigin {
    Advisory,
    Heuristic,
}

#[derive(Debug, Clone, Serialize)]
pub struct Selection {
    pub paths: Vec<String>,
    pub candidates: Vec<SelectionCandidate>,
    pub origin: SelectionOrigin,
}

impl Selection {
    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }
}

static PROFILE_PLACEHOLDERS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\{(readme|file_tree)\}").expect("Failed to compile prompt placeholder pattern")
});

/// Fills `{readme}` and `{file_tree}` in one pass so neither value is rescanned.
pub fn build_profile_prompt(snapshot: &ProjectSnapshot) -> String {
    let readme = snapshot.readme().unwrap_or("No README.md found.");
    let file_tree = snapshot.render_tree();
    PROFILE_PLACEHOLDERS
        .replace_all(&get_prompt_templates().file_selection, |caps: &Captures| {
            match &caps[1] {
                "readme" => readme.to_string(),
                _ => file_tree.clone(),
            }
        })
        .into_owned()
}

/// Splits an advisory reply into trimmed, non-empty lines.
pub fn parse_candidates(response: &str) -> Vec<String> {
    response
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

/// Exact match first, then the first path in traversal order that contains
/// or ends with the candidate.
pub fn resolve_candidate(snapshot: &ProjectSnapshot, raw: &str) -> Resolution {
    let normalized = normalize_separators(raw);
    if normalized.is_empty() {
        return Resolution::Unresolved;
    }
    if snapshot.contains(&normalized) {
        return Resolution::Exact(normalized);
    }
    snapshot
        .paths()
        .find(|path| path.contains(normalized.as_str()) || path.ends_with(normalized.as_str()))
        .map(|path| Resolution::Fuzzy(path.to_string()))
        .unwrap_or(Resolution::Unresolved)
}

pub fn reconcile(snapshot: &ProjectSnapshot, raw_candidates: Vec<String>) -> Selection {
    let mut paths: Vec<String> = Vec::new();
    let mut candidates = Vec::with_capacity(raw_candidates.len());

    for raw in raw_candidates {
        let resolution = resolve_candidate(snapshot, &raw);
        match &resolution {
            Resolution::Exact(path) => {
                log::info!("Selected file (direct match): {}", path);
            }
            Resolution::Fuzzy(path) => {
                log::info!("Selected file (partial match): {} for {}", path, raw);
            }
            Resolution::Unresolved => {
                log::warn!("Suggested file not found in project: {}", raw);
            }
        }
        if let Some(path) = resolution.path() {
            if !paths.iter().any(|p| p == path) {
                paths.push(path.to_string());
            }
        }
        candidates.push(SelectionCandidate { raw, resolution });
    }

    Selection {
        paths,
        candidates,
        origin: SelectionOrigin::Advisory,
    }
}

/// Deterministic fallback; never touches the network.
pub fn heuristic_selection(snapshot: &ProjectSnapshot) -> Selection {
    log::info!("Identifying important files with heuristic patterns");
    let paths: Vec<String> = snapshot
        .paths()
        .filter(|path| IMPORTANCE_PATTERNS.is_match(path))
        .map(str::to_string)
        .collect();
    for path in &paths {
        log::debug!("Important: {}", path);
    }
    log::info!("Identified {} important files", paths.len());
    Selection {
        paths,
        candidates: Vec::new(),
        origin: SelectionOrigin::Heuristic,
    }
}

/// Asks the model for the most relevant files, degrading to the heuristic list
/// when the call fails or nothing it names exists in the snapshot.
pub fn select_files(
    client: &RequestClient,
    session: &mut Session,
    snapshot: &ProjectSnapshot,
) -> Selection {
    log::info!("Asking the model to identify important files");
    let prompt = build_profile_prompt(snapshot);
    match client.send(session, &prompt, FILE_SELECTION_LABEL) {
        Ok(response) => {
            let raw = parse_candidates(&response);
            log::info!("Model suggested {} files", raw.len());
            let selection = reconcile(snapshot, raw);
            if selection.is_empty() {
                log::warn!("No suggested file exists in the project, using heuristic selection");
                return heuristic_selection(snapshot);
            }
            log::info!("Identified {} valid important files", selection.len());
            selection
        }
        Err(e) => {
            log::warn!("File selection failed ({}), using heuristic selection", e);
            heuristic_selection(snapshot)
        }
    }
}
