use crate::config::{Config, DEFAULT_STATE_DIR};
use crate::error::Result;
use crate::patterns::IgnoreRules;
use indexmap::IndexMap;
use log;
use serde::Serialize;
use std::fs;
use std::path::{Component, Path, PathBuf};
use walkdir::{DirEntry, WalkDir};

#[derive(Debug, Clone, Serialize)]
pub struct FileRecord {
    pub path: String,
    pub size: u64,
    #[serde(skip)]
    pub content: Option<String>,
}

impl FileRecord {
    pub fn is_loaded(&self) -> bool {
        self.content.is_some()
    }
}

/// Files that survived the ignore rules, in traversal order, keyed by
/// normalized relative path.
#[derive(Debug, Clone)]
pub struct ProjectSnapshot {
    root: PathBuf,
    name: String,
    files: IndexMap<String, FileRecord>,
    readme: Option<String>,
}

impl ProjectSnapshot {
    pub fn new(root: PathBuf, name: String) -> Self {
        Self {
            root,
            name,
            files: IndexMap::new(),
            readme: None,
        }
    }

    /// Adds a record unless the path is already present. Returns whether it was added.
    pub fn insert(&mut self, path: &str, size: u64) -> bool {
        let key = normalize_separators(path);
        if self.files.contains_key(&key) {
            return false;
        }
        self.files.insert(
            key.clone(),
            FileRecord {
                path: key,
                size,
                content: None,
            },
        );
        true
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.files.keys().map(String::as_str)
    }

    pub fn records(&self) -> impl Iterator<Item = &FileRecord> {
        self.files.values()
    }

    pub fn contains(&self, path: &str) -> bool {
        self.files.contains_key(path)
    }

    pub fn get(&self, path: &str) -> Option<&FileRecord> {
        self.files.get(path)
    }

    pub(crate) fn set_content(&mut self, path: &str, content: String) {
        if let Some(record) = self.files.get_mut(path) {
            record.content = Some(content);
        }
    }

    pub fn readme(&self) -> Option<&str> {
        self.readme.as_deref()
    }

    pub fn set_readme(&mut self, readme: Option<String>) {
        self.readme = readme;
    }

    pub fn render_tree(&self) -> String {
        let mut sorted: Vec<&str> = self.paths().collect();
        sorted.sort_unstable();
        render_tree(&build_tree_from_paths(&sorted))
    }
}

/// Walks `project_root`, pruning ignored directories before descending.
pub fn scan_project(
    project_root: &Path,
    rules: &IgnoreRules,
    config: &Config,
) -> Result<ProjectSnapshot> {
    log::info!("Scanning directory structure: {}", project_root.display());
    let mut snapshot = ProjectSnapshot::new(
        project_root.to_path_buf(),
        config.get_effective_project_name(project_root),
    );

    let keep = |entry: &DirEntry| -> bool {
        if entry.depth() == 0 || !entry.file_type().is_dir() {
            return true;
        }
        let Some(rel) = relative_path(entry.path(), project_root) else {
            return true;
        };
        if rel == DEFAULT_STATE_DIR {
            log::trace!("Skipping state directory: {}", rel);
            return false;
        }
        if let Some(rule) = rules.first_match(&rel, true) {
            log::trace!("Pruning directory {} (rule \"{}\")", rel, rule.raw());
            return false;
        }
        true
    };

    let walker = WalkDir::new(project_root)
        .follow_links(false)
        .into_iter()
        .filter_entry(keep);

    for entry_result in walker {
        let entry = match entry_result {
            Ok(entry) => entry,
            Err(e) => {
                log::warn!("Error walking directory: {}", e);
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let Some(rel) = relative_path(entry.path(), project_root) else {
            log::warn!("Could not get relative path for: {}", entry.path().display());
            continue;
        };
        if let Some(rule) = rules.first_match(&rel, false) {
            log::trace!("Ignoring file {} (rule \"{}\")", rel, rule.raw());
            continue;
        }
        let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
        snapshot.insert(&rel, size);
    }
    log::info!("Found {} files", snapshot.len());

    snapshot.set_readme(read_readme(project_root, &config.general.readme_file));
    Ok(snapshot)
}

fn read_readme(project_root: &Path, readme_file: &str) -> Option<String> {
    let readme_path = project_root.join(readme_file);
    match fs::read(&readme_path) {
        Ok(bytes) => {
            let content = String::from_utf8_lossy(&bytes).into_owned();
            log::info!("{} contains {} characters", readme_file, content.chars().count());
            Some(content)
        }
        Err(_) => {
            log::warn!("{} not found", readme_file);
            None
        }
    }
}

fn relative_path(path: &Path, project_root: &Path) -> Option<String> {
    let rel = pathdiff::diff_paths(path, project_root)?;
    let normalized = rel
        .components()
        .filter_map(|c| match c {
            Component::Normal(name) => Some(name.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/");
    if normalized.is_empty() {
        None
    } else {
        Some(normalized)
    }
}

/// Converts any `\` separators to `/` and drops a leading `./`.
pub fn normalize_separators(path: &str) -> String {
    let replaced = path.replace('\\', "/");
    replaced
        .strip_prefix("./")
        .map(str::to_string)
        .unwrap_or(replaced)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeNode {
    pub name: String,
    pub children: Vec<TreeNode>,
    pub is_dir: bool,
}

/// Builds a sorted directory hierarchy from `/`-separated file paths.
pub fn build_tree_from_paths(paths: &[&str]) -> Vec<TreeNode> {
    let mut root_nodes: Vec<TreeNode> = Vec::new();
    for path in paths {
        let components: Vec<&str> = path.split('/').filter(|c| !c.is_empty()).collect();
        insert_node(&mut root_nodes, &components);
    }
    root_nodes
}

fn insert_node(level: &mut Vec<TreeNode>, components: &[&str]) {
    let Some((first, rest)) = components.split_first() else {
        return;
    };
    let is_dir = !rest.is_empty();
    let index = match level.binary_search_by(|node| node.name.as_str().cmp(first)) {
        Ok(index) => {
            if is_dir {
                level[index].is_dir = true;
            }
            index
        }
        Err(insertion_point) => {
            level.insert(
                insertion_point,
                TreeNode {
                    name: first.to_string(),
                    children: Vec::new(),
                    is_dir,
                },
            );
            insertion_point
        }
    };
    if is_dir {
        insert_node(&mut level[index].children, rest);
    }
}

pub fn render_tree(nodes: &[TreeNode]) -> String {
    let mut out = String::from("Project File Structure:\n");
    render_level(nodes, "", &mut out);
    out
}

fn render_level(nodes: &[TreeNode], prefix: &str, out: &mut String) {
    for (i, node) in nodes.iter().enumerate() {
        let is_last = i + 1 == nodes.len();
        let connector = if is_last { "└── " } else { "├── " };
        out.push_str(prefix);
        out.push_str(connector);
        out.push_str(&node.name);
        if node.is_dir {
            out.push('/');
        }
        out.push('\n');
        if node.is_dir {
            let child_prefix = format!("{}{}", prefix, if is_last { "    " } else { "│   " });
            render_level(&node.children, &child_prefix, out);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patterns::RuleOrigin;
    use tempfile::TempDir;

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    #[test]
    fn scan_prunes_ignored_directories_and_files() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        write(root, "src/main.rs", "fn main() {}");
        write(root, "src/logo.png", "png");
        write(root, "node_modules/react/index.js", "module.exports = {}");
        write(root, ".promptmap/token_ledger.csv", "timestamp");
        write(root, "README.md", "# Demo");

        let rules = IgnoreRules::from_lines(["node_modules/", "*.png"], RuleOrigin::IgnoreFile)
            .unwrap();
        let snapshot = scan_project(root, &rules, &Config::default()).unwrap();

        let mut paths: Vec<&str> = snapshot.paths().collect();
        paths.sort_unstable();
        assert_eq!(paths, vec!["README.md", "src/main.rs"]);
        assert_eq!(snapshot.readme(), Some("# Demo"));
        assert_eq!(snapshot.get("src/main.rs").unwrap().size, 12);
        assert!(!snapshot.get("src/main.rs").unwrap().is_loaded());
    }

    #[test]
    fn missing_readme_is_none() {
        let temp_dir = TempDir::new().unwrap();
        write(temp_dir.path(), "a.txt", "a");
        let snapshot =
            scan_project(temp_dir.path(), &IgnoreRules::default(), &Config::default()).unwrap();
        assert!(snapshot.readme().is_none());
        assert_eq!(snapshot.len(), 1);
    }

    #[test]
    fn snapshot_paths_are_unique() {
        let mut snapshot = ProjectSnapshot::new(PathBuf::from("/p"), "p".to_string());
        assert!(snapshot.insert("src\\lib.rs", 1));
        assert!(!snapshot.insert("src/lib.rs", 1));
        assert_eq!(snapshot.len(), 1);
        assert!(snapshot.contains("src/lib.rs"));
    }

    #[test]
    fn normalizes_separators() {
        assert_eq!(normalize_separators("src\\core\\mod.rs"), "src/core/mod.rs");
        assert_eq!(normalize_separators("./src/lib.rs"), "src/lib.rs");
        assert_eq!(normalize_separators("lib.rs"), "lib.rs");
    }

    #[test]
    fn renders_sorted_tree() {
        let mut snapshot = ProjectSnapshot::new(PathBuf::from("/p"), "p".to_string());
        for path in ["src/main.rs", "README.md", "src/core/lib.rs", "tests/it.rs"] {
            snapshot.insert(path, 0);
        }
        let expected = concat!(
            "Project File Structure:\n",
            "├── README.md\n",
            "├── src/\n",
            "│   ├── core/\n",
            "│   │   └── lib.rs\n",
            "│   └── main.rs\n",
            "└── tests/\n",
            "    └── it.rs\n",
        );
        assert_eq!(snapshot.render_tree(), expected);
    }
}
