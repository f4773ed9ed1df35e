use crate::client::RequestClient;
use crate::error::Result;
use crate::loader::LoadReport;
use crate::output_formats::{get_prompt_templates, serialize_to_json};
use crate::scan::ProjectSnapshot;
use crate::select::{Selection, SelectionOrigin};
use crate::session::Session;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use log;
use serde::Serialize;
use std::fmt::Write as _;

pub const GENERATE_DOCUMENT_LABEL: &str = "generate_document";
pub const FALLBACK_TRUNCATE_CHARS: usize = 5000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentOrigin {
    Generated,
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileContent {
    pub path: String,
    pub content: String,
}

/// Everything the renderer sees about a project.
#[derive(Debug, Clone, Serialize)]
pub struct ProjectDocument {
    pub project_name: String,
    pub file_count: usize,
    pub file_tree: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub readme_content: Option<String>,
    pub selection_origin: SelectionOrigin,
    pub selected_files: Vec<String>,
    /// Loaded bodies in acceptance order.
    pub file_contents: Vec<FileContent>,
    pub generated_at: DateTime<Utc>,
}

/// Payload embedded in the generation prompt.
#[derive(Serialize)]
struct ProjectData<'a> {
    name: &'a str,
    file_count: usize,
    file_tree: &'a str,
    file_contents: IndexMap<&'a str, &'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    readme_content: Option<&'a str>,
}

impl ProjectDocument {
    pub fn assemble(
        snapshot: &ProjectSnapshot,
        selection: &Selection,
        report: &LoadReport,
    ) -> Self {
        let file_contents = report
            .accepted_paths()
            .filter_map(|path| {
                snapshot
                    .get(path)
                    .and_then(|record| record.content.as_ref())
                    .map(|content| FileContent {
                        path: path.to_string(),
                        content: content.clone(),
                    })
            })
            .collect();
        Self {
            project_name: snapshot.name().to_string(),
            file_count: snapshot.len(),
            file_tree: snapshot.render_tree(),
            readme_content: snapshot.readme().map(str::to_string),
            selection_origin: selection.origin,
            selected_files: selection.paths.clone(),
            file_contents,
            generated_at: Utc::now(),
        }
    }

    pub fn project_data_json(&self) -> Result<String> {
        let data = ProjectData {
            name: &self.project_name,
            file_count: self.file_count,
            file_tree: &self.file_tree,
            file_contents: self
                .file_contents
                .iter()
                .map(|f| (f.path.as_str(), f.content.as_str()))
                .collect(),
            readme_content: self.readme_content.as_deref(),
        };
        serialize_to_json(&data, true)
    }

    pub fn generation_prompt(&self) -> Result<String> {
        Ok(get_prompt_templates()
            .generate_document
            .replace("{project_data}", &self.project_data_json()?))
    }

    /// Asks the model for the final document and prefixes the fixed header.
    pub fn generate(&self, client: &RequestClient, session: &mut Session) -> Result<String> {
        let prompt = self.generation_prompt()?;
        log::info!("Requesting generated project document");
        let response = client.send(session, &prompt, GENERATE_DOCUMENT_LABEL)?;
        Ok(format!(
            "{}\n{}\n",
            get_prompt_templates().document_header,
            response.trim()
        ))
    }

    /// Local Markdown rendering used when generation is unavailable.
    pub fn render_fallback(&self) -> String {
        let templates = get_prompt_templates();
        let mut out = String::new();
        out.push_str(&templates.document_header);
        let _ = write!(
            out,
            "\n## Project Overview\nThis is the AI-optimized documentation for {}. The project contains {} files.\n",
            self.project_name, self.file_count
        );
        let _ = write!(out, "\n## File Structure Map\n```\n{}```\n", self.file_tree);

        out.push_str(
            "\n## Important Files\nThe following files are considered most important for understanding the project architecture:\n\n",
        );
        for path in &self.selected_files {
            let _ = writeln!(out, "- `{}`", path);
        }

        out.push_str("\n## File Contents\n");
        for file in &self.file_contents {
            let _ = write!(out, "\n### `{}`\n```\n", file.path);
            match file.content.char_indices().nth(FALLBACK_TRUNCATE_CHARS) {
                Some((idx, _)) => {
                    out.push_str(&file.content[..idx]);
                    out.push_str("\n... (truncated, full content available in source file)");
                }
                None => out.push_str(&file.content),
            }
            out.push_str("\n```\n");
        }

        out.push('\n');
        out.push_str(&templates.fallback_guidelines);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::LoadedFile;
    use std::path::PathBuf;

    fn document(content: &str) -> ProjectDocument {
        let mut snapshot = ProjectSnapshot::new(PathBuf::from("/p"), "demo".to_string());
        snapshot.insert("src/main.rs", content.len() as u64);
        snapshot.insert("README.md", 6);
        snapshot.set_content("src/main.rs", content.to_string());
        snapshot.set_readme(Some("# Demo".to_string()));
        let selection = Selection {
            paths: vec!["src/main.rs".to_string(), "README.md".to_string()],
            candidates: Vec::new(),
            origin: SelectionOrigin::Heuristic,
        };
        let report = LoadReport {
            base_tokens: 10,
            accepted: vec![LoadedFile {
                path: "src/main.rs".to_string(),
                tokens: 3,
            }],
            stopped_at: Some("README.md".to_string()),
            total_tokens: 13,
            ceiling: 100,
            margin: 0.95,
        };
        ProjectDocument::assemble(&snapshot, &selection, &report)
    }

    #[test]
    fn assembles_only_accepted_contents() {
        let doc = document("fn main() {}");
        assert_eq!(doc.file_count, 2);
        assert_eq!(doc.selected_files.len(), 2);
        assert_eq!(doc.file_contents.len(), 1);
        assert_eq!(doc.file_contents[0].path, "src/main.rs");
        assert_eq!(doc.readme_content.as_deref(), Some("# Demo"));
    }

    #[test]
    fn project_data_keys_contents_by_path() {
        let json = document("fn main() {}").project_data_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["name"], "demo");
        assert_eq!(value["file_contents"]["src/main.rs"], "fn main() {}");
        assert_eq!(value["readme_content"], "# Demo");
    }

    #[test]
    fn fallback_lists_files_and_truncates_long_bodies() {
        let long = "y".repeat(FALLBACK_TRUNCATE_CHARS + 10);
        let markdown = document(&long).render_fallback();
        assert!(markdown.starts_with("# PROJECT_PROMPT - FOR AI ASSISTANTS ONLY"));
        assert!(markdown.contains("The project contains 2 files."));
        assert!(markdown.contains("- `README.md`"));
        assert!(markdown.contains("### `src/main.rs`"));
        assert!(markdown.contains("... (truncated, full content available in source file)"));
        assert!(!markdown.contains(&long));
        assert!(markdown.contains("## AI Assistance Guidelines"));
    }

    #[test]
    fn serializes_to_every_format() {
        let doc = document("fn main() {}");
        for format in [
            crate::output_formats::OutputFormat::Json,
            crate::output_formats::OutputFormat::Yaml,
            crate::output_formats::OutputFormat::Xml,
        ] {
            let text = crate::output_formats::serialize(&doc, format, "project_document").unwrap();
            assert!(text.contains("src/main.rs"));
        }
    }
}
