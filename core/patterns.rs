//! Ignore-rule compilation.
//!
//! Rules use a small gitignore-like dialect: a leading `/` anchors the rule to
//! the project root, a trailing `/` restricts it to directories, and `*` / `?`
//! are wildcards. Everything else is matched literally. Matching is done on
//! relative paths that use `/` as the separator.

use crate::config::Config;
use crate::error::{AppError, Result};
use crate::output_formats::get_builtin_ignore_patterns;
use log;
use regex::Regex;
use serde::Serialize;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleOrigin {
    Builtin,
    IgnoreFile,
    Generated,
}

#[derive(Debug, Clone)]
pub struct IgnoreRule {
    raw: String,
    matcher: Regex,
    dir_only: bool,
    anchored: bool,
    origin: RuleOrigin,
}

impl IgnoreRule {
    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn is_dir_only(&self) -> bool {
        self.dir_only
    }

    pub fn is_anchored(&self) -> bool {
        self.anchored
    }

    pub fn origin(&self) -> RuleOrigin {
        self.origin
    }

    pub fn pattern(&self) -> &str {
        self.matcher.as_str()
    }

    /// Tests a `/`-separated relative path. Directory rules only match a
    /// directory itself or paths below one. A trailing `/` marks a directory.
    pub fn matches(&self, rel_path: &str, is_dir: bool) -> bool {
        let is_dir = is_dir || rel_path.ends_with('/');
        let path = rel_path.trim_end_matches('/');
        if self.dir_only && is_dir {
            self.matcher.is_match(&format!("{}/", path))
        } else {
            self.matcher.is_match(path)
        }
    }
}

/// Compiles one ignore-file line. Returns `Ok(None)` for blank lines,
/// comments and negations.
pub fn compile_rule(line: &str, origin: RuleOrigin) -> Result<Option<IgnoreRule>> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return Ok(None);
    }
    if trimmed.starts_with('!') {
        log::debug!("Skipping unsupported negated ignore rule: {}", trimmed);
        return Ok(None);
    }

    let (anchored, rest) = match trimmed.strip_prefix('/') {
        Some(stripped) => (true, stripped),
        None => (false, trimmed),
    };
    let (dir_only, body) = match rest.strip_suffix('/') {
        Some(stripped) => (true, stripped),
        None => (false, rest),
    };
    if body.is_empty() {
        log::debug!("Skipping ignore rule with empty body: {}", trimmed);
        return Ok(None);
    }

    let translated = regex::escape(body)
        .replace(r"\*", ".*")
        .replace(r"\?", ".");
    let prefix = if anchored { "^" } else { "(?:^|/)" };
    let suffix = if dir_only { "/" } else { "$" };
    let source = format!("{}{}{}", prefix, translated, suffix);

    let matcher = Regex::new(&source).map_err(|e| {
        AppError::Pattern(format!(
            "Invalid ignore rule \"{}\" (compiled as \"{}\"): {}",
            trimmed, source, e
        ))
    })?;
    log::trace!("Compiled ignore rule \"{}\" as {}", trimmed, source);

    Ok(Some(IgnoreRule {
        raw: trimmed.to_string(),
        matcher,
        dir_only,
        anchored,
        origin,
    }))
}

/// Ordered, immutable set of compiled ignore rules.
#[derive(Debug, Clone, Default)]
pub struct IgnoreRules {
    rules: Vec<IgnoreRule>,
}

impl IgnoreRules {
    pub fn from_lines<'a, I>(lines: I, origin: RuleOrigin) -> Result<Self>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut rules = Vec::new();
        for line in lines {
            if let Some(rule) = compile_rule(line, origin)? {
                rules.push(rule);
            }
        }
        Ok(Self { rules })
    }

    /// Builds the rule set for a project: builtin defaults, the generated
    /// output document, then the repo ignore file when present.
    pub fn load(project_root: &Path, config: &Config) -> Result<Self> {
        let mut rules = Vec::new();

        if config.general.enable_builtin_ignore {
            let builtin = get_builtin_ignore_patterns();
            for pattern in builtin.patterns() {
                if let Some(rule) = compile_rule(pattern, RuleOrigin::Builtin)? {
                    rules.push(rule);
                }
            }
            log::info!("Initialized with {} builtin ignore rules", rules.len());
        } else {
            log::debug!("Builtin ignore rules disabled.");
        }

        let output_rule = format!("/{}", config.general.output_file.trim_start_matches('/'));
        if let Some(rule) = compile_rule(&output_rule, RuleOrigin::Generated)? {
            rules.push(rule);
        }

        if config.general.use_ignore_file {
            let ignore_path = project_root.join(&config.general.ignore_file);
            if ignore_path.is_file() {
                let bytes = fs::read(&ignore_path).map_err(|e| AppError::FileRead {
                    path: ignore_path.clone(),
                    source: e,
                })?;
                let content = String::from_utf8_lossy(&bytes);
                let before = rules.len();
                for line in content.lines() {
                    if let Some(rule) = compile_rule(line, RuleOrigin::IgnoreFile)? {
                        rules.push(rule);
                    }
                }
                log::info!(
                    "Added {} rules from {}",
                    rules.len() - before,
                    config.general.ignore_file
                );
            } else {
                log::warn!(
                    "No {} file found, proceeding with default ignore rules only",
                    config.general.ignore_file
                );
            }
        }

        Ok(Self { rules })
    }

    pub fn rules(&self) -> &[IgnoreRule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn first_match(&self, rel_path: &str, is_dir: bool) -> Option<&IgnoreRule> {
        self.rules.iter().find(|r| r.matches(rel_path, is_dir))
    }

    pub fn is_ignored(&self, rel_path: &str, is_dir: bool) -> bool {
        self.first_match(rel_path, is_dir).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn rule(line: &str) -> IgnoreRule {
        compile_rule(line, RuleOrigin::IgnoreFile).unwrap().unwrap()
    }

    #[test]
    fn skips_blank_comment_and_negated_lines() {
        assert!(compile_rule("", RuleOrigin::IgnoreFile).unwrap().is_none());
        assert!(compile_rule("   ", RuleOrigin::IgnoreFile).unwrap().is_none());
        assert!(compile_rule("# comment", RuleOrigin::IgnoreFile).unwrap().is_none());
        assert!(compile_rule("!keep.txt", RuleOrigin::IgnoreFile).unwrap().is_none());
        assert!(compile_rule("/", RuleOrigin::IgnoreFile).unwrap().is_none());
    }

    #[test]
    fn literal_path_matches_its_own_rule() {
        for (line, path, is_dir) in [
            ("*.png", "*.png", false),
            ("build/", "build", true),
            ("/dist", "dist", false),
            ("foo?.txt", "foo?.txt", false),
            ("docs/notes.md", "docs/notes.md", false),
            ("a+b(c).txt", "a+b(c).txt", false),
            ("/out/", "out", true),
        ] {
            assert!(rule(line).matches(path, is_dir), "{} should match {}", line, path);
        }
    }

    #[test]
    fn file_rule_matches_full_path_or_trailing_segment() {
        let r = rule("secret.txt");
        assert!(r.matches("secret.txt", false));
        assert!(r.matches("config/secret.txt", false));
        assert!(!r.matches("config/mysecret.txt", false));
        assert!(!r.matches("secret.txt.bak", false));
    }

    #[test]
    fn wildcards_translate() {
        let star = rule("*.log");
        assert!(star.matches("server.log", false));
        assert!(star.matches("var/app/server.log", false));
        assert!(!star.matches("server.log.1", false));

        let question = rule("data?.csv");
        assert!(question.matches("data1.csv", false));
        assert!(!question.matches("data12.csv", false));
    }

    #[test]
    fn metacharacters_are_literal() {
        let r = rule("file.txt");
        assert!(!r.matches("fileXtxt", false));
    }

    #[test]
    fn directory_rule_matches_full_segment_anywhere() {
        let r = rule("node_modules/");
        assert!(r.is_dir_only());
        assert!(r.matches("node_modules", true));
        assert!(r.matches("web/node_modules", true));
        assert!(r.matches("web/node_modules/react/index.js", false));
        assert!(!r.matches("my_node_modules", true));
        assert!(!r.matches("node_modules", false));
    }

    #[test]
    fn trailing_slash_marks_directory() {
        let r = rule("build/");
        assert!(r.matches("build/", false));
        assert!(r.matches("src/build/", false));
        assert!(!r.matches("build", false));
    }

    #[test]
    fn anchored_rule_only_matches_from_root() {
        let r = rule("/build");
        assert!(r.is_anchored());
        assert!(r.matches("build", true));
        assert!(r.matches("build", false));
        assert!(!r.matches("src/build", true));
    }

    #[test]
    fn loads_builtin_and_ignore_file() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(
            temp_dir.path().join(".gitignore"),
            "# generated\n\n*.tmp\n/secrets/\n",
        )
        .unwrap();

        let rules = IgnoreRules::load(temp_dir.path(), &Config::default()).unwrap();
        assert!(rules.is_ignored("scratch.tmp", false));
        assert!(rules.is_ignored("secrets", true));
        assert!(rules.is_ignored(".git", true));
        assert!(rules.is_ignored("PROJECT_PROMPT.md", false));
        assert!(!rules.is_ignored("src/main.rs", false));
        assert_eq!(
            rules.first_match("scratch.tmp", false).unwrap().origin(),
            RuleOrigin::IgnoreFile
        );
    }

    #[test]
    fn missing_ignore_file_is_not_fatal() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.general.enable_builtin_ignore = false;
        let rules = IgnoreRules::load(temp_dir.path(), &config).unwrap();
        assert_eq!(rules.len(), 1);
        assert!(!rules.is_ignored("image.png", false));
    }
}
