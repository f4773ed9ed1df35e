use crate::cli_args::ScanArgs;
use crate::output::{self, SnapshotRow};
use crate::{load_config_for_command, resolve_project_root};
use anyhow::{Context, Result};
use promptmap_core::loader::read_file_content;
use promptmap_core::{IgnoreRules, TokenCounter, scan_project};
use serde::Serialize;

#[derive(Debug, Serialize)]
struct ScanSummary {
    project_name: String,
    rule_count: usize,
    file_count: usize,
    files: Vec<SnapshotRow>,
}

pub fn handle_scan_command(args: ScanArgs, quiet: bool) -> Result<()> {
    let project_root = resolve_project_root(&args.project_config)?;
    let config = load_config_for_command(
        &project_root,
        &args.project_config,
        Some(&args.ignore_toggles),
    )
    .context("Failed to load configuration")?;

    let rules = IgnoreRules::load(&project_root, &config).context("Failed to load ignore rules")?;
    let snapshot =
        scan_project(&project_root, &rules, &config).context("Failed to scan project")?;
    let counter = TokenCounter::new(config.budget.tokenizer);

    let mut rows: Vec<SnapshotRow> = snapshot
        .records()
        .map(|record| SnapshotRow {
            path: record.path.clone(),
            size: record.size,
            tokens: counter.count(&read_file_content(&project_root, &record.path)),
        })
        .collect();
    rows.sort_by(|a, b| a.path.cmp(&b.path));

    if args.format_output.format.is_some() {
        let summary = ScanSummary {
            project_name: snapshot.name().to_string(),
            rule_count: rules.len(),
            file_count: rows.len(),
            files: rows,
        };
        output::print_data(&summary, &args.format_output, "json", "scan")?;
    } else if !quiet {
        output::print_snapshot_table(snapshot.name(), rules.len(), &rows);
    }
    Ok(())
}
