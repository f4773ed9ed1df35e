use crate::cli_args::{ProjectConfigOpts, RelatedArgs, SearchArgs};
use crate::output;
use crate::{load_config_for_command, resolve_project_root};
use anyhow::{Context, Result};
use log;
use promptmap_core::scan::normalize_separators;
use promptmap_core::{
    Config, EmbeddingIndex, Pipeline, Session, SimilarFile, TokenBudgetLoader, TokenCounter,
    api_key_from_env,
};
use serde::Serialize;
use std::path::Path;

#[derive(Serialize)]
struct SimilarityResults<'a> {
    query: &'a str,
    result: &'a [SimilarFile],
}

fn open_index(project_opts: &ProjectConfigOpts, reindex: bool) -> Result<EmbeddingIndex> {
    let project_root = resolve_project_root(project_opts)?;
    let config = load_config_for_command(&project_root, project_opts, None)
        .context("Failed to load configuration")?;
    let api_key = api_key_from_env().ok();
    let index = EmbeddingIndex::open(&project_root, &config, api_key.as_deref());
    log::info!("Embedding backend: {}", index.backend_name());

    if reindex || index.is_empty() {
        rebuild_index(&index, &project_root, &config)?;
    }
    Ok(index)
}

fn rebuild_index(index: &EmbeddingIndex, project_root: &Path, config: &Config) -> Result<()> {
    log::info!("Building similarity index from the heuristic selection");
    let (_rules, mut snapshot, selection) = Pipeline::new(config, project_root)
        .prepare_offline()
        .context("Failed to prepare project snapshot")?;
    let counter = TokenCounter::new(config.budget.tokenizer);
    let report = TokenBudgetLoader::from_config(&counter, config)
        .load(&mut snapshot, &selection.paths, &mut Session::ephemeral())
        .context("Failed to load selected files")?;
    let indexed = index.index(report.accepted_paths().filter_map(|path| {
        snapshot
            .get(path)
            .and_then(|record| record.content.as_deref())
            .map(|content| (path, content))
    }));
    log::info!("Indexed {} files", indexed);
    Ok(())
}

pub fn handle_search_command(args: SearchArgs, quiet: bool) -> Result<()> {
    let index = open_index(&args.project_config, args.reindex)?;
    let results = index.query(&args.query, args.limit);
    if args.format_output.format.is_some() {
        let data = SimilarityResults {
            query: &args.query,
            result: &results,
        };
        output::print_data(&data, &args.format_output, "json", "results")?;
    } else if !quiet {
        output::print_similar_table(&format!("Files similar to \"{}\"", args.query), &results);
    }
    Ok(())
}

pub fn handle_related_command(args: RelatedArgs, quiet: bool) -> Result<()> {
    let index = open_index(&args.project_config, args.reindex)?;
    let path = normalize_separators(&args.path);
    let results = index.related_to(&path, args.limit);
    if args.format_output.format.is_some() {
        let data = SimilarityResults {
            query: &path,
            result: &results,
        };
        output::print_data(&data, &args.format_output, "json", "results")?;
    } else if !quiet {
        output::print_similar_table(&format!("Files related to {}", path), &results);
    }
    Ok(())
}
