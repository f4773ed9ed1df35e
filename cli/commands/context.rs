use crate::cli_args::ContextArgs;
use crate::output;
use crate::{load_config_for_command, resolve_project_root};
use anyhow::{Context, Result};
use promptmap_core::{Pipeline, ProjectDocument, Session, TokenBudgetLoader, TokenCounter};

pub fn handle_context_command(args: ContextArgs) -> Result<()> {
    let project_root = resolve_project_root(&args.project_config)?;
    let config = load_config_for_command(
        &project_root,
        &args.project_config,
        Some(&args.ignore_toggles),
    )
    .context("Failed to load configuration")?;

    let (_rules, mut snapshot, selection) = Pipeline::new(&config, &project_root)
        .prepare_offline()
        .context("Failed to prepare project snapshot")?;

    let counter = TokenCounter::new(config.budget.tokenizer);
    let mut session = Session::ephemeral();
    let report = TokenBudgetLoader::from_config(&counter, &config)
        .load(&mut snapshot, &selection.paths, &mut session)
        .context("Failed to load selected files")?;

    let document = ProjectDocument::assemble(&snapshot, &selection, &report);
    output::print_data(&document, &args.format_output, "json", "project_document")
}
