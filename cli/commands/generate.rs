use crate::cli_args::GenerateArgs;
use crate::output;
use crate::{load_config_for_command, resolve_project_root};
use anyhow::{Context, Result};
use log;
use promptmap_core::{AppError, HttpTransport, Pipeline, Session, Transport, api_key_from_env};

pub fn handle_generate_command(args: GenerateArgs, quiet: bool) -> Result<()> {
    let project_root = resolve_project_root(&args.project_config)?;
    let mut config = load_config_for_command(
        &project_root,
        &args.project_config,
        Some(&args.ignore_toggles),
    )
    .context("Failed to load configuration")?;

    if args.debug_calls {
        config.request.debug_calls = true;
    }
    if args.index {
        config.embeddings.enabled = true;
    }
    if let Some(max_tokens) = args.max_tokens {
        config.budget.max_tokens = max_tokens;
    }
    if let Some(output) = &args.output {
        config.general.output_file = output.clone();
    }
    config.validate().context("Invalid configuration")?;

    let (transport, api_key): (Option<Box<dyn Transport>>, Option<String>) = if args.dry_run {
        log::info!("Dry run: no network calls will be made");
        (None, None)
    } else {
        let api_key = api_key_from_env()?;
        let transport = HttpTransport::new(&config, api_key.clone())
            .context("Failed to build HTTP client")?;
        (Some(Box::new(transport) as Box<dyn Transport>), Some(api_key))
    };

    let mut session = Session::start(&project_root, &config);
    let report = Pipeline::new(&config, &project_root)
        .with_api_key(api_key)
        .run(transport, &mut session)
        .context("Project prompt generation failed")?;

    if !quiet {
        output::print_run_summary(&report);
    }

    if report.quota_exhausted {
        return Err(AppError::Quota {
            attempts: config.request.max_attempts,
            message: report.generation_error.unwrap_or_default(),
        })
        .context("Generation gave up after repeated rate limiting; the fallback document was written");
    }
    Ok(())
}
