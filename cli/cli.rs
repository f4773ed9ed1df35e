mod cli_args;
mod commands;
mod output;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use colored::*;
use log;
use std::path::{Path, PathBuf};
use std::process;

use cli_args::{Cli, Commands, IgnoreTogglesGroup, ProjectConfigOpts};
use promptmap_core::{AppError, Config};

fn main() {
    let cli_args = Cli::parse();

    setup_logging(cli_args.quiet, cli_args.verbose);

    let quiet = cli_args.quiet;

    log::debug!("CLI args parsed: {:?}", cli_args);

    let exit_code = match run_app(cli_args, quiet) {
        Ok(_) => {
            log::info!("Application finished successfully.");
            0
        }
        Err(e) => {
            let exit_code = exit_code_for(e.downcast_ref::<AppError>());

            if !quiet || exit_code == 1 || exit_code == 5 {
                eprintln!("{} {:#}\n", "Error:".red().bold(), e);
            } else {
                log::error!("Application failed: {:#}", e);
            }

            exit_code
        }
    };
    log::debug!("Exiting with code {}", exit_code);
    process::exit(exit_code);
}

fn exit_code_for(core_err: Option<&AppError>) -> i32 {
    match core_err {
        Some(AppError::Config(_)) => 1,
        Some(AppError::MissingCredential(_)) => 1,
        Some(AppError::TomlParse(_)) => 1,
        Some(AppError::Io(_)) => 2,
        Some(AppError::FileRead { .. }) => 2,
        Some(AppError::FileWrite { .. }) => 2,
        Some(AppError::DirCreation { .. }) => 2,
        Some(AppError::Pattern(_)) => 2,
        Some(AppError::Store(_)) => 2,
        Some(AppError::Ledger(_)) => 2,
        Some(AppError::Quota { .. }) => 3,
        Some(AppError::Transport(_)) => 4,
        Some(AppError::Http(_)) => 4,
        Some(AppError::Parse(_)) => 4,
        Some(AppError::TokenLimit { .. }) => 4,
        Some(AppError::DurationParse(_)) => 5,
        Some(AppError::JsonSerialize(_)) => 6,
        Some(AppError::YamlError(_)) => 6,
        Some(AppError::XmlSerialize(_)) => 6,
        Some(_) => 1,
        None => 1,
    }
}

fn setup_logging(quiet: bool, verbose: u8) {
    let log_level = if quiet {
        log::LevelFilter::Off
    } else {
        match verbose {
            0 => log::LevelFilter::Warn,
            1 => log::LevelFilter::Info,
            2 => log::LevelFilter::Debug,
            _ => log::LevelFilter::Trace,
        }
    };
    env_logger::Builder::new()
        .filter_level(log_level)
        .format_timestamp(None)
        .init();
    log::trace!("Logger initialized with level: {:?}", log_level);
}

fn run_app(cli: Cli, quiet: bool) -> Result<()> {
    match cli.command {
        None => {
            Cli::command().print_help()?;
        }
        Some(command) => match command {
            Commands::Generate(args) => {
                log::debug!("Executing 'generate' command...");
                commands::generate::handle_generate_command(args, quiet)?;
            }
            Commands::Scan(args) => {
                log::debug!("Executing 'scan' command...");
                commands::scan::handle_scan_command(args, quiet)?;
            }
            Commands::Context(args) => {
                log::debug!("Executing 'context' command...");
                commands::context::handle_context_command(args)?;
            }
            Commands::Search(args) => {
                log::debug!("Executing 'search' command...");
                commands::search::handle_search_command(args, quiet)?;
            }
            Commands::Related(args) => {
                log::debug!("Executing 'related' command...");
                commands::search::handle_related_command(args, quiet)?;
            }
        },
    }
    Ok(())
}

/// Resolves the project root and loads `.env` from it (then from the current directory).
pub fn resolve_project_root(project_opts: &ProjectConfigOpts) -> Result<PathBuf> {
    let project_root = Config::determine_project_root(project_opts.project_root.as_ref())
        .context("Failed to determine project root")?;
    log::info!("Project root determined: {}", project_root.display());

    match dotenvy::from_path(project_root.join(".env")) {
        Ok(()) => log::debug!("Loaded environment from project .env"),
        Err(_) => {
            if dotenvy::dotenv().is_ok() {
                log::debug!("Loaded environment from .env in current directory");
            }
        }
    }
    Ok(project_root)
}

pub fn load_config_for_command(
    project_root: &Path,
    project_opts: &ProjectConfigOpts,
    ignore_toggles: Option<&IgnoreTogglesGroup>,
) -> Result<Config> {
    let config_path = Config::resolve_config_path(
        project_root,
        project_opts.config.as_ref(),
        project_opts.no_config,
    )
    .context("Failed to resolve configuration path")?;

    let mut config = match &config_path {
        Some(path) => Config::load_from_path(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => Config::default(),
    };

    if let Some(name) = &project_opts.project_name {
        config.general.project_name = Some(name.clone());
    }
    if let Some(toggles) = ignore_toggles {
        if toggles.disable_ignore_file {
            config.general.use_ignore_file = false;
        }
        if toggles.disable_builtin_ignore {
            config.general.enable_builtin_ignore = false;
        }
    }

    config.general.project_name = Some(config.get_effective_project_name(project_root));
    log::trace!("Effective config: {:?}", config);
    Ok(config)
}
