use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Args, Debug, Clone, Default)]
pub struct ProjectConfigOpts {
    #[arg(
        long,
        help = "Specify the target project directory (default: current dir).",
        help_heading = "Project Setup",
        value_name = "PATH"
    )]
    pub project_root: Option<PathBuf>,

    #[arg(
        long,
        help = "Specify path/filename of the TOML config file (default: .promptmap/promptmap.toml).",
        value_name = "CONFIG_FILE",
        conflicts_with = "no_config",
        help_heading = "Project Setup"
    )]
    pub config: Option<String>,

    #[arg(
        long,
        help = "Disable loading any TOML config file.",
        conflicts_with = "config",
        help_heading = "Project Setup"
    )]
    pub no_config: bool,

    #[arg(
        long,
        help = "Specify the project name (overrides config/dir name).",
        value_name = "NAME",
        help_heading = "Project Setup"
    )]
    pub project_name: Option<String>,
}

#[derive(Args, Debug, Clone, Default)]
pub struct FormatOutputOpts {
    #[arg(short = 'f', long, help = "Set the output format.", value_name = "FORMAT", value_parser = ["json", "yaml", "xml"], help_heading = "Output Formatting")]
    pub format: Option<String>,
}

#[derive(Args, Debug, Clone, Default)]
pub struct IgnoreTogglesGroup {
    #[arg(
        long,
        help = "Do not read the project ignore file.",
        help_heading = "Ignore Rules"
    )]
    pub disable_ignore_file: bool,

    #[arg(
        long,
        help = "Do not apply the builtin ignore rules.",
        help_heading = "Ignore Rules"
    )]
    pub disable_builtin_ignore: bool,
}

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Generate a token-bounded project prompt for AI assistants.",
    long_about = "promptmap scans a project, asks a language model which files matter most, \nloads them under a token budget and writes PROJECT_PROMPT.md for AI coding assistants.",
    help_template = "{about-section}\nUsage: {usage}\n\n{all-args}{after-help}",
    after_help = "EXAMPLES:\n  promptmap generate -v\n  promptmap generate --dry-run\n  promptmap scan -f yaml\n  promptmap search \"database schema\" -n 3",
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    #[arg(short, long, action = clap::ArgAction::Count, global = true, help = "Increase message verbosity (-v, -vv).")]
    pub verbose: u8,

    #[arg(
        short,
        long,
        global = true,
        help = "Silence informational messages and warnings."
    )]
    pub quiet: bool,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    #[command(
        visible_alias = "g",
        visible_alias = "gen",
        about = "Run the full pipeline and write the project prompt document."
    )]
    Generate(GenerateArgs),

    #[command(
        visible_alias = "s",
        about = "Show the ignore-filtered file snapshot."
    )]
    Scan(ScanArgs),

    #[command(
        visible_alias = "c",
        about = "Print the assembled project document without network calls."
    )]
    Context(ContextArgs),

    #[command(about = "Find files similar to a free-text query.")]
    Search(SearchArgs),

    #[command(about = "Find files similar to a given project file.")]
    Related(RelatedArgs),
}

#[derive(Args, Debug, Clone)]
pub struct GenerateArgs {
    #[clap(flatten)]
    pub project_config: ProjectConfigOpts,
    #[clap(flatten)]
    pub ignore_toggles: IgnoreTogglesGroup,

    #[arg(
        long,
        help = "Skip network calls: heuristic selection and the local fallback document.",
        help_heading = "Generation"
    )]
    pub dry_run: bool,

    #[arg(
        long,
        help = "Save each request, response and extracted text under .promptmap/debug.",
        help_heading = "Generation"
    )]
    pub debug_calls: bool,

    #[arg(
        long,
        help = "Index loaded files for similarity search.",
        help_heading = "Generation"
    )]
    pub index: bool,

    #[arg(
        long,
        help = "Override the token ceiling.",
        value_name = "TOKENS",
        help_heading = "Generation"
    )]
    pub max_tokens: Option<usize>,

    #[arg(
        short = 'o',
        long,
        help = "Name of the document written at the project root.",
        value_name = "FILE",
        help_heading = "Generation"
    )]
    pub output: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct ScanArgs {
    #[clap(flatten)]
    pub project_config: ProjectConfigOpts,
    #[clap(flatten)]
    pub ignore_toggles: IgnoreTogglesGroup,
    #[clap(flatten)]
    pub format_output: FormatOutputOpts,
}

#[derive(Args, Debug, Clone)]
pub struct ContextArgs {
    #[clap(flatten)]
    pub project_config: ProjectConfigOpts,
    #[clap(flatten)]
    pub ignore_toggles: IgnoreTogglesGroup,
    #[clap(flatten)]
    pub format_output: FormatOutputOpts,
}

#[derive(Args, Debug, Clone)]
pub struct SearchArgs {
    #[clap(flatten)]
    pub project_config: ProjectConfigOpts,
    #[clap(flatten)]
    pub format_output: FormatOutputOpts,

    #[arg(help = "Free-text query.", value_name = "QUERY")]
    pub query: String,

    #[arg(short = 'n', long, default_value_t = 5, help = "Number of results.")]
    pub limit: usize,

    #[arg(long, help = "Rebuild the index from the heuristic selection first.")]
    pub reindex: bool,
}

#[derive(Args, Debug, Clone)]
pub struct RelatedArgs {
    #[clap(flatten)]
    pub project_config: ProjectConfigOpts,
    #[clap(flatten)]
    pub format_output: FormatOutputOpts,

    #[arg(help = "Project-relative file path.", value_name = "PATH")]
    pub path: String,

    #[arg(short = 'n', long, default_value_t = 5, help = "Number of results.")]
    pub limit: usize,

    #[arg(long, help = "Rebuild the index from the heuristic selection first.")]
    pub reindex: bool,
}
