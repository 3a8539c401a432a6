mod cmd;
mod console;
mod output;
mod root;

use clap::{Parser, Subcommand};
use cmd::{config::ConfigSubcommand, tips::TipsSubcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "benchrun",
    about = "Resumable liquid-handling runs with persisted tip tracking",
    version,
    propagate_version = true
)]
struct Cli {
    /// Project root (default: auto-detect from .benchrun/ or .git/)
    #[arg(long, global = true, env = "BENCHRUN_ROOT")]
    root: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create .benchrun/ with a default bench layout
    Init,

    /// Run the bead cleanup protocol against the simulated handler
    Run {
        /// Resume from this stage; earlier stages are walked but not executed
        #[arg(long)]
        start_at: Option<String>,

        /// Replace timed waits with an operator confirmation
        #[arg(long)]
        skip_delays: bool,

        /// Confirm every operator prompt automatically
        #[arg(long, short = 'y')]
        yes: bool,
    },

    /// List the protocol's stages in order
    Stages,

    /// Show or refill persisted tip state
    Tips {
        #[command(subcommand)]
        subcommand: TipsSubcommand,
    },

    /// Show the status of the last run
    Status,

    /// Inspect and validate the bench configuration
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },
}

fn main() {
    let cli = Cli::parse();

    let default_level = match &cli.command {
        Commands::Run { .. } => tracing::Level::INFO,
        _ => tracing::Level::WARN,
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let root = root::resolve_root(cli.root.as_deref());

    let result = match cli.command {
        Commands::Init => cmd::init::run(&root),
        Commands::Run {
            start_at,
            skip_delays,
            yes,
        } => cmd::run::run(&root, start_at, skip_delays, yes, cli.json),
        Commands::Stages => cmd::stages::run(&root, cli.json),
        Commands::Tips { subcommand } => cmd::tips::run(&root, subcommand, cli.json),
        Commands::Status => cmd::status::run(&root, cli.json),
        Commands::Config { subcommand } => cmd::config::run(&root, subcommand, cli.json),
    };

    if let Err(e) = result {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
