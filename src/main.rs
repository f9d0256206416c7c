use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use stackward::cli::{
    handle_backup_command, handle_config_command, handle_detect_command, handle_health_command,
    handle_history_command, handle_init_command, handle_restore_command, handle_secrets_command,
    handle_sync_command, Outcome,
};
use stackward::config::{paths::StackPaths, settings::Settings};
use stackward::error::{StackError, StackResult, EXIT_INTERRUPTED};
use stackward::storage::cleanup;

#[derive(Parser)]
#[command(
    name = "stackward",
    author = "Kaylee Beyene",
    version,
    about = "Backups, restores, config sync and self-healing for a compose stack",
    long_about = "stackward keeps a single-host docker compose stack recoverable: \
                  encrypted database and full backups, guarded restores, atomic \
                  allow-list sync with rollback, and a bounded restart/recreate \
                  ladder for unhealthy services."
)]
struct Cli {
    /// Project root (default: current directory)
    #[arg(long, global = true, env = "STACKWARD_ROOT")]
    root: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create directories, default settings and the key pair
    Init,

    /// Show current configuration and paths
    Config,

    /// Backup management commands
    #[command(subcommand)]
    Backup(stackward::cli::BackupCommands),

    /// Restore an artifact over the live stack
    Restore(stackward::cli::RestoreArgs),

    /// Detect the profile of an artifact
    Detect {
        /// Artifact path
        artifact: PathBuf,
    },

    /// Refresh allow-lists from upstream reference data
    Sync {
        /// Show what would change without writing
        #[arg(long)]
        dry_run: bool,
    },

    /// Service health commands
    #[command(subcommand)]
    Health(stackward::cli::HealthCommands),

    /// Secrets store commands
    #[command(subcommand)]
    Secrets(stackward::cli::SecretsCommands),

    /// Show recent operations from the journal
    History {
        /// Number of entries to show
        #[arg(short = 'n', long, default_value = "20")]
        count: usize,
    },
}

fn init_tracing(verbosity: u8) -> anyhow::Result<()> {
    let default_level = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(format!("stackward={}", default_level))),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init()
        .context("failed to initialise logging")
}

/// Remove registered plaintext and lock files when the operator hits Ctrl-C
fn install_interrupt_cleanup() -> anyhow::Result<()> {
    ctrlc::set_handler(|| {
        let removed = cleanup::remove_registered();
        eprintln!("Interrupted. Removed {} temporary file(s).", removed);
        std::process::exit(i32::from(EXIT_INTERRUPTED));
    })
    .context("failed to install interrupt handler")
}

fn run(cli: Cli) -> StackResult<Outcome> {
    let paths = StackPaths::new(cli.root)?;
    let settings = Settings::load_or_create(&paths)?;

    match cli.command {
        Commands::Init => handle_init_command(&paths),
        Commands::Config => handle_config_command(&paths, &settings),
        Commands::Backup(cmd) => handle_backup_command(&paths, &settings, cmd),
        Commands::Restore(args) => handle_restore_command(&paths, &settings, args),
        Commands::Detect { artifact } => handle_detect_command(&paths, artifact),
        Commands::Sync { dry_run } => handle_sync_command(&paths, &settings, dry_run),
        Commands::Health(cmd) => handle_health_command(&paths, &settings, cmd),
        Commands::Secrets(cmd) => {
            let editor = std::env::var("EDITOR").unwrap_or_else(|_| "vi".to_string());
            handle_secrets_command(&paths, &editor, cmd)
        }
        Commands::History { count } => handle_history_command(&paths, count),
    }
}

fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.verbose)?;
    install_interrupt_cleanup()?;

    let code = match run(cli) {
        Ok(outcome) => ExitCode::from(outcome.exit_code()),
        Err(StackError::UserAborted) => {
            println!("Aborted. Nothing was changed.");
            ExitCode::from(StackError::UserAborted.exit_code())
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            eprintln!();
            eprintln!("{}", e.remediation());
            if e.is_retryable() {
                eprintln!("The failure may be temporary; running the command again is safe.");
            }
            ExitCode::from(e.exit_code())
        }
    };
    Ok(code)
}
