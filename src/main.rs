//! Keelson CLI - index and verify a signed governance ledger.

use clap::Parser;
use keelson::cli::{Cli, Commands, IndexCommands};
use keelson::commands::{self, Output, Workspace};
use keelson::config::{ConfigOverrides, OutputFormat};
use keelson::storage::find_git_root;
use std::env;
use std::path::PathBuf;
use std::process;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

fn main() {
    let cli = Cli::parse();

    // Determine repo path: --repo flag > KN_REPO env > auto-detect git root > cwd
    let repo_path = resolve_repo_path(cli.repo_path, cli.human_readable);

    let mut overrides = ConfigOverrides::new();
    if let Some(key) = cli.cache_key {
        overrides = overrides.with_cache_key(key);
    }
    if cli.human_readable {
        overrides = overrides.with_output_format(OutputFormat::Human);
    }

    let ws = match Workspace::resolve(&repo_path, &overrides) {
        Ok(ws) => ws,
        Err(e) => exit_with_error(&e.to_string(), cli.human_readable),
    };
    let human = ws.config.output_format() == OutputFormat::Human;

    init_logging(ws.config.log_filter());
    tracing::debug!(
        ledger = %ws.ledger_root.display(),
        cache_key = ws.config.cache_key(),
        cache_key_source = %ws.config.cache_key.source,
        "Workspace resolved"
    );

    match run_command(cli.command, &ws, human) {
        Ok(true) => {}
        Ok(false) => process::exit(1),
        Err(e) => exit_with_error(&e.to_string(), human),
    }
}

/// Install the stderr subscriber. `log_filter` is already resolved from
/// `KN_LOG`, config.kdl or the default.
fn init_logging(log_filter: &str) {
    let filter = EnvFilter::try_new(log_filter).unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false),
        )
        .init();
}

fn exit_with_error(message: &str, human: bool) -> ! {
    if human {
        eprintln!("Error: {}", message);
    } else {
        eprintln!("{}", serde_json::json!({ "error": message }));
    }
    process::exit(1);
}

/// Resolve the repository path based on explicit flag, environment variable, or auto-detection.
///
/// When an explicit path is provided (via -C/--repo or KN_REPO), it is used literally
/// without git root detection.
fn resolve_repo_path(explicit_path: Option<PathBuf>, human: bool) -> PathBuf {
    match explicit_path {
        Some(path) => {
            if !path.exists() {
                exit_with_error(
                    &format!("Specified repo path does not exist: {}", path.display()),
                    human,
                );
            }
            path
        }
        None => {
            let cwd = env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
            find_git_root(&cwd).unwrap_or(cwd)
        }
    }
}

/// Run one command and print its result. Returns `false` when the command
/// ran but reported failure.
fn run_command(command: Commands, ws: &Workspace, human: bool) -> Result<bool, keelson::Error> {
    match command {
        Commands::Init => output(&commands::init(ws)?, human),
        Commands::Index { command } => match command {
            IndexCommands::Generate => {
                let report = commands::index_generate(ws)?;
                output(&report, human);
                return Ok(report.success);
            }
            IndexCommands::Status => output(&commands::index_status(ws)?, human),
            IndexCommands::Show => output(&commands::index_show(ws)?, human),
            IndexCommands::Invalidate => output(&commands::index_invalidate(ws)?, human),
            IndexCommands::Validate => output(&commands::index_validate(ws)?, human),
        },
        Commands::Activity { limit } => output(&commands::activity(ws, limit)?, human),
        Commands::Task { id } => output(&commands::task_show(ws, &id)?, human),
    }
    Ok(true)
}

/// Print output in JSON or human-readable format.
fn output<T: Output>(result: &T, human: bool) {
    if human {
        println!("{}", result.to_human());
    } else {
        println!("{}", result.to_json());
    }
}
