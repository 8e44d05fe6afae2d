use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use runkeeper::commands;
use runkeeper::models::{LifecycleEvent, LogLevel, ProjectCreated};
use runkeeper::{AppState, SupervisorConfig};
use std::path::PathBuf;
use std::process::ExitCode;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "runkeeper", version, about = "Keep uploaded projects running")]
struct Cli {
    /// Config file (JSON). Defaults to <config_dir>/runkeeper/config.json.
    #[arg(long, global = true, env = "RUNKEEPER_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Supervise one project in the foreground, streaming its console.
    Run(RunArgs),
    /// Print the effective configuration.
    Config,
}

#[derive(Args)]
struct RunArgs {
    /// Project directory.
    #[arg(long)]
    root: PathBuf,

    /// Entry point, relative to the project directory.
    #[arg(long)]
    main: String,

    #[arg(long, default_value = "local")]
    owner: String,

    /// Defaults to the project directory name.
    #[arg(long)]
    project: Option<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let _ = tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("runkeeper=info,warn")),
        )
        .try_init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Run(args) => run(cli.config, args).await,
        Commands::Config => print_config(cli.config),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn print_config(path: Option<PathBuf>) -> Result<()> {
    let config = SupervisorConfig::load(path.as_deref()).context("loading config")?;
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}

async fn run(config_path: Option<PathBuf>, args: RunArgs) -> Result<()> {
    let config = SupervisorConfig::load(config_path.as_deref()).context("loading config")?;

    let root = args
        .root
        .canonicalize()
        .with_context(|| format!("project directory {}", args.root.display()))?;
    if !root.join(&args.main).is_file() {
        bail!("entry point {} not found in {}", args.main, root.display());
    }
    let project_id = match args.project {
        Some(id) => id,
        None => root
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .context("cannot derive a project id from the root path")?,
    };

    #[cfg(not(target_os = "windows"))]
    if config.login_path
        && runkeeper::utils::resolve_program_in_user_path(&config.toolchain.interpreter).is_none()
    {
        warn!(interpreter = %config.toolchain.interpreter, "interpreter not found on the login PATH");
    }

    let state = AppState::new(config)?;
    commands::register_project(
        &state,
        ProjectCreated {
            owner_id: args.owner.clone(),
            project_id: project_id.clone(),
            main_file: args.main.clone(),
            root_path: root,
        },
    )
    .await?;

    let mut console = commands::subscribe_console(&state, &args.owner, &project_id).await?;
    let printer = tokio::spawn(async move {
        while let Some(entry) = console.recv().await {
            let stamp = entry.timestamp.format("%H:%M:%S");
            match entry.level {
                LogLevel::Info => println!("[{}] {}", stamp, entry.text),
                LogLevel::Warn => println!("[{}] WARN {}", stamp, entry.text),
                LogLevel::Error => println!("[{}] ERROR {}", stamp, entry.text),
            }
        }
    });

    let mut events = state.supervisor.events();
    let watcher = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(LifecycleEvent::InstallFailed { key, module, code }) => {
                    warn!(project = %key, %module, ?code, "dependency could not be installed; project stays stopped");
                }
                Ok(event) => info!(project = %event.key(), ?event, "lifecycle"),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "lifecycle events dropped"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    commands::start_project(&state, &args.owner, &project_id).await?;

    tokio::signal::ctrl_c()
        .await
        .context("waiting for Ctrl-C")?;
    info!("shutting down");

    commands::stop_all_projects(&state).await;
    watcher.abort();
    printer.abort();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_run_arguments() {
        let cli = Cli::try_parse_from(["runkeeper", "run", "--root", "/srv/bot", "--main", "index.js"]).unwrap();
        match cli.command {
            Commands::Run(args) => {
                assert_eq!(args.root, PathBuf::from("/srv/bot"));
                assert_eq!(args.main, "index.js");
                assert_eq!(args.owner, "local");
                assert!(args.project.is_none());
            }
            Commands::Config => panic!("expected run"),
        }
    }
}
