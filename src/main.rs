//! Claude Manager - serve coding sessions, or drive a running server
//!
//! Run with `claude-manager` or `claude-manager --help` for usage.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, bail, eyre};
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use claude_manager::{
    APP_NAME, Config, SessionId, SessionStatus, VERSION,
    client::{ApiClient, AttachResult, attach_to_session, find_session},
    reconcile::{Reconciler, SessionChange},
    server,
    session::CreateRequest,
};

#[derive(Parser)]
#[command(name = APP_NAME)]
#[command(version = VERSION)]
#[command(about = "Coordinate worktree-backed coding sessions and stream their terminals")]
#[command(long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Path to config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the server (default)
    Serve {
        /// Port to listen on (overrides config)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// List sessions of the running server
    List,

    /// Print session changes as they are polled
    Watch,

    /// Create a new session
    New {
        /// Session name
        name: String,

        /// Repository path (default: current directory)
        #[arg(short = 'd', long)]
        path: Option<PathBuf>,

        /// Branch to create (default: <prefix>/<sanitized name>)
        #[arg(short, long)]
        branch: Option<String>,

        /// Branch to fork from (default: config)
        #[arg(long)]
        base: Option<String>,

        /// Run in the repository itself instead of a new worktree
        #[arg(long)]
        no_worktree: bool,
    },

    /// Attach to a session's terminal (detach with Ctrl+Q)
    Attach {
        /// Session name or ID prefix
        session: String,
    },

    /// Send Ctrl+C to a session
    Interrupt {
        /// Session name or ID prefix
        session: String,
    },

    /// Kill a session and remove it
    Kill {
        /// Session name or ID prefix
        session: String,
    },

    /// Show configuration
    Config {
        /// Initialize config file with defaults
        #[arg(long)]
        init: bool,
    },
}

fn setup_logging(debug: bool, log_file: Option<&PathBuf>) -> Result<()> {
    let filter = if debug {
        EnvFilter::new("debug")
    } else {
        // Use info level for our crate, warn for dependencies
        EnvFilter::new("info")
            .add_directive("gix=warn".parse()?)
            .add_directive("tokio=warn".parse()?)
            .add_directive("tower_http=warn".parse()?)
            .add_directive("hyper=warn".parse()?)
    };

    if let Some(path) = log_file {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;

        tracing_subscriber::registry()
            .with(fmt::layer().with_writer(file).with_target(false))
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
            .with(filter)
            .init();
    }

    Ok(())
}

/// Slack on top of the server's kill timeout for mutating requests
const MUTATION_MARGIN: Duration = Duration::from_secs(30);

fn client(config: &Config) -> Result<ApiClient> {
    Ok(ApiClient::new(&config.server_url, config.request_timeout())?
        .with_mutation_timeout(config.kill_timeout() + MUTATION_MARGIN))
}

/// Resolve a session name or id prefix against the server's listing
async fn resolve(api: &ApiClient, query: &str) -> Result<SessionId> {
    let sessions = api.list().await?;
    match find_session(&sessions, query) {
        Some(session) => Ok(session.id),
        None => bail!(
            "Session not found: {}\nUse '{} list' to see available sessions.",
            query,
            APP_NAME
        ),
    }
}

fn status_icon(status: SessionStatus) -> &'static str {
    match status {
        SessionStatus::Active => "●",
        SessionStatus::Idle => "◐",
        SessionStatus::Creating | SessionStatus::Starting => "◌",
        SessionStatus::Error => "✗",
        SessionStatus::Terminated => "○",
    }
}

fn print_change(change: &SessionChange) {
    match change {
        SessionChange::Added { session } => {
            println!("+ {} {} [{}] {}", session.id.short(), session.name, session.branch, session.status)
        }
        SessionChange::Removed { id } => println!("- {}", id.short()),
        SessionChange::StatusChanged { id, from, to } => {
            println!("~ {} {} -> {}", id.short(), from, to)
        }
    }
}

async fn execute_attach(url: &str) {
    match attach_to_session(url).await {
        Ok(AttachResult::Detached) => {
            info!("Detached from session");
        }
        Ok(AttachResult::SessionEnded) => {
            println!("Session stream closed");
        }
        Ok(AttachResult::Error(e)) => {
            eprintln!("Attach error: {}", e);
        }
        Err(e) => {
            eprintln!("Failed to attach: {}", e);
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Install color-eyre error hooks
    color_eyre::install()?;

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load().unwrap_or_else(|e| {
            eprintln!("Warning: Failed to load config, using defaults: {}", e);
            Config::default()
        }),
    };
    let debug = cli.debug || config.debug;

    match cli.command {
        None | Some(Commands::Serve { port: None }) => {
            setup_logging(debug, config.log_file.as_ref())?;
            run_server(config).await?;
        }

        Some(Commands::Serve { port: Some(port) }) => {
            setup_logging(debug, config.log_file.as_ref())?;
            run_server(Config { port, ..config }).await?;
        }

        Some(Commands::List) => {
            setup_logging(debug, None)?;
            let sessions = client(&config)?.list().await?;

            if sessions.is_empty() {
                println!("No sessions. Use '{} new <name>' to create one.", APP_NAME);
                return Ok(());
            }

            println!("Sessions:");
            println!();
            for session in sessions {
                println!(
                    "  {} {} {} [{}] {}",
                    status_icon(session.status),
                    session.id.short(),
                    session.name,
                    session.branch,
                    session.path.display()
                );
            }
        }

        Some(Commands::Watch) => {
            setup_logging(debug, None)?;
            let api = client(&config)?;
            println!("Watching {} (Ctrl+C to stop)", api.base_url());

            let handle = Reconciler::new(Arc::new(api), config.reconciler_settings()).spawn();
            let mut changes = handle.subscribe();

            loop {
                tokio::select! {
                    change = changes.recv() => match change {
                        Ok(change) => print_change(&change),
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                    },
                    _ = tokio::signal::ctrl_c() => break,
                }
            }
            handle.stop().await;
        }

        Some(Commands::New {
            name,
            path,
            branch,
            base,
            no_worktree,
        }) => {
            setup_logging(debug, None)?;

            let repo_path = match path {
                Some(path) => path,
                None => std::env::current_dir()?,
            };
            let request = CreateRequest {
                name,
                repo_path,
                branch_name: branch,
                base_branch: base,
                use_worktree: !no_worktree,
            };

            println!("Creating session '{}'...", request.name);
            let session = client(&config)?.create(&request).await?;

            println!("Session created: {} [{}]", session.id, session.branch);
            println!("Working copy: {}", session.path.display());
            println!();
            println!("Attach with: {} attach {}", APP_NAME, session.id.short());
        }

        Some(Commands::Attach { session }) => {
            // The terminal is in raw mode while attached, so log to a file
            let log_file = match config.log_file.clone() {
                Some(path) => path,
                None => Config::default_log_file()?,
            };
            setup_logging(debug, Some(&log_file))?;

            let api = client(&config)?;
            let id = resolve(&api, &session).await?;
            execute_attach(&api.terminal_url(&id)).await;
        }

        Some(Commands::Interrupt { session }) => {
            setup_logging(debug, None)?;

            let api = client(&config)?;
            let id = resolve(&api, &session).await?;
            if api.interrupt(&id).await? {
                println!("Interrupt sent to {}", id.short());
            } else {
                println!("No viewer attached to {}, interrupt dropped", id.short());
            }
        }

        Some(Commands::Kill { session }) => {
            setup_logging(debug, None)?;

            let api = client(&config)?;
            let id = resolve(&api, &session).await?;
            api.kill(&id).await?;
            println!("Session {} killed", id.short());
        }

        Some(Commands::Config { init }) => {
            setup_logging(debug, None)?;

            let path = match cli.config {
                Some(path) => path,
                None => Config::config_file_path()?,
            };

            if init {
                config.save_to(&path)?;
                println!("Configuration initialized at {:?}", path);
            } else {
                println!("Configuration:");
                println!("{}", toml::to_string_pretty(&config)?);
                println!("\nConfig file: {:?}", path);
                println!("Data dir: {:?}", Config::data_dir()?);
            }
        }
    }

    Ok(())
}

async fn run_server(config: Config) -> Result<()> {
    info!("Starting Claude Manager v{}", VERSION);

    let state = server::build_state(&config).await;
    server::serve(state, &config.bind_addr())
        .await
        .map_err(|e| eyre!("Server failed: {}", e))
}
