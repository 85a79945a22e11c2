//! echoaudit - EchoAudit console
//!
//! Browses the sales-call archive kept by the Job Service and drives its
//! processing pipeline (fetch → transcribe → analyze → report).

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use echoaudit_client::{CommandSink, HttpJobService, JobService, Session, SessionSettings};
use echoaudit_common::api::Stage;
use echoaudit_common::config::{load_config, resolve_job_service_url};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod commands;

/// Command-line arguments for echoaudit
#[derive(Parser, Debug)]
#[command(name = "echoaudit")]
#[command(about = "Sales-call quality archive console")]
#[command(version)]
pub struct Cli {
    /// Config file (default: ECHOAUDIT_CONFIG, then ~/.config/echoaudit/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Job Service base URL (overrides ECHOAUDIT_JOB_SERVICE_URL and the config file)
    #[arg(long, global = true)]
    job_service_url: Option<String>,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

/// Period / organization scope; omitted levels use the automatic selection
#[derive(Args, Debug, Clone, Default)]
pub struct Scope {
    /// Period key, e.g. 2024-05-06_2024-05-12
    #[arg(long)]
    pub period: Option<String>,

    /// Organization code
    #[arg(long = "org")]
    pub organization: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print the period → organization → agent tree
    Index,

    /// Print an agent's calls grouped by day
    Calls {
        agent: String,
        #[command(flatten)]
        scope: Scope,
    },

    /// Print the status of every stage
    Status,

    /// Run the full cycle, or a single stage
    Run {
        /// fetch, transcribe, analyze or report
        #[arg(long)]
        stage: Option<Stage>,
    },

    /// Analyze one agent and generate the weekly report
    Analyze {
        agent: String,
        #[command(flatten)]
        scope: Scope,
        /// Overwrite an existing report without asking
        #[arg(long)]
        yes: bool,
    },

    /// Print or save an agent's weekly report
    Report {
        agent: String,
        #[command(flatten)]
        scope: Scope,
        /// Write to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Write to Report_{agent}_{period}.md
        #[arg(long, conflicts_with = "output")]
        save: bool,
    },

    /// Print a call transcript
    Transcript {
        agent: String,
        filename: String,
        #[command(flatten)]
        scope: Scope,
    },

    /// Read or change analysis instructions
    Prompts {
        #[command(subcommand)]
        action: PromptsCommand,
    },

    /// Play one call until it ends or Ctrl+C
    Play {
        agent: String,
        filename: String,
        #[command(flatten)]
        scope: Scope,
    },

    /// Follow pipeline status and events until Ctrl+C
    Watch,

    /// Configuration file management
    Config {
        #[command(subcommand)]
        action: ConfigCommand,
    },
}

#[derive(Subcommand, Debug)]
pub enum PromptsCommand {
    /// Print the system instruction and per-organization criteria
    Show,

    /// Replace the system instruction with the contents of a file
    SetSystem { file: PathBuf },

    /// Replace one organization's criteria with the contents of a file
    SetOrg {
        code: String,
        file: PathBuf,
        /// Display name stored with the criteria
        #[arg(long)]
        name: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Write a default config file
    Init {
        /// Target path (default: ~/.config/echoaudit/config.toml)
        #[arg(long)]
        path: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Command::Config {
        action: ConfigCommand::Init { path },
    } = &cli.command
    {
        init_tracing("info", cli.verbose);
        return commands::config_init(path.as_deref().or(cli.config.as_deref()));
    }

    let config = load_config(cli.config.as_deref()).context("Failed to load configuration")?;
    init_tracing(&config.logging.level, cli.verbose);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        git_hash = env!("GIT_HASH"),
        build_timestamp = env!("BUILD_TIMESTAMP"),
        profile = env!("BUILD_PROFILE"),
        "Starting echoaudit"
    );

    let base_url = resolve_job_service_url(cli.job_service_url.as_deref(), &config);
    info!(url = %base_url, "Job Service");

    let service: Arc<dyn JobService> = Arc::new(
        HttpJobService::new(&base_url, config.job_service.request_timeout())
            .context("Invalid Job Service URL")?,
    );
    let sink = Arc::new(CommandSink::new(
        Arc::clone(&service),
        config.player.command.clone(),
    ));
    let session = Session::start(service, sink, SessionSettings::from(&config));

    let result = tokio::select! {
        result = commands::dispatch(&session, cli.command) => result,
        _ = shutdown_signal() => Ok(()),
    };

    session.shutdown().await;
    result
}

/// Default filter from the config level; `-v` forces debug, RUST_LOG wins otherwise
fn init_tracing(level: &str, verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug,hyper=info,reqwest=info")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
