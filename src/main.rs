//! tracksync - GitHub / Jira issue synchronization
//!
//! Main entry point for the tracksync CLI.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tracksync::config::{validate_config, SyncConfig};
use tracksync::integrations::{GitHubAdapter, JiraAdapter};
use tracksync::server::SyncServer;
use tracksync::store::{MappingStore, StoreConfig};
use tracksync::sync::SyncContext;

/// tracksync - keep GitHub and Jira issues in step via webhooks
#[derive(Parser, Debug)]
#[command(name = "tracksync")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to config file (default: ./config.yaml, falling back to environment variables)
    #[arg(short, long, env = "TRACKSYNC_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the webhook server (default)
    Serve {
        /// Port to listen on (overrides configuration)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Create the mapping database schema
    InitDb,

    /// Validate configuration and print every problem found
    CheckConfig,
}

fn main() {
    if let Err(e) = tracksync::logging::init() {
        eprintln!("Failed to initialize logging: {}", e);
    }

    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

fn run(cli: Cli) -> tracksync::Result<()> {
    let config = SyncConfig::load_or_env(cli.config.as_deref())?;

    match cli.command.unwrap_or(Commands::Serve { port: None }) {
        Commands::Serve { port } => serve(config, port),
        Commands::InitDb => init_db(&config),
        Commands::CheckConfig => check_config(&config),
    }
}

fn serve(mut config: SyncConfig, port: Option<u16>) -> tracksync::Result<()> {
    if let Some(port) = port {
        config.server.port = port;
    }
    tracksync::config::validate_config_result(&config)?;

    let store = Arc::new(MappingStore::open(&StoreConfig::from(&config.database))?);
    let github = GitHubAdapter::new(config.github.clone())?;
    let jira = JiraAdapter::new(config.jira.clone())?;
    if !github.is_authenticated() {
        tracing::warn!("No GitHub token configured; API calls will be anonymous");
    }
    if !jira.is_authenticated() {
        tracing::warn!("No Jira token configured; API calls will be anonymous");
    }

    let ctx = SyncContext::new(&config, Arc::new(github), Arc::new(jira), store)?;
    let server = SyncServer::new(Arc::new(ctx), config.server.max_body_size);
    let addr = config.server.bind_addr();

    tracing::info!(
        organization = %config.github.organization,
        project = %config.jira.project,
        "Starting tracksync"
    );

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(server.run(&addr))
}

fn init_db(config: &SyncConfig) -> tracksync::Result<()> {
    let store = MappingStore::open(&StoreConfig::from(&config.database))?;
    let stats = store.stats()?;

    println!("Mapping database ready: {}", config.database.path.display());
    println!("  Issue links:   {}", stats.issue_links);
    println!("  Comment links: {}", stats.comment_links);
    println!("  User links:    {}", stats.user_links);
    println!("  Deliveries:    {}", stats.processed_deliveries);
    Ok(())
}

fn check_config(config: &SyncConfig) -> tracksync::Result<()> {
    match validate_config(config) {
        Ok(()) => {
            println!("Configuration is valid");
            println!("  GitHub: {} ({})", config.github.default_repository(), config.github.url);
            println!("  Jira:   {} ({})", config.jira.project, config.jira.url);
            Ok(())
        }
        Err(errors) => {
            println!("Configuration has {} problem(s):", errors.len());
            for error in &errors {
                println!("  - {}", error);
            }
            Err(tracksync::SyncError::Config(format!(
                "{} validation error(s)",
                errors.len()
            )))
        }
    }
}
