use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod cmd;

#[derive(Parser)]
#[command(name = "installsync")]
#[command(version, about = "Reconcile sector spreadsheets against the portal installations")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to installsync.toml. Defaults to ./installsync.toml, then the user config dir.
    #[arg(long, global = true, env = "INSTALLSYNC_CONFIG")]
    pub config: Option<PathBuf>,

    /// Database path. Overrides the config file and INSTALLSYNC_DB_PATH.
    #[arg(long, global = true)]
    pub db_path: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Serve the HTTP sync trigger
    Serve {
        /// Port to serve on
        #[arg(short, long)]
        port: Option<u16>,

        /// Also run the sync every N minutes in-process
        #[arg(long)]
        every: Option<u64>,
    },
    /// Run one sync over every sector and print the result as JSON
    Sync {
        /// Override the per-sector batch cap
        #[arg(long)]
        batch_limit: Option<usize>,
    },
    /// Create the database and its tables
    InitDb,
    /// Create or update the account whose refresh token the sync uses
    AddUser {
        #[arg(long)]
        email: String,

        /// admin, manager, technician or user
        #[arg(long, default_value = "admin")]
        role: String,

        #[arg(long, env = "INSTALLSYNC_REFRESH_TOKEN")]
        refresh_token: Option<String>,
    },
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show the resolved configuration
    Show,
    /// Validate configuration and show any warnings
    Validate,
    /// Write a default installsync.toml in the current directory
    Init,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = installsync::config::SyncConfig::resolve(cli.config.as_deref())?;
    if let Some(db_path) = &cli.db_path {
        config.store.db_path = db_path.clone();
    }

    // Config commands print TOML to stdout; keep them free of log lines.
    let log_guards = match cli.command {
        Commands::Config { .. } => None,
        _ => Some(installsync::logging::init(&config.logging, cli.verbose)?),
    };

    match &cli.command {
        Commands::Serve { port, every } => cmd::cmd_serve(config, *port, *every).await?,
        Commands::Sync { batch_limit } => {
            let ok = cmd::cmd_sync(config, *batch_limit).await?;
            if !ok {
                drop(log_guards);
                std::process::exit(1);
            }
        }
        Commands::InitDb => cmd::cmd_init_db(&config)?,
        Commands::AddUser {
            email,
            role,
            refresh_token,
        } => cmd::cmd_add_user(&config, email, role, refresh_token.as_deref()).await?,
        Commands::Config { command } => cmd::cmd_config(&config, command.clone())?,
    }

    Ok(())
}
