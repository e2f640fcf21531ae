use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use taskboard::config::{LogFormat, TaskboardConfig};

mod cmd;

#[derive(Parser)]
#[command(name = "taskboard")]
#[command(version, about = "Team kanban boards with real-time sync")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to taskboard.toml (defaults to ./taskboard.toml when present)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Log output format. Overrides config and TASKBOARD_LOG_FORMAT.
    #[arg(long, global = true, value_enum)]
    pub log_format: Option<LogFormat>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the board server (REST API + live subscriptions)
    Serve {
        #[arg(short, long)]
        port: Option<u16>,

        #[arg(long)]
        host: Option<String>,

        #[arg(long)]
        db_path: Option<PathBuf>,

        /// Enable permissive CORS for local frontends
        #[arg(long)]
        dev: bool,

        /// Seed a demo board when the database is empty
        #[arg(long)]
        init: bool,
    },
    /// Follow one board live and print it after every change
    Watch {
        #[arg(long)]
        team: String,

        #[arg(long)]
        project: String,

        #[arg(long)]
        board: String,

        /// Server base URL. Overrides client.server_url.
        #[arg(long)]
        server: Option<String>,
    },
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Print the effective configuration
    Show,
    /// Check the configuration for problems
    Validate,
    /// Write a default taskboard.toml
    Init,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = TaskboardConfig::resolve(cli.config.as_deref())?;
    if let Some(format) = cli.log_format {
        config.logging.format = format;
    }
    taskboard::logging::init_tracing(config.logging.format, cli.verbose)?;

    match cli.command {
        Commands::Serve {
            port,
            host,
            db_path,
            dev,
            init,
        } => {
            cmd::cmd_serve(
                &config,
                cmd::serve::ServeArgs {
                    port,
                    host,
                    db_path,
                    dev,
                    init,
                },
            )
            .await?;
        }
        Commands::Watch {
            team,
            project,
            board,
            server,
        } => {
            cmd::cmd_watch(
                &config,
                cmd::watch::WatchArgs {
                    team,
                    project,
                    board,
                    server,
                },
            )
            .await?;
        }
        Commands::Config { command } => {
            cmd::cmd_config(cli.config.as_deref(), &config, command)?;
        }
    }

    Ok(())
}
