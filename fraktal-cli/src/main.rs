//! Fraktal: provision and retire chat-bound sub-agents.
//!
//! # Usage
//!
//! ```text
//! fraktal [--config PATH] serve [--bind ADDR] [--log-format text|json]
//! fraktal [--config PATH] config init [--force]
//! fraktal [--config PATH] create <id> --name <NAME> [--purpose ..] [--invite @u:server ..]
//! fraktal [--config PATH] list [--json]
//! fraktal [--config PATH] get <id> [--json]
//! fraktal [--config PATH] delete <id> [--delete-workspace] [--delete-room]
//! fraktal [--config PATH] health
//! fraktal [--config PATH] audit [--json]
//! ```

mod client;
mod commands;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use commands::{
    audit::AuditArgs,
    config::ConfigCommand,
    fractal::{CreateArgs, DeleteArgs, GetArgs, ListArgs},
    health::HealthArgs,
    serve::ServeArgs,
};
use fraktal_core::settings::settings_path_at;

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "fraktal",
    version,
    about = "Provision and retire room-bound sub-agents",
    long_about = None,
)]
struct Cli {
    /// Settings file (default: ~/.fraktal/config.yaml).
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the HTTP service in the foreground.
    Serve(ServeArgs),

    /// Manage the settings file.
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },

    /// Create a fractal on a running service.
    Create(CreateArgs),

    /// List fractals.
    List(ListArgs),

    /// Show one fractal.
    Get(GetArgs),

    /// Delete a fractal.
    Delete(DeleteArgs),

    /// Show service health counts.
    Health(HealthArgs),

    /// Compare the registry against the gateway configuration.
    Audit(AuditArgs),
}

/// Where settings are read from and `config init` writes to.
pub struct Paths {
    pub home: PathBuf,
    pub settings_path: PathBuf,
}

impl Paths {
    fn resolve(config: Option<PathBuf>) -> Result<Self> {
        let home = dirs::home_dir().context("could not determine home directory")?;
        let settings_path = config.unwrap_or_else(|| settings_path_at(&home));
        Ok(Paths {
            home,
            settings_path,
        })
    }
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    let cli = Cli::parse();
    let paths = Paths::resolve(cli.config)?;
    match cli.command {
        Commands::Serve(args) => args.run(&paths),
        Commands::Config { command } => commands::config::run(command, &paths),
        Commands::Create(args) => args.run(&paths),
        Commands::List(args) => args.run(&paths),
        Commands::Get(args) => args.run(&paths),
        Commands::Delete(args) => args.run(&paths),
        Commands::Health(args) => args.run(&paths),
        Commands::Audit(args) => args.run(&paths),
    }
}
