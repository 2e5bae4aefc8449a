//! `fraktal config`: settings file management.

use anyhow::{Context, Result};
use clap::Subcommand;

use fraktal_core::settings::write_default_at;

use crate::Paths;

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Write a settings file with every default spelled out.
    Init {
        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },
    /// Print the settings file location.
    Path,
}

pub fn run(command: ConfigCommand, paths: &Paths) -> Result<()> {
    match command {
        ConfigCommand::Init { force } => {
            write_default_at(&paths.settings_path, force).with_context(|| {
                format!("failed to write {}", paths.settings_path.display())
            })?;
            println!("✓ Wrote default settings to {}", paths.settings_path.display());
            println!("  Set api_token (or FRAKTAL_API_TOKEN) before running `fraktal serve`.");
        }
        ConfigCommand::Path => println!("{}", paths.settings_path.display()),
    }
    Ok(())
}
