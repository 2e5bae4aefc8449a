//! `fraktal health`

use anyhow::Result;
use clap::Args;

use fraktal_engine::HealthCounts;

use crate::client::{ApiClient, ClientArgs};
use crate::Paths;

#[derive(Args, Debug)]
pub struct HealthArgs {
    #[command(flatten)]
    pub client: ClientArgs,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

impl HealthArgs {
    pub fn run(self, paths: &Paths) -> Result<()> {
        let client = ApiClient::new(&self.client, paths)?;
        let counts: HealthCounts = client.get("/health")?;
        if self.json {
            println!("{}", serde_json::to_string_pretty(&counts)?);
        } else {
            println!(
                "ok | {} active | {} total | max {}",
                counts.active, counts.total, counts.max
            );
        }
        Ok(())
    }
}
