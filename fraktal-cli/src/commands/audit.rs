//! `fraktal audit`: registry versus gateway configuration drift.

use anyhow::Result;
use clap::Args;
use colored::Colorize;

use fraktal_engine::{AuditProblem, AuditReport};

use crate::client::{ApiClient, ClientArgs};
use crate::Paths;

#[derive(Args, Debug)]
pub struct AuditArgs {
    #[command(flatten)]
    pub client: ClientArgs,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

impl AuditArgs {
    pub fn run(self, paths: &Paths) -> Result<()> {
        let client = ApiClient::new(&self.client, paths)?;
        let report: AuditReport = client.get("/audit")?;
        if self.json {
            println!("{}", serde_json::to_string_pretty(&report)?);
            return Ok(());
        }

        println!(
            "{} checked | {} skipped | {} with problems",
            report.checked,
            report.skipped,
            report.findings.len()
        );
        if report.is_clean() {
            println!("{}", "clean".green().bold());
            return Ok(());
        }
        for finding in &report.findings {
            println!("{}", finding.id.bold());
            for problem in &finding.problems {
                println!("  {} {}", "✗".red(), describe(problem));
            }
        }
        for agent in &report.orphan_agents {
            println!("{} agent '{agent}' has no registry record", "orphan:".yellow());
        }
        if report.fallback_not_last {
            println!("{} the fallback binding is not last", "order:".yellow());
        }
        Ok(())
    }
}

fn describe(problem: &AuditProblem) -> String {
    match problem {
        AuditProblem::MissingRoom => "registry record has no room".to_string(),
        AuditProblem::MissingAgentEntry => "no agent entry".to_string(),
        AuditProblem::MissingBinding => "no binding".to_string(),
        AuditProblem::BindingRoomMismatch { expected, actual } => {
            format!("binding targets {actual}, expected {expected}")
        }
        AuditProblem::MissingRoomSettings => "no room settings entry".to_string(),
    }
}
