//! `fraktal create | list | get | delete`: thin wrappers over the HTTP API.

use anyhow::{Context, Result};
use chrono::Local;
use clap::Args;
use colored::Colorize;
use tabled::{settings::Style, Table, Tabled};

use fraktal_core::{Fractal, FractalStatus};
use fraktal_engine::{CompensationOutcome, CreateRequest, RollbackReport};

use crate::client::{ApiClient, ApiFailure, ClientArgs};
use crate::Paths;

// ---------------------------------------------------------------------------
// create
// ---------------------------------------------------------------------------

#[derive(Args, Debug)]
pub struct CreateArgs {
    /// Identifier: lowercase letters, digits and hyphens.
    pub id: String,

    /// Display name of the bot in its room.
    #[arg(long)]
    pub name: String,

    #[arg(long)]
    pub purpose: Option<String>,

    /// Persona text written into the workspace.
    #[arg(long)]
    pub persona: Option<String>,

    /// Model override (default: service `default_model`).
    #[arg(long)]
    pub model: Option<String>,

    /// Participant to invite, e.g. @alice:example.org. Repeatable.
    #[arg(long = "invite", value_name = "USER")]
    pub invite: Vec<String>,

    /// Answer every room message without a mention.
    #[arg(long)]
    pub auto_reply: bool,

    #[command(flatten)]
    pub client: ClientArgs,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

impl CreateArgs {
    pub fn run(self, paths: &Paths) -> Result<()> {
        let client = ApiClient::new(&self.client, paths)?;
        let request = CreateRequest {
            name: self.name,
            id: self.id.clone(),
            purpose: self.purpose,
            persona: self.persona,
            model: self.model,
            invite_participants: self.invite,
            auto_reply: self.auto_reply,
        };

        let fractal: Fractal = match client.post("/fractal", &request) {
            Ok(fractal) => fractal,
            Err(err) => {
                if let Some(report) = rollback_of(&err) {
                    print_rollback(&report);
                }
                return Err(err).with_context(|| format!("failed to create '{}'", self.id));
            }
        };

        if self.json {
            println!("{}", serde_json::to_string_pretty(&fractal)?);
            return Ok(());
        }
        println!("✓ Created '{}' ({})", fractal.id, fractal.display_name);
        if let Some(room) = &fractal.room {
            println!("  Room:      {room}");
        }
        println!("  Workspace: {}", fractal.workspace_path.display());
        println!("  Model:     {}", fractal.model);
        Ok(())
    }
}

fn rollback_of(err: &anyhow::Error) -> Option<RollbackReport> {
    let failure = err.downcast_ref::<ApiFailure>()?;
    serde_json::from_value(failure.body.get("rollback")?.clone()).ok()
}

fn print_rollback(report: &RollbackReport) {
    eprintln!(
        "{} step '{}' failed: {}",
        "rolled back:".red().bold(),
        report.failed_step,
        report.cause
    );
    for record in &report.compensations {
        match &record.outcome {
            CompensationOutcome::Undone => eprintln!("  {} {}", "✓".green(), record.action),
            CompensationOutcome::Failed { error } => {
                eprintln!("  {} {}: {error}", "✗".red(), record.action)
            }
        }
    }
    if let Some(room) = &report.leaked_room {
        eprintln!("  room {room} was left in place");
    }
    if report.requires_manual_intervention {
        eprintln!(
            "{}",
            "some steps could not be undone; run `fraktal audit`".yellow().bold()
        );
    }
}

// ---------------------------------------------------------------------------
// list / get
// ---------------------------------------------------------------------------

#[derive(Args, Debug)]
pub struct ListArgs {
    #[command(flatten)]
    pub client: ClientArgs,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Tabled)]
struct FractalRow {
    #[tabled(rename = "id")]
    id: String,
    #[tabled(rename = "name")]
    name: String,
    #[tabled(rename = "status")]
    status: String,
    #[tabled(rename = "room")]
    room: String,
    #[tabled(rename = "model")]
    model: String,
    #[tabled(rename = "created")]
    created: String,
}

impl ListArgs {
    pub fn run(self, paths: &Paths) -> Result<()> {
        let client = ApiClient::new(&self.client, paths)?;
        let fractals: Vec<Fractal> = client.get("/fractal")?;
        if self.json {
            println!("{}", serde_json::to_string_pretty(&fractals)?);
            return Ok(());
        }
        if fractals.is_empty() {
            println!("No fractals.");
            return Ok(());
        }

        let rows: Vec<FractalRow> = fractals
            .iter()
            .map(|f| FractalRow {
                id: f.id.to_string(),
                name: f.display_name.clone(),
                status: status_cell(f.status),
                room: f.room.as_ref().map(ToString::to_string).unwrap_or_else(|| "-".into()),
                model: f.model.clone(),
                created: f
                    .created_at
                    .with_timezone(&Local)
                    .format("%Y-%m-%d %H:%M")
                    .to_string(),
            })
            .collect();
        let mut table = Table::new(rows);
        table.with(Style::rounded());
        println!("{table}");
        Ok(())
    }
}

#[derive(Args, Debug)]
pub struct GetArgs {
    pub id: String,

    #[command(flatten)]
    pub client: ClientArgs,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

impl GetArgs {
    pub fn run(self, paths: &Paths) -> Result<()> {
        let client = ApiClient::new(&self.client, paths)?;
        let fractal: Fractal = client.get(&format!("/fractal/{}", self.id))?;
        if self.json {
            println!("{}", serde_json::to_string_pretty(&fractal)?);
            return Ok(());
        }
        println!("{} ({})", fractal.id, fractal.display_name);
        println!("  Status:    {}", status_cell(fractal.status));
        if let Some(room) = &fractal.room {
            println!("  Room:      {room}");
        }
        println!("  Workspace: {}", fractal.workspace_path.display());
        println!("  Model:     {}", fractal.model);
        if let Some(purpose) = &fractal.purpose {
            println!("  Purpose:   {purpose}");
        }
        println!("  Auto-reply: {}", fractal.auto_reply);
        if let Some(err) = &fractal.last_error {
            println!("  Last error: {}", err.red());
        }
        Ok(())
    }
}

fn status_cell(status: FractalStatus) -> String {
    let label = status.to_string();
    match status {
        FractalStatus::Active => label.green().to_string(),
        FractalStatus::Pending | FractalStatus::Provisioning => label.yellow().to_string(),
        FractalStatus::Deleting => label.cyan().to_string(),
        FractalStatus::Failed => label.red().bold().to_string(),
    }
}

// ---------------------------------------------------------------------------
// delete
// ---------------------------------------------------------------------------

#[derive(Args, Debug)]
pub struct DeleteArgs {
    pub id: String,

    /// Also remove the workspace directory.
    #[arg(long)]
    pub delete_workspace: bool,

    /// Also archive the room.
    #[arg(long)]
    pub delete_room: bool,

    #[command(flatten)]
    pub client: ClientArgs,
}

impl DeleteArgs {
    pub fn run(self, paths: &Paths) -> Result<()> {
        let client = ApiClient::new(&self.client, paths)?;
        let path = format!(
            "/fractal/{}?deleteWorkspace={}&deleteRoom={}",
            self.id, self.delete_workspace, self.delete_room
        );
        let (status, body) = client
            .delete(&path)
            .with_context(|| format!("failed to delete '{}'", self.id))?;
        if status == 202 {
            println!(
                "'{}' is still being created; it will be removed when creation finishes",
                self.id
            );
            return Ok(());
        }
        let removed: Fractal =
            serde_json::from_value(body).context("unexpected response shape from service")?;
        println!("✓ Deleted '{}'", removed.id);
        if !self.delete_workspace {
            println!("  Workspace kept at {}", removed.workspace_path.display());
        }
        Ok(())
    }
}
