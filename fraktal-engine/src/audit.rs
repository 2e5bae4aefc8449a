//! Registry versus config store comparison. Read-only, run on demand.

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use fraktal_core::{Fractal, FractalStatus};

use crate::snapshot::ConfigSnapshot;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AuditProblem {
    MissingRoom,
    MissingAgentEntry,
    MissingBinding,
    BindingRoomMismatch { expected: String, actual: String },
    MissingRoomSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditFinding {
    pub id: String,
    pub problems: Vec<AuditProblem>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditReport {
    /// Active records compared against the snapshot.
    pub checked: usize,
    /// Records in other states, not expected to be fully wired.
    pub skipped: usize,
    pub findings: Vec<AuditFinding>,
    /// Agent entries under the workspace root with no registry record.
    pub orphan_agents: Vec<String>,
    pub fallback_not_last: bool,
}

impl AuditReport {
    pub fn is_clean(&self) -> bool {
        self.findings.is_empty() && self.orphan_agents.is_empty() && !self.fallback_not_last
    }
}

pub fn audit(records: &[Fractal], snapshot: &ConfigSnapshot, workspace_root: &Path) -> AuditReport {
    let mut checked = 0;
    let mut findings = Vec::new();

    for record in records {
        if record.status != FractalStatus::Active {
            continue;
        }
        checked += 1;
        let id = record.id.as_str();
        let mut problems = Vec::new();

        if snapshot.agent(id).is_none() {
            problems.push(AuditProblem::MissingAgentEntry);
        }
        match &record.room {
            None => problems.push(AuditProblem::MissingRoom),
            Some(room) => {
                match snapshot.binding_for(id).map(|b| b.room()) {
                    None => problems.push(AuditProblem::MissingBinding),
                    Some(actual) if actual != Some(room.as_str()) => {
                        problems.push(AuditProblem::BindingRoomMismatch {
                            expected: room.to_string(),
                            actual: actual.unwrap_or_default().to_string(),
                        })
                    }
                    Some(_) => {}
                }
                if snapshot.room_settings_for(room.as_str()).is_none() {
                    problems.push(AuditProblem::MissingRoomSettings);
                }
            }
        }

        if !problems.is_empty() {
            findings.push(AuditFinding {
                id: id.to_owned(),
                problems,
            });
        }
    }

    let known: HashSet<&str> = records.iter().map(|r| r.id.as_str()).collect();
    let orphan_agents = snapshot
        .agents
        .iter()
        .filter(|a| !known.contains(a.id.as_str()))
        .filter(|a| {
            a.workspace
                .as_deref()
                .is_some_and(|w| w.starts_with(workspace_root) && w != workspace_root)
        })
        .map(|a| a.id.clone())
        .collect();

    let fallback_not_last = snapshot
        .fallback_index()
        .is_some_and(|i| i + 1 != snapshot.bindings.len());

    AuditReport {
        checked,
        skipped: records.len() - checked,
        findings,
        orphan_agents,
        fallback_not_last,
    }
}
