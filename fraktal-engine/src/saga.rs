//! Step tables for the create and delete sagas, and the compensation stack.
//!
//! A create step that succeeds pushes its [`Compensation`] (if any). When a
//! later step fails, [`CompensationStack::unwind`] runs the stack in reverse.
//! Every outcome is recorded, and none is dropped on failure.

use async_trait::async_trait;

use fraktal_core::{FractalId, RoomHandle};

use crate::error::{CompensationOutcome, CompensationRecord, FractalError, RollbackReport};

// ---------------------------------------------------------------------------
// Create saga
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateStep {
    Reserve,
    CreateRoom,
    EnsureQuorum,
    Workspace,
    AgentEntry,
    Binding,
    RoomSettings,
    ReloadGateway,
    Activate,
}

impl CreateStep {
    pub const ORDER: [CreateStep; 9] = [
        CreateStep::Reserve,
        CreateStep::CreateRoom,
        CreateStep::EnsureQuorum,
        CreateStep::Workspace,
        CreateStep::AgentEntry,
        CreateStep::Binding,
        CreateStep::RoomSettings,
        CreateStep::ReloadGateway,
        CreateStep::Activate,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            CreateStep::Reserve => "reserve record",
            CreateStep::CreateRoom => "create room",
            CreateStep::EnsureQuorum => "ensure quorum",
            CreateStep::Workspace => "create workspace",
            CreateStep::AgentEntry => "add agent entry",
            CreateStep::Binding => "insert binding",
            CreateStep::RoomSettings => "upsert room settings",
            CreateStep::ReloadGateway => "reload gateway",
            CreateStep::Activate => "activate record",
        }
    }

    /// Undo registered once this step has succeeded. Room steps register
    /// nothing: rooms are never deleted. The workspace step registers its
    /// own undo before it runs, and only for a directory it is about to
    /// create, so a workspace kept from an earlier fractal is never removed.
    pub fn compensation(&self) -> Option<Compensation> {
        match self {
            CreateStep::Reserve => Some(Compensation::DiscardRecord),
            CreateStep::AgentEntry => Some(Compensation::RemoveAgentEntry),
            CreateStep::Binding => Some(Compensation::RemoveBinding),
            CreateStep::RoomSettings => Some(Compensation::RemoveRoomSettings),
            CreateStep::CreateRoom
            | CreateStep::EnsureQuorum
            | CreateStep::Workspace
            | CreateStep::ReloadGateway
            | CreateStep::Activate => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compensation {
    DiscardRecord,
    RemoveWorkspace,
    RemoveAgentEntry,
    RemoveBinding,
    RemoveRoomSettings,
}

impl Compensation {
    pub fn name(&self) -> &'static str {
        match self {
            Compensation::DiscardRecord => "discard registry record",
            Compensation::RemoveWorkspace => "remove workspace",
            Compensation::RemoveAgentEntry => "remove agent entry",
            Compensation::RemoveBinding => "remove binding",
            Compensation::RemoveRoomSettings => "remove room settings",
        }
    }
}

// ---------------------------------------------------------------------------
// Delete saga
// ---------------------------------------------------------------------------

/// Each step is idempotent; there is no compensation chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteStep {
    RemoveRoomSettings,
    RemoveBinding,
    RemoveAgentEntry,
    RemoveWorkspace,
    DeleteRoom,
    ReloadGateway,
    RemoveRecord,
}

impl DeleteStep {
    pub const ORDER: [DeleteStep; 7] = [
        DeleteStep::RemoveRoomSettings,
        DeleteStep::RemoveBinding,
        DeleteStep::RemoveAgentEntry,
        DeleteStep::RemoveWorkspace,
        DeleteStep::DeleteRoom,
        DeleteStep::ReloadGateway,
        DeleteStep::RemoveRecord,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            DeleteStep::RemoveRoomSettings => "remove room settings",
            DeleteStep::RemoveBinding => "remove binding",
            DeleteStep::RemoveAgentEntry => "remove agent entry",
            DeleteStep::RemoveWorkspace => "remove workspace",
            DeleteStep::DeleteRoom => "delete room",
            DeleteStep::ReloadGateway => "reload gateway",
            DeleteStep::RemoveRecord => "remove registry record",
        }
    }
}

// ---------------------------------------------------------------------------
// Compensation stack
// ---------------------------------------------------------------------------

/// Executes a single compensation for one fractal.
#[async_trait]
pub trait Compensate: Send + Sync {
    async fn compensate(&self, action: Compensation) -> Result<(), FractalError>;
}

#[derive(Debug, Default)]
pub struct CompensationStack {
    actions: Vec<Compensation>,
}

impl CompensationStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, action: Compensation) {
        self.actions.push(action);
    }

    /// Registered actions, oldest first.
    pub fn actions(&self) -> &[Compensation] {
        &self.actions
    }

    /// Run every registered action newest-first. A failing action is
    /// recorded and the unwind carries on with the rest.
    pub async fn unwind<C>(self, runner: &C) -> Vec<CompensationRecord>
    where
        C: Compensate + ?Sized,
    {
        let mut records = Vec::with_capacity(self.actions.len());
        for action in self.actions.into_iter().rev() {
            let outcome = match runner.compensate(action).await {
                Ok(()) => {
                    tracing::info!(action = action.name(), "compensation undone");
                    CompensationOutcome::Undone
                }
                Err(err) => {
                    tracing::error!(action = action.name(), error = %err, "compensation failed");
                    CompensationOutcome::Failed {
                        error: err.to_string(),
                    }
                }
            };
            records.push(CompensationRecord {
                action: action.name().to_string(),
                outcome,
            });
        }
        records
    }
}

/// Assemble the report for a create saga that failed at `step`.
pub fn rollback_report(
    id: &FractalId,
    step: CreateStep,
    cause: &FractalError,
    compensations: Vec<CompensationRecord>,
    leaked_room: Option<&RoomHandle>,
) -> RollbackReport {
    let requires_manual_intervention = compensations
        .iter()
        .any(|c| matches!(c.outcome, CompensationOutcome::Failed { .. }));
    RollbackReport {
        fractal_id: id.to_string(),
        failed_step: step.name().to_string(),
        error_kind: cause.kind().to_string(),
        cause: cause.to_string(),
        compensations,
        leaked_room: leaked_room.map(|r| r.to_string()),
        requires_manual_intervention,
    }
}
