//! Create and delete sagas over the registry, rooms, workspace and config.
//!
//! # Create
//!
//! Pre-flight floor check, then [`CreateStep::ORDER`]. The `pending` record
//! is written by the first step, so duplicate ids and the quota are enforced
//! against creates that are still running. Sagas run on a detached task: a
//! caller that stops waiting never aborts one half-way.
//!
//! # Cancellation
//!
//! A delete that arrives while a create is running only marks it. Seen
//! before the room exists, the mark aborts the create and its record is
//! discarded. Seen later, the create finishes and is then torn down by the
//! delete saga, workspace included.
//!
//! # Delete
//!
//! [`DeleteStep::ORDER`], each step idempotent. A failing step leaves the
//! record in its previous state (normally `active`) with `last_error` set as
//! the flag; retrying converges.

use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use fraktal_core::{Fractal, FractalId, FractalStatus, Registry, RoomHandle, Settings};
use fraktal_workspace::WorkspaceManager;

use crate::audit::{self, AuditReport};
use crate::error::FractalError;
use crate::gateway::{self, GatewayControl};
use crate::queue::MutationQueue;
use crate::quota;
use crate::request::{CreatePlan, CreateRequest, DeleteOptions};
use crate::rooms::RoomProvisioner;
use crate::saga::{self, Compensate, Compensation, CompensationStack, CreateStep, DeleteStep};
use crate::snapshot::{AgentEntry, BindingEntry, Collection, RoomSettingsEntry};

type InFlight = Arc<Mutex<HashMap<FractalId, Arc<AtomicBool>>>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Orchestrator knobs. Room and config-store timeouts live in their wrappers.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub max_fractals: usize,
    pub min_agent_floor: usize,
    pub default_model: String,
    pub channel: String,
    pub filesystem_timeout: Duration,
    pub gateway_timeout: Duration,
}

impl OrchestratorConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        OrchestratorConfig {
            max_fractals: settings.max_fractals,
            min_agent_floor: settings.min_agent_floor,
            default_model: settings.default_model.clone(),
            channel: settings.channel.clone(),
            filesystem_timeout: settings.timeouts.filesystem(),
            gateway_timeout: settings.timeouts.gateway(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthCounts {
    pub active: usize,
    pub total: usize,
    pub max: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted(Fractal),
    /// The fractal was still being created; it is torn down once that ends.
    Scheduled,
}

#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

struct Inner {
    config: OrchestratorConfig,
    registry: Arc<Mutex<Registry>>,
    rooms: RoomProvisioner,
    queue: MutationQueue,
    workspace: Arc<WorkspaceManager>,
    gateway: Arc<dyn GatewayControl>,
    in_flight: InFlight,
}

impl Orchestrator {
    pub fn new(
        config: OrchestratorConfig,
        registry: Registry,
        rooms: RoomProvisioner,
        queue: MutationQueue,
        workspace: Arc<WorkspaceManager>,
        gateway: Arc<dyn GatewayControl>,
    ) -> Self {
        Orchestrator {
            inner: Arc::new(Inner {
                config,
                registry: Arc::new(Mutex::new(registry)),
                rooms,
                queue,
                workspace,
                gateway,
                in_flight: Arc::new(Mutex::new(HashMap::new())),
            }),
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.inner.config
    }

    pub fn workspace_root(&self) -> &Path {
        self.inner.workspace.root()
    }

    pub async fn create(&self, request: CreateRequest) -> Result<Fractal, FractalError> {
        let plan = CreatePlan::validate(request, &self.inner.config.default_model)?;
        let inner = self.inner.clone();
        detached(async move { inner.create(plan).await }).await
    }

    pub async fn delete(
        &self,
        id: &str,
        options: DeleteOptions,
    ) -> Result<DeleteOutcome, FractalError> {
        let id = known_id(id)?;
        if self.inner.mark_cancelled(&id) {
            tracing::info!(fractal_id = %id, "delete requested during create; scheduled");
            return Ok(DeleteOutcome::Scheduled);
        }
        let record = self
            .inner
            .find(&id)
            .await?
            .ok_or_else(|| FractalError::NotFound { id: id.to_string() })?;
        let inner = self.inner.clone();
        detached(async move { inner.delete_saga(record, options).await })
            .await
            .map(DeleteOutcome::Deleted)
    }

    pub async fn get(&self, id: &str) -> Result<Fractal, FractalError> {
        let id = known_id(id)?;
        self.inner
            .find(&id)
            .await?
            .ok_or_else(|| FractalError::NotFound { id: id.to_string() })
    }

    pub async fn list(&self) -> Result<Vec<Fractal>, FractalError> {
        self.inner.with_registry(|reg| Ok(reg.list().to_vec())).await
    }

    pub async fn health(&self) -> Result<HealthCounts, FractalError> {
        let max = self.inner.config.max_fractals;
        self.inner
            .with_registry(move |reg| {
                Ok(HealthCounts {
                    active: reg.count_with_status(FractalStatus::Active),
                    total: reg.len(),
                    max,
                })
            })
            .await
    }

    /// Compare the registry against a fresh config snapshot. Writes nothing.
    pub async fn audit(&self) -> Result<AuditReport, FractalError> {
        let snapshot = self.inner.queue.snapshot().await?;
        let records = self.list().await?;
        Ok(audit::audit(&records, &snapshot, self.inner.workspace.root()))
    }
}

/// Unknown-looking ids cannot exist, so they are simply not found.
fn known_id(raw: &str) -> Result<FractalId, FractalError> {
    FractalId::parse(raw).map_err(|_| FractalError::NotFound { id: raw.to_owned() })
}

async fn detached<T, F>(fut: F) -> Result<T, FractalError>
where
    T: Send + 'static,
    F: Future<Output = Result<T, FractalError>> + Send + 'static,
{
    match tokio::spawn(fut).await {
        Ok(result) => result,
        Err(err) if err.is_panic() => std::panic::resume_unwind(err.into_panic()),
        Err(err) => Err(FractalError::upstream("orchestrator", err)),
    }
}

// ---------------------------------------------------------------------------
// Create saga
// ---------------------------------------------------------------------------

struct CreateState {
    fractal: Fractal,
    room: Option<RoomHandle>,
    stack: CompensationStack,
}

impl CreateState {
    fn room(&self) -> Result<&RoomHandle, FractalError> {
        self.room
            .as_ref()
            .ok_or_else(|| FractalError::InvariantViolation("room step has not run".to_string()))
    }
}

impl Inner {
    async fn create(&self, plan: CreatePlan) -> Result<Fractal, FractalError> {
        let snapshot = self.queue.snapshot().await?;
        quota::check_config_healthy(
            Collection::Agents,
            snapshot.size(Collection::Agents),
            self.config.min_agent_floor,
        )?;

        let mut fractal = Fractal::pending(
            plan.id.clone(),
            plan.display_name.clone(),
            self.workspace.path_for(&plan.id),
            plan.model.clone(),
        );
        fractal.purpose = plan.purpose.clone();
        fractal.auto_reply = plan.auto_reply;

        let cancel = Arc::new(AtomicBool::new(false));
        let result = self.run_create(&plan, fractal, &cancel).await;
        lock(&self.in_flight).remove(&plan.id);

        match result {
            Ok(fractal) if cancel.load(Ordering::SeqCst) => {
                tracing::info!(fractal_id = %fractal.id, "create finished after delete request; tearing down");
                let options = DeleteOptions {
                    delete_workspace: true,
                    delete_room: false,
                };
                self.delete_saga(fractal, options).await?;
                Err(FractalError::Cancelled {
                    id: plan.id.to_string(),
                })
            }
            other => other,
        }
    }

    async fn run_create(
        &self,
        plan: &CreatePlan,
        fractal: Fractal,
        cancel: &Arc<AtomicBool>,
    ) -> Result<Fractal, FractalError> {
        let mut state = CreateState {
            fractal,
            room: None,
            stack: CompensationStack::new(),
        };

        for step in CreateStep::ORDER {
            tracing::info!(fractal_id = %plan.id, step = step.name(), "saga step started");
            match self.create_step(step, plan, &mut state, cancel).await {
                Ok(()) => {
                    if let Some(compensation) = step.compensation() {
                        state.stack.push(compensation);
                    }
                    tracing::info!(fractal_id = %plan.id, step = step.name(), "saga step finished");
                }
                Err(err) if step == CreateStep::Reserve => return Err(err),
                Err(err) => {
                    tracing::warn!(
                        fractal_id = %plan.id,
                        step = step.name(),
                        error = %err,
                        "saga step failed; rolling back"
                    );
                    return Err(self.roll_back(step, err, state).await);
                }
            }
        }
        Ok(state.fractal)
    }

    async fn create_step(
        &self,
        step: CreateStep,
        plan: &CreatePlan,
        state: &mut CreateState,
        cancel: &Arc<AtomicBool>,
    ) -> Result<(), FractalError> {
        let id = plan.id.clone();
        match step {
            CreateStep::Reserve => {
                let record = state.fractal.clone();
                let max = self.config.max_fractals;
                let in_flight = self.in_flight.clone();
                let cancel = cancel.clone();
                self.with_registry(move |reg| {
                    if reg.contains(&record.id) {
                        return Err(FractalError::Conflict {
                            id: record.id.to_string(),
                        });
                    }
                    quota::check_create_allowed(reg.len(), max)?;
                    let id = record.id.clone();
                    reg.add(record)?;
                    lock(&in_flight).insert(id, cancel);
                    Ok(())
                })
                .await
            }
            CreateStep::CreateRoom => {
                if cancel.load(Ordering::SeqCst) {
                    return Err(FractalError::Cancelled { id: id.to_string() });
                }
                state.fractal = self
                    .update_record(&id, |f| f.status = FractalStatus::Provisioning)
                    .await?;
                let room = self
                    .rooms
                    .create_room(&plan.display_name, &plan.invitees)
                    .await?;
                tracing::info!(fractal_id = %id, room = %room, "room created");
                state.room = Some(room.clone());
                let handle = room.clone();
                state.fractal = self
                    .update_record(&id, move |f| f.room = Some(handle))
                    .await?;
                self.rooms
                    .set_display_name(&room, &plan.display_name)
                    .await?;
                Ok(())
            }
            CreateStep::EnsureQuorum => {
                let members = self.rooms.ensure_quorum(state.room()?).await?;
                tracing::info!(fractal_id = %id, members, "room quorum reached");
                Ok(())
            }
            CreateStep::Workspace => {
                let path = state.fractal.workspace_path.clone();
                let existed = self.filesystem(move || Ok(path.exists())).await?;
                if existed {
                    tracing::info!(
                        fractal_id = %id,
                        path = %state.fractal.workspace_path.display(),
                        "reusing kept workspace; it will not be removed on rollback"
                    );
                } else {
                    state.stack.push(Compensation::RemoveWorkspace);
                }
                let manager = self.workspace.clone();
                let fractal = state.fractal.clone();
                let persona = plan.persona.clone();
                self.filesystem(move || manager.create(&fractal, persona.as_deref()).map(|_| ()))
                    .await
            }
            CreateStep::AgentEntry => {
                let entry = AgentEntry::for_fractal(&state.fractal);
                self.queue
                    .add_agent(entry, Some(self.config.min_agent_floor))
                    .await?;
                Ok(())
            }
            CreateStep::Binding => {
                let entry =
                    BindingEntry::for_room(id.as_str(), &self.config.channel, state.room()?.as_str());
                self.queue.insert_binding(entry).await?;
                Ok(())
            }
            CreateStep::RoomSettings => {
                let room = state.room()?.as_str().to_owned();
                self.queue
                    .upsert_room_settings(&room, RoomSettingsEntry::new(plan.auto_reply))
                    .await?;
                Ok(())
            }
            CreateStep::ReloadGateway => {
                gateway::reload_within(&self.gateway, self.config.gateway_timeout).await?;
                Ok(())
            }
            CreateStep::Activate => {
                state.fractal = self
                    .update_record(&id, |f| {
                        f.status = FractalStatus::Active;
                        f.last_error = None;
                    })
                    .await?;
                Ok(())
            }
        }
    }

    async fn roll_back(&self, step: CreateStep, err: FractalError, state: CreateState) -> FractalError {
        let CreateState {
            fractal,
            room,
            stack,
        } = state;
        let undo = Undo {
            inner: self,
            fractal: &fractal,
        };
        let compensations = stack.unwind(&undo).await;

        if matches!(err, FractalError::Cancelled { .. }) && room.is_none() {
            return err;
        }

        let report = saga::rollback_report(&fractal.id, step, &err, compensations, room.as_ref());
        if report.requires_manual_intervention {
            tracing::error!(
                fractal_id = %fractal.id,
                step = step.name(),
                "rollback incomplete; manual intervention required"
            );
        }
        FractalError::AggregateRollback(Box::new(report))
    }

    fn mark_cancelled(&self, id: &FractalId) -> bool {
        match lock(&self.in_flight).get(id) {
            Some(flag) => {
                flag.store(true, Ordering::SeqCst);
                true
            }
            None => false,
        }
    }
}

/// Compensations for one fractal's create saga.
struct Undo<'a> {
    inner: &'a Inner,
    fractal: &'a Fractal,
}

#[async_trait]
impl Compensate for Undo<'_> {
    async fn compensate(&self, action: Compensation) -> Result<(), FractalError> {
        let id = self.fractal.id.as_str();
        match action {
            Compensation::DiscardRecord => {
                let id = self.fractal.id.clone();
                self.inner
                    .with_registry(move |reg| reg.remove(&id).map(|_| ()).map_err(Into::into))
                    .await
            }
            Compensation::RemoveWorkspace => {
                self.inner
                    .remove_workspace(self.fractal.workspace_path.clone())
                    .await
            }
            Compensation::RemoveAgentEntry => {
                self.inner.queue.remove_agent(id).await?;
                Ok(())
            }
            Compensation::RemoveBinding => {
                self.inner.queue.remove_binding(id).await?;
                Ok(())
            }
            Compensation::RemoveRoomSettings => {
                if let Some(room) = &self.fractal.room {
                    self.inner.queue.remove_room_settings(room.as_str()).await?;
                }
                Ok(())
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Delete saga
// ---------------------------------------------------------------------------

impl Inner {
    async fn delete_saga(
        &self,
        record: Fractal,
        options: DeleteOptions,
    ) -> Result<Fractal, FractalError> {
        let id = record.id.clone();
        // A delete that stops part-way leaves the record as it was, flagged.
        let resume = match record.status {
            FractalStatus::Deleting => FractalStatus::Active,
            status => status,
        };
        let fractal = match self
            .update_record(&id, |f| f.status = FractalStatus::Deleting)
            .await
        {
            Ok(f) => f,
            // Removed by a concurrent delete since it was looked up.
            Err(FractalError::Registry(fraktal_core::RegistryError::NotFound { .. })) => {
                return Err(FractalError::NotFound { id: id.to_string() })
            }
            Err(err) => return Err(err),
        };

        for step in DeleteStep::ORDER {
            tracing::info!(fractal_id = %id, step = step.name(), "delete step started");
            if let Err(err) = self.delete_step(step, &fractal, options).await {
                tracing::error!(fractal_id = %id, step = step.name(), error = %err, "delete step failed");
                let message = format!("{}: {err}", step.name());
                let marked = self
                    .update_record(&id, move |f| {
                        f.status = resume;
                        f.last_error = Some(message);
                    })
                    .await;
                if let Err(mark_err) = marked {
                    tracing::error!(fractal_id = %id, error = %mark_err, "could not flag record");
                }
                return Err(err);
            }
        }
        tracing::info!(fractal_id = %id, "fractal deleted");
        Ok(fractal)
    }

    async fn delete_step(
        &self,
        step: DeleteStep,
        fractal: &Fractal,
        options: DeleteOptions,
    ) -> Result<(), FractalError> {
        let id = fractal.id.as_str();
        match step {
            DeleteStep::RemoveRoomSettings => {
                if let Some(room) = &fractal.room {
                    self.queue.remove_room_settings(room.as_str()).await?;
                }
            }
            DeleteStep::RemoveBinding => {
                self.queue.remove_binding(id).await?;
            }
            DeleteStep::RemoveAgentEntry => {
                self.queue.remove_agent(id).await?;
            }
            DeleteStep::RemoveWorkspace => {
                if options.delete_workspace {
                    self.remove_workspace(fractal.workspace_path.clone()).await?;
                }
            }
            DeleteStep::DeleteRoom => {
                if options.delete_room {
                    tracing::warn!(
                        fractal_id = %id,
                        room = ?fractal.room.as_ref().map(RoomHandle::as_str),
                        "room deletion is not supported; leaving the room in place"
                    );
                }
            }
            DeleteStep::ReloadGateway => {
                gateway::reload_within(&self.gateway, self.config.gateway_timeout).await?;
            }
            DeleteStep::RemoveRecord => {
                let id = fractal.id.clone();
                self.with_registry(move |reg| reg.remove(&id).map(|_| ()).map_err(Into::into))
                    .await?;
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Shared helpers
// ---------------------------------------------------------------------------

impl Inner {
    /// Run `f` against the registry on the blocking pool.
    async fn with_registry<T, F>(&self, f: F) -> Result<T, FractalError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Registry) -> Result<T, FractalError> + Send + 'static,
    {
        let registry = self.registry.clone();
        tokio::task::spawn_blocking(move || f(&mut lock(&registry)))
            .await
            .map_err(|e| FractalError::upstream("registry", e))?
    }

    async fn find(&self, id: &FractalId) -> Result<Option<Fractal>, FractalError> {
        let id = id.clone();
        self.with_registry(move |reg| Ok(reg.get(&id).cloned())).await
    }

    async fn update_record(
        &self,
        id: &FractalId,
        edit: impl FnOnce(&mut Fractal) + Send + 'static,
    ) -> Result<Fractal, FractalError> {
        let id = id.clone();
        self.with_registry(move |reg| reg.update(&id, edit).map_err(Into::into))
            .await
    }

    async fn remove_workspace(&self, path: PathBuf) -> Result<(), FractalError> {
        let manager = self.workspace.clone();
        self.filesystem(move || manager.remove(&path).map(|_| ()))
            .await
    }

    async fn filesystem<T, F>(&self, f: F) -> Result<T, FractalError>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T, fraktal_workspace::WorkspaceError> + Send + 'static,
    {
        bounded_blocking(self.config.filesystem_timeout, f).await
    }
}

/// Blocking filesystem work, bounded by `limit`.
///
/// A blocking call cannot be cancelled. On timeout this still waits for it
/// to finish before returning the error, so nothing is written behind a
/// rollback that runs next.
async fn bounded_blocking<T, F>(limit: Duration, f: F) -> Result<T, FractalError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, fraktal_workspace::WorkspaceError> + Send + 'static,
{
    let mut task = tokio::task::spawn_blocking(f);
    match tokio::time::timeout(limit, &mut task).await {
        Ok(Ok(result)) => result.map_err(FractalError::from),
        Ok(Err(join)) => Err(FractalError::upstream("filesystem", join)),
        Err(_) => {
            tracing::warn!(timeout = ?limit, "filesystem call timed out; waiting for it to settle");
            if let Err(join) = task.await {
                tracing::error!(error = %join, "timed-out filesystem call panicked");
            }
            Err(FractalError::upstream(
                "filesystem",
                format!("timed out after {limit:?}"),
            ))
        }
    }
}
