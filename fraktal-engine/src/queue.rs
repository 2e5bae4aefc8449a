//! Single-writer FIFO in front of the [`ConfigMutator`].
//!
//! Every config access, reads included, goes through one worker task that
//! runs jobs to completion one at a time. Two sagas can never interleave
//! their fetch and replace calls, so a whole-collection write cannot
//! silently discard another saga's addition.

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::error::ConfigError;
use crate::mutator::ConfigMutator;
use crate::snapshot::{AgentEntry, BindingEntry, ConfigSnapshot, RoomSettingsEntry};

const QUEUE_DEPTH: usize = 64;

/// One unit of work for the mutation worker.
#[derive(Debug, Clone)]
pub enum ConfigOp {
    Snapshot,
    AddAgent {
        entry: AgentEntry,
        min_floor: Option<usize>,
    },
    RemoveAgent {
        id: String,
    },
    InsertBinding {
        entry: BindingEntry,
    },
    RemoveBinding {
        agent_id: String,
    },
    UpsertRoomSettings {
        room: String,
        entry: RoomSettingsEntry,
    },
    RemoveRoomSettings {
        room: String,
    },
}

impl ConfigOp {
    pub fn label(&self) -> &'static str {
        match self {
            ConfigOp::Snapshot => "snapshot",
            ConfigOp::AddAgent { .. } => "add agent",
            ConfigOp::RemoveAgent { .. } => "remove agent",
            ConfigOp::InsertBinding { .. } => "insert binding",
            ConfigOp::RemoveBinding { .. } => "remove binding",
            ConfigOp::UpsertRoomSettings { .. } => "upsert room settings",
            ConfigOp::RemoveRoomSettings { .. } => "remove room settings",
        }
    }
}

struct MutationJob {
    op: ConfigOp,
    respond_to: oneshot::Sender<Result<ConfigSnapshot, ConfigError>>,
}

/// Cloneable handle to the mutation worker. The worker stops once every
/// handle has been dropped and the backlog is drained.
#[derive(Clone)]
pub struct MutationQueue {
    tx: mpsc::Sender<MutationJob>,
}

impl MutationQueue {
    /// Spawn the worker on the current runtime.
    pub fn spawn(mutator: ConfigMutator) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(QUEUE_DEPTH);
        let handle = tokio::spawn(mutation_worker(mutator, rx));
        (MutationQueue { tx }, handle)
    }

    /// Enqueue `op` and wait for its result.
    pub async fn submit(&self, op: ConfigOp) -> Result<ConfigSnapshot, ConfigError> {
        let (tx, rx) = oneshot::channel();
        self.tx
            .send(MutationJob { op, respond_to: tx })
            .await
            .map_err(|_| ConfigError::ChannelClosed("mutation queue"))?;
        rx.await
            .map_err(|_| ConfigError::ChannelClosed("mutation response"))?
    }

    pub async fn snapshot(&self) -> Result<ConfigSnapshot, ConfigError> {
        self.submit(ConfigOp::Snapshot).await
    }

    pub async fn add_agent(
        &self,
        entry: AgentEntry,
        min_floor: Option<usize>,
    ) -> Result<ConfigSnapshot, ConfigError> {
        self.submit(ConfigOp::AddAgent { entry, min_floor }).await
    }

    pub async fn remove_agent(&self, id: &str) -> Result<ConfigSnapshot, ConfigError> {
        self.submit(ConfigOp::RemoveAgent { id: id.to_owned() }).await
    }

    pub async fn insert_binding(&self, entry: BindingEntry) -> Result<ConfigSnapshot, ConfigError> {
        self.submit(ConfigOp::InsertBinding { entry }).await
    }

    pub async fn remove_binding(&self, agent_id: &str) -> Result<ConfigSnapshot, ConfigError> {
        self.submit(ConfigOp::RemoveBinding {
            agent_id: agent_id.to_owned(),
        })
        .await
    }

    pub async fn upsert_room_settings(
        &self,
        room: &str,
        entry: RoomSettingsEntry,
    ) -> Result<ConfigSnapshot, ConfigError> {
        self.submit(ConfigOp::UpsertRoomSettings {
            room: room.to_owned(),
            entry,
        })
        .await
    }

    pub async fn remove_room_settings(&self, room: &str) -> Result<ConfigSnapshot, ConfigError> {
        self.submit(ConfigOp::RemoveRoomSettings {
            room: room.to_owned(),
        })
        .await
    }
}

async fn mutation_worker(mutator: ConfigMutator, mut rx: mpsc::Receiver<MutationJob>) {
    while let Some(job) = rx.recv().await {
        let label = job.op.label();
        let result = apply(&mutator, job.op).await;
        if let Err(err) = &result {
            tracing::warn!(op = label, error = %err, "config mutation failed");
        }
        // The requester may have gone away; the mutation still completed.
        let _ = job.respond_to.send(result);
    }
    tracing::debug!("mutation queue drained");
}

async fn apply(mutator: &ConfigMutator, op: ConfigOp) -> Result<ConfigSnapshot, ConfigError> {
    match op {
        ConfigOp::Snapshot => mutator.snapshot().await,
        ConfigOp::AddAgent { entry, min_floor } => mutator.add_agent(entry, min_floor).await,
        ConfigOp::RemoveAgent { id } => mutator.remove_agent(&id).await,
        ConfigOp::InsertBinding { entry } => mutator.insert_binding(entry).await,
        ConfigOp::RemoveBinding { agent_id } => mutator.remove_binding(&agent_id).await,
        ConfigOp::UpsertRoomSettings { room, entry } => {
            mutator.upsert_room_settings(&room, entry).await
        }
        ConfigOp::RemoveRoomSettings { room } => mutator.remove_room_settings(&room).await,
    }
}
