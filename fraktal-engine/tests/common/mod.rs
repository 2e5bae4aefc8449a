#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tempfile::TempDir;

use fraktal_core::Registry;
use fraktal_engine::adapters::{MemoryConfigStore, MemoryRoomService, NoopGateway};
use fraktal_engine::{
    ConfigMutator, ConfigSnapshot, CreateRequest, MutationQueue, Orchestrator, OrchestratorConfig,
    RoomProvisioner,
};
use fraktal_workspace::{WorkspaceManager, WorkspaceOptions};

pub const BOT: &str = "@fraktal:memory";
pub const FILLER: &str = "@filler:memory";

pub struct Harness {
    pub orchestrator: Orchestrator,
    pub rooms: Arc<MemoryRoomService>,
    pub store: Arc<MemoryConfigStore>,
    pub gateway: Arc<NoopGateway>,
    pub home: TempDir,
}

impl Harness {
    pub fn new() -> Self {
        Self::with(|_| {})
    }

    pub fn with(tune: impl FnOnce(&mut OrchestratorConfig)) -> Self {
        Self::build(tune, None)
    }

    /// Workspace documents rendered from `dir` instead of the built-ins.
    pub fn with_templates(dir: PathBuf) -> Self {
        Self::build(|_| {}, Some(dir))
    }

    fn build(tune: impl FnOnce(&mut OrchestratorConfig), template_dir: Option<PathBuf>) -> Self {
        let home = TempDir::new().unwrap();
        let mut config = OrchestratorConfig {
            max_fractals: 10,
            min_agent_floor: 1,
            default_model: "anthropic/claude-sonnet".to_string(),
            channel: "matrix".to_string(),
            filesystem_timeout: Duration::from_secs(5),
            gateway_timeout: Duration::from_secs(5),
        };
        tune(&mut config);

        let store = Arc::new(MemoryConfigStore::new());
        store.seed(baseline());
        let rooms = Arc::new(MemoryRoomService::new(BOT));
        let gateway = Arc::new(NoopGateway::new());

        let (queue, _worker) = MutationQueue::spawn(ConfigMutator::new(
            store.clone(),
            Duration::from_secs(5),
        ));
        let provisioner = RoomProvisioner::new(
            rooms.clone(),
            Duration::from_secs(5),
            Some(FILLER.to_string()),
            Duration::ZERO,
        );
        let workspace = WorkspaceManager::new(WorkspaceOptions {
            root: home.path().join("workspaces"),
            owner: None,
            template_dir,
            dir_mode: 0o750,
            file_mode: 0o640,
        })
        .unwrap();
        let registry = Registry::open_at(home.path().join("registry.json")).unwrap();

        let orchestrator = Orchestrator::new(
            config,
            registry,
            provisioner,
            queue,
            Arc::new(workspace),
            gateway.clone(),
        );
        Harness {
            orchestrator,
            rooms,
            store,
            gateway,
            home,
        }
    }

    pub fn workspace_of(&self, id: &str) -> PathBuf {
        self.home.path().join("workspaces").join(id)
    }

    pub fn registry_on_disk(&self) -> Registry {
        Registry::open_at(self.home.path().join("registry.json")).unwrap()
    }
}

/// One pre-existing agent and the catch-all binding routing to it.
pub fn baseline() -> ConfigSnapshot {
    ConfigSnapshot::from_values(
        Some(json!([{ "id": "main", "default": true }])),
        Some(json!([{ "agentId": "main", "match": { "channel": "matrix" } }])),
        Some(json!({})),
        None,
    )
    .unwrap()
}

/// A request whose room reaches quorum once the filler is invited.
pub fn request(id: &str) -> CreateRequest {
    CreateRequest {
        name: format!("Fractal {id}"),
        id: id.to_string(),
        purpose: Some("Watch the build queue".to_string()),
        invite_participants: vec!["@alice:memory".to_string()],
        ..CreateRequest::default()
    }
}
