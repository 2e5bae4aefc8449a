//! Fractal lifecycle engine: config mutation protocol, room provisioning
//! and the create/delete sagas that tie them to the registry.

pub mod adapters;
pub mod audit;
pub mod error;
pub mod gateway;
pub mod mutator;
pub mod orchestrator;
pub mod queue;
pub mod quota;
pub mod request;
pub mod rooms;
pub mod saga;
pub mod snapshot;
pub mod store;

pub use audit::{AuditFinding, AuditProblem, AuditReport};
pub use error::{
    CompensationOutcome, CompensationRecord, ConfigError, FractalError, GatewayError, RoomError,
    RollbackReport,
};
pub use gateway::GatewayControl;
pub use mutator::ConfigMutator;
pub use orchestrator::{DeleteOutcome, HealthCounts, Orchestrator, OrchestratorConfig};
pub use queue::MutationQueue;
pub use request::{CreateRequest, DeleteOptions};
pub use rooms::{RoomProvisioner, RoomService, MIN_ROOM_MEMBERS};
pub use snapshot::{Collection, ConfigSnapshot};
pub use store::ConfigStore;
