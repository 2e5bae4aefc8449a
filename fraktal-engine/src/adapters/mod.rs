//! Concrete collaborators.

pub mod cli_store;
pub mod command_gateway;
pub mod file_store;
pub mod matrix;
pub mod memory;

pub use cli_store::CliConfigStore;
pub use command_gateway::CommandGateway;
pub use file_store::FileConfigStore;
pub use matrix::MatrixRoomService;
pub use memory::{MemoryConfigStore, MemoryRoomService, NoopGateway};
