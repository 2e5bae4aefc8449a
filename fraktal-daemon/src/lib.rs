//! HTTP service around the fractal orchestrator.

mod error;
pub mod routes;
mod runtime;

pub use error::DaemonError;
pub use routes::api;
pub use runtime::{build_service, init_tracing, run, start_blocking, LogFormat, Service};
