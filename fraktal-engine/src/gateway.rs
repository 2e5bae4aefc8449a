//! Reload signal for the long-running gateway process.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::GatewayError;

#[async_trait]
pub trait GatewayControl: Send + Sync {
    /// Ask the gateway to pick up the current configuration.
    async fn reload(&self) -> Result<(), GatewayError>;
}

/// Apply `timeout` to a single reload.
pub async fn reload_within(
    gateway: &Arc<dyn GatewayControl>,
    timeout: Duration,
) -> Result<(), GatewayError> {
    tokio::time::timeout(timeout, gateway.reload())
        .await
        .map_err(|_| GatewayError::Timeout { after: timeout })?
}
