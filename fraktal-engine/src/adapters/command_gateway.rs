//! Gateway reload by running a configured command.

use async_trait::async_trait;
use tokio::process::Command;

use crate::error::GatewayError;
use crate::gateway::GatewayControl;

pub struct CommandGateway {
    argv: Vec<String>,
}

impl CommandGateway {
    pub fn new(argv: Vec<String>) -> Self {
        CommandGateway { argv }
    }
}

#[async_trait]
impl GatewayControl for CommandGateway {
    async fn reload(&self) -> Result<(), GatewayError> {
        let (program, args) = self.argv.split_first().ok_or(GatewayError::EmptyCommand)?;
        tracing::info!(command = %self.argv.join(" "), "reloading gateway");
        let output = Command::new(program)
            .args(args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| GatewayError::Spawn {
                program: program.clone(),
                source,
            })?;
        if !output.status.success() {
            return Err(GatewayError::Failed {
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn successful_command_reloads() {
        CommandGateway::new(vec!["true".into()]).reload().await.unwrap();
    }

    #[tokio::test]
    async fn failing_command_reports_exit_code() {
        let err = CommandGateway::new(vec!["false".into()])
            .reload()
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Failed { code: Some(1), .. }));
    }

    #[tokio::test]
    async fn empty_command_is_rejected() {
        let err = CommandGateway::new(vec![]).reload().await.unwrap_err();
        assert!(matches!(err, GatewayError::EmptyCommand));
    }
}
