use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use fraktal_core::settings::{ConfigStoreBackend, GatewayBackend, RoomBackend};
use fraktal_core::{FractalStatus, Registry, Settings, SettingsError};
use fraktal_engine::adapters::{
    CliConfigStore, CommandGateway, FileConfigStore, MatrixRoomService, MemoryConfigStore,
    MemoryRoomService, NoopGateway,
};
use fraktal_engine::{
    ConfigMutator, ConfigStore, GatewayControl, MutationQueue, Orchestrator, OrchestratorConfig,
    RoomProvisioner, RoomService,
};
use fraktal_workspace::{WorkspaceManager, WorkspaceOptions};

use crate::error::{io_err, DaemonError};
use crate::routes;

const MEMORY_BOT_USER: &str = "@fraktal:memory";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// A wired orchestrator and the config mutation worker behind it.
pub struct Service {
    pub orchestrator: Orchestrator,
    pub worker: JoinHandle<()>,
}

/// Start the service and block the current thread until it exits.
pub fn start_blocking(
    settings: Settings,
    home: &Path,
    log_format: LogFormat,
) -> Result<(), DaemonError> {
    init_tracing(log_format);
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    runtime.block_on(run(settings, home.to_path_buf()))
}

/// Serve the HTTP API until ctrl-c, then drain pending config writes.
pub async fn run(settings: Settings, home: PathBuf) -> Result<(), DaemonError> {
    settings.validate_for_serve()?;
    let addr: SocketAddr = settings
        .bind
        .parse()
        .map_err(|source| DaemonError::InvalidBind {
            addr: settings.bind.clone(),
            source,
        })?;

    let Service {
        orchestrator,
        worker,
    } = build_service(&settings, &home)?;
    let routes = routes::api(orchestrator.clone(), Arc::from(settings.api_token.as_str()));

    let (shutdown_tx, _) = broadcast::channel::<()>(16);

    let server_handle = {
        let shutdown = shutdown_tx.clone();
        let mut shutdown_rx = shutdown.subscribe();
        let (bound, server) = warp::serve(routes)
            .try_bind_with_graceful_shutdown(addr, async move {
                let _ = shutdown_rx.recv().await;
            })
            .map_err(|e| DaemonError::Bind {
                addr: addr.to_string(),
                message: e.to_string(),
            })?;
        tracing::info!(addr = %bound, "fraktal service listening");
        tokio::spawn(async move {
            server.await;
            let _ = shutdown.send(());
            Ok::<(), DaemonError>(())
        })
    };

    let signal_handle = {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            let mut shutdown_rx = shutdown.subscribe();
            tokio::select! {
                _ = shutdown_rx.recv() => Ok(()),
                signal = tokio::signal::ctrl_c() => {
                    match signal {
                        Ok(()) => {
                            tracing::info!("received ctrl-c, shutting down service");
                            let _ = shutdown.send(());
                            Ok(())
                        }
                        Err(err) => Err(DaemonError::Task {
                            task: "signal_handler",
                            message: format!("ctrl-c handler failed: {err}"),
                        }),
                    }
                }
            }
        })
    };

    let (server_result, signal_result) = tokio::join!(server_handle, signal_handle);
    handle_join("http_server", server_result)?;
    handle_join("signal_handler", signal_result)?;

    // Detached sagas keep their own handles; the worker ends once they finish.
    drop(orchestrator);
    if let Err(err) = worker.await {
        tracing::error!(error = %err, "mutation worker ended abnormally");
    }
    tracing::info!("fraktal service stopped");
    Ok(())
}

/// Wire collaborators from `settings`. Must run inside a tokio runtime.
pub fn build_service(settings: &Settings, home: &Path) -> Result<Service, DaemonError> {
    let store: Arc<dyn ConfigStore> = match settings.config_store.backend {
        ConfigStoreBackend::Cli => Arc::new(
            CliConfigStore::new(&settings.config_store.binary).with_channel(&settings.channel),
        ),
        ConfigStoreBackend::File => {
            let path = settings.config_store.path.clone().ok_or_else(|| {
                SettingsError::Invalid("config_store.path is required for the file backend".into())
            })?;
            Arc::new(FileConfigStore::new(path).with_channel(&settings.channel))
        }
        ConfigStoreBackend::Memory => Arc::new(MemoryConfigStore::new()),
    };

    let rooms: Arc<dyn RoomService> = match settings.rooms.backend {
        RoomBackend::Matrix => Arc::new(MatrixRoomService::new(
            &settings.rooms.homeserver,
            &settings.rooms.access_token,
            &settings.rooms.bot_user_id,
            settings.timeouts.room(),
        )),
        RoomBackend::Memory => {
            let bot = match settings.rooms.bot_user_id.as_str() {
                "" => MEMORY_BOT_USER,
                bot => bot,
            };
            Arc::new(MemoryRoomService::new(bot))
        }
    };

    let gateway: Arc<dyn GatewayControl> = match settings.gateway.backend {
        GatewayBackend::Command => Arc::new(CommandGateway::new(settings.gateway.command.clone())),
        GatewayBackend::Noop => Arc::new(NoopGateway::new()),
    };

    let (queue, worker) = MutationQueue::spawn(ConfigMutator::new(
        store,
        settings.timeouts.config_store(),
    ));
    let provisioner = RoomProvisioner::new(
        rooms,
        settings.timeouts.room(),
        settings.filler_participant.clone(),
        Duration::from_millis(settings.quorum_settle_ms),
    );
    let workspace = WorkspaceManager::new(WorkspaceOptions::from(&settings.workspace))?;
    let registry = Registry::open_at(settings.registry_path_at(home))?;
    warn_unfinished(&registry);

    tracing::info!(
        registry = %registry.path().display(),
        workspaces = %workspace.root().display(),
        records = registry.len(),
        max_fractals = settings.max_fractals,
        "orchestrator ready"
    );

    let orchestrator = Orchestrator::new(
        OrchestratorConfig::from_settings(settings),
        registry,
        provisioner,
        queue,
        Arc::new(workspace),
        gateway,
    );
    Ok(Service {
        orchestrator,
        worker,
    })
}

/// No saga survives a restart, so these records need an operator.
fn warn_unfinished(registry: &Registry) {
    for fractal in registry
        .list()
        .iter()
        .filter(|f| f.status.is_in_flight() || f.status == FractalStatus::Deleting)
    {
        tracing::warn!(
            fractal_id = %fractal.id,
            status = %fractal.status,
            "record was left mid-saga by a previous run; audit it, then delete to clean up"
        );
    }
}

fn handle_join(
    task: &'static str,
    result: Result<Result<(), DaemonError>, tokio::task::JoinError>,
) -> Result<(), DaemonError> {
    match result {
        Ok(inner) => inner,
        Err(err) => Err(DaemonError::Task {
            task,
            message: format!("join failure: {err}"),
        }),
    }
}

pub fn init_tracing(format: LogFormat) {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = fmt().with_env_filter(filter).with_target(false);
    let _ = match format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn memory_settings(home: &Path) -> Settings {
        let mut settings = Settings::default();
        settings.api_token = "secret".to_string();
        settings.rooms.backend = RoomBackend::Memory;
        settings.config_store.backend = ConfigStoreBackend::Memory;
        settings.gateway.backend = GatewayBackend::Noop;
        settings.workspace.root = home.join("workspaces");
        settings
    }

    #[tokio::test]
    async fn memory_backends_wire_up() {
        let home = TempDir::new().unwrap();
        let service = build_service(&memory_settings(home.path()), home.path()).unwrap();
        let health = service.orchestrator.health().await.unwrap();
        assert_eq!(health.total, 0);
        assert_eq!(health.max, Settings::default().max_fractals);
    }

    #[tokio::test]
    async fn file_backend_without_path_is_rejected() {
        let home = TempDir::new().unwrap();
        let mut settings = memory_settings(home.path());
        settings.config_store.backend = ConfigStoreBackend::File;
        assert!(matches!(
            build_service(&settings, home.path()),
            Err(DaemonError::Settings(_))
        ));
    }

    #[tokio::test]
    async fn bad_bind_address_fails_before_serving() {
        let home = TempDir::new().unwrap();
        let mut settings = memory_settings(home.path());
        settings.bind = "not-an-address".to_string();
        let err = run(settings, home.path().to_path_buf()).await.unwrap_err();
        assert!(matches!(err, DaemonError::InvalidBind { .. }));
    }

    #[tokio::test]
    async fn empty_token_refuses_to_start() {
        let home = TempDir::new().unwrap();
        let mut settings = memory_settings(home.path());
        settings.api_token.clear();
        let err = run(settings, home.path().to_path_buf()).await.unwrap_err();
        assert!(matches!(err, DaemonError::Settings(_)));
    }
}
