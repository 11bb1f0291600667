//! Ordered launch of the asset server and the tracker.

use anyhow::{Context, Result};

use super::{AssetServerFactory, PortSelector, Protocol, TrackerProcess};
use crate::{
    EnvironmentState, ShutdownCoordinator,
    env::{HOST, PORT},
    process::CommandConfig,
};

/// Host the asset server binds to when `HOST` is unset.
pub const DEFAULT_HOST: &str = "0.0.0.0";
/// Port the asset server prefers when `PORT` is unset.
pub const DEFAULT_PORT: u16 = 3000;

/// Resolved launch parameters of the asset server.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AssetServerLaunch {
    pub host: String,
    pub port: u16,
    pub protocol: Protocol,
}

/// Launches the asset server and the tracker and hands their handles to the coordinator.
pub struct ServiceSupervisor<P, F> {
    port_selector: P,
    asset_servers: F,
    tracker: CommandConfig,
}

impl<P: PortSelector, F: AssetServerFactory> ServiceSupervisor<P, F> {
    pub fn new(port_selector: P, asset_servers: F, tracker: CommandConfig) -> Self {
        Self {
            port_selector,
            asset_servers,
            tracker,
        }
    }

    /// Launch both services.
    ///
    /// Returns once both are launched; neither is awaited for readiness. A listen
    /// failure of the asset server is logged and fires a fatal trigger.
    pub async fn start(
        &self,
        env: &EnvironmentState,
        coordinator: &ShutdownCoordinator,
    ) -> Result<AssetServerLaunch> {
        let host = env.get_non_empty(HOST).unwrap_or(DEFAULT_HOST).to_string();
        let default_port = env
            .get_non_empty(PORT)
            .and_then(|port| port.trim().parse::<u16>().ok())
            .filter(|port| *port != 0)
            .unwrap_or(DEFAULT_PORT);

        let port = self
            .port_selector
            .choose_port(&host, default_port)
            .await
            .context("Failed to choose a port for the asset server")?;

        let launch = AssetServerLaunch {
            host,
            port,
            protocol: Protocol::from_env(env),
        };

        tracing::info!(
            host = %launch.host,
            port = launch.port,
            protocol = %launch.protocol,
            "Starting the development server..."
        );

        let server = self
            .asset_servers
            .create(&launch, env)
            .context("Failed to create the asset server")?;
        coordinator.register_asset_server(server.clone())?;

        let (host, port) = (launch.host.clone(), launch.port);
        coordinator.spawn_supervised("asset server", async move {
            server
                .listen(port, &host)
                .await
                .inspect_err(|e| tracing::error!(error = ?e, "Asset server failed to listen"))
        });

        TrackerProcess::spawn(&self.tracker, env, coordinator)
            .context("Failed to start the tracker")?;

        Ok(launch)
    }
}
