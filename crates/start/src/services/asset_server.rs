//! Front-end asset server launched from a dev-server command.

use std::sync::{
    Arc, OnceLock,
    atomic::{AtomicBool, Ordering},
};

use anyhow::{Context, Result};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use url::Url;

use super::{AssetServer, AssetServerFactory, AssetServerLaunch};
use crate::{
    EnvironmentState,
    env::{HOST, HTTPS, PORT},
    process::{CommandConfig, KillSwitch, ProcessSpec, exit_code},
};

/// Default dev-server command.
pub const DEFAULT_COMMAND: &str = "npx";
/// Default dev-server arguments.
pub const DEFAULT_ARGS: [&str; 3] = ["webpack", "serve", "--mode=development"];

/// Protocol shown in the asset server URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum Protocol {
    #[default]
    Http,
    Https,
}

impl Protocol {
    /// `https` when `HTTPS` is exactly `"true"`.
    pub fn from_env(env: &EnvironmentState) -> Self {
        match env.get(HTTPS) {
            Some("true") => Protocol::Https,
            _ => Protocol::Http,
        }
    }
}

/// Configuration for the asset server.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AssetServerConfig {
    /// Application name shown in the startup banner.
    pub app_name: String,
    /// Dev-server command. `--host` and `--port` are appended on launch.
    pub command: CommandConfig,
}

impl Default for AssetServerConfig {
    fn default() -> Self {
        Self {
            app_name: "app".to_string(),
            command: CommandConfig::new(DEFAULT_COMMAND, DEFAULT_ARGS),
        }
    }
}

impl AssetServerFactory for AssetServerConfig {
    fn create(
        &self,
        launch: &AssetServerLaunch,
        env: &EnvironmentState,
    ) -> Result<Arc<dyn AssetServer>> {
        Ok(Arc::new(CommandAssetServer::new(self.clone(), launch.protocol, env)))
    }
}

/// Asset server running as a child process.
pub struct CommandAssetServer {
    config: AssetServerConfig,
    protocol: Protocol,
    env: Vec<(String, String)>,
    kill: OnceLock<KillSwitch>,
    closed: AtomicBool,
}

impl CommandAssetServer {
    pub fn new(config: AssetServerConfig, protocol: Protocol, env: &EnvironmentState) -> Self {
        Self {
            config,
            protocol,
            env: env
                .iter()
                .map(|(key, value)| (key.to_string(), value.to_string()))
                .collect(),
            kill: OnceLock::new(),
            closed: AtomicBool::new(false),
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    async fn serve(&self, port: u16, host: &str) -> Result<()> {
        if self.is_closed() {
            tracing::debug!("Asset server closed before it started listening");
            return Ok(());
        }

        let spec = ProcessSpec::new("asset-server", self.config.command.clone())
            .args(["--host".to_string(), host.to_string(), "--port".to_string(), port.to_string()])
            .exact_env(self.env.iter().map(|(key, value)| (key.as_str(), value.as_str())))
            .env(HOST, host)
            .env(PORT, port.to_string());

        let (kill, exit) = spec.spawn().context("Failed to start asset server")?;

        let kill = self.kill.get_or_init(|| kill);
        // `close` may have run between the check above and the kill switch being set.
        if self.is_closed() {
            kill.fire();
        }

        let url = display_url(self.protocol, host, port)?;
        tracing::info!("You can now view {} in the browser.", self.config.app_name);
        tracing::info!("  Local:            {}", url);

        let status = exit.wait().await?;

        if self.is_closed() {
            return Ok(());
        }

        anyhow::bail!(
            "Asset server exited unexpectedly with code {}",
            exit_code(&status)
        )
    }
}

impl AssetServer for CommandAssetServer {
    fn listen<'a>(&'a self, port: u16, host: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(self.serve(port, host))
    }

    fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);

        if let Some(kill) = self.kill.get() {
            kill.fire();
        }

        tracing::debug!("Asset server close requested");
        Ok(())
    }
}

/// URL a browser on this machine should open. Wildcard hosts are shown as `localhost`.
pub fn display_url(protocol: Protocol, host: &str, port: u16) -> Result<Url> {
    let host = match host {
        "0.0.0.0" | "::" | "" => "localhost",
        host => host,
    };

    Url::parse(&format!("{}://{}:{}/", protocol, host, port))
        .context("Failed to parse asset server URL")
}
