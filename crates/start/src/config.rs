//! Layered configuration: defaults, then `Dappdev.toml`, then `DAPPDEV_*` variables.

use std::path::Path;

use anyhow::{Context, Result};
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

use crate::{
    chain::{AnvilConfig, DockerConfig},
    deploy::DeployScriptConfig,
    env::DEFAULT_DEPLOYER_ACCOUNT_INDEX_VAR,
    process::CommandConfig,
    services::{AssetServerConfig, tracker},
};

/// Default configuration file, looked up in the working directory.
pub const CONFIG_FILENAME: &str = "Dappdev.toml";
/// Prefix of configuration environment variables. `__` separates nested keys.
pub const ENV_PREFIX: &str = "DAPPDEV_";

/// Configuration of a development session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DevConfig {
    /// Environment variable holding the deployer account index.
    pub deployer_account_index_var: String,
    /// Companion tracker command.
    pub tracker: CommandConfig,
    pub asset_server: AssetServerConfig,
    pub deploy: DeployScriptConfig,
    pub anvil: AnvilConfig,
    pub docker: DockerConfig,
}

impl Default for DevConfig {
    fn default() -> Self {
        Self {
            deployer_account_index_var: DEFAULT_DEPLOYER_ACCOUNT_INDEX_VAR.to_string(),
            tracker: tracker::default_command(),
            asset_server: AssetServerConfig::default(),
            deploy: DeployScriptConfig::default(),
            anvil: AnvilConfig::default(),
            docker: DockerConfig::default(),
        }
    }
}

impl DevConfig {
    /// Load the configuration.
    ///
    /// An explicit `path` must exist. Without one, `Dappdev.toml` in the working
    /// directory is used if present.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(path) => {
                if !path.exists() {
                    anyhow::bail!("Configuration file not found: {}", path.display());
                }
                path.to_path_buf()
            }
            None => Path::new(CONFIG_FILENAME).to_path_buf(),
        };

        let config: Self = Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::file(&file))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .with_context(|| format!("Failed to load configuration from {}", file.display()))?;

        tracing::debug!(path = %file.display(), "Configuration loaded");

        Ok(config)
    }

    /// Save the configuration to a TOML file.
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let content =
            toml::to_string_pretty(self).context("Failed to serialize configuration to TOML")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config to {}", path.display()))?;
        tracing::info!(path = %path.display(), "Configuration saved");
        Ok(())
    }
}
