//! Anvil in a Docker container as the local development chain.

mod cmd;

use std::{path::PathBuf, time::Duration};

use alloy_core::primitives::{Address, Bytes};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use url::Url;

pub use cmd::AnvilCmdBuilder;

use super::{
    ChainProvisioner, DeployerHandle, LocalChain,
    docker::{ContainerSpec, DockerConfig, DockerImage, DockerRuntime},
    fs::FsHandler,
    parse_account_index, rpc,
};

/// Port Anvil listens on inside the container.
pub const ANVIL_PORT: u16 = 8545;
/// Number of dev accounts generated by default.
pub const DEFAULT_ACCOUNTS: usize = 10;
/// Chain id of the local chain.
pub const DEFAULT_CHAIN_ID: u64 = 31337;

pub const DEFAULT_DOCKER_IMAGE: &str = "ghcr.io/foundry-rs/foundry";
pub const DEFAULT_DOCKER_TAG: &str = "latest";

/// Anvil writes its config into this directory inside the container.
const CONTAINER_DATA_DIR: &str = "/data";
const CONFIG_FILE: &str = "anvil.json";

/// Configuration for the Anvil container.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AnvilConfig {
    pub docker_image: DockerImage,
    pub container_name: String,
    pub chain_id: u64,
    /// Block time in seconds. Unset mines a block per transaction.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_time: Option<u64>,
    /// Number of funded dev accounts.
    pub accounts: usize,
    /// How long to wait for Anvil to answer RPC requests, in seconds.
    pub startup_timeout_secs: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extra_args: Vec<String>,
}

impl Default for AnvilConfig {
    fn default() -> Self {
        Self {
            docker_image: DockerImage::new(DEFAULT_DOCKER_IMAGE, DEFAULT_DOCKER_TAG),
            container_name: "dappdev-anvil".to_string(),
            chain_id: DEFAULT_CHAIN_ID,
            block_time: None,
            accounts: DEFAULT_ACCOUNTS,
            startup_timeout_secs: 60,
            extra_args: Vec::new(),
        }
    }
}

/// The part of Anvil's `--config-out` file we use.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
struct AnvilAccounts {
    available_accounts: Vec<Address>,
    private_keys: Vec<Bytes>,
}

impl AnvilAccounts {
    fn select(mut self, index: usize) -> anyhow::Result<(Address, Bytes)> {
        let available = self.available_accounts.len().min(self.private_keys.len());

        if index >= available {
            anyhow::bail!(
                "Deployer account index {} is out of range, Anvil generated {} account(s)",
                index,
                available
            );
        }

        Ok((
            self.available_accounts.swap_remove(index),
            self.private_keys.swap_remove(index),
        ))
    }
}

/// Provisions a fresh Anvil chain per run.
#[derive(Debug, Clone, Default)]
pub struct AnvilProvisioner {
    anvil: AnvilConfig,
    docker: DockerConfig,
}

impl AnvilProvisioner {
    pub fn new(anvil: AnvilConfig, docker: DockerConfig) -> Self {
        Self { anvil, docker }
    }
}

impl ChainProvisioner for AnvilProvisioner {
    async fn provision(&self, account_index: Option<&str>) -> anyhow::Result<LocalChain> {
        let index = parse_account_index(account_index)?;
        if index >= self.anvil.accounts {
            anyhow::bail!(
                "Deployer account index {} is out of range, Anvil is configured with {} account(s)",
                index,
                self.anvil.accounts
            );
        }

        let data_dir =
            tempdir::TempDir::new("dappdev-anvil").context("Failed to create Anvil data directory")?;
        FsHandler::create_host_data_directory(data_dir.path())?;

        let mut docker = DockerRuntime::connect(self.docker.clone()).await?;
        docker.pull_image(&self.anvil.docker_image).await?;

        let container_data_dir = PathBuf::from(CONTAINER_DATA_DIR);
        let cmd = AnvilCmdBuilder::new(self.anvil.chain_id)
            .block_time(self.anvil.block_time)
            .accounts(self.anvil.accounts)
            .config_out(container_data_dir.join(CONFIG_FILE))
            .extra_args(self.anvil.extra_args.iter().cloned())
            .build();

        let spec = ContainerSpec::new(self.anvil.docker_image.clone())
            .entrypoint(["anvil"])
            .cmd(cmd)
            .publish(ANVIL_PORT)
            .bind(data_dir.path(), &container_data_dir, "rw");

        let container_id = docker
            .start_container(&self.anvil.container_name, spec)
            .await
            .context("Failed to start Anvil container")?;

        tracing::info!(
            container_id = %container_id,
            container_name = %self.anvil.container_name,
            chain_id = self.anvil.chain_id,
            "Anvil container started"
        );

        let timeout = Duration::from_secs(self.anvil.startup_timeout_secs);
        let config_path = data_dir.path().join(CONFIG_FILE);

        FsHandler::wait_for_file(&config_path, timeout)
            .await
            .context("Anvil config file was not created in time")?;

        let accounts: AnvilAccounts = serde_json::from_str(
            &tokio::fs::read_to_string(&config_path)
                .await
                .with_context(|| format!("Failed to read Anvil config from {}", config_path.display()))?,
        )
        .context("Failed to parse Anvil config")?;

        let host_port = docker.host_port(&container_id, ANVIL_PORT).await?;
        let rpc_url = Url::parse(&format!("http://127.0.0.1:{}/", host_port))
            .context("Failed to parse Anvil RPC URL")?;

        let client = rpc::create_client()?;
        let expected = self.anvil.chain_id;
        let (probe, url) = (&client, rpc_url.as_str());
        rpc::wait_until_ready("anvil", timeout, move || async move {
            let chain_id = rpc::chain_id(probe, url).await?;
            if chain_id != expected {
                anyhow::bail!("Anvil reports chain id {}, expected {}", chain_id, expected);
            }
            Ok::<(), anyhow::Error>(())
        })
        .await?;

        let (address, private_key) = accounts.select(index)?;

        tracing::info!(%rpc_url, %address, account_index = index, "✓ Local chain ready");

        let deployer = DeployerHandle {
            rpc_url,
            chain_id: expected,
            account_index: index,
            address,
            private_key,
        };

        Ok(LocalChain::with_runtime(deployer, docker, data_dir))
    }
}
