//! Local development chain provisioning.

pub mod anvil;
mod docker;
mod fs;
mod rpc;

use std::future::Future;

use alloy_core::primitives::{Address, Bytes};
use anyhow::Context;
use tempdir::TempDir;
use url::Url;

pub use anvil::{AnvilConfig, AnvilProvisioner};
pub use docker::{ContainerSpec, DockerConfig, DockerImage, DockerRuntime};

/// Account and endpoint the deployment collaborator deploys with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployerHandle {
    pub rpc_url: Url,
    pub chain_id: u64,
    pub account_index: usize,
    pub address: Address,
    pub private_key: Bytes,
}

/// A provisioned local chain. Dropping it tears the chain down.
pub struct LocalChain {
    pub deployer: DeployerHandle,
    runtime: Option<DockerRuntime>,
    _data_dir: Option<TempDir>,
}

impl std::fmt::Debug for LocalChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalChain")
            .field("deployer", &self.deployer)
            .field("docker", &self.runtime.is_some())
            .finish()
    }
}

impl LocalChain {
    /// A chain that is not backed by anything this process owns.
    pub fn new(deployer: DeployerHandle) -> Self {
        Self {
            deployer,
            runtime: None,
            _data_dir: None,
        }
    }

    pub(crate) fn with_runtime(deployer: DeployerHandle, runtime: DockerRuntime, data_dir: TempDir) -> Self {
        Self {
            deployer,
            runtime: Some(runtime),
            _data_dir: Some(data_dir),
        }
    }

    /// Stop the chain and release its resources.
    pub async fn teardown(mut self) -> anyhow::Result<()> {
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown().await?;
        }
        Ok(())
    }
}

/// Brings up a local chain and hands out the deployer account.
pub trait ChainProvisioner: Send + Sync {
    /// Provision a chain. `account_index` selects the deployer account and is passed
    /// through verbatim from the environment.
    fn provision(
        &self,
        account_index: Option<&str>,
    ) -> impl Future<Output = anyhow::Result<LocalChain>> + Send;
}

/// Parse the deployer account selector. Unset or empty selects account `0`.
pub fn parse_account_index(raw: Option<&str>) -> anyhow::Result<usize> {
    match raw.map(str::trim).filter(|raw| !raw.is_empty()) {
        None => Ok(0),
        Some(raw) => raw
            .parse::<usize>()
            .with_context(|| format!("Invalid deployer account index '{}'", raw)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_account_index() {
        assert_eq!(parse_account_index(None).unwrap(), 0);
        assert_eq!(parse_account_index(Some("")).unwrap(), 0);
        assert_eq!(parse_account_index(Some(" 3 ")).unwrap(), 3);

        let error = parse_account_index(Some("-1")).unwrap_err();
        assert_eq!(error.to_string(), "Invalid deployer account index '-1'");
    }

    #[tokio::test]
    async fn test_teardown_without_runtime() {
        let chain = LocalChain::new(DeployerHandle {
            rpc_url: Url::parse("http://127.0.0.1:8545/").unwrap(),
            chain_id: 31337,
            account_index: 0,
            address: Address::ZERO,
            private_key: Bytes::new(),
        });

        chain.teardown().await.unwrap();
    }
}
