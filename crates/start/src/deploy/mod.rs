//! Conditional deployment of the application's contracts to a local chain.

mod script;

use std::{collections::BTreeMap, future::Future};

use alloy_core::primitives::Address;
use derive_more::{Deref, DerefMut, From};

pub use script::{DEFAULT_OUTPUT_FILE, DeployScriptConfig};

use crate::{
    EnvironmentState, Network,
    chain::{ChainProvisioner, DeployerHandle, LocalChain},
};

/// Deployed contract addresses, keyed by the environment variable they are exported as.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deref, DerefMut, From)]
pub struct DeployedArtifacts(BTreeMap<String, Address>);

impl DeployedArtifacts {
    /// Environment entries, with addresses in checksummed form.
    pub fn env_vars(&self) -> impl Iterator<Item = (String, String)> + '_ {
        self.0
            .iter()
            .map(|(key, address)| (key.clone(), address.to_string()))
    }
}

impl<K: Into<String>> FromIterator<(K, Address)> for DeployedArtifacts {
    fn from_iter<I: IntoIterator<Item = (K, Address)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(key, address)| (key.into(), address)).collect())
    }
}

/// Deploys the contracts with a provisioned deployer account.
///
/// `env` is the session environment as resolved so far.
pub trait ContractDeployer: Send + Sync {
    fn deploy(
        &self,
        deployer: &DeployerHandle,
        env: &EnvironmentState,
    ) -> impl Future<Output = anyhow::Result<DeployedArtifacts>> + Send;
}

/// A finished deployment. Keeps the local chain alive until torn down.
#[derive(Debug)]
pub struct Deployment {
    pub artifacts: DeployedArtifacts,
    chain: LocalChain,
}

impl Deployment {
    pub fn deployer(&self) -> &DeployerHandle {
        &self.chain.deployer
    }

    pub async fn teardown(self) -> anyhow::Result<()> {
        self.chain.teardown().await
    }
}

/// Runs the provision-then-deploy sequence, only for the development network.
pub struct DeploymentCoordinator<P, D> {
    provisioner: P,
    deployer: D,
}

impl<P: ChainProvisioner, D: ContractDeployer> DeploymentCoordinator<P, D> {
    pub fn new(provisioner: P, deployer: D) -> Self {
        Self {
            provisioner,
            deployer,
        }
    }

    /// Deploy when `network` is the development network.
    ///
    /// On success the deployed addresses are merged into `env` (overwriting existing
    /// keys). Other networks return `None` without touching anything. Errors from the
    /// collaborators are returned unchanged.
    pub async fn maybe_deploy(
        &self,
        network: Network,
        account_index: Option<&str>,
        env: &mut EnvironmentState,
    ) -> anyhow::Result<Option<Deployment>> {
        if !network.is_development() {
            tracing::info!(
                %network,
                chain_id = ?network.chain_id(),
                "Not a development network, skipping local deployment"
            );
            return Ok(None);
        }

        tracing::info!("Provisioning local chain...");
        let chain = self.provisioner.provision(account_index).await?;

        tracing::info!(
            rpc_url = %chain.deployer.rpc_url,
            deployer = %chain.deployer.address,
            "Deploying contracts..."
        );

        let artifacts = match self.deployer.deploy(&chain.deployer, env).await {
            Ok(artifacts) => artifacts,
            Err(e) => {
                if let Err(teardown) = chain.teardown().await {
                    tracing::warn!(error = ?teardown, "Failed to tear down the local chain");
                }
                return Err(e);
            }
        };

        env.merge(artifacts.env_vars());

        tracing::info!("✓ Contracts deployed!");
        for (key, address) in artifacts.iter() {
            tracing::info!("  {}: {}", key, address);
        }

        Ok(Some(Deployment { artifacts, chain }))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };

    use alloy_core::primitives::{Bytes, address};
    use url::Url;

    use super::*;

    fn handle(account_index: usize) -> DeployerHandle {
        DeployerHandle {
            rpc_url: Url::parse("http://127.0.0.1:8545/").unwrap(),
            chain_id: 31337,
            account_index,
            address: Address::ZERO,
            private_key: Bytes::new(),
        }
    }

    #[derive(Default, Clone)]
    struct CountingProvisioner {
        calls: Arc<AtomicUsize>,
    }

    impl ChainProvisioner for CountingProvisioner {
        async fn provision(&self, account_index: Option<&str>) -> anyhow::Result<LocalChain> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let index = crate::chain::parse_account_index(account_index)?;
            Ok(LocalChain::new(handle(index)))
        }
    }

    struct FixedDeployer(anyhow::Result<DeployedArtifacts>);

    impl ContractDeployer for FixedDeployer {
        async fn deploy(
            &self,
            deployer: &DeployerHandle,
            _env: &EnvironmentState,
        ) -> anyhow::Result<DeployedArtifacts> {
            assert_eq!(deployer.account_index, 2);
            match &self.0 {
                Ok(artifacts) => Ok(artifacts.clone()),
                Err(e) => Err(anyhow::anyhow!("{}", e)),
            }
        }
    }

    fn artifacts() -> DeployedArtifacts {
        [(
            "TOKEN_ADDRESS",
            address!("0x70997970C51812dc3A010C7d01b50e0d17dc79C8"),
        )]
        .into_iter()
        .collect()
    }

    #[tokio::test]
    async fn test_public_network_skips_deployment() {
        let provisioner = CountingProvisioner::default();
        let coordinator =
            DeploymentCoordinator::new(provisioner.clone(), FixedDeployer(Ok(artifacts())));
        let mut env = EnvironmentState::default();

        let deployment = coordinator
            .maybe_deploy(Network::Sepolia, Some("2"), &mut env)
            .await
            .unwrap();

        assert!(deployment.is_none());
        assert_eq!(provisioner.calls.load(Ordering::SeqCst), 0);
        assert!(env.is_empty());
    }

    #[tokio::test]
    async fn test_development_merges_artifacts() {
        let provisioner = CountingProvisioner::default();
        let coordinator =
            DeploymentCoordinator::new(provisioner.clone(), FixedDeployer(Ok(artifacts())));
        let mut env: EnvironmentState = [("TOKEN_ADDRESS", "stale")].into_iter().collect();

        let deployment = coordinator
            .maybe_deploy(Network::Development, Some("2"), &mut env)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(provisioner.calls.load(Ordering::SeqCst), 1);
        assert_eq!(deployment.artifacts, artifacts());
        assert_eq!(deployment.deployer().account_index, 2);
        assert_eq!(
            env.get("TOKEN_ADDRESS"),
            Some("0x70997970C51812dc3A010C7d01b50e0d17dc79C8")
        );

        deployment.teardown().await.unwrap();
    }

    #[tokio::test]
    async fn test_deploy_error_propagates_unchanged() {
        let coordinator = DeploymentCoordinator::new(
            CountingProvisioner::default(),
            FixedDeployer(Err(anyhow::anyhow!("out of gas"))),
        );
        let mut env = EnvironmentState::default();

        let error = coordinator
            .maybe_deploy(Network::Development, Some("2"), &mut env)
            .await
            .unwrap_err();

        assert_eq!(error.to_string(), "out of gas");
        assert!(env.is_empty());
    }
}
