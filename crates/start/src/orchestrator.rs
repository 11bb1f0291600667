//! Entry point of a development session.

use std::{sync::Arc, time::Duration};

use anyhow::Context;

use crate::{
    EnvironmentState, NetworkResolver, ShutdownCoordinator, TerminationSignal, Trigger,
    chain::ChainProvisioner,
    deploy::{ContractDeployer, Deployment, DeploymentCoordinator},
    env::{CHAIN_NETWORK_ID, DEFAULT_DEPLOYER_ACCOUNT_INDEX_VAR, TARGET_NETWORK},
    services::{AssetServerFactory, AssetServerLaunch, PortSelector, ServiceContext, ServiceSupervisor},
};

/// How long launched services get to exit once released before they are killed outright.
pub const DEFAULT_SERVICE_STOP_TIMEOUT: Duration = Duration::from_secs(10);

/// Resolves the network, deploys when it is the development network, then launches the
/// services and waits for the session to end.
pub struct Orchestrator<R, P, D, S, F> {
    resolver: R,
    deployment: DeploymentCoordinator<P, D>,
    supervisor: ServiceSupervisor<S, F>,
    deployer_account_index_var: String,
    service_stop_timeout: Duration,
}

impl<R, P, D, S, F> Orchestrator<R, P, D, S, F>
where
    R: NetworkResolver,
    P: ChainProvisioner,
    D: ContractDeployer,
    S: PortSelector,
    F: AssetServerFactory,
{
    pub fn new(
        resolver: R,
        deployment: DeploymentCoordinator<P, D>,
        supervisor: ServiceSupervisor<S, F>,
    ) -> Self {
        Self {
            resolver,
            deployment,
            supervisor,
            deployer_account_index_var: DEFAULT_DEPLOYER_ACCOUNT_INDEX_VAR.to_string(),
            service_stop_timeout: DEFAULT_SERVICE_STOP_TIMEOUT,
        }
    }

    /// Name of the variable selecting the deployer account.
    pub fn deployer_account_index_var(mut self, var: impl Into<String>) -> Self {
        self.deployer_account_index_var = var.into();
        self
    }

    /// Grace period for the released services to exit.
    pub fn service_stop_timeout(mut self, timeout: Duration) -> Self {
        self.service_stop_timeout = timeout;
        self
    }

    /// Run the session to completion and return what ended it.
    ///
    /// Termination triggers are installed before anything starts, so a startup failure
    /// still tears down whatever was launched. Returns only once every launched service
    /// process has exited. The local chain, if any, is torn down last.
    pub async fn run(self, mut env: EnvironmentState) -> Trigger {
        env.set_build_mode();

        let coordinator = ShutdownCoordinator::new(Arc::new(ServiceContext::new()));

        for signal in [TerminationSignal::Interrupt, TerminationSignal::Terminate] {
            if let Err(e) = coordinator.register_termination_trigger(signal) {
                coordinator.fail(e);
            }
        }

        // Fires `Exit` if this future is dropped before the session ends.
        let exit_guard = coordinator.exit_guard();

        let mut deployment = None;

        tokio::select! {
            started = self.start(&mut env, &coordinator) => match started {
                Ok((deployed, launch)) => {
                    deployment = deployed;
                    tracing::debug!(host = %launch.host, port = launch.port, "Services launched");
                }
                Err(e) => {
                    coordinator.fail(e);
                }
            },
            _ = coordinator.terminated() => {
                tracing::info!("Startup interrupted");
            }
        }

        let outcome = coordinator.wait().await;
        drop(exit_guard);

        coordinator
            .join_supervised(self.service_stop_timeout)
            .await;

        if let Some(deployment) = deployment
            && let Err(e) = deployment.teardown().await
        {
            tracing::warn!(error = ?e, "Failed to tear down the local chain");
        }

        tracing::info!(outcome = %outcome, "Session ended");

        outcome
    }

    async fn start(
        &self,
        env: &mut EnvironmentState,
        coordinator: &ShutdownCoordinator,
    ) -> anyhow::Result<(Option<Deployment>, AssetServerLaunch)> {
        let chain_id = env.get(CHAIN_NETWORK_ID).map(str::to_string);
        let network = self
            .resolver
            .resolve(chain_id.as_deref())
            .context("Failed to resolve the target network")?;

        tracing::info!(%network, chain_id = ?chain_id, "Target network resolved");
        env.set(TARGET_NETWORK, network.to_string());

        let account_index = env
            .get(&self.deployer_account_index_var)
            .map(str::to_string);
        let deployment = self
            .deployment
            .maybe_deploy(network, account_index.as_deref(), env)
            .await?;

        let launch = self.supervisor.start(env, coordinator).await?;

        Ok((deployment, launch))
    }
}
