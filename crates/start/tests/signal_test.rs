//! Real termination signals delivered to a running session.
//!
//! Signal handlers are process-wide, so this lives in its own test binary and the
//! scenarios run one after the other.

use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use alloy_core::primitives::{Address, Bytes};
use anyhow::Result;
use dappdev_start::{
    CommandConfig, EnvironmentState, KnownNetworks, Orchestrator, TerminationSignal, Trigger,
    chain::{ChainProvisioner, DeployerHandle, LocalChain},
    deploy::{ContractDeployer, DeployedArtifacts, DeploymentCoordinator},
    services::{AssetServer, AssetServerFactory, AssetServerLaunch, PortSelector, ServiceSupervisor},
};
use futures::future::BoxFuture;
use tokio::sync::Notify;

const SESSION_TIMEOUT: Duration = Duration::from_secs(10);

/// Delivers `signal` to this test process.
async fn send_to_self(signal: &str) -> Result<()> {
    let status = tokio::process::Command::new("/bin/sh")
        .args(["-c", &format!("kill -{} {}", signal, std::process::id())])
        .status()
        .await?;
    anyhow::ensure!(status.success(), "kill -{} failed", signal);
    Ok(())
}

/// Interrupts the session while the local chain is being provisioned.
struct InterruptingProvisioner;

impl ChainProvisioner for InterruptingProvisioner {
    async fn provision(&self, _account_index: Option<&str>) -> Result<LocalChain> {
        send_to_self("INT").await?;
        futures::future::pending::<()>().await;

        Ok(LocalChain::new(DeployerHandle {
            rpc_url: "http://127.0.0.1:8545/".parse()?,
            chain_id: 31337,
            account_index: 0,
            address: Address::ZERO,
            private_key: Bytes::new(),
        }))
    }
}

struct UnreachableDeployer;

impl ContractDeployer for UnreachableDeployer {
    async fn deploy(
        &self,
        _deployer: &DeployerHandle,
        _env: &EnvironmentState,
    ) -> Result<DeployedArtifacts> {
        anyhow::bail!("deployment should not run")
    }
}

struct DefaultPort;

impl PortSelector for DefaultPort {
    async fn choose_port(&self, _host: &str, default_port: u16) -> Result<u16> {
        Ok(default_port)
    }
}

#[derive(Default)]
struct ClosableServer {
    closes: AtomicUsize,
    stopped: Notify,
}

impl AssetServer for ClosableServer {
    fn listen<'a>(&'a self, _port: u16, _host: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.stopped.notified().await;
            Ok(())
        })
    }

    fn close(&self) -> Result<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        self.stopped.notify_one();
        Ok(())
    }
}

struct Assets(Arc<ClosableServer>);

impl AssetServerFactory for Assets {
    fn create(&self, _launch: &AssetServerLaunch, _env: &EnvironmentState) -> Result<Arc<dyn AssetServer>> {
        Ok(self.0.clone())
    }
}

async fn run_session(tracker_script: &str, env: EnvironmentState, server: Arc<ClosableServer>) -> Trigger {
    let orchestrator = Orchestrator::new(
        KnownNetworks,
        DeploymentCoordinator::new(InterruptingProvisioner, UnreachableDeployer),
        ServiceSupervisor::new(
            DefaultPort,
            Assets(server),
            CommandConfig::new("/bin/sh", ["-c", tracker_script]),
        ),
    )
    .service_stop_timeout(Duration::from_secs(2));

    tokio::time::timeout(SESSION_TIMEOUT, orchestrator.run(env))
        .await
        .expect("session did not end in time")
}

#[tokio::test]
async fn test_termination_signals_end_the_session() {
    // Interrupted while provisioning: nothing was launched.
    let server = Arc::new(ClosableServer::default());
    let outcome = run_session("sleep 30", EnvironmentState::default(), server.clone()).await;

    assert!(matches!(
        outcome,
        Trigger::Signal(TerminationSignal::Interrupt)
    ));
    assert_eq!(outcome.into_exit_code().unwrap(), 0);
    assert_eq!(server.closes.load(Ordering::SeqCst), 0);

    // Running session: the tracker sends SIGTERM then SIGINT, services are released once.
    let server = Arc::new(ClosableServer::default());
    let env: EnvironmentState = [("CHAIN_NETWORK_ID", "5")].into_iter().collect();
    let script = format!(
        "kill -TERM {pid}; kill -INT {pid}; exec sleep 30",
        pid = std::process::id()
    );
    let outcome = run_session(&script, env, server.clone()).await;

    assert!(matches!(outcome, Trigger::Signal(_)));
    assert_eq!(outcome.into_exit_code().unwrap(), 0);
    assert_eq!(server.closes.load(Ordering::SeqCst), 1);
}
