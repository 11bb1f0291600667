//! dappdev starts a development session for a decentralized application.

mod cli;

use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;

use cli::Cli;
use dappdev_start::{
    DevConfig, EnvironmentState, KnownNetworks, Orchestrator,
    chain::AnvilProvisioner,
    deploy::DeploymentCoordinator,
    env::CHAIN_NETWORK_ID,
    services::{ServiceSupervisor, TcpPortSelector},
};

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    // Initialize the logger.
    tracing_subscriber::fmt()
        .with_max_level(cli.verbosity)
        .init();

    let mut config = DevConfig::load(cli.config.as_deref())?;
    config.docker.no_cleanup |= cli.no_cleanup;

    if let Some(path) = &cli.save_config {
        config.save_to_file(path)?;
    }

    let mut env = EnvironmentState::from_process();
    if let Some(chain_network_id) = cli.chain_network_id {
        env.set(CHAIN_NETWORK_ID, chain_network_id);
    }

    let orchestrator = Orchestrator::new(
        KnownNetworks,
        DeploymentCoordinator::new(
            AnvilProvisioner::new(config.anvil, config.docker),
            config.deploy,
        ),
        ServiceSupervisor::new(TcpPortSelector, config.asset_server, config.tracker),
    )
    .deployer_account_index_var(config.deployer_account_index_var);

    let code = orchestrator.run(env).await.into_exit_code()?;

    // Returning lets the runtime shut down, so nothing outlives the session.
    Ok(ExitCode::from(code as u8))
}
