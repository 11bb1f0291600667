//! Contract deployment through an external deploy command.

use std::{collections::BTreeMap, path::Path};

use alloy_core::primitives::Address;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{ContractDeployer, DeployedArtifacts};
use crate::{
    EnvironmentState,
    chain::DeployerHandle,
    process::{CommandConfig, ProcessSpec, exit_code},
};

/// Default deploy command.
pub const DEFAULT_COMMAND: &str = "node";
pub const DEFAULT_ARGS: [&str; 1] = ["deployment/deploy.js"];
/// Default name of the file the deploy command writes its addresses to.
pub const DEFAULT_OUTPUT_FILE: &str = "deployment.json";

/// Runs a deploy command and reads the addresses it wrote.
///
/// The command runs with exactly the session environment, plus the deployer endpoint and
/// account:
///
/// | Variable | Value |
/// |---|---|
/// | `RPC_URL` | chain RPC endpoint |
/// | `CHAIN_ID` | chain id |
/// | `DEPLOYER_ADDRESS` | deployer account |
/// | `DEPLOYER_PRIVATE_KEY` | its private key |
/// | `DEPLOYMENT_OUTPUT` | path of the JSON object `{ "<ENV_KEY>": "<address>" }` to write |
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeployScriptConfig {
    pub command: CommandConfig,
    pub output_file: String,
}

impl Default for DeployScriptConfig {
    fn default() -> Self {
        Self {
            command: CommandConfig::new(DEFAULT_COMMAND, DEFAULT_ARGS),
            output_file: DEFAULT_OUTPUT_FILE.to_string(),
        }
    }
}

impl ContractDeployer for DeployScriptConfig {
    async fn deploy(
        &self,
        deployer: &DeployerHandle,
        env: &EnvironmentState,
    ) -> anyhow::Result<DeployedArtifacts> {
        let scratch =
            tempdir::TempDir::new("dappdev-deploy").context("Failed to create deployment directory")?;
        let output = scratch.path().join(&self.output_file);

        let (_kill, exit) = ProcessSpec::new("deploy", self.command.clone())
            .exact_env(env.iter())
            .env("RPC_URL", deployer.rpc_url.as_str())
            .env("CHAIN_ID", deployer.chain_id.to_string())
            .env("DEPLOYER_ADDRESS", deployer.address.to_string())
            .env("DEPLOYER_PRIVATE_KEY", deployer.private_key.to_string())
            .env("DEPLOYMENT_OUTPUT", output.display().to_string())
            .spawn()
            .context("Failed to start the deploy command")?;

        let status = exit.wait().await?;
        if !status.success() {
            anyhow::bail!(
                "Deploy command `{}` exited with code {}",
                self.command,
                exit_code(&status)
            );
        }

        read_artifacts(&output).await
    }
}

/// Read and validate the deploy command's output.
async fn read_artifacts(path: &Path) -> anyhow::Result<DeployedArtifacts> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Deploy command did not write {}", path.display()))?;

    parse_artifacts(&content)
}

fn parse_artifacts(content: &str) -> anyhow::Result<DeployedArtifacts> {
    let raw: BTreeMap<String, Value> =
        serde_json::from_str(content).context("Deployment output is not a JSON object")?;

    if raw.is_empty() {
        anyhow::bail!("Deployment output contains no contract addresses");
    }

    raw.into_iter()
        .map(|(key, value)| {
            let address = value
                .as_str()
                .with_context(|| format!("Address of {} is not a string: {}", key, value))?
                .parse::<Address>()
                .with_context(|| format!("Address of {} is invalid", key))?;
            Ok::<_, anyhow::Error>((key, address))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use alloy_core::primitives::Bytes;
    use url::Url;

    use super::*;

    fn handle() -> DeployerHandle {
        DeployerHandle {
            rpc_url: Url::parse("http://127.0.0.1:8545/").unwrap(),
            chain_id: 31337,
            account_index: 0,
            address: "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266".parse().unwrap(),
            private_key: Bytes::from_static(&[0xac, 0x09]),
        }
    }

    fn script(body: &str) -> DeployScriptConfig {
        DeployScriptConfig {
            command: CommandConfig::new("/bin/sh", ["-c", body]),
            ..Default::default()
        }
    }

    #[test]
    fn test_parse_artifacts() {
        let artifacts = parse_artifacts(
            r#"{ "TOKEN_ADDRESS": "0x70997970c51812dc3a010c7d01b50e0d17dc79c8" }"#,
        )
        .unwrap();

        assert_eq!(
            artifacts.env_vars().collect::<Vec<_>>(),
            [(
                "TOKEN_ADDRESS".to_string(),
                "0x70997970C51812dc3A010C7d01b50e0d17dc79C8".to_string()
            )]
        );
    }

    #[test]
    fn test_parse_artifacts_rejects_bad_output() {
        assert!(parse_artifacts("[]").is_err());
        assert!(parse_artifacts("{}").is_err());
        assert!(parse_artifacts(r#"{ "TOKEN_ADDRESS": 42 }"#).is_err());

        let error = parse_artifacts(r#"{ "TOKEN_ADDRESS": "0x1234" }"#).unwrap_err();
        assert_eq!(error.to_string(), "Address of TOKEN_ADDRESS is invalid");
    }

    #[tokio::test]
    async fn test_deploy_script_receives_deployer() {
        let deployer = script(
            r#"test "$CHAIN_ID" = 31337 || exit 4
test "$RPC_URL" = http://127.0.0.1:8545/ || exit 5
test "$DEPLOYER_PRIVATE_KEY" = 0xac09 || exit 6
printf '{"DEPLOYER":"%s"}' "$DEPLOYER_ADDRESS" > "$DEPLOYMENT_OUTPUT""#,
        );

        let artifacts = deployer
            .deploy(&handle(), &EnvironmentState::default())
            .await
            .unwrap();
        assert_eq!(artifacts.get("DEPLOYER"), Some(&handle().address));
    }

    #[tokio::test]
    async fn test_deploy_script_runs_in_session_environment() {
        let deployer = script(
            r#"test "$TARGET_NETWORK" = development || exit 4
test "$NODE_ENV" = development || exit 5
printf '{"DEPLOYER":"%s"}' "$DEPLOYER_ADDRESS" > "$DEPLOYMENT_OUTPUT""#,
        );
        let mut env: EnvironmentState = [("TARGET_NETWORK", "development")].into_iter().collect();
        env.set_build_mode();

        let artifacts = deployer.deploy(&handle(), &env).await.unwrap();
        assert!(artifacts.contains_key("DEPLOYER"));
    }

    #[tokio::test]
    async fn test_failing_script_is_an_error() {
        let error = script("exit 3")
            .deploy(&handle(), &EnvironmentState::default())
            .await.unwrap_err();
        assert!(error.to_string().contains("exited with code 3"));
    }

    #[tokio::test]
    async fn test_missing_output_is_an_error() {
        let error = script("true")
            .deploy(&handle(), &EnvironmentState::default())
            .await.unwrap_err();
        assert!(error.to_string().contains("did not write"));
    }
}
