//! Docker runtime hosting the local chain container.

use std::{collections::HashMap, collections::HashSet, mem, path::Path, time::Duration};

use anyhow::{Context, Result};
use bollard::{
    Docker,
    container::{
        Config, CreateContainerOptions, RemoveContainerOptions, StopContainerOptions,
    },
    image::CreateImageOptions,
    network::CreateNetworkOptions,
    secret::{HostConfig, PortBinding},
};
use derive_more::Deref;
use futures::{StreamExt, executor::block_on, future::join_all};
use serde::{Deserialize, Serialize};
use tokio::time::timeout;

/// Timeout for stopping containers and removing the network.
const DOCKER_CLEANUP_TIMEOUT: Duration = Duration::from_secs(60);

/// A Docker image reference with image name and tag.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DockerImage {
    /// The image name (e.g., "ghcr.io/foundry-rs/foundry").
    pub image: String,
    /// The image tag (e.g., "latest").
    pub tag: String,
}

impl DockerImage {
    pub fn new(image: impl Into<String>, tag: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            tag: tag.into(),
        }
    }
}

impl std::fmt::Display for DockerImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.image, self.tag)
    }
}

/// Configuration for the Docker runtime.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DockerConfig {
    /// Name of the bridge network to create. Generated when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_name: Option<String>,
    /// Leave containers and the network behind on exit.
    #[serde(default)]
    pub no_cleanup: bool,
}

impl DockerConfig {
    /// The configured network name, or a generated `dappdev-<adjective>-<noun>` one.
    pub fn resolve_network_name(&self) -> String {
        self.network_name.clone().unwrap_or_else(|| {
            let name = names::Generator::default()
                .next()
                .unwrap_or_else(|| "local-chain".to_string());
            format!("dappdev-{}", name)
        })
    }
}

/// What to run in a container.
#[derive(Debug, Clone)]
pub struct ContainerSpec {
    pub image: DockerImage,
    pub entrypoint: Option<Vec<String>>,
    pub cmd: Vec<String>,
    /// Container TCP ports published on a host port chosen by Docker.
    pub published_ports: Vec<u16>,
    /// Volume binds (host:container:mode format).
    pub binds: Vec<String>,
}

impl ContainerSpec {
    pub fn new(image: DockerImage) -> Self {
        Self {
            image,
            entrypoint: None,
            cmd: Vec::new(),
            published_ports: Vec::new(),
            binds: Vec::new(),
        }
    }

    pub fn entrypoint(mut self, entrypoint: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.entrypoint = Some(entrypoint.into_iter().map(Into::into).collect());
        self
    }

    pub fn cmd(mut self, cmd: Vec<String>) -> Self {
        self.cmd = cmd;
        self
    }

    /// Publish a container TCP port on a random host port.
    pub fn publish(mut self, container_port: u16) -> Self {
        self.published_ports.push(container_port);
        self
    }

    pub fn bind(mut self, host_path: &Path, container_path: &Path, mode: &str) -> Self {
        self.binds.push(format!(
            "{}:{}:{}",
            host_path.display(),
            container_path.display(),
            mode
        ));
        self
    }
}

/// Docker client owning the containers it started and their network.
///
/// Everything is removed on [`DockerRuntime::shutdown`], or on drop as a fallback,
/// unless `no_cleanup` is set.
#[derive(Deref)]
pub struct DockerRuntime {
    #[deref]
    docker: Docker,

    /// Containers that have been started.
    containers: HashSet<String>,

    /// Network the containers are attached to. `None` once removed.
    network_id: Option<String>,

    config: DockerConfig,
}

impl Drop for DockerRuntime {
    fn drop(&mut self) {
        if self.config.no_cleanup {
            tracing::debug!("Cleanup of docker containers on exit is disabled");
            return;
        }

        if self.containers.is_empty() && self.network_id.is_none() {
            return;
        }

        tracing::debug!(
            containers = self.containers.len(),
            "Cleaning up docker resources on drop..."
        );

        if let Err(e) = block_on(self.cleanup()) {
            tracing::error!(error = ?e, "Failed to cleanup containers and network");
        }
    }
}

impl DockerRuntime {
    const STOP_CONTAINER_TIMEOUT: Duration = Duration::from_secs(5);

    /// Connect to the local Docker daemon and create the bridge network.
    pub async fn connect(config: DockerConfig) -> Result<Self> {
        let docker = Docker::connect_with_local_defaults()
            .context("Failed to connect to Docker. Is Docker running?")?;

        let network_name = config.resolve_network_name();
        let network_id = Self::create_network(&docker, &network_name).await?;

        Ok(Self {
            docker,
            containers: HashSet::new(),
            network_id: Some(network_id),
            config,
        })
    }

    async fn create_network(docker: &Docker, network_name: &str) -> Result<String> {
        tracing::info!(network_name, "Creating Docker network");

        let response = docker
            .create_network(CreateNetworkOptions {
                name: network_name.to_string(),
                check_duplicate: true,
                driver: "bridge".to_string(),
                ..Default::default()
            })
            .await
            .context("Failed to create Docker network")?;

        // Fall back to the name when the daemon returns no id.
        let network_id = (!response.id.is_empty())
            .then_some(response.id)
            .unwrap_or_else(|| network_name.to_string());

        tracing::trace!(network_id, "Docker network created");

        Ok(network_id)
    }

    /// Make sure the image is available locally, pulling it if needed.
    pub async fn pull_image(&self, image: &DockerImage) -> Result<()> {
        let full_image = image.to_string();

        if self.docker.inspect_image(&full_image).await.is_ok() {
            tracing::debug!(image = %full_image, "Image already available locally, skipping pull");
            return Ok(());
        }

        tracing::info!(image = %full_image, "Pulling image...");

        let mut stream = self.docker.create_image(
            Some(CreateImageOptions {
                from_image: image.image.clone(),
                tag: image.tag.clone(),
                ..Default::default()
            }),
            None,
            None,
        );

        while let Some(result) = stream.next().await {
            let info = result.with_context(|| format!("Failed to pull image '{}'", full_image))?;
            if let Some(status) = info.status {
                tracing::trace!(status, "Image pull");
            }
        }

        Ok(())
    }

    /// Create and start a container on the runtime's network. Returns the container id.
    pub async fn start_container(&mut self, container_name: &str, spec: ContainerSpec) -> Result<String> {
        let network_id = self
            .network_id
            .clone()
            .context("Docker network was already removed")?;

        let port_bindings: HashMap<String, Option<Vec<PortBinding>>> = spec
            .published_ports
            .iter()
            .map(|port| {
                (
                    format!("{}/tcp", port),
                    Some(vec![PortBinding {
                        host_ip: Some("127.0.0.1".to_string()),
                        host_port: Some("0".to_string()),
                    }]),
                )
            })
            .collect();

        let exposed_ports: HashMap<String, HashMap<(), ()>> = spec
            .published_ports
            .iter()
            .map(|port| (format!("{}/tcp", port), HashMap::new()))
            .collect();

        let host_config = HostConfig {
            port_bindings: Some(port_bindings),
            binds: (!spec.binds.is_empty()).then_some(spec.binds),
            network_mode: Some(network_id),
            ..Default::default()
        };

        let config = Config {
            image: Some(spec.image.to_string()),
            entrypoint: spec.entrypoint,
            cmd: Some(spec.cmd),
            exposed_ports: Some(exposed_ports),
            host_config: Some(host_config),
            ..Default::default()
        };

        tracing::trace!(container_name, "Creating container");

        let container = self
            .docker
            .create_container(
                Some(CreateContainerOptions {
                    name: container_name,
                    ..Default::default()
                }),
                config,
            )
            .await
            .context("Failed to create container")?;

        // Tracked before starting so a failed start is still removed.
        self.containers.insert(container.id.clone());

        tracing::trace!(container_id = %container.id, container_name, "Starting container");

        self.docker
            .start_container::<String>(&container.id, None)
            .await
            .context("Failed to start container")?;

        Ok(container.id)
    }

    /// The host port Docker bound for a published container TCP port.
    pub async fn host_port(&self, container_id: &str, container_port: u16) -> Result<u16> {
        let inspect = self
            .docker
            .inspect_container(container_id, None)
            .await
            .context("Failed to inspect container")?;

        let key = format!("{}/tcp", container_port);

        inspect
            .network_settings
            .and_then(|settings| settings.ports)
            .and_then(|mut ports| ports.remove(&key))
            .flatten()
            .into_iter()
            .flatten()
            .find_map(|binding| binding.host_port.filter(|port| !port.is_empty()))
            .with_context(|| format!("Port {} is not published", key))?
            .parse::<u16>()
            .context("Docker reported an invalid host port")
    }

    /// Stop and remove the containers and the network, unless `no_cleanup` is set.
    pub async fn shutdown(mut self) -> Result<()> {
        if self.config.no_cleanup {
            tracing::info!(
                containers = self.containers.len(),
                "Leaving docker containers running (cleanup disabled)"
            );
            // Nothing left for Drop to do.
            self.containers.clear();
            self.network_id = None;
            return Ok(());
        }

        self.cleanup().await?;
        tracing::info!("✓ Local chain cleaned up");

        Ok(())
    }

    async fn cleanup(&mut self) -> Result<()> {
        let docker = self.docker.clone();
        let containers = mem::take(&mut self.containers);
        let network_id = self.network_id.take();

        let removals = containers
            .iter()
            .map(|container_id| Self::stop_and_remove_container(&docker, container_id));

        timeout(DOCKER_CLEANUP_TIMEOUT, join_all(removals))
            .await
            .context("Timed out stopping containers")?;

        if let Some(network_id) = network_id {
            tracing::trace!(network_id, "Removing network");
            docker
                .remove_network(&network_id)
                .await
                .context("Failed to remove network")?;
        }

        Ok(())
    }

    async fn stop_and_remove_container(docker: &Docker, container_id: &str) {
        tracing::trace!(container_id, "Stopping and removing container");

        // Errors mean the container is already stopped or gone.
        docker
            .stop_container(
                container_id,
                Some(StopContainerOptions {
                    t: Self::STOP_CONTAINER_TIMEOUT.as_secs() as i64,
                }),
            )
            .await
            .ok();

        docker
            .remove_container(
                container_id,
                Some(RemoveContainerOptions {
                    force: true,
                    ..Default::default()
                }),
            )
            .await
            .ok();
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    #[test]
    fn test_configured_network_name_is_kept() {
        let config = DockerConfig {
            network_name: Some("my-net".to_string()),
            no_cleanup: false,
        };
        assert_eq!(config.resolve_network_name(), "my-net");
    }

    #[test]
    fn test_generated_network_name() {
        let name = DockerConfig::default().resolve_network_name();
        assert!(name.starts_with("dappdev-"));
        assert!(name.len() > "dappdev-".len());
    }

    #[test]
    fn test_container_spec_builder() {
        let spec = ContainerSpec::new(DockerImage::new("ghcr.io/foundry-rs/foundry", "latest"))
            .entrypoint(["anvil"])
            .cmd(vec!["--port".to_string(), "8545".to_string()])
            .publish(8545)
            .bind(&PathBuf::from("/tmp/chain"), &PathBuf::from("/data"), "rw");

        assert_eq!(spec.image.to_string(), "ghcr.io/foundry-rs/foundry:latest");
        assert_eq!(spec.entrypoint, Some(vec!["anvil".to_string()]));
        assert_eq!(spec.published_ports, vec![8545]);
        assert_eq!(spec.binds, vec!["/tmp/chain:/data:rw".to_string()]);
    }
}
