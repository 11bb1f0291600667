//! Port selection for the asset server.

use std::future::Future;

use anyhow::{Context, Result};
use tokio::net::TcpListener;

/// Picks the port the asset server will listen on.
pub trait PortSelector: Send + Sync {
    /// Return `default_port` if it is free on `host`, or another free port otherwise.
    fn choose_port(&self, host: &str, default_port: u16) -> impl Future<Output = Result<u16>> + Send;
}

/// Probes ports by binding a TCP listener.
///
/// When the default port is taken, the OS picks a free one.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpPortSelector;

impl PortSelector for TcpPortSelector {
    async fn choose_port(&self, host: &str, default_port: u16) -> Result<u16> {
        match TcpListener::bind((host, default_port)).await {
            Ok(_) => Ok(default_port),
            Err(e) if e.kind() == std::io::ErrorKind::AddrInUse => {
                let listener = TcpListener::bind((host, 0))
                    .await
                    .with_context(|| format!("Failed to find a free port on {}", host))?;
                let port = listener
                    .local_addr()
                    .context("Failed to read the bound address")?
                    .port();

                tracing::warn!(
                    default_port,
                    port,
                    "Something is already running on the default port, using another one"
                );

                Ok(port)
            }
            Err(e) => Err(e).with_context(|| format!("Failed to probe port {} on {}", default_port, host)),
        }
    }
}
