//! Services launched for the development session.
//!
//! Each service lives in its own submodule:
//! - `asset_server` - the front-end dev server launched from a command
//! - `tracker` - the companion tracker subprocess
//! - `port` - free port selection for the asset server
//! - `supervisor` - ordered launch of both services

pub mod asset_server;
pub mod port;
pub mod supervisor;
pub mod tracker;

use std::sync::{
    Arc, OnceLock,
    atomic::{AtomicBool, Ordering},
};

use anyhow::Result;
use futures::future::BoxFuture;

pub use asset_server::{AssetServerConfig, CommandAssetServer, Protocol};
pub use port::{PortSelector, TcpPortSelector};
pub use supervisor::{AssetServerLaunch, DEFAULT_HOST, DEFAULT_PORT, ServiceSupervisor};
pub use tracker::TrackerProcess;

/// The front-end asset server.
pub trait AssetServer: Send + Sync {
    /// Start serving on `host:port`.
    ///
    /// The returned future runs for as long as the server does. It resolves to an error
    /// if the server cannot start or stops on its own.
    fn listen<'a>(&'a self, port: u16, host: &'a str) -> BoxFuture<'a, Result<()>>;

    /// Request the server to stop. Must not block.
    fn close(&self) -> Result<()>;
}

/// Builds the asset server for a resolved launch configuration.
pub trait AssetServerFactory: Send + Sync {
    fn create(
        &self,
        launch: &AssetServerLaunch,
        env: &crate::EnvironmentState,
    ) -> Result<Arc<dyn AssetServer>>;
}

/// A supervised companion process.
pub trait Subprocess: Send + Sync {
    /// Request the process to terminate. Must not block.
    fn kill(&self) -> Result<()>;
}

/// A registered handle, released at most once.
struct Registered<T: ?Sized> {
    handle: Arc<T>,
    released: AtomicBool,
}

impl<T: ?Sized> Registered<T> {
    fn new(handle: Arc<T>) -> Self {
        Self {
            handle,
            released: AtomicBool::new(false),
        }
    }

    /// Run `release` on the handle unless it already ran.
    fn release(&self, release: impl FnOnce(&T) -> Result<()>) -> Option<Result<()>> {
        if self.released.swap(true, Ordering::SeqCst) {
            return None;
        }
        Some(release(&*self.handle))
    }
}

/// Handles of the launched services, shared with the shutdown coordinator.
///
/// Each slot can be filled once per run.
#[derive(Default)]
pub struct ServiceContext {
    asset_server: OnceLock<Registered<dyn AssetServer>>,
    tracker: OnceLock<Registered<dyn Subprocess>>,
}

impl ServiceContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn set_asset_server(&self, server: Arc<dyn AssetServer>) -> Result<()> {
        self.asset_server
            .set(Registered::new(server))
            .map_err(|_| anyhow::anyhow!("Asset server already registered"))
    }

    pub(crate) fn set_tracker(&self, tracker: Arc<dyn Subprocess>) -> Result<()> {
        self.tracker
            .set(Registered::new(tracker))
            .map_err(|_| anyhow::anyhow!("Tracker already registered"))
    }

    pub fn has_asset_server(&self) -> bool {
        self.asset_server.get().is_some()
    }

    pub fn has_tracker(&self) -> bool {
        self.tracker.get().is_some()
    }

    /// Close the asset server and kill the tracker, each at most once over the lifetime
    /// of the context. A failure of one does not prevent the other.
    pub(crate) fn release_all(&self) {
        if let Some(Some(Err(e))) = self
            .asset_server
            .get()
            .map(|server| server.release(|server| server.close()))
        {
            tracing::error!(error = ?e, "Failed to close asset server");
        }

        if let Some(Some(Err(e))) = self
            .tracker
            .get()
            .map(|tracker| tracker.release(|tracker| tracker.kill()))
        {
            tracing::error!(error = ?e, "Failed to kill tracker");
        }
    }
}
