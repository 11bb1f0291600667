//! dappdev-start - Development session bootstrapper for decentralized applications.
//!
//! Resolves the target chain, deploys the application's contracts to a local chain when
//! developing against it, then launches the front-end asset server and the tracker
//! subprocess. All ways a session can end are funnelled into one idempotent shutdown.

pub mod chain;
pub mod config;
pub mod deploy;
pub mod env;
mod network;
mod orchestrator;
mod process;
pub mod services;
mod shutdown;

pub use config::{CONFIG_FILENAME, DevConfig};
pub use env::EnvironmentState;
pub use network::{KnownNetworks, Network, NetworkResolver};
pub use orchestrator::{DEFAULT_SERVICE_STOP_TIMEOUT, Orchestrator};
pub use process::CommandConfig;
pub use shutdown::{ExitGuard, ShutdownCoordinator, ShutdownState, TerminationSignal, Trigger};
