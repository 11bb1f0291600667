use std::path::PathBuf;

use clap::Parser;
use tracing::level_filters::LevelFilter;

#[derive(Parser, Debug)]
#[command(name = "dappdev")]
#[command(
    author,
    version,
    about = "Start a dapp development session: local chain, contracts, dev server and tracker."
)]
pub struct Cli {
    /// The verbosity level.
    #[arg(short, long, env = "DAPPDEV_VERBOSITY", default_value_t = LevelFilter::INFO)]
    pub verbosity: LevelFilter,

    /// Path to the configuration file. Defaults to `Dappdev.toml` in the working directory
    /// when it exists.
    #[arg(long, alias = "conf", env = "DAPPDEV_CONFIG")]
    pub config: Option<PathBuf>,

    /// Write the resolved configuration to this path before starting.
    #[arg(long, env = "DAPPDEV_SAVE_CONFIG")]
    pub save_config: Option<PathBuf>,

    /// Leave the local chain containers running on exit.
    #[arg(long, env = "DAPPDEV_NO_CLEANUP")]
    pub no_cleanup: bool,

    /// Chain id (or network name) to target. Unset targets a local development chain.
    #[arg(long, alias = "chain", env = "CHAIN_NETWORK_ID")]
    pub chain_network_id: Option<String>,
}
