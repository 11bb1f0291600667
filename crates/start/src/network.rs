//! Resolution of the chain the application targets.

use std::str::FromStr;

use anyhow::Context;

/// Symbolic name of the chain the application targets.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumString, strum::AsRefStr,
)]
#[strum(serialize_all = "kebab-case", ascii_case_insensitive)]
pub enum Network {
    /// Ethereum mainnet.
    Live,
    Ropsten,
    Rinkeby,
    Goerli,
    Kovan,
    Sepolia,
    /// Local, ephemeral chain provisioned for development only.
    Development,
}

impl Network {
    /// Map a chain id to its network. Unknown ids are local chains.
    pub fn from_chain_id(chain_id: u64) -> Self {
        match chain_id {
            1 => Network::Live,
            3 => Network::Ropsten,
            4 => Network::Rinkeby,
            5 => Network::Goerli,
            42 => Network::Kovan,
            11155111 => Network::Sepolia,
            _ => Network::Development,
        }
    }

    /// The chain id of a public network. `None` for the development chain.
    pub fn chain_id(&self) -> Option<u64> {
        match self {
            Network::Live => Some(1),
            Network::Ropsten => Some(3),
            Network::Rinkeby => Some(4),
            Network::Goerli => Some(5),
            Network::Kovan => Some(42),
            Network::Sepolia => Some(11155111),
            Network::Development => None,
        }
    }

    pub fn is_development(&self) -> bool {
        *self == Network::Development
    }
}

/// Maps a raw chain identifier to a [`Network`].
pub trait NetworkResolver: Send + Sync {
    /// Resolve the target network. `None` means no chain id was configured.
    fn resolve(&self, chain_id: Option<&str>) -> anyhow::Result<Network>;
}

/// Resolver backed by the table of well-known public networks.
///
/// Accepts a numeric chain id or a network name. Anything else is an error.
#[derive(Debug, Clone, Copy, Default)]
pub struct KnownNetworks;

impl NetworkResolver for KnownNetworks {
    fn resolve(&self, chain_id: Option<&str>) -> anyhow::Result<Network> {
        let Some(raw) = chain_id.map(str::trim).filter(|raw| !raw.is_empty()) else {
            return Ok(Network::Development);
        };

        if let Ok(id) = raw.parse::<u64>() {
            return Ok(Network::from_chain_id(id));
        }

        Network::from_str(raw).with_context(|| format!("Unknown chain network id '{}'", raw))
    }
}
