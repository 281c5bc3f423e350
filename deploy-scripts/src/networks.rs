//! Known networks and their connection parameters

use std::fmt::{self, Display};

use clap::ValueEnum;

/// A network the deploy scripts know how to reach
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Network {
    /// The Celo Alfajores testnet
    Alfajores,
    /// Celo mainnet
    Celo,
    /// A local development node
    Localhost,
}

impl Network {
    /// The name under which the network's records are stored
    pub fn name(&self) -> &'static str {
        match self {
            Network::Alfajores => "alfajores",
            Network::Celo => "celo",
            Network::Localhost => "localhost",
        }
    }

    /// The public RPC endpoint used when none is given
    pub fn default_rpc_url(&self) -> &'static str {
        match self {
            Network::Alfajores => "https://alfajores-forno.celo-testnet.org",
            Network::Celo => "https://forno.celo.org",
            Network::Localhost => "http://127.0.0.1:8545",
        }
    }

    /// The chain ID the network's endpoints must serve.
    ///
    /// Local nodes are accepted whatever chain ID they were started with.
    pub fn chain_id(&self) -> Option<u64> {
        match self {
            Network::Alfajores => Some(44787),
            Network::Celo => Some(42220),
            Network::Localhost => None,
        }
    }

    /// The block explorer for the network, if it has one
    pub fn explorer_url(&self) -> Option<&'static str> {
        match self {
            Network::Alfajores => Some("https://alfajores.celoscan.io"),
            Network::Celo => Some("https://celoscan.io"),
            Network::Localhost => None,
        }
    }
}

impl Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets() {
        assert_eq!(Network::Alfajores.chain_id(), Some(44787));
        assert_eq!(Network::Celo.chain_id(), Some(42220));
        assert_eq!(Network::Localhost.chain_id(), None);
        assert_eq!(Network::Celo.default_rpc_url(), "https://forno.celo.org");
        assert!(Network::Localhost.explorer_url().is_none());
    }

    #[test]
    fn test_names_match_cli_values() {
        for network in Network::value_variants() {
            let value = network.to_possible_value().unwrap();
            assert_eq!(value.get_name(), network.name());
        }
    }
}
