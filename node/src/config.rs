//! Node command line and HTTP API configuration.
//!
//! Chain settings live in `forgechain::ChainConfig` and are loaded from the
//! optional TOML file plus `FORGECHAIN__*` environment variables. The
//! command line only points at that file and picks the API address.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;

/// Forgechain node.
#[derive(Debug, Parser)]
#[command(name = "forgechain-node", version, about)]
pub struct Args {
    /// TOML chain configuration file.
    #[arg(short, long, env = "FORGECHAIN_CONFIG")]
    pub config: Option<PathBuf>,

    /// Address the peer and forging API listens on.
    #[arg(long, default_value = "0.0.0.0:8081")]
    pub listen: SocketAddr,
}

/// Configuration for the node's HTTP server.
#[derive(Clone, Debug)]
pub struct ApiConfig {
    /// Address to bind the HTTP server to.
    pub listen_addr: SocketAddr,
}

impl From<&Args> for ApiConfig {
    fn from(args: &Args) -> Self {
        Self {
            listen_addr: args.listen,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_listen_on_all_interfaces() {
        let args = Args::parse_from(["forgechain-node"]);
        assert!(args.config.is_none());
        assert_eq!(ApiConfig::from(&args).listen_addr.port(), 8081);
    }

    #[test]
    fn config_path_and_listen_address() {
        let args = Args::parse_from([
            "forgechain-node",
            "--config",
            "node.toml",
            "--listen",
            "127.0.0.1:9000",
        ]);
        assert_eq!(args.config, Some(PathBuf::from("node.toml")));
        assert_eq!(args.listen.to_string(), "127.0.0.1:9000");
    }
}
