//! Definitions of CLI arguments and commands for the deploy scripts

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::{
    commands::{deploy, status},
    config::DeployConfig,
    constants::{
        DEFAULT_ARTIFACTS_DIR, DEFAULT_CONFIRMATION_TIMEOUT, DEFAULT_DEPLOYMENTS_DIR,
        DEFAULT_NUM_CONFIRMATIONS, EXPLORER_API_KEY_ENV_VAR, PRIVATE_KEY_ENV_VAR,
    },
    errors::DeployError,
    networks::Network,
};

/// Deploys and upgrades contracts behind transparent upgradeable proxies
#[derive(Parser)]
#[command(version)]
pub struct Cli {
    #[command(flatten)]
    pub args: NetworkArgs,

    /// Log at debug level
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// Where to deploy, and with which credentials
#[derive(Args, Clone, Debug)]
pub struct NetworkArgs {
    /// The network to deploy to
    #[arg(short, long, value_enum, default_value_t = Network::Alfajores)]
    pub network: Network,

    /// Network RPC URL, overriding the network's public endpoint
    #[arg(short, long)]
    pub rpc_url: Option<String>,

    /// Root directory of the deployment ledger
    #[arg(long, default_value = DEFAULT_DEPLOYMENTS_DIR)]
    pub deployments_dir: PathBuf,

    /// Directory holding the compiled contract artifacts
    #[arg(long, default_value = DEFAULT_ARTIFACTS_DIR)]
    pub artifacts_dir: PathBuf,

    /// Confirmations to wait for after each transaction
    #[arg(long, default_value_t = DEFAULT_NUM_CONFIRMATIONS)]
    pub confirmations: u64,

    /// Seconds to wait for a transaction's confirmations before giving up
    #[arg(long, default_value_t = DEFAULT_CONFIRMATION_TIMEOUT.as_secs())]
    pub confirmation_timeout_secs: u64,

    /// Private key of the deployer
    #[arg(long, env = PRIVATE_KEY_ENV_VAR, hide_env_values = true)]
    pub private_key: Option<String>,

    /// API key of the network's block explorer
    #[arg(long, env = EXPLORER_API_KEY_ENV_VAR, hide_env_values = true)]
    pub explorer_api_key: Option<String>,
}

/// The deploy script commands
#[derive(Subcommand)]
pub enum Command {
    /// Deploy or upgrade the registered contracts
    Deploy(DeployArgs),
    /// Print the deployment ledger of the network
    Status,
}

/// Deploy every registered task matching the given tags.
///
/// Each contract is deployed behind a [`TransparentUpgradeableProxy`](https://docs.openzeppelin.com/contracts/4.x/api/proxy#TransparentUpgradeableProxy)
/// administered by a single `ProxyAdmin` owned by the deployer. Contracts
/// whose artifact changed since the last run are upgraded in place; unchanged
/// contracts are left alone.
#[derive(Args)]
pub struct DeployArgs {
    /// Only run tasks carrying one of these tags; all tasks if none are given
    #[arg(short, long, value_delimiter = ',')]
    pub tags: Vec<String>,
}

impl Command {
    /// Run the command against the network described by `args`
    pub async fn run(self, args: NetworkArgs) -> Result<(), DeployError> {
        match self {
            Command::Deploy(deploy_args) => {
                let config = DeployConfig::from_args(&args)?;
                let summary = deploy(deploy_args, &config).await?;
                println!("{summary}");
                Ok(())
            }
            Command::Status => status(&args),
        }
    }
}
