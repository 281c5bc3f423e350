//! Validated configuration of a deployment run
//!
//! Everything the run needs from the command line and the environment is
//! checked here, once, before any chain interaction.

use std::{fmt, path::PathBuf, str::FromStr, time::Duration};

use alloy::{signers::local::PrivateKeySigner, transports::http::reqwest::Url};

use crate::{
    cli::NetworkArgs,
    confirmations::ConfirmationWaiter,
    constants::{DEFAULT_POLL_INTERVAL, EXPLORER_API_KEY_ENV_VAR, PRIVATE_KEY_ENV_VAR},
    errors::DeployError,
    networks::Network,
};

/// The immutable configuration of a deployment run
#[derive(Clone)]
pub struct DeployConfig {
    /// The target network
    pub network: Network,
    /// The RPC endpoint of the network
    pub rpc_url: String,
    /// The deployer's signing key
    pub signer: PrivateKeySigner,
    /// The block explorer API key
    pub explorer_api_key: String,
    /// The root of the deployment ledger
    pub deployments_dir: PathBuf,
    /// The directory holding compiled artifacts
    pub artifacts_dir: PathBuf,
    /// The confirmation depth for every transaction
    pub confirmations: u64,
    /// How long to wait for a single transaction's confirmations
    pub confirmation_timeout: Duration,
    /// The delay between confirmation polls
    pub poll_interval: Duration,
}

impl DeployConfig {
    /// Validate the parsed arguments into a configuration
    pub fn from_args(args: &NetworkArgs) -> Result<Self, DeployError> {
        let private_key = required(args.private_key.as_deref(), PRIVATE_KEY_ENV_VAR)?;
        let signer = PrivateKeySigner::from_str(private_key).map_err(|e| {
            DeployError::Configuration(format!("invalid {PRIVATE_KEY_ENV_VAR}: {e}"))
        })?;
        let explorer_api_key =
            required(args.explorer_api_key.as_deref(), EXPLORER_API_KEY_ENV_VAR)?.to_string();

        let rpc_url = args
            .rpc_url
            .clone()
            .unwrap_or_else(|| args.network.default_rpc_url().to_string());
        Url::parse(&rpc_url)
            .map_err(|e| DeployError::Configuration(format!("invalid RPC URL `{rpc_url}`: {e}")))?;

        if args.confirmations == 0 {
            return Err(DeployError::Configuration(
                "--confirmations must be at least 1".to_string(),
            ));
        }

        Ok(Self {
            network: args.network,
            rpc_url,
            signer,
            explorer_api_key,
            deployments_dir: args.deployments_dir.clone(),
            artifacts_dir: args.artifacts_dir.clone(),
            confirmations: args.confirmations,
            confirmation_timeout: Duration::from_secs(args.confirmation_timeout_secs),
            poll_interval: DEFAULT_POLL_INTERVAL,
        })
    }

    /// The waiter polling for this run's confirmations
    pub fn waiter(&self) -> ConfirmationWaiter {
        ConfirmationWaiter::new(self.confirmation_timeout, self.poll_interval)
    }
}

impl fmt::Debug for DeployConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeployConfig")
            .field("network", &self.network)
            .field("rpc_url", &self.rpc_url)
            .field("deployer", &self.signer.address())
            .field("deployments_dir", &self.deployments_dir)
            .field("artifacts_dir", &self.artifacts_dir)
            .field("confirmations", &self.confirmations)
            .field("confirmation_timeout", &self.confirmation_timeout)
            .finish_non_exhaustive()
    }
}

/// A non-empty credential, or a configuration error naming its variable
fn required<'a>(value: Option<&'a str>, var: &str) -> Result<&'a str, DeployError> {
    match value.map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(DeployError::Configuration(format!("{var} is not set"))),
    }
}
