//! Constants used in the deploy scripts

use std::time::Duration;

use alloy::primitives::{b256, B256};

/// The name of the transparent proxy artifact in the artifacts directory
pub const PROXY_ARTIFACT_NAME: &str = "TransparentUpgradeableProxy";

/// The name of the proxy admin artifact in the artifacts directory
pub const PROXY_ADMIN_ARTIFACT_NAME: &str = "ProxyAdmin";

/// The ledger name under which the shared proxy admin is recorded
pub const DEFAULT_PROXY_ADMIN_NAME: &str = "DefaultProxyAdmin";

/// The suffix appended to a contract name for its implementation ledger record
pub const IMPLEMENTATION_SUFFIX: &str = "_Implementation";

/// The extension of artifact and ledger files
pub const JSON_EXTENSION: &str = "json";

/// The file in each network's ledger directory holding the chain ID
pub const CHAIN_ID_FILE: &str = ".chainId";

/// The file in each network's ledger directory holding submitted but
/// unconfirmed transactions
pub const PENDING_TRANSACTIONS_FILE: &str = ".pendingTransactions";

/// The default directory holding the deployment ledger
pub const DEFAULT_DEPLOYMENTS_DIR: &str = "deployments";

/// The default directory holding compiled contract artifacts
pub const DEFAULT_ARTIFACTS_DIR: &str = "artifacts";

/// The number of confirmations to wait for each transaction
pub const DEFAULT_NUM_CONFIRMATIONS: u64 = 1;

/// How long to wait for a transaction to reach its confirmation depth
pub const DEFAULT_CONFIRMATION_TIMEOUT: Duration = Duration::from_secs(300);

/// How often to poll the chain while waiting for confirmations
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// The environment variable holding the deployer's private key
pub const PRIVATE_KEY_ENV_VAR: &str = "PRIVATE_KEY";

/// The environment variable holding the block explorer API key
pub const EXPLORER_API_KEY_ENV_VAR: &str = "CELOSCAN_API_KEY";

/// The storage slot containing the implementation address in an upgradeable proxy.
///
/// This is specified in EIP1967: https://eips.ethereum.org/EIPS/eip-1967#logic-contract-address
pub const PROXY_IMPLEMENTATION_STORAGE_SLOT: B256 =
    b256!("360894a13ba1a3210667c828492db98dca3e2076cc3735a920a3ca505d382bbc");

/// The storage slot containing the proxy admin contract address in the upgradeable proxy.
///
/// This is specified in EIP1967: https://eips.ethereum.org/EIPS/eip-1967#admin-address
pub const PROXY_ADMIN_STORAGE_SLOT: B256 =
    b256!("b53127684a568b3173ae13b9f8a6016e243e63b6e8ee1178d6a717850b5d6103");

/// The number of bytes stored in a single storage slot
pub const NUM_BYTES_STORAGE_SLOT: usize = 32;

/// The number of bytes in an Ethereum address
pub const NUM_BYTES_ADDRESS: usize = 20;
