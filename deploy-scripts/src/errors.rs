//! Definitions of errors that can occur during deployment of the contracts

use std::time::Duration;

use alloy::primitives::TxHash;

/// Errors that can occur while deploying or upgrading a proxied contract
#[derive(Debug, thiserror::Error)]
pub enum DeployError {
    /// A required credential or network parameter is missing or invalid.
    /// Raised before any chain interaction is attempted.
    #[error("configuration error: {0}")]
    Configuration(String),
    /// Error signing or submitting a transaction, or any other RPC failure
    #[error("error submitting to chain: {0}")]
    ChainSubmission(String),
    /// A transaction was mined but reverted
    #[error(
        "transaction {tx_hash} reverted: {}",
        .reason.as_deref().unwrap_or("no revert reason available")
    )]
    TransactionReverted {
        /// The hash of the reverted transaction
        tx_hash: TxHash,
        /// The revert reason, if the chain reported one
        reason: Option<String>,
    },
    /// A transaction did not reach the confirmation depth before the deadline
    #[error("timed out after {waited:?} waiting for confirmations of {tx_hash}")]
    ChainTimeout {
        /// The hash of the unconfirmed transaction
        tx_hash: TxHash,
        /// How long we waited before giving up
        waited: Duration,
    },
    /// The chain no longer knows about a submitted transaction (dropped or replaced)
    #[error("transaction {tx_hash} was dropped or replaced")]
    TransactionLost {
        /// The hash of the lost transaction
        tx_hash: TxHash,
    },
    /// A contract creation receipt did not carry the created address
    #[error("no contract address in receipt for {0}")]
    MissingContractAddress(TxHash),
    /// Error reading or writing the deployment ledger
    #[error("ledger error: {0}")]
    Ledger(String),
    /// Error parsing a compiled contract artifact
    #[error("error parsing artifact: {0}")]
    ArtifactParsing(String),
    /// Error constructing calldata for a constructor or contract method
    #[error("error constructing calldata: {0}")]
    CalldataConstruction(String),
}

impl DeployError {
    /// Wrap an RPC / transport failure
    pub fn chain(e: impl std::fmt::Display) -> Self {
        DeployError::ChainSubmission(e.to_string())
    }

    /// Wrap a ledger I/O or serialization failure
    pub fn ledger(e: impl std::fmt::Display) -> Self {
        DeployError::Ledger(e.to_string())
    }
}
