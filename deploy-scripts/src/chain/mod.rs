//! The capability the deploy scripts need from an EVM chain
//!
//! The orchestrator is written against [`ChainClient`] so that it can be
//! driven by a JSON-RPC endpoint in production and by an in-memory chain in
//! tests.

use alloy::primitives::{Address, Bytes, TxHash, B256};

use crate::{
    constants::{NUM_BYTES_ADDRESS, NUM_BYTES_STORAGE_SLOT},
    errors::DeployError,
};

#[cfg(any(test, feature = "test-helpers"))]
pub mod mock;
pub mod rpc;

/// A transaction accepted by the chain but not yet confirmed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Submission {
    /// The hash of the submitted transaction
    pub tx_hash: TxHash,
    /// The address a contract creation will occupy, if this is one
    pub contract_address: Option<Address>,
}

/// The parts of a transaction receipt the deploy scripts care about
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Receipt {
    /// The hash of the transaction
    pub tx_hash: TxHash,
    /// The block the transaction was included in
    pub block_number: u64,
    /// Whether execution succeeded
    pub success: bool,
    /// The created contract, for contract creations
    pub contract_address: Option<Address>,
    /// The gas consumed by the transaction
    pub gas_used: u64,
}

/// What the chain currently knows about a submitted transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiptStatus {
    /// Known to the chain but not yet included in a block
    Pending,
    /// Included in a block
    Included(Receipt),
    /// Unknown to the chain: dropped from the mempool or replaced
    Dropped,
}

/// The chain operations used by the deployment orchestrator.
///
/// Every method is a single round trip; waiting for confirmations is layered
/// on top by [`crate::confirmations::ConfirmationWaiter`].
#[allow(async_fn_in_trait)]
pub trait ChainClient {
    /// The address of the account signing transactions
    fn signer_address(&self) -> Address;

    /// The chain ID served by the endpoint
    async fn chain_id(&self) -> Result<u64, DeployError>;

    /// The current head block number
    async fn block_number(&self) -> Result<u64, DeployError>;

    /// Submit a contract creation with `bytecode` followed by encoded constructor `args`
    async fn deploy_contract(
        &self,
        bytecode: &Bytes,
        args: &Bytes,
    ) -> Result<Submission, DeployError>;

    /// Submit a call to `to` with the given calldata
    async fn send_transaction(&self, to: Address, data: Bytes) -> Result<TxHash, DeployError>;

    /// Fetch the inclusion status of a transaction
    async fn get_receipt(&self, tx_hash: TxHash) -> Result<ReceiptStatus, DeployError>;

    /// Read a raw storage slot of `address`
    async fn read_storage(&self, address: Address, slot: B256) -> Result<B256, DeployError>;

    /// Execute a read-only call against the latest block
    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes, DeployError>;

    /// The reason a mined transaction reverted, if the chain can tell
    async fn revert_reason(&self, receipt: &Receipt) -> Result<Option<String>, DeployError>;
}

/// Read an address stored right-aligned in a storage slot, e.g. an EIP-1967 slot
pub async fn read_address_from_slot<C: ChainClient>(
    client: &C,
    address: Address,
    slot: B256,
) -> Result<Address, DeployError> {
    let word = client.read_storage(address, slot).await?;
    Ok(Address::from_slice(&word[NUM_BYTES_STORAGE_SLOT - NUM_BYTES_ADDRESS..]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_alignment_in_slot() {
        let address = Address::repeat_byte(0xab);
        let word = B256::left_padding_from(address.as_slice());
        let tail = &word[NUM_BYTES_STORAGE_SLOT - NUM_BYTES_ADDRESS..];
        assert_eq!(Address::from_slice(tail), address);
    }
}
