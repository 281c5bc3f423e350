//! A [`ChainClient`] backed by an alloy JSON-RPC provider

use alloy::{
    eips::BlockId,
    network::TransactionBuilder,
    primitives::{Address, Bytes, TxHash, B256, U256},
    providers::{DynProvider, Provider, ProviderBuilder},
    rpc::types::TransactionRequest,
    signers::local::PrivateKeySigner,
    sol_types::decode_revert_reason,
    transports::{http::reqwest::Url, RpcError, TransportError},
};
use tracing::debug;

use super::{ChainClient, Receipt, ReceiptStatus, Submission};
use crate::errors::DeployError;

/// A chain client signing with a local private key and talking HTTP JSON-RPC
#[derive(Clone)]
pub struct RpcChainClient {
    /// The signing provider
    provider: DynProvider,
    /// The address of the signer
    signer: Address,
}

impl RpcChainClient {
    /// Connect to `rpc_url`, signing transactions with `signer`
    pub fn connect(rpc_url: &str, signer: PrivateKeySigner) -> Result<Self, DeployError> {
        let url: Url = rpc_url
            .parse()
            .map_err(|e| DeployError::Configuration(format!("invalid RPC URL `{rpc_url}`: {e}")))?;
        let address = signer.address();
        let provider = ProviderBuilder::new().wallet(signer).connect_http(url);

        Ok(Self {
            provider: DynProvider::new(provider),
            signer: address,
        })
    }

    /// Submit a transaction request, returning its hash once the node accepted it
    async fn submit(&self, tx: TransactionRequest) -> Result<TxHash, DeployError> {
        let pending = self.provider.send_transaction(tx).await.map_err(submission_error)?;
        let tx_hash = *pending.tx_hash();
        debug!("submitted transaction {tx_hash:#x}");
        Ok(tx_hash)
    }
}

impl ChainClient for RpcChainClient {
    fn signer_address(&self) -> Address {
        self.signer
    }

    async fn chain_id(&self) -> Result<u64, DeployError> {
        self.provider.get_chain_id().await.map_err(DeployError::chain)
    }

    async fn block_number(&self) -> Result<u64, DeployError> {
        self.provider.get_block_number().await.map_err(DeployError::chain)
    }

    async fn deploy_contract(
        &self,
        bytecode: &Bytes,
        args: &Bytes,
    ) -> Result<Submission, DeployError> {
        // Pin the nonce so that the created address is known before inclusion
        let nonce = self
            .provider
            .get_transaction_count(self.signer)
            .pending()
            .await
            .map_err(DeployError::chain)?;

        let mut code = bytecode.to_vec();
        code.extend_from_slice(args);
        let tx = TransactionRequest::default()
            .with_from(self.signer)
            .with_nonce(nonce)
            .with_deploy_code(code);

        let tx_hash = self.submit(tx).await?;
        Ok(Submission {
            tx_hash,
            contract_address: Some(self.signer.create(nonce)),
        })
    }

    async fn send_transaction(&self, to: Address, data: Bytes) -> Result<TxHash, DeployError> {
        let tx = TransactionRequest::default()
            .with_from(self.signer)
            .with_to(to)
            .with_input(data);
        self.submit(tx).await
    }

    async fn get_receipt(&self, tx_hash: TxHash) -> Result<ReceiptStatus, DeployError> {
        let maybe_receipt = self
            .provider
            .get_transaction_receipt(tx_hash)
            .await
            .map_err(DeployError::chain)?;

        if let Some(receipt) = maybe_receipt {
            // A receipt without a block number belongs to a pending block
            let Some(block_number) = receipt.block_number else {
                return Ok(ReceiptStatus::Pending);
            };
            return Ok(ReceiptStatus::Included(Receipt {
                tx_hash,
                block_number,
                success: receipt.status(),
                contract_address: receipt.contract_address,
                gas_used: receipt.gas_used,
            }));
        }

        // No receipt: the transaction is either in the mempool or gone
        let known = self
            .provider
            .get_transaction_by_hash(tx_hash)
            .await
            .map_err(DeployError::chain)?
            .is_some();
        Ok(if known { ReceiptStatus::Pending } else { ReceiptStatus::Dropped })
    }

    async fn read_storage(&self, address: Address, slot: B256) -> Result<B256, DeployError> {
        let value = self
            .provider
            .get_storage_at(address, U256::from_be_bytes(slot.0))
            .await
            .map_err(DeployError::chain)?;
        Ok(B256::from(value.to_be_bytes::<32>()))
    }

    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes, DeployError> {
        let tx = TransactionRequest::default().with_to(to).with_input(data);
        self.provider.call(tx).await.map_err(DeployError::chain)
    }

    async fn revert_reason(&self, receipt: &Receipt) -> Result<Option<String>, DeployError> {
        let Some(tx) = self
            .provider
            .get_transaction_by_hash(receipt.tx_hash)
            .await
            .map_err(DeployError::chain)?
        else {
            return Ok(None);
        };

        // Replay the transaction on top of the state it was executed against
        let parent = BlockId::number(receipt.block_number.saturating_sub(1));
        match self.provider.call(tx.into_request()).block(parent).await {
            Ok(_) => Ok(None),
            Err(RpcError::ErrorResp(payload)) => {
                let reason = payload
                    .as_revert_data()
                    .and_then(|data| decode_revert_reason(&data))
                    .unwrap_or(payload.message.to_string());
                Ok(Some(reason))
            }
            Err(e) => Err(DeployError::chain(e)),
        }
    }
}

/// Surface the node's error message when it rejects a transaction
fn submission_error(err: TransportError) -> DeployError {
    match err {
        RpcError::ErrorResp(payload) => {
            let data = payload.data.map(|d| d.to_string()).unwrap_or_default();
            DeployError::ChainSubmission(format!("{} (data = {data})", payload.message))
        }
        err => DeployError::chain(err),
    }
}
