//! On-chain writes issued by the orchestrator
//!
//! Each write is a [`ChainCommand`] with a pre-check, deciding whether the
//! chain already reflects its effect, and a post-check, a receipt buried at the
//! configured confirmation depth.
//!
//! A submission is remembered in the ledger until its outcome is observed. A
//! command that finds an unresolved submission of an earlier run settles it
//! before sending anything new, so an interrupted or timed out run never
//! leaves two copies of the same transaction in flight.

use std::fmt::{self, Display};

use alloy::primitives::{keccak256, Address, Bytes, TxHash, B256};
use tracing::{info, warn};

use crate::{
    calldata::upgrade_calldata,
    chain::{read_address_from_slot, ChainClient, Receipt},
    confirmations::ConfirmationWaiter,
    constants::PROXY_IMPLEMENTATION_STORAGE_SLOT,
    errors::DeployError,
    ledger::{Ledger, PendingTransaction},
};

/// A single state-changing transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainCommand {
    /// Create a contract
    Deploy {
        /// A human readable name for logs
        label: String,
        /// The creation bytecode
        bytecode: Bytes,
        /// The encoded constructor arguments
        args: Bytes,
    },
    /// Re-point a proxy through its admin, optionally calling the new implementation
    Upgrade {
        /// The proxy admin
        admin: Address,
        /// The proxy to upgrade
        proxy: Address,
        /// The implementation to point the proxy at
        implementation: Address,
        /// Calldata delegate-called into the new implementation, if any
        call: Option<Bytes>,
    },
}

/// A confirmed command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Executed {
    /// The confirmed receipt
    pub receipt: Receipt,
    /// The contract created by the command, for deployments
    pub contract_address: Option<Address>,
}

/// The ledger entry holding a command's unconfirmed submission
struct PendingEntry<'a, L> {
    ledger: &'a L,
    network: &'a str,
    key: String,
}

impl<L: Ledger> PendingEntry<'_, L> {
    fn load(&self) -> Result<Option<PendingTransaction>, DeployError> {
        self.ledger.pending(&self.key, self.network)
    }

    fn store(&self, tx: &PendingTransaction) -> Result<(), DeployError> {
        self.ledger.set_pending(&self.key, self.network, Some(tx))
    }

    fn clear(&self) -> Result<(), DeployError> {
        self.ledger.set_pending(&self.key, self.network, None)
    }
}

impl ChainCommand {
    /// The ledger key under which an unconfirmed submission of this command is kept.
    ///
    /// Upgrades are keyed by proxy: whatever upgrade of a proxy is still in
    /// flight must be settled before the proxy is upgraded again.
    pub fn pending_key(&self) -> String {
        match self {
            ChainCommand::Deploy { label, .. } => label.clone(),
            ChainCommand::Upgrade { proxy, .. } => format!("upgrade {proxy}"),
        }
    }

    /// The digest of everything this command submits
    pub fn payload(&self) -> B256 {
        match self {
            ChainCommand::Deploy { bytecode, args, .. } => {
                keccak256([&bytecode[..], &args[..]].concat())
            }
            ChainCommand::Upgrade { admin, proxy, implementation, call } => {
                let data = upgrade_calldata(*proxy, *implementation, call.as_ref());
                keccak256([admin.as_slice(), &data[..]].concat())
            }
        }
    }

    /// Whether the chain already reflects this command's effect.
    ///
    /// Deployments always create a new contract. An upgrade without a call is
    /// satisfied when the proxy already points at the target; an upgrade with
    /// a call must always execute the call.
    pub async fn already_satisfied<C: ChainClient>(&self, client: &C) -> Result<bool, DeployError> {
        match self {
            ChainCommand::Deploy { .. } => Ok(false),
            ChainCommand::Upgrade { call: Some(_), .. } => Ok(false),
            ChainCommand::Upgrade { proxy, implementation, call: None, .. } => {
                let current =
                    read_address_from_slot(client, *proxy, PROXY_IMPLEMENTATION_STORAGE_SLOT)
                        .await?;
                Ok(current == *implementation)
            }
        }
    }

    /// Submit the command, returning the transaction hash and the address a
    /// deployment will occupy
    pub async fn submit<C: ChainClient>(
        &self,
        client: &C,
    ) -> Result<(TxHash, Option<Address>), DeployError> {
        match self {
            ChainCommand::Deploy { bytecode, args, .. } => {
                let submission = client.deploy_contract(bytecode, args).await?;
                Ok((submission.tx_hash, submission.contract_address))
            }
            ChainCommand::Upgrade { admin, proxy, implementation, call } => {
                let data = upgrade_calldata(*proxy, *implementation, call.as_ref());
                let tx_hash = client.send_transaction(*admin, data).await?;
                Ok((tx_hash, None))
            }
        }
    }

    /// Submit the command and wait for `min_confirmations`.
    ///
    /// An unconfirmed submission recorded in `ledger` by an earlier run is
    /// settled first. If it turns out to be this very command, its result is
    /// returned and nothing is submitted. Returns `None` without submitting
    /// anything if the pre-check finds the command already satisfied.
    pub async fn execute<C: ChainClient, L: Ledger>(
        &self,
        client: &C,
        ledger: &L,
        network: &str,
        waiter: &ConfirmationWaiter,
        min_confirmations: u64,
    ) -> Result<Option<Executed>, DeployError> {
        let entry = PendingEntry { ledger, network, key: self.pending_key() };
        if let Some(pending) = entry.load()? {
            let resumed = self.resume(client, &entry, pending, waiter, min_confirmations).await?;
            if resumed.is_some() {
                return Ok(resumed);
            }
        }

        if self.already_satisfied(client).await? {
            info!("{self}: already applied on chain, skipping");
            return Ok(None);
        }

        let (tx_hash, contract_address) = self.submit(client).await?;
        info!("{self}: submitted {tx_hash:#x}");
        let pending = PendingTransaction { tx_hash, contract_address, payload: self.payload() };
        entry.store(&pending)?;

        let executed = self.settle(client, &entry, pending, waiter, min_confirmations).await?;
        Ok(Some(executed))
    }

    /// Settle the submission an earlier run left unconfirmed.
    ///
    /// Returns its result if it carried this command's payload, or `None` when
    /// it failed or carried another payload and this command still has to be
    /// submitted. A submission that is still pending is a timeout.
    async fn resume<C: ChainClient, L: Ledger>(
        &self,
        client: &C,
        entry: &PendingEntry<'_, L>,
        pending: PendingTransaction,
        waiter: &ConfirmationWaiter,
        min_confirmations: u64,
    ) -> Result<Option<Executed>, DeployError> {
        info!("{self}: resuming unconfirmed transaction {:#x}", pending.tx_hash);
        match self.settle(client, entry, pending, waiter, min_confirmations).await {
            Ok(executed) if pending.payload == self.payload() => Ok(Some(executed)),
            Ok(_) => {
                let tx_hash = pending.tx_hash;
                warn!("{self}: earlier transaction {tx_hash:#x} carried a different payload");
                Ok(None)
            }
            Err(
                e @ (DeployError::TransactionReverted { .. } | DeployError::TransactionLost { .. }),
            ) => {
                warn!("{self}: {e}, submitting again");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Wait for a recorded submission, forgetting it once its outcome is known
    async fn settle<C: ChainClient, L: Ledger>(
        &self,
        client: &C,
        entry: &PendingEntry<'_, L>,
        pending: PendingTransaction,
        waiter: &ConfirmationWaiter,
        min_confirmations: u64,
    ) -> Result<Executed, DeployError> {
        let tx_hash = pending.tx_hash;
        let result = waiter.await_confirmations(client, tx_hash, min_confirmations).await;
        // Timeouts and RPC failures leave the outcome unknown
        if matches!(
            result,
            Ok(_)
                | Err(DeployError::TransactionReverted { .. } | DeployError::TransactionLost { .. })
        ) {
            entry.clear()?;
        }
        let receipt = result?;

        let contract_address = match self {
            ChainCommand::Deploy { .. } => Some(
                receipt
                    .contract_address
                    .or(pending.contract_address)
                    .ok_or(DeployError::MissingContractAddress(tx_hash))?,
            ),
            ChainCommand::Upgrade { .. } => None,
        };

        info!(
            "{self}: confirmed in block {} using {} gas",
            receipt.block_number, receipt.gas_used
        );
        Ok(Executed { receipt, contract_address })
    }
}

impl Display for ChainCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChainCommand::Deploy { label, .. } => write!(f, "deploy {label}"),
            ChainCommand::Upgrade { proxy, implementation, call, .. } => {
                let verb = if call.is_some() { "upgrade and call" } else { "upgrade" };
                write!(f, "{verb} proxy {proxy} to {implementation}")
            }
        }
    }
}
