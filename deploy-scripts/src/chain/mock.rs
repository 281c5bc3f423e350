//! An in-memory chain for exercising the deploy scripts without a node
//!
//! The mock understands exactly the contracts the orchestrator deploys: the
//! transparent proxy and its admin are recognized by their creation bytecode,
//! anything else is treated as an opaque implementation. Each query of the
//! head block produces a new block, so confirmation depths are reached by
//! polling alone.

use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard, PoisonError},
};

use alloy::{
    primitives::{keccak256, Address, Bytes, TxHash, B256},
    sol_types::{SolCall, SolValue},
};

use super::{ChainClient, Receipt, ReceiptStatus, Submission};
use crate::{
    artifact::ProxyArtifacts,
    constants::{PROXY_ADMIN_STORAGE_SLOT, PROXY_IMPLEMENTATION_STORAGE_SLOT},
    errors::DeployError,
    solidity::IProxyAdmin,
};

/// The chain ID reported by a mock chain unless overridden
pub const MOCK_CHAIN_ID: u64 = 31337;

/// Gas charged for every mined transaction
const MOCK_GAS_USED: u64 = 21_000;

/// A contract living on the mock chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockContract {
    /// Opaque runtime code
    Code(Bytes),
    /// A proxy admin with its owner
    ProxyAdmin {
        /// The only account allowed to upgrade through this admin
        owner: Address,
    },
    /// A transparent proxy
    Proxy {
        /// The EIP-1967 implementation pointer
        implementation: Address,
        /// The EIP-1967 admin pointer
        admin: Address,
    },
}

/// How the next submitted transaction should behave
#[derive(Debug, Clone, Default, PartialEq, Eq)]
enum Fault {
    #[default]
    None,
    /// The node rejects the submission
    Reject,
    /// The transaction is mined but reverts with the given reason
    Revert(String),
    /// The transaction disappears from the mempool
    Drop,
    /// The transaction stays pending until [`MockChain::mine_pending`]
    Stall,
}

/// The effect of a transaction, applied when it is mined
#[derive(Debug, Clone)]
enum MockAction {
    Create { address: Address, bytecode: Bytes, args: Bytes },
    Call { sender: Address, to: Address, data: Bytes },
}

#[derive(Debug, Clone)]
struct MockTx {
    nonce: u64,
    action: MockAction,
    block_number: Option<u64>,
    success: bool,
    revert_reason: Option<String>,
    dropped: bool,
}

#[derive(Debug)]
struct MockState {
    chain_id: u64,
    head: u64,
    nonce: u64,
    proxy_code: Bytes,
    admin_code: Bytes,
    contracts: HashMap<Address, MockContract>,
    transactions: HashMap<TxHash, MockTx>,
    initializer_calls: HashMap<Address, Vec<Bytes>>,
    faults: Vec<Fault>,
}

/// An in-memory EVM chain with a single signing account
#[derive(Debug)]
pub struct MockChain {
    signer: Address,
    state: Mutex<MockState>,
}

impl MockChain {
    /// A fresh chain whose proxies and admins use the given artifacts' bytecode
    pub fn new(signer: Address, artifacts: &ProxyArtifacts) -> Self {
        Self {
            signer,
            state: Mutex::new(MockState {
                chain_id: MOCK_CHAIN_ID,
                head: 0,
                nonce: 0,
                proxy_code: artifacts.proxy.bytecode.clone(),
                admin_code: artifacts.proxy_admin.bytecode.clone(),
                contracts: HashMap::new(),
                transactions: HashMap::new(),
                initializer_calls: HashMap::new(),
                faults: Vec::new(),
            }),
        }
    }

    /// Report a different chain ID
    pub fn with_chain_id(self, chain_id: u64) -> Self {
        self.state().chain_id = chain_id;
        self
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // --- Fault injection --- //
    //
    // Faults apply to submissions in the order they were queued.

    /// The next submission behaves normally, used to target a later one
    pub fn succeed_next(&self) {
        self.state().faults.push(Fault::None);
    }

    /// The node rejects the next submission outright
    pub fn reject_next(&self) {
        self.state().faults.push(Fault::Reject);
    }

    /// The next transaction is mined but reverts
    pub fn revert_next(&self) {
        self.revert_next_with("execution reverted");
    }

    /// The next transaction is mined but reverts with `reason`
    pub fn revert_next_with(&self, reason: &str) {
        self.state().faults.push(Fault::Revert(reason.to_string()));
    }

    /// The next transaction is dropped from the mempool
    pub fn drop_next(&self) {
        self.state().faults.push(Fault::Drop);
    }

    /// The next transaction stays pending until [`MockChain::mine_pending`]
    pub fn stall_next(&self) {
        self.state().faults.push(Fault::Stall);
    }

    /// Mine every stalled transaction, in submission order
    pub fn mine_pending(&self) {
        let mut state = self.state();
        let mut stalled: Vec<_> = state
            .transactions
            .iter()
            .filter(|(_, tx)| tx.block_number.is_none() && !tx.dropped)
            .map(|(hash, tx)| (tx.nonce, *hash))
            .collect();
        stalled.sort();

        for (_, tx_hash) in stalled {
            let Some(action) = state.transactions.get(&tx_hash).map(|tx| tx.action.clone())
            else {
                continue;
            };
            state.head += 1;
            let head = state.head;
            let result = state.apply(&action);
            if let Some(tx) = state.transactions.get_mut(&tx_hash) {
                tx.block_number = Some(head);
                tx.success = result.is_ok();
                tx.revert_reason = result.err();
            }
        }
    }

    // --- Inspection and tampering --- //

    /// The number of transactions the chain has accepted
    pub fn transaction_count(&self) -> usize {
        self.state().transactions.len()
    }

    /// The contract at `address`, if any
    pub fn contract_at(&self, address: Address) -> Option<MockContract> {
        self.state().contracts.get(&address).cloned()
    }

    /// Every initializer payload delegate-called through `proxy`, in order
    pub fn initializer_calls(&self, proxy: Address) -> Vec<Bytes> {
        self.state().initializer_calls.get(&proxy).cloned().unwrap_or_default()
    }

    /// The implementation `proxy` currently points at
    pub fn implementation_of(&self, proxy: Address) -> Option<Address> {
        match self.contract_at(proxy) {
            Some(MockContract::Proxy { implementation, .. }) => Some(implementation),
            _ => None,
        }
    }

    /// Point `proxy` at `implementation` without going through its admin
    pub fn set_implementation(&self, proxy: Address, implementation: Address) {
        if let Some(MockContract::Proxy { implementation: current, .. }) =
            self.state().contracts.get_mut(&proxy)
        {
            *current = implementation;
        }
    }

    /// Transfer ownership of the admin at `admin` to `owner`
    pub fn set_admin_owner(&self, admin: Address, owner: Address) {
        if let Some(MockContract::ProxyAdmin { owner: current }) =
            self.state().contracts.get_mut(&admin)
        {
            *current = owner;
        }
    }
}

impl MockState {
    fn next_fault(&mut self) -> Fault {
        if self.faults.is_empty() {
            Fault::None
        } else {
            self.faults.remove(0)
        }
    }

    /// Accept a transaction, mining it into a new block unless a fault intervenes
    fn accept(&mut self, fault: Fault, action: MockAction) -> TxHash {
        let tx_hash = keccak256((self.chain_id, self.nonce).abi_encode());
        let mut tx = MockTx {
            nonce: self.nonce,
            action,
            block_number: None,
            success: false,
            revert_reason: None,
            dropped: fault == Fault::Drop,
        };
        self.nonce += 1;

        match fault {
            Fault::None => {
                self.head += 1;
                tx.block_number = Some(self.head);
                match self.apply(&tx.action) {
                    Ok(()) => tx.success = true,
                    Err(reason) => tx.revert_reason = Some(reason),
                }
            }
            Fault::Revert(reason) => {
                self.head += 1;
                tx.block_number = Some(self.head);
                tx.revert_reason = Some(reason);
            }
            Fault::Reject | Fault::Drop | Fault::Stall => {}
        }

        self.transactions.insert(tx_hash, tx);
        tx_hash
    }

    /// Apply a transaction's effects, returning the revert reason if it fails
    fn apply(&mut self, action: &MockAction) -> Result<(), String> {
        match action {
            MockAction::Create { address, bytecode, args } => self.create(*address, bytecode, args),
            MockAction::Call { sender, to, data } => self.execute_call(*sender, *to, data),
        }
    }

    fn create(&mut self, address: Address, bytecode: &Bytes, args: &Bytes) -> Result<(), String> {
        let contract = if *bytecode == self.proxy_code {
            let (implementation, admin, data) =
                <(Address, Address, Bytes)>::abi_decode_params(args)
                    .map_err(|_| "invalid proxy constructor arguments".to_string())?;
            if !data.is_empty() {
                self.initializer_calls.entry(address).or_default().push(data);
            }
            MockContract::Proxy { implementation, admin }
        } else if *bytecode == self.admin_code {
            let owner = Address::abi_decode(args)
                .map_err(|_| "invalid proxy admin constructor arguments".to_string())?;
            MockContract::ProxyAdmin { owner }
        } else {
            MockContract::Code(bytecode.clone())
        };

        self.contracts.insert(address, contract);
        Ok(())
    }

    fn execute_call(&mut self, sender: Address, to: Address, data: &Bytes) -> Result<(), String> {
        let Some(MockContract::ProxyAdmin { owner }) = self.contracts.get(&to) else {
            return Err(format!("no proxy admin at {to}"));
        };
        if *owner != sender {
            return Err("Ownable: caller is not the owner".to_string());
        }

        let (proxy, implementation, init) =
            if let Ok(call) = IProxyAdmin::upgradeCall::abi_decode(data) {
                (call.proxy, call.implementation, None)
            } else if let Ok(call) = IProxyAdmin::upgradeAndCallCall::abi_decode(data) {
                (call.proxy, call.implementation, Some(call.data))
            } else {
                return Err("unknown selector".to_string());
            };

        match self.contracts.get_mut(&proxy) {
            Some(MockContract::Proxy { implementation: current, admin }) if *admin == to => {
                *current = implementation;
            }
            _ => return Err(format!("{proxy} is not a proxy administered by {to}")),
        }
        if let Some(init) = init.filter(|d| !d.is_empty()) {
            self.initializer_calls.entry(proxy).or_default().push(init);
        }
        Ok(())
    }
}

impl ChainClient for MockChain {
    fn signer_address(&self) -> Address {
        self.signer
    }

    async fn chain_id(&self) -> Result<u64, DeployError> {
        Ok(self.state().chain_id)
    }

    async fn block_number(&self) -> Result<u64, DeployError> {
        let mut state = self.state();
        state.head += 1;
        Ok(state.head)
    }

    async fn deploy_contract(
        &self,
        bytecode: &Bytes,
        args: &Bytes,
    ) -> Result<Submission, DeployError> {
        let mut state = self.state();
        let fault = state.next_fault();
        if fault == Fault::Reject {
            return Err(DeployError::ChainSubmission("insufficient funds for gas".to_string()));
        }

        let address = self.signer.create(state.nonce);
        let action =
            MockAction::Create { address, bytecode: bytecode.clone(), args: args.clone() };
        let tx_hash = state.accept(fault, action);
        Ok(Submission { tx_hash, contract_address: Some(address) })
    }

    async fn send_transaction(&self, to: Address, data: Bytes) -> Result<TxHash, DeployError> {
        let mut state = self.state();
        let fault = state.next_fault();
        if fault == Fault::Reject {
            return Err(DeployError::ChainSubmission("insufficient funds for gas".to_string()));
        }

        let action = MockAction::Call { sender: self.signer, to, data };
        Ok(state.accept(fault, action))
    }

    async fn get_receipt(&self, tx_hash: TxHash) -> Result<ReceiptStatus, DeployError> {
        let state = self.state();
        let Some(tx) = state.transactions.get(&tx_hash) else {
            return Ok(ReceiptStatus::Dropped);
        };
        if tx.dropped {
            return Ok(ReceiptStatus::Dropped);
        }

        Ok(match tx.block_number {
            None => ReceiptStatus::Pending,
            Some(block_number) => ReceiptStatus::Included(Receipt {
                tx_hash,
                block_number,
                success: tx.success,
                contract_address: match &tx.action {
                    MockAction::Create { address, .. } if tx.success => Some(*address),
                    _ => None,
                },
                gas_used: MOCK_GAS_USED,
            }),
        })
    }

    async fn read_storage(&self, address: Address, slot: B256) -> Result<B256, DeployError> {
        let value = match self.state().contracts.get(&address) {
            Some(MockContract::Proxy { implementation, .. })
                if slot == PROXY_IMPLEMENTATION_STORAGE_SLOT =>
            {
                B256::left_padding_from(implementation.as_slice())
            }
            Some(MockContract::Proxy { admin, .. }) if slot == PROXY_ADMIN_STORAGE_SLOT => {
                B256::left_padding_from(admin.as_slice())
            }
            _ => B256::ZERO,
        };
        Ok(value)
    }

    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes, DeployError> {
        match self.state().contracts.get(&to) {
            Some(MockContract::ProxyAdmin { owner })
                if data.starts_with(&IProxyAdmin::ownerCall::SELECTOR) =>
            {
                Ok(owner.abi_encode().into())
            }
            Some(_) => Err(DeployError::ChainSubmission("execution reverted".to_string())),
            // Calls to accounts without code succeed with empty return data
            None => Ok(Bytes::new()),
        }
    }

    async fn revert_reason(&self, receipt: &Receipt) -> Result<Option<String>, DeployError> {
        let state = self.state();
        Ok(state.transactions.get(&receipt.tx_hash).and_then(|tx| tx.revert_reason.clone()))
    }
}
