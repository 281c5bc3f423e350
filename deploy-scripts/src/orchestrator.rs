//! Deployment of contracts behind transparent upgradeable proxies
//!
//! For each task the orchestrator compares the compiled artifact against the
//! ledger and decides between three paths:
//! - no record: deploy the implementation, resolve the shared proxy admin and
//!   create the proxy with the initializer bundled into its constructor
//! - a record with a different fingerprint: deploy the new implementation and
//!   upgrade the existing proxy through its admin
//! - a record with the same fingerprint: verify the proxy still points at the
//!   recorded implementation, repairing it if it does not
//!
//! The logical record is committed only after every transaction it depends on
//! is confirmed. Confirmed implementations and admins are committed under
//! their own names as soon as they exist, so that a failed run can be resumed
//! without redeploying them.

use std::fmt::{self, Display};

use alloy::{
    json_abi::JsonAbi,
    primitives::{Address, Bytes, TxHash},
    sol_types::{SolCall, SolValue},
};
use tracing::{info, warn};

use crate::{
    artifact::{ContractArtifact, Fingerprint, ProxyArtifacts},
    calldata::{
        encode_constructor_args, encode_initializer, proxy_admin_constructor_args,
        proxy_constructor_args,
    },
    chain::{read_address_from_slot, ChainClient, Receipt},
    confirmations::ConfirmationWaiter,
    constants::{
        DEFAULT_PROXY_ADMIN_NAME, IMPLEMENTATION_SUFFIX, PROXY_ADMIN_STORAGE_SLOT,
        PROXY_IMPLEMENTATION_STORAGE_SLOT,
    },
    errors::DeployError,
    ledger::{fingerprint_matches, DeploymentRecord, Ledger, ProxySet},
    operations::{ChainCommand, Executed},
    solidity::IProxyAdmin,
    tasks::DeployTask,
};

/// The states a deployment passes through
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeploymentState {
    /// No record exists for the contract
    Absent,
    /// The current artifact has no confirmed implementation
    ImplementationNeeded,
    /// An implementation with the current fingerprint is confirmed on chain
    ImplementationDeployed,
    /// A proxy admin owned by the deployer is known
    ProxyAdminResolved,
    /// The proxy is confirmed on chain
    ProxyDeployed,
    /// The initializer has executed through the proxy
    Initialized,
    /// The final transaction reached the confirmation depth
    Confirmed,
    /// The ledger reflects the chain
    Recorded,
}

/// What a deployment run did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeploymentKind {
    /// A new proxy was created
    Fresh,
    /// The proxy was upgraded to a new implementation
    Upgraded,
    /// The proxy was re-pointed at the recorded implementation
    Repaired,
    /// The chain already matched the ledger
    Unchanged,
}

impl Display for DeploymentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DeploymentKind::Fresh => "deployed",
            DeploymentKind::Upgraded => "upgraded",
            DeploymentKind::Repaired => "repaired",
            DeploymentKind::Unchanged => "unchanged",
        };
        f.write_str(s)
    }
}

/// The result of a successful deployment run
#[derive(Debug, Clone)]
pub struct DeploymentOutcome {
    /// What the run did
    pub kind: DeploymentKind,
    /// The committed record of the logical contract
    pub record: DeploymentRecord,
    /// Every transaction the run confirmed, in submission order
    pub transactions: Vec<TxHash>,
    /// The states visited, in order
    pub states: Vec<DeploymentState>,
}

/// Parameters shared by every task of a run
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// The network name under which records are stored
    pub network: String,
    /// The confirmation depth required before anything is committed
    pub confirmations: u64,
    /// How to wait for confirmations
    pub waiter: ConfirmationWaiter,
}

/// Drives deployments against a chain, recording results in a ledger
pub struct Orchestrator<'a, C, L> {
    client: &'a C,
    ledger: &'a L,
    config: OrchestratorConfig,
}

/// The inputs of a single task, encoded against its artifact
struct Prepared<'a> {
    name: &'a str,
    artifact: &'a ContractArtifact,
    constructor_args: Bytes,
    init_calldata: Option<Bytes>,
    fingerprint: Fingerprint,
}

/// Bookkeeping of a single run
#[derive(Default)]
struct Trace {
    states: Vec<DeploymentState>,
    transactions: Vec<TxHash>,
}

impl Trace {
    fn enter(&mut self, name: &str, state: DeploymentState) {
        info!("{name}: {state:?}");
        self.states.push(state);
    }
}

impl<'a, C: ChainClient, L: Ledger> Orchestrator<'a, C, L> {
    /// Construct an orchestrator
    pub fn new(client: &'a C, ledger: &'a L, config: OrchestratorConfig) -> Self {
        Self { client, ledger, config }
    }

    /// Bring `task` to its target state on chain and in the ledger
    pub async fn deploy(
        &self,
        task: &DeployTask,
        artifact: &ContractArtifact,
        proxy_artifacts: &ProxyArtifacts,
    ) -> Result<DeploymentOutcome, DeployError> {
        // Encode everything up front so malformed tasks fail before any transaction
        let constructor_args = encode_constructor_args(&artifact.abi, &task.constructor_args)?;
        let init_calldata =
            task.init.as_ref().map(|call| encode_initializer(&artifact.abi, call)).transpose()?;
        let prepared = Prepared {
            name: &task.contract_name,
            artifact,
            fingerprint: artifact.fingerprint(&constructor_args),
            constructor_args,
            init_calldata,
        };

        let mut trace = Trace::default();
        let (kind, record) = match self.ledger.lookup(prepared.name, &self.config.network)? {
            None => {
                trace.enter(prepared.name, DeploymentState::Absent);
                let record = self.deploy_fresh(&prepared, proxy_artifacts, &mut trace).await?;
                (DeploymentKind::Fresh, record)
            }
            Some(record) if fingerprint_matches(&record, &prepared.fingerprint) => {
                self.verify(&prepared, record, &mut trace).await?
            }
            Some(record) => {
                let record = self.upgrade(&prepared, record, &mut trace).await?;
                (DeploymentKind::Upgraded, record)
            }
        };

        Ok(DeploymentOutcome {
            kind,
            record,
            transactions: trace.transactions,
            states: trace.states,
        })
    }

    /// Create the proxy for a contract that has never been deployed
    async fn deploy_fresh(
        &self,
        task: &Prepared<'_>,
        proxy_artifacts: &ProxyArtifacts,
        trace: &mut Trace,
    ) -> Result<DeploymentRecord, DeployError> {
        // Reject a foreign admin before spending anything on the implementation
        let existing_admin = self.existing_admin().await?;

        trace.enter(task.name, DeploymentState::ImplementationNeeded);
        let implementation = self.resolve_implementation(task, trace).await?;
        trace.enter(task.name, DeploymentState::ImplementationDeployed);

        let admin = match existing_admin {
            Some(admin) => admin,
            None => self.deploy_admin(&proxy_artifacts.proxy_admin, trace).await?,
        };
        trace.enter(task.name, DeploymentState::ProxyAdminResolved);

        // The initializer runs inside the proxy's constructor
        let init = task.init_calldata.clone().unwrap_or_default();
        let cmd = ChainCommand::Deploy {
            label: format!("{} proxy", task.name),
            bytecode: proxy_artifacts.proxy.bytecode.clone(),
            args: proxy_constructor_args(implementation, admin, init),
        };
        let executed = self.execute(&cmd, trace).await?.ok_or_else(skipped_deploy)?;
        let proxy = created_address(&executed)?;
        trace.enter(task.name, DeploymentState::ProxyDeployed);
        if task.init_calldata.is_some() {
            trace.enter(task.name, DeploymentState::Initialized);
        }
        trace.enter(task.name, DeploymentState::Confirmed);

        let receipt = &executed.receipt;
        let record = DeploymentRecord {
            proxy: Some(ProxySet { implementation, proxy_admin: admin, proxy }),
            initialized: task.init_calldata.is_some(),
            ..self.new_record(task.name, proxy, task.fingerprint, receipt, &task.artifact.abi)
        };
        self.commit(&record, trace)?;
        Ok(record)
    }

    /// Point an existing proxy at the implementation of a changed artifact
    async fn upgrade(
        &self,
        task: &Prepared<'_>,
        previous: DeploymentRecord,
        trace: &mut Trace,
    ) -> Result<DeploymentRecord, DeployError> {
        let wiring = proxy_wiring(&previous)?;
        info!(
            "{}: fingerprint changed from {} to {}",
            task.name, previous.fingerprint, task.fingerprint
        );
        self.check_proxy_admin(&wiring).await?;

        trace.enter(task.name, DeploymentState::ImplementationNeeded);
        let implementation = self.resolve_implementation(task, trace).await?;
        trace.enter(task.name, DeploymentState::ImplementationDeployed);
        trace.enter(task.name, DeploymentState::ProxyAdminResolved);

        // Only a proxy that was never initialized gets the initializer
        let call = if previous.initialized { None } else { task.init_calldata.clone() };
        let record = DeploymentRecord {
            fingerprint: task.fingerprint,
            abi: task.artifact.abi.clone(),
            ..previous
        };
        self.repoint(task.name, record, wiring, implementation, call, trace).await
    }

    /// Check the proxy of an unchanged artifact, repairing it if it drifted
    async fn verify(
        &self,
        task: &Prepared<'_>,
        record: DeploymentRecord,
        trace: &mut Trace,
    ) -> Result<(DeploymentKind, DeploymentRecord), DeployError> {
        let wiring = proxy_wiring(&record)?;
        let current =
            read_address_from_slot(self.client, wiring.proxy, PROXY_IMPLEMENTATION_STORAGE_SLOT)
                .await?;
        let call = if record.initialized { None } else { task.init_calldata.clone() };

        if current == wiring.implementation && call.is_none() {
            info!("{}: up to date at {}", task.name, record.address);
            trace.enter(task.name, DeploymentState::Recorded);
            return Ok((DeploymentKind::Unchanged, record));
        }

        if current != wiring.implementation {
            warn!(
                "{}: proxy {} points at {current}, expected {}",
                task.name, wiring.proxy, wiring.implementation
            );
        }
        self.check_proxy_admin(&wiring).await?;
        trace.enter(task.name, DeploymentState::ProxyAdminResolved);

        let implementation = wiring.implementation;
        let record = self.repoint(task.name, record, wiring, implementation, call, trace).await?;
        Ok((DeploymentKind::Repaired, record))
    }

    /// Upgrade the proxy through its admin and commit the updated record
    async fn repoint(
        &self,
        name: &str,
        record: DeploymentRecord,
        wiring: ProxySet,
        implementation: Address,
        call: Option<Bytes>,
        trace: &mut Trace,
    ) -> Result<DeploymentRecord, DeployError> {
        let initializes = call.is_some();
        let cmd = ChainCommand::Upgrade {
            admin: wiring.proxy_admin,
            proxy: wiring.proxy,
            implementation,
            call,
        };
        let executed = self.execute(&cmd, trace).await?;
        if initializes {
            trace.enter(name, DeploymentState::Initialized);
        }
        trace.enter(name, DeploymentState::Confirmed);

        let mut record = DeploymentRecord {
            proxy: Some(ProxySet { implementation, ..wiring }),
            initialized: record.initialized || initializes,
            ..record
        };
        // A skipped upgrade leaves the last confirmed transaction in place
        if let Some(executed) = executed {
            record.transaction_hash = executed.receipt.tx_hash;
            record.block_number = executed.receipt.block_number;
            record.deployer = self.client.signer_address();
        }

        self.commit(&record, trace)?;
        Ok(record)
    }

    /// The address of a confirmed implementation with the task's fingerprint,
    /// deploying one if none is recorded
    async fn resolve_implementation(
        &self,
        task: &Prepared<'_>,
        trace: &mut Trace,
    ) -> Result<Address, DeployError> {
        let name = format!("{}{IMPLEMENTATION_SUFFIX}", task.name);
        if let Some(record) = self.ledger.lookup(&name, &self.config.network)? {
            if fingerprint_matches(&record, &task.fingerprint) {
                info!("{name}: reusing confirmed implementation at {}", record.address);
                return Ok(record.address);
            }
        }

        let cmd = ChainCommand::Deploy {
            label: name.clone(),
            bytecode: task.artifact.bytecode.clone(),
            args: task.constructor_args.clone(),
        };
        let executed = self.execute(&cmd, trace).await?.ok_or_else(skipped_deploy)?;
        let address = created_address(&executed)?;

        let receipt = &executed.receipt;
        let record = self.new_record(&name, address, task.fingerprint, receipt, &task.artifact.abi);
        self.ledger.commit(&name, &self.config.network, &record)?;
        Ok(address)
    }

    /// The recorded shared admin, if any, after checking the deployer owns it
    async fn existing_admin(&self) -> Result<Option<Address>, DeployError> {
        let Some(record) = self.ledger.lookup(DEFAULT_PROXY_ADMIN_NAME, &self.config.network)?
        else {
            return Ok(None);
        };

        self.check_admin_owner(record.address).await?;
        info!("{DEFAULT_PROXY_ADMIN_NAME}: reusing {}", record.address);
        Ok(Some(record.address))
    }

    /// Deploy a proxy admin owned by the deployer and record it as the shared admin
    async fn deploy_admin(
        &self,
        artifact: &ContractArtifact,
        trace: &mut Trace,
    ) -> Result<Address, DeployError> {
        let args = proxy_admin_constructor_args(self.client.signer_address());
        let cmd = ChainCommand::Deploy {
            label: DEFAULT_PROXY_ADMIN_NAME.to_string(),
            bytecode: artifact.bytecode.clone(),
            args: args.clone(),
        };
        let executed = self.execute(&cmd, trace).await?.ok_or_else(skipped_deploy)?;
        let address = created_address(&executed)?;

        let record = self.new_record(
            DEFAULT_PROXY_ADMIN_NAME,
            address,
            artifact.fingerprint(&args),
            &executed.receipt,
            &artifact.abi,
        );
        self.ledger.commit(DEFAULT_PROXY_ADMIN_NAME, &self.config.network, &record)?;
        Ok(address)
    }

    /// Check that the proxy is administered by the recorded admin, and that
    /// the deployer owns that admin
    async fn check_proxy_admin(&self, wiring: &ProxySet) -> Result<(), DeployError> {
        let admin =
            read_address_from_slot(self.client, wiring.proxy, PROXY_ADMIN_STORAGE_SLOT).await?;
        if admin != wiring.proxy_admin {
            return Err(DeployError::Configuration(format!(
                "proxy {} is administered by {admin}, but the ledger records {}",
                wiring.proxy, wiring.proxy_admin
            )));
        }
        self.check_admin_owner(admin).await
    }

    /// Fail unless `admin` is a proxy admin owned by the deployer
    async fn check_admin_owner(&self, admin: Address) -> Result<(), DeployError> {
        let ret = self.client.call(admin, IProxyAdmin::ownerCall {}.abi_encode().into()).await?;
        let owner = Address::abi_decode(&ret).map_err(|_| {
            DeployError::Configuration(format!("no proxy admin found at {admin}"))
        })?;

        let deployer = self.client.signer_address();
        if owner != deployer {
            return Err(DeployError::Configuration(format!(
                "proxy admin {admin} is owned by {owner}, not the deployer {deployer}"
            )));
        }
        Ok(())
    }

    /// Execute a command at the configured confirmation depth
    async fn execute(
        &self,
        cmd: &ChainCommand,
        trace: &mut Trace,
    ) -> Result<Option<Executed>, DeployError> {
        let executed = cmd
            .execute(
                self.client,
                self.ledger,
                &self.config.network,
                &self.config.waiter,
                self.config.confirmations,
            )
            .await?;
        if let Some(executed) = &executed {
            trace.transactions.push(executed.receipt.tx_hash);
        }
        Ok(executed)
    }

    /// Commit the logical record of a task
    fn commit(&self, record: &DeploymentRecord, trace: &mut Trace) -> Result<(), DeployError> {
        self.ledger.commit(&record.contract_name, &self.config.network, record)?;
        trace.enter(&record.contract_name, DeploymentState::Recorded);
        Ok(())
    }

    /// A record of a contract confirmed by `receipt`
    fn new_record(
        &self,
        name: &str,
        address: Address,
        fingerprint: Fingerprint,
        receipt: &Receipt,
        abi: &JsonAbi,
    ) -> DeploymentRecord {
        DeploymentRecord {
            contract_name: name.to_string(),
            network: self.config.network.clone(),
            address,
            fingerprint,
            transaction_hash: receipt.tx_hash,
            block_number: receipt.block_number,
            deployer: self.client.signer_address(),
            abi: abi.clone(),
            proxy: None,
            initialized: false,
        }
    }
}

/// The proxy wiring of a record that must describe a proxied contract
fn proxy_wiring(record: &DeploymentRecord) -> Result<ProxySet, DeployError> {
    record.proxy.ok_or_else(|| {
        DeployError::Ledger(format!(
            "record of {} on {} has no proxy addresses",
            record.contract_name, record.network
        ))
    })
}

fn created_address(executed: &Executed) -> Result<Address, DeployError> {
    executed
        .contract_address
        .ok_or(DeployError::MissingContractAddress(executed.receipt.tx_hash))
}

fn skipped_deploy() -> DeployError {
    DeployError::ChainSubmission("contract creation was not submitted".to_string())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use alloy::primitives::address;
    use tempfile::TempDir;

    use super::*;
    use crate::{
        calldata::InitializationCall,
        chain::mock::{MockChain, MockContract},
        ledger::FileLedger,
        tasks::{paylink_task, PAYLINK_CONTRACT_NAME},
    };
    use super::DeploymentState::*;

    const SIGNER: Address = address!("f39Fd6e51aad88F6F4ce6aB8827279cffFb92266");
    const STRANGER: Address = address!("70997970C51812dc3A010C7d01b50e0d17dc79C8");
    const NETWORK: &str = "alfajores";

    /// A mock chain and a ledger in a temporary directory
    struct Harness {
        chain: MockChain,
        ledger: FileLedger,
        proxy_artifacts: ProxyArtifacts,
        _dir: TempDir,
    }

    impl Harness {
        fn new() -> Self {
            let proxy_artifacts = ProxyArtifacts {
                proxy: ContractArtifact::new(
                    "TransparentUpgradeableProxy",
                    JsonAbi::new(),
                    vec![0x60, 0x01],
                ),
                proxy_admin: ContractArtifact::new("ProxyAdmin", JsonAbi::new(), vec![0x60, 0x02]),
            };
            let dir = tempfile::tempdir().unwrap();
            Self {
                chain: MockChain::new(SIGNER, &proxy_artifacts),
                ledger: FileLedger::new(dir.path()),
                proxy_artifacts,
                _dir: dir,
            }
        }

        fn orchestrator(&self) -> Orchestrator<'_, MockChain, FileLedger> {
            let config = OrchestratorConfig {
                network: NETWORK.to_string(),
                confirmations: 2,
                waiter: ConfirmationWaiter::new(
                    Duration::from_millis(50),
                    Duration::from_millis(1),
                ),
            };
            Orchestrator::new(&self.chain, &self.ledger, config)
        }

        async fn deploy(
            &self,
            task: &DeployTask,
            artifact: &ContractArtifact,
        ) -> Result<DeploymentOutcome, DeployError> {
            self.orchestrator().deploy(task, artifact, &self.proxy_artifacts).await
        }

        fn lookup(&self, name: &str) -> Option<DeploymentRecord> {
            self.ledger.lookup(name, NETWORK).unwrap()
        }
    }

    /// A build of a contract; different versions have different bytecode
    fn artifact(name: &str, version: u8) -> ContractArtifact {
        let abi = JsonAbi::parse([
            "function initialize(address owner)",
            "function version() view returns (uint8)",
        ])
        .unwrap();
        ContractArtifact::new(name, abi, vec![0x60, 0x80, version])
    }

    fn paylink(version: u8) -> ContractArtifact {
        artifact(PAYLINK_CONTRACT_NAME, version)
    }

    fn paylink_init_calldata() -> Bytes {
        let task = paylink_task();
        encode_initializer(&paylink(1).abi, task.init.as_ref().unwrap()).unwrap()
    }

    fn wiring(outcome: &DeploymentOutcome) -> ProxySet {
        outcome.record.proxy.unwrap()
    }

    #[tokio::test]
    async fn test_paylink_three_runs() {
        let h = Harness::new();
        let task = paylink_task();

        // First run creates the implementation, the admin and the proxy
        let first = h.deploy(&task, &paylink(1)).await.unwrap();
        assert_eq!(first.kind, DeploymentKind::Fresh);
        assert_eq!(first.transactions.len(), 3);
        assert_eq!(
            first.states,
            vec![
                Absent,
                ImplementationNeeded,
                ImplementationDeployed,
                ProxyAdminResolved,
                ProxyDeployed,
                Initialized,
                Confirmed,
                Recorded
            ]
        );
        let v1 = wiring(&first);
        assert_eq!(first.record.address, v1.proxy);
        assert!(first.record.initialized);
        assert_eq!(h.chain.implementation_of(v1.proxy), Some(v1.implementation));
        assert_eq!(h.chain.initializer_calls(v1.proxy), vec![paylink_init_calldata()]);
        assert_eq!(
            h.chain.contract_at(v1.proxy_admin),
            Some(MockContract::ProxyAdmin { owner: SIGNER })
        );
        assert_eq!(h.lookup(PAYLINK_CONTRACT_NAME), Some(first.record.clone()));
        assert_eq!(h.lookup("PayLink_Implementation").unwrap().address, v1.implementation);
        assert_eq!(h.lookup(DEFAULT_PROXY_ADMIN_NAME).unwrap().address, v1.proxy_admin);

        // Second run with the same artifact is a no-op
        let txs = h.chain.transaction_count();
        let second = h.deploy(&task, &paylink(1)).await.unwrap();
        assert_eq!(second.kind, DeploymentKind::Unchanged);
        assert!(second.transactions.is_empty());
        assert_eq!(second.states, vec![Recorded]);
        assert_eq!(second.record, first.record);
        assert_eq!(h.chain.transaction_count(), txs);

        // Third run with a changed artifact upgrades in place
        let third = h.deploy(&task, &paylink(2)).await.unwrap();
        assert_eq!(third.kind, DeploymentKind::Upgraded);
        assert_eq!(third.transactions.len(), 2);
        let v2 = wiring(&third);
        assert_eq!(v2.proxy, v1.proxy);
        assert_eq!(v2.proxy_admin, v1.proxy_admin);
        assert_ne!(v2.implementation, v1.implementation);
        assert_eq!(h.chain.implementation_of(v1.proxy), Some(v2.implementation));
        assert_eq!(third.record.fingerprint, paylink(2).fingerprint(&[]));
        // the initializer is not re-run on upgrade
        assert_eq!(h.chain.initializer_calls(v1.proxy).len(), 1);
        assert_eq!(h.lookup(PAYLINK_CONTRACT_NAME), Some(third.record));
    }

    #[tokio::test]
    async fn test_rerun_is_idempotent() {
        let h = Harness::new();
        let task = paylink_task();
        h.deploy(&task, &paylink(1)).await.unwrap();
        h.deploy(&task, &paylink(2)).await.unwrap();

        let txs = h.chain.transaction_count();
        for _ in 0..3 {
            let outcome = h.deploy(&task, &paylink(2)).await.unwrap();
            assert_eq!(outcome.kind, DeploymentKind::Unchanged);
        }
        assert_eq!(h.chain.transaction_count(), txs);
    }

    #[tokio::test]
    async fn test_admin_shared_across_proxies() {
        let h = Harness::new();
        let paylink_outcome = h.deploy(&paylink_task(), &paylink(1)).await.unwrap();

        let escrow_task = DeployTask::new("Escrow");
        let escrow = h.deploy(&escrow_task, &artifact("Escrow", 1)).await.unwrap();

        // implementation and proxy only
        assert_eq!(escrow.transactions.len(), 2);
        assert_eq!(wiring(&escrow).proxy_admin, wiring(&paylink_outcome).proxy_admin);
        assert_ne!(wiring(&escrow).proxy, wiring(&paylink_outcome).proxy);
        assert!(!escrow.record.initialized);
        assert!(h.chain.initializer_calls(wiring(&escrow).proxy).is_empty());
    }

    #[tokio::test]
    async fn test_constructor_args_change_the_fingerprint() {
        let h = Harness::new();
        let abi = JsonAbi::parse(["constructor(uint256 fee)"]).unwrap();
        let escrow = ContractArtifact::new("Escrow", abi, vec![0x60, 0x80, 0x01]);
        let task = DeployTask::new("Escrow").with_constructor_args(vec!["100".to_string()]);

        let first = h.deploy(&task, &escrow).await.unwrap();
        let args = encode_constructor_args(&escrow.abi, &task.constructor_args).unwrap();
        assert_eq!(first.record.fingerprint, escrow.fingerprint(&args));
        assert_ne!(first.record.fingerprint, escrow.fingerprint(&[]));

        let same = h.deploy(&task, &escrow).await.unwrap();
        assert_eq!(same.kind, DeploymentKind::Unchanged);

        // same bytecode, new arguments: a new implementation behind the same proxy
        let raised = task.with_constructor_args(vec!["200".to_string()]);
        let upgraded = h.deploy(&raised, &escrow).await.unwrap();
        assert_eq!(upgraded.kind, DeploymentKind::Upgraded);
        assert_eq!(wiring(&upgraded).proxy, wiring(&first).proxy);
        assert_ne!(wiring(&upgraded).implementation, wiring(&first).implementation);
    }

    #[tokio::test]
    async fn test_foreign_owned_admin_rejected() {
        let h = Harness::new();
        let outcome = h.deploy(&paylink_task(), &paylink(1)).await.unwrap();
        h.chain.set_admin_owner(wiring(&outcome).proxy_admin, STRANGER);
        let txs = h.chain.transaction_count();

        let err = h.deploy(&DeployTask::new("Escrow"), &artifact("Escrow", 1)).await.unwrap_err();
        assert!(matches!(err, DeployError::Configuration(_)));
        assert!(h.lookup("Escrow").is_none());

        let err = h.deploy(&paylink_task(), &paylink(2)).await.unwrap_err();
        assert!(matches!(err, DeployError::Configuration(_)));
        assert_eq!(h.lookup(PAYLINK_CONTRACT_NAME), Some(outcome.record));

        assert_eq!(h.chain.transaction_count(), txs);
    }

    #[tokio::test]
    async fn test_drifted_proxy_repaired() {
        let h = Harness::new();
        let task = paylink_task();
        let first = h.deploy(&task, &paylink(1)).await.unwrap();
        let v1 = wiring(&first);
        h.chain.set_implementation(v1.proxy, STRANGER);

        let repaired = h.deploy(&task, &paylink(1)).await.unwrap();
        assert_eq!(repaired.kind, DeploymentKind::Repaired);
        assert_eq!(repaired.transactions.len(), 1);
        assert_eq!(repaired.states, vec![ProxyAdminResolved, Confirmed, Recorded]);
        assert_eq!(h.chain.implementation_of(v1.proxy), Some(v1.implementation));
        assert_eq!(h.chain.initializer_calls(v1.proxy).len(), 1);
        assert_eq!(wiring(&repaired), v1);

        let again = h.deploy(&task, &paylink(1)).await.unwrap();
        assert_eq!(again.kind, DeploymentKind::Unchanged);
    }

    #[tokio::test]
    async fn test_stalled_proxy_deploy_is_never_duplicated() {
        let h = Harness::new();
        let task = paylink_task();

        // implementation and admin confirm, the proxy creation stays in the mempool
        h.chain.succeed_next();
        h.chain.succeed_next();
        h.chain.stall_next();
        let err = h.deploy(&task, &paylink(1)).await.unwrap_err();
        let DeployError::ChainTimeout { tx_hash: stalled, .. } = err else {
            panic!("expected a timeout");
        };
        assert!(h.lookup(PAYLINK_CONTRACT_NAME).is_none());
        let implementation = h.lookup("PayLink_Implementation").unwrap().address;
        let admin = h.lookup(DEFAULT_PROXY_ADMIN_NAME).unwrap().address;

        // a rerun keeps waiting on the same creation instead of sending another
        let err = h.deploy(&task, &paylink(1)).await.unwrap_err();
        assert!(matches!(err, DeployError::ChainTimeout { tx_hash, .. } if tx_hash == stalled));
        assert_eq!(h.chain.transaction_count(), 3);

        // once mined, the rerun adopts it
        h.chain.mine_pending();
        let outcome = h.deploy(&task, &paylink(1)).await.unwrap();
        assert_eq!(outcome.kind, DeploymentKind::Fresh);
        assert_eq!(outcome.transactions, vec![stalled]);
        assert_eq!(h.chain.transaction_count(), 3);
        let v1 = wiring(&outcome);
        assert_eq!(v1.implementation, implementation);
        assert_eq!(v1.proxy_admin, admin);
        assert_eq!(h.chain.initializer_calls(v1.proxy), vec![paylink_init_calldata()]);
        assert!(h.ledger.pending_transactions(NETWORK).unwrap().is_empty());

        let again = h.deploy(&task, &paylink(1)).await.unwrap();
        assert_eq!(again.kind, DeploymentKind::Unchanged);
    }

    #[tokio::test]
    async fn test_lost_proxy_deploy_is_resubmitted() {
        let h = Harness::new();
        let task = paylink_task();

        h.chain.succeed_next();
        h.chain.succeed_next();
        h.chain.drop_next();
        let err = h.deploy(&task, &paylink(1)).await.unwrap_err();
        assert!(matches!(err, DeployError::TransactionLost { .. }));
        assert!(h.ledger.pending_transactions(NETWORK).unwrap().is_empty());

        // the lost creation left nothing behind, so a new one is sent
        let outcome = h.deploy(&task, &paylink(1)).await.unwrap();
        assert_eq!(outcome.transactions.len(), 1);
        assert_eq!(h.chain.initializer_calls(wiring(&outcome).proxy).len(), 1);
    }

    #[tokio::test]
    async fn test_stalled_upgrade_and_call_is_never_duplicated() {
        let h = Harness::new();
        let first = h.deploy(&DeployTask::new(PAYLINK_CONTRACT_NAME), &paylink(1)).await.unwrap();
        let proxy = wiring(&first).proxy;
        let task = paylink_task();

        h.chain.succeed_next();
        h.chain.stall_next();
        let err = h.deploy(&task, &paylink(2)).await.unwrap_err();
        assert!(matches!(err, DeployError::ChainTimeout { .. }));
        let txs = h.chain.transaction_count();

        let err = h.deploy(&task, &paylink(2)).await.unwrap_err();
        assert!(matches!(err, DeployError::ChainTimeout { .. }));
        assert_eq!(h.chain.transaction_count(), txs);

        h.chain.mine_pending();
        let upgraded = h.deploy(&task, &paylink(2)).await.unwrap();
        assert_eq!(upgraded.kind, DeploymentKind::Upgraded);
        assert!(upgraded.record.initialized);
        assert_eq!(h.chain.transaction_count(), txs);
        assert_eq!(h.chain.initializer_calls(proxy), vec![paylink_init_calldata()]);
        assert_eq!(h.chain.implementation_of(proxy), Some(wiring(&upgraded).implementation));
    }

    #[tokio::test]
    async fn test_reverted_upgrade_keeps_previous_record() {
        let h = Harness::new();
        let task = paylink_task();
        let first = h.deploy(&task, &paylink(1)).await.unwrap();

        h.chain.succeed_next();
        h.chain.revert_next();
        let err = h.deploy(&task, &paylink(2)).await.unwrap_err();
        assert!(matches!(err, DeployError::TransactionReverted { .. }));
        assert_eq!(h.lookup(PAYLINK_CONTRACT_NAME), Some(first.record.clone()));
        let v1 = wiring(&first);
        assert_eq!(h.chain.implementation_of(v1.proxy), Some(v1.implementation));

        // the confirmed v2 implementation is reused by the retry
        let retry = h.deploy(&task, &paylink(2)).await.unwrap();
        assert_eq!(retry.kind, DeploymentKind::Upgraded);
        assert_eq!(retry.transactions.len(), 1);
        assert_eq!(h.chain.implementation_of(v1.proxy), Some(wiring(&retry).implementation));
    }

    #[tokio::test]
    async fn test_submission_failures_leave_ledger_empty() {
        let h = Harness::new();
        let task = paylink_task();

        h.chain.reject_next();
        let err = h.deploy(&task, &paylink(1)).await.unwrap_err();
        assert!(matches!(err, DeployError::ChainSubmission(_)));

        h.chain.drop_next();
        let err = h.deploy(&task, &paylink(1)).await.unwrap_err();
        assert!(matches!(err, DeployError::TransactionLost { .. }));

        assert!(h.ledger.records(NETWORK).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_late_initializer_runs_once() {
        let h = Harness::new();
        let uninitialized = DeployTask::new(PAYLINK_CONTRACT_NAME);
        let first = h.deploy(&uninitialized, &paylink(1)).await.unwrap();
        assert!(!first.record.initialized);
        let proxy = wiring(&first).proxy;

        // Adding an initializer to an unchanged artifact runs it through the admin
        let task = paylink_task();
        let initialized = h.deploy(&task, &paylink(1)).await.unwrap();
        assert_eq!(initialized.kind, DeploymentKind::Repaired);
        assert!(initialized.record.initialized);
        assert_eq!(h.chain.initializer_calls(proxy), vec![paylink_init_calldata()]);

        let upgraded = h.deploy(&task, &paylink(2)).await.unwrap();
        assert_eq!(upgraded.kind, DeploymentKind::Upgraded);
        assert!(!upgraded.states.contains(&Initialized));
        assert_eq!(h.chain.initializer_calls(proxy).len(), 1);
    }

    #[tokio::test]
    async fn test_upgrade_of_uninitialized_proxy_calls_initializer() {
        let h = Harness::new();
        let first = h.deploy(&DeployTask::new(PAYLINK_CONTRACT_NAME), &paylink(1)).await.unwrap();
        let proxy = wiring(&first).proxy;

        let upgraded = h.deploy(&paylink_task(), &paylink(2)).await.unwrap();
        assert_eq!(upgraded.kind, DeploymentKind::Upgraded);
        assert!(upgraded.states.contains(&Initialized));
        assert!(upgraded.record.initialized);
        assert_eq!(h.chain.initializer_calls(proxy).len(), 1);
        assert_eq!(h.chain.implementation_of(proxy), Some(wiring(&upgraded).implementation));
    }

    #[tokio::test]
    async fn test_malformed_task_fails_before_any_transaction() {
        let h = Harness::new();
        let task = DeployTask::new(PAYLINK_CONTRACT_NAME)
            .with_init(InitializationCall::new("initialize", vec!["nope".to_string()]));

        let err = h.deploy(&task, &paylink(1)).await.unwrap_err();
        assert!(matches!(err, DeployError::CalldataConstruction(_)));
        assert_eq!(h.chain.transaction_count(), 0);
    }

    #[tokio::test]
    async fn test_record_without_proxy_wiring_rejected() {
        let h = Harness::new();
        let outcome = h.deploy(&paylink_task(), &paylink(1)).await.unwrap();
        let unwired = DeploymentRecord { proxy: None, ..outcome.record };
        h.ledger.commit(PAYLINK_CONTRACT_NAME, NETWORK, &unwired).unwrap();

        let err = h.deploy(&paylink_task(), &paylink(1)).await.unwrap_err();
        assert!(matches!(err, DeployError::Ledger(_)));
    }
}
