//! Implementations of the deploy script commands

use std::path::Path;

use tracing::info;

use crate::{
    artifact::{ContractArtifact, ProxyArtifacts},
    chain::{rpc::RpcChainClient, ChainClient},
    cli::{DeployArgs, NetworkArgs},
    config::DeployConfig,
    constants::{PROXY_ADMIN_ARTIFACT_NAME, PROXY_ARTIFACT_NAME},
    errors::DeployError,
    ledger::FileLedger,
    networks::Network,
    orchestrator::{Orchestrator, OrchestratorConfig},
    report::{record_line, DeploymentSummary},
    tasks::{registered_tasks, select_tasks, DeployTask},
};

/// Deploy every registered task matching the requested tags
pub async fn deploy(
    args: DeployArgs,
    config: &DeployConfig,
) -> Result<DeploymentSummary, DeployError> {
    let tasks = select_tasks(registered_tasks(), &args.tags);
    if tasks.is_empty() {
        return Err(DeployError::Configuration(format!(
            "no deployment task is tagged with any of {:?}",
            args.tags
        )));
    }

    info!("deploying to {} via {}", config.network, config.rpc_url);
    let client = RpcChainClient::connect(&config.rpc_url, config.signer.clone())?;
    let ledger = FileLedger::new(&config.deployments_dir);
    let orchestrator_config = OrchestratorConfig {
        network: config.network.name().to_string(),
        confirmations: config.confirmations,
        waiter: config.waiter(),
    };

    run_tasks(
        &client,
        &ledger,
        config.network,
        &config.artifacts_dir,
        &tasks,
        orchestrator_config,
    )
    .await
}

/// Run `tasks` in order against `client`, stopping at the first failure
pub async fn run_tasks<C: ChainClient>(
    client: &C,
    ledger: &FileLedger,
    network: Network,
    artifacts_dir: &Path,
    tasks: &[DeployTask],
    config: OrchestratorConfig,
) -> Result<DeploymentSummary, DeployError> {
    // Read every artifact before touching the chain
    let proxy_artifacts = ProxyArtifacts {
        proxy: ContractArtifact::load(artifacts_dir, PROXY_ARTIFACT_NAME)?,
        proxy_admin: ContractArtifact::load(artifacts_dir, PROXY_ADMIN_ARTIFACT_NAME)?,
    };
    let artifacts = tasks
        .iter()
        .map(|task| ContractArtifact::load(artifacts_dir, &task.contract_name))
        .collect::<Result<Vec<_>, _>>()?;

    let chain_id = client.chain_id().await?;
    if let Some(expected) = network.chain_id() {
        if chain_id != expected {
            return Err(DeployError::Configuration(format!(
                "{network} has chain ID {expected}, but the RPC endpoint serves chain {chain_id}"
            )));
        }
    }
    ledger.ensure_chain_id(network.name(), chain_id)?;

    let deployer = client.signer_address();
    info!("deployer: {deployer}");
    let orchestrator = Orchestrator::new(client, ledger, config);
    let mut summary = DeploymentSummary::new(network, deployer);
    for (task, artifact) in tasks.iter().zip(&artifacts) {
        let outcome = orchestrator.deploy(task, artifact, &proxy_artifacts).await?;
        info!(
            "{}: {} at {} ({} transactions)",
            task.contract_name,
            outcome.kind,
            outcome.record.address,
            outcome.transactions.len()
        );
        summary.outcomes.push(outcome);
    }

    Ok(summary)
}

/// Print every record in the network's ledger
pub fn status(args: &NetworkArgs) -> Result<(), DeployError> {
    let ledger = FileLedger::new(&args.deployments_dir);
    let records = ledger.records(args.network.name())?;
    if records.is_empty() {
        println!("no deployments recorded for {}", args.network);
    } else {
        println!("deployments on {}:", args.network);
        for record in &records {
            println!("  {}", record_line(record));
        }
    }

    // Left behind by runs that stopped before seeing them confirmed
    let pending = ledger.pending_transactions(args.network.name())?;
    if !pending.is_empty() {
        println!("unconfirmed transactions on {}:", args.network);
        for (key, tx) in &pending {
            println!("  {key}: {:#x}", tx.tx_hash);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::{fs, time::Duration};

    use alloy::primitives::{address, Address};

    use super::*;
    use crate::{
        chain::mock::MockChain,
        confirmations::ConfirmationWaiter,
        ledger::Ledger,
        orchestrator::DeploymentKind,
        tasks::{paylink_task, PAYLINK_CONTRACT_NAME},
    };

    const SIGNER: Address = address!("f39Fd6e51aad88F6F4ce6aB8827279cffFb92266");

    const PROXY_JSON: &str =
        r#"{"contractName": "TransparentUpgradeableProxy", "abi": [], "bytecode": "0x6001"}"#;
    const ADMIN_JSON: &str = r#"{"contractName": "ProxyAdmin", "abi": [], "bytecode": "0x6002"}"#;
    const PAYLINK_JSON: &str = r#"{
        "contractName": "PayLink",
        "abi": [
            {"type": "function", "name": "initialize", "stateMutability": "nonpayable",
             "inputs": [{"name": "owner", "type": "address", "internalType": "address"}],
             "outputs": []}
        ],
        "bytecode": "0x608060405234801561001057600080fd5b50"
    }"#;

    /// An artifacts directory and an empty ledger directory
    struct Workspace {
        artifacts: tempfile::TempDir,
        deployments: tempfile::TempDir,
    }

    impl Workspace {
        fn new() -> Self {
            let artifacts = tempfile::tempdir().unwrap();
            fs::write(artifacts.path().join("TransparentUpgradeableProxy.json"), PROXY_JSON)
                .unwrap();
            fs::write(artifacts.path().join("ProxyAdmin.json"), ADMIN_JSON).unwrap();
            fs::write(artifacts.path().join("PayLink.json"), PAYLINK_JSON).unwrap();
            Self { artifacts, deployments: tempfile::tempdir().unwrap() }
        }

        fn chain(&self, chain_id: u64) -> MockChain {
            let artifacts = ProxyArtifacts {
                proxy: ContractArtifact::load(self.artifacts.path(), PROXY_ARTIFACT_NAME).unwrap(),
                proxy_admin: ContractArtifact::load(
                    self.artifacts.path(),
                    PROXY_ADMIN_ARTIFACT_NAME,
                )
                .unwrap(),
            };
            MockChain::new(SIGNER, &artifacts).with_chain_id(chain_id)
        }

        fn ledger(&self) -> FileLedger {
            FileLedger::new(self.deployments.path())
        }

        async fn run(
            &self,
            chain: &MockChain,
            network: Network,
        ) -> Result<DeploymentSummary, DeployError> {
            let config = OrchestratorConfig {
                network: network.name().to_string(),
                confirmations: 1,
                waiter: ConfirmationWaiter::new(
                    Duration::from_millis(50),
                    Duration::from_millis(1),
                ),
            };
            let tasks = [paylink_task()];
            run_tasks(chain, &self.ledger(), network, self.artifacts.path(), &tasks, config).await
        }
    }

    #[tokio::test]
    async fn test_deploy_then_rerun() {
        let ws = Workspace::new();
        let chain = ws.chain(44787);

        let first = ws.run(&chain, Network::Alfajores).await.unwrap();
        assert_eq!(first.outcomes[0].kind, DeploymentKind::Fresh);
        assert_eq!(first.transaction_count(), 3);

        let second = ws.run(&chain, Network::Alfajores).await.unwrap();
        assert_eq!(second.outcomes[0].kind, DeploymentKind::Unchanged);
        assert!(!second.changed());

        let record = ws.ledger().lookup(PAYLINK_CONTRACT_NAME, "alfajores").unwrap().unwrap();
        assert_eq!(record.address, first.outcomes[0].record.address);
        assert_eq!(record.deployer, SIGNER);
    }

    #[tokio::test]
    async fn test_wrong_chain_rejected_before_any_transaction() {
        let ws = Workspace::new();
        let chain = ws.chain(42220);

        let err = ws.run(&chain, Network::Alfajores).await.unwrap_err();
        assert!(matches!(err, DeployError::Configuration(_)));
        assert_eq!(chain.transaction_count(), 0);
    }

    #[tokio::test]
    async fn test_ledger_bound_to_chain() {
        let ws = Workspace::new();
        ws.run(&ws.chain(31337), Network::Localhost).await.unwrap();

        // a restarted local node with another chain ID must not reuse the records
        let restarted = ws.chain(1337);
        let err = ws.run(&restarted, Network::Localhost).await.unwrap_err();
        assert!(matches!(err, DeployError::Configuration(_)));
        assert_eq!(restarted.transaction_count(), 0);
    }

    #[tokio::test]
    async fn test_missing_artifact() {
        let ws = Workspace::new();
        let chain = ws.chain(44787);
        fs::remove_file(ws.artifacts.path().join("ProxyAdmin.json")).unwrap();

        let err = ws.run(&chain, Network::Alfajores).await.unwrap_err();
        assert!(matches!(err, DeployError::ArtifactParsing(_)));
        assert_eq!(chain.transaction_count(), 0);
        assert!(ws.ledger().records("alfajores").unwrap().is_empty());
    }
}
