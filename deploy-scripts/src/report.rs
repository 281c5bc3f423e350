//! Human readable summaries of deployment runs

use std::fmt::{self, Display};

use alloy::primitives::Address;

use crate::{
    ledger::DeploymentRecord,
    networks::Network,
    orchestrator::{DeploymentKind, DeploymentOutcome},
};

/// The address set produced by a run, one entry per task
#[derive(Debug, Clone)]
pub struct DeploymentSummary {
    /// The network deployed to
    pub network: Network,
    /// The deploying account
    pub deployer: Address,
    /// The outcome of each task, in execution order
    pub outcomes: Vec<DeploymentOutcome>,
}

impl DeploymentSummary {
    /// An empty summary for a run on `network`
    pub fn new(network: Network, deployer: Address) -> Self {
        Self { network, deployer, outcomes: Vec::new() }
    }

    /// The number of transactions confirmed across all tasks
    pub fn transaction_count(&self) -> usize {
        self.outcomes.iter().map(|o| o.transactions.len()).sum()
    }

    /// Whether any task changed the chain
    pub fn changed(&self) -> bool {
        self.outcomes.iter().any(|o| o.kind != DeploymentKind::Unchanged)
    }

    fn link(&self, address: Address) -> String {
        match self.network.explorer_url() {
            Some(explorer) => format!("{address} ({explorer}/address/{address})"),
            None => address.to_string(),
        }
    }
}

impl Display for DeploymentSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Deployments on {} by {}", self.network, self.deployer)?;
        for outcome in &self.outcomes {
            writeln!(f, "  {} ({})", outcome.record.contract_name, outcome.kind)?;
            writeln!(f, "    proxy:          {}", self.link(outcome.record.address))?;
            if let Some(wiring) = outcome.record.proxy {
                writeln!(f, "    implementation: {}", self.link(wiring.implementation))?;
                writeln!(f, "    proxy admin:    {}", self.link(wiring.proxy_admin))?;
            }
            writeln!(f, "    transactions:   {}", outcome.transactions.len())?;
        }
        write!(f, "{} transaction(s) confirmed", self.transaction_count())
    }
}

/// One line describing a ledger record, for the `status` command
pub fn record_line(record: &DeploymentRecord) -> String {
    let mut line = format!(
        "{:<28} {} (block {}, tx {})",
        record.contract_name, record.address, record.block_number, record.transaction_hash
    );
    if let Some(wiring) = record.proxy {
        line.push_str(&format!(" -> {}", wiring.implementation));
    }
    line
}
