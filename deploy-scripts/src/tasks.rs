//! The registry of deployment tasks
//!
//! A task names a contract artifact, the arguments it is constructed and
//! initialized with, and the tags it can be selected by from the CLI.

use crate::calldata::InitializationCall;

/// The name of the PayLink contract artifact and ledger record
pub const PAYLINK_CONTRACT_NAME: &str = "PayLink";

/// The account PayLink's `initialize` hands ownership to
pub const PAYLINK_INITIAL_OWNER: &str = "0x874069Fa1Eb16D44d622F2e0Ca25eeA172369bC1";

/// A contract to deploy behind a transparent proxy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployTask {
    /// The artifact and ledger name of the contract
    pub contract_name: String,
    /// Tags selecting this task from the CLI
    pub tags: Vec<String>,
    /// Constructor arguments of the implementation, coerced by its ABI
    pub constructor_args: Vec<String>,
    /// The one-time initializer invoked through the proxy
    pub init: Option<InitializationCall>,
}

impl DeployTask {
    /// A task deploying `contract_name`, tagged with its own name
    pub fn new(contract_name: impl Into<String>) -> Self {
        let contract_name = contract_name.into();
        Self {
            tags: vec![contract_name.clone()],
            contract_name,
            constructor_args: Vec::new(),
            init: None,
        }
    }

    /// Set the initializer invoked through the proxy
    pub fn with_init(mut self, init: InitializationCall) -> Self {
        self.init = Some(init);
        self
    }

    /// Set the implementation's constructor arguments
    pub fn with_constructor_args(mut self, args: Vec<String>) -> Self {
        self.constructor_args = args;
        self
    }

    /// Whether the task carries any of `tags`
    pub fn matches_any(&self, tags: &[String]) -> bool {
        self.tags.iter().any(|t| tags.contains(t))
    }
}

/// The PayLink deployment: a proxy initialized with the PayLink owner
pub fn paylink_task() -> DeployTask {
    DeployTask::new(PAYLINK_CONTRACT_NAME).with_init(InitializationCall::new(
        "initialize",
        vec![PAYLINK_INITIAL_OWNER.to_string()],
    ))
}

/// Every task known to the deploy scripts, in execution order
pub fn registered_tasks() -> Vec<DeployTask> {
    vec![paylink_task()]
}

/// The tasks matching any of `tags`, or all of them when no tags are given
pub fn select_tasks(tasks: Vec<DeployTask>, tags: &[String]) -> Vec<DeployTask> {
    if tags.is_empty() {
        return tasks;
    }
    tasks.into_iter().filter(|t| t.matches_any(tags)).collect()
}
