//! The deployment ledger: a durable record of what has been deployed per network
//!
//! Records live at `<deployments_dir>/<network>/<Name>.json`. Every write goes
//! through a temporary file that is renamed over the target, so an interrupted
//! write leaves the previous record intact.
//!
//! Transactions that were submitted but never seen confirmed are remembered in
//! `<deployments_dir>/<network>/.pendingTransactions`, so that a later run can
//! resolve them before submitting anything in their place.

use std::{
    collections::BTreeMap,
    fs,
    io::{ErrorKind, Write},
    path::{Path, PathBuf},
};

use alloy::{
    json_abi::JsonAbi,
    primitives::{Address, TxHash, B256},
};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::debug;

use crate::{
    artifact::Fingerprint,
    constants::{CHAIN_ID_FILE, JSON_EXTENSION, PENDING_TRANSACTIONS_FILE},
    errors::DeployError,
};

/// The addresses that together make up one logical upgradeable contract
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxySet {
    /// The implementation the proxy delegates to
    pub implementation: Address,
    /// The admin contract authorized to upgrade the proxy
    pub proxy_admin: Address,
    /// The proxy, i.e. the externally visible address
    pub proxy: Address,
}

/// A confirmed deployment of one contract on one network
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentRecord {
    /// The ledger name of the contract
    pub contract_name: String,
    /// The network the contract lives on
    pub network: String,
    /// The externally visible address (the proxy, for proxied contracts)
    pub address: Address,
    /// The fingerprint of the deployed bytecode and constructor arguments
    pub fingerprint: Fingerprint,
    /// The last confirmed transaction that produced this record
    pub transaction_hash: TxHash,
    /// The block that transaction was included in
    pub block_number: u64,
    /// The account that submitted the transaction
    pub deployer: Address,
    /// The ABI callers should use at `address`
    pub abi: JsonAbi,
    /// The proxy wiring, for proxied contracts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy: Option<ProxySet>,
    /// Whether the one-time initializer has been executed through the proxy
    #[serde(default)]
    pub initialized: bool,
}

/// A submitted transaction whose outcome has not been observed yet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingTransaction {
    /// The hash of the submitted transaction
    pub tx_hash: TxHash,
    /// The address a contract creation will occupy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contract_address: Option<Address>,
    /// The digest of the submitted payload
    pub payload: B256,
}

/// Whether the record was produced from exactly the given fingerprint
pub fn fingerprint_matches(record: &DeploymentRecord, fingerprint: &Fingerprint) -> bool {
    record.fingerprint == *fingerprint
}

/// Persistent storage of deployment records, keyed by (contract name, network)
pub trait Ledger {
    /// Look up the record for `contract_name` on `network`.
    ///
    /// A missing record is `Ok(None)`; only unreadable storage is an error.
    fn lookup(
        &self,
        contract_name: &str,
        network: &str,
    ) -> Result<Option<DeploymentRecord>, DeployError>;

    /// Durably create or replace the record for `contract_name` on `network`
    fn commit(
        &self,
        contract_name: &str,
        network: &str,
        record: &DeploymentRecord,
    ) -> Result<(), DeployError>;

    /// The unresolved transaction submitted under `key` on `network`, if any
    fn pending(
        &self,
        key: &str,
        network: &str,
    ) -> Result<Option<PendingTransaction>, DeployError>;

    /// Durably remember `tx` as the unresolved transaction under `key`, or
    /// forget the entry when `tx` is `None`
    fn set_pending(
        &self,
        key: &str,
        network: &str,
        tx: Option<&PendingTransaction>,
    ) -> Result<(), DeployError>;
}

/// A ledger stored as JSON files, one directory per network
#[derive(Debug, Clone)]
pub struct FileLedger {
    /// The root directory of the ledger
    root: PathBuf,
}

impl FileLedger {
    /// Open a ledger rooted at `root`; directories are created on first commit
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The directory holding the records of `network`
    pub fn network_dir(&self, network: &str) -> PathBuf {
        self.root.join(network)
    }

    fn record_path(&self, contract_name: &str, network: &str) -> PathBuf {
        self.network_dir(network)
            .join(format!("{contract_name}.{JSON_EXTENSION}"))
    }

    fn pending_path(&self, network: &str) -> PathBuf {
        self.network_dir(network).join(PENDING_TRANSACTIONS_FILE)
    }

    /// Every unresolved transaction of `network`, keyed by the command that submitted it
    pub fn pending_transactions(
        &self,
        network: &str,
    ) -> Result<BTreeMap<String, PendingTransaction>, DeployError> {
        let path = self.pending_path(network);
        let contents = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => return Err(DeployError::ledger(e)),
        };
        serde_json::from_str(&contents)
            .map_err(|e| DeployError::Ledger(format!("malformed {}: {e}", path.display())))
    }

    /// Bind the network's ledger to `chain_id`, failing if it was written for another chain
    pub fn ensure_chain_id(&self, network: &str, chain_id: u64) -> Result<(), DeployError> {
        let path = self.network_dir(network).join(CHAIN_ID_FILE);
        match fs::read_to_string(&path) {
            Ok(contents) => {
                let recorded: u64 = contents.trim().parse().map_err(|e| {
                    DeployError::Ledger(format!("invalid chain ID in {}: {e}", path.display()))
                })?;
                if recorded != chain_id {
                    return Err(DeployError::Configuration(format!(
                        "deployments for `{network}` were made on chain {recorded}, \
                         but the RPC endpoint serves chain {chain_id}"
                    )));
                }
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                write_atomic(&path, chain_id.to_string().as_bytes())
            }
            Err(e) => Err(DeployError::ledger(e)),
        }
    }

    /// All records committed for `network`, sorted by contract name
    pub fn records(&self, network: &str) -> Result<Vec<DeploymentRecord>, DeployError> {
        let dir = self.network_dir(network);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(DeployError::ledger(e)),
        };

        let mut records = Vec::new();
        for entry in entries {
            let path = entry.map_err(DeployError::ledger)?.path();
            if path.extension().is_some_and(|ext| ext == JSON_EXTENSION) {
                records.push(read_record(&path)?);
            }
        }
        records.sort_by(|a, b| a.contract_name.cmp(&b.contract_name));
        Ok(records)
    }
}

impl Ledger for FileLedger {
    fn lookup(
        &self,
        contract_name: &str,
        network: &str,
    ) -> Result<Option<DeploymentRecord>, DeployError> {
        let path = self.record_path(contract_name, network);
        if !path.exists() {
            return Ok(None);
        }
        read_record(&path).map(Some)
    }

    fn commit(
        &self,
        contract_name: &str,
        network: &str,
        record: &DeploymentRecord,
    ) -> Result<(), DeployError> {
        let path = self.record_path(contract_name, network);
        let json = serde_json::to_vec_pretty(record).map_err(DeployError::ledger)?;
        write_atomic(&path, &json)?;

        debug!("committed {contract_name} on {network} to {}", path.display());
        Ok(())
    }

    fn pending(
        &self,
        key: &str,
        network: &str,
    ) -> Result<Option<PendingTransaction>, DeployError> {
        Ok(self.pending_transactions(network)?.remove(key))
    }

    fn set_pending(
        &self,
        key: &str,
        network: &str,
        tx: Option<&PendingTransaction>,
    ) -> Result<(), DeployError> {
        let mut pending = self.pending_transactions(network)?;
        match tx {
            Some(tx) => pending.insert(key.to_string(), *tx),
            None => pending.remove(key),
        };

        let path = self.pending_path(network);
        if pending.is_empty() {
            return match fs::remove_file(&path) {
                Err(e) if e.kind() != ErrorKind::NotFound => Err(DeployError::ledger(e)),
                _ => Ok(()),
            };
        }
        let json = serde_json::to_vec_pretty(&pending).map_err(DeployError::ledger)?;
        write_atomic(&path, &json)
    }
}

fn read_record(path: &Path) -> Result<DeploymentRecord, DeployError> {
    let contents = fs::read_to_string(path).map_err(DeployError::ledger)?;
    serde_json::from_str(&contents)
        .map_err(|e| DeployError::Ledger(format!("malformed record {}: {e}", path.display())))
}

/// Write `contents` to `path` by renaming a synced temporary file over it
fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), DeployError> {
    let dir = path
        .parent()
        .ok_or_else(|| DeployError::Ledger(format!("{} has no parent", path.display())))?;
    fs::create_dir_all(dir).map_err(DeployError::ledger)?;

    let mut tmp = NamedTempFile::new_in(dir).map_err(DeployError::ledger)?;
    tmp.write_all(contents).map_err(DeployError::ledger)?;
    tmp.as_file().sync_all().map_err(DeployError::ledger)?;
    tmp.persist(path).map_err(|e| DeployError::ledger(e.error))?;
    Ok(())
}
