//! Compiled contract artifacts and their deployment fingerprints

use std::{
    fs,
    path::{Path, PathBuf},
};

use alloy::{
    json_abi::JsonAbi,
    primitives::{keccak256, Bytes, B256},
};
use serde::Deserialize;

use crate::{constants::JSON_EXTENSION, errors::DeployError};

/// A fingerprint over creation bytecode and encoded constructor arguments
pub type Fingerprint = B256;

/// A compiled contract: creation bytecode plus its ABI
#[derive(Debug, Clone, PartialEq)]
pub struct ContractArtifact {
    /// The contract's name
    pub name: String,
    /// The ABI of the contract
    pub abi: JsonAbi,
    /// The creation bytecode, without constructor arguments
    pub bytecode: Bytes,
}

/// The on-disk shape of a compilation artifact.
///
/// Hardhat writes the bytecode as a hex string, Foundry nests it under `object`.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ArtifactFile {
    #[serde(default)]
    contract_name: Option<String>,
    abi: JsonAbi,
    bytecode: BytecodeRepr,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum BytecodeRepr {
    Hex(Bytes),
    Object { object: Bytes },
}

impl ContractArtifact {
    /// Construct an artifact from its parts
    pub fn new(name: impl Into<String>, abi: JsonAbi, bytecode: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            abi,
            bytecode: bytecode.into(),
        }
    }

    /// Parse an artifact from the contents of a Hardhat or Foundry artifact file
    pub fn from_json(name: &str, json: &str) -> Result<Self, DeployError> {
        let file: ArtifactFile = serde_json::from_str(json)
            .map_err(|e| DeployError::ArtifactParsing(format!("{name}: {e}")))?;

        let bytecode = match file.bytecode {
            BytecodeRepr::Hex(bytes) | BytecodeRepr::Object { object: bytes } => bytes,
        };
        if bytecode.is_empty() {
            return Err(DeployError::ArtifactParsing(format!(
                "{name}: artifact has no creation bytecode (abstract contract or interface?)"
            )));
        }

        Ok(Self {
            name: file.contract_name.unwrap_or_else(|| name.to_string()),
            abi: file.abi,
            bytecode,
        })
    }

    /// Load the artifact `<artifacts_dir>/<name>.json`
    pub fn load(artifacts_dir: &Path, name: &str) -> Result<Self, DeployError> {
        let path = artifact_path(artifacts_dir, name);
        let json = fs::read_to_string(&path)
            .map_err(|e| DeployError::ArtifactParsing(format!("{}: {e}", path.display())))?;
        Self::from_json(name, &json)
    }

    /// The fingerprint of this artifact deployed with the given encoded constructor arguments
    pub fn fingerprint(&self, constructor_args: &[u8]) -> Fingerprint {
        let mut preimage = Vec::with_capacity(self.bytecode.len() + constructor_args.len());
        preimage.extend_from_slice(&self.bytecode);
        preimage.extend_from_slice(constructor_args);
        keccak256(preimage)
    }
}

/// The artifacts of the proxy machinery, shared by every proxied task
#[derive(Debug, Clone)]
pub struct ProxyArtifacts {
    /// The `TransparentUpgradeableProxy` artifact
    pub proxy: ContractArtifact,
    /// The `ProxyAdmin` artifact
    pub proxy_admin: ContractArtifact,
}

fn artifact_path(artifacts_dir: &Path, name: &str) -> PathBuf {
    artifacts_dir.join(name).with_extension(JSON_EXTENSION)
}
