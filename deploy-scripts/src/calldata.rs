//! ABI encoding of constructor arguments and initializer calls
//!
//! Arguments are given as strings and coerced to the types declared in the
//! contract's ABI, so deployment tasks can be described without generated
//! bindings for the contract being deployed.

use alloy::{
    dyn_abi::{DynSolValue, JsonAbiExt, Specifier},
    json_abi::{JsonAbi, Param},
    primitives::{Address, Bytes},
    sol_types::{SolCall, SolValue},
};

use crate::{errors::DeployError, solidity::IProxyAdmin};

/// A one-time initializer invocation: a method name plus positional arguments
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitializationCall {
    /// The name of the initializer method
    pub method_name: String,
    /// The positional arguments, coerced by the ABI types of the method
    pub args: Vec<String>,
}

impl InitializationCall {
    /// Construct a new initializer call
    pub fn new(method_name: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            method_name: method_name.into(),
            args,
        }
    }
}

/// Encode the constructor arguments for `abi`, without a selector
pub fn encode_constructor_args(abi: &JsonAbi, args: &[String]) -> Result<Bytes, DeployError> {
    let Some(constructor) = abi.constructor() else {
        if !args.is_empty() {
            return Err(DeployError::CalldataConstruction(format!(
                "contract has no constructor but {} arguments were given",
                args.len()
            )));
        }
        return Ok(Bytes::new());
    };

    let values = coerce_args("constructor", &constructor.inputs, args)?;
    let encoded = constructor
        .abi_encode_input(&values)
        .map_err(|e| DeployError::CalldataConstruction(e.to_string()))?;
    Ok(encoded.into())
}

/// Encode a call to the initializer described by `call`, including its selector
pub fn encode_initializer(abi: &JsonAbi, call: &InitializationCall) -> Result<Bytes, DeployError> {
    let overloads = abi.function(&call.method_name).ok_or_else(|| {
        DeployError::CalldataConstruction(format!("no method `{}` in ABI", call.method_name))
    })?;

    // Resolve overloads by arity
    let function = overloads
        .iter()
        .find(|f| f.inputs.len() == call.args.len())
        .ok_or_else(|| {
            DeployError::CalldataConstruction(format!(
                "no overload of `{}` takes {} arguments",
                call.method_name,
                call.args.len()
            ))
        })?;

    let values = coerce_args(&call.method_name, &function.inputs, &call.args)?;
    let encoded = function
        .abi_encode_input(&values)
        .map_err(|e| DeployError::CalldataConstruction(e.to_string()))?;
    Ok(encoded.into())
}

/// Encode the `TransparentUpgradeableProxy` constructor arguments.
///
/// `data` is delegate-called into `logic` while the proxy is constructed.
pub fn proxy_constructor_args(logic: Address, admin: Address, data: Bytes) -> Bytes {
    (logic, admin, data).abi_encode_params().into()
}

/// Encode the `ProxyAdmin` constructor arguments
pub fn proxy_admin_constructor_args(initial_owner: Address) -> Bytes {
    initial_owner.abi_encode().into()
}

/// Encode an admin-mediated upgrade, optionally calling into the new implementation
pub fn upgrade_calldata(proxy: Address, implementation: Address, call: Option<&Bytes>) -> Bytes {
    match call {
        Some(data) => IProxyAdmin::upgradeAndCallCall {
            proxy,
            implementation,
            data: data.clone(),
        }
        .abi_encode()
        .into(),
        None => IProxyAdmin::upgradeCall {
            proxy,
            implementation,
        }
        .abi_encode()
        .into(),
    }
}

/// Coerce string arguments into ABI values for the given parameters
fn coerce_args(
    context: &str,
    params: &[Param],
    args: &[String],
) -> Result<Vec<DynSolValue>, DeployError> {
    if params.len() != args.len() {
        return Err(DeployError::CalldataConstruction(format!(
            "`{context}` takes {} arguments, got {}",
            params.len(),
            args.len()
        )));
    }

    params
        .iter()
        .zip(args)
        .map(|(param, arg)| {
            let ty = param.resolve().map_err(|e| {
                DeployError::CalldataConstruction(format!("could not resolve `{param}`: {e}"))
            })?;
            ty.coerce_str(arg).map_err(|e| {
                DeployError::CalldataConstruction(format!("could not parse `{param}`: {e}"))
            })
        })
        .collect()
}
