//! ABI encoding and decoding for the contract handlers.

use alloy::{
    dyn_abi::{DynSolType, DynSolValue, FunctionExt, JsonAbiExt, Specifier},
    json_abi::{Function, JsonAbi},
    primitives::{hex, Bytes},
    sol_types::{Panic, Revert, SolError},
};

/// Errors produced by the ABI codec.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum AbiError {
    /// No function with that name takes that many arguments.
    #[error("function {name} with {args} arguments not found in the ABI")]
    FunctionNotFound {
        /// Function name.
        name: String,
        /// Number of supplied arguments.
        args: usize,
    },
    /// Constructor arguments were given, but the ABI has no constructor.
    #[error("the ABI has no constructor but {0} arguments were given")]
    ConstructorNotFound(usize),
    /// No error in the ABI matches the selector.
    #[error("no error with selector {0} in the ABI")]
    ErrorNotFound(String),
    /// Error data shorter than a selector.
    #[error("error data is too short to hold a selector")]
    MissingSelector,
    /// Encoding or decoding failed.
    #[error(transparent)]
    Codec(#[from] alloy::dyn_abi::Error),
    /// Static encoding or decoding failed.
    #[error(transparent)]
    Sol(#[from] alloy::sol_types::Error),
}

/// A decoded revert.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedError {
    /// Error name, `Error` and `Panic` for the built-in errors.
    pub name: String,
    /// Decoded arguments.
    pub args: Vec<DynSolValue>,
}

impl core::fmt::Display for DecodedError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.name)?;
        if !self.args.is_empty() {
            let args: Vec<_> = self.args.iter().map(format_value).collect();
            write!(f, " {}", args.join(", "))?;
        }
        Ok(())
    }
}

/// Find `name` in `abi`, picking the overload that takes `arity` arguments.
pub fn function<'a>(abi: &'a JsonAbi, name: &str, arity: usize) -> Result<&'a Function, AbiError> {
    abi.function(name)
        .and_then(|overloads| overloads.iter().find(|f| f.inputs.len() == arity))
        .ok_or_else(|| AbiError::FunctionNotFound { name: name.to_owned(), args: arity })
}

/// Selector followed by the encoded arguments.
pub fn encode_function_data(function: &Function, args: &[DynSolValue]) -> Result<Bytes, AbiError> {
    Ok(function.abi_encode_input(args)?.into())
}

/// Decode a function's return data.
pub fn decode_function_result(function: &Function, data: &[u8]) -> Result<Vec<DynSolValue>, AbiError> {
    Ok(function.abi_decode_output(data)?)
}

/// Decode revert data against the built-in `Error(string)` and
/// `Panic(uint256)` and the errors declared in `abi`.
pub fn decode_error_result(abi: &JsonAbi, data: &[u8]) -> Result<DecodedError, AbiError> {
    let selector: [u8; 4] = data.get(..4).and_then(|s| s.try_into().ok()).ok_or(AbiError::MissingSelector)?;

    if selector == Revert::SELECTOR {
        let revert = Revert::abi_decode(data)?;
        return Ok(DecodedError { name: "Error".into(), args: vec![DynSolValue::String(revert.reason)] });
    }
    if selector == Panic::SELECTOR {
        let panic = Panic::abi_decode(data)?;
        return Ok(DecodedError { name: "Panic".into(), args: vec![DynSolValue::Uint(panic.code, 256)] });
    }

    let error = abi
        .errors()
        .find(|error| error.selector().0 == selector)
        .ok_or_else(|| AbiError::ErrorNotFound(hex::encode_prefixed(selector)))?;
    let types = error.inputs.iter().map(|param| param.resolve()).collect::<Result<Vec<DynSolType>, _>>()?;
    let args = match DynSolType::Tuple(types).abi_decode_params(&data[4..])? {
        DynSolValue::Tuple(args) => args,
        single => vec![single],
    };
    Ok(DecodedError { name: error.name.clone(), args })
}

/// Deployment payload: `bytecode` followed by the encoded constructor
/// arguments.
pub fn encode_deploy_data(abi: &JsonAbi, bytecode: &[u8], args: &[DynSolValue]) -> Result<Bytes, AbiError> {
    let mut data = bytecode.to_vec();
    match &abi.constructor {
        Some(constructor) => data.extend(constructor.abi_encode_input(args)?),
        None if args.is_empty() => {}
        None => return Err(AbiError::ConstructorNotFound(args.len())),
    }
    Ok(data.into())
}

/// Human readable form of a value, for error messages.
pub fn format_value(value: &DynSolValue) -> String {
    match value {
        DynSolValue::Bool(b) => b.to_string(),
        DynSolValue::Int(i, _) => i.to_string(),
        DynSolValue::Uint(u, _) => u.to_string(),
        DynSolValue::FixedBytes(word, size) => hex::encode_prefixed(&word[..*size]),
        DynSolValue::Address(address) => address.to_checksum(None),
        DynSolValue::Bytes(bytes) => hex::encode_prefixed(bytes),
        DynSolValue::String(s) => format!("{s:?}"),
        DynSolValue::Array(values) | DynSolValue::FixedArray(values) => {
            format!("[{}]", values.iter().map(format_value).collect::<Vec<_>>().join(", "))
        }
        DynSolValue::Tuple(values) => {
            format!("({})", values.iter().map(format_value).collect::<Vec<_>>().join(", "))
        }
        other => format!("{other:?}"),
    }
}
