use serde::{ser::SerializeStruct, Serialize, Serializer};

/// JSON-RPC error code for malformed parameters.
pub const INVALID_PARAMS_CODE: i64 = -32602;
/// JSON-RPC error code for malformed requests.
pub const INVALID_REQUEST_CODE: i64 = -32600;
/// JSON-RPC error code for internal failures.
pub const INTERNAL_ERROR_CODE: i64 = -32603;
/// Error code used for execution reverts.
pub const REVERT_CODE: i64 = -32000;
/// Error code used when a requested resource does not exist.
pub const RESOURCE_NOT_FOUND_CODE: i64 = -32001;
/// Error code used when an account cannot pay for a transaction.
pub const INSUFFICIENT_FUNDS_CODE: i64 = -32003;

/// The closed set of error kinds a handler can report.
///
/// Every [`HandlerError`] carries exactly one tag. The tag determines the
/// `name`/`_tag` strings and the JSON-RPC error code clients see.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ErrorTag {
    /// Generic structural validation failure.
    InvalidParams,
    /// The request is well formed but cannot be served.
    InvalidRequest,
    /// Malformed address field.
    InvalidAddress,
    /// Malformed caller, origin or from field.
    InvalidCaller,
    /// Malformed target address.
    InvalidTo,
    /// Malformed value.
    InvalidValue,
    /// Call depth out of range.
    InvalidDepth,
    /// Gas limit out of range.
    InvalidGas,
    /// Salt longer than a word.
    InvalidSalt,
    /// Blob versioned hash without the KZG version byte.
    InvalidBlobVersionedHashes,
    /// Inconsistent or insufficient gas price fields.
    InvalidGasPrice,
    /// Nonce mismatch between transaction and account.
    InvalidNonce,
    /// Malformed or unverifiable bytecode.
    InvalidBytecode,
    /// Transaction rejected by the interpreter's validation.
    InvalidTransaction,
    /// The account does not exist.
    AccountNotFound,
    /// The block is not known locally or on the fork.
    UnknownBlock,
    /// The sender cannot pay for the transaction.
    InsufficientBalance,
    /// The sender's balance could not be read during admission.
    NoBalance,
    /// The ABI could not decode a payload.
    DecodeFunctionData,
    /// Execution reverted.
    Revert,
    /// Execution halted with an exceptional condition.
    EvmError,
    /// An internal consistency check failed.
    Internal,
    /// Catch-all for interpreter, VM and clone failures.
    Unexpected,
}

impl ErrorTag {
    /// The `name` and `_tag` string of the error kind.
    pub const fn name(self) -> &'static str {
        match self {
            Self::InvalidParams => "InvalidParamsError",
            Self::InvalidRequest => "InvalidRequestError",
            Self::InvalidAddress => "InvalidAddressError",
            Self::InvalidCaller => "InvalidCallerError",
            Self::InvalidTo => "InvalidToError",
            Self::InvalidValue => "InvalidValueError",
            Self::InvalidDepth => "InvalidDepthError",
            Self::InvalidGas => "InvalidGasError",
            Self::InvalidSalt => "InvalidSaltError",
            Self::InvalidBlobVersionedHashes => "InvalidBlobVersionedHashesError",
            Self::InvalidGasPrice => "InvalidGasPriceError",
            Self::InvalidNonce => "InvalidNonceError",
            Self::InvalidBytecode => "InvalidBytecodeError",
            Self::InvalidTransaction => "InvalidTransactionError",
            Self::AccountNotFound => "AccountNotFoundError",
            Self::UnknownBlock => "UnknownBlockError",
            Self::InsufficientBalance => "InsufficientBalanceError",
            Self::NoBalance => "NoBalanceError",
            Self::DecodeFunctionData => "DecodeFunctionDataError",
            Self::Revert => "RevertError",
            Self::EvmError => "EvmError",
            Self::Internal => "InternalError",
            Self::Unexpected => "UnexpectedError",
        }
    }

    /// The JSON-RPC error code of the error kind.
    pub const fn code(self) -> i64 {
        match self {
            Self::InvalidParams
            | Self::InvalidAddress
            | Self::InvalidCaller
            | Self::InvalidTo
            | Self::InvalidValue
            | Self::InvalidDepth
            | Self::InvalidGas
            | Self::InvalidSalt
            | Self::InvalidBlobVersionedHashes
            | Self::InvalidGasPrice
            | Self::InvalidNonce
            | Self::InvalidBytecode
            | Self::InvalidTransaction
            | Self::DecodeFunctionData => INVALID_PARAMS_CODE,
            Self::InvalidRequest => INVALID_REQUEST_CODE,
            Self::AccountNotFound | Self::UnknownBlock => RESOURCE_NOT_FOUND_CODE,
            Self::InsufficientBalance | Self::NoBalance => INSUFFICIENT_FUNDS_CODE,
            Self::Revert | Self::EvmError => REVERT_CODE,
            Self::Internal | Self::Unexpected => INTERNAL_ERROR_CODE,
        }
    }

    /// True for the validation family of tags.
    pub const fn is_validation(self) -> bool {
        self.code() == INVALID_PARAMS_CODE || matches!(self, Self::InvalidRequest)
    }
}

impl core::fmt::Display for ErrorTag {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.name())
    }
}

/// An error reported by a handler, as seen by clients.
///
/// Serializes to the `{name, _tag, message, code}` shape.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{tag}: {message}")]
pub struct HandlerError {
    /// The error kind.
    pub tag: ErrorTag,
    /// Human readable detail.
    pub message: String,
}

impl HandlerError {
    /// Create a new error with the given tag and message.
    pub fn new(tag: ErrorTag, message: impl Into<String>) -> Self {
        Self { tag, message: message.into() }
    }

    /// Shortcut for [`ErrorTag::Unexpected`].
    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::new(ErrorTag::Unexpected, message)
    }

    /// Shortcut for [`ErrorTag::InvalidParams`].
    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(ErrorTag::InvalidParams, message)
    }

    /// Shortcut for [`ErrorTag::InvalidRequest`].
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(ErrorTag::InvalidRequest, message)
    }

    /// The `name` of the error.
    pub const fn name(&self) -> &'static str {
        self.tag.name()
    }

    /// The JSON-RPC code of the error.
    pub const fn code(&self) -> i64 {
        self.tag.code()
    }
}

impl Serialize for HandlerError {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut s = serializer.serialize_struct("HandlerError", 4)?;
        s.serialize_field("name", self.name())?;
        s.serialize_field("_tag", self.name())?;
        s.serialize_field("message", &self.message)?;
        s.serialize_field("code", &self.code())?;
        s.end()
    }
}
