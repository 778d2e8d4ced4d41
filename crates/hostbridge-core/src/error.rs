//! Error types for the host bridge.
//!
//! Every failure that can cross the process boundary is a [`BridgeError`].
//! On the wire it travels as an [`ErrorEnvelope`] inside the JSON-RPC error
//! `data` field, and the receiving side rebuilds the typed error from it so
//! that kinds such as cancellation survive the round trip.

use crate::value::CastError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Wire-level error classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    CapabilityNotFound,
    InvalidArgument,
    InternalError,
    TypeMismatch,
    HandleNotFound,
    NotFound,
    ReadOnlyProperty,
    OutOfRange,
    Cancelled,
    NotSupported,
}

impl ErrorCode {
    /// JSON-RPC integer code for this classification.
    ///
    /// Standard codes:
    /// - -32601: Method (capability) not found
    /// - -32602: Invalid params
    /// - -32603: Internal error
    ///
    /// Bridge codes (application-defined, -32000 to -32099):
    /// - -32001: Handle not found
    /// - -32002: Type mismatch
    /// - -32003: Member, type or assembly not found
    /// - -32004: Read-only property
    /// - -32005: Index out of range
    /// - -32006: Cancelled
    /// - -32007: Not supported
    pub fn rpc_code(self) -> i32 {
        match self {
            ErrorCode::CapabilityNotFound => -32601,
            ErrorCode::InvalidArgument => -32602,
            ErrorCode::InternalError => -32603,
            ErrorCode::HandleNotFound => -32001,
            ErrorCode::TypeMismatch => -32002,
            ErrorCode::NotFound => -32003,
            ErrorCode::ReadOnlyProperty => -32004,
            ErrorCode::OutOfRange => -32005,
            ErrorCode::Cancelled => -32006,
            ErrorCode::NotSupported => -32007,
        }
    }
}

/// Serializable error payload: `{code, message, capabilityId?, paramName?}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorEnvelope {
    pub code: ErrorCode,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capability_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub param_name: Option<String>,
}

/// Main error type for the bridge.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("Capability not found: {capability_id}")]
    CapabilityNotFound { capability_id: String },

    #[error("{message}")]
    InvalidArgument {
        message: String,
        capability_id: Option<String>,
        param_name: Option<String>,
    },

    #[error("Handle not found: {handle_id}")]
    HandleNotFound { handle_id: String },

    #[error("Type mismatch: {message}")]
    TypeMismatch { message: String },

    #[error("{kind} not found: {name}")]
    NotFound { kind: String, name: String },

    #[error("Method not found: {method}")]
    MethodNotFound { method: String },

    #[error("Property '{property}' of {type_name} is read-only")]
    ReadOnlyProperty { type_name: String, property: String },

    #[error("Index {index} is out of range for length {length}")]
    OutOfRange { index: i64, length: usize },

    #[error("Operation was cancelled")]
    Cancelled,

    #[error("Not supported: {0}")]
    NotSupported(String),

    #[error("Internal error: {message}")]
    Internal {
        message: String,
        capability_id: Option<String>,
    },

    /// A failure reported by the remote peer with no closer local equivalent.
    #[error("{message}")]
    Remote { code: ErrorCode, message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Transport error: {message}")]
    Transport { message: String },

    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },
}

/// Result type alias for bridge operations.
pub type Result<T> = std::result::Result<T, BridgeError>;

impl From<serde_json::Error> for BridgeError {
    fn from(err: serde_json::Error) -> Self {
        BridgeError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<std::io::Error> for BridgeError {
    fn from(err: std::io::Error) -> Self {
        BridgeError::Transport {
            message: err.to_string(),
        }
    }
}

impl From<CastError> for BridgeError {
    fn from(err: CastError) -> Self {
        BridgeError::TypeMismatch {
            message: err.to_string(),
        }
    }
}

impl From<crate::cancel::CancelledError> for BridgeError {
    fn from(_: crate::cancel::CancelledError) -> Self {
        BridgeError::Cancelled
    }
}

impl BridgeError {
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        BridgeError::InvalidArgument {
            message: message.into(),
            capability_id: None,
            param_name: None,
        }
    }

    /// A required parameter was not supplied.
    pub fn missing_argument(param: &str) -> Self {
        BridgeError::InvalidArgument {
            message: format!("Missing required argument '{}'", param),
            capability_id: None,
            param_name: Some(param.to_string()),
        }
    }

    /// An invalid value was supplied for a named parameter.
    pub fn invalid_param(param: &str, message: impl Into<String>) -> Self {
        BridgeError::InvalidArgument {
            message: message.into(),
            capability_id: None,
            param_name: Some(param.to_string()),
        }
    }

    pub fn not_found(kind: impl Into<String>, name: impl Into<String>) -> Self {
        BridgeError::NotFound {
            kind: kind.into(),
            name: name.into(),
        }
    }

    pub fn type_mismatch(message: impl Into<String>) -> Self {
        BridgeError::TypeMismatch {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        BridgeError::Internal {
            message: message.into(),
            capability_id: None,
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        BridgeError::Transport {
            message: message.into(),
        }
    }

    /// Classify a failure raised by host code.
    ///
    /// Typed bridge errors pass through unchanged, failed casts become
    /// `TypeMismatch`, and anything else becomes `Internal` with the
    /// original message (including its context chain).
    pub fn from_host(err: anyhow::Error) -> Self {
        let err = match err.downcast::<BridgeError>() {
            Ok(bridge) => return bridge,
            Err(other) => other,
        };
        if err.is::<crate::cancel::CancelledError>() {
            return BridgeError::Cancelled;
        }
        match err.downcast::<CastError>() {
            Ok(cast) => cast.into(),
            Err(other) => BridgeError::internal(format!("{:#}", other)),
        }
    }

    /// Attach the capability id to errors that carry one.
    pub fn with_capability(self, id: &str) -> Self {
        match self {
            BridgeError::InvalidArgument {
                message,
                capability_id: None,
                param_name,
            } => BridgeError::InvalidArgument {
                message,
                capability_id: Some(id.to_string()),
                param_name,
            },
            BridgeError::Internal {
                message,
                capability_id: None,
            } => BridgeError::Internal {
                message,
                capability_id: Some(id.to_string()),
            },
            other => other,
        }
    }

    /// Wire classification of this error.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            BridgeError::CapabilityNotFound { .. } => ErrorCode::CapabilityNotFound,
            BridgeError::InvalidArgument { .. } => ErrorCode::InvalidArgument,
            BridgeError::HandleNotFound { .. } => ErrorCode::HandleNotFound,
            BridgeError::TypeMismatch { .. } => ErrorCode::TypeMismatch,
            BridgeError::NotFound { .. } | BridgeError::MethodNotFound { .. } => {
                ErrorCode::NotFound
            }
            BridgeError::ReadOnlyProperty { .. } => ErrorCode::ReadOnlyProperty,
            BridgeError::OutOfRange { .. } => ErrorCode::OutOfRange,
            BridgeError::Cancelled => ErrorCode::Cancelled,
            BridgeError::NotSupported(_) => ErrorCode::NotSupported,
            BridgeError::Remote { code, .. } => *code,
            BridgeError::Internal { .. }
            | BridgeError::Config { .. }
            | BridgeError::Transport { .. }
            | BridgeError::Json { .. } => ErrorCode::InternalError,
        }
    }

    /// Convert to a JSON-RPC error code.
    pub fn to_rpc_error_code(&self) -> i32 {
        match self {
            // Unknown wire methods use the standard "method not found" code
            BridgeError::MethodNotFound { .. } => -32601,
            other => other.error_code().rpc_code(),
        }
    }

    /// Build the wire envelope for this error.
    pub fn to_envelope(&self) -> ErrorEnvelope {
        let (capability_id, param_name) = match self {
            BridgeError::CapabilityNotFound { capability_id } => {
                (Some(capability_id.clone()), None)
            }
            BridgeError::InvalidArgument {
                capability_id,
                param_name,
                ..
            } => (capability_id.clone(), param_name.clone()),
            BridgeError::Internal { capability_id, .. } => (capability_id.clone(), None),
            _ => (None, None),
        };
        ErrorEnvelope {
            code: self.error_code(),
            message: self.to_string(),
            capability_id,
            param_name,
        }
    }

    /// Rebuild a typed error from a wire envelope.
    pub fn from_envelope(envelope: ErrorEnvelope) -> Self {
        match envelope.code {
            ErrorCode::Cancelled => BridgeError::Cancelled,
            ErrorCode::InvalidArgument => BridgeError::InvalidArgument {
                message: envelope.message,
                capability_id: envelope.capability_id,
                param_name: envelope.param_name,
            },
            ErrorCode::CapabilityNotFound if envelope.capability_id.is_some() => {
                BridgeError::CapabilityNotFound {
                    capability_id: envelope.capability_id.unwrap_or_default(),
                }
            }
            code => BridgeError::Remote {
                code,
                message: envelope.message,
            },
        }
    }

    /// True when this error represents cooperative cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            BridgeError::Cancelled
                | BridgeError::Remote {
                    code: ErrorCode::Cancelled,
                    ..
                }
        )
    }
}
