//! Error types for the connector.

use livelink_value::{Attributes, ValueError};
use thiserror::Error;

/// Result type for connector operations.
pub type ConnectorResult<T> = Result<T, ConnectorError>;

/// Result type returned by adapters.
pub type AdapterResult<T> = Result<T, InterfaceError>;

/// Code of [`InterfaceError::cancelled`].
pub const CANCELLED_CODE: i32 = 499;

/// An adapter's verdict on a failed operation.
///
/// `code <= 0` means no backend verdict was reached (connection lost,
/// socket closed) and the operation may be retried. `code > 0` is a
/// backend rejection such as an HTTP status and is never retried.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("interface error {code}: {message}")]
pub struct InterfaceError {
    /// Error code. Non-positive codes are transient.
    pub code: i32,
    /// Human readable message, usually the backend status text.
    pub message: String,
    /// Untouched message from the backend, if it differs.
    pub original_message: String,
    /// Extra context attached by the adapter.
    pub data: Attributes,
}

impl InterfaceError {
    /// Creates an error with the given code and message.
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            original_message: String::new(),
            data: Attributes::new(),
        }
    }

    /// Creates a retryable error (code 0).
    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(0, message)
    }

    /// Creates a non-retryable error with a backend status code.
    ///
    /// Codes below 1 are clamped to 1 so the error stays terminal.
    pub fn terminal(code: i32, message: impl Into<String>) -> Self {
        Self::new(code.max(1), message)
    }

    /// Creates a 404 error.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(404, message)
    }

    /// Creates the error carried by channels whose task was cancelled.
    pub fn cancelled() -> Self {
        Self::new(CANCELLED_CODE, "operation cancelled")
    }

    /// Returns true if the operation was cancelled locally.
    pub fn is_cancelled(&self) -> bool {
        self.code == CANCELLED_CODE
    }

    /// Creates the error returned by adapters for operations they lack.
    pub fn unsupported(operation: &str) -> Self {
        Self::new(501, format!("{operation} not implemented in interface"))
    }

    /// Sets the original backend message.
    pub fn with_original_message(mut self, message: impl Into<String>) -> Self {
        self.original_message = message.into();
        self
    }

    /// Attaches extra context.
    pub fn with_data(mut self, data: Attributes) -> Self {
        self.data = data;
        self
    }

    /// Returns true if the operation can be retried.
    pub fn is_transient(&self) -> bool {
        self.code <= 0
    }

    /// Returns true if the backend rejected the operation.
    pub fn is_terminal(&self) -> bool {
        !self.is_transient()
    }
}

/// Errors raised by the connector itself.
#[derive(Error, Debug)]
pub enum ConnectorError {
    /// An adapter reported a failure.
    #[error(transparent)]
    Interface(#[from] InterfaceError),

    /// An endpoint or call named an adapter that was never registered.
    #[error("unknown adapter: {name}")]
    UnknownAdapter {
        /// Name of the adapter.
        name: String,
    },

    /// No endpoint mapping exists and no default adapter is configured.
    #[error("no adapter for endpoint {entity_type} and no default adapter")]
    NoDefaultAdapter {
        /// Endpoint that could not be resolved.
        entity_type: String,
    },

    /// The connector was built outside a tokio runtime.
    #[error("connector requires a tokio runtime")]
    NoRuntime,

    /// The entity is not attached to a live connector.
    #[error("entity is not attached to a connector")]
    Detached,

    /// A channel was dropped before it produced a value.
    #[error("channel closed before a value was pushed")]
    ChannelClosed,

    /// Operation not permitted for the given input.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why the operation is invalid.
        message: String,
    },

    /// Configuration could not be parsed.
    #[error("configuration error: {0}")]
    Config(#[from] serde_json::Error),

    /// Value conversion or encoding failed.
    #[error("value error: {0}")]
    Value(#[from] ValueError),
}

impl ConnectorError {
    /// Creates an unknown adapter error.
    pub fn unknown_adapter(name: impl Into<String>) -> Self {
        Self::UnknownAdapter { name: name.into() }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Returns the adapter error, if this is one.
    pub fn as_interface(&self) -> Option<&InterfaceError> {
        match self {
            ConnectorError::Interface(e) => Some(e),
            _ => None,
        }
    }
}
