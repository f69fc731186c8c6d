//! # Error Types
//!
//! Error taxonomy surfaced by the bus.

use crate::layer::RoutingViolation;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Boxed error returned by handler bodies.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Result type for handler bodies.
pub type HandlerResult<T> = Result<T, BoxError>;

/// Result type for bus operations.
pub type BusResult<T> = Result<T, BusError>;

/// The three message kinds carried by the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Event,
    Command,
    Query,
}

impl MessageKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Event => "event",
            Self::Command => "command",
            Self::Query => "query",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors surfaced by registration and dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BusError {
    /// No handler is registered for the payload type.
    #[error("No {kind} handler registered for {payload_type}")]
    NoHandlerRegistered {
        kind: MessageKind,
        payload_type: String,
    },

    /// A single-slot handler already exists.
    #[error("A {kind} handler is already registered for {payload_type}")]
    HandlerAlreadyRegistered {
        kind: MessageKind,
        payload_type: String,
    },

    /// The message crossed a forbidden layer edge.
    #[error(transparent)]
    RoutingViolation(#[from] RoutingViolation),

    /// The handler did not finish before the deadline.
    #[error("Handler timed out after {}ms", .timeout.as_millis())]
    Timeout { timeout: Duration },

    /// The handler returned an error or panicked.
    #[error("Handler execution failed: {reason}")]
    ExecutionFailed { reason: String },

    /// Internal consistency failure between the stored handler and the
    /// requested types.
    #[error("Type mismatch: expected {expected}")]
    TypeMismatch { expected: String },

    /// A weakly held handler's owner no longer exists.
    #[error("Handler {handler} was deallocated")]
    HandlerDeallocated { handler: String },
}

impl BusError {
    /// Convert a handler's boxed error, keeping typed bus errors intact.
    #[must_use]
    pub fn from_handler_error(error: BoxError) -> Self {
        match error.downcast::<BusError>() {
            Ok(bus_error) => *bus_error,
            Err(other) => Self::ExecutionFailed {
                reason: other.to_string(),
            },
        }
    }

    pub fn no_handler(kind: MessageKind, payload_type: impl Into<String>) -> Self {
        Self::NoHandlerRegistered {
            kind,
            payload_type: payload_type.into(),
        }
    }

    pub fn already_registered(kind: MessageKind, payload_type: impl Into<String>) -> Self {
        Self::HandlerAlreadyRegistered {
            kind,
            payload_type: payload_type.into(),
        }
    }

    pub fn type_mismatch(expected: impl Into<String>) -> Self {
        Self::TypeMismatch {
            expected: expected.into(),
        }
    }

    /// Short label for metrics and logs.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::NoHandlerRegistered { .. } => "no_handler",
            Self::HandlerAlreadyRegistered { .. } => "already_registered",
            Self::RoutingViolation(_) => "routing_violation",
            Self::Timeout { .. } => "timeout",
            Self::ExecutionFailed { .. } => "execution_failed",
            Self::TypeMismatch { .. } => "type_mismatch",
            Self::HandlerDeallocated { .. } => "handler_deallocated",
        }
    }
}

/// Invalid configuration values.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("{field} must be greater than zero")]
    ZeroValue { field: &'static str },
}
