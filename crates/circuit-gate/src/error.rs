use std::time::Duration;
use thiserror::Error;

/// Boxed error produced by an error-mapping hook.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// The circuit rejected a call without running it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("circuit '{name}' is open; trial call permitted in {remaining:?}")]
pub struct CircuitOpenError {
    name: String,
    remaining: Duration,
}

impl CircuitOpenError {
    pub(crate) fn new(name: impl Into<String>, remaining: Duration) -> Self {
        Self {
            name: name.into(),
            remaining,
        }
    }

    /// Name of the circuit that rejected the call.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Time left until the circuit accepts a trial call.
    ///
    /// Zero when the cooldown has elapsed but another caller's trial is
    /// still in flight.
    pub fn remaining(&self) -> Duration {
        self.remaining
    }
}

/// Errors returned when calling through a circuit.
#[derive(Debug, Error)]
pub enum CircuitError<E> {
    /// The circuit is open; the action was not run.
    #[error(transparent)]
    Open(CircuitOpenError),

    /// The circuit was open and the registered error mapper replaced the
    /// rejection with an application error.
    #[error("{0}")]
    Mapped(BoxError),

    /// The action itself failed. The error is returned unchanged.
    #[error("inner error: {0}")]
    Inner(E),
}

impl<E> CircuitError<E> {
    /// Returns true if the call was rejected by an open circuit, whether or
    /// not the rejection was remapped.
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, CircuitError::Open(_) | CircuitError::Mapped(_))
    }

    /// Returns the action's error if present.
    pub fn into_inner(self) -> Option<E> {
        match self {
            CircuitError::Inner(e) => Some(e),
            _ => None,
        }
    }

    /// Returns the unmapped rejection if present.
    pub fn open_error(&self) -> Option<&CircuitOpenError> {
        match self {
            CircuitError::Open(e) => Some(e),
            _ => None,
        }
    }
}

impl<E> From<CircuitOpenError> for CircuitError<E> {
    fn from(err: CircuitOpenError) -> Self {
        CircuitError::Open(err)
    }
}

/// Errors returned by registry queries.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("circuit '{0}' not found")]
    UnknownCircuit(String),
}

/// A problem with one configuration entry. Never fatal: the entry is
/// skipped and loading continues.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid number for '{key}': {value:?}")]
    InvalidNumber { key: String, value: String },

    #[error("unrecognized property: {key}")]
    UnknownProperty { key: String },

    #[error("malformed circuit key: {key}")]
    MalformedKey { key: String },

    /// Some of `frequency`, `period` and `reset` are missing or not
    /// positive; the circuit stays on the default policy.
    #[error(
        "circuit '{name}' is not fully configured (frequency: {frequency:?}, period: {period:?}, reset: {reset:?})"
    )]
    Incomplete {
        name: String,
        frequency: Option<i64>,
        period: Option<i64>,
        reset: Option<i64>,
    },

    /// A policy built from raw parts, for example a deserialized one, is
    /// degenerate.
    #[error("invalid circuit policy: {0}")]
    InvalidPolicy(&'static str),
}
