//! Named circuit breakers behind a shared registry.
//!
//! Calls to a dependency are routed through a circuit identified by a
//! logical name. Once the dependency's tripping failures reach a threshold
//! inside a sliding window the circuit opens and rejects calls without
//! running them; after a cooldown a single trial call tests for recovery.
//!
//! ## States
//! - **Closed**: calls pass through; tripping failures are counted
//! - **Open**: calls are rejected immediately with [`CircuitOpenError`]
//! - **Half-Open**: exactly one trial call is in flight; its outcome closes
//!   or reopens the circuit
//!
//! ## Usage
//!
//! ```rust
//! use circuit_gate::{CircuitError, Gateway, Registry};
//! use std::sync::Arc;
//!
//! # async fn example() {
//! // Trip `payments` after 2 failures within 500ms; allow a trial after 1s
//! let registry = Registry::from_properties([
//!     ("circuit.payments.frequency", "2"),
//!     ("circuit.payments.period", "500"),
//!     ("circuit.payments.reset", "1000"),
//! ]);
//! let gateway = Gateway::new(Arc::new(registry));
//!
//! match gateway.call("payments", || async { Ok::<_, std::io::Error>(()) }).await {
//!     Ok(()) => {}
//!     Err(CircuitError::Open(open)) => eprintln!("retry in {:?}", open.remaining()),
//!     Err(other) => eprintln!("{other}"),
//! }
//! # }
//! ```
//!
//! Names without configuration get the default policy: the first failure
//! opens the circuit, and it stays open for 15 seconds.
//!
//! ## Classifying Failures
//!
//! Errors expose an [`ErrorKind`] through [`HasKind`]. A call site can
//! declare which kinds trip the circuit and which are ignored. Only the
//! first call for a name binds: if it declares nothing, every error keeps
//! tripping that circuit.
//!
//! ```rust
//! use circuit_gate::{ClassificationRule, ErrorKind, Gateway, HasKind};
//!
//! #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
//! enum Kind { Network, Timeout, NotFound }
//!
//! impl ErrorKind for Kind {
//!     fn parent(&self) -> Option<Self> {
//!         match self {
//!             Kind::Timeout => Some(Kind::Network),
//!             _ => None,
//!         }
//!     }
//! }
//!
//! #[derive(Debug)]
//! struct ApiError(Kind);
//!
//! impl HasKind<Kind> for ApiError {
//!     fn kind(&self) -> Kind { self.0 }
//! }
//!
//! let gateway: Gateway<Kind> = Gateway::builder().build();
//! let rule = ClassificationRule::new().trip([Kind::Network]);
//!
//! // NotFound is not a network problem: it never opens the circuit
//! for _ in 0..10 {
//!     let _ = gateway.call_blocking_with("users", &rule, || Err::<(), _>(ApiError(Kind::NotFound)));
//! }
//! assert!(!gateway.registry().get("users").unwrap().is_open());
//!
//! // Timeout descends from Network, so it trips
//! let _ = gateway.call_blocking_with("users", &rule, || Err::<(), _>(ApiError(Kind::Timeout)));
//! assert!(gateway.registry().get("users").unwrap().is_open());
//! ```
//!
//! ## Tower Middleware
//!
//! [`CircuitLayer`] wraps any `tower::Service` under a named circuit of a
//! gateway.
//!
//! ## Feature Flags
//! - `tracing` (default): logs transitions, circuit creation and configuration problems
//! - `metrics`: call outcome and transition counters plus a state gauge
//! - `serde`: `Serialize` for [`CircuitState`] and [`CircuitSnapshot`], serde for [`CircuitPolicy`]

pub use circuit::{Circuit, CircuitSnapshot, CircuitState};
pub use classifier::{
    Classification, ClassificationRule, DefaultClassifier, FailureClassifier, FnClassifier,
    KindSet, SharedClassifier,
};
pub use config::{CircuitPolicy, LoadedConfig};
pub use error::{BoxError, CircuitError, CircuitOpenError, ConfigError, RegistryError};
pub use events::{CircuitEvent, CircuitListener, ForCircuit};
pub use gateway::{CallContext, ErrorMapper, Gateway, GatewayBuilder};
pub use kind::{ErrorKind, HasKind};
pub use layer::{CircuitLayer, CircuitService};
pub use registry::{Registry, RegistryBuilder};

mod circuit;
pub mod classifier;
pub mod config;
mod error;
mod events;
mod gateway;
mod kind;
mod layer;
mod registry;

#[cfg(feature = "metrics")]
static METRICS_INIT: std::sync::Once = std::sync::Once::new();

#[cfg(feature = "metrics")]
pub(crate) fn describe_metrics() {
    use metrics::{describe_counter, describe_gauge};

    METRICS_INIT.call_once(|| {
        describe_counter!(
            "circuit_calls_total",
            "Calls through named circuits by outcome (success, failure, ignored, rejected)"
        );
        describe_counter!(
            "circuit_transitions_total",
            "Total number of circuit state transitions"
        );
        describe_gauge!(
            "circuit_state",
            "Current state of the circuit (0 closed, 1 open, 2 half-open)"
        );
    });
}
