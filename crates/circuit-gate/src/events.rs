//! Circuit events and the listeners that observe them.
//!
//! Every circuit created by a registry shares one listener collection, so a
//! single listener sees all names unless it is wrapped in [`ForCircuit`].

use crate::circuit::CircuitState;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Events emitted by a circuit.
#[derive(Debug, Clone)]
pub enum CircuitEvent {
    StateTransition {
        circuit: String,
        timestamp: Instant,
        from_state: CircuitState,
        to_state: CircuitState,
    },
    CallPermitted {
        circuit: String,
        timestamp: Instant,
        state: CircuitState,
    },
    CallRejected {
        circuit: String,
        timestamp: Instant,
        remaining: Duration,
    },
    SuccessRecorded {
        circuit: String,
        timestamp: Instant,
        state: CircuitState,
    },
    /// A tripping failure was counted.
    FailureRecorded {
        circuit: String,
        timestamp: Instant,
        state: CircuitState,
        failures_in_window: usize,
    },
    /// A failure that was ignored or matched no trip kind.
    FailureIgnored {
        circuit: String,
        timestamp: Instant,
        state: CircuitState,
    },
}

impl CircuitEvent {
    /// Short, stable identifier of the event.
    pub fn event_type(&self) -> &'static str {
        match self {
            CircuitEvent::StateTransition { .. } => "state_transition",
            CircuitEvent::CallPermitted { .. } => "call_permitted",
            CircuitEvent::CallRejected { .. } => "call_rejected",
            CircuitEvent::SuccessRecorded { .. } => "success_recorded",
            CircuitEvent::FailureRecorded { .. } => "failure_recorded",
            CircuitEvent::FailureIgnored { .. } => "failure_ignored",
        }
    }

    pub fn timestamp(&self) -> Instant {
        match self {
            CircuitEvent::StateTransition { timestamp, .. }
            | CircuitEvent::CallPermitted { timestamp, .. }
            | CircuitEvent::CallRejected { timestamp, .. }
            | CircuitEvent::SuccessRecorded { timestamp, .. }
            | CircuitEvent::FailureRecorded { timestamp, .. }
            | CircuitEvent::FailureIgnored { timestamp, .. } => *timestamp,
        }
    }

    /// Name of the circuit that produced the event.
    pub fn circuit_name(&self) -> &str {
        match self {
            CircuitEvent::StateTransition { circuit, .. }
            | CircuitEvent::CallPermitted { circuit, .. }
            | CircuitEvent::CallRejected { circuit, .. }
            | CircuitEvent::SuccessRecorded { circuit, .. }
            | CircuitEvent::FailureRecorded { circuit, .. }
            | CircuitEvent::FailureIgnored { circuit, .. } => circuit,
        }
    }
}

/// Observer of circuit events.
///
/// Called synchronously while the emitting circuit's bookkeeping lock is
/// held, so implementations must not call back into the same circuit.
/// Any `Fn(&CircuitEvent)` closure is a listener.
pub trait CircuitListener: Send + Sync {
    fn on_event(&self, event: &CircuitEvent);
}

impl<F> CircuitListener for F
where
    F: Fn(&CircuitEvent) + Send + Sync,
{
    fn on_event(&self, event: &CircuitEvent) {
        self(event)
    }
}

/// Forwards only the events of one named circuit.
///
/// ```rust
/// use circuit_gate::{CircuitEvent, ForCircuit, Registry};
///
/// let registry: Registry = Registry::builder()
///     .listener(ForCircuit::new("payments", |event: &CircuitEvent| {
///         println!("payments: {}", event.event_type());
///     }))
///     .build();
/// ```
pub struct ForCircuit<L> {
    name: String,
    listener: L,
}

impl<L: CircuitListener> ForCircuit<L> {
    pub fn new(name: impl Into<String>, listener: L) -> Self {
        Self {
            name: name.into(),
            listener,
        }
    }
}

impl<L: CircuitListener> CircuitListener for ForCircuit<L> {
    fn on_event(&self, event: &CircuitEvent) {
        if event.circuit_name() == self.name {
            self.listener.on_event(event);
        }
    }
}

/// Listeners shared by the circuits of one registry.
#[derive(Clone, Default)]
pub(crate) struct Listeners {
    listeners: Vec<Arc<dyn CircuitListener>>,
}

impl Listeners {
    pub(crate) fn add(&mut self, listener: impl CircuitListener + 'static) {
        self.listeners.push(Arc::new(listener));
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    /// Delivers `event` in registration order. A panicking listener is
    /// logged and skipped; the circuit's bookkeeping carries on.
    pub(crate) fn emit(&self, event: &CircuitEvent) {
        for listener in &self.listeners {
            if catch_unwind(AssertUnwindSafe(|| listener.on_event(event))).is_err() {
                #[cfg(feature = "tracing")]
                tracing::warn!(
                    circuit = event.circuit_name(),
                    event = event.event_type(),
                    "circuit event listener panicked"
                );
            }
        }
    }
}

impl std::fmt::Debug for Listeners {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listeners")
            .field("len", &self.listeners.len())
            .finish()
    }
}
