use crate::classifier::{Classification, DefaultClassifier, FailureClassifier, SharedClassifier};
use crate::config::CircuitPolicy;
use crate::error::{CircuitError, CircuitOpenError};
use crate::events::{CircuitEvent, Listeners};
use crate::kind::{ErrorKind, HasKind};
#[cfg(feature = "metrics")]
use metrics::{counter, gauge};
use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

/// Represents the state of a circuit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[repr(u8)]
pub enum CircuitState {
    /// Calls are allowed; tripping failures are counted.
    Closed = 0,
    /// Calls are rejected until the reset timeout elapses.
    Open = 1,
    /// A single trial call is in flight; every other call is rejected.
    HalfOpen = 2,
}

impl CircuitState {
    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            1 => CircuitState::Open,
            2 => CircuitState::HalfOpen,
            _ => CircuitState::Closed,
        }
    }

    #[cfg(any(feature = "metrics", test))]
    fn as_str(self) -> &'static str {
        match self {
            CircuitState::Closed => "Closed",
            CircuitState::Open => "Open",
            CircuitState::HalfOpen => "HalfOpen",
        }
    }
}

/// Point-in-time view of a circuit.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct CircuitSnapshot {
    pub name: String,
    pub state: CircuitState,
    /// Tripping failures currently inside the window.
    pub failures_in_window: usize,
    pub policy: CircuitPolicy,
    /// Whether a classification rule has been bound.
    pub classified: bool,
    pub time_since_state_change: Duration,
    /// Time until a trial call is allowed; `None` unless the circuit is open.
    pub trial_in: Option<Duration>,
}

struct CircuitInner {
    state: CircuitState,
    /// Timestamps of tripping failures, oldest first, capped at the threshold.
    failures: VecDeque<Instant>,
    opened_at: Option<Instant>,
    last_state_change: Instant,
    /// Bumped on every transition. Outcomes are only applied to the epoch
    /// in which their call was admitted.
    generation: u64,
}

/// A named breaker.
///
/// Bookkeeping (admission and outcome recording) happens under a per-circuit
/// lock; the wrapped action always runs with no lock held.
pub struct Circuit<K: ErrorKind = ()> {
    name: String,
    policy: CircuitPolicy,
    classifier: OnceLock<SharedClassifier<K>>,
    inner: Mutex<CircuitInner>,
    state_atomic: AtomicU8,
    listeners: Arc<Listeners>,
}

impl<K: ErrorKind> Circuit<K> {
    pub fn new(name: impl Into<String>, policy: CircuitPolicy) -> Self {
        Self::with_listeners(name, policy, Arc::new(Listeners::default()))
    }

    pub(crate) fn with_listeners(
        name: impl Into<String>,
        policy: CircuitPolicy,
        listeners: Arc<Listeners>,
    ) -> Self {
        #[cfg(feature = "metrics")]
        crate::describe_metrics();

        Self {
            name: name.into(),
            policy,
            classifier: OnceLock::new(),
            inner: Mutex::new(CircuitInner {
                state: CircuitState::Closed,
                failures: VecDeque::with_capacity(policy.threshold().min(64)),
                opened_at: None,
                last_state_change: Instant::now(),
                generation: 0,
            }),
            state_atomic: AtomicU8::new(CircuitState::Closed as u8),
            listeners,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn policy(&self) -> &CircuitPolicy {
        &self.policy
    }

    /// Current state, read without taking the bookkeeping lock.
    pub fn state(&self) -> CircuitState {
        CircuitState::from_u8(self.state_atomic.load(Ordering::Acquire))
    }

    pub fn is_open(&self) -> bool {
        self.state() == CircuitState::Open
    }

    /// "healthy" when closed, "degraded" when half-open, "unhealthy" when open.
    pub fn health_status(&self) -> &'static str {
        match self.state() {
            CircuitState::Closed => "healthy",
            CircuitState::HalfOpen => "degraded",
            CircuitState::Open => "unhealthy",
        }
    }

    /// Binds a classifier unless one is already bound. Returns whether this
    /// call performed the binding.
    pub fn bind_classifier<C>(&self, classifier: C) -> bool
    where
        C: FailureClassifier<K> + 'static,
    {
        self.classifier.set(Arc::new(classifier)).is_ok()
    }

    pub fn is_classified(&self) -> bool {
        self.classifier.get().is_some()
    }

    /// Classifies an error kind with the bound classifier, or trips on
    /// everything when none is bound.
    pub fn classify(&self, kind: &K) -> Classification {
        match self.classifier.get() {
            Some(classifier) => classifier.classify(kind),
            None => DefaultClassifier.classify(kind),
        }
    }

    /// Runs `action` through the circuit.
    ///
    /// Returns the action's own result unless the circuit rejects the call,
    /// in which case the action is never started.
    pub async fn invoke<F, Fut, T, E>(&self, action: F) -> Result<T, CircuitError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: HasKind<K>,
    {
        let permit = self.try_acquire()?;
        let result = action().await;
        permit.complete(&result);
        result.map_err(CircuitError::Inner)
    }

    /// Synchronous counterpart of [`Circuit::invoke`].
    pub fn invoke_blocking<F, T, E>(&self, action: F) -> Result<T, CircuitError<E>>
    where
        F: FnOnce() -> Result<T, E>,
        E: HasKind<K>,
    {
        let permit = self.try_acquire()?;
        let result = action();
        permit.complete(&result);
        result.map_err(CircuitError::Inner)
    }

    /// Decides whether a call may proceed.
    ///
    /// The OPEN to HALF_OPEN transition and the handing out of the trial
    /// permit happen under one lock acquisition, so exactly one caller
    /// becomes the trial.
    pub(crate) fn try_acquire(&self) -> Result<Permit<'_, K>, CircuitOpenError> {
        let now = Instant::now();
        let mut inner = self.lock();

        match inner.state {
            CircuitState::Closed => {}
            CircuitState::Open => {
                let elapsed = inner
                    .opened_at
                    .map(|opened| now.duration_since(opened))
                    .unwrap_or(Duration::MAX);
                if elapsed < self.policy.reset_timeout() {
                    return Err(self.reject(self.policy.reset_timeout() - elapsed));
                }
                self.transition_to(&mut inner, CircuitState::HalfOpen, now);
            }
            CircuitState::HalfOpen => return Err(self.reject(Duration::ZERO)),
        }

        #[cfg(feature = "tracing")]
        tracing::trace!(circuit = %self.name, state = ?inner.state, "circuit permitted call");

        let state = inner.state;
        self.emit(|| CircuitEvent::CallPermitted {
            circuit: self.name.clone(),
            timestamp: now,
            state,
        });

        Ok(Permit {
            circuit: self,
            generation: inner.generation,
            trial: state == CircuitState::HalfOpen,
            completed: false,
        })
    }

    fn reject(&self, remaining: Duration) -> CircuitOpenError {
        #[cfg(feature = "tracing")]
        tracing::trace!(circuit = %self.name, ?remaining, "circuit rejected call");

        #[cfg(feature = "metrics")]
        counter!("circuit_calls_total", "circuit" => self.name.clone(), "outcome" => "rejected")
            .increment(1);

        self.emit(|| CircuitEvent::CallRejected {
            circuit: self.name.clone(),
            timestamp: Instant::now(),
            remaining,
        });

        CircuitOpenError::new(self.name.clone(), remaining)
    }

    fn record_success(&self, generation: u64) {
        let now = Instant::now();
        let mut inner = self.lock();
        if inner.generation != generation {
            return;
        }

        #[cfg(feature = "metrics")]
        counter!("circuit_calls_total", "circuit" => self.name.clone(), "outcome" => "success")
            .increment(1);

        let state = inner.state;
        self.emit(|| CircuitEvent::SuccessRecorded {
            circuit: self.name.clone(),
            timestamp: now,
            state,
        });

        if state == CircuitState::HalfOpen {
            self.transition_to(&mut inner, CircuitState::Closed, now);
        }
    }

    fn record_failure(&self, generation: u64, classification: Classification) {
        let now = Instant::now();
        let mut inner = self.lock();
        if inner.generation != generation {
            return;
        }
        let state = inner.state;

        if !classification.trips() {
            #[cfg(feature = "metrics")]
            counter!("circuit_calls_total", "circuit" => self.name.clone(), "outcome" => "ignored")
                .increment(1);

            self.emit(|| CircuitEvent::FailureIgnored {
                circuit: self.name.clone(),
                timestamp: now,
                state,
            });

            // The trial reached the dependency and got an answer that does
            // not indicate it is down.
            if state == CircuitState::HalfOpen {
                self.transition_to(&mut inner, CircuitState::Closed, now);
            }
            return;
        }

        #[cfg(feature = "metrics")]
        counter!("circuit_calls_total", "circuit" => self.name.clone(), "outcome" => "failure")
            .increment(1);

        match state {
            CircuitState::Closed => {
                if let Some(window) = self.policy.window() {
                    prune(&mut inner.failures, window, now);
                }
                inner.failures.push_back(now);
                while inner.failures.len() > self.policy.threshold() {
                    inner.failures.pop_front();
                }

                let failures_in_window = inner.failures.len();
                self.emit(|| CircuitEvent::FailureRecorded {
                    circuit: self.name.clone(),
                    timestamp: now,
                    state,
                    failures_in_window,
                });

                if failures_in_window >= self.policy.threshold() {
                    self.transition_to(&mut inner, CircuitState::Open, now);
                }
            }
            CircuitState::HalfOpen => {
                self.emit(|| CircuitEvent::FailureRecorded {
                    circuit: self.name.clone(),
                    timestamp: now,
                    state,
                    failures_in_window: 1,
                });
                self.transition_to(&mut inner, CircuitState::Open, now);
            }
            CircuitState::Open => {}
        }
    }

    /// A trial permit was dropped before its call finished. Reopen without
    /// restarting the cooldown so the next caller can run the trial.
    fn abandon_trial(&self, generation: u64) {
        let mut inner = self.lock();
        if inner.generation != generation || inner.state != CircuitState::HalfOpen {
            return;
        }
        let opened_at = inner.opened_at;
        self.transition_to(&mut inner, CircuitState::Open, Instant::now());
        inner.opened_at = opened_at;
    }

    /// Forces the circuit open and starts a fresh cooldown.
    pub fn force_open(&self) {
        let now = Instant::now();
        let mut inner = self.lock();
        if inner.state == CircuitState::Open {
            inner.opened_at = Some(now);
        } else {
            self.transition_to(&mut inner, CircuitState::Open, now);
        }
    }

    /// Forces the circuit closed and clears the failure window.
    pub fn force_closed(&self) {
        let mut inner = self.lock();
        self.transition_to(&mut inner, CircuitState::Closed, Instant::now());
        inner.failures.clear();
    }

    /// Resets the circuit to the closed state and clears counts.
    pub fn reset(&self) {
        self.force_closed();
    }

    pub fn snapshot(&self) -> CircuitSnapshot {
        let now = Instant::now();
        let mut inner = self.lock();
        if let Some(window) = self.policy.window() {
            prune(&mut inner.failures, window, now);
        }

        let trial_in = match (inner.state, inner.opened_at) {
            (CircuitState::Open, Some(opened)) => Some(
                self.policy
                    .reset_timeout()
                    .saturating_sub(now.duration_since(opened)),
            ),
            _ => None,
        };

        CircuitSnapshot {
            name: self.name.clone(),
            state: inner.state,
            failures_in_window: inner.failures.len(),
            policy: self.policy,
            classified: self.is_classified(),
            time_since_state_change: now.duration_since(inner.last_state_change),
            trial_in,
        }
    }

    fn transition_to(&self, inner: &mut CircuitInner, to: CircuitState, now: Instant) {
        let from = inner.state;
        if from == to {
            return;
        }

        self.emit(|| CircuitEvent::StateTransition {
            circuit: self.name.clone(),
            timestamp: now,
            from_state: from,
            to_state: to,
        });

        #[cfg(feature = "tracing")]
        tracing::info!(circuit = %self.name, ?from, ?to, "circuit state transition");

        #[cfg(feature = "metrics")]
        {
            counter!(
                "circuit_transitions_total",
                "circuit" => self.name.clone(),
                "from" => from.as_str(),
                "to" => to.as_str()
            )
            .increment(1);
            gauge!("circuit_state", "circuit" => self.name.clone()).set(to as u8 as f64);
        }

        inner.state = to;
        inner.generation = inner.generation.wrapping_add(1);
        inner.last_state_change = now;
        inner.failures.clear();
        match to {
            CircuitState::Open => inner.opened_at = Some(now),
            CircuitState::Closed => inner.opened_at = None,
            CircuitState::HalfOpen => {}
        }
        self.state_atomic.store(to as u8, Ordering::Release);
    }

    fn emit(&self, event: impl FnOnce() -> CircuitEvent) {
        if !self.listeners.is_empty() {
            self.listeners.emit(&event());
        }
    }

    fn lock(&self) -> MutexGuard<'_, CircuitInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<K: ErrorKind> std::fmt::Debug for Circuit<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Circuit")
            .field("name", &self.name)
            .field("state", &self.state())
            .field("policy", &self.policy)
            .field("classified", &self.is_classified())
            .finish()
    }
}

fn prune(failures: &mut VecDeque<Instant>, window: Duration, now: Instant) {
    while let Some(oldest) = failures.front() {
        if now.duration_since(*oldest) > window {
            failures.pop_front();
        } else {
            break;
        }
    }
}

/// Admission ticket for one call. Completing it records the outcome;
/// dropping an uncompleted trial permit releases the trial slot.
pub(crate) struct Permit<'a, K: ErrorKind> {
    circuit: &'a Circuit<K>,
    generation: u64,
    trial: bool,
    completed: bool,
}

impl<K: ErrorKind> Permit<'_, K> {
    pub(crate) fn complete<T, E: HasKind<K>>(mut self, result: &Result<T, E>) {
        self.completed = true;
        match result {
            Ok(_) => self.circuit.record_success(self.generation),
            Err(err) => {
                let classification = self.circuit.classify(&HasKind::<K>::kind(err));
                self.circuit.record_failure(self.generation, classification);
            }
        }
    }
}

impl<K: ErrorKind> Drop for Permit<'_, K> {
    fn drop(&mut self) {
        if self.trial && !self.completed {
            self.circuit.abandon_trial(self.generation);
        }
    }
}
