//! Name to circuit mapping.
//!
//! The registry owns one [`Circuit`] per logical name. Circuits are created on
//! first lookup with the default policy, or up front from numeric
//! configuration, and are never removed. Classification rules are bound at
//! most once per name.
//!
//! The map lock covers lookup, insertion and binding only. It is never held
//! while a wrapped action runs, and each circuit guards its own state.

use crate::circuit::{Circuit, CircuitSnapshot, CircuitState};
use crate::classifier::FailureClassifier;
use crate::config::{load_properties, CircuitPolicy, LoadedConfig};
use crate::error::RegistryError;
use crate::events::{CircuitEvent, CircuitListener, Listeners};
use crate::kind::ErrorKind;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

struct RegistryEntry<K: ErrorKind> {
    circuit: Arc<Circuit<K>>,
    /// Set once the one-time classification binding is spent: by an
    /// explicit bind, or by the first gateway invocation with or without a
    /// declaration.
    configured: bool,
}

/// Registry of named circuits.
pub struct Registry<K: ErrorKind = ()> {
    entries: RwLock<HashMap<String, RegistryEntry<K>>>,
    default_policy: CircuitPolicy,
    listeners: Arc<Listeners>,
}

impl<K: ErrorKind> Registry<K> {
    /// Registry whose lazily created circuits use [`CircuitPolicy::default`].
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> RegistryBuilder<K> {
        RegistryBuilder::new()
    }

    /// Builds a registry preconfigured from flat `circuit.<name>.*`
    /// properties. Problems with individual entries are logged and skipped.
    pub fn from_properties<I, P, V>(properties: I) -> Self
    where
        I: IntoIterator<Item = (P, V)>,
        P: AsRef<str>,
        V: AsRef<str>,
    {
        let registry = Self::new();
        registry.load_properties(properties);
        registry
    }

    /// Returns the circuit for `name`, creating it with the default policy
    /// if absent. Concurrent first-time callers all receive the same
    /// instance.
    pub fn get_or_create(&self, name: &str) -> Arc<Circuit<K>> {
        if let Some(entry) = self.read().get(name) {
            return Arc::clone(&entry.circuit);
        }
        let mut entries = self.write();
        Arc::clone(&self.entry(&mut entries, name).circuit)
    }

    /// Binds `rule` to the circuit for `name` unless the one-time binding
    /// is already spent. Creates the circuit if needed. Returns whether
    /// `rule` took effect.
    pub fn bind_classification<C>(&self, name: &str, rule: C) -> bool
    where
        C: FailureClassifier<K> + 'static,
    {
        let mut entries = self.write();
        let entry = self.entry(&mut entries, name);
        Self::bind_entry(name, entry, rule)
    }

    /// Resolves `name` for a gateway invocation. The first invocation for a
    /// name spends the binding: its declaration is bound if it carries one,
    /// otherwise the circuit keeps tripping on every error for good. Once a
    /// name is configured this only takes the read lock.
    pub(crate) fn resolve<C>(&self, name: &str, rule: Option<&C>) -> Arc<Circuit<K>>
    where
        C: FailureClassifier<K> + Clone + 'static,
    {
        if let Some(entry) = self.read().get(name) {
            if entry.configured {
                return Arc::clone(&entry.circuit);
            }
        }

        let mut entries = self.write();
        let entry = self.entry(&mut entries, name);
        match rule {
            Some(rule) => {
                Self::bind_entry(name, entry, rule.clone());
            }
            None if !entry.configured => {
                entry.configured = true;

                #[cfg(feature = "tracing")]
                tracing::debug!(circuit = name, "first invocation without a declaration");
            }
            None => {}
        }
        Arc::clone(&entry.circuit)
    }

    /// Creates a fully configured circuit for `name`.
    ///
    /// Meant for startup, before runtime lookups. If `name` already exists
    /// the existing circuit is kept, a warning is logged and `false` is
    /// returned.
    pub fn bind_numeric_config(
        &self,
        name: &str,
        frequency: usize,
        period: Duration,
        reset_timeout: Duration,
    ) -> bool {
        self.bind_policy(name, CircuitPolicy::windowed(frequency, period, reset_timeout))
    }

    /// Creates a circuit for `name` with an explicit policy. See
    /// [`Registry::bind_numeric_config`].
    pub fn bind_policy(&self, name: &str, policy: CircuitPolicy) -> bool {
        let mut entries = self.write();
        if entries.contains_key(name) {
            #[cfg(feature = "tracing")]
            tracing::warn!(circuit = name, "circuit already exists; keeping its current policy");
            return false;
        }

        #[cfg(feature = "tracing")]
        tracing::info!(
            circuit = name,
            frequency = policy.threshold(),
            period = ?policy.window(),
            reset = ?policy.reset_timeout(),
            "configured circuit"
        );

        entries.insert(name.to_string(), self.new_entry(name, policy));
        true
    }

    /// Parses flat properties and binds every complete entry.
    pub fn load_properties<I, P, V>(&self, properties: I) -> LoadedConfig
    where
        I: IntoIterator<Item = (P, V)>,
        P: AsRef<str>,
        V: AsRef<str>,
    {
        let loaded = load_properties(properties);
        for (name, policy) in loaded.policies() {
            self.bind_policy(name, *policy);
        }
        loaded
    }

    /// Names of every known circuit.
    pub fn list(&self) -> BTreeSet<String> {
        self.read().keys().cloned().collect()
    }

    pub fn exists(&self, name: &str) -> bool {
        self.read().contains_key(name)
    }

    pub fn get(&self, name: &str) -> Result<Arc<Circuit<K>>, RegistryError> {
        self.read()
            .get(name)
            .map(|entry| Arc::clone(&entry.circuit))
            .ok_or_else(|| RegistryError::UnknownCircuit(name.to_string()))
    }

    /// Whether the one-time classification binding for `name` is spent.
    pub fn is_configured(&self, name: &str) -> Result<bool, RegistryError> {
        self.read()
            .get(name)
            .map(|entry| entry.configured)
            .ok_or_else(|| RegistryError::UnknownCircuit(name.to_string()))
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Snapshots of every circuit, ordered by name.
    pub fn snapshots(&self) -> Vec<CircuitSnapshot> {
        let circuits: Vec<_> = self
            .read()
            .values()
            .map(|entry| Arc::clone(&entry.circuit))
            .collect();
        let mut snapshots: Vec<_> = circuits.iter().map(|c| c.snapshot()).collect();
        snapshots.sort_by(|a, b| a.name.cmp(&b.name));
        snapshots
    }

    /// Names of circuits currently rejecting calls.
    pub fn open_circuits(&self) -> BTreeSet<String> {
        self.read()
            .iter()
            .filter(|(_, entry)| entry.circuit.state() != CircuitState::Closed)
            .map(|(name, _)| name.clone())
            .collect()
    }

    fn entry<'a>(
        &self,
        entries: &'a mut HashMap<String, RegistryEntry<K>>,
        name: &str,
    ) -> &'a mut RegistryEntry<K> {
        entries.entry(name.to_string()).or_insert_with(|| {
            #[cfg(feature = "tracing")]
            tracing::info!(circuit = name, "using default circuit policy");
            self.new_entry(name, self.default_policy)
        })
    }

    fn new_entry(&self, name: &str, policy: CircuitPolicy) -> RegistryEntry<K> {
        RegistryEntry {
            circuit: Arc::new(Circuit::with_listeners(
                name,
                policy,
                Arc::clone(&self.listeners),
            )),
            configured: false,
        }
    }

    fn bind_entry<C>(name: &str, entry: &mut RegistryEntry<K>, rule: C) -> bool
    where
        C: FailureClassifier<K> + 'static,
    {
        if entry.configured {
            return false;
        }
        entry.configured = true;
        let bound = entry.circuit.bind_classifier(rule);

        #[cfg(feature = "tracing")]
        tracing::debug!(circuit = name, bound, "bound classification rule");
        #[cfg(not(feature = "tracing"))]
        let _ = name;

        bound
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, RegistryEntry<K>>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, RegistryEntry<K>>> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<K: ErrorKind> Default for Registry<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: ErrorKind> std::fmt::Debug for Registry<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("circuits", &self.list())
            .field("default_policy", &self.default_policy)
            .finish()
    }
}

/// Builder for a [`Registry`].
pub struct RegistryBuilder<K: ErrorKind = ()> {
    default_policy: CircuitPolicy,
    listeners: Listeners,
    _kind: std::marker::PhantomData<fn() -> K>,
}

impl<K: ErrorKind> RegistryBuilder<K> {
    pub fn new() -> Self {
        Self {
            default_policy: CircuitPolicy::default(),
            listeners: Listeners::default(),
            _kind: std::marker::PhantomData,
        }
    }

    /// Policy for circuits created on first lookup.
    ///
    /// Default: trip on the first failure, 15 second reset.
    pub fn default_policy(mut self, policy: CircuitPolicy) -> Self {
        self.default_policy = policy;
        self
    }

    /// Shorthand for a single-failure default policy with the given reset.
    pub fn default_reset_timeout(mut self, reset_timeout: Duration) -> Self {
        self.default_policy = CircuitPolicy::single_failure(reset_timeout);
        self
    }

    /// Registers a listener for every event of every circuit. Wrap it in
    /// [`ForCircuit`](crate::ForCircuit) to observe a single name.
    pub fn listener<L>(mut self, listener: L) -> Self
    where
        L: CircuitListener + 'static,
    {
        self.listeners.add(listener);
        self
    }

    /// Registers a callback for every state transition of every circuit.
    ///
    /// # Callback Signature
    /// `Fn(&str, CircuitState, CircuitState)`: circuit name, from, to.
    ///
    /// # Example
    /// ```rust
    /// use circuit_gate::{CircuitState, Registry};
    ///
    /// let registry: Registry = Registry::builder()
    ///     .on_state_transition(|name, from, to| {
    ///         if to == CircuitState::Open {
    ///             eprintln!("circuit {name} opened (was {from:?})");
    ///         }
    ///     })
    ///     .build();
    /// ```
    pub fn on_state_transition<F>(mut self, f: F) -> Self
    where
        F: Fn(&str, CircuitState, CircuitState) + Send + Sync + 'static,
    {
        self.listeners
            .add(move |event: &CircuitEvent| {
                if let CircuitEvent::StateTransition {
                    circuit,
                    from_state,
                    to_state,
                    ..
                } = event
                {
                    f(circuit, *from_state, *to_state);
                }
            });
        self
    }

    /// Registers a callback for calls admitted by any circuit.
    pub fn on_call_permitted<F>(mut self, f: F) -> Self
    where
        F: Fn(&str, CircuitState) + Send + Sync + 'static,
    {
        self.listeners
            .add(move |event: &CircuitEvent| {
                if let CircuitEvent::CallPermitted { circuit, state, .. } = event {
                    f(circuit, *state);
                }
            });
        self
    }

    /// Registers a callback for calls rejected by any circuit, with the
    /// time left until a trial is allowed.
    pub fn on_call_rejected<F>(mut self, f: F) -> Self
    where
        F: Fn(&str, Duration) + Send + Sync + 'static,
    {
        self.listeners
            .add(move |event: &CircuitEvent| {
                if let CircuitEvent::CallRejected {
                    circuit, remaining, ..
                } = event
                {
                    f(circuit, *remaining);
                }
            });
        self
    }

    pub fn on_success<F>(mut self, f: F) -> Self
    where
        F: Fn(&str, CircuitState) + Send + Sync + 'static,
    {
        self.listeners
            .add(move |event: &CircuitEvent| {
                if let CircuitEvent::SuccessRecorded { circuit, state, .. } = event {
                    f(circuit, *state);
                }
            });
        self
    }

    /// Registers a callback for counted (tripping) failures, with the
    /// number of failures now inside the window.
    pub fn on_failure<F>(mut self, f: F) -> Self
    where
        F: Fn(&str, CircuitState, usize) + Send + Sync + 'static,
    {
        self.listeners
            .add(move |event: &CircuitEvent| {
                if let CircuitEvent::FailureRecorded {
                    circuit,
                    state,
                    failures_in_window,
                    ..
                } = event
                {
                    f(circuit, *state, *failures_in_window);
                }
            });
        self
    }

    /// Registers a callback for failures that were ignored or unclassified.
    pub fn on_ignored<F>(mut self, f: F) -> Self
    where
        F: Fn(&str, CircuitState) + Send + Sync + 'static,
    {
        self.listeners
            .add(move |event: &CircuitEvent| {
                if let CircuitEvent::FailureIgnored { circuit, state, .. } = event {
                    f(circuit, *state);
                }
            });
        self
    }

    pub fn build(self) -> Registry<K> {
        Registry {
            entries: RwLock::new(HashMap::new()),
            default_policy: self.default_policy,
            listeners: Arc::new(self.listeners),
        }
    }
}

impl<K: ErrorKind> Default for RegistryBuilder<K> {
    fn default() -> Self {
        Self::new()
    }
}
