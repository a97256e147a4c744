//! The public entry point: run an action under a named circuit.
//!
//! ```rust
//! use circuit_gate::{CircuitError, Gateway, Registry};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn example() {
//! let registry = Registry::new();
//! registry.bind_numeric_config("payments", 2, Duration::from_millis(500), Duration::from_secs(1));
//! let gateway = Gateway::new(Arc::new(registry));
//!
//! let result = gateway
//!     .call("payments", || async { Ok::<_, std::io::Error>("charged") })
//!     .await;
//!
//! match result {
//!     Ok(receipt) => println!("{receipt}"),
//!     Err(CircuitError::Open(err)) => eprintln!("retry in {:?}", err.remaining()),
//!     Err(CircuitError::Mapped(err)) => eprintln!("unavailable: {err}"),
//!     Err(CircuitError::Inner(err)) => eprintln!("payment failed: {err}"),
//! }
//! # }
//! ```

use crate::circuit::Circuit;
use crate::classifier::ClassificationRule;
use crate::error::{BoxError, CircuitError, CircuitOpenError};
use crate::kind::{ErrorKind, HasKind};
use crate::registry::Registry;
use std::future::Future;
use std::sync::Arc;

/// Describes the call a rejection belongs to; handed to the error mapper.
#[derive(Debug, Clone, Copy)]
pub struct CallContext<'a, K: ErrorKind> {
    name: &'a str,
    rule: Option<&'a ClassificationRule<K>>,
}

impl<'a, K: ErrorKind> CallContext<'a, K> {
    /// Name of the circuit that rejected the call.
    pub fn name(&self) -> &'a str {
        self.name
    }

    /// Classification declared at the call site, if any.
    pub fn rule(&self) -> Option<&'a ClassificationRule<K>> {
        self.rule
    }
}

/// Hook that turns a rejection into an application error.
pub type ErrorMapper<K> =
    dyn Fn(&CallContext<'_, K>, CircuitOpenError) -> BoxError + Send + Sync;

/// Runs actions under named circuits held in a shared [`Registry`].
pub struct Gateway<K: ErrorKind = ()> {
    registry: Arc<Registry<K>>,
    mapper: Option<Arc<ErrorMapper<K>>>,
}

impl<K: ErrorKind> Gateway<K> {
    pub fn new(registry: Arc<Registry<K>>) -> Self {
        Self {
            registry,
            mapper: None,
        }
    }

    pub fn builder() -> GatewayBuilder<K> {
        GatewayBuilder::new()
    }

    pub fn registry(&self) -> &Arc<Registry<K>> {
        &self.registry
    }

    /// Runs `action` under the circuit `name`, creating the circuit with the
    /// default policy if absent.
    pub async fn call<F, Fut, T, E>(&self, name: &str, action: F) -> Result<T, CircuitError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: HasKind<K>,
    {
        self.dispatch(name, None, action).await
    }

    /// Like [`Gateway::call`], declaring which error kinds trip and which
    /// are ignored. The declaration is bound on the first call for `name`
    /// and ignored afterwards.
    pub async fn call_with<F, Fut, T, E>(
        &self,
        name: &str,
        rule: &ClassificationRule<K>,
        action: F,
    ) -> Result<T, CircuitError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: HasKind<K>,
    {
        self.dispatch(name, Some(rule), action).await
    }

    /// Synchronous counterpart of [`Gateway::call`].
    pub fn call_blocking<F, T, E>(&self, name: &str, action: F) -> Result<T, CircuitError<E>>
    where
        F: FnOnce() -> Result<T, E>,
        E: HasKind<K>,
    {
        self.call_blocking_with_rule(name, None, action)
    }

    /// Synchronous counterpart of [`Gateway::call_with`].
    pub fn call_blocking_with<F, T, E>(
        &self,
        name: &str,
        rule: &ClassificationRule<K>,
        action: F,
    ) -> Result<T, CircuitError<E>>
    where
        F: FnOnce() -> Result<T, E>,
        E: HasKind<K>,
    {
        self.call_blocking_with_rule(name, Some(rule), action)
    }

    async fn dispatch<F, Fut, T, E>(
        &self,
        name: &str,
        rule: Option<&ClassificationRule<K>>,
        action: F,
    ) -> Result<T, CircuitError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: HasKind<K>,
    {
        let circuit = self.resolve(name, rule);
        let result = circuit.invoke(action).await;
        self.map_rejection(name, rule, result)
    }

    fn call_blocking_with_rule<F, T, E>(
        &self,
        name: &str,
        rule: Option<&ClassificationRule<K>>,
        action: F,
    ) -> Result<T, CircuitError<E>>
    where
        F: FnOnce() -> Result<T, E>,
        E: HasKind<K>,
    {
        let circuit = self.resolve(name, rule);
        let result = circuit.invoke_blocking(action);
        self.map_rejection(name, rule, result)
    }

    pub(crate) fn resolve(
        &self,
        name: &str,
        rule: Option<&ClassificationRule<K>>,
    ) -> Arc<Circuit<K>> {
        let circuit = self.registry.resolve(name, rule);

        #[cfg(feature = "tracing")]
        tracing::trace!(circuit = name, state = ?circuit.state(), "dispatching through circuit");

        circuit
    }

    /// Applies the error mapper to rejections. Errors from the action
    /// itself are never mapped.
    pub(crate) fn map_rejection<T, E>(
        &self,
        name: &str,
        rule: Option<&ClassificationRule<K>>,
        result: Result<T, CircuitError<E>>,
    ) -> Result<T, CircuitError<E>> {
        match (result, &self.mapper) {
            (Err(CircuitError::Open(err)), Some(mapper)) => {
                let context = CallContext { name, rule };
                Err(CircuitError::Mapped(mapper(&context, err)))
            }
            (result, _) => result,
        }
    }
}

impl<K: ErrorKind> Clone for Gateway<K> {
    fn clone(&self) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
            mapper: self.mapper.clone(),
        }
    }
}

impl<K: ErrorKind> std::fmt::Debug for Gateway<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("registry", &self.registry)
            .field("mapper", &self.mapper.as_ref().map(|_| "<fn>"))
            .finish()
    }
}

/// Builder for a [`Gateway`].
pub struct GatewayBuilder<K: ErrorKind = ()> {
    registry: Option<Arc<Registry<K>>>,
    mapper: Option<Arc<ErrorMapper<K>>>,
}

impl<K: ErrorKind> GatewayBuilder<K> {
    pub fn new() -> Self {
        Self {
            registry: None,
            mapper: None,
        }
    }

    /// Registry to resolve circuits from.
    ///
    /// Default: an empty [`Registry::new`].
    pub fn registry(mut self, registry: Arc<Registry<K>>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Sets the hook that replaces circuit-open rejections with an
    /// application error. Setting it again replaces the previous hook.
    ///
    /// # Example
    /// ```rust
    /// use circuit_gate::{CircuitError, Gateway};
    ///
    /// #[derive(Debug, thiserror::Error)]
    /// #[error("{service} is temporarily unavailable")]
    /// struct Unavailable { service: String }
    ///
    /// let gateway: Gateway = Gateway::builder()
    ///     .error_mapper(|ctx, _open| Box::new(Unavailable { service: ctx.name().to_string() }))
    ///     .build();
    ///
    /// let _ = gateway.call_blocking("inventory", || Err::<(), _>("down"));
    /// let err = gateway.call_blocking("inventory", || Ok::<_, &str>(())).unwrap_err();
    /// assert!(matches!(err, CircuitError::Mapped(_)));
    /// assert_eq!(err.to_string(), "inventory is temporarily unavailable");
    /// ```
    pub fn error_mapper<F>(mut self, mapper: F) -> Self
    where
        F: Fn(&CallContext<'_, K>, CircuitOpenError) -> BoxError + Send + Sync + 'static,
    {
        self.mapper = Some(Arc::new(mapper));
        self
    }

    pub fn build(self) -> Gateway<K> {
        Gateway {
            registry: self.registry.unwrap_or_else(|| Arc::new(Registry::new())),
            mapper: self.mapper,
        }
    }
}

impl<K: ErrorKind> Default for GatewayBuilder<K> {
    fn default() -> Self {
        Self::new()
    }
}
