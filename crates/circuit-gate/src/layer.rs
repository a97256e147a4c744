use crate::classifier::ClassificationRule;
use crate::error::CircuitError;
use crate::gateway::Gateway;
use crate::kind::{ErrorKind, HasKind};
use futures::future::BoxFuture;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::{Layer, Service};

/// A Tower Layer that routes every request of the wrapped service through
/// one named circuit of a shared [`Gateway`].
///
/// Several layers built from the same gateway with the same name share one
/// circuit, so two services calling the same dependency trip together.
///
/// # Example
///
/// ```rust
/// use circuit_gate::{CircuitLayer, Gateway};
/// use tower::{ServiceBuilder, service_fn};
///
/// let gateway: Gateway = Gateway::builder().build();
///
/// let service = ServiceBuilder::new()
///     .layer(CircuitLayer::new(gateway.clone(), "search"))
///     .service(service_fn(|query: String| async move {
///         Ok::<_, std::io::Error>(query.len())
///     }));
/// ```
pub struct CircuitLayer<K: ErrorKind = ()> {
    gateway: Gateway<K>,
    name: Arc<str>,
    rule: Option<Arc<ClassificationRule<K>>>,
}

impl<K: ErrorKind> CircuitLayer<K> {
    pub fn new(gateway: Gateway<K>, name: impl Into<Arc<str>>) -> Self {
        Self {
            gateway,
            name: name.into(),
            rule: None,
        }
    }

    /// Declares which error kinds trip and which are ignored. Bound only if
    /// a request through this layer is the first invocation for the name.
    pub fn with_rule(mut self, rule: ClassificationRule<K>) -> Self {
        self.rule = Some(Arc::new(rule));
        self
    }
}

impl<K: ErrorKind> Clone for CircuitLayer<K> {
    fn clone(&self) -> Self {
        Self {
            gateway: self.gateway.clone(),
            name: Arc::clone(&self.name),
            rule: self.rule.clone(),
        }
    }
}

impl<S, K: ErrorKind> Layer<S> for CircuitLayer<K> {
    type Service = CircuitService<S, K>;

    fn layer(&self, service: S) -> Self::Service {
        CircuitService {
            inner: service,
            gateway: self.gateway.clone(),
            name: Arc::clone(&self.name),
            rule: self.rule.clone(),
        }
    }
}

/// Service produced by [`CircuitLayer`].
pub struct CircuitService<S, K: ErrorKind = ()> {
    inner: S,
    gateway: Gateway<K>,
    name: Arc<str>,
    rule: Option<Arc<ClassificationRule<K>>>,
}

impl<S, K: ErrorKind> CircuitService<S, K> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn get_ref(&self) -> &S {
        &self.inner
    }
}

impl<S: Clone, K: ErrorKind> Clone for CircuitService<S, K> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            gateway: self.gateway.clone(),
            name: Arc::clone(&self.name),
            rule: self.rule.clone(),
        }
    }
}

impl<S, K, Req> Service<Req> for CircuitService<S, K>
where
    S: Service<Req> + Clone + Send + 'static,
    S::Response: Send + 'static,
    S::Error: HasKind<K> + Send + 'static,
    S::Future: Send + 'static,
    Req: Send + 'static,
    K: ErrorKind,
{
    type Response = S::Response;
    type Error = CircuitError<S::Error>;
    type Future = BoxFuture<'static, Result<S::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx).map_err(CircuitError::Inner)
    }

    fn call(&mut self, req: Req) -> Self::Future {
        let gateway = self.gateway.clone();
        let name = Arc::clone(&self.name);
        let rule = self.rule.clone();
        let mut inner = self.inner.clone();

        Box::pin(async move {
            let circuit = gateway.resolve(&name, rule.as_deref());
            let result = circuit.invoke(move || inner.call(req)).await;
            gateway.map_rejection(&name, rule.as_deref(), result)
        })
    }
}
