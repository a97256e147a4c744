//! Failure classification for circuit breaker decisions.
//!
//! A classifier decides, per error kind, whether a failed call counts toward
//! tripping the breaker ([`Classification::Trip`]), is explicitly excluded
//! ([`Classification::Ignore`]), or matched nothing
//! ([`Classification::Unclassified`]). Only `Trip` is ever counted.

use crate::kind::ErrorKind;
use std::sync::Arc;

/// Outcome of classifying one error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// Counts toward the failure threshold.
    Trip,
    /// Explicitly excluded: counters and state are left untouched.
    Ignore,
    /// Matched neither set; treated as non-tripping.
    Unclassified,
}

impl Classification {
    pub fn trips(self) -> bool {
        matches!(self, Classification::Trip)
    }
}

/// Trait for classifying error kinds.
pub trait FailureClassifier<K: ErrorKind>: Send + Sync {
    fn classify(&self, kind: &K) -> Classification;
}

/// Classifier used by a circuit until a rule is bound: every error trips.
///
/// ```rust
/// use circuit_gate::{Classification, DefaultClassifier, FailureClassifier};
///
/// assert_eq!(DefaultClassifier.classify(&()), Classification::Trip);
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultClassifier;

impl<K: ErrorKind> FailureClassifier<K> for DefaultClassifier {
    fn classify(&self, _kind: &K) -> Classification {
        Classification::Trip
    }
}

/// A classifier backed by a closure.
///
/// ```rust
/// use circuit_gate::{Classification, ErrorKind, FailureClassifier, FnClassifier};
///
/// #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
/// enum Status { Server, Client }
///
/// impl ErrorKind for Status {
///     fn parent(&self) -> Option<Self> { None }
/// }
///
/// // Client errors are the caller's fault, not the dependency's
/// let classifier = FnClassifier::new(|status: &Status| match status {
///     Status::Server => Classification::Trip,
///     Status::Client => Classification::Ignore,
/// });
///
/// assert!(classifier.classify(&Status::Server).trips());
/// assert!(!classifier.classify(&Status::Client).trips());
/// ```
#[derive(Clone)]
pub struct FnClassifier<F> {
    f: Arc<F>,
}

impl<F> FnClassifier<F> {
    pub fn new(f: F) -> Self {
        Self { f: Arc::new(f) }
    }
}

impl<F, K> FailureClassifier<K> for FnClassifier<F>
where
    K: ErrorKind,
    F: Fn(&K) -> Classification + Send + Sync,
{
    fn classify(&self, kind: &K) -> Classification {
        (self.f)(kind)
    }
}

impl<F> std::fmt::Debug for FnClassifier<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnClassifier")
            .field("f", &"<closure>")
            .finish()
    }
}

/// A set of kinds matched polymorphically through [`ErrorKind::is_a`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KindSet<K> {
    /// Matches every kind.
    All,
    /// Matches the listed kinds and their descendants.
    Only(Vec<K>),
}

impl<K: ErrorKind> KindSet<K> {
    pub fn none() -> Self {
        KindSet::Only(Vec::new())
    }

    pub fn matches(&self, kind: &K) -> bool {
        match self {
            KindSet::All => true,
            KindSet::Only(kinds) => kinds.iter().any(|k| kind.is_a(k)),
        }
    }
}

/// Call-site declaration of which kinds trip and which are ignored.
///
/// Defaults to tripping on every kind and ignoring none. When a kind matches
/// both sets, ignore wins.
///
/// ```rust
/// use circuit_gate::{Classification, ClassificationRule, ErrorKind, FailureClassifier};
///
/// #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
/// enum Kind { Io, Timeout, BadInput }
///
/// impl ErrorKind for Kind {
///     fn parent(&self) -> Option<Self> {
///         match self {
///             Kind::Timeout => Some(Kind::Io),
///             _ => None,
///         }
///     }
/// }
///
/// let rule = ClassificationRule::new()
///     .trip([Kind::Io])
///     .ignore([Kind::Timeout]);
///
/// assert_eq!(rule.classify(&Kind::Io), Classification::Trip);
/// assert_eq!(rule.classify(&Kind::Timeout), Classification::Ignore);
/// assert_eq!(rule.classify(&Kind::BadInput), Classification::Unclassified);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassificationRule<K> {
    trip: KindSet<K>,
    ignore: Vec<K>,
}

impl<K: ErrorKind> ClassificationRule<K> {
    pub fn new() -> Self {
        Self {
            trip: KindSet::All,
            ignore: Vec::new(),
        }
    }

    /// Restricts tripping to the given kinds (and their descendants).
    pub fn trip<I: IntoIterator<Item = K>>(mut self, kinds: I) -> Self {
        self.trip = KindSet::Only(kinds.into_iter().collect());
        self
    }

    /// Excludes the given kinds (and their descendants) from counting.
    pub fn ignore<I: IntoIterator<Item = K>>(mut self, kinds: I) -> Self {
        self.ignore.extend(kinds);
        self
    }

    pub fn trip_kinds(&self) -> &KindSet<K> {
        &self.trip
    }

    pub fn ignore_kinds(&self) -> &[K] {
        &self.ignore
    }
}

impl<K: ErrorKind> Default for ClassificationRule<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: ErrorKind> FailureClassifier<K> for ClassificationRule<K> {
    fn classify(&self, kind: &K) -> Classification {
        if self.ignore.iter().any(|k| kind.is_a(k)) {
            Classification::Ignore
        } else if self.trip.matches(kind) {
            Classification::Trip
        } else {
            Classification::Unclassified
        }
    }
}

/// Shared classifier as stored by a circuit.
pub type SharedClassifier<K> = Arc<dyn FailureClassifier<K>>;
