//! Error kinds and the "kind implies kind" relation.
//!
//! Classification rules name error *kinds*, not concrete error values. A kind
//! may have a parent; a rule that names the parent also matches every kind
//! that descends from it.
//!
//! ```rust
//! use circuit_gate::ErrorKind;
//!
//! #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
//! enum Kind {
//!     Io,
//!     Timeout,
//!     ConnectionRefused,
//!     Validation,
//! }
//!
//! impl ErrorKind for Kind {
//!     fn parent(&self) -> Option<Self> {
//!         match self {
//!             Kind::Timeout | Kind::ConnectionRefused => Some(Kind::Io),
//!             Kind::Io | Kind::Validation => None,
//!         }
//!     }
//! }
//!
//! assert!(Kind::Timeout.is_a(&Kind::Io));
//! assert!(Kind::Io.is_a(&Kind::Io));
//! assert!(!Kind::Io.is_a(&Kind::Timeout));
//! assert!(!Kind::Validation.is_a(&Kind::Io));
//! ```

use std::fmt::Debug;
use std::hash::Hash;

/// Upper bound on ancestor walks, guarding against an accidental cycle in
/// a user-supplied `parent` relation.
const MAX_KIND_DEPTH: usize = 64;

/// A tagged error category with an optional, acyclic parent.
pub trait ErrorKind: Copy + Eq + Hash + Debug + Send + Sync + 'static {
    /// The immediate generalization of this kind, or `None` for a root.
    fn parent(&self) -> Option<Self>;

    /// Returns `true` if `self` is `other` or descends from it.
    fn is_a(&self, other: &Self) -> bool {
        let mut current = Some(*self);
        for _ in 0..MAX_KIND_DEPTH {
            match current {
                Some(kind) if kind == *other => return true,
                Some(kind) => current = kind.parent(),
                None => return false,
            }
        }
        false
    }
}

/// The unit kind: a single root for errors that carry no finer category.
impl ErrorKind for () {
    fn parent(&self) -> Option<Self> {
        None
    }
}

/// Exposes the [`ErrorKind`] of an error value.
///
/// Implemented for every type with `K = ()`, so breakers work without any
/// kind modelling; they then behave like "trip on any error" breakers.
pub trait HasKind<K: ErrorKind> {
    fn kind(&self) -> K;
}

impl<E> HasKind<()> for E {
    fn kind(&self) {}
}
