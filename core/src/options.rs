//! Option carriers for brokers, publications and subscriptions.
//!
//! Options are plain values built with `with_*` methods. Backend-specific
//! settings travel in an [`Extensions`] map keyed by type, so the generic
//! contract never needs to know about them.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Type-keyed map of backend-specific option values.
///
/// At most one value per type is stored; inserting a value of a type that is
/// already present replaces it.
///
/// # Example
///
/// ```
/// use logbus_core::Extensions;
///
/// #[derive(Debug, PartialEq)]
/// struct GroupId(&'static str);
///
/// let mut extensions = Extensions::new();
/// extensions.insert(GroupId("billing"));
/// assert_eq!(extensions.get::<GroupId>(), Some(&GroupId("billing")));
/// ```
#[derive(Clone, Default)]
pub struct Extensions {
    map: HashMap<TypeId, Arc<dyn Any + Send + Sync>>,
}

impl Extensions {
    /// Create an empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a value, replacing any previous value of the same type.
    pub fn insert<T: Any + Send + Sync>(&mut self, value: T) {
        self.map.insert(TypeId::of::<T>(), Arc::new(value));
    }

    /// Fetch the value of type `T`, if present.
    #[must_use]
    pub fn get<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.map
            .get(&TypeId::of::<T>())
            .and_then(|value| (**value).downcast_ref::<T>())
    }

    /// Whether a value of type `T` is present.
    #[must_use]
    pub fn contains<T: Any + Send + Sync>(&self) -> bool {
        self.map.contains_key(&TypeId::of::<T>())
    }

    /// Copy every entry of `other` into `self`; entries in `other` win.
    pub fn extend(&mut self, other: &Self) {
        for (key, value) in &other.map {
            self.map.insert(*key, Arc::clone(value));
        }
    }

    /// Number of stored values.
    #[must_use]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Whether the map is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

impl fmt::Debug for Extensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Extensions")
            .field("len", &self.map.len())
            .finish()
    }
}

/// Broker-wide configuration snapshot.
///
/// Captured when a broker is constructed and replaced only through
/// [`Broker::init`](crate::Broker::init).
#[derive(Debug, Clone, Default)]
pub struct BrokerOptions {
    /// Generic broker addresses, used when the backend config names none
    pub addrs: Vec<String>,
    /// Backend-specific settings
    pub extensions: Extensions,
}

impl BrokerOptions {
    /// Create empty options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the generic broker addresses.
    #[must_use]
    pub fn with_addrs<I, S>(mut self, addrs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.addrs = addrs.into_iter().map(Into::into).collect();
        self
    }

    /// Attach a backend-specific value.
    #[must_use]
    pub fn with_extension<T: Any + Send + Sync>(mut self, value: T) -> Self {
        self.extensions.insert(value);
        self
    }

    /// Merge `other` into `self`.
    ///
    /// Non-empty `addrs` replace the current list; extensions are overridden
    /// per type. Everything else in `self` is kept.
    pub fn merge(&mut self, other: &Self) {
        if !other.addrs.is_empty() {
            self.addrs.clone_from(&other.addrs);
        }
        self.extensions.extend(&other.extensions);
    }
}

/// Per-publish options.
#[derive(Debug, Clone, Default)]
pub struct PublishOptions {
    /// Backend-specific settings
    pub extensions: Extensions,
}

impl PublishOptions {
    /// Attach a backend-specific value.
    #[must_use]
    pub fn with_extension<T: Any + Send + Sync>(mut self, value: T) -> Self {
        self.extensions.insert(value);
        self
    }
}

/// Per-subscription options.
#[derive(Debug, Clone, Default)]
pub struct SubscribeOptions {
    /// Backend-specific settings (retry policy, dead-letter topic, ...)
    pub extensions: Extensions,
}

impl SubscribeOptions {
    /// Attach a backend-specific value.
    #[must_use]
    pub fn with_extension<T: Any + Send + Sync>(mut self, value: T) -> Self {
        self.extensions.insert(value);
        self
    }
}
