//! Boundary with the external resolver

use serde_json::Value;
use thiserror::Error;

use crate::event::Event;

/// A resolver call that could not produce an answer
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ResolveError {
    /// The key is not something the resolver can look up
    #[error("invalid lookup key: {0}")]
    InvalidKey(String),

    /// The backing lookup failed
    #[error("resolver unavailable: {0}")]
    Unavailable(String),
}

/// The expensive keyed lookup sitting behind the cache
///
/// On `Ok(true)` the resolver has written its result field into `event`.
/// `Ok(false)` means the key is valid but nothing is known about it.
pub trait Resolver: Send + Sync {
    /// Look up `key` and populate `event`
    fn resolve(&self, key: &str, event: &mut Event) -> Result<bool, ResolveError>;
}

impl<F> Resolver for F
where
    F: Fn(&str, &mut Event) -> Result<bool, ResolveError> + Send + Sync,
{
    fn resolve(&self, key: &str, event: &mut Event) -> Result<bool, ResolveError> {
        self(key, event)
    }
}

/// Outcome of a lookup
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup {
    /// The result field's value
    Found(Value),
    /// The resolver knows nothing about the key
    NotFound,
    /// The resolver call failed
    Failed,
}

impl Lookup {
    /// The found value, if any
    pub fn value(&self) -> Option<&Value> {
        match self {
            Lookup::Found(value) => Some(value),
            _ => None,
        }
    }

    /// Consume the outcome, keeping only a found value
    pub fn into_value(self) -> Option<Value> {
        match self {
            Lookup::Found(value) => Some(value),
            _ => None,
        }
    }

    /// Check whether a value was found
    pub fn is_found(&self) -> bool {
        matches!(self, Lookup::Found(_))
    }
}

/// Resolve without caching
///
/// Calls the resolver on every invocation and reads `target` back out of
/// the populated event.
pub fn resolve_uncached(resolver: &dyn Resolver, key: &str, event: &mut Event, target: &str) -> Lookup {
    match resolver.resolve(key, event) {
        Ok(true) => match event.get(target) {
            Some(value) => Lookup::Found(value.clone()),
            None => Lookup::NotFound,
        },
        Ok(false) => Lookup::NotFound,
        Err(_) => Lookup::Failed,
    }
}
