#![forbid(unsafe_code)]

//! Argument stabilization.
//!
//! Callers hand the runtime a fresh argument value on every render. The store
//! keys its cache by a serialized form of that value, and the runtime keys its
//! memo stages by *identity*. [`stabilize`] bridges the two: it serializes the
//! raw argument and, when the key matches the one cached for this invocation,
//! returns the previously cached `Rc` so identity-keyed consumers see no
//! change.
//!
//! # Invariants
//!
//! 1. Two raw arguments with the same serialized key yield `StableArg`s for
//!    which [`StableArg::same_identity`] is true.
//! 2. The sentinels ([`QueryArg::Skip`], [`QueryArg::Uninitialized`]) never
//!    reach the serializer and each is identical only to itself.
//!
//! # Failure Modes
//!
//! - Serializer error: returned as [`ArgError`] unchanged. A broken serializer
//!   is a programming error; the cache is left untouched.

use std::fmt;
use std::rc::Rc;

use serde::Serialize;

use crate::equality::ShallowEq;
use crate::error::ArgError;

/// Whether an endpoint reads (query) or writes (mutation).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EndpointKind {
    Query,
    Mutation,
}

/// Static description of an endpoint, passed to serializers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointMeta {
    pub name: String,
    pub kind: EndpointKind,
}

impl EndpointMeta {
    #[must_use]
    pub fn query(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: EndpointKind::Query,
        }
    }

    #[must_use]
    pub fn mutation(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: EndpointKind::Mutation,
        }
    }
}

/// Canonical cache key produced by an argument serializer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SerializedKey {
    Text(String),
    Number(i64),
}

impl fmt::Display for SerializedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(text) => f.write_str(text),
            Self::Number(n) => write!(f, "{n}"),
        }
    }
}

impl From<String> for SerializedKey {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<&str> for SerializedKey {
    fn from(value: &str) -> Self {
        Self::Text(value.to_owned())
    }
}

impl From<i64> for SerializedKey {
    fn from(value: i64) -> Self {
        Self::Number(value)
    }
}

crate::shallow_eq_by_value!(SerializedKey);

/// The store's cache key for a query entry.
pub type QueryCacheKey = SerializedKey;

/// A raw argument as supplied by the caller.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryArg<A> {
    /// No argument has been supplied yet (lazy queries before the first fetch).
    Uninitialized,
    /// The caller asked to skip the query.
    Skip,
    Value(A),
}

impl<A> QueryArg<A> {
    /// Whether this is one of the sentinels rather than a real value.
    #[must_use]
    pub fn is_sentinel(&self) -> bool {
        !matches!(self, Self::Value(_))
    }

    #[must_use]
    pub fn value(&self) -> Option<&A> {
        match self {
            Self::Value(value) => Some(value),
            _ => None,
        }
    }
}

impl<A> From<A> for QueryArg<A> {
    fn from(value: A) -> Self {
        Self::Value(value)
    }
}

impl<A: PartialEq> ShallowEq for QueryArg<A> {
    #[inline]
    fn shallow_eq(&self, other: &Self) -> bool {
        self == other
    }
}

/// An argument after stabilization.
///
/// Cloning is cheap (`Rc`). Equality via [`ShallowEq`] is identity.
#[derive(Debug)]
pub enum StableArg<A> {
    Uninitialized,
    Skip,
    Value { key: SerializedKey, arg: Rc<A> },
}

impl<A> Clone for StableArg<A> {
    fn clone(&self) -> Self {
        match self {
            Self::Uninitialized => Self::Uninitialized,
            Self::Skip => Self::Skip,
            Self::Value { key, arg } => Self::Value {
                key: key.clone(),
                arg: Rc::clone(arg),
            },
        }
    }
}

impl<A> StableArg<A> {
    #[must_use]
    pub fn is_sentinel(&self) -> bool {
        !matches!(self, Self::Value { .. })
    }

    /// Serialized key, `None` for sentinels.
    #[must_use]
    pub fn key(&self) -> Option<&SerializedKey> {
        match self {
            Self::Value { key, .. } => Some(key),
            _ => None,
        }
    }

    /// Shared argument value, `None` for sentinels.
    #[must_use]
    pub fn arg(&self) -> Option<&Rc<A>> {
        match self {
            Self::Value { arg, .. } => Some(arg),
            _ => None,
        }
    }

    /// Identity comparison: sentinels match themselves, values match when
    /// they share the same allocation.
    #[must_use]
    pub fn same_identity(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Uninitialized, Self::Uninitialized) | (Self::Skip, Self::Skip) => true,
            (Self::Value { arg: a, .. }, Self::Value { arg: b, .. }) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl<A> ShallowEq for StableArg<A> {
    #[inline]
    fn shallow_eq(&self, other: &Self) -> bool {
        self.same_identity(other)
    }
}

/// Per-invocation cache of the last stabilized argument.
#[derive(Debug)]
pub struct ArgCache<A> {
    last: Option<(SerializedKey, Rc<A>)>,
}

impl<A> ArgCache<A> {
    #[must_use]
    pub fn new() -> Self {
        Self { last: None }
    }

    /// Key of the cached argument, if any.
    #[must_use]
    pub fn key(&self) -> Option<&SerializedKey> {
        self.last.as_ref().map(|(key, _)| key)
    }

    /// Forget the cached argument.
    pub fn clear(&mut self) {
        self.last = None;
    }
}

impl<A> Default for ArgCache<A> {
    fn default() -> Self {
        Self::new()
    }
}

/// Stabilize `raw` against the invocation's `cache`.
///
/// `serialize` receives the argument, the endpoint description and the
/// endpoint name, mirroring the store's own key derivation so the key computed
/// here is the key the store files the entry under.
///
/// # Errors
///
/// Returns the serializer's error untouched.
pub fn stabilize<A, F>(
    raw: QueryArg<A>,
    serialize: F,
    meta: &EndpointMeta,
    endpoint_name: &str,
    cache: &mut ArgCache<A>,
) -> Result<StableArg<A>, ArgError>
where
    F: FnOnce(&A, &EndpointMeta, &str) -> Result<SerializedKey, ArgError>,
{
    let value = match raw {
        QueryArg::Uninitialized => return Ok(StableArg::Uninitialized),
        QueryArg::Skip => return Ok(StableArg::Skip),
        QueryArg::Value(value) => value,
    };

    let key = serialize(&value, meta, endpoint_name)?;
    if let Some((cached_key, cached)) = &cache.last
        && *cached_key == key
    {
        return Ok(StableArg::Value {
            key,
            arg: Rc::clone(cached),
        });
    }

    tracing::trace!(endpoint = endpoint_name, %key, "argument key changed");
    let arg = Rc::new(value);
    cache.last = Some((key.clone(), Rc::clone(&arg)));
    Ok(StableArg::Value { key, arg })
}

/// Default serializer: `"{endpoint}({json})"` with object keys sorted.
///
/// `serde_json::Map` is ordered by key, so structurally equal arguments always
/// produce the same text regardless of field declaration or insertion order.
///
/// # Errors
///
/// Returns [`ArgError::Serialize`] when the argument cannot be represented as
/// JSON (e.g. a map with non-string keys).
pub fn default_serialize_query_args<A: Serialize + ?Sized>(
    arg: &A,
    _meta: &EndpointMeta,
    endpoint_name: &str,
) -> Result<SerializedKey, ArgError> {
    let value = serde_json::to_value(arg).map_err(|source| ArgError::Serialize {
        endpoint: endpoint_name.to_owned(),
        source,
    })?;
    Ok(SerializedKey::Text(format!("{endpoint_name}({value})")))
}
