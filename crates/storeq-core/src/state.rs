#![forbid(unsafe_code)]

//! Raw cache sub-states (as reported by the store) and the derived,
//! UI-shaped states the runtime produces from them.
//!
//! Payloads are shared through `Rc`, so cloning a state is cheap and
//! [`ShallowEq`] can compare payloads by identity.

use std::fmt;
use std::rc::Rc;

use web_time::Instant;

use crate::arg::SerializedKey;
use crate::equality::ShallowEq;

/// Lifecycle of a cache entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum QueryStatus {
    #[default]
    Uninitialized,
    Pending,
    Fulfilled,
    Rejected,
}

impl QueryStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Uninitialized => "uninitialized",
            Self::Pending => "pending",
            Self::Fulfilled => "fulfilled",
            Self::Rejected => "rejected",
        }
    }
}

impl fmt::Display for QueryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

crate::shallow_eq_by_value!(QueryStatus);

/// Store-assigned identifier of one `initiate` dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(String);

impl RequestId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

crate::shallow_eq_by_value!(RequestId);

/// Why a request produced no data.
#[derive(Debug)]
pub enum RequestError<E> {
    /// The request ran and failed with a store-reported error.
    Rejected(Rc<E>),
    /// The request was aborted before it settled. An expected outcome.
    Aborted,
}

impl<E> Clone for RequestError<E> {
    fn clone(&self) -> Self {
        match self {
            Self::Rejected(err) => Self::Rejected(Rc::clone(err)),
            Self::Aborted => Self::Aborted,
        }
    }
}

impl<E> RequestError<E> {
    #[must_use]
    pub fn is_aborted(&self) -> bool {
        matches!(self, Self::Aborted)
    }

    /// The store error, if the request was rejected rather than aborted.
    #[must_use]
    pub fn rejection(&self) -> Option<&Rc<E>> {
        match self {
            Self::Rejected(err) => Some(err),
            Self::Aborted => None,
        }
    }
}

impl<E: fmt::Display> fmt::Display for RequestError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rejected(err) => write!(f, "request rejected: {err}"),
            Self::Aborted => f.write_str("request aborted"),
        }
    }
}

impl<E: fmt::Debug + fmt::Display> std::error::Error for RequestError<E> {}

impl<E> ShallowEq for RequestError<E> {
    fn shallow_eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Rejected(a), Self::Rejected(b)) => Rc::ptr_eq(a, b),
            (Self::Aborted, Self::Aborted) => true,
            _ => false,
        }
    }
}

/// Outcome of a settled request: `Ok` with data or the request error.
pub type Settled<D, E> = Result<Rc<D>, RequestError<E>>;

// ---------------------------------------------------------------------------
// Queries
// ---------------------------------------------------------------------------

/// A query cache entry exactly as the store holds it.
///
/// Flags are derived from `status` so they can never disagree with it.
#[derive(Debug)]
pub struct RawQueryState<A, D, E> {
    pub status: QueryStatus,
    pub data: Option<Rc<D>>,
    pub error: Option<RequestError<E>>,
    pub original_args: Option<Rc<A>>,
    pub request_id: Option<RequestId>,
    pub fulfilled_at: Option<Instant>,
}

impl<A, D, E> RawQueryState<A, D, E> {
    /// The state of an entry the store has never seen.
    #[must_use]
    pub fn uninitialized() -> Self {
        Self {
            status: QueryStatus::Uninitialized,
            data: None,
            error: None,
            original_args: None,
            request_id: None,
            fulfilled_at: None,
        }
    }

    #[must_use]
    pub fn is_uninitialized(&self) -> bool {
        self.status == QueryStatus::Uninitialized
    }

    /// A request for this entry is in flight.
    #[must_use]
    pub fn is_loading(&self) -> bool {
        self.status == QueryStatus::Pending
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status == QueryStatus::Fulfilled
    }

    #[must_use]
    pub fn is_error(&self) -> bool {
        self.status == QueryStatus::Rejected
    }
}

impl<A, D, E> Clone for RawQueryState<A, D, E> {
    fn clone(&self) -> Self {
        Self {
            status: self.status,
            data: self.data.clone(),
            error: self.error.clone(),
            original_args: self.original_args.clone(),
            request_id: self.request_id.clone(),
            fulfilled_at: self.fulfilled_at,
        }
    }
}

impl<A, D, E> Default for RawQueryState<A, D, E> {
    fn default() -> Self {
        Self::uninitialized()
    }
}

/// UI-shaped query state.
#[derive(Debug)]
pub struct QueryState<A, D, E> {
    pub status: QueryStatus,
    /// Last good data: current data when fulfilled, otherwise the retained
    /// value from a previous result.
    pub data: Option<Rc<D>>,
    /// Exactly what the cache holds right now for the current argument.
    pub current_data: Option<Rc<D>>,
    pub error: Option<RequestError<E>>,
    pub is_uninitialized: bool,
    pub is_loading: bool,
    pub is_fetching: bool,
    pub is_success: bool,
    pub is_error: bool,
    pub original_args: Option<Rc<A>>,
    /// Serialized key of the argument this state was derived for.
    pub arg_key: Option<SerializedKey>,
    pub request_id: Option<RequestId>,
    pub fulfilled_at: Option<Instant>,
}

impl<A, D, E> Clone for QueryState<A, D, E> {
    fn clone(&self) -> Self {
        Self {
            status: self.status,
            data: self.data.clone(),
            current_data: self.current_data.clone(),
            error: self.error.clone(),
            is_uninitialized: self.is_uninitialized,
            is_loading: self.is_loading,
            is_fetching: self.is_fetching,
            is_success: self.is_success,
            is_error: self.is_error,
            original_args: self.original_args.clone(),
            arg_key: self.arg_key.clone(),
            request_id: self.request_id.clone(),
            fulfilled_at: self.fulfilled_at,
        }
    }
}

impl<A, D, E> ShallowEq for QueryState<A, D, E> {
    fn shallow_eq(&self, other: &Self) -> bool {
        self.status == other.status
            && self.data.shallow_eq(&other.data)
            && self.current_data.shallow_eq(&other.current_data)
            && self.error.shallow_eq(&other.error)
            && self.is_uninitialized == other.is_uninitialized
            && self.is_loading == other.is_loading
            && self.is_fetching == other.is_fetching
            && self.is_success == other.is_success
            && self.is_error == other.is_error
            && self.original_args.shallow_eq(&other.original_args)
            && self.arg_key == other.arg_key
            && self.request_id == other.request_id
            && self.fulfilled_at == other.fulfilled_at
    }
}

// ---------------------------------------------------------------------------
// Mutations
// ---------------------------------------------------------------------------

/// A mutation record exactly as the store holds it.
#[derive(Debug)]
pub struct RawMutationState<A, D, E> {
    pub status: QueryStatus,
    pub data: Option<Rc<D>>,
    pub error: Option<RequestError<E>>,
    pub original_args: Option<Rc<A>>,
    pub request_id: Option<RequestId>,
    pub fixed_cache_key: Option<String>,
}

impl<A, D, E> RawMutationState<A, D, E> {
    #[must_use]
    pub fn uninitialized() -> Self {
        Self {
            status: QueryStatus::Uninitialized,
            data: None,
            error: None,
            original_args: None,
            request_id: None,
            fixed_cache_key: None,
        }
    }
}

impl<A, D, E> Clone for RawMutationState<A, D, E> {
    fn clone(&self) -> Self {
        Self {
            status: self.status,
            data: self.data.clone(),
            error: self.error.clone(),
            original_args: self.original_args.clone(),
            request_id: self.request_id.clone(),
            fixed_cache_key: self.fixed_cache_key.clone(),
        }
    }
}

/// UI-shaped mutation state.
#[derive(Debug)]
pub struct MutationState<A, D, E> {
    pub status: QueryStatus,
    pub data: Option<Rc<D>>,
    pub error: Option<RequestError<E>>,
    pub is_uninitialized: bool,
    pub is_loading: bool,
    pub is_success: bool,
    pub is_error: bool,
    /// Argument of the current invocation. Always `None` for fixed-key
    /// mutations, whose records are shared between invocations.
    pub original_args: Option<Rc<A>>,
    pub request_id: Option<RequestId>,
}

impl<A, D, E> MutationState<A, D, E> {
    /// Derive from a raw record, attaching `original_args` as given.
    #[must_use]
    pub fn from_raw(raw: &RawMutationState<A, D, E>, original_args: Option<Rc<A>>) -> Self {
        Self {
            status: raw.status,
            data: raw.data.clone(),
            error: raw.error.clone(),
            is_uninitialized: raw.status == QueryStatus::Uninitialized,
            is_loading: raw.status == QueryStatus::Pending,
            is_success: raw.status == QueryStatus::Fulfilled,
            is_error: raw.status == QueryStatus::Rejected,
            original_args,
            request_id: raw.request_id.clone(),
        }
    }
}

impl<A, D, E> Clone for MutationState<A, D, E> {
    fn clone(&self) -> Self {
        Self {
            status: self.status,
            data: self.data.clone(),
            error: self.error.clone(),
            is_uninitialized: self.is_uninitialized,
            is_loading: self.is_loading,
            is_success: self.is_success,
            is_error: self.is_error,
            original_args: self.original_args.clone(),
            request_id: self.request_id.clone(),
        }
    }
}

impl<A, D, E> ShallowEq for MutationState<A, D, E> {
    fn shallow_eq(&self, other: &Self) -> bool {
        self.status == other.status
            && self.data.shallow_eq(&other.data)
            && self.error.shallow_eq(&other.error)
            && self.is_uninitialized == other.is_uninitialized
            && self.is_loading == other.is_loading
            && self.is_success == other.is_success
            && self.is_error == other.is_error
            && self.original_args.shallow_eq(&other.original_args)
            && self.request_id == other.request_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type Raw = RawQueryState<u32, String, String>;

    #[test]
    fn raw_flags_follow_status() {
        let mut raw = Raw::uninitialized();
        assert!(raw.is_uninitialized());
        raw.status = QueryStatus::Pending;
        assert!(raw.is_loading() && !raw.is_success());
        raw.status = QueryStatus::Fulfilled;
        assert!(raw.is_success());
        raw.status = QueryStatus::Rejected;
        assert!(raw.is_error());
    }

    #[test]
    fn request_error_identity() {
        let err = Rc::new("nope".to_string());
        let a: RequestError<String> = RequestError::Rejected(Rc::clone(&err));
        let b = a.clone();
        assert!(a.shallow_eq(&b));
        assert!(!a.shallow_eq(&RequestError::Rejected(Rc::new("nope".into()))));
        assert!(RequestError::<String>::Aborted.is_aborted());
        assert_eq!(a.to_string(), "request rejected: nope");
    }

    #[test]
    fn mutation_state_from_raw() {
        let mut raw = RawMutationState::<u32, String, String>::uninitialized();
        raw.status = QueryStatus::Fulfilled;
        raw.data = Some(Rc::new("ok".into()));
        let args = Rc::new(3);
        let state = MutationState::from_raw(&raw, Some(Rc::clone(&args)));
        assert!(state.is_success);
        assert!(!state.is_loading);
        assert!(state.original_args.is_some_and(|a| Rc::ptr_eq(&a, &args)));
    }

    #[test]
    fn status_display() {
        assert_eq!(QueryStatus::Pending.to_string(), "pending");
    }
}
