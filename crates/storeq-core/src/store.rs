#![forbid(unsafe_code)]

//! The contract an external action-dispatching store fulfils.
//!
//! The runtime never owns cache storage, request execution, or invalidation.
//! It only dispatches through these traits and reads back the sub-states they
//! select. Endpoints are shared as `Rc<dyn ...>` and are never mutated by the
//! runtime beyond the calls listed here.
//!
//! # Invariants expected of implementors
//!
//! 1. `select` returns the *same* `Rc` for an unchanged cache entry, so that
//!    identity-keyed memo stages can skip work. Sentinel arguments select a
//!    shared uninitialized sub-state.
//! 2. `initiate` for an argument whose key is already pending or fulfilled
//!    joins the existing request (deduplication) unless `force_refetch` is set.
//! 3. Listener callbacks may run re-entrantly; implementors must not hold
//!    internal borrows while invoking them.

use std::fmt;
use std::rc::Rc;

use crate::arg::{EndpointMeta, QueryCacheKey, SerializedKey, StableArg};
use crate::error::ArgError;
use crate::options::{InitiateOptions, MutationInitiateOptions, PrefetchOptions, SubscriptionOptions};
use crate::state::{RawMutationState, RawQueryState, RequestId, Settled};

/// Token returned by [`StateListeners::add_listener`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(pub u64);

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "listener#{}", self.0)
    }
}

/// Change notification for store state.
pub trait StateListeners {
    /// Register `listener`; it runs after every state change.
    fn add_listener(&self, listener: Rc<dyn Fn()>) -> ListenerId;

    /// Unregister a listener. Unknown ids are ignored.
    fn remove_listener(&self, id: ListenerId);
}

/// Result of a query `initiate` dispatch.
pub trait QueryHandle<A, D, E> {
    fn query_cache_key(&self) -> &QueryCacheKey;

    /// Identifies this subscription at the store.
    fn request_id(&self) -> &RequestId;

    fn arg(&self) -> &Rc<A>;

    fn subscription_options(&self) -> SubscriptionOptions;

    /// Drop this handle's interest in the cache entry.
    fn unsubscribe(&self);

    fn update_subscription_options(&self, options: SubscriptionOptions);

    /// Re-run the request for the same subscription, bypassing the cache.
    fn refetch(&self);

    /// Cancel the in-flight request. Settles as [`RequestError::Aborted`].
    ///
    /// [`RequestError::Aborted`]: crate::state::RequestError::Aborted
    fn abort(&self);

    /// The request outcome, `None` while still in flight.
    fn settled(&self) -> Option<Settled<D, E>>;
}

/// A query endpoint.
pub trait QueryEndpoint<A, D, E>: StateListeners {
    fn meta(&self) -> &EndpointMeta;

    /// Derive the cache key for `arg` the same way the store files entries.
    ///
    /// # Errors
    ///
    /// Returns the serializer's error; callers treat it as a programming error.
    fn serialize_query_args(
        &self,
        arg: &A,
        meta: &EndpointMeta,
        endpoint_name: &str,
    ) -> Result<SerializedKey, ArgError>;

    fn initiate(&self, arg: Rc<A>, options: InitiateOptions) -> Rc<dyn QueryHandle<A, D, E>>;

    /// Current sub-state for `arg`.
    fn select(&self, arg: &StableArg<A>) -> Rc<RawQueryState<A, D, E>>;

    /// Whether the subscription `(key, request_id)` is still live.
    ///
    /// `None` means the store cannot answer, which only happens when its
    /// middleware is not installed.
    fn probe_subscription(&self, key: &QueryCacheKey, request_id: &RequestId) -> Option<bool>;

    /// An `initiate` that registers no tracked subscription.
    fn prefetch(&self, arg: Rc<A>, options: PrefetchOptions);

    #[inline]
    fn name(&self) -> &str {
        &self.meta().name
    }
}

/// Which mutation record a selection addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationSelect<'a> {
    /// Nothing triggered yet; selects the shared uninitialized record.
    Skip,
    /// The record of one invocation.
    Request(&'a RequestId),
    /// The shared record behind a fixed cache key, whichever invocation
    /// wrote it last.
    FixedKey(&'a str),
}

/// Result of a mutation `initiate` dispatch.
pub trait MutationHandle<A, D, E> {
    fn request_id(&self) -> &RequestId;

    fn arg(&self) -> &Rc<A>;

    fn fixed_cache_key(&self) -> Option<&str>;

    fn abort(&self);

    /// Drop interest in the invocation without removing its stored result.
    fn release(&self);

    fn settled(&self) -> Option<Settled<D, E>>;
}

/// A mutation endpoint.
pub trait MutationEndpoint<A, D, E>: StateListeners {
    fn meta(&self) -> &EndpointMeta;

    fn initiate(
        &self,
        arg: Rc<A>,
        options: MutationInitiateOptions,
    ) -> Rc<dyn MutationHandle<A, D, E>>;

    fn select(&self, target: MutationSelect<'_>) -> Rc<RawMutationState<A, D, E>>;

    /// Evict a stored mutation record.
    fn remove_mutation_result(&self, request_id: &RequestId, fixed_cache_key: Option<&str>);

    #[inline]
    fn name(&self) -> &str {
        &self.meta().name
    }
}

/// Store-wide operations.
pub trait ApiStore: StateListeners {
    /// Name of the slice the cache lives under.
    fn reducer_path(&self) -> &str;

    /// Install focus/reconnect listeners that drive `refetch_on_*` options.
    fn setup_listeners(&self);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::{Cell, RefCell};

    struct Counter {
        next: Cell<u64>,
        live: RefCell<Vec<ListenerId>>,
    }

    impl StateListeners for Counter {
        fn add_listener(&self, _listener: Rc<dyn Fn()>) -> ListenerId {
            let id = ListenerId(self.next.get());
            self.next.set(id.0 + 1);
            self.live.borrow_mut().push(id);
            id
        }

        fn remove_listener(&self, id: ListenerId) {
            self.live.borrow_mut().retain(|l| *l != id);
        }
    }

    #[test]
    fn listener_ids_are_unique_tokens() {
        let store = Counter {
            next: Cell::new(1),
            live: RefCell::new(Vec::new()),
        };
        let a = store.add_listener(Rc::new(|| {}));
        let b = store.add_listener(Rc::new(|| {}));
        assert_ne!(a, b);
        store.remove_listener(a);
        store.remove_listener(ListenerId(99));
        assert_eq!(*store.live.borrow(), vec![b]);
        assert_eq!(b.to_string(), "listener#2");
    }
}
