#![forbid(unsafe_code)]

//! Harness query endpoint.
//!
//! Entries follow the usual cache rules:
//!
//! - an `initiate` for a key with a request in flight joins that request;
//! - a fulfilled entry is refetched only when forced;
//! - an uninitialized or rejected entry always starts a request.
//!
//! Every `initiate` with `subscribe` registers a subscription under its own
//! request id, so [`HarnessQueryEndpoint::subscription_count`] shows exactly
//! how many handles are live for a key.

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::fmt;
use std::rc::{Rc, Weak};

use serde::Serialize;
use storeq_core::{
    ArgError, EndpointMeta, InitiateOptions, ListenerId, PrefetchOptions, QueryCacheKey,
    QueryEndpoint, QueryHandle, QueryStatus, RawQueryState, RequestError, RequestId,
    SerializedKey, Settled, StableArg, StateListeners, SubscriptionOptions,
    default_serialize_query_args,
};
use web_time::Instant;

use crate::store::{Action, HarnessStore};

/// Argument serializer used to derive cache keys.
pub type Serializer<A> = Rc<dyn Fn(&A, &EndpointMeta, &str) -> Result<SerializedKey, ArgError>>;

struct Entry<A, D, E> {
    state: Rc<RawQueryState<A, D, E>>,
    subscriptions: BTreeMap<RequestId, SubscriptionOptions>,
}

struct InFlight<A> {
    key: QueryCacheKey,
    request_id: RequestId,
    arg: Rc<A>,
}

/// An in-memory query endpoint.
pub struct HarnessQueryEndpoint<A, D, E> {
    store: Rc<HarnessStore>,
    meta: EndpointMeta,
    serializer: Serializer<A>,
    this: Weak<Self>,
    uninitialized: Rc<RawQueryState<A, D, E>>,
    entries: RefCell<BTreeMap<QueryCacheKey, Entry<A, D, E>>>,
    in_flight: RefCell<Vec<InFlight<A>>>,
    network_requests: Cell<usize>,
}

impl<A: Serialize + 'static, D: 'static, E: 'static> HarnessQueryEndpoint<A, D, E> {
    /// An endpoint keyed by the default JSON serializer.
    pub fn new(store: &Rc<HarnessStore>, name: &str) -> Rc<Self> {
        Self::with_serializer(store, name, Rc::new(default_serialize_query_args::<A>))
    }
}

impl<A: 'static, D: 'static, E: 'static> HarnessQueryEndpoint<A, D, E> {
    /// An endpoint keyed by `serializer`.
    pub fn with_serializer(store: &Rc<HarnessStore>, name: &str, serializer: Serializer<A>) -> Rc<Self> {
        let endpoint = Rc::new_cyclic(|this| Self {
            store: Rc::clone(store),
            meta: EndpointMeta::query(name),
            serializer,
            this: Weak::clone(this),
            uninitialized: Rc::new(RawQueryState::uninitialized()),
            entries: RefCell::new(BTreeMap::new()),
            in_flight: RefCell::new(Vec::new()),
            network_requests: Cell::new(0),
        });
        let weak = Rc::downgrade(&endpoint);
        store.on_reset(Box::new(move || {
            if let Some(endpoint) = weak.upgrade() {
                endpoint.clear();
            }
        }));
        endpoint
    }

    /// The cache key the endpoint files `arg` under.
    pub fn key_for(&self, arg: &A) -> QueryCacheKey {
        match (self.serializer)(arg, &self.meta, &self.meta.name) {
            Ok(key) => key,
            Err(err) => {
                tracing::warn!(endpoint = %self.meta.name, %err, "unserializable argument");
                SerializedKey::Text(format!("{}(<unserializable>)", self.meta.name))
            }
        }
    }

    /// Requests started since creation.
    #[must_use]
    pub fn network_requests(&self) -> usize {
        self.network_requests.get()
    }

    /// Requests not yet settled.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.in_flight.borrow().len()
    }

    /// Live subscriptions for `arg`.
    pub fn subscription_count(&self, arg: &A) -> usize {
        let key = self.key_for(arg);
        self.entries
            .borrow()
            .get(&key)
            .map_or(0, |entry| entry.subscriptions.len())
    }

    /// Live subscriptions across all keys.
    #[must_use]
    pub fn total_subscriptions(&self) -> usize {
        self.entries
            .borrow()
            .values()
            .map(|entry| entry.subscriptions.len())
            .sum()
    }

    /// Options of every live subscription for `arg`.
    pub fn subscription_options_for(&self, arg: &A) -> Vec<SubscriptionOptions> {
        let key = self.key_for(arg);
        self.entries
            .borrow()
            .get(&key)
            .map(|entry| entry.subscriptions.values().cloned().collect())
            .unwrap_or_default()
    }

    /// The raw entry for `arg`.
    pub fn state(&self, arg: &A) -> Rc<RawQueryState<A, D, E>> {
        let key = self.key_for(arg);
        self.entry_state(&key)
    }

    /// Store a fulfilled entry for `arg` without a request.
    pub fn seed(&self, arg: A, data: D) {
        let arg = Rc::new(arg);
        let key = self.key_for(&arg);
        let request_id = self.store.next_request_id();
        {
            let mut entries = self.entries.borrow_mut();
            let entry = entries.entry(key).or_insert_with(|| Entry {
                state: Rc::clone(&self.uninitialized),
                subscriptions: BTreeMap::new(),
            });
            entry.state = Rc::new(RawQueryState {
                status: QueryStatus::Fulfilled,
                data: Some(Rc::new(data)),
                error: None,
                original_args: Some(arg),
                request_id: Some(request_id),
                fulfilled_at: Some(Instant::now()),
            });
        }
        self.store.notify();
    }

    /// Settle every in-flight request with `respond`. Returns how many were
    /// settled.
    pub fn resolve_all(&self, respond: impl Fn(&A) -> Result<D, E>) -> usize {
        let pending = std::mem::take(&mut *self.in_flight.borrow_mut());
        let settled = pending.len();
        for request in pending {
            let outcome = respond(&request.arg);
            self.settle(&request, outcome);
        }
        settled
    }

    /// Settle the in-flight request for `arg`, if any.
    pub fn resolve(&self, arg: &A, outcome: Result<D, E>) -> bool {
        let key = self.key_for(arg);
        let request = {
            let mut in_flight = self.in_flight.borrow_mut();
            let Some(index) = in_flight.iter().position(|request| request.key == key) else {
                return false;
            };
            in_flight.remove(index)
        };
        self.settle(&request, outcome);
        true
    }

    fn clear(&self) {
        self.entries.borrow_mut().clear();
        self.in_flight.borrow_mut().clear();
    }

    fn entry_state(&self, key: &QueryCacheKey) -> Rc<RawQueryState<A, D, E>> {
        self.entries
            .borrow()
            .get(key)
            .map_or_else(|| Rc::clone(&self.uninitialized), |entry| Rc::clone(&entry.state))
    }

    /// Start a request for `key` unless the cache rules say otherwise.
    fn start(
        &self,
        key: &QueryCacheKey,
        arg: &Rc<A>,
        request_id: &RequestId,
        should_start: impl FnOnce(&RawQueryState<A, D, E>) -> bool,
    ) -> bool {
        let started = {
            let mut entries = self.entries.borrow_mut();
            let entry = entries.entry(key.clone()).or_insert_with(|| Entry {
                state: Rc::clone(&self.uninitialized),
                subscriptions: BTreeMap::new(),
            });
            let start = entry.state.status != QueryStatus::Pending && should_start(&*entry.state);
            if start {
                entry.state = Rc::new(RawQueryState {
                    status: QueryStatus::Pending,
                    data: entry.state.data.clone(),
                    error: None,
                    original_args: Some(Rc::clone(arg)),
                    request_id: Some(request_id.clone()),
                    fulfilled_at: entry.state.fulfilled_at,
                });
            }
            start
        };
        if started {
            self.network_requests.set(self.network_requests.get() + 1);
            self.in_flight.borrow_mut().push(InFlight {
                key: key.clone(),
                request_id: request_id.clone(),
                arg: Rc::clone(arg),
            });
        }
        started
    }

    fn settle(&self, request: &InFlight<A>, outcome: Result<D, E>) {
        let status = {
            let mut entries = self.entries.borrow_mut();
            let Some(entry) = entries.get_mut(&request.key) else {
                return;
            };
            if entry.state.request_id.as_ref() != Some(&request.request_id) {
                return;
            }
            let previous = &entry.state;
            entry.state = Rc::new(match outcome {
                Ok(data) => RawQueryState {
                    status: QueryStatus::Fulfilled,
                    data: Some(Rc::new(data)),
                    error: None,
                    original_args: previous.original_args.clone(),
                    request_id: previous.request_id.clone(),
                    fulfilled_at: Some(Instant::now()),
                },
                Err(err) => RawQueryState {
                    status: QueryStatus::Rejected,
                    data: previous.data.clone(),
                    error: Some(RequestError::Rejected(Rc::new(err))),
                    original_args: previous.original_args.clone(),
                    request_id: previous.request_id.clone(),
                    fulfilled_at: previous.fulfilled_at,
                },
            });
            entry.state.status
        };
        self.store.record(Action::QuerySettled {
            endpoint: self.meta.name.clone(),
            key: request.key.clone(),
            request_id: request.request_id.clone(),
            status,
        });
        self.store.notify();
    }

    fn unsubscribe(&self, key: &QueryCacheKey, request_id: &RequestId) {
        if let Some(entry) = self.entries.borrow_mut().get_mut(key) {
            entry.subscriptions.remove(request_id);
        }
        self.store.record(Action::QueryUnsubscribe {
            endpoint: self.meta.name.clone(),
            key: key.clone(),
            request_id: request_id.clone(),
        });
        self.store.notify();
    }

    fn update_options(&self, key: &QueryCacheKey, request_id: &RequestId, options: &SubscriptionOptions) {
        if let Some(entry) = self.entries.borrow_mut().get_mut(key)
            && let Some(slot) = entry.subscriptions.get_mut(request_id)
        {
            *slot = options.clone();
        }
        self.store.record(Action::UpdateSubscriptionOptions {
            endpoint: self.meta.name.clone(),
            key: key.clone(),
            request_id: request_id.clone(),
            options: options.clone(),
        });
        self.store.notify();
    }

    fn refetch(&self, key: &QueryCacheKey, arg: &Rc<A>) {
        let request_id = self.store.next_request_id();
        self.start(key, arg, &request_id, |_| true);
        self.store.record(Action::QueryRefetch {
            endpoint: self.meta.name.clone(),
            key: key.clone(),
            request_id,
        });
        self.store.notify();
    }

    fn abort(&self, key: &QueryCacheKey, request_id: &RequestId) {
        let aborted = {
            let mut in_flight = self.in_flight.borrow_mut();
            let before = in_flight.len();
            in_flight.retain(|request| !(request.key == *key && request.request_id == *request_id));
            before != in_flight.len()
        };
        if aborted && let Some(entry) = self.entries.borrow_mut().get_mut(key) {
            let previous = &entry.state;
            entry.state = Rc::new(RawQueryState {
                status: QueryStatus::Rejected,
                data: previous.data.clone(),
                error: Some(RequestError::Aborted),
                original_args: previous.original_args.clone(),
                request_id: previous.request_id.clone(),
                fulfilled_at: previous.fulfilled_at,
            });
        }
        self.store.record(Action::QueryAbort {
            endpoint: self.meta.name.clone(),
            key: key.clone(),
            request_id: request_id.clone(),
        });
        self.store.notify();
    }

    fn settled(&self, key: &QueryCacheKey) -> Option<Settled<D, E>> {
        let state = self.entry_state(key);
        match state.status {
            QueryStatus::Fulfilled => state.data.clone().map(Ok),
            QueryStatus::Rejected => state.error.clone().map(Err),
            QueryStatus::Uninitialized | QueryStatus::Pending => None,
        }
    }
}

impl<A, D, E> StateListeners for HarnessQueryEndpoint<A, D, E> {
    fn add_listener(&self, listener: Rc<dyn Fn()>) -> ListenerId {
        self.store.add_listener(listener)
    }

    fn remove_listener(&self, id: ListenerId) {
        self.store.remove_listener(id);
    }
}

impl<A: 'static, D: 'static, E: 'static> QueryEndpoint<A, D, E> for HarnessQueryEndpoint<A, D, E> {
    fn meta(&self) -> &EndpointMeta {
        &self.meta
    }

    fn serialize_query_args(
        &self,
        arg: &A,
        meta: &EndpointMeta,
        endpoint_name: &str,
    ) -> Result<SerializedKey, ArgError> {
        (self.serializer)(arg, meta, endpoint_name)
    }

    fn initiate(&self, arg: Rc<A>, options: InitiateOptions) -> Rc<dyn QueryHandle<A, D, E>> {
        let key = self.key_for(&arg);
        let request_id = self.store.next_request_id();
        let force_refetch = options.force_refetch;
        let started = self.start(&key, &arg, &request_id, |state| {
            force_refetch || state.status != QueryStatus::Fulfilled
        });
        if options.subscribe
            && let Some(entry) = self.entries.borrow_mut().get_mut(&key)
        {
            entry
                .subscriptions
                .insert(request_id.clone(), options.subscription_options.clone());
        }
        self.store.record(Action::QueryInitiate {
            endpoint: self.meta.name.clone(),
            key: key.clone(),
            request_id: request_id.clone(),
            force_refetch,
            subscribe: options.subscribe,
            started,
        });
        self.store.notify();

        Rc::new(HarnessQueryHandle {
            endpoint: Weak::clone(&self.this),
            key,
            request_id,
            arg,
            options: RefCell::new(options.subscription_options),
        })
    }

    fn select(&self, arg: &StableArg<A>) -> Rc<RawQueryState<A, D, E>> {
        match arg.key() {
            Some(key) => self.entry_state(key),
            None => Rc::clone(&self.uninitialized),
        }
    }

    fn probe_subscription(&self, key: &QueryCacheKey, request_id: &RequestId) -> Option<bool> {
        if !self.store.has_middleware() {
            return None;
        }
        Some(
            self.entries
                .borrow()
                .get(key)
                .is_some_and(|entry| entry.subscriptions.contains_key(request_id)),
        )
    }

    fn prefetch(&self, arg: Rc<A>, options: PrefetchOptions) {
        let key = self.key_for(&arg);
        let request_id = self.store.next_request_id();
        let started = self.start(&key, &arg, &request_id, |state| match options {
            PrefetchOptions::Default => state.status != QueryStatus::Fulfilled,
            PrefetchOptions::Force => true,
            PrefetchOptions::IfOlderThan(max_age) => {
                state.status != QueryStatus::Fulfilled
                    || state.fulfilled_at.is_none_or(|at| at.elapsed() >= max_age)
            }
        });
        self.store.record(Action::Prefetch {
            endpoint: self.meta.name.clone(),
            key,
            options,
            started,
        });
        self.store.notify();
    }
}

impl<A, D, E> fmt::Debug for HarnessQueryEndpoint<A, D, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HarnessQueryEndpoint")
            .field("name", &self.meta.name)
            .field("entries", &self.entries.borrow().len())
            .field("in_flight", &self.in_flight.borrow().len())
            .field("network_requests", &self.network_requests.get())
            .finish()
    }
}

struct HarnessQueryHandle<A, D, E> {
    endpoint: Weak<HarnessQueryEndpoint<A, D, E>>,
    key: QueryCacheKey,
    request_id: RequestId,
    arg: Rc<A>,
    options: RefCell<SubscriptionOptions>,
}

impl<A: 'static, D: 'static, E: 'static> QueryHandle<A, D, E> for HarnessQueryHandle<A, D, E> {
    fn query_cache_key(&self) -> &QueryCacheKey {
        &self.key
    }

    fn request_id(&self) -> &RequestId {
        &self.request_id
    }

    fn arg(&self) -> &Rc<A> {
        &self.arg
    }

    fn subscription_options(&self) -> SubscriptionOptions {
        self.options.borrow().clone()
    }

    fn unsubscribe(&self) {
        if let Some(endpoint) = self.endpoint.upgrade() {
            endpoint.unsubscribe(&self.key, &self.request_id);
        }
    }

    fn update_subscription_options(&self, options: SubscriptionOptions) {
        if let Some(endpoint) = self.endpoint.upgrade() {
            endpoint.update_options(&self.key, &self.request_id, &options);
        }
        *self.options.borrow_mut() = options;
    }

    fn refetch(&self) {
        if let Some(endpoint) = self.endpoint.upgrade() {
            endpoint.refetch(&self.key, &self.arg);
        }
    }

    fn abort(&self) {
        if let Some(endpoint) = self.endpoint.upgrade() {
            let request_id = endpoint
                .entry_state(&self.key)
                .request_id
                .clone()
                .unwrap_or_else(|| self.request_id.clone());
            endpoint.abort(&self.key, &request_id);
        }
    }

    fn settled(&self) -> Option<Settled<D, E>> {
        self.endpoint.upgrade()?.settled(&self.key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    type Endpoint = HarnessQueryEndpoint<u32, String, String>;

    fn subscribe(endpoint: &Endpoint, arg: u32, force_refetch: bool) -> Rc<dyn QueryHandle<u32, String, String>> {
        endpoint.initiate(
            Rc::new(arg),
            InitiateOptions {
                force_refetch,
                ..InitiateOptions::default()
            },
        )
    }

    #[test]
    fn pending_requests_are_deduplicated() {
        let store = HarnessStore::new();
        let endpoint = Endpoint::new(&store, "getUser");
        let first = subscribe(&endpoint, 1, false);
        let second = subscribe(&endpoint, 1, true);
        assert_eq!(endpoint.network_requests(), 1);
        assert_eq!(endpoint.subscription_count(&1), 2);
        assert_ne!(first.request_id(), second.request_id());
    }

    #[test]
    fn fulfilled_entries_refetch_only_when_forced() {
        let store = HarnessStore::new();
        let endpoint = Endpoint::new(&store, "getUser");
        let _a = subscribe(&endpoint, 1, false);
        endpoint.resolve_all(|id| Ok(format!("user {id}")));
        let _b = subscribe(&endpoint, 1, false);
        assert_eq!(endpoint.network_requests(), 1);
        let _c = subscribe(&endpoint, 1, true);
        assert_eq!(endpoint.network_requests(), 2);
        assert!(endpoint.state(&1).data.is_some(), "data kept while refetching");
    }

    #[test]
    fn unsubscribe_and_probe() {
        let store = HarnessStore::new();
        let endpoint = Endpoint::new(&store, "getUser");
        let handle = subscribe(&endpoint, 1, false);
        let key = handle.query_cache_key().clone();
        assert_eq!(endpoint.probe_subscription(&key, handle.request_id()), Some(true));
        handle.unsubscribe();
        assert_eq!(endpoint.probe_subscription(&key, handle.request_id()), Some(false));
        assert_eq!(endpoint.total_subscriptions(), 0);
    }

    #[test]
    fn probe_without_middleware_answers_nothing() {
        let store = HarnessStore::without_middleware();
        let endpoint = Endpoint::new(&store, "getUser");
        let handle = subscribe(&endpoint, 1, false);
        assert_eq!(endpoint.probe_subscription(handle.query_cache_key(), handle.request_id()), None);
    }

    #[test]
    fn abort_rejects_with_aborted() {
        let store = HarnessStore::new();
        let endpoint = Endpoint::new(&store, "getUser");
        let handle = subscribe(&endpoint, 1, false);
        handle.abort();
        assert_eq!(endpoint.in_flight(), 0);
        assert!(matches!(handle.settled(), Some(Err(RequestError::Aborted))));
    }

    #[test]
    fn reset_drops_entries_and_subscriptions() {
        let store = HarnessStore::new();
        let endpoint = Endpoint::new(&store, "getUser");
        let handle = subscribe(&endpoint, 1, false);
        endpoint.resolve_all(|id| Ok(format!("user {id}")));
        store.reset_api_state();
        assert!(endpoint.state(&1).is_uninitialized());
        assert_eq!(
            endpoint.probe_subscription(handle.query_cache_key(), handle.request_id()),
            Some(false)
        );
    }

    #[test]
    fn prefetch_policies() {
        let store = HarnessStore::new();
        let endpoint = Endpoint::new(&store, "getUser");
        endpoint.seed(1, "cached".into());
        endpoint.prefetch(Rc::new(1), PrefetchOptions::Default);
        assert_eq!(endpoint.network_requests(), 0);
        endpoint.prefetch(Rc::new(1), PrefetchOptions::Force);
        assert_eq!(endpoint.network_requests(), 1);
        assert_eq!(endpoint.total_subscriptions(), 0);
    }

    proptest! {
        #[test]
        fn one_request_per_key_while_pending(args in proptest::collection::vec(0u32..4, 1..20)) {
            let store = HarnessStore::new();
            let endpoint = Endpoint::new(&store, "getUser");
            let handles: Vec<_> = args.iter().map(|arg| subscribe(&endpoint, *arg, false)).collect();
            let mut distinct = args.clone();
            distinct.sort_unstable();
            distinct.dedup();
            prop_assert_eq!(endpoint.network_requests(), distinct.len());
            prop_assert_eq!(endpoint.total_subscriptions(), handles.len());
        }
    }
}
