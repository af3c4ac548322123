#![forbid(unsafe_code)]

//! Subscription Controller.
//!
//! Owns the single store subscription of one query invocation and keeps it in
//! step with the invocation's stable argument and subscription options.
//!
//! ```text
//! Idle ──value──▶ Subscribed ──new identity──▶ Subscribed (resubscribed)
//!   ▲                 │ ──options changed──▶ Subscribed (options updated)
//!   └────skip─────────┘
//! any ──dispose──▶ Disposed
//! ```
//!
//! # Invariants
//!
//! 1. At most one live handle at any time. The previous handle is
//!    unsubscribed before a new `initiate` is dispatched.
//! 2. An argument with the same identity as the subscribed one never
//!    dispatches `initiate`.
//! 3. Disposal unsubscribes the live handle, if any, and is idempotent.
//!
//! # Failure Modes
//!
//! - Store without middleware: the probe returns `None` and
//!   [`BindingError::MissingMiddleware`] is returned.
//! - Externally reset store: the probe returns `Some(false)`; the dangling
//!   handle is forgotten (not unsubscribed, the store already dropped it) and
//!   a fresh `initiate` is dispatched.

use std::fmt;
use std::rc::Rc;

use storeq_core::{
    BindingError, InitiateOptions, QueryCacheKey, QueryEndpoint, QueryHandle,
    RefetchOnMountOrArgChange, RequestId, Settled, ShallowEq, StableArg, SubscriptionOptions,
};
use tracing::{debug, warn};

/// What a query invocation asks of its subscription.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SubscriptionRequest {
    pub options: SubscriptionOptions,
    pub refetch_on_mount_or_arg_change: RefetchOnMountOrArgChange,
}

impl ShallowEq for SubscriptionRequest {
    fn shallow_eq(&self, other: &Self) -> bool {
        self.options.shallow_eq(&other.options)
            && self.refetch_on_mount_or_arg_change == other.refetch_on_mount_or_arg_change
    }
}

/// Lifecycle phase of a [`SubscriptionController`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Subscribed,
    Disposed,
}

/// The result of an `initiate`-style dispatch, as handed to callers.
pub struct QueryInvocation<A, D, E> {
    handle: Rc<dyn QueryHandle<A, D, E>>,
}

impl<A, D, E> Clone for QueryInvocation<A, D, E> {
    fn clone(&self) -> Self {
        Self {
            handle: Rc::clone(&self.handle),
        }
    }
}

impl<A, D, E> QueryInvocation<A, D, E> {
    pub(crate) fn new(handle: Rc<dyn QueryHandle<A, D, E>>) -> Self {
        Self { handle }
    }

    #[must_use]
    pub fn request_id(&self) -> &RequestId {
        self.handle.request_id()
    }

    #[must_use]
    pub fn query_cache_key(&self) -> &QueryCacheKey {
        self.handle.query_cache_key()
    }

    #[must_use]
    pub fn arg(&self) -> &Rc<A> {
        self.handle.arg()
    }

    /// Cancel the request. The only hard cancellation available.
    pub fn abort(&self) {
        debug!(request_id = %self.handle.request_id(), "aborting query request");
        self.handle.abort();
    }

    /// The outcome once settled. `Err` carries the store's error untouched.
    #[must_use]
    pub fn settled(&self) -> Option<Settled<D, E>> {
        self.handle.settled()
    }
}

impl<A, D, E> fmt::Debug for QueryInvocation<A, D, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryInvocation")
            .field("request_id", self.handle.request_id())
            .field("query_cache_key", self.handle.query_cache_key())
            .finish()
    }
}

/// Per-invocation subscription state.
pub struct SubscriptionController<A, D, E> {
    endpoint: Rc<dyn QueryEndpoint<A, D, E>>,
    handle: Option<Rc<dyn QueryHandle<A, D, E>>>,
    current_arg: Option<Rc<A>>,
    phase: Phase,
}

impl<A, D, E> SubscriptionController<A, D, E> {
    pub fn new(endpoint: Rc<dyn QueryEndpoint<A, D, E>>) -> Self {
        Self {
            endpoint,
            handle: None,
            current_arg: None,
            phase: Phase::Idle,
        }
    }

    #[must_use]
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// The live handle, if subscribed.
    #[must_use]
    pub fn handle(&self) -> Option<&Rc<dyn QueryHandle<A, D, E>>> {
        self.handle.as_ref()
    }

    /// Bring the subscription in line with `arg` and `request`.
    ///
    /// # Errors
    ///
    /// [`BindingError::MissingMiddleware`] when the store cannot answer a
    /// subscription probe.
    pub fn subscribe(
        &mut self,
        arg: &StableArg<A>,
        request: &SubscriptionRequest,
    ) -> Result<(), BindingError> {
        if self.phase == Phase::Disposed {
            debug!(endpoint = self.endpoint.name(), "subscribe after dispose ignored");
            return Ok(());
        }

        self.probe()?;

        let StableArg::Value { key, arg } = arg else {
            if let Some(handle) = self.handle.take() {
                debug!(
                    endpoint = self.endpoint.name(),
                    key = %handle.query_cache_key(),
                    "argument skipped; releasing subscription"
                );
                handle.unsubscribe();
            }
            self.current_arg = None;
            self.phase = Phase::Idle;
            return Ok(());
        };

        let same_identity = self
            .current_arg
            .as_ref()
            .is_some_and(|current| Rc::ptr_eq(current, arg));

        if same_identity && let Some(handle) = &self.handle {
            if !handle.subscription_options().shallow_eq(&request.options) {
                debug!(endpoint = self.endpoint.name(), %key, "updating subscription options");
                handle.update_subscription_options(request.options.clone());
            }
            return Ok(());
        }

        let force_refetch = self.should_force(arg, key, request.refetch_on_mount_or_arg_change);
        if let Some(previous) = self.handle.take() {
            debug!(
                endpoint = self.endpoint.name(),
                key = %previous.query_cache_key(),
                "argument changed; unsubscribing previous"
            );
            previous.unsubscribe();
        }
        debug!(endpoint = self.endpoint.name(), %key, force_refetch, "initiating query");
        let handle = self.endpoint.initiate(
            Rc::clone(arg),
            InitiateOptions {
                subscription_options: request.options.clone(),
                force_refetch,
                subscribe: true,
            },
        );
        self.handle = Some(handle);
        self.current_arg = Some(Rc::clone(arg));
        self.phase = Phase::Subscribed;
        Ok(())
    }

    /// Refetch through the live handle.
    ///
    /// # Errors
    ///
    /// [`BindingError::NoActiveSubscription`] when skipped, idle, or disposed.
    pub fn refetch(&self) -> Result<QueryInvocation<A, D, E>, BindingError> {
        let handle = self.live_handle()?;
        debug!(endpoint = self.endpoint.name(), key = %handle.query_cache_key(), "manual refetch");
        handle.refetch();
        Ok(QueryInvocation::new(handle))
    }

    /// The live handle, or the error `refetch` reports without one.
    ///
    /// # Errors
    ///
    /// [`BindingError::NoActiveSubscription`] when nothing is subscribed.
    pub fn live_handle(&self) -> Result<Rc<dyn QueryHandle<A, D, E>>, BindingError> {
        self.handle
            .clone()
            .ok_or_else(|| BindingError::NoActiveSubscription {
                endpoint: self.endpoint.name().to_owned(),
            })
    }

    /// Unsubscribe and stop accepting arguments.
    pub fn dispose(&mut self) {
        if let Some(handle) = self.handle.take() {
            debug!(
                endpoint = self.endpoint.name(),
                key = %handle.query_cache_key(),
                "disposing subscription"
            );
            handle.unsubscribe();
        }
        self.current_arg = None;
        self.phase = Phase::Disposed;
    }

    fn probe(&mut self) -> Result<(), BindingError> {
        let Some(handle) = &self.handle else {
            return Ok(());
        };
        match self
            .endpoint
            .probe_subscription(handle.query_cache_key(), handle.request_id())
        {
            None => Err(BindingError::MissingMiddleware {
                endpoint: self.endpoint.name().to_owned(),
            }),
            Some(true) => Ok(()),
            Some(false) => {
                warn!(
                    endpoint = self.endpoint.name(),
                    key = %handle.query_cache_key(),
                    request_id = %handle.request_id(),
                    "subscription no longer live at the store; resubscribing"
                );
                self.handle = None;
                self.current_arg = None;
                self.phase = Phase::Idle;
                Ok(())
            }
        }
    }

    fn should_force(
        &self,
        arg: &Rc<A>,
        key: &QueryCacheKey,
        policy: RefetchOnMountOrArgChange,
    ) -> bool {
        match policy {
            RefetchOnMountOrArgChange::Never => false,
            RefetchOnMountOrArgChange::Always => true,
            RefetchOnMountOrArgChange::OlderThan(max_age) => {
                let stable = StableArg::Value {
                    key: key.clone(),
                    arg: Rc::clone(arg),
                };
                self.endpoint
                    .select(&stable)
                    .fulfilled_at
                    .is_some_and(|at| at.elapsed() >= max_age)
            }
        }
    }
}

impl<A, D, E> fmt::Debug for SubscriptionController<A, D, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionController")
            .field("phase", &self.phase)
            .field("subscribed", &self.handle.is_some())
            .finish()
    }
}
