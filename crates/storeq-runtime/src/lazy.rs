#![forbid(unsafe_code)]

//! Lazy Trigger Coordinator.
//!
//! A lazy query fetches nothing until [`LazyQuery::fetch`] is called. Each
//! trigger releases the previous subscription before dispatching the new
//! one, and the state stream follows the last triggered argument.
//!
//! When the state stream reconnects (its consumers detached and a new one
//! attached) with a remembered argument but no live subscription, the
//! subscription is reinstated from cache (`prefer_cache_value`).

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use std::time::Duration;

use storeq_core::{
    ArgCache, BindingError, InitiateOptions, LazyExtra, QueryArg, QueryEndpoint, QueryHandle,
    QueryState, ShallowEq, StableArg, SubscriptionOptions, stabilize,
};
use tracing::debug;

use crate::bridge::listen_batched;
use crate::module::HookDefaults;
use crate::query::Source;
use crate::reactive::{BatchScope, Emitter, Observable, StateStream, Subscription};
use crate::selector::{LastGood, QueryStateSelector, SelectFromResult, identity_selector};
use crate::subscription::QueryInvocation;

/// Options for [`use_lazy_query`].
pub struct LazyQueryOptions<A, D, E, S = QueryState<A, D, E>> {
    pub subscription: SubscriptionOptions,
    pub select_from_result: SelectFromResult<A, D, E, S>,
}

impl<A: 'static, D: 'static, E: 'static> Default for LazyQueryOptions<A, D, E> {
    fn default() -> Self {
        Self {
            subscription: SubscriptionOptions::default(),
            select_from_result: identity_selector(),
        }
    }
}

impl<A: 'static, D: 'static, E: 'static> LazyQueryOptions<A, D, E> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl<A, D, E, S> LazyQueryOptions<A, D, E, S> {
    #[must_use]
    pub fn polling_interval(mut self, interval: Duration) -> Self {
        self.subscription.polling_interval = interval;
        self
    }

    #[must_use]
    pub fn refetch_on_focus(mut self, enabled: bool) -> Self {
        self.subscription.refetch_on_focus = Some(enabled);
        self
    }

    #[must_use]
    pub fn refetch_on_reconnect(mut self, enabled: bool) -> Self {
        self.subscription.refetch_on_reconnect = Some(enabled);
        self
    }

    pub fn select_from_result<S2>(
        self,
        select: impl Fn(&QueryState<A, D, E>) -> S2 + 'static,
    ) -> LazyQueryOptions<A, D, E, S2> {
        LazyQueryOptions {
            subscription: self.subscription,
            select_from_result: Rc::new(select),
        }
    }
}

impl<A, D, E, S> Clone for LazyQueryOptions<A, D, E, S> {
    fn clone(&self) -> Self {
        Self {
            subscription: self.subscription.clone(),
            select_from_result: Rc::clone(&self.select_from_result),
        }
    }
}

impl<A, D, E, S> ShallowEq for LazyQueryOptions<A, D, E, S> {
    fn shallow_eq(&self, other: &Self) -> bool {
        self.subscription.shallow_eq(&other.subscription)
            && Rc::ptr_eq(&self.select_from_result, &other.select_from_result)
    }
}

impl<A, D, E, S> fmt::Debug for LazyQueryOptions<A, D, E, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LazyQueryOptions")
            .field("subscription", &self.subscription)
            .finish_non_exhaustive()
    }
}

impl<A, D, E, S> From<LazyQueryOptions<A, D, E, S>> for Source<LazyQueryOptions<A, D, E, S>> {
    fn from(options: LazyQueryOptions<A, D, E, S>) -> Self {
        Self::Value(options)
    }
}

/// Dispatches lazy fetches and owns the resulting subscription.
pub struct LazyTrigger<A, D, E> {
    endpoint: Rc<dyn QueryEndpoint<A, D, E>>,
    defaults: HookDefaults,
    options: SubscriptionOptions,
    arg_cache: ArgCache<A>,
    handle: Option<Rc<dyn QueryHandle<A, D, E>>>,
}

impl<A, D, E> LazyTrigger<A, D, E> {
    pub fn new(
        endpoint: Rc<dyn QueryEndpoint<A, D, E>>,
        defaults: HookDefaults,
        options: &SubscriptionOptions,
    ) -> Self {
        let options = defaults.subscription_options(options);
        Self {
            endpoint,
            defaults,
            options,
            arg_cache: ArgCache::new(),
            handle: None,
        }
    }

    /// Stabilize `arg` and fetch it.
    ///
    /// Unless `extra.prefer_cache_value` is set the store is asked to refetch
    /// even when a cached entry exists.
    ///
    /// # Errors
    ///
    /// Serializer failures.
    pub fn trigger(
        &mut self,
        arg: A,
        extra: LazyExtra,
    ) -> Result<(StableArg<A>, QueryInvocation<A, D, E>), BindingError> {
        let _batch = BatchScope::new();
        let endpoint = &self.endpoint;
        let stable = stabilize(
            QueryArg::Value(arg),
            |arg, meta, name| endpoint.serialize_query_args(arg, meta, name),
            endpoint.meta(),
            endpoint.name(),
            &mut self.arg_cache,
        )?;
        let invocation =
            self.fire(&stable, extra)
                .ok_or_else(|| BindingError::NoActiveSubscription {
                    endpoint: self.endpoint.name().to_owned(),
                })?;
        Ok((stable, invocation))
    }

    /// Dispatch for an already stable argument. Sentinels dispatch nothing.
    pub(crate) fn fire(
        &mut self,
        arg: &StableArg<A>,
        extra: LazyExtra,
    ) -> Option<QueryInvocation<A, D, E>> {
        let StableArg::Value { key, arg } = arg else {
            return None;
        };
        if let Some(previous) = self.handle.take() {
            debug!(
                endpoint = self.endpoint.name(),
                key = %previous.query_cache_key(),
                "lazy trigger; unsubscribing previous"
            );
            previous.unsubscribe();
        }
        debug!(
            endpoint = self.endpoint.name(),
            %key,
            prefer_cache_value = extra.prefer_cache_value,
            "lazy trigger"
        );
        let handle = self.endpoint.initiate(
            Rc::clone(arg),
            InitiateOptions {
                subscription_options: self.options.clone(),
                force_refetch: !extra.prefer_cache_value,
                subscribe: true,
            },
        );
        self.handle = Some(Rc::clone(&handle));
        Some(QueryInvocation::new(handle))
    }

    /// Apply new subscription options to the live subscription, if any.
    pub fn update_options(&mut self, options: &SubscriptionOptions) {
        let options = self.defaults.subscription_options(options);
        if options.shallow_eq(&self.options) {
            return;
        }
        if let Some(handle) = &self.handle {
            debug!(endpoint = self.endpoint.name(), "updating lazy subscription options");
            handle.update_subscription_options(options.clone());
        }
        self.options = options;
    }

    /// Release the live subscription.
    pub fn release(&mut self) {
        if let Some(handle) = self.handle.take() {
            debug!(
                endpoint = self.endpoint.name(),
                key = %handle.query_cache_key(),
                "releasing lazy subscription"
            );
            handle.unsubscribe();
        }
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.handle.is_some()
    }

    /// The live subscription, if any.
    #[must_use]
    pub fn invocation(&self) -> Option<QueryInvocation<A, D, E>> {
        self.handle
            .as_ref()
            .map(|handle| QueryInvocation::new(Rc::clone(handle)))
    }
}

impl<A, D, E> Drop for LazyTrigger<A, D, E> {
    fn drop(&mut self) {
        let _batch = BatchScope::new();
        self.release();
    }
}

impl<A, D, E> fmt::Debug for LazyTrigger<A, D, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LazyTrigger")
            .field("endpoint", &self.endpoint.name())
            .field("options", &self.options)
            .field("active", &self.handle.is_some())
            .finish()
    }
}

struct LazyShared<A, D, E> {
    trigger: RefCell<LazyTrigger<A, D, E>>,
    last_arg: Observable<StableArg<A>>,
    last_good: LastGood<A, D, E>,
}

struct LazyConnection<A, D, E, S> {
    endpoint: Rc<dyn QueryEndpoint<A, D, E>>,
    shared: Rc<LazyShared<A, D, E>>,
    options: Option<LazyQueryOptions<A, D, E, S>>,
    selector: Option<QueryStateSelector<A, D, E, S>>,
    last_emitted: Option<S>,
}

impl<A, D, E, S> LazyConnection<A, D, E, S>
where
    A: 'static,
    D: 'static,
    E: 'static,
    S: ShallowEq + Clone + 'static,
{
    /// Re-read arguments and options; rebuild the selector when either
    /// identity changed.
    fn refresh(
        this: &Rc<RefCell<Self>>,
        options: LazyQueryOptions<A, D, E, S>,
        emitter: &Emitter<S>,
    ) {
        let _batch = BatchScope::new();
        let emission = {
            let mut guard = this.borrow_mut();
            let conn = &mut *guard;
            let arg = conn.shared.last_arg.get();

            let options_changed = conn
                .options
                .as_ref()
                .is_none_or(|current| !current.shallow_eq(&options));
            if options_changed {
                conn.shared
                    .trigger
                    .borrow_mut()
                    .update_options(&options.subscription);
            }
            let select_changed = conn.options.as_ref().is_none_or(|current| {
                !Rc::ptr_eq(&current.select_from_result, &options.select_from_result)
            });
            let arg_changed = conn
                .selector
                .as_ref()
                .is_none_or(|selector| !selector.arg().same_identity(&arg));

            if select_changed || arg_changed {
                conn.selector = Some(QueryStateSelector::new(
                    Rc::clone(&conn.endpoint),
                    arg,
                    Rc::clone(&conn.shared.last_good),
                    Rc::clone(&options.select_from_result),
                ));
            }
            conn.options = Some(options);
            conn.select_changed()
        };
        if let Some(value) = emission {
            emitter.emit(value);
        }
    }

    fn reselect(this: &Rc<RefCell<Self>>, emitter: &Emitter<S>) {
        let emission = this.borrow_mut().select_changed();
        if let Some(value) = emission {
            emitter.emit(value);
        }
    }

    fn select_changed(&mut self) -> Option<S> {
        let selected = self.selector.as_mut()?.select();
        if self
            .last_emitted
            .as_ref()
            .is_some_and(|last| last.shallow_eq(&selected))
        {
            return None;
        }
        self.last_emitted = Some(selected.clone());
        Some(selected)
    }
}

/// A lazy query: a trigger plus the state of the last triggered argument.
pub struct LazyQuery<A, D, E, S> {
    shared: Rc<LazyShared<A, D, E>>,
    state: StateStream<S>,
}

impl<A, D, E, S> LazyQuery<A, D, E, S>
where
    A: 'static,
    D: 'static,
    E: 'static,
    S: Clone + 'static,
{
    /// Fetch `arg`, releasing the previous subscription first.
    ///
    /// # Errors
    ///
    /// Serializer failures.
    pub fn fetch(
        &self,
        arg: A,
        extra: LazyExtra,
    ) -> Result<QueryInvocation<A, D, E>, BindingError> {
        let _batch = BatchScope::new();
        let (stable, invocation) = self.shared.trigger.borrow_mut().trigger(arg, extra)?;
        self.shared.last_arg.publish(stable);
        Ok(invocation)
    }

    /// State of the last triggered argument.
    #[must_use]
    pub fn state(&self) -> StateStream<S> {
        self.state.clone()
    }

    /// The last triggered argument; [`StableArg::Uninitialized`] before the
    /// first fetch.
    #[must_use]
    pub fn last_arg(&self) -> Observable<StableArg<A>> {
        self.shared.last_arg.clone()
    }

    /// The live subscription, if any.
    #[must_use]
    pub fn invocation(&self) -> Option<QueryInvocation<A, D, E>> {
        self.shared.trigger.borrow().invocation()
    }
}

impl<A, D, E, S> fmt::Debug for LazyQuery<A, D, E, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LazyQuery")
            .field("trigger", &self.shared.trigger)
            .finish_non_exhaustive()
    }
}

/// Build a lazy query for `endpoint`.
pub fn use_lazy_query<A, D, E, S>(
    endpoint: Rc<dyn QueryEndpoint<A, D, E>>,
    defaults: HookDefaults,
    options: impl Into<Source<LazyQueryOptions<A, D, E, S>>>,
) -> LazyQuery<A, D, E, S>
where
    A: 'static,
    D: 'static,
    E: 'static,
    S: ShallowEq + Clone + 'static,
{
    let options = Rc::new(options.into());
    let initial = options.current();
    let shared = Rc::new(LazyShared {
        trigger: RefCell::new(LazyTrigger::new(
            Rc::clone(&endpoint),
            defaults,
            &initial.subscription,
        )),
        last_arg: Observable::new(StableArg::Uninitialized),
        last_good: Rc::new(RefCell::new(None)),
    });

    let state = {
        let shared = Rc::clone(&shared);
        StateStream::new(move |emitter: Emitter<S>| {
            let _batch = BatchScope::new();
            debug!(endpoint = endpoint.name(), "lazy query stream connected");

            {
                let mut trigger = shared.trigger.borrow_mut();
                let last_arg = shared.last_arg.get();
                if !last_arg.is_sentinel() && !trigger.is_active() {
                    debug!(endpoint = endpoint.name(), "reinstating lazy subscription from cache");
                    trigger.fire(&last_arg, LazyExtra::prefer_cache_value());
                }
            }

            let conn = Rc::new(RefCell::new(LazyConnection {
                endpoint: Rc::clone(&endpoint),
                shared: Rc::clone(&shared),
                options: None,
                selector: None,
                last_emitted: None,
            }));

            let on_input = {
                let conn = Rc::downgrade(&conn);
                let (options, emitter) = (Rc::clone(&options), emitter.clone());
                Rc::new(move || {
                    if let Some(conn) = conn.upgrade() {
                        LazyConnection::refresh(&conn, options.current(), &emitter);
                    }
                })
            };
            let on_store = {
                let conn = Rc::downgrade(&conn);
                let emitter = emitter.clone();
                move || {
                    if let Some(conn) = conn.upgrade() {
                        LazyConnection::reselect(&conn, &emitter);
                    }
                }
            };

            let guards = [
                listen_batched(Rc::clone(&endpoint), on_store),
                shared.last_arg.subscribe({
                    let on_input = Rc::clone(&on_input);
                    move |_| on_input()
                }),
                options.watch({
                    let on_input = Rc::clone(&on_input);
                    move || on_input()
                }),
            ];
            on_input();

            let shared = Rc::clone(&shared);
            let endpoint_name = endpoint.name().to_owned();
            Subscription::new(move || {
                let _batch = BatchScope::new();
                drop(guards);
                drop(conn);
                shared.trigger.borrow_mut().release();
                debug!(endpoint = %endpoint_name, "lazy query stream torn down");
            })
        })
    };

    LazyQuery { shared, state }
}
