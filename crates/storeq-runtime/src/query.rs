#![forbid(unsafe_code)]

//! Query Stream Composer.
//!
//! [`use_query`] combines the latest argument and the latest options, each
//! deduplicated with [`ShallowEq`], and for every distinct pair
//!
//! 1. stabilizes the argument against the invocation's [`ArgCache`],
//! 2. brings the [`SubscriptionController`] in line (dispatching against the
//!    store), and only then
//! 3. builds a fresh [`QueryStateSelector`] and emits its selection together
//!    with a [`Refetch`] handle.
//!
//! Store changes re-run the current selector; an emission happens only when
//! the selection changed. The output is a [`StateStream`]: shared between all
//! consumers, replaying the latest value, and torn down (subscription
//! released) when the last consumer detaches.
//!
//! [`use_query_state`] is the same pipeline without a subscription, and
//! [`use_query_subscription`] is the subscription without a pipeline.

use std::cell::RefCell;
use std::fmt;
use std::ops::Deref;
use std::rc::{Rc, Weak};
use std::time::Duration;

use storeq_core::{
    ArgCache, BindingError, QueryArg, QueryEndpoint, QueryState, RefetchOnMountOrArgChange,
    ShallowEq, StableArg, SubscriptionOptions, stabilize,
};
use tracing::{debug, error};

use crate::bridge::listen_batched;
use crate::module::HookDefaults;
use crate::reactive::{BatchScope, Emitter, Observable, StateStream, Subscription};
use crate::selector::{LastGood, QueryStateSelector, SelectFromResult, identity_selector};
use crate::subscription::{QueryInvocation, SubscriptionController, SubscriptionRequest};

// ---------------------------------------------------------------------------
// Inputs
// ---------------------------------------------------------------------------

/// An input that is either fixed or read from an [`Observable`] slot.
pub enum Source<T> {
    Value(T),
    Observable(Observable<T>),
}

impl<T: Clone + 'static> Source<T> {
    /// The current value.
    #[must_use]
    pub fn current(&self) -> T {
        match self {
            Self::Value(value) => value.clone(),
            Self::Observable(slot) => slot.get(),
        }
    }

    /// Watch for changes. Fixed sources never change.
    pub fn watch(&self, callback: impl Fn() + 'static) -> Subscription {
        match self {
            Self::Value(_) => Subscription::empty(),
            Self::Observable(slot) => slot.subscribe(move |_| callback()),
        }
    }
}

impl<T> From<Observable<T>> for Source<T> {
    fn from(slot: Observable<T>) -> Self {
        Self::Observable(slot)
    }
}

impl<T> From<&Observable<T>> for Source<T> {
    fn from(slot: &Observable<T>) -> Self {
        Self::Observable(slot.clone())
    }
}

impl<A> From<QueryArg<A>> for Source<QueryArg<A>> {
    fn from(arg: QueryArg<A>) -> Self {
        Self::Value(arg)
    }
}

impl<A, D, E, S> From<UseQueryOptions<A, D, E, S>> for Source<UseQueryOptions<A, D, E, S>> {
    fn from(options: UseQueryOptions<A, D, E, S>) -> Self {
        Self::Value(options)
    }
}

impl<T: fmt::Debug> fmt::Debug for Source<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Self::Observable(slot) => f.debug_tuple("Observable").field(slot).finish(),
        }
    }
}

/// Subscription half of the query options.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QuerySubscriptionOptions {
    /// Treat the argument as skipped: no subscription, sentinel selection.
    pub skip: bool,
    pub polling_interval: Duration,
    /// `None` defers to the module default.
    pub refetch_on_mount_or_arg_change: Option<RefetchOnMountOrArgChange>,
    pub refetch_on_focus: Option<bool>,
    pub refetch_on_reconnect: Option<bool>,
}

impl QuerySubscriptionOptions {
    /// Resolve against module defaults.
    #[must_use]
    pub fn request(&self, defaults: &HookDefaults) -> SubscriptionRequest {
        SubscriptionRequest {
            options: defaults.subscription_options(&SubscriptionOptions {
                polling_interval: self.polling_interval,
                refetch_on_focus: self.refetch_on_focus,
                refetch_on_reconnect: self.refetch_on_reconnect,
            }),
            refetch_on_mount_or_arg_change: self
                .refetch_on_mount_or_arg_change
                .unwrap_or(defaults.refetch_on_mount_or_arg_change),
        }
    }
}

storeq_core::shallow_eq_by_value!(QuerySubscriptionOptions);

/// Options for [`use_query`].
pub struct UseQueryOptions<A, D, E, S = QueryState<A, D, E>> {
    pub subscription: QuerySubscriptionOptions,
    /// Projection of the derived state. Compared by identity.
    pub select_from_result: SelectFromResult<A, D, E, S>,
}

impl<A: 'static, D: 'static, E: 'static> Default for UseQueryOptions<A, D, E> {
    fn default() -> Self {
        Self {
            subscription: QuerySubscriptionOptions::default(),
            select_from_result: identity_selector(),
        }
    }
}

impl<A: 'static, D: 'static, E: 'static> UseQueryOptions<A, D, E> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl<A, D, E, S> UseQueryOptions<A, D, E, S> {
    #[must_use]
    pub fn skip(mut self, skip: bool) -> Self {
        self.subscription.skip = skip;
        self
    }

    #[must_use]
    pub fn polling_interval(mut self, interval: Duration) -> Self {
        self.subscription.polling_interval = interval;
        self
    }

    #[must_use]
    pub fn refetch_on_mount_or_arg_change(
        mut self,
        policy: impl Into<RefetchOnMountOrArgChange>,
    ) -> Self {
        self.subscription.refetch_on_mount_or_arg_change = Some(policy.into());
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

    /// Replace the projection.
    pub fn select_from_result<S2>(
        self,
        select: impl Fn(&QueryState<A, D, E>) -> S2 + 'static,
    ) -> UseQueryOptions<A, D, E, S2> {
        UseQueryOptions {
            subscription: self.subscription,
            select_from_result: Rc::new(select),
        }
    }
}

impl<A, D, E, S> Clone for UseQueryOptions<A, D, E, S> {
    fn clone(&self) -> Self {
        Self {
            subscription: self.subscription.clone(),
            select_from_result: Rc::clone(&self.select_from_result),
        }
    }
}

impl<A, D, E, S> ShallowEq for UseQueryOptions<A, D, E, S> {
    fn shallow_eq(&self, other: &Self) -> bool {
        self.subscription.shallow_eq(&other.subscription)
            && Rc::ptr_eq(&self.select_from_result, &other.select_from_result)
    }
}

impl<A, D, E, S> fmt::Debug for UseQueryOptions<A, D, E, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UseQueryOptions")
            .field("subscription", &self.subscription)
            .finish_non_exhaustive()
    }
}

/// Options for [`use_query_state`].
pub struct UseQueryStateOptions<A, D, E, S = QueryState<A, D, E>> {
    pub skip: bool,
    pub select_from_result: SelectFromResult<A, D, E, S>,
}

impl<A: 'static, D: 'static, E: 'static> Default for UseQueryStateOptions<A, D, E> {
    fn default() -> Self {
        Self {
            skip: false,
            select_from_result: identity_selector(),
        }
    }
}

impl<A, D, E, S> UseQueryStateOptions<A, D, E, S> {
    #[must_use]
    pub fn skip(mut self, skip: bool) -> Self {
        self.skip = skip;
        self
    }

    pub fn select_from_result<S2>(
        self,
        select: impl Fn(&QueryState<A, D, E>) -> S2 + 'static,
    ) -> UseQueryStateOptions<A, D, E, S2> {
        UseQueryStateOptions {
            skip: self.skip,
            select_from_result: Rc::new(select),
        }
    }
}

// ---------------------------------------------------------------------------
// Outputs
// ---------------------------------------------------------------------------

/// Manual refetch bound to one connection of a query stream.
pub struct Refetch<A, D, E> {
    endpoint: Rc<str>,
    controller: Weak<RefCell<SubscriptionController<A, D, E>>>,
}

impl<A, D, E> Clone for Refetch<A, D, E> {
    fn clone(&self) -> Self {
        Self {
            endpoint: Rc::clone(&self.endpoint),
            controller: Weak::clone(&self.controller),
        }
    }
}

impl<A: 'static, D: 'static, E: 'static> Refetch<A, D, E> {
    fn detached(endpoint: &str) -> Self {
        Self {
            endpoint: Rc::from(endpoint),
            controller: Weak::new(),
        }
    }

    /// Refetch the subscribed entry.
    ///
    /// # Errors
    ///
    /// [`BindingError::NoActiveSubscription`] when the query is skipped or
    /// its stream is no longer connected.
    pub fn call(&self) -> Result<QueryInvocation<A, D, E>, BindingError> {
        let _batch = BatchScope::new();
        let Some(controller) = self.controller.upgrade() else {
            return Err(BindingError::NoActiveSubscription {
                endpoint: self.endpoint.to_string(),
            });
        };
        controller.borrow().refetch()
    }
}

impl<A, D, E> ShallowEq for Refetch<A, D, E> {
    fn shallow_eq(&self, other: &Self) -> bool {
        Weak::ptr_eq(&self.controller, &other.controller)
    }
}

impl<A, D, E> fmt::Debug for Refetch<A, D, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Refetch")
            .field("endpoint", &self.endpoint)
            .field("connected", &(self.controller.strong_count() > 0))
            .finish()
    }
}

/// One emission of [`use_query`]: the selection plus its refetch handle.
pub struct UseQueryResult<A, D, E, S> {
    pub selected: S,
    pub refetch: Refetch<A, D, E>,
}

impl<A, D, E, S: Clone> Clone for UseQueryResult<A, D, E, S> {
    fn clone(&self) -> Self {
        Self {
            selected: self.selected.clone(),
            refetch: self.refetch.clone(),
        }
    }
}

impl<A, D, E, S> Deref for UseQueryResult<A, D, E, S> {
    type Target = S;

    fn deref(&self) -> &S {
        &self.selected
    }
}

impl<A, D, E, S: ShallowEq> ShallowEq for UseQueryResult<A, D, E, S> {
    fn shallow_eq(&self, other: &Self) -> bool {
        self.selected.shallow_eq(&other.selected) && self.refetch.shallow_eq(&other.refetch)
    }
}

impl<A, D, E, S: fmt::Debug> fmt::Debug for UseQueryResult<A, D, E, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UseQueryResult")
            .field("selected", &self.selected)
            .field("refetch", &self.refetch)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// State that outlives a single connection of the stream.
struct InvocationShared<A, D, E> {
    arg_cache: RefCell<ArgCache<A>>,
    last_good: LastGood<A, D, E>,
}

/// State of one live connection.
struct QueryConnection<A, D, E, S> {
    endpoint: Rc<dyn QueryEndpoint<A, D, E>>,
    defaults: HookDefaults,
    shared: Rc<InvocationShared<A, D, E>>,
    controller: Option<Rc<RefCell<SubscriptionController<A, D, E>>>>,
    current: Option<(QueryArg<A>, UseQueryOptions<A, D, E, S>)>,
    selector: Option<QueryStateSelector<A, D, E, S>>,
    last_emitted: Option<S>,
}

impl<A, D, E, S> QueryConnection<A, D, E, S>
where
    A: Clone + PartialEq + 'static,
    D: 'static,
    E: 'static,
    S: ShallowEq + Clone + 'static,
{
    fn refetch(&self) -> Refetch<A, D, E> {
        match &self.controller {
            Some(controller) => Refetch {
                endpoint: Rc::from(self.endpoint.name()),
                controller: Rc::downgrade(controller),
            },
            None => Refetch::detached(self.endpoint.name()),
        }
    }

    /// Handle a possibly new `(arg, options)` pair.
    fn apply(
        this: &Rc<RefCell<Self>>,
        arg: QueryArg<A>,
        options: UseQueryOptions<A, D, E, S>,
        emitter: &Emitter<UseQueryResult<A, D, E, S>>,
    ) {
        let _batch = BatchScope::new();
        let emission = {
            let mut conn = this.borrow_mut();
            if let Some((current_arg, current_options)) = &conn.current
                && current_arg.shallow_eq(&arg)
                && current_options.shallow_eq(&options)
            {
                return;
            }

            let effective = if options.subscription.skip {
                QueryArg::Skip
            } else {
                arg.clone()
            };
            let stable = conn.stabilize(effective);

            conn.sync_subscription(&stable, &options);

            let no_pending = conn.controller.is_some() && !stable.is_sentinel();
            let selector = QueryStateSelector::new(
                Rc::clone(&conn.endpoint),
                stable,
                Rc::clone(&conn.shared.last_good),
                Rc::clone(&options.select_from_result),
            )
            .with_no_pending(no_pending);
            conn.selector = Some(selector);
            conn.current = Some((arg, options));
            conn.select_changed()
        };
        if let Some(value) = emission {
            emitter.emit(value);
        }
    }

    /// Re-run the current selector after a store change, then re-check the
    /// subscription so a handle dropped by the store is re-initiated.
    ///
    /// Selection runs first: a reset must be seen against the uninitialized
    /// cache entry, before the new request marks it pending.
    fn reselect(this: &Rc<RefCell<Self>>, emitter: &Emitter<UseQueryResult<A, D, E, S>>) {
        let _batch = BatchScope::new();
        let emission = {
            let mut conn = this.borrow_mut();
            let emission = conn.select_changed();
            let current = conn
                .selector
                .as_ref()
                .map(|selector| selector.arg().clone())
                .zip(conn.current.as_ref().map(|(_, options)| options.clone()));
            if let Some((stable, options)) = current {
                conn.sync_subscription(&stable, &options);
            }
            emission
        };
        if let Some(value) = emission {
            emitter.emit(value);
        }
    }

    fn sync_subscription(&self, stable: &StableArg<A>, options: &UseQueryOptions<A, D, E, S>) {
        let Some(controller) = &self.controller else {
            return;
        };
        let request = options.subscription.request(&self.defaults);
        if let Err(err) = controller.borrow_mut().subscribe(stable, &request) {
            error!(endpoint = self.endpoint.name(), %err, "query subscription failed");
            panic!("{err}");
        }
    }

    fn select_changed(&mut self) -> Option<UseQueryResult<A, D, E, S>> {
        let selected = self.selector.as_mut()?.select();
        if self
            .last_emitted
            .as_ref()
            .is_some_and(|last| last.shallow_eq(&selected))
        {
            return None;
        }
        self.last_emitted = Some(selected.clone());
        Some(UseQueryResult {
            selected,
            refetch: self.refetch(),
        })
    }

    fn stabilize(&self, arg: QueryArg<A>) -> StableArg<A> {
        let endpoint = &self.endpoint;
        let result = stabilize(
            arg,
            |arg, meta, name| endpoint.serialize_query_args(arg, meta, name),
            endpoint.meta(),
            endpoint.name(),
            &mut self.shared.arg_cache.borrow_mut(),
        );
        match result {
            Ok(stable) => stable,
            Err(err) => {
                error!(endpoint = endpoint.name(), %err, "argument serialization failed");
                panic!("{err}");
            }
        }
    }

    fn teardown(&mut self) {
        let _batch = BatchScope::new();
        if let Some(controller) = self.controller.take() {
            controller.borrow_mut().dispose();
        }
        self.selector = None;
        self.current = None;
    }
}

fn query_pipeline<A, D, E, S>(
    endpoint: Rc<dyn QueryEndpoint<A, D, E>>,
    defaults: HookDefaults,
    arg: Source<QueryArg<A>>,
    options: Source<UseQueryOptions<A, D, E, S>>,
    subscribe: bool,
) -> StateStream<UseQueryResult<A, D, E, S>>
where
    A: Clone + PartialEq + 'static,
    D: 'static,
    E: 'static,
    S: ShallowEq + Clone + 'static,
{
    let shared = Rc::new(InvocationShared {
        arg_cache: RefCell::new(ArgCache::new()),
        last_good: Rc::new(RefCell::new(None)),
    });
    let arg = Rc::new(arg);
    let options = Rc::new(options);

    StateStream::new(move |emitter: Emitter<UseQueryResult<A, D, E, S>>| {
        let _batch = BatchScope::new();
        debug!(endpoint = endpoint.name(), subscribe, "query stream connected");
        let conn = Rc::new(RefCell::new(QueryConnection {
            endpoint: Rc::clone(&endpoint),
            defaults: defaults.clone(),
            shared: Rc::clone(&shared),
            controller: subscribe
                .then(|| Rc::new(RefCell::new(SubscriptionController::new(Rc::clone(&endpoint))))),
            current: None,
            selector: None,
            last_emitted: None,
        }));

        let on_input = {
            let conn = Rc::downgrade(&conn);
            let (arg, options, emitter) = (Rc::clone(&arg), Rc::clone(&options), emitter.clone());
            Rc::new(move || {
                if let Some(conn) = conn.upgrade() {
                    QueryConnection::apply(&conn, arg.current(), options.current(), &emitter);
                }
            })
        };
        let on_store = {
            let conn = Rc::downgrade(&conn);
            let emitter = emitter.clone();
            move || {
                if let Some(conn) = conn.upgrade() {
                    QueryConnection::reselect(&conn, &emitter);
                }
            }
        };

        let guards = [
            listen_batched(Rc::clone(&endpoint), on_store),
            arg.watch({
                let on_input = Rc::clone(&on_input);
                move || on_input()
            }),
            options.watch({
                let on_input = Rc::clone(&on_input);
                move || on_input()
            }),
        ];
        on_input();

        let endpoint_name = endpoint.name().to_owned();
        Subscription::new(move || {
            drop(guards);
            conn.borrow_mut().teardown();
            debug!(endpoint = %endpoint_name, "query stream torn down");
        })
    })
}

/// Subscribe to `endpoint` and select its state for the latest argument and
/// options.
///
/// # Panics
///
/// Inside the pipeline there is no caller to return an error to. A failing
/// argument serializer or a store without middleware is logged at `error`
/// level and then panics.
pub fn use_query<A, D, E, S>(
    endpoint: Rc<dyn QueryEndpoint<A, D, E>>,
    defaults: HookDefaults,
    arg: impl Into<Source<QueryArg<A>>>,
    options: impl Into<Source<UseQueryOptions<A, D, E, S>>>,
) -> StateStream<UseQueryResult<A, D, E, S>>
where
    A: Clone + PartialEq + 'static,
    D: 'static,
    E: 'static,
    S: ShallowEq + Clone + 'static,
{
    query_pipeline(endpoint, defaults, arg.into(), options.into(), true)
}

/// Select the state for the latest argument without subscribing.
///
/// # Panics
///
/// When the argument serializer fails (see [`use_query`]).
pub fn use_query_state<A, D, E, S>(
    endpoint: Rc<dyn QueryEndpoint<A, D, E>>,
    arg: impl Into<Source<QueryArg<A>>>,
    options: UseQueryStateOptions<A, D, E, S>,
) -> StateStream<S>
where
    A: Clone + PartialEq + 'static,
    D: 'static,
    E: 'static,
    S: ShallowEq + Clone + 'static,
{
    let options = UseQueryOptions {
        subscription: QuerySubscriptionOptions {
            skip: options.skip,
            ..QuerySubscriptionOptions::default()
        },
        select_from_result: options.select_from_result,
    };
    query_pipeline(
        endpoint,
        HookDefaults::default(),
        arg.into(),
        Source::Value(options),
        false,
    )
    .map(|result| result.selected.clone())
}

// ---------------------------------------------------------------------------
// Subscription only
// ---------------------------------------------------------------------------

/// A store subscription with no selection attached.
///
/// Dropping it releases the subscription.
pub struct QuerySubscription<A, D, E> {
    endpoint: Rc<dyn QueryEndpoint<A, D, E>>,
    defaults: HookDefaults,
    arg_cache: ArgCache<A>,
    controller: SubscriptionController<A, D, E>,
}

impl<A: 'static, D: 'static, E: 'static> QuerySubscription<A, D, E> {
    /// Re-point the subscription at `arg` with `options`.
    ///
    /// # Errors
    ///
    /// Serializer failures and [`BindingError::MissingMiddleware`].
    pub fn update(
        &mut self,
        arg: QueryArg<A>,
        options: &QuerySubscriptionOptions,
    ) -> Result<(), BindingError> {
        let _batch = BatchScope::new();
        let arg = if options.skip { QueryArg::Skip } else { arg };
        let endpoint = &self.endpoint;
        let stable = stabilize(
            arg,
            |arg, meta, name| endpoint.serialize_query_args(arg, meta, name),
            endpoint.meta(),
            endpoint.name(),
            &mut self.arg_cache,
        )?;
        self.controller
            .subscribe(&stable, &options.request(&self.defaults))
    }

    /// # Errors
    ///
    /// [`BindingError::NoActiveSubscription`] when skipped.
    pub fn refetch(&self) -> Result<QueryInvocation<A, D, E>, BindingError> {
        let _batch = BatchScope::new();
        self.controller.refetch()
    }

    /// The live subscription, if any.
    #[must_use]
    pub fn invocation(&self) -> Option<QueryInvocation<A, D, E>> {
        self.controller
            .handle()
            .map(|handle| QueryInvocation::new(Rc::clone(handle)))
    }
}

impl<A, D, E> Drop for QuerySubscription<A, D, E> {
    fn drop(&mut self) {
        let _batch = BatchScope::new();
        self.controller.dispose();
    }
}

impl<A, D, E> fmt::Debug for QuerySubscription<A, D, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QuerySubscription")
            .field("controller", &self.controller)
            .finish_non_exhaustive()
    }
}

/// Open a subscription for `arg` without selecting state.
///
/// # Errors
///
/// Serializer failures and [`BindingError::MissingMiddleware`].
pub fn use_query_subscription<A: 'static, D: 'static, E: 'static>(
    endpoint: Rc<dyn QueryEndpoint<A, D, E>>,
    defaults: HookDefaults,
    arg: QueryArg<A>,
    options: &QuerySubscriptionOptions,
) -> Result<QuerySubscription<A, D, E>, BindingError> {
    let mut subscription = QuerySubscription {
        controller: SubscriptionController::new(Rc::clone(&endpoint)),
        endpoint,
        defaults,
        arg_cache: ArgCache::new(),
    };
    subscription.update(arg, options)?;
    Ok(subscription)
}
