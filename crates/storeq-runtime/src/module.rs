#![forbid(unsafe_code)]

//! Module wiring: store-wide configuration and the hook builders it hands
//! out.
//!
//! [`StoreQueryModule::for_root`] is called once per store. It installs the
//! store's focus/reconnect listeners when configured to, and every
//! [`QueryHooks`] / [`MutationHook`] it builds carries the module defaults.
//! Per-call options always win over module defaults.

use std::fmt;
use std::rc::Rc;

use storeq_core::{
    ApiStore, BindingError, MutationEndpoint, PrefetchOptions, QueryArg, QueryEndpoint,
    RefetchOnMountOrArgChange, ShallowEq, SubscriptionOptions,
};
use tracing::info;

use crate::bridge::listen_batched;
use crate::lazy::{LazyQuery, LazyQueryOptions, LazyTrigger, use_lazy_query};
use crate::mutation::{UseMutation, UseMutationOptions, use_mutation};
use crate::prefetch::Prefetcher;
use crate::query::{
    QuerySubscription, QuerySubscriptionOptions, Source, UseQueryOptions, UseQueryResult,
    UseQueryStateOptions, use_query, use_query_state, use_query_subscription,
};
use crate::reactive::{StateStream, Subscription};

/// Store-wide configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreQueryConfig {
    /// Call [`ApiStore::setup_listeners`] when the module is created.
    pub setup_listeners: bool,
    /// Base URL handed to endpoint definitions. Not interpreted here.
    pub base_url: String,
    pub refetch_on_mount_or_arg_change: RefetchOnMountOrArgChange,
    pub refetch_on_focus: Option<bool>,
    pub refetch_on_reconnect: Option<bool>,
}

impl Default for StoreQueryConfig {
    fn default() -> Self {
        Self {
            setup_listeners: false,
            base_url: String::new(),
            refetch_on_mount_or_arg_change: RefetchOnMountOrArgChange::Never,
            refetch_on_focus: None,
            refetch_on_reconnect: None,
        }
    }
}

impl StoreQueryConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn setup_listeners(mut self, enabled: bool) -> Self {
        self.setup_listeners = enabled;
        self
    }

    #[must_use]
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    #[must_use]
    pub fn refetch_on_mount_or_arg_change(
        mut self,
        policy: impl Into<RefetchOnMountOrArgChange>,
    ) -> Self {
        self.refetch_on_mount_or_arg_change = policy.into();
        self
    }

    #[must_use]
    pub fn refetch_on_focus(mut self, enabled: bool) -> Self {
        self.refetch_on_focus = Some(enabled);
        self
    }

    #[must_use]
    pub fn refetch_on_reconnect(mut self, enabled: bool) -> Self {
        self.refetch_on_reconnect = Some(enabled);
        self
    }

    /// The per-hook defaults this configuration implies.
    #[must_use]
    pub fn hook_defaults(&self) -> HookDefaults {
        HookDefaults {
            refetch_on_mount_or_arg_change: self.refetch_on_mount_or_arg_change,
            refetch_on_focus: self.refetch_on_focus,
            refetch_on_reconnect: self.refetch_on_reconnect,
        }
    }
}

/// Defaults applied to options a hook call leaves unset.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HookDefaults {
    pub refetch_on_mount_or_arg_change: RefetchOnMountOrArgChange,
    pub refetch_on_focus: Option<bool>,
    pub refetch_on_reconnect: Option<bool>,
}

impl HookDefaults {
    /// Fill the unset refetch flags of `options`.
    #[must_use]
    pub fn subscription_options(&self, options: &SubscriptionOptions) -> SubscriptionOptions {
        SubscriptionOptions {
            polling_interval: options.polling_interval,
            refetch_on_focus: options.refetch_on_focus.or(self.refetch_on_focus),
            refetch_on_reconnect: options.refetch_on_reconnect.or(self.refetch_on_reconnect),
        }
    }
}

/// Entry point tying a store to its configuration.
pub struct StoreQueryModule {
    store: Rc<dyn ApiStore>,
    config: StoreQueryConfig,
}

impl StoreQueryModule {
    /// Configure the module for `store`.
    pub fn for_root(store: Rc<dyn ApiStore>, config: StoreQueryConfig) -> Self {
        if config.setup_listeners {
            info!(reducer_path = store.reducer_path(), "installing store listeners");
            store.setup_listeners();
        }
        Self { store, config }
    }

    #[must_use]
    pub fn config(&self) -> &StoreQueryConfig {
        &self.config
    }

    #[must_use]
    pub fn store(&self) -> &Rc<dyn ApiStore> {
        &self.store
    }

    /// Hooks for a query endpoint.
    pub fn query_hooks<A, D, E>(&self, endpoint: Rc<dyn QueryEndpoint<A, D, E>>) -> QueryHooks<A, D, E> {
        QueryHooks {
            endpoint,
            defaults: self.config.hook_defaults(),
        }
    }

    /// Hook for a mutation endpoint.
    pub fn mutation_hook<A, D, E>(
        &self,
        endpoint: Rc<dyn MutationEndpoint<A, D, E>>,
    ) -> MutationHook<A, D, E> {
        MutationHook { endpoint }
    }

    /// Listen to store changes, coalesced per batch.
    pub fn listen(&self, callback: impl Fn() + 'static) -> Subscription {
        listen_batched(Rc::clone(&self.store), callback)
    }
}

impl fmt::Debug for StoreQueryModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreQueryModule")
            .field("reducer_path", &self.store.reducer_path())
            .field("config", &self.config)
            .finish()
    }
}

/// Hook builders for one query endpoint.
pub struct QueryHooks<A, D, E> {
    endpoint: Rc<dyn QueryEndpoint<A, D, E>>,
    defaults: HookDefaults,
}

impl<A, D, E> Clone for QueryHooks<A, D, E> {
    fn clone(&self) -> Self {
        Self {
            endpoint: Rc::clone(&self.endpoint),
            defaults: self.defaults.clone(),
        }
    }
}

impl<A, D, E> QueryHooks<A, D, E>
where
    A: Clone + PartialEq + 'static,
    D: 'static,
    E: 'static,
{
    /// Hooks with library defaults, for use without a module.
    pub fn new(endpoint: Rc<dyn QueryEndpoint<A, D, E>>) -> Self {
        Self {
            endpoint,
            defaults: HookDefaults::default(),
        }
    }

    #[must_use]
    pub fn endpoint(&self) -> &Rc<dyn QueryEndpoint<A, D, E>> {
        &self.endpoint
    }

    /// See [`use_query`](crate::query::use_query).
    ///
    /// # Panics
    ///
    /// When the pipeline meets a programming error (serializer failure,
    /// missing store middleware).
    pub fn use_query<S: ShallowEq + Clone + 'static>(
        &self,
        arg: impl Into<Source<QueryArg<A>>>,
        options: impl Into<Source<UseQueryOptions<A, D, E, S>>>,
    ) -> StateStream<UseQueryResult<A, D, E, S>> {
        use_query(Rc::clone(&self.endpoint), self.defaults.clone(), arg, options)
    }

    /// See [`use_query_state`](crate::query::use_query_state).
    ///
    /// # Panics
    ///
    /// When the argument serializer fails.
    pub fn use_query_state<S: ShallowEq + Clone + 'static>(
        &self,
        arg: impl Into<Source<QueryArg<A>>>,
        options: UseQueryStateOptions<A, D, E, S>,
    ) -> StateStream<S> {
        use_query_state(Rc::clone(&self.endpoint), arg, options)
    }

    /// See [`use_query_subscription`](crate::query::use_query_subscription).
    ///
    /// # Errors
    ///
    /// Serializer failures and missing store middleware.
    pub fn use_query_subscription(
        &self,
        arg: QueryArg<A>,
        options: &QuerySubscriptionOptions,
    ) -> Result<QuerySubscription<A, D, E>, BindingError> {
        use_query_subscription(Rc::clone(&self.endpoint), self.defaults.clone(), arg, options)
    }

    /// See [`use_lazy_query`](crate::lazy::use_lazy_query).
    pub fn use_lazy_query<S: ShallowEq + Clone + 'static>(
        &self,
        options: impl Into<Source<LazyQueryOptions<A, D, E, S>>>,
    ) -> LazyQuery<A, D, E, S> {
        use_lazy_query(Rc::clone(&self.endpoint), self.defaults.clone(), options)
    }

    /// A bare lazy trigger with no selection attached.
    pub fn use_lazy_query_subscription(&self, options: &SubscriptionOptions) -> LazyTrigger<A, D, E> {
        LazyTrigger::new(Rc::clone(&self.endpoint), self.defaults.clone(), options)
    }

    /// A prefetcher applying `defaults` when a call passes no options.
    pub fn use_prefetch(&self, defaults: PrefetchOptions) -> Prefetcher<A, D, E> {
        Prefetcher::new(Rc::clone(&self.endpoint), defaults)
    }
}

impl<A, D, E> fmt::Debug for QueryHooks<A, D, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryHooks")
            .field("endpoint", &self.endpoint.name())
            .field("defaults", &self.defaults)
            .finish()
    }
}

/// Hook builder for one mutation endpoint.
pub struct MutationHook<A, D, E> {
    endpoint: Rc<dyn MutationEndpoint<A, D, E>>,
}

impl<A, D, E> Clone for MutationHook<A, D, E> {
    fn clone(&self) -> Self {
        Self {
            endpoint: Rc::clone(&self.endpoint),
        }
    }
}

impl<A: 'static, D: 'static, E: 'static> MutationHook<A, D, E> {
    pub fn new(endpoint: Rc<dyn MutationEndpoint<A, D, E>>) -> Self {
        Self { endpoint }
    }

    /// See [`use_mutation`](crate::mutation::use_mutation).
    pub fn use_mutation<S: ShallowEq + Clone + 'static>(
        &self,
        options: UseMutationOptions<A, D, E, S>,
    ) -> UseMutation<A, D, E, S> {
        use_mutation(Rc::clone(&self.endpoint), options)
    }
}

impl<A, D, E> fmt::Debug for MutationHook<A, D, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MutationHook")
            .field("endpoint", &self.endpoint.name())
            .finish()
    }
}
