#![forbid(unsafe_code)]

//! Reactive bindings over an action-dispatching cache store.
//!
//! The store owns requests, cache entries, deduplication and expiry. This
//! crate turns its synchronous selectors and `initiate` dispatches into
//! streams of UI-shaped state:
//!
//! - [`use_query`] / [`use_query_state`] / [`use_query_subscription`] for
//!   queries driven by an argument.
//! - [`use_lazy_query`] and [`LazyTrigger`] for queries fetched on demand.
//! - [`use_mutation`] for mutations.
//! - [`Prefetcher`] for cache warming.
//! - [`StoreQueryModule`] to wire a store with module-wide defaults.
//!
//! # Threading
//!
//! Everything is single-threaded (`Rc`/`RefCell`). Store notifications raised
//! while the bindings dispatch are deferred by [`BatchScope`] and delivered
//! once, after the dispatching pass completed.

pub mod bridge;
#[cfg(feature = "config")]
pub mod config;
pub mod lazy;
pub mod memo;
pub mod module;
pub mod mutation;
pub mod prefetch;
pub mod query;
pub mod reactive;
pub mod selector;
pub mod subscription;

pub use bridge::{dispatch_batched, listen_batched};
#[cfg(feature = "config")]
pub use config::ConfigError;
pub use lazy::{LazyQuery, LazyQueryOptions, LazyTrigger, use_lazy_query};
pub use memo::SelectorMemo;
pub use module::{HookDefaults, MutationHook, QueryHooks, StoreQueryConfig, StoreQueryModule};
pub use mutation::{
    MutationInvocation, SelectMutationResult, UseMutation, UseMutationOptions, use_mutation,
};
pub use prefetch::Prefetcher;
pub use query::{
    QuerySubscription, QuerySubscriptionOptions, Refetch, Source, UseQueryOptions,
    UseQueryResult, UseQueryStateOptions, use_query, use_query_state, use_query_subscription,
};
pub use reactive::{
    BatchScope, Emitter, Observable, StateStream, Subscription, SubscriptionScope,
};
pub use selector::{LastGood, QueryStateSelector, SelectFromResult};
pub use subscription::{Phase, QueryInvocation, SubscriptionController, SubscriptionRequest};
