#![forbid(unsafe_code)]

//! storeq public facade.
//!
//! Re-exports the core store contract and, with the `runtime` feature (on by
//! default), the reactive bindings.
//!
//! ```ignore
//! use storeq::prelude::*;
//!
//! let module = StoreQueryModule::for_root(store, StoreQueryConfig::new().setup_listeners(true));
//! let users = module.query_hooks(get_user);
//! let user = users.use_query(QueryArg::Value(1), UseQueryOptions::new());
//! let _guard = user.subscribe(|result| println!("{:?}", result.data));
//! ```

pub use storeq_core as core;
#[cfg(feature = "runtime")]
pub use storeq_runtime as runtime;

pub use storeq_core::{
    ApiStore, ArgError, BindingError, EndpointMeta, LazyExtra, MutationEndpoint, MutationState,
    PrefetchOptions, QueryArg, QueryEndpoint, QueryState, QueryStatus, RefetchOnMountOrArgChange,
    RequestError, ShallowEq, StableArg, SubscriptionOptions,
};

#[cfg(feature = "runtime")]
pub use storeq_runtime::{
    LazyQuery, LazyQueryOptions, MutationHook, Observable, Prefetcher, QueryHooks,
    StateStream, StoreQueryConfig, StoreQueryModule, Subscription, UseMutation,
    UseMutationOptions, UseQueryOptions, UseQueryResult,
};

/// Everything a binding consumer usually needs.
pub mod prelude {
    pub use storeq_core::{
        LazyExtra, MutationState, PrefetchOptions, QueryArg, QueryState, QueryStatus,
        RefetchOnMountOrArgChange, RequestError, ShallowEq,
    };

    #[cfg(feature = "runtime")]
    pub use storeq_runtime::{
        BatchScope, LazyQueryOptions, Observable, QueryHooks, StateStream, StoreQueryConfig,
        StoreQueryModule, Subscription, SubscriptionScope, UseMutationOptions, UseQueryOptions,
        UseQueryStateOptions,
    };
}
