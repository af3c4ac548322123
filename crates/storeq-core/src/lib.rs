#![forbid(unsafe_code)]

//! Core types for storeq.
//!
//! This crate holds everything the binding runtime needs that does not depend
//! on a reactive scheduler:
//!
//! - [`ShallowEq`] for cheap structural comparison of records.
//! - [`stabilize`] and [`ArgCache`] for turning volatile arguments into
//!   identity-stable [`StableArg`] values.
//! - [`RawQueryState`], [`QueryState`] and the mutation equivalents.
//! - The store contract ([`QueryEndpoint`], [`MutationEndpoint`], [`ApiStore`])
//!   that an external action-dispatching store implements.
//! - The error taxonomy ([`ArgError`], [`BindingError`]).

pub mod arg;
pub mod equality;
pub mod error;
pub mod options;
pub mod state;
pub mod store;

pub use arg::{
    ArgCache, EndpointKind, EndpointMeta, QueryArg, QueryCacheKey, SerializedKey, StableArg,
    default_serialize_query_args, stabilize,
};
pub use equality::{ShallowEq, shallow_equal};
pub use error::{ArgError, BindingError};
pub use options::{
    InitiateOptions, LazyExtra, MutationInitiateOptions, PrefetchOptions,
    RefetchOnMountOrArgChange, SubscriptionOptions,
};
pub use state::{
    MutationState, QueryState, QueryStatus, RawMutationState, RawQueryState, RequestError,
    RequestId, Settled,
};
pub use store::{
    ApiStore, ListenerId, MutationEndpoint, MutationHandle, MutationSelect, QueryEndpoint,
    QueryHandle, StateListeners,
};
