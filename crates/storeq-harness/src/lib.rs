#![forbid(unsafe_code)]

//! In-memory reference store for exercising storeq bindings.
//!
//! [`HarnessStore`] implements the store contract the bindings consume:
//! request deduplication, per-request subscription tracking, mutation
//! records and an action log. Requests never complete on their own; tests
//! settle them explicitly with `resolve_all` / `resolve`, so every
//! intermediate state is observable.
//!
//! ```ignore
//! let store = HarnessStore::new();
//! let get_user = HarnessQueryEndpoint::<u32, String, String>::new(&store, "getUser");
//! // ... drive bindings ...
//! get_user.resolve_all(|id| Ok(format!("user {id}")));
//! assert_eq!(get_user.network_requests(), 1);
//! ```

pub mod mutation;
pub mod query;
pub mod recorder;
pub mod store;

pub use mutation::HarnessMutationEndpoint;
pub use query::{HarnessQueryEndpoint, Serializer};
pub use recorder::Recorder;
pub use store::{Action, HarnessStore};

/// Install a `tracing` subscriber writing to the test output.
///
/// Filtered by `RUST_LOG`, defaulting to `warn`. Safe to call from every
/// test; only the first call installs.
pub fn init_test_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}
