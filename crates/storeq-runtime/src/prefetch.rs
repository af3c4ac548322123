#![forbid(unsafe_code)]

//! Prefetch: warm the cache for an argument without holding a subscription.

use std::fmt;
use std::rc::Rc;

use storeq_core::{PrefetchOptions, QueryEndpoint};
use tracing::debug;

use crate::reactive::BatchScope;

/// A prefetch function bound to one endpoint and its default policy.
pub struct Prefetcher<A, D, E> {
    endpoint: Rc<dyn QueryEndpoint<A, D, E>>,
    defaults: PrefetchOptions,
}

impl<A, D, E> Clone for Prefetcher<A, D, E> {
    fn clone(&self) -> Self {
        Self {
            endpoint: Rc::clone(&self.endpoint),
            defaults: self.defaults,
        }
    }
}

impl<A, D, E> Prefetcher<A, D, E> {
    pub fn new(endpoint: Rc<dyn QueryEndpoint<A, D, E>>, defaults: PrefetchOptions) -> Self {
        Self { endpoint, defaults }
    }

    #[must_use]
    pub fn defaults(&self) -> PrefetchOptions {
        self.defaults
    }

    /// Prefetch `arg`. `options`, when given, replaces the default policy.
    pub fn prefetch(&self, arg: A, options: Option<PrefetchOptions>) {
        let _batch = BatchScope::new();
        let options = options.unwrap_or(self.defaults);
        debug!(endpoint = self.endpoint.name(), ?options, "prefetch");
        self.endpoint.prefetch(Rc::new(arg), options);
    }
}

impl<A, D, E> fmt::Debug for Prefetcher<A, D, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Prefetcher")
            .field("endpoint", &self.endpoint.name())
            .field("defaults", &self.defaults)
            .finish()
    }
}
