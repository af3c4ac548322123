#![forbid(unsafe_code)]

//! Options passed to, and through, the store contract.

use std::time::Duration;

use crate::equality::ShallowEq;

/// Per-subscription behavior the store applies while a subscription is live.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SubscriptionOptions {
    /// Re-run the request at this interval. `Duration::ZERO` disables polling.
    pub polling_interval: Duration,
    /// Refetch when the host regains focus. `None` defers to store defaults.
    pub refetch_on_focus: Option<bool>,
    /// Refetch when the network reconnects. `None` defers to store defaults.
    pub refetch_on_reconnect: Option<bool>,
}

impl SubscriptionOptions {
    #[must_use]
    pub fn polling_interval(mut self, interval: Duration) -> Self {
        self.polling_interval = interval;
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

    /// Whether polling is enabled.
    #[must_use]
    pub fn is_polling(&self) -> bool {
        !self.polling_interval.is_zero()
    }
}

crate::shallow_eq_by_value!(SubscriptionOptions);

/// When a (re)subscription should bypass cached data.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RefetchOnMountOrArgChange {
    /// Serve cached data when present.
    #[default]
    Never,
    /// Always refetch on mount and on argument change.
    Always,
    /// Refetch when the cached entry is at least this old.
    OlderThan(Duration),
}

impl From<bool> for RefetchOnMountOrArgChange {
    fn from(value: bool) -> Self {
        if value { Self::Always } else { Self::Never }
    }
}

impl From<Duration> for RefetchOnMountOrArgChange {
    fn from(value: Duration) -> Self {
        Self::OlderThan(value)
    }
}

crate::shallow_eq_by_value!(RefetchOnMountOrArgChange);

/// Options for [`QueryEndpoint::initiate`](crate::store::QueryEndpoint::initiate).
#[derive(Debug, Clone, PartialEq)]
pub struct InitiateOptions {
    pub subscription_options: SubscriptionOptions,
    /// Ignore a fulfilled cache entry and start a new request.
    pub force_refetch: bool,
    /// Register a tracked subscription. Prefetches set this to `false`.
    pub subscribe: bool,
}

impl Default for InitiateOptions {
    fn default() -> Self {
        Self {
            subscription_options: SubscriptionOptions::default(),
            force_refetch: false,
            subscribe: true,
        }
    }
}

/// Options for [`MutationEndpoint::initiate`](crate::store::MutationEndpoint::initiate).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MutationInitiateOptions {
    /// Shared slot name; invocations with the same key address one record.
    pub fixed_cache_key: Option<String>,
}

/// Prefetch policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PrefetchOptions {
    /// Start a request only when nothing usable is cached.
    #[default]
    Default,
    /// Always start a request.
    Force,
    /// Start a request when the cached entry is at least this old.
    IfOlderThan(Duration),
}

/// Extra arguments to a lazy fetch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LazyExtra {
    /// Ask the store to serve a valid cached entry instead of refetching.
    pub prefer_cache_value: bool,
}

impl LazyExtra {
    #[must_use]
    pub const fn prefer_cache_value() -> Self {
        Self {
            prefer_cache_value: true,
        }
    }
}

impl ShallowEq for LazyExtra {
    #[inline]
    fn shallow_eq(&self, other: &Self) -> bool {
        self == other
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refetch_flag_conversions() {
        assert_eq!(RefetchOnMountOrArgChange::from(true), RefetchOnMountOrArgChange::Always);
        assert_eq!(RefetchOnMountOrArgChange::from(false), RefetchOnMountOrArgChange::Never);
        assert_eq!(
            RefetchOnMountOrArgChange::from(Duration::from_secs(30)),
            RefetchOnMountOrArgChange::OlderThan(Duration::from_secs(30))
        );
    }

    #[test]
    fn subscription_options_builder() {
        let opts = SubscriptionOptions::default()
            .polling_interval(Duration::from_millis(500))
            .refetch_on_focus(true);
        assert!(opts.is_polling());
        assert_eq!(opts.refetch_on_focus, Some(true));
        assert_eq!(opts.refetch_on_reconnect, None);
        assert!(opts.shallow_eq(&opts.clone()));
        assert!(!opts.shallow_eq(&SubscriptionOptions::default()));
    }

    #[test]
    fn initiate_defaults_subscribe() {
        let opts = InitiateOptions::default();
        assert!(opts.subscribe);
        assert!(!opts.force_refetch);
    }
}
