#![forbid(unsafe_code)]

//! Lifetime scope for subscriptions.
//!
//! A [`SubscriptionScope`] is the owner of everything a consuming component
//! subscribed to: state streams, observables, store listeners. Dropping the
//! scope releases them all, which for a query stream means the last consumer
//! detaching and the store subscription being released.
//!
//! # Usage
//!
//! ```ignore
//! let mut scope = SubscriptionScope::new();
//! scope.subscribe(&user_stream, |result| render(&result.selected));
//! scope.subscribe(&posts_stream, |result| render(&result.selected));
//! // Component unmount:
//! drop(scope);
//! ```
//!
//! # Invariants
//!
//! 1. Subscriptions are released in reverse registration order on drop.
//! 2. After drop, no callbacks registered through this scope fire.
//! 3. `clear()` releases everything immediately and leaves the scope reusable.

use super::observable::{Observable, Subscription};
use super::stream::StateStream;

/// Collects [`Subscription`]s for one consumer.
pub struct SubscriptionScope {
    subscriptions: Vec<Subscription>,
}

impl SubscriptionScope {
    #[must_use]
    pub fn new() -> Self {
        Self {
            subscriptions: Vec::new(),
        }
    }

    /// Keep `sub` alive until the scope is dropped or cleared.
    pub fn hold(&mut self, sub: Subscription) -> &mut Self {
        self.subscriptions.push(sub);
        self
    }

    /// Subscribe to a state stream within this scope.
    pub fn subscribe<T: Clone + 'static>(
        &mut self,
        stream: &StateStream<T>,
        callback: impl Fn(&T) + 'static,
    ) -> &mut Self {
        let sub = stream.subscribe(callback);
        self.hold(sub)
    }

    /// Observe an observable slot within this scope.
    pub fn observe<T: Clone + 'static>(
        &mut self,
        source: &Observable<T>,
        callback: impl Fn(&T) + 'static,
    ) -> &mut Self {
        let sub = source.subscribe(callback);
        self.hold(sub)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }

    /// Release everything now, newest first.
    pub fn clear(&mut self) {
        while let Some(sub) = self.subscriptions.pop() {
            drop(sub);
        }
    }
}

impl Default for SubscriptionScope {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for SubscriptionScope {
    fn drop(&mut self) {
        self.clear();
    }
}

impl std::fmt::Debug for SubscriptionScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionScope")
            .field("len", &self.subscriptions.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;

    #[test]
    fn scope_holds_subscriptions() {
        let obs = Observable::new(0u32);
        let seen = Rc::new(Cell::new(0));

        let mut scope = SubscriptionScope::new();
        let s = Rc::clone(&seen);
        scope.observe(&obs, move |v| s.set(*v));
        assert_eq!(scope.len(), 1);

        obs.set(42);
        assert_eq!(seen.get(), 42);
    }

    #[test]
    fn scope_drop_releases_subscriptions() {
        let obs = Observable::new(0u32);
        let seen = Rc::new(Cell::new(0));
        {
            let mut scope = SubscriptionScope::new();
            let s = Rc::clone(&seen);
            scope.observe(&obs, move |v| s.set(*v));
            obs.set(1);
        }
        obs.set(99);
        assert_eq!(seen.get(), 1, "callback should not fire after scope dropped");
    }

    #[test]
    fn releases_newest_first() {
        let order = Rc::new(RefCell::new(Vec::new()));
        let mut scope = SubscriptionScope::new();
        for i in 0..3 {
            let o = Rc::clone(&order);
            scope.hold(Subscription::new(move || o.borrow_mut().push(i)));
        }
        drop(scope);
        assert_eq!(*order.borrow(), vec![2, 1, 0]);
    }

    #[test]
    fn scope_reusable_after_clear() {
        let obs = Observable::new(0u32);
        let mut scope = SubscriptionScope::new();

        let first = Rc::new(Cell::new(false));
        let f = Rc::clone(&first);
        scope.observe(&obs, move |_| f.set(true));
        scope.clear();
        assert!(scope.is_empty());

        let second = Rc::new(Cell::new(false));
        let s = Rc::clone(&second);
        scope.observe(&obs, move |_| s.set(true));

        obs.set(1);
        assert!(!first.get());
        assert!(second.get());
    }

    #[test]
    fn stream_subscription_detaches_on_drop() {
        let stream = StateStream::new(|emitter| {
            emitter.emit(7u32);
            Subscription::empty()
        });
        let seen = Rc::new(Cell::new(0));
        let mut scope = SubscriptionScope::new();
        let s = Rc::clone(&seen);
        scope.subscribe(&stream, move |v| s.set(*v));
        assert_eq!(seen.get(), 7);
        assert!(stream.is_connected());
        drop(scope);
        assert!(!stream.is_connected());
    }

    #[test]
    fn debug_format() {
        let mut scope = SubscriptionScope::new();
        scope.hold(Subscription::empty()).hold(Subscription::empty());
        assert!(format!("{scope:?}").contains("len: 2"));
    }
}
