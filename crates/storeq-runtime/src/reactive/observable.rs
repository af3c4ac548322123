#![forbid(unsafe_code)]

//! Single-slot, version-tracked value with change notification.
//!
//! An [`Observable`] holds exactly one value. [`Observable::set`] replaces it
//! and notifies subscribers when the new value differs under [`ShallowEq`];
//! [`Observable::publish`] replaces it and always notifies. Subscribers do not
//! receive the current value on subscription; read it with
//! [`Observable::get`].
//!
//! Inside a [`BatchScope`](super::BatchScope) notifications for one
//! observable are coalesced: subscribers run once, at flush, with the latest
//! value.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use storeq_core::ShallowEq;

use super::batch;

type Callback<T> = dyn Fn(&T);

struct ObservableInner<T> {
    value: T,
    version: u64,
    subscribers: Vec<Weak<Callback<T>>>,
}

/// A shared single-slot value. Clones share the slot.
pub struct Observable<T> {
    inner: Rc<RefCell<ObservableInner<T>>>,
}

impl<T> Clone for Observable<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: Clone + 'static> Observable<T> {
    pub fn new(value: T) -> Self {
        Self {
            inner: Rc::new(RefCell::new(ObservableInner {
                value,
                version: 0,
                subscribers: Vec::new(),
            })),
        }
    }

    /// Clone of the current value.
    #[must_use]
    pub fn get(&self) -> T {
        self.inner.borrow().value.clone()
    }

    /// Borrow the current value.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.inner.borrow().value)
    }

    /// Incremented once per accepted write.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.inner.borrow().version
    }

    /// Replace the value and notify unconditionally.
    pub fn publish(&self, value: T) {
        {
            let mut inner = self.inner.borrow_mut();
            inner.value = value;
            inner.version += 1;
        }
        self.notify();
    }

    /// Register `callback` for future writes.
    pub fn subscribe(&self, callback: impl Fn(&T) + 'static) -> Subscription {
        let callback: Rc<Callback<T>> = Rc::new(callback);
        self.inner
            .borrow_mut()
            .subscribers
            .push(Rc::downgrade(&callback));
        // The list holds only a weak pointer; the guard owns the callback.
        Subscription::new(move || drop(callback))
    }

    /// Live subscriber count. Dead entries are pruned first.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        let mut inner = self.inner.borrow_mut();
        inner.subscribers.retain(|weak| weak.strong_count() > 0);
        inner.subscribers.len()
    }

    fn notify(&self) {
        if batch::is_batching() {
            let key = Rc::as_ptr(&self.inner).cast::<()>() as usize;
            let this = self.clone();
            batch::schedule(key, move || this.notify_now());
        } else {
            self.notify_now();
        }
    }

    fn notify_now(&self) {
        let (value, callbacks) = {
            let mut inner = self.inner.borrow_mut();
            inner.subscribers.retain(|weak| weak.strong_count() > 0);
            let callbacks: Vec<_> = inner.subscribers.iter().filter_map(Weak::upgrade).collect();
            (inner.value.clone(), callbacks)
        };
        for callback in callbacks {
            callback(&value);
        }
    }
}

impl<T: Clone + ShallowEq + 'static> Observable<T> {
    /// Replace the value, notifying only if it changed.
    ///
    /// Returns whether the write was accepted.
    pub fn set(&self, value: T) -> bool {
        {
            let mut inner = self.inner.borrow_mut();
            if inner.value.shallow_eq(&value) {
                return false;
            }
            inner.value = value;
            inner.version += 1;
        }
        self.notify();
        true
    }

    /// Mutate in place; notifies if the result differs from the old value.
    pub fn update(&self, f: impl FnOnce(&mut T)) -> bool {
        let mut next = self.get();
        f(&mut next);
        self.set(next)
    }
}

impl<T: Default + Clone + 'static> Default for Observable<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for Observable<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("Observable")
            .field("value", &inner.value)
            .field("version", &inner.version)
            .finish()
    }
}

/// RAII guard: runs its release action exactly once, on drop or on
/// [`Subscription::unsubscribe`].
#[must_use = "dropping a Subscription releases it immediately"]
pub struct Subscription {
    release: Option<Box<dyn FnOnce()>>,
}

impl Subscription {
    pub fn new(release: impl FnOnce() + 'static) -> Self {
        Self {
            release: Some(Box::new(release)),
        }
    }

    /// A guard with nothing to release.
    pub fn empty() -> Self {
        Self { release: None }
    }

    /// Release now.
    pub fn unsubscribe(mut self) {
        self.release_now();
    }

    fn release_now(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release_now();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.release.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::BatchScope;
    use std::cell::Cell;

    #[test]
    fn set_notifies_only_on_change() {
        let obs = Observable::new(1u32);
        let hits = Rc::new(Cell::new(0));
        let h = Rc::clone(&hits);
        let _sub = obs.subscribe(move |_| h.set(h.get() + 1));

        assert!(!obs.set(1));
        assert_eq!(hits.get(), 0);
        assert_eq!(obs.version(), 0);

        assert!(obs.set(2));
        assert_eq!(hits.get(), 1);
        assert_eq!(obs.version(), 1);
    }

    #[test]
    fn publish_always_notifies() {
        let obs = Observable::new(5u32);
        let hits = Rc::new(Cell::new(0));
        let h = Rc::clone(&hits);
        let _sub = obs.subscribe(move |_| h.set(h.get() + 1));
        obs.publish(5);
        obs.publish(5);
        assert_eq!(hits.get(), 2);
    }

    #[test]
    fn dropping_subscription_stops_callbacks() {
        let obs = Observable::new(0u32);
        let seen = Rc::new(Cell::new(0));
        let s = Rc::clone(&seen);
        let sub = obs.subscribe(move |v| s.set(*v));
        obs.set(3);
        drop(sub);
        obs.set(9);
        assert_eq!(seen.get(), 3);
        assert_eq!(obs.subscriber_count(), 0);
    }

    #[test]
    fn subscribers_run_in_registration_order() {
        let obs = Observable::new(0u32);
        let log = Rc::new(RefCell::new(Vec::new()));
        let subs: Vec<_> = (0..3)
            .map(|i| {
                let l = Rc::clone(&log);
                obs.subscribe(move |_| l.borrow_mut().push(i))
            })
            .collect();
        obs.set(1);
        assert_eq!(*log.borrow(), vec![0, 1, 2]);
        drop(subs);
    }

    #[test]
    fn batch_coalesces_to_latest_value() {
        let obs = Observable::new(0u32);
        let log = Rc::new(RefCell::new(Vec::new()));
        let l = Rc::clone(&log);
        let _sub = obs.subscribe(move |v| l.borrow_mut().push(*v));
        {
            let _batch = BatchScope::new();
            obs.set(1);
            obs.set(2);
            obs.set(3);
            assert_eq!(obs.get(), 3, "values apply immediately");
            assert!(log.borrow().is_empty());
        }
        assert_eq!(*log.borrow(), vec![3]);
    }

    #[test]
    fn callback_may_write_back() {
        let obs = Observable::new(0u32);
        let echo = obs.clone();
        let _sub = obs.subscribe(move |v| {
            if *v < 3 {
                echo.set(v + 1);
            }
        });
        obs.set(1);
        assert_eq!(obs.get(), 3);
    }

    #[test]
    fn explicit_unsubscribe_runs_release_once() {
        let released = Rc::new(Cell::new(0));
        let r = Rc::clone(&released);
        let sub = Subscription::new(move || r.set(r.get() + 1));
        sub.unsubscribe();
        assert_eq!(released.get(), 1);
        drop(Subscription::empty());
    }
}
