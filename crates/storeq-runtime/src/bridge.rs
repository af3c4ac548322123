#![forbid(unsafe_code)]

//! Batch/Dispatch Bridge.
//!
//! The store notifies its listeners synchronously after every action. A
//! single pass through the bindings (one trigger, one argument change) can
//! dispatch several actions; consumers should see the combined result once.
//! [`listen_batched`] routes a store listener through the batch queue so that
//! every notification raised inside a [`BatchScope`] collapses into one
//! callback at flush. [`dispatch_batched`] opens such a scope around a block
//! of dispatches.

use std::cell::Cell;
use std::rc::Rc;

use storeq_core::StateListeners;

use crate::reactive::{BatchScope, Subscription, batch};

/// Register `callback` on `source`, coalescing notifications per batch.
///
/// The returned guard removes the listener. A notification already queued
/// when the guard drops is discarded.
pub fn listen_batched<L>(source: Rc<L>, callback: impl Fn() + 'static) -> Subscription
where
    L: StateListeners + ?Sized + 'static,
{
    let callback: Rc<dyn Fn()> = Rc::new(callback);
    let alive = Rc::new(Cell::new(true));
    let key = Rc::as_ptr(&alive) as usize;

    let listener: Rc<dyn Fn()> = {
        let alive = Rc::clone(&alive);
        Rc::new(move || {
            let alive = Rc::clone(&alive);
            let callback = Rc::clone(&callback);
            batch::schedule(key, move || {
                if alive.get() {
                    callback();
                }
            });
        })
    };
    let id = source.add_listener(listener);
    tracing::trace!(%id, "batched store listener registered");

    Subscription::new(move || {
        alive.set(false);
        source.remove_listener(id);
    })
}

/// Run `f` inside a [`BatchScope`]; listener callbacks fire once, after `f`.
pub fn dispatch_batched<R>(f: impl FnOnce() -> R) -> R {
    let _batch = BatchScope::new();
    f()
}
