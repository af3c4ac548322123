#![forbid(unsafe_code)]

//! Deferred, coalesced notification.
//!
//! A [`BatchScope`] marks a synchronous pass (a dispatch, an argument change,
//! a trigger). Work scheduled through [`schedule`] while any scope is open is
//! queued instead of run, and work scheduled twice under the same key runs
//! once, at the queue position of its first scheduling. The queue flushes when
//! the outermost scope drops.
//!
//! # Invariants
//!
//! 1. Outside a batch, [`schedule`] runs the job immediately.
//! 2. Inside a batch, at most one job per key is queued; a later job for the
//!    same key replaces the earlier one.
//! 3. Nested scopes only flush at the outermost exit.
//! 4. Jobs run with no batch state borrowed, so they may open scopes or
//!    schedule further work. Work they schedule runs immediately.

use std::cell::RefCell;
use std::marker::PhantomData;

type Job = Box<dyn FnOnce()>;

#[derive(Default)]
struct BatchContext {
    depth: usize,
    queue: Vec<(usize, Job)>,
}

thread_local! {
    static BATCH: RefCell<BatchContext> = RefCell::new(BatchContext::default());
}

/// RAII guard that defers scheduled work until the outermost scope exits.
///
/// `!Send`: a scope belongs to the thread whose queue it holds open.
#[must_use = "a BatchScope only defers work while it is alive"]
pub struct BatchScope {
    _not_send: PhantomData<*const ()>,
}

impl BatchScope {
    /// Open a scope.
    pub fn new() -> Self {
        BATCH.with(|ctx| ctx.borrow_mut().depth += 1);
        Self {
            _not_send: PhantomData,
        }
    }
}

impl Default for BatchScope {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for BatchScope {
    fn drop(&mut self) {
        let pending = BATCH.with(|ctx| {
            let mut ctx = ctx.borrow_mut();
            ctx.depth = ctx.depth.saturating_sub(1);
            if ctx.depth == 0 {
                std::mem::take(&mut ctx.queue)
            } else {
                Vec::new()
            }
        });
        if std::thread::panicking() {
            return;
        }
        if !pending.is_empty() {
            tracing::trace!(jobs = pending.len(), "flushing batch");
        }
        for (_, job) in pending {
            job();
        }
    }
}

impl std::fmt::Debug for BatchScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchScope")
            .field("depth", &batch_depth())
            .finish()
    }
}

/// Whether a batch is currently open on this thread.
#[must_use]
pub fn is_batching() -> bool {
    batch_depth() > 0
}

fn batch_depth() -> usize {
    BATCH.with(|ctx| ctx.borrow().depth)
}

/// Run `job` now, or queue it under `key` if a batch is open.
pub fn schedule(key: usize, job: impl FnOnce() + 'static) {
    let job: Job = Box::new(job);
    let immediate = BATCH.with(|ctx| {
        let mut ctx = ctx.borrow_mut();
        if ctx.depth == 0 {
            return Some(job);
        }
        if let Some(slot) = ctx.queue.iter_mut().find(|(k, _)| *k == key) {
            slot.1 = job;
        } else {
            ctx.queue.push((key, job));
        }
        None
    });
    if let Some(job) = immediate {
        job();
    }
}

/// Number of jobs waiting for the current batch to close.
#[must_use]
pub fn pending_jobs() -> usize {
    BATCH.with(|ctx| ctx.borrow().queue.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    #[test]
    fn runs_immediately_outside_batch() {
        let hits = Rc::new(Cell::new(0));
        let h = Rc::clone(&hits);
        schedule(1, move || h.set(h.get() + 1));
        assert_eq!(hits.get(), 1);
        assert!(!is_batching());
    }

    #[test]
    fn coalesces_by_key() {
        let log = Rc::new(RefCell::new(Vec::new()));
        {
            let _batch = BatchScope::new();
            for value in 0..3 {
                let l = Rc::clone(&log);
                schedule(7, move || l.borrow_mut().push(("a", value)));
            }
            let l = Rc::clone(&log);
            schedule(8, move || l.borrow_mut().push(("b", 0)));
            assert_eq!(pending_jobs(), 2);
            assert!(log.borrow().is_empty());
        }
        assert_eq!(*log.borrow(), vec![("a", 2), ("b", 0)]);
    }

    #[test]
    fn nested_scopes_flush_at_outermost() {
        let hits = Rc::new(Cell::new(0));
        let outer = BatchScope::new();
        {
            let _inner = BatchScope::new();
            let h = Rc::clone(&hits);
            schedule(1, move || h.set(h.get() + 1));
        }
        assert_eq!(hits.get(), 0, "inner exit must not flush");
        drop(outer);
        assert_eq!(hits.get(), 1);
    }

    #[test]
    fn jobs_may_schedule_more_work() {
        let hits = Rc::new(Cell::new(0));
        {
            let _batch = BatchScope::new();
            let h = Rc::clone(&hits);
            schedule(1, move || {
                let h2 = Rc::clone(&h);
                schedule(1, move || h2.set(h2.get() + 10));
                h.set(h.get() + 1);
            });
        }
        assert_eq!(hits.get(), 11);
        assert_eq!(pending_jobs(), 0);
    }
}
