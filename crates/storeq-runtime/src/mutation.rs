#![forbid(unsafe_code)]

//! Mutation Controller.
//!
//! [`UseMutation::trigger`] dispatches a mutation and points the state stream
//! at its record. Each trigger evicts the record of the previous invocation
//! first, unless the mutation uses a fixed cache key (records under a fixed
//! key are shared between invocations and components, so they are only
//! released).
//!
//! | operation          | previous handle | stored record            |
//! |--------------------|-----------------|--------------------------|
//! | `trigger`          | released        | evicted (no fixed key)   |
//! | `reset`            | released        | evicted                  |
//! | stream teardown    | released        | kept                     |
//!
//! A released invocation stays current until the next `trigger` or `reset`,
//! which still evict its record.
//!
//! The state of a fixed-key mutation follows the shared record, so every
//! binding using the key observes whichever invocation wrote it last.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use storeq_core::{
    MutationEndpoint, MutationHandle, MutationInitiateOptions, MutationSelect, MutationState,
    RawMutationState, RequestId, Settled, ShallowEq,
};
use tracing::debug;

use crate::bridge::listen_batched;
use crate::memo::SelectorMemo;
use crate::reactive::{BatchScope, Emitter, Observable, StateStream, Subscription};

/// A projection of the mutation state.
pub type SelectMutationResult<A, D, E, S> = Rc<dyn Fn(&MutationState<A, D, E>) -> S>;

/// Options for [`use_mutation`].
pub struct UseMutationOptions<A, D, E, S = MutationState<A, D, E>> {
    /// Share one record between all invocations using this key.
    pub fixed_cache_key: Option<String>,
    pub select_from_result: SelectMutationResult<A, D, E, S>,
}

impl<A: 'static, D: 'static, E: 'static> Default for UseMutationOptions<A, D, E> {
    fn default() -> Self {
        Self {
            fixed_cache_key: None,
            select_from_result: Rc::new(|state: &MutationState<A, D, E>| state.clone()),
        }
    }
}

impl<A: 'static, D: 'static, E: 'static> UseMutationOptions<A, D, E> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl<A, D, E, S> UseMutationOptions<A, D, E, S> {
    #[must_use]
    pub fn fixed_cache_key(mut self, key: impl Into<String>) -> Self {
        self.fixed_cache_key = Some(key.into());
        self
    }

    pub fn select_from_result<S2>(
        self,
        select: impl Fn(&MutationState<A, D, E>) -> S2 + 'static,
    ) -> UseMutationOptions<A, D, E, S2> {
        UseMutationOptions {
            fixed_cache_key: self.fixed_cache_key,
            select_from_result: Rc::new(select),
        }
    }
}

impl<A, D, E, S> fmt::Debug for UseMutationOptions<A, D, E, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UseMutationOptions")
            .field("fixed_cache_key", &self.fixed_cache_key)
            .finish_non_exhaustive()
    }
}

/// The result of one mutation trigger.
pub struct MutationInvocation<A, D, E> {
    handle: Rc<dyn MutationHandle<A, D, E>>,
}

impl<A, D, E> Clone for MutationInvocation<A, D, E> {
    fn clone(&self) -> Self {
        Self {
            handle: Rc::clone(&self.handle),
        }
    }
}

impl<A, D, E> MutationInvocation<A, D, E> {
    #[must_use]
    pub fn request_id(&self) -> &RequestId {
        self.handle.request_id()
    }

    #[must_use]
    pub fn arg(&self) -> &Rc<A> {
        self.handle.arg()
    }

    #[must_use]
    pub fn fixed_cache_key(&self) -> Option<&str> {
        self.handle.fixed_cache_key()
    }

    pub fn abort(&self) {
        debug!(request_id = %self.handle.request_id(), "aborting mutation");
        self.handle.abort();
    }

    /// The outcome once settled.
    #[must_use]
    pub fn settled(&self) -> Option<Settled<D, E>> {
        self.handle.settled()
    }
}

impl<A, D, E> fmt::Debug for MutationInvocation<A, D, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MutationInvocation")
            .field("request_id", self.handle.request_id())
            .field("fixed_cache_key", &self.handle.fixed_cache_key())
            .finish()
    }
}

/// Which record the state stream follows.
struct RequestSlot<A> {
    request_id: RequestId,
    original_args: Option<Rc<A>>,
}

impl<A> Clone for RequestSlot<A> {
    fn clone(&self) -> Self {
        Self {
            request_id: self.request_id.clone(),
            original_args: self.original_args.clone(),
        }
    }
}

impl<A> ShallowEq for RequestSlot<A> {
    fn shallow_eq(&self, other: &Self) -> bool {
        self.request_id == other.request_id && self.original_args.shallow_eq(&other.original_args)
    }
}

struct MutationShared<A, D, E> {
    endpoint: Rc<dyn MutationEndpoint<A, D, E>>,
    fixed_cache_key: Option<String>,
    current: RefCell<Option<CurrentInvocation<A, D, E>>>,
    request: Observable<Option<RequestSlot<A>>>,
}

/// The latest invocation. A released invocation is still the one `trigger`
/// and `reset` evict.
struct CurrentInvocation<A, D, E> {
    handle: Rc<dyn MutationHandle<A, D, E>>,
    released: bool,
}

impl<A, D, E> MutationShared<A, D, E> {
    /// Release the current handle, keeping it for a later eviction.
    fn release_current(&self) {
        let handle = match self.current.borrow_mut().as_mut() {
            Some(current) if !current.released => {
                current.released = true;
                Rc::clone(&current.handle)
            }
            _ => return,
        };
        handle.release();
    }

    /// Release the current handle and stop tracking it.
    fn forget_current(&self) -> Option<Rc<dyn MutationHandle<A, D, E>>> {
        let current = self.current.borrow_mut().take()?;
        if !current.released {
            current.handle.release();
        }
        Some(current.handle)
    }

    fn evict(&self, handle: &dyn MutationHandle<A, D, E>) {
        debug!(
            endpoint = self.endpoint.name(),
            request_id = %handle.request_id(),
            "evicting mutation result"
        );
        self.endpoint
            .remove_mutation_result(handle.request_id(), self.fixed_cache_key.as_deref());
    }
}

type Stage1Input<A, D, E> = (Rc<RawMutationState<A, D, E>>, Option<RequestSlot<A>>);

struct MutationConnection<A, D, E, S> {
    shared: Rc<MutationShared<A, D, E>>,
    select_from_result: SelectMutationResult<A, D, E, S>,
    derived: SelectorMemo<Stage1Input<A, D, E>, MutationState<A, D, E>>,
    selected: SelectorMemo<MutationState<A, D, E>, S>,
    last_emitted: Option<S>,
}

impl<A, D, E, S> MutationConnection<A, D, E, S>
where
    A: 'static,
    D: 'static,
    E: 'static,
    S: ShallowEq + Clone + 'static,
{
    fn select_changed(&mut self) -> Option<S> {
        let slot = self.shared.request.get();
        let target = match (&slot, self.shared.fixed_cache_key.as_deref()) {
            (_, Some(key)) => MutationSelect::FixedKey(key),
            (Some(slot), None) => MutationSelect::Request(&slot.request_id),
            (None, None) => MutationSelect::Skip,
        };
        let raw = self.shared.endpoint.select(target);

        let state = self.derived.get_or_compute((raw, slot), |(raw, slot)| {
            let original_args = slot.as_ref().and_then(|slot| slot.original_args.clone());
            MutationState::from_raw(raw, original_args)
        });
        let select_from_result = Rc::clone(&self.select_from_result);
        let selected = self
            .selected
            .get_or_compute(state, |state| select_from_result(state));

        if self
            .last_emitted
            .as_ref()
            .is_some_and(|last| last.shallow_eq(&selected))
        {
            return None;
        }
        self.last_emitted = Some(selected.clone());
        Some(selected)
    }

    fn refresh(this: &Rc<RefCell<Self>>, emitter: &Emitter<S>) {
        let emission = this.borrow_mut().select_changed();
        if let Some(value) = emission {
            emitter.emit(value);
        }
    }
}

/// A mutation binding: trigger, reset and the state of the current record.
pub struct UseMutation<A, D, E, S> {
    shared: Rc<MutationShared<A, D, E>>,
    state: StateStream<S>,
}

impl<A, D, E, S> UseMutation<A, D, E, S>
where
    A: 'static,
    D: 'static,
    E: 'static,
    S: Clone + 'static,
{
    /// Dispatch the mutation for `arg`.
    pub fn trigger(&self, arg: A) -> MutationInvocation<A, D, E> {
        let _batch = BatchScope::new();
        let shared = &self.shared;
        if let Some(previous) = shared.forget_current()
            && shared.fixed_cache_key.is_none()
        {
            shared.evict(previous.as_ref());
        }

        debug!(
            endpoint = shared.endpoint.name(),
            fixed_cache_key = ?shared.fixed_cache_key,
            "triggering mutation"
        );
        let handle = shared.endpoint.initiate(
            Rc::new(arg),
            MutationInitiateOptions {
                fixed_cache_key: shared.fixed_cache_key.clone(),
            },
        );
        *shared.current.borrow_mut() = Some(CurrentInvocation {
            handle: Rc::clone(&handle),
            released: false,
        });
        shared.request.set(Some(RequestSlot {
            request_id: handle.request_id().clone(),
            original_args: shared
                .fixed_cache_key
                .is_none()
                .then(|| Rc::clone(handle.arg())),
        }));
        MutationInvocation { handle }
    }

    /// Evict the current record and return to the uninitialized state.
    pub fn reset(&self) {
        let _batch = BatchScope::new();
        if let Some(current) = self.shared.forget_current() {
            self.shared.evict(current.as_ref());
        }
        self.shared.request.set(None);
    }

    /// State of the current record.
    #[must_use]
    pub fn state(&self) -> StateStream<S> {
        self.state.clone()
    }

    /// The current invocation, if any.
    #[must_use]
    pub fn current(&self) -> Option<MutationInvocation<A, D, E>> {
        self.shared
            .current
            .borrow()
            .as_ref()
            .map(|current| MutationInvocation {
                handle: Rc::clone(&current.handle),
            })
    }
}

impl<A, D, E, S> Drop for UseMutation<A, D, E, S> {
    fn drop(&mut self) {
        let _batch = BatchScope::new();
        self.shared.release_current();
    }
}

impl<A, D, E, S> fmt::Debug for UseMutation<A, D, E, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UseMutation")
            .field("endpoint", &self.shared.endpoint.name())
            .field("fixed_cache_key", &self.shared.fixed_cache_key)
            .field(
                "active",
                &self
                    .shared
                    .current
                    .borrow()
                    .as_ref()
                    .is_some_and(|current| !current.released),
            )
            .finish()
    }
}

/// Build a mutation binding for `endpoint`.
pub fn use_mutation<A, D, E, S>(
    endpoint: Rc<dyn MutationEndpoint<A, D, E>>,
    options: UseMutationOptions<A, D, E, S>,
) -> UseMutation<A, D, E, S>
where
    A: 'static,
    D: 'static,
    E: 'static,
    S: ShallowEq + Clone + 'static,
{
    let shared = Rc::new(MutationShared {
        endpoint,
        fixed_cache_key: options.fixed_cache_key,
        current: RefCell::new(None),
        request: Observable::new(None),
    });
    let select_from_result = options.select_from_result;

    let state = {
        let shared = Rc::clone(&shared);
        StateStream::new(move |emitter: Emitter<S>| {
            let _batch = BatchScope::new();
            debug!(endpoint = shared.endpoint.name(), "mutation stream connected");
            let conn = Rc::new(RefCell::new(MutationConnection {
                shared: Rc::clone(&shared),
                select_from_result: Rc::clone(&select_from_result),
                derived: SelectorMemo::new(),
                selected: SelectorMemo::new(),
                last_emitted: None,
            }));

            let on_change = {
                let conn = Rc::downgrade(&conn);
                let emitter = emitter.clone();
                Rc::new(move || {
                    if let Some(conn) = conn.upgrade() {
                        MutationConnection::refresh(&conn, &emitter);
                    }
                })
            };
            let guards = [
                listen_batched(Rc::clone(&shared.endpoint), {
                    let on_change = Rc::clone(&on_change);
                    move || on_change()
                }),
                shared.request.subscribe({
                    let on_change = Rc::clone(&on_change);
                    move |_| on_change()
                }),
            ];
            on_change();

            let shared = Rc::clone(&shared);
            Subscription::new(move || {
                let _batch = BatchScope::new();
                drop(guards);
                drop(conn);
                shared.release_current();
                debug!(endpoint = shared.endpoint.name(), "mutation stream torn down");
            })
        })
    };

    UseMutation { shared, state }
}
