#![forbid(unsafe_code)]

//! Derived State Selector.
//!
//! Turns a raw cache sub-state into the UI-shaped [`QueryState`]:
//!
//! 1. A retained value whose argument key equals the current key is dropped
//!    when the cache reports the entry uninitialized (the store was reset).
//!    Data retained across an argument change is re-filed under the new key,
//!    so a reset seen while it is on screen drops it too.
//! 2. `data` is the raw data when the entry is fulfilled, else the retained
//!    data, else whatever the raw entry carries (speculative data).
//! 3. `is_fetching` is the raw in-flight flag.
//! 4. `is_loading` is fetching with no data at all.
//! 5. `is_success` is a fulfilled entry, or fetching while data is shown.
//! 6. `current_data` is the raw data, never retained.
//!
//! [`QueryStateSelector`] runs that projection behind two memo stages, the
//! first keyed on raw sub-state identity and argument identity, the second on
//! the first stage's output, so a user projection re-runs only when the
//! derived state actually changed.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use storeq_core::{QueryEndpoint, QueryState, QueryStatus, RawQueryState, ShallowEq, StableArg};

use crate::memo::SelectorMemo;

/// A user projection of the derived state.
pub type SelectFromResult<A, D, E, S> = Rc<dyn Fn(&QueryState<A, D, E>) -> S>;

/// Shared slot holding the last state that carried data.
pub type LastGood<A, D, E> = Rc<RefCell<Option<QueryState<A, D, E>>>>;

/// Whether the retained value must be dropped because the cache was reset
/// for the very argument it was retained under.
#[must_use]
pub fn is_reset<A, D, E>(
    raw: &RawQueryState<A, D, E>,
    last_good: Option<&QueryState<A, D, E>>,
    arg: &StableArg<A>,
) -> bool {
    raw.is_uninitialized()
        && last_good.is_some_and(|last| last.arg_key.is_some() && last.arg_key.as_ref() == arg.key())
}

/// Project a raw sub-state into a [`QueryState`].
#[must_use]
pub fn project<A, D, E>(
    raw: &RawQueryState<A, D, E>,
    last_good: Option<&QueryState<A, D, E>>,
    arg: &StableArg<A>,
) -> QueryState<A, D, E> {
    let last_good = if is_reset(raw, last_good, arg) {
        None
    } else {
        last_good
    };

    let retained = last_good.and_then(|last| last.data.clone());
    let data = if raw.is_success() {
        raw.data.clone()
    } else {
        retained
    }
    .or_else(|| raw.data.clone());

    let is_fetching = raw.is_loading();
    let is_loading = is_fetching && data.is_none();
    let is_success = raw.is_success() || (is_fetching && data.is_some());

    QueryState {
        status: raw.status,
        current_data: raw.data.clone(),
        data,
        error: raw.error.clone(),
        is_uninitialized: raw.is_uninitialized(),
        is_loading,
        is_fetching,
        is_success,
        is_error: raw.is_error(),
        original_args: raw.original_args.clone(),
        arg_key: arg.key().cloned(),
        request_id: raw.request_id.clone(),
        fulfilled_at: raw.fulfilled_at,
    }
}

/// Rewrite an uninitialized state as pending so that the first emission of a
/// subscribed query never needs an "uninitialized" branch.
#[must_use]
pub fn no_pending<A, D, E>(mut state: QueryState<A, D, E>) -> QueryState<A, D, E> {
    if state.is_uninitialized {
        state.is_uninitialized = false;
        state.is_fetching = true;
        state.is_loading = state.data.is_none();
        state.is_success = state.data.is_some();
        state.status = QueryStatus::Pending;
    }
    state
}

/// The identity projection.
#[must_use]
pub fn identity_selector<A: 'static, D: 'static, E: 'static>()
-> SelectFromResult<A, D, E, QueryState<A, D, E>> {
    Rc::new(|state: &QueryState<A, D, E>| state.clone())
}

type Stage1Input<A, D, E> = (Rc<RawQueryState<A, D, E>>, StableArg<A>);

/// Memoized selection for one stable argument.
///
/// A new selector is built whenever the argument identity changes; the
/// [`LastGood`] slot is shared across those selectors so data is retained
/// across argument transitions.
pub struct QueryStateSelector<A, D, E, S> {
    endpoint: Rc<dyn QueryEndpoint<A, D, E>>,
    arg: StableArg<A>,
    last_good: LastGood<A, D, E>,
    select_from_result: SelectFromResult<A, D, E, S>,
    apply_no_pending: bool,
    derived: SelectorMemo<Stage1Input<A, D, E>, QueryState<A, D, E>>,
    selected: SelectorMemo<QueryState<A, D, E>, S>,
}

impl<A: 'static, D: 'static, E: 'static, S: ShallowEq + Clone> QueryStateSelector<A, D, E, S> {
    pub fn new(
        endpoint: Rc<dyn QueryEndpoint<A, D, E>>,
        arg: StableArg<A>,
        last_good: LastGood<A, D, E>,
        select_from_result: SelectFromResult<A, D, E, S>,
    ) -> Self {
        Self {
            endpoint,
            arg,
            last_good,
            select_from_result,
            apply_no_pending: false,
            derived: SelectorMemo::new(),
            selected: SelectorMemo::new(),
        }
    }

    /// Apply [`no_pending`] between the two stages. Ignored for sentinel
    /// arguments.
    #[must_use]
    pub fn with_no_pending(mut self, enabled: bool) -> Self {
        self.apply_no_pending = enabled && !self.arg.is_sentinel();
        self
    }

    #[must_use]
    pub fn arg(&self) -> &StableArg<A> {
        &self.arg
    }

    /// Read the store and return the (memoized) selection.
    pub fn select(&mut self) -> S {
        let state = self.derive();
        let state = if self.apply_no_pending {
            no_pending(state)
        } else {
            state
        };
        let select_from_result = Rc::clone(&self.select_from_result);
        self.selected
            .get_or_compute(state, |state| select_from_result(state))
    }

    /// The stage-one output for the current store state.
    pub fn derive(&mut self) -> QueryState<A, D, E> {
        let raw = self.endpoint.select(&self.arg);
        let last_good = Rc::clone(&self.last_good);
        if is_reset(&raw, last_good.borrow().as_ref(), &self.arg) {
            tracing::debug!(
                endpoint = self.endpoint.name(),
                key = ?self.arg.key(),
                "cache reset detected; dropping retained data"
            );
            *last_good.borrow_mut() = None;
        }

        let state = self
            .derived
            .get_or_compute((raw, self.arg.clone()), |(raw, arg)| {
                tracing::trace!(key = ?arg.key(), status = %raw.status, "projecting query state");
                project(raw, last_good.borrow().as_ref(), arg)
            });

        // Retained data takes the key it is shown under.
        if state.data.is_some() {
            *last_good.borrow_mut() = Some(state.clone());
        }
        state
    }

    /// How often stage one recomputed.
    #[must_use]
    pub fn derive_recomputations(&self) -> u64 {
        self.derived.recomputations()
    }

    /// How often the user projection ran.
    #[must_use]
    pub fn select_recomputations(&self) -> u64 {
        self.selected.recomputations()
    }
}

impl<A, D, E, S> fmt::Debug for QueryStateSelector<A, D, E, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryStateSelector")
            .field("arg_key", &self.arg.key())
            .field("no_pending", &self.apply_no_pending)
            .finish()
    }
}
