#![forbid(unsafe_code)]

//! The store shell: listeners, action log, middleware flag and global reset.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use storeq_core::{
    ApiStore, ListenerId, PrefetchOptions, QueryStatus, RequestId, SerializedKey,
    StateListeners, SubscriptionOptions,
};

/// Everything the store was asked to do, in dispatch order.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    QueryInitiate {
        endpoint: String,
        key: SerializedKey,
        request_id: RequestId,
        force_refetch: bool,
        subscribe: bool,
        /// Whether a network request was started (false when deduplicated
        /// or served from cache).
        started: bool,
    },
    QueryRefetch {
        endpoint: String,
        key: SerializedKey,
        request_id: RequestId,
    },
    QueryUnsubscribe {
        endpoint: String,
        key: SerializedKey,
        request_id: RequestId,
    },
    UpdateSubscriptionOptions {
        endpoint: String,
        key: SerializedKey,
        request_id: RequestId,
        options: SubscriptionOptions,
    },
    QueryAbort {
        endpoint: String,
        key: SerializedKey,
        request_id: RequestId,
    },
    QuerySettled {
        endpoint: String,
        key: SerializedKey,
        request_id: RequestId,
        status: QueryStatus,
    },
    Prefetch {
        endpoint: String,
        key: SerializedKey,
        options: PrefetchOptions,
        started: bool,
    },
    MutationInitiate {
        endpoint: String,
        request_id: RequestId,
        fixed_cache_key: Option<String>,
    },
    MutationSettled {
        endpoint: String,
        request_id: RequestId,
        status: QueryStatus,
    },
    MutationRelease {
        endpoint: String,
        request_id: RequestId,
    },
    MutationAbort {
        endpoint: String,
        request_id: RequestId,
    },
    RemoveMutationResult {
        endpoint: String,
        request_id: RequestId,
        fixed_cache_key: Option<String>,
    },
    ResetApiState,
    SetupListeners,
}

impl Action {
    /// Short kind name, handy for sequence assertions.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::QueryInitiate { .. } => "query/initiate",
            Self::QueryRefetch { .. } => "query/refetch",
            Self::QueryUnsubscribe { .. } => "query/unsubscribe",
            Self::UpdateSubscriptionOptions { .. } => "query/updateSubscriptionOptions",
            Self::QueryAbort { .. } => "query/abort",
            Self::QuerySettled { .. } => "query/settled",
            Self::Prefetch { .. } => "query/prefetch",
            Self::MutationInitiate { .. } => "mutation/initiate",
            Self::MutationSettled { .. } => "mutation/settled",
            Self::MutationRelease { .. } => "mutation/release",
            Self::MutationAbort { .. } => "mutation/abort",
            Self::RemoveMutationResult { .. } => "mutation/removeResult",
            Self::ResetApiState => "resetApiState",
            Self::SetupListeners => "setupListeners",
        }
    }
}

/// Store shell shared by all harness endpoints.
pub struct HarnessStore {
    reducer_path: String,
    listeners: RefCell<Vec<(ListenerId, Rc<dyn Fn()>)>>,
    next_listener: Cell<u64>,
    next_request: Cell<u64>,
    actions: RefCell<Vec<Action>>,
    middleware: Cell<bool>,
    listeners_installed: Cell<bool>,
    resets: RefCell<Vec<Box<dyn Fn()>>>,
    notifications: Cell<u64>,
}

impl HarnessStore {
    /// A store with its middleware installed.
    #[must_use]
    pub fn new() -> Rc<Self> {
        Rc::new(Self {
            reducer_path: "api".to_owned(),
            listeners: RefCell::new(Vec::new()),
            next_listener: Cell::new(0),
            next_request: Cell::new(0),
            actions: RefCell::new(Vec::new()),
            middleware: Cell::new(true),
            listeners_installed: Cell::new(false),
            resets: RefCell::new(Vec::new()),
            notifications: Cell::new(0),
        })
    }

    /// A store whose middleware was never added; subscription probes answer
    /// with nothing.
    #[must_use]
    pub fn without_middleware() -> Rc<Self> {
        let store = Self::new();
        store.middleware.set(false);
        store
    }

    #[must_use]
    pub fn has_middleware(&self) -> bool {
        self.middleware.get()
    }

    #[must_use]
    pub fn listeners_installed(&self) -> bool {
        self.listeners_installed.get()
    }

    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.listeners.borrow().len()
    }

    /// How many times listeners were notified.
    #[must_use]
    pub fn notifications(&self) -> u64 {
        self.notifications.get()
    }

    /// Snapshot of the action log.
    #[must_use]
    pub fn actions(&self) -> Vec<Action> {
        self.actions.borrow().clone()
    }

    /// Kind names of the logged actions.
    #[must_use]
    pub fn action_kinds(&self) -> Vec<&'static str> {
        self.actions.borrow().iter().map(Action::kind).collect()
    }

    /// Drain the action log.
    pub fn take_actions(&self) -> Vec<Action> {
        std::mem::take(&mut *self.actions.borrow_mut())
    }

    /// Count logged actions matching `pred`.
    pub fn count(&self, pred: impl Fn(&Action) -> bool) -> usize {
        self.actions.borrow().iter().filter(|action| pred(action)).count()
    }

    /// Drop every cache entry and subscription of every endpoint, the way an
    /// external `resetApiState` would.
    pub fn reset_api_state(&self) {
        for reset in self.resets.borrow().iter() {
            reset();
        }
        self.record(Action::ResetApiState);
        self.notify();
    }

    pub(crate) fn next_request_id(&self) -> RequestId {
        let n = self.next_request.get();
        self.next_request.set(n + 1);
        RequestId::new(format!("req-{n}"))
    }

    pub(crate) fn record(&self, action: Action) {
        tracing::trace!(kind = action.kind(), "harness action");
        self.actions.borrow_mut().push(action);
    }

    pub(crate) fn on_reset(&self, reset: Box<dyn Fn()>) {
        self.resets.borrow_mut().push(reset);
    }

    /// Notify every listener. Never called while harness state is borrowed.
    pub fn notify(&self) {
        self.notifications.set(self.notifications.get() + 1);
        let listeners: Vec<_> = self
            .listeners
            .borrow()
            .iter()
            .map(|(_, listener)| Rc::clone(listener))
            .collect();
        for listener in listeners {
            listener();
        }
    }
}

impl StateListeners for HarnessStore {
    fn add_listener(&self, listener: Rc<dyn Fn()>) -> ListenerId {
        let id = ListenerId(self.next_listener.get());
        self.next_listener.set(id.0 + 1);
        self.listeners.borrow_mut().push((id, listener));
        id
    }

    fn remove_listener(&self, id: ListenerId) {
        self.listeners.borrow_mut().retain(|(listener, _)| *listener != id);
    }
}

impl ApiStore for HarnessStore {
    fn reducer_path(&self) -> &str {
        &self.reducer_path
    }

    fn setup_listeners(&self) {
        self.listeners_installed.set(true);
        self.record(Action::SetupListeners);
    }
}

impl fmt::Debug for HarnessStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HarnessStore")
            .field("reducer_path", &self.reducer_path)
            .field("listeners", &self.listeners.borrow().len())
            .field("actions", &self.actions.borrow().len())
            .field("middleware", &self.middleware.get())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listeners_are_notified_in_order_and_removable() {
        let store = HarnessStore::new();
        let log = Rc::new(RefCell::new(Vec::new()));
        let (a, b) = (Rc::clone(&log), Rc::clone(&log));
        let first = store.add_listener(Rc::new(move || a.borrow_mut().push(1)));
        store.add_listener(Rc::new(move || b.borrow_mut().push(2)));

        store.notify();
        store.remove_listener(first);
        store.notify();
        assert_eq!(*log.borrow(), vec![1, 2, 2]);
        assert_eq!(store.notifications(), 2);
    }

    #[test]
    fn request_ids_are_unique() {
        let store = HarnessStore::new();
        assert_ne!(store.next_request_id(), store.next_request_id());
    }

    #[test]
    fn setup_listeners_is_logged() {
        let store = HarnessStore::new();
        store.setup_listeners();
        assert!(store.listeners_installed());
        assert_eq!(store.action_kinds(), vec!["setupListeners"]);
    }
}
