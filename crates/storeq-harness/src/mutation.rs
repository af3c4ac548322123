#![forbid(unsafe_code)]

//! Harness mutation endpoint.
//!
//! Records are filed under the fixed cache key when one is given, otherwise
//! under the request id. A new invocation under a fixed key replaces the
//! record in place.

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::fmt;
use std::rc::{Rc, Weak};

use storeq_core::{
    EndpointMeta, ListenerId, MutationEndpoint, MutationHandle, MutationInitiateOptions,
    MutationSelect, QueryStatus, RawMutationState, RequestError, RequestId, Settled,
    StateListeners,
};

use crate::store::{Action, HarnessStore};

struct InFlight<A> {
    slot: String,
    request_id: RequestId,
    arg: Rc<A>,
}

/// An in-memory mutation endpoint.
pub struct HarnessMutationEndpoint<A, D, E> {
    store: Rc<HarnessStore>,
    meta: EndpointMeta,
    this: Weak<Self>,
    uninitialized: Rc<RawMutationState<A, D, E>>,
    records: RefCell<BTreeMap<String, Rc<RawMutationState<A, D, E>>>>,
    in_flight: RefCell<Vec<InFlight<A>>>,
    requests: Cell<usize>,
    released: RefCell<Vec<RequestId>>,
}

fn slot_for(request_id: &RequestId, fixed_cache_key: Option<&str>) -> String {
    fixed_cache_key.map_or_else(|| request_id.as_str().to_owned(), str::to_owned)
}

impl<A: 'static, D: 'static, E: 'static> HarnessMutationEndpoint<A, D, E> {
    pub fn new(store: &Rc<HarnessStore>, name: &str) -> Rc<Self> {
        let endpoint = Rc::new_cyclic(|this| Self {
            store: Rc::clone(store),
            meta: EndpointMeta::mutation(name),
            this: Weak::clone(this),
            uninitialized: Rc::new(RawMutationState::uninitialized()),
            records: RefCell::new(BTreeMap::new()),
            in_flight: RefCell::new(Vec::new()),
            requests: Cell::new(0),
            released: RefCell::new(Vec::new()),
        });
        let weak = Rc::downgrade(&endpoint);
        store.on_reset(Box::new(move || {
            if let Some(endpoint) = weak.upgrade() {
                endpoint.records.borrow_mut().clear();
                endpoint.in_flight.borrow_mut().clear();
            }
        }));
        endpoint
    }

    /// Mutations dispatched since creation.
    #[must_use]
    pub fn requests(&self) -> usize {
        self.requests.get()
    }

    /// Stored records.
    #[must_use]
    pub fn record_count(&self) -> usize {
        self.records.borrow().len()
    }

    /// The record filed under `slot` (a fixed key or a request id).
    #[must_use]
    pub fn record(&self, slot: &str) -> Option<Rc<RawMutationState<A, D, E>>> {
        self.records.borrow().get(slot).cloned()
    }

    /// Request ids whose handles were released.
    #[must_use]
    pub fn released(&self) -> Vec<RequestId> {
        self.released.borrow().clone()
    }

    /// Settle every in-flight mutation with `respond`.
    pub fn resolve_all(&self, respond: impl Fn(&A) -> Result<D, E>) -> usize {
        let pending = std::mem::take(&mut *self.in_flight.borrow_mut());
        let settled = pending.len();
        for request in pending {
            let outcome = respond(&request.arg);
            self.settle(&request, outcome.map_err(|err| RequestError::Rejected(Rc::new(err))));
        }
        settled
    }

    fn settle(&self, request: &InFlight<A>, outcome: Result<D, RequestError<E>>) {
        let status = {
            let mut records = self.records.borrow_mut();
            let Some(record) = records.get_mut(&request.slot) else {
                return;
            };
            if record.request_id.as_ref() != Some(&request.request_id) {
                return;
            }
            let previous = RawMutationState::clone(record);
            let next = match outcome {
                Ok(data) => RawMutationState {
                    status: QueryStatus::Fulfilled,
                    data: Some(Rc::new(data)),
                    error: None,
                    ..previous
                },
                Err(err) => RawMutationState {
                    status: QueryStatus::Rejected,
                    data: None,
                    error: Some(err),
                    ..previous
                },
            };
            *record = Rc::new(next);
            record.status
        };
        self.store.record(Action::MutationSettled {
            endpoint: self.meta.name.clone(),
            request_id: request.request_id.clone(),
            status,
        });
        self.store.notify();
    }

    fn abort(&self, slot: &str, request_id: &RequestId) {
        let aborted = {
            let mut in_flight = self.in_flight.borrow_mut();
            in_flight
                .iter()
                .position(|request| request.request_id == *request_id)
                .map(|index| in_flight.remove(index))
        };
        self.store.record(Action::MutationAbort {
            endpoint: self.meta.name.clone(),
            request_id: request_id.clone(),
        });
        match aborted {
            Some(request) => self.settle(&request, Err(RequestError::Aborted)),
            None => {
                tracing::debug!(endpoint = %self.meta.name, %request_id, %slot, "abort after settle ignored");
            }
        }
    }

    fn release(&self, request_id: &RequestId) {
        self.released.borrow_mut().push(request_id.clone());
        self.store.record(Action::MutationRelease {
            endpoint: self.meta.name.clone(),
            request_id: request_id.clone(),
        });
    }

    fn settled(&self, slot: &str, request_id: &RequestId) -> Option<Settled<D, E>> {
        let record = self.record(slot)?;
        if record.request_id.as_ref() != Some(request_id) {
            return None;
        }
        match record.status {
            QueryStatus::Fulfilled => record.data.clone().map(Ok),
            QueryStatus::Rejected => record.error.clone().map(Err),
            QueryStatus::Uninitialized | QueryStatus::Pending => None,
        }
    }
}

impl<A, D, E> StateListeners for HarnessMutationEndpoint<A, D, E> {
    fn add_listener(&self, listener: Rc<dyn Fn()>) -> ListenerId {
        self.store.add_listener(listener)
    }

    fn remove_listener(&self, id: ListenerId) {
        self.store.remove_listener(id);
    }
}

impl<A: 'static, D: 'static, E: 'static> MutationEndpoint<A, D, E>
    for HarnessMutationEndpoint<A, D, E>
{
    fn meta(&self) -> &EndpointMeta {
        &self.meta
    }

    fn initiate(
        &self,
        arg: Rc<A>,
        options: MutationInitiateOptions,
    ) -> Rc<dyn MutationHandle<A, D, E>> {
        let request_id = self.store.next_request_id();
        let slot = slot_for(&request_id, options.fixed_cache_key.as_deref());
        self.records.borrow_mut().insert(
            slot.clone(),
            Rc::new(RawMutationState {
                status: QueryStatus::Pending,
                data: None,
                error: None,
                original_args: Some(Rc::clone(&arg)),
                request_id: Some(request_id.clone()),
                fixed_cache_key: options.fixed_cache_key.clone(),
            }),
        );
        self.in_flight.borrow_mut().push(InFlight {
            slot: slot.clone(),
            request_id: request_id.clone(),
            arg: Rc::clone(&arg),
        });
        self.requests.set(self.requests.get() + 1);
        self.store.record(Action::MutationInitiate {
            endpoint: self.meta.name.clone(),
            request_id: request_id.clone(),
            fixed_cache_key: options.fixed_cache_key.clone(),
        });
        self.store.notify();

        Rc::new(HarnessMutationHandle {
            endpoint: Weak::clone(&self.this),
            slot,
            request_id,
            arg,
            fixed_cache_key: options.fixed_cache_key,
        })
    }

    fn select(&self, target: MutationSelect<'_>) -> Rc<RawMutationState<A, D, E>> {
        match target {
            MutationSelect::Skip => Rc::clone(&self.uninitialized),
            MutationSelect::Request(request_id) => self
                .record(request_id.as_str())
                .unwrap_or_else(|| Rc::clone(&self.uninitialized)),
            MutationSelect::FixedKey(key) => self
                .record(key)
                .unwrap_or_else(|| Rc::clone(&self.uninitialized)),
        }
    }

    fn remove_mutation_result(&self, request_id: &RequestId, fixed_cache_key: Option<&str>) {
        let slot = slot_for(request_id, fixed_cache_key);
        let removed = self.records.borrow_mut().remove(&slot).is_some();
        self.store.record(Action::RemoveMutationResult {
            endpoint: self.meta.name.clone(),
            request_id: request_id.clone(),
            fixed_cache_key: fixed_cache_key.map(str::to_owned),
        });
        if removed {
            self.store.notify();
        }
    }
}

impl<A, D, E> fmt::Debug for HarnessMutationEndpoint<A, D, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HarnessMutationEndpoint")
            .field("name", &self.meta.name)
            .field("records", &self.records.borrow().len())
            .field("requests", &self.requests.get())
            .finish()
    }
}

struct HarnessMutationHandle<A, D, E> {
    endpoint: Weak<HarnessMutationEndpoint<A, D, E>>,
    slot: String,
    request_id: RequestId,
    arg: Rc<A>,
    fixed_cache_key: Option<String>,
}

impl<A: 'static, D: 'static, E: 'static> MutationHandle<A, D, E> for HarnessMutationHandle<A, D, E> {
    fn request_id(&self) -> &RequestId {
        &self.request_id
    }

    fn arg(&self) -> &Rc<A> {
        &self.arg
    }

    fn fixed_cache_key(&self) -> Option<&str> {
        self.fixed_cache_key.as_deref()
    }

    fn abort(&self) {
        if let Some(endpoint) = self.endpoint.upgrade() {
            endpoint.abort(&self.slot, &self.request_id);
        }
    }

    fn release(&self) {
        if let Some(endpoint) = self.endpoint.upgrade() {
            endpoint.release(&self.request_id);
        }
    }

    fn settled(&self) -> Option<Settled<D, E>> {
        self.endpoint.upgrade()?.settled(&self.slot, &self.request_id)
    }
}
