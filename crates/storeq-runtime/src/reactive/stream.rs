#![forbid(unsafe_code)]

//! Shared, replay-latest, reference-counted state stream.
//!
//! A [`StateStream`] wraps a *connect* function. The first subscriber
//! connects it, handing it an [`Emitter`]; the connection stays up while at
//! least one subscriber is attached and is torn down (its [`Subscription`]
//! dropped) when the last one detaches. Subscribers joining a live connection
//! immediately receive the latest emitted value.
//!
//! # Invariants
//!
//! 1. At most one connection exists at a time.
//! 2. Teardown runs exactly once per connection, after the last subscriber
//!    detaches, never before.
//! 3. After teardown the replay slot is empty; a later subscriber reconnects
//!    and sees only values emitted by the new connection.
//! 4. Emitters from a torn-down connection are inert.
//!
//! # Failure Modes
//!
//! - A connect function that panics leaves the stream disconnected; the
//!   subscriber that triggered it is still registered and is removed when its
//!   guard drops.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use super::observable::Subscription;

type Callback<T> = Rc<dyn Fn(&T)>;
type Connect<T> = dyn Fn(Emitter<T>) -> Subscription;

struct StreamState<T> {
    latest: Option<T>,
    subscribers: Vec<(u64, Callback<T>)>,
    next_id: u64,
    connection: Option<Subscription>,
    epoch: u64,
}

struct StreamShared<T> {
    connect: Box<Connect<T>>,
    state: RefCell<StreamState<T>>,
}

/// A lazily connected, multicast stream of `T`.
pub struct StateStream<T> {
    shared: Rc<StreamShared<T>>,
}

impl<T> Clone for StateStream<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Rc::clone(&self.shared),
        }
    }
}

impl<T: Clone + 'static> StateStream<T> {
    /// Create a stream from its connect function.
    ///
    /// `connect` receives an emitter and returns the teardown guard for the
    /// connection.
    pub fn new(connect: impl Fn(Emitter<T>) -> Subscription + 'static) -> Self {
        Self {
            shared: Rc::new(StreamShared {
                connect: Box::new(connect),
                state: RefCell::new(StreamState {
                    latest: None,
                    subscribers: Vec::new(),
                    next_id: 0,
                    connection: None,
                    epoch: 0,
                }),
            }),
        }
    }

    /// Attach `callback`. Connects the stream if this is the first subscriber,
    /// otherwise replays the latest value to `callback` alone.
    pub fn subscribe(&self, callback: impl Fn(&T) + 'static) -> Subscription {
        let callback: Callback<T> = Rc::new(callback);
        let (id, connect_epoch, replay) = {
            let mut state = self.shared.state.borrow_mut();
            let id = state.next_id;
            state.next_id += 1;
            state.subscribers.push((id, Rc::clone(&callback)));
            if state.connection.is_none() && state.subscribers.len() == 1 {
                state.epoch += 1;
                (id, Some(state.epoch), None)
            } else {
                (id, None, state.latest.clone())
            }
        };

        if let Some(epoch) = connect_epoch {
            tracing::trace!(epoch, "state stream connecting");
            let emitter = Emitter {
                shared: Rc::downgrade(&self.shared),
                epoch,
            };
            let connection = (self.shared.connect)(emitter);
            let stale = {
                let mut state = self.shared.state.borrow_mut();
                if state.epoch == epoch && !state.subscribers.is_empty() {
                    state.connection = Some(connection);
                    None
                } else {
                    // Every subscriber left while connecting.
                    Some(connection)
                }
            };
            drop(stale);
        } else if let Some(value) = replay {
            callback(&value);
        }

        let weak = Rc::downgrade(&self.shared);
        Subscription::new(move || {
            if let Some(shared) = weak.upgrade() {
                detach(&shared, id);
            }
        })
    }

    /// The latest emitted value of the live connection.
    #[must_use]
    pub fn latest(&self) -> Option<T> {
        self.shared.state.borrow().latest.clone()
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.shared.state.borrow().connection.is_some()
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.shared.state.borrow().subscribers.len()
    }

    /// A stream of `f` applied to every value of this one.
    ///
    /// The mapped stream holds one subscription to `self` while it is
    /// connected.
    pub fn map<U: Clone + 'static>(&self, f: impl Fn(&T) -> U + 'static) -> StateStream<U> {
        let source = self.clone();
        let f = Rc::new(f);
        StateStream::new(move |emitter: Emitter<U>| {
            let f = Rc::clone(&f);
            source.subscribe(move |value| emitter.emit(f(value)))
        })
    }
}

fn detach<T>(shared: &Rc<StreamShared<T>>, id: u64) {
    let teardown = {
        let mut state = shared.state.borrow_mut();
        state.subscribers.retain(|(sid, _)| *sid != id);
        if state.subscribers.is_empty() {
            state.latest = None;
            state.epoch += 1;
            state.connection.take()
        } else {
            None
        }
    };
    if let Some(connection) = teardown {
        tracing::trace!("state stream torn down");
        drop(connection);
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for StateStream<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.shared.state.borrow();
        f.debug_struct("StateStream")
            .field("latest", &state.latest)
            .field("subscribers", &state.subscribers.len())
            .field("connected", &state.connection.is_some())
            .finish()
    }
}

/// Push side of one connection of a [`StateStream`].
pub struct Emitter<T> {
    shared: Weak<StreamShared<T>>,
    epoch: u64,
}

impl<T> Clone for Emitter<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Weak::clone(&self.shared),
            epoch: self.epoch,
        }
    }
}

impl<T: Clone + 'static> Emitter<T> {
    /// Store `value` for replay and deliver it to every current subscriber.
    pub fn emit(&self, value: T) {
        let Some(shared) = self.shared.upgrade() else {
            return;
        };
        let callbacks: Vec<Callback<T>> = {
            let mut state = shared.state.borrow_mut();
            if state.epoch != self.epoch {
                return;
            }
            state.latest = Some(value.clone());
            state
                .subscribers
                .iter()
                .map(|(_, callback)| Rc::clone(callback))
                .collect()
        };
        for callback in callbacks {
            callback(&value);
        }
    }

    /// Whether the connection this emitter belongs to is still live.
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.shared
            .upgrade()
            .is_some_and(|shared| shared.state.borrow().epoch == self.epoch)
    }
}

impl<T> std::fmt::Debug for Emitter<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Emitter").field("epoch", &self.epoch).finish()
    }
}
