#![forbid(unsafe_code)]

//! Single-threaded reactive primitives the bindings are built from.
//!
//! - [`Observable`]: a shared single-slot value with change notification.
//! - [`Subscription`]: RAII guard that releases on drop.
//! - [`StateStream`]: a lazily connected, replay-latest, reference-counted
//!   multicast stream.
//! - [`BatchScope`]: RAII guard that defers and coalesces notifications until
//!   the scope exits.
//! - [`SubscriptionScope`]: owner of a consumer's subscriptions.
//!
//! # Architecture
//!
//! Everything uses `Rc<RefCell<..>>`. No callback is ever invoked while a
//! `RefCell` borrow is held, so callbacks may freely re-enter the primitive
//! that called them.
//!
//! `BatchScope` uses a thread-local context. Nested scopes are supported;
//! only the outermost scope triggers a flush.
//!
//! # Invariants
//!
//! 1. An `Observable` notifies at most once per batch, however many writes
//!    the batch made; callbacks read the value current at flush time.
//! 2. `Observable::set` with a shallow-equal value is a no-op; `publish`
//!    always schedules a notification.
//! 3. Work queued under one key inside a batch runs once, in the position of
//!    its first scheduling.
//! 4. An `Emitter` belongs to one connection epoch of its `StateStream`;
//!    once that connection is torn down, its emissions are dropped.
//! 5. A batch that ends while the thread is unwinding discards its queue.

pub mod batch;
pub mod observable;
pub mod scope;
pub mod stream;

pub use batch::BatchScope;
pub use observable::{Observable, Subscription};
pub use scope::SubscriptionScope;
pub use stream::{Emitter, StateStream};
