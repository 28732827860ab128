//! Event publishing/subscription abstraction (mechanics only).
//!
//! The bus distributes committed notifications to external observers. It is
//! intentionally lightweight and makes minimal assumptions:
//!
//! - **Transport-agnostic**: works with in-memory channels, message queues, etc.
//! - **At-least-once delivery**: events may be delivered multiple times;
//!   observers must be idempotent.
//! - **No persistence**: the bus distributes, it does not store. The ledger's
//!   state is the source of truth; a dropped notification can be rebuilt from it.
//! - **Broadcast semantics**: each subscriber gets a copy of every published event.

use std::sync::Arc;
use std::sync::mpsc::Receiver;
use std::time::Duration;

/// A subscription to an event stream.
///
/// Each subscription receives a copy of all events published to the bus after
/// the subscription was created. Subscriptions are designed for
/// single-threaded consumption; use one per consumer thread.
#[derive(Debug)]
pub struct Subscription<M> {
    receiver: Receiver<M>,
}

impl<M> Subscription<M> {
    pub fn new(receiver: Receiver<M>) -> Self {
        Self { receiver }
    }

    /// Block until the next message is available.
    pub fn recv(&self) -> Result<M, std::sync::mpsc::RecvError> {
        self.receiver.recv()
    }

    /// Try to receive a message without blocking.
    pub fn try_recv(&self) -> Result<M, std::sync::mpsc::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Block for up to `timeout` waiting for a message.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<M, std::sync::mpsc::RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }
}

/// Domain-agnostic event bus (pub/sub abstraction).
///
/// Sits between the ledger's application service and its observers:
///
/// ```text
/// Command → Ledger (validate + apply) → EventBus (publish) → Observers
/// ```
///
/// `publish()` can fail (bus full, transport error). Failures surface to the
/// caller, which may retry; since the ledger state is already committed,
/// republication is safe for idempotent observers.
pub trait EventBus<M>: Send + Sync {
    type Error: core::fmt::Debug + Send + Sync + 'static;

    fn publish(&self, message: M) -> Result<(), Self::Error>;

    fn subscribe(&self) -> Subscription<M>;
}

impl<M, B> EventBus<M> for Arc<B>
where
    B: EventBus<M> + ?Sized,
{
    type Error = B::Error;

    fn publish(&self, message: M) -> Result<(), Self::Error> {
        (**self).publish(message)
    }

    fn subscribe(&self) -> Subscription<M> {
        (**self).subscribe()
    }
}
