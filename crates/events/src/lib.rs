//! Notification plumbing: the `Event` trait and a pub/sub bus abstraction.
//!
//! The ledger emits one notification per successful mutating call; external
//! observers (indexers, audit trails) consume them through an [`EventBus`].
//! Nothing in this crate is consumed by the ledger itself.

pub mod bus;
pub mod event;
pub mod in_memory_bus;

pub use bus::{EventBus, Subscription};
pub use event::Event;
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
