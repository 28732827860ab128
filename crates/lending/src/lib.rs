//! Lending domain module (event-sourced).
//!
//! This crate contains the inventory ledger: business rules for registering
//! items, borrowing and returning copies, implemented purely as deterministic
//! domain logic (no IO, no HTTP, no storage). The [`service`] module wraps the
//! aggregate with notification publishing for hosting layers.

pub mod ledger;
pub mod service;

pub use ledger::{
    BorrowItem, ItemBorrowed, ItemRecord, ItemRegistered, ItemReturned, LendingCommand,
    LendingEvent, LendingLedger, RegisterItem, ReturnItem,
};
pub use service::LendingService;
