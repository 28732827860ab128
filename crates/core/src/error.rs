//! Ledger error model.

use thiserror::Error;

use crate::id::{ItemId, PrincipalId};

/// Result type used across the domain layer.
pub type LedgerResult<T> = Result<T, LedgerError>;

/// Rejection of a ledger call.
///
/// Every failure here is a rejected precondition: the call commits no effect
/// and leaves no partial state. The core performs no logging and no recovery;
/// the specific kind is surfaced to the caller unchanged, and the hosting
/// layer decides whether to retry or abort.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// Caller lacks the privilege required for the operation.
    #[error("unauthorized")]
    Unauthorized,

    /// Non-positive copy count supplied at registration.
    #[error("invalid copy count: {0}")]
    InvalidCopyCount(u32),

    /// Registration targets an identifier that already exists.
    #[error("item {0} already registered")]
    DuplicateItem(ItemId),

    /// Operation targets a non-existent identifier.
    #[error("item {0} not found")]
    ItemNotFound(ItemId),

    /// Borrow attempted with no free copies.
    #[error("no copies of item {0} available")]
    NoCopiesAvailable(ItemId),

    /// Borrow attempted by a caller already holding a copy of that item.
    #[error("item {item_id} already borrowed by {caller}")]
    AlreadyBorrowedByCaller { item_id: ItemId, caller: PrincipalId },

    /// Return attempted by a caller not currently holding that item.
    #[error("item {item_id} not borrowed by {caller}")]
    NotBorrowedByCaller { item_id: ItemId, caller: PrincipalId },

    /// No item has a free copy.
    #[error("no items available")]
    NoneAvailable,

    /// An identifier was invalid (e.g. parse failure at the boundary).
    #[error("invalid identifier: {0}")]
    InvalidId(String),
}

impl LedgerError {
    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }
}
