//! Application service wrapping the ledger aggregate.
//!
//! Grounds the hosting layer's contract: one call per operation, executed to
//! completion before the next (the service takes `&mut self` for mutations,
//! so exclusive ownership gives the no-interleaving guarantee). Each
//! committed event is published on the injected bus for external observers.

use chrono::Utc;

use circulate_core::{Aggregate, ItemId, LedgerId, LedgerResult, PrincipalId};
use circulate_events::{Event, EventBus};

use crate::ledger::{
    BorrowItem, LendingCommand, LendingEvent, LendingLedger, RegisterItem, ReturnItem,
};

/// Orchestrates handle → apply → publish for the lending ledger.
///
/// Commands are stamped with business time here, at the trusted boundary;
/// the aggregate itself never reads a clock. Publication happens after the
/// state change is committed: a publish failure is logged and does not fail
/// the call, since the ledger state is the source of truth and observers are
/// expected to be idempotent.
pub struct LendingService<B> {
    ledger: LendingLedger,
    bus: B,
}

impl<B> LendingService<B>
where
    B: EventBus<LendingEvent>,
{
    /// Create a service over a fresh ledger. `authority` is the caller
    /// identity permitted to register items, fixed for the ledger's lifetime.
    pub fn new(authority: PrincipalId, bus: B) -> Self {
        Self {
            ledger: LendingLedger::new(LedgerId::new(), authority),
            bus,
        }
    }

    /// Wrap an existing ledger (e.g. rehydrated by the hosting layer).
    pub fn with_ledger(ledger: LendingLedger, bus: B) -> Self {
        Self { ledger, bus }
    }

    pub fn ledger(&self) -> &LendingLedger {
        &self.ledger
    }

    pub fn register_item(
        &mut self,
        caller: PrincipalId,
        item_id: ItemId,
        copies: u32,
    ) -> LedgerResult<()> {
        self.execute(LendingCommand::RegisterItem(RegisterItem {
            caller,
            item_id,
            copies,
            occurred_at: Utc::now(),
        }))
    }

    pub fn borrow_item(&mut self, caller: PrincipalId, item_id: ItemId) -> LedgerResult<()> {
        self.execute(LendingCommand::BorrowItem(BorrowItem {
            caller,
            item_id,
            occurred_at: Utc::now(),
        }))
    }

    pub fn return_item(&mut self, caller: PrincipalId, item_id: ItemId) -> LedgerResult<()> {
        self.execute(LendingCommand::ReturnItem(ReturnItem {
            caller,
            item_id,
            occurred_at: Utc::now(),
        }))
    }

    pub fn available_items(&self) -> LedgerResult<Vec<ItemId>> {
        self.ledger.available_items()
    }

    pub fn borrowers(&self, item_id: ItemId) -> LedgerResult<Vec<PrincipalId>> {
        self.ledger.borrowers(item_id)
    }

    fn execute(&mut self, command: LendingCommand) -> LedgerResult<()> {
        let events = self.ledger.handle(&command)?;

        for event in &events {
            self.ledger.apply(event);
        }

        for event in events {
            let event_type = event.event_type();
            tracing::info!(
                ledger_id = %self.ledger.id_typed(),
                event_type,
                "ledger event committed"
            );
            if let Err(error) = self.bus.publish(event) {
                // State is already committed; observers rebuild from it.
                tracing::warn!(event_type, ?error, "notification publish failed");
            }
        }

        Ok(())
    }
}
