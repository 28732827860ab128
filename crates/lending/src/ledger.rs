use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use circulate_core::{
    Aggregate, AggregateRoot, ItemId, LedgerError, LedgerId, LedgerResult, PrincipalId,
};
use circulate_events::Event;

/// One registered item: a fixed copy count plus the callers currently holding
/// a copy.
///
/// The borrowed-copy count is derived from the borrower list, so the two can
/// never disagree. Total copies are immutable after registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemRecord {
    total_copies: u32,
    borrowers: Vec<PrincipalId>,
}

impl ItemRecord {
    fn new(total_copies: u32) -> Self {
        Self {
            total_copies,
            borrowers: Vec::new(),
        }
    }

    pub fn total_copies(&self) -> u32 {
        self.total_copies
    }

    pub fn borrowed_copies(&self) -> u32 {
        self.borrowers.len() as u32
    }

    pub fn has_free_copy(&self) -> bool {
        self.borrowed_copies() < self.total_copies
    }

    pub fn borrowers(&self) -> &[PrincipalId] {
        &self.borrowers
    }

    fn holds(&self, caller: PrincipalId) -> bool {
        self.borrowers.contains(&caller)
    }
}

/// Aggregate root: the inventory ledger.
///
/// Owns every item record plus the single authority identity fixed at
/// construction. Each command is validated in full against current state
/// before any event is emitted, so a rejected call mutates nothing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LendingLedger {
    id: LedgerId,
    authority: PrincipalId,
    records: HashMap<ItemId, ItemRecord>,
    /// Item ids in registration order; drives `available_items` enumeration.
    registration_order: Vec<ItemId>,
    version: u64,
}

impl LendingLedger {
    /// Create an empty ledger. The constructing caller becomes the immutable
    /// authority permitted to register items.
    pub fn new(id: LedgerId, authority: PrincipalId) -> Self {
        Self {
            id,
            authority,
            records: HashMap::new(),
            registration_order: Vec::new(),
            version: 0,
        }
    }

    pub fn id_typed(&self) -> LedgerId {
        self.id
    }

    pub fn authority(&self) -> PrincipalId {
        self.authority
    }

    pub fn record(&self, item_id: ItemId) -> Option<&ItemRecord> {
        self.records.get(&item_id)
    }

    pub fn item_count(&self) -> usize {
        self.records.len()
    }

    /// Every item with at least one free copy, in registration order.
    ///
    /// Registration order is a documented contract, not an iteration
    /// accident. An empty result is reported as [`LedgerError::NoneAvailable`]
    /// rather than an empty sequence; consumers branch on it.
    pub fn available_items(&self) -> LedgerResult<Vec<ItemId>> {
        let available: Vec<ItemId> = self
            .registration_order
            .iter()
            .copied()
            .filter(|id| {
                self.records
                    .get(id)
                    .is_some_and(ItemRecord::has_free_copy)
            })
            .collect();

        if available.is_empty() {
            return Err(LedgerError::NoneAvailable);
        }
        Ok(available)
    }

    /// Current borrowers of an item (owned copy, not a live view).
    pub fn borrowers(&self, item_id: ItemId) -> LedgerResult<Vec<PrincipalId>> {
        self.records
            .get(&item_id)
            .map(|record| record.borrowers.clone())
            .ok_or(LedgerError::ItemNotFound(item_id))
    }
}

impl AggregateRoot for LendingLedger {
    type Id = LedgerId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: RegisterItem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterItem {
    pub caller: PrincipalId,
    pub item_id: ItemId,
    pub copies: u32,
    pub occurred_at: DateTime<Utc>,
}

/// Command: BorrowItem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BorrowItem {
    pub caller: PrincipalId,
    pub item_id: ItemId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ReturnItem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReturnItem {
    pub caller: PrincipalId,
    pub item_id: ItemId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LendingCommand {
    RegisterItem(RegisterItem),
    BorrowItem(BorrowItem),
    ReturnItem(ReturnItem),
}

/// Event: ItemRegistered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemRegistered {
    pub item_id: ItemId,
    pub copies: u32,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ItemBorrowed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemBorrowed {
    pub item_id: ItemId,
    pub borrower: PrincipalId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ItemReturned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemReturned {
    pub item_id: ItemId,
    pub borrower: PrincipalId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LendingEvent {
    ItemRegistered(ItemRegistered),
    ItemBorrowed(ItemBorrowed),
    ItemReturned(ItemReturned),
}

impl Event for LendingEvent {
    fn event_type(&self) -> &'static str {
        match self {
            LendingEvent::ItemRegistered(_) => "lending.item.registered",
            LendingEvent::ItemBorrowed(_) => "lending.item.borrowed",
            LendingEvent::ItemReturned(_) => "lending.item.returned",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            LendingEvent::ItemRegistered(e) => e.occurred_at,
            LendingEvent::ItemBorrowed(e) => e.occurred_at,
            LendingEvent::ItemReturned(e) => e.occurred_at,
        }
    }
}

impl Aggregate for LendingLedger {
    type Command = LendingCommand;
    type Event = LendingEvent;
    type Error = LedgerError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            LendingEvent::ItemRegistered(e) => {
                self.records.insert(e.item_id, ItemRecord::new(e.copies));
                self.registration_order.push(e.item_id);
            }
            LendingEvent::ItemBorrowed(e) => {
                if let Some(record) = self.records.get_mut(&e.item_id) {
                    record.borrowers.push(e.borrower);
                }
            }
            LendingEvent::ItemReturned(e) => {
                if let Some(record) = self.records.get_mut(&e.item_id) {
                    // Remaining order after removal is not part of the contract.
                    if let Some(pos) = record.borrowers.iter().position(|b| *b == e.borrower) {
                        record.borrowers.swap_remove(pos);
                    }
                }
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            LendingCommand::RegisterItem(cmd) => self.handle_register(cmd),
            LendingCommand::BorrowItem(cmd) => self.handle_borrow(cmd),
            LendingCommand::ReturnItem(cmd) => self.handle_return(cmd),
        }
    }
}

impl LendingLedger {
    fn handle_register(&self, cmd: &RegisterItem) -> Result<Vec<LendingEvent>, LedgerError> {
        if cmd.caller != self.authority {
            return Err(LedgerError::Unauthorized);
        }
        if cmd.copies == 0 {
            return Err(LedgerError::InvalidCopyCount(cmd.copies));
        }
        if self.records.contains_key(&cmd.item_id) {
            return Err(LedgerError::DuplicateItem(cmd.item_id));
        }

        Ok(vec![LendingEvent::ItemRegistered(ItemRegistered {
            item_id: cmd.item_id,
            copies: cmd.copies,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_borrow(&self, cmd: &BorrowItem) -> Result<Vec<LendingEvent>, LedgerError> {
        let record = self
            .records
            .get(&cmd.item_id)
            .ok_or(LedgerError::ItemNotFound(cmd.item_id))?;

        if !record.has_free_copy() {
            return Err(LedgerError::NoCopiesAvailable(cmd.item_id));
        }
        if record.holds(cmd.caller) {
            return Err(LedgerError::AlreadyBorrowedByCaller {
                item_id: cmd.item_id,
                caller: cmd.caller,
            });
        }

        Ok(vec![LendingEvent::ItemBorrowed(ItemBorrowed {
            item_id: cmd.item_id,
            borrower: cmd.caller,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_return(&self, cmd: &ReturnItem) -> Result<Vec<LendingEvent>, LedgerError> {
        let record = self
            .records
            .get(&cmd.item_id)
            .ok_or(LedgerError::ItemNotFound(cmd.item_id))?;

        if !record.holds(cmd.caller) {
            return Err(LedgerError::NotBorrowedByCaller {
                item_id: cmd.item_id,
                caller: cmd.caller,
            });
        }

        Ok(vec![LendingEvent::ItemReturned(ItemReturned {
            item_id: cmd.item_id,
            borrower: cmd.caller,
            occurred_at: cmd.occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn test_ledger(authority: PrincipalId) -> LendingLedger {
        LendingLedger::new(LedgerId::new(), authority)
    }

    fn test_time() -> DateTime<Utc> {
        Utc::now()
    }

    /// Run a command through handle + apply, returning the emitted events.
    fn execute(
        ledger: &mut LendingLedger,
        command: LendingCommand,
    ) -> Result<Vec<LendingEvent>, LedgerError> {
        let events = ledger.handle(&command)?;
        for event in &events {
            ledger.apply(event);
        }
        Ok(events)
    }

    fn register(
        ledger: &mut LendingLedger,
        caller: PrincipalId,
        item_id: u64,
        copies: u32,
    ) -> Result<Vec<LendingEvent>, LedgerError> {
        execute(
            ledger,
            LendingCommand::RegisterItem(RegisterItem {
                caller,
                item_id: ItemId::new(item_id),
                copies,
                occurred_at: test_time(),
            }),
        )
    }

    fn borrow(
        ledger: &mut LendingLedger,
        caller: PrincipalId,
        item_id: u64,
    ) -> Result<Vec<LendingEvent>, LedgerError> {
        execute(
            ledger,
            LendingCommand::BorrowItem(BorrowItem {
                caller,
                item_id: ItemId::new(item_id),
                occurred_at: test_time(),
            }),
        )
    }

    fn give_back(
        ledger: &mut LendingLedger,
        caller: PrincipalId,
        item_id: u64,
    ) -> Result<Vec<LendingEvent>, LedgerError> {
        execute(
            ledger,
            LendingCommand::ReturnItem(ReturnItem {
                caller,
                item_id: ItemId::new(item_id),
                occurred_at: test_time(),
            }),
        )
    }

    /// Assert the record-level invariants on every item.
    fn assert_invariants(ledger: &LendingLedger) {
        for id in &ledger.registration_order {
            let record = ledger.record(*id).expect("registered item must exist");
            assert!(record.total_copies() >= 1);
            assert!(record.borrowed_copies() <= record.total_copies());
            assert_eq!(record.borrowers().len() as u32, record.borrowed_copies());

            let mut seen = record.borrowers().to_vec();
            seen.sort_unstable_by_key(|p| *p.as_uuid());
            seen.dedup();
            assert_eq!(seen.len(), record.borrowers().len(), "double-borrow stored");
        }
        assert_eq!(ledger.registration_order.len(), ledger.item_count());
    }

    #[test]
    fn register_creates_record_and_emits_event() {
        let authority = PrincipalId::new();
        let mut ledger = test_ledger(authority);

        let events = register(&mut ledger, authority, 5000, 5).unwrap();
        assert_eq!(events.len(), 1);
        match &events[0] {
            LendingEvent::ItemRegistered(e) => {
                assert_eq!(e.item_id, ItemId::new(5000));
                assert_eq!(e.copies, 5);
            }
            other => panic!("expected ItemRegistered, got {other:?}"),
        }

        let record = ledger.record(ItemId::new(5000)).unwrap();
        assert_eq!(record.total_copies(), 5);
        assert_eq!(record.borrowed_copies(), 0);
        assert!(record.borrowers().is_empty());
    }

    #[test]
    fn register_by_non_authority_is_unauthorized() {
        let authority = PrincipalId::new();
        let stranger = PrincipalId::new();
        let mut ledger = test_ledger(authority);

        let err = register(&mut ledger, stranger, 10, 10).unwrap_err();
        assert_eq!(err, LedgerError::Unauthorized);
        assert!(ledger.record(ItemId::new(10)).is_none());
    }

    #[test]
    fn register_with_zero_copies_is_rejected() {
        let authority = PrincipalId::new();
        let mut ledger = test_ledger(authority);

        let err = register(&mut ledger, authority, 10, 0).unwrap_err();
        assert_eq!(err, LedgerError::InvalidCopyCount(0));
        assert!(ledger.record(ItemId::new(10)).is_none());
    }

    #[test]
    fn duplicate_registration_is_rejected_and_state_unchanged() {
        let authority = PrincipalId::new();
        let mut ledger = test_ledger(authority);

        register(&mut ledger, authority, 1000, 1).unwrap();
        let before = ledger.clone();

        let err = register(&mut ledger, authority, 1000, 10).unwrap_err();
        assert_eq!(err, LedgerError::DuplicateItem(ItemId::new(1000)));
        assert_eq!(ledger, before);
    }

    #[test]
    fn borrow_unknown_item_is_not_found() {
        let authority = PrincipalId::new();
        let mut ledger = test_ledger(authority);

        let err = borrow(&mut ledger, PrincipalId::new(), 9000).unwrap_err();
        assert_eq!(err, LedgerError::ItemNotFound(ItemId::new(9000)));
    }

    #[test]
    fn all_copies_can_be_borrowed_then_next_caller_is_rejected() {
        let authority = PrincipalId::new();
        let mut ledger = test_ledger(authority);
        let n = 7u32;
        register(&mut ledger, authority, 42, n).unwrap();

        for _ in 0..n {
            borrow(&mut ledger, PrincipalId::new(), 42).unwrap();
        }
        let record = ledger.record(ItemId::new(42)).unwrap();
        assert_eq!(record.borrowed_copies(), n);

        let err = borrow(&mut ledger, PrincipalId::new(), 42).unwrap_err();
        assert_eq!(err, LedgerError::NoCopiesAvailable(ItemId::new(42)));
        assert_eq!(
            ledger.record(ItemId::new(42)).unwrap().borrowed_copies(),
            n
        );
    }

    #[test]
    fn double_borrow_by_same_caller_is_rejected() {
        let authority = PrincipalId::new();
        let patron = PrincipalId::new();
        let mut ledger = test_ledger(authority);
        register(&mut ledger, authority, 7, 3).unwrap();

        borrow(&mut ledger, patron, 7).unwrap();
        let err = borrow(&mut ledger, patron, 7).unwrap_err();
        assert_eq!(
            err,
            LedgerError::AlreadyBorrowedByCaller {
                item_id: ItemId::new(7),
                caller: patron,
            }
        );
        assert_eq!(ledger.record(ItemId::new(7)).unwrap().borrowed_copies(), 1);
    }

    #[test]
    fn return_restores_availability_and_second_return_is_rejected() {
        let authority = PrincipalId::new();
        let patron = PrincipalId::new();
        let mut ledger = test_ledger(authority);
        register(&mut ledger, authority, 7, 1).unwrap();

        borrow(&mut ledger, patron, 7).unwrap();
        assert_eq!(ledger.record(ItemId::new(7)).unwrap().borrowed_copies(), 1);

        let events = give_back(&mut ledger, patron, 7).unwrap();
        match &events[0] {
            LendingEvent::ItemReturned(e) => {
                assert_eq!(e.borrower, patron);
                assert_eq!(e.item_id, ItemId::new(7));
            }
            other => panic!("expected ItemReturned, got {other:?}"),
        }
        let record = ledger.record(ItemId::new(7)).unwrap();
        assert_eq!(record.borrowed_copies(), 0);
        assert!(!record.holds(patron));

        let err = give_back(&mut ledger, patron, 7).unwrap_err();
        assert_eq!(
            err,
            LedgerError::NotBorrowedByCaller {
                item_id: ItemId::new(7),
                caller: patron,
            }
        );
    }

    #[test]
    fn return_of_unknown_item_is_not_found() {
        let authority = PrincipalId::new();
        let mut ledger = test_ledger(authority);

        let err = give_back(&mut ledger, PrincipalId::new(), 1).unwrap_err();
        assert_eq!(err, LedgerError::ItemNotFound(ItemId::new(1)));
    }

    #[test]
    fn available_items_filters_fully_borrowed_and_keeps_registration_order() {
        let authority = PrincipalId::new();
        let patron = PrincipalId::new();
        let mut ledger = test_ledger(authority);

        // Registered out of key order on purpose.
        register(&mut ledger, authority, 3000, 3).unwrap();
        register(&mut ledger, authority, 1000, 1).unwrap();
        register(&mut ledger, authority, 2000, 2).unwrap();

        // 1000 fully borrowed, 3000 partially borrowed, 2000 untouched.
        borrow(&mut ledger, patron, 1000).unwrap();
        borrow(&mut ledger, patron, 3000).unwrap();

        let available = ledger.available_items().unwrap();
        assert_eq!(available, vec![ItemId::new(3000), ItemId::new(2000)]);
    }

    #[test]
    fn available_items_on_empty_ledger_is_none_available() {
        let ledger = test_ledger(PrincipalId::new());
        assert_eq!(ledger.available_items().unwrap_err(), LedgerError::NoneAvailable);
    }

    #[test]
    fn available_items_when_everything_is_borrowed_is_none_available() {
        let authority = PrincipalId::new();
        let mut ledger = test_ledger(authority);
        register(&mut ledger, authority, 1, 1).unwrap();
        register(&mut ledger, authority, 2, 2).unwrap();

        borrow(&mut ledger, PrincipalId::new(), 1).unwrap();
        borrow(&mut ledger, PrincipalId::new(), 2).unwrap();
        borrow(&mut ledger, PrincipalId::new(), 2).unwrap();

        assert_eq!(ledger.available_items().unwrap_err(), LedgerError::NoneAvailable);
    }

    #[test]
    fn borrowers_returns_a_copy_not_a_live_view() {
        let authority = PrincipalId::new();
        let patron = PrincipalId::new();
        let mut ledger = test_ledger(authority);
        register(&mut ledger, authority, 9, 2).unwrap();
        borrow(&mut ledger, patron, 9).unwrap();

        let snapshot = ledger.borrowers(ItemId::new(9)).unwrap();
        assert_eq!(snapshot, vec![patron]);

        give_back(&mut ledger, patron, 9).unwrap();
        // The earlier snapshot is unaffected by the mutation.
        assert_eq!(snapshot, vec![patron]);
        assert!(ledger.borrowers(ItemId::new(9)).unwrap().is_empty());
    }

    #[test]
    fn borrowers_of_unknown_item_is_not_found() {
        let ledger = test_ledger(PrincipalId::new());
        assert_eq!(
            ledger.borrowers(ItemId::new(9000)).unwrap_err(),
            LedgerError::ItemNotFound(ItemId::new(9000)),
        );
    }

    #[test]
    fn version_increments_once_per_applied_event() {
        let authority = PrincipalId::new();
        let patron = PrincipalId::new();
        let mut ledger = test_ledger(authority);
        assert_eq!(ledger.version(), 0);

        register(&mut ledger, authority, 1, 1).unwrap();
        borrow(&mut ledger, patron, 1).unwrap();
        give_back(&mut ledger, patron, 1).unwrap();
        assert_eq!(ledger.version(), 3);

        // Rejected commands do not advance the version.
        let _ = borrow(&mut ledger, patron, 999).unwrap_err();
        assert_eq!(ledger.version(), 3);
    }

    /// Scripted operation for the property test below.
    #[derive(Debug, Clone)]
    enum Op {
        Register { item: u64, copies: u32 },
        Borrow { item: u64, patron: usize },
        Return { item: u64, patron: usize },
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0u64..8, 0u32..4).prop_map(|(item, copies)| Op::Register { item, copies }),
            (0u64..8, 0usize..6).prop_map(|(item, patron)| Op::Borrow { item, patron }),
            (0u64..8, 0usize..6).prop_map(|(item, patron)| Op::Return { item, patron }),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: after any operation sequence (including rejected calls),
        /// every record satisfies the copy-count and borrower-set invariants,
        /// and a rejected call leaves the ledger exactly as it was.
        #[test]
        fn invariants_hold_under_arbitrary_operation_sequences(
            ops in prop::collection::vec(op_strategy(), 1..64)
        ) {
            let authority = PrincipalId::new();
            let patrons: Vec<PrincipalId> = (0..6).map(|_| PrincipalId::new()).collect();
            let mut ledger = test_ledger(authority);

            for op in ops {
                let before = ledger.clone();
                let result = match op {
                    Op::Register { item, copies } => {
                        register(&mut ledger, authority, item, copies)
                    }
                    Op::Borrow { item, patron } => {
                        borrow(&mut ledger, patrons[patron], item)
                    }
                    Op::Return { item, patron } => {
                        give_back(&mut ledger, patrons[patron], item)
                    }
                };

                if result.is_err() {
                    prop_assert_eq!(&ledger, &before);
                }
                assert_invariants(&ledger);
            }
        }
    }
}
