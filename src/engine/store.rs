use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use chrono::NaiveDate;
use dashmap::DashMap;
use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};
use ulid::Ulid;

use crate::model::*;

use super::EngineError;

pub type LedgerKey = (Ulid, NaiveDate);
pub type SharedLedger = Arc<RwLock<DayLedger>>;

/// All bookings for one field on one date.
///
/// `success_slots` is the partial unique index: each slot maps to the single settled
/// booking that owns it. It is maintained by `apply` and guarded by `check_unique`.
#[derive(Debug)]
pub struct DayLedger {
    pub field_id: Ulid,
    pub date: NaiveDate,
    rows: BTreeMap<Ulid, Booking>,
    success_slots: HashMap<Minute, Ulid>,
}

impl DayLedger {
    pub fn new(field_id: Ulid, date: NaiveDate) -> Self {
        Self {
            field_id,
            date,
            rows: BTreeMap::new(),
            success_slots: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn get(&self, id: &Ulid) -> Option<&Booking> {
        self.rows.get(id)
    }

    pub fn rows(&self) -> impl Iterator<Item = &Booking> {
        self.rows.values()
    }

    pub fn overlapping<'a>(&'a self, slots: &'a Slots) -> impl Iterator<Item = &'a Booking> + 'a {
        self.rows.values().filter(move |b| b.slots.overlaps(slots))
    }

    pub fn success_owner(&self, slot: Minute) -> Option<Ulid> {
        self.success_slots.get(&slot).copied()
    }

    pub fn has_expired_pending(&self, now: Ms) -> bool {
        self.rows.values().any(|b| b.is_expired(now))
    }

    /// Reject a write set that would give any slot two settled owners.
    pub(super) fn check_unique(&self, staged: &[Booking]) -> Result<(), EngineError> {
        let staged_ids: HashSet<Ulid> = staged.iter().map(|b| b.id).collect();
        let mut claimed: HashMap<Minute, Ulid> = HashMap::new();
        for row in staged.iter().filter(|b| b.status == BookingStatus::Success) {
            for &slot in row.slots.as_slice() {
                if let Some(prev) = claimed.insert(slot, row.id)
                    && prev != row.id
                {
                    return Err(EngineError::ConstraintViolation { slot, owner: prev });
                }
                if let Some(owner) = self.success_owner(slot)
                    && owner != row.id
                    && !staged_ids.contains(&owner)
                {
                    return Err(EngineError::ConstraintViolation { slot, owner });
                }
            }
        }
        Ok(())
    }

    /// Install a row image, keeping the unique index in step.
    pub(super) fn apply(&mut self, row: Booking) {
        if let Some(old) = self.rows.get(&row.id)
            && old.status == BookingStatus::Success
        {
            for slot in old.slots.as_slice() {
                if self.success_slots.get(slot) == Some(&old.id) {
                    self.success_slots.remove(slot);
                }
            }
        }
        if row.status == BookingStatus::Success {
            for &slot in row.slots.as_slice() {
                self.success_slots.insert(slot, row.id);
            }
        }
        self.rows.insert(row.id, row);
    }
}

/// A write transaction on one day ledger.
///
/// Holds the ledger's exclusive lock until committed or dropped. Writes are staged
/// here and reach the ledger only through `Engine::commit`; dropping the handle
/// discards them.
pub struct Txn {
    gate: OwnedRwLockReadGuard<()>,
    guard: OwnedRwLockWriteGuard<DayLedger>,
    staged: Vec<Booking>,
}

impl Txn {
    pub(super) fn new(gate: OwnedRwLockReadGuard<()>, guard: OwnedRwLockWriteGuard<DayLedger>) -> Self {
        Self {
            gate,
            guard,
            staged: Vec::new(),
        }
    }

    pub fn field_id(&self) -> Ulid {
        self.guard.field_id
    }

    pub fn date(&self) -> NaiveDate {
        self.guard.date
    }

    /// Read a row as this transaction sees it.
    pub fn get(&self, id: &Ulid) -> Option<&Booking> {
        self.staged
            .iter()
            .find(|b| b.id == *id)
            .or_else(|| self.guard.get(id))
    }

    /// Every row sharing a slot with `slots`, staged images first-class.
    pub fn overlapping(&self, slots: &Slots) -> Vec<Booking> {
        let mut out: Vec<Booking> = self
            .guard
            .overlapping(slots)
            .filter(|b| !self.is_staged(&b.id))
            .cloned()
            .collect();
        out.extend(self.staged.iter().filter(|b| b.slots.overlaps(slots)).cloned());
        out
    }

    pub fn rows(&self) -> Vec<Booking> {
        let mut out: Vec<Booking> = self
            .guard
            .rows()
            .filter(|b| !self.is_staged(&b.id))
            .cloned()
            .collect();
        out.extend(self.staged.iter().cloned());
        out
    }

    /// Row count after commit.
    pub fn row_count(&self) -> usize {
        self.guard.len() + self.staged.iter().filter(|b| self.guard.get(&b.id).is_none()).count()
    }

    pub fn stage(&mut self, row: Booking) {
        match self.staged.iter_mut().find(|b| b.id == row.id) {
            Some(existing) => *existing = row,
            None => self.staged.push(row),
        }
    }

    fn is_staged(&self, id: &Ulid) -> bool {
        self.staged.iter().any(|b| b.id == *id)
    }

    pub(super) fn into_parts(self) -> (OwnedRwLockReadGuard<()>, OwnedRwLockWriteGuard<DayLedger>, Vec<Booking>) {
        (self.gate, self.guard, self.staged)
    }
}

/// Venue state: the field directory, the day ledgers, and the lookup indexes.
pub struct InMemoryStore {
    fields: DashMap<Ulid, FieldInfo>,
    ledgers: DashMap<LedgerKey, SharedLedger>,
    booking_index: DashMap<Ulid, LedgerKey>,
    order_index: DashMap<String, Ulid>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            fields: DashMap::new(),
            ledgers: DashMap::new(),
            booking_index: DashMap::new(),
            order_index: DashMap::new(),
        }
    }

    // ── Field directory ──────────────────────────────────────

    pub fn field(&self, id: &Ulid) -> Option<FieldInfo> {
        self.fields.get(id).map(|e| e.value().clone())
    }

    pub fn contains_field(&self, id: &Ulid) -> bool {
        self.fields.contains_key(id)
    }

    pub fn field_count(&self) -> usize {
        self.fields.len()
    }

    pub fn fields(&self) -> Vec<FieldInfo> {
        self.fields.iter().map(|e| e.value().clone()).collect()
    }

    pub fn insert_field(&self, field: FieldInfo) {
        self.fields.insert(field.id, field);
    }

    pub fn set_field_active(&self, id: &Ulid, active: bool) {
        if let Some(mut f) = self.fields.get_mut(id) {
            f.active = active;
        }
    }

    // ── Ledgers ──────────────────────────────────────────────

    pub fn ledger(&self, key: &LedgerKey) -> Option<SharedLedger> {
        self.ledgers.get(key).map(|e| e.value().clone())
    }

    pub fn ledger_or_create(&self, key: LedgerKey) -> SharedLedger {
        self.ledgers
            .entry(key)
            .or_insert_with(|| Arc::new(RwLock::new(DayLedger::new(key.0, key.1))))
            .value()
            .clone()
    }

    pub fn insert_ledger(&self, ledger: DayLedger) {
        self.ledgers
            .insert((ledger.field_id, ledger.date), Arc::new(RwLock::new(ledger)));
    }

    pub fn ledger_keys(&self) -> Vec<LedgerKey> {
        self.ledgers.iter().map(|e| *e.key()).collect()
    }

    // ── Indexes ──────────────────────────────────────────────

    pub fn locate_booking(&self, id: &Ulid) -> Option<LedgerKey> {
        self.booking_index.get(id).map(|e| *e.value())
    }

    pub fn booking_for_order(&self, order_id: &str) -> Option<Ulid> {
        self.order_index.get(order_id).map(|e| *e.value())
    }

    pub fn index_row(&self, row: &Booking) {
        self.booking_index.insert(row.id, (row.field_id, row.date));
        self.order_index.insert(row.order_id.clone(), row.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2099, 6, 1).unwrap()
    }

    fn row(field_id: Ulid, slots: &[Minute], status: BookingStatus) -> Booking {
        let id = Ulid::new();
        let slots = Slots::new(slots.iter().copied()).unwrap();
        Booking {
            id,
            field_id,
            user_id: Some("u".into()),
            date: date(),
            start_time: slots.first(),
            end_time: slots.last() + 60,
            total_price: 100,
            slots,
            status,
            expired_at: Some(i64::MAX),
            order_id: id.to_string(),
            transaction_id: None,
            payment_token: None,
            payment_time: None,
            manual_name: None,
            manual_contact: None,
            failure_reason: None,
            refund_review: false,
            created_at: 0,
            updated_at: 0,
        }
    }

    #[test]
    fn unique_index_follows_status() {
        let fid = Ulid::new();
        let mut ledger = DayLedger::new(fid, date());
        let mut a = row(fid, &[600, 660], BookingStatus::Success);
        ledger.apply(a.clone());
        assert_eq!(ledger.success_owner(600), Some(a.id));
        assert_eq!(ledger.success_owner(660), Some(a.id));

        a.status = BookingStatus::Failed;
        ledger.apply(a.clone());
        assert_eq!(ledger.success_owner(600), None);
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn unique_check_rejects_second_owner() {
        let fid = Ulid::new();
        let mut ledger = DayLedger::new(fid, date());
        let a = row(fid, &[600], BookingStatus::Success);
        ledger.apply(a.clone());

        let b = row(fid, &[540, 600], BookingStatus::Success);
        match ledger.check_unique(&[b]) {
            Err(EngineError::ConstraintViolation { slot, owner }) => {
                assert_eq!(slot, 600);
                assert_eq!(owner, a.id);
            }
            other => panic!("expected constraint violation, got {other:?}"),
        }
        // pending rows are outside the index
        let c = row(fid, &[600], BookingStatus::Pending);
        assert!(ledger.check_unique(&[c]).is_ok());
    }

    #[test]
    fn unique_check_allows_owner_handover_in_one_write_set() {
        let fid = Ulid::new();
        let mut ledger = DayLedger::new(fid, date());
        let mut a = row(fid, &[600], BookingStatus::Success);
        ledger.apply(a.clone());
        a.status = BookingStatus::Failed;
        let b = row(fid, &[600], BookingStatus::Success);
        assert!(ledger.check_unique(&[a, b]).is_ok());
    }

    #[test]
    fn unique_check_rejects_duplicates_within_write_set() {
        let fid = Ulid::new();
        let ledger = DayLedger::new(fid, date());
        let a = row(fid, &[600], BookingStatus::Success);
        let b = row(fid, &[600], BookingStatus::Success);
        assert!(ledger.check_unique(&[a, b]).is_err());
    }

    #[tokio::test]
    async fn txn_sees_its_own_writes() {
        let fid = Ulid::new();
        let ledger = Arc::new(RwLock::new(DayLedger::new(fid, date())));
        let existing = row(fid, &[600], BookingStatus::Pending);
        ledger.write().await.apply(existing.clone());

        let gate = Arc::new(RwLock::new(()));
        let mut txn = Txn::new(gate.read_owned().await, ledger.clone().write_owned().await);
        let mut changed = existing.clone();
        changed.status = BookingStatus::Failed;
        txn.stage(changed);
        txn.stage(row(fid, &[660], BookingStatus::Pending));

        assert_eq!(txn.get(&existing.id).unwrap().status, BookingStatus::Failed);
        assert_eq!(txn.row_count(), 2);
        let probe = Slots::new([600]).unwrap();
        let seen = txn.overlapping(&probe);
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].status, BookingStatus::Failed);

        // dropping is a rollback
        drop(txn);
        let guard = ledger.read().await;
        assert_eq!(guard.len(), 1);
        assert_eq!(guard.get(&existing.id).unwrap().status, BookingStatus::Pending);
    }
}
