//! Stock ledger: the only mutable shared stock state.
//!
//! One mutex per `(item, warehouse)` key. The outer `RwLock` only guards key
//! registration, so mutations on different keys never contend.
//!
//! Lock order: a key lock may be held while touching an entity store, never
//! the reverse. A key lock is never held while publishing audit events.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, Utc};
use tracing::debug;

use stockpilot_core::{Clock, EngineError, EngineResult, ItemId, WarehouseId};
use stockpilot_inventory::{StockKey, StockRecord};

/// Working copy of one stock record inside a ledger critical section.
///
/// Every `apply` is validated immediately; the copy is written back only if
/// the whole section succeeds.
#[derive(Debug)]
pub struct StockCell {
    record: StockRecord,
    at: DateTime<Utc>,
}

impl StockCell {
    pub fn record(&self) -> &StockRecord {
        &self.record
    }

    /// The instant the section runs at (one reading of the ledger clock).
    pub fn at(&self) -> DateTime<Utc> {
        self.at
    }

    pub fn apply(&mut self, on_hand_delta: i64, reserved_delta: i64) -> EngineResult<&StockRecord> {
        self.record = self.record.apply(on_hand_delta, reserved_delta, self.at)?;
        Ok(&self.record)
    }
}

/// A quantity as a ledger delta.
pub(crate) fn signed(quantity: u64) -> EngineResult<i64> {
    i64::try_from(quantity)
        .map_err(|_| EngineError::validation(format!("quantity {quantity} is too large")))
}

pub struct StockLedger {
    records: RwLock<HashMap<StockKey, Arc<Mutex<StockRecord>>>>,
    clock: Arc<dyn Clock>,
}

impl core::fmt::Debug for StockLedger {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let keys = self.records.read().map(|m| m.len()).unwrap_or(0);
        f.debug_struct("StockLedger").field("keys", &keys).finish()
    }
}

impl StockLedger {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            clock,
        }
    }

    /// Current record, or a zero record if the pair never moved. Never registers a key.
    pub fn get(&self, item_id: ItemId, warehouse_id: WarehouseId) -> EngineResult<StockRecord> {
        let key = StockKey::new(item_id, warehouse_id);
        let slot = {
            let map = self
                .records
                .read()
                .map_err(|_| EngineError::poisoned("stock ledger index"))?;
            map.get(&key).cloned()
        };
        match slot {
            Some(slot) => {
                let record = slot
                    .lock()
                    .map_err(|_| EngineError::poisoned(format!("stock record {key}")))?;
                Ok(*record)
            }
            None => Ok(StockRecord::zero(key)),
        }
    }

    /// Apply both deltas atomically.
    pub fn adjust(
        &self,
        item_id: ItemId,
        warehouse_id: WarehouseId,
        on_hand_delta: i64,
        reserved_delta: i64,
    ) -> EngineResult<StockRecord> {
        self.adjust_with(item_id, warehouse_id, on_hand_delta, reserved_delta, |_, _| Ok(()))
    }

    /// Like [`adjust`](Self::adjust), but `guard(current, proposed)` runs under
    /// the key lock first; if it fails nothing is committed.
    pub fn adjust_with<G>(
        &self,
        item_id: ItemId,
        warehouse_id: WarehouseId,
        on_hand_delta: i64,
        reserved_delta: i64,
        guard: G,
    ) -> EngineResult<StockRecord>
    where
        G: FnOnce(&StockRecord, &StockRecord) -> EngineResult<()>,
    {
        let key = StockKey::new(item_id, warehouse_id);
        let (record, ()) = self.with_stock(key, |cell| {
            let current = *cell.record();
            let proposed = *cell.apply(on_hand_delta, reserved_delta)?;
            guard(&current, &proposed)
        })?;
        Ok(record)
    }

    /// Run `section` with exclusive access to one key.
    ///
    /// The section works on a copy; the copy is committed only when the section
    /// returns `Ok`. Returns the committed record alongside the section's value.
    pub fn with_stock<T, F>(&self, key: StockKey, section: F) -> EngineResult<(StockRecord, T)>
    where
        F: FnOnce(&mut StockCell) -> EngineResult<T>,
    {
        let slot = self.slot(key)?;
        let mut stored = slot
            .lock()
            .map_err(|_| EngineError::poisoned(format!("stock record {key}")))?;

        let before = *stored;
        let mut cell = StockCell {
            record: before,
            at: self.clock.now(),
        };
        let value = section(&mut cell)?;
        *stored = cell.record;

        if cell.record != before {
            debug!(
                item_id = %key.item_id,
                warehouse_id = %key.warehouse_id,
                on_hand = cell.record.on_hand(),
                reserved = cell.record.reserved(),
                previous_on_hand = before.on_hand(),
                previous_reserved = before.reserved(),
                "stock record updated"
            );
        }
        Ok((cell.record, value))
    }

    /// Records of `item_id` in every warehouse that ever stocked it.
    pub fn records_for_item(&self, item_id: ItemId) -> EngineResult<Vec<StockRecord>> {
        self.collect(|key| key.item_id == item_id)
    }

    pub fn warehouses_for_item(&self, item_id: ItemId) -> EngineResult<Vec<WarehouseId>> {
        Ok(self
            .records_for_item(item_id)?
            .into_iter()
            .map(|r| r.warehouse_id())
            .collect())
    }

    /// Every record held in `warehouse_id`, for snapshots.
    pub fn records_for_warehouse(&self, warehouse_id: WarehouseId) -> EngineResult<Vec<StockRecord>> {
        self.collect(|key| key.warehouse_id == warehouse_id)
    }

    fn slot(&self, key: StockKey) -> EngineResult<Arc<Mutex<StockRecord>>> {
        {
            let map = self
                .records
                .read()
                .map_err(|_| EngineError::poisoned("stock ledger index"))?;
            if let Some(slot) = map.get(&key) {
                return Ok(slot.clone());
            }
        }
        let mut map = self
            .records
            .write()
            .map_err(|_| EngineError::poisoned("stock ledger index"))?;
        Ok(map
            .entry(key)
            .or_insert_with(|| Arc::new(Mutex::new(StockRecord::zero(key))))
            .clone())
    }

    /// Records matching `wanted`, skipping slots that never committed a movement.
    fn collect(&self, wanted: impl Fn(&StockKey) -> bool) -> EngineResult<Vec<StockRecord>> {
        let slots: Vec<(StockKey, Arc<Mutex<StockRecord>>)> = {
            let map = self
                .records
                .read()
                .map_err(|_| EngineError::poisoned("stock ledger index"))?;
            map.iter()
                .filter(|(key, _)| wanted(key))
                .map(|(key, slot)| (*key, slot.clone()))
                .collect()
        };

        let mut records = Vec::with_capacity(slots.len());
        for (key, slot) in slots {
            let record = *slot
                .lock()
                .map_err(|_| EngineError::poisoned(format!("stock record {key}")))?;
            if record.last_movement_at().is_some() {
                records.push(record);
            }
        }
        records.sort_by_key(|r| r.key());
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use stockpilot_core::SystemClock;

    fn ledger() -> StockLedger {
        StockLedger::new(Arc::new(SystemClock))
    }

    #[test]
    fn get_returns_zero_without_registering_the_key() {
        let ledger = ledger();
        let item = ItemId::new();
        let record = ledger.get(item, WarehouseId::new()).unwrap();
        assert_eq!(record.on_hand(), 0);
        assert!(ledger.records_for_item(item).unwrap().is_empty());
    }

    #[test]
    fn adjust_commits_both_deltas() {
        let ledger = ledger();
        let (item, wh) = (ItemId::new(), WarehouseId::new());
        ledger.adjust(item, wh, 100, 0).unwrap();
        let record = ledger.adjust(item, wh, 0, 30).unwrap();
        assert_eq!((record.on_hand(), record.reserved(), record.available()), (100, 30, 70));
        assert_eq!(ledger.get(item, wh).unwrap(), record);
        assert!(record.last_movement_at().is_some());
    }

    #[test]
    fn rejected_adjustment_leaves_the_record_unchanged() {
        let ledger = ledger();
        let (item, wh) = (ItemId::new(), WarehouseId::new());
        ledger.adjust(item, wh, 10, 5).unwrap();

        let err = ledger.adjust(item, wh, -6, 0).unwrap_err();
        assert!(err.is_fatal());
        let record = ledger.get(item, wh).unwrap();
        assert_eq!((record.on_hand(), record.reserved()), (10, 5));
    }

    #[test]
    fn failing_guard_rolls_back() {
        let ledger = ledger();
        let (item, wh) = (ItemId::new(), WarehouseId::new());
        ledger.adjust(item, wh, 10, 0).unwrap();

        let err = ledger
            .adjust_with(item, wh, 0, 4, |current, proposed| {
                assert_eq!(current.reserved(), 0);
                assert_eq!(proposed.reserved(), 4);
                Err(EngineError::validation("no"))
            })
            .unwrap_err();
        assert_eq!(err, EngineError::validation("no"));
        assert_eq!(ledger.get(item, wh).unwrap().reserved(), 0);
    }

    #[test]
    fn untouched_slots_are_not_listed() {
        let ledger = ledger();
        let (item, wh) = (ItemId::new(), WarehouseId::new());
        let _ = ledger.adjust(item, wh, -1, 0);
        assert!(ledger.warehouses_for_item(item).unwrap().is_empty());

        ledger.adjust(item, wh, 1, 0).unwrap();
        assert_eq!(ledger.warehouses_for_item(item).unwrap(), vec![wh]);
        assert_eq!(ledger.records_for_warehouse(wh).unwrap().len(), 1);
    }

    #[test]
    fn concurrent_adjustments_on_one_key_are_serialized() {
        let ledger = Arc::new(ledger());
        let (item, wh) = (ItemId::new(), WarehouseId::new());

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let ledger = ledger.clone();
                std::thread::spawn(move || {
                    for _ in 0..250 {
                        ledger.adjust(item, wh, 1, 0).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(ledger.get(item, wh).unwrap().on_hand(), 2000);
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 128,
            ..ProptestConfig::default()
        })]

        /// Property: the committed record always satisfies `reserved <= on_hand`
        /// and equals the running sum of accepted deltas.
        #[test]
        fn ledger_tracks_accepted_deltas(
            deltas in prop::collection::vec((-20i64..40i64, -20i64..20i64), 1..48)
        ) {
            let ledger = ledger();
            let (item, wh) = (ItemId::new(), WarehouseId::new());
            let (mut on_hand, mut reserved) = (0i64, 0i64);

            for (on_delta, res_delta) in deltas {
                if ledger.adjust(item, wh, on_delta, res_delta).is_ok() {
                    on_hand += on_delta;
                    reserved += res_delta;
                }
                let record = ledger.get(item, wh).unwrap();
                prop_assert!(record.reserved() <= record.on_hand());
                prop_assert_eq!(record.on_hand() as i64, on_hand);
                prop_assert_eq!(record.reserved() as i64, reserved);
            }
        }
    }
}
