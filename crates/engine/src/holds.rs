//! Per-key index of Active reservation ids.
//!
//! Sections on one stock key read that key's holds through here instead of
//! scanning the whole reservation store. The store stays the source of truth:
//! a key's set is seeded from one store scan the first time it is touched, and
//! every later change happens inside the ledger section of that key.
//!
//! Lock order: ledger key lock, then an index slot, then the entity store.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, RwLock};

use tracing::debug;

use stockpilot_core::{EngineError, EngineResult, ReservationId};
use stockpilot_inventory::{Reservation, ReservationStatus, StockKey};

use crate::store::EntityStore;

type Slot = Arc<Mutex<Option<BTreeSet<ReservationId>>>>;

pub struct ActiveHolds {
    keys: RwLock<HashMap<StockKey, Slot>>,
    store: Arc<dyn EntityStore<Reservation>>,
}

impl core::fmt::Debug for ActiveHolds {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let keys = self.keys.read().map(|m| m.len()).unwrap_or(0);
        f.debug_struct("ActiveHolds").field("keys", &keys).finish()
    }
}

impl ActiveHolds {
    pub fn new(store: Arc<dyn EntityStore<Reservation>>) -> Self {
        Self {
            keys: RwLock::new(HashMap::new()),
            store,
        }
    }

    /// Active reservations on `key`, as currently stored.
    pub fn holds(&self, key: StockKey) -> EngineResult<Vec<Reservation>> {
        let ids = self.with_ids(key, |ids| ids.iter().copied().collect::<Vec<_>>())?;
        let mut holds = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(reservation) = self.store.get(&id)? {
                if reservation.status() == ReservationStatus::Active {
                    holds.push(reservation);
                }
            }
        }
        Ok(holds)
    }

    /// Track a newly opened hold. Call inside the key's ledger section.
    pub(crate) fn insert(&self, key: StockKey, id: ReservationId) -> EngineResult<()> {
        self.with_ids(key, |ids| {
            ids.insert(id);
        })
    }

    /// Forget a hold that left Active. Call inside the key's ledger section.
    pub(crate) fn remove(&self, key: StockKey, id: ReservationId) -> EngineResult<()> {
        self.with_ids(key, |ids| {
            ids.remove(&id);
        })
    }

    fn with_ids<T>(
        &self,
        key: StockKey,
        f: impl FnOnce(&mut BTreeSet<ReservationId>) -> T,
    ) -> EngineResult<T> {
        let slot = self.slot(key)?;
        let mut guard = slot
            .lock()
            .map_err(|_| EngineError::poisoned(format!("active holds {key}")))?;
        if guard.is_none() {
            *guard = Some(self.seed(key)?);
        }
        Ok(f(guard.get_or_insert_with(BTreeSet::new)))
    }

    fn seed(&self, key: StockKey) -> EngineResult<BTreeSet<ReservationId>> {
        let ids: BTreeSet<_> = self
            .store
            .scan(&|r: &Reservation| {
                r.stock_key() == key && r.status() == ReservationStatus::Active
            })?
            .iter()
            .map(Reservation::id_typed)
            .collect();
        debug!(
            item_id = %key.item_id,
            warehouse_id = %key.warehouse_id,
            count = ids.len(),
            "seeded active holds"
        );
        Ok(ids)
    }

    fn slot(&self, key: StockKey) -> EngineResult<Slot> {
        {
            let map = self
                .keys
                .read()
                .map_err(|_| EngineError::poisoned("active holds index"))?;
            if let Some(slot) = map.get(&key) {
                return Ok(slot.clone());
            }
        }
        let mut map = self
            .keys
            .write()
            .map_err(|_| EngineError::poisoned("active holds index"))?;
        Ok(map.entry(key).or_default().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use stockpilot_core::{CustomerId, ItemId, OrderId, WarehouseId};
    use stockpilot_inventory::ReserveRequest;

    use crate::store::InMemoryEntityStore;

    fn open(key: StockKey, quantity: u64) -> Reservation {
        let request = ReserveRequest::new(
            key.item_id,
            key.warehouse_id,
            quantity,
            OrderId::new(),
            CustomerId::new(),
        );
        Reservation::open(ReservationId::new(), &request, Utc::now())
    }

    #[test]
    fn first_touch_picks_up_holds_already_in_the_store() {
        let store: Arc<InMemoryEntityStore<Reservation>> = Arc::new(InMemoryEntityStore::new());
        let key = StockKey::new(ItemId::new(), WarehouseId::new());
        let other = StockKey::new(key.item_id, WarehouseId::new());
        let held = open(key, 4);
        let mut closed = open(key, 9);
        closed.release("gone", Utc::now()).unwrap();
        store.insert(held.clone()).unwrap();
        store.insert(closed).unwrap();
        store.insert(open(other, 2)).unwrap();

        let index = ActiveHolds::new(store);
        let holds = index.holds(key).unwrap();
        assert_eq!(holds.len(), 1);
        assert_eq!(holds[0].id_typed(), held.id_typed());
    }

    #[test]
    fn removed_and_stale_ids_are_not_reported() {
        let store: Arc<InMemoryEntityStore<Reservation>> = Arc::new(InMemoryEntityStore::new());
        let key = StockKey::new(ItemId::new(), WarehouseId::new());
        let index = ActiveHolds::new(store.clone());

        let kept = open(key, 1);
        let dropped = open(key, 2);
        let stale = open(key, 3);
        for r in [&kept, &dropped, &stale] {
            store.insert(r.clone()).unwrap();
            index.insert(key, r.id_typed()).unwrap();
        }
        index.remove(key, dropped.id_typed()).unwrap();
        store
            .update(&stale.id_typed(), &mut |r: &mut Reservation| r.consume(Utc::now()))
            .unwrap();

        let ids: Vec<_> = index
            .holds(key)
            .unwrap()
            .iter()
            .map(Reservation::id_typed)
            .collect();
        assert_eq!(ids, vec![kept.id_typed()]);
    }
}
