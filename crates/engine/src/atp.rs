//! Available-to-promise reads.
//!
//! ATP is derived from the ledger at read time. Holds that are past their
//! expiry but not yet swept are already excluded here.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use stockpilot_core::{Clock, EngineResult, ItemId, WarehouseId};
use stockpilot_inventory::{
    AtpQueryResult, AtpResult, MultiWarehouseAtp, Reservation, StockKey, StockRecord,
};

use crate::collaborators::{Catalog, WarehouseDirectory, require_item};
use crate::holds::ActiveHolds;
use crate::ledger::StockLedger;

pub struct AtpCalculator {
    ledger: Arc<StockLedger>,
    holds: Arc<ActiveHolds>,
    catalog: Arc<dyn Catalog>,
    warehouses: Arc<dyn WarehouseDirectory>,
    clock: Arc<dyn Clock>,
}

impl AtpCalculator {
    pub fn new(
        ledger: Arc<StockLedger>,
        holds: Arc<ActiveHolds>,
        catalog: Arc<dyn Catalog>,
        warehouses: Arc<dyn WarehouseDirectory>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            ledger,
            holds,
            catalog,
            warehouses,
            clock,
        }
    }

    /// ATP for one warehouse. `NotFound` only when the catalog lacks the item;
    /// a warehouse that never stocked it reports zero.
    pub fn calculate_atp(&self, item_id: ItemId, warehouse_id: WarehouseId) -> EngineResult<AtpResult> {
        require_item(self.catalog.as_ref(), item_id)?;
        let record = self.ledger.get(item_id, warehouse_id)?;
        self.atp_of(&record, self.clock.now())
    }

    /// ATP summed over active warehouses that stock the item, largest first.
    pub fn calculate_multi_warehouse_atp(&self, item_id: ItemId) -> EngineResult<MultiWarehouseAtp> {
        require_item(self.catalog.as_ref(), item_id)?;
        let now = self.clock.now();

        let mut per_warehouse = Vec::new();
        for record in self.ledger.records_for_item(item_id)? {
            let active = self
                .warehouses
                .warehouse(record.warehouse_id())?
                .is_some_and(|w| w.active);
            if active {
                per_warehouse.push(self.atp_of(&record, now)?);
            }
        }
        Ok(MultiWarehouseAtp::from_warehouses(item_id, per_warehouse))
    }

    /// `calculate_atp(item, warehouse?)`: one warehouse when given, all otherwise.
    pub fn calculate(
        &self,
        item_id: ItemId,
        warehouse_id: Option<WarehouseId>,
    ) -> EngineResult<AtpQueryResult> {
        match warehouse_id {
            Some(warehouse_id) => Ok(AtpQueryResult::Warehouse(
                self.calculate_atp(item_id, warehouse_id)?,
            )),
            None => Ok(AtpQueryResult::AllWarehouses(
                self.calculate_multi_warehouse_atp(item_id)?,
            )),
        }
    }

    fn atp_of(&self, record: &StockRecord, now: DateTime<Utc>) -> EngineResult<AtpResult> {
        let overdue = overdue_quantity(&self.holds, record.key(), now)?;
        let reserved = record.reserved().saturating_sub(overdue);
        Ok(AtpResult {
            item_id: record.item_id(),
            warehouse_id: record.warehouse_id(),
            on_hand: record.on_hand(),
            reserved,
            available: record.on_hand().saturating_sub(reserved),
        })
    }
}

/// Quantity still counted in `reserved` by holds that expired but were not swept.
pub(crate) fn overdue_quantity(
    holds: &ActiveHolds,
    key: StockKey,
    now: DateTime<Utc>,
) -> EngineResult<u64> {
    Ok(holds
        .holds(key)?
        .iter()
        .filter(|r| r.is_overdue(now))
        .map(Reservation::quantity)
        .sum())
}
