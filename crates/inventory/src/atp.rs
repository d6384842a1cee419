use serde::{Deserialize, Serialize};

use stockpilot_core::{ItemId, WarehouseId};

/// Available-to-promise for one item in one warehouse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AtpResult {
    pub item_id: ItemId,
    pub warehouse_id: WarehouseId,
    pub on_hand: u64,
    /// Quantity still held at read time (lazily expired holds excluded).
    pub reserved: u64,
    pub available: u64,
}

/// Available-to-promise summed across warehouses, largest first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultiWarehouseAtp {
    pub item_id: ItemId,
    pub total_available: u64,
    pub per_warehouse: Vec<AtpResult>,
}

impl MultiWarehouseAtp {
    /// Build from unordered per-warehouse figures; sorts by descending
    /// `available`, ties broken by warehouse id for a stable order.
    pub fn from_warehouses(item_id: ItemId, mut per_warehouse: Vec<AtpResult>) -> Self {
        per_warehouse.sort_by(|a, b| {
            b.available
                .cmp(&a.available)
                .then_with(|| a.warehouse_id.cmp(&b.warehouse_id))
        });
        let total_available = per_warehouse.iter().map(|w| w.available).sum();
        Self {
            item_id,
            total_available,
            per_warehouse,
        }
    }

    pub fn for_warehouse(&self, warehouse_id: WarehouseId) -> Option<&AtpResult> {
        self.per_warehouse
            .iter()
            .find(|w| w.warehouse_id == warehouse_id)
    }
}

/// Answer to `calculate_atp(item, warehouse?)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "scope", rename_all = "snake_case")]
pub enum AtpQueryResult {
    Warehouse(AtpResult),
    AllWarehouses(MultiWarehouseAtp),
}

impl AtpQueryResult {
    pub fn available(&self) -> u64 {
        match self {
            AtpQueryResult::Warehouse(w) => w.available,
            AtpQueryResult::AllWarehouses(all) => all.total_available,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn atp(item_id: ItemId, warehouse_id: WarehouseId, available: u64) -> AtpResult {
        AtpResult {
            item_id,
            warehouse_id,
            on_hand: available,
            reserved: 0,
            available,
        }
    }

    #[test]
    fn multi_warehouse_sorts_descending_and_sums() {
        let item = ItemId::new();
        let (w1, w2, w3) = (WarehouseId::new(), WarehouseId::new(), WarehouseId::new());

        let multi = MultiWarehouseAtp::from_warehouses(
            item,
            vec![atp(item, w1, 20), atp(item, w2, 50), atp(item, w3, 0)],
        );

        assert_eq!(multi.total_available, 70);
        let order: Vec<_> = multi.per_warehouse.iter().map(|w| w.warehouse_id).collect();
        assert_eq!(order, vec![w2, w1, w3]);
        assert_eq!(multi.for_warehouse(w1).map(|w| w.available), Some(20));
        assert_eq!(AtpQueryResult::AllWarehouses(multi).available(), 70);
    }
}
