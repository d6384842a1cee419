//! Lookups the engine consumes from the surrounding application.
//!
//! The engine never persists catalog items or warehouses; it only asks
//! whether they exist (and, for warehouses, whether they are active).

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

use stockpilot_core::{EngineError, EngineResult, ItemId, WarehouseId};
use stockpilot_inventory::StockKey;

pub trait Catalog: Send + Sync {
    fn item_exists(&self, item_id: ItemId) -> EngineResult<bool>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WarehouseInfo {
    pub id: WarehouseId,
    pub name: String,
    pub active: bool,
}

pub trait WarehouseDirectory: Send + Sync {
    fn warehouse(&self, warehouse_id: WarehouseId) -> EngineResult<Option<WarehouseInfo>>;
}

/// External "should equal" on-hand figures used by synchronization checks.
pub trait ExpectedStockSource: Send + Sync {
    /// `None` means the source has no opinion about this pair.
    fn expected_on_hand(&self, key: StockKey) -> EngineResult<Option<u64>>;
}

impl ExpectedStockSource for HashMap<StockKey, u64> {
    fn expected_on_hand(&self, key: StockKey) -> EngineResult<Option<u64>> {
        Ok(self.get(&key).copied())
    }
}

pub(crate) fn require_item(catalog: &dyn Catalog, item_id: ItemId) -> EngineResult<()> {
    if catalog.item_exists(item_id)? {
        Ok(())
    } else {
        Err(EngineError::not_found("item", item_id))
    }
}

pub(crate) fn require_warehouse(
    directory: &dyn WarehouseDirectory,
    warehouse_id: WarehouseId,
) -> EngineResult<WarehouseInfo> {
    directory
        .warehouse(warehouse_id)?
        .ok_or_else(|| EngineError::not_found("warehouse", warehouse_id))
}

pub(crate) fn require_active_warehouse(
    directory: &dyn WarehouseDirectory,
    warehouse_id: WarehouseId,
) -> EngineResult<WarehouseInfo> {
    let info = require_warehouse(directory, warehouse_id)?;
    if !info.active {
        return Err(EngineError::validation(format!(
            "warehouse {} ({}) is inactive",
            info.name, info.id
        )));
    }
    Ok(info)
}

/// In-memory catalog for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryCatalog {
    items: RwLock<HashSet<ItemId>>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_items(items: impl IntoIterator<Item = ItemId>) -> Self {
        Self {
            items: RwLock::new(items.into_iter().collect()),
        }
    }

    pub fn add(&self, item_id: ItemId) -> EngineResult<()> {
        self.items
            .write()
            .map_err(|_| EngineError::poisoned("catalog"))?
            .insert(item_id);
        Ok(())
    }
}

impl Catalog for InMemoryCatalog {
    fn item_exists(&self, item_id: ItemId) -> EngineResult<bool> {
        Ok(self
            .items
            .read()
            .map_err(|_| EngineError::poisoned("catalog"))?
            .contains(&item_id))
    }
}

/// In-memory warehouse directory for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryWarehouseDirectory {
    warehouses: RwLock<HashMap<WarehouseId, WarehouseInfo>>,
}

impl InMemoryWarehouseDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a warehouse.
    pub fn upsert(&self, info: WarehouseInfo) -> EngineResult<()> {
        self.warehouses
            .write()
            .map_err(|_| EngineError::poisoned("warehouse directory"))?
            .insert(info.id, info);
        Ok(())
    }

    /// Register an active warehouse and return its id.
    pub fn add_active(&self, name: impl Into<String>) -> EngineResult<WarehouseId> {
        let id = WarehouseId::new();
        self.upsert(WarehouseInfo {
            id,
            name: name.into(),
            active: true,
        })?;
        Ok(id)
    }

    pub fn set_active(&self, warehouse_id: WarehouseId, active: bool) -> EngineResult<()> {
        let mut map = self
            .warehouses
            .write()
            .map_err(|_| EngineError::poisoned("warehouse directory"))?;
        let info = map
            .get_mut(&warehouse_id)
            .ok_or_else(|| EngineError::not_found("warehouse", warehouse_id))?;
        info.active = active;
        Ok(())
    }
}

impl WarehouseDirectory for InMemoryWarehouseDirectory {
    fn warehouse(&self, warehouse_id: WarehouseId) -> EngineResult<Option<WarehouseInfo>> {
        Ok(self
            .warehouses
            .read()
            .map_err(|_| EngineError::poisoned("warehouse directory"))?
            .get(&warehouse_id)
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_and_inactive_warehouses_are_rejected_differently() {
        let directory = InMemoryWarehouseDirectory::new();
        let id = directory.add_active("North").unwrap();
        assert!(require_active_warehouse(&directory, id).is_ok());

        directory.set_active(id, false).unwrap();
        assert!(matches!(
            require_active_warehouse(&directory, id),
            Err(EngineError::Validation(_))
        ));
        assert!(require_warehouse(&directory, id).is_ok());

        assert!(matches!(
            require_warehouse(&directory, WarehouseId::new()),
            Err(EngineError::NotFound { kind: "warehouse", .. })
        ));
    }

    #[test]
    fn catalog_knows_only_registered_items() {
        let known = ItemId::new();
        let catalog = InMemoryCatalog::with_items([known]);
        assert!(require_item(&catalog, known).is_ok());
        assert!(matches!(
            require_item(&catalog, ItemId::new()),
            Err(EngineError::NotFound { kind: "item", .. })
        ));
    }
}
