//! Discrepancy detection. Reports only; nothing here corrects the ledger.

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{info, warn};

use stockpilot_core::{Clock, EngineResult, ItemId, SnapshotId, WarehouseId};
use stockpilot_inventory::{
    DiscrepanciesDetected, Discrepancy, DiscrepancyKind, DiscrepancyReport, InventoryEvent,
    Snapshot, StockKey, TransferRequest, TransferStatus, compare_snapshots,
};

use crate::audit::AuditSink;
use crate::collaborators::{Catalog, ExpectedStockSource, require_item};
use crate::ledger::StockLedger;
use crate::reservations::ReservationManager;
use crate::store::EntityStore;

pub struct DiscrepancyDetector {
    ledger: Arc<StockLedger>,
    reservations: Arc<ReservationManager>,
    transfers: Arc<dyn EntityStore<TransferRequest>>,
    catalog: Arc<dyn Catalog>,
    audit: Arc<dyn AuditSink>,
    clock: Arc<dyn Clock>,
}

impl DiscrepancyDetector {
    pub fn new(
        ledger: Arc<StockLedger>,
        reservations: Arc<ReservationManager>,
        transfers: Arc<dyn EntityStore<TransferRequest>>,
        catalog: Arc<dyn Catalog>,
        audit: Arc<dyn AuditSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            ledger,
            reservations,
            transfers,
            catalog,
            audit,
            clock,
        }
    }

    /// Capture every record held in `warehouse_id` right now.
    pub fn create_snapshot(&self, warehouse_id: WarehouseId) -> EngineResult<Snapshot> {
        let records = self.ledger.records_for_warehouse(warehouse_id)?;
        let snapshot = Snapshot::capture(SnapshotId::new(), warehouse_id, self.clock.now(), records);
        info!(
            snapshot_id = %snapshot.id(),
            warehouse_id = %warehouse_id,
            items = snapshot.lines().len(),
            "snapshot created"
        );
        Ok(snapshot)
    }

    /// Per-item on-hand differences between two snapshots (`a` expected, `b` actual).
    pub fn compare_snapshots(&self, a: &Snapshot, b: &Snapshot) -> DiscrepancyReport {
        let report = compare_snapshots(a, b);
        if !report.is_clean() {
            self.publish(&report, None, vec![a.id(), b.id()]);
        }
        report
    }

    /// Ledger on-hand against an external "should equal" source.
    ///
    /// With `warehouses` unset, every warehouse that stocks the item is checked.
    /// Pairs the source has no figure for are skipped.
    pub fn detect_synchronization_discrepancies(
        &self,
        item_id: ItemId,
        warehouses: Option<&[WarehouseId]>,
        source: &dyn ExpectedStockSource,
    ) -> EngineResult<DiscrepancyReport> {
        require_item(self.catalog.as_ref(), item_id)?;
        let now = self.clock.now();

        let warehouse_ids: BTreeSet<WarehouseId> = match warehouses {
            Some(ids) => ids.iter().copied().collect(),
            None => self.ledger.warehouses_for_item(item_id)?.into_iter().collect(),
        };

        let mut discrepancies = Vec::new();
        for warehouse_id in warehouse_ids {
            let Some(expected) = source.expected_on_hand(StockKey::new(item_id, warehouse_id))? else {
                continue;
            };
            let actual = self.ledger.get(item_id, warehouse_id)?.on_hand();
            if expected != actual {
                discrepancies.push(Discrepancy::between(item_id, warehouse_id, expected, actual, now));
            }
        }

        let report = DiscrepancyReport::new(DiscrepancyKind::Synchronization, now, discrepancies);
        if !report.is_clean() {
            self.publish(&report, Some(item_id), Vec::new());
        }
        Ok(report)
    }

    /// Ledger `reserved` against the holds that should explain it: stored
    /// Active reservations plus approved transfers not yet shipped.
    ///
    /// `expected` is what the holds add up to; `actual` is the ledger figure.
    pub fn detect_reservation_drift(&self, item_id: ItemId) -> EngineResult<DiscrepancyReport> {
        require_item(self.catalog.as_ref(), item_id)?;
        let now = self.clock.now();

        let approved = self.transfers.scan(&|t: &TransferRequest| {
            t.item_id() == item_id && t.status() == TransferStatus::Approved
        })?;

        let mut warehouse_ids: BTreeSet<WarehouseId> =
            self.ledger.warehouses_for_item(item_id)?.into_iter().collect();
        warehouse_ids.extend(approved.iter().map(TransferRequest::source_warehouse_id));

        let mut discrepancies = Vec::new();
        for warehouse_id in warehouse_ids {
            let key = StockKey::new(item_id, warehouse_id);
            let transfer_holds: u64 = approved
                .iter()
                .filter(|t| t.source_warehouse_id() == warehouse_id)
                .map(TransferRequest::quantity)
                .sum();
            let expected = self.reservations.held_quantity(key)? + transfer_holds;
            let actual = self.ledger.get(item_id, warehouse_id)?.reserved();
            if expected != actual {
                warn!(
                    item_id = %item_id,
                    warehouse_id = %warehouse_id,
                    holds = expected,
                    reserved = actual,
                    "reserved stock does not match outstanding holds"
                );
                discrepancies.push(Discrepancy::between(item_id, warehouse_id, expected, actual, now));
            }
        }

        let report = DiscrepancyReport::new(DiscrepancyKind::ReservationDrift, now, discrepancies);
        if !report.is_clean() {
            self.publish(&report, Some(item_id), Vec::new());
        }
        Ok(report)
    }

    fn publish(&self, report: &DiscrepancyReport, item_id: Option<ItemId>, snapshot_ids: Vec<SnapshotId>) {
        info!(
            kind = ?report.kind(),
            count = report.len(),
            "discrepancies detected"
        );
        self.audit
            .record(InventoryEvent::DiscrepanciesDetected(DiscrepanciesDetected {
                kind: report.kind(),
                item_id,
                snapshot_ids,
                count: report.len(),
                occurred_at: report.generated_at(),
            }));
    }
}
