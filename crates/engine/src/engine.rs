//! `InventoryEngine`: the operation-level facade over every component.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{error, info};

use stockpilot_core::{
    Clock, EngineError, EngineResult, ItemId, OrderId, ReservationId, SystemClock, TransferId,
    UserId, WarehouseId,
};
use stockpilot_inventory::{
    AdjustmentReason, AllocationRequest, AllocationResult, AtpQueryResult, DiscrepancyReport,
    InventoryEvent, RankingPolicy, Reservation, ReserveRequest, Snapshot, StockAdjusted, StockKey,
    StockRecord, TrackingUpdate, TransferDraft, TransferRequest, TransferStatus,
};

use crate::allocation::AllocationPlanner;
use crate::atp::AtpCalculator;
use crate::audit::{AuditSink, NoopAuditSink};
use crate::collaborators::{
    Catalog, ExpectedStockSource, WarehouseDirectory, require_item, require_warehouse,
};
use crate::config::EngineConfig;
use crate::discrepancy::DiscrepancyDetector;
use crate::holds::ActiveHolds;
use crate::ledger::StockLedger;
use crate::reservations::{CleanupReport, ReservationFilter, ReservationManager};
use crate::store::{EntityStore, InMemoryEntityStore};
use crate::sweeper::{ExpirySweeper, SweeperHandle};
use crate::transfers::TransferWorkflow;

/// Wires the engine from its collaborators. Unset parts get in-memory defaults.
pub struct InventoryEngineBuilder {
    catalog: Arc<dyn Catalog>,
    warehouses: Arc<dyn WarehouseDirectory>,
    config: EngineConfig,
    clock: Arc<dyn Clock>,
    audit: Arc<dyn AuditSink>,
    ranking: RankingPolicy,
    reservation_store: Option<Arc<dyn EntityStore<Reservation>>>,
    transfer_store: Option<Arc<dyn EntityStore<TransferRequest>>>,
}

impl InventoryEngineBuilder {
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    pub fn ranking(mut self, ranking: RankingPolicy) -> Self {
        self.ranking = ranking;
        self
    }

    pub fn reservation_store(mut self, store: Arc<dyn EntityStore<Reservation>>) -> Self {
        self.reservation_store = Some(store);
        self
    }

    pub fn transfer_store(mut self, store: Arc<dyn EntityStore<TransferRequest>>) -> Self {
        self.transfer_store = Some(store);
        self
    }

    pub fn build(self) -> InventoryEngine {
        let clock = self.clock;
        let ledger = Arc::new(StockLedger::new(clock.clone()));
        let reservation_store = self
            .reservation_store
            .unwrap_or_else(|| Arc::new(InMemoryEntityStore::<Reservation>::new()));
        let transfer_store = self
            .transfer_store
            .unwrap_or_else(|| Arc::new(InMemoryEntityStore::<TransferRequest>::new()));

        let holds = Arc::new(ActiveHolds::new(reservation_store.clone()));

        let atp = Arc::new(AtpCalculator::new(
            ledger.clone(),
            holds.clone(),
            self.catalog.clone(),
            self.warehouses.clone(),
            clock.clone(),
        ));
        let reservations = Arc::new(
            ReservationManager::new(
                ledger.clone(),
                reservation_store,
                holds,
                self.catalog.clone(),
                self.warehouses.clone(),
                self.audit.clone(),
                clock.clone(),
            )
            .with_sweep_batch_limit(self.config.sweep_batch_limit),
        );
        let allocation = AllocationPlanner::new(
            atp.clone(),
            reservations.clone(),
            self.audit.clone(),
            clock.clone(),
        )
        .with_policy(self.ranking)
        .with_default_hold_ttl(self.config.default_hold_ttl)
        .with_default_max_warehouses(self.config.default_max_warehouses);
        let transfers = TransferWorkflow::new(
            ledger.clone(),
            atp.clone(),
            reservations.clone(),
            transfer_store.clone(),
            self.catalog.clone(),
            self.warehouses.clone(),
            self.audit.clone(),
            clock.clone(),
        );
        let discrepancies = DiscrepancyDetector::new(
            ledger.clone(),
            reservations.clone(),
            transfer_store,
            self.catalog.clone(),
            self.audit.clone(),
            clock.clone(),
        );

        InventoryEngine {
            ledger,
            atp,
            reservations,
            allocation,
            transfers,
            discrepancies,
            catalog: self.catalog,
            warehouses: self.warehouses,
            audit: self.audit,
            config: self.config,
        }
    }
}

/// Inventory allocation and reservation engine.
///
/// `Send + Sync`; share it behind an `Arc` and call it from any thread.
pub struct InventoryEngine {
    ledger: Arc<StockLedger>,
    atp: Arc<AtpCalculator>,
    reservations: Arc<ReservationManager>,
    allocation: AllocationPlanner,
    transfers: TransferWorkflow,
    discrepancies: DiscrepancyDetector,
    catalog: Arc<dyn Catalog>,
    warehouses: Arc<dyn WarehouseDirectory>,
    audit: Arc<dyn AuditSink>,
    config: EngineConfig,
}

impl InventoryEngine {
    pub fn builder(
        catalog: Arc<dyn Catalog>,
        warehouses: Arc<dyn WarehouseDirectory>,
    ) -> InventoryEngineBuilder {
        InventoryEngineBuilder {
            catalog,
            warehouses,
            config: EngineConfig::default(),
            clock: Arc::new(SystemClock),
            audit: Arc::new(NoopAuditSink),
            ranking: RankingPolicy::standard(),
            reservation_store: None,
            transfer_store: None,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // Allocation and reservations

    pub fn allocate(&self, request: AllocationRequest) -> EngineResult<AllocationResult> {
        self.allocation.allocate(request)
    }

    pub fn reserve(&self, request: ReserveRequest) -> EngineResult<Reservation> {
        self.reservations.reserve(request)
    }

    pub fn release(&self, id: ReservationId, reason: &str) -> EngineResult<bool> {
        self.reservations.release(id, reason)
    }

    pub fn extend(&self, id: ReservationId, new_expires_at: DateTime<Utc>) -> EngineResult<bool> {
        self.reservations.extend(id, new_expires_at)
    }

    pub fn consume(&self, id: ReservationId) -> EngineResult<Reservation> {
        self.reservations.consume(id)
    }

    pub fn cleanup_expired(&self) -> EngineResult<CleanupReport> {
        self.reservations.cleanup_expired()
    }

    pub fn get_reservation(&self, id: ReservationId) -> EngineResult<Option<Reservation>> {
        self.reservations.get(id)
    }

    pub fn list_active_reservations(
        &self,
        filter: ReservationFilter,
    ) -> EngineResult<Vec<Reservation>> {
        self.reservations.list_active(filter)
    }

    pub fn release_order(&self, order_id: OrderId, reason: &str) -> EngineResult<usize> {
        self.reservations.release_order(order_id, reason)
    }

    /// Start the periodic expiry sweep at the configured interval.
    pub fn spawn_sweeper(&self) -> std::io::Result<SweeperHandle> {
        ExpirySweeper::spawn(self.reservations.clone(), self.config.sweep_interval)
    }

    // Stock

    pub fn calculate_atp(
        &self,
        item_id: ItemId,
        warehouse_id: Option<WarehouseId>,
    ) -> EngineResult<AtpQueryResult> {
        self.atp.calculate(item_id, warehouse_id)
    }

    /// Raw ledger record (reserved includes holds not yet swept).
    pub fn stock(&self, item_id: ItemId, warehouse_id: WarehouseId) -> EngineResult<StockRecord> {
        self.ledger.get(item_id, warehouse_id)
    }

    /// Operator adjustment of on-hand stock (receipts, counts, shrinkage).
    ///
    /// Overdue holds on the pair are reclaimed first so a shrink is judged
    /// against holds that still matter.
    pub fn adjust_stock(
        &self,
        item_id: ItemId,
        warehouse_id: WarehouseId,
        on_hand_delta: i64,
        reason: AdjustmentReason,
    ) -> EngineResult<StockRecord> {
        if on_hand_delta == 0 {
            return Err(EngineError::validation("adjustment delta cannot be zero"));
        }
        require_item(self.catalog.as_ref(), item_id)?;
        require_warehouse(self.warehouses.as_ref(), warehouse_id)?;

        let key = StockKey::new(item_id, warehouse_id);
        let outcome = self.ledger.with_stock(key, |cell| {
            let expired = self.reservations.reclaim_overdue(cell)?;
            cell.apply(on_hand_delta, 0)?;
            Ok(expired)
        });
        let (record, expired) = match outcome {
            Ok(done) => done,
            Err(err) => {
                if err.is_fatal() {
                    error!(
                        item_id = %item_id,
                        warehouse_id = %warehouse_id,
                        on_hand_delta,
                        reason = reason.as_str(),
                        error = %err,
                        "stock adjustment rejected"
                    );
                }
                return Err(err);
            }
        };
        self.reservations.publish_expired(&expired);

        info!(
            item_id = %item_id,
            warehouse_id = %warehouse_id,
            on_hand_delta,
            on_hand = record.on_hand(),
            reason = reason.as_str(),
            "stock adjusted"
        );
        self.audit.record(InventoryEvent::StockAdjusted(StockAdjusted {
            item_id,
            warehouse_id,
            on_hand_delta,
            reserved_delta: 0,
            on_hand: record.on_hand(),
            reserved: record.reserved(),
            reason,
            occurred_at: record.last_movement_at().unwrap_or_else(Utc::now),
        }));
        Ok(record)
    }

    // Transfers

    pub fn create_transfer_request(&self, draft: TransferDraft) -> EngineResult<TransferRequest> {
        self.transfers.create_transfer_request(draft)
    }

    pub fn approve_transfer(&self, id: TransferId, actor: UserId) -> EngineResult<TransferRequest> {
        self.transfers.approve_transfer(id, actor)
    }

    pub fn execute_transfer(&self, id: TransferId, actor: UserId) -> EngineResult<TransferRequest> {
        self.transfers.execute_transfer(id, actor)
    }

    pub fn update_transfer_tracking(
        &self,
        id: TransferId,
        update: TrackingUpdate,
        actor: UserId,
    ) -> EngineResult<TransferRequest> {
        self.transfers.update_transfer_tracking(id, update, actor)
    }

    pub fn complete_transfer(&self, id: TransferId, actor: UserId) -> EngineResult<TransferRequest> {
        self.transfers.complete_transfer(id, actor)
    }

    pub fn cancel_transfer(
        &self,
        id: TransferId,
        actor: UserId,
        reason: Option<String>,
    ) -> EngineResult<TransferRequest> {
        self.transfers.cancel_transfer(id, actor, reason)
    }

    pub fn get_transfer(&self, id: TransferId) -> EngineResult<Option<TransferRequest>> {
        self.transfers.get_transfer(id)
    }

    pub fn list_transfers(&self, status: Option<TransferStatus>) -> EngineResult<Vec<TransferRequest>> {
        self.transfers.list_transfers(status)
    }

    // Discrepancies

    pub fn create_snapshot(&self, warehouse_id: WarehouseId) -> EngineResult<Snapshot> {
        self.discrepancies.create_snapshot(warehouse_id)
    }

    pub fn compare_snapshots(&self, a: &Snapshot, b: &Snapshot) -> DiscrepancyReport {
        self.discrepancies.compare_snapshots(a, b)
    }

    pub fn detect_synchronization_discrepancies(
        &self,
        item_id: ItemId,
        warehouses: Option<&[WarehouseId]>,
        source: &dyn ExpectedStockSource,
    ) -> EngineResult<DiscrepancyReport> {
        self.discrepancies
            .detect_synchronization_discrepancies(item_id, warehouses, source)
    }

    pub fn detect_reservation_drift(&self, item_id: ItemId) -> EngineResult<DiscrepancyReport> {
        self.discrepancies.detect_reservation_drift(item_id)
    }
}
