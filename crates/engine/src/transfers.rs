//! Transfer workflow: Requested → Approved → InTransit → Completed.
//!
//! Each ledger-affecting transition re-reads the transfer inside the ledger
//! section of the key it touches, so the status check and the stock movement
//! are one step. Two concurrent approvals cannot both hold source stock.

use std::sync::Arc;

use tracing::{debug, info};

use stockpilot_core::{Clock, EngineError, EngineResult, TransferId, UserId};
use stockpilot_inventory::{
    AdjustmentReason, InventoryEvent, StockAdjusted, StockRecord, TrackingUpdate,
    TransferDraft, TransferRequest, TransferStatus, TransferTransitioned,
};

use crate::atp::AtpCalculator;
use crate::audit::AuditSink;
use crate::collaborators::{Catalog, WarehouseDirectory, require_item, require_warehouse};
use crate::ledger::{StockLedger, signed};
use crate::reservations::ReservationManager;
use crate::store::EntityStore;

pub struct TransferWorkflow {
    ledger: Arc<StockLedger>,
    atp: Arc<AtpCalculator>,
    reservations: Arc<ReservationManager>,
    store: Arc<dyn EntityStore<TransferRequest>>,
    catalog: Arc<dyn Catalog>,
    warehouses: Arc<dyn WarehouseDirectory>,
    audit: Arc<dyn AuditSink>,
    clock: Arc<dyn Clock>,
}

impl TransferWorkflow {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        ledger: Arc<StockLedger>,
        atp: Arc<AtpCalculator>,
        reservations: Arc<ReservationManager>,
        store: Arc<dyn EntityStore<TransferRequest>>,
        catalog: Arc<dyn Catalog>,
        warehouses: Arc<dyn WarehouseDirectory>,
        audit: Arc<dyn AuditSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            ledger,
            atp,
            reservations,
            store,
            catalog,
            warehouses,
            audit,
            clock,
        }
    }

    /// Open a transfer. Checks source ATP but places no hold yet.
    pub fn create_transfer_request(&self, draft: TransferDraft) -> EngineResult<TransferRequest> {
        draft.validate()?;
        require_item(self.catalog.as_ref(), draft.item_id)?;
        require_warehouse(self.warehouses.as_ref(), draft.source_warehouse_id)?;
        require_warehouse(self.warehouses.as_ref(), draft.destination_warehouse_id)?;

        let source = self
            .atp
            .calculate_atp(draft.item_id, draft.source_warehouse_id)?;
        if source.available < draft.quantity {
            return Err(EngineError::insufficient_stock(
                draft.item_id,
                draft.source_warehouse_id,
                draft.quantity,
                source.available,
            ));
        }

        let transfer = TransferRequest::open(TransferId::new(), draft, self.clock.now())?;
        self.store.insert(transfer.clone())?;

        self.announce(&transfer, None);
        Ok(transfer)
    }

    /// Hold the transfer quantity at the source.
    pub fn approve_transfer(&self, id: TransferId, actor: UserId) -> EngineResult<TransferRequest> {
        let existing = self.load(id)?;
        existing.status().check_transition(TransferStatus::Approved)?;
        let quantity = signed(existing.quantity())?;

        let (_, (expired, approved)) = self.ledger.with_stock(existing.source_key(), |cell| {
            let current = self.load(id)?;
            current.status().check_transition(TransferStatus::Approved)?;

            let expired = self.reservations.reclaim_overdue(cell)?;
            let available = cell.record().available();
            if available < current.quantity() {
                return Ok((expired, Err(available)));
            }

            cell.apply(0, quantity)?;
            let at = cell.at();
            let approved = self
                .store
                .update(&id, &mut |t: &mut TransferRequest| t.approve(actor, at))?;
            Ok((expired, Ok(approved)))
        })?;

        if !expired.is_empty() {
            debug!(transfer_id = %id, reclaimed = expired.len(), "approval reclaimed overdue holds");
        }
        self.reservations.publish_expired(&expired);

        match approved {
            Ok(transfer) => {
                self.announce(&transfer, Some(TransferStatus::Requested));
                Ok(transfer)
            }
            Err(available) => Err(EngineError::insufficient_stock(
                existing.item_id(),
                existing.source_warehouse_id(),
                existing.quantity(),
                available,
            )),
        }
    }

    /// Goods leave the source: on-hand and the approval hold both drop.
    pub fn execute_transfer(&self, id: TransferId, actor: UserId) -> EngineResult<TransferRequest> {
        let existing = self.load(id)?;
        let quantity = signed(existing.quantity())?;

        let (record, shipped) = self.ledger.with_stock(existing.source_key(), |cell| {
            let current = self.load(id)?;
            if current.status() != TransferStatus::Approved {
                return Err(EngineError::invalid_transition(
                    current.status(),
                    TransferStatus::InTransit,
                ));
            }
            cell.apply(-quantity, -quantity)?;
            let at = cell.at();
            self.store
                .update(&id, &mut |t: &mut TransferRequest| t.ship(actor, at))
        })?;

        self.announce(&shipped, Some(TransferStatus::Approved));
        self.announce_movement(&record, -quantity, -quantity, AdjustmentReason::TransferOut);
        Ok(shipped)
    }

    /// Record carrier/location updates while in transit. No ledger effect.
    pub fn update_transfer_tracking(
        &self,
        id: TransferId,
        update: TrackingUpdate,
        actor: UserId,
    ) -> EngineResult<TransferRequest> {
        let at = self.clock.now();
        let mut update = Some(update);
        let tracked = self.store.update(&id, &mut |t: &mut TransferRequest| {
            let update = update
                .take()
                .ok_or_else(|| EngineError::invariant("tracking update applied twice"))?;
            t.record_tracking(update, actor, at)
        })?;

        debug!(
            transfer_id = %id,
            location = tracked.tracking().current_location.as_deref().unwrap_or(""),
            "transfer tracking updated"
        );
        self.announce(&tracked, Some(TransferStatus::InTransit));
        Ok(tracked)
    }

    /// Goods arrive: destination on-hand grows by the quantity.
    pub fn complete_transfer(&self, id: TransferId, actor: UserId) -> EngineResult<TransferRequest> {
        let existing = self.load(id)?;
        existing.status().check_transition(TransferStatus::Completed)?;
        let quantity = signed(existing.quantity())?;

        let (record, completed) = self.ledger.with_stock(existing.destination_key(), |cell| {
            let current = self.load(id)?;
            current.status().check_transition(TransferStatus::Completed)?;
            cell.apply(quantity, 0)?;
            let at = cell.at();
            self.store
                .update(&id, &mut |t: &mut TransferRequest| t.complete(actor, at))
        })?;

        self.announce(&completed, Some(TransferStatus::InTransit));
        self.announce_movement(&record, quantity, 0, AdjustmentReason::TransferIn);
        Ok(completed)
    }

    /// Cancel before approval. Nothing is held yet, so the ledger is untouched.
    pub fn cancel_transfer(
        &self,
        id: TransferId,
        actor: UserId,
        reason: Option<String>,
    ) -> EngineResult<TransferRequest> {
        let at = self.clock.now();
        let cancelled = self.store.update(&id, &mut |t: &mut TransferRequest| {
            t.cancel(actor, at, reason.clone())
        })?;
        self.announce(&cancelled, Some(TransferStatus::Requested));
        Ok(cancelled)
    }

    pub fn get_transfer(&self, id: TransferId) -> EngineResult<Option<TransferRequest>> {
        self.store.get(&id)
    }

    /// Transfers, optionally in one status, oldest first.
    pub fn list_transfers(&self, status: Option<TransferStatus>) -> EngineResult<Vec<TransferRequest>> {
        let mut transfers = self
            .store
            .scan(&|t: &TransferRequest| status.is_none_or(|s| t.status() == s))?;
        transfers.sort_by_key(|t| (t.created_at(), t.id_typed()));
        Ok(transfers)
    }

    fn load(&self, id: TransferId) -> EngineResult<TransferRequest> {
        self.store
            .get(&id)?
            .ok_or_else(|| EngineError::not_found("transfer", id))
    }

    fn announce(&self, transfer: &TransferRequest, from: Option<TransferStatus>) {
        // Tracking updates are not status changes; their actor is in the history.
        let (actor, at) = match transfer.tracking_history().last() {
            Some(entry) if from == Some(transfer.status()) => (entry.actor, entry.at),
            _ => transfer
                .transitions()
                .last()
                .map(|t| (t.actor, t.at))
                .unwrap_or((transfer.requested_by(), transfer.created_at())),
        };

        info!(
            transfer_id = %transfer.id_typed(),
            item_id = %transfer.item_id(),
            from = from.map(TransferStatus::as_str).unwrap_or("none"),
            to = transfer.status().as_str(),
            actor = %actor,
            "transfer transitioned"
        );
        self.audit
            .record(InventoryEvent::TransferTransitioned(TransferTransitioned {
                transfer_id: transfer.id_typed(),
                item_id: transfer.item_id(),
                source_warehouse_id: transfer.source_warehouse_id(),
                destination_warehouse_id: transfer.destination_warehouse_id(),
                quantity: transfer.quantity(),
                from,
                to: transfer.status(),
                actor,
                occurred_at: at,
            }));
    }

    fn announce_movement(
        &self,
        record: &StockRecord,
        on_hand_delta: i64,
        reserved_delta: i64,
        reason: AdjustmentReason,
    ) {
        self.audit.record(InventoryEvent::StockAdjusted(StockAdjusted {
            item_id: record.item_id(),
            warehouse_id: record.warehouse_id(),
            on_hand_delta,
            reserved_delta,
            on_hand: record.on_hand(),
            reserved: record.reserved(),
            reason,
            occurred_at: record.last_movement_at().unwrap_or_else(|| self.clock.now()),
        }));
    }
}
