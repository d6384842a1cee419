//! Reservation manager: holds on stock, their release, consumption and expiry.
//!
//! Every reservation mutation runs inside the ledger section of its stock key,
//! so the reservation store, the key's [`ActiveHolds`] set and the ledger's
//! `reserved` move together.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use stockpilot_core::{
    Clock, EngineError, EngineResult, ItemId, OrderId, ReservationId, WarehouseId,
};
use stockpilot_inventory::{
    InventoryEvent, Reservation, ReservationClosed, ReservationCreated, ReservationExtended,
    ReservationStatus, ReserveRequest, StockKey, StockRecord,
};

use crate::audit::AuditSink;
use crate::collaborators::{Catalog, WarehouseDirectory, require_active_warehouse, require_item};
use crate::holds::ActiveHolds;
use crate::ledger::{StockCell, StockLedger, signed};
use crate::store::EntityStore;

/// Which active reservations to list. Unset fields match everything.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationFilter {
    pub item_id: Option<ItemId>,
    pub warehouse_id: Option<WarehouseId>,
    pub order_id: Option<OrderId>,
}

impl ReservationFilter {
    pub fn for_order(order_id: OrderId) -> Self {
        Self {
            order_id: Some(order_id),
            ..Self::default()
        }
    }

    pub fn for_key(key: StockKey) -> Self {
        Self {
            item_id: Some(key.item_id),
            warehouse_id: Some(key.warehouse_id),
            order_id: None,
        }
    }

    fn matches(&self, reservation: &Reservation) -> bool {
        self.item_id.is_none_or(|id| id == reservation.item_id())
            && self.warehouse_id.is_none_or(|id| id == reservation.warehouse_id())
            && self.order_id.is_none_or(|id| id == reservation.order_id())
    }
}

/// Outcome of one expiry sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupReport {
    /// Reservations moved to Expired with their hold released.
    pub cleaned: usize,
    /// Reservations that could not be expired this pass.
    pub failed: usize,
    /// Another sweep was already running; nothing was done.
    pub skipped_in_flight: bool,
}

/// Clears the single-flight flag when the sweep ends, including on panic.
struct SweepGuard<'a>(&'a AtomicBool);

impl<'a> SweepGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for SweepGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct ReservationManager {
    ledger: Arc<StockLedger>,
    store: Arc<dyn EntityStore<Reservation>>,
    holds: Arc<ActiveHolds>,
    catalog: Arc<dyn Catalog>,
    warehouses: Arc<dyn WarehouseDirectory>,
    audit: Arc<dyn AuditSink>,
    clock: Arc<dyn Clock>,
    sweep_batch_limit: usize,
    sweep_in_flight: AtomicBool,
}

impl ReservationManager {
    pub fn new(
        ledger: Arc<StockLedger>,
        store: Arc<dyn EntityStore<Reservation>>,
        holds: Arc<ActiveHolds>,
        catalog: Arc<dyn Catalog>,
        warehouses: Arc<dyn WarehouseDirectory>,
        audit: Arc<dyn AuditSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            ledger,
            store,
            holds,
            catalog,
            warehouses,
            audit,
            clock,
            sweep_batch_limit: usize::MAX,
            sweep_in_flight: AtomicBool::new(false),
        }
    }

    pub fn with_sweep_batch_limit(mut self, limit: usize) -> Self {
        self.sweep_batch_limit = limit.max(1);
        self
    }

    /// Place a hold in one warehouse.
    ///
    /// Overdue holds on the same key are reclaimed first, so their stock is
    /// promisable again. `InsufficientStock` leaves the ledger untouched apart
    /// from that reclaim.
    pub fn reserve(&self, request: ReserveRequest) -> EngineResult<Reservation> {
        request.validate(self.clock.now())?;
        require_item(self.catalog.as_ref(), request.item_id)?;
        require_active_warehouse(self.warehouses.as_ref(), request.warehouse_id)?;

        let key = StockKey::new(request.item_id, request.warehouse_id);
        let quantity = signed(request.quantity)?;

        let (_, (expired, placed)) = self.ledger.with_stock(key, |cell| {
            let expired = self.reclaim_overdue(cell)?;

            let available = cell.record().available();
            if available < request.quantity {
                return Ok((expired, Err(available)));
            }

            cell.apply(0, quantity)?;
            self.verify_holds(cell.record(), request.quantity, 0)?;
            let reservation = Reservation::open(ReservationId::new(), &request, cell.at());
            self.store.insert(reservation.clone())?;
            self.holds.insert(key, reservation.id_typed())?;
            Ok((expired, Ok(reservation)))
        })?;

        self.publish_expired(&expired);

        match placed {
            Ok(reservation) => {
                info!(
                    reservation_id = %reservation.id_typed(),
                    item_id = %reservation.item_id(),
                    warehouse_id = %reservation.warehouse_id(),
                    quantity = reservation.quantity(),
                    order_id = %reservation.order_id(),
                    "reservation created"
                );
                self.audit
                    .record(InventoryEvent::ReservationCreated(ReservationCreated {
                        reservation_id: reservation.id_typed(),
                        item_id: reservation.item_id(),
                        warehouse_id: reservation.warehouse_id(),
                        quantity: reservation.quantity(),
                        order_id: reservation.order_id(),
                        customer_id: reservation.customer_id(),
                        expires_at: reservation.expires_at(),
                        occurred_at: reservation.created_at(),
                    }));
                Ok(reservation)
            }
            Err(available) => {
                debug!(
                    item_id = %request.item_id,
                    warehouse_id = %request.warehouse_id,
                    requested = request.quantity,
                    available,
                    "reservation rejected: insufficient stock"
                );
                Err(EngineError::insufficient_stock(
                    request.item_id,
                    request.warehouse_id,
                    request.quantity,
                    available,
                ))
            }
        }
    }

    /// Release an active hold. Returns `false` when there is nothing to release:
    /// unknown id, already closed, or already past its expiry (in which case the
    /// hold is finalized as Expired).
    pub fn release(&self, id: ReservationId, reason: &str) -> EngineResult<bool> {
        let Some(existing) = self.store.get(&id)? else {
            return Ok(false);
        };
        if existing.status().is_terminal() {
            return Ok(false);
        }

        let (_, closed) = self.ledger.with_stock(existing.stock_key(), |cell| {
            let Some(current) = self.store.get(&id)? else {
                return Ok(None);
            };
            if current.status() != ReservationStatus::Active {
                return Ok(None);
            }

            let at = cell.at();
            let overdue = current.is_overdue(at);
            cell.apply(0, -signed(current.quantity())?)?;
            self.verify_holds(cell.record(), 0, current.quantity())?;
            let updated = self.store.update(&id, &mut |r: &mut Reservation| {
                if overdue {
                    r.expire(at)
                } else {
                    r.release(reason, at)
                }
            })?;
            self.holds.remove(updated.stock_key(), id)?;
            Ok(Some(updated))
        })?;

        match closed {
            None => Ok(false),
            Some(reservation) if reservation.status() == ReservationStatus::Expired => {
                debug!(reservation_id = %id, "release found an overdue hold; expired instead");
                self.publish_expired(std::slice::from_ref(&reservation));
                Ok(false)
            }
            Some(reservation) => {
                info!(reservation_id = %id, reason, "reservation released");
                let at = reservation.released_at().unwrap_or_else(|| self.clock.now());
                self.audit.record(InventoryEvent::ReservationReleased(closed_event(
                    &reservation,
                    Some(reason.to_string()),
                    at,
                )));
                Ok(true)
            }
        }
    }

    /// Turn a hold into a shipment: on-hand and reserved both drop by the quantity.
    pub fn consume(&self, id: ReservationId) -> EngineResult<Reservation> {
        let existing = self
            .store
            .get(&id)?
            .ok_or_else(|| EngineError::not_found("reservation", id))?;

        let (_, consumed) = self.ledger.with_stock(existing.stock_key(), |cell| {
            let current = self
                .store
                .get(&id)?
                .ok_or_else(|| EngineError::not_found("reservation", id))?;
            let at = cell.at();

            // Status checks first; nothing is touched if the hold cannot be consumed.
            current.clone().consume(at)?;

            let quantity = signed(current.quantity())?;
            cell.apply(-quantity, -quantity)?;
            self.verify_holds(cell.record(), 0, current.quantity())?;
            let consumed = self.store.update(&id, &mut |r: &mut Reservation| r.consume(at))?;
            self.holds.remove(consumed.stock_key(), id)?;
            Ok(consumed)
        })?;

        info!(
            reservation_id = %id,
            item_id = %consumed.item_id(),
            warehouse_id = %consumed.warehouse_id(),
            quantity = consumed.quantity(),
            "reservation consumed"
        );
        let at = consumed.consumed_at().unwrap_or_else(|| self.clock.now());
        self.audit
            .record(InventoryEvent::ReservationConsumed(closed_event(&consumed, None, at)));
        Ok(consumed)
    }

    /// Move an active hold's expiry forward. Only `expires_at` changes.
    pub fn extend(&self, id: ReservationId, new_expires_at: DateTime<Utc>) -> EngineResult<bool> {
        let existing = self
            .store
            .get(&id)?
            .ok_or_else(|| EngineError::not_found("reservation", id))?;

        let (_, at) = self.ledger.with_stock(existing.stock_key(), |cell| {
            let at = cell.at();
            self.store
                .update(&id, &mut |r: &mut Reservation| r.extend(new_expires_at, at))?;
            Ok(at)
        })?;

        info!(reservation_id = %id, expires_at = %new_expires_at, "reservation extended");
        self.audit
            .record(InventoryEvent::ReservationExtended(ReservationExtended {
                reservation_id: id,
                expires_at: new_expires_at,
                occurred_at: at,
            }));
        Ok(true)
    }

    /// Expire every overdue hold and release its quantity, once.
    ///
    /// Single-flight: an overlapping call returns immediately with
    /// `skipped_in_flight`. One failing reservation never aborts the batch.
    pub fn cleanup_expired(&self) -> EngineResult<CleanupReport> {
        let Some(_guard) = SweepGuard::acquire(&self.sweep_in_flight) else {
            debug!("expiry sweep already in flight; skipping");
            return Ok(CleanupReport {
                skipped_in_flight: true,
                ..CleanupReport::default()
            });
        };

        let now = self.clock.now();
        let mut overdue = self.store.scan(&|r: &Reservation| r.is_overdue(now))?;
        overdue.sort_by_key(|r| (r.expires_at(), r.id_typed()));
        overdue.truncate(self.sweep_batch_limit);

        let mut report = CleanupReport::default();
        for candidate in overdue {
            let id = candidate.id_typed();
            match self.expire_one(id) {
                Ok(Some(expired)) => {
                    report.cleaned += 1;
                    self.publish_expired(std::slice::from_ref(&expired));
                }
                // Released, consumed or extended since the scan.
                Ok(None) => {}
                Err(err) if err.is_fatal() => {
                    report.failed += 1;
                    error!(reservation_id = %id, error = %err, "failed to expire reservation");
                }
                Err(err) => {
                    report.failed += 1;
                    warn!(reservation_id = %id, error = %err, "failed to expire reservation");
                }
            }
        }

        if report.cleaned > 0 || report.failed > 0 {
            info!(
                cleaned = report.cleaned,
                failed = report.failed,
                "expiry sweep finished"
            );
        }
        Ok(report)
    }

    /// Reservation by id, with lazy expiry applied to the returned copy.
    pub fn get(&self, id: ReservationId) -> EngineResult<Option<Reservation>> {
        let Some(mut reservation) = self.store.get(&id)? else {
            return Ok(None);
        };
        if reservation.is_overdue(self.clock.now()) {
            if let Some(expired_at) = reservation.expires_at() {
                reservation.expire(expired_at)?;
            }
        }
        Ok(Some(reservation))
    }

    /// Holds that still count against ATP, oldest first.
    pub fn list_active(&self, filter: ReservationFilter) -> EngineResult<Vec<Reservation>> {
        let now = self.clock.now();
        let mut active = self
            .store
            .scan(&|r: &Reservation| r.holds_stock(now) && filter.matches(r))?;
        active.sort_by_key(|r| (r.created_at(), r.id_typed()));
        Ok(active)
    }

    /// Release every active hold of an order; returns how many were released.
    pub fn release_order(&self, order_id: OrderId, reason: &str) -> EngineResult<usize> {
        let mut released = 0;
        for reservation in self.list_active(ReservationFilter::for_order(order_id))? {
            if self.release(reservation.id_typed(), reason)? {
                released += 1;
            }
        }
        Ok(released)
    }

    /// Reclaim the overdue holds of one key now rather than at the next sweep.
    pub fn expire_overdue(&self, item_id: ItemId, warehouse_id: WarehouseId) -> EngineResult<usize> {
        let key = StockKey::new(item_id, warehouse_id);
        let (_, expired) = self
            .ledger
            .with_stock(key, |cell| self.reclaim_overdue(cell))?;
        self.publish_expired(&expired);
        Ok(expired.len())
    }

    /// Sum of stored Active holds on `key`, overdue ones included: exactly
    /// what the ledger's `reserved` still carries for reservations.
    pub fn held_quantity(&self, key: StockKey) -> EngineResult<u64> {
        Ok(self
            .holds
            .holds(key)?
            .iter()
            .map(Reservation::quantity)
            .sum())
    }

    /// Expire the overdue holds of the cell's key inside the caller's section.
    ///
    /// Must run inside `StockLedger::with_stock` for that key. Returns the
    /// expired reservations; the caller publishes them after the section.
    pub(crate) fn reclaim_overdue(&self, cell: &mut StockCell) -> EngineResult<Vec<Reservation>> {
        let key = cell.record().key();
        let at = cell.at();
        let mut overdue = self.holds.holds(key)?;
        overdue.retain(|r| r.is_overdue(at));
        if overdue.is_empty() {
            return Ok(Vec::new());
        }

        let total: u64 = overdue.iter().map(Reservation::quantity).sum();
        cell.apply(0, -signed(total)?)?;

        let mut expired = Vec::with_capacity(overdue.len());
        for reservation in overdue {
            let id = reservation.id_typed();
            expired.push(self.store.update(&id, &mut |r: &mut Reservation| r.expire(at))?);
            self.holds.remove(key, id)?;
        }
        debug!(
            item_id = %key.item_id,
            warehouse_id = %key.warehouse_id,
            count = expired.len(),
            quantity = total,
            "reclaimed overdue holds"
        );
        Ok(expired)
    }

    fn expire_one(&self, id: ReservationId) -> EngineResult<Option<Reservation>> {
        let Some(existing) = self.store.get(&id)? else {
            return Ok(None);
        };

        let (_, expired) = self.ledger.with_stock(existing.stock_key(), |cell| {
            let Some(current) = self.store.get(&id)? else {
                return Ok(None);
            };
            let at = cell.at();
            if !current.is_overdue(at) {
                return Ok(None);
            }
            cell.apply(0, -signed(current.quantity())?)?;
            self.verify_holds(cell.record(), 0, current.quantity())?;
            let expired = self.store.update(&id, &mut |r: &mut Reservation| r.expire(at))?;
            self.holds.remove(expired.stock_key(), id)?;
            Ok(Some(expired))
        })?;
        Ok(expired)
    }

    /// Active holds on the record's key, after adding `adding` and removing
    /// `removing`, must still fit inside `reserved`.
    fn verify_holds(&self, record: &StockRecord, adding: u64, removing: u64) -> EngineResult<()> {
        let held = self.held_quantity(record.key())?;
        let after = (u128::from(held) + u128::from(adding)).saturating_sub(u128::from(removing));
        if after > u128::from(record.reserved()) {
            error!(
                item_id = %record.item_id(),
                warehouse_id = %record.warehouse_id(),
                held = held,
                adding,
                removing,
                reserved = record.reserved(),
                "active reservations exceed reserved stock"
            );
            return Err(EngineError::invariant(format!(
                "active reservations ({after}) exceed reserved ({}) for {}",
                record.reserved(),
                record.key()
            )));
        }
        Ok(())
    }

    pub(crate) fn publish_expired(&self, expired: &[Reservation]) {
        for reservation in expired {
            info!(reservation_id = %reservation.id_typed(), "reservation expired");
            let at = reservation.expired_at().unwrap_or_else(|| self.clock.now());
            self.audit
                .record(InventoryEvent::ReservationExpired(closed_event(reservation, None, at)));
        }
    }
}

fn closed_event(
    reservation: &Reservation,
    reason: Option<String>,
    occurred_at: DateTime<Utc>,
) -> ReservationClosed {
    ReservationClosed {
        reservation_id: reservation.id_typed(),
        item_id: reservation.item_id(),
        warehouse_id: reservation.warehouse_id(),
        quantity: reservation.quantity(),
        reason,
        occurred_at,
    }
}
