use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockpilot_core::{
    CustomerId, ItemId, OrderId, ReservationId, SnapshotId, TransferId, UserId, WarehouseId,
};
use stockpilot_events::Event;

use crate::allocation::AllocationStatus;
use crate::discrepancy::DiscrepancyKind;
use crate::stock::AdjustmentReason;
use crate::transfer::TransferStatus;

/// Event: StockAdjusted (ad-hoc or transfer-driven ledger movement).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockAdjusted {
    pub item_id: ItemId,
    pub warehouse_id: WarehouseId,
    pub on_hand_delta: i64,
    pub reserved_delta: i64,
    pub on_hand: u64,
    pub reserved: u64,
    pub reason: AdjustmentReason,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ReservationCreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationCreated {
    pub reservation_id: ReservationId,
    pub item_id: ItemId,
    pub warehouse_id: WarehouseId,
    pub quantity: u64,
    pub order_id: OrderId,
    pub customer_id: CustomerId,
    pub expires_at: Option<DateTime<Utc>>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: a reservation left Active (released, expired or consumed).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationClosed {
    pub reservation_id: ReservationId,
    pub item_id: ItemId,
    pub warehouse_id: WarehouseId,
    pub quantity: u64,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ReservationExtended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationExtended {
    pub reservation_id: ReservationId,
    pub expires_at: DateTime<Utc>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: AllocationPlanned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationPlanned {
    pub item_id: ItemId,
    pub order_id: OrderId,
    pub customer_id: CustomerId,
    pub status: AllocationStatus,
    pub requested: u64,
    pub allocated: u64,
    pub shortfall: u64,
    pub reservation_ids: Vec<ReservationId>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: a transfer moved through its workflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferTransitioned {
    pub transfer_id: TransferId,
    pub item_id: ItemId,
    pub source_warehouse_id: WarehouseId,
    pub destination_warehouse_id: WarehouseId,
    pub quantity: u64,
    pub from: Option<TransferStatus>,
    pub to: TransferStatus,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: a discrepancy check found mismatches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscrepanciesDetected {
    pub kind: DiscrepancyKind,
    pub item_id: Option<ItemId>,
    pub snapshot_ids: Vec<SnapshotId>,
    pub count: usize,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InventoryEvent {
    StockAdjusted(StockAdjusted),
    ReservationCreated(ReservationCreated),
    ReservationReleased(ReservationClosed),
    ReservationExpired(ReservationClosed),
    ReservationConsumed(ReservationClosed),
    ReservationExtended(ReservationExtended),
    AllocationPlanned(AllocationPlanned),
    TransferTransitioned(TransferTransitioned),
    DiscrepanciesDetected(DiscrepanciesDetected),
}

impl InventoryEvent {
    /// Which entity the event is about, for envelope routing.
    pub fn subject(&self) -> (&'static str, uuid::Uuid) {
        match self {
            InventoryEvent::StockAdjusted(e) => ("stock", *e.item_id.as_uuid()),
            InventoryEvent::ReservationCreated(e) => ("reservation", *e.reservation_id.as_uuid()),
            InventoryEvent::ReservationReleased(e)
            | InventoryEvent::ReservationExpired(e)
            | InventoryEvent::ReservationConsumed(e) => ("reservation", *e.reservation_id.as_uuid()),
            InventoryEvent::ReservationExtended(e) => ("reservation", *e.reservation_id.as_uuid()),
            InventoryEvent::AllocationPlanned(e) => ("allocation", *e.order_id.as_uuid()),
            InventoryEvent::TransferTransitioned(e) => ("transfer", *e.transfer_id.as_uuid()),
            InventoryEvent::DiscrepanciesDetected(e) => (
                "discrepancy",
                e.item_id.map(|i| *i.as_uuid()).unwrap_or_default(),
            ),
        }
    }
}

impl Event for InventoryEvent {
    fn event_type(&self) -> &'static str {
        match self {
            InventoryEvent::StockAdjusted(_) => "inventory.stock.adjusted",
            InventoryEvent::ReservationCreated(_) => "inventory.reservation.created",
            InventoryEvent::ReservationReleased(_) => "inventory.reservation.released",
            InventoryEvent::ReservationExpired(_) => "inventory.reservation.expired",
            InventoryEvent::ReservationConsumed(_) => "inventory.reservation.consumed",
            InventoryEvent::ReservationExtended(_) => "inventory.reservation.extended",
            InventoryEvent::AllocationPlanned(_) => "inventory.allocation.planned",
            InventoryEvent::TransferTransitioned(e) => match (e.from, e.to) {
                (None, _) => "inventory.transfer.requested",
                (Some(TransferStatus::InTransit), TransferStatus::InTransit) => {
                    "inventory.transfer.tracking_updated"
                }
                (_, TransferStatus::Approved) => "inventory.transfer.approved",
                (_, TransferStatus::InTransit) => "inventory.transfer.shipped",
                (_, TransferStatus::Completed) => "inventory.transfer.completed",
                (_, TransferStatus::Cancelled) => "inventory.transfer.cancelled",
                (_, TransferStatus::Requested) => "inventory.transfer.requested",
            },
            InventoryEvent::DiscrepanciesDetected(_) => "inventory.discrepancy.detected",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            InventoryEvent::StockAdjusted(e) => e.occurred_at,
            InventoryEvent::ReservationCreated(e) => e.occurred_at,
            InventoryEvent::ReservationReleased(e)
            | InventoryEvent::ReservationExpired(e)
            | InventoryEvent::ReservationConsumed(e) => e.occurred_at,
            InventoryEvent::ReservationExtended(e) => e.occurred_at,
            InventoryEvent::AllocationPlanned(e) => e.occurred_at,
            InventoryEvent::TransferTransitioned(e) => e.occurred_at,
            InventoryEvent::DiscrepanciesDetected(e) => e.occurred_at,
        }
    }
}
