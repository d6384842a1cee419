//! Inventory allocation domain.
//!
//! Business rules for stock records, reservations, transfers, allocation
//! ordering and discrepancy reports, implemented purely as deterministic
//! domain logic (no IO, no locking, no storage). The `stockpilot-engine`
//! crate owns concurrency and orchestration.

pub mod allocation;
pub mod atp;
pub mod discrepancy;
pub mod events;
pub mod reservation;
pub mod stock;
pub mod transfer;

pub use allocation::{
    AllocationRequest, AllocationResult, AllocationStatus, AvailabilityRanker, CandidateRanker,
    ChannelType, CustomerTier, RankingPolicy, SingleSourceRanker, WarehouseAllocation,
    order_candidates,
};
pub use atp::{AtpQueryResult, AtpResult, MultiWarehouseAtp};
pub use discrepancy::{
    Discrepancy, DiscrepancyKind, DiscrepancyReport, Snapshot, SnapshotLine, compare_snapshots,
};
pub use events::{
    AllocationPlanned, DiscrepanciesDetected, InventoryEvent, ReservationClosed,
    ReservationCreated, ReservationExtended, StockAdjusted, TransferTransitioned,
};
pub use reservation::{Priority, Reservation, ReservationStatus, ReserveRequest};
pub use stock::{AdjustmentReason, StockKey, StockRecord};
pub use transfer::{
    TrackingEntry, TrackingInfo, TrackingUpdate, TransferDraft, TransferRequest, TransferStatus,
    TransitionRecord,
};
