//! `stockpilot-core`: foundation building blocks for the allocation engine.
//!
//! This crate contains **pure** primitives (no infrastructure concerns).

pub mod clock;
pub mod entity;
pub mod error;
pub mod id;

pub use clock::{Clock, ManualClock, SystemClock};
pub use entity::Entity;
pub use error::{EngineError, EngineResult};
pub use id::{
    CustomerId, ItemId, OrderId, ReservationId, SnapshotId, TransferId, UserId, WarehouseId,
};
