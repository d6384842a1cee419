//! Runtime layer: stock ledger, reservation and allocation services, transfer
//! workflow, discrepancy checks, and the `InventoryEngine` facade over them.

pub mod allocation;
pub mod atp;
pub mod audit;
pub mod collaborators;
pub mod config;
pub mod discrepancy;
pub mod engine;
pub mod holds;
pub mod ledger;
pub mod reservations;
pub mod store;
pub mod sweeper;
pub mod transfers;


pub use allocation::AllocationPlanner;
pub use atp::AtpCalculator;
pub use audit::{AuditSink, BusAuditSink, JsonBusAuditSink, NoopAuditSink};
pub use collaborators::{
    Catalog, ExpectedStockSource, InMemoryCatalog, InMemoryWarehouseDirectory, WarehouseDirectory,
    WarehouseInfo,
};
pub use config::{ConfigError, EngineConfig};
pub use discrepancy::DiscrepancyDetector;
pub use engine::{InventoryEngine, InventoryEngineBuilder};
pub use holds::ActiveHolds;
pub use ledger::{StockCell, StockLedger};
pub use reservations::{CleanupReport, ReservationFilter, ReservationManager};
pub use store::{EntityStore, InMemoryEntityStore};
pub use sweeper::{ExpirySweeper, SweepStats, SweeperHandle};
pub use transfers::TransferWorkflow;
