//! Allocation planner: split one demand across warehouses.
//!
//! The plan is greedy and not globally atomic. Each warehouse reservation is
//! its own serialized ledger operation; a candidate drained between the ATP
//! read and the reservation simply contributes nothing and the planner moves
//! on. Reservations already made are kept when the plan comes up short.

use std::sync::Arc;

use chrono::Duration;
use tracing::{info, warn};

use stockpilot_core::{Clock, EngineError, EngineResult};
use stockpilot_inventory::{
    AllocationPlanned, AllocationRequest, AllocationResult, InventoryEvent, RankingPolicy,
    ReserveRequest, WarehouseAllocation, order_candidates,
};

use crate::atp::AtpCalculator;
use crate::audit::AuditSink;
use crate::reservations::ReservationManager;

pub struct AllocationPlanner {
    atp: Arc<AtpCalculator>,
    reservations: Arc<ReservationManager>,
    policy: RankingPolicy,
    audit: Arc<dyn AuditSink>,
    clock: Arc<dyn Clock>,
    default_hold_ttl: Option<Duration>,
    default_max_warehouses: Option<usize>,
}

impl AllocationPlanner {
    pub fn new(
        atp: Arc<AtpCalculator>,
        reservations: Arc<ReservationManager>,
        audit: Arc<dyn AuditSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            atp,
            reservations,
            policy: RankingPolicy::standard(),
            audit,
            clock,
            default_hold_ttl: None,
            default_max_warehouses: None,
        }
    }

    pub fn with_policy(mut self, policy: RankingPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_default_hold_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.default_hold_ttl = ttl;
        self
    }

    pub fn with_default_max_warehouses(mut self, max: Option<usize>) -> Self {
        self.default_max_warehouses = max;
        self
    }

    pub fn allocate(&self, request: AllocationRequest) -> EngineResult<AllocationResult> {
        request.validate()?;
        let now = self.clock.now();
        if request.expires_at.is_some_and(|at| at <= now) {
            return Err(EngineError::validation("expires_at must be in the future"));
        }
        let max_warehouses = request.max_warehouses.or(self.default_max_warehouses);
        let expires_at = request
            .expires_at
            .or_else(|| self.default_hold_ttl.map(|ttl| now + ttl));

        // Unknown item surfaces here, before any reservation is attempted.
        let atp = self.atp.calculate_multi_warehouse_atp(request.item_id)?;

        let ranker = self
            .policy
            .ranker_for(request.customer_tier, request.channel_type);
        let candidates = order_candidates(
            &atp.per_warehouse,
            &request.preferred_warehouses,
            ranker,
            request.quantity,
        );

        let mut remaining = request.quantity;
        let mut allocations: Vec<WarehouseAllocation> = Vec::new();
        let mut reasoning = vec![format!(
            "{} candidate warehouse(s), {} available in total, ranked by {}",
            candidates.len(),
            atp.total_available,
            ranker.name()
        )];

        for candidate in &candidates {
            if remaining == 0 {
                break;
            }
            if max_warehouses.is_some_and(|max| allocations.len() >= max) {
                reasoning.push(format!(
                    "stopped: reached the limit of {} warehouse(s)",
                    allocations.len()
                ));
                break;
            }
            if candidate.available == 0 {
                reasoning.push(format!("{}: nothing available", candidate.warehouse_id));
                continue;
            }

            let quantity = remaining.min(candidate.available);
            let mut reserve = ReserveRequest::new(
                request.item_id,
                candidate.warehouse_id,
                quantity,
                request.order_id,
                request.customer_id,
            );
            reserve.expires_at = expires_at;
            reserve.priority = request.priority;

            match self.reservations.reserve(reserve) {
                Ok(reservation) => {
                    remaining -= quantity;
                    reasoning.push(format!(
                        "{}: reserved {quantity} of {} available",
                        candidate.warehouse_id, candidate.available
                    ));
                    allocations.push(WarehouseAllocation {
                        warehouse_id: candidate.warehouse_id,
                        quantity,
                        reservation_id: reservation.id_typed(),
                    });
                }
                Err(
                    err @ (EngineError::InsufficientStock { .. }
                    | EngineError::NotFound { .. }
                    | EngineError::Validation(_)),
                ) => {
                    warn!(
                        item_id = %request.item_id,
                        warehouse_id = %candidate.warehouse_id,
                        requested = quantity,
                        error = %err,
                        "allocation candidate lost; trying the next warehouse"
                    );
                    reasoning.push(format!("{}: skipped ({err})", candidate.warehouse_id));
                }
                Err(err) => return Err(err),
            }
        }

        let result = AllocationResult::from_allocations(
            request.item_id,
            request.quantity,
            allocations,
            reasoning,
        );

        info!(
            item_id = %request.item_id,
            order_id = %request.order_id,
            status = result.status.as_str(),
            requested = result.requested,
            allocated = result.allocated,
            shortfall = result.shortfall,
            warehouses = result.allocations.len(),
            "allocation planned"
        );
        self.audit
            .record(InventoryEvent::AllocationPlanned(AllocationPlanned {
                item_id: request.item_id,
                order_id: request.order_id,
                customer_id: request.customer_id,
                status: result.status,
                requested: result.requested,
                allocated: result.allocated,
                shortfall: result.shortfall,
                reservation_ids: result.reservation_ids(),
                occurred_at: now,
            }));

        Ok(result)
    }
}
