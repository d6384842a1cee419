//! Allocation request/result values and candidate ranking policies.
//!
//! Ranking only decides the *order* in which warehouses are tried. The
//! arithmetic (`min(remaining, available)` per candidate) lives in the planner
//! and is the same whichever ranker is chosen.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockpilot_core::{CustomerId, EngineError, EngineResult, ItemId, OrderId, ReservationId, WarehouseId};

use crate::atp::AtpResult;
use crate::reservation::Priority;

/// Customer segment, used only to pick a ranking policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CustomerTier {
    Standard,
    Premium,
    Wholesale,
}

/// Sales channel the demand came through, used only to pick a ranking policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelType {
    Online,
    Retail,
    Wholesale,
    Marketplace,
}

/// Demand for one item, to be split across warehouses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationRequest {
    pub item_id: ItemId,
    pub quantity: u64,
    pub customer_id: CustomerId,
    pub order_id: OrderId,
    /// Tried first, in this order.
    pub preferred_warehouses: Vec<WarehouseId>,
    /// Cap on how many warehouses may receive a reservation.
    pub max_warehouses: Option<usize>,
    pub customer_tier: Option<CustomerTier>,
    pub channel_type: Option<ChannelType>,
    pub expires_at: Option<DateTime<Utc>>,
    pub priority: Option<Priority>,
}

impl AllocationRequest {
    pub fn new(item_id: ItemId, quantity: u64, customer_id: CustomerId, order_id: OrderId) -> Self {
        Self {
            item_id,
            quantity,
            customer_id,
            order_id,
            preferred_warehouses: Vec::new(),
            max_warehouses: None,
            customer_tier: None,
            channel_type: None,
            expires_at: None,
            priority: None,
        }
    }

    pub fn with_preferred(mut self, warehouses: impl IntoIterator<Item = WarehouseId>) -> Self {
        self.preferred_warehouses = warehouses.into_iter().collect();
        self
    }

    pub fn with_max_warehouses(mut self, max: usize) -> Self {
        self.max_warehouses = Some(max);
        self
    }

    pub fn with_tier(mut self, tier: CustomerTier) -> Self {
        self.customer_tier = Some(tier);
        self
    }

    pub fn with_channel(mut self, channel: ChannelType) -> Self {
        self.channel_type = Some(channel);
        self
    }

    pub fn expiring_at(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn validate(&self) -> EngineResult<()> {
        if self.quantity == 0 {
            return Err(EngineError::validation("quantity must be positive"));
        }
        if self.max_warehouses == Some(0) {
            return Err(EngineError::validation("max_warehouses must be at least 1"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AllocationStatus {
    Success,
    Partial,
    Failure,
}

impl AllocationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            AllocationStatus::Success => "success",
            AllocationStatus::Partial => "partial",
            AllocationStatus::Failure => "failure",
        }
    }
}

/// One warehouse's share of a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WarehouseAllocation {
    pub warehouse_id: WarehouseId,
    pub quantity: u64,
    pub reservation_id: ReservationId,
}

/// Outcome of one allocation request. Computed per request, never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationResult {
    pub status: AllocationStatus,
    pub item_id: ItemId,
    pub requested: u64,
    pub allocated: u64,
    pub shortfall: u64,
    pub allocations: Vec<WarehouseAllocation>,
    pub reasoning: Vec<String>,
}

impl AllocationResult {
    pub fn from_allocations(
        item_id: ItemId,
        requested: u64,
        allocations: Vec<WarehouseAllocation>,
        reasoning: Vec<String>,
    ) -> Self {
        let allocated: u64 = allocations.iter().map(|a| a.quantity).sum();
        let shortfall = requested.saturating_sub(allocated);
        let status = if shortfall == 0 {
            AllocationStatus::Success
        } else if allocated > 0 {
            AllocationStatus::Partial
        } else {
            AllocationStatus::Failure
        };
        Self {
            status,
            item_id,
            requested,
            allocated,
            shortfall,
            allocations,
            reasoning,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == AllocationStatus::Success
    }

    pub fn reservation_ids(&self) -> Vec<ReservationId> {
        self.allocations.iter().map(|a| a.reservation_id).collect()
    }
}

/// Orders candidate warehouses for a demand. Must only permute `candidates`.
pub trait CandidateRanker: Send + Sync + core::fmt::Debug {
    fn name(&self) -> &'static str;

    fn rank(&self, demand: u64, candidates: &mut [AtpResult]);
}

/// Largest available first; spreads demand over the fewest, fullest warehouses.
#[derive(Debug, Default, Clone, Copy)]
pub struct AvailabilityRanker;

impl CandidateRanker for AvailabilityRanker {
    fn name(&self) -> &'static str {
        "availability"
    }

    fn rank(&self, _demand: u64, candidates: &mut [AtpResult]) {
        candidates.sort_by(|a, b| {
            b.available
                .cmp(&a.available)
                .then_with(|| a.warehouse_id.cmp(&b.warehouse_id))
        });
    }
}

/// Warehouses that can ship the whole demand alone come first (smallest such
/// warehouse first, keeping large pools free); the rest follow largest first.
#[derive(Debug, Default, Clone, Copy)]
pub struct SingleSourceRanker;

impl CandidateRanker for SingleSourceRanker {
    fn name(&self) -> &'static str {
        "single_source"
    }

    fn rank(&self, demand: u64, candidates: &mut [AtpResult]) {
        candidates.sort_by(|a, b| {
            let a_covers = a.available >= demand;
            let b_covers = b.available >= demand;
            match (a_covers, b_covers) {
                (true, false) => core::cmp::Ordering::Less,
                (false, true) => core::cmp::Ordering::Greater,
                (true, true) => a.available.cmp(&b.available),
                (false, false) => b.available.cmp(&a.available),
            }
            .then_with(|| a.warehouse_id.cmp(&b.warehouse_id))
        });
    }
}

/// Maps customer tier / channel to a ranker.
///
/// Precedence: tier override, then channel override, then the default.
#[derive(Debug, Clone)]
pub struct RankingPolicy {
    default: Arc<dyn CandidateRanker>,
    by_tier: HashMap<CustomerTier, Arc<dyn CandidateRanker>>,
    by_channel: HashMap<ChannelType, Arc<dyn CandidateRanker>>,
}

impl RankingPolicy {
    pub fn new(default: Arc<dyn CandidateRanker>) -> Self {
        Self {
            default,
            by_tier: HashMap::new(),
            by_channel: HashMap::new(),
        }
    }

    /// Availability order everywhere, except wholesale channel demand which
    /// prefers a single shipping warehouse.
    pub fn standard() -> Self {
        Self::new(Arc::new(AvailabilityRanker))
            .with_tier(CustomerTier::Premium, Arc::new(AvailabilityRanker))
            .with_channel(ChannelType::Wholesale, Arc::new(SingleSourceRanker))
    }

    pub fn with_tier(mut self, tier: CustomerTier, ranker: Arc<dyn CandidateRanker>) -> Self {
        self.by_tier.insert(tier, ranker);
        self
    }

    pub fn with_channel(mut self, channel: ChannelType, ranker: Arc<dyn CandidateRanker>) -> Self {
        self.by_channel.insert(channel, ranker);
        self
    }

    pub fn ranker_for(
        &self,
        tier: Option<CustomerTier>,
        channel: Option<ChannelType>,
    ) -> &dyn CandidateRanker {
        tier.and_then(|t| self.by_tier.get(&t))
            .or_else(|| channel.and_then(|c| self.by_channel.get(&c)))
            .unwrap_or(&self.default)
            .as_ref()
    }
}

impl Default for RankingPolicy {
    fn default() -> Self {
        Self::standard()
    }
}

/// Candidate order: preferred warehouses first (caller order, duplicates and
/// warehouses without stock data dropped), then the rest as `ranker` orders them.
pub fn order_candidates(
    atp: &[AtpResult],
    preferred: &[WarehouseId],
    ranker: &dyn CandidateRanker,
    demand: u64,
) -> Vec<AtpResult> {
    let mut ordered: Vec<AtpResult> = Vec::with_capacity(atp.len());
    for warehouse_id in preferred {
        if ordered.iter().any(|c| c.warehouse_id == *warehouse_id) {
            continue;
        }
        if let Some(candidate) = atp.iter().find(|c| c.warehouse_id == *warehouse_id) {
            ordered.push(*candidate);
        }
    }

    let mut rest: Vec<AtpResult> = atp
        .iter()
        .filter(|c| !preferred.contains(&c.warehouse_id))
        .copied()
        .collect();
    ranker.rank(demand, &mut rest);

    ordered.extend(rest);
    ordered
}

#[cfg(test)]
mod tests {
    use super::*;

    fn atp(item_id: ItemId, available: u64) -> AtpResult {
        AtpResult {
            item_id,
            warehouse_id: WarehouseId::new(),
            on_hand: available,
            reserved: 0,
            available,
        }
    }

    #[test]
    fn status_follows_shortfall() {
        let item = ItemId::new();
        let line = |quantity| WarehouseAllocation {
            warehouse_id: WarehouseId::new(),
            quantity,
            reservation_id: ReservationId::new(),
        };

        let full = AllocationResult::from_allocations(item, 60, vec![line(20), line(40)], vec![]);
        assert_eq!(full.status, AllocationStatus::Success);
        assert_eq!(full.shortfall, 0);

        let partial = AllocationResult::from_allocations(item, 25, vec![line(10)], vec![]);
        assert_eq!(partial.status, AllocationStatus::Partial);
        assert_eq!((partial.allocated, partial.shortfall), (10, 15));

        let none = AllocationResult::from_allocations(item, 5, vec![], vec![]);
        assert_eq!(none.status, AllocationStatus::Failure);
        assert_eq!(none.shortfall, 5);
    }

    #[test]
    fn request_validation() {
        let request = AllocationRequest::new(ItemId::new(), 0, CustomerId::new(), OrderId::new());
        assert!(matches!(request.validate(), Err(EngineError::Validation(_))));

        let request = AllocationRequest::new(ItemId::new(), 3, CustomerId::new(), OrderId::new())
            .with_max_warehouses(0);
        assert!(matches!(request.validate(), Err(EngineError::Validation(_))));
    }

    #[test]
    fn preferred_warehouses_come_first_in_caller_order() {
        let item = ItemId::new();
        let small = atp(item, 5);
        let large = atp(item, 50);
        let medium = atp(item, 20);
        let all = vec![small, large, medium];

        let ordered = order_candidates(
            &all,
            &[small.warehouse_id, WarehouseId::new(), small.warehouse_id],
            &AvailabilityRanker,
            30,
        );

        let ids: Vec<_> = ordered.iter().map(|c| c.warehouse_id).collect();
        assert_eq!(ids, vec![small.warehouse_id, large.warehouse_id, medium.warehouse_id]);
    }

    #[test]
    fn single_source_prefers_smallest_sufficient_warehouse() {
        let item = ItemId::new();
        let mut candidates = vec![atp(item, 100), atp(item, 8), atp(item, 12), atp(item, 30)];

        SingleSourceRanker.rank(10, &mut candidates);

        let available: Vec<_> = candidates.iter().map(|c| c.available).collect();
        assert_eq!(available, vec![12, 30, 100, 8]);
    }

    #[test]
    fn policy_precedence_is_tier_then_channel_then_default() {
        let policy = RankingPolicy::standard();
        assert_eq!(policy.ranker_for(None, None).name(), "availability");
        assert_eq!(
            policy.ranker_for(None, Some(ChannelType::Wholesale)).name(),
            "single_source"
        );
        assert_eq!(
            policy
                .ranker_for(Some(CustomerTier::Premium), Some(ChannelType::Wholesale))
                .name(),
            "availability"
        );
        assert_eq!(
            policy
                .ranker_for(Some(CustomerTier::Standard), Some(ChannelType::Wholesale))
                .name(),
            "single_source"
        );
    }
}
