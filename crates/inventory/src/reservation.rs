use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockpilot_core::{
    CustomerId, EngineError, EngineResult, Entity, ItemId, OrderId, ReservationId, WarehouseId,
};

use crate::stock::StockKey;

/// Request priority, shared by reservations and transfers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
}

/// Reservation lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReservationStatus {
    Active,
    Released,
    Expired,
    Consumed,
}

impl ReservationStatus {
    /// Every legal status change. Anything not listed is rejected.
    const TRANSITIONS: &'static [(ReservationStatus, ReservationStatus)] = &[
        (ReservationStatus::Active, ReservationStatus::Released),
        (ReservationStatus::Active, ReservationStatus::Expired),
        (ReservationStatus::Active, ReservationStatus::Consumed),
    ];

    pub fn can_transition_to(self, to: ReservationStatus) -> bool {
        Self::TRANSITIONS.contains(&(self, to))
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, ReservationStatus::Active)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ReservationStatus::Active => "active",
            ReservationStatus::Released => "released",
            ReservationStatus::Expired => "expired",
            ReservationStatus::Consumed => "consumed",
        }
    }
}

impl core::fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Input for placing a hold in one warehouse.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReserveRequest {
    pub item_id: ItemId,
    pub warehouse_id: WarehouseId,
    pub quantity: u64,
    pub order_id: OrderId,
    pub customer_id: CustomerId,
    /// `None` means the hold never expires on its own.
    pub expires_at: Option<DateTime<Utc>>,
    pub priority: Option<Priority>,
}

impl ReserveRequest {
    pub fn new(
        item_id: ItemId,
        warehouse_id: WarehouseId,
        quantity: u64,
        order_id: OrderId,
        customer_id: CustomerId,
    ) -> Self {
        Self {
            item_id,
            warehouse_id,
            quantity,
            order_id,
            customer_id,
            expires_at: None,
            priority: None,
        }
    }

    pub fn expiring_at(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }

    /// Input checks that need no state.
    pub fn validate(&self, now: DateTime<Utc>) -> EngineResult<()> {
        if self.quantity == 0 {
            return Err(EngineError::validation("quantity must be positive"));
        }
        if let Some(expires_at) = self.expires_at {
            if expires_at <= now {
                return Err(EngineError::validation("expires_at must be in the future"));
            }
        }
        Ok(())
    }
}

/// A time-bounded hold on stock in one warehouse.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    id: ReservationId,
    item_id: ItemId,
    warehouse_id: WarehouseId,
    quantity: u64,
    order_id: OrderId,
    customer_id: CustomerId,
    priority: Priority,
    status: ReservationStatus,
    created_at: DateTime<Utc>,
    expires_at: Option<DateTime<Utc>>,
    released_at: Option<DateTime<Utc>>,
    release_reason: Option<String>,
    expired_at: Option<DateTime<Utc>>,
    consumed_at: Option<DateTime<Utc>>,
}

impl Reservation {
    /// Build an Active reservation from a validated request.
    pub fn open(id: ReservationId, request: &ReserveRequest, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            item_id: request.item_id,
            warehouse_id: request.warehouse_id,
            quantity: request.quantity,
            order_id: request.order_id,
            customer_id: request.customer_id,
            priority: request.priority.unwrap_or_default(),
            status: ReservationStatus::Active,
            created_at,
            expires_at: request.expires_at,
            released_at: None,
            release_reason: None,
            expired_at: None,
            consumed_at: None,
        }
    }

    pub fn id_typed(&self) -> ReservationId {
        self.id
    }

    pub fn item_id(&self) -> ItemId {
        self.item_id
    }

    pub fn warehouse_id(&self) -> WarehouseId {
        self.warehouse_id
    }

    pub fn stock_key(&self) -> StockKey {
        StockKey::new(self.item_id, self.warehouse_id)
    }

    pub fn quantity(&self) -> u64 {
        self.quantity
    }

    pub fn order_id(&self) -> OrderId {
        self.order_id
    }

    pub fn customer_id(&self) -> CustomerId {
        self.customer_id
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    /// Stored status, without lazy expiry applied.
    pub fn status(&self) -> ReservationStatus {
        self.status
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    pub fn released_at(&self) -> Option<DateTime<Utc>> {
        self.released_at
    }

    pub fn release_reason(&self) -> Option<&str> {
        self.release_reason.as_deref()
    }

    pub fn expired_at(&self) -> Option<DateTime<Utc>> {
        self.expired_at
    }

    pub fn consumed_at(&self) -> Option<DateTime<Utc>> {
        self.consumed_at
    }

    /// Active in storage but past its expiry.
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        self.status == ReservationStatus::Active && self.expires_at.is_some_and(|at| now > at)
    }

    /// Status as observed at `now`: overdue holds read as Expired before the sweep runs.
    pub fn effective_status(&self, now: DateTime<Utc>) -> ReservationStatus {
        if self.is_overdue(now) {
            ReservationStatus::Expired
        } else {
            self.status
        }
    }

    /// Whether the hold still counts against ATP at `now`.
    pub fn holds_stock(&self, now: DateTime<Utc>) -> bool {
        self.effective_status(now) == ReservationStatus::Active
    }

    fn transition(&mut self, to: ReservationStatus, attempted: &str) -> EngineResult<()> {
        if !self.status.can_transition_to(to) {
            return Err(EngineError::invalid_state(Self::KIND, self.status, attempted));
        }
        self.status = to;
        Ok(())
    }

    pub fn release(&mut self, reason: impl Into<String>, at: DateTime<Utc>) -> EngineResult<()> {
        self.transition(ReservationStatus::Released, "release")?;
        self.released_at = Some(at);
        self.release_reason = Some(reason.into());
        Ok(())
    }

    pub fn expire(&mut self, at: DateTime<Utc>) -> EngineResult<()> {
        self.transition(ReservationStatus::Expired, "expire")?;
        self.expired_at = Some(at);
        Ok(())
    }

    pub fn consume(&mut self, at: DateTime<Utc>) -> EngineResult<()> {
        if self.is_overdue(at) {
            return Err(EngineError::invalid_state(
                Self::KIND,
                ReservationStatus::Expired,
                "consume",
            ));
        }
        self.transition(ReservationStatus::Consumed, "consume")?;
        self.consumed_at = Some(at);
        Ok(())
    }

    /// Move the expiry; only for holds still active at `now`, and only forward in time.
    pub fn extend(&mut self, new_expires_at: DateTime<Utc>, now: DateTime<Utc>) -> EngineResult<()> {
        let current = self.effective_status(now);
        if current != ReservationStatus::Active {
            return Err(EngineError::invalid_state(Self::KIND, current, "extend"));
        }
        if new_expires_at <= now {
            return Err(EngineError::validation("new expiry must be in the future"));
        }
        self.expires_at = Some(new_expires_at);
        Ok(())
    }
}

impl Entity for Reservation {
    type Id = ReservationId;

    const KIND: &'static str = "reservation";

    fn id(&self) -> &Self::Id {
        &self.id
    }
}
