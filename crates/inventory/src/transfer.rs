use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockpilot_core::{EngineError, EngineResult, Entity, ItemId, TransferId, UserId, WarehouseId};

use crate::reservation::Priority;
use crate::stock::StockKey;

/// Transfer workflow status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferStatus {
    Requested,
    Approved,
    InTransit,
    Completed,
    Cancelled,
}

impl TransferStatus {
    /// Every legal status change. `InTransit -> InTransit` is a tracking update.
    const TRANSITIONS: &'static [(TransferStatus, TransferStatus)] = &[
        (TransferStatus::Requested, TransferStatus::Approved),
        (TransferStatus::Requested, TransferStatus::Cancelled),
        (TransferStatus::Approved, TransferStatus::InTransit),
        (TransferStatus::InTransit, TransferStatus::InTransit),
        (TransferStatus::InTransit, TransferStatus::Completed),
    ];

    pub fn can_transition_to(self, to: TransferStatus) -> bool {
        Self::TRANSITIONS.contains(&(self, to))
    }

    /// Validate a transition against the table.
    pub fn check_transition(self, to: TransferStatus) -> EngineResult<()> {
        if self.can_transition_to(to) {
            Ok(())
        } else {
            Err(EngineError::invalid_transition(self, to))
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, TransferStatus::Completed | TransferStatus::Cancelled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TransferStatus::Requested => "requested",
            TransferStatus::Approved => "approved",
            TransferStatus::InTransit => "in_transit",
            TransferStatus::Completed => "completed",
            TransferStatus::Cancelled => "cancelled",
        }
    }
}

impl core::fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Input for `create_transfer_request`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferDraft {
    pub item_id: ItemId,
    pub source_warehouse_id: WarehouseId,
    pub destination_warehouse_id: WarehouseId,
    pub quantity: u64,
    pub requested_by: UserId,
    pub reason: String,
    pub priority: Priority,
}

impl TransferDraft {
    pub fn validate(&self) -> EngineResult<()> {
        if self.source_warehouse_id == self.destination_warehouse_id {
            return Err(EngineError::validation(
                "source and destination warehouse must differ",
            ));
        }
        if self.quantity == 0 {
            return Err(EngineError::validation("quantity must be positive"));
        }
        if self.reason.trim().is_empty() {
            return Err(EngineError::validation("reason cannot be empty"));
        }
        Ok(())
    }
}

/// One recorded workflow step (who moved the transfer where, and when).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub from: Option<TransferStatus>,
    pub to: TransferStatus,
    pub actor: UserId,
    pub at: DateTime<Utc>,
    pub note: Option<String>,
}

/// Tracking fields supplied while goods are moving. `None` leaves a field unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackingUpdate {
    pub carrier: Option<String>,
    pub tracking_number: Option<String>,
    pub current_location: Option<String>,
    pub estimated_arrival: Option<DateTime<Utc>>,
    pub note: Option<String>,
}

impl TrackingUpdate {
    pub fn is_empty(&self) -> bool {
        self.carrier.is_none()
            && self.tracking_number.is_none()
            && self.current_location.is_none()
            && self.estimated_arrival.is_none()
            && self.note.is_none()
    }
}

/// Current tracking state of a shipment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackingInfo {
    pub carrier: Option<String>,
    pub tracking_number: Option<String>,
    pub current_location: Option<String>,
    pub estimated_arrival: Option<DateTime<Utc>>,
    pub last_update_at: Option<DateTime<Utc>>,
}

/// Append-only tracking history entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackingEntry {
    pub at: DateTime<Utc>,
    pub actor: UserId,
    pub location: Option<String>,
    pub note: Option<String>,
}

/// A request to move stock between two warehouses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRequest {
    id: TransferId,
    item_id: ItemId,
    source_warehouse_id: WarehouseId,
    destination_warehouse_id: WarehouseId,
    quantity: u64,
    requested_by: UserId,
    reason: String,
    priority: Priority,
    status: TransferStatus,
    created_at: DateTime<Utc>,
    transitions: Vec<TransitionRecord>,
    tracking: TrackingInfo,
    tracking_history: Vec<TrackingEntry>,
}

impl TransferRequest {
    /// Open a transfer in `Requested` from a validated draft.
    pub fn open(id: TransferId, draft: TransferDraft, at: DateTime<Utc>) -> EngineResult<Self> {
        draft.validate()?;
        Ok(Self {
            id,
            item_id: draft.item_id,
            source_warehouse_id: draft.source_warehouse_id,
            destination_warehouse_id: draft.destination_warehouse_id,
            quantity: draft.quantity,
            requested_by: draft.requested_by,
            reason: draft.reason,
            priority: draft.priority,
            status: TransferStatus::Requested,
            created_at: at,
            transitions: vec![TransitionRecord {
                from: None,
                to: TransferStatus::Requested,
                actor: draft.requested_by,
                at,
                note: None,
            }],
            tracking: TrackingInfo::default(),
            tracking_history: Vec::new(),
        })
    }

    pub fn id_typed(&self) -> TransferId {
        self.id
    }

    pub fn item_id(&self) -> ItemId {
        self.item_id
    }

    pub fn source_warehouse_id(&self) -> WarehouseId {
        self.source_warehouse_id
    }

    pub fn destination_warehouse_id(&self) -> WarehouseId {
        self.destination_warehouse_id
    }

    pub fn source_key(&self) -> StockKey {
        StockKey::new(self.item_id, self.source_warehouse_id)
    }

    pub fn destination_key(&self) -> StockKey {
        StockKey::new(self.item_id, self.destination_warehouse_id)
    }

    pub fn quantity(&self) -> u64 {
        self.quantity
    }

    pub fn requested_by(&self) -> UserId {
        self.requested_by
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn status(&self) -> TransferStatus {
        self.status
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn transitions(&self) -> &[TransitionRecord] {
        &self.transitions
    }

    pub fn tracking(&self) -> &TrackingInfo {
        &self.tracking
    }

    pub fn tracking_history(&self) -> &[TrackingEntry] {
        &self.tracking_history
    }

    /// When the transfer entered `status`, if it ever did.
    pub fn entered_at(&self, status: TransferStatus) -> Option<DateTime<Utc>> {
        self.transitions
            .iter()
            .find(|t| t.to == status)
            .map(|t| t.at)
    }

    /// Whether the source warehouse currently holds stock for this transfer.
    pub fn holds_source_stock(&self) -> bool {
        self.status == TransferStatus::Approved
    }

    fn transition(
        &mut self,
        to: TransferStatus,
        actor: UserId,
        at: DateTime<Utc>,
        note: Option<String>,
    ) -> EngineResult<()> {
        self.status.check_transition(to)?;
        self.transitions.push(TransitionRecord {
            from: Some(self.status),
            to,
            actor,
            at,
            note,
        });
        self.status = to;
        Ok(())
    }

    /// Steps that share a target with another row of the table (`InTransit`)
    /// must also start from one specific status.
    fn require_status(&self, from: TransferStatus, to: TransferStatus) -> EngineResult<()> {
        if self.status == from {
            Ok(())
        } else {
            Err(EngineError::invalid_transition(self.status, to))
        }
    }

    pub fn approve(&mut self, actor: UserId, at: DateTime<Utc>) -> EngineResult<()> {
        self.transition(TransferStatus::Approved, actor, at, None)
    }

    /// Goods leave the source warehouse.
    pub fn ship(&mut self, actor: UserId, at: DateTime<Utc>) -> EngineResult<()> {
        self.require_status(TransferStatus::Approved, TransferStatus::InTransit)?;
        self.transition(TransferStatus::InTransit, actor, at, None)
    }

    pub fn record_tracking(
        &mut self,
        update: TrackingUpdate,
        actor: UserId,
        at: DateTime<Utc>,
    ) -> EngineResult<()> {
        self.require_status(TransferStatus::InTransit, TransferStatus::InTransit)?;
        if update.is_empty() {
            return Err(EngineError::validation("tracking update carries no data"));
        }

        if update.carrier.is_some() {
            self.tracking.carrier = update.carrier;
        }
        if update.tracking_number.is_some() {
            self.tracking.tracking_number = update.tracking_number;
        }
        if update.current_location.is_some() {
            self.tracking.current_location = update.current_location.clone();
        }
        if update.estimated_arrival.is_some() {
            self.tracking.estimated_arrival = update.estimated_arrival;
        }
        self.tracking.last_update_at = Some(at);

        self.tracking_history.push(TrackingEntry {
            at,
            actor,
            location: update.current_location,
            note: update.note,
        });
        Ok(())
    }

    /// Goods received at the destination.
    pub fn complete(&mut self, actor: UserId, at: DateTime<Utc>) -> EngineResult<()> {
        self.transition(TransferStatus::Completed, actor, at, None)
    }

    pub fn cancel(
        &mut self,
        actor: UserId,
        at: DateTime<Utc>,
        reason: Option<String>,
    ) -> EngineResult<()> {
        self.transition(TransferStatus::Cancelled, actor, at, reason)
    }
}

impl Entity for TransferRequest {
    type Id = TransferId;

    const KIND: &'static str = "transfer";

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_draft() -> TransferDraft {
        TransferDraft {
            item_id: ItemId::new(),
            source_warehouse_id: WarehouseId::new(),
            destination_warehouse_id: WarehouseId::new(),
            quantity: 15,
            requested_by: UserId::new(),
            reason: "rebalance for holiday demand".to_string(),
            priority: Priority::Normal,
        }
    }

    fn opened() -> TransferRequest {
        TransferRequest::open(TransferId::new(), test_draft(), Utc::now()).unwrap()
    }

    #[test]
    fn draft_validation_rejects_bad_input() {
        let mut same = test_draft();
        same.destination_warehouse_id = same.source_warehouse_id;
        assert!(matches!(same.validate(), Err(EngineError::Validation(_))));

        let mut empty = test_draft();
        empty.quantity = 0;
        assert!(matches!(empty.validate(), Err(EngineError::Validation(_))));

        let mut no_reason = test_draft();
        no_reason.reason = "  ".to_string();
        assert!(matches!(no_reason.validate(), Err(EngineError::Validation(_))));
    }

    #[test]
    fn happy_path_records_every_transition() {
        let mut transfer = opened();
        let approver = UserId::new();
        let driver = UserId::new();
        let now = Utc::now();

        transfer.approve(approver, now).unwrap();
        assert!(transfer.holds_source_stock());
        transfer.ship(driver, now).unwrap();
        transfer
            .record_tracking(
                TrackingUpdate {
                    carrier: Some("Northline Freight".to_string()),
                    current_location: Some("Depot 4".to_string()),
                    ..TrackingUpdate::default()
                },
                driver,
                now,
            )
            .unwrap();
        transfer.complete(approver, now).unwrap();

        assert_eq!(transfer.status(), TransferStatus::Completed);
        let path: Vec<_> = transfer.transitions().iter().map(|t| t.to).collect();
        assert_eq!(
            path,
            vec![
                TransferStatus::Requested,
                TransferStatus::Approved,
                TransferStatus::InTransit,
                TransferStatus::Completed,
            ]
        );
        assert_eq!(transfer.transitions()[1].actor, approver);
        assert_eq!(transfer.tracking().carrier.as_deref(), Some("Northline Freight"));
        assert_eq!(transfer.tracking_history().len(), 1);
        assert_eq!(transfer.entered_at(TransferStatus::InTransit), Some(now));
    }

    #[test]
    fn completing_a_requested_transfer_is_an_invalid_transition() {
        let mut transfer = opened();
        let err = transfer.complete(UserId::new(), Utc::now()).unwrap_err();
        assert_eq!(err, EngineError::invalid_transition("requested", "completed"));
        assert_eq!(transfer.status(), TransferStatus::Requested);
        assert_eq!(transfer.transitions().len(), 1);
    }

    #[test]
    fn cancellation_is_only_legal_before_approval() {
        let mut transfer = opened();
        transfer.approve(UserId::new(), Utc::now()).unwrap();
        let err = transfer.cancel(UserId::new(), Utc::now(), None).unwrap_err();
        assert_eq!(err, EngineError::invalid_transition("approved", "cancelled"));

        let mut fresh = opened();
        fresh
            .cancel(UserId::new(), Utc::now(), Some("duplicate request".to_string()))
            .unwrap();
        assert!(fresh.status().is_terminal());
    }

    #[test]
    fn tracking_is_rejected_outside_transit() {
        let mut transfer = opened();
        let update = TrackingUpdate {
            current_location: Some("Dock".to_string()),
            ..TrackingUpdate::default()
        };
        assert!(matches!(
            transfer.record_tracking(update, UserId::new(), Utc::now()),
            Err(EngineError::InvalidTransition { .. })
        ));
        assert!(transfer.tracking_history().is_empty());
    }

    #[test]
    fn approved_transfer_cannot_take_tracking_before_shipping() {
        let mut transfer = opened();
        transfer.approve(UserId::new(), Utc::now()).unwrap();

        let err = transfer
            .record_tracking(
                TrackingUpdate {
                    current_location: Some("Dock".to_string()),
                    ..TrackingUpdate::default()
                },
                UserId::new(),
                Utc::now(),
            )
            .unwrap_err();
        assert_eq!(err, EngineError::invalid_transition("approved", "in_transit"));
        assert!(transfer.tracking_history().is_empty());
        assert_eq!(transfer.tracking().current_location, None);
        assert_eq!(transfer.status(), TransferStatus::Approved);
    }

    #[test]
    fn shipping_twice_is_rejected() {
        let mut transfer = opened();
        transfer.approve(UserId::new(), Utc::now()).unwrap();
        transfer.ship(UserId::new(), Utc::now()).unwrap();

        let err = transfer.ship(UserId::new(), Utc::now()).unwrap_err();
        assert_eq!(err, EngineError::invalid_transition("in_transit", "in_transit"));
        assert_eq!(transfer.transitions().len(), 3);
    }
}
