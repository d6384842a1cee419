use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockpilot_core::{EngineError, EngineResult, ItemId, WarehouseId};

/// Ledger key: one catalog item in one warehouse.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StockKey {
    pub item_id: ItemId,
    pub warehouse_id: WarehouseId,
}

impl StockKey {
    pub fn new(item_id: ItemId, warehouse_id: WarehouseId) -> Self {
        Self {
            item_id,
            warehouse_id,
        }
    }
}

impl core::fmt::Display for StockKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}@{}", self.item_id, self.warehouse_id)
    }
}

/// On-hand and reserved quantity for one (item, warehouse) pair.
///
/// Invariant: `reserved <= on_hand`. Values are only ever produced through
/// [`StockRecord::apply`], which refuses to build a record breaking it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockRecord {
    item_id: ItemId,
    warehouse_id: WarehouseId,
    on_hand: u64,
    reserved: u64,
    last_movement_at: Option<DateTime<Utc>>,
}

impl StockRecord {
    /// A record for a pair that has never moved.
    pub fn zero(key: StockKey) -> Self {
        Self {
            item_id: key.item_id,
            warehouse_id: key.warehouse_id,
            on_hand: 0,
            reserved: 0,
            last_movement_at: None,
        }
    }

    pub fn key(&self) -> StockKey {
        StockKey::new(self.item_id, self.warehouse_id)
    }

    pub fn item_id(&self) -> ItemId {
        self.item_id
    }

    pub fn warehouse_id(&self) -> WarehouseId {
        self.warehouse_id
    }

    pub fn on_hand(&self) -> u64 {
        self.on_hand
    }

    pub fn reserved(&self) -> u64 {
        self.reserved
    }

    pub fn available(&self) -> u64 {
        self.on_hand.saturating_sub(self.reserved)
    }

    pub fn last_movement_at(&self) -> Option<DateTime<Utc>> {
        self.last_movement_at
    }

    /// Compute the record that results from applying both deltas at once.
    ///
    /// Fails with `InvariantViolation` if the result would have a negative
    /// quantity or more reserved than on hand. `self` is never modified.
    pub fn apply(
        &self,
        on_hand_delta: i64,
        reserved_delta: i64,
        at: DateTime<Utc>,
    ) -> EngineResult<StockRecord> {
        let on_hand = i128::from(self.on_hand) + i128::from(on_hand_delta);
        let reserved = i128::from(self.reserved) + i128::from(reserved_delta);

        if on_hand < 0 {
            return Err(EngineError::invariant(format!(
                "on_hand cannot go negative for {} (on_hand={}, delta={})",
                self.key(),
                self.on_hand,
                on_hand_delta
            )));
        }
        if reserved < 0 {
            return Err(EngineError::invariant(format!(
                "reserved cannot go negative for {} (reserved={}, delta={})",
                self.key(),
                self.reserved,
                reserved_delta
            )));
        }
        if reserved > on_hand {
            return Err(EngineError::invariant(format!(
                "reserved ({reserved}) cannot exceed on_hand ({on_hand}) for {}",
                self.key()
            )));
        }

        let on_hand = u64::try_from(on_hand)
            .map_err(|_| EngineError::invariant(format!("on_hand overflow for {}", self.key())))?;
        let reserved = u64::try_from(reserved)
            .map_err(|_| EngineError::invariant(format!("reserved overflow for {}", self.key())))?;

        Ok(StockRecord {
            item_id: self.item_id,
            warehouse_id: self.warehouse_id,
            on_hand,
            reserved,
            last_movement_at: Some(at),
        })
    }
}

/// Why an ad-hoc stock adjustment was made (audit metadata only).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdjustmentReason {
    /// Goods received from a supplier.
    Receipt,
    /// Sold outside the reservation flow (e.g. counter sale).
    Sale,
    /// Returned by a customer.
    Return,
    /// Correction after a physical count or reconciliation.
    Correction,
    /// Damaged or lost.
    Shrinkage,
    /// Shipped out as part of a transfer.
    TransferOut,
    /// Received as part of a transfer.
    TransferIn,
}

impl AdjustmentReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            AdjustmentReason::Receipt => "receipt",
            AdjustmentReason::Sale => "sale",
            AdjustmentReason::Return => "return",
            AdjustmentReason::Correction => "correction",
            AdjustmentReason::Shrinkage => "shrinkage",
            AdjustmentReason::TransferOut => "transfer_out",
            AdjustmentReason::TransferIn => "transfer_in",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn test_key() -> StockKey {
        StockKey::new(ItemId::new(), WarehouseId::new())
    }

    fn stocked(on_hand: u64, reserved: u64) -> StockRecord {
        StockRecord::zero(test_key())
            .apply(on_hand as i64, reserved as i64, Utc::now())
            .unwrap()
    }

    #[test]
    fn zero_record_has_nothing_available() {
        let record = StockRecord::zero(test_key());
        assert_eq!(record.on_hand(), 0);
        assert_eq!(record.reserved(), 0);
        assert_eq!(record.available(), 0);
        assert!(record.last_movement_at().is_none());
    }

    #[test]
    fn apply_moves_both_quantities_together() {
        let at = Utc::now();
        let next = stocked(100, 30).apply(-30, -30, at).unwrap();
        assert_eq!(next.on_hand(), 70);
        assert_eq!(next.reserved(), 0);
        assert_eq!(next.last_movement_at(), Some(at));
    }

    #[test]
    fn apply_rejects_reserving_more_than_on_hand() {
        let err = stocked(10, 0).apply(0, 11, Utc::now()).unwrap_err();
        match err {
            EngineError::InvariantViolation(msg) if msg.contains("cannot exceed") => {}
            other => panic!("expected invariant violation, got {other:?}"),
        }
    }

    #[test]
    fn apply_rejects_negative_quantities() {
        assert!(matches!(
            stocked(5, 0).apply(-6, 0, Utc::now()),
            Err(EngineError::InvariantViolation(_))
        ));
        assert!(matches!(
            stocked(5, 2).apply(0, -3, Utc::now()),
            Err(EngineError::InvariantViolation(_))
        ));
    }

    #[test]
    fn shrinking_on_hand_below_reserved_is_rejected() {
        let err = stocked(10, 8).apply(-5, 0, Utc::now()).unwrap_err();
        assert!(err.is_fatal());
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: whatever sequence of deltas is attempted, every record that
        /// `apply` accepts satisfies `0 <= reserved <= on_hand`, and rejected
        /// deltas leave the previous record as the current one.
        #[test]
        fn accepted_records_never_break_the_invariant(
            deltas in prop::collection::vec((-50i64..50i64, -50i64..50i64), 1..64)
        ) {
            let mut record = StockRecord::zero(test_key());
            for (on_hand_delta, reserved_delta) in deltas {
                if let Ok(next) = record.apply(on_hand_delta, reserved_delta, Utc::now()) {
                    prop_assert!(next.reserved() <= next.on_hand());
                    prop_assert_eq!(next.available(), next.on_hand() - next.reserved());
                    record = next;
                }
            }
            prop_assert!(record.reserved() <= record.on_hand());
        }
    }
}
