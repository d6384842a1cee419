use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockpilot_core::{ItemId, SnapshotId, WarehouseId};

use crate::stock::StockRecord;

/// One item's quantities as captured in a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotLine {
    pub item_id: ItemId,
    pub on_hand: u64,
    pub reserved: u64,
}

/// Read-only capture of a warehouse's stock records at a point in time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    id: SnapshotId,
    warehouse_id: WarehouseId,
    taken_at: DateTime<Utc>,
    lines: Vec<SnapshotLine>,
}

impl Snapshot {
    pub fn capture(
        id: SnapshotId,
        warehouse_id: WarehouseId,
        taken_at: DateTime<Utc>,
        records: impl IntoIterator<Item = StockRecord>,
    ) -> Self {
        let mut lines: Vec<SnapshotLine> = records
            .into_iter()
            .filter(|r| r.warehouse_id() == warehouse_id)
            .map(|r| SnapshotLine {
                item_id: r.item_id(),
                on_hand: r.on_hand(),
                reserved: r.reserved(),
            })
            .collect();
        lines.sort_by_key(|l| l.item_id);
        Self {
            id,
            warehouse_id,
            taken_at,
            lines,
        }
    }

    pub fn id(&self) -> SnapshotId {
        self.id
    }

    pub fn warehouse_id(&self) -> WarehouseId {
        self.warehouse_id
    }

    pub fn taken_at(&self) -> DateTime<Utc> {
        self.taken_at
    }

    pub fn lines(&self) -> &[SnapshotLine] {
        &self.lines
    }

    pub fn line(&self, item_id: ItemId) -> Option<&SnapshotLine> {
        self.lines.iter().find(|l| l.item_id == item_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscrepancyKind {
    /// Two snapshots disagree on on-hand quantity.
    SnapshotComparison,
    /// Ledger on-hand differs from an external "should equal" source.
    Synchronization,
    /// Ledger `reserved` differs from the holds that explain it.
    ReservationDrift,
}

/// One mismatch between an expected and an observed quantity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Discrepancy {
    pub item_id: ItemId,
    pub warehouse_id: WarehouseId,
    pub expected_quantity: u64,
    pub actual_quantity: u64,
    /// `actual - expected`.
    pub delta: i64,
    pub detected_at: DateTime<Utc>,
}

impl Discrepancy {
    pub fn between(
        item_id: ItemId,
        warehouse_id: WarehouseId,
        expected_quantity: u64,
        actual_quantity: u64,
        detected_at: DateTime<Utc>,
    ) -> Self {
        let delta = (i128::from(actual_quantity) - i128::from(expected_quantity))
            .clamp(i128::from(i64::MIN), i128::from(i64::MAX)) as i64;
        Self {
            item_id,
            warehouse_id,
            expected_quantity,
            actual_quantity,
            delta,
            detected_at,
        }
    }
}

/// Immutable list of mismatches; never acted upon by the engine itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscrepancyReport {
    kind: DiscrepancyKind,
    generated_at: DateTime<Utc>,
    discrepancies: Vec<Discrepancy>,
}

impl DiscrepancyReport {
    pub fn new(
        kind: DiscrepancyKind,
        generated_at: DateTime<Utc>,
        discrepancies: Vec<Discrepancy>,
    ) -> Self {
        Self {
            kind,
            generated_at,
            discrepancies,
        }
    }

    pub fn kind(&self) -> DiscrepancyKind {
        self.kind
    }

    pub fn generated_at(&self) -> DateTime<Utc> {
        self.generated_at
    }

    pub fn discrepancies(&self) -> &[Discrepancy] {
        &self.discrepancies
    }

    pub fn is_clean(&self) -> bool {
        self.discrepancies.is_empty()
    }

    pub fn len(&self) -> usize {
        self.discrepancies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.discrepancies.is_empty()
    }
}

/// On-hand differences between two snapshots, `a` taken as expected and `b`
/// as actual. Items present on only one side count as zero on the other.
pub fn compare_snapshots(a: &Snapshot, b: &Snapshot) -> DiscrepancyReport {
    let mut quantities: BTreeMap<(WarehouseId, ItemId), (u64, u64)> = BTreeMap::new();
    for line in a.lines() {
        quantities.entry((a.warehouse_id, line.item_id)).or_default().0 = line.on_hand;
    }
    for line in b.lines() {
        quantities.entry((b.warehouse_id, line.item_id)).or_default().1 = line.on_hand;
    }

    let detected_at = a.taken_at.max(b.taken_at);
    let discrepancies = quantities
        .into_iter()
        .filter(|(_, (expected, actual))| expected != actual)
        .map(|((warehouse_id, item_id), (expected, actual))| {
            Discrepancy::between(item_id, warehouse_id, expected, actual, detected_at)
        })
        .collect();

    DiscrepancyReport::new(DiscrepancyKind::SnapshotComparison, detected_at, discrepancies)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stock::StockKey;
    use chrono::Duration;

    fn record(item_id: ItemId, warehouse_id: WarehouseId, on_hand: u64) -> StockRecord {
        StockRecord::zero(StockKey::new(item_id, warehouse_id))
            .apply(on_hand as i64, 0, Utc::now())
            .unwrap()
    }

    #[test]
    fn capture_keeps_only_the_snapshot_warehouse() {
        let warehouse = WarehouseId::new();
        let other = WarehouseId::new();
        let item = ItemId::new();
        let snapshot = Snapshot::capture(
            SnapshotId::new(),
            warehouse,
            Utc::now(),
            vec![record(item, warehouse, 4), record(ItemId::new(), other, 9)],
        );
        assert_eq!(snapshot.lines().len(), 1);
        assert_eq!(snapshot.line(item).map(|l| l.on_hand), Some(4));
    }

    #[test]
    fn compare_reports_changed_added_and_removed_items() {
        let warehouse = WarehouseId::new();
        let (steady, shrunk, gone, new) = (ItemId::new(), ItemId::new(), ItemId::new(), ItemId::new());
        let t0 = Utc::now();

        let a = Snapshot::capture(
            SnapshotId::new(),
            warehouse,
            t0,
            vec![
                record(steady, warehouse, 10),
                record(shrunk, warehouse, 10),
                record(gone, warehouse, 3),
            ],
        );
        let b = Snapshot::capture(
            SnapshotId::new(),
            warehouse,
            t0 + Duration::hours(1),
            vec![
                record(steady, warehouse, 10),
                record(shrunk, warehouse, 7),
                record(new, warehouse, 2),
            ],
        );

        let report = compare_snapshots(&a, &b);
        assert_eq!(report.kind(), DiscrepancyKind::SnapshotComparison);
        assert_eq!(report.len(), 3);

        let delta_of = |item| {
            report
                .discrepancies()
                .iter()
                .find(|d| d.item_id == item)
                .map(|d| d.delta)
        };
        assert_eq!(delta_of(steady), None);
        assert_eq!(delta_of(shrunk), Some(-3));
        assert_eq!(delta_of(gone), Some(-3));
        assert_eq!(delta_of(new), Some(2));
        assert_eq!(report.generated_at(), t0 + Duration::hours(1));
    }

    #[test]
    fn identical_snapshots_produce_a_clean_report() {
        let warehouse = WarehouseId::new();
        let records = vec![record(ItemId::new(), warehouse, 5)];
        let a = Snapshot::capture(SnapshotId::new(), warehouse, Utc::now(), records.clone());
        let b = Snapshot::capture(SnapshotId::new(), warehouse, Utc::now(), records);
        assert!(compare_snapshots(&a, &b).is_clean());
    }
}
