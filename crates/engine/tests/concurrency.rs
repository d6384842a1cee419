use std::sync::{Arc, Barrier};
use std::thread;

use stockpilot_core::{CustomerId, EngineError, ItemId, OrderId, WarehouseId};
use stockpilot_engine::{InMemoryCatalog, InMemoryWarehouseDirectory, InventoryEngine};
use stockpilot_inventory::{AdjustmentReason, AllocationRequest, ReserveRequest};

struct Shared {
    engine: Arc<InventoryEngine>,
    item: ItemId,
    warehouses: Vec<WarehouseId>,
}

fn shared(stock_per_warehouse: &[i64]) -> Shared {
    stockpilot_observability::init();
    let item = ItemId::new();
    let catalog = Arc::new(InMemoryCatalog::with_items([item]));
    let directory = Arc::new(InMemoryWarehouseDirectory::new());
    let engine = InventoryEngine::builder(catalog, directory.clone()).build();

    let warehouses = stock_per_warehouse
        .iter()
        .enumerate()
        .map(|(n, on_hand)| {
            let id = directory.add_active(format!("WH-{n}")).unwrap();
            engine
                .adjust_stock(item, id, *on_hand, AdjustmentReason::Receipt)
                .unwrap();
            id
        })
        .collect();

    Shared {
        engine: Arc::new(engine),
        item,
        warehouses,
    }
}

#[test]
fn racing_reservations_never_oversell() {
    const THREADS: usize = 16;
    const QUANTITY: u64 = 5;
    const WINNERS: u64 = 6;

    let s = shared(&[(QUANTITY * WINNERS) as i64]);
    let warehouse = s.warehouses[0];
    let barrier = Arc::new(Barrier::new(THREADS));

    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let engine = s.engine.clone();
            let barrier = barrier.clone();
            let item = s.item;
            thread::spawn(move || {
                barrier.wait();
                engine.reserve(ReserveRequest::new(
                    item,
                    warehouse,
                    QUANTITY,
                    OrderId::new(),
                    CustomerId::new(),
                ))
            })
        })
        .collect();

    let mut succeeded = 0u64;
    for handle in handles {
        match handle.join().unwrap() {
            Ok(_) => succeeded += 1,
            Err(EngineError::InsufficientStock { .. }) => {}
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    assert_eq!(succeeded, WINNERS);
    let record = s.engine.stock(s.item, warehouse).unwrap();
    assert_eq!(record.reserved(), QUANTITY * WINNERS);
    assert_eq!(record.available(), 0);
}

#[test]
fn concurrent_allocations_split_stock_without_overlap() {
    const THREADS: usize = 8;

    let s = shared(&[12, 9, 7]);
    let barrier = Arc::new(Barrier::new(THREADS));

    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let engine = s.engine.clone();
            let barrier = barrier.clone();
            let item = s.item;
            thread::spawn(move || {
                barrier.wait();
                engine
                    .allocate(AllocationRequest::new(item, 5, CustomerId::new(), OrderId::new()))
                    .unwrap()
            })
        })
        .collect();

    let allocated: u64 = handles
        .into_iter()
        .map(|h| h.join().unwrap().allocated)
        .sum();
    // A plan works from one ATP read, so losing a race can leave it short.
    assert!(allocated <= 28);

    let reserved: u64 = s
        .warehouses
        .iter()
        .map(|wh| {
            let record = s.engine.stock(s.item, *wh).unwrap();
            assert!(record.reserved() <= record.on_hand());
            record.reserved()
        })
        .sum();
    assert_eq!(reserved, allocated);
}

#[test]
fn releases_interleaved_with_reserves_keep_the_ledger_balanced() {
    const THREADS: usize = 8;
    const ROUNDS: usize = 50;

    let s = shared(&[20]);
    let warehouse = s.warehouses[0];

    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let engine = s.engine.clone();
            let item = s.item;
            thread::spawn(move || {
                for _ in 0..ROUNDS {
                    let request =
                        ReserveRequest::new(item, warehouse, 3, OrderId::new(), CustomerId::new());
                    if let Ok(reservation) = engine.reserve(request) {
                        assert!(engine.release(reservation.id_typed(), "churn").unwrap());
                    }
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let record = s.engine.stock(s.item, warehouse).unwrap();
    assert_eq!((record.on_hand(), record.reserved()), (20, 0));
}
