use std::sync::Arc;
use std::thread;
use std::time::Duration;

use pretty_assertions::assert_eq;
use tempfile::tempdir;

use taxi_pipeline::{AggregateStore, Backoff, PeriodAggregate};

fn period(day: u32) -> PeriodAggregate {
    PeriodAggregate {
        period: format!("2023-03-{:02}", day),
        num_trips: day as i64,
        total_amount: day as f64 * 1.5,
        trip_distance: 0.25,
        passenger_count: 1,
    }
}

#[test]
fn test_concurrent_upserts_keep_every_period() {
    let _ = env_logger::try_init();
    let dir = tempdir().unwrap();
    let path = dir.path().join("outputs").join("trips_by_week.csv");
    let backoff = Backoff::new(500, Duration::from_millis(1), Duration::from_millis(10));
    let store = Arc::new(AggregateStore::new(&path, backoff));

    let handles = (1..=8)
        .map(|day| {
            let store = store.clone();
            thread::spawn(move || store.upsert(period(day)).map_err(|err| err.to_string()))
        })
        .collect::<Vec<_>>();
    for handle in handles {
        handle.join().unwrap().unwrap();
    }

    let rows = store.rows().unwrap();
    assert_eq!(rows, (1..=8).map(period).collect::<Vec<_>>());
    assert!(!dir.path().join("outputs").join("trips_by_week.csv.lock").exists());
}

#[test]
fn test_backfill_out_of_order() {
    let _ = env_logger::try_init();
    let dir = tempdir().unwrap();
    let store = AggregateStore::new(&dir.path().join("trips_by_week.csv"), Backoff::immediate(0));

    for day in &[22, 1, 15, 8] {
        store.upsert(period(*day)).unwrap();
    }
    let mut rerun = period(8);
    rerun.num_trips = 100;
    store.upsert(rerun.clone()).unwrap();

    let periods = store.rows().unwrap().into_iter().map(|r| r.period).collect::<Vec<_>>();
    assert_eq!(periods, vec!["2023-03-01", "2023-03-08", "2023-03-15", "2023-03-22"]);
    assert_eq!(store.get("2023-03-08").unwrap(), Some(rerun));
}
