use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::NaiveDate;
use ulid::Ulid;

use staybook::clock::FixedClock;
use staybook::config::Config;
use staybook::geo::InMemoryGeoIndex;
use staybook::model::{NewStay, ReservationRequest};
use staybook::{Engine, EngineError};

fn d(y: i32, m: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, day).unwrap()
}

fn data_dir() -> PathBuf {
    let dir = std::env::temp_dir().join(format!("staybook_recovery_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

fn open(path: &Path) -> Engine {
    Engine::new(path.to_path_buf(), Arc::new(InMemoryGeoIndex::new()))
        .unwrap()
        .with_clock(Arc::new(FixedClock::new(d(2024, 1, 1))))
}

#[tokio::test]
async fn restart_keeps_bookings_and_their_nights() {
    let path = data_dir().join("staybook.wal");
    let (stay_id, kept) = {
        let engine = open(&path);
        let stay = engine
            .create_stay(NewStay::new("host", "7 Mill Ln", 2))
            .await
            .unwrap();
        let kept = engine
            .create_reservation(ReservationRequest::new(stay.id, "alice", d(2024, 2, 1), d(2024, 2, 5)))
            .await
            .unwrap();
        let dropped = engine
            .create_reservation(ReservationRequest::new(stay.id, "bob", d(2024, 3, 1), d(2024, 3, 2)))
            .await
            .unwrap();
        engine.cancel_reservation(dropped.id, "bob").await.unwrap();
        (stay.id, kept)
    };

    let engine = open(&path);
    assert_eq!(engine.list_by_stay(stay_id).await, vec![kept.clone()]);
    assert_eq!(
        engine.find_by_id_for_guest(kept.id, "alice").await,
        Some(kept)
    );
    let clash = engine
        .create_reservation(ReservationRequest::new(stay_id, "carol", d(2024, 2, 4), d(2024, 2, 6)))
        .await;
    assert_eq!(
        clash,
        Err(EngineError::ReservationCollision {
            stay_id,
            night: d(2024, 2, 4)
        })
    );
    // The cancelled nights came back free.
    engine
        .create_reservation(ReservationRequest::new(stay_id, "carol", d(2024, 3, 1), d(2024, 3, 2)))
        .await
        .unwrap();
}

#[tokio::test]
async fn corrupt_tail_is_dropped_and_log_stays_writable() {
    let path = data_dir().join("staybook.wal");
    let stay_id = {
        let engine = open(&path);
        engine
            .create_stay(NewStay::new("host", "7 Mill Ln", 2))
            .await
            .unwrap()
            .id
    };
    {
        let mut f = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        f.write_all(&[0x2A, 0, 0, 0, 0xDE, 0xAD]).unwrap();
    }

    let booked = {
        let engine = open(&path);
        assert!(engine.find_stay(stay_id).await.is_some());
        engine
            .create_reservation(ReservationRequest::new(stay_id, "alice", d(2024, 2, 1), d(2024, 2, 3)))
            .await
            .unwrap()
    };

    let engine = open(&path);
    assert_eq!(engine.list_by_stay(stay_id).await, vec![booked]);
}

#[tokio::test]
async fn compacted_log_restores_same_state() {
    let path = data_dir().join("staybook.wal");
    let (stay_id, live) = {
        let engine = open(&path);
        let stay = engine
            .create_stay(NewStay::new("host", "7 Mill Ln", 2))
            .await
            .unwrap();
        for day in 1..15 {
            let r = engine
                .create_reservation(ReservationRequest::new(stay.id, "churn", d(2024, 4, day), d(2024, 4, day + 1)))
                .await
                .unwrap();
            engine.cancel_reservation(r.id, "churn").await.unwrap();
        }
        let live = engine
            .create_reservation(ReservationRequest::new(stay.id, "alice", d(2024, 5, 1), d(2024, 5, 4)))
            .await
            .unwrap();
        engine.compact_wal().await.unwrap();
        (stay.id, live)
    };

    let engine = open(&path);
    assert_eq!(engine.stay_count(), 1);
    assert_eq!(engine.list_by_stay(stay_id).await, vec![live]);
    assert_eq!(
        engine
            .occupied_nights(stay_id, NaiveDate::MIN, NaiveDate::MAX)
            .await,
        vec![d(2024, 5, 1), d(2024, 5, 2), d(2024, 5, 3)]
    );
}

#[tokio::test]
async fn from_config_creates_data_dir() {
    let config = Config {
        data_dir: data_dir().join("nested"),
        ..Config::default()
    };
    let engine = Engine::from_config(&config, Arc::new(InMemoryGeoIndex::new())).unwrap();
    engine
        .create_stay(NewStay::new("host", "7 Mill Ln", 2))
        .await
        .unwrap();
    assert!(config.wal_path().exists());
}
