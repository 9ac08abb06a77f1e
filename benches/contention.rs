use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use chrono::{Days, NaiveDate};
use ulid::Ulid;

use staybook::clock::FixedClock;
use staybook::geo::InMemoryGeoIndex;
use staybook::model::{GeoPoint, NewStay, NightRange, ReservationRequest, StayId};
use staybook::{Engine, EngineError, SearchQuery};

fn base() -> NaiveDate {
    NaiveDate::from_ymd_opt(2030, 1, 1).expect("valid date")
}

/// xorshift64; good enough to scatter dates.
struct Rng(u64);

impl Rng {
    fn next(&mut self) -> u64 {
        self.0 ^= self.0 << 13;
        self.0 ^= self.0 >> 7;
        self.0 ^= self.0 << 17;
        self.0
    }

    fn below(&mut self, n: u64) -> u64 {
        self.next() % n
    }
}

fn percentile(sorted: &[Duration], p: f64) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let idx = ((sorted.len() as f64) * p / 100.0) as usize;
    sorted[idx.min(sorted.len() - 1)]
}

fn print_latency(label: &str, latencies: &mut [Duration]) {
    if latencies.is_empty() {
        println!("  {label}: no samples");
        return;
    }
    latencies.sort();
    let total: Duration = latencies.iter().sum();
    let avg = total / latencies.len() as u32;
    println!("  {label}:");
    println!(
        "    n={}, avg={:.3}ms, p50={:.3}ms, p95={:.3}ms, p99={:.3}ms, max={:.3}ms",
        latencies.len(),
        avg.as_secs_f64() * 1000.0,
        percentile(latencies, 50.0).as_secs_f64() * 1000.0,
        percentile(latencies, 95.0).as_secs_f64() * 1000.0,
        percentile(latencies, 99.0).as_secs_f64() * 1000.0,
        latencies[latencies.len() - 1].as_secs_f64() * 1000.0,
    );
}

fn open_engine(geo: Arc<InMemoryGeoIndex>) -> Arc<Engine> {
    let dir = std::env::temp_dir().join(format!("staybook_bench_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).expect("create bench dir");
    let engine = Engine::new(dir.join("staybook.wal"), geo)
        .expect("open engine")
        .with_clock(Arc::new(FixedClock::new(base())));
    Arc::new(engine)
}

async fn setup(engine: &Engine, geo: &InMemoryGeoIndex, n: usize) -> Vec<StayId> {
    let mut rng = Rng(0x9E37_79B9_7F4A_7C15);
    let mut ids = Vec::with_capacity(n);
    for i in 0..n {
        let point = GeoPoint::new(
            48.80 + rng.below(1000) as f64 / 5000.0,
            2.25 + rng.below(1000) as f64 / 5000.0,
        );
        let stay = engine
            .create_stay(NewStay::new(format!("host{}", i % 50), format!("{i} Rue Test"), 1 + (i % 6) as u32).with_location(point))
            .await
            .expect("create stay");
        geo.insert(stay.id, point);
        ids.push(stay.id);
    }
    println!("  created {n} stays");
    ids
}

/// Many tasks fight over one stay. Measures serialization cost.
async fn phase1_hot_stay(engine: &Arc<Engine>, stay_id: StayId) {
    let n_tasks = 32;
    let n_per_task = 100;
    let booked = Arc::new(AtomicU64::new(0));
    let collided = Arc::new(AtomicU64::new(0));
    let start = Instant::now();

    let mut handles = Vec::new();
    for t in 0..n_tasks {
        let engine = engine.clone();
        let booked = booked.clone();
        let collided = collided.clone();
        handles.push(tokio::spawn(async move {
            let mut rng = Rng(0xA5A5_0000 + t as u64);
            let mut latencies = Vec::with_capacity(n_per_task);
            for _ in 0..n_per_task {
                let checkin = base() + Days::new(rng.below(700));
                let checkout = checkin + Days::new(1 + rng.below(5));
                let t0 = Instant::now();
                match engine
                    .create_reservation(ReservationRequest::new(stay_id, format!("guest{t}"), checkin, checkout))
                    .await
                {
                    Ok(_) => booked.fetch_add(1, Ordering::Relaxed),
                    Err(EngineError::ReservationCollision { .. }) => collided.fetch_add(1, Ordering::Relaxed),
                    Err(e) => panic!("unexpected error: {e}"),
                };
                latencies.push(t0.elapsed());
            }
            latencies
        }));
    }

    let mut latencies = Vec::new();
    for h in handles {
        latencies.extend(h.await.expect("task panicked"));
    }
    let elapsed = start.elapsed();
    let total = n_tasks * n_per_task;
    println!(
        "  {total} attempts in {:.2}s = {:.0} ops/sec ({} booked, {} collisions)",
        elapsed.as_secs_f64(),
        total as f64 / elapsed.as_secs_f64(),
        booked.load(Ordering::Relaxed),
        collided.load(Ordering::Relaxed),
    );
    print_latency("create latency", &mut latencies);
}

/// Tasks spread over many stays; should scale with cores.
async fn phase2_cold_stays(engine: &Arc<Engine>, stays: &[StayId]) {
    let n_tasks = 32;
    let n_per_task = 200;
    let start = Instant::now();

    let mut handles = Vec::new();
    for t in 0..n_tasks {
        let engine = engine.clone();
        let stays = stays.to_vec();
        handles.push(tokio::spawn(async move {
            let mut rng = Rng(0x5A5A_0000 + t as u64);
            let mut ok = 0u64;
            for _ in 0..n_per_task {
                let stay_id = stays[rng.below(stays.len() as u64) as usize];
                let checkin = base() + Days::new(rng.below(700));
                let request = ReservationRequest::new(stay_id, format!("guest{t}"), checkin, checkin + Days::new(2));
                if engine.create_reservation(request).await.is_ok() {
                    ok += 1;
                }
            }
            ok
        }));
    }

    let mut ok = 0;
    for h in handles {
        ok += h.await.expect("task panicked");
    }
    let elapsed = start.elapsed();
    let total = n_tasks * n_per_task;
    println!(
        "  {total} attempts over {} stays in {:.2}s = {:.0} ops/sec ({ok} booked)",
        stays.len(),
        elapsed.as_secs_f64(),
        total as f64 / elapsed.as_secs_f64(),
    );
}

/// Search latency while writers keep booking.
async fn phase3_search_under_load(engine: &Arc<Engine>, stays: &[StayId]) {
    let stop = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let mut writers = Vec::new();
    for t in 0..8u64 {
        let engine = engine.clone();
        let stays = stays.to_vec();
        let stop = stop.clone();
        writers.push(tokio::spawn(async move {
            let mut rng = Rng(0xC0FF_EE00 + t);
            while !stop.load(Ordering::Relaxed) {
                let stay_id = stays[rng.below(stays.len() as u64) as usize];
                let checkin = base() + Days::new(rng.below(700));
                let request = ReservationRequest::new(stay_id, "writer", checkin, checkin + Days::new(1));
                let _ = engine.create_reservation(request).await;
            }
        }));
    }

    let mut rng = Rng(0xBEEF);
    let mut latencies = Vec::with_capacity(500);
    for _ in 0..500 {
        let checkin = base() + Days::new(rng.below(700));
        let query = SearchQuery {
            guests: 2,
            checkin,
            checkout: checkin + Days::new(3),
            lat: 48.86,
            lon: 2.35,
            radius_km: 10.0,
        };
        let t0 = Instant::now();
        let _ = engine.search(&query).await.expect("search");
        latencies.push(t0.elapsed());
    }
    stop.store(true, Ordering::Relaxed);
    for w in writers {
        let _ = w.await;
    }
    print_latency("search latency", &mut latencies);

    let range = NightRange::new(base(), base() + Days::new(7));
    let t0 = Instant::now();
    let free = engine
        .search_available(stays, 1, &range)
        .await
        .expect("search_available");
    println!(
        "  search_available over {} candidates: {} free in {:.3}ms",
        stays.len(),
        free.len(),
        t0.elapsed().as_secs_f64() * 1000.0
    );
}

#[tokio::main]
async fn main() {
    println!("=== staybook contention benchmark ===\n");

    let geo = Arc::new(InMemoryGeoIndex::new());
    let engine = open_engine(geo.clone());

    println!("[setup]");
    let stays = setup(&engine, &geo, 2000).await;

    println!("\n[phase 1] one hot stay");
    phase1_hot_stay(&engine, stays[0]).await;

    println!("\n[phase 2] spread over cold stays");
    phase2_cold_stays(&engine, &stays[1..]).await;

    println!("\n[phase 3] search under write load");
    phase3_search_under_load(&engine, &stays).await;

    println!("\n=== benchmark complete ===");
}
