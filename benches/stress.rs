use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use chrono::{Days, NaiveDate};
use ulid::Ulid;

use lessonbook::clock::{BusinessZone, SystemClock};
use lessonbook::engine::{BookingRepository, Engine, EngineError, InMemoryStore, NewBooking, Stores};
use lessonbook::model::*;
use lessonbook::reaper;

const OPEN: Minute = 8 * 60;
const CLOSE: Minute = 20 * 60;
const SLOTS_PER_DAY: usize = ((CLOSE - OPEN) / 30) as usize;

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

fn base_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2031, 1, 6).unwrap()
}

fn day(offset: usize) -> NaiveDate {
    base_date()
        .checked_add_days(Days::new(offset as u64))
        .unwrap()
}

fn request(date: NaiveDate, time: Minute, lesson_type: &str) -> NewBooking {
    NewBooking {
        preferred_date: date,
        preferred_time: time,
        lesson_type: lesson_type.into(),
        parent: ParentContact {
            first_name: "Bench".into(),
            last_name: "Parent".into(),
            email: "bench@example.com".into(),
            phone: "555-0100".into(),
        },
        athletes: vec![],
        external_session_id: Some(format!("cs_{}", Ulid::new())),
        hold_session_id: None,
    }
}

async fn new_engine(name: &str) -> (Arc<Engine>, Arc<InMemoryStore>) {
    let dir = std::env::temp_dir().join("lessonbook_bench");
    let _ = std::fs::create_dir_all(&dir);
    let path = dir.join(format!("{name}_{}.wal", Ulid::new()));
    let store = Arc::new(InMemoryStore::open(&path).expect("open journal"));
    let engine = Arc::new(Engine::new(
        Stores::in_memory(store.clone()),
        LessonCatalog::standard(),
        BusinessZone::pacific_standard(),
        Arc::new(SystemClock),
    ));
    let every_day = (0..7)
        .map(|d| WeeklySlot {
            id: Ulid::new(),
            day_of_week: d,
            window: Span::new(OPEN, CLOSE),
            is_recurring: true,
            is_available: true,
        })
        .collect();
    engine
        .replace_weekly_slots(every_day)
        .await
        .expect("weekly availability");
    (engine, store)
}

async fn phase1_sequential() {
    let (engine, _) = new_engine("sequential").await;
    let n = 2000;
    let mut latencies = Vec::with_capacity(n);
    let start = Instant::now();

    for i in 0..n {
        let time = OPEN + (i % SLOTS_PER_DAY) as Minute * 30;
        let t = Instant::now();
        if let Err(e) = engine
            .create_booking(request(day(i / SLOTS_PER_DAY), time, "quick-journey"))
            .await
        {
            eprintln!("booking {i} failed: {e}");
        }
        latencies.push(t.elapsed());
    }

    let elapsed = start.elapsed();
    let ops = n as f64 / elapsed.as_secs_f64();
    println!("  {n} bookings in {:.2}s = {ops:.0} ops/sec", elapsed.as_secs_f64());
    print_latency("create latency", &mut latencies);
}

/// Many tasks race for the same few dates; every loser must see SlotUnavailable.
async fn phase2_contention() {
    let (engine, store) = new_engine("contention").await;
    let n_tasks = 32;
    let attempts = 200;
    let created = Arc::new(AtomicUsize::new(0));
    let rejected = Arc::new(AtomicUsize::new(0));

    let start = Instant::now();
    let mut handles = Vec::new();
    for task in 0..n_tasks {
        let engine = engine.clone();
        let created = created.clone();
        let rejected = rejected.clone();
        handles.push(tokio::spawn(async move {
            for j in 0..attempts {
                let slot = (task * 7 + j) % SLOTS_PER_DAY;
                let lesson = if j % 2 == 0 { "deep-dive" } else { "quick-journey" };
                let time = (OPEN + slot as Minute * 30).min(CLOSE - 60);
                match engine.create_booking(request(day(j % 4), time, lesson)).await {
                    Ok(_) => created.fetch_add(1, Ordering::Relaxed),
                    Err(EngineError::SlotUnavailable(_)) => rejected.fetch_add(1, Ordering::Relaxed),
                    Err(e) => {
                        eprintln!("unexpected error: {e}");
                        0
                    }
                };
            }
        }));
    }
    for h in handles {
        let _ = h.await;
    }
    let elapsed = start.elapsed();

    let mut overlaps = 0;
    for d in 0..4 {
        let active = store.active_on(day(d)).await.unwrap_or_default();
        for (i, a) in active.iter().enumerate() {
            overlaps += active[i + 1..]
                .iter()
                .filter(|b| a.span().overlaps(&b.span()))
                .count();
        }
    }
    println!(
        "  {} attempts in {:.2}s: {} created, {} rejected, {overlaps} overlaps",
        n_tasks * attempts,
        elapsed.as_secs_f64(),
        created.load(Ordering::Relaxed),
        rejected.load(Ordering::Relaxed),
    );
}

async fn phase3_listing_under_load() {
    let (engine, _) = new_engine("listing").await;
    for i in 0..(SLOTS_PER_DAY * 10) {
        if i % 3 == 0 {
            let time = OPEN + (i % SLOTS_PER_DAY) as Minute * 30;
            let _ = engine
                .create_booking(request(day(i / SLOTS_PER_DAY), time, "quick-journey"))
                .await;
        }
    }

    let stop = Arc::new(AtomicBool::new(false));
    let mut writers = Vec::new();
    for w in 0..4 {
        let engine = engine.clone();
        let stop = stop.clone();
        writers.push(tokio::spawn(async move {
            let mut i = 0usize;
            while !stop.load(Ordering::Relaxed) {
                let time = OPEN + (i % SLOTS_PER_DAY) as Minute * 30;
                let _ = engine
                    .create_booking(request(day(100 + w * 1000 + i / SLOTS_PER_DAY), time, "quick-journey"))
                    .await;
                i += 1;
            }
        }));
    }

    let mut readers = Vec::new();
    for r in 0..8 {
        let engine = engine.clone();
        readers.push(tokio::spawn(async move {
            let mut latencies = Vec::with_capacity(500);
            for i in 0..500 {
                let t = Instant::now();
                let _ = engine.available_slots(day((r + i) % 10), "deep-dive").await;
                latencies.push(t.elapsed());
            }
            latencies
        }));
    }

    let mut all = Vec::new();
    for h in readers {
        if let Ok(l) = h.await {
            all.extend(l);
        }
    }
    stop.store(true, Ordering::Relaxed);
    for h in writers {
        let _ = h.await;
    }
    print_latency("slot listing", &mut all);
}

async fn phase4_status_sync() {
    let (engine, _) = new_engine("sync").await;
    let n = SLOTS_PER_DAY * 40;
    for i in 0..n {
        let time = OPEN + (i % SLOTS_PER_DAY) as Minute * 30;
        let _ = engine
            .create_booking(request(day(i / SLOTS_PER_DAY), time, "quick-journey"))
            .await;
    }
    let start = Instant::now();
    let report = reaper::sweep_once(&engine).await;
    println!(
        "  swept {} bookings in {:.2}ms ({} changed, {} failed)",
        report.visited,
        start.elapsed().as_secs_f64() * 1000.0,
        report.changed,
        report.failed
    );
}

#[tokio::main]
async fn main() {
    println!("=== lessonbook stress benchmark ===");

    println!("\n[phase 1] sequential booking creation");
    phase1_sequential().await;

    println!("\n[phase 2] contended creation on shared dates");
    phase2_contention().await;

    println!("\n[phase 3] slot listing under write load");
    phase3_listing_under_load().await;

    println!("\n[phase 4] status sync pass");
    phase4_status_sync().await;
}
