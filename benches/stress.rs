use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{Days, NaiveDate};
use ulid::Ulid;

use holdbook::engine::{CreateHold, Engine, EngineError, EngineSettings, NewResource};
use holdbook::model::{Day, ResourceType};
use holdbook::sweeper::sweep_once;

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
        "    n={}, avg={:.2}ms, p50={:.2}ms, p95={:.2}ms, p99={:.2}ms, max={:.2}ms",
        latencies.len(),
        avg.as_secs_f64() * 1000.0,
        percentile(latencies, 50.0).as_secs_f64() * 1000.0,
        percentile(latencies, 95.0).as_secs_f64() * 1000.0,
        percentile(latencies, 99.0).as_secs_f64() * 1000.0,
        latencies[latencies.len() - 1].as_secs_f64() * 1000.0,
    );
}

fn first_day() -> Day {
    NaiveDate::from_ymd_opt(2030, 1, 1).unwrap()
}

fn days(n: u64) -> Vec<Day> {
    (0..n).map(|i| first_day() + Days::new(i)).collect()
}

fn fresh_engine(label: &str) -> Arc<Engine> {
    let dir: PathBuf = std::env::temp_dir().join(format!("holdbook_bench_{label}_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    Arc::new(Engine::new(dir.join("holdbook.wal"), EngineSettings::default()).unwrap())
}

async fn resource(engine: &Engine, max: u32, dates: &[Day]) -> Ulid {
    let r = engine
        .create_resource(NewResource {
            kind: ResourceType::Tour,
            name: format!("bench-{max}"),
            description: None,
            attributes: Default::default(),
            active: true,
            initial_capacity: None,
        })
        .await
        .unwrap();
    engine.initialize_capacity(r.id, dates, max).await.unwrap();
    r.id
}

fn request(resource_id: Ulid, date: Day, quantity: u32) -> CreateHold {
    CreateHold {
        resource_id,
        dates: vec![date],
        quantity,
        customer: Some("bench@example.com".into()),
        idempotency_token: Ulid::new().to_string(),
    }
}

async fn phase1_sequential() {
    let engine = fresh_engine("seq");
    let dates = days(200);
    let rid = resource(&engine, 10, &dates).await;

    let n = 2000;
    let mut latencies = Vec::with_capacity(n);
    let start = Instant::now();
    for i in 0..n {
        let t = Instant::now();
        engine
            .create_hold(request(rid, dates[i % dates.len()], 1))
            .await
            .unwrap();
        latencies.push(t.elapsed());
    }

    let elapsed = start.elapsed();
    let ops = n as f64 / elapsed.as_secs_f64();
    println!("  {n} holds in {:.2}s = {ops:.0} ops/sec", elapsed.as_secs_f64());
    print_latency("create latency", &mut latencies);
}

/// Each task loops create → confirm or release, so group commit sees real contention.
async fn phase2_lifecycle() {
    let engine = fresh_engine("lifecycle");
    let dates = days(30);
    let rid = resource(&engine, 1_000, &dates).await;

    let n_tasks = 16;
    let n_per_task = 200;
    let start = Instant::now();
    let mut handles = Vec::new();

    for task in 0..n_tasks {
        let engine = engine.clone();
        let dates = dates.clone();
        handles.push(tokio::spawn(async move {
            let mut create = Vec::with_capacity(n_per_task);
            let mut finish = Vec::with_capacity(n_per_task);
            for j in 0..n_per_task {
                let date = dates[(task + j) % dates.len()];
                let t = Instant::now();
                let hold = engine.create_hold(request(rid, date, 2)).await.unwrap().hold;
                create.push(t.elapsed());

                let t = Instant::now();
                if j % 2 == 0 {
                    engine
                        .confirm_hold(hold.id, &format!("order-{task}-{j}"), "line-1")
                        .await
                        .unwrap();
                } else {
                    engine.release_hold(hold.id).await.unwrap();
                }
                finish.push(t.elapsed());
            }
            (create, finish)
        }));
    }

    let mut create = Vec::new();
    let mut finish = Vec::new();
    for h in handles {
        let (c, f) = h.await.unwrap();
        create.extend(c);
        finish.extend(f);
    }

    let elapsed = start.elapsed();
    let total = n_tasks * n_per_task;
    let ops = (total * 2) as f64 / elapsed.as_secs_f64();
    println!(
        "  {n_tasks} tasks x {n_per_task} holds = {total} lifecycles in {:.2}s = {ops:.0} ops/sec",
        elapsed.as_secs_f64()
    );
    print_latency("create latency", &mut create);
    print_latency("confirm/release latency", &mut finish);
}

/// Many tasks fight over a single unit-capacity date.
async fn phase3_last_unit_contention() {
    let engine = fresh_engine("contention");
    let dates = days(1);
    let capacity = 25;
    let rid = resource(&engine, capacity, &dates).await;

    let n_tasks = 500;
    let start = Instant::now();
    let mut handles = Vec::new();
    for _ in 0..n_tasks {
        let engine = engine.clone();
        let date = dates[0];
        handles.push(tokio::spawn(async move {
            let t = Instant::now();
            let result = engine.create_hold(request(rid, date, 1)).await;
            (result, t.elapsed())
        }));
    }

    let mut won = 0;
    let mut refused = 0;
    let mut latencies = Vec::with_capacity(n_tasks);
    for h in handles {
        let (result, latency) = h.await.unwrap();
        latencies.push(latency);
        match result {
            Ok(_) => won += 1,
            Err(EngineError::InsufficientCapacity(_)) => refused += 1,
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    let left = engine.capacity(rid, dates[0]).await.unwrap().available_capacity;
    println!(
        "  {n_tasks} racers for {capacity} units: {won} won, {refused} refused, {left} left in {:.2}s",
        start.elapsed().as_secs_f64()
    );
    assert_eq!(won, capacity as usize, "overbooked");
    print_latency("create latency", &mut latencies);
}

/// Reads while writers churn, then one sweep over everything left behind.
async fn phase4_reads_and_sweep() {
    let engine = fresh_engine("reads");
    let dates = days(60);
    let rid = resource(&engine, 100, &dates).await;

    let writer = {
        let engine = engine.clone();
        let dates = dates.clone();
        tokio::spawn(async move {
            for i in 0..3_000 {
                let _ = engine.create_hold(request(rid, dates[i % dates.len()], 1)).await;
            }
        })
    };

    let mut latencies = Vec::new();
    while !writer.is_finished() {
        let date = dates[latencies.len() % dates.len()];
        let t = Instant::now();
        engine.check_availability(rid, &[date], 1).await.unwrap();
        latencies.push(t.elapsed());
        tokio::task::yield_now().await;
    }
    writer.await.unwrap();
    print_latency("check_availability under write load", &mut latencies);

    let t = Instant::now();
    let report = sweep_once(&engine).await;
    println!(
        "  sweep over {} holds: {} overdue in {:.2}ms",
        engine.health().await.holds.total,
        report.overdue,
        t.elapsed().as_secs_f64() * 1000.0
    );
}

#[tokio::main]
async fn main() {
    println!("=== holdbook stress benchmark ===\n");

    println!("[phase 1] sequential create throughput");
    phase1_sequential().await;

    println!("\n[phase 2] concurrent hold lifecycle");
    phase2_lifecycle().await;

    println!("\n[phase 3] last-unit contention");
    phase3_last_unit_contention().await;

    println!("\n[phase 4] read latency under write load");
    phase4_reads_and_sweep().await;

    println!("\n=== benchmark complete ===");
}
