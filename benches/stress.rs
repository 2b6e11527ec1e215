use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use chrono::{Days, NaiveDate};
use tokio_postgres::error::SqlState;
use tokio_postgres::{Config, NoTls, SimpleQueryMessage};

async fn connect(host: &str, port: u16) -> tokio_postgres::Client {
    let mut config = Config::new();
    config.host(host).port(port).dbname("reservd").user("reservd");

    let (client, conn) = config.connect(NoTls).await.expect("connect failed");
    tokio::spawn(async move {
        if let Err(e) = conn.await {
            eprintln!("connection error: {e}");
        }
    });
    client
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
        "    n={}, avg={:.2}ms, p50={:.2}ms, p95={:.2}ms, p99={:.2}ms, max={:.2}ms",
        latencies.len(),
        avg.as_secs_f64() * 1000.0,
        percentile(latencies, 50.0).as_secs_f64() * 1000.0,
        percentile(latencies, 95.0).as_secs_f64() * 1000.0,
        percentile(latencies, 99.0).as_secs_f64() * 1000.0,
        latencies[latencies.len() - 1].as_secs_f64() * 1000.0,
    );
}

/// Room ids unique to this run so repeated runs against one server don't
/// collide with earlier approvals.
fn room_base() -> i64 {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0);
    millis * 1000
}

fn night(offset: u64) -> (NaiveDate, NaiveDate) {
    let base = NaiveDate::from_ymd_opt(2030, 1, 1).expect("valid date");
    let start = base + Days::new(offset);
    (start, start + Days::new(1))
}

async fn create(client: &tokio_postgres::Client, user: i64, room: i64, offset: u64) -> String {
    let (start, end) = night(offset);
    let messages = client
        .simple_query(&format!(
            "INSERT INTO reservations (user_id, room_id, start_date, end_date) \
             VALUES ({user}, {room}, '{start}', '{end}')"
        ))
        .await
        .expect("insert failed");
    messages
        .into_iter()
        .find_map(|m| match m {
            SimpleQueryMessage::Row(row) => row.get("id").map(str::to_string),
            _ => None,
        })
        .expect("insert returned no row")
}

async fn phase1_sequential(host: &str, port: u16, room: i64) {
    let client = connect(host, port).await;

    let n = 2000;
    let mut create_latencies = Vec::with_capacity(n);
    let mut approve_latencies = Vec::with_capacity(n);
    let start = Instant::now();

    for i in 0..n {
        let t = Instant::now();
        let id = create(&client, 1, room, i as u64).await;
        create_latencies.push(t.elapsed());

        let t = Instant::now();
        client
            .batch_execute(&format!(
                "UPDATE reservations SET status = 'APPROVED' WHERE id = '{id}'"
            ))
            .await
            .unwrap();
        approve_latencies.push(t.elapsed());
    }

    let elapsed = start.elapsed();
    let ops = (2 * n) as f64 / elapsed.as_secs_f64();
    println!(
        "  {n} create+approve pairs in {:.2}s = {ops:.0} ops/sec",
        elapsed.as_secs_f64()
    );
    print_latency("create latency", &mut create_latencies);
    print_latency("approve latency", &mut approve_latencies);
}

/// Many clients approving overlapping reservations in a handful of rooms.
/// Exactly one approval per (room, night) may win.
async fn phase2_contended_approvals(host: &str, port: u16, rooms: &[i64]) {
    let n_tasks = 10;
    let nights = 100;

    let setup = connect(host, port).await;
    let mut batches: Vec<Vec<String>> = vec![Vec::new(); n_tasks];
    for (task, batch) in batches.iter_mut().enumerate() {
        for night in 0..nights {
            let room = rooms[night as usize % rooms.len()];
            batch.push(create(&setup, task as i64, room, night).await);
        }
    }
    drop(setup);

    let approved = Arc::new(AtomicUsize::new(0));
    let conflicts = Arc::new(AtomicUsize::new(0));
    let start = Instant::now();
    let mut handles = Vec::new();

    for batch in batches {
        let host = host.to_string();
        let approved = approved.clone();
        let conflicts = conflicts.clone();
        handles.push(tokio::spawn(async move {
            let client = connect(&host, port).await;
            for id in batch {
                let result = client
                    .batch_execute(&format!(
                        "UPDATE reservations SET status = 'APPROVED' WHERE id = '{id}'"
                    ))
                    .await;
                match result {
                    Ok(()) => approved.fetch_add(1, Ordering::Relaxed),
                    Err(e) if e.code() == Some(&SqlState::EXCLUSION_VIOLATION) => {
                        conflicts.fetch_add(1, Ordering::Relaxed)
                    }
                    Err(e) => panic!("approve failed: {e}"),
                };
            }
        }));
    }

    for h in handles {
        h.await.unwrap();
    }

    let elapsed = start.elapsed();
    let total = n_tasks * nights as usize;
    let ok = approved.load(Ordering::Relaxed);
    println!(
        "  {n_tasks} tasks x {nights} approvals = {total} total in {:.2}s = {:.0} ops/sec",
        elapsed.as_secs_f64(),
        total as f64 / elapsed.as_secs_f64()
    );
    println!(
        "  approved={ok} (expected {nights}), conflicts={}",
        conflicts.load(Ordering::Relaxed)
    );
    assert_eq!(ok, nights as usize, "double booking detected");
}

async fn phase3_read_under_load(host: &str, port: u16, room: i64, writer_room: i64) {
    let setup = connect(host, port).await;
    for i in 0..200 {
        let id = create(&setup, 1, room, 2 * i).await;
        setup
            .batch_execute(&format!(
                "UPDATE reservations SET status = 'APPROVED' WHERE id = '{id}'"
            ))
            .await
            .unwrap();
    }
    drop(setup);

    // Writers keep creating and approving in other rooms.
    let stop = Arc::new(AtomicBool::new(false));
    let mut writer_handles = Vec::new();
    for w in 0..5 {
        let host = host.to_string();
        let stop = stop.clone();
        writer_handles.push(tokio::spawn(async move {
            let client = connect(&host, port).await;
            let mut i = 0u64;
            while !stop.load(Ordering::Relaxed) {
                let id = create(&client, w, writer_room + w, i).await;
                let _ = client
                    .batch_execute(&format!(
                        "UPDATE reservations SET status = 'APPROVED' WHERE id = '{id}'"
                    ))
                    .await;
                i += 1;
            }
        }));
    }

    let n_readers = 10;
    let reads_per_reader = 500;
    let mut reader_handles = Vec::new();
    let (window_start, _) = night(0);
    let (window_end, _) = night(400);

    for r in 0..n_readers {
        let host = host.to_string();
        reader_handles.push(tokio::spawn(async move {
            let client = connect(&host, port).await;
            let mut latencies = Vec::with_capacity(reads_per_reader);
            for _ in 0..reads_per_reader {
                let sql = if r % 2 == 0 {
                    format!(
                        "SELECT * FROM availability WHERE room_id = {room} \
                         AND start_date >= '{window_start}' AND end_date <= '{window_end}'"
                    )
                } else {
                    format!("SELECT * FROM reservations WHERE room_id = {room} AND page_size = 50")
                };
                let t = Instant::now();
                client.simple_query(&sql).await.unwrap();
                latencies.push(t.elapsed());
            }
            latencies
        }));
    }

    let mut all_latencies = Vec::new();
    for h in reader_handles {
        all_latencies.extend(h.await.unwrap());
    }

    stop.store(true, Ordering::Relaxed);
    for h in writer_handles {
        let _ = h.await;
    }

    print_latency("read latency (availability + search)", &mut all_latencies);
}

async fn phase4_connection_storm(host: &str, port: u16, room_base: i64) {
    let n_conns = 50;
    let ops_per_conn = 10;

    let start = Instant::now();
    let mut handles = Vec::new();
    let success = Arc::new(AtomicUsize::new(0));

    for c in 0..n_conns {
        let host = host.to_string();
        let success = success.clone();
        handles.push(tokio::spawn(async move {
            let client = connect(&host, port).await;
            for i in 0..ops_per_conn {
                create(&client, c, room_base + c, i).await;
            }
            success.fetch_add(1, Ordering::Relaxed);
        }));
    }

    for h in handles {
        let _ = h.await;
    }

    let elapsed = start.elapsed();
    let ok = success.load(Ordering::Relaxed);
    println!(
        "  {n_conns} connections, {ops_per_conn} ops each: {ok}/{n_conns} succeeded in {:.2}s",
        elapsed.as_secs_f64()
    );
}

#[tokio::main]
async fn main() {
    let host = std::env::var("RESERVD_HOST").unwrap_or_else(|_| "127.0.0.1".into());
    let port: u16 = std::env::var("RESERVD_PORT")
        .unwrap_or_else(|_| "5433".into())
        .parse()
        .expect("invalid RESERVD_PORT");

    println!("=== reservd stress benchmark ===");
    println!("target: {host}:{port}\n");

    let base = room_base();

    println!("\n[phase 1] sequential create + approve");
    phase1_sequential(&host, port, base).await;

    println!("\n[phase 2] contended approvals");
    let rooms: Vec<i64> = (1..=5).map(|i| base + i).collect();
    phase2_contended_approvals(&host, port, &rooms).await;

    println!("\n[phase 3] read latency under write load");
    phase3_read_under_load(&host, port, base + 10, base + 100).await;

    println!("\n[phase 4] connection storm");
    phase4_connection_storm(&host, port, base + 200).await;

    println!("\n=== benchmark complete ===");
}
