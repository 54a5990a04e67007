use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use chrono::{Days, Utc};
use tokio_postgres::{Client, Config, NoTls, SimpleQueryMessage};
use ulid::Ulid;

/// Hourly sessions from 06:00 to 24:00.
const SLOTS: std::ops::Range<u32> = 6..24;

async fn connect(host: &str, port: u16, venue: &str) -> Client {
    let mut config = Config::new();
    config
        .host(host)
        .port(port)
        .dbname(venue)
        .user("fieldslot")
        .password("fieldslot");

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

fn fresh_venue() -> String {
    format!("bench_{}", Ulid::new())
}

/// A booking date far enough ahead that no slot has started.
fn booking_day(offset: u64) -> String {
    (Utc::now().date_naive() + Days::new(30 + offset)).to_string()
}

async fn create_field(client: &Client) -> Ulid {
    let id = Ulid::new();
    client
        .batch_execute(&format!(
            "INSERT INTO fields (id, name, price, open_time, close_time) VALUES ('{id}', 'Bench court', 100000, '06:00', 1440)"
        ))
        .await
        .unwrap();
    id
}

fn reserve_sql(field: Ulid, user: &str, day: &str, slot: u32) -> String {
    format!(
        "INSERT INTO bookings (field_id, user_id, booking_date, slots) VALUES ('{field}', '{user}', '{day}', '{}')",
        slot * 60
    )
}

async fn phase1_sequential(host: &str, port: u16) {
    let client = connect(host, port, &fresh_venue()).await;
    let field = create_field(&client).await;

    let days = 100;
    let mut latencies = Vec::new();
    let start = Instant::now();
    for d in 0..days {
        let day = booking_day(d);
        for slot in SLOTS {
            let t = Instant::now();
            client
                .simple_query(&reserve_sql(field, "seq", &day, slot))
                .await
                .unwrap();
            latencies.push(t.elapsed());
        }
    }

    let elapsed = start.elapsed();
    let n = latencies.len();
    let ops = n as f64 / elapsed.as_secs_f64();
    println!("  {n} reservations in {:.2}s = {ops:.0} ops/sec", elapsed.as_secs_f64());
    print_latency("reserve latency", &mut latencies);
}

/// Every task fights for the same slots; exactly one reservation per slot may win.
async fn phase2_contention(host: &str, port: u16) {
    let venue = fresh_venue();
    let setup = connect(host, port, &venue).await;
    let field = create_field(&setup).await;
    let day = booking_day(0);

    let n_tasks = 32;
    let won = Arc::new(AtomicUsize::new(0));
    let refused = Arc::new(AtomicUsize::new(0));
    let start = Instant::now();
    let mut handles = Vec::new();

    for i in 0..n_tasks {
        let host = host.to_string();
        let venue = venue.clone();
        let day = day.clone();
        let won = won.clone();
        let refused = refused.clone();
        handles.push(tokio::spawn(async move {
            let client = connect(&host, port, &venue).await;
            let user = format!("user-{i}");
            let mut latencies = Vec::new();
            for slot in SLOTS {
                let t = Instant::now();
                match client.simple_query(&reserve_sql(field, &user, &day, slot)).await {
                    Ok(_) => won.fetch_add(1, Ordering::Relaxed),
                    Err(_) => refused.fetch_add(1, Ordering::Relaxed),
                };
                latencies.push(t.elapsed());
            }
            latencies
        }));
    }

    let mut all = Vec::new();
    for h in handles {
        all.extend(h.await.unwrap());
    }
    let elapsed = start.elapsed();
    let won = won.load(Ordering::Relaxed);
    let slots = SLOTS.len();
    println!(
        "  {n_tasks} clients x {slots} slots in {:.2}s: {won} won, {} refused",
        elapsed.as_secs_f64(),
        refused.load(Ordering::Relaxed)
    );
    assert_eq!(won, slots, "each slot must have exactly one holder");
    print_latency("contended reserve latency", &mut all);
}

/// Settle every pending reservation concurrently, then check the unique index held.
async fn phase3_settlement_storm(host: &str, port: u16) {
    let venue = fresh_venue();
    let client = connect(host, port, &venue).await;
    let field = create_field(&client).await;
    let day = booking_day(1);

    let mut orders = Vec::new();
    for slot in SLOTS {
        let rows = client
            .simple_query(&reserve_sql(field, "payer", &day, slot))
            .await
            .unwrap();
        if let Some(order) = rows.iter().find_map(|m| match m {
            SimpleQueryMessage::Row(row) => row.get("order_id").map(str::to_string),
            _ => None,
        }) {
            orders.push(order);
        }
    }

    let start = Instant::now();
    let mut handles = Vec::new();
    for order in orders.clone() {
        let host = host.to_string();
        let venue = venue.clone();
        handles.push(tokio::spawn(async move {
            let client = connect(&host, port, &venue).await;
            let body = format!(
                r#"{{"order_id":"{order}","transaction_id":"tx-{order}","transaction_status":"settlement"}}"#
            );
            // the gateway retries; every retry after the first must be a no-op
            for _ in 0..3 {
                client
                    .simple_query(&format!("INSERT INTO payment_notifications VALUES ('{body}')"))
                    .await
                    .unwrap();
            }
        }));
    }
    for h in handles {
        h.await.unwrap();
    }

    let rows = client
        .simple_query("SELECT COUNT(*) FROM bookings WHERE status = 'success'")
        .await
        .unwrap();
    let settled = rows
        .iter()
        .find_map(|m| match m {
            SimpleQueryMessage::Row(row) => row.get("count").map(str::to_string),
            _ => None,
        })
        .unwrap_or_else(|| "0".into());
    println!(
        "  {} orders x 3 notifications in {:.2}s, {settled} settled",
        orders.len(),
        start.elapsed().as_secs_f64()
    );
}

async fn phase4_read_under_load(host: &str, port: u16) {
    let venue = fresh_venue();
    let setup = connect(host, port, &venue).await;
    let field = create_field(&setup).await;

    let writer = {
        let host = host.to_string();
        let venue = venue.clone();
        tokio::spawn(async move {
            let client = connect(&host, port, &venue).await;
            for d in 0..40 {
                let day = booking_day(d);
                for slot in SLOTS {
                    let _ = client.simple_query(&reserve_sql(field, "writer", &day, slot)).await;
                }
            }
        })
    };

    let reader = connect(host, port, &venue).await;
    let day = booking_day(0);
    let mut latencies = Vec::new();
    while !writer.is_finished() {
        let t = Instant::now();
        reader
            .simple_query(&format!(
                "SELECT * FROM availability WHERE field_id = '{field}' AND booking_date = '{day}'"
            ))
            .await
            .unwrap();
        latencies.push(t.elapsed());
    }
    print_latency("availability latency under load", &mut latencies);
}

async fn phase5_connection_storm(host: &str, port: u16) {
    let n_conns = 50;
    let ops_per_conn = 10;

    let start = Instant::now();
    let mut handles = Vec::new();
    let success = Arc::new(AtomicUsize::new(0));

    for _ in 0..n_conns {
        let host = host.to_string();
        let success = success.clone();
        handles.push(tokio::spawn(async move {
            let client = connect(&host, port, &fresh_venue()).await;
            let field = create_field(&client).await;
            let day = booking_day(0);
            for slot in SLOTS.take(ops_per_conn) {
                client
                    .simple_query(&reserve_sql(field, "storm", &day, slot))
                    .await
                    .unwrap();
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
    let host = std::env::var("FIELDSLOT_HOST").unwrap_or_else(|_| "127.0.0.1".into());
    let port: u16 = std::env::var("FIELDSLOT_PORT")
        .unwrap_or_else(|_| "5433".into())
        .parse()
        .expect("invalid FIELDSLOT_PORT");

    println!("=== fieldslot stress benchmark ===");
    println!("target: {host}:{port}\n");

    // every phase runs in its own venue

    println!("[phase 1] sequential reservations");
    phase1_sequential(&host, port).await;

    println!("\n[phase 2] slot contention");
    phase2_contention(&host, port).await;

    println!("\n[phase 3] settlement storm");
    phase3_settlement_storm(&host, port).await;

    println!("\n[phase 4] availability reads under write load");
    phase4_read_under_load(&host, port).await;

    println!("\n[phase 5] connection storm");
    phase5_connection_storm(&host, port).await;

    println!("\n=== benchmark complete ===");
}
