use std::time::{Duration, Instant};

use tokio_postgres::{Config, NoTls};
use ulid::Ulid;

async fn connect(host: &str, port: u16, site: &str, user: &str) -> tokio_postgres::Client {
    let mut config = Config::new();
    config
        .host(host)
        .port(port)
        .dbname(site)
        .user(user)
        .password("shoptime");

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
        latencies.last().unwrap().as_secs_f64() * 1000.0,
    );
}

/// Spread bookings over dates and slots so inserts never collide.
fn slot(i: usize) -> (String, String, String) {
    let day = 1 + (i / 12) % 28;
    let month = 1 + (i / (12 * 28)) % 12;
    let hour = 8 + (i % 12);
    (
        format!("2027-{month:02}-{day:02}"),
        format!("{hour:02}:00"),
        format!("{hour:02}:45"),
    )
}

async fn setup_resource(client: &tokio_postgres::Client, capacity: u32) -> Ulid {
    let rid = Ulid::new();
    client
        .batch_execute(&format!(
            "INSERT INTO resources (id, name, category, capacity) VALUES ('{rid}', 'Bench {capacity}', 'bench', {capacity})"
        ))
        .await
        .unwrap();
    for code in ["MO", "TU", "WE", "TH", "FR", "SA", "SU"] {
        client
            .batch_execute(&format!(
                r#"INSERT INTO hours (id, resource_id, weekday, start, "end") VALUES ('{}', '{rid}', '{code}', '08:00', '20:00')"#,
                Ulid::new()
            ))
            .await
            .unwrap();
    }
    rid
}

async fn phase_sequential_bookings(host: &str, port: u16, n: usize) {
    let site = format!("bench_{}", Ulid::new()).to_lowercase();
    let admin = connect(host, port, &site, "admin").await;
    let rid = setup_resource(&admin, 1).await;
    let member = connect(host, port, &site, "ada").await;

    let mut latencies = Vec::with_capacity(n);
    for i in 0..n {
        let (date, start, end) = slot(i);
        let t0 = Instant::now();
        member
            .batch_execute(&format!(
                r#"INSERT INTO bookings (id, resource_id, date, start, "end") VALUES ('{}', '{rid}', '{date}', '{start}', '{end}')"#,
                Ulid::new()
            ))
            .await
            .unwrap();
        latencies.push(t0.elapsed());
    }
    print_latency("sequential bookings", &mut latencies);
}

async fn phase_concurrent_bookings(host: &str, port: u16, clients: usize, per_client: usize) {
    let site = format!("bench_{}", Ulid::new()).to_lowercase();
    let admin = connect(host, port, &site, "admin").await;
    let rid = setup_resource(&admin, (clients + 1) as u32).await;

    let mut tasks = Vec::new();
    for c in 0..clients {
        let host = host.to_string();
        let site = site.clone();
        tasks.push(tokio::spawn(async move {
            let member = connect(&host, port, &site, &format!("member{c}")).await;
            let mut latencies = Vec::with_capacity(per_client);
            for i in 0..per_client {
                let (date, start, end) = slot(i);
                let t0 = Instant::now();
                member
                    .batch_execute(&format!(
                        r#"INSERT INTO bookings (id, resource_id, date, start, "end") VALUES ('{}', '{rid}', '{date}', '{start}', '{end}')"#,
                        Ulid::new()
                    ))
                    .await
                    .unwrap();
                latencies.push(t0.elapsed());
            }
            latencies
        }));
    }

    let mut all = Vec::new();
    for task in tasks {
        all.extend(task.await.unwrap());
    }
    print_latency(&format!("concurrent bookings ({clients} clients)"), &mut all);
}

async fn phase_availability_queries(host: &str, port: u16, n: usize) {
    let site = format!("bench_{}", Ulid::new()).to_lowercase();
    let admin = connect(host, port, &site, "admin").await;
    let rid = setup_resource(&admin, 1).await;
    let member = connect(host, port, &site, "ada").await;

    // Populate a month of bookings first
    for i in 0..200 {
        let (date, start, end) = slot(i);
        member
            .batch_execute(&format!(
                r#"INSERT INTO bookings (id, resource_id, date, start, "end") VALUES ('{}', '{rid}', '{date}', '{start}', '{end}')"#,
                Ulid::new()
            ))
            .await
            .unwrap();
    }

    let mut latencies = Vec::with_capacity(n);
    for i in 0..n {
        let (date, _, _) = slot(i);
        let t0 = Instant::now();
        member
            .simple_query(&format!(
                "SELECT * FROM availability WHERE resource_id = '{rid}' AND date = '{date}'"
            ))
            .await
            .unwrap();
        latencies.push(t0.elapsed());
    }
    print_latency("availability queries", &mut latencies);
}

async fn phase_series_materialization(host: &str, port: u16, n: usize) {
    let site = format!("bench_{}", Ulid::new()).to_lowercase();
    let admin = connect(host, port, &site, "admin").await;
    let member = connect(host, port, &site, "ada").await;

    let mut latencies = Vec::with_capacity(n);
    for _ in 0..n {
        let rid = setup_resource(&admin, 1).await;
        let t0 = Instant::now();
        member
            .batch_execute(&format!(
                r#"INSERT INTO series (id, resource_id, frequency, byweekday, "interval", start_date, until, count, start, "end") VALUES ('{}', '{rid}', 'weekly', 'MO,WE,FR', 1, '2027-01-04', NULL, 24, '09:00', '10:00')"#,
                Ulid::new()
            ))
            .await
            .unwrap();
        latencies.push(t0.elapsed());
    }
    print_latency("series materialization (24 instances)", &mut latencies);
}

#[tokio::main]
async fn main() {
    let host = std::env::var("SHOPTIME_BENCH_HOST").unwrap_or_else(|_| "127.0.0.1".into());
    let port: u16 = std::env::var("SHOPTIME_BENCH_PORT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(5434);

    println!("shoptime stress bench against {host}:{port}");
    println!("phase 1: sequential bookings");
    phase_sequential_bookings(&host, port, 500).await;
    println!("phase 2: concurrent bookings");
    phase_concurrent_bookings(&host, port, 8, 100).await;
    println!("phase 3: availability queries");
    phase_availability_queries(&host, port, 500).await;
    println!("phase 4: series materialization");
    phase_series_materialization(&host, port, 50).await;
}
