use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use tokio::net::TcpListener;
use tokio_postgres::{Config, NoTls, SimpleQueryMessage};
use ulid::Ulid;

use spacebook::engine::{Engine, WorkloadEngine};
use spacebook::model::*;
use spacebook::repo::Repos;
use spacebook::store::{InMemoryStore, Layout};
use spacebook::wire;

const Q: i64 = 900;
const PASSWORD: &str = "spacebook";

struct Office {
    floor: Ulid,
    rooms: Vec<Ulid>,
    /// Open space and its capacity.
    desks: (Ulid, u32),
    users: Vec<Ulid>,
}

fn build_layout(n_rooms: usize, n_users: usize, desk_capacity: u32) -> (Layout, Office) {
    let floor = Floor {
        id: Ulid::new(),
        name: "Bench".into(),
        created_at: 0,
        updated_at: 0,
    };
    let entity = |kind: EntityKind, capacity: u32, i: usize| BookingEntity {
        id: Ulid::new(),
        kind,
        floor_id: floor.id,
        title: format!("{}-{i}", kind.as_str()),
        capacity,
        x: i as f64,
        y: 0.0,
        width: 1.0,
        height: 1.0,
        created_at: 0,
        updated_at: 0,
    };
    let mut entities: Vec<BookingEntity> =
        (0..n_rooms).map(|i| entity(EntityKind::Room, 1, i)).collect();
    let desks = entity(EntityKind::OpenSpace, desk_capacity, n_rooms);
    let users: Vec<User> = (0..n_users)
        .map(|i| User {
            id: Ulid::new(),
            name: format!("user-{i}"),
            email: format!("user-{i}@bench.local"),
            role: Role::User,
        })
        .collect();

    let office = Office {
        floor: floor.id,
        rooms: entities.iter().map(|e| e.id).collect(),
        desks: (desks.id, desk_capacity),
        users: users.iter().map(|u| u.id).collect(),
    };
    entities.push(desks);
    let layout = Layout {
        floors: vec![floor],
        entities,
        users,
    };
    (layout, office)
}

async fn start_server(layout: Layout) -> std::net::SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind failed");
    let addr = listener.local_addr().expect("no local addr");

    let dir = std::env::temp_dir().join(format!("spacebook_bench_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).expect("create bench dir");
    let store = Arc::new(InMemoryStore::open(&dir.join("bookings.wal")).expect("open store"));
    store.seed(layout).expect("seed layout");
    let engine = Arc::new(Engine::new(Repos::from_store(store), WorkloadEngine::new(15)));

    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            let engine = engine.clone();
            tokio::spawn(async move {
                if let Err(e) = wire::process_connection(
                    socket,
                    engine,
                    PASSWORD.to_string(),
                    Duration::from_secs(30),
                    None,
                )
                .await
                {
                    eprintln!("connection error: {e}");
                }
            });
        }
    });
    addr
}

async fn connect(addr: std::net::SocketAddr, user: Ulid) -> tokio_postgres::Client {
    let mut config = Config::new();
    config
        .host(addr.ip().to_string())
        .port(addr.port())
        .dbname("spacebook")
        .user(user.to_string())
        .password(PASSWORD);

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
        latencies.last().map_or(0.0, |d| d.as_secs_f64() * 1000.0),
    );
}

fn insert_sql(id: Ulid, entity: Ulid, from: i64, to: i64) -> String {
    format!(
        "INSERT INTO bookings (id, entity_id, time_from, time_to) VALUES ('{id}', '{entity}', {from}, {to})"
    )
}

/// One user books a room slot after slot, leaving a gap bucket between bookings.
async fn phase1_sequential(addr: std::net::SocketAddr, office: &Office) {
    let client = connect(addr, office.users[0]).await;
    let room = office.rooms[0];

    let n = 2000;
    let mut latencies = Vec::with_capacity(n);
    let start = Instant::now();

    for i in 0..n {
        let s = (i as i64) * 2 * Q;
        let t = Instant::now();
        client
            .simple_query(&insert_sql(Ulid::new(), room, s, s + Q))
            .await
            .expect("sequential booking rejected");
        latencies.push(t.elapsed());
    }

    let elapsed = start.elapsed();
    let ops = n as f64 / elapsed.as_secs_f64();
    println!("  {n} bookings in {:.2}s = {ops:.0} ops/sec", elapsed.as_secs_f64());
    print_latency("write latency", &mut latencies);
}

/// Every user races for the same open-space slot; exactly `capacity` may win.
async fn phase2_contention(addr: std::net::SocketAddr, office: &Office) {
    let (desks, capacity) = office.desks;
    let slot = 1_000_000 * Q;
    let admitted = Arc::new(AtomicUsize::new(0));

    let start = Instant::now();
    let mut handles = Vec::new();
    for &user in &office.users {
        let admitted = admitted.clone();
        handles.push(tokio::spawn(async move {
            let client = connect(addr, user).await;
            if client
                .simple_query(&insert_sql(Ulid::new(), desks, slot, slot + Q))
                .await
                .is_ok()
            {
                admitted.fetch_add(1, Ordering::Relaxed);
            }
        }));
    }
    for h in handles {
        let _ = h.await;
    }

    let ok = admitted.load(Ordering::Relaxed);
    println!(
        "  {} users raced for {capacity} seats: {ok} admitted in {:.2}s",
        office.users.len(),
        start.elapsed().as_secs_f64()
    );
    assert_eq!(ok, capacity as usize, "capacity violated under contention");
}

/// Workload and floor reads while writers keep booking other rooms.
async fn phase3_read_under_load(addr: std::net::SocketAddr, office: &Office) {
    let stop = Arc::new(AtomicBool::new(false));
    let mut writer_handles = Vec::new();
    for (w, &room) in office.rooms.iter().enumerate().skip(1).take(5) {
        let user = office.users[w];
        let stop = stop.clone();
        writer_handles.push(tokio::spawn(async move {
            let client = connect(addr, user).await;
            let mut i = 0i64;
            while !stop.load(Ordering::Relaxed) {
                let s = (2_000_000 + i * 2) * Q;
                let _ = client.simple_query(&insert_sql(Ulid::new(), room, s, s + Q)).await;
                i += 1;
            }
        }));
    }

    let n_readers = 10;
    let reads_per_reader = 500;
    let mut reader_handles = Vec::new();
    for r in 0..n_readers {
        let user = office.users[office.users.len() - 1 - r];
        let room = office.rooms[0];
        let floor = office.floor;
        reader_handles.push(tokio::spawn(async move {
            let client = connect(addr, user).await;
            let mut latencies = Vec::with_capacity(reads_per_reader);
            for i in 0..reads_per_reader {
                let sql = if i % 2 == 0 {
                    format!(
                        "SELECT * FROM workload WHERE entity_id = '{room}' AND time_from >= 0 AND time_to <= {}",
                        96 * Q
                    )
                } else {
                    format!(
                        "SELECT * FROM floor_workload WHERE floor_id = '{floor}' AND time_from >= 0 AND time_to <= {}",
                        8 * Q
                    )
                };
                let t = Instant::now();
                let messages = client.simple_query(&sql).await.expect("read failed");
                latencies.push(t.elapsed());
                assert!(messages.iter().any(|m| matches!(m, SimpleQueryMessage::Row(_))));
            }
            latencies
        }));
    }

    let mut all_latencies = Vec::new();
    for h in reader_handles {
        all_latencies.extend(h.await.expect("reader panicked"));
    }
    stop.store(true, Ordering::Relaxed);
    for h in writer_handles {
        let _ = h.await;
    }

    print_latency("workload / floor query", &mut all_latencies);
}

#[tokio::main]
async fn main() {
    let n_users: usize = std::env::var("SPACEBOOK_BENCH_USERS")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(50)
        .max(16);
    let desk_capacity = 8;

    println!("=== spacebook stress benchmark ===");
    let (layout, office) = build_layout(10, n_users, desk_capacity);
    let addr = start_server(layout).await;
    println!("server: {addr}, users: {n_users}, rooms: {}\n", office.rooms.len());

    println!("[phase 1] sequential write throughput");
    phase1_sequential(addr, &office).await;

    println!("\n[phase 2] admission under contention");
    phase2_contention(addr, &office).await;

    println!("\n[phase 3] read latency under write load");
    phase3_read_under_load(addr, &office).await;

    println!("\n=== done ===");
}
