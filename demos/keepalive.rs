//! Keep-alive examples for idlepool

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use idlepool::{BoxError, KeepAlive, Pool, PoolConfiguration, PoolError, Resource};
use tracing_subscriber::EnvFilter;

/// Stand-in for a TCP connection that the server may drop
struct Connection {
    id: usize,
    alive: Arc<AtomicBool>,
}

impl Resource for Connection {
    fn release(self) {
        println!("   Closing connection #{}", self.id);
    }
}

/// Async liveness probe, as a real client would send a PING
struct Ping;

#[async_trait]
impl KeepAlive<Connection> for Ping {
    async fn check(&self, conn: &Connection) -> Result<(), BoxError> {
        tokio::time::sleep(Duration::from_millis(5)).await;
        if conn.alive.load(Ordering::Relaxed) {
            Ok(())
        } else {
            Err(format!("connection #{} reset by peer", conn.id).into())
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    println!("=== idlepool - Keep-Alive Examples ===\n");

    idle_expiry()?;
    full_pool()?;
    background_sweep().await?;

    Ok(())
}

fn connection_factory() -> (impl Fn() -> Result<Connection, BoxError> + Send + Sync + 'static, Arc<AtomicBool>) {
    let next_id = AtomicUsize::new(1);
    let alive = Arc::new(AtomicBool::new(true));
    let shared = Arc::clone(&alive);
    let factory = move || {
        Ok(Connection {
            id: next_id.fetch_add(1, Ordering::Relaxed),
            alive: Arc::clone(&shared),
        })
    };
    (factory, alive)
}

fn idle_expiry() -> Result<(), BoxError> {
    println!("1. Idle Expiry:");
    let (factory, _) = connection_factory();
    let config = PoolConfiguration::new()
        .with_max_pool_size(4)
        .with_idle_timeout(Duration::from_millis(50));
    let pool = Pool::new(factory, config)?;

    let conn = pool.checkout()?;
    println!("   Checked out #{}", conn.id);
    pool.checkin(conn)?;

    std::thread::sleep(Duration::from_millis(80));
    let conn = pool.checkout()?;
    println!("   After idling past the timeout, got #{}\n", conn.id);
    Ok(())
}

fn full_pool() -> Result<(), BoxError> {
    println!("2. Full Pool:");
    let (factory, _) = connection_factory();
    let pool = Pool::new(factory, PoolConfiguration::new().with_max_pool_size(1))?;

    let first = pool.checkout()?;
    let second = pool.checkout()?;
    pool.checkin(first)?;

    match pool.checkin(second) {
        Err(PoolError::PoolFull) => println!("   Second checkin rejected, connection closed\n"),
        other => println!("   Unexpected: {other:?}\n"),
    }
    Ok(())
}

async fn background_sweep() -> Result<(), BoxError> {
    println!("3. Background Sweep:");
    let (factory, alive) = connection_factory();
    let config = PoolConfiguration::new()
        .with_max_pool_size(4)
        .with_keep_alive_check(Duration::from_millis(100), Arc::new(Ping))
        .with_warmup(3);
    let pool = Pool::new(factory, config)?;
    println!("   Warmed up {} connections", pool.idle_count());

    // Use the connections briefly so the first sweep sees them as fresh,
    // then kill them all before it runs.
    tokio::time::sleep(Duration::from_millis(40)).await;
    let busy: Vec<_> = (0..3).map(|_| pool.get()).collect::<Result<_, _>>()?;
    drop(busy);
    alive.store(false, Ordering::Relaxed);
    tokio::time::sleep(Duration::from_millis(110)).await;

    let metrics = pool.get_metrics();
    println!("   Idle after sweep: {}", metrics.idle_resources);
    println!("   Failed checks: {}", metrics.keep_alive_failed);

    pool.close().await;

    println!("\n   Metrics:");
    for (key, value) in pool.export_metrics() {
        println!("     {key}: {value}");
    }
    Ok(())
}
