// idlepool demo binary
// The library lives in lib.rs; run the keep-alive demo with:
// cargo run --example keepalive

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use idlepool::{Pool, PoolConfiguration, Resource};
use tracing_subscriber::EnvFilter;

struct Conn(usize);

impl Resource for Conn {
    fn release(self) {
        println!("  Released connection #{}", self.0);
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    println!("=== idlepool ===");
    println!("Run: cargo run --example keepalive");
    println!();

    let next_id = AtomicUsize::new(1);
    let config = PoolConfiguration::new()
        .with_max_pool_size(2)
        .with_idle_timeout(Duration::from_secs(30));
    let pool = Pool::new(move || Ok(Conn(next_id.fetch_add(1, Ordering::Relaxed))), config)?;

    println!("Quick Demo:");
    {
        let conn = pool.get()?;
        println!("  Got connection #{}", conn.0);
    }
    println!("  Idle after return: {}", pool.idle_count());

    pool.close().await;
    Ok(())
}
