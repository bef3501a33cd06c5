//! Client node on the host's Bluetooth adapter
//!
//! Scans for a sensing node advertising the distance service, subscribes to
//! it and prints every received distance with the running statistics.
//! Press Ctrl+C to stop.
//!
//! Run with: cargo run --example range_client
//!
//! Poll faster than the default one second:
//!   cargo run --example range_client -- --interval-ms 250

use rangelink_ble::{BtleCentral, ClientNode, ClientNodeConfig, Result};
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter("warn,rangelink_ble=info")
        .init();

    println!("Range client");
    println!("============\n");

    // Parse command line arguments
    let args: Vec<String> = std::env::args().collect();
    let interval = args
        .iter()
        .position(|arg| arg == "--interval-ms")
        .and_then(|i| args.get(i + 1))
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_millis);

    let mut config = ClientNodeConfig::default();
    if let Some(interval) = interval {
        config = config.with_loop_interval(interval);
    }

    println!("Looking for service {}...", config.service_uuid);
    println!("Press Ctrl+C to stop\n");

    let central = Arc::new(BtleCentral::new().await?);
    let mut client = ClientNode::new(central, config);

    let mut samples = client.subscribe_samples();
    tokio::spawn(async move {
        while let Ok(update) = samples.recv().await {
            println!(
                "{:>8.2} cm   current {:>8.2}   min {:>8.2}   max {:>8.2}",
                update.value,
                update.stats.current(),
                update.stats.min(),
                update.stats.max()
            );
        }
    });

    client
        .run(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    let stats = client.stats();
    if stats.is_empty() {
        println!("\nNo distances received");
    } else {
        println!("\n{} samples", stats.samples());
        println!("{}", stats);
    }

    Ok(())
}
