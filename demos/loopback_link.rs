//! Both nodes in one process over the loopback link
//!
//! A scripted sensor sweeps an object towards the sensor and away again.
//! Half way through, the link is dropped to show both nodes recovering.
//!
//! Run with: cargo run --example loopback_link

use rangelink_ble::{
    ClientNode, ClientNodeConfig, LoopbackLink, Result, ScriptedSensor, SensingNode,
    SensingNodeConfig,
};
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("rangelink_ble=info".parse().unwrap()),
        )
        .init();

    println!("Loopback distance link");
    println!("======================\n");

    let run_for = Duration::from_secs(20);
    let link = LoopbackLink::new();

    let sweep: Vec<f64> = (0..20)
        .map(|i| 60.0 - 5.0 * i as f64)
        .chain((0..20).map(|i| 5.0 + 5.0 * i as f64))
        .collect();
    let sensor = ScriptedSensor::new(&sweep)?;

    let mut sensing = SensingNode::new(
        Arc::new(link.peripheral()),
        sensor,
        SensingNodeConfig::default(),
    )?;
    let mut client = ClientNode::new(Arc::new(link.central()), ClientNodeConfig::default());

    let mut samples = client.subscribe_samples();
    let printer = tokio::spawn(async move {
        while let Ok(update) = samples.recv().await {
            println!("Received {:6.2} cm | {}", update.value, update.stats);
        }
    });

    let dropper = {
        let link = link.clone();
        async move {
            tokio::time::sleep(run_for / 2).await;
            if link.drop_connection() {
                println!("\n*** Link dropped ***\n");
            }
        }
    };

    let (sensing_result, client_result, _) = tokio::join!(
        sensing.run(tokio::time::sleep(run_for)),
        client.run(tokio::time::sleep(run_for)),
        dropper,
    );
    sensing_result?;
    client_result?;

    println!("\nFinal statistics: {}", client.stats());
    println!("Samples received: {}", client.stats().samples());

    printer.abort();
    Ok(())
}
