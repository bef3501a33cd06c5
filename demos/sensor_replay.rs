//! Replay raw distances through the filter and publisher
//!
//! Shows which polls would be transmitted for a sequence of raw readings,
//! without any radio. Each line is one poll at the sensing node's cadence.
//!
//! Run with: cargo run --example sensor_replay
//!
//! Supply your own readings in centimetres:
//!   cargo run --example sensor_replay -- 80 45 22 18 12 9 30 55

use rangelink_ble::{
    MovingAverage, ProducerState, PublishDecision, Publisher, Result, SensingNodeConfig,
};
use std::time::Instant;

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter("warn,rangelink_ble=debug")
        .init();

    let readings: Vec<f64> = std::env::args()
        .skip(1)
        .filter_map(|arg| arg.parse().ok())
        .collect();
    let readings = if readings.is_empty() {
        vec![
            120.0, 90.0, 60.0, 35.0, 25.0, 20.0, 15.0, 10.0, 10.0, 10.0, 10.0, 10.0, 40.0, 80.0,
        ]
    } else {
        readings
    };

    let config = SensingNodeConfig::default();
    config.validate()?;

    let mut filter = MovingAverage::new(config.filter_window)?;
    let mut publisher = Publisher::new(config.proximity_threshold_cm, config.publish_interval);
    let start = Instant::now();

    println!(
        "{:>8} {:>10} {:>10}   decision",
        "t (ms)", "raw", "filtered"
    );

    for (i, raw) in readings.iter().enumerate() {
        let now = start + config.poll_interval * i as u32;
        let filtered = filter.update(*raw);

        let decision = match publisher.evaluate(filtered, ProducerState::Connected, now) {
            PublishDecision::Publish(frame) => {
                publisher.record_transmission(now);
                format!("send \"{}\"", frame)
            }
            PublishDecision::Skip(reason) => format!("skip ({})", reason),
        };

        println!(
            "{:>8} {:>10.2} {:>10.2}   {}",
            (now - start).as_millis(),
            raw,
            filtered,
            decision
        );
    }

    Ok(())
}
