//! altsync chaos simulation
//!
//! Runs the integration harness over increasingly hostile channels and
//! reports how long the swarm takes to converge.

use std::time::Duration;

use altsync_runtime::{init_tracing, TelemetryConfig};
use altsync_test::{ChaosConfig, IntegrationTestConfig, IntegrationTestHarness};

fn main() {
    init_tracing(&TelemetryConfig {
        default_directive: "warn".into(),
        ..Default::default()
    });

    println!("=== altsync Chaos Simulation ===\n");

    let networks = [
        ("perfect", ChaosConfig::perfect()),
        ("good", ChaosConfig::good()),
        ("poor", ChaosConfig::poor()),
        ("hostile", ChaosConfig::hostile()),
    ];

    for (name, chaos) in networks {
        let config = IntegrationTestConfig {
            peer_count: 6,
            characters_per_peer: 5,
            duration: Duration::from_secs(0),
            ..Default::default()
        }
        .with_chaos(chaos);
        let mut harness = IntegrationTestHarness::new(config);

        let mut converged_at = None;
        for second in 1..=900u64 {
            harness.swarm_mut().step(Duration::from_secs(1));
            if harness.swarm().converged() {
                converged_at = Some(second);
                break;
            }
        }

        let result = harness.result();
        match converged_at {
            Some(secs) => println!("{:>8}: converged after {:>4}s", name, secs),
            None => {
                tracing::warn!(network = name, lagging = ?result.lagging, "swarm did not converge");
                println!("{:>8}: not converged, lagging {:?}", name, result.lagging);
            }
        }
        println!(
            "          delivered {} / lost {} / corrections {}",
            result.messages_delivered, result.messages_lost, result.corrections_sent
        );
    }
}
