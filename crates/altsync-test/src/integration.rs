//! End-to-end Integration Test Suite
//!
//! Scenarios that drive real nodes through the swarm simulator:
//! - Discovery and convergence of fresh peers
//! - Stale alias correction through gossip
//! - Recovery from lost character chunks
//! - Transitive propagation around a partition
//! - Convergence under a lossy, reordering channel

use std::time::Duration;

use altsync_core::PeerKey;

use crate::chaos::ChaosConfig;
use crate::simulator::{Swarm, SwarmConfig};

const REALMS: [&str; 3] = ["Stormwind", "Orgrimmar", "Dalaran"];

// ============================================================================
// INTEGRATION TEST HARNESS
// ============================================================================

/// Configuration for integration tests
#[derive(Debug, Clone)]
pub struct IntegrationTestConfig {
    /// Number of peers
    pub peer_count: usize,

    /// Characters each peer registers up front
    pub characters_per_peer: usize,

    /// Simulated run time
    pub duration: Duration,

    /// Enable chaos
    pub chaos: Option<ChaosConfig>,

    pub seed: u64,
}

impl Default for IntegrationTestConfig {
    fn default() -> Self {
        Self {
            peer_count: 3,
            characters_per_peer: 3,
            duration: Duration::from_secs(30),
            chaos: None,
            seed: 7,
        }
    }
}

impl IntegrationTestConfig {
    /// Minimal test configuration
    pub fn minimal() -> Self {
        Self {
            peer_count: 2,
            characters_per_peer: 1,
            duration: Duration::from_secs(10),
            ..Default::default()
        }
    }

    /// Standard test configuration
    pub fn standard() -> Self {
        Self::default()
    }

    /// Stress test configuration
    pub fn stress() -> Self {
        Self {
            peer_count: 6,
            characters_per_peer: 6,
            duration: Duration::from_secs(600),
            chaos: Some(ChaosConfig::poor()),
            seed: 7,
        }
    }

    /// With chaos enabled
    pub fn with_chaos(mut self, chaos: ChaosConfig) -> Self {
        self.chaos = Some(chaos);
        self
    }
}

/// Result of an integration test
#[derive(Debug, Clone)]
pub struct IntegrationTestResult {
    /// Does every peer hold every other peer's exact profile?
    pub converged: bool,

    /// Messages handed to receivers
    pub messages_delivered: u64,

    /// Messages lost in the chaos network
    pub messages_lost: u64,

    pub announces_sent: u64,

    pub corrections_sent: u64,

    /// Peers whose view of someone is missing or wrong
    pub lagging: Vec<(PeerKey, PeerKey)>,
}

impl IntegrationTestResult {
    /// Check if the test passed
    pub fn passed(&self) -> bool {
        self.converged && self.lagging.is_empty()
    }
}

/// Integration test harness
pub struct IntegrationTestHarness {
    config: IntegrationTestConfig,
    swarm: Swarm,
}

impl IntegrationTestHarness {
    /// Create a harness with every peer's characters registered
    pub fn new(config: IntegrationTestConfig) -> Self {
        let mut swarm_config = SwarmConfig {
            seed: config.seed,
            ..Default::default()
        };
        if let Some(chaos) = &config.chaos {
            swarm_config = swarm_config.with_chaos(chaos.clone());
        }

        let mut swarm = Swarm::new(swarm_config);
        for i in 0..config.peer_count {
            let key = swarm.add_peer(&format!("Peer{}#{}", i, 1000 + i));
            let node = swarm.node_mut(&key);
            for c in 0..config.characters_per_peer {
                let name = format!("Hero{}x{}", i, c);
                // Registration input is always well formed here
                let _ = node.register_owned_identity(&name, REALMS[c % REALMS.len()]);
            }
        }

        Self { config, swarm }
    }

    /// Run the integration test
    pub fn run(&mut self) -> IntegrationTestResult {
        self.swarm
            .run_for(self.config.duration, Duration::from_secs(1));
        self.result()
    }

    /// Snapshot the outcome so far
    pub fn result(&self) -> IntegrationTestResult {
        let keys = self.swarm.keys();
        let mut lagging = Vec::new();
        for owner in &keys {
            let truth = self.swarm.node(owner).self_profile();
            for observer in keys.iter().filter(|k| *k != owner) {
                if truth.is_some() && self.swarm.view(observer, owner) != truth {
                    lagging.push((observer.clone(), owner.clone()));
                }
            }
        }

        let stats = self.swarm.network_stats();
        IntegrationTestResult {
            converged: self.swarm.converged(),
            messages_delivered: self.swarm.delivered(),
            messages_lost: stats.packets_lost,
            announces_sent: keys
                .iter()
                .map(|k| self.swarm.node(k).stats().announces_sent)
                .sum(),
            corrections_sent: keys
                .iter()
                .map(|k| self.swarm.node(k).stats().corrections_sent)
                .sum(),
            lagging,
        }
    }

    pub fn swarm(&self) -> &Swarm {
        &self.swarm
    }

    pub fn swarm_mut(&mut self) -> &mut Swarm {
        &mut self.swarm
    }
}

// ============================================================================
// TEST FUNCTIONS
// ============================================================================

/// Fresh peers find each other and converge
pub fn test_basic_convergence() -> IntegrationTestResult {
    let mut harness = IntegrationTestHarness::new(IntegrationTestConfig::minimal());
    harness.run()
}

/// Convergence over a poor channel
pub fn test_convergence_with_chaos() -> IntegrationTestResult {
    let config = IntegrationTestConfig {
        duration: Duration::from_secs(300),
        ..IntegrationTestConfig::standard()
    }
    .with_chaos(ChaosConfig::poor());
    let mut harness = IntegrationTestHarness::new(config);
    harness.run()
}

/// Convergence with many peers on a poor channel
pub fn test_convergence_under_stress() -> IntegrationTestResult {
    let mut harness = IntegrationTestHarness::new(IntegrationTestConfig::stress());
    harness.run()
}

#[cfg(test)]
mod tests {
    use super::*;
    use altsync_wire::MessageKind;

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    fn alias_seen(swarm: &Swarm, observer: &PeerKey, owner: &PeerKey) -> Option<String> {
        swarm.view(observer, owner).map(|p| p.alias().to_owned())
    }

    #[test]
    fn test_basic_convergence_test() {
        let result = test_basic_convergence();
        assert!(result.passed(), "lagging: {:?}", result.lagging);
        assert!(result.announces_sent >= 2);
    }

    #[test]
    fn test_standard_convergence() {
        let mut harness = IntegrationTestHarness::new(IntegrationTestConfig::standard());
        let result = harness.run();
        assert!(result.passed(), "lagging: {:?}", result.lagging);
        assert_eq!(result.messages_lost, 0);
    }

    #[test]
    fn test_with_poor_chaos() {
        let result = test_convergence_with_chaos();
        assert!(result.passed(), "lagging: {:?}", result.lagging);
    }

    #[test]
    fn test_stale_alias_corrected_once() {
        let mut swarm = Swarm::new(SwarmConfig::default());
        let a = swarm.add_peer("Alice#1");
        let c = swarm.add_peer("Carol#3");
        swarm.node_mut(&a).register_owned_identity("Thrall", "Durotar").unwrap();
        swarm.node_mut(&a).set_own_alias("Old").unwrap();
        swarm.node_mut(&c).register_owned_identity("Jaina", "Theramore").unwrap();
        swarm.run_for(secs(3), secs(1));
        assert_eq!(alias_seen(&swarm, &c, &a).as_deref(), Some("Old"));

        // A renames while cut off from C; B joins and only hears A
        swarm.block(&a, &c);
        swarm.node_mut(&a).set_own_alias("New").unwrap();
        let b = swarm.add_peer("Bob#2");
        swarm.block(&b, &c);
        swarm.node_mut(&b).register_owned_identity("Anduin", "Stormwind").unwrap();
        swarm.run_for(secs(3), secs(1));
        assert_eq!(alias_seen(&swarm, &b, &a).as_deref(), Some("New"));
        assert_eq!(alias_seen(&swarm, &c, &a).as_deref(), Some("Old"));
        assert_eq!(swarm.node(&b).stats().corrections_sent, 0);

        // C meets B and advertises its stale view of A
        swarm.unblock(&b, &c);
        swarm.node_mut(&b).announce_now();
        swarm.step(secs(1));
        assert_eq!(swarm.node(&b).stats().corrections_sent, 1);
        assert!(swarm.node(&b).gossip().has_corrected(&c, &a));
        assert_eq!(alias_seen(&swarm, &c, &a).as_deref(), Some("New"));

        // Nothing left to correct
        swarm.node_mut(&b).announce_now();
        swarm.node_mut(&c).announce_now();
        swarm.run_for(secs(10), secs(1));
        assert_eq!(swarm.node(&b).stats().corrections_sent, 1);
        assert!(swarm.converged());
    }

    #[test]
    fn test_lost_correction_heals_once_reachable() {
        let mut swarm = Swarm::new(SwarmConfig::default());
        let a = swarm.add_peer("Alice#1");
        let c = swarm.add_peer("Carol#3");
        swarm.node_mut(&a).register_owned_identity("Thrall", "Durotar").unwrap();
        swarm.node_mut(&a).set_own_alias("Old").unwrap();
        swarm.node_mut(&c).register_owned_identity("Jaina", "Theramore").unwrap();
        swarm.run_for(secs(3), secs(1));

        swarm.block(&a, &c);
        swarm.node_mut(&a).set_own_alias("New").unwrap();
        let b = swarm.add_peer("Bob#2");
        swarm.block(&b, &c);
        swarm.node_mut(&b).register_owned_identity("Anduin", "Stormwind").unwrap();
        swarm.run_for(secs(3), secs(1));

        swarm.unblock(&b, &c);
        swarm.drop_next(&b, &c, MessageKind::AliasUpdate, 1);
        swarm.node_mut(&b).announce_now();
        swarm.step(secs(1));

        // The one correction was spent and lost
        assert_eq!(swarm.node(&b).stats().corrections_sent, 1);
        assert_eq!(alias_seen(&swarm, &c, &a).as_deref(), Some("Old"));

        // A's heartbeat reaches C directly once the partition lifts
        swarm.unblock(&a, &c);
        swarm.run_for(secs(40), secs(1));
        assert_eq!(swarm.node(&b).stats().corrections_sent, 1);
        assert_eq!(alias_seen(&swarm, &c, &a).as_deref(), Some("New"));
        assert!(swarm.converged());
    }

    #[test]
    fn test_lost_first_chunk_resynced() {
        let mut swarm = Swarm::new(SwarmConfig::default());
        let a = swarm.add_peer("Alice#1");
        let b = swarm.add_peer("Bob#2");
        let names = ["Thrall", "Garrosh", "Varok", "Rexxar", "Vol'jin", "Baine"];
        for name in names {
            swarm.node_mut(&a).register_owned_identity(name, "Orgrimmar").unwrap();
        }
        // Six records at one stamp: chunks of four and two
        swarm.drop_next(&a, &b, MessageKind::CharsUpdate, 1);
        swarm.run_for(secs(3), secs(1));

        let partial = swarm.view(&b, &a).unwrap();
        assert_eq!(partial.char_count(), 2);
        assert_eq!(
            partial.chars_updated_at(),
            swarm.node(&a).self_profile().unwrap().chars_updated_at()
        );

        // Same stamp, higher count: B pulls everything again
        swarm.node_mut(&a).announce_now();
        swarm.step(secs(1));
        assert_eq!(swarm.view(&b, &a).unwrap().char_count(), 6);
        assert!(swarm.converged());
    }

    #[test]
    fn test_transitive_propagation() {
        let mut swarm = Swarm::new(SwarmConfig::default());
        let a = swarm.add_peer("Alice#1");
        let b = swarm.add_peer("Bob#2");
        let c = swarm.add_peer("Carol#3");
        swarm.block(&a, &c);
        swarm.node_mut(&a).register_owned_identity("Thrall", "Durotar").unwrap();
        swarm.node_mut(&b).register_owned_identity("Anduin", "Stormwind").unwrap();
        swarm.node_mut(&c).register_owned_identity("Jaina", "Theramore").unwrap();

        swarm.run_for(secs(60), secs(1));

        assert!(swarm.converged());
        assert_eq!(swarm.node_mut(&c).owner_of_character("Thrall"), Some(a.clone()));
        assert_eq!(swarm.node_mut(&a).owner_of_character("Jaina"), Some(c));
    }

    #[test]
    fn test_late_joiner_after_peer_set_change() {
        let mut swarm = Swarm::new(SwarmConfig::default());
        let a = swarm.add_peer("Alice#1");
        let b = swarm.add_peer("Bob#2");
        swarm.node_mut(&a).register_owned_identity("Thrall", "Durotar").unwrap();
        swarm.node_mut(&b).register_owned_identity("Anduin", "Stormwind").unwrap();
        swarm.run_for(secs(30), secs(1));
        assert!(swarm.converged());

        let c = swarm.add_peer("Carol#3");
        swarm.node_mut(&c).register_owned_identity("Jaina", "Theramore").unwrap();
        swarm.peer_set_changed_all();
        swarm.run_for(secs(10), secs(1));

        assert!(swarm.converged());
        assert!(swarm.view(&c, &a).is_some());
        assert!(swarm.view(&a, &c).is_some());
        assert!(swarm.view(&c, &b).is_some());
    }

    #[test]
    fn test_discovery_pulls_full_profile_in_one_chunk() {
        let mut swarm = Swarm::new(SwarmConfig {
            start: altsync_core::Timestamp(1000),
            ..SwarmConfig::default()
        });
        let a = swarm.add_peer("A#1");
        let b = swarm.add_peer("B#2");
        swarm.node_mut(&a).register_owned_identity("Thrall", "Durotar").unwrap();
        swarm.node_mut(&a).register_owned_identity("Rexxar", "Durotar").unwrap();
        swarm.node_mut(&a).set_own_alias("Alice").unwrap();

        swarm.run_for(secs(5), secs(1));

        let view = swarm.view(&b, &a).unwrap();
        assert_eq!(view.alias(), "Alice");
        assert_eq!(view.alias_updated_at(), altsync_core::Timestamp(1000));
        assert_eq!(view.char_count(), 2);
        assert_eq!(view.chars_updated_at(), altsync_core::Timestamp(1000));
        assert_eq!(swarm.delivered_of(&b, &a, MessageKind::RequestChars), 1);
        assert_eq!(swarm.delivered_of(&a, &b, MessageKind::CharsUpdate), 1);
        assert!(swarm.converged());
    }

    #[test]
    #[ignore = "long running"]
    fn test_stress_convergence() {
        let result = test_convergence_under_stress();
        assert!(result.passed(), "lagging: {:?}", result.lagging);
    }
}
