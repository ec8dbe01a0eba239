mod common;

use std::time::Duration;

use common::staggered_configs;
use proptest::prelude::*;
use raftlet::raft::{NodeId, NodeRole};
use raftlet::{NetworkConfig, Simulation};

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn uncontended_election_converges_on_one_value(
        cluster_size in 1usize..=10,
        seed in any::<u64>(),
        fragment_payloads in any::<bool>(),
    ) {
        let fast = (cluster_size - 1) as NodeId;
        let network = NetworkConfig { max_delivery_delay_ms: 5, fragment_payloads };
        let mut sim = Simulation::new(staggered_configs(cluster_size, fast, 1_000), network, seed)
            .expect("valid cluster");
        sim.start();
        sim.run_until(Duration::from_millis(2_000));

        let report = sim.report();
        prop_assert_eq!(report.elections.len(), 1);
        prop_assert_eq!(report.elections[0].1, fast);
        prop_assert_eq!(report.leaders(), vec![fast]);
        prop_assert_eq!(report.values(), vec![fast; cluster_size]);

        for (id, state) in &report.nodes {
            prop_assert!(state.has_voted);
            if *id == fast {
                prop_assert!(state.proposal_sent);
            } else {
                prop_assert_eq!(state.role, NodeRole::Follower);
                prop_assert!(state.committed);
                prop_assert!(sim.node(*id).unwrap().election_timer().is_none());
            }
        }

        // Small clusters judge the proposal in windows that always fill.
        if cluster_size <= 5 {
            prop_assert!(report.consensus_at.is_some());
        }
    }

    #[test]
    fn same_seed_same_run(
        cluster_size in 2usize..=7,
        seed in any::<u64>(),
        fragment_payloads in any::<bool>(),
    ) {
        let run = || {
            let network = NetworkConfig { max_delivery_delay_ms: 5, fragment_payloads };
            let mut sim = Simulation::with_cluster_size(cluster_size, network, seed)
                .expect("valid cluster");
            sim.start();
            sim.run_until(Duration::from_millis(1_500));
            sim.report()
        };

        prop_assert_eq!(run(), run());
    }

    #[test]
    fn values_only_ever_hold_a_leader_id(
        cluster_size in 2usize..=6,
        seed in any::<u64>(),
    ) {
        let configs = (0..cluster_size)
            .map(|id| {
                raftlet::RaftConfig::for_cluster(id as NodeId, cluster_size).with_proposal_delay(500)
            })
            .collect();
        let mut sim = Simulation::new(configs, NetworkConfig::default(), seed)
            .expect("valid cluster");
        sim.start();
        sim.run_until(Duration::from_millis(3_000));

        let report = sim.report();
        let leaders: Vec<NodeId> = report.elections.iter().map(|(_, id)| *id).collect();
        for (_, state) in &report.nodes {
            if state.committed || state.proposal_sent {
                prop_assert!(leaders.contains(&state.value));
            } else {
                prop_assert_eq!(state.value, 0);
            }
        }
    }
}

#[test]
fn fragmented_delivery_is_reassembled() {
    let network = NetworkConfig {
        max_delivery_delay_ms: 5,
        fragment_payloads: true,
    };
    let mut sim = Simulation::new(staggered_configs(3, 1, 500), network, 99).expect("valid cluster");
    sim.start();
    sim.run_until(Duration::from_secs(2));

    let report = sim.report();
    assert_eq!(report.values(), vec![1, 1, 1]);
    assert!(report.consensus_at.is_some());
    assert!(report.stats.fragments_delivered >= report.stats.messages_sent);
}
