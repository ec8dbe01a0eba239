use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use log::info;
use tokio::time::sleep;

use raftlet::{ClusterConfig, LiveCluster, LiveConfig, NodeId, NodeState, Simulation};

#[derive(Parser)]
#[command(name = "raftlet")]
#[command(about = "Single-round Raft-style election and value proposal")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Args)]
struct ClusterArgs {
    /// JSON cluster description; flags below override its values
    #[arg(short, long)]
    config: Option<String>,

    /// Number of nodes (1-10)
    #[arg(short, long)]
    nodes: Option<usize>,

    /// How long to run, in (simulated or real) milliseconds
    #[arg(short, long)]
    duration_ms: Option<u64>,

    /// Delay between taking leadership and proposing, in milliseconds
    #[arg(long)]
    proposal_delay_ms: Option<u64>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the cluster in the deterministic discrete-event simulator
    Simulate {
        #[command(flatten)]
        cluster: ClusterArgs,

        /// Seed for every random choice in the run
        #[arg(short, long)]
        seed: Option<u64>,

        /// Split payloads into fragments to exercise reassembly
        #[arg(long, default_value_t = false)]
        fragment: bool,
    },

    /// Run the cluster in real time on tokio tasks
    Live {
        #[command(flatten)]
        cluster: ClusterArgs,
    },
}

fn init_logging() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
}

fn load_config(args: &ClusterArgs) -> anyhow::Result<ClusterConfig> {
    let mut config = match &args.config {
        Some(path) => ClusterConfig::load(path)?,
        None => ClusterConfig::default(),
    };
    if let Some(nodes) = args.nodes {
        config.nodes = nodes;
    }
    if let Some(duration) = args.duration_ms {
        config.simulation.duration_ms = duration;
    }
    if let Some(delay) = args.proposal_delay_ms {
        config.proposal_delay_ms = delay;
    }
    Ok(config)
}

fn print_summary(nodes: &[(NodeId, NodeState)]) {
    println!("{:<6} {:<10} {:<6} {:<6} {:<10}", "node", "role", "value", "voted", "finished");
    for (id, state) in nodes {
        let finished = state.committed || state.consensus_reached;
        println!(
            "{:<6} {:<10} {:<6} {:<6} {:<10}",
            id,
            state.role.to_string(),
            state.value,
            state.has_voted,
            finished
        );
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();

    let cli = Cli::parse();

    match cli.command {
        Command::Simulate {
            cluster,
            seed,
            fragment,
        } => {
            let mut config = load_config(&cluster)?;
            if let Some(seed) = seed {
                config.simulation.seed = seed;
            }
            if fragment {
                config.simulation.fragment_payloads = true;
            }

            info!(
                "Simulating {} nodes for {} ms (seed {})",
                config.nodes, config.simulation.duration_ms, config.simulation.seed
            );
            let mut sim = Simulation::new(
                config.node_configs()?,
                config.network_config(),
                config.simulation.seed,
            )?;
            sim.start();
            sim.run_until(Duration::from_millis(config.simulation.duration_ms));

            let report = sim.report();
            print_summary(&report.nodes);
            for (at, id) in &report.elections {
                println!("node {id} became leader at {at:?}");
            }
            match report.consensus_at {
                Some(at) => println!("consensus reached at {at:?}"),
                None => println!("consensus not reached"),
            }
            println!("{:?}", report.stats);
        }
        Command::Live { cluster } => {
            let config = load_config(&cluster)?;
            info!(
                "Running {} live nodes for {} ms",
                config.nodes, config.simulation.duration_ms
            );

            let live = LiveCluster::spawn(
                config.node_configs()?,
                LiveConfig {
                    max_delivery_delay_ms: config.simulation.max_delivery_delay_ms,
                    seed: None,
                },
            )?;
            sleep(Duration::from_millis(config.simulation.duration_ms)).await;

            let states = live.snapshots().await?;
            live.shutdown().await;
            print_summary(&states);
        }
    }

    Ok(())
}
