use std::collections::HashMap;
use std::time::Duration;

use clap::Parser;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use raft_election::cluster::ClusterHarness;
use raft_election::config::{HarnessConfig, RaftConfig};
use raft_election::raft::{NodeId, NodeStatus, Term};
use raft_election::shutdown::install_shutdown_handler;
use raft_election::RaftError;

#[derive(Parser, Debug)]
#[command(name = "raft-election")]
#[command(version)]
#[command(about = "Raft leader election over a simulated, partitionable network")]
#[command(propagate_version = true)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Start a cluster, wait for a leader and print the cluster status as JSON
    Elect(ClusterArgs),

    /// Repeatedly isolate and restore random nodes, tracking who leads
    Chaos {
        #[command(flatten)]
        cluster: ClusterArgs,

        /// Number of isolate/restore rounds
        #[arg(long, default_value = "10")]
        rounds: usize,

        /// How long a node stays isolated in each round
        #[arg(long, default_value = "500")]
        interval_ms: u64,
    },
}

#[derive(Parser, Debug)]
struct ClusterArgs {
    /// Number of nodes in the simulated cluster
    #[arg(long, default_value = "3")]
    nodes: usize,

    /// Seed for election timeouts, link latency and victim selection
    #[arg(long)]
    seed: Option<u64>,

    #[arg(long, default_value = "150")]
    election_timeout_min_ms: u64,

    #[arg(long, default_value = "300")]
    election_timeout_max_ms: u64,

    #[arg(long, default_value = "50")]
    heartbeat_interval_ms: u64,
}

impl ClusterArgs {
    fn harness_config(&self) -> HarnessConfig {
        let raft = RaftConfig::default()
            .with_election_timeout(self.election_timeout_min_ms, self.election_timeout_max_ms)
            .with_heartbeat_interval(self.heartbeat_interval_ms);
        let config = HarnessConfig::new(self.nodes).with_raft(raft);
        match self.seed {
            Some(seed) => config.with_seed(seed),
            None => config,
        }
    }
}

#[derive(Serialize)]
struct ClusterReport {
    leader: NodeId,
    term: Term,
    nodes: Vec<NodeStatus>,
}

#[derive(Serialize)]
struct RoundReport {
    round: usize,
    isolated: NodeId,
    leader: Option<NodeId>,
    term: Option<Term>,
}

#[derive(Serialize)]
struct ChaosReport {
    rounds_completed: usize,
    rounds_without_leader: usize,
    rounds: Vec<RoundReport>,
    final_nodes: Vec<NodeStatus>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    match args.command {
        Commands::Elect(cluster) => run_elect(cluster).await,
        Commands::Chaos {
            cluster,
            rounds,
            interval_ms,
        } => run_chaos(cluster, rounds, Duration::from_millis(interval_ms)).await,
    }
}

async fn run_elect(args: ClusterArgs) -> Result<(), Box<dyn std::error::Error>> {
    let mut harness = ClusterHarness::with_config(args.harness_config()).await?;

    let result = harness.check_single_leader().await;
    let nodes = harness.statuses().await;
    harness.shutdown().await;

    let (leader, term) = result?;
    let report = ClusterReport { leader, term, nodes };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn run_chaos(
    args: ClusterArgs,
    rounds: usize,
    interval: Duration,
) -> Result<(), Box<dyn std::error::Error>> {
    let token = install_shutdown_handler()?;
    let mut rng = match args.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    let mut harness = ClusterHarness::with_config(args.harness_config()).await?;
    let result = chaos_rounds(&mut harness, &mut rng, rounds, interval, &token).await;
    let final_nodes = harness.statuses().await;
    harness.shutdown().await;

    let (completed, round_reports) = result?;
    let report = ChaosReport {
        rounds_completed: completed,
        rounds_without_leader: round_reports.iter().filter(|r| r.leader.is_none()).count(),
        rounds: round_reports,
        final_nodes,
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn chaos_rounds(
    harness: &mut ClusterHarness,
    rng: &mut StdRng,
    rounds: usize,
    interval: Duration,
    token: &CancellationToken,
) -> Result<(usize, Vec<RoundReport>), Box<dyn std::error::Error>> {
    let mut reports = Vec::with_capacity(rounds);
    let mut highest_terms: HashMap<NodeId, Term> = HashMap::new();

    for round in 0..rounds {
        let isolated = rng.gen_range(0..harness.size()) as NodeId;
        harness.disconnect_peer(isolated)?;

        if !pause(interval, token).await {
            harness.reconnect_peer(isolated)?;
            break;
        }

        let outcome = harness.check_single_leader().await;
        harness.reconnect_peer(isolated)?;

        let (leader, term) = match outcome {
            Ok((leader, term)) => {
                tracing::info!(round, isolated, leader, term, "Leader elected");
                (Some(leader), Some(term))
            }
            Err(RaftError::NoLeader { attempts }) => {
                tracing::warn!(round, isolated, attempts, "No leader while node was isolated");
                (None, None)
            }
            Err(e) => return Err(e.into()),
        };
        reports.push(RoundReport {
            round,
            isolated,
            leader,
            term,
        });

        for status in harness.statuses().await {
            let highest = highest_terms.entry(status.node_id).or_insert(0);
            if status.term < *highest {
                return Err(format!(
                    "node {} went back from term {} to {}",
                    status.node_id, highest, status.term
                )
                .into());
            }
            *highest = status.term;
        }

        if !pause(interval / 2, token).await {
            break;
        }
    }

    Ok((reports.len(), reports))
}

/// Sleep unless shutdown is requested. Returns false if interrupted.
async fn pause(duration: Duration, token: &CancellationToken) -> bool {
    tokio::select! {
        _ = token.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}
