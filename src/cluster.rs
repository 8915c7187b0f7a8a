//! Simulated multi-node cluster for exercising elections under partitions.
//!
//! The harness only flips links and reads each node's reported status; it
//! never touches a node's internal state.

use std::sync::Arc;

use crate::config::HarnessConfig;
use crate::error::{RaftError, Result};
use crate::network::SimNetwork;
use crate::raft::{NodeId, NodeStatus, RaftNode, Term};

pub struct ClusterHarness {
    config: HarnessConfig,
    network: Arc<SimNetwork>,
    nodes: Vec<Arc<RaftNode>>,
    /// Whether each node is attached to the rest of the cluster
    connected: Vec<bool>,
}

impl ClusterHarness {
    /// Create and start a fully connected cluster of `n` nodes with default timings.
    pub async fn new(n: usize) -> Result<Self> {
        Self::with_config(HarnessConfig::new(n)).await
    }

    pub async fn with_config(config: HarnessConfig) -> Result<Self> {
        config.validate()?;

        let n = config.nodes;
        let network = Arc::new(SimNetwork::new(n, config.link.clone()));
        let ids: Vec<NodeId> = (0..n as NodeId).collect();

        let mut nodes = Vec::with_capacity(n);
        for &id in &ids {
            let peers = ids.iter().copied().filter(|&p| p != id).collect();
            let node = Arc::new(RaftNode::new(
                id,
                peers,
                config.raft.clone(),
                network.clone(),
            )?);
            network.register(&node)?;
            nodes.push(node);
        }

        // Only arm timers once every node can be reached
        for node in &nodes {
            node.start().await;
        }

        tracing::info!(nodes = n, "Cluster started");

        Ok(Self {
            config,
            network,
            nodes,
            connected: vec![true; n],
        })
    }

    pub fn size(&self) -> usize {
        self.nodes.len()
    }

    pub fn network(&self) -> &Arc<SimNetwork> {
        &self.network
    }

    pub fn node(&self, id: NodeId) -> Result<&Arc<RaftNode>> {
        usize::try_from(id)
            .ok()
            .and_then(|idx| self.nodes.get(idx))
            .ok_or(RaftError::UnknownNode(id))
    }

    fn index(&self, id: NodeId) -> Result<usize> {
        self.node(id)?;
        Ok(id as usize)
    }

    pub fn is_connected(&self, id: NodeId) -> bool {
        self.index(id).map(|idx| self.connected[idx]).unwrap_or(false)
    }

    /// Cut `id` off from every other node, in both directions.
    pub fn disconnect_peer(&mut self, id: NodeId) -> Result<()> {
        let idx = self.index(id)?;
        tracing::info!(node_id = id, "Disconnecting node");
        self.network.disconnect_all(id)?;
        self.connected[idx] = false;
        Ok(())
    }

    /// Restore every link between `id` and the other nodes, in both directions.
    pub fn reconnect_peer(&mut self, id: NodeId) -> Result<()> {
        let idx = self.index(id)?;
        tracing::info!(node_id = id, "Reconnecting node");
        self.network.connect_all(id)?;
        self.connected[idx] = true;
        Ok(())
    }

    pub async fn statuses(&self) -> Vec<NodeStatus> {
        let mut statuses = Vec::with_capacity(self.nodes.len());
        for node in &self.nodes {
            statuses.push(node.status().await);
        }
        statuses
    }

    /// Wait for exactly one leader among the connected nodes, with no
    /// connected node ahead of it in term.
    ///
    /// Two leaders in the same term anywhere in the cluster fail immediately.
    /// Leaders in different terms, or a follower already in a newer term,
    /// mean the leader is about to be deposed, so the check is retried.
    pub async fn check_single_leader(&self) -> Result<(NodeId, Term)> {
        let attempts = self.config.leader_check_retries;

        for attempt in 0..attempts {
            let statuses = self.statuses().await;
            ensure_unique_leader_per_term(&statuses)?;

            match settled_leader(&statuses, &self.connected) {
                Ok(leader) => return Ok(leader),
                Err(reason) => tracing::debug!(attempt, reason, "No settled leader yet"),
            }

            tokio::time::sleep(self.config.leader_check_interval()).await;
        }

        Err(RaftError::NoLeader { attempts })
    }

    /// Fail if any connected node currently claims leadership.
    pub async fn check_no_leader(&self) -> Result<()> {
        for (idx, node) in self.nodes.iter().enumerate() {
            if !self.connected[idx] {
                continue;
            }
            let status = node.status().await;
            if status.is_leader() {
                return Err(RaftError::UnexpectedLeader {
                    node_id: status.node_id,
                    term: status.term,
                });
            }
        }
        Ok(())
    }

    /// Background tasks still alive across all nodes
    pub fn active_tasks(&self) -> usize {
        self.nodes.iter().map(|n| n.active_tasks()).sum()
    }

    /// Stop every node and wait for all of their tasks to exit. Idempotent.
    pub async fn shutdown(&mut self) {
        for node in &self.nodes {
            node.shutdown().await;
        }
        tracing::info!(nodes = self.nodes.len(), "Cluster shut down");
    }
}

impl Drop for ClusterHarness {
    fn drop(&mut self) {
        // Covers tests that panic before calling shutdown()
        for node in &self.nodes {
            node.abort();
        }
    }
}

fn ensure_unique_leader_per_term(statuses: &[NodeStatus]) -> Result<()> {
    let mut leaders: Vec<&NodeStatus> = statuses.iter().filter(|s| s.is_leader()).collect();
    leaders.sort_by_key(|s| s.term);
    for pair in leaders.windows(2) {
        if pair[0].term == pair[1].term {
            return Err(RaftError::MultipleLeaders {
                term: pair[0].term,
                first: pair[0].node_id,
                second: pair[1].node_id,
            });
        }
    }
    Ok(())
}

/// The one connected leader, provided no connected node has moved past its term.
fn settled_leader(
    statuses: &[NodeStatus],
    connected: &[bool],
) -> std::result::Result<(NodeId, Term), &'static str> {
    let attached: Vec<&NodeStatus> = statuses
        .iter()
        .filter(|s| connected.get(s.node_id as usize).copied().unwrap_or(false))
        .collect();

    let mut leaders = attached.iter().filter(|s| s.is_leader());
    let leader = match (leaders.next(), leaders.next()) {
        (Some(leader), None) => leader,
        (None, _) => return Err("no connected leader"),
        (Some(_), Some(_)) => return Err("leaders from different terms"),
    };

    if attached.iter().any(|s| s.term > leader.term) {
        return Err("a connected node is ahead of the leader's term");
    }
    Ok((leader.node_id, leader.term))
}
