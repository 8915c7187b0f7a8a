//! Simulated in-process link layer.
//!
//! Every ordered pair of nodes has a connectivity flag. A call from `a` to `b`
//! is delivered only while the edge `a -> b` is up, and its reply only comes
//! back while `b -> a` is up. Delivery itself is immediate apart from a small
//! random latency; there is no queuing, reordering or loss beyond the gate.

use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::LinkConfig;
use crate::error::{RaftError, Result};
use crate::network::RaftTransport;
use crate::raft::rpc::{AppendEntriesRequest, AppendEntriesResponse, VoteRequest, VoteResponse};
use crate::raft::{NodeId, RaftNode};

pub struct SimNetwork {
    config: LinkConfig,
    /// `links[from][to]`
    links: RwLock<Vec<Vec<bool>>>,
    /// Registered nodes, indexed by id. Weak so the network never keeps a node alive.
    nodes: RwLock<Vec<Option<Weak<RaftNode>>>>,
    rng: Mutex<StdRng>,
}

impl SimNetwork {
    /// Create a fully connected network for `size` nodes.
    pub fn new(size: usize, config: LinkConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        Self {
            config,
            links: RwLock::new(vec![vec![true; size]; size]),
            nodes: RwLock::new(vec![None; size]),
            rng: Mutex::new(rng),
        }
    }

    pub fn size(&self) -> usize {
        self.links.read().len()
    }

    fn index(&self, id: NodeId) -> Result<usize> {
        let idx = usize::try_from(id).map_err(|_| RaftError::UnknownNode(id))?;
        if idx < self.size() {
            Ok(idx)
        } else {
            Err(RaftError::UnknownNode(id))
        }
    }

    /// Attach a node so calls addressed to its id reach its handlers.
    pub fn register(&self, node: &Arc<RaftNode>) -> Result<()> {
        let idx = self.index(node.id)?;
        self.nodes.write()[idx] = Some(Arc::downgrade(node));
        Ok(())
    }

    /// Flip one directed edge. Idempotent.
    pub fn set_connected(&self, from: NodeId, to: NodeId, connected: bool) -> Result<()> {
        let (from_idx, to_idx) = (self.index(from)?, self.index(to)?);
        self.links.write()[from_idx][to_idx] = connected;
        tracing::trace!(from, to, connected, "Link updated");
        Ok(())
    }

    pub fn is_connected(&self, from: NodeId, to: NodeId) -> bool {
        match (self.index(from), self.index(to)) {
            (Ok(from_idx), Ok(to_idx)) => self.links.read()[from_idx][to_idx],
            _ => false,
        }
    }

    /// Cut every link between `id` and the rest of the cluster, both directions.
    pub fn disconnect_all(&self, id: NodeId) -> Result<()> {
        self.set_all(id, false)
    }

    /// Restore every link between `id` and the rest of the cluster, both directions.
    pub fn connect_all(&self, id: NodeId) -> Result<()> {
        self.set_all(id, true)
    }

    fn set_all(&self, id: NodeId, connected: bool) -> Result<()> {
        let idx = self.index(id)?;
        let mut links = self.links.write();
        for other in 0..links.len() {
            if other != idx {
                links[idx][other] = connected;
                links[other][idx] = connected;
            }
        }
        Ok(())
    }

    /// Resolve the target of a call, failing if the link is down or the
    /// target has shut down.
    fn route(&self, from: NodeId, to: NodeId) -> Result<Arc<RaftNode>> {
        if !self.is_connected(from, to) {
            return Err(RaftError::PeerUnreachable { from, to });
        }
        let idx = self.index(to)?;
        self.nodes.read()[idx]
            .as_ref()
            .and_then(Weak::upgrade)
            .filter(|node| !node.is_dead())
            .ok_or(RaftError::PeerUnreachable { from, to })
    }

    fn latency(&self) -> Duration {
        let ms = self
            .rng
            .lock()
            .gen_range(self.config.latency_min_ms..=self.config.latency_max_ms);
        Duration::from_millis(ms)
    }

    async fn simulate_latency(&self) {
        let delay = self.latency();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }

    fn check_reply_path(&self, from: NodeId, to: NodeId) -> Result<()> {
        if self.is_connected(to, from) {
            Ok(())
        } else {
            Err(RaftError::PeerUnreachable { from, to })
        }
    }
}

#[async_trait]
impl RaftTransport for SimNetwork {
    async fn request_vote(
        &self,
        from: NodeId,
        to: NodeId,
        req: VoteRequest,
    ) -> Result<VoteResponse> {
        self.route(from, to)?;
        self.simulate_latency().await;

        let target = self.route(from, to)?;
        let resp = target
            .handle_vote_request(req)
            .await
            .map_err(|_| RaftError::PeerUnreachable { from, to })?;

        self.check_reply_path(from, to)?;
        Ok(resp)
    }

    async fn append_entries(
        &self,
        from: NodeId,
        to: NodeId,
        req: AppendEntriesRequest,
    ) -> Result<AppendEntriesResponse> {
        self.route(from, to)?;
        self.simulate_latency().await;

        let target = self.route(from, to)?;
        let resp = target
            .handle_append_entries(req)
            .await
            .map_err(|_| RaftError::PeerUnreachable { from, to })?;

        self.check_reply_path(from, to)?;
        Ok(resp)
    }
}
