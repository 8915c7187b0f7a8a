use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rand::rngs::StdRng;
use tokio::sync::Mutex;
use tokio::time::{Duration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::config::RaftConfig;
use crate::error::{RaftError, Result};
use crate::network::RaftTransport;
use crate::raft::rpc::{
    apply_heartbeat_response, apply_vote_response, handle_append_entries, handle_request_vote,
    AppendEntriesRequest, AppendEntriesResponse, VoteOutcome, VoteRequest, VoteResponse,
};
use crate::raft::state::{quorum, NodeId, NodeStatus, RaftRole, RaftState, Term};
use crate::raft::timer::{node_rng, random_election_timeout};

/// A single consensus node: election timer, vote handling and heartbeats.
///
/// All background work (the election watcher, the leader heartbeat ticker and
/// one task per outbound RPC) runs on the node's own task tracker, so
/// [`RaftNode::shutdown`] can wait for every task to finish.
pub struct RaftNode {
    pub id: NodeId,
    peer_ids: Vec<NodeId>,
    config: RaftConfig,
    state: Mutex<RaftState>,
    transport: Arc<dyn RaftTransport>,
    rng: parking_lot::Mutex<StdRng>,
    /// Mirrors `RaftRole::Dead` so the link layer can check it without the state lock
    dead: AtomicBool,
    cancel: CancellationToken,
    tasks: TaskTracker,
}

impl RaftNode {
    pub fn new(
        id: NodeId,
        peer_ids: Vec<NodeId>,
        config: RaftConfig,
        transport: Arc<dyn RaftTransport>,
    ) -> Result<Self> {
        config.validate()?;
        let rng = node_rng(config.seed, id);

        Ok(Self {
            id,
            peer_ids,
            config,
            state: Mutex::new(RaftState::new()),
            transport,
            rng: parking_lot::Mutex::new(rng),
            dead: AtomicBool::new(false),
            cancel: CancellationToken::new(),
            tasks: TaskTracker::new(),
        })
    }

    pub fn peer_ids(&self) -> &[NodeId] {
        &self.peer_ids
    }

    /// Number of voting members, including this node
    pub fn cluster_size(&self) -> usize {
        self.peer_ids.len() + 1
    }

    /// Arm the first election timer. Call once every peer is reachable.
    pub async fn start(self: &Arc<Self>) {
        let mut state = self.state.lock().await;
        if state.is_dead() {
            return;
        }
        state.reset_election_timer();
        self.spawn_election_timer(&mut state);
        tracing::debug!(node_id = self.id, peers = ?self.peer_ids, "Node started");
    }

    pub async fn status(&self) -> NodeStatus {
        self.state.lock().await.status(self.id)
    }

    pub async fn current_term(&self) -> Term {
        self.state.lock().await.current_term
    }

    /// Check if this node is the leader
    pub async fn is_leader(&self) -> bool {
        self.state.lock().await.role == RaftRole::Leader
    }

    /// Whether the node has been shut down. Never blocks.
    pub fn is_dead(&self) -> bool {
        self.dead.load(Ordering::Acquire)
    }

    /// Background tasks still running on this node
    pub fn active_tasks(&self) -> usize {
        self.tasks.len()
    }

    /// Stop the node for good. Idempotent.
    ///
    /// Returns once every background task of this node has exited.
    pub async fn shutdown(&self) {
        {
            let mut state = self.state.lock().await;
            if !state.is_dead() {
                state.become_dead();
                self.dead.store(true, Ordering::Release);
                tracing::info!(node_id = self.id, term = state.current_term, "Node shut down");
            }
        }
        self.cancel.cancel();
        self.tasks.close();
        self.tasks.wait().await;
    }

    /// Cancel every background task without waiting for them.
    ///
    /// Used where async shutdown is not possible, e.g. on drop.
    pub fn abort(&self) {
        self.cancel.cancel();
        self.tasks.close();
    }

    /// Handle incoming RequestVote RPC
    pub async fn handle_vote_request(self: &Arc<Self>, req: VoteRequest) -> Result<VoteResponse> {
        let mut state = self.state.lock().await;
        if state.is_dead() {
            return Err(RaftError::NodeDead(self.id));
        }

        let (role, term) = (state.role, state.current_term);
        let response = handle_request_vote(&mut state, &req, self.id);
        self.rearm_if_demoted(&mut state, role, term);

        Ok(response)
    }

    /// Handle incoming AppendEntries RPC (heartbeat)
    pub async fn handle_append_entries(
        self: &Arc<Self>,
        req: AppendEntriesRequest,
    ) -> Result<AppendEntriesResponse> {
        let mut state = self.state.lock().await;
        if state.is_dead() {
            return Err(RaftError::NodeDead(self.id));
        }

        let (role, term) = (state.role, state.current_term);
        let response = handle_append_entries(&mut state, &req, self.id);
        self.rearm_if_demoted(&mut state, role, term);

        Ok(response)
    }

    fn next_election_timeout(&self) -> Duration {
        let mut rng = self.rng.lock();
        random_election_timeout(
            &mut *rng,
            self.config.election_timeout_min_ms,
            self.config.election_timeout_max_ms,
        )
    }

    /// A node that just became a follower, or stayed one but moved to a new
    /// term, needs a fresh election watcher: the old one exits on the term
    /// change.
    fn rearm_if_demoted(self: &Arc<Self>, state: &mut RaftState, role: RaftRole, term: Term) {
        if state.role == RaftRole::Follower
            && (role != RaftRole::Follower || term != state.current_term)
        {
            if role != RaftRole::Follower {
                tracing::info!(
                    node_id = self.id,
                    from = %role,
                    term = state.current_term,
                    "Stepping down to follower"
                );
            }
            self.spawn_election_timer(state);
        }
    }

    fn spawn_election_timer(self: &Arc<Self>, state: &mut RaftState) {
        if state.is_dead() {
            return;
        }
        let epoch = state.arm_election_timer();
        let term = state.current_term;
        let node = Arc::clone(self);
        self.tasks.spawn(node.run_election_timer(epoch, term));
    }

    /// Election watcher. Polls until the timeout since the last reset has
    /// elapsed, then starts an election. Exits early once superseded.
    async fn run_election_timer(self: Arc<Self>, epoch: u64, term_started: Term) {
        let timeout = self.next_election_timeout();
        tracing::trace!(
            node_id = self.id,
            term = term_started,
            timeout_ms = timeout.as_millis() as u64,
            "Election timer armed"
        );

        let mut ticker = tokio::time::interval(self.config.election_poll_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return,
                _ = ticker.tick() => {}
            }

            let mut state = self.state.lock().await;
            if state.timer_epoch != epoch {
                return;
            }
            if state.role != RaftRole::Follower && state.role != RaftRole::Candidate {
                return;
            }
            if state.current_term != term_started {
                return;
            }

            let elapsed = state.election_reset_at.elapsed();
            if elapsed >= timeout {
                tracing::info!(
                    node_id = self.id,
                    term = state.current_term,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Election timeout, starting election"
                );
                self.start_election(&mut state);
                return;
            }
        }
    }

    /// Start a new election. Caller holds the state lock.
    fn start_election(self: &Arc<Self>, state: &mut RaftState) {
        state.become_candidate(self.id);
        let term = state.current_term;
        tracing::info!(node_id = self.id, term, "Became candidate");

        if state.votes_received >= quorum(self.cluster_size()) {
            // Single-node cluster
            self.become_leader(state);
            return;
        }

        let req = VoteRequest {
            term,
            candidate_id: self.id,
        };
        for &peer_id in &self.peer_ids {
            let node = Arc::clone(self);
            self.tasks.spawn(node.request_vote_from(peer_id, req));
        }

        // Retry with a new term if this round ends in a split vote
        self.spawn_election_timer(state);
    }

    async fn request_vote_from(self: Arc<Self>, peer_id: NodeId, req: VoteRequest) {
        let result = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return,
            result = self.transport.request_vote(self.id, peer_id, req) => result,
        };

        let resp = match result {
            Ok(resp) => resp,
            Err(e) => {
                tracing::trace!(node_id = self.id, peer_id, error = %e, "Vote request failed");
                return;
            }
        };

        let mut state = self.state.lock().await;
        match apply_vote_response(&mut state, req.term, &resp, self.cluster_size()) {
            VoteOutcome::Stale => {
                tracing::trace!(
                    node_id = self.id,
                    peer_id,
                    election_term = req.term,
                    "Ignoring vote for abandoned election"
                );
            }
            VoteOutcome::SteppedDown => {
                self.rearm_if_demoted(&mut state, RaftRole::Candidate, req.term);
            }
            VoteOutcome::Rejected => {
                tracing::debug!(node_id = self.id, peer_id, term = req.term, "Vote refused");
            }
            VoteOutcome::Counted => {
                tracing::debug!(
                    node_id = self.id,
                    peer_id,
                    votes = state.votes_received,
                    "Received vote"
                );
            }
            VoteOutcome::Won => {
                self.become_leader(&mut state);
            }
        }
    }

    /// Caller holds the state lock.
    fn become_leader(self: &Arc<Self>, state: &mut RaftState) {
        state.become_leader(self.id);
        state.cancel_election_timer();
        let term = state.current_term;
        tracing::info!(
            node_id = self.id,
            term,
            votes = state.votes_received,
            "Became leader"
        );

        let node = Arc::clone(self);
        self.tasks.spawn(node.run_heartbeats(term));
    }

    /// Heartbeat ticker, runs while this node leads `term`.
    async fn run_heartbeats(self: Arc<Self>, term: Term) {
        let interval = self.config.heartbeat_interval();
        loop {
            {
                let state = self.state.lock().await;
                if state.role != RaftRole::Leader || state.current_term != term {
                    return;
                }
            }

            self.send_heartbeats(term);

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return,
                _ = tokio::time::sleep(interval) => {}
            }
        }
    }

    /// Send heartbeats to all followers (leader only)
    fn send_heartbeats(self: &Arc<Self>, term: Term) {
        let req = AppendEntriesRequest {
            term,
            leader_id: self.id,
        };
        for &peer_id in &self.peer_ids {
            let node = Arc::clone(self);
            self.tasks.spawn(node.heartbeat_to(peer_id, req));
        }
    }

    async fn heartbeat_to(self: Arc<Self>, peer_id: NodeId, req: AppendEntriesRequest) {
        let result = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return,
            result = self.transport.append_entries(self.id, peer_id, req) => result,
        };

        match result {
            Ok(resp) => {
                let mut state = self.state.lock().await;
                let (role, term) = (state.role, state.current_term);
                if apply_heartbeat_response(&mut state, &resp) {
                    tracing::debug!(
                        node_id = self.id,
                        peer_id,
                        peer_term = resp.term,
                        "Heartbeat reply carried a higher term"
                    );
                    self.rearm_if_demoted(&mut state, role, term);
                }
            }
            Err(e) => {
                tracing::trace!(node_id = self.id, peer_id, error = %e, "AppendEntries failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn fast_config() -> RaftConfig {
        RaftConfig::default()
            .with_election_timeout(20, 40)
            .with_heartbeat_interval(5)
            .with_seed(11)
    }

    /// Every peer grants every vote and acks every heartbeat.
    struct Agreeable {
        heartbeats: AtomicUsize,
    }

    #[async_trait]
    impl RaftTransport for Agreeable {
        async fn request_vote(
            &self,
            _from: NodeId,
            _to: NodeId,
            req: VoteRequest,
        ) -> Result<VoteResponse> {
            Ok(VoteResponse {
                term: req.term,
                vote_granted: true,
            })
        }

        async fn append_entries(
            &self,
            _from: NodeId,
            _to: NodeId,
            req: AppendEntriesRequest,
        ) -> Result<AppendEntriesResponse> {
            self.heartbeats.fetch_add(1, Ordering::SeqCst);
            Ok(AppendEntriesResponse {
                term: req.term,
                success: true,
            })
        }
    }

    /// Every peer is down.
    struct Partitioned;

    #[async_trait]
    impl RaftTransport for Partitioned {
        async fn request_vote(
            &self,
            from: NodeId,
            to: NodeId,
            _req: VoteRequest,
        ) -> Result<VoteResponse> {
            Err(RaftError::PeerUnreachable { from, to })
        }

        async fn append_entries(
            &self,
            from: NodeId,
            to: NodeId,
            _req: AppendEntriesRequest,
        ) -> Result<AppendEntriesResponse> {
            Err(RaftError::PeerUnreachable { from, to })
        }
    }

    /// Peers answer with a far newer term.
    struct AheadByTen;

    #[async_trait]
    impl RaftTransport for AheadByTen {
        async fn request_vote(
            &self,
            _from: NodeId,
            _to: NodeId,
            req: VoteRequest,
        ) -> Result<VoteResponse> {
            Ok(VoteResponse {
                term: req.term + 10,
                vote_granted: false,
            })
        }

        async fn append_entries(
            &self,
            _from: NodeId,
            _to: NodeId,
            req: AppendEntriesRequest,
        ) -> Result<AppendEntriesResponse> {
            Ok(AppendEntriesResponse {
                term: req.term + 10,
                success: false,
            })
        }
    }

    fn node_with(transport: Arc<dyn RaftTransport>) -> Arc<RaftNode> {
        Arc::new(RaftNode::new(0, vec![1, 2], fast_config(), transport).unwrap())
    }

    #[tokio::test]
    async fn wins_election_and_sends_heartbeats() {
        let transport = Arc::new(Agreeable {
            heartbeats: AtomicUsize::new(0),
        });
        let node = node_with(transport.clone());
        node.start().await;

        tokio::time::sleep(Duration::from_millis(150)).await;

        let status = node.status().await;
        assert_eq!(status.role, RaftRole::Leader);
        assert_eq!(status.term, 1);
        assert_eq!(status.leader_id, Some(0));
        assert!(transport.heartbeats.load(Ordering::SeqCst) > 2);

        node.shutdown().await;
    }

    #[tokio::test]
    async fn isolated_node_keeps_raising_term() {
        let node = node_with(Arc::new(Partitioned));
        node.start().await;

        tokio::time::sleep(Duration::from_millis(250)).await;

        let status = node.status().await;
        assert_eq!(status.role, RaftRole::Candidate);
        assert!(status.term >= 2, "expected re-elections, got term {}", status.term);

        node.shutdown().await;
    }

    #[tokio::test]
    async fn higher_term_in_vote_reply_demotes_candidate() {
        let node = node_with(Arc::new(AheadByTen));
        node.start().await;

        tokio::time::sleep(Duration::from_millis(60)).await;

        let status = node.status().await;
        assert_ne!(status.role, RaftRole::Leader);
        assert!(status.term >= 11);

        node.shutdown().await;
    }

    #[tokio::test]
    async fn single_node_cluster_elects_itself() {
        let node = Arc::new(RaftNode::new(
            0,
            Vec::new(),
            fast_config(),
            Arc::new(Partitioned),
        )
        .unwrap());
        node.start().await;

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(node.is_leader().await);
        assert_eq!(node.current_term().await, 1);

        node.shutdown().await;
    }

    #[tokio::test]
    async fn heartbeat_from_leader_suppresses_election() {
        let node = node_with(Arc::new(Partitioned));
        node.start().await;

        for _ in 0..20 {
            let resp = node
                .handle_append_entries(AppendEntriesRequest {
                    term: 3,
                    leader_id: 1,
                })
                .await
                .unwrap();
            assert!(resp.success);
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let status = node.status().await;
        assert_eq!(status.role, RaftRole::Follower);
        assert_eq!(status.term, 3);
        assert_eq!(status.leader_id, Some(1));

        node.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_is_idempotent_and_leaves_no_tasks() {
        let node = node_with(Arc::new(Agreeable {
            heartbeats: AtomicUsize::new(0),
        }));
        node.start().await;
        tokio::time::sleep(Duration::from_millis(80)).await;

        node.shutdown().await;
        assert_eq!(node.active_tasks(), 0);
        assert_eq!(node.status().await.role, RaftRole::Dead);

        node.shutdown().await;
        assert_eq!(node.active_tasks(), 0);
        assert_eq!(node.status().await.role, RaftRole::Dead);
    }

    #[tokio::test]
    async fn dead_node_rejects_rpcs() {
        let node = node_with(Arc::new(Partitioned));
        node.shutdown().await;

        let vote = node
            .handle_vote_request(VoteRequest {
                term: 5,
                candidate_id: 1,
            })
            .await;
        assert_eq!(vote, Err(RaftError::NodeDead(0)));

        let hb = node
            .handle_append_entries(AppendEntriesRequest {
                term: 5,
                leader_id: 1,
            })
            .await;
        assert_eq!(hb, Err(RaftError::NodeDead(0)));
        assert_eq!(node.current_term().await, 0);
    }

    #[tokio::test]
    async fn start_after_shutdown_is_noop() {
        let node = node_with(Arc::new(Partitioned));
        node.shutdown().await;
        node.start().await;

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(node.current_term().await, 0);
        assert_eq!(node.active_tasks(), 0);
    }

    #[test]
    fn rejects_invalid_config() {
        let inverted = RaftConfig::default().with_election_timeout(300, 150);
        let result = RaftNode::new(0, vec![1, 2], inverted, Arc::new(Partitioned));
        assert!(matches!(result, Err(RaftError::InvalidConfig(_))));

        let no_poll = RaftConfig {
            election_poll_interval_ms: 0,
            ..fast_config()
        };
        let result = RaftNode::new(0, vec![1, 2], no_poll, Arc::new(Partitioned));
        assert!(matches!(result, Err(RaftError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn shutdown_marks_node_dead_without_locking() {
        let node = node_with(Arc::new(Partitioned));
        assert!(!node.is_dead());

        node.shutdown().await;
        assert!(node.is_dead());
    }
}
