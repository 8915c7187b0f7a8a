use serde::Serialize;
use tokio::time::Instant;

pub type NodeId = u64;
pub type Term = u64;

/// Raft node role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RaftRole {
    Follower,
    Candidate,
    Leader,
    /// Terminal state after shutdown
    Dead,
}

impl std::fmt::Display for RaftRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RaftRole::Follower => write!(f, "follower"),
            RaftRole::Candidate => write!(f, "candidate"),
            RaftRole::Leader => write!(f, "leader"),
            RaftRole::Dead => write!(f, "dead"),
        }
    }
}

/// Externally observable snapshot of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct NodeStatus {
    pub node_id: NodeId,
    pub term: Term,
    pub role: RaftRole,
    pub leader_id: Option<NodeId>,
}

impl NodeStatus {
    pub fn is_leader(&self) -> bool {
        self.role == RaftRole::Leader
    }
}

/// Election state of a single node.
///
/// # Election Safety
///
/// At most one leader can be elected in a given term. Enforced by:
/// - Each node votes for at most one candidate per term (`voted_for`), and
///   `voted_for` is only cleared when `current_term` advances
/// - A candidate must collect votes from a strict majority of the cluster
/// - Replies are only counted for the term the candidate is contesting
///
/// # Term Monotonicity
///
/// `current_term` only moves forward: either by observing a higher term in an
/// RPC (`become_follower`) or by starting an election (`become_candidate`).
#[derive(Debug)]
pub struct RaftState {
    // Would be persisted in a durable implementation
    pub current_term: Term,
    pub voted_for: Option<NodeId>,

    pub role: RaftRole,

    /// Last time this node saw evidence of a live leader or election
    pub election_reset_at: Instant,

    // Known leader for the current term (if any)
    pub leader_id: Option<NodeId>,

    // Votes received in current election (for candidates)
    pub votes_received: usize,

    /// Generation of the armed election timer; older watchers exit.
    pub timer_epoch: u64,
}

impl RaftState {
    pub fn new() -> Self {
        Self {
            current_term: 0,
            voted_for: None,
            role: RaftRole::Follower,
            election_reset_at: Instant::now(),
            leader_id: None,
            votes_received: 0,
            timer_epoch: 0,
        }
    }

    pub fn is_dead(&self) -> bool {
        self.role == RaftRole::Dead
    }

    pub fn reset_election_timer(&mut self) {
        self.election_reset_at = Instant::now();
    }

    /// Supersedes any running election watcher and returns the new epoch.
    pub fn arm_election_timer(&mut self) -> u64 {
        self.timer_epoch += 1;
        self.timer_epoch
    }

    /// Invalidates the running election watcher without arming a new one.
    pub fn cancel_election_timer(&mut self) {
        self.timer_epoch += 1;
    }

    /// Transition to follower state.
    ///
    /// The vote is only forgotten when the term actually advances: a candidate
    /// stepping down in its own term keeps its self-vote.
    pub fn become_follower(&mut self, term: Term) {
        debug_assert!(term >= self.current_term, "term must not go backwards");
        if term > self.current_term {
            self.current_term = term;
            self.voted_for = None;
            self.leader_id = None;
        }
        self.role = RaftRole::Follower;
        self.votes_received = 0;
        self.reset_election_timer();
    }

    /// Applies the higher-term rule. Returns true if `term` was newer.
    pub fn observe_term(&mut self, term: Term) -> bool {
        if !self.is_dead() && term > self.current_term {
            self.become_follower(term);
            true
        } else {
            false
        }
    }

    /// Transition to candidate state
    pub fn become_candidate(&mut self, my_id: NodeId) {
        self.role = RaftRole::Candidate;
        self.current_term += 1;
        self.voted_for = Some(my_id);
        self.votes_received = 1; // Vote for self
        self.leader_id = None;
        self.reset_election_timer();
    }

    /// Transition to leader state
    pub fn become_leader(&mut self, my_id: NodeId) {
        self.role = RaftRole::Leader;
        self.leader_id = Some(my_id);
    }

    pub fn become_dead(&mut self) {
        self.role = RaftRole::Dead;
        self.leader_id = None;
    }

    pub fn status(&self, node_id: NodeId) -> NodeStatus {
        NodeStatus {
            node_id,
            term: self.current_term,
            role: self.role,
            leader_id: self.leader_id,
        }
    }
}

impl Default for RaftState {
    fn default() -> Self {
        Self::new()
    }
}

/// Strict majority of `cluster_size` nodes.
pub fn quorum(cluster_size: usize) -> usize {
    cluster_size / 2 + 1
}
