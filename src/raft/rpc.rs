use crate::raft::state::{quorum, NodeId, RaftRole, RaftState, Term};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VoteRequest {
    pub term: Term,
    pub candidate_id: NodeId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VoteResponse {
    pub term: Term,
    pub vote_granted: bool,
}

/// Empty AppendEntries, used only as the leader heartbeat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppendEntriesRequest {
    pub term: Term,
    pub leader_id: NodeId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppendEntriesResponse {
    pub term: Term,
    pub success: bool,
}

/// What a candidate did with one RequestVote reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteOutcome {
    /// Reply belongs to an abandoned election or this node is no longer a candidate
    Stale,
    /// Reply carried a higher term
    SteppedDown,
    /// Peer refused
    Rejected,
    /// Vote counted, quorum not yet reached
    Counted,
    /// Vote counted and quorum reached; the caller must become leader
    Won,
}

/// Handle RequestVote RPC
pub fn handle_request_vote(
    state: &mut RaftState,
    req: &VoteRequest,
    my_id: NodeId,
) -> VoteResponse {
    // If request term is greater, update our term and become follower
    state.observe_term(req.term);

    let vote_granted = if req.term < state.current_term {
        // Reject if request term is less than our current term
        false
    } else if state.voted_for.is_some() && state.voted_for != Some(req.candidate_id) {
        // Already voted for someone else in this term
        false
    } else {
        state.voted_for = Some(req.candidate_id);
        state.reset_election_timer();
        true
    };

    tracing::debug!(
        node_id = my_id,
        candidate = req.candidate_id,
        term = req.term,
        granted = vote_granted,
        "RequestVote response"
    );

    VoteResponse {
        term: state.current_term,
        vote_granted,
    }
}

/// Handle AppendEntries RPC (heartbeat only)
pub fn handle_append_entries(
    state: &mut RaftState,
    req: &AppendEntriesRequest,
    my_id: NodeId,
) -> AppendEntriesResponse {
    state.observe_term(req.term);

    // Reject if request term is less than our current term
    if req.term < state.current_term {
        tracing::trace!(
            node_id = my_id,
            leader = req.leader_id,
            term = req.term,
            current_term = state.current_term,
            "Rejecting stale heartbeat"
        );
        return AppendEntriesResponse {
            term: state.current_term,
            success: false,
        };
    }

    // Valid heartbeat from the leader of this term
    if state.role != RaftRole::Follower {
        state.become_follower(req.term);
    } else {
        state.reset_election_timer();
    }
    state.leader_id = Some(req.leader_id);

    AppendEntriesResponse {
        term: state.current_term,
        success: true,
    }
}

/// Applies a RequestVote reply for the election started in `saved_term`.
pub fn apply_vote_response(
    state: &mut RaftState,
    saved_term: Term,
    resp: &VoteResponse,
    cluster_size: usize,
) -> VoteOutcome {
    if state.role != RaftRole::Candidate || state.current_term != saved_term {
        return VoteOutcome::Stale;
    }
    if state.observe_term(resp.term) {
        return VoteOutcome::SteppedDown;
    }
    if resp.term != saved_term || !resp.vote_granted {
        return VoteOutcome::Rejected;
    }

    state.votes_received += 1;
    if state.votes_received >= quorum(cluster_size) {
        VoteOutcome::Won
    } else {
        VoteOutcome::Counted
    }
}

/// Applies a heartbeat reply. Returns true if the leader stepped down.
pub fn apply_heartbeat_response(state: &mut RaftState, resp: &AppendEntriesResponse) -> bool {
    if state.is_dead() {
        return false;
    }
    state.observe_term(resp.term)
}
