//! Transport seam between consensus nodes.
//!
//! A `RaftNode` only ever talks to its peers through [`RaftTransport`], so the
//! simulated link layer can be swapped for a fake in unit tests.

pub mod sim;

use async_trait::async_trait;

use crate::error::Result;
use crate::raft::rpc::{AppendEntriesRequest, AppendEntriesResponse, VoteRequest, VoteResponse};
use crate::raft::NodeId;

pub use sim::SimNetwork;

/// Outbound RPCs issued by a consensus node.
///
/// Any `Err` is treated by the caller as "peer unreachable": no vote, no ack.
#[async_trait]
pub trait RaftTransport: Send + Sync + 'static {
    async fn request_vote(&self, from: NodeId, to: NodeId, req: VoteRequest)
        -> Result<VoteResponse>;

    async fn append_entries(
        &self,
        from: NodeId,
        to: NodeId,
        req: AppendEntriesRequest,
    ) -> Result<AppendEntriesResponse>;
}
