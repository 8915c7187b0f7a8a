use thiserror::Error;

use crate::raft::{NodeId, Term};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RaftError {
    #[error("Peer {to} unreachable from node {from}")]
    PeerUnreachable { from: NodeId, to: NodeId },

    #[error("Node {0} is shut down")]
    NodeDead(NodeId),

    #[error("Unknown node: {0}")]
    UnknownNode(NodeId),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Nodes {first} and {second} both claim leadership in term {term}")]
    MultipleLeaders {
        term: Term,
        first: NodeId,
        second: NodeId,
    },

    #[error("No leader elected after {attempts} attempts")]
    NoLeader { attempts: usize },

    #[error("Node {node_id} is leader in term {term}, expected no leader")]
    UnexpectedLeader { node_id: NodeId, term: Term },
}

pub type Result<T> = std::result::Result<T, RaftError>;
