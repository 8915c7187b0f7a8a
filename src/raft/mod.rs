pub mod node;
pub mod rpc;
pub mod state;
pub mod timer;

pub use node::RaftNode;
pub use state::{NodeId, NodeStatus, RaftRole, RaftState, Term};
