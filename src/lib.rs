pub mod cluster;
pub mod config;
pub mod error;
pub mod network;
pub mod raft;
pub mod shutdown;

pub use cluster::ClusterHarness;
pub use error::{RaftError, Result};
