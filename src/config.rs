use std::time::Duration;

use crate::error::{RaftError, Result};

/// Timing configuration for a single consensus node.
#[derive(Debug, Clone)]
pub struct RaftConfig {
    pub election_timeout_min_ms: u64,
    pub election_timeout_max_ms: u64,
    pub heartbeat_interval_ms: u64,
    /// How often the election watcher wakes to re-check the timeout
    pub election_poll_interval_ms: u64,
    /// Seed for the election timeout RNG. `None` draws from OS entropy.
    pub seed: Option<u64>,
}

impl Default for RaftConfig {
    fn default() -> Self {
        Self {
            election_timeout_min_ms: 150,
            election_timeout_max_ms: 300,
            heartbeat_interval_ms: 50,
            election_poll_interval_ms: 10,
            seed: None,
        }
    }
}

impl RaftConfig {
    pub fn with_election_timeout(mut self, min_ms: u64, max_ms: u64) -> Self {
        self.election_timeout_min_ms = min_ms;
        self.election_timeout_max_ms = max_ms;
        self
    }

    pub fn with_heartbeat_interval(mut self, interval_ms: u64) -> Self {
        self.heartbeat_interval_ms = interval_ms;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn election_poll_interval(&self) -> Duration {
        Duration::from_millis(self.election_poll_interval_ms)
    }

    /// Heartbeats must arrive well inside the shortest election timeout,
    /// otherwise followers would depose a healthy leader.
    pub fn validate(&self) -> Result<()> {
        if self.election_timeout_min_ms == 0 {
            return Err(RaftError::InvalidConfig(
                "election_timeout_min_ms must be positive".to_string(),
            ));
        }
        if self.election_timeout_min_ms > self.election_timeout_max_ms {
            return Err(RaftError::InvalidConfig(format!(
                "election timeout range is empty: {}..={}",
                self.election_timeout_min_ms, self.election_timeout_max_ms
            )));
        }
        if self.heartbeat_interval_ms == 0
            || self.heartbeat_interval_ms >= self.election_timeout_min_ms
        {
            return Err(RaftError::InvalidConfig(format!(
                "heartbeat_interval_ms ({}) must be in 1..{}",
                self.heartbeat_interval_ms, self.election_timeout_min_ms
            )));
        }
        if self.election_poll_interval_ms == 0 {
            return Err(RaftError::InvalidConfig(
                "election_poll_interval_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Latency model of the simulated link layer.
#[derive(Debug, Clone)]
pub struct LinkConfig {
    pub latency_min_ms: u64,
    pub latency_max_ms: u64,
    pub seed: Option<u64>,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            latency_min_ms: 1,
            latency_max_ms: 5,
            seed: None,
        }
    }
}

impl LinkConfig {
    pub fn with_latency(mut self, min_ms: u64, max_ms: u64) -> Self {
        self.latency_min_ms = min_ms;
        self.latency_max_ms = max_ms;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.latency_min_ms > self.latency_max_ms {
            return Err(RaftError::InvalidConfig(format!(
                "link latency range is empty: {}..={}",
                self.latency_min_ms, self.latency_max_ms
            )));
        }
        Ok(())
    }
}

/// Configuration of a simulated cluster.
#[derive(Debug, Clone)]
pub struct HarnessConfig {
    pub nodes: usize,
    pub raft: RaftConfig,
    pub link: LinkConfig,
    pub leader_check_retries: usize,
    pub leader_check_interval_ms: u64,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            nodes: 3,
            raft: RaftConfig::default(),
            link: LinkConfig::default(),
            leader_check_retries: 8,
            leader_check_interval_ms: 150,
        }
    }
}

impl HarnessConfig {
    pub fn new(nodes: usize) -> Self {
        Self {
            nodes,
            ..Default::default()
        }
    }

    /// Seeds both the election timers and the link latency.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.raft.seed = Some(seed);
        self.link.seed = Some(seed);
        self
    }

    pub fn with_raft(mut self, raft: RaftConfig) -> Self {
        self.raft = raft;
        self
    }

    pub fn with_link(mut self, link: LinkConfig) -> Self {
        self.link = link;
        self
    }

    pub fn leader_check_interval(&self) -> Duration {
        Duration::from_millis(self.leader_check_interval_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.nodes == 0 {
            return Err(RaftError::InvalidConfig(
                "cluster needs at least one node".to_string(),
            ));
        }
        if self.leader_check_retries == 0 {
            return Err(RaftError::InvalidConfig(
                "leader_check_retries must be positive".to_string(),
            ));
        }
        self.raft.validate()?;
        self.link.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raft_config_default() {
        let cfg = RaftConfig::default();
        assert_eq!(cfg.election_timeout_min_ms, 150);
        assert_eq!(cfg.election_timeout_max_ms, 300);
        assert_eq!(cfg.heartbeat_interval_ms, 50);
        assert_eq!(cfg.election_poll_interval_ms, 10);
        assert!(cfg.seed.is_none());
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn raft_config_rejects_inverted_timeout_range() {
        let cfg = RaftConfig::default().with_election_timeout(300, 150);
        assert!(matches!(cfg.validate(), Err(RaftError::InvalidConfig(_))));
    }

    #[test]
    fn raft_config_rejects_zero_timeout() {
        let cfg = RaftConfig::default().with_election_timeout(0, 10);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn raft_config_rejects_slow_heartbeat() {
        let cfg = RaftConfig::default().with_heartbeat_interval(150);
        assert!(cfg.validate().is_err());

        let cfg = RaftConfig::default().with_heartbeat_interval(0);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn raft_config_rejects_zero_poll_interval() {
        let cfg = RaftConfig {
            election_poll_interval_ms: 0,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn link_config_default() {
        let cfg = LinkConfig::default();
        assert_eq!(cfg.latency_min_ms, 1);
        assert_eq!(cfg.latency_max_ms, 5);
        assert!(cfg.validate().is_ok());
        assert!(cfg.with_latency(5, 1).validate().is_err());
    }

    #[test]
    fn harness_config_with_seed_sets_both_layers() {
        let cfg = HarnessConfig::new(5).with_seed(7);
        assert_eq!(cfg.nodes, 5);
        assert_eq!(cfg.raft.seed, Some(7));
        assert_eq!(cfg.link.seed, Some(7));
        assert_eq!(cfg.leader_check_retries, 8);
        assert_eq!(cfg.leader_check_interval(), Duration::from_millis(150));
    }

    #[test]
    fn harness_config_rejects_empty_cluster() {
        assert!(HarnessConfig::new(0).validate().is_err());
        assert!(HarnessConfig::new(1).validate().is_ok());
    }

    #[test]
    fn harness_config_propagates_nested_errors() {
        let cfg = HarnessConfig::new(3).with_link(LinkConfig::default().with_latency(9, 2));
        assert!(cfg.validate().is_err());
    }
}
