use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::Duration;

/// Generates a random election timeout within the configured range
pub fn random_election_timeout<R: Rng + ?Sized>(
    rng: &mut R,
    min_ms: u64,
    max_ms: u64,
) -> Duration {
    let timeout_ms = rng.gen_range(min_ms..=max_ms);
    Duration::from_millis(timeout_ms)
}

/// Builds the per-node RNG. A seeded cluster offsets the seed by node id so
/// nodes still draw different timeouts.
pub fn node_rng(seed: Option<u64>, node_id: u64) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(node_id)),
        None => StdRng::from_entropy(),
    }
}
