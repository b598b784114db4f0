//! Ordering policy over a set of physical replicas (spec.md §4.5).
//!
//! The contract permits any permutation; callers may not assume a
//! specific order. The default is uniform random shuffle.

use rand::seq::SliceRandom;
use rand::thread_rng;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Produces an attempt order over a set of physical replicas.
pub trait EndpointScheduler<A>: Send + Sync {
    fn order(&self, replicas: &[A]) -> Vec<A>;
}

/// Uniform random shuffle. The default policy.
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomScheduler;

impl<A: Clone> EndpointScheduler<A> for RandomScheduler {
    fn order(&self, replicas: &[A]) -> Vec<A> {
        let mut out = replicas.to_vec();
        out.shuffle(&mut thread_rng());
        out
    }
}

/// Deterministic round-robin over a stable replica ordering. Useful where
/// tests need reproducible fan-out order, or for a preference policy that
/// spreads load evenly call over call.
#[derive(Debug, Default)]
pub struct RoundRobinScheduler {
    cursor: AtomicUsize,
}

impl RoundRobinScheduler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl<A: Clone + Ord> EndpointScheduler<A> for RoundRobinScheduler {
    fn order(&self, replicas: &[A]) -> Vec<A> {
        if replicas.is_empty() {
            return Vec::new();
        }
        let mut sorted = replicas.to_vec();
        sorted.sort();
        let start = self.cursor.fetch_add(1, Ordering::Relaxed) % sorted.len();
        sorted.rotate_left(start);
        sorted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_scheduler_preserves_the_full_set() {
        let replicas = vec![1, 2, 3, 4, 5];
        let ordered = RandomScheduler.order(&replicas);
        let mut sorted = ordered.clone();
        sorted.sort_unstable();
        assert_eq!(sorted, replicas);
    }

    #[test]
    fn round_robin_rotates_start_point_each_call() {
        let sched = RoundRobinScheduler::new();
        let replicas = vec!["a", "b", "c"];
        let first = sched.order(&replicas);
        let second = sched.order(&replicas);
        let third = sched.order(&replicas);
        assert_eq!(first, vec!["a", "b", "c"]);
        assert_eq!(second, vec!["b", "c", "a"]);
        assert_eq!(third, vec!["c", "a", "b"]);
    }

    #[test]
    fn round_robin_handles_empty_replica_set() {
        let sched = RoundRobinScheduler::new();
        let replicas: Vec<&str> = vec![];
        assert_eq!(sched.order(&replicas), Vec::<&str>::new());
    }
}
