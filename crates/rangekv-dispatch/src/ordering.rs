//! Candidate ordering: health partition plus per-partition strategy.
//!
//! Candidates flagged unhealthy always sort after healthy ones; the
//! ordering strategy only permutes within each partition.

use rand::seq::SliceRandom;

/// Order in which a transport tries candidate replicas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReplicaOrdering {
    /// Keep the caller-supplied order within each health partition.
    #[default]
    Stable,
    /// Uniformly permute candidates within each health partition.
    Randomized,
}

/// Stable-partitions `items` into a healthy prefix and unhealthy suffix,
/// preserving input order within each partition. Returns the number of
/// healthy items.
pub fn partition_by_health<T, F>(items: &mut Vec<T>, is_healthy: F) -> usize
where
    F: Fn(&T) -> bool,
{
    let mut healthy = Vec::with_capacity(items.len());
    let mut unhealthy = Vec::new();
    for item in items.drain(..) {
        if is_healthy(&item) {
            healthy.push(item);
        } else {
            unhealthy.push(item);
        }
    }
    let split = healthy.len();
    items.extend(healthy);
    items.extend(unhealthy);
    split
}

/// Applies the ordering strategy to each partition independently.
/// `healthy_count` is the partition boundary returned by
/// [`partition_by_health`]; no item crosses it.
pub fn apply_ordering<T>(items: &mut [T], healthy_count: usize, ordering: ReplicaOrdering) {
    match ordering {
        ReplicaOrdering::Stable => {}
        ReplicaOrdering::Randomized => {
            let mut rng = rand::thread_rng();
            let (healthy, unhealthy) = items.split_at_mut(healthy_count);
            healthy.shuffle(&mut rng);
            unhealthy.shuffle(&mut rng);
        }
    }
}
