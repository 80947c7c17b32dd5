//! Rack-exclusive batch scheduling for needs-caution mode.
//!
//! Hosts are dispatched in rounds ("batches"). A batch never holds two hosts of the same
//! rack and never holds more than the concurrency limit. The planner greedily takes one
//! host from each of the racks with the most hosts left, which yields the minimum number
//! of batches: `max(largest rack, ceil(total hosts / limit))`.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::num::NonZeroUsize;

use crate::host::{RackBuckets, RackId};

/// One round of hosts that run at the same time.
pub type Batch = Vec<String>;

/// All batches of one invocation, in dispatch order.
pub type Schedule = Vec<Batch>;

/// Entry in the rack priority queue.
///
/// Ordered by (remaining DESC, rack ASC).
#[derive(Debug, Clone, PartialEq, Eq)]
struct RackEntry {
    remaining: usize,
    rack: RackId,
}

impl PartialOrd for RackEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for RackEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // More remaining hosts first, then the smaller rack id
        match self.remaining.cmp(&other.remaining) {
            Ordering::Equal => other.rack.cmp(&self.rack),
            ord => ord,
        }
    }
}

/// Lazily yields the batches of a rack-exclusive schedule.
///
/// Each call to `next` plans exactly one batch, so a caller can dispatch a batch and wait
/// for it before the following one is even computed.
#[derive(Debug)]
pub struct BatchPlanner {
    buckets: RackBuckets,
    queue: BinaryHeap<RackEntry>,
    limit: NonZeroUsize,
}

impl BatchPlanner {
    pub fn new(buckets: RackBuckets, limit: NonZeroUsize) -> Self {
        let queue = buckets
            .iter()
            .filter(|(_, hosts)| !hosts.is_empty())
            .map(|(rack, hosts)| RackEntry {
                remaining: hosts.len(),
                rack: rack.clone(),
            })
            .collect();
        Self {
            buckets,
            queue,
            limit,
        }
    }

    /// Number of racks that still have hosts to dispatch.
    pub fn pending_racks(&self) -> usize {
        self.queue.len()
    }
}

impl Iterator for BatchPlanner {
    type Item = Batch;

    fn next(&mut self) -> Option<Batch> {
        if self.queue.is_empty() {
            return None;
        }

        // Pop the racks first and push them back afterwards, so that one batch never
        // sees the same rack twice.
        let mut picked = Vec::with_capacity(self.limit.get().min(self.queue.len()));
        while picked.len() < self.limit.get() {
            match self.queue.pop() {
                Some(entry) => picked.push(entry),
                None => break,
            }
        }

        let mut batch = Vec::with_capacity(picked.len());
        for mut entry in picked {
            if let Some(host) = self.buckets.take_one(&entry.rack) {
                batch.push(host);
            }
            entry.remaining -= 1;
            if entry.remaining > 0 {
                self.queue.push(entry);
            }
        }
        Some(batch)
    }
}

/// Computes the whole rack-exclusive schedule for `buckets` at once.
pub fn plan(buckets: RackBuckets, limit: NonZeroUsize) -> Schedule {
    BatchPlanner::new(buckets, limit).collect()
}

/// The fewest batches any rack-exclusive schedule of `buckets` can have.
pub fn optimal_batch_count(buckets: &RackBuckets, limit: NonZeroUsize) -> usize {
    let by_limit = (buckets.total_hosts() + limit.get() - 1) / limit.get();
    buckets.largest_bucket().max(by_limit)
}
