//! Best-bound ordering of open search nodes.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use super::node::SearchNode;

struct QueuedNode(SearchNode);

impl QueuedNode {
    /// Smaller bound first, then deeper nodes, then creation order.
    fn rank(&self, other: &Self) -> Ordering {
        other
            .0
            .bound
            .total_cmp(&self.0.bound)
            .then_with(|| self.0.depth.cmp(&other.0.depth))
            .then_with(|| other.0.id.cmp(&self.0.id))
    }
}

impl PartialEq for QueuedNode {
    fn eq(&self, other: &Self) -> bool {
        self.rank(other) == Ordering::Equal
    }
}

impl Eq for QueuedNode {}

impl PartialOrd for QueuedNode {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedNode {
    fn cmp(&self, other: &Self) -> Ordering {
        self.rank(other)
    }
}

/// Priority queue of open nodes, best (lowest) bound on top.
///
/// Bounds are on the minimization scale, so the same ordering serves both
/// objective directions.
#[derive(Default)]
pub struct Frontier {
    heap: BinaryHeap<QueuedNode>,
}

impl Frontier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, node: SearchNode) {
        self.heap.push(QueuedNode(node));
    }

    pub fn pop(&mut self) -> Option<SearchNode> {
        self.heap.pop().map(|queued| queued.0)
    }

    pub fn peek(&self) -> Option<&SearchNode> {
        self.heap.peek().map(|queued| &queued.0)
    }

    /// Lowest bound among open nodes, `+inf` when empty.
    pub fn best_bound(&self) -> f64 {
        self.peek().map_or(f64::INFINITY, |node| node.bound)
    }

    /// Drops every node that cannot beat `cutoff`. Returns how many were
    /// dropped.
    pub fn prune(&mut self, cutoff: f64, tolerance: f64) -> usize {
        let before = self.heap.len();
        self.heap
            .retain(|queued| !queued.0.can_prune(cutoff, tolerance));
        before - self.heap.len()
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}
