//! Deadlock detection using wait-for graph analysis.
//!
//! The wait-for graph (WFG) tracks which transactions are blocked on which:
//!
//! ```text
//! T1 waits for T2:  T1 -> T2
//! T2 waits for T3:  T2 -> T3
//! T3 waits for T1:  T3 -> T1 (cycle = deadlock!)
//! ```
//!
//! Cycle detection is a depth-first traversal started from every source
//! node. The graph is kept in ordered maps so the outer iteration order is
//! fixed: the same graph always yields the same first-discovered cycle and
//! therefore the same victim. Detection runs on every blocking event, inside
//! the lock manager's critical section, so it always sees a consistent
//! snapshot.
//!
//! # Victim selection
//!
//! Within the first-discovered cycle the victim is the member with the
//! smallest (oldest) timestamp. Wait-die already aborts the young on
//! conflict, so the detector deliberately leans the other way and serves as
//! a pure liveness backstop. This is contractual behavior, not a heuristic
//! to tune.

use std::collections::{BTreeMap, BTreeSet};

use lockstep_common::error::{LockError, LockResult};
use lockstep_common::types::{Timestamp, TxnId};

/// A detected deadlock: the offending cycle and the transaction chosen to
/// break it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadlockInfo {
    /// The cycle of transactions, starting at its first-revisited node.
    pub cycle: Vec<TxnId>,
    /// The cycle member with the oldest timestamp.
    pub victim: TxnId,
}

/// Directed graph of "blocked on" edges between transactions.
///
/// Edges map a blocked transaction to the set of transactions holding
/// resources it is blocked on.
#[derive(Debug, Default)]
pub struct WaitForGraph {
    edges: BTreeMap<TxnId, BTreeSet<TxnId>>,
}

impl WaitForGraph {
    /// Creates an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that `requester` is blocked on `holder`.
    pub fn add_edge(&mut self, requester: TxnId, holder: TxnId) {
        self.edges.entry(requester).or_default().insert(holder);
    }

    /// Removes all outgoing edges of `waiter`.
    ///
    /// Called when a waiter stops waiting without terminating: it was
    /// granted the resource, or it died under wait-die and stays active.
    pub fn clear_waits(&mut self, waiter: TxnId) {
        self.edges.remove(&waiter);
    }

    /// Deletes `txn` as a source node and strips it from every target set.
    ///
    /// Called whenever a transaction commits, aborts, or is removed as a
    /// deadlock victim. Idempotent: a second call for the same identity is
    /// a no-op.
    pub fn remove_transaction(&mut self, txn: TxnId) {
        self.edges.remove(&txn);
        self.edges.retain(|_, targets| {
            targets.remove(&txn);
            !targets.is_empty()
        });
    }

    /// Returns true if `waiter` has any outgoing edge.
    pub fn is_waiting(&self, waiter: TxnId) -> bool {
        self.edges.contains_key(&waiter)
    }

    /// Returns true if any edge, outgoing or incoming, touches `txn`.
    pub fn touches(&self, txn: TxnId) -> bool {
        self.edges.contains_key(&txn)
            || self.edges.values().any(|targets| targets.contains(&txn))
    }

    /// Returns the total number of edges.
    pub fn edge_count(&self) -> usize {
        self.edges.values().map(BTreeSet::len).sum()
    }

    /// Finds the first cycle reachable from any node, in fixed iteration
    /// order.
    ///
    /// Traversal is depth-first with path tracking: revisiting a node
    /// already on the active path closes a cycle, and the sub-path from
    /// that node's first occurrence to the revisit is returned. Robust to
    /// disconnected components; self-edges cannot occur because a
    /// transaction never waits on a resource it holds.
    pub fn detect_cycle(&self) -> Option<Vec<TxnId>> {
        let mut path = Vec::new();
        for &start in self.edges.keys() {
            path.clear();
            if let Some(cycle) = self.dfs(start, &mut path) {
                return Some(cycle);
            }
        }
        None
    }

    fn dfs(&self, node: TxnId, path: &mut Vec<TxnId>) -> Option<Vec<TxnId>> {
        if let Some(first) = path.iter().position(|&on_path| on_path == node) {
            return Some(path[first..].to_vec());
        }
        path.push(node);
        if let Some(targets) = self.edges.get(&node) {
            for &next in targets {
                if let Some(cycle) = self.dfs(next, path) {
                    return Some(cycle);
                }
            }
        }
        path.pop();
        None
    }
}

/// Runs cycle detection over the wait-for graph and selects a victim when a
/// cycle exists.
///
/// The detector only reports the victim; the lock manager performs the
/// cleanup (release of held resources, queue removal, terminal abort).
#[derive(Debug, Default)]
pub struct DeadlockDetector {
    graph: WaitForGraph,
}

impl DeadlockDetector {
    /// Creates a detector with an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the underlying wait-for graph.
    pub fn graph(&self) -> &WaitForGraph {
        &self.graph
    }

    /// Records that `requester` is blocked on `holder`.
    pub fn add_edge(&mut self, requester: TxnId, holder: TxnId) {
        self.graph.add_edge(requester, holder);
    }

    /// Removes all outgoing edges of `waiter`.
    pub fn clear_waits(&mut self, waiter: TxnId) {
        self.graph.clear_waits(waiter);
    }

    /// Removes `txn` from the graph entirely. Idempotent.
    pub fn remove_transaction(&mut self, txn: TxnId) {
        self.graph.remove_transaction(txn);
    }

    /// Detects one cycle and selects its oldest member as victim.
    ///
    /// `ts_of` resolves a transaction's timestamp from the transaction
    /// table. A cycle member the table does not know is an internal
    /// consistency fault: the graph may only reference live transactions.
    pub fn find_victim<F>(&self, ts_of: F) -> LockResult<Option<DeadlockInfo>>
    where
        F: Fn(TxnId) -> Option<Timestamp>,
    {
        let Some(cycle) = self.graph.detect_cycle() else {
            return Ok(None);
        };

        let mut victim: Option<(TxnId, Timestamp)> = None;
        for &txn in &cycle {
            let ts = ts_of(txn).ok_or_else(|| {
                LockError::Internal(format!("wait-for graph references unknown {txn}"))
            })?;
            match victim {
                Some((_, best)) if !ts.is_older_than(best) => {}
                _ => victim = Some((txn, ts)),
            }
        }

        let (victim, _) = victim.ok_or_else(|| {
            LockError::Internal("cycle detection returned an empty cycle".to_string())
        })?;
        Ok(Some(DeadlockInfo { cycle, victim }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts_table(pairs: &[(u64, u64)]) -> impl Fn(TxnId) -> Option<Timestamp> + '_ {
        move |txn| {
            pairs
                .iter()
                .find(|(id, _)| TxnId::new(*id) == txn)
                .map(|(_, ts)| Timestamp::new(*ts))
        }
    }

    #[test]
    fn test_no_cycle() {
        let mut graph = WaitForGraph::new();
        // T1 -> T2 -> T3, no cycle
        graph.add_edge(TxnId::new(1), TxnId::new(2));
        graph.add_edge(TxnId::new(2), TxnId::new(3));
        assert!(graph.detect_cycle().is_none());
    }

    #[test]
    fn test_two_node_cycle() {
        let mut graph = WaitForGraph::new();
        graph.add_edge(TxnId::new(1), TxnId::new(2));
        graph.add_edge(TxnId::new(2), TxnId::new(1));

        let cycle = graph.detect_cycle().unwrap();
        assert_eq!(cycle, vec![TxnId::new(1), TxnId::new(2)]);
    }

    #[test]
    fn test_cycle_in_disconnected_component() {
        let mut graph = WaitForGraph::new();
        // Acyclic component
        graph.add_edge(TxnId::new(1), TxnId::new(2));
        // Cycle in a separate component
        graph.add_edge(TxnId::new(5), TxnId::new(6));
        graph.add_edge(TxnId::new(6), TxnId::new(5));

        let cycle = graph.detect_cycle().unwrap();
        assert_eq!(cycle, vec![TxnId::new(5), TxnId::new(6)]);
    }

    #[test]
    fn test_cycle_entered_through_a_tail() {
        let mut graph = WaitForGraph::new();
        // T1 -> T2 -> T3 -> T2: cycle is [T2, T3], entered from T1
        graph.add_edge(TxnId::new(1), TxnId::new(2));
        graph.add_edge(TxnId::new(2), TxnId::new(3));
        graph.add_edge(TxnId::new(3), TxnId::new(2));

        let cycle = graph.detect_cycle().unwrap();
        assert_eq!(cycle, vec![TxnId::new(2), TxnId::new(3)]);
    }

    #[test]
    fn test_oldest_member_is_victim() {
        let mut detector = DeadlockDetector::new();
        // T1 -> T2 -> T3 -> T1 with timestamps t1 < t2 < t3
        detector.add_edge(TxnId::new(1), TxnId::new(2));
        detector.add_edge(TxnId::new(2), TxnId::new(3));
        detector.add_edge(TxnId::new(3), TxnId::new(1));

        let table = [(1, 10), (2, 20), (3, 30)];
        let info = detector.find_victim(ts_table(&table)).unwrap().unwrap();
        assert_eq!(info.victim, TxnId::new(1));
        assert_eq!(
            info.cycle,
            vec![TxnId::new(1), TxnId::new(2), TxnId::new(3)]
        );
    }

    #[test]
    fn test_victim_selection_is_deterministic() {
        let table = [(1, 40), (2, 20), (3, 30), (4, 10)];
        let build = || {
            let mut detector = DeadlockDetector::new();
            detector.add_edge(TxnId::new(2), TxnId::new(3));
            detector.add_edge(TxnId::new(3), TxnId::new(2));
            detector.add_edge(TxnId::new(1), TxnId::new(4));
            detector.add_edge(TxnId::new(4), TxnId::new(1));
            detector
        };

        // Two disjoint cycles: the outer iteration order is ascending TxnId,
        // so the [T1, T4] cycle is always found first and T4 (ts 10) chosen.
        for _ in 0..4 {
            let info = build().find_victim(ts_table(&table)).unwrap().unwrap();
            assert_eq!(info.cycle, vec![TxnId::new(1), TxnId::new(4)]);
            assert_eq!(info.victim, TxnId::new(4));
        }
    }

    #[test]
    fn test_unknown_cycle_member_is_internal_fault() {
        let mut detector = DeadlockDetector::new();
        detector.add_edge(TxnId::new(1), TxnId::new(2));
        detector.add_edge(TxnId::new(2), TxnId::new(1));

        let table = [(1, 10)]; // T2 missing from the table
        assert!(matches!(
            detector.find_victim(ts_table(&table)),
            Err(LockError::Internal(_))
        ));
    }

    #[test]
    fn test_remove_transaction_is_idempotent() {
        let mut graph = WaitForGraph::new();
        graph.add_edge(TxnId::new(1), TxnId::new(2));
        graph.add_edge(TxnId::new(3), TxnId::new(1));

        graph.remove_transaction(TxnId::new(1));
        assert!(!graph.touches(TxnId::new(1)));
        assert_eq!(graph.edge_count(), 0);

        // Second removal is a no-op, not a fault
        graph.remove_transaction(TxnId::new(1));
        assert_eq!(graph.edge_count(), 0);
    }

    #[test]
    fn test_clear_waits_keeps_incoming_edges() {
        let mut graph = WaitForGraph::new();
        graph.add_edge(TxnId::new(1), TxnId::new(2));
        graph.add_edge(TxnId::new(3), TxnId::new(1));

        graph.clear_waits(TxnId::new(1));
        assert!(!graph.is_waiting(TxnId::new(1)));
        // T3 still waits on T1
        assert!(graph.touches(TxnId::new(1)));
        assert_eq!(graph.edge_count(), 1);
    }
}
