//! Lock manager: the public entry point of the subsystem.
//!
//! The manager owns all shared mutable state — resource lock state, the
//! transaction table, and the wait-for graph — behind one global mutex.
//! Every public operation executes as a single atomic, serialized step; no
//! operation can observe a partially-updated state of another. The coarse
//! granularity is intentional: protocol correctness depends on the graph and
//! the resource state being updated as one indivisible unit per event, and
//! per-resource locking inside the lock manager would itself risk deadlock.
//!
//! # Transaction states
//!
//! ```text
//! ┌────────┐ acquire => Blocked ┌─────────┐
//! │ Active │───────────────────▶│ Blocked │
//! │        │◀───────────────────│         │
//! └────────┘  hand-off grant    └─────────┘
//!      │                             │
//!  commit() / abort()           victim cleanup
//!      │                             │
//!      ▼                             ▼
//! ┌───────────┐              ┌──────────────────┐
//! │ Committed │              │ Aborted(victim)  │
//! └───────────┘              └──────────────────┘
//! ```
//!
//! A wait-die death is not a state transition: the requester stays `Active`,
//! must release what it holds, and retries later. A detector-selected victim
//! is terminal and is never granted anything again.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

use parking_lot::Mutex;

use lockstep_common::error::{LockError, LockResult};
use lockstep_common::types::{ResourceId, Timestamp, TxnId};

use crate::deadlock::{DeadlockDetector, DeadlockInfo};
use crate::registry::ResourceRegistry;

/// Why a transaction was aborted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortKind {
    /// Driver-initiated retirement after a wait-die death. The logical work
    /// may be resubmitted as a new transaction.
    WaitDie,
    /// Detector-selected victim. Terminal: the driver must end this
    /// transaction's worker without resubmission.
    DeadlockVictim,
}

impl AbortKind {
    /// Returns true if no retry path exists for this abort.
    pub fn is_terminal(self) -> bool {
        matches!(self, AbortKind::DeadlockVictim)
    }
}

/// The lifecycle state of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnState {
    /// Can request and release resources.
    Active,
    /// Enqueued on a resource, waiting for hand-off.
    Blocked,
    /// All work done, all resources released.
    Committed,
    /// Aborted; see [`AbortKind`] for whether a retry path exists.
    Aborted(AbortKind),
}

impl TxnState {
    /// Returns true if the transaction can perform operations.
    pub fn is_active(self) -> bool {
        self == TxnState::Active
    }

    /// Returns true if the transaction has reached a terminal state.
    pub fn is_ended(self) -> bool {
        matches!(self, TxnState::Committed | TxnState::Aborted(_))
    }
}

impl fmt::Display for TxnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TxnState::Active => write!(f, "Active"),
            TxnState::Blocked => write!(f, "Blocked"),
            TxnState::Committed => write!(f, "Committed"),
            TxnState::Aborted(AbortKind::WaitDie) => write!(f, "Aborted(wait-die)"),
            TxnState::Aborted(AbortKind::DeadlockVictim) => write!(f, "Aborted(victim)"),
        }
    }
}

/// Outcome of a lock acquisition attempt. Exactly one per call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// The lock was granted; the requester now holds the resource.
    Granted,
    /// The requester was enqueued FIFO and is now `Blocked`. A future
    /// release will grant it the lock atomically; the caller suspends
    /// outside the critical section and watches its state.
    Blocked,
    /// Wait-die killed the request. The requester stays `Active` but must
    /// release everything it holds and retry the whole sequence later —
    /// unless it was also victimized by the detector in the same call, which
    /// its now-terminal state reveals.
    Died,
}

/// A transaction as the lock manager sees it.
#[derive(Debug)]
pub struct Transaction {
    id: TxnId,
    /// Assigned once at creation, immutable. Smaller = older.
    timestamp: Timestamp,
    resources_held: BTreeSet<ResourceId>,
    state: TxnState,
}

impl Transaction {
    fn new(id: TxnId, timestamp: Timestamp) -> Self {
        Self {
            id,
            timestamp,
            resources_held: BTreeSet::new(),
            state: TxnState::Active,
        }
    }

    /// Returns the transaction ID.
    pub fn id(&self) -> TxnId {
        self.id
    }

    /// Returns the wait-die timestamp.
    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    /// Returns the lifecycle state.
    pub fn state(&self) -> TxnState {
        self.state
    }

    /// Returns the currently held resources.
    pub fn resources_held(&self) -> &BTreeSet<ResourceId> {
        &self.resources_held
    }
}

/// Statistics about the lock manager.
#[derive(Debug, Default)]
pub struct LockStats {
    /// Transactions created.
    pub started: AtomicU64,
    /// Immediate and hand-off grants.
    pub granted: AtomicU64,
    /// Requests that blocked.
    pub blocked: AtomicU64,
    /// Wait-die deaths.
    pub died: AtomicU64,
    /// Deadlocks detected (one victim each).
    pub deadlocks: AtomicU64,
    /// Single-resource releases.
    pub releases: AtomicU64,
    /// Transactions committed.
    pub committed: AtomicU64,
    /// Transactions aborted (either kind).
    pub aborted: AtomicU64,
}

impl LockStats {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, AtomicOrdering::Relaxed);
    }
}

/// All mutable state, owned as one unit under the manager's mutex.
struct LockState {
    registry: ResourceRegistry,
    txns: HashMap<TxnId, Transaction>,
    detector: DeadlockDetector,
}

impl LockState {
    fn txn(&self, id: TxnId) -> LockResult<&Transaction> {
        self.txns.get(&id).ok_or(LockError::UnknownTransaction(id))
    }

    fn txn_mut(&mut self, id: TxnId) -> LockResult<&mut Transaction> {
        self.txns
            .get_mut(&id)
            .ok_or(LockError::UnknownTransaction(id))
    }

    fn check_resource(&self, id: ResourceId) -> LockResult<()> {
        if self.registry.contains(id) {
            Ok(())
        } else {
            Err(LockError::UnknownResource(id))
        }
    }

    fn timestamp_of(&self, id: TxnId) -> LockResult<Timestamp> {
        Ok(self.txn(id)?.timestamp)
    }

    /// Grants `resource` to `txn` in both directions of the holder/held-set
    /// invariant.
    fn grant(&mut self, resource: ResourceId, txn: TxnId) -> LockResult<()> {
        if !self.registry.try_grant(resource, txn)? {
            return Err(LockError::Internal(format!(
                "grant of {resource} to {txn} raced another holder inside the critical section"
            )));
        }
        self.txn_mut(txn)?.resources_held.insert(resource);
        Ok(())
    }

    /// Clears the holder and hands the lock to the next queued waiter, if
    /// any, flipping it `Blocked -> Active` and rewiring the surviving
    /// waiters' edges to the new holder.
    fn hand_off(&mut self, resource: ResourceId) -> LockResult<Option<TxnId>> {
        let Some(next) = self.registry.release_and_hand_off(resource)? else {
            return Ok(None);
        };

        let entry = self.txns.get_mut(&next).ok_or_else(|| {
            LockError::Internal(format!("wait queue of {resource} references unknown {next}"))
        })?;
        if entry.state != TxnState::Blocked {
            return Err(LockError::Internal(format!(
                "{next} handed {resource} while {}",
                entry.state
            )));
        }
        entry.state = TxnState::Active;
        entry.resources_held.insert(resource);
        self.detector.clear_waits(next);

        // Surviving waiters are now blocked on the new holder.
        let remaining: Vec<TxnId> = self
            .registry
            .get(resource)?
            .waiters()
            .iter()
            .copied()
            .collect();
        for waiter in remaining {
            self.detector.clear_waits(waiter);
            self.detector.add_edge(waiter, next);
        }

        Ok(Some(next))
    }

    /// Releases every resource `txn` holds, performing hand-off for each,
    /// then removes it from the graph. Holder fields are invariantly
    /// consistent with the held set; disagreement is a core bug.
    fn release_all(&mut self, txn: TxnId) -> LockResult<()> {
        let held: Vec<ResourceId> = self.txn(txn)?.resources_held.iter().copied().collect();
        for resource in held {
            if self.registry.holder(resource)? != Some(txn) {
                return Err(LockError::Internal(format!(
                    "{txn} held-set lists {resource} but the registry disagrees"
                )));
            }
            self.hand_off(resource)?;
        }
        self.txn_mut(txn)?.resources_held.clear();
        self.detector.remove_transaction(txn);
        Ok(())
    }

    /// Full victim cleanup: queue removal first so the victim can never be
    /// granted anything after this point, then release with hand-off, then
    /// the terminal state.
    fn clean_up_victim(&mut self, victim: TxnId) -> LockResult<()> {
        self.registry.remove_from_queues(victim);
        self.release_all(victim)?;
        self.txn_mut(victim)?.state = TxnState::Aborted(AbortKind::DeadlockVictim);
        Ok(())
    }

    fn detect(&self) -> LockResult<Option<DeadlockInfo>> {
        let txns = &self.txns;
        self.detector
            .find_victim(|id| txns.get(&id).map(|t| t.timestamp))
    }

    fn acquire(
        &mut self,
        resource: ResourceId,
        txn: TxnId,
    ) -> LockResult<(AcquireOutcome, Option<DeadlockInfo>)> {
        self.check_resource(resource)?;
        let requester = self.txn(txn)?;
        if !requester.state.is_active() {
            return Err(LockError::InvalidState {
                txn,
                state: requester.state.to_string(),
                expected: "Active",
            });
        }
        if requester.resources_held.contains(&resource) || self.registry.is_queued(resource, txn)? {
            return Err(LockError::AlreadyRequested { resource, txn });
        }

        // Free resource: grant immediately.
        if self.registry.holder(resource)?.is_none() {
            self.grant(resource, txn)?;
            return Ok((AcquireOutcome::Granted, None));
        }

        let holder = self
            .registry
            .holder(resource)?
            .ok_or_else(|| LockError::Internal(format!("{resource} lost its holder")))?;

        // Record the conflict, then look for a cycle. The edge goes in
        // before wait-die decides, so a cycle closed by this very request is
        // visible to the detector.
        self.detector.add_edge(txn, holder);
        let deadlock = self.detect()?;
        if let Some(victim) = deadlock.as_ref().map(|info| info.victim) {
            self.clean_up_victim(victim)?;
            if victim == txn {
                // The requester itself was chosen; its edge and queue
                // entries are gone and its state is terminal.
                return Ok((AcquireOutcome::Died, deadlock));
            }
        }

        // The victim may have been the holder: re-check before wait-die.
        // The resource can now be free, or held by a different transaction
        // after hand-off.
        let Some(holder) = self.registry.holder(resource)? else {
            self.detector.clear_waits(txn);
            self.grant(resource, txn)?;
            return Ok((AcquireOutcome::Granted, deadlock));
        };

        let requester_ts = self.timestamp_of(txn)?;
        let holder_ts = self.timestamp_of(holder)?;

        if requester_ts.is_older_than(holder_ts) {
            // Wait: the requester is older than the holder.
            self.detector.clear_waits(txn);
            self.detector.add_edge(txn, holder);
            self.registry.enqueue_waiter(resource, txn)?;
            self.txn_mut(txn)?.state = TxnState::Blocked;
            Ok((AcquireOutcome::Blocked, deadlock))
        } else {
            // Die: the requester is younger. It stays Active; the caller
            // releases its holds and retries the whole sequence later.
            self.detector.clear_waits(txn);
            Ok((AcquireOutcome::Died, deadlock))
        }
    }

    fn release(&mut self, resource: ResourceId, txn: TxnId) -> LockResult<()> {
        self.check_resource(resource)?;
        self.txn(txn)?;
        if self.registry.holder(resource)? != Some(txn) {
            return Err(LockError::NotHolder { resource, txn });
        }
        if !self.txn_mut(txn)?.resources_held.remove(&resource) {
            return Err(LockError::Internal(format!(
                "registry names {txn} holder of {resource} but its held-set disagrees"
            )));
        }
        self.hand_off(resource)?;
        // Holding nothing related to its waiters' interest changes nothing:
        // the releaser cannot itself be waiting, so drop its node.
        self.detector.remove_transaction(txn);
        Ok(())
    }

    fn commit(&mut self, txn: TxnId) -> LockResult<()> {
        let state = self.txn(txn)?.state;
        if !state.is_active() {
            return Err(LockError::InvalidState {
                txn,
                state: state.to_string(),
                expected: "Active",
            });
        }
        self.release_all(txn)?;
        self.txn_mut(txn)?.state = TxnState::Committed;
        Ok(())
    }

    fn abort(&mut self, txn: TxnId) -> LockResult<()> {
        let state = self.txn(txn)?.state;
        if state.is_ended() {
            return Err(LockError::InvalidState {
                txn,
                state: state.to_string(),
                expected: "Active or Blocked",
            });
        }
        self.registry.remove_from_queues(txn);
        self.release_all(txn)?;
        self.txn_mut(txn)?.state = TxnState::Aborted(AbortKind::WaitDie);
        Ok(())
    }
}

/// The lock manager.
///
/// `acquire`, `release`, `release_all`, `commit`, and `abort` all serialize
/// on one internal mutex; callers on other threads see each operation as
/// atomic. Construction fixes the resource set for the manager's lifetime.
pub struct LockManager {
    state: Mutex<LockState>,
    next_txn_id: AtomicU64,
    stats: LockStats,
}

impl LockManager {
    /// Creates a manager over resources identified `0..resource_count`.
    pub fn new(resource_count: u32) -> Self {
        Self::with_resources((0..resource_count).map(ResourceId::new))
    }

    /// Creates a manager over an explicit resource set.
    pub fn with_resources(resources: impl IntoIterator<Item = ResourceId>) -> Self {
        Self {
            state: Mutex::new(LockState {
                registry: ResourceRegistry::with_resources(resources),
                txns: HashMap::new(),
                detector: DeadlockDetector::new(),
            }),
            next_txn_id: AtomicU64::new(TxnId::MIN.as_u64()),
            stats: LockStats::default(),
        }
    }

    /// Registers a new `Active` transaction with the given wait-die
    /// timestamp.
    ///
    /// Timestamps must be unique: the whole protocol assumes a total order
    /// with no ties.
    pub fn create_transaction(&self, timestamp: Timestamp) -> LockResult<TxnId> {
        let mut state = self.state.lock();
        if state.txns.values().any(|t| t.timestamp == timestamp) {
            return Err(LockError::DuplicateTimestamp(timestamp));
        }
        let id = TxnId::new(self.next_txn_id.fetch_add(1, AtomicOrdering::SeqCst));
        state.txns.insert(id, Transaction::new(id, timestamp));
        LockStats::bump(&self.stats.started);
        Ok(id)
    }

    /// Requests exclusive access to a resource.
    ///
    /// Preconditions: the transaction is `Active` and neither holds nor
    /// waits on the resource. On a held resource, the conflict edge is
    /// recorded, the deadlock detector runs (and may abort some transaction
    /// found in a cycle — possibly a third party, possibly the requester),
    /// and wait-die then decides between [`AcquireOutcome::Blocked`] and
    /// [`AcquireOutcome::Died`].
    pub fn acquire(&self, resource: ResourceId, txn: TxnId) -> LockResult<AcquireOutcome> {
        let (outcome, deadlock) = self.state.lock().acquire(resource, txn)?;
        if deadlock.is_some() {
            LockStats::bump(&self.stats.deadlocks);
            LockStats::bump(&self.stats.aborted);
        }
        match outcome {
            AcquireOutcome::Granted => LockStats::bump(&self.stats.granted),
            AcquireOutcome::Blocked => LockStats::bump(&self.stats.blocked),
            AcquireOutcome::Died => LockStats::bump(&self.stats.died),
        }
        Ok(outcome)
    }

    /// Releases a held resource and hands it to the next queued waiter.
    ///
    /// Fails with [`LockError::NotHolder`] if `txn` does not hold the
    /// resource; both sides run under the same mutex, so a violation is a
    /// caller bug rather than a race.
    pub fn release(&self, resource: ResourceId, txn: TxnId) -> LockResult<()> {
        self.state.lock().release(resource, txn)?;
        LockStats::bump(&self.stats.releases);
        Ok(())
    }

    /// Releases every resource `txn` holds, with hand-off for each.
    ///
    /// Used on the abort paths; also safe (and a no-op) when nothing is
    /// held.
    pub fn release_all(&self, txn: TxnId) -> LockResult<()> {
        self.state.lock().release_all(txn)
    }

    /// Commits an `Active` transaction: releases any remaining holds and
    /// marks it `Committed`.
    pub fn commit(&self, txn: TxnId) -> LockResult<()> {
        self.state.lock().commit(txn)?;
        LockStats::bump(&self.stats.committed);
        Ok(())
    }

    /// Driver-initiated abort: releases all holds and marks the transaction
    /// `Aborted(WaitDie)`. Invalid once the transaction has ended.
    pub fn abort(&self, txn: TxnId) -> LockResult<()> {
        self.state.lock().abort(txn)?;
        LockStats::bump(&self.stats.aborted);
        Ok(())
    }

    /// Observes a transaction's lifecycle state.
    pub fn transaction_state(&self, txn: TxnId) -> Option<TxnState> {
        self.state.lock().txns.get(&txn).map(|t| t.state)
    }

    /// Observes a transaction's timestamp.
    pub fn transaction_timestamp(&self, txn: TxnId) -> Option<Timestamp> {
        self.state.lock().txns.get(&txn).map(|t| t.timestamp)
    }

    /// Observes a transaction's held resources.
    pub fn held_resources(&self, txn: TxnId) -> Option<Vec<ResourceId>> {
        self.state
            .lock()
            .txns
            .get(&txn)
            .map(|t| t.resources_held.iter().copied().collect())
    }

    /// Observes the current holder of a resource.
    pub fn resource_holder(&self, resource: ResourceId) -> LockResult<Option<TxnId>> {
        let state = self.state.lock();
        state.check_resource(resource)?;
        state.registry.holder(resource)
    }

    /// Observes a resource's wait queue, front first.
    pub fn waiters(&self, resource: ResourceId) -> LockResult<Vec<TxnId>> {
        let state = self.state.lock();
        state.check_resource(resource)?;
        Ok(state.registry.get(resource)?.waiters().iter().copied().collect())
    }

    /// Returns true if any wait-for edge touches `txn`.
    pub fn has_edges(&self, txn: TxnId) -> bool {
        self.state.lock().detector.graph().touches(txn)
    }

    /// Returns the number of configured resources.
    pub fn resource_count(&self) -> usize {
        self.state.lock().registry.len()
    }

    /// Returns the statistics counters.
    pub fn stats(&self) -> &LockStats {
        &self.stats
    }
}

impl fmt::Debug for LockManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("LockManager")
            .field("resources", &state.registry.len())
            .field("transactions", &state.txns.len())
            .field("edges", &state.detector.graph().edge_count())
            .finish()
    }
}
