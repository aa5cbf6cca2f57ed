//! Resource registry: lock state and FIFO wait queues.
//!
//! The registry owns the fixed set of lockable resources. Each resource has
//! at most one holder and an ordered wait queue; queue position is grant
//! priority after a release.
//!
//! Every method here is invoked only while the lock manager's critical
//! section is held, so the registry itself performs no locking. An unknown
//! resource ID at this layer is an internal fault: the manager validates
//! resource identifiers before calling down.

use std::collections::{BTreeMap, VecDeque};

use lockstep_common::error::{LockError, LockResult};
use lockstep_common::types::{ResourceId, TxnId};

/// One exclusively-lockable resource.
#[derive(Debug)]
pub struct Resource {
    /// Resource identifier.
    id: ResourceId,
    /// Current holder, if any. `None` means free.
    holder: Option<TxnId>,
    /// FIFO wait queue. Front of the queue is granted first on release.
    wait_queue: VecDeque<TxnId>,
}

impl Resource {
    /// Creates a new free resource.
    pub fn new(id: ResourceId) -> Self {
        Self {
            id,
            holder: None,
            wait_queue: VecDeque::new(),
        }
    }

    /// Returns the resource identifier.
    pub fn id(&self) -> ResourceId {
        self.id
    }

    /// Returns the current holder, if any.
    pub fn holder(&self) -> Option<TxnId> {
        self.holder
    }

    /// Returns true if the resource has no holder.
    pub fn is_free(&self) -> bool {
        self.holder.is_none()
    }

    /// Returns the wait queue, front first.
    pub fn waiters(&self) -> &VecDeque<TxnId> {
        &self.wait_queue
    }
}

/// The fixed set of lockable resources.
///
/// Created once at lock-manager construction; only holder and wait-queue
/// fields mutate afterwards.
#[derive(Debug)]
pub struct ResourceRegistry {
    resources: BTreeMap<ResourceId, Resource>,
}

impl ResourceRegistry {
    /// Creates a registry with `count` resources identified `0..count`.
    pub fn new(count: u32) -> Self {
        Self::with_resources((0..count).map(ResourceId::new))
    }

    /// Creates a registry from an explicit set of resource identifiers.
    pub fn with_resources(ids: impl IntoIterator<Item = ResourceId>) -> Self {
        let resources = ids
            .into_iter()
            .map(|id| (id, Resource::new(id)))
            .collect();
        Self { resources }
    }

    /// Returns true if the identifier names a configured resource.
    pub fn contains(&self, id: ResourceId) -> bool {
        self.resources.contains_key(&id)
    }

    /// Returns the number of configured resources.
    pub fn len(&self) -> usize {
        self.resources.len()
    }

    /// Returns true if no resources are configured.
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Returns the resource, failing loudly on an unknown identifier.
    pub fn get(&self, id: ResourceId) -> LockResult<&Resource> {
        self.resources
            .get(&id)
            .ok_or_else(|| LockError::Internal(format!("registry has no resource {id}")))
    }

    fn get_mut(&mut self, id: ResourceId) -> LockResult<&mut Resource> {
        self.resources
            .get_mut(&id)
            .ok_or_else(|| LockError::Internal(format!("registry has no resource {id}")))
    }

    /// Returns the current holder of a resource.
    pub fn holder(&self, id: ResourceId) -> LockResult<Option<TxnId>> {
        Ok(self.get(id)?.holder)
    }

    /// Grants the resource to `txn` iff it is free. Returns whether the
    /// grant happened.
    pub fn try_grant(&mut self, id: ResourceId, txn: TxnId) -> LockResult<bool> {
        let resource = self.get_mut(id)?;
        if resource.holder.is_some() {
            return Ok(false);
        }
        resource.holder = Some(txn);
        Ok(true)
    }

    /// Appends `txn` to the resource's FIFO wait queue.
    ///
    /// A transaction blocks on at most one resource at a time, and the
    /// manager rejects repeat requests before calling down, so a duplicate
    /// entry here is an internal fault.
    pub fn enqueue_waiter(&mut self, id: ResourceId, txn: TxnId) -> LockResult<()> {
        let resource = self.get_mut(id)?;
        if resource.holder == Some(txn) || resource.wait_queue.contains(&txn) {
            return Err(LockError::Internal(format!(
                "{txn} enqueued twice on {id}"
            )));
        }
        resource.wait_queue.push_back(txn);
        Ok(())
    }

    /// Clears the resource's holder and, if the queue is non-empty, pops the
    /// front waiter and installs it as the new holder.
    ///
    /// Returns the new holder so the caller can update that transaction's
    /// held set and lifecycle state.
    pub fn release_and_hand_off(&mut self, id: ResourceId) -> LockResult<Option<TxnId>> {
        let resource = self.get_mut(id)?;
        resource.holder = None;
        if let Some(next) = resource.wait_queue.pop_front() {
            resource.holder = Some(next);
            return Ok(Some(next));
        }
        Ok(None)
    }

    /// Physically removes `txn` from every wait queue it sits in.
    ///
    /// Used during victim cleanup: a victimized transaction must never later
    /// be granted a resource it was queued on.
    pub fn remove_from_queues(&mut self, txn: TxnId) {
        for resource in self.resources.values_mut() {
            resource.wait_queue.retain(|waiter| *waiter != txn);
        }
    }

    /// Returns true if `txn` is queued on the resource.
    pub fn is_queued(&self, id: ResourceId, txn: TxnId) -> LockResult<bool> {
        Ok(self.get(id)?.wait_queue.contains(&txn))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grant_and_release_round_trip() {
        let mut registry = ResourceRegistry::new(1);
        let r = ResourceId::new(0);
        let t1 = TxnId::new(1);

        assert!(registry.try_grant(r, t1).unwrap());
        assert_eq!(registry.holder(r).unwrap(), Some(t1));

        // Second grant fails while held
        assert!(!registry.try_grant(r, TxnId::new(2)).unwrap());

        assert_eq!(registry.release_and_hand_off(r).unwrap(), None);
        assert_eq!(registry.holder(r).unwrap(), None);
        assert!(registry.get(r).unwrap().waiters().is_empty());
    }

    #[test]
    fn test_fifo_hand_off_order() {
        let mut registry = ResourceRegistry::new(1);
        let r = ResourceId::new(0);
        let (t1, t2, t3) = (TxnId::new(1), TxnId::new(2), TxnId::new(3));

        registry.try_grant(r, t1).unwrap();
        registry.enqueue_waiter(r, t2).unwrap();
        registry.enqueue_waiter(r, t3).unwrap();

        assert_eq!(registry.release_and_hand_off(r).unwrap(), Some(t2));
        assert_eq!(registry.holder(r).unwrap(), Some(t2));
        assert_eq!(registry.release_and_hand_off(r).unwrap(), Some(t3));
        assert_eq!(registry.release_and_hand_off(r).unwrap(), None);
    }

    #[test]
    fn test_remove_from_queues() {
        let mut registry = ResourceRegistry::new(2);
        let (ra, rb) = (ResourceId::new(0), ResourceId::new(1));
        let (t1, t2, t3) = (TxnId::new(1), TxnId::new(2), TxnId::new(3));

        registry.try_grant(ra, t1).unwrap();
        registry.try_grant(rb, t1).unwrap();
        registry.enqueue_waiter(ra, t2).unwrap();
        registry.enqueue_waiter(ra, t3).unwrap();
        registry.enqueue_waiter(rb, t2).unwrap();

        registry.remove_from_queues(t2);
        assert!(!registry.is_queued(ra, t2).unwrap());
        assert!(!registry.is_queued(rb, t2).unwrap());

        // T3 is unaffected and next in line
        assert_eq!(registry.release_and_hand_off(ra).unwrap(), Some(t3));
    }

    #[test]
    fn test_duplicate_enqueue_is_internal_fault() {
        let mut registry = ResourceRegistry::new(1);
        let r = ResourceId::new(0);
        let (t1, t2) = (TxnId::new(1), TxnId::new(2));

        registry.try_grant(r, t1).unwrap();
        registry.enqueue_waiter(r, t2).unwrap();
        assert!(matches!(
            registry.enqueue_waiter(r, t2),
            Err(LockError::Internal(_))
        ));
        // The holder never queues on its own resource
        assert!(matches!(
            registry.enqueue_waiter(r, t1),
            Err(LockError::Internal(_))
        ));
    }

    #[test]
    fn test_unknown_resource_is_internal_fault() {
        let mut registry = ResourceRegistry::new(1);
        let missing = ResourceId::new(9);
        assert!(matches!(
            registry.try_grant(missing, TxnId::new(1)),
            Err(LockError::Internal(_))
        ));
        assert!(!registry.contains(missing));
    }
}
