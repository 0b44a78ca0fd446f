//! Entity lock table used to order parallel recovery.
//!
//! Recovery does not need a full lock manager: transactions acquire their
//! entity locks one after another in log order, so the only requirement is
//! that a transaction touching an entity waits for the previous holder.

use parking_lot::{Condvar, Mutex};
use std::collections::HashSet;
use std::sync::Arc;

/// Exclusive locks keyed by entity id.
#[derive(Debug, Default)]
pub struct EntityLocks {
    held: Mutex<HashSet<u64>>,
    released: Condvar,
}

impl EntityLocks {
    /// Creates an empty lock table.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Whether `entity` is currently locked.
    #[must_use]
    pub fn is_locked(&self, entity: u64) -> bool {
        self.held.lock().contains(&entity)
    }

    /// Number of entities currently locked.
    #[must_use]
    pub fn locked_count(&self) -> usize {
        self.held.lock().len()
    }

    fn acquire(&self, entity: u64) {
        let mut held = self.held.lock();
        while held.contains(&entity) {
            self.released.wait(&mut held);
        }
        held.insert(entity);
    }

    fn release(&self, entities: &[u64]) {
        if entities.is_empty() {
            return;
        }
        let mut held = self.held.lock();
        for entity in entities {
            held.remove(entity);
        }
        drop(held);
        self.released.notify_all();
    }
}

/// The locks held by one transaction; released on drop.
#[derive(Debug)]
pub struct LockGroup {
    locks: Arc<EntityLocks>,
    held: Vec<u64>,
}

impl LockGroup {
    /// Creates an empty group over `locks`.
    #[must_use]
    pub fn new(locks: Arc<EntityLocks>) -> Self {
        Self {
            locks,
            held: Vec::new(),
        }
    }

    /// Locks `entity`, blocking while another group holds it.
    ///
    /// Locking an entity this group already holds is a no-op.
    pub fn acquire(&mut self, entity: u64) {
        if self.held.contains(&entity) {
            return;
        }
        self.locks.acquire(entity);
        self.held.push(entity);
    }

    /// Entities held, in acquisition order.
    #[must_use]
    pub fn held(&self) -> &[u64] {
        &self.held
    }

    /// Releases everything held.
    pub fn release_all(&mut self) {
        self.locks.release(&self.held);
        self.held.clear();
    }
}

impl Drop for LockGroup {
    fn drop(&mut self) {
        self.release_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn group_releases_on_drop() {
        let locks = EntityLocks::new();
        {
            let mut group = LockGroup::new(Arc::clone(&locks));
            group.acquire(1);
            group.acquire(2);
            group.acquire(1);
            assert_eq!(group.held(), &[1, 2]);
            assert!(locks.is_locked(1));
        }
        assert_eq!(locks.locked_count(), 0);
    }

    #[test]
    fn second_holder_waits_for_release() {
        let locks = EntityLocks::new();
        let mut first = LockGroup::new(Arc::clone(&locks));
        first.acquire(7);

        let (tx, rx) = mpsc::channel();
        let waiter = {
            let locks = Arc::clone(&locks);
            thread::spawn(move || {
                let mut second = LockGroup::new(locks);
                second.acquire(7);
                tx.send(()).unwrap();
            })
        };

        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
        drop(first);
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        waiter.join().unwrap();
    }
}
