//! Database availability.
//!
//! Anything that must keep the database from serving (recovery rewriting
//! the log, for one) takes an [`UnavailableGuard`]. The database is
//! available again once every guard is dropped.

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug, Default)]
struct Blockers {
    next_id: u64,
    reasons: BTreeMap<u64, String>,
}

/// Tracks reasons the database is unavailable.
#[derive(Debug, Default)]
pub struct AvailabilityGuard {
    blockers: Mutex<Blockers>,
}

impl AvailabilityGuard {
    /// Creates a guard with nothing blocking.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Whether nothing blocks availability.
    #[must_use]
    pub fn is_available(&self) -> bool {
        self.blockers.lock().reasons.is_empty()
    }

    /// Current reasons, oldest first.
    #[must_use]
    pub fn blockers(&self) -> Vec<String> {
        self.blockers.lock().reasons.values().cloned().collect()
    }

    /// Marks the database unavailable until the returned guard drops.
    #[must_use]
    pub fn unavailable(self: &Arc<Self>, reason: impl Into<String>) -> UnavailableGuard {
        let reason = reason.into();
        let mut blockers = self.blockers.lock();
        let id = blockers.next_id;
        blockers.next_id += 1;
        tracing::info!(%reason, "database unavailable");
        blockers.reasons.insert(id, reason);
        UnavailableGuard {
            guard: Arc::clone(self),
            id,
        }
    }
}

/// Holds the database unavailable while alive.
#[derive(Debug)]
#[must_use = "the database becomes available again when the guard drops"]
pub struct UnavailableGuard {
    guard: Arc<AvailabilityGuard>,
    id: u64,
}

impl Drop for UnavailableGuard {
    fn drop(&mut self) {
        let mut blockers = self.guard.blockers.lock();
        if let Some(reason) = blockers.reasons.remove(&self.id) {
            tracing::info!(%reason, "database available");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn available_after_all_guards_drop() {
        let availability = AvailabilityGuard::new();
        assert!(availability.is_available());

        let first = availability.unavailable("recovery");
        let second = availability.unavailable("maintenance");
        assert_eq!(availability.blockers(), vec!["recovery", "maintenance"]);

        drop(first);
        assert!(!availability.is_available());
        drop(second);
        assert!(availability.is_available());
    }
}
