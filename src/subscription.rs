//! Removal triggers owned by the bucket.
//!
//! Every member gets a one-shot subscription on its held-by-user signal. The
//! registry lives inside the engine and is keyed by sphere id, so nothing is ever
//! attached to the sphere itself. Firing consumes the subscription; detaching an
//! already detached member does nothing.

use std::collections::HashMap;

use crate::model::SphereId;

/// Opaque token identifying one installed trigger.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionToken(u64);

/// Engine-owned map from member id to its removal trigger.
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    next_token: u64,
    active: HashMap<SphereId, SubscriptionToken>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs a trigger for `id`, replacing any stale one.
    pub fn subscribe(&mut self, id: SphereId) -> SubscriptionToken {
        let token = SubscriptionToken(self.next_token);
        self.next_token += 1;
        self.active.insert(id, token);
        token
    }

    /// Consumes the trigger for `id`.
    ///
    /// Returns the token if one was attached, i.e. whether the caller has to run
    /// the removal path.
    pub fn fire(&mut self, id: SphereId) -> Option<SubscriptionToken> {
        self.active.remove(&id)
    }

    /// Detaches the trigger for `id`. No-op when none is attached.
    pub fn detach(&mut self, id: SphereId) {
        self.active.remove(&id);
    }

    /// Detaches every trigger and reports how many were attached.
    pub fn detach_all(&mut self) -> usize {
        let count = self.active.len();
        self.active.clear();
        count
    }

    pub fn is_attached(&self, id: SphereId) -> bool {
        self.active.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fire_is_one_shot() {
        let mut registry = SubscriptionRegistry::new();
        let token = registry.subscribe(SphereId(1));

        assert_eq!(registry.fire(SphereId(1)), Some(token));
        assert_eq!(registry.fire(SphereId(1)), None);
        assert!(!registry.is_attached(SphereId(1)));
    }

    #[test]
    fn detach_is_idempotent() {
        let mut registry = SubscriptionRegistry::new();
        registry.subscribe(SphereId(3));

        registry.detach(SphereId(3));
        registry.detach(SphereId(3));
        registry.detach(SphereId(99));
        assert!(registry.is_empty());
    }

    #[test]
    fn resubscribing_issues_a_fresh_token() {
        let mut registry = SubscriptionRegistry::new();
        let first = registry.subscribe(SphereId(5));
        registry.detach(SphereId(5));
        let second = registry.subscribe(SphereId(5));

        assert_ne!(first, second);
        assert_eq!(registry.fire(SphereId(5)), Some(second));
    }

    #[test]
    fn detach_all_reports_count() {
        let mut registry = SubscriptionRegistry::new();
        registry.subscribe(SphereId(1));
        registry.subscribe(SphereId(2));

        assert_eq!(registry.detach_all(), 2);
        assert_eq!(registry.len(), 0);
        assert_eq!(registry.detach_all(), 0);
    }
}
