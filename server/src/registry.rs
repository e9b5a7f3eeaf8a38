//! Membership registry — which user identities are present in which
//! neighborhoods, independent of transport details.
//!
//! Pure bookkeeping: no operation here can fail, and unknown keys are
//! never an error. The registry holds no locks of its own; the Hub owns
//! it behind a single mutex.

use std::collections::{BTreeSet, HashMap};

use crate::types::{NeighborhoodId, UserId};

#[derive(Debug, Default)]
pub struct MembershipRegistry {
    members: HashMap<NeighborhoodId, BTreeSet<UserId>>,
}

impl MembershipRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a user to a neighborhood's member set. Idempotent — a
    /// duplicate bind is a no-op. Returns the updated member set.
    pub fn bind(&mut self, user: UserId, neighborhood: NeighborhoodId) -> Vec<UserId> {
        let set = self.members.entry(neighborhood).or_default();
        set.insert(user);
        set.iter().cloned().collect()
    }

    /// Remove a user from a neighborhood's member set. An emptied set
    /// removes the neighborhood entry entirely; an absent user or
    /// neighborhood is a no-op.
    pub fn unbind(&mut self, user: &UserId, neighborhood: &NeighborhoodId) {
        if let Some(set) = self.members.get_mut(neighborhood) {
            set.remove(user);
            if set.is_empty() {
                self.members.remove(neighborhood);
            }
        }
    }

    /// Snapshot of the current member set; empty for unknown
    /// neighborhoods.
    pub fn members_of(&self, neighborhood: &NeighborhoodId) -> Vec<UserId> {
        self.members
            .get(neighborhood)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of neighborhoods with at least one member.
    pub fn neighborhood_count(&self) -> usize {
        self.members.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uid(s: &str) -> UserId {
        UserId::from(s)
    }

    fn nid(s: &str) -> NeighborhoodId {
        NeighborhoodId::from(s)
    }

    #[test]
    fn bind_is_idempotent() {
        let mut reg = MembershipRegistry::new();
        let once = reg.bind(uid("42"), nid("7"));
        let twice = reg.bind(uid("42"), nid("7"));
        assert_eq!(once, twice);
        assert_eq!(reg.members_of(&nid("7")), vec![uid("42")]);
    }

    #[test]
    fn unbind_removes_and_clears_empty_entry() {
        let mut reg = MembershipRegistry::new();
        reg.bind(uid("42"), nid("7"));
        reg.bind(uid("43"), nid("7"));
        reg.unbind(&uid("42"), &nid("7"));
        assert_eq!(reg.members_of(&nid("7")), vec![uid("43")]);

        reg.unbind(&uid("43"), &nid("7"));
        assert!(reg.members_of(&nid("7")).is_empty());
        // Emptied neighborhoods do not linger.
        assert_eq!(reg.neighborhood_count(), 0);
    }

    #[test]
    fn unbind_unknown_is_noop() {
        let mut reg = MembershipRegistry::new();
        reg.unbind(&uid("42"), &nid("7"));
        reg.bind(uid("1"), nid("9"));
        reg.unbind(&uid("2"), &nid("9"));
        assert_eq!(reg.members_of(&nid("9")), vec![uid("1")]);
    }

    #[test]
    fn members_of_unknown_is_empty() {
        let reg = MembershipRegistry::new();
        assert!(reg.members_of(&nid("no-such")).is_empty());
    }

    #[test]
    fn last_operation_wins() {
        // After any sequence, a user whose last op was unbind is absent.
        let mut reg = MembershipRegistry::new();
        reg.bind(uid("42"), nid("7"));
        reg.unbind(&uid("42"), &nid("7"));
        reg.bind(uid("42"), nid("7"));
        reg.unbind(&uid("42"), &nid("7"));
        assert!(reg.members_of(&nid("7")).is_empty());
    }
}
