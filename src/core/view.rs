use std::collections::{BTreeMap, BTreeSet};

use crate::error::{Error, Result};
use crate::pb::{self, MemberStatus};

use super::clock::VectorClock;
use super::member::{Member, MemberRegistry};
use super::reachability::Reachability;

/// A node's view of the cluster, the unit exchanged by gossip.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub(crate) struct MembershipView {
    registry: MemberRegistry,
    version: VectorClock,
    seen: BTreeSet<String>,
    reachability: Reachability,
    /// Incarnations of members that were pruned from the view.
    tombstones: BTreeMap<String, u64>,
}

impl MembershipView {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn member(&self, address: &str) -> Option<&Member> {
        self.registry.get(address)
    }

    pub(crate) fn members(&self) -> impl Iterator<Item = &Member> {
        self.registry.all()
    }

    pub(crate) fn registry_mut(&mut self) -> &mut MemberRegistry {
        &mut self.registry
    }

    pub(crate) fn version(&self) -> &VectorClock {
        &self.version
    }

    pub(crate) fn seen(&self) -> &BTreeSet<String> {
        &self.seen
    }

    pub(crate) fn add_seen(&mut self, address: impl Into<String>) {
        self.seen.insert(address.into());
    }

    pub(crate) fn extend_seen(&mut self, other: &BTreeSet<String>) {
        self.seen.extend(other.iter().cloned());
    }

    pub(crate) fn reachability(&self) -> &Reachability {
        &self.reachability
    }

    pub(crate) fn reachability_mut(&mut self) -> &mut Reachability {
        &mut self.reachability
    }

    pub(crate) fn tombstones(&self) -> &BTreeMap<String, u64> {
        &self.tombstones
    }

    /// Records a local modification made by `address`.
    pub(crate) fn touch(&mut self, address: &str) {
        self.version.tick(address);
        self.seen.clear();
        self.seen.insert(address.to_string());
    }

    pub(crate) fn is_tombstoned(&self, address: &str, incarnation: u64) -> bool {
        self.tombstones
            .get(address)
            .is_some_and(|tombstone| *tombstone >= incarnation)
    }

    /// Deletes `address` from the view, leaving a tombstone behind
    /// so that merges with older views cannot resurrect it.
    pub(crate) fn prune(&mut self, address: &str) -> Option<Member> {
        let member = self.registry.remove(address)?;
        let tombstone = self.tombstones.entry(address.to_string()).or_insert(0);
        *tombstone = (*tombstone).max(member.incarnation());
        Some(member)
    }

    /// Members that are still live and are considered unreachable
    /// by at least one live observer.
    pub(crate) fn unreachable_members(&self) -> BTreeSet<String> {
        let is_live = |address: &str| {
            self.registry
                .get(address)
                .is_some_and(|member| member.status().is_live())
        };

        self.reachability
            .unreachable(is_live)
            .into_iter()
            .filter(|subject| is_live(subject.as_str()))
            .collect()
    }

    /// All members in {Up, Leaving, Exiting} have seen this version and
    /// no live member is unreachable.
    pub(crate) fn is_converged(&self) -> bool {
        let all_seen = self
            .registry
            .all()
            .filter(|member| member.status().is_convergence_member())
            .all(|member| self.seen.contains(member.address()));

        all_seen && self.unreachable_members().is_empty()
    }

    /// The lowest reachable `Up` member, falling back to the lowest reachable
    /// live member while no member is `Up`.
    pub(crate) fn leader(&self) -> Option<&str> {
        let unreachable = self.unreachable_members();
        let candidates: Vec<&Member> = self
            .registry
            .all()
            .filter(|member| member.status().is_live() && !unreachable.contains(member.address()))
            .collect();

        candidates
            .iter()
            .copied()
            .find(|member| member.status() == MemberStatus::Up)
            .or(candidates.first().copied())
            .map(|member| member.address())
    }

    /// Merges two concurrent views.
    ///
    /// Members are resolved by [`Member::merge`], records covered by a tombstone
    /// are dropped. The seen set of the result is empty, the caller decides who saw it.
    pub(crate) fn merge(&self, other: &MembershipView, addr: &str) -> MembershipView {
        let mut tombstones = self.tombstones.clone();
        for (address, incarnation) in &other.tombstones {
            let entry = tombstones.entry(address.clone()).or_insert(0);
            *entry = (*entry).max(*incarnation);
        }

        let mut registry = self.registry.clone();
        for remote in other.registry.all() {
            let merged = match registry.get(remote.address()) {
                Some(local) => local.merge(remote),
                None => remote.clone(),
            };

            if let Err(e) = registry.upsert(merged.clone()) {
                tracing::warn!("[{}] {e}, keeping {merged}", addr);
                registry.overwrite(merged);
            }
        }

        let pruned: Vec<String> = registry
            .all()
            .filter(|member| {
                tombstones
                    .get(member.address())
                    .is_some_and(|tombstone| *tombstone >= member.incarnation())
            })
            .map(|member| member.address().to_string())
            .collect();
        for address in pruned {
            registry.remove(&address);
        }

        MembershipView {
            registry,
            version: self.version.merge(&other.version),
            seen: BTreeSet::new(),
            reachability: self.reachability.merge(&other.reachability),
            tombstones,
        }
    }
}

impl From<&MembershipView> for pb::GossipView {
    fn from(view: &MembershipView) -> Self {
        pb::GossipView {
            members: view.registry.all().map(pb::MemberState::from).collect(),
            version: view.version.versions().clone(),
            seen: view.seen.iter().cloned().collect(),
            reachability: view.reachability.to_records(),
            tombstones: view.tombstones.clone(),
        }
    }
}

impl TryFrom<pb::GossipView> for MembershipView {
    type Error = Error;

    fn try_from(value: pb::GossipView) -> Result<Self> {
        let mut registry = MemberRegistry::new();
        for state in value.members {
            registry.upsert(Member::try_from(state)?)?;
        }

        Ok(MembershipView {
            registry,
            version: VectorClock::from_versions(value.version),
            seen: value.seen.into_iter().collect(),
            reachability: Reachability::from_records(value.reachability),
            tombstones: value.tombstones,
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::core::clock::Causality;
    use crate::core::member::Member;
    use crate::pb::{self, MemberStatus};

    use super::MembershipView;

    fn view_with(members: &[(&str, u64, MemberStatus)]) -> MembershipView {
        let mut view = MembershipView::new();
        for (address, incarnation, status) in members {
            view.registry_mut()
                .upsert(Member::new(*address, *incarnation, *status))
                .unwrap();
        }
        view
    }

    #[test]
    fn test_view_leader_is_lowest_up_member() {
        let view = view_with(&[
            ("NODE_A", 1, MemberStatus::Joining),
            ("NODE_B", 1, MemberStatus::Up),
            ("NODE_C", 1, MemberStatus::Up),
        ]);

        assert_eq!(view.leader(), Some("NODE_B"));
    }

    #[test]
    fn test_view_leader_falls_back_without_up_members() {
        let view = view_with(&[
            ("NODE_B", 1, MemberStatus::Joining),
            ("NODE_C", 1, MemberStatus::Leaving),
        ]);

        assert_eq!(view.leader(), Some("NODE_B"));
    }

    #[test]
    fn test_view_leader_skips_unreachable_members() {
        let mut view = view_with(&[
            ("NODE_A", 1, MemberStatus::Up),
            ("NODE_B", 1, MemberStatus::Up),
        ]);
        view.reachability_mut().mark_unreachable("NODE_B", "NODE_A");

        assert_eq!(view.leader(), Some("NODE_B"));
    }

    #[test]
    fn test_view_convergence_requires_seen_by_up_members() {
        let mut view = view_with(&[
            ("NODE_A", 1, MemberStatus::Up),
            ("NODE_B", 1, MemberStatus::Leaving),
            ("NODE_C", 1, MemberStatus::Joining),
            ("NODE_D", 1, MemberStatus::Down),
        ]);
        view.touch("NODE_A");
        assert!(!view.is_converged());

        view.add_seen("NODE_B");
        assert!(view.is_converged());
    }

    #[test]
    fn test_view_convergence_blocked_by_unreachable_member() {
        let mut view = view_with(&[
            ("NODE_A", 1, MemberStatus::Up),
            ("NODE_C", 1, MemberStatus::Up),
        ]);
        view.touch("NODE_A");
        view.add_seen("NODE_C");
        view.reachability_mut().mark_unreachable("NODE_A", "NODE_C");
        assert!(!view.is_converged());

        view.registry_mut()
            .overwrite(Member::new("NODE_C", 1, MemberStatus::Down));
        assert!(view.is_converged());
    }

    #[test]
    fn test_view_merge_resolves_members_and_versions() {
        let mut a = view_with(&[
            ("NODE_A", 1, MemberStatus::Up),
            ("NODE_B", 1, MemberStatus::Leaving),
        ]);
        a.touch("NODE_A");

        let mut b = view_with(&[
            ("NODE_A", 1, MemberStatus::Up),
            ("NODE_B", 1, MemberStatus::Up),
            ("NODE_C", 1, MemberStatus::Joining),
        ]);
        b.touch("NODE_B");

        let merged = a.merge(&b, "NODE_A");
        assert_eq!(
            merged.member("NODE_B").unwrap().status(),
            MemberStatus::Leaving
        );
        assert!(merged.member("NODE_C").is_some());
        assert_eq!(merged.version().compare(a.version()), Causality::After);
        assert_eq!(merged.version().compare(b.version()), Causality::After);
        assert!(merged.seen().is_empty());
    }

    #[test]
    fn test_view_merge_resolves_conflicting_incarnations() {
        let mut a = view_with(&[
            ("NODE_A", 1, MemberStatus::Up),
            ("NODE_B", 2, MemberStatus::Joining),
        ]);
        a.touch("NODE_A");

        let mut b = view_with(&[
            ("NODE_A", 1, MemberStatus::Up),
            ("NODE_B", 1, MemberStatus::Down),
            ("NODE_C", 1, MemberStatus::Up),
        ]);
        b.touch("NODE_C");

        let local = a.member("NODE_B").unwrap();
        assert!(local.conflicts_with(b.member("NODE_B").unwrap()));

        let expected = Member::new("NODE_B", 1, MemberStatus::Down);
        for merged in [a.merge(&b, "NODE_A"), b.merge(&a, "NODE_C")] {
            assert_eq!(merged.member("NODE_B"), Some(&expected));
            assert_eq!(merged.members().count(), 3);
            assert_eq!(merged.version().compare(a.version()), Causality::After);
        }
    }

    #[test]
    fn test_view_merge_drops_tombstoned_members() {
        let mut a = view_with(&[("NODE_A", 1, MemberStatus::Up)]);
        a.registry_mut()
            .upsert(Member::new("NODE_B", 1, MemberStatus::Removed))
            .unwrap();
        a.prune("NODE_B");

        let b = view_with(&[
            ("NODE_A", 1, MemberStatus::Up),
            ("NODE_B", 1, MemberStatus::Exiting),
        ]);

        let merged = b.merge(&a, "NODE_B");
        assert!(merged.member("NODE_B").is_none());
        assert!(merged.is_tombstoned("NODE_B", 1));
        assert!(!merged.is_tombstoned("NODE_B", 2));
    }

    #[test]
    fn test_view_gossip_view_conversion() {
        let mut view = view_with(&[
            ("NODE_A", 1, MemberStatus::Up),
            ("NODE_B", 3, MemberStatus::Exiting),
        ]);
        view.touch("NODE_A");
        view.reachability_mut().mark_unreachable("NODE_A", "NODE_B");

        let message = pb::GossipView::from(&view);
        assert_eq!(message.members.len(), 2);
        assert_eq!(message.seen, vec!["NODE_A".to_string()]);

        let restored = MembershipView::try_from(message).unwrap();
        assert_eq!(restored, view);
    }
}
