use std::collections::BTreeSet;

use crate::pb::MemberStatus;

use super::clock::Causality;
use super::event::CurrentClusterState;
use super::member::Member;
use super::view::MembershipView;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum JoinOutcome {
    Admitted,
    AlreadyMember,
    Rejected,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum MergeOutcome {
    /// The view was not meant for this node.
    Ignored,
    Same,
    /// The remote view was newer and replaced the local one.
    Adopted,
    /// The local view was newer.
    Kept,
    Merged,
}

/// The single writer of a node's [`MembershipView`].
///
/// Requests that do not apply to the current status of a member are ignored
/// and reported by returning `false`.
#[derive(Clone, Debug)]
pub(crate) struct MembershipState {
    addr: String,
    incarnation: u64,
    view: MembershipView,
}

impl MembershipState {
    pub(crate) fn new(addr: impl Into<String>, incarnation: u64) -> Self {
        Self {
            addr: addr.into(),
            incarnation,
            view: MembershipView::new(),
        }
    }

    pub(crate) fn addr(&self) -> &str {
        &self.addr
    }

    pub(crate) fn incarnation(&self) -> u64 {
        self.incarnation
    }

    pub(crate) fn view(&self) -> &MembershipView {
        &self.view
    }

    pub(crate) fn snapshot(&self) -> CurrentClusterState {
        CurrentClusterState::from(&self.view)
    }

    pub(crate) fn self_member(&self) -> Option<&Member> {
        self.view
            .member(&self.addr)
            .filter(|member| member.incarnation() == self.incarnation)
    }

    /// Whether this node is a live member of a cluster.
    pub(crate) fn is_member(&self) -> bool {
        self.self_member()
            .is_some_and(|member| member.status().is_live())
    }

    /// Whether this node has been downed or removed from its cluster.
    pub(crate) fn is_terminated(&self) -> bool {
        match self.self_member() {
            Some(member) => !member.status().is_live(),
            None => self.view.is_tombstoned(&self.addr, self.incarnation),
        }
    }

    /// Forms a new cluster containing only this node.
    pub(crate) fn join_self(&mut self) -> bool {
        if self.view.member(&self.addr).is_some() || self.is_terminated() {
            return false;
        }

        tracing::info!("[{}] forming a new cluster", &self.addr);
        let member = Member::new(&self.addr, self.incarnation, MemberStatus::Joining);
        self.view.registry_mut().overwrite(member);
        self.touch();
        true
    }

    pub(crate) fn request_join(&mut self, address: &str, incarnation: u64) -> JoinOutcome {
        if !self.is_member() {
            tracing::debug!("[{}] not a member, ignoring join of {}", &self.addr, address);
            return JoinOutcome::Rejected;
        }

        if self.view.is_tombstoned(address, incarnation) {
            tracing::debug!("[{}] {}#{} was removed, ignoring join", &self.addr, address, incarnation);
            return JoinOutcome::Rejected;
        }

        match self.view.member(address).cloned() {
            None => {
                let member = Member::new(address, incarnation, MemberStatus::Joining);
                tracing::info!("[{}] admitting {}", &self.addr, &member);
                self.view.registry_mut().overwrite(member);
                self.touch();
                JoinOutcome::Admitted
            }
            Some(existing) if existing.incarnation() == incarnation => JoinOutcome::AlreadyMember,
            Some(existing) if existing.incarnation() < incarnation => {
                tracing::info!(
                    "[{}] {} restarted as #{}, downing the previous incarnation",
                    &self.addr,
                    &existing,
                    incarnation
                );
                self.request_down(address);
                JoinOutcome::Rejected
            }
            Some(_) => JoinOutcome::Rejected,
        }
    }

    /// Moves a `Joining` or `Up` member to `Leaving`.
    pub(crate) fn request_leave(&mut self, address: &str) -> bool {
        match self.view.member(address) {
            Some(member) if member.status() <= MemberStatus::Up => {
                let member = member.with_status(MemberStatus::Leaving);
                tracing::info!("[{}] {} is leaving", &self.addr, &member);
                self.view.registry_mut().overwrite(member);
                self.touch();
                true
            }
            _ => {
                tracing::debug!("[{}] ignoring leave of {}", &self.addr, address);
                false
            }
        }
    }

    /// Moves a live member to `Down`.
    pub(crate) fn request_down(&mut self, address: &str) -> bool {
        match self.view.member(address) {
            Some(member) if member.status().is_live() => {
                let member = member.with_status(MemberStatus::Down);
                tracing::info!("[{}] downing {}", &self.addr, &member);
                self.view.registry_mut().overwrite(member);
                self.touch();
                true
            }
            _ => {
                tracing::debug!("[{}] ignoring down of {}", &self.addr, address);
                false
            }
        }
    }

    pub(crate) fn mark_unreachable(&mut self, address: &str) -> bool {
        let is_live = self
            .view
            .member(address)
            .is_some_and(|member| member.status().is_live());

        if !is_live || !self.view.reachability_mut().mark_unreachable(&self.addr, address) {
            return false;
        }

        tracing::info!("[{}] marking {} as unreachable", &self.addr, address);
        self.touch();
        true
    }

    pub(crate) fn mark_reachable(&mut self, address: &str) -> bool {
        if !self.view.reachability_mut().mark_reachable(&self.addr, address) {
            return false;
        }

        tracing::info!("[{}] {} is reachable again", &self.addr, address);
        self.touch();
        true
    }

    pub(crate) fn is_unreachable(&self, address: &str) -> bool {
        self.view
            .reachability()
            .is_unreachable_by(&self.addr, address)
    }

    /// Merges a view received from another node.
    pub(crate) fn apply_remote_update(&mut self, remote: MembershipView) -> MergeOutcome {
        let knows_self = remote
            .member(&self.addr)
            .is_some_and(|member| member.incarnation() == self.incarnation)
            || remote.is_tombstoned(&self.addr, self.incarnation);

        if !self.is_member() && !knows_self {
            return MergeOutcome::Ignored;
        }

        let outcome = match self.view.version().compare(remote.version()) {
            Causality::Same => {
                self.view.extend_seen(remote.seen());
                MergeOutcome::Same
            }
            Causality::Before => {
                self.view = remote;
                MergeOutcome::Adopted
            }
            Causality::After => MergeOutcome::Kept,
            Causality::Concurrent => {
                self.view = self.view.merge(&remote, &self.addr);
                MergeOutcome::Merged
            }
        };
        self.view.add_seen(self.addr.clone());

        if matches!(outcome, MergeOutcome::Adopted | MergeOutcome::Merged) {
            self.forget_absent();
        }

        outcome
    }

    /// Performs the transitions reserved to the leader.
    ///
    /// Only acts on a converged view: prunes `Removed` members, moves
    /// `Joining -> Up`, `Leaving -> Exiting`, `Exiting -> Removed` and
    /// `Down -> Removed`. Returns the members that were removed.
    pub(crate) fn leader_actions(&mut self) -> Vec<Member> {
        if self.view.leader() != Some(self.addr.as_str()) || !self.view.is_converged() {
            return vec![];
        }

        let members: Vec<Member> = self.view.members().cloned().collect();
        let mut changed = false;
        let mut removed = Vec::new();

        for member in members {
            let next = match member.status() {
                MemberStatus::Removed => {
                    tracing::debug!("[{}] pruning {}", &self.addr, &member);
                    self.view.prune(member.address());
                    changed = true;
                    continue;
                }
                MemberStatus::Joining => MemberStatus::Up,
                MemberStatus::Leaving => MemberStatus::Exiting,
                MemberStatus::Exiting | MemberStatus::Down => MemberStatus::Removed,
                MemberStatus::Up => continue,
            };

            let member = member.with_status(next);
            tracing::info!("[{}] leader moved {}", &self.addr, &member);
            if next == MemberStatus::Removed {
                removed.push(member.clone());
            }
            self.view.registry_mut().overwrite(member);
            changed = true;
        }

        if changed {
            self.touch();
            self.forget_absent();
        }

        removed
    }

    fn touch(&mut self) {
        self.view.touch(&self.addr);
    }

    /// Drops own reachability observations about members that are gone.
    fn forget_absent(&mut self) {
        let live: BTreeSet<String> = self
            .view
            .members()
            .filter(|member| member.status().is_live())
            .map(|member| member.address().to_string())
            .collect();

        if self
            .view
            .reachability_mut()
            .retain_subjects(&self.addr, |subject| live.contains(subject))
        {
            self.touch();
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::core::event::{diff, EventKind, EventType};
    use crate::core::member::Member;
    use crate::pb::MemberStatus;

    use super::{JoinOutcome, MembershipState, MergeOutcome};

    /// One gossip exchange: `from` sends its view, `to` merges and replies.
    fn exchange(from: &mut MembershipState, to: &mut MembershipState) {
        to.apply_remote_update(from.view().clone());
        from.apply_remote_update(to.view().clone());
    }

    fn status(state: &MembershipState, address: &str) -> Option<MemberStatus> {
        state.view().member(address).map(|member| member.status())
    }

    fn round(nodes: &mut [MembershipState]) {
        for i in 0..nodes.len() {
            for j in 0..nodes.len() {
                if i != j {
                    let (a, b) = if i < j {
                        let (left, right) = nodes.split_at_mut(j);
                        (&mut left[i], &mut right[0])
                    } else {
                        let (left, right) = nodes.split_at_mut(i);
                        (&mut right[0], &mut left[j])
                    };
                    exchange(a, b);
                }
            }
        }
        for node in nodes.iter_mut() {
            node.leader_actions();
        }
    }

    fn form_cluster(addresses: &[&str]) -> Vec<MembershipState> {
        let mut nodes: Vec<MembershipState> = addresses
            .iter()
            .map(|address| MembershipState::new(*address, 1))
            .collect();

        nodes[0].join_self();
        nodes[0].leader_actions();
        for i in 1..nodes.len() {
            let address = nodes[i].addr().to_string();
            assert_eq!(nodes[0].request_join(&address, 1), JoinOutcome::Admitted);
            let welcome = nodes[0].view().clone();
            assert_eq!(nodes[i].apply_remote_update(welcome), MergeOutcome::Adopted);
        }

        for _ in 0..5 {
            round(&mut nodes);
        }
        nodes
    }

    #[test]
    fn test_state_join_self_becomes_up() {
        let mut state = MembershipState::new("NODE_A", 1);
        assert!(state.join_self());
        assert!(!state.join_self());
        assert_eq!(status(&state, "NODE_A"), Some(MemberStatus::Joining));

        state.leader_actions();
        assert_eq!(status(&state, "NODE_A"), Some(MemberStatus::Up));
        assert!(state.is_member());
    }

    #[test]
    fn test_state_two_nodes_converge_up() {
        let nodes = form_cluster(&["NODE_A", "NODE_B"]);

        for node in &nodes {
            assert_eq!(status(node, "NODE_A"), Some(MemberStatus::Up));
            assert_eq!(status(node, "NODE_B"), Some(MemberStatus::Up));
            assert!(node.view().is_converged());
        }
        assert_eq!(nodes[0].view(), nodes[1].view());
    }

    #[test]
    fn test_state_join_rejected_when_not_member() {
        let mut state = MembershipState::new("NODE_A", 1);
        assert_eq!(state.request_join("NODE_B", 1), JoinOutcome::Rejected);
    }

    #[test]
    fn test_state_duplicate_join_is_idempotent() {
        let mut state = MembershipState::new("NODE_A", 1);
        state.join_self();
        assert_eq!(state.request_join("NODE_B", 1), JoinOutcome::Admitted);
        let version = state.view().version().clone();

        assert_eq!(state.request_join("NODE_B", 1), JoinOutcome::AlreadyMember);
        assert_eq!(state.view().version(), &version);
    }

    #[test]
    fn test_state_restarted_node_downs_previous_incarnation() {
        let mut state = MembershipState::new("NODE_A", 1);
        state.join_self();
        state.request_join("NODE_B", 1);

        assert_eq!(state.request_join("NODE_B", 2), JoinOutcome::Rejected);
        assert_eq!(status(&state, "NODE_B"), Some(MemberStatus::Down));

        state.leader_actions();
        state.leader_actions();
        assert!(state.view().member("NODE_B").is_none());
        assert_eq!(state.request_join("NODE_B", 2), JoinOutcome::Admitted);
        assert_eq!(state.request_join("NODE_B", 1), JoinOutcome::Rejected);
    }

    #[test]
    fn test_state_ignores_gossip_for_other_clusters_before_joining() {
        let mut other = MembershipState::new("NODE_X", 1);
        other.join_self();

        let mut state = MembershipState::new("NODE_A", 1);
        assert_eq!(
            state.apply_remote_update(other.view().clone()),
            MergeOutcome::Ignored
        );
        assert!(state.view().members().next().is_none());
    }

    #[test]
    fn test_state_leave_is_idempotent() {
        let mut nodes = form_cluster(&["NODE_A", "NODE_B"]);

        assert!(nodes[0].request_leave("NODE_B"));
        let version = nodes[0].view().version().clone();
        assert!(!nodes[0].request_leave("NODE_B"));
        assert_eq!(nodes[0].view().version(), &version);

        assert!(!nodes[0].request_leave("NODE_UNKNOWN"));
    }

    #[test]
    fn test_state_leave_produces_ordered_events() {
        let mut nodes = form_cluster(&["NODE_A", "NODE_B"]);
        let mut events = Vec::new();

        let before = nodes[0].view().clone();
        nodes[0].request_leave("NODE_B");
        events.extend(diff(&before, nodes[0].view()));

        for _ in 0..10 {
            let before = nodes[0].view().clone();
            round(&mut nodes);
            events.extend(diff(&before, nodes[0].view()));
        }

        let kinds: Vec<_> = events
            .into_iter()
            .filter(|e| e.member().is_some_and(|m| m.address() == "NODE_B"))
            .map(|e| e.event_type())
            .collect();

        assert_eq!(
            kinds,
            vec![
                EventType::MemberLeft,
                EventType::MemberExited,
                EventType::MemberRemoved
            ]
        );
        assert!(nodes[0].view().member("NODE_B").is_none());
        assert!(nodes[1].is_terminated());
        assert!(!nodes[0].request_leave("NODE_B"));
    }

    #[test]
    fn test_state_statuses_never_regress() {
        let mut nodes = form_cluster(&["NODE_A", "NODE_B", "NODE_C"]);
        let stale = nodes[2].view().clone();

        nodes[0].request_leave("NODE_B");
        nodes[2].request_down("NODE_B");

        let before = nodes[0].view().clone();
        assert_eq!(nodes[0].apply_remote_update(stale), MergeOutcome::Kept);
        assert_eq!(nodes[0].view(), &before);

        let concurrent = nodes[2].view().clone();
        assert_eq!(
            nodes[0].apply_remote_update(concurrent),
            MergeOutcome::Merged
        );
        assert_eq!(status(&nodes[0], "NODE_B"), Some(MemberStatus::Down));
    }

    #[test]
    fn test_state_views_converge_without_changes() {
        let mut nodes = form_cluster(&["NODE_A", "NODE_B", "NODE_C", "NODE_D"]);
        for _ in 0..3 {
            round(&mut nodes);
        }

        let expected: Vec<Member> = nodes[0].view().members().cloned().collect();
        assert_eq!(expected.len(), 4);
        for node in &nodes {
            let members: Vec<Member> = node.view().members().cloned().collect();
            assert_eq!(members, expected);
            assert!(members.iter().all(|m| m.status() == MemberStatus::Up));
        }
    }

    #[test]
    fn test_state_unreachable_member_stalls_removal_until_downed() {
        let mut nodes = form_cluster(&["NODE_A", "NODE_B", "NODE_C"]);

        nodes[0].request_leave("NODE_B");
        while status(&nodes[0], "NODE_B") != Some(MemberStatus::Exiting) {
            round(&mut nodes);
        }

        assert!(nodes[0].mark_unreachable("NODE_C"));
        let (a, rest) = nodes.split_at_mut(1);
        for _ in 0..10 {
            exchange(&mut a[0], &mut rest[0]);
            a[0].leader_actions();
            rest[0].leader_actions();
        }
        assert_eq!(status(&a[0], "NODE_B"), Some(MemberStatus::Exiting));
        assert!(!a[0].view().is_converged());

        assert!(a[0].request_down("NODE_C"));
        for _ in 0..10 {
            exchange(&mut a[0], &mut rest[0]);
            a[0].leader_actions();
            rest[0].leader_actions();
        }
        assert!(a[0].view().member("NODE_B").is_none());
        assert!(a[0].view().member("NODE_C").is_none());
        assert_eq!(a[0].snapshot().len(), 1);
    }

    #[test]
    fn test_state_reachability_restored_unblocks_convergence() {
        let mut nodes = form_cluster(&["NODE_A", "NODE_B", "NODE_C"]);

        nodes[0].request_leave("NODE_B");
        assert!(nodes[0].mark_unreachable("NODE_C"));
        for _ in 0..5 {
            round(&mut nodes);
        }
        assert_eq!(status(&nodes[0], "NODE_B"), Some(MemberStatus::Leaving));

        assert!(nodes[0].mark_reachable("NODE_C"));
        assert!(!nodes[0].is_unreachable("NODE_C"));
        for _ in 0..10 {
            round(&mut nodes);
        }
        assert!(nodes[0].view().member("NODE_B").is_none());
        assert_eq!(status(&nodes[0], "NODE_C"), Some(MemberStatus::Up));
    }

    #[test]
    fn test_state_mark_unreachable_ignores_self_and_unknown() {
        let mut nodes = form_cluster(&["NODE_A", "NODE_B"]);

        assert!(!nodes[0].mark_unreachable("NODE_A"));
        assert!(!nodes[0].mark_unreachable("NODE_UNKNOWN"));
        assert!(nodes[0].mark_unreachable("NODE_B"));
        assert!(!nodes[0].mark_unreachable("NODE_B"));
        assert!(matches!(
            diff(&nodes[1].view().clone(), nodes[0].view()).first(),
            Some(EventKind::UnreachableMember(_))
        ));
    }
}
