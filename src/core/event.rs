//! # Membership Events
//!
//! Events are never created by hand inside the crate. They are derived by
//! comparing the view before and after every change, see [`diff`].
use std::collections::BTreeSet;

use crate::pb::MemberStatus;

use super::member::Member;
use super::view::MembershipView;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MemberRemoved {
    pub member: Member,
    pub previous_status: MemberStatus,
}

/// What happened to the cluster.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EventKind {
    MemberJoined(Member),
    MemberUp(Member),
    MemberLeft(Member),
    MemberExited(Member),
    MemberDowned(Member),
    MemberRemoved(MemberRemoved),
    UnreachableMember(Member),
    ReachableMember(Member),
    LeaderChanged(Option<String>),
}

impl EventKind {
    pub fn event_type(&self) -> EventType {
        match self {
            EventKind::MemberJoined(_) => EventType::MemberJoined,
            EventKind::MemberUp(_) => EventType::MemberUp,
            EventKind::MemberLeft(_) => EventType::MemberLeft,
            EventKind::MemberExited(_) => EventType::MemberExited,
            EventKind::MemberDowned(_) => EventType::MemberDowned,
            EventKind::MemberRemoved(_) => EventType::MemberRemoved,
            EventKind::UnreachableMember(_) => EventType::UnreachableMember,
            EventKind::ReachableMember(_) => EventType::ReachableMember,
            EventKind::LeaderChanged(_) => EventType::LeaderChanged,
        }
    }

    /// The member the event is about, if any.
    pub fn member(&self) -> Option<&Member> {
        match self {
            EventKind::MemberJoined(m)
            | EventKind::MemberUp(m)
            | EventKind::MemberLeft(m)
            | EventKind::MemberExited(m)
            | EventKind::MemberDowned(m)
            | EventKind::UnreachableMember(m)
            | EventKind::ReachableMember(m) => Some(m),
            EventKind::MemberRemoved(e) => Some(&e.member),
            EventKind::LeaderChanged(_) => None,
        }
    }
}

/// An immutable record of a change, as delivered to subscribers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Event {
    seq: u64,
    timestamp_ms: u64,
    kind: EventKind,
}

impl Event {
    pub(crate) fn new(seq: u64, timestamp_ms: u64, kind: EventKind) -> Self {
        Self {
            seq,
            timestamp_ms,
            kind,
        }
    }

    /// Ordering token, strictly increasing per publishing node.
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Milliseconds since the unix epoch at publication.
    pub fn timestamp_ms(&self) -> u64 {
        self.timestamp_ms
    }

    pub fn kind(&self) -> &EventKind {
        &self.kind
    }

    pub fn into_kind(self) -> EventKind {
        self.kind
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventType {
    MemberJoined,
    MemberUp,
    MemberLeft,
    MemberExited,
    MemberDowned,
    MemberRemoved,
    UnreachableMember,
    ReachableMember,
    LeaderChanged,
}

impl EventType {
    pub fn is_member_event(&self) -> bool {
        matches!(
            self,
            EventType::MemberJoined
                | EventType::MemberUp
                | EventType::MemberLeft
                | EventType::MemberExited
                | EventType::MemberDowned
                | EventType::MemberRemoved
        )
    }

    pub fn is_reachability_event(&self) -> bool {
        matches!(
            self,
            EventType::UnreachableMember | EventType::ReachableMember
        )
    }
}

/// Selects which events a subscription receives.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum EventFilter {
    #[default]
    All,
    MemberEvents,
    ReachabilityEvents,
    LeaderEvents,
    Only(BTreeSet<EventType>),
}

impl EventFilter {
    pub fn only<I>(types: I) -> Self
    where
        I: IntoIterator<Item = EventType>,
    {
        EventFilter::Only(types.into_iter().collect())
    }

    pub fn matches(&self, kind: &EventKind) -> bool {
        let event_type = kind.event_type();

        match self {
            EventFilter::All => true,
            EventFilter::MemberEvents => event_type.is_member_event(),
            EventFilter::ReachabilityEvents => event_type.is_reachability_event(),
            EventFilter::LeaderEvents => event_type == EventType::LeaderChanged,
            EventFilter::Only(types) => types.contains(&event_type),
        }
    }
}

/// Read-only snapshot of a node's view.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CurrentClusterState {
    members: Vec<Member>,
    unreachable: BTreeSet<String>,
    seen_by: BTreeSet<String>,
    leader: Option<String>,
    converged: bool,
}

impl CurrentClusterState {
    /// Members ordered by address.
    pub fn members(&self) -> &[Member] {
        &self.members
    }

    pub fn member(&self, address: impl AsRef<str>) -> Option<&Member> {
        self.members
            .iter()
            .find(|member| member.address() == address.as_ref())
    }

    pub fn unreachable(&self) -> &BTreeSet<String> {
        &self.unreachable
    }

    pub fn seen_by(&self) -> &BTreeSet<String> {
        &self.seen_by
    }

    pub fn leader(&self) -> Option<&str> {
        self.leader.as_deref()
    }

    pub fn is_converged(&self) -> bool {
        self.converged
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

impl From<&MembershipView> for CurrentClusterState {
    fn from(view: &MembershipView) -> Self {
        Self {
            members: view.members().cloned().collect(),
            unreachable: view.unreachable_members(),
            seen_by: view.seen().clone(),
            leader: view.leader().map(str::to_string),
            converged: view.is_converged(),
        }
    }
}

fn status_event(member: Member) -> Option<EventKind> {
    match member.status() {
        MemberStatus::Joining => Some(EventKind::MemberJoined(member)),
        MemberStatus::Up => Some(EventKind::MemberUp(member)),
        MemberStatus::Leaving => Some(EventKind::MemberLeft(member)),
        MemberStatus::Exiting => Some(EventKind::MemberExited(member)),
        MemberStatus::Down => Some(EventKind::MemberDowned(member)),
        MemberStatus::Removed => None,
    }
}

/// Events for a member moving from `from` to the status of `member`.
///
/// Missed steps of a graceful leave are filled in, so `Up -> Exiting`
/// yields `MemberLeft` followed by `MemberExited`.
fn transition_events(from: MemberStatus, member: &Member) -> Vec<EventKind> {
    let to = member.status();
    if from >= to {
        return vec![];
    }

    match to {
        MemberStatus::Removed => vec![EventKind::MemberRemoved(MemberRemoved {
            member: member.clone(),
            previous_status: from,
        })],
        MemberStatus::Leaving | MemberStatus::Exiting => [MemberStatus::Leaving, MemberStatus::Exiting]
            .into_iter()
            .filter(|status| *status > from && *status <= to)
            .filter_map(|status| status_event(member.with_status(status)))
            .collect(),
        _ => status_event(member.clone()).into_iter().collect(),
    }
}

/// Computes the events that lead from `old` to `new`.
pub(crate) fn diff(old: &MembershipView, new: &MembershipView) -> Vec<EventKind> {
    let mut events = Vec::new();

    let addresses: BTreeSet<&str> = old
        .members()
        .chain(new.members())
        .map(|member| member.address())
        .collect();

    for address in addresses {
        match (old.member(address), new.member(address)) {
            (None, Some(member)) => events.extend(status_event(member.clone())),
            // a restarted node: the old incarnation is gone, the new one is a fresh member
            (Some(before), Some(after)) if before.incarnation() != after.incarnation() => {
                events.extend(transition_events(
                    before.status(),
                    &before.with_status(MemberStatus::Removed),
                ));
                events.extend(status_event(after.clone()));
            }
            (Some(before), Some(after)) => {
                events.extend(transition_events(before.status(), after))
            }
            (Some(before), None) => events.extend(transition_events(
                before.status(),
                &before.with_status(MemberStatus::Removed),
            )),
            (None, None) => {}
        }
    }

    let old_unreachable = old.unreachable_members();
    let new_unreachable = new.unreachable_members();

    for address in new_unreachable.difference(&old_unreachable) {
        if let Some(member) = new.member(address) {
            events.push(EventKind::UnreachableMember(member.clone()));
        }
    }
    for address in old_unreachable.difference(&new_unreachable) {
        if let Some(member) = new.member(address).filter(|m| m.status().is_live()) {
            events.push(EventKind::ReachableMember(member.clone()));
        }
    }

    if old.leader() != new.leader() {
        events.push(EventKind::LeaderChanged(new.leader().map(str::to_string)));
    }

    events
}
