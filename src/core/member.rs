use std::collections::BTreeMap;
use std::fmt;

use snafu::location;

use crate::error::{Error, Result};
use crate::pb::{self, MemberStatus};

impl MemberStatus {
    /// Position of the status in the lifecycle order.
    pub fn rank(&self) -> i32 {
        *self as i32
    }

    /// Whether a member with this status must acknowledge a view
    /// before the leader may act on it.
    pub fn is_convergence_member(&self) -> bool {
        matches!(
            self,
            MemberStatus::Up | MemberStatus::Leaving | MemberStatus::Exiting
        )
    }

    /// Whether the member is still taking part in gossip.
    pub fn is_live(&self) -> bool {
        !matches!(self, MemberStatus::Down | MemberStatus::Removed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MemberStatus::Joining => "joining",
            MemberStatus::Up => "up",
            MemberStatus::Leaving => "leaving",
            MemberStatus::Exiting => "exiting",
            MemberStatus::Down => "down",
            MemberStatus::Removed => "removed",
        }
    }
}

impl fmt::Display for MemberStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A node participating in, or having participated in, the cluster.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Member {
    address: String,
    incarnation: u64,
    status: MemberStatus,
}

impl Member {
    pub fn new(address: impl Into<String>, incarnation: u64, status: MemberStatus) -> Self {
        Self {
            address: address.into(),
            incarnation,
            status,
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn incarnation(&self) -> u64 {
        self.incarnation
    }

    pub fn status(&self) -> MemberStatus {
        self.status
    }

    /// Returns a copy of this member moved to `status`.
    pub(crate) fn with_status(&self, status: MemberStatus) -> Self {
        Self {
            status,
            ..self.clone()
        }
    }

    /// Two records disagree when one carries the higher incarnation
    /// while the other is further along in its lifecycle.
    pub(crate) fn conflicts_with(&self, other: &Member) -> bool {
        self.incarnation != other.incarnation
            && (self.incarnation > other.incarnation) != (self.status >= other.status)
            && self.status != other.status
    }

    /// Resolves two records of the same address.
    ///
    /// The record further along in the lifecycle wins. Records with equal
    /// status are resolved by the higher incarnation.
    pub(crate) fn merge(&self, other: &Member) -> Member {
        match self.status.cmp(&other.status) {
            std::cmp::Ordering::Greater => self.clone(),
            std::cmp::Ordering::Less => other.clone(),
            std::cmp::Ordering::Equal if other.incarnation > self.incarnation => other.clone(),
            std::cmp::Ordering::Equal => self.clone(),
        }
    }
}

impl fmt::Display for Member {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}({})", self.address, self.incarnation, self.status)
    }
}

impl From<&Member> for pb::MemberState {
    fn from(member: &Member) -> Self {
        pb::MemberState {
            address: member.address.clone(),
            incarnation: member.incarnation,
            status: member.status as i32,
        }
    }
}

impl TryFrom<pb::MemberState> for Member {
    type Error = Error;

    fn try_from(value: pb::MemberState) -> Result<Self> {
        let status = MemberStatus::try_from(value.status)?;
        Ok(Member::new(value.address, value.incarnation, status))
    }
}

/// Ordered store of the members known to a node.
///
/// The registry is passive: it validates and stores records,
/// deciding which transition is allowed is up to the state machine.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MemberRegistry {
    members: BTreeMap<String, Member>,
}

impl MemberRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `member`, failing if it contradicts the existing record.
    pub fn upsert(&mut self, member: Member) -> Result<()> {
        if let Some(existing) = self.members.get(member.address()) {
            if existing.conflicts_with(&member) {
                return Err(Error::Conflict {
                    address: member.address.clone(),
                    local: existing.incarnation,
                    remote: member.incarnation,
                    location: location!(),
                });
            }
        }

        self.overwrite(member);
        Ok(())
    }

    pub fn overwrite(&mut self, member: Member) {
        self.members.insert(member.address.clone(), member);
    }

    pub fn get(&self, address: impl AsRef<str>) -> Option<&Member> {
        self.members.get(address.as_ref())
    }

    pub fn remove(&mut self, address: impl AsRef<str>) -> Option<Member> {
        self.members.remove(address.as_ref())
    }

    pub fn contains(&self, address: impl AsRef<str>) -> bool {
        self.members.contains_key(address.as_ref())
    }

    /// All members ordered by address.
    pub fn all(&self) -> impl Iterator<Item = &Member> {
        self.members.values()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}
