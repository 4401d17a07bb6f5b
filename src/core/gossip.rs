use std::collections::HashMap;
use std::time::{Duration, Instant};

use rand::{seq::IteratorRandom, Rng};

use super::view::MembershipView;

/// Probability of picking the gossip target among the members
/// that have not seen the current version yet.
const UNSEEN_PREFERENCE: f64 = 0.8;

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum GossiperState {
    Idle,
    WaitingForReply { target: String, since: Instant },
}

/// What the failure detector concluded about a peer that did not reply in time.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct MissedReply {
    pub(crate) target: String,
    pub(crate) consecutive: u32,
}

/// Chooses gossip targets and counts missed replies per peer.
#[derive(Clone, Debug)]
pub(crate) struct Gossiper {
    addr: String,
    state: GossiperState,
    failures: HashMap<String, u32>,
    timeout: Duration,
}

impl Gossiper {
    pub(crate) fn new(addr: impl Into<String>, timeout: Duration) -> Self {
        Self {
            addr: addr.into(),
            state: GossiperState::Idle,
            failures: HashMap::new(),
            timeout,
        }
    }

    pub(crate) fn state(&self) -> &GossiperState {
        &self.state
    }

    #[cfg(test)]
    pub(crate) fn failures(&self, peer: &str) -> u32 {
        self.failures.get(peer).copied().unwrap_or(0)
    }

    /// Picks a live peer, preferring those that have not seen the current version.
    pub(crate) fn select_target<R: Rng>(&self, view: &MembershipView, rng: &mut R) -> Option<String> {
        let candidates: Vec<&str> = view
            .members()
            .filter(|member| member.address() != self.addr && member.status().is_live())
            .map(|member| member.address())
            .collect();

        let unseen = candidates
            .iter()
            .filter(|address| !view.seen().contains(**address));

        let preferred = match rng.gen_bool(UNSEEN_PREFERENCE) {
            true => unseen.choose(&mut *rng),
            false => None,
        };

        preferred
            .or_else(|| candidates.iter().choose(rng))
            .map(|address| address.to_string())
    }

    /// Members that should receive a final copy of the view,
    /// i.e. everyone still live except this node.
    pub(crate) fn broadcast_targets(&self, view: &MembershipView) -> Vec<String> {
        view.members()
            .filter(|member| member.address() != self.addr && member.status().is_live())
            .map(|member| member.address().to_string())
            .collect()
    }

    pub(crate) fn record_sent(&mut self, target: impl Into<String>, now: Instant) {
        self.state = GossiperState::WaitingForReply {
            target: target.into(),
            since: now,
        };
    }

    /// Any message from `peer` proves it is alive.
    pub(crate) fn record_reply(&mut self, peer: &str) {
        self.failures.remove(peer);

        if let GossiperState::WaitingForReply { target, .. } = &self.state {
            if target == peer {
                self.state = GossiperState::Idle;
            }
        }
    }

    /// Returns the peer whose reply is overdue, counting the miss.
    pub(crate) fn check_timeout(&mut self, now: Instant) -> Option<MissedReply> {
        let GossiperState::WaitingForReply { target, since } = &self.state else {
            return None;
        };

        if now.duration_since(*since) < self.timeout {
            return None;
        }

        let target = target.clone();
        let consecutive = self.failures.entry(target.clone()).or_insert(0);
        *consecutive += 1;
        let consecutive = *consecutive;

        tracing::debug!(
            "[{}] no reply from {} ({} consecutive)",
            &self.addr,
            &target,
            consecutive
        );

        self.state = GossiperState::Idle;
        Some(MissedReply {
            target,
            consecutive,
        })
    }

    /// Forgets counters of peers that are no longer live members.
    pub(crate) fn retain_members(&mut self, view: &MembershipView) {
        self.failures
            .retain(|peer, _| view.member(peer).is_some_and(|member| member.status().is_live()));
    }
}
