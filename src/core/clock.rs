use std::collections::BTreeMap;

/// Result of comparing two [`VectorClock`]s.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum Causality {
    Same,
    Before,
    After,
    Concurrent,
}

/// Version of a membership view, one counter per node that modified it.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub(crate) struct VectorClock {
    versions: BTreeMap<String, u64>,
}

impl VectorClock {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn from_versions(versions: BTreeMap<String, u64>) -> Self {
        Self { versions }
    }

    pub(crate) fn versions(&self) -> &BTreeMap<String, u64> {
        &self.versions
    }

    pub(crate) fn get(&self, node: &str) -> u64 {
        self.versions.get(node).copied().unwrap_or(0)
    }

    pub(crate) fn tick(&mut self, node: impl AsRef<str>) {
        *self.versions.entry(node.as_ref().to_string()).or_insert(0) += 1;
    }

    pub(crate) fn merge(&self, other: &VectorClock) -> VectorClock {
        let mut versions = self.versions.clone();
        for (node, version) in &other.versions {
            let entry = versions.entry(node.clone()).or_insert(0);
            *entry = (*entry).max(*version);
        }
        VectorClock { versions }
    }

    /// Compares `self` against `other`; `Before` means `other` is newer.
    pub(crate) fn compare(&self, other: &VectorClock) -> Causality {
        let mut lower = false;
        let mut higher = false;

        for node in self.versions.keys().chain(other.versions.keys()) {
            let (a, b) = (self.get(node), other.get(node));
            lower |= a < b;
            higher |= a > b;
        }

        match (lower, higher) {
            (false, false) => Causality::Same,
            (true, false) => Causality::Before,
            (false, true) => Causality::After,
            (true, true) => Causality::Concurrent,
        }
    }
}
