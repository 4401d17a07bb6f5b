use std::collections::{BTreeMap, BTreeSet};

use crate::pb::ObserverRecord;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
struct Observation {
    version: u64,
    unreachable: BTreeSet<String>,
}

/// Which observer considers which subject unreachable.
///
/// Every node only edits its own record and bumps the record's version on
/// each edit, so records from different views merge by keeping the newest.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub(crate) struct Reachability {
    records: BTreeMap<String, Observation>,
}

impl Reachability {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn is_unreachable_by(&self, observer: &str, subject: &str) -> bool {
        self.records
            .get(observer)
            .is_some_and(|record| record.unreachable.contains(subject))
    }

    /// Returns `true` if the record of `observer` changed.
    pub(crate) fn mark_unreachable(&mut self, observer: &str, subject: &str) -> bool {
        if observer == subject || self.is_unreachable_by(observer, subject) {
            return false;
        }

        let record = self.records.entry(observer.to_string()).or_default();
        record.unreachable.insert(subject.to_string());
        record.version += 1;
        true
    }

    /// Returns `true` if the record of `observer` changed.
    pub(crate) fn mark_reachable(&mut self, observer: &str, subject: &str) -> bool {
        let Some(record) = self.records.get_mut(observer) else {
            return false;
        };

        if !record.unreachable.remove(subject) {
            return false;
        }
        record.version += 1;
        true
    }

    /// Drops subjects from the record of `observer` for which `keep` is false.
    pub(crate) fn retain_subjects<F>(&mut self, observer: &str, keep: F) -> bool
    where
        F: Fn(&str) -> bool,
    {
        let Some(record) = self.records.get_mut(observer) else {
            return false;
        };

        let before = record.unreachable.len();
        record.unreachable.retain(|subject| keep(subject.as_str()));

        if record.unreachable.len() == before {
            return false;
        }
        record.version += 1;
        true
    }

    /// Subjects considered unreachable by at least one observer accepted by `observer_filter`.
    pub(crate) fn unreachable<F>(&self, observer_filter: F) -> BTreeSet<String>
    where
        F: Fn(&str) -> bool,
    {
        self.records
            .iter()
            .filter(|(observer, _)| observer_filter(observer.as_str()))
            .flat_map(|(_, record)| record.unreachable.iter().cloned())
            .collect()
    }

    pub(crate) fn merge(&self, other: &Reachability) -> Reachability {
        let mut records = self.records.clone();
        for (observer, record) in &other.records {
            match records.get(observer) {
                Some(local) if local.version >= record.version => {}
                _ => {
                    records.insert(observer.clone(), record.clone());
                }
            }
        }
        Reachability { records }
    }

    pub(crate) fn to_records(&self) -> Vec<ObserverRecord> {
        self.records
            .iter()
            .map(|(observer, record)| ObserverRecord {
                observer: observer.clone(),
                version: record.version,
                unreachable: record.unreachable.iter().cloned().collect(),
            })
            .collect()
    }

    pub(crate) fn from_records(records: Vec<ObserverRecord>) -> Self {
        let records = records
            .into_iter()
            .map(|record| {
                let observation = Observation {
                    version: record.version,
                    unreachable: record.unreachable.into_iter().collect(),
                };
                (record.observer, observation)
            })
            .collect();

        Self { records }
    }
}
