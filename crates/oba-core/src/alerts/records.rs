//! The deduplicated set of alerts and the read-state that filters it.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Duration, Utc};
use oba_network::AgencyAlert;

/// How far from now an alert's start may be to count as "recent".
pub fn recent_window() -> Duration {
    Duration::hours(8)
}

/// Alerts keyed by id. Merging is commutative and idempotent: for two records
/// sharing an id, the one with the later start date wins, and the total
/// ordering of [`AgencyAlert`] breaks the remaining ties.
#[derive(Debug, Clone, Default)]
pub struct AlertSet {
    alerts: HashMap<String, AgencyAlert>,
}

impl AlertSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.alerts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.alerts.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&AgencyAlert> {
        self.alerts.get(id)
    }

    /// Insert one record. Returns `true` if the set changed.
    pub fn insert(&mut self, alert: AgencyAlert) -> bool {
        match self.alerts.get_mut(&alert.id) {
            None => {
                self.alerts.insert(alert.id.clone(), alert);
                true
            }
            Some(current) if supersedes(&alert, current) => {
                *current = alert;
                true
            }
            Some(_) => false,
        }
    }

    /// Union `batch` into the set. Returns `true` if anything changed.
    pub fn merge<I>(&mut self, batch: I) -> bool
    where
        I: IntoIterator<Item = AgencyAlert>,
    {
        let mut changed = false;
        for alert in batch {
            changed |= self.insert(alert);
        }
        changed
    }

    /// Every alert, newest start first. Undated alerts sort last.
    pub fn sorted(&self) -> Vec<AgencyAlert> {
        let mut all: Vec<AgencyAlert> = self.alerts.values().cloned().collect();
        all.sort_by(newest_first);
        all
    }

    /// WARNING/SEVERE alerts whose start lies within [`recent_window`] of `now`.
    pub fn recent_high_severity(&self, now: DateTime<Utc>) -> Vec<AgencyAlert> {
        let window = recent_window();
        let mut out: Vec<AgencyAlert> = self
            .alerts
            .values()
            .filter(|a| a.is_high_severity() && a.starts_within(now, window))
            .cloned()
            .collect();
        out.sort_by(newest_first);
        out
    }

    /// [`recent_high_severity`](Self::recent_high_severity) minus the alerts in `read`.
    pub fn recent_unread_high_severity(
        &self,
        now: DateTime<Utc>,
        read: &ReadState,
    ) -> Vec<AgencyAlert> {
        let mut out = self.recent_high_severity(now);
        out.retain(|a| !read.contains(&a.id));
        out
    }
}

fn supersedes(candidate: &AgencyAlert, current: &AgencyAlert) -> bool {
    (candidate.start_date, candidate) > (current.start_date, current)
}

fn newest_first(a: &AgencyAlert, b: &AgencyAlert) -> Ordering {
    b.start_date
        .cmp(&a.start_date)
        .then_with(|| a.id.cmp(&b.id))
}

// ---------------------------------------------------------------------------
// ReadState
// ---------------------------------------------------------------------------

/// Ids of alerts the user has acknowledged. Ids of alerts that are no longer
/// in the set are kept; the set only grows.
#[derive(Debug, Clone, Default)]
pub struct ReadState {
    ids: HashSet<String>,
}

impl ReadState {
    pub fn from_ids<I: IntoIterator<Item = String>>(ids: I) -> Self {
        Self {
            ids: ids.into_iter().collect(),
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    /// Returns `true` if `id` was not already read.
    pub fn insert(&mut self, id: &str) -> bool {
        self.ids.insert(id.to_string())
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Sorted, for stable persistence.
    pub fn to_sorted_vec(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.ids.iter().cloned().collect();
        ids.sort();
        ids
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
