//! Conferenceable-set index
//!
//! For every registered call that is not in a conference, the set of other
//! unconferenced calls it could be merged with. The index is rebuilt from
//! scratch on every membership change and never patched in place, so it is
//! symmetric by construction and a call is never eligible for itself.

use std::collections::{BTreeSet, HashMap};

use crate::call::Call;
use crate::types::CallId;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConferenceabilityIndex {
    eligible: HashMap<CallId, BTreeSet<CallId>>,
}

impl ConferenceabilityIndex {
    /// Rebuild the index from the current set of calls
    pub fn recompute<'a>(calls: impl IntoIterator<Item = &'a Call>) -> Self {
        let mut eligible = HashMap::new();
        let mut free = Vec::new();

        for call in calls {
            if call.conference().is_none() && !call.state().is_terminal() {
                free.push(call.id);
            }
            eligible.insert(call.id, BTreeSet::new());
        }

        for id in &free {
            let others = free.iter().filter(|other| *other != id).copied().collect();
            eligible.insert(*id, others);
        }

        Self { eligible }
    }

    /// Calls `call_id` could be merged with; empty for unknown or conferenced calls
    pub fn eligible(&self, call_id: &CallId) -> Vec<CallId> {
        self.eligible
            .get(call_id)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn is_conferenceable(&self, a: &CallId, b: &CallId) -> bool {
        self.eligible.get(a).map(|set| set.contains(b)).unwrap_or(false)
    }

    /// Number of calls covered by the index
    pub fn len(&self) -> usize {
        self.eligible.len()
    }

    pub fn is_empty(&self) -> bool {
        self.eligible.is_empty()
    }

    /// Owned copy of every eligible set
    pub fn to_map(&self) -> HashMap<CallId, Vec<CallId>> {
        self.eligible
            .iter()
            .map(|(id, set)| (*id, set.iter().copied().collect()))
            .collect()
    }
}
