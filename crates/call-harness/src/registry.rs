//! Registry of live calls
//!
//! Owns every call from creation until its single removal on the terminal
//! transition. Each mutation rebuilds the conferenceability index, and the
//! ambient audio cue follows occupancy: it starts when the first call is added
//! and stops when the last one is removed. A cue that went silent while calls
//! were live (the service was unbound) is restarted by the next add.

use indexmap::IndexMap;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::call::Call;
use crate::conferenceable::ConferenceabilityIndex;
use crate::media::{AudioCue, MediaResourceProvider};
use crate::types::CallId;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RegistryStats {
    pub total_added: usize,
    pub total_removed: usize,
}

pub struct CallRegistry {
    /// Insertion ordered
    calls: IndexMap<CallId, Call>,
    index: ConferenceabilityIndex,
    media: Arc<dyn MediaResourceProvider>,
    cue: Arc<dyn AudioCue>,
    stats: RegistryStats,
}

impl CallRegistry {
    pub fn new(media: Arc<dyn MediaResourceProvider>, cue: Arc<dyn AudioCue>) -> Self {
        Self {
            calls: IndexMap::new(),
            index: ConferenceabilityIndex::default(),
            media,
            cue,
            stats: RegistryStats::default(),
        }
    }

    /// Register a new call
    pub fn add(&mut self, call: Call) -> CallId {
        let call_id = call.id;
        let was_empty = self.calls.is_empty();
        self.calls.insert(call_id, call);
        self.stats.total_added += 1;
        debug!("Registered call {} ({} active)", call_id, self.calls.len());

        if was_empty || !self.cue.is_playing() {
            if let Err(e) = self.cue.start() {
                warn!("Failed to start audio cue: {}", e);
            }
        }
        self.refresh_conferenceable();
        call_id
    }

    /// Unregister a call and release its media
    ///
    /// Returns `None` if the call was already removed.
    pub fn remove(&mut self, call_id: &CallId) -> Option<Call> {
        let mut call = self.calls.shift_remove(call_id)?;
        self.stats.total_removed += 1;
        debug!("Unregistered call {} ({} active)", call_id, self.calls.len());

        if let Some(handle) = call.take_media() {
            if let Err(e) = self.media.release(handle) {
                warn!("Failed to release media for call {}: {}", call_id, e);
            }
        }

        if self.calls.is_empty() {
            if let Err(e) = self.cue.stop() {
                warn!("Failed to stop audio cue: {}", e);
            }
        }
        self.refresh_conferenceable();
        Some(call)
    }

    pub fn get(&self, call_id: &CallId) -> Option<&Call> {
        self.calls.get(call_id)
    }

    pub(crate) fn get_mut(&mut self, call_id: &CallId) -> Option<&mut Call> {
        self.calls.get_mut(call_id)
    }

    pub fn contains(&self, call_id: &CallId) -> bool {
        self.calls.contains_key(call_id)
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    /// Calls in registration order
    pub fn calls(&self) -> impl Iterator<Item = &Call> {
        self.calls.values()
    }

    pub fn ids(&self) -> Vec<CallId> {
        self.calls.keys().copied().collect()
    }

    pub fn conferenceable(&self) -> &ConferenceabilityIndex {
        &self.index
    }

    /// Calls `call_id` could currently be merged with
    pub fn eligible(&self, call_id: &CallId) -> Vec<CallId> {
        self.index.eligible(call_id)
    }

    pub fn stats(&self) -> RegistryStats {
        self.stats
    }

    pub(crate) fn refresh_conferenceable(&mut self) {
        self.index = ConferenceabilityIndex::recompute(self.calls.values());
    }
}

impl std::fmt::Debug for CallRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallRegistry")
            .field("calls", &self.calls.len())
            .field("stats", &self.stats)
            .finish()
    }
}
