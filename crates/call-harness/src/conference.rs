//! Conference aggregation
//!
//! A conference is created by merging two calls. Membership lives here as a
//! list of call ids; each call keeps only a non-owning `ConferenceId` back
//! reference. A conference lives for as long as it has members: when a leg
//! disconnects or is split out it is detached, and the conference is destroyed
//! when the last one leaves.
//!
//! Hold and unhold are validated against every member before anything is
//! applied, so callers never observe a partially held conference.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::SystemTime;
use tracing::{debug, info};

use crate::call::state::{transition, CallEvent};
use crate::errors::{HarnessError, Result};
use crate::registry::CallRegistry;
use crate::types::{CallId, Capabilities, ConferenceId};

/// State shared by a conference and its members
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConferenceState {
    Active,
    OnHold,
    Disconnected,
}

impl fmt::Display for ConferenceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Active => write!(f, "Active"),
            Self::OnHold => write!(f, "OnHold"),
            Self::Disconnected => write!(f, "Disconnected"),
        }
    }
}

/// A merge of calls sharing hold and disconnect semantics
#[derive(Debug, Clone)]
pub struct Conference {
    pub id: ConferenceId,
    pub capabilities: Capabilities,
    pub created_at: SystemTime,
    state: ConferenceState,
    members: Vec<CallId>,
}

impl Conference {
    fn new(a: CallId, b: CallId) -> Self {
        Self {
            id: ConferenceId::new(),
            capabilities: Capabilities::test_conference(),
            created_at: SystemTime::now(),
            state: ConferenceState::Active,
            members: vec![a, b],
        }
    }

    pub fn state(&self) -> ConferenceState {
        self.state
    }

    pub fn members(&self) -> &[CallId] {
        &self.members
    }

    pub fn contains(&self, call_id: &CallId) -> bool {
        self.members.contains(call_id)
    }
}

/// Result of detaching a member
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Detached {
    pub conference_id: ConferenceId,
    /// The conference had no members left and was destroyed
    pub destroyed: bool,
}

/// Owns every live conference
#[derive(Debug, Default)]
pub struct ConferenceAggregator {
    conferences: HashMap<ConferenceId, Conference>,
}

impl ConferenceAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, conference_id: &ConferenceId) -> Option<&Conference> {
        self.conferences.get(conference_id)
    }

    pub fn len(&self) -> usize {
        self.conferences.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conferences.is_empty()
    }

    pub fn conferences(&self) -> impl Iterator<Item = &Conference> {
        self.conferences.values()
    }

    /// Merge two calls into a new Active conference
    ///
    /// Both legs are brought to `Active` whatever their prior state.
    pub fn merge(&mut self, registry: &mut CallRegistry, a: CallId, b: CallId) -> Result<ConferenceId> {
        if a == b {
            return Err(HarnessError::SelfMerge(a));
        }

        let mut activations = Vec::with_capacity(2);
        for call_id in [a, b] {
            let call = registry.get(&call_id).ok_or(HarnessError::UnknownCall(call_id))?;
            if let Some(conference_id) = call.conference() {
                return Err(HarnessError::AlreadyInConference { call_id, conference_id });
            }
            let event = call
                .state()
                .activation_event()
                .ok_or(HarnessError::CallDisconnected(call_id))?;
            activations.push((call_id, event));
        }

        let conference = Conference::new(a, b);
        let conference_id = conference.id;
        for (call_id, event) in activations {
            if let Some(call) = registry.get_mut(&call_id) {
                call.handle(event)?;
                call.set_conference(Some(conference_id));
            }
        }
        self.conferences.insert(conference_id, conference);
        registry.refresh_conferenceable();

        info!("Created conference {} from {} and {}", conference_id, a, b);
        Ok(conference_id)
    }

    /// Remove `call_id` from `conference_id` without disconnecting it
    ///
    /// Returns `None` if the call was not a member.
    pub fn split(&mut self, registry: &mut CallRegistry, conference_id: &ConferenceId, call_id: &CallId) -> Option<Detached> {
        let is_member = self
            .conferences
            .get(conference_id)
            .map(|conference| conference.contains(call_id))
            .unwrap_or(false);
        if !is_member {
            debug!("Ignoring split of {} from {}: not a member", call_id, conference_id);
            return None;
        }

        let detached = self.detach(registry, conference_id, call_id);
        registry.refresh_conferenceable();
        info!("Split {} from conference {}", call_id, conference_id);
        detached
    }

    /// Drop a member, destroying the conference once it is empty
    ///
    /// Called for splits and for members reaching their terminal state.
    pub fn detach(&mut self, registry: &mut CallRegistry, conference_id: &ConferenceId, call_id: &CallId) -> Option<Detached> {
        let conference = self.conferences.get_mut(conference_id)?;
        let before = conference.members.len();
        conference.members.retain(|member| member != call_id);
        if conference.members.len() == before {
            return None;
        }

        if let Some(call) = registry.get_mut(call_id) {
            if call.conference() == Some(*conference_id) {
                call.set_conference(None);
            }
        }

        let destroyed = conference.members.is_empty();
        if destroyed {
            conference.state = ConferenceState::Disconnected;
            self.conferences.remove(conference_id);
            info!("Conference {} destroyed after last member left", conference_id);
        } else {
            debug!("Detached {} from conference {}", call_id, conference_id);
        }

        Some(Detached {
            conference_id: *conference_id,
            destroyed,
        })
    }

    pub fn hold(&mut self, registry: &mut CallRegistry, conference_id: &ConferenceId) -> Result<()> {
        self.set_state(registry, conference_id, CallEvent::Hold, ConferenceState::OnHold)
    }

    pub fn unhold(&mut self, registry: &mut CallRegistry, conference_id: &ConferenceId) -> Result<()> {
        self.set_state(registry, conference_id, CallEvent::Unhold, ConferenceState::Active)
    }

    /// Members to disconnect; the conference goes away as each one detaches
    pub fn members_of(&self, conference_id: &ConferenceId) -> Result<Vec<CallId>> {
        self.conferences
            .get(conference_id)
            .map(|conference| conference.members.clone())
            .ok_or(HarnessError::UnknownConference(*conference_id))
    }

    fn set_state(
        &mut self,
        registry: &mut CallRegistry,
        conference_id: &ConferenceId,
        event: CallEvent,
        target: ConferenceState,
    ) -> Result<()> {
        let conference = self
            .conferences
            .get_mut(conference_id)
            .ok_or(HarnessError::UnknownConference(*conference_id))?;

        // Validate every member before touching any of them
        for call_id in &conference.members {
            let state = registry
                .get(call_id)
                .map(|call| call.state())
                .ok_or(HarnessError::UnknownCall(*call_id))?;
            transition(state, event).map_err(|illegal| HarnessError::InvalidTransition {
                call_id: *call_id,
                state: illegal.state,
                event: illegal.event,
            })?;
        }

        for call_id in &conference.members {
            if let Some(call) = registry.get_mut(call_id) {
                call.handle(event)?;
            }
        }
        conference.state = target;
        info!("Conference {} is now {}", conference_id, target);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::call::state::CallState;
    use crate::call::Call;
    use crate::media::{LoopingTone, TestVideoProvider, ToneConfig};
    use crate::types::{CallDirection, PhoneNumber, VideoState};
    use std::sync::Arc;

    fn member_matches(state: CallState, conference: ConferenceState) -> bool {
        matches!(
            (state, conference),
            (CallState::Active, ConferenceState::Active) | (CallState::OnHold, ConferenceState::OnHold)
        )
    }

    fn registry() -> CallRegistry {
        CallRegistry::new(
            Arc::new(TestVideoProvider::new()),
            Arc::new(LoopingTone::new(&ToneConfig::default()).unwrap()),
        )
    }

    fn add(registry: &mut CallRegistry, direction: CallDirection) -> CallId {
        registry.add(Call::new(
            direction,
            PhoneNumber::parse("5550999").unwrap(),
            VideoState::AudioOnly,
        ))
    }

    #[test]
    fn test_merge_activates_both_legs() {
        let mut registry = registry();
        let mut aggregator = ConferenceAggregator::new();
        let a = add(&mut registry, CallDirection::Incoming);
        let b = add(&mut registry, CallDirection::Outgoing);

        let conference_id = aggregator.merge(&mut registry, a, b).unwrap();
        let conference = aggregator.get(&conference_id).unwrap();
        assert_eq!(conference.state(), ConferenceState::Active);
        assert_eq!(conference.members(), &[a, b]);
        assert!(conference.capabilities.manage_conference);

        for id in [a, b] {
            let call = registry.get(&id).unwrap();
            assert_eq!(call.state(), CallState::Active);
            assert_eq!(call.conference(), Some(conference_id));
            assert!(registry.eligible(&id).is_empty());
        }
    }

    #[test]
    fn test_merge_preconditions() {
        let mut registry = registry();
        let mut aggregator = ConferenceAggregator::new();
        let a = add(&mut registry, CallDirection::Incoming);
        let b = add(&mut registry, CallDirection::Incoming);
        let c = add(&mut registry, CallDirection::Incoming);

        assert!(matches!(aggregator.merge(&mut registry, a, a), Err(HarnessError::SelfMerge(_))));
        assert!(matches!(
            aggregator.merge(&mut registry, a, CallId::new()),
            Err(HarnessError::UnknownCall(_))
        ));

        aggregator.merge(&mut registry, a, b).unwrap();
        assert!(matches!(
            aggregator.merge(&mut registry, c, a),
            Err(HarnessError::AlreadyInConference { .. })
        ));
        // c was validated but never touched
        assert_eq!(registry.get(&c).unwrap().state(), CallState::Ringing);
    }

    #[test]
    fn test_merge_rejects_disconnected_leg() {
        let mut registry = registry();
        let mut aggregator = ConferenceAggregator::new();
        let a = add(&mut registry, CallDirection::Incoming);
        let b = add(&mut registry, CallDirection::Incoming);
        registry.get_mut(&b).unwrap().handle(CallEvent::Reject).unwrap();

        assert!(matches!(
            aggregator.merge(&mut registry, a, b),
            Err(HarnessError::CallDisconnected(id)) if id == b
        ));
        assert_eq!(registry.get(&a).unwrap().state(), CallState::Ringing);
        assert!(aggregator.is_empty());
    }

    #[test]
    fn test_detach_demotes_then_destroys() {
        let mut registry = registry();
        let mut aggregator = ConferenceAggregator::new();
        let a = add(&mut registry, CallDirection::Outgoing);
        let b = add(&mut registry, CallDirection::Outgoing);
        let conference_id = aggregator.merge(&mut registry, a, b).unwrap();

        let detached = aggregator.detach(&mut registry, &conference_id, &a).unwrap();
        assert!(!detached.destroyed);
        assert_eq!(aggregator.get(&conference_id).unwrap().members(), &[b]);
        assert_eq!(registry.get(&a).unwrap().conference(), None);

        assert!(aggregator.detach(&mut registry, &conference_id, &a).is_none());

        let detached = aggregator.detach(&mut registry, &conference_id, &b).unwrap();
        assert!(detached.destroyed);
        assert!(aggregator.get(&conference_id).is_none());
    }

    #[test]
    fn test_split_non_member_is_noop() {
        let mut registry = registry();
        let mut aggregator = ConferenceAggregator::new();
        let a = add(&mut registry, CallDirection::Outgoing);
        let b = add(&mut registry, CallDirection::Outgoing);
        let c = add(&mut registry, CallDirection::Outgoing);
        let conference_id = aggregator.merge(&mut registry, a, b).unwrap();

        assert!(aggregator.split(&mut registry, &conference_id, &c).is_none());
        assert!(aggregator.split(&mut registry, &ConferenceId::new(), &a).is_none());
        assert_eq!(aggregator.get(&conference_id).unwrap().members().len(), 2);

        let detached = aggregator.split(&mut registry, &conference_id, &a).unwrap();
        assert!(!detached.destroyed);
        assert_eq!(registry.eligible(&a), vec![c]);
        assert_eq!(registry.get(&a).unwrap().state(), CallState::Active);
    }

    #[test]
    fn test_hold_and_unhold_fan_out() {
        let mut registry = registry();
        let mut aggregator = ConferenceAggregator::new();
        let a = add(&mut registry, CallDirection::Outgoing);
        let b = add(&mut registry, CallDirection::Incoming);
        let conference_id = aggregator.merge(&mut registry, a, b).unwrap();

        aggregator.hold(&mut registry, &conference_id).unwrap();
        let conference = aggregator.get(&conference_id).unwrap();
        assert_eq!(conference.state(), ConferenceState::OnHold);
        for id in conference.members() {
            assert!(member_matches(registry.get(id).unwrap().state(), conference.state()));
        }

        aggregator.unhold(&mut registry, &conference_id).unwrap();
        assert_eq!(aggregator.get(&conference_id).unwrap().state(), ConferenceState::Active);
        assert_eq!(registry.get(&a).unwrap().state(), CallState::Active);
        assert_eq!(registry.get(&b).unwrap().state(), CallState::Active);
    }

    #[test]
    fn test_hold_is_all_or_nothing() {
        let mut registry = registry();
        let mut aggregator = ConferenceAggregator::new();
        let a = add(&mut registry, CallDirection::Outgoing);
        let b = add(&mut registry, CallDirection::Outgoing);
        let conference_id = aggregator.merge(&mut registry, a, b).unwrap();

        // Terminal member still listed: hold must refuse before touching a
        registry.get_mut(&b).unwrap().handle(CallEvent::Disconnect).unwrap();

        let err = aggregator.hold(&mut registry, &conference_id).unwrap_err();
        assert!(matches!(err, HarnessError::InvalidTransition { call_id, .. } if call_id == b));
        assert_eq!(registry.get(&a).unwrap().state(), CallState::Active);
        assert_eq!(aggregator.get(&conference_id).unwrap().state(), ConferenceState::Active);
    }

    #[test]
    fn test_unknown_conference() {
        let mut registry = registry();
        let mut aggregator = ConferenceAggregator::new();
        let missing = ConferenceId::new();
        assert!(matches!(
            aggregator.hold(&mut registry, &missing),
            Err(HarnessError::UnknownConference(_))
        ));
        assert!(matches!(aggregator.members_of(&missing), Err(HarnessError::UnknownConference(_))));
    }
}
