//! Simulated call legs

pub mod state;

use std::time::SystemTime;
use tracing::debug;

use crate::errors::{HarnessError, Result};
use crate::media::MediaHandle;
use crate::types::{
    CallDirection, CallId, Capabilities, ConferenceId, DisconnectCause, PhoneNumber, VideoState,
};
use state::{transition, CallEvent, CallState, Transition};

/// One simulated telephone leg
#[derive(Debug, Clone)]
pub struct Call {
    pub id: CallId,
    pub direction: CallDirection,
    pub address: PhoneNumber,
    pub video_state: VideoState,
    pub capabilities: Capabilities,
    state: CallState,
    /// Lookup only; the aggregator owns membership
    conference: Option<ConferenceId>,
    media: Option<MediaHandle>,
    disconnect_cause: Option<DisconnectCause>,
    dtmf_digits: String,
    pub created_at: SystemTime,
}

impl Call {
    /// Create a call in its initial state for `direction`
    pub fn new(direction: CallDirection, address: PhoneNumber, video_state: VideoState) -> Self {
        let state = match direction {
            CallDirection::Incoming => CallState::Ringing,
            CallDirection::Outgoing | CallDirection::Unknown => CallState::Dialing,
        };
        Self {
            id: CallId::new(),
            direction,
            address,
            video_state,
            capabilities: Capabilities::test_call(),
            state,
            conference: None,
            media: None,
            disconnect_cause: None,
            dtmf_digits: String::new(),
            created_at: SystemTime::now(),
        }
    }

    pub fn with_media(mut self, media: MediaHandle) -> Self {
        self.media = Some(media);
        self
    }

    pub fn state(&self) -> CallState {
        self.state
    }

    pub fn is_incoming(&self) -> bool {
        self.direction == CallDirection::Incoming
    }

    pub fn conference(&self) -> Option<ConferenceId> {
        self.conference
    }

    pub fn disconnect_cause(&self) -> Option<&DisconnectCause> {
        self.disconnect_cause.as_ref()
    }

    pub fn media(&self) -> Option<&MediaHandle> {
        self.media.as_ref()
    }

    /// DTMF digits played on this call, in order
    pub fn dtmf_digits(&self) -> &str {
        &self.dtmf_digits
    }

    /// Apply a platform event to this call
    pub fn handle(&mut self, event: CallEvent) -> Result<Transition> {
        let t = transition(self.state, event).map_err(|illegal| HarnessError::InvalidTransition {
            call_id: self.id,
            state: illegal.state,
            event: illegal.event,
        })?;

        if let CallEvent::PlayDtmf(digit) = event {
            self.dtmf_digits.push(digit);
        }
        if t.entered_terminal() {
            self.disconnect_cause = event.disconnect_cause();
        }
        if t.changed() {
            debug!("Call {} {} -> {} on {}", self.id, t.from, t.to, event);
        }
        self.state = t.to;
        Ok(t)
    }

    pub(crate) fn set_conference(&mut self, conference: Option<ConferenceId>) {
        self.conference = conference;
    }

    pub(crate) fn take_media(&mut self) -> Option<MediaHandle> {
        self.media.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn number() -> PhoneNumber {
        PhoneNumber::parse("5550001").unwrap()
    }

    #[test]
    fn test_initial_state_by_direction() {
        assert_eq!(Call::new(CallDirection::Incoming, number(), VideoState::AudioOnly).state(), CallState::Ringing);
        assert_eq!(Call::new(CallDirection::Outgoing, number(), VideoState::AudioOnly).state(), CallState::Dialing);
        assert_eq!(Call::new(CallDirection::Unknown, number(), VideoState::AudioOnly).state(), CallState::Dialing);
    }

    #[test]
    fn test_reject_records_cause() {
        let mut call = Call::new(CallDirection::Incoming, number(), VideoState::AudioOnly);
        call.handle(CallEvent::Reject).unwrap();
        assert_eq!(call.state(), CallState::Disconnected);
        assert_eq!(call.disconnect_cause(), Some(&DisconnectCause::Rejected));
    }

    #[test]
    fn test_terminal_state_is_sticky() {
        let mut call = Call::new(CallDirection::Outgoing, number(), VideoState::AudioOnly);
        call.handle(CallEvent::Abort).unwrap();

        let err = call.handle(CallEvent::Unhold).unwrap_err();
        assert!(matches!(
            err,
            HarnessError::InvalidTransition { state: CallState::Disconnected, event: CallEvent::Unhold, .. }
        ));
        assert_eq!(call.state(), CallState::Disconnected);
        assert_eq!(call.disconnect_cause(), Some(&DisconnectCause::Canceled));
    }

    #[test]
    fn test_dtmf_digits_recorded() {
        let mut call = Call::new(CallDirection::Outgoing, number(), VideoState::AudioOnly);
        call.handle(CallEvent::Connect).unwrap();
        call.handle(CallEvent::PlayDtmf('1')).unwrap();
        call.handle(CallEvent::StopDtmf).unwrap();
        call.handle(CallEvent::PlayDtmf('#')).unwrap();
        assert_eq!(call.dtmf_digits(), "1#");
        assert_eq!(call.state(), CallState::Active);
    }
}
