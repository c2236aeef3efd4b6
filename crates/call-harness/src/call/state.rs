//! Per-call state machine
//!
//! ```text
//!   Dialing ──answer/connect──► Active ◄──answer── Ringing
//!      │                        │  ▲                  │
//!    abort                 hold │  │ unhold         reject
//!      │                        ▼  │                  │
//!      │                       OnHold                 │
//!      ▼                                              ▼
//!   Disconnected ◄──────── disconnect (any) ──── Disconnected
//! ```
//!
//! `transition` is pure. Side effects of reaching `Disconnected` (media
//! release, registry and conference removal) belong to the service.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::types::DisconnectCause;

/// State of a simulated call leg
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CallState {
    Dialing,
    Ringing,
    Active,
    OnHold,
    /// Terminal
    Disconnected,
}

impl CallState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Disconnected)
    }

    /// Event that brings a call in this state to `Active`, if any
    pub fn activation_event(&self) -> Option<CallEvent> {
        match self {
            Self::Dialing => Some(CallEvent::Connect),
            Self::Ringing => Some(CallEvent::Answer),
            Self::Active => Some(CallEvent::Unhold),
            Self::OnHold => Some(CallEvent::Unhold),
            Self::Disconnected => None,
        }
    }
}

impl fmt::Display for CallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Dialing => "Dialing",
            Self::Ringing => "Ringing",
            Self::Active => "Active",
            Self::OnHold => "OnHold",
            Self::Disconnected => "Disconnected",
        };
        f.write_str(name)
    }
}

/// Events that drive a call's state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CallEvent {
    /// User answered (incoming) or the platform forced the call up
    Answer,
    /// Simulated network finished dialing
    Connect,
    Reject,
    Hold,
    Unhold,
    Disconnect,
    Abort,
    PlayDtmf(char),
    StopDtmf,
}

impl CallEvent {
    /// Cause recorded when this event ends a call
    pub fn disconnect_cause(&self) -> Option<DisconnectCause> {
        match self {
            Self::Disconnect => Some(DisconnectCause::Remote),
            Self::Reject => Some(DisconnectCause::Rejected),
            Self::Abort => Some(DisconnectCause::Canceled),
            _ => None,
        }
    }
}

impl fmt::Display for CallEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Answer => write!(f, "answer"),
            Self::Connect => write!(f, "connect"),
            Self::Reject => write!(f, "reject"),
            Self::Hold => write!(f, "hold"),
            Self::Unhold => write!(f, "unhold"),
            Self::Disconnect => write!(f, "disconnect"),
            Self::Abort => write!(f, "abort"),
            Self::PlayDtmf(digit) => write!(f, "dtmf({})", digit),
            Self::StopDtmf => write!(f, "stop-dtmf"),
        }
    }
}

/// Outcome of a legal transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: CallState,
    pub to: CallState,
}

impl Transition {
    pub fn changed(&self) -> bool {
        self.from != self.to
    }

    pub fn entered_terminal(&self) -> bool {
        self.changed() && self.to.is_terminal()
    }
}

/// Why an edge was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IllegalTransition {
    pub state: CallState,
    pub event: CallEvent,
}

/// Compute the next state for `event`
///
/// Repeating an event whose target is the current state (answer while
/// active, hold while on hold) succeeds without a change.
pub fn transition(state: CallState, event: CallEvent) -> Result<Transition, IllegalTransition> {
    use CallEvent as E;
    use CallState as S;

    let to = match (state, event) {
        (S::Disconnected, _) => return Err(IllegalTransition { state, event }),

        (S::Dialing, E::Answer | E::Connect) => S::Active,
        (S::Dialing, E::Abort) => S::Disconnected,

        (S::Ringing, E::Answer) => S::Active,
        (S::Ringing, E::Reject) => S::Disconnected,

        (S::Active, E::Answer | E::Connect | E::Unhold) => S::Active,
        (S::Active, E::Hold) => S::OnHold,

        (S::OnHold, E::Hold) => S::OnHold,
        (S::OnHold, E::Unhold) => S::Active,

        (_, E::Disconnect) => S::Disconnected,

        (S::Dialing | S::Active | S::OnHold, E::PlayDtmf(_) | E::StopDtmf) => state,

        _ => return Err(IllegalTransition { state, event }),
    };

    Ok(Transition { from: state, to })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_outgoing_happy_path() {
        let t = transition(CallState::Dialing, CallEvent::Connect).unwrap();
        assert_eq!(t.to, CallState::Active);
        assert!(t.changed());

        let t = transition(t.to, CallEvent::Hold).unwrap();
        assert_eq!(t.to, CallState::OnHold);

        let t = transition(t.to, CallEvent::Unhold).unwrap();
        assert_eq!(t.to, CallState::Active);

        let t = transition(t.to, CallEvent::Disconnect).unwrap();
        assert!(t.entered_terminal());
    }

    #[test]
    fn test_incoming_answer_and_reject() {
        assert_eq!(transition(CallState::Ringing, CallEvent::Answer).unwrap().to, CallState::Active);
        assert_eq!(
            transition(CallState::Ringing, CallEvent::Reject).unwrap().to,
            CallState::Disconnected
        );
    }

    #[test]
    fn test_idempotent_edges() {
        let t = transition(CallState::Active, CallEvent::Answer).unwrap();
        assert!(!t.changed());
        let t = transition(CallState::OnHold, CallEvent::Hold).unwrap();
        assert!(!t.changed());
        let t = transition(CallState::Active, CallEvent::Unhold).unwrap();
        assert!(!t.changed());
    }

    #[test]
    fn test_illegal_edges() {
        assert!(transition(CallState::Disconnected, CallEvent::Hold).is_err());
        assert!(transition(CallState::Disconnected, CallEvent::Disconnect).is_err());
        assert!(transition(CallState::Dialing, CallEvent::Hold).is_err());
        assert!(transition(CallState::Ringing, CallEvent::Hold).is_err());
        assert!(transition(CallState::Active, CallEvent::Reject).is_err());
        assert!(transition(CallState::Active, CallEvent::Abort).is_err());
        assert!(transition(CallState::Ringing, CallEvent::PlayDtmf('1')).is_err());
    }

    #[test]
    fn test_dtmf_keeps_state() {
        for state in [CallState::Dialing, CallState::Active, CallState::OnHold] {
            let t = transition(state, CallEvent::PlayDtmf('1')).unwrap();
            assert!(!t.changed());
        }
    }

    #[test]
    fn test_activation_event_reaches_active() {
        for state in [CallState::Dialing, CallState::Ringing, CallState::Active, CallState::OnHold] {
            let event = state.activation_event().unwrap();
            assert_eq!(transition(state, event).unwrap().to, CallState::Active);
        }
        assert!(CallState::Disconnected.activation_event().is_none());
    }

    fn arb_event() -> impl Strategy<Value = CallEvent> {
        prop_oneof![
            Just(CallEvent::Answer),
            Just(CallEvent::Connect),
            Just(CallEvent::Reject),
            Just(CallEvent::Hold),
            Just(CallEvent::Unhold),
            Just(CallEvent::Disconnect),
            Just(CallEvent::Abort),
            proptest::char::range('0', '9').prop_map(CallEvent::PlayDtmf),
            Just(CallEvent::StopDtmf),
        ]
    }

    fn arb_initial_state() -> impl Strategy<Value = CallState> {
        prop_oneof![Just(CallState::Dialing), Just(CallState::Ringing)]
    }

    proptest! {
        #[test]
        fn prop_disconnected_is_absorbing(
            start in arb_initial_state(),
            events in proptest::collection::vec(arb_event(), 0..40),
        ) {
            let mut state = start;
            let mut terminated = false;
            for event in events {
                match transition(state, event) {
                    Ok(t) => {
                        prop_assert!(!terminated, "{} left the terminal state", event);
                        state = t.to;
                    }
                    Err(e) => prop_assert_eq!(e.state, state),
                }
                terminated |= state.is_terminal();
                if terminated {
                    prop_assert_eq!(state, CallState::Disconnected);
                }
            }
        }
    }
}
