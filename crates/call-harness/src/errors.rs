//! Error types for the call harness

use thiserror::Error;

use crate::call::state::{CallEvent, CallState};
use crate::types::{CallId, ConferenceId};

/// Result type for harness operations
pub type Result<T> = std::result::Result<T, HarnessError>;

/// Errors that can occur in the call harness
///
/// Nothing here is transient: every operation is a synchronous in-memory
/// mutation, so callers should surface these rather than retry.
#[derive(Debug, Error)]
pub enum HarnessError {
    /// The event is not a legal edge from the call's current state
    #[error("Invalid transition for call {call_id}: {event} not allowed in {state}")]
    InvalidTransition {
        call_id: CallId,
        state: CallState,
        event: CallEvent,
    },

    /// Call is not in the registry
    #[error("Call not found: {0}")]
    UnknownCall(CallId),

    /// Conference is not known to the aggregator
    #[error("Conference not found: {0}")]
    UnknownConference(ConferenceId),

    /// Call is already a member of a conference
    #[error("Call {call_id} is already in conference {conference_id}")]
    AlreadyInConference {
        call_id: CallId,
        conference_id: ConferenceId,
    },

    /// Both legs of a merge are the same call
    #[error("Cannot merge call {0} with itself")]
    SelfMerge(CallId),

    /// Call has already reached its terminal state
    #[error("Call {0} is disconnected")]
    CallDisconnected(CallId),

    /// Outgoing number is not handled by the harness
    #[error("Not a test number: {number}")]
    NotATestNumber { number: String },

    /// Simulated provider crash
    #[error("Provider crashed while placing call to {number}")]
    ProviderCrash { number: String },

    /// Connection request came from a foreign account
    #[error("Invalid inputs: account {account:?} does not match {expected}")]
    InvalidAccount {
        account: Option<String>,
        expected: String,
    },

    /// Address could not be parsed as a phone number
    #[error("Invalid number: {0}")]
    InvalidNumber(String),

    /// Media or video resource provider failure
    #[error("Media resource error: {message}")]
    Media { message: String },

    /// Ambient audio cue failure
    #[error("Audio cue error: {message}")]
    AudioCue { message: String },

    /// Configuration error
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// The dispatcher task has stopped
    #[error("Dispatcher is closed")]
    DispatcherClosed,

    /// Internal error
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl HarnessError {
    /// Create a media resource error
    pub fn media(message: impl Into<String>) -> Self {
        Self::Media {
            message: message.into(),
        }
    }

    /// Create an audio cue error
    pub fn audio_cue(message: impl Into<String>) -> Self {
        Self::AudioCue {
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Whether the error came from an external collaborator rather than the core
    pub fn is_collaborator_failure(&self) -> bool {
        matches!(self, Self::Media { .. } | Self::AudioCue { .. })
    }
}
