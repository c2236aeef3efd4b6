//! Core types for the call harness
//!
//! Identifiers, phone numbers, connection requests and the small value types
//! shared by calls and conferences.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::errors::{HarnessError, Result};

/// Identifier of a simulated call leg
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
pub struct CallId(pub Uuid);

impl CallId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CallId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "call-{}", self.0)
    }
}

/// Conference identifier
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct ConferenceId(pub Uuid);

impl ConferenceId {
    /// Create a new conference ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConferenceId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConferenceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conf-{}", self.0)
    }
}

/// Which side created the call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CallDirection {
    Incoming,
    Outgoing,
    /// Call discovered by the platform that neither side explicitly placed
    Unknown,
}

/// Media shape of a call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum VideoState {
    #[default]
    AudioOnly,
    Bidirectional,
}

impl VideoState {
    pub fn from_video_flag(is_video: bool) -> Self {
        if is_video {
            Self::Bidirectional
        } else {
            Self::AudioOnly
        }
    }

    pub fn is_video(&self) -> bool {
        matches!(self, Self::Bidirectional)
    }
}

/// Why a call ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DisconnectCause {
    /// Hung up by the far end (also used for conference teardown)
    Remote,
    /// Incoming call declined
    Rejected,
    /// Connection aborted before it was established
    Canceled,
}

impl fmt::Display for DisconnectCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Remote => write!(f, "remote"),
            Self::Rejected => write!(f, "rejected"),
            Self::Canceled => write!(f, "canceled"),
        }
    }
}

/// Capability flags advertised by a call or conference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Capabilities {
    pub hold: bool,
    pub support_hold: bool,
    pub mute: bool,
    pub local_video: bool,
    pub manage_conference: bool,
}

impl Capabilities {
    /// Every test call is hold, mute and video capable
    pub fn test_call() -> Self {
        Self {
            hold: true,
            support_hold: true,
            mute: true,
            local_video: true,
            manage_conference: false,
        }
    }

    pub fn test_conference() -> Self {
        Self {
            hold: true,
            support_hold: true,
            mute: true,
            local_video: false,
            manage_conference: true,
        }
    }
}

/// A `tel:` address
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PhoneNumber(String);

impl PhoneNumber {
    pub const SCHEME: &'static str = "tel";

    /// Accepts digits with an optional leading `+`; a `tel:` prefix is stripped
    pub fn parse(input: &str) -> Result<Self> {
        let digits = input
            .strip_prefix("tel:")
            .unwrap_or(input)
            .trim();
        let body = digits.strip_prefix('+').unwrap_or(digits);
        if body.is_empty() || !body.chars().all(|c| c.is_ascii_digit()) {
            return Err(HarnessError::InvalidNumber(input.to_string()));
        }
        Ok(Self(digits.to_string()))
    }

    /// The scheme-specific part, e.g. `5551234`
    pub fn number(&self) -> &str {
        &self.0
    }

    pub fn to_uri(&self) -> String {
        format!("{}:{}", Self::SCHEME, self.0)
    }
}

impl fmt::Display for PhoneNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Extras carried by a connection request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestExtras {
    /// Gateway provider package, when the call is routed through a gateway
    pub gateway_package: Option<String>,
    /// Number the user dialed before gateway rewriting
    pub gateway_original_address: Option<String>,
    /// Address supplied by the notification that triggered an incoming call
    pub handle: Option<String>,
}

/// A request from the platform to create a connection
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionRequest {
    /// Account the platform is asking on behalf of
    pub account: Option<String>,
    /// Destination for outgoing calls
    pub address: Option<String>,
    pub is_video: bool,
    pub extras: RequestExtras,
}

impl ConnectionRequest {
    /// Outgoing call request to `address`
    pub fn outgoing(address: impl Into<String>) -> Self {
        Self {
            address: Some(address.into()),
            ..Default::default()
        }
    }

    /// Incoming call request for `account`
    pub fn incoming(account: impl Into<String>) -> Self {
        Self {
            account: Some(account.into()),
            ..Default::default()
        }
    }

    pub fn with_video(mut self, is_video: bool) -> Self {
        self.is_video = is_video;
        self
    }

    pub fn with_handle(mut self, handle: impl Into<String>) -> Self {
        self.extras.handle = Some(handle.into());
        self
    }

    pub fn with_gateway(mut self, package: impl Into<String>, original: impl Into<String>) -> Self {
        self.extras.gateway_package = Some(package.into());
        self.extras.gateway_original_address = Some(original.into());
        self
    }
}
