//! Media collaborators
//!
//! The harness never drives playback itself. Calls hold an opaque
//! [`MediaHandle`] from a [`MediaResourceProvider`], and the registry flips an
//! [`AudioCue`] on and off as the set of calls fills and empties.

pub mod tone;
pub mod video;

pub use tone::{generate_tone, LoopingTone, ToneConfig};
pub use video::TestVideoProvider;

use std::fmt;

use crate::errors::Result;
use crate::types::CallId;

/// Opaque reference to a media resource attached to a call
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MediaHandle {
    pub id: u64,
    pub call_id: CallId,
}

impl fmt::Display for MediaHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "media-{}@{}", self.id, self.call_id)
    }
}

/// Supplies camera/video resources for video calls
pub trait MediaResourceProvider: Send + Sync {
    /// Attach a new resource to `call_id`
    fn acquire(&self, call_id: CallId) -> Result<MediaHandle>;

    /// Stop playback and the camera behind `handle`
    fn release(&self, handle: MediaHandle) -> Result<()>;
}

/// Ambient in-call audio, e.g. a looping tone
pub trait AudioCue: Send + Sync {
    fn start(&self) -> Result<()>;

    fn stop(&self) -> Result<()>;

    fn is_playing(&self) -> bool;

    /// Drop any underlying player; called when the service is unbound
    ///
    /// A later `start` must prepare a new one.
    fn release(&self) {}
}
