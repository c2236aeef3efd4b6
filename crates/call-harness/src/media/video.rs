//! Fake camera/video provider for video test calls

use parking_lot::Mutex;
use std::collections::HashMap;
use tracing::debug;

use super::{MediaHandle, MediaResourceProvider};
use crate::errors::{HarnessError, Result};
use crate::types::CallId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct VideoSession {
    camera_on: bool,
    playing: bool,
}

#[derive(Debug, Default)]
struct Inner {
    next_id: u64,
    sessions: HashMap<u64, VideoSession>,
    released: usize,
}

/// Hands out a camera + test video playback per video call
#[derive(Debug, Default)]
pub struct TestVideoProvider {
    inner: Mutex<Inner>,
}

impl TestVideoProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handles acquired and not yet released
    pub fn live_count(&self) -> usize {
        self.inner.lock().sessions.len()
    }

    pub fn released_count(&self) -> usize {
        self.inner.lock().released
    }

    pub fn is_live(&self, handle: &MediaHandle) -> bool {
        self.inner
            .lock()
            .sessions
            .get(&handle.id)
            .map(|session| session.camera_on && session.playing)
            .unwrap_or(false)
    }
}

impl MediaResourceProvider for TestVideoProvider {
    fn acquire(&self, call_id: CallId) -> Result<MediaHandle> {
        let mut inner = self.inner.lock();
        inner.next_id += 1;
        let id = inner.next_id;
        inner.sessions.insert(
            id,
            VideoSession {
                camera_on: true,
                playing: true,
            },
        );
        let handle = MediaHandle { id, call_id };
        debug!("Acquired video resources {}", handle);
        Ok(handle)
    }

    fn release(&self, handle: MediaHandle) -> Result<()> {
        let mut inner = self.inner.lock();
        let mut session = inner
            .sessions
            .remove(&handle.id)
            .ok_or_else(|| HarnessError::media(format!("{} already released", handle)))?;
        // Playback first, then the camera
        session.playing = false;
        session.camera_on = false;
        inner.released += 1;
        debug!("Released video resources {} ({:?})", handle, session);
        Ok(())
    }
}
