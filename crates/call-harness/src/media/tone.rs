//! Looping "beep-boop" tone used as placeholder in-call audio

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::f32::consts::PI;
use std::time::Duration;
use tracing::{debug, info};

use super::AudioCue;
use crate::errors::{HarnessError, Result};

/// Generate a sine wave tone at the specified frequency
pub fn generate_tone(frequency: f32, sample_rate: u32, duration: Duration) -> Vec<i16> {
    let num_samples = (sample_rate as f32 * duration.as_secs_f32()) as usize;
    let mut samples = Vec::with_capacity(num_samples);

    for i in 0..num_samples {
        let t = i as f32 / sample_rate as f32;
        let sample = (2.0 * PI * frequency * t).sin();
        // 0.3 amplitude keeps the mix clear of clipping
        samples.push((sample * 0.3 * 32767.0) as i16);
    }

    samples
}

/// Shape of the placeholder tone
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToneConfig {
    pub beep_hz: f32,
    pub boop_hz: f32,
    pub segment_ms: u64,
    pub sample_rate: u32,
}

impl Default for ToneConfig {
    fn default() -> Self {
        Self {
            beep_hz: 880.0,
            boop_hz: 440.0,
            segment_ms: 250,
            sample_rate: 8000,
        }
    }
}

#[derive(Debug, Default)]
struct Playback {
    playing: bool,
    released: bool,
    cursor: usize,
    starts: usize,
    stops: usize,
}

/// Looping two-tone cue
#[derive(Debug)]
pub struct LoopingTone {
    samples: Vec<i16>,
    playback: Mutex<Playback>,
}

impl LoopingTone {
    pub fn new(config: &ToneConfig) -> Result<Self> {
        if config.sample_rate == 0 || config.segment_ms == 0 {
            return Err(HarnessError::config("tone needs a non-zero sample rate and segment length"));
        }
        let segment = Duration::from_millis(config.segment_ms);
        let mut samples = generate_tone(config.beep_hz, config.sample_rate, segment);
        samples.extend(generate_tone(config.boop_hz, config.sample_rate, segment));
        if samples.is_empty() {
            return Err(HarnessError::config("tone segment shorter than one sample"));
        }
        Ok(Self {
            samples,
            playback: Mutex::new(Playback::default()),
        })
    }

    /// Length of one loop in samples
    pub fn loop_len(&self) -> usize {
        self.samples.len()
    }

    /// Number of times playback actually started
    pub fn start_count(&self) -> usize {
        self.playback.lock().starts
    }

    pub fn stop_count(&self) -> usize {
        self.playback.lock().stops
    }

    /// Pull the next `len` samples; silence when stopped
    pub fn next_frame(&self, len: usize) -> Vec<i16> {
        let mut playback = self.playback.lock();
        if !playback.playing {
            return vec![0; len];
        }
        let mut frame = Vec::with_capacity(len);
        for _ in 0..len {
            frame.push(self.samples[playback.cursor]);
            playback.cursor = (playback.cursor + 1) % self.samples.len();
        }
        frame
    }
}

impl AudioCue for LoopingTone {
    fn start(&self) -> Result<()> {
        let mut playback = self.playback.lock();
        if playback.released {
            // Fresh player after an unbind
            playback.released = false;
            playback.cursor = 0;
            debug!("Re-prepared tone player");
        }
        if !playback.playing {
            playback.playing = true;
            playback.starts += 1;
            info!("Started in-call tone");
        }
        Ok(())
    }

    fn stop(&self) -> Result<()> {
        let mut playback = self.playback.lock();
        if playback.playing {
            playback.playing = false;
            playback.stops += 1;
            // Next start plays from the top, like a freshly prepared player
            playback.cursor = 0;
            info!("Stopped in-call tone");
        }
        Ok(())
    }

    fn is_playing(&self) -> bool {
        self.playback.lock().playing
    }

    fn release(&self) {
        let mut playback = self.playback.lock();
        if playback.playing {
            playback.playing = false;
            playback.stops += 1;
        }
        playback.released = true;
        debug!("Released tone player");
    }
}
