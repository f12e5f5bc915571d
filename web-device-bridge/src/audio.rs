// Copyright 2025 Red Hat Inc
//
// SPDX-License-Identifier: Apache-2.0 or BSD-3-Clause

//! Web Audio streaming: sample rings between the emulated sound device and
//! the browser audio callback.

mod ring;
mod stream;

use std::{
    fmt::{Display, Formatter},
    sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicU8, Ordering},
};

use thiserror::Error as ThisError;

pub use self::{
    ring::{AudioConsumer, AudioProducer, AudioRing},
    stream::{AudioEndpoint, AudioInfo, WebAudio},
};

#[derive(Debug, ThisError, PartialEq, Eq)]
pub enum Error {
    #[error("Ring capacity {0} is not a power of two of at least 2")]
    InvalidCapacity(usize),
    #[error("Invalid audio state transition: from {0} to {1}")]
    InvalidStateTransition(AudioState, AudioState),
}

pub type Result<T> = std::result::Result<T, Error>;

/// State of the browser audio context.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AudioState {
    Closed = 0,
    /// Created but not playing, e.g. waiting for a user gesture.
    #[default]
    Suspended = 1,
    Running = 2,
    /// Taken away by the platform (phone call, another app).
    Interrupted = 3,
}

macro_rules! set_new_state {
    ($new_state_fn:ident, $new_state:expr, $($valid_source_states:tt)*) => {
        pub fn $new_state_fn(&mut self) -> Result<()> {
            if !matches!(self, $($valid_source_states)*) {
                return Err(Error::InvalidStateTransition(*self, $new_state));
            }
            *self = $new_state;
            Ok(())
        }
    };
}

impl AudioState {
    set_new_state!(resume, Self::Running, Self::Suspended | Self::Running);

    set_new_state!(suspend, Self::Suspended, Self::Running | Self::Suspended);

    set_new_state!(interrupt, Self::Interrupted, Self::Running | Self::Suspended);

    set_new_state!(end_interruption, Self::Suspended, Self::Interrupted);

    set_new_state!(
        close,
        Self::Closed,
        Self::Suspended | Self::Running | Self::Interrupted
    );

    const fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Suspended,
            2 => Self::Running,
            3 => Self::Interrupted,
            _ => Self::Closed,
        }
    }
}

impl Display for AudioState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Suspended => write!(f, "suspended"),
            Self::Running => write!(f, "running"),
            Self::Interrupted => write!(f, "interrupted"),
        }
    }
}

/// An `AudioState` readable from the audio callback without locking.
#[derive(Debug)]
pub(crate) struct SharedState(AtomicU8);

impl Default for SharedState {
    fn default() -> Self {
        Self::new(AudioState::default())
    }
}

impl SharedState {
    pub(crate) fn new(state: AudioState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    pub(crate) fn load(&self) -> AudioState {
        AudioState::from_u8(self.0.load(Ordering::Acquire))
    }

    pub(crate) fn store(&self, state: AudioState) {
        self.0.store(state as u8, Ordering::Release);
    }
}

/// Counters updated by both sides of a stream.
#[derive(Debug, Default)]
pub struct AudioStats {
    samples_played: AtomicU64,
    samples_captured: AtomicU64,
    underruns: AtomicU64,
    overruns: AtomicU64,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct AudioStatsSnapshot {
    /// Frames accepted for playback.
    pub samples_played: u64,
    /// Samples captured from the microphone.
    pub samples_captured: u64,
    pub underruns: u64,
    pub overruns: u64,
}

impl AudioStats {
    pub(crate) fn add_played(&self, frames: u64) {
        self.samples_played.fetch_add(frames, Ordering::Relaxed);
    }

    pub(crate) fn add_captured(&self, samples: u64) {
        self.samples_captured.fetch_add(samples, Ordering::Relaxed);
    }

    pub(crate) fn underrun(&self) {
        self.underruns.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn overrun(&self) {
        self.overruns.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> AudioStatsSnapshot {
        AudioStatsSnapshot {
            samples_played: self.samples_played.load(Ordering::Relaxed),
            samples_captured: self.samples_captured.load(Ordering::Relaxed),
            underruns: self.underruns.load(Ordering::Relaxed),
            overruns: self.overruns.load(Ordering::Relaxed),
        }
    }
}

/// Volume, mute and input gain. Gains are `f32` stored as their bit
/// patterns.
#[derive(Debug)]
pub struct AudioControls {
    volume_left: AtomicU32,
    volume_right: AtomicU32,
    muted: AtomicBool,
    input_gain: AtomicU32,
}

impl Default for AudioControls {
    fn default() -> Self {
        Self {
            volume_left: AtomicU32::new(1.0f32.to_bits()),
            volume_right: AtomicU32::new(1.0f32.to_bits()),
            muted: AtomicBool::new(false),
            input_gain: AtomicU32::new(1.0f32.to_bits()),
        }
    }
}

impl AudioControls {
    pub fn set_volume(&self, left: f32, right: f32) {
        self.volume_left.store(left.to_bits(), Ordering::Relaxed);
        self.volume_right.store(right.to_bits(), Ordering::Relaxed);
    }

    pub fn volume(&self) -> (f32, f32) {
        (
            f32::from_bits(self.volume_left.load(Ordering::Relaxed)),
            f32::from_bits(self.volume_right.load(Ordering::Relaxed)),
        )
    }

    pub fn set_muted(&self, muted: bool) {
        self.muted.store(muted, Ordering::Relaxed);
    }

    pub fn is_muted(&self) -> bool {
        self.muted.load(Ordering::Relaxed)
    }

    pub fn set_input_gain(&self, gain: f32) {
        self.input_gain.store(gain.to_bits(), Ordering::Relaxed);
    }

    pub fn input_gain(&self) -> f32 {
        f32::from_bits(self.input_gain.load(Ordering::Relaxed))
    }

    /// Gain applied to each output channel. Mono output uses the average of
    /// both volumes, and muting overrides the volume without changing it.
    pub fn output_gains(&self, channels: usize) -> [f32; 2] {
        if self.is_muted() {
            return [0.0; 2];
        }
        let (left, right) = self.volume();
        if channels == 1 {
            let mono = (left + right) / 2.0;
            [mono, mono]
        } else {
            [left, right]
        }
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn test_state_transitions() {
        let mut state = AudioState::default();
        assert_eq!(state, AudioState::Suspended);

        state.resume().unwrap();
        state.resume().unwrap();
        assert_eq!(state, AudioState::Running);

        state.interrupt().unwrap();
        assert_matches!(
            state.resume(),
            Err(Error::InvalidStateTransition(
                AudioState::Interrupted,
                AudioState::Running
            ))
        );
        state.end_interruption().unwrap();
        assert_eq!(state, AudioState::Suspended);
        assert_matches!(state.end_interruption(), Err(_));

        state.close().unwrap();
        assert_matches!(state.close(), Err(_));
        assert_matches!(state.resume(), Err(_));
        assert_matches!(state.suspend(), Err(_));
        assert_matches!(state.interrupt(), Err(_));
        assert_eq!(state, AudioState::Closed);
    }

    #[test]
    fn test_state_display_and_encoding() {
        assert_eq!(
            Error::InvalidStateTransition(AudioState::Closed, AudioState::Running).to_string(),
            "Invalid audio state transition: from closed to running"
        );
        for state in [
            AudioState::Closed,
            AudioState::Suspended,
            AudioState::Running,
            AudioState::Interrupted,
        ] {
            let shared = SharedState::new(state);
            assert_eq!(shared.load(), state);
        }
    }

    #[test]
    fn test_output_gains() {
        let controls = AudioControls::default();
        assert_eq!(controls.output_gains(2), [1.0, 1.0]);

        controls.set_volume(0.5, 1.0);
        assert_eq!(controls.output_gains(2), [0.5, 1.0]);
        assert_eq!(controls.output_gains(1), [0.75, 0.75]);

        controls.set_muted(true);
        assert_eq!(controls.output_gains(2), [0.0, 0.0]);
        // Muting keeps the volume for when it is lifted.
        assert_eq!(controls.volume(), (0.5, 1.0));
        controls.set_muted(false);
        assert_eq!(controls.output_gains(2), [0.5, 1.0]);

        controls.set_input_gain(2.0);
        assert_eq!(controls.input_gain(), 2.0);
    }

    #[test]
    fn test_stats_snapshot() {
        let stats = AudioStats::default();
        stats.add_played(10);
        stats.add_captured(4);
        stats.underrun();
        stats.overrun();
        stats.overrun();
        assert_eq!(
            stats.snapshot(),
            AudioStatsSnapshot {
                samples_played: 10,
                samples_captured: 4,
                underruns: 1,
                overruns: 2,
            }
        );
    }
}
