// Copyright 2025 Red Hat Inc
//
// SPDX-License-Identifier: Apache-2.0 or BSD-3-Clause

use std::sync::Arc;

use log::{debug, info};

use super::{
    AudioConsumer, AudioControls, AudioProducer, AudioRing, AudioState, AudioStats,
    AudioStatsSnapshot, Result, SharedState,
};
use crate::AudioConfig;

/// Scratch space used to apply the input gain without allocating on the
/// audio thread.
const CAPTURE_CHUNK: usize = 256;

#[derive(Debug, Default)]
struct Shared {
    state: SharedState,
    stats: AudioStats,
    controls: AudioControls,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AudioInfo {
    pub state: AudioState,
    pub config: AudioConfig,
    pub stats: AudioStatsSnapshot,
    /// Output frames buffered and not yet rendered.
    pub buffered_frames: usize,
}

/// Emulation side of a Web Audio device: queues playback and collects
/// captured input.
#[derive(Debug)]
pub struct WebAudio {
    config: AudioConfig,
    state: AudioState,
    output: AudioProducer,
    input: AudioConsumer,
    shared: Arc<Shared>,
}

/// Presentation side, driven by the browser audio callback.
#[derive(Debug)]
pub struct AudioEndpoint {
    channels: usize,
    enable_input: bool,
    output: AudioConsumer,
    input: AudioProducer,
    shared: Arc<Shared>,
}

impl WebAudio {
    pub fn new(config: AudioConfig) -> Result<(Self, AudioEndpoint)> {
        let (output_producer, output_consumer) = AudioRing::new(config.ring_samples())?.split();
        let (input_producer, input_consumer) = AudioRing::new(config.ring_samples())?.split();
        let shared = Arc::new(Shared::default());
        info!(
            "Web Audio: {} Hz, {} channels, {} frame buffer, input {}",
            config.sample_rate(),
            config.channels(),
            config.buffer_frames(),
            if config.enable_input() { "on" } else { "off" }
        );

        let endpoint = AudioEndpoint {
            channels: config.channels() as usize,
            enable_input: config.enable_input(),
            output: output_consumer,
            input: input_producer,
            shared: Arc::clone(&shared),
        };
        let audio = Self {
            config,
            state: AudioState::default(),
            output: output_producer,
            input: input_consumer,
            shared,
        };
        Ok((audio, endpoint))
    }

    const fn channels(&self) -> usize {
        self.config.channels() as usize
    }

    /// Queues interleaved samples for playback. Only whole frames are taken;
    /// frames that do not fit are dropped and counted as an overrun.
    /// Returns the number of frames queued.
    pub fn write_frames(&mut self, samples: &[f32]) -> usize {
        if self.state == AudioState::Closed {
            return 0;
        }
        let channels = self.channels();
        let requested = samples.len() / channels;
        let frames = requested.min(self.free_frames());
        let written = self.output.write(&samples[..frames * channels]) / channels;
        if written < requested {
            self.shared.stats.overrun();
        }
        self.shared.stats.add_played(written as u64);
        written
    }

    /// Frames that can be queued without dropping any.
    pub fn free_frames(&self) -> usize {
        self.output.available_to_write() / self.channels()
    }

    /// Takes captured samples. Returns how many were read.
    pub fn read_input(&mut self, out: &mut [f32]) -> usize {
        self.input.read(out)
    }

    pub fn available_input(&self) -> usize {
        self.input.available_to_read()
    }

    pub const fn state(&self) -> AudioState {
        self.state
    }

    fn transition(&mut self, change: fn(&mut AudioState) -> Result<()>) -> Result<()> {
        let old = self.state;
        change(&mut self.state)?;
        self.shared.state.store(self.state);
        if old != self.state {
            debug!("Web Audio state {old} -> {}", self.state);
        }
        Ok(())
    }

    pub fn resume(&mut self) -> Result<()> {
        self.transition(AudioState::resume)
    }

    pub fn suspend(&mut self) -> Result<()> {
        self.transition(AudioState::suspend)
    }

    /// The platform took the audio session away (`began`) or gave it back.
    /// Playback stays suspended after an interruption until resumed.
    pub fn handle_interruption(&mut self, began: bool) -> Result<()> {
        if began {
            self.transition(AudioState::interrupt)
        } else {
            self.transition(AudioState::end_interruption)
        }
    }

    pub fn close(&mut self) -> Result<()> {
        self.transition(AudioState::close)
    }

    pub fn controls(&self) -> &AudioControls {
        &self.shared.controls
    }

    pub fn info(&self) -> AudioInfo {
        AudioInfo {
            state: self.state,
            config: self.config.clone(),
            stats: self.shared.stats.snapshot(),
            buffered_frames: self.output.available_to_read() / self.channels(),
        }
    }
}

impl AudioEndpoint {
    /// Fills `out` for playback and returns the number of queued samples it
    /// got. Only whole frames are taken from the ring; a trailing partial
    /// frame in `out` is left silent. A shortfall of frames is padded with
    /// silence and counted as an underrun. Outside the running state only
    /// silence is produced.
    pub fn render(&mut self, out: &mut [f32]) -> usize {
        if self.shared.state.load() != AudioState::Running {
            out.fill(0.0);
            return 0;
        }

        let whole = out.len() - out.len() % self.channels;
        let read = self.output.read(&mut out[..whole]);
        out[read..].fill(0.0);
        if read < whole {
            self.shared.stats.underrun();
        }

        let gains = self.shared.controls.output_gains(self.channels);
        for frame in out[..read].chunks_mut(self.channels) {
            for (sample, gain) in frame.iter_mut().zip(gains) {
                *sample *= gain;
            }
        }
        read
    }

    /// Pushes microphone samples, scaled by the input gain, to the emulator.
    /// Returns the number of samples accepted; anything dropped counts as an
    /// overrun.
    pub fn capture(&mut self, samples: &[f32]) -> usize {
        if !self.enable_input || self.shared.state.load() == AudioState::Closed {
            return 0;
        }

        let gain = self.shared.controls.input_gain();
        let mut scratch = [0.0f32; CAPTURE_CHUNK];
        let mut accepted = 0;
        for chunk in samples.chunks(CAPTURE_CHUNK) {
            let scaled = &mut scratch[..chunk.len()];
            for (dst, src) in scaled.iter_mut().zip(chunk) {
                *dst = src * gain;
            }
            let written = self.input.write(scaled);
            accepted += written;
            if written < chunk.len() {
                self.shared.stats.overrun();
                break;
            }
        }
        self.shared.stats.add_captured(accepted as u64);
        accepted
    }

    pub fn state(&self) -> AudioState {
        self.shared.state.load()
    }

    pub fn controls(&self) -> &AudioControls {
        &self.shared.controls
    }

    pub fn stats(&self) -> AudioStatsSnapshot {
        self.shared.stats.snapshot()
    }
}
